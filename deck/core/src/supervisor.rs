//! Connectivity Supervisor
//!
//! Keeps a local view of whether the inference service is reachable and
//! drives reconnection when it is not.
//!
//! # State Machine
//!
//! ```text
//!              probe fails / transport error
//!   Connected ─────────────────────────────► Disconnected
//!       ▲                                        │
//!       │ probe succeeds                         │ auto-reconnect
//!       │ (attempts reset, resync once)          ▼
//!       └──────────────────────────────── Reconnecting
//!                                                │
//!                      attempt budget exhausted  │
//!                      Disconnected ◄────────────┘
//! ```
//!
//! Each reconnect attempt sleeps `reconnect_interval` and then probes.
//! At most one reconnect cycle runs at a time, and a periodic health check
//! is skipped while the previous one is still outstanding.
//!
//! Failures never propagate out of the supervisor; they are recorded in
//! [`ConnectionState`], which observers read through a
//! [`tokio::sync::watch`] channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::backend::InferenceApi;
use crate::error::ClientError;
use crate::now_ms;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for health checking and reconnection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Interval between periodic health probes (default: 30 seconds)
    pub health_check_interval: Duration,
    /// Sleep before each reconnect probe (default: 3 seconds)
    pub reconnect_interval: Duration,
    /// Probes per reconnect cycle before giving up (default: 5)
    pub max_reconnect_attempts: u32,
    /// Upper bound on a single probe (default: 5 seconds)
    pub probe_timeout: Duration,
    /// Whether a lost connection starts a reconnect cycle
    pub auto_reconnect: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            reconnect_interval: Duration::from_millis(3000),
            max_reconnect_attempts: 5,
            probe_timeout: Duration::from_secs(5),
            auto_reconnect: true,
        }
    }
}

impl SupervisorConfig {
    /// Create a config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reconnect interval
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set the attempt budget
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the health check interval
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Enable or disable auto-reconnect
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Create a config suitable for testing (millisecond intervals)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            health_check_interval: Duration::from_millis(50),
            reconnect_interval: Duration::from_millis(5),
            max_reconnect_attempts: 5,
            probe_timeout: Duration::from_millis(200),
            auto_reconnect: true,
        }
    }
}

// ============================================================================
// Connection State
// ============================================================================

/// Coarse phase derived from [`ConnectionState`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionPhase {
    /// Last probe succeeded
    Connected,
    /// Service unreachable, no reconnect cycle running
    Disconnected,
    /// Reconnect cycle in progress
    Reconnecting,
}

/// Observable connection state
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Whether the last probe succeeded
    pub connected: bool,
    /// Whether a reconnect cycle is showing progress
    pub reconnecting: bool,
    /// Attempts made in the current cycle
    pub attempts: u32,
    /// Attempt budget of a cycle
    pub max_attempts: u32,
    /// Error from the most recent failure
    pub last_error: Option<String>,
    /// When the last probe finished (Unix timestamp ms)
    pub last_check: Option<u64>,
}

impl ConnectionState {
    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        if self.connected {
            ConnectionPhase::Connected
        } else if self.reconnecting {
            ConnectionPhase::Reconnecting
        } else {
            ConnectionPhase::Disconnected
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase() {
            ConnectionPhase::Connected => write!(f, "connected"),
            ConnectionPhase::Reconnecting => write!(
                f,
                "reconnecting (attempt {} of {})",
                self.attempts, self.max_attempts
            ),
            ConnectionPhase::Disconnected => match &self.last_error {
                Some(error) => write!(f, "disconnected: {error}"),
                None => write!(f, "disconnected"),
            },
        }
    }
}

/// A change of [`ConnectionPhase`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// Phase before the change
    pub from: ConnectionPhase,
    /// Phase after the change
    pub to: ConnectionPhase,
}

// ============================================================================
// Collaborators
// ============================================================================

/// Liveness check against the service
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Succeeds if the service answered
    async fn probe(&self) -> Result<(), ClientError>;
}

#[async_trait]
impl<A: InferenceApi + ?Sized> HealthProbe for A {
    async fn probe(&self) -> Result<(), ClientError> {
        self.version().await.map(|_| ())
    }
}

/// Called once after every recovery
#[async_trait]
pub trait Resynchronize: Send + Sync {
    /// Refresh whatever state may be stale after an outage
    async fn resynchronize(&self);
}

/// Clears an "already running" flag when dropped
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// Supervisor
// ============================================================================

const TRANSITION_BUFFER: usize = 32;

/// Drives health checks and reconnection for one service
pub struct ConnectivitySupervisor {
    config: RwLock<SupervisorConfig>,
    probe: Arc<dyn HealthProbe>,
    resync: Arc<dyn Resynchronize>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<PhaseTransition>,
    /// Set while a health check is outstanding
    check_running: AtomicBool,
    /// Set while a reconnect cycle is running
    cycle_running: AtomicBool,
}

impl fmt::Debug for ConnectivitySupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivitySupervisor")
            .field("config", &*self.config.read())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectivitySupervisor {
    /// Create a supervisor. The initial state is disconnected with no error.
    pub fn new(
        config: SupervisorConfig,
        probe: Arc<dyn HealthProbe>,
        resync: Arc<dyn Resynchronize>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState {
            max_attempts: config.max_reconnect_attempts,
            ..ConnectionState::default()
        });
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            config: RwLock::new(config),
            probe,
            resync,
            state,
            transitions,
            check_running: AtomicBool::new(false),
            cycle_running: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Receiver of every phase change, in order
    #[must_use]
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<PhaseTransition> {
        self.transitions.subscribe()
    }

    /// Apply a state change, publishing a transition if the phase moved
    fn update(&self, f: impl FnOnce(&mut ConnectionState)) {
        let mut transition = None;
        self.state.send_modify(|s| {
            let from = s.phase();
            f(s);
            let to = s.phase();
            if from != to {
                transition = Some(PhaseTransition { from, to });
            }
        });
        if let Some(transition) = transition {
            tracing::debug!(from = ?transition.from, to = ?transition.to, "Connection phase changed");
            // No subscribers is fine
            let _ = self.transitions.send(transition);
        }
    }

    /// Whether the last probe succeeded
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> SupervisorConfig {
        self.config.read().clone()
    }

    /// Replace the configuration; takes effect at the next probe or attempt
    pub fn update_config(&self, config: SupervisorConfig) {
        let max_attempts = config.max_reconnect_attempts;
        *self.config.write() = config;
        self.state.send_if_modified(|s| {
            let changed = s.max_attempts != max_attempts;
            s.max_attempts = max_attempts;
            changed
        });
    }

    /// Toggle auto-reconnect
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.config.write().auto_reconnect = enabled;
    }

    async fn probe_once(&self) -> Result<(), String> {
        let timeout = self.config.read().probe_timeout;
        match tokio::time::timeout(timeout, self.probe.probe()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("health probe timed out after {timeout:?}")),
        }
    }

    /// Probe once and record the outcome. Never starts a reconnect cycle.
    ///
    /// A successful check clears the attempt counter.
    pub async fn check_connection(&self) -> bool {
        let result = self.probe_once().await;
        let ok = result.is_ok();
        self.update(|s| {
            s.connected = ok;
            s.last_error = result.err();
            s.last_check = Some(now_ms());
            if ok {
                s.attempts = 0;
            }
        });
        ok
    }

    /// Periodic check: probe, and if a live connection was just lost start a
    /// reconnect cycle. Once a cycle has given up, later checks only watch
    /// for the service to come back.
    ///
    /// Skipped (returns `None`) when a previous check is still outstanding.
    /// Otherwise returns whether the service is connected afterwards.
    pub async fn perform_health_check(&self) -> Option<bool> {
        let Some(_running) = RunningFlag::acquire(&self.check_running) else {
            tracing::debug!("Health check already running, skipping");
            return None;
        };

        let was_connected = self.is_connected();
        match self.probe_once().await {
            Ok(()) => {
                self.update(|s| {
                    s.connected = true;
                    s.last_error = None;
                    s.last_check = Some(now_ms());
                });
                if !was_connected && !self.cycle_running.load(Ordering::Acquire) {
                    tracing::info!("Service reachable again");
                    self.resync.resynchronize().await;
                }
                Some(true)
            }
            Err(error) => {
                if was_connected {
                    tracing::warn!(error = %error, "Health check failed, connection lost");
                } else {
                    tracing::debug!(error = %error, "Health check failed");
                }
                self.update(|s| {
                    s.connected = false;
                    s.last_error = Some(error);
                    s.last_check = Some(now_ms());
                });
                let auto_reconnect = self.config.read().auto_reconnect;
                if was_connected && auto_reconnect {
                    Some(self.run_reconnect_cycle().await)
                } else {
                    Some(false)
                }
            }
        }
    }

    /// Record a connection-level failure observed by a request.
    ///
    /// HTTP status errors and cancellations say nothing about reachability
    /// and are ignored. Returns whether the state moved to disconnected.
    pub fn report_transport_failure(self: &Arc<Self>, error: &ClientError) -> bool {
        if !error.indicates_disconnect() {
            return false;
        }
        let mut was_connected = false;
        self.update(|s| {
            was_connected = s.connected;
            s.connected = false;
            s.last_error = Some(error.to_string());
        });
        if was_connected {
            tracing::warn!(error = %error, "Request failed, connection lost");
        }
        if self.config.read().auto_reconnect && !self.cycle_running.load(Ordering::Acquire) {
            let supervisor = Arc::clone(self);
            tokio::spawn(async move {
                supervisor.run_reconnect_cycle().await;
            });
        }
        true
    }

    /// Run one bounded reconnect cycle.
    ///
    /// Returns whether the service is connected at the end. If another cycle
    /// is already running this returns the current connection flag at once.
    pub async fn run_reconnect_cycle(&self) -> bool {
        let Some(_running) = RunningFlag::acquire(&self.cycle_running) else {
            tracing::debug!("Reconnect cycle already running");
            return self.is_connected();
        };

        let (max_attempts, interval) = {
            let config = self.config.read();
            (config.max_reconnect_attempts, config.reconnect_interval)
        };
        self.update(|s| {
            s.reconnecting = true;
            s.attempts = 0;
            s.max_attempts = max_attempts;
        });

        let mut attempt = 0;
        while attempt < max_attempts {
            attempt += 1;
            self.update(|s| {
                s.reconnecting = true;
                s.attempts = attempt;
            });
            tracing::info!(attempt, max_attempts, "Reconnecting");

            tokio::time::sleep(interval).await;

            match self.probe_once().await {
                Ok(()) => {
                    self.update(|s| {
                        s.connected = true;
                        s.reconnecting = false;
                        s.attempts = 0;
                        s.last_error = None;
                        s.last_check = Some(now_ms());
                    });
                    tracing::info!(attempt, "Reconnected");
                    self.resync.resynchronize().await;
                    return true;
                }
                Err(error) => {
                    tracing::debug!(attempt, error = %error, "Reconnect attempt failed");
                    self.update(|s| {
                        s.last_error = Some(error);
                        s.last_check = Some(now_ms());
                    });
                }
            }
        }

        self.update(|s| {
            s.connected = false;
            s.reconnecting = false;
        });
        tracing::warn!(max_attempts, "Giving up on reconnection");
        false
    }

    /// User-requested reconnect: reset the attempt counter and check once.
    ///
    /// If that check fails and auto-reconnect is enabled, runs a fresh
    /// reconnect cycle. Resynchronizes on recovery.
    pub async fn manual_reconnect(&self) -> bool {
        let was_connected = self.is_connected();
        self.update(|s| {
            s.attempts = 0;
            s.reconnecting = false;
        });
        if self.check_connection().await {
            if !was_connected {
                tracing::info!("Manual reconnect succeeded");
                self.resync.resynchronize().await;
            }
            return true;
        }
        if self.config.read().auto_reconnect {
            tracing::info!("Service still unreachable, starting reconnect cycle");
            return self.run_reconnect_cycle().await;
        }
        false
    }

    /// Run periodic health checks until `shutdown` fires.
    ///
    /// The first check happens one interval after the call. Ticks missed
    /// while a check is outstanding are skipped.
    pub fn spawn_health_checks(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        let period = self.config.read().health_check_interval;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        supervisor.perform_health_check().await;
                    }
                }
            }
            tracing::debug!("Health check loop stopped");
        })
    }
}
