//! Client Coordinator
//!
//! [`Client`] owns every piece of engine state: the request registry, the
//! session store, the model catalog and the connectivity supervisor. UIs hold
//! one `Client` and talk to the service only through it.
//!
//! # Lifecycle
//!
//! ```text
//! Client::new / from_config   load session state from storage
//!         │
//! initialize()                check, refresh models or reconnect, start timers
//!         │
//! send_message() / ...        any number of concurrent streamed calls
//!         │
//! shutdown()                  cancel requests, stop timers, persist
//! ```

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{
    ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, GenerateRequest, GenerateResponse,
    InferenceApi, LegacyEmbedding, OllamaBackend, PullProgress, VersionInfo,
};
use crate::catalog::ModelCatalog;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::messages::{ChatMessage, PerformanceSample};
use crate::now_ms;
use crate::registry::{RequestId, RequestRegistry};
use crate::store::capability::THINKING;
use crate::store::{ConversationId, FileStore, KeyValueStore, SessionStore, Settings};
use crate::streaming::{stream_chat, stream_generate, stream_pull, RequestChannel};
use crate::supervisor::{
    ConnectionState, ConnectivitySupervisor, HealthProbe, PhaseTransition, Resynchronize,
};

/// A user message to send to the selected model
#[derive(Clone, Debug, Default)]
pub struct SendRequest {
    /// Message text
    pub content: String,
    /// Base64-encoded images
    pub images: Vec<String>,
    /// Id to register the call under; generated when absent
    pub request_id: Option<RequestId>,
    /// Override `settings.enable_thinking` for this message
    pub think: Option<bool>,
}

impl SendRequest {
    /// Create a text-only request
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Attach images
    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Use a caller-chosen request id
    #[must_use]
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Ask for (or suppress) the reasoning trace
    #[must_use]
    pub fn with_think(mut self, think: bool) -> Self {
        self.think = Some(think);
        self
    }
}

/// Result of a completed chat
#[derive(Clone, Debug)]
pub struct ChatOutcome {
    /// Id the call was registered under
    pub request_id: RequestId,
    /// Conversation the exchange landed in
    pub conversation_id: ConversationId,
    /// Final assistant message
    pub message: ChatMessage,
    /// Performance of the response; `None` if the stream ended early
    pub sample: Option<PerformanceSample>,
}

/// Whether the service refused a thinking request
fn rejects_thinking(error: &ClientError) -> bool {
    match error {
        ClientError::Transport { status: 400, body } => body.to_lowercase().contains("think"),
        _ => false,
    }
}

/// Engine entry point
pub struct Client<A> {
    api: Arc<A>,
    registry: Arc<RequestRegistry>,
    session: Arc<RwLock<SessionStore>>,
    catalog: Arc<ModelCatalog<A>>,
    supervisor: Arc<ConnectivitySupervisor>,
    config: ClientConfig,
    shutdown: CancellationToken,
    health_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl<A> std::fmt::Debug for Client<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.service.base_url)
            .field("in_flight", &self.registry.len())
            .field("supervisor", &self.supervisor)
            .finish_non_exhaustive()
    }
}

impl Client<OllamaBackend> {
    /// Build a client for an Ollama service with file-backed storage
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let api = OllamaBackend::from_config(&config.service)?;
        let storage = Arc::new(FileStore::new(config.data_dir.clone()));
        Ok(Self::new(Arc::new(api), storage, config))
    }
}

impl<A: InferenceApi + 'static> Client<A> {
    /// Build a client, loading session state from `storage`.
    ///
    /// No network traffic happens until [`Client::initialize`].
    pub fn new(api: Arc<A>, storage: Arc<dyn KeyValueStore>, config: ClientConfig) -> Self {
        let session = SessionStore::load(storage);
        let supervisor_config = config
            .supervisor
            .clone()
            .with_auto_reconnect(session.settings().auto_reconnect);
        let session = Arc::new(RwLock::new(session));

        let catalog = Arc::new(ModelCatalog::new(Arc::clone(&api), Arc::clone(&session)));
        let probe: Arc<dyn HealthProbe> = Arc::clone(&api) as Arc<dyn HealthProbe>;
        let resync: Arc<dyn Resynchronize> = Arc::clone(&catalog) as Arc<dyn Resynchronize>;
        let supervisor = Arc::new(ConnectivitySupervisor::new(supervisor_config, probe, resync));

        Self {
            api,
            registry: Arc::new(RequestRegistry::new()),
            session,
            catalog,
            supervisor,
            config,
            shutdown: CancellationToken::new(),
            health_task: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Probe the service, refresh models when reachable and start the timers.
    ///
    /// An unreachable service is not an error here. With auto-reconnect on,
    /// a reconnect cycle starts in the background; otherwise the health-check
    /// loop notices when the service comes back. Returns whether the first
    /// check succeeded.
    pub async fn initialize(&self) -> bool {
        let connected = self.supervisor.check_connection().await;
        if connected {
            self.catalog.resynchronize().await;
        } else {
            tracing::warn!(
                base_url = %self.config.service.base_url,
                state = %self.supervisor.state(),
                "Service unreachable at startup"
            );
            if self.supervisor.config().auto_reconnect {
                self.spawn_reconnect_cycle();
            }
        }

        self.restart_health_check();
        self.start_cleanup();
        tracing::info!(connected, "Client initialized");
        connected
    }

    /// Cancel every request, stop the timers and persist session state.
    ///
    /// # Errors
    ///
    /// Returns an error if the final write to storage fails.
    pub fn shutdown(&self) -> Result<(), ClientError> {
        let cancelled = self.registry.cancel_all();
        self.shutdown.cancel();
        if let Some((token, _)) = self.health_task.lock().take() {
            token.cancel();
        }
        self.cleanup_task.lock().take();
        tracing::info!(cancelled, "Client shut down");
        self.session.read().persist()?;
        Ok(())
    }

    /// Run a reconnect cycle in the background until it ends or the client
    /// shuts down
    fn spawn_reconnect_cycle(&self) {
        let supervisor = Arc::clone(&self.supervisor);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::debug!("Startup reconnect cycle abandoned at shutdown");
                }
                connected = supervisor.run_reconnect_cycle() => {
                    tracing::debug!(connected, "Startup reconnect cycle finished");
                }
            }
        });
    }

    /// Stop the health-check loop and start it again if enabled in settings
    pub fn restart_health_check(&self) {
        let mut slot = self.health_task.lock();
        if let Some((token, _)) = slot.take() {
            token.cancel();
        }
        if self.shutdown.is_cancelled() || !self.session.read().settings().health_check {
            tracing::debug!("Health checks disabled");
            return;
        }
        let token = self.shutdown.child_token();
        let handle = self.supervisor.spawn_health_checks(token.clone());
        *slot = Some((token, handle));
    }

    /// Whether the health-check loop is running
    #[must_use]
    pub fn health_check_running(&self) -> bool {
        self.health_task
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Sweep expired conversations now and then every `cleanup_interval`
    fn start_cleanup(&self) {
        let mut slot = self.cleanup_task.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        let session = Arc::clone(&self.session);
        let shutdown = self.shutdown.clone();
        let period = self.config.cleanup_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = session.write().cleanup_expired();
                        if removed > 0 {
                            tracing::info!(removed, "Removed expired conversations");
                        }
                    }
                }
            }
            tracing::debug!("Cleanup loop stopped");
        }));
    }

    // ========================================================================
    // Chat
    // ========================================================================

    /// Send a user message to the selected model and stream the reply into
    /// the current conversation.
    ///
    /// The user message and an empty assistant message are appended first;
    /// the assistant message grows as records arrive. `on_record` sees every
    /// record in order. If the model rejects a thinking request, that is
    /// recorded as a manual capability and the call is retried once without
    /// thinking.
    ///
    /// On cancellation the partial reply is kept and the error is
    /// [`ClientError::Cancelled`]. Connection failures are reported to the
    /// supervisor before being returned.
    ///
    /// # Errors
    ///
    /// - [`ClientError::NoModelSelected`] when no model is selected
    /// - [`ClientError::Cancelled`] when the call was cancelled
    /// - transport and connection errors from the service
    pub async fn send_message<F>(
        &self,
        request: SendRequest,
        mut on_record: F,
    ) -> Result<ChatOutcome, ClientError>
    where
        F: FnMut(&ChatResponse) + Send,
    {
        let SendRequest {
            content,
            images,
            request_id,
            think,
        } = request;

        let (model, conversation_id, history, think, options) = {
            let mut session = self.session.write();
            let model = session.selected_model().to_string();
            if model.is_empty() {
                return Err(ClientError::NoModelSelected);
            }
            let conversation_id =
                session.append_message(ChatMessage::user(content).with_images(images));
            session.append_message(ChatMessage::assistant_placeholder());

            let history: Vec<ChatMessage> = session
                .current_messages()
                .split_last()
                .map(|(_, earlier)| earlier.iter().map(ChatMessage::for_wire).collect())
                .unwrap_or_default();
            let settings = session.settings();
            let think =
                think.unwrap_or(settings.enable_thinking) && session.supports(&model, THINKING);
            let options = settings.default_options.clone();
            (model, conversation_id, history, think, options)
        };

        let build = |think: bool| {
            let chat =
                ChatRequest::new(model.clone(), history.clone()).with_options(options.clone());
            if think {
                chat.with_think(true)
            } else {
                chat
            }
        };

        let started = Instant::now();
        let first = stream_chat(&*self.api, &self.registry, &build(think), request_id.clone()).await;
        let opened = match first {
            Err(e) if think && rejects_thinking(&e) => {
                tracing::info!(model = %model, "Model rejected thinking, retrying without it");
                self.session
                    .write()
                    .set_manual_capability(&model, THINKING, false);
                stream_chat(&*self.api, &self.registry, &build(false), request_id).await
            }
            other => other,
        };
        let mut channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                self.report_failure(&e);
                self.session.write().discard_empty_reply();
                return Err(e);
            }
        };
        let request_id = channel.id().clone();
        tracing::debug!(request_id = %request_id, model = %model, think, "Chat started");

        let mut reply = String::new();
        let mut thinking = String::new();
        let mut sample = None;

        while let Some(item) = channel.next().await {
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    if e.is_cancelled() {
                        tracing::info!(request_id = %request_id, "Chat cancelled");
                    } else {
                        self.report_failure(&e);
                    }
                    let mut session = self.session.write();
                    if !session.discard_empty_reply() {
                        session.save_conversations();
                    }
                    return Err(e);
                }
            };
            on_record(&record);

            if !record.message.content.is_empty() {
                reply.push_str(&record.message.content);
                self.session.write().update_last_message(&reply);
            }
            if let Some(fragment) = record.message.thinking.as_deref().filter(|t| !t.is_empty()) {
                thinking.push_str(fragment);
                self.session.write().update_last_message_thinking(&thinking);
            }
            if record.done {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                let now = now_ms();
                sample = Some(record.timings.to_sample(elapsed_ms, now).unwrap_or(
                    PerformanceSample {
                        response_time: elapsed_ms,
                        tokens_per_second: 0.0,
                        total_tokens: 0,
                        load_time: None,
                        timestamp: now,
                    },
                ));
            }
        }

        let message = {
            let mut session = self.session.write();
            match &sample {
                Some(sample) => {
                    session.update_last_message_with_metrics(&reply, sample.clone());
                    session.add_performance_metric(sample.clone());
                }
                None => {
                    tracing::warn!(request_id = %request_id, "Stream ended without a final record");
                    session.save_conversations();
                }
            }
            session.current_messages().last().cloned().unwrap_or_default()
        };

        if let Some(sample) = &sample {
            tracing::info!(
                request_id = %request_id,
                response_ms = sample.response_time,
                tokens = sample.total_tokens,
                tokens_per_second = sample.tokens_per_second,
                "Chat completed"
            );
        }

        Ok(ChatOutcome {
            request_id,
            conversation_id,
            message,
            sample,
        })
    }

    /// Open a streamed `/generate` call. Records go to the caller; nothing is
    /// written to the session.
    ///
    /// # Errors
    ///
    /// See [`RequestChannel::open`].
    pub async fn generate_stream(
        &self,
        request: &GenerateRequest,
        id: Option<RequestId>,
    ) -> Result<RequestChannel<GenerateResponse>, ClientError> {
        stream_generate(&*self.api, &self.registry, request, id)
            .await
            .inspect_err(|e| self.report_failure(e))
    }

    /// Open a streamed `/pull` call. Call [`ModelCatalog::refresh_models`]
    /// once it completes.
    ///
    /// # Errors
    ///
    /// See [`RequestChannel::open`].
    pub async fn pull_stream(
        &self,
        model: &str,
        insecure: bool,
        id: Option<RequestId>,
    ) -> Result<RequestChannel<PullProgress>, ClientError> {
        stream_pull(&*self.api, &self.registry, model, insecure, id)
            .await
            .inspect_err(|e| self.report_failure(e))
    }

    /// Tell the supervisor about an error seen while consuming a channel.
    ///
    /// Errors that say nothing about reachability are ignored.
    pub fn report_failure(&self, error: &ClientError) {
        self.supervisor.report_transport_failure(error);
    }

    // ========================================================================
    // Request Control
    // ========================================================================

    /// Cancel one in-flight request. Unknown ids are a no-op.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        self.registry.cancel_one(id)
    }

    /// Cancel every in-flight request
    pub fn cancel_all(&self) -> usize {
        self.registry.cancel_all()
    }

    /// Ids of the in-flight requests
    #[must_use]
    pub fn active_requests(&self) -> Vec<RequestId> {
        self.registry.list()
    }

    // ========================================================================
    // Session Operations
    // ========================================================================

    /// Select a model and remember it as the default
    pub fn switch_model(&self, model: &str) {
        self.session.write().set_selected_model(model);
    }

    /// Make a conversation current. Unknown ids are ignored.
    pub fn switch_conversation(&self, id: &ConversationId) -> bool {
        self.session.write().switch_conversation(id)
    }

    /// Start an empty conversation with the selected model
    pub fn new_conversation(&self) -> ConversationId {
        self.session.write().create_conversation(None)
    }

    /// Delete every conversation
    pub fn clear_conversations(&self) {
        self.session.write().clear_conversations();
    }

    /// Remove conversations idle past the retention window
    pub fn cleanup_expired(&self) -> usize {
        self.session.write().cleanup_expired()
    }

    /// Record by hand whether a model supports a capability
    pub fn set_manual_capability(&self, model: &str, tag: &str, supported: bool) {
        self.session
            .write()
            .set_manual_capability(model, tag, supported);
    }

    /// Change settings, then apply reconnect and health-check changes
    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) -> Settings {
        let settings = self.session.write().update_settings(f).clone();
        self.supervisor.set_auto_reconnect(settings.auto_reconnect);
        self.restart_health_check();
        settings
    }

    /// Reset the reconnect budget and check once, falling back to a reconnect
    /// cycle when auto-reconnect is on
    pub async fn manual_reconnect(&self) -> bool {
        self.supervisor.manual_reconnect().await
    }

    /// Write all session state to storage now
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails.
    pub fn persist(&self) -> Result<(), ClientError> {
        self.session.read().persist()?;
        Ok(())
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Read access to the session store. Do not hold across an await.
    pub fn session(&self) -> RwLockReadGuard<'_, SessionStore> {
        self.session.read()
    }

    /// Receiver bumped on every session change
    #[must_use]
    pub fn session_revisions(&self) -> watch::Receiver<u64> {
        self.session.read().subscribe()
    }

    /// Current connection state
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Receiver notified on every connection state change
    #[must_use]
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe()
    }

    /// Receiver of connection phase transitions
    #[must_use]
    pub fn transitions(&self) -> tokio::sync::broadcast::Receiver<PhaseTransition> {
        self.supervisor.subscribe_transitions()
    }

    /// The model catalog
    #[must_use]
    pub fn catalog(&self) -> &ModelCatalog<A> {
        &self.catalog
    }

    /// The connectivity supervisor
    #[must_use]
    pub fn supervisor(&self) -> &Arc<ConnectivitySupervisor> {
        &self.supervisor
    }

    /// Configuration the client was built with
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ========================================================================
    // Passthroughs
    // ========================================================================

    /// Service version
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be reached.
    pub async fn version(&self) -> Result<VersionInfo, ClientError> {
        self.api.version().await
    }

    /// Embed one or more texts
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the call.
    pub async fn embed(&self, request: &EmbedRequest) -> Result<EmbedResponse, ClientError> {
        self.api.embed(request).await
    }

    /// Embed one text through the legacy endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the service rejects the call.
    pub async fn embeddings(
        &self,
        model: &str,
        prompt: &str,
    ) -> Result<LegacyEmbedding, ClientError> {
        self.api.embeddings(model, prompt).await
    }
}

impl<A> Drop for Client<A> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
