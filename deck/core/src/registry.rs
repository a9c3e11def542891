//! Request Registry - In-Flight Streaming Request Tracking
//!
//! The registry is the only place request ids are looked up. Every streaming
//! call registers `{id, token}` *before* its network call is issued, so a
//! cancellation requested while the connection is still being set up is
//! observed. The entry is removed exactly once when the call reaches a
//! terminal state or is cancelled.
//!
//! # Ownership
//!
//! There is no global registry. A [`RequestRegistry`] is owned by the
//! coordinating [`crate::Client`] and shared with request channels through an
//! `Arc`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Identifier of one streaming call
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(String);

/// Time-seeded random id: `<prefix>_<unix-millis>_<9 base36 chars>`
pub(crate) fn generate_id(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}_{millis}_{suffix}")
}

impl RequestId {
    /// Generate a fresh id for a call on the given endpoint prefix
    #[must_use]
    pub fn generate(prefix: &str) -> Self {
        Self(generate_id(prefix))
    }

    /// Borrow the id as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle for one in-flight call: its id and the token that stops it
#[derive(Clone, Debug)]
pub struct RequestHandle {
    /// Request id
    pub id: RequestId,
    /// Cancellation token shared with the request channel
    pub token: CancellationToken,
}

#[derive(Debug)]
struct Registration {
    token: CancellationToken,
    generation: u64,
}

/// Table of in-flight streaming calls keyed by request id
#[derive(Debug, Default)]
pub struct RequestRegistry {
    active: DashMap<RequestId, Registration>,
    /// Distinguishes successive registrations of the same id
    next_generation: AtomicU64,
}

impl RequestRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call. Fails if the id is already in flight.
    ///
    /// Returns the registration's generation, which
    /// [`deregister_generation`](Self::deregister_generation) uses to remove
    /// exactly this entry.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::DuplicateRequestId`] when `id` is present.
    pub fn register(&self, id: RequestId, token: CancellationToken) -> Result<u64, ClientError> {
        match self.active.entry(id) {
            Entry::Occupied(entry) => Err(ClientError::DuplicateRequestId(entry.key().clone())),
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    request_id = %entry.key(),
                    generation,
                    "Registered streaming request"
                );
                entry.insert(Registration { token, generation });
                Ok(generation)
            }
        }
    }

    /// Cancel one call. Returns whether an entry existed.
    pub fn cancel_one(&self, id: &RequestId) -> bool {
        match self.active.remove(id) {
            Some((id, registration)) => {
                registration.token.cancel();
                tracing::info!(request_id = %id, "Cancelled streaming request");
                true
            }
            None => false,
        }
    }

    /// Cancel and clear every entry. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<RequestId> = self.active.iter().map(|e| e.key().clone()).collect();
        let mut cancelled = 0;
        for id in &ids {
            if let Some((_, registration)) = self.active.remove(id) {
                registration.token.cancel();
                cancelled += 1;
            }
        }
        tracing::info!(count = cancelled, "Cancelled all streaming requests");
        cancelled
    }

    /// Remove an entry without firing its token (normal completion path).
    ///
    /// Idempotent: returns false if the id was already gone.
    pub fn deregister(&self, id: &RequestId) -> bool {
        let removed = self.active.remove(id).is_some();
        if removed {
            tracing::debug!(request_id = %id, "Deregistered streaming request");
        }
        removed
    }

    /// Remove an entry only if it is still the registration `generation`.
    ///
    /// Used by request channels on their exit path: the entry may already be
    /// gone (cancelled through the registry) or belong to a newer call that
    /// reused the id.
    pub fn deregister_generation(&self, id: &RequestId, generation: u64) -> bool {
        let removed = self
            .active
            .remove_if(id, |_, registration| registration.generation == generation)
            .is_some();
        if removed {
            tracing::debug!(request_id = %id, generation, "Deregistered streaming request");
        }
        removed
    }

    /// Snapshot of active ids, for diagnostics only
    #[must_use]
    pub fn list(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Whether an id is in flight
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.active.contains_key(id)
    }

    /// Number of in-flight calls
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no calls are in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = RequestId::generate("chat");
        let b = RequestId::generate("chat");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("chat_"));
        let suffix = a.as_str().rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = RequestRegistry::new();
        let id = RequestId::from("chat_1");
        registry
            .register(id.clone(), CancellationToken::new())
            .unwrap();

        let err = registry
            .register(id.clone(), CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, ClientError::DuplicateRequestId(dup) if dup == id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cancel_all_wakes_waiters() {
        let registry = RequestRegistry::new();
        let token = CancellationToken::new();
        registry
            .register(RequestId::from("gen_1"), token.clone())
            .unwrap();

        let mut waiter = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(waiter.poll());

        assert_eq!(registry.cancel_all(), 1);
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let registry = RequestRegistry::new();
        assert!(!registry.cancel_one(&RequestId::from("missing")));
    }

    #[test]
    fn test_cancel_one_fires_token_and_removes() {
        let registry = RequestRegistry::new();
        let token = CancellationToken::new();
        let id = RequestId::from("chat_2");
        registry.register(id.clone(), token.clone()).unwrap();

        assert!(registry.cancel_one(&id));
        assert!(token.is_cancelled());
        assert!(!registry.contains(&id));
        assert!(!registry.cancel_one(&id));
    }

    #[test]
    fn test_cancel_all_clears_everything() {
        let registry = RequestRegistry::new();
        let tokens: Vec<CancellationToken> = (0..3)
            .map(|i| {
                let token = CancellationToken::new();
                registry
                    .register(RequestId::from(format!("req_{i}")), token.clone())
                    .unwrap();
                token
            })
            .collect();

        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.list().is_empty());
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
        assert_eq!(registry.cancel_all(), 0);
    }

    #[test]
    fn test_stale_generation_leaves_reused_id_alone() {
        let registry = RequestRegistry::new();
        let id = RequestId::from("chat_4");
        let first = registry.register(id.clone(), CancellationToken::new()).unwrap();
        assert!(registry.cancel_one(&id));

        let second = registry.register(id.clone(), CancellationToken::new()).unwrap();
        assert_ne!(first, second);
        assert!(!registry.deregister_generation(&id, first));
        assert!(registry.contains(&id));

        assert!(registry.deregister_generation(&id, second));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deregister_does_not_cancel() {
        let registry = RequestRegistry::new();
        let token = CancellationToken::new();
        let id = RequestId::from("chat_3");
        registry.register(id.clone(), token.clone()).unwrap();

        assert!(registry.deregister(&id));
        assert!(!registry.deregister(&id));
        assert!(!token.is_cancelled());
    }
}
