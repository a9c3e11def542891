//! Request Channel
//!
//! One outbound streaming call. Opening a channel registers its id in the
//! [`RequestRegistry`] before any network traffic, then races the connection
//! against the call's cancellation token. Records are pulled one at a time
//! with [`RequestChannel::next`].
//!
//! # Terminal Outcomes
//!
//! Every channel ends in exactly one of:
//! - normal end of body: `next()` returns `None`
//! - transport failure: one `Err(Connection)` then `None`
//! - cancellation: one `Err(Cancelled)` then `None`
//!
//! The registry entry is removed when the terminal outcome is reached, or
//! when the channel is dropped early, whichever comes first. The transport
//! is released after the terminal outcome has been handed to the consumer.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::decoder::{DecodePoll, DecoderStats, StreamDecoder};
use crate::backend::{
    ByteStream, ChatRequest, ChatResponse, GenerateRequest, GenerateResponse, InferenceApi,
    PullProgress, StreamEndpoint,
};
use crate::error::ClientError;
use crate::registry::{RequestHandle, RequestId, RequestRegistry};

/// Removes this call's registry entry exactly once
#[derive(Debug)]
struct RegistrationGuard {
    registry: Arc<RequestRegistry>,
    id: RequestId,
    generation: u64,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        // However the call ended, only this registration is removed; a newer
        // call reusing the id keeps its entry.
        self.registry.deregister_generation(&self.id, self.generation);
    }
}

/// A single streaming call yielding records of type `T`
pub struct RequestChannel<T> {
    id: RequestId,
    token: CancellationToken,
    body: Option<ByteStream>,
    decoder: StreamDecoder<T>,
    guard: Option<RegistrationGuard>,
    terminated: bool,
}

impl<T> std::fmt::Debug for RequestChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestChannel")
            .field("id", &self.id)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> RequestChannel<T> {
    /// Register and open a streaming call.
    ///
    /// The payload must serialize to a JSON object; `stream: true` is forced.
    /// Without an explicit `id` one is generated from the endpoint prefix.
    ///
    /// # Errors
    ///
    /// - [`ClientError::DuplicateRequestId`] if `id` is already in flight
    /// - [`ClientError::Cancelled`] if the token fires while connecting
    /// - [`ClientError::Transport`] / [`ClientError::Connection`] from the service
    pub async fn open<A, P>(
        api: &A,
        registry: &Arc<RequestRegistry>,
        endpoint: StreamEndpoint,
        payload: &P,
        id: Option<RequestId>,
    ) -> Result<Self, ClientError>
    where
        A: InferenceApi + ?Sized,
        P: Serialize + ?Sized,
    {
        let mut body = serde_json::to_value(payload)?;
        match body.as_object_mut() {
            Some(object) => {
                object.insert("stream".to_string(), serde_json::Value::Bool(true));
            }
            None => {
                return Err(ClientError::InvalidResponse(
                    "streaming payload must be a JSON object".to_string(),
                ))
            }
        }

        let id = id.unwrap_or_else(|| RequestId::generate(endpoint.id_prefix()));
        let token = CancellationToken::new();
        let generation = registry.register(id.clone(), token.clone())?;
        let guard = RegistrationGuard {
            registry: Arc::clone(registry),
            id: id.clone(),
            generation,
        };

        tracing::debug!(request_id = %id, endpoint = endpoint.path(), backend = api.name(), "Opening stream");

        let stream = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = api.open_stream(endpoint, body) => Some(result),
        };
        let stream = match stream {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                tracing::debug!(request_id = %id, error = %e, "Failed to open stream");
                return Err(e);
            }
            None => {
                tracing::debug!(request_id = %id, "Cancelled while connecting");
                return Err(ClientError::Cancelled { request_id: id });
            }
        };

        Ok(Self {
            id,
            token,
            body: Some(stream),
            decoder: StreamDecoder::new(),
            guard: Some(guard),
            terminated: false,
        })
    }

    /// Pull the next record.
    ///
    /// Returns `None` once the call has reached a terminal outcome.
    pub async fn next(&mut self) -> Option<Result<T, ClientError>> {
        if self.terminated {
            self.body = None;
            return None;
        }
        loop {
            if self.token.is_cancelled() {
                return Some(Err(self.terminate_cancelled()));
            }
            match self.decoder.poll_record() {
                DecodePoll::Record(record) => return Some(Ok(record)),
                DecodePoll::End => {
                    self.terminate();
                    self.body = None;
                    return None;
                }
                DecodePoll::NeedMore => {}
            }

            let Some(body) = self.body.as_mut() else {
                self.decoder.finish();
                continue;
            };
            let read = tokio::select! {
                biased;
                () = self.token.cancelled() => None,
                chunk = body.next() => Some(chunk),
            };
            match read {
                None => return Some(Err(self.terminate_cancelled())),
                Some(Some(Ok(chunk))) => self.decoder.push_chunk(&chunk),
                Some(Some(Err(e))) => {
                    tracing::warn!(request_id = %self.id, error = %e, "Stream failed");
                    self.terminate();
                    return Some(Err(e));
                }
                Some(None) => {
                    self.body = None;
                    self.decoder.finish();
                }
            }
        }
    }

    /// Adapt into a [`Stream`] of records
    pub fn into_stream(self) -> impl Stream<Item = Result<T, ClientError>> {
        futures::stream::unfold(self, |mut channel| async move {
            channel.next().await.map(|item| (item, channel))
        })
    }
}

impl<T> RequestChannel<T> {
    /// Id of this call
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Handle that can cancel this call from elsewhere
    #[must_use]
    pub fn handle(&self) -> RequestHandle {
        RequestHandle {
            id: self.id.clone(),
            token: self.token.clone(),
        }
    }

    /// Whether the call has reached a terminal outcome
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Decoder counters for this call
    #[must_use]
    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Cancel this call. The next `next()` yields [`ClientError::Cancelled`].
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(guard) = &self.guard {
            guard.registry.deregister_generation(&guard.id, guard.generation);
        }
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.guard = None;
    }

    fn terminate_cancelled(&mut self) -> ClientError {
        tracing::debug!(request_id = %self.id, "Stream cancelled");
        self.terminate();
        ClientError::Cancelled {
            request_id: self.id.clone(),
        }
    }
}

// ============================================================================
// Typed Entry Points
// ============================================================================

/// Open a streamed `/chat` call
///
/// # Errors
///
/// See [`RequestChannel::open`].
pub async fn stream_chat<A: InferenceApi + ?Sized>(
    api: &A,
    registry: &Arc<RequestRegistry>,
    request: &ChatRequest,
    id: Option<RequestId>,
) -> Result<RequestChannel<ChatResponse>, ClientError> {
    RequestChannel::open(api, registry, StreamEndpoint::Chat, request, id).await
}

/// Open a streamed `/generate` call
///
/// # Errors
///
/// See [`RequestChannel::open`].
pub async fn stream_generate<A: InferenceApi + ?Sized>(
    api: &A,
    registry: &Arc<RequestRegistry>,
    request: &GenerateRequest,
    id: Option<RequestId>,
) -> Result<RequestChannel<GenerateResponse>, ClientError> {
    RequestChannel::open(api, registry, StreamEndpoint::Generate, request, id).await
}

/// Open a streamed `/pull` call reporting download progress
///
/// # Errors
///
/// See [`RequestChannel::open`].
pub async fn stream_pull<A: InferenceApi + ?Sized>(
    api: &A,
    registry: &Arc<RequestRegistry>,
    model: &str,
    insecure: bool,
    id: Option<RequestId>,
) -> Result<RequestChannel<PullProgress>, ClientError> {
    let payload = serde_json::json!({ "model": model, "insecure": insecure });
    RequestChannel::open(api, registry, StreamEndpoint::Pull, &payload, id).await
}
