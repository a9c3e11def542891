//! Inference API Trait
//!
//! Abstraction over the remote inference service. The [`crate::Client`] and
//! the request channels only ever talk to an [`InferenceApi`], so tests can
//! swap the HTTP implementation for a scripted one.
//!
//! # Design
//!
//! Streaming endpoints hand back the raw response body as a [`ByteStream`].
//! Framing and decoding happen one layer up in
//! [`crate::streaming::RequestChannel`], which also owns cancellation. A
//! backend never sees a request id.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::types::{
    ChatRequest, ChatResponse, CreateModelRequest, EmbedRequest, EmbedResponse, GenerateRequest,
    GenerateResponse, LegacyEmbedding, ModelInfo, ModelSummary, PullProgress, RunningModel,
    StreamEndpoint, VersionInfo,
};
use crate::error::ClientError;

/// Raw body of a streaming response, chunked as it arrives off the wire
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, ClientError>> + Send>>;

/// Inference service trait
///
/// Implement this trait to point the client at a different transport.
#[async_trait]
pub trait InferenceApi: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// `GET /version`; also used as the liveness probe
    async fn version(&self) -> Result<VersionInfo, ClientError>;

    /// Open a streaming call and return its body.
    ///
    /// Must fail with [`ClientError::Transport`] if the service answers with
    /// a non-success status before the body starts.
    async fn open_stream(
        &self,
        endpoint: StreamEndpoint,
        body: serde_json::Value,
    ) -> Result<ByteStream, ClientError>;

    /// Non-streaming `POST /chat`
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError>;

    /// Non-streaming `POST /generate`
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ClientError>;

    /// `GET /tags`
    async fn list_models(&self) -> Result<Vec<ModelSummary>, ClientError>;

    /// `GET /ps`
    async fn running_models(&self) -> Result<Vec<RunningModel>, ClientError>;

    /// `POST /show`
    async fn show_model(&self, model: &str, verbose: bool) -> Result<ModelInfo, ClientError>;

    /// Blocking `POST /pull`; returns the final status record
    async fn pull_model(&self, model: &str, insecure: bool) -> Result<PullProgress, ClientError>;

    /// `DELETE /delete`
    async fn delete_model(&self, model: &str) -> Result<(), ClientError>;

    /// `POST /copy`
    async fn copy_model(&self, source: &str, destination: &str) -> Result<(), ClientError>;

    /// Blocking `POST /create`; returns the final status record
    async fn create_model(&self, request: &CreateModelRequest)
        -> Result<PullProgress, ClientError>;

    /// `POST /embed`
    async fn embed(&self, request: &EmbedRequest) -> Result<EmbedResponse, ClientError>;

    /// Legacy `POST /embeddings`
    async fn embeddings(&self, model: &str, prompt: &str) -> Result<LegacyEmbedding, ClientError>;

    /// Check if a specific model is installed
    async fn has_model(&self, model: &str) -> Result<bool, ClientError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m.name == model))
    }
}
