//! Ollama Backend Implementation
//!
//! [`InferenceApi`] over the Ollama REST API using reqwest.
//!
//! # Ollama API
//!
//! - `/chat`, `/generate` - completions, NDJSON when streamed
//! - `/pull` - model download, NDJSON progress when streamed
//! - `/tags`, `/ps`, `/show` - model catalog
//! - `/delete`, `/copy`, `/create` - model management
//! - `/embed`, `/embeddings` - vectors
//! - `/version` - liveness
//!
//! Streaming calls get no whole-request timeout (a long answer is not a hung
//! answer); only the connect phase is bounded. Non-streaming calls use the
//! configured request timeout.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::traits::{ByteStream, InferenceApi};
use super::types::{
    ChatRequest, ChatResponse, CreateModelRequest, EmbedRequest, EmbedResponse, GenerateRequest,
    GenerateResponse, LegacyEmbedding, ModelInfo, ModelList, ModelSummary, PullProgress,
    RunningModel, StreamEndpoint, VersionInfo,
};
use crate::config::ServiceConfig;
use crate::error::ClientError;

/// Default API root of a local Ollama install
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/api";

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// API root, without trailing slash (e.g. `http://localhost:11434/api`)
    base_url: String,
    /// Timeout for non-streaming calls
    request_timeout: Duration,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a backend for the given API root.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built (TLS backend unavailable).
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::from_config(&ServiceConfig {
            base_url: base_url.into(),
            ..ServiceConfig::default()
        })
    }

    /// Create from the `[service]` config section
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ClientError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            http_client,
        })
    }

    /// API root this backend talks to
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Map a non-success status to [`ClientError::Transport`], keeping the body
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(status = status.as_u16(), body = %body, "Ollama returned error status");
        Err(ClientError::Transport {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let response = self
            .http_client
            .get(self.url(path))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_empty<B>(&self, path: &str, body: &B) -> Result<(), ClientError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let response = self
            .http_client
            .post(self.url(path))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl InferenceApi for OllamaBackend {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn version(&self) -> Result<VersionInfo, ClientError> {
        self.get_json("version").await
    }

    async fn open_stream(
        &self,
        endpoint: StreamEndpoint,
        body: serde_json::Value,
    ) -> Result<ByteStream, ClientError> {
        let response = self
            .http_client
            .post(self.url(endpoint.path()))
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| ClientError::Connection(format!("stream read failed: {e}")))
        });
        Ok(Box::pin(stream))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError> {
        let request = ChatRequest {
            stream: Some(false),
            ..request.clone()
        };
        self.post_json("chat", &request).await
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ClientError> {
        let request = GenerateRequest {
            stream: Some(false),
            ..request.clone()
        };
        self.post_json("generate", &request).await
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, ClientError> {
        let list: ModelList<ModelSummary> = self.get_json("tags").await?;
        Ok(list.models)
    }

    async fn running_models(&self) -> Result<Vec<RunningModel>, ClientError> {
        let list: ModelList<RunningModel> = self.get_json("ps").await?;
        Ok(list.models)
    }

    async fn show_model(&self, model: &str, verbose: bool) -> Result<ModelInfo, ClientError> {
        self.post_json(
            "show",
            &serde_json::json!({ "model": model, "verbose": verbose }),
        )
        .await
    }

    async fn pull_model(&self, model: &str, insecure: bool) -> Result<PullProgress, ClientError> {
        // Pulls can take minutes; no request timeout here.
        let response = self
            .http_client
            .post(self.url("pull"))
            .json(&serde_json::json!({ "model": model, "insecure": insecure, "stream": false }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_model(&self, model: &str) -> Result<(), ClientError> {
        let response = self
            .http_client
            .delete(self.url("delete"))
            .timeout(self.request_timeout)
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn copy_model(&self, source: &str, destination: &str) -> Result<(), ClientError> {
        self.post_empty(
            "copy",
            &serde_json::json!({ "source": source, "destination": destination }),
        )
        .await
    }

    async fn create_model(
        &self,
        request: &CreateModelRequest,
    ) -> Result<PullProgress, ClientError> {
        let request = CreateModelRequest {
            stream: false,
            ..request.clone()
        };
        let response = self
            .http_client
            .post(self.url("create"))
            .json(&request)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn embed(&self, request: &EmbedRequest) -> Result<EmbedResponse, ClientError> {
        self.post_json("embed", request).await
    }

    async fn embeddings(&self, model: &str, prompt: &str) -> Result<LegacyEmbedding, ClientError> {
        self.post_json(
            "embeddings",
            &serde_json::json!({ "model": model, "prompt": prompt }),
        )
        .await
    }
}
