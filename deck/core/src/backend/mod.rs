//! Inference Service Integration
//!
//! Access to the remote inference service through a common trait interface.
//!
//! # Available Backends
//!
//! - **Ollama**: local or remote Ollama server (default)
//!
//! # Usage
//!
//! ```ignore
//! use llamadeck_core::backend::{InferenceApi, OllamaBackend};
//!
//! let backend = OllamaBackend::new("http://localhost:11434/api")?;
//! let models = backend.list_models().await?;
//! ```

mod ollama;
mod traits;
pub mod types;

pub use ollama::{OllamaBackend, DEFAULT_BASE_URL};
pub use traits::{ByteStream, InferenceApi};
pub use types::{
    ChatRequest, ChatResponse, CreateModelRequest, EmbedInput, EmbedRequest, EmbedResponse,
    GenerateRequest, GenerateResponse, LegacyEmbedding, ModelDetails, ModelInfo, ModelSummary,
    PullProgress, RequestOptions, ResponseTimings, RunningModel, StreamEndpoint, VersionInfo,
};
