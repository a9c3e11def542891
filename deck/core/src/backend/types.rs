//! Wire Types for the Inference Service
//!
//! Request and response bodies of the Ollama-style HTTP API. Durations
//! reported by the service are in nanoseconds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::messages::{ChatMessage, PerformanceSample};

/// Endpoints that can answer with a streamed NDJSON body
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamEndpoint {
    /// `POST /chat`
    Chat,
    /// `POST /generate`
    Generate,
    /// `POST /pull` with progress records
    Pull,
}

impl StreamEndpoint {
    /// Path relative to the API base URL
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Generate => "generate",
            Self::Pull => "pull",
        }
    }

    /// Prefix used for generated request ids
    #[must_use]
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Generate => "generate",
            Self::Pull => "pull",
        }
    }
}

/// Sampling options forwarded to the model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Top-k sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Nucleus sampling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
    /// RNG seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Any other option the service understands
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// `POST /chat` body
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model name
    pub model: String,
    /// Conversation so far
    pub messages: Vec<ChatMessage>,
    /// Tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    /// Structured output format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<serde_json::Value>,
    /// Sampling options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RequestOptions>,
    /// Ask a thinking model to emit its reasoning trace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
    /// Stream the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// How long the model stays loaded after the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<serde_json::Value>,
}

impl ChatRequest {
    /// Create a request for `model` with the given history
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Request the reasoning trace
    #[must_use]
    pub fn with_think(mut self, think: bool) -> Self {
        self.think = Some(think);
        self
    }

    /// Set sampling options
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// One `/chat` response record (streamed or whole)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Model that answered
    #[serde(default)]
    pub model: String,
    /// RFC 3339 creation time
    #[serde(default)]
    pub created_at: String,
    /// Partial or complete message
    #[serde(default)]
    pub message: ChatMessage,
    /// Whether this is the final record
    #[serde(default)]
    pub done: bool,
    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    /// Timing carried by the final record
    #[serde(flatten)]
    pub timings: ResponseTimings,
}

/// `POST /generate` body
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model name
    pub model: String,
    /// Prompt text
    pub prompt: String,
    /// Text after the completion (fill-in-the-middle)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    /// Base64-encoded images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    /// Structured output format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<serde_json::Value>,
    /// Sampling options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RequestOptions>,
    /// System prompt override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Prompt template override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Stream the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Bypass templating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<bool>,
    /// How long the model stays loaded after the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<serde_json::Value>,
    /// Context returned by a previous call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
}

impl GenerateRequest {
    /// Create a request with prompt and model
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set keep-alive (`0` unloads the model right after the call)
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: impl Into<serde_json::Value>) -> Self {
        self.keep_alive = Some(keep_alive.into());
        self
    }
}

/// One `/generate` response record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Model that answered
    #[serde(default)]
    pub model: String,
    /// RFC 3339 creation time
    #[serde(default)]
    pub created_at: String,
    /// Partial or complete text
    #[serde(default)]
    pub response: String,
    /// Reasoning trace fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Whether this is the final record
    #[serde(default)]
    pub done: bool,
    /// Why generation stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    /// Context to continue from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    /// Timing carried by the final record
    #[serde(flatten)]
    pub timings: ResponseTimings,
}

/// Timing and token counts reported on final records (nanoseconds)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimings {
    /// Total time spent on the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    /// Time spent loading the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    /// Tokens in the prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    /// Time spent on the prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    /// Tokens generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    /// Time spent generating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

impl ResponseTimings {
    /// Convert to a performance sample.
    ///
    /// Returns `None` when the record carries no timing at all (every
    /// non-final record). `fallback_elapsed_ms` stands in for
    /// `total_duration` when the service omitted it.
    #[must_use]
    pub fn to_sample(&self, fallback_elapsed_ms: f64, timestamp: u64) -> Option<PerformanceSample> {
        if self.total_duration.is_none() && self.eval_count.is_none() {
            return None;
        }
        let total_tokens = self.eval_count.unwrap_or(0);
        let tokens_per_second = match self.eval_duration {
            Some(ns) if ns > 0 => total_tokens as f64 / (ns as f64 / NANOS_PER_SEC),
            _ => 0.0,
        };
        Some(PerformanceSample {
            response_time: self
                .total_duration
                .map_or(fallback_elapsed_ms, |ns| ns as f64 / NANOS_PER_MILLI),
            tokens_per_second,
            total_tokens,
            load_time: self.load_duration.map(|ns| ns as f64 / NANOS_PER_MILLI),
            timestamp,
        })
    }
}

/// Model family details reported by `/tags`, `/ps` and `/show`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    /// Parent model
    #[serde(default)]
    pub parent_model: String,
    /// Weight format (e.g. gguf)
    #[serde(default)]
    pub format: String,
    /// Model family
    #[serde(default)]
    pub family: String,
    /// All families
    #[serde(default)]
    pub families: Option<Vec<String>>,
    /// Parameter count (e.g. "8B")
    #[serde(default)]
    pub parameter_size: String,
    /// Quantization (e.g. "Q4_0")
    #[serde(default)]
    pub quantization_level: String,
}

/// Entry of `GET /tags`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Model name
    pub name: String,
    /// Model identifier
    #[serde(default)]
    pub model: String,
    /// Last modification time
    #[serde(default)]
    pub modified_at: String,
    /// Size on disk in bytes
    #[serde(default)]
    pub size: u64,
    /// Content digest
    #[serde(default)]
    pub digest: String,
    /// Family details
    #[serde(default)]
    pub details: ModelDetails,
}

/// Entry of `GET /ps`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningModel {
    /// Model name
    pub name: String,
    /// Model identifier
    #[serde(default)]
    pub model: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// Content digest
    #[serde(default)]
    pub digest: String,
    /// Family details
    #[serde(default)]
    pub details: ModelDetails,
    /// When the model will be unloaded
    #[serde(default)]
    pub expires_at: String,
    /// Bytes resident in VRAM
    #[serde(default)]
    pub size_vram: u64,
}

/// Body of `GET /tags` and `GET /ps`
#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct ModelList<T> {
    #[serde(default = "Vec::new")]
    pub models: Vec<T>,
}

/// Body of `POST /show`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Modelfile source
    #[serde(default)]
    pub modelfile: String,
    /// Parameter block
    #[serde(default)]
    pub parameters: String,
    /// Prompt template
    #[serde(default)]
    pub template: String,
    /// Family details
    #[serde(default)]
    pub details: ModelDetails,
    /// Raw architecture metadata
    #[serde(default)]
    pub model_info: serde_json::Map<String, serde_json::Value>,
    /// Capability tags (e.g. "completion", "thinking", "vision")
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
}

/// Body of `GET /version`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Service version
    pub version: String,
}

/// One progress record of a streamed `/pull`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PullProgress {
    /// Status line (e.g. "pulling manifest", "success")
    #[serde(default)]
    pub status: String,
    /// Layer digest being downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Layer size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Bytes downloaded so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u64>,
}

/// `POST /create` body
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateModelRequest {
    /// Name of the new model
    pub model: String,
    /// Base model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// File name to blob digest mapping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, String>>,
    /// Stream progress
    #[serde(default)]
    pub stream: bool,
}

/// Input of `POST /embed`: one text or many
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedInput {
    /// A single text
    Single(String),
    /// A batch of texts
    Batch(Vec<String>),
}

/// `POST /embed` body
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbedRequest {
    /// Embedding model
    pub model: String,
    /// Text(s) to embed
    pub input: EmbedInput,
    /// Truncate inputs that exceed the context length
    #[serde(default = "default_truncate")]
    pub truncate: bool,
}

fn default_truncate() -> bool {
    true
}

impl EmbedRequest {
    /// Create a request with truncation enabled
    pub fn new(model: impl Into<String>, input: EmbedInput) -> Self {
        Self {
            model: model.into(),
            input,
            truncate: true,
        }
    }
}

/// Body returned by `POST /embed`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedResponse {
    /// Model that produced the vectors
    #[serde(default)]
    pub model: String,
    /// One vector per input
    #[serde(default)]
    pub embeddings: Vec<Vec<f32>>,
    /// Timing
    #[serde(flatten)]
    pub timings: ResponseTimings,
}

/// Body returned by the legacy `POST /embeddings`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyEmbedding {
    /// The vector
    #[serde(default)]
    pub embedding: Vec<f32>,
}
