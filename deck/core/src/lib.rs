//! llamadeck Core - Streaming Client Engine for Ollama-style Services
//!
//! This crate holds everything a llamadeck front end needs to talk to a local
//! or remote inference service, independent of any UI. It streams model
//! replies, lets callers cancel them, keeps conversations and model state,
//! and watches whether the service is reachable.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Front ends (CLI, TUI, ...)                   │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ send / cancel / switch / views
//! ┌───────────────────────────────┴──────────────────────────────────┐
//! │                             Client                               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────────────┐ │
//! │  │   Request    │  │   Session    │  │ Connectivity Supervisor │ │
//! │  │   Registry   │  │    Store     │  │  (health + reconnect)   │ │
//! │  └──────┬───────┘  └──────────────┘  └────────────┬────────────┘ │
//! │         │                                        │ resync       │
//! │  ┌──────┴───────────────────┐         ┌──────────┴────────────┐ │
//! │  │ RequestChannel           │         │     Model Catalog     │ │
//! │  │  └─ StreamDecoder        │         └───────────────────────┘ │
//! │  └──────────┬───────────────┘                                   │
//! └─────────────┼────────────────────────────────────────────────────┘
//!               │ NDJSON over HTTP
//!        ┌──────┴───────┐
//!        │ InferenceApi │  (OllamaBackend)
//!        └──────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use llamadeck_core::{load_config, Client, SendRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::from_config(load_config()?)?;
//!     client.initialize().await;
//!
//!     let outcome = client
//!         .send_message(SendRequest::new("Why is the sky blue?"), |record| {
//!             print!("{}", record.message.content);
//!         })
//!         .await?;
//!     println!("\n{:?}", outcome.sample);
//!
//!     client.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: inference service trait and the Ollama HTTP backend
//! - [`streaming`]: NDJSON decoding and cancellable request channels
//! - [`registry`]: table of in-flight requests and their cancellation tokens
//! - [`supervisor`]: health checks and bounded reconnection
//! - [`store`]: conversations, settings, metrics, capabilities, storage
//! - [`catalog`]: installed and running models
//! - [`client`]: the coordinator that owns all of the above
//! - [`config`]: TOML and environment configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod messages;
pub mod registry;
pub mod store;
pub mod streaming;
pub mod supervisor;

// Re-exports for convenience
pub use backend::{
    ChatRequest, ChatResponse, GenerateRequest, GenerateResponse, InferenceApi, OllamaBackend,
    RequestOptions, StreamEndpoint,
};
pub use catalog::ModelCatalog;
pub use client::{ChatOutcome, Client, SendRequest};
pub use error::{ClientError, ErrorKind};
pub use messages::{ChatMessage, MessageRole, PerformanceSample, ToolCall, ToolFunction};
pub use registry::{RequestHandle, RequestId, RequestRegistry};

// Store exports
pub use store::{
    Conversation, ConversationId, ExpiredStats, FileStore, KeyValueStore, MemoryStore,
    SessionStore, Settings, StorageError, StorageKey,
};

// Streaming exports
pub use streaming::{DecoderStats, RequestChannel, StreamDecoder};

// Supervisor exports
pub use supervisor::{
    ConnectionPhase, ConnectionState, ConnectivitySupervisor, HealthProbe, PhaseTransition,
    Resynchronize, SupervisorConfig,
};

// Config exports
pub use config::{
    default_config_path, default_data_dir, load_config, load_config_from_path, ClientConfig,
    ConfigError, ConfigOverrides, ConfigSource, LlamadeckToml, ServiceConfig,
};

/// Current Unix time in milliseconds
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
