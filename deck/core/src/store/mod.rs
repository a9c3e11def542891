//! Session State and Durable Storage
//!
//! - [`SessionStore`]: conversations, model selection, metrics, capabilities
//! - [`KeyValueStore`]: where snapshots go ([`FileStore`] or [`MemoryStore`])
//! - [`resolve_capabilities`]: live-vs-manual capability precedence

pub mod capability;
mod conversation;
mod metrics;
mod session_store;
mod settings;
mod storage;

pub use capability::{
    resolve_capabilities, CapabilitySet, ManualCapabilities, ModelCapabilityRecord,
};
pub use conversation::{derive_title, Conversation, ConversationId, DEFAULT_TITLE};
pub use metrics::{MetricsBuffer, METRICS_CAPACITY};
pub use session_store::{ExpiredStats, SessionStore};
pub use settings::{MultimodalSettings, Settings};
pub use storage::{
    load_or_default, save, FileStore, KeyValueStore, MemoryStore, StorageError, StorageKey,
};
