//! Model Capabilities
//!
//! A model's capabilities come from two places:
//! - the live record built from `/show` (authoritative when non-empty)
//! - tags recorded by hand, persisted separately
//!
//! Anything neither source vouches for is absent. Callers must treat an
//! absent capability as unsupported.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::backend::ModelInfo;

/// Model can emit a reasoning trace
pub const THINKING: &str = "thinking";
/// Model accepts images
pub const VISION: &str = "vision";
/// Model can call tools
pub const TOOLS: &str = "tools";
/// Model produces embeddings
pub const EMBEDDING: &str = "embedding";
/// Model produces text completions
pub const COMPLETION: &str = "completion";

/// Set of capability tags
pub type CapabilitySet = BTreeSet<String>;

/// Manually recorded tags for one model: tag -> supported
pub type ManualCapabilities = BTreeMap<String, bool>;

/// Live-fetched details of one model
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilityRecord {
    /// Raw `/show` response; `None` when the fetch failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_info: Option<ModelInfo>,
    /// Capability tags reported by the service
    #[serde(default)]
    pub capabilities: CapabilitySet,
}

impl ModelCapabilityRecord {
    /// Build from a `/show` response
    #[must_use]
    pub fn from_info(info: ModelInfo) -> Self {
        let capabilities = info
            .capabilities
            .iter()
            .flatten()
            .cloned()
            .collect();
        Self {
            raw_info: Some(info),
            capabilities,
        }
    }
}

/// Capabilities of a model given its live record and manual overrides
#[must_use]
pub fn resolve_capabilities(
    live: Option<&ModelCapabilityRecord>,
    manual: Option<&ManualCapabilities>,
) -> CapabilitySet {
    if let Some(record) = live.filter(|r| !r.capabilities.is_empty()) {
        return record.capabilities.clone();
    }
    manual
        .map(|tags| {
            tags.iter()
                .filter(|(_, supported)| **supported)
                .map(|(tag, _)| tag.clone())
                .collect()
        })
        .unwrap_or_default()
}
