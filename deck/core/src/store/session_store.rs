//! Session Store
//!
//! Owns conversations, the model selection, the metrics buffer and the
//! model-capability caches. All mutation goes through the methods here; each
//! one bumps a revision counter that observers can watch.
//!
//! # Persistence
//!
//! Conversation mutations write the whole collection through to storage
//! when `auto_save` is on. Streaming updates to the trailing message are the
//! exception: they stay in memory until the final update (content plus
//! metrics) lands. Write failures are logged and never undo the in-memory
//! change; [`SessionStore::persist`] reports them to callers who ask.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::capability::{
    resolve_capabilities, CapabilitySet, ManualCapabilities, ModelCapabilityRecord,
};
use super::conversation::{Conversation, ConversationId};
use super::metrics::MetricsBuffer;
use super::settings::Settings;
use super::storage::{load_or_default, save, KeyValueStore, StorageError, StorageKey};
use crate::messages::{ChatMessage, MessageRole, PerformanceSample};
use crate::now_ms;

/// Summary of what an expiration sweep would remove
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiredStats {
    /// Conversations held
    pub total: usize,
    /// Conversations past the retention window
    pub expired: usize,
    /// Retention window in days
    pub cleanup_days: u32,
}

/// Conversations, model selection, metrics and capability caches
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    /// Newest first
    conversations: Vec<Conversation>,
    current: Option<ConversationId>,
    selected_model: String,
    settings: Settings,
    metrics: MetricsBuffer,
    model_details: BTreeMap<String, ModelCapabilityRecord>,
    manual_capabilities: BTreeMap<String, ManualCapabilities>,
    revision: watch::Sender<u64>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("conversations", &self.conversations.len())
            .field("current", &self.current)
            .field("selected_model", &self.selected_model)
            .field("revision", &*self.revision.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create an empty store backed by `storage` without reading from it
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            storage,
            conversations: Vec::new(),
            current: None,
            selected_model: String::new(),
            settings: Settings::default(),
            metrics: MetricsBuffer::default(),
            model_details: BTreeMap::new(),
            manual_capabilities: BTreeMap::new(),
            revision,
        }
    }

    /// Create a store and restore every persisted snapshot.
    ///
    /// Missing or corrupt values fall back to defaults. The last active
    /// conversation is restored if it still exists, otherwise the newest one
    /// becomes current.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let mut store = Self::new(storage);
        let backend = store.storage.as_ref();

        store.settings = load_or_default(backend, StorageKey::Settings);
        store.conversations = load_or_default(backend, StorageKey::Conversations);
        store.model_details = load_or_default(backend, StorageKey::ModelDetails);
        store.manual_capabilities = load_or_default(backend, StorageKey::ModelCapabilities);
        let active: Option<ConversationId> =
            load_or_default(backend, StorageKey::ActiveConversation);

        store.current = active
            .filter(|id| store.conversations.iter().any(|c| &c.id == id))
            .or_else(|| store.conversations.first().map(|c| c.id.clone()));

        tracing::info!(
            conversations = store.conversations.len(),
            models_cached = store.model_details.len(),
            "Loaded session"
        );
        store
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Receiver notified after every mutation
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Number of mutations so far
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write every snapshot to storage
    ///
    /// # Errors
    ///
    /// The first storage failure.
    pub fn persist(&self) -> Result<(), StorageError> {
        let backend = self.storage.as_ref();
        save(backend, StorageKey::Settings, &self.settings)?;
        save(backend, StorageKey::Conversations, &self.conversations)?;
        save(backend, StorageKey::ModelDetails, &self.model_details)?;
        save(backend, StorageKey::ModelCapabilities, &self.manual_capabilities)?;
        save(backend, StorageKey::ActiveConversation, &self.current)?;
        Ok(())
    }

    fn write<T: Serialize + ?Sized>(&self, key: StorageKey, value: &T) {
        if let Err(e) = save(self.storage.as_ref(), key, value) {
            tracing::error!(key = %key, error = %e, "Failed to persist");
        }
    }

    fn autosave_conversations(&self) {
        if self.settings.auto_save {
            self.write(StorageKey::Conversations, &self.conversations);
            self.write(StorageKey::ActiveConversation, &self.current);
        }
    }

    // ========================================================================
    // Conversations
    // ========================================================================

    /// Every conversation, newest first
    #[must_use]
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Look up a conversation
    #[must_use]
    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    /// Id of the current conversation
    #[must_use]
    pub fn current_id(&self) -> Option<&ConversationId> {
        self.current.as_ref()
    }

    /// The current conversation
    #[must_use]
    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current.as_ref().and_then(|id| self.conversation(id))
    }

    /// Messages of the current conversation; empty when there is none
    #[must_use]
    pub fn current_messages(&self) -> &[ChatMessage] {
        self.current_conversation()
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
    }

    fn current_mut(&mut self) -> Option<&mut Conversation> {
        let id = self.current.as_ref()?;
        self.conversations.iter_mut().find(|c| &c.id == id)
    }

    /// Start a conversation and make it current.
    ///
    /// Without `model` the conversation uses the selected model.
    pub fn create_conversation(&mut self, model: Option<&str>) -> ConversationId {
        let model = model.unwrap_or(&self.selected_model).to_string();
        let conversation = Conversation::new(model, now_ms());
        let id = conversation.id.clone();
        tracing::debug!(conversation_id = %id, model = %conversation.model, "Created conversation");

        self.conversations.insert(0, conversation);
        self.current = Some(id.clone());
        self.autosave_conversations();
        self.bump();
        id
    }

    /// Make an existing conversation current. Unknown ids are ignored.
    pub fn switch_conversation(&mut self, id: &ConversationId) -> bool {
        if self.conversation(id).is_none() {
            return false;
        }
        self.current = Some(id.clone());
        if self.settings.auto_save {
            self.write(StorageKey::ActiveConversation, &self.current);
        }
        self.bump();
        true
    }

    /// Append to the current conversation, creating one first if needed.
    ///
    /// Returns the id of the conversation the message landed in.
    pub fn append_message(&mut self, message: ChatMessage) -> ConversationId {
        let id = match self.current_conversation() {
            Some(conversation) => conversation.id.clone(),
            None => self.create_conversation(None),
        };
        let now = now_ms();
        if let Some(conversation) = self.conversations.iter_mut().find(|c| c.id == id) {
            conversation.push(message, now);
        }
        self.autosave_conversations();
        self.bump();
        id
    }

    fn mutate_last(&mut self, f: impl FnOnce(&mut ChatMessage)) -> bool {
        let now = now_ms();
        let Some(conversation) = self.current_mut() else {
            return false;
        };
        let Some(last) = conversation.last_mut() else {
            return false;
        };
        f(last);
        conversation.updated_at = now;
        self.bump();
        true
    }

    /// Replace the trailing message's content (streaming path, not persisted)
    pub fn update_last_message(&mut self, content: &str) -> bool {
        self.mutate_last(|m| content.clone_into(&mut m.content))
    }

    /// Replace the trailing message's content and attach its metrics.
    ///
    /// Persisted when `auto_save` is on and the content is not blank.
    pub fn update_last_message_with_metrics(
        &mut self,
        content: &str,
        metrics: PerformanceSample,
    ) -> bool {
        let updated = self.mutate_last(|m| {
            content.clone_into(&mut m.content);
            m.metrics = Some(metrics);
        });
        if updated && !content.trim().is_empty() {
            self.autosave_conversations();
        }
        updated
    }

    /// Replace the trailing message's reasoning trace (not persisted)
    pub fn update_last_message_thinking(&mut self, thinking: &str) -> bool {
        self.mutate_last(|m| m.thinking = Some(thinking.to_string()))
    }

    /// Drop the trailing assistant message if nothing was streamed into it.
    ///
    /// Used when a chat fails before the first record arrives.
    pub fn discard_empty_reply(&mut self) -> bool {
        let now = now_ms();
        let Some(conversation) = self.current_mut() else {
            return false;
        };
        let empty = conversation.messages.last().is_some_and(|m| {
            m.role == MessageRole::Assistant
                && m.content.trim().is_empty()
                && m.thinking.as_deref().map_or(true, |t| t.trim().is_empty())
        });
        if !empty {
            return false;
        }
        conversation.messages.pop();
        conversation.updated_at = now;
        self.autosave_conversations();
        self.bump();
        true
    }

    /// Persist the conversation collection now, regardless of `auto_save`
    pub fn save_conversations(&self) {
        self.write(StorageKey::Conversations, &self.conversations);
        self.write(StorageKey::ActiveConversation, &self.current);
    }

    /// Delete a conversation. If it was current, the newest remaining one
    /// becomes current.
    pub fn delete_conversation(&mut self, id: &ConversationId) -> bool {
        let Some(index) = self.conversations.iter().position(|c| &c.id == id) else {
            return false;
        };
        self.conversations.remove(index);
        if self.current.as_ref() == Some(id) {
            self.current = self.conversations.first().map(|c| c.id.clone());
        }
        self.autosave_conversations();
        self.bump();
        true
    }

    /// Remove every conversation
    pub fn clear_conversations(&mut self) {
        self.conversations.clear();
        self.current = None;
        self.autosave_conversations();
        self.bump();
    }

    // ========================================================================
    // Retention
    // ========================================================================

    fn is_expired(&self, conversation: &Conversation, now: u64) -> bool {
        conversation.idle_ms(now) > self.settings.max_age_ms()
    }

    /// Remove conversations idle longer than the retention window
    pub fn cleanup_expired(&mut self) -> usize {
        self.cleanup_expired_at(now_ms())
    }

    /// Remove conversations with `now - updated_at > max_age`.
    ///
    /// A conversation exactly at the boundary is kept. Returns how many
    /// were removed.
    pub fn cleanup_expired_at(&mut self, now: u64) -> usize {
        let before = self.conversations.len();
        let max_age = self.settings.max_age_ms();
        self.conversations.retain(|c| c.idle_ms(now) <= max_age);
        let removed = before - self.conversations.len();
        if removed == 0 {
            return 0;
        }

        let current_gone = self
            .current
            .as_ref()
            .is_some_and(|id| !self.conversations.iter().any(|c| &c.id == id));
        if current_gone {
            self.current = self.conversations.first().map(|c| c.id.clone());
        }

        tracing::info!(
            removed,
            cleanup_days = self.settings.cleanup_days,
            "Removed expired conversations"
        );
        self.autosave_conversations();
        self.bump();
        removed
    }

    /// What a sweep at `now` would remove
    #[must_use]
    pub fn expired_stats_at(&self, now: u64) -> ExpiredStats {
        ExpiredStats {
            total: self.conversations.len(),
            expired: self
                .conversations
                .iter()
                .filter(|c| self.is_expired(c, now))
                .count(),
            cleanup_days: self.settings.cleanup_days,
        }
    }

    /// What a sweep right now would remove
    #[must_use]
    pub fn expired_stats(&self) -> ExpiredStats {
        self.expired_stats_at(now_ms())
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    /// Record a response sample, evicting the oldest past capacity
    pub fn add_performance_metric(&mut self, sample: PerformanceSample) {
        self.metrics.push(sample);
        self.bump();
    }

    /// Recent samples
    #[must_use]
    pub fn metrics(&self) -> &MetricsBuffer {
        &self.metrics
    }

    /// Mean response time of the recent samples in ms
    #[must_use]
    pub fn average_response_time(&self) -> f64 {
        self.metrics.average_response_time()
    }

    // ========================================================================
    // Model Selection & Settings
    // ========================================================================

    /// Selected model; empty when none
    #[must_use]
    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    /// Select a model and remember it as the default for next start
    pub fn set_selected_model(&mut self, model: &str) {
        model.clone_into(&mut self.selected_model);
        model.clone_into(&mut self.settings.default_model);
        self.write(StorageKey::Settings, &self.settings);
        tracing::info!(model, "Selected model");
        self.bump();
    }

    /// Pick a model for this session only
    pub(crate) fn select_model(&mut self, model: &str) {
        model.clone_into(&mut self.selected_model);
        self.bump();
    }

    /// When nothing is selected, pick the configured default if installed,
    /// else the first available model. Returns the selection.
    pub fn select_default_model(&mut self, available: &[String]) -> Option<&str> {
        if self.selected_model.is_empty() && !available.is_empty() {
            let default = &self.settings.default_model;
            let pick = if available.contains(default) {
                default.clone()
            } else {
                available[0].clone()
            };
            self.select_model(&pick);
        }
        (!self.selected_model.is_empty()).then_some(self.selected_model.as_str())
    }

    /// Current settings
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Change settings and persist them
    pub fn update_settings(&mut self, f: impl FnOnce(&mut Settings)) -> &Settings {
        f(&mut self.settings);
        self.write(StorageKey::Settings, &self.settings);
        self.bump();
        &self.settings
    }

    // ========================================================================
    // Capabilities
    // ========================================================================

    /// Replace the live record of one model (not persisted)
    pub fn record_model_details(&mut self, model: &str, record: ModelCapabilityRecord) {
        self.model_details.insert(model.to_string(), record);
        self.bump();
    }

    /// Replace every live record and persist the cache
    pub fn replace_model_details(&mut self, details: BTreeMap<String, ModelCapabilityRecord>) {
        self.model_details = details;
        self.write(StorageKey::ModelDetails, &self.model_details);
        self.bump();
    }

    /// Live record of a model
    #[must_use]
    pub fn model_details(&self, model: &str) -> Option<&ModelCapabilityRecord> {
        self.model_details.get(model)
    }

    /// Record by hand whether a model supports a capability
    pub fn set_manual_capability(&mut self, model: &str, tag: &str, supported: bool) {
        self.manual_capabilities
            .entry(model.to_string())
            .or_default()
            .insert(tag.to_string(), supported);
        self.write(StorageKey::ModelCapabilities, &self.manual_capabilities);
        tracing::info!(model, tag, supported, "Recorded model capability");
        self.bump();
    }

    /// Resolved capabilities of a model; empty when unknown
    #[must_use]
    pub fn capabilities(&self, model: &str) -> CapabilitySet {
        resolve_capabilities(
            self.model_details.get(model),
            self.manual_capabilities.get(model),
        )
    }

    /// Whether a model supports a capability
    #[must_use]
    pub fn supports(&self, model: &str, tag: &str) -> bool {
        self.capabilities(model).contains(tag)
    }
}
