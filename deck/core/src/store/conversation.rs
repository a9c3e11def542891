//! Conversation Records

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::messages::{ChatMessage, MessageRole};
use crate::registry::generate_id;

/// Title of a conversation that has no user message yet
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Characters of the first user message kept in a derived title
pub const TITLE_MAX_CHARS: usize = 30;

/// Opaque conversation identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Generate a fresh id
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_id("conv"))
    }

    /// Borrow the id as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One chat history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique id
    pub id: ConversationId,
    /// Display title
    pub title: String,
    /// Model the conversation was started with
    pub model: String,
    /// Messages in order
    pub messages: Vec<ChatMessage>,
    /// Creation time (Unix timestamp ms)
    pub created_at: u64,
    /// Last mutation time (Unix timestamp ms)
    pub updated_at: u64,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new(model: impl Into<String>, now: u64) -> Self {
        Self {
            id: ConversationId::generate(),
            title: DEFAULT_TITLE.to_string(),
            model: model.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, deriving the title from the first user message
    pub fn push(&mut self, message: ChatMessage, now: u64) {
        if message.role == MessageRole::User && self.title == DEFAULT_TITLE {
            self.title = derive_title(&message.content);
        }
        self.messages.push(message);
        self.updated_at = now;
    }

    /// Trailing message, if any
    pub fn last_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages.last_mut()
    }

    /// Age relative to `now`, from the last mutation
    #[must_use]
    pub fn idle_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.updated_at)
    }
}

/// Title for a conversation whose first user message is `content`
#[must_use]
pub fn derive_title(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_truncation() {
        assert_eq!(derive_title("short"), "short");
        let exact = "a".repeat(TITLE_MAX_CHARS);
        assert_eq!(derive_title(&exact), exact);
        let long = "b".repeat(TITLE_MAX_CHARS + 1);
        assert_eq!(derive_title(&long), format!("{}...", "b".repeat(TITLE_MAX_CHARS)));
    }

    #[test]
    fn test_title_counts_characters_not_bytes() {
        let text = "é".repeat(40);
        assert_eq!(derive_title(&text).chars().count(), TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn test_title_derived_once() {
        let mut conv = Conversation::new("llama3.2", 10);
        conv.push(ChatMessage::system("be brief"), 11);
        assert_eq!(conv.title, DEFAULT_TITLE);

        conv.push(ChatMessage::user("What is Rust?"), 12);
        conv.push(ChatMessage::user("And Go?"), 13);
        assert_eq!(conv.title, "What is Rust?");
        assert_eq!(conv.updated_at, 13);
        assert_eq!(conv.created_at, 10);
    }

    #[test]
    fn test_camel_case_persistence() {
        let conv = Conversation::new("m", 5);
        let json = serde_json::to_value(&conv).unwrap();
        assert_eq!(json["createdAt"], 5);
        assert_eq!(json["updatedAt"], 5);
        assert!(json["id"].as_str().unwrap().starts_with("conv_"));
    }
}
