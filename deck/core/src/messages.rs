//! Chat Messages
//!
//! Message types shared by the wire protocol and the session store. A
//! [`ChatMessage`] is serialized as-is into chat requests, so client-only
//! fields (like [`ChatMessage::metrics`]) are skipped when empty and ignored
//! by the service otherwise.

use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt
    System,
    /// The human
    #[default]
    User,
    /// The model
    Assistant,
    /// Tool output fed back to the model
    Tool,
}

/// A function call requested by the model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// The function to invoke
    pub function: ToolFunction,
}

/// Function name and arguments of a [`ToolCall`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    /// Function name
    pub name: String,
    /// Arguments as a JSON object
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Timing for one completed response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    /// Wall time of the whole response in milliseconds
    pub response_time: f64,
    /// Generation throughput
    pub tokens_per_second: f64,
    /// Tokens generated
    pub total_tokens: u64,
    /// Model load time in milliseconds, when the service reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_time: Option<f64>,
    /// When the sample was taken (Unix timestamp ms)
    #[serde(default)]
    pub timestamp: u64,
}

/// A single chat message
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent this message
    pub role: MessageRole,
    /// Message text
    #[serde(default)]
    pub content: String,
    /// Base64-encoded images for multimodal models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    /// Reasoning trace from thinking models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Name of the tool that produced a `tool` message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Performance of the response (assistant messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PerformanceSample>,
}

impl ChatMessage {
    /// Create a message with the given role and content
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            ..Default::default()
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create an empty assistant message to be filled while streaming
    #[must_use]
    pub fn assistant_placeholder() -> Self {
        Self::new(MessageRole::Assistant, String::new())
    }

    /// Attach images
    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = (!images.is_empty()).then_some(images);
        self
    }

    /// Strip client-only fields before sending the message to the service
    #[must_use]
    pub fn for_wire(&self) -> Self {
        Self {
            metrics: None,
            ..self.clone()
        }
    }
}
