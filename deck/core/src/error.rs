//! Client Error Types
//!
//! Every fallible operation in the engine returns [`ClientError`]. Callers of
//! a streaming call must be able to tell "the model finished" from "the model
//! was stopped" from "the network broke", so those outcomes map to distinct
//! variants and to an [`ErrorKind`] that can be matched without inspecting
//! messages.
//!
//! Malformed streamed records never surface here; the decoder drops them with
//! a warning. Unknown model capabilities are not errors either: they resolve
//! to an empty capability set.

use thiserror::Error;

use crate::registry::RequestId;

/// Errors produced by the client engine
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service answered with a non-success HTTP status before streaming began
    #[error("service returned HTTP {status}: {body}")]
    Transport {
        /// HTTP status code
        status: u16,
        /// Response body (may be empty)
        body: String,
    },

    /// The connection could not be established or broke mid-stream
    #[error("connection failed: {0}")]
    Connection(String),

    /// The caller cancelled the request
    #[error("request {request_id} was cancelled")]
    Cancelled {
        /// The cancelled request
        request_id: RequestId,
    },

    /// A request id was registered twice
    #[error("request id {0} is already in flight")]
    DuplicateRequestId(RequestId),

    /// A chat was requested with no model selected
    #[error("no model selected")]
    NoModelSelected,

    /// The service answered with something the client cannot interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request payload could not be serialized
    #[error("failed to serialize request: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable storage failed
    #[error("storage error: {0}")]
    Storage(#[from] crate::store::StorageError),
}

/// Coarse classification of a [`ClientError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or HTTP-level failure
    Transport,
    /// Caller-initiated abort
    Cancellation,
    /// Anything else (local misuse, bad payloads, storage)
    Other,
}

impl ClientError {
    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::Connection(_) => ErrorKind::Transport,
            Self::Cancelled { .. } => ErrorKind::Cancellation,
            _ => ErrorKind::Other,
        }
    }

    /// Whether the request was stopped by its caller
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }

    /// Whether this error says something about service reachability.
    ///
    /// Only connection-level failures count; a 4xx/5xx means the service is
    /// up and answering.
    #[must_use]
    pub fn indicates_disconnect(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// HTTP status code, if the service produced one
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::Transport {
                status: status.as_u16(),
                body: String::new(),
            };
        }
        if error.is_decode() {
            return Self::InvalidResponse(error.to_string());
        }
        Self::Connection(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let transport = ClientError::Transport {
            status: 404,
            body: "model not found".to_string(),
        };
        assert_eq!(transport.kind(), ErrorKind::Transport);
        assert_eq!(transport.status(), Some(404));
        assert!(!transport.indicates_disconnect());

        let cancelled = ClientError::Cancelled {
            request_id: RequestId::from("chat_1"),
        };
        assert!(cancelled.is_cancelled());
        assert_eq!(cancelled.status(), None);

        let connection = ClientError::Connection("refused".to_string());
        assert_eq!(connection.kind(), ErrorKind::Transport);
        assert!(connection.indicates_disconnect());
    }

    #[test]
    fn test_error_messages() {
        let err = ClientError::Transport {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "service returned HTTP 500: boom");

        let err = ClientError::Cancelled {
            request_id: RequestId::from("chat_7"),
        };
        assert_eq!(err.to_string(), "request chat_7 was cancelled");
    }
}
