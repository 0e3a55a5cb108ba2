use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Session token rejected or expired.
    Auth,
    /// Transient network, server or transport failure.
    Network,
    /// Throttled by the server.
    RateLimited,
    /// Inbound payload could not be decoded.
    Serialization,
    /// Client bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ChatError {
    /// Construct a new chat error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in state {current:?}"),
        )
    }

    /// Build an error for an action that came back with a non-success status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(classify_http_status(status), "action_failed", message)
    }
}

/// Map HTTP status codes to chat error categories.
///
/// Status `0` is used for requests that never produced a response.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        0 => ChatErrorCategory::Network,
        401 | 403 => ChatErrorCategory::Auth,
        408 | 429 => ChatErrorCategory::RateLimited,
        400..=499 => ChatErrorCategory::Config,
        500..=599 => ChatErrorCategory::Network,
        _ => ChatErrorCategory::Internal,
    }
}

/// Only 401 means the session token expired; 403 is a membership problem.
pub fn is_token_expiry(status: u16) -> bool {
    status == 401
}
