//! Error types for egkrust-core

use crate::session::SessionState;
use crate::status::StatusWord;

/// Result type alias for egkrust-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Response frame too short to carry a status word
    #[error("Malformed response: expected at least 2 bytes, got {actual} bytes")]
    MalformedResponse { actual: usize },

    /// Command frame that cannot be encoded or parsed
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// Response that does not fit the exchange it answers
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Card answered with a non-success status word
    #[error("Card returned {status} ({}) for {command}", .status.description())]
    CardStatus {
        command: &'static str,
        status: StatusWord,
    },

    /// Record bytes could not be inflated
    #[error("Decompression failed: {0}")]
    DecompressionError(String),

    /// Inflated record is not a well-formed document
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Invalid session state
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    /// Step ordering violated
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// A session is already running on this handle
    #[error("Session busy: a card read is already in progress")]
    SessionBusy,
}

impl Error {
    /// Check if the card reported that the addressed file or record is missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CardStatus { status, .. } if status.is_not_found())
    }

    /// Check if the error concerns a record payload rather than the exchange
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            Self::DecompressionError(_) | Self::MalformedPayload(_)
        )
    }
}
