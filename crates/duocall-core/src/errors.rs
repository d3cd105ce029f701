use thiserror::Error;

use crate::types::CallState;

/// Result type for call operations
pub type Result<T> = std::result::Result<T, CallError>;

/// Call-related errors
#[derive(Debug, Error)]
pub enum CallError {
    /// A command was issued in a state that does not admit it. This is a
    /// programmer error, reported on the event stream as `StateMismatch`
    /// rather than on the error stream.
    #[error("{operation} requires state {required}, current state is {actual}")]
    StateMismatch {
        operation: &'static str,
        required: &'static str,
        actual: CallState,
    },

    /// Signaling transport failed to deliver a message.
    #[error("send message failed (code {code}): {message}")]
    Signaling { code: i64, message: String },

    /// Media plane failure: join, leave, publish, subscribe, or track
    /// creation/playback.
    #[error("rtc error (code {code}): {message}")]
    Rtc { code: i64, message: String },

    /// The signaling envelope could not be encoded or decoded.
    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CallError {
    /// Transport failure with no meaningful error code.
    pub fn signaling(message: impl Into<String>) -> Self {
        CallError::Signaling {
            code: 0,
            message: message.into(),
        }
    }

    /// Media failure with no meaningful error code.
    pub fn rtc(message: impl Into<String>) -> Self {
        CallError::Rtc {
            code: 0,
            message: message.into(),
        }
    }

    /// The numeric code carried to `call_error` observers.
    pub fn code(&self) -> i64 {
        match self {
            CallError::Signaling { code, .. } | CallError::Rtc { code, .. } => *code,
            _ => 0,
        }
    }
}
