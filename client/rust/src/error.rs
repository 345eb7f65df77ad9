//! Error types for the Ligature client library.

use crate::wire::ErrorCode;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur during client operations.
///
/// Every public client operation returns `ok(value)` or `err(code, message)`
/// per spec §7; `ClientError` is the `err` side. Denied permission checks
/// are `ok(false)`, never an error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Failed to establish or maintain the subscriber transport session.
    #[error("transport error: {0}")]
    Transport(String),

    /// A submitted proof was rejected by the server's path validator.
    /// Never retried automatically; triggers optimistic rollback.
    #[error("proof rejected: {code}: {msg}")]
    ProofRejected { code: ErrorCode, msg: String },

    /// Server returned a structured `ERROR` message not tied to a proof.
    #[error("server error: {code}: {msg}")]
    Server { code: ErrorCode, msg: String },

    /// Snapshot could not be loaded or parsed; fatal, not retried silently.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// The embedded graph engine reported a failure.
    #[error("graph engine error: {0}")]
    Engine(String),

    /// Client-side pending-mutation queue is past its high-water mark.
    #[error("backpressure: too many pending mutations")]
    Backpressure,

    /// Caller-supplied argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// Whether this error represents a proof rejection (never retried).
    pub fn is_proof_error(&self) -> bool {
        matches!(self, ClientError::ProofRejected { .. })
    }

    /// The wire error code, if this error carries one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::ProofRejected { code, .. } => Some(*code),
            ClientError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}
