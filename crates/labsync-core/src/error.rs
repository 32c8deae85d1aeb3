//! Sync error types
//!
//! Nothing in the sync core is fatal: every variant is either dropped with a
//! diagnostic, turned into a scheduled reconnect, or returned to the caller.

use thiserror::Error;

use crate::storage::StorageError;
use crate::sync::DecodeError;

/// Errors surfaced by the sync core
#[derive(Error, Debug)]
pub enum SyncError {
    /// Inbound frame or payload could not be decoded
    #[error("Failed to decode message: {0}")]
    Decode(#[from] DecodeError),

    /// A send was attempted while the connection is not open
    #[error("Not connected to the experiment server")]
    NotConnected,

    /// The decision is not among the currently offered options
    #[error("Invalid choice '{choice}': not one of the offered options")]
    InvalidChoice { choice: String },

    /// The underlying transport failed
    #[error("Transport fault: {0}")]
    TransportFault(String),

    /// Connect was called without a usable address
    #[error("Invalid server address '{0}'")]
    InvalidAddress(String),

    /// Outbound payload could not be serialized
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Session identity could not be persisted
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Whether the caller may retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::NotConnected | SyncError::TransportFault(_))
    }

    /// What the user can do about it, for storage failures that have a fix
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            SyncError::Storage(e) => e.recovery_suggestion(),
            _ => None,
        }
    }
}
