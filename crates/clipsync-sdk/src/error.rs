//! Error types for the Clipsync SDK.

use clipsync_db::{FormatError, ItemId};
use thiserror::Error;

/// Failure while turning a media payload into a stable reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The inline payload could not be decoded. Resolved locally.
    #[error("Could not decode pasted media: {0}")]
    DecodeFailed(String),

    /// Writing the bytes to storage failed.
    #[error("Upload of {key} failed: {reason}")]
    WriteFailed { key: String, reason: String },

    /// The bytes were written but no retrieval address could be obtained.
    #[error("Could not get an address for {key}: {reason}")]
    AddressFailed { key: String, reason: String },
}

/// Error type for engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Empty submission, rejected before any network call.
    #[error("Nothing to submit")]
    Validation,

    /// A delete or save for this item is already in flight.
    #[error("Item {0} is busy")]
    Busy(ItemId),

    /// The remote store's access policy denied the operation.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Network failure or timeout; the user may retry.
    #[error("Temporary failure: {0}")]
    Transient(String),

    /// Any other remote failure.
    #[error("Remote error: {0}")]
    Unknown(String),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Format(#[from] FormatError),

    /// The change channel could not be established within the retry budget.
    #[error("Offline: realtime channel unavailable")]
    Offline,

    /// The engine is not running.
    #[error("Engine is not running")]
    Shutdown,
}

impl SyncError {
    /// Short label distinguishing the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Validation => "validation",
            SyncError::Busy(_) => "busy",
            SyncError::Permission(_) => "permission",
            SyncError::Transient(_) => "transient",
            SyncError::Unknown(_) => "unknown",
            SyncError::Upload(UploadError::DecodeFailed(_)) => "decode",
            SyncError::Upload(UploadError::WriteFailed { .. }) => "upload-write",
            SyncError::Upload(UploadError::AddressFailed { .. }) => "upload-address",
            SyncError::Format(_) => "format",
            SyncError::Offline => "offline",
            SyncError::Shutdown => "shutdown",
        }
    }

    /// Whether a user-initiated retry can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_)
                | SyncError::Offline
                | SyncError::Upload(UploadError::WriteFailed { .. })
                | SyncError::Upload(UploadError::AddressFailed { .. })
        )
    }

    /// Errors that are handled locally and never narrated as failures.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            SyncError::Validation
                | SyncError::Busy(_)
                | SyncError::Upload(UploadError::DecodeFailed(_))
        )
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SyncError>;
