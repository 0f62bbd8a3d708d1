//! Error types for the data layer.

use thiserror::Error;

/// A content payload the document normalizer does not recognize.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Unknown content format: {found}")]
    UnknownFormat { found: String },

    #[error("Invalid content run at {index}: {reason}")]
    InvalidRun { index: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, FormatError>;
