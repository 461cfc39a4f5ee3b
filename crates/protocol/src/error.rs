//! Item-level error taxonomy.

use serde::{Deserialize, Serialize};

use crate::reject::RejectDetails;

/// Why an upload item failed.
///
/// Stored in the item's `Failed` status so it stays visible to the UI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadError {
    /// Transient backend or network condition; chunk-level retries were exhausted.
    #[error("transient transport failure: {}", .details.summary())]
    TransportRetriable { details: RejectDetails },

    /// Permanent rejection by the destination (authorization, invalid request, quota).
    #[error("upload rejected: {}", .details.summary())]
    TransportFatal { details: RejectDetails },

    #[error("encryption failed: {message}")]
    Encryption { message: String },

    #[error("preprocessing failed: {message}")]
    Preprocessing { message: String },

    /// The source bytes could not be read (file moved, truncated, unreadable).
    #[error("failed to read source: {message}")]
    Source { message: String },
}

impl UploadError {
    /// Whether a user-initiated retry is allowed after this error.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::TransportRetriable { .. })
    }

    /// Rejection details, for the transport variants.
    pub fn reject_details(&self) -> Option<&RejectDetails> {
        match self {
            Self::TransportRetriable { details } | Self::TransportFatal { details } => {
                Some(details)
            }
            Self::Encryption { .. } | Self::Preprocessing { .. } | Self::Source { .. } => None,
        }
    }
}
