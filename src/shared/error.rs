//! Offline Error Types
//!
//! This module defines the error taxonomy of the offline subsystem. Every
//! fallible operation in the crate returns [`Result`], and callers decide from
//! the variant whether to fall back, queue, or surface the failure.
//!
//! # Error Categories
//!
//! - `StorageUnavailable` - the local store cannot be opened at all (fatal)
//! - `StorageTimeout` - one store operation exceeded its bound (transient)
//! - `RemoteUnreachable` - network absent or the request never got a reply
//! - `RemoteRejected` - the remote answered with an application-level failure
//! - `DownloadFailed` - a media fetch exhausted its retries or came back empty
//! - `VerificationMismatch` - post-download counts differ from what was attempted
//!
//! # Usage
//!
//! ```rust
//! use companion_offline::shared::error::OfflineError;
//!
//! let error = OfflineError::rejected(422, "title is required");
//! assert!(error.is_remote_rejection());
//! assert!(!error.is_transient());
//! ```
use std::time::Duration;
use thiserror::Error;

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, OfflineError>;

/// Errors produced by the offline subsystem
#[derive(Debug, Error, Clone)]
pub enum OfflineError {
    /// The local store could not be opened or initialized
    #[error("Local storage unavailable: {message}")]
    StorageUnavailable {
        /// Human-readable error message
        message: String,
    },

    /// A single store operation exceeded its time bound
    #[error("Storage operation '{operation}' on '{collection}' timed out after {after:?}")]
    StorageTimeout {
        /// Operation name (put, get_all, ...)
        operation: &'static str,
        /// Collection the operation targeted
        collection: String,
        /// Configured bound that was exceeded
        after: Duration,
    },

    /// A store operation failed for any other reason
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message
        message: String,
    },

    /// Network absent, or the request failed before a response arrived
    #[error("Remote unreachable: {message}")]
    RemoteUnreachable {
        /// Human-readable error message
        message: String,
    },

    /// The remote service answered with an application-level failure
    #[error("Remote rejected the request ({status}): {message}")]
    RemoteRejected {
        /// HTTP-like status code reported by the remote
        status: u16,
        /// Human-readable error message
        message: String,
    },

    /// Media download failed after all retries, or returned no content
    #[error("Download of '{url}' failed after {attempts} attempt(s): {message}")]
    DownloadFailed {
        /// Source URL of the media item
        url: String,
        /// Number of attempts made
        attempts: u32,
        /// Human-readable error message
        message: String,
    },

    /// Post-download verification found fewer items than attempted
    #[error("Verification mismatch in '{collection}': expected {expected}, found {found}")]
    VerificationMismatch {
        /// Collection that was checked
        collection: String,
        /// Number of items attempted
        expected: usize,
        /// Number of items actually stored
        found: usize,
    },

    /// A source URL was not well-formed
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parser message
        message: String,
    },

    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },

    /// A record the caller required does not exist
    #[error("Not found: {collection}/{id}")]
    NotFound {
        /// Collection searched
        collection: String,
        /// Missing identifier
        id: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable error message
        message: String,
    },
}

impl OfflineError {
    /// Create a storage-unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    /// Create a storage-timeout error
    pub fn timeout(operation: &'static str, collection: impl Into<String>, after: Duration) -> Self {
        Self::StorageTimeout {
            operation,
            collection: collection.into(),
            after,
        }
    }

    /// Create a generic storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a remote-unreachable error
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::RemoteUnreachable {
            message: message.into(),
        }
    }

    /// Create a remote-rejected error
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::RemoteRejected {
            status,
            message: message.into(),
        }
    }

    /// Create a download failure
    pub fn download(url: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            attempts,
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageTimeout { .. } | Self::RemoteUnreachable { .. } | Self::DownloadFailed { .. }
        )
    }

    /// Whether the remote service refused the request itself
    pub fn is_remote_rejection(&self) -> bool {
        matches!(self, Self::RemoteRejected { .. })
    }

    /// Whether this is a remote-side failure of either kind
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteUnreachable { .. } | Self::RemoteRejected { .. })
    }

    /// Whether the whole offline subsystem is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }
}

impl From<serde_json::Error> for OfflineError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl From<sqlx::Error> for OfflineError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<reqwest::Error> for OfflineError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() => Self::rejected(status.as_u16(), err.to_string()),
            _ => Self::unreachable(err.to_string()),
        }
    }
}
