//! Shared Module
//!
//! Types used across the offline layer: configuration, the error type every
//! public operation returns, and the listener registry behind progress and
//! sync notifications.

/// Offline layer configuration
pub mod config;

/// Shared error types
pub mod error;

/// Listener registry
pub mod subscribers;

pub use config::{ConfigError, OfflineConfig, OfflineConfigBuilder};
pub use error::{OfflineError, Result};
pub use subscribers::{Subscribers, Subscription};
