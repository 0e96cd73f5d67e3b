//! Error types for constructing the ILIAS client.
//!
//! Request-time failures are reported as [`ilias_core::SourceError`] /
//! [`ilias_core::AuthError`]; this module only covers setup.

use ilias_core::SourceError;
use thiserror::Error;

/// Errors that can occur when creating an ILIAS client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Invalid platform URL
    #[error("Invalid platform URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Result type for client setup.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Map a transport error onto the source error taxonomy.
pub(crate) fn transport_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout(e.to_string())
    } else if e.is_connect() {
        SourceError::Connect(e.to_string())
    } else if let Some(status) = e.status() {
        SourceError::Status {
            status: status.as_u16(),
            url: e.url().map(|u| u.to_string()).unwrap_or_default(),
        }
    } else {
        SourceError::Http(e.to_string())
    }
}
