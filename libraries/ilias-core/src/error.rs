/// Core error types for the ILIAS mirror
use thiserror::Error;

/// Result type alias using `SourceError`
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors raised while establishing or renewing a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The platform rejected the username/password pair
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The platform (or its identity provider) could not be reached
    #[error("Platform unavailable: {0}")]
    PlatformUnavailable(String),

    /// A login page did not look the way the login flow expects
    #[error("Unexpected response during login: {0}")]
    UnexpectedResponseShape(String),
}

impl AuthError {
    /// Whether a later attempt may succeed without user intervention.
    ///
    /// Bad credentials never heal by themselves; everything else may be a
    /// transient hiccup of the platform.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidCredentials)
    }
}

/// Errors returned by a [`RemoteSource`](crate::RemoteSource).
#[derive(Error, Debug)]
pub enum SourceError {
    /// Request timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Any other transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Server answered with a non-success status
    #[error("Server error ({status}) for {url}")]
    Status { status: u16, url: String },

    /// The session is no longer accepted by the platform
    #[error("Session expired")]
    SessionExpired,

    /// Re-authentication failed
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The platform rendered an error page instead of content
    #[error("Platform error: {0}")]
    Platform(String),

    /// Failed to make sense of a page
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// IO error while reading a response body
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Whether retrying the same request later may succeed.
    ///
    /// Timeouts, connection failures, 5xx and 429 responses are transient.
    /// An expired session is transient too: the next attempt runs on a
    /// renewed session.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connect(_) | Self::Http(_) | Self::SessionExpired => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Auth(e) => e.is_retryable(),
            Self::Io(_) => true,
            Self::Platform(_) | Self::Parse(_) => false,
        }
    }

    /// Whether this error means the credentials themselves are bad.
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::Auth(AuthError::InvalidCredentials))
    }
}
