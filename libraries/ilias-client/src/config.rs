/// Client configuration
use crate::auth::LoginFlow;
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The KIT ILIAS installation.
pub const DEFAULT_BASE_URL: &str = "https://ilias.studium.kit.edu/";

/// Configuration for connecting to an ILIAS installation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Base URL of the installation (e.g., "https://ilias.example.org/")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub login: LoginFlow,

    #[serde(default)]
    pub rate: RateConfig,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Sessions older than this are renewed before the next request
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: Option<u64>,

    /// Login attempts before a retryable login failure becomes fatal
    #[serde(default = "default_login_attempts")]
    pub login_attempts: usize,

    /// Page listing the user's courses; crawled when no sync root is given
    #[serde(default = "default_dashboard_path")]
    pub dashboard_path: String,

    /// Mirror Opencast video series
    #[serde(default = "default_true")]
    pub videos: bool,

    /// Mirror forum threads as folders of posts
    #[serde(default)]
    pub forums: bool,

    /// Also read a course's content tree to find objects its page hides
    #[serde(default)]
    pub content_tree: bool,
}

/// Outbound request cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateConfig {
    /// Requests allowed per period
    #[serde(default = "default_requests")]
    pub requests: u32,

    #[serde(default = "default_period_secs")]
    pub period_secs: u64,

    /// Tokens that may accumulate while idle
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            period_secs: default_period_secs(),
            burst: default_burst(),
        }
    }
}

impl RateConfig {
    pub fn new(requests: u32, period: Duration) -> Self {
        Self {
            requests,
            period_secs: period.as_secs().max(1),
            ..Default::default()
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login: LoginFlow::default(),
            rate: RateConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            session_max_age_secs: default_session_max_age_secs(),
            login_attempts: default_login_attempts(),
            dashboard_path: default_dashboard_path(),
            videos: true,
            forums: false,
            content_tree: false,
        }
    }
}

impl ClientConfig {
    /// Create a config for the given installation with default settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration and normalize the base URL to end in `/`.
    pub fn validated(mut self) -> Result<Self> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(ClientError::InvalidUrl("URL cannot be empty".into()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ClientError::InvalidUrl(
                "URL must start with http:// or https://".into(),
            ));
        }
        self.base_url = format!("{}/", url.trim_end_matches('/'));

        if self.rate.requests == 0 {
            return Err(ClientError::InvalidConfig(
                "rate must allow at least one request".into(),
            ));
        }
        if self.rate.period_secs == 0 {
            return Err(ClientError::InvalidConfig(
                "rate period must be at least one second".into(),
            ));
        }
        if self.login_attempts == 0 {
            return Err(ClientError::InvalidConfig(
                "login_attempts must be at least 1".into(),
            ));
        }

        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn session_max_age(&self) -> Option<Duration> {
        self.session_max_age_secs.map(Duration::from_secs)
    }
}

// Default values
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_requests() -> u32 {
    8
}

fn default_period_secs() -> u64 {
    60
}

fn default_burst() -> u32 {
    2
}

fn default_request_timeout_secs() -> u64 {
    11
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_session_max_age_secs() -> Option<u64> {
    Some(3600)
}

fn default_login_attempts() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_dashboard_path() -> String {
    "ilias.php?baseClass=ilPersonalDesktopGUI&cmd=jumpToSelectedItems".to_string()
}
