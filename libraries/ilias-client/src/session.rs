//! Authenticated session handling.
//!
//! A [`Session`] is an HTTP client whose cookie store holds a logged-in
//! platform session. Sessions are immutable and versioned: renewal builds a
//! new client, and requests that ran on an older version simply retry on the
//! newer one. Renewal is single-writer, so N concurrent requests that all see
//! the same expired session trigger exactly one login.

use crate::auth::{self, LoginFlow};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::rate_gate::RateGate;
use crate::retry::{retry_if, RetryConfig};
use ilias_core::{AuthError, Credentials};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

/// One logged-in platform session.
#[derive(Debug)]
pub struct Session {
    version: u64,
    http: reqwest::Client,
    established_at: Instant,
}

impl Session {
    /// Monotonic version; a renewed session always has a higher one
    pub fn version(&self) -> u64 {
        self.version
    }

    /// HTTP client carrying this session's cookies
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn age(&self) -> std::time::Duration {
        self.established_at.elapsed()
    }
}

/// Owns the credentials and the current session.
pub struct SessionManager {
    credentials: Credentials,
    flow: LoginFlow,
    base: Url,
    config: ClientConfig,
    gate: Arc<RateGate>,
    current: RwLock<Option<Arc<Session>>>,
    login_lock: Mutex<()>,
    next_version: AtomicU64,
    /// Set once the platform rejected the credentials
    rejected: AtomicBool,
}

impl SessionManager {
    pub fn new(config: ClientConfig, credentials: Credentials, gate: Arc<RateGate>) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            credentials,
            flow: config.login.clone(),
            base,
            config,
            gate,
            current: RwLock::new(None),
            login_lock: Mutex::new(()),
            next_version: AtomicU64::new(1),
            rejected: AtomicBool::new(false),
        })
    }

    /// Log in, replacing any existing session.
    ///
    /// Retryable failures are retried with backoff up to the configured
    /// number of attempts; invalid credentials fail immediately.
    pub async fn authenticate(&self) -> std::result::Result<Arc<Session>, AuthError> {
        let _guard = self.login_lock.lock().await;
        self.login_locked().await
    }

    /// The session to send the next request on, logging in lazily and
    /// renewing sessions past their maximum age.
    pub async fn current(&self) -> std::result::Result<Arc<Session>, AuthError> {
        if let Some(session) = self.current.read().await.as_ref() {
            if !self.is_too_old(session) {
                return Ok(Arc::clone(session));
            }
        }

        let _guard = self.login_lock.lock().await;
        // Someone else may have logged in while we waited for the lock
        if let Some(session) = self.current.read().await.as_ref() {
            if !self.is_too_old(session) {
                return Ok(Arc::clone(session));
            }
            info!(version = session.version, "Session reached maximum age, renewing");
        }
        self.login_locked().await
    }

    /// Report that `stale` was rejected by the platform and get a valid one.
    ///
    /// Only the first caller for a given version logs in again; everyone
    /// else gets the session that caller established.
    pub async fn ensure_valid(&self, stale: &Session) -> std::result::Result<Arc<Session>, AuthError> {
        let _guard = self.login_lock.lock().await;
        if let Some(session) = self.current.read().await.as_ref() {
            if session.version > stale.version {
                debug!(
                    stale = stale.version,
                    current = session.version,
                    "Session already renewed"
                );
                return Ok(Arc::clone(session));
            }
        }
        warn!(version = stale.version, "Session expired, logging in again");
        self.login_locked().await
    }

    /// Version of the current session, 0 before the first login
    pub async fn current_version(&self) -> u64 {
        self.current.read().await.as_ref().map_or(0, |s| s.version)
    }

    /// Whether the platform has rejected the credentials.
    ///
    /// Once set, every login attempt fails immediately without contacting
    /// the platform.
    pub fn credentials_rejected(&self) -> bool {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Must be called with `login_lock` held.
    async fn login_locked(&self) -> std::result::Result<Arc<Session>, AuthError> {
        if self.credentials_rejected() {
            debug!("Credentials were rejected before, not logging in again");
            return Err(AuthError::InvalidCredentials);
        }

        let retry = RetryConfig::login().with_max_attempts(self.config.login_attempts);
        let http = retry_if("login", &retry, AuthError::is_retryable, || async {
            let http = self.build_http()?;
            auth::login(&http, &self.base, &self.flow, &self.credentials, &self.gate).await?;
            Ok::<_, AuthError>(http)
        })
        .await
        .map_err(|e| {
            if e == AuthError::InvalidCredentials {
                warn!(user = %self.credentials.username, "Credentials rejected");
                self.rejected.store(true, Ordering::SeqCst);
            }
            e
        })?;

        let session = Arc::new(Session {
            version: self.next_version.fetch_add(1, Ordering::SeqCst),
            http,
            established_at: Instant::now(),
        });
        *self.current.write().await = Some(Arc::clone(&session));
        info!(version = session.version, "Session established");
        Ok(session)
    }

    fn build_http(&self) -> std::result::Result<reqwest::Client, AuthError> {
        reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(concat!("ilias-downloader/", env!("CARGO_PKG_VERSION")))
            .timeout(self.config.request_timeout())
            .connect_timeout(self.config.connect_timeout())
            .build()
            .map_err(|e| AuthError::PlatformUnavailable(format!("failed to build HTTP client: {}", e)))
    }

    fn is_too_old(&self, session: &Session) -> bool {
        self.config
            .session_max_age()
            .is_some_and(|max| session.age() >= max)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("user", &self.credentials.username)
            .field("flow", &self.flow.name())
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}
