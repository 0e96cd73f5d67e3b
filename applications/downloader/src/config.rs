/// Downloader configuration
use crate::cli::Cli;
use crate::error::{DownloaderError, Result};
use ilias_client::{ClientConfig, LoginFlow};
use ilias_core::Credentials;
use ilias_sync::SyncOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "ilias-downloader.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DownloaderConfig {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub credentials: CredentialSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Remote subtree; empty for the personal dashboard
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default = "default_jobs")]
    pub jobs: usize,

    #[serde(default)]
    pub force: bool,

    #[serde(default)]
    pub skip_files: bool,

    #[serde(default)]
    pub delete_orphans: bool,

    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default = "default_commit_every")]
    pub commit_every: usize,

    #[serde(default)]
    pub report: Option<PathBuf>,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct CredentialSettings {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl DownloaderConfig {
    /// Load configuration from defaults, a TOML file and the environment.
    ///
    /// An explicit `path` must exist; otherwise `ilias-downloader.toml` in
    /// the working directory is used if present. Environment variables use
    /// the `ILIAS_` prefix with `__` between sections, e.g.
    /// `ILIAS_CLIENT__BASE_URL`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        match path {
            Some(path) => {
                settings = settings.add_source(config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    settings = settings.add_source(config::File::from(default_path));
                }
            }
        }

        settings = settings.add_source(
            config::Environment::with_prefix("ILIAS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sync.include")
                .with_list_parse_key("sync.exclude"),
        );

        let config = settings
            .build()
            .map_err(|e| DownloaderError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| DownloaderError::Config(e.to_string()))
    }

    /// Let command-line flags win over file and environment values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(username) = &cli.username {
            self.credentials.username = Some(username.clone());
        }
        if let Some(password) = &cli.password {
            self.credentials.password = Some(password.clone());
        }
        if let Some(url) = &cli.sync_url {
            self.sync.url.clone_from(url);
        }
        if let Some(base_url) = &cli.base_url {
            self.client.base_url.clone_from(base_url);
        }
        if cli.form_login {
            self.client.login = LoginFlow::form();
        }
        if let Some(rate) = cli.rate {
            self.client.rate.requests = rate;
        }
        if let Some(period) = cli.rate_period_secs {
            self.client.rate.period_secs = period;
        }
        if let Some(output) = &cli.output {
            self.sync.output.clone_from(output);
        }
        if let Some(jobs) = cli.jobs {
            self.sync.jobs = jobs;
        }
        if cli.no_videos {
            self.client.videos = false;
        }
        self.client.forums |= cli.forum;
        self.client.content_tree |= cli.content_tree;
        self.sync.force |= cli.force;
        self.sync.skip_files |= cli.skip_files;
        self.sync.delete_orphans |= cli.delete_orphans;
        self.sync.include.extend(cli.include.iter().cloned());
        self.sync.exclude.extend(cli.exclude.iter().cloned());
        if let Some(report) = &cli.report {
            self.sync.report = Some(report.clone());
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.credentials.username.as_deref().filter(|s| !s.is_empty()).is_none() {
            return Err(DownloaderError::Config(
                "username is required (set ILIAS_USERNAME or --username)".to_string(),
            ));
        }
        if self.credentials.password.as_deref().filter(|s| !s.is_empty()).is_none() {
            return Err(DownloaderError::Config(
                "password is required (set ILIAS_PASSWORD or --password)".to_string(),
            ));
        }
        if self.sync.jobs == 0 {
            return Err(DownloaderError::Config("jobs must be at least 1".to_string()));
        }
        if self.sync.output.as_os_str().is_empty() {
            return Err(DownloaderError::Config("output directory is empty".to_string()));
        }
        if self.sync.output.is_file() {
            return Err(DownloaderError::Config(format!(
                "output {:?} is a file",
                self.sync.output
            )));
        }

        self.client.clone().validated()?;
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.credentials.username.clone().unwrap_or_default(),
            self.credentials.password.clone().unwrap_or_default(),
        )
    }

    pub fn sync_options(&self) -> SyncOptions {
        let mut options = SyncOptions::new(self.sync.output.clone(), self.sync.url.clone());
        options.jobs = self.sync.jobs;
        options.force = self.sync.force;
        options.skip_files = self.sync.skip_files;
        options.delete_orphans = self.sync.delete_orphans;
        options.include.clone_from(&self.sync.include);
        options.exclude.clone_from(&self.sync.exclude);
        options.commit_every = self.sync.commit_every;
        options
    }
}

// Default values
fn default_output() -> PathBuf {
    PathBuf::from(".")
}

fn default_jobs() -> usize {
    1
}

fn default_commit_every() -> usize {
    25
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            output: default_output(),
            jobs: default_jobs(),
            force: false,
            skip_files: false,
            delete_orphans: false,
            include: Vec::new(),
            exclude: Vec::new(),
            commit_every: default_commit_every(),
            report: None,
        }
    }
}
