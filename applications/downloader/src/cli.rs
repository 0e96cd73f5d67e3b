/// Command-line interface
use clap::{ArgAction, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

/// Environment variable holding free-form extra arguments
pub const EXTRA_OPTIONS_ENV: &str = "ILIAS_EXTRA_OPTIONS";

#[derive(Debug, Parser)]
#[command(name = "ilias-downloader")]
#[command(about = "Mirror an ILIAS course tree into a local directory", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Account name
    #[arg(long, env = "ILIAS_USERNAME")]
    pub username: Option<String>,

    /// Account password
    #[arg(long, env = "ILIAS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Course or folder to mirror (defaults to the personal dashboard)
    #[arg(long = "url", env = "ILIAS_SYNC_URL")]
    pub sync_url: Option<String>,

    /// Base URL of the ILIAS installation
    #[arg(long, env = "ILIAS_BASE_URL")]
    pub base_url: Option<String>,

    /// Log in through the plain ILIAS login form instead of Shibboleth
    #[arg(long)]
    pub form_login: bool,

    /// Requests allowed per rate period
    #[arg(long, env = "ILIAS_RATE")]
    pub rate: Option<u32>,

    /// Length of the rate period in seconds
    #[arg(long, env = "ILIAS_RATE_PERIOD_SECS")]
    pub rate_period_secs: Option<u64>,

    /// Target directory
    #[arg(short, long, env = "ILIAS_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Concurrent listings and downloads
    #[arg(short, long, env = "ILIAS_JOBS")]
    pub jobs: Option<usize>,

    /// Re-download every file
    #[arg(short, long)]
    pub force: bool,

    /// Only create the folder structure
    #[arg(short, long)]
    pub skip_files: bool,

    /// Do not mirror Opencast video series
    #[arg(short = 'n', long)]
    pub no_videos: bool,

    /// Mirror forum threads as HTML posts
    #[arg(short = 't', long)]
    pub forum: bool,

    /// Also list course items only shown in the content tree
    #[arg(long)]
    pub content_tree: bool,

    /// Delete local files whose remote object is gone
    #[arg(long)]
    pub delete_orphans: bool,

    /// Only mirror files matching this glob (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub include: Vec<String>,

    /// Never mirror files matching this glob (repeatable)
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Write the JSON run report to this file
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "ILIAS_CONFIG")]
    pub config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Parse the process arguments plus anything in `ILIAS_EXTRA_OPTIONS`.
    pub fn parse_with_extra_options() -> Self {
        let extra = std::env::var(EXTRA_OPTIONS_ENV).ok();
        Self::parse_from(with_extra_options(std::env::args_os(), extra.as_deref()))
    }
}

/// Append whitespace-separated `extra` arguments to `args`.
pub fn with_extra_options(
    args: impl IntoIterator<Item = OsString>,
    extra: Option<&str>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = args.into_iter().collect();
    if let Some(extra) = extra {
        args.extend(extra.split_whitespace().map(OsString::from));
    }
    args
}

/// Default log filter for a verbosity level.
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "ilias_downloader=info,ilias_sync=info,ilias_client=info",
        1 => "ilias_downloader=debug,ilias_sync=debug,ilias_client=debug",
        _ => "ilias_downloader=trace,ilias_sync=trace,ilias_client=trace",
    }
}
