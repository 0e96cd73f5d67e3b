//! ILIAS Downloader
//!
//! Command-line front end: reads credentials and options, logs in and runs
//! one sync of the configured subtree.

pub mod cli;
pub mod config;
pub mod error;
pub mod exit;

pub use cli::Cli;
pub use config::DownloaderConfig;
pub use error::{DownloaderError, Result};
