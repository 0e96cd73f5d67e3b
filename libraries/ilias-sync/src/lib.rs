//! ILIAS Sync
//!
//! Mirrors a remote ILIAS subtree into a local directory: crawl the folder
//! graph, plan against the manifest of the previous run, download what
//! changed.
//!
//! Runs are idempotent. A second run over an unchanged remote tree downloads
//! nothing, and files are never deleted unless `delete_orphans` is set.

pub mod crawler;
pub mod engine;
mod error;
pub mod manifest;
pub mod paths;
pub mod planner;
mod report;
mod runner;

// Public exports
pub use crawler::{CrawlEvent, CrawlOptions, Crawler, DiscoveredNode};
pub use engine::{DownloadEngine, EngineOptions};
pub use error::{CrawlError, DownloadError, ManifestError, Result, SyncError};
pub use manifest::{LocalStamp, Manifest, ManifestEntry, ManifestStore, MANIFEST_FILE};
pub use planner::{plan, LocalSnapshot, PathFilter, PlanAction, PlanOptions, PlannedItem, SyncPlan};
pub use report::{ItemOutcome, ItemReport, SyncReport, SyncSummary};
pub use runner::{SyncOptions, SyncRunner};
