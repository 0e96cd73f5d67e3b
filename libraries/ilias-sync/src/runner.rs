use crate::crawler::{CrawlEvent, CrawlOptions, Crawler, DiscoveredNode};
use crate::engine::{DownloadEngine, EngineOptions};
use crate::error::{CrawlError, Result, SyncError};
use crate::manifest::ManifestStore;
use crate::planner::{self, LocalSnapshot, PathFilter, PlanAction, PlanOptions};
use crate::report::{ItemOutcome, ItemReport, SyncReport};
use chrono::Utc;
use futures_util::StreamExt;
use ilias_client::RetryConfig;
use ilias_core::{AuthError, RemoteSource};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything that shapes one sync run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Directory the subtree is mirrored into
    pub output: PathBuf,
    /// Remote URL of the subtree; empty for the personal dashboard
    pub sync_url: String,
    /// Worker-pool size for folder listings and downloads
    pub jobs: usize,
    pub force: bool,
    pub skip_files: bool,
    pub delete_orphans: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub retry: RetryConfig,
    pub commit_every: usize,
}

impl SyncOptions {
    pub fn new(output: impl Into<PathBuf>, sync_url: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            sync_url: sync_url.into(),
            jobs: 1,
            force: false,
            skip_files: false,
            delete_orphans: false,
            include: Vec::new(),
            exclude: Vec::new(),
            retry: RetryConfig::request(),
            commit_every: 25,
        }
    }
}

/// Runs crawl, plan and download for one sync root
pub struct SyncRunner<S> {
    source: Arc<S>,
    options: SyncOptions,
    cancel: CancellationToken,
}

impl<S: RemoteSource + 'static> SyncRunner<S> {
    pub fn new(source: Arc<S>, options: SyncOptions, cancel: CancellationToken) -> Self {
        Self {
            source,
            options,
            cancel,
        }
    }

    pub async fn run(&self) -> Result<SyncReport> {
        let started = std::time::Instant::now();
        let filter = PathFilter::new(&self.options.include, &self.options.exclude)
            .map_err(|e| SyncError::InvalidOptions(e.to_string()))?;
        tokio::fs::create_dir_all(&self.options.output).await?;

        // Phase 1: Manifest
        let mut store = ManifestStore::load(&self.options.output).await?;
        let root = self
            .source
            .resolve_root(&self.options.sync_url)
            .await
            .map_err(SyncError::root_unreachable)?;
        store.set_sync_root(&self.options.sync_url);
        info!(root = %root.remote_id, output = %self.options.output.display(), "Starting sync");

        // Phase 2: Crawl
        debug!("Phase 2: Crawling");
        let crawler = Crawler::new(
            Arc::clone(&self.source),
            CrawlOptions {
                jobs: self.options.jobs,
                retry: self.options.retry.clone(),
            },
            self.cancel.clone(),
        );
        let mut events = crawler.crawl(root);
        let mut discovered: Vec<DiscoveredNode> = Vec::new();
        let mut failed_folders: Vec<ItemReport> = Vec::new();
        while let Some(event) = events.next().await {
            match event {
                CrawlEvent::Discovered(found) => discovered.push(found),
                CrawlEvent::FolderFailed { path, error, .. } if error.is_invalid_credentials() => {
                    error!(path = %path, "Login rejected while crawling, aborting");
                    return Err(SyncError::Auth(AuthError::InvalidCredentials));
                }
                CrawlEvent::FolderFailed { path, error, .. } if path.is_empty() => {
                    error!(error = %error, "Sync root could not be listed");
                    return Err(match error {
                        CrawlError::Source(source) => SyncError::root_unreachable(source),
                        CrawlError::Cancelled => SyncError::Cancelled,
                    });
                }
                CrawlEvent::FolderFailed {
                    folder,
                    path,
                    error,
                } => {
                    failed_folders.push(
                        ItemReport::new(path, Some(folder.remote_id), ItemOutcome::Failed)
                            .with_detail(error.to_string()),
                    );
                }
            }
        }
        if self.cancel.is_cancelled() {
            // A partial crawl would make everything unseen look orphaned
            warn!("Cancelled during crawl, nothing was downloaded");
            let mut report = SyncReport::new();
            report.cancelled = true;
            report.failed_folders = failed_folders;
            report.finish();
            return Ok(report);
        }
        info!(
            nodes = discovered.len(),
            failed_folders = failed_folders.len(),
            "Crawl complete"
        );

        // Phase 3: Plan
        debug!("Phase 3: Planning");
        let local = LocalSnapshot::capture(
            &self.options.output,
            store
                .manifest()
                .entries
                .keys()
                .map(String::as_str)
                .chain(discovered.iter().filter(|d| !d.node.is_folder()).map(|d| d.path.as_str())),
        )
        .await?;
        let failed_paths: Vec<String> = failed_folders.iter().map(|f| f.path.clone()).collect();
        let plan = planner::plan(
            &discovered,
            &failed_paths,
            store.manifest(),
            &local,
            &PlanOptions {
                force: self.options.force,
                skip_files: self.options.skip_files,
                filter,
            },
        );
        info!(
            create = plan.count(PlanAction::Create),
            update = plan.count(PlanAction::Update),
            skip = plan.count(PlanAction::Skip),
            conflict = plan.count(PlanAction::Conflict),
            orphaned = plan.orphaned.len(),
            filtered = plan.filtered,
            "Plan ready"
        );

        // Phase 4: Download
        debug!("Phase 4: Downloading");
        let store = Arc::new(Mutex::new(store));
        let engine = DownloadEngine::new(
            Arc::clone(&self.source),
            self.options.output.clone(),
            Arc::clone(&store),
            EngineOptions {
                jobs: self.options.jobs,
                retry: self.options.retry.clone(),
                delete_orphans: self.options.delete_orphans,
                commit_every: self.options.commit_every,
            },
            self.cancel.clone(),
        );
        let mut report = engine.execute(plan).await?;

        // Phase 5: Remember which entries lost their remote object
        let mut store = store.lock().await;
        store.mark_orphaned(report.paths_with(ItemOutcome::Orphaned), Utc::now());
        store.commit().await?;

        report.failed_folders = failed_folders;
        report.finish();
        info!(
            summary = %report.summary(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Sync finished"
        );
        Ok(report)
    }
}
