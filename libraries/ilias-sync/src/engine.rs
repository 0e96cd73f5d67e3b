//! Executes a [`SyncPlan`] against the local directory.
//!
//! Files are streamed into a temporary file next to their destination,
//! hashed on the way, checked against the announced length, fsynced and only
//! then renamed into place. The temporary file is deleted when a download
//! fails or is cancelled, so a destination path only ever holds a complete
//! file. The manifest entry is recorded after the rename.

use crate::error::{DownloadError, SyncError};
use crate::manifest::{LocalFileState, LocalStamp, ManifestEntry, ManifestStore};
use crate::paths;
use crate::planner::{PlanAction, PlannedItem, SyncPlan};
use crate::report::{ItemOutcome, ItemReport, SyncReport};
use chrono::Utc;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use ilias_client::{retry_if, RetryConfig};
use ilias_core::{AuthError, RemoteContent, RemoteId, RemoteSource};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Concurrent downloads
    pub jobs: usize,
    pub retry: RetryConfig,
    /// Remove orphaned files from disk and manifest
    pub delete_orphans: bool,
    /// Commit the manifest after this many recorded changes
    pub commit_every: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            retry: RetryConfig::request(),
            delete_orphans: false,
            commit_every: 25,
        }
    }
}

pub struct DownloadEngine<S> {
    source: Arc<S>,
    root: PathBuf,
    manifest: Arc<Mutex<ManifestStore>>,
    options: EngineOptions,
    cancel: CancellationToken,
}

impl<S: RemoteSource> DownloadEngine<S> {
    pub fn new(
        source: Arc<S>,
        root: impl Into<PathBuf>,
        manifest: Arc<Mutex<ManifestStore>>,
        options: EngineOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            root: root.into(),
            manifest,
            options,
            cancel,
        }
    }

    /// Run `plan`, returning one report entry per planned file and orphan.
    ///
    /// Individual download failures are reported, not returned. Manifest
    /// persistence and directory creation errors end the run, and so does a
    /// rejected login: the remaining downloads are abandoned and the manifest
    /// keeps what was already written.
    pub async fn execute(&self, plan: SyncPlan) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new();

        for folder in &plan.folders {
            tokio::fs::create_dir_all(paths::to_fs(&self.root, folder)).await?;
        }

        let mut seen: HashSet<RemoteId> = HashSet::new();
        let mut downloads = Vec::new();
        for item in plan.items {
            let report_item = |outcome| {
                ItemReport::new(item.path.clone(), Some(item.node.remote_id.clone()), outcome)
            };
            match item.action {
                PlanAction::Skip => report.push(report_item(ItemOutcome::Skipped)),
                PlanAction::Conflict => {
                    let reason = item
                        .conflict
                        .as_ref()
                        .map_or_else(|| "conflict".to_string(), ToString::to_string);
                    warn!(path = %item.path, reason = %reason, "Conflict, leaving local file alone");
                    report.push(report_item(ItemOutcome::Conflict).with_detail(reason));
                }
                PlanAction::Create | PlanAction::Update => {
                    if seen.insert(item.node.remote_id.clone()) {
                        downloads.push(item);
                    } else {
                        report.push(report_item(ItemOutcome::Skipped).with_detail("duplicate"));
                    }
                }
            }
        }

        // Destinations of this run; a moved file leaves these to their new owner
        let claimed: HashSet<String> = downloads.iter().map(|item| item.path.clone()).collect();

        info!(downloads = downloads.len(), jobs = self.options.jobs, "Downloading");
        // The first error drops the in-flight downloads, which removes their
        // temporary files
        let results: Result<Vec<ItemReport>, SyncError> = stream::iter(downloads)
            .map(|item| self.run_item(item, &claimed))
            .buffer_unordered(self.options.jobs.max(1))
            .try_collect()
            .await;
        let results = match results {
            Ok(results) => results,
            Err(error) => {
                if let Err(commit_error) = self.manifest.lock().await.commit().await {
                    warn!(error = %commit_error, "Failed to save manifest after abort");
                }
                return Err(error);
            }
        };
        for result in results {
            report.push(result);
        }

        for entry in plan.orphaned {
            let item = self.handle_orphan(entry).await;
            report.push(item);
        }

        self.manifest.lock().await.commit().await?;
        report.cancelled = self.cancel.is_cancelled();
        report.finish();
        Ok(report)
    }

    #[instrument(skip(self, item, claimed), fields(path = %item.path, id = %item.node.remote_id))]
    async fn run_item(&self, item: PlannedItem, claimed: &HashSet<String>) -> Result<ItemReport, SyncError> {
        let id = Some(item.node.remote_id.clone());
        if self.cancel.is_cancelled() {
            return Ok(ItemReport::new(item.path, id, ItemOutcome::Failed).with_detail("cancelled"));
        }

        let downloaded = retry_if(
            "download",
            &self.options.retry,
            DownloadError::is_transient,
            || self.download(&item),
        )
        .await;

        match downloaded {
            Ok(stamp) => {
                let outcome = if item.action == PlanAction::Create {
                    ItemOutcome::Created
                } else {
                    ItemOutcome::Updated
                };
                info!(size = stamp.size, "Downloaded");
                self.record(&item, stamp, claimed).await?;
                Ok(ItemReport::new(item.path, id, outcome))
            }
            Err(error) if error.is_invalid_credentials() => {
                error!("Login rejected, aborting remaining downloads");
                Err(SyncError::Auth(AuthError::InvalidCredentials))
            }
            Err(error) => {
                warn!(error = %error, "Download failed");
                Ok(ItemReport::new(item.path, id, ItemOutcome::Failed).with_detail(error.to_string()))
            }
        }
    }

    /// Fetch one file into place.
    async fn download(&self, item: &PlannedItem) -> Result<LocalStamp, DownloadError> {
        let destination = paths::to_fs(&self.root, &item.path);
        let dir = destination
            .parent()
            .map_or_else(|| self.root.clone(), Path::to_path_buf);
        tokio::fs::create_dir_all(&dir).await?;

        let content = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            content = self.source.open_file(&item.node) => content?,
        };
        let RemoteContent {
            content_length,
            mut body,
        } = content;

        // Dropping `temp_path` deletes the partial file
        let (file, temp_path) = tempfile::Builder::new()
            .prefix(paths::RESERVED_PREFIX)
            .suffix(".part")
            .tempfile_in(&dir)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut hasher = Sha256::new();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                chunk = body.try_next() => chunk?,
            };
            let Some(chunk) = chunk else { break };
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        if let Some(expected) = content_length {
            if expected != written {
                return Err(DownloadError::SizeMismatch {
                    expected,
                    actual: written,
                });
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        temp_path.persist(&destination).map_err(|e| e.error)?;
        let state = LocalFileState::from_metadata(&tokio::fs::metadata(&destination).await?);
        debug!(bytes = written, "File persisted");

        Ok(LocalStamp {
            size: written,
            sha256: hex::encode(hasher.finalize()),
            mtime: state.mtime,
        })
    }

    async fn record(
        &self,
        item: &PlannedItem,
        stamp: LocalStamp,
        claimed: &HashSet<String>,
    ) -> Result<(), SyncError> {
        let fingerprint = item
            .node
            .file_meta()
            .map(|meta| meta.fingerprint())
            .unwrap_or_default();
        let mut store = self.manifest.lock().await;

        if let Some(old) = item.moved_from() {
            // Only drop the old entry if nobody else took over that path
            let still_ours = store
                .manifest()
                .get(old)
                .is_some_and(|e| e.remote_id == item.node.remote_id);
            if still_ours {
                if let Some(entry) = store.remove(old) {
                    if claimed.contains(old) {
                        debug!(old, "Old path now belongs to another file");
                    } else {
                        remove_if_unmodified(&self.root, &entry).await;
                    }
                }
            }
        }

        store.record(ManifestEntry {
            relative_path: item.path.clone(),
            remote_id: item.node.remote_id.clone(),
            fingerprint,
            local: stamp,
            last_synced_at: Utc::now(),
            orphaned_since: None,
        });

        if store.pending() >= self.options.commit_every.max(1) {
            store.commit().await?;
        }
        Ok(())
    }

    async fn handle_orphan(&self, entry: ManifestEntry) -> ItemReport {
        let report = ItemReport::new(
            entry.relative_path.clone(),
            Some(entry.remote_id.clone()),
            ItemOutcome::Orphaned,
        );
        if !self.options.delete_orphans {
            info!(path = %entry.relative_path, "Remote object gone, keeping local file");
            return report;
        }

        if remove_if_unmodified(&self.root, &entry).await {
            self.manifest.lock().await.remove(&entry.relative_path);
            info!(path = %entry.relative_path, "Deleted orphaned file");
            ItemReport {
                outcome: ItemOutcome::Deleted,
                ..report
            }
        } else {
            report.with_detail("local file modified or unreadable, kept")
        }
    }
}

/// Delete the file of `entry` if it is still what the mirror wrote.
///
/// Returns whether the file is gone afterwards.
async fn remove_if_unmodified(root: &Path, entry: &ManifestEntry) -> bool {
    let path = paths::to_fs(root, &entry.relative_path);
    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot inspect file");
            return false;
        }
    };
    if !entry.local.matches(&LocalFileState::from_metadata(&meta)) {
        warn!(path = %path.display(), "File changed locally, not deleting");
        return false;
    }
    match tokio::fs::remove_file(&path).await {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete file");
            false
        }
    }
}
