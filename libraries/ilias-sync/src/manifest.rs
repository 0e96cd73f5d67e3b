//! Persistent record of what the mirror wrote.
//!
//! The manifest lives next to the mirrored files as `.ilias-manifest.json`
//! and maps each relative path to the remote object it came from. It is only
//! ever replaced atomically (write to a temp file, fsync, rename).

use crate::error::ManifestError;
use chrono::{DateTime, Utc};
use ilias_core::{RemoteFingerprint, RemoteId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = ".ilias-manifest.json";
const MANIFEST_VERSION: u32 = 1;

/// On-disk manifest contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    /// URL of the subtree this directory mirrors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_root: Option<String>,
    /// Keyed by relative path
    #[serde(default)]
    pub entries: BTreeMap<String, ManifestEntry>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            sync_root: None,
            entries: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// First entry (in path order) recorded for `remote_id`
    pub fn find_by_remote_id(&self, remote_id: &RemoteId) -> Option<&ManifestEntry> {
        self.entries.values().find(|e| &e.remote_id == remote_id)
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One mirrored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub remote_id: RemoteId,
    /// Remote hints at the time of the last download
    pub fingerprint: RemoteFingerprint,
    /// What was written to disk
    pub local: LocalStamp,
    pub last_synced_at: DateTime<Utc>,
    /// Set while the remote object can no longer be found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_since: Option<DateTime<Utc>>,
}

/// Size, hash and modification time of a written file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStamp {
    pub size: u64,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,
}

/// What is on disk right now at a manifest path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalFileState {
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
}

impl LocalFileState {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            size: meta.len(),
            mtime: meta.modified().ok().map(to_utc),
        }
    }
}

impl LocalStamp {
    /// Whether the file on disk is still the one the mirror wrote.
    ///
    /// Hashing every file on every run is too slow, so size and mtime stand
    /// in for the content hash.
    pub fn matches(&self, state: &LocalFileState) -> bool {
        self.size == state.size && (self.mtime.is_none() || self.mtime == state.mtime)
    }
}

pub(crate) fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Loaded manifest plus the bookkeeping needed to persist it.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    manifest: Manifest,
    dirty: bool,
    pending: usize,
}

impl ManifestStore {
    /// Load the manifest of `root`, or start an empty one if there is none.
    pub async fn load(root: &Path) -> Result<Self, ManifestError> {
        let path = root.join(MANIFEST_FILE);
        let manifest = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let manifest: Manifest =
                    serde_json::from_slice(&bytes).map_err(|source| ManifestError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                if manifest.version > MANIFEST_VERSION {
                    return Err(ManifestError::UnsupportedVersion {
                        path,
                        version: manifest.version,
                    });
                }
                info!(path = %path.display(), entries = manifest.entries.len(), "Loaded manifest");
                manifest
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No manifest yet, starting empty");
                Manifest::default()
            }
            Err(source) => return Err(ManifestError::Io { path, source }),
        };

        Ok(Self {
            path,
            manifest,
            dirty: false,
            pending: 0,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remember the sync root; a different root than last time is allowed
    /// but logged.
    pub fn set_sync_root(&mut self, root: &str) {
        match self.manifest.sync_root.as_deref() {
            Some(previous) if previous == root => return,
            Some(previous) => {
                warn!(previous, current = root, "Sync root changed since the last run");
            }
            None => {}
        }
        self.manifest.sync_root = Some(root.to_string());
        self.dirty = true;
    }

    /// Insert or replace the entry at `entry.relative_path`.
    pub fn record(&mut self, entry: ManifestEntry) {
        debug!(path = %entry.relative_path, id = %entry.remote_id, "Recording manifest entry");
        self.manifest
            .entries
            .insert(entry.relative_path.clone(), entry);
        self.dirty = true;
        self.pending += 1;
    }

    pub fn remove(&mut self, path: &str) -> Option<ManifestEntry> {
        let removed = self.manifest.entries.remove(path);
        if removed.is_some() {
            self.dirty = true;
            self.pending += 1;
        }
        removed
    }

    /// Stamp `paths` as orphaned (keeping an earlier stamp) and clear the
    /// marker from every entry not listed.
    pub fn mark_orphaned<'a>(&mut self, paths: impl IntoIterator<Item = &'a str>, now: DateTime<Utc>) {
        let orphaned: std::collections::HashSet<&str> = paths.into_iter().collect();
        for (path, entry) in &mut self.manifest.entries {
            let is_orphan = orphaned.contains(path.as_str());
            match (is_orphan, entry.orphaned_since) {
                (true, None) => {
                    entry.orphaned_since = Some(now);
                    self.dirty = true;
                }
                (false, Some(_)) => {
                    entry.orphaned_since = None;
                    self.dirty = true;
                }
                _ => {}
            }
        }
    }

    /// Changes recorded since the last commit
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Persist the manifest if anything changed.
    ///
    /// A failed write is retried once before giving up.
    pub async fn commit(&mut self) -> Result<(), ManifestError> {
        if !self.dirty {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&self.manifest)?;

        if let Err(first) = self.write(bytes.clone()).await {
            warn!(error = %first, "Manifest commit failed, retrying once");
            self.write(bytes).await?;
        }

        debug!(path = %self.path.display(), entries = self.manifest.entries.len(), "Manifest committed");
        self.dirty = false;
        self.pending = 0;
        Ok(())
    }

    async fn write(&self, bytes: Vec<u8>) -> Result<(), ManifestError> {
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))
            .and_then(|r| r);
        result.map_err(|source| ManifestError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".ilias-manifest")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
