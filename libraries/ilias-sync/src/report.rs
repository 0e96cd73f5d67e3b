use chrono::{DateTime, Utc};
use ilias_core::RemoteId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// What happened to one path during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Created,
    Updated,
    Skipped,
    Failed,
    Conflict,
    Orphaned,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<RemoteId>,
    pub outcome: ItemOutcome,
    /// Error or conflict description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ItemReport {
    pub fn new(path: impl Into<String>, remote_id: Option<RemoteId>, outcome: ItemOutcome) -> Self {
        Self {
            path: path.into(),
            remote_id,
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl ItemOutcome {
    /// Outcomes the user is told about individually
    pub fn is_notable(self) -> bool {
        matches!(self, Self::Failed | Self::Conflict | Self::Orphaned | Self::Deleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
            Self::Orphaned => "orphaned",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ItemReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.outcome.as_str(), self.path)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub conflicts: usize,
    pub orphaned: usize,
    pub deleted: usize,
    pub failed_folders: usize,
}

/// Result of one sync run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    /// One entry per file, in path order
    pub items: Vec<ItemReport>,
    /// Folders whose listing failed; their subtrees were not synced
    pub failed_folders: Vec<ItemReport>,
}

impl SyncReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            cancelled: false,
            items: Vec::new(),
            failed_folders: Vec::new(),
        }
    }

    pub fn push(&mut self, item: ItemReport) {
        self.items.push(item);
    }

    pub fn finish(&mut self) {
        self.items.sort_by(|a, b| a.path.cmp(&b.path));
        self.failed_folders.sort_by(|a, b| a.path.cmp(&b.path));
        self.completed_at = Some(Utc::now());
    }

    pub fn summary(&self) -> SyncSummary {
        let mut summary = SyncSummary {
            failed_folders: self.failed_folders.len(),
            ..Default::default()
        };
        for item in &self.items {
            match item.outcome {
                ItemOutcome::Created => summary.created += 1,
                ItemOutcome::Updated => summary.updated += 1,
                ItemOutcome::Skipped => summary.skipped += 1,
                ItemOutcome::Failed => summary.failed += 1,
                ItemOutcome::Conflict => summary.conflicts += 1,
                ItemOutcome::Orphaned => summary.orphaned += 1,
                ItemOutcome::Deleted => summary.deleted += 1,
            }
        }
        summary
    }

    pub fn outcome_of(&self, path: &str) -> Option<ItemOutcome> {
        self.items.iter().find(|i| i.path == path).map(|i| i.outcome)
    }

    /// Paths with the given outcome
    pub fn paths_with(&self, outcome: ItemOutcome) -> Vec<&str> {
        self.items
            .iter()
            .filter(|i| i.outcome == outcome)
            .map(|i| i.path.as_str())
            .collect()
    }

    /// Failed, conflicting, orphaned and deleted items, with or without detail
    pub fn notable_items(&self) -> impl Iterator<Item = &ItemReport> {
        self.items.iter().filter(|i| i.outcome.is_notable())
    }

    /// Whether anything needs the user's attention
    pub fn has_problems(&self) -> bool {
        self.cancelled
            || !self.failed_folders.is_empty()
            || self
                .items
                .iter()
                .any(|i| matches!(i.outcome, ItemOutcome::Failed | ItemOutcome::Conflict))
    }

    /// Write the report as pretty JSON.
    pub async fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        tokio::fs::write(path, json).await
    }
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} skipped, {} failed, {} conflicts, {} orphaned, {} deleted",
            self.created,
            self.updated,
            self.skipped,
            self.failed,
            self.conflicts,
            self.orphaned,
            self.deleted
        )?;
        if self.failed_folders > 0 {
            write!(f, ", {} folders unreachable", self.failed_folders)?;
        }
        Ok(())
    }
}
