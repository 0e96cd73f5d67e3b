//! Decide what to do with every discovered file.
//!
//! [`plan`] is pure: the crawl result, the manifest and a snapshot of the
//! relevant local files go in, an ordered [`SyncPlan`] comes out. Running it
//! twice on the same inputs gives the same plan.

use crate::crawler::DiscoveredNode;
use crate::manifest::{LocalFileState, Manifest, ManifestEntry};
use crate::paths;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ilias_core::{RemoteId, RemoteNode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    Skip,
    Conflict,
}

/// Why a file was left alone instead of being overwritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// Changed remotely and edited locally since the last sync
    LocallyModified,
    /// The target path belongs to another remote object that still exists
    PathOwnedBy(RemoteId),
    /// A file the mirror did not write is in the way
    Untracked,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocallyModified => write!(f, "modified locally and remotely"),
            Self::PathOwnedBy(id) => write!(f, "path already used by remote object {}", id),
            Self::Untracked => write!(f, "untracked local file in the way"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedItem {
    pub action: PlanAction,
    pub node: RemoteNode,
    /// Target path
    pub path: String,
    /// The manifest entry this item was matched with, if any
    pub entry: Option<ManifestEntry>,
    pub conflict: Option<ConflictReason>,
}

impl PlannedItem {
    /// Whether the file has to be fetched
    pub fn needs_download(&self) -> bool {
        matches!(self.action, PlanAction::Create | PlanAction::Update)
    }

    /// Previous location when the remote object moved
    pub fn moved_from(&self) -> Option<&str> {
        self.entry
            .as_ref()
            .map(|e| e.relative_path.as_str())
            .filter(|old| *old != self.path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Directories to create, parents before children
    pub folders: Vec<String>,
    /// File actions in path order
    pub items: Vec<PlannedItem>,
    /// Manifest entries whose remote object is gone
    pub orphaned: Vec<ManifestEntry>,
    /// Files dropped by include/exclude filters
    pub filtered: usize,
}

impl SyncPlan {
    pub fn count(&self, action: PlanAction) -> usize {
        self.items.iter().filter(|i| i.action == action).count()
    }
}

/// Include/exclude globs over relative paths.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, globset::Error> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    pub fn allows(&self, path: &str) -> bool {
        let included = self.include.as_ref().map_or(true, |set| set.is_match(path));
        let excluded = self.exclude.as_ref().is_some_and(|set| set.is_match(path));
        included && !excluded
    }
}

fn build_set(patterns: &[String]) -> Result<Option<GlobSet>, globset::Error> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build().map(Some)
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Re-download everything that already exists
    pub force: bool,
    /// Only create folders
    pub skip_files: bool,
    pub filter: PathFilter,
}

/// Local files relevant to a plan, keyed by relative path.
#[derive(Debug, Clone, Default)]
pub struct LocalSnapshot {
    files: HashMap<String, LocalFileState>,
}

impl LocalSnapshot {
    /// Stat `paths` below `root`; paths that are not regular files are left out.
    pub async fn capture<'a>(
        root: &Path,
        relative_paths: impl IntoIterator<Item = &'a str>,
    ) -> std::io::Result<Self> {
        let mut files = HashMap::new();
        for path in relative_paths {
            match tokio::fs::metadata(paths::to_fs(root, path)).await {
                Ok(meta) if meta.is_file() => {
                    files.insert(path.to_string(), LocalFileState::from_metadata(&meta));
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Self { files })
    }

    pub fn insert(&mut self, path: impl Into<String>, state: LocalFileState) {
        self.files.insert(path.into(), state);
    }

    pub fn get(&self, path: &str) -> Option<&LocalFileState> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}

/// Build the plan for one run.
///
/// `failed_folders` are paths whose listing failed; manifest entries below
/// them are neither planned nor reported as orphaned.
///
/// A path still owned by a live object can be claimed only when that object
/// moves away in the same plan. Moves are assumed to happen and the
/// assumption is withdrawn for every object whose own move turns out to be
/// blocked, until nothing changes. Two objects that swap paths therefore
/// both move.
pub fn plan(
    discovered: &[DiscoveredNode],
    failed_folders: &[String],
    manifest: &Manifest,
    local: &LocalSnapshot,
    options: &PlanOptions,
) -> SyncPlan {
    let mut live_paths: HashMap<&RemoteId, &str> = HashMap::new();
    for found in discovered {
        live_paths
            .entry(&found.node.remote_id)
            .or_insert(found.path.as_str());
    }
    let mut moving: HashSet<&RemoteId> = manifest
        .entries
        .values()
        .filter(|e| {
            live_paths
                .get(&e.remote_id)
                .is_some_and(|path| *path != e.relative_path)
        })
        .map(|e| &e.remote_id)
        .collect();

    loop {
        let plan = plan_assuming(discovered, failed_folders, manifest, local, options, &moving);
        let downloading: HashSet<&RemoteId> = plan
            .items
            .iter()
            .filter(|i| i.needs_download())
            .map(|i| &i.node.remote_id)
            .collect();
        let before = moving.len();
        moving.retain(|id| downloading.contains(id));
        if moving.len() == before {
            return plan;
        }
    }
}

/// One planning pass, treating the objects in `moving` as leaving their
/// recorded paths.
fn plan_assuming(
    discovered: &[DiscoveredNode],
    failed_folders: &[String],
    manifest: &Manifest,
    local: &LocalSnapshot,
    options: &PlanOptions,
    moving: &HashSet<&RemoteId>,
) -> SyncPlan {
    let mut by_id: HashMap<&RemoteId, &ManifestEntry> = HashMap::new();
    for entry in manifest.entries.values() {
        by_id.entry(&entry.remote_id).or_insert(entry);
    }
    let live: HashSet<&RemoteId> = discovered.iter().map(|d| &d.node.remote_id).collect();

    let mut plan = SyncPlan::default();
    let mut folders = BTreeSet::new();
    let mut seen: HashSet<&RemoteId> = HashSet::new();
    let mut replaced_paths: HashSet<&str> = HashSet::new();

    for found in discovered {
        if !seen.insert(&found.node.remote_id) {
            continue;
        }
        let Some(meta) = found.node.file_meta() else {
            folders.insert(found.path.clone());
            continue;
        };
        if options.skip_files {
            continue;
        }
        if !options.filter.allows(&found.path) {
            plan.filtered += 1;
            continue;
        }

        let fingerprint = meta.fingerprint();
        let previous = by_id.get(&found.node.remote_id).copied();
        let occupant = manifest
            .get(&found.path)
            .filter(|e| e.remote_id != found.node.remote_id);
        let owner = occupant.filter(|o| live.contains(&o.remote_id) && !moving.contains(&o.remote_id));
        // The file of the object that used to live here was edited
        let occupant_edited = occupant.is_some_and(|o| {
            local
                .get(&found.path)
                .is_some_and(|state| !o.local.matches(state))
        });

        let (action, conflict) = if let Some(owner) = owner {
            (
                PlanAction::Conflict,
                Some(ConflictReason::PathOwnedBy(owner.remote_id.clone())),
            )
        } else if occupant_edited && !options.force {
            (PlanAction::Conflict, Some(ConflictReason::LocallyModified))
        } else {
            match previous {
                None => {
                    if occupant.is_none() && local.contains(&found.path) && !options.force {
                        (PlanAction::Conflict, Some(ConflictReason::Untracked))
                    } else {
                        (PlanAction::Create, None)
                    }
                }
                Some(entry) => {
                    let remote_changed = entry.fingerprint != fingerprint;
                    let moved = entry.relative_path != found.path;
                    if moved && occupant.is_none() && local.contains(&found.path) && !options.force {
                        // Moved onto a file the mirror never wrote
                        (PlanAction::Conflict, Some(ConflictReason::Untracked))
                    } else {
                        match local.get(&entry.relative_path) {
                            None => (PlanAction::Create, None),
                            Some(state) if remote_changed && !entry.local.matches(state) && !options.force => {
                                (PlanAction::Conflict, Some(ConflictReason::LocallyModified))
                            }
                            Some(_) if options.force || remote_changed || moved => (PlanAction::Update, None),
                            Some(_) => (PlanAction::Skip, None),
                        }
                    }
                }
            }
        };

        if matches!(action, PlanAction::Create | PlanAction::Update) && occupant.is_some() {
            // A gone object's file is replaced by the one now living there
            replaced_paths.insert(found.path.as_str());
        }

        plan.items.push(PlannedItem {
            action,
            node: found.node.clone(),
            path: found.path.clone(),
            entry: previous.cloned(),
            conflict,
        });
    }

    for entry in manifest.entries.values() {
        if live.contains(&entry.remote_id) || replaced_paths.contains(entry.relative_path.as_str()) {
            continue;
        }
        if failed_folders
            .iter()
            .any(|failed| paths::is_within(&entry.relative_path, failed))
        {
            continue;
        }
        plan.orphaned.push(entry.clone());
    }

    // Parents sort before their children
    plan.folders = folders.into_iter().collect();
    plan.items.sort_by(|a, b| a.path.cmp(&b.path));
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::LocalStamp;
    use chrono::Utc;
    use ilias_core::FileMeta;

    fn file(id: &str, path: &str, size: u64) -> DiscoveredNode {
        DiscoveredNode {
            node: RemoteNode::file(
                RemoteId::new(id),
                path.rsplit('/').next().unwrap_or(path),
                FileMeta::new(format!("https://x/{}", id)).with_size(size),
            ),
            path: path.to_string(),
            depth: path.matches('/').count() + 1,
        }
    }

    fn folder(id: &str, path: &str) -> DiscoveredNode {
        DiscoveredNode {
            node: RemoteNode::folder(RemoteId::new(id), path, format!("https://x/{}", id)),
            path: path.to_string(),
            depth: path.matches('/').count() + 1,
        }
    }

    fn entry_for(found: &DiscoveredNode) -> ManifestEntry {
        let size = found.node.file_meta().unwrap().size_hint.unwrap();
        ManifestEntry {
            relative_path: found.path.clone(),
            remote_id: found.node.remote_id.clone(),
            fingerprint: found.node.file_meta().unwrap().fingerprint(),
            local: LocalStamp {
                size,
                sha256: String::new(),
                mtime: None,
            },
            last_synced_at: Utc::now(),
            orphaned_since: None,
        }
    }

    fn synced(found: &[DiscoveredNode]) -> (Manifest, LocalSnapshot) {
        let mut manifest = Manifest::default();
        let mut local = LocalSnapshot::default();
        for f in found.iter().filter(|f| !f.node.is_folder()) {
            let entry = entry_for(f);
            local.insert(
                f.path.clone(),
                LocalFileState {
                    size: entry.local.size,
                    mtime: None,
                },
            );
            manifest.entries.insert(f.path.clone(), entry);
        }
        (manifest, local)
    }

    fn actions(plan: &SyncPlan) -> Vec<(&str, PlanAction)> {
        plan.items.iter().map(|i| (i.path.as_str(), i.action)).collect()
    }

    #[test]
    fn test_fresh_tree_creates_everything() {
        let found = vec![file("1", "A.txt", 1), folder("2", "sub"), file("3", "sub/B.txt", 2)];
        let plan = plan(&found, &[], &Manifest::default(), &LocalSnapshot::default(), &PlanOptions::default());

        assert_eq!(plan.folders, vec!["sub".to_string()]);
        assert_eq!(
            actions(&plan),
            vec![("A.txt", PlanAction::Create), ("sub/B.txt", PlanAction::Create)]
        );
        assert!(plan.orphaned.is_empty());
    }

    #[test]
    fn test_unchanged_tree_skips_everything() {
        let found = vec![file("1", "A.txt", 1), folder("2", "sub"), file("3", "sub/B.txt", 2)];
        let (manifest, local) = synced(&found);
        let plan = plan(&found, &[], &manifest, &local, &PlanOptions::default());

        assert_eq!(plan.count(PlanAction::Skip), 2);
        assert_eq!(plan.count(PlanAction::Create), 0);
    }

    #[test]
    fn test_changed_fingerprint_updates() {
        let before = vec![file("1", "A.txt", 1)];
        let (manifest, local) = synced(&before);
        let after = vec![file("1", "A.txt", 5)];

        let plan = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(actions(&plan), vec![("A.txt", PlanAction::Update)]);
    }

    #[test]
    fn test_moved_file_updates_at_new_path() {
        let before = vec![file("1", "old/A.txt", 1)];
        let (manifest, local) = synced(&before);
        let after = vec![file("1", "new/A.txt", 1)];

        let plan = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(actions(&plan), vec![("new/A.txt", PlanAction::Update)]);
        assert_eq!(plan.items[0].moved_from(), Some("old/A.txt"));
        assert!(plan.orphaned.is_empty());
    }

    #[test]
    fn test_missing_local_file_is_recreated() {
        let found = vec![file("1", "A.txt", 1)];
        let (manifest, _) = synced(&found);

        let plan = plan(&found, &[], &manifest, &LocalSnapshot::default(), &PlanOptions::default());
        assert_eq!(actions(&plan), vec![("A.txt", PlanAction::Create)]);
    }

    #[test]
    fn test_local_edit_with_remote_change_conflicts() {
        let before = vec![file("1", "A.txt", 1)];
        let (manifest, mut local) = synced(&before);
        local.insert("A.txt", LocalFileState { size: 99, mtime: None });

        // Local edit alone is left alone
        let plan_same = plan(&before, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(actions(&plan_same), vec![("A.txt", PlanAction::Skip)]);

        let after = vec![file("1", "A.txt", 2)];
        let conflicted = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(actions(&conflicted), vec![("A.txt", PlanAction::Conflict)]);
        assert_eq!(conflicted.items[0].conflict, Some(ConflictReason::LocallyModified));

        let forced = plan(
            &after,
            &[],
            &manifest,
            &local,
            &PlanOptions {
                force: true,
                ..Default::default()
            },
        );
        assert_eq!(actions(&forced), vec![("A.txt", PlanAction::Update)]);
    }

    #[test]
    fn test_path_owned_by_object_that_cannot_move_conflicts() {
        let before = vec![file("1", "A.txt", 1)];
        let (manifest, mut local) = synced(&before);
        // Object 1 moves, but its new path holds a file the mirror never wrote
        local.insert("moved/A.txt", LocalFileState { size: 4, mtime: None });
        let after = vec![file("1", "moved/A.txt", 1), file("2", "A.txt", 1)];

        let plan = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        let blocked = plan.items.iter().find(|i| i.path == "moved/A.txt").unwrap();
        assert_eq!(blocked.conflict, Some(ConflictReason::Untracked));
        let conflict = plan.items.iter().find(|i| i.path == "A.txt").unwrap();
        assert_eq!(conflict.action, PlanAction::Conflict);
        assert_eq!(conflict.conflict, Some(ConflictReason::PathOwnedBy(RemoteId::new("1"))));
    }

    #[test]
    fn test_path_freed_by_moving_object_can_be_claimed() {
        let before = vec![file("1", "A.txt", 1)];
        let (manifest, local) = synced(&before);
        let after = vec![file("1", "moved/A.txt", 1), file("2", "A.txt", 1)];

        let plan = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(
            actions(&plan),
            vec![("A.txt", PlanAction::Create), ("moved/A.txt", PlanAction::Update)]
        );
        assert!(plan.orphaned.is_empty());
    }

    #[test]
    fn test_swapped_files_both_move() {
        let before = vec![file("1", "A.txt", 1), file("2", "B.txt", 2)];
        let (manifest, local) = synced(&before);
        let after = vec![file("2", "A.txt", 2), file("1", "B.txt", 1)];

        let plan = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(
            actions(&plan),
            vec![("A.txt", PlanAction::Update), ("B.txt", PlanAction::Update)]
        );
        assert_eq!(plan.items[0].moved_from(), Some("B.txt"));
        assert_eq!(plan.items[1].moved_from(), Some("A.txt"));
    }

    #[test]
    fn test_move_onto_untracked_file_conflicts() {
        let before = vec![file("1", "A.txt", 1)];
        let (manifest, mut local) = synced(&before);
        local.insert("sub/A.txt", LocalFileState { size: 12, mtime: None });
        let after = vec![folder("2", "sub"), file("1", "sub/A.txt", 1)];

        let conflicted = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(actions(&conflicted), vec![("sub/A.txt", PlanAction::Conflict)]);
        assert_eq!(conflicted.items[0].conflict, Some(ConflictReason::Untracked));
        assert!(conflicted.orphaned.is_empty());

        let forced = plan(
            &after,
            &[],
            &manifest,
            &local,
            &PlanOptions {
                force: true,
                ..Default::default()
            },
        );
        assert_eq!(actions(&forced), vec![("sub/A.txt", PlanAction::Update)]);
    }

    #[test]
    fn test_edited_file_of_gone_object_is_not_replaced() {
        let before = vec![file("1", "A.txt", 1)];
        let (manifest, mut local) = synced(&before);
        local.insert("A.txt", LocalFileState { size: 99, mtime: None });
        let after = vec![file("2", "A.txt", 3)];

        let plan = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(plan.items[0].conflict, Some(ConflictReason::LocallyModified));
        assert_eq!(plan.orphaned.len(), 1);
    }

    #[test]
    fn test_replacement_of_gone_object_is_not_orphaned() {
        let before = vec![file("1", "A.txt", 1)];
        let (manifest, local) = synced(&before);
        let after = vec![file("2", "A.txt", 3)];

        let plan = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(actions(&plan), vec![("A.txt", PlanAction::Create)]);
        assert!(plan.orphaned.is_empty());
    }

    #[test]
    fn test_untracked_local_file_conflicts() {
        let found = vec![file("1", "A.txt", 1)];
        let mut local = LocalSnapshot::default();
        local.insert("A.txt", LocalFileState { size: 7, mtime: None });

        let plan = plan(&found, &[], &Manifest::default(), &local, &PlanOptions::default());
        assert_eq!(plan.items[0].conflict, Some(ConflictReason::Untracked));
    }

    #[test]
    fn test_removed_remote_is_orphaned_unless_under_failed_folder() {
        let before = vec![file("1", "A.txt", 1), file("3", "sub/B.txt", 2)];
        let (manifest, local) = synced(&before);
        let after = vec![file("1", "A.txt", 1)];

        let orphaned = plan(&after, &[], &manifest, &local, &PlanOptions::default());
        assert_eq!(orphaned.orphaned.len(), 1);
        assert_eq!(orphaned.orphaned[0].relative_path, "sub/B.txt");

        let failed = plan(&after, &["sub".to_string()], &manifest, &local, &PlanOptions::default());
        assert!(failed.orphaned.is_empty());
    }

    #[test]
    fn test_filters_and_skip_files() {
        let found = vec![file("1", "A.txt", 1), file("2", "B.pdf", 1), folder("3", "sub")];
        let options = PlanOptions {
            filter: PathFilter::new(&["*.pdf".to_string()], &[]).unwrap(),
            ..Default::default()
        };
        let filtered = plan(&found, &[], &Manifest::default(), &LocalSnapshot::default(), &options);
        assert_eq!(actions(&filtered), vec![("B.pdf", PlanAction::Create)]);
        assert_eq!(filtered.filtered, 1);

        let skip = PlanOptions {
            skip_files: true,
            ..Default::default()
        };
        let folders_only = plan(&found, &[], &Manifest::default(), &LocalSnapshot::default(), &skip);
        assert!(folders_only.items.is_empty());
        assert_eq!(folders_only.folders, vec!["sub".to_string()]);
    }

    #[test]
    fn test_filtered_files_are_still_live() {
        let before = vec![file("1", "A.txt", 1)];
        let (manifest, local) = synced(&before);
        let options = PlanOptions {
            filter: PathFilter::new(&[], &["*.txt".to_string()]).unwrap(),
            ..Default::default()
        };
        let plan = plan(&before, &[], &manifest, &local, &options);
        assert!(plan.items.is_empty());
        assert!(plan.orphaned.is_empty());
    }

    #[test]
    fn test_plan_is_deterministic() {
        let found = vec![file("3", "c.txt", 1), file("1", "a.txt", 1), file("2", "b.txt", 1)];
        let mut reversed = found.clone();
        reversed.reverse();
        let options = PlanOptions::default();
        let a = plan(&found, &[], &Manifest::default(), &LocalSnapshot::default(), &options);
        let b = plan(&reversed, &[], &Manifest::default(), &LocalSnapshot::default(), &options);
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_glob_rejected() {
        assert!(PathFilter::new(&["a[".to_string()], &[]).is_err());
    }
}
