//! Common test utilities: an in-memory remote tree.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use ilias_client::RetryConfig;
use ilias_core::{
    AuthError, FileMeta, RemoteContent, RemoteId, RemoteNode, RemoteSource, SourceError,
};
use ilias_sync::SyncOptions;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub const ROOT: &str = "root";

/// Install a test log writer once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("ilias_sync=debug")
        .try_init();
}

/// Options with fast retries for a sync into `output`
pub fn options(output: &Path) -> SyncOptions {
    let mut options = SyncOptions::new(output, "https://ilias.example.org/goto.php?target=crs_1");
    options.retry = RetryConfig::fast(3);
    options
}

/// All files below `dir`, relative and `/`-separated, sorted
pub fn files_in(dir: &Path) -> Vec<String> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(base, &path, out);
            } else {
                let rel = path.strip_prefix(base).unwrap();
                out.push(
                    rel.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/"),
                );
            }
        }
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}

pub fn read(dir: &Path, relative: &str) -> Vec<u8> {
    std::fs::read(dir.join(PathBuf::from(relative))).unwrap()
}

#[derive(Default)]
struct Tree {
    nodes: HashMap<RemoteId, RemoteNode>,
    children: HashMap<RemoteId, Vec<RemoteId>>,
    contents: HashMap<RemoteId, Vec<u8>>,
    list_failures: HashMap<RemoteId, usize>,
    broken_folders: HashSet<RemoteId>,
    open_failures: HashMap<RemoteId, usize>,
    truncated: HashSet<RemoteId>,
    stalled: HashSet<RemoteId>,
    list_delays: HashMap<RemoteId, Duration>,
    list_calls: HashMap<RemoteId, usize>,
    open_calls: HashMap<RemoteId, usize>,
    root_unreachable: bool,
    rejected: HashSet<RemoteId>,
}

/// A remote tree held in memory, with knobs for failures and delays.
pub struct FakeSource {
    tree: Mutex<Tree>,
}

impl FakeSource {
    pub fn new() -> Self {
        let mut tree = Tree::default();
        let root = RemoteId::new(ROOT);
        tree.nodes.insert(
            root.clone(),
            RemoteNode::folder(root.clone(), "", format!("fake://{}", ROOT)),
        );
        tree.children.insert(root, Vec::new());
        Self {
            tree: Mutex::new(tree),
        }
    }

    pub fn add_folder(&self, parent: &str, id: &str, name: &str) {
        let mut tree = self.tree.lock().unwrap();
        let node = RemoteNode::folder(RemoteId::new(id), name, format!("fake://{}", id));
        tree.nodes.insert(node.remote_id.clone(), node);
        tree.children.entry(RemoteId::new(id)).or_default();
        tree.children.entry(RemoteId::new(parent)).or_default().push(RemoteId::new(id));
    }

    pub fn add_file(&self, parent: &str, id: &str, name: &str, content: &[u8]) {
        let mut tree = self.tree.lock().unwrap();
        let meta = FileMeta::new(format!("fake://{}/download", id)).with_size(content.len() as u64);
        let node = RemoteNode::file(RemoteId::new(id), name, meta);
        tree.nodes.insert(node.remote_id.clone(), node);
        tree.contents.insert(RemoteId::new(id), content.to_vec());
        tree.children.entry(RemoteId::new(parent)).or_default().push(RemoteId::new(id));
    }

    /// Make an existing node also appear under `parent`
    pub fn link(&self, parent: &str, id: &str) {
        let mut tree = self.tree.lock().unwrap();
        tree.children.entry(RemoteId::new(parent)).or_default().push(RemoteId::new(id));
    }

    /// Remove `id` from `parent`'s listing
    pub fn unlink(&self, parent: &str, id: &str) {
        let mut tree = self.tree.lock().unwrap();
        if let Some(children) = tree.children.get_mut(&RemoteId::new(parent)) {
            children.retain(|c| c.as_str() != id);
        }
    }

    pub fn rename(&self, id: &str, name: &str) {
        let mut tree = self.tree.lock().unwrap();
        if let Some(node) = tree.nodes.get_mut(&RemoteId::new(id)) {
            node.display_name = name.to_string();
        }
    }

    /// Replace a file's content; its size hint follows
    pub fn set_content(&self, id: &str, content: &[u8]) {
        let mut tree = self.tree.lock().unwrap();
        let id = RemoteId::new(id);
        if let Some(node) = tree.nodes.get_mut(&id) {
            let meta = node.file_meta().cloned().unwrap().with_size(content.len() as u64);
            *node = RemoteNode::file(id.clone(), node.display_name.clone(), meta);
        }
        tree.contents.insert(id, content.to_vec());
    }

    pub fn fail_listing(&self, id: &str, times: usize) {
        self.tree.lock().unwrap().list_failures.insert(RemoteId::new(id), times);
    }

    pub fn break_folder(&self, id: &str) {
        self.tree.lock().unwrap().broken_folders.insert(RemoteId::new(id));
    }

    pub fn repair_folder(&self, id: &str) {
        self.tree.lock().unwrap().broken_folders.remove(&RemoteId::new(id));
    }

    pub fn fail_open(&self, id: &str, times: usize) {
        self.tree.lock().unwrap().open_failures.insert(RemoteId::new(id), times);
    }

    /// Announce more bytes than the body delivers
    pub fn truncate(&self, id: &str) {
        self.tree.lock().unwrap().truncated.insert(RemoteId::new(id));
    }

    /// Deliver the first chunk, then never finish
    pub fn stall(&self, id: &str) {
        self.tree.lock().unwrap().stalled.insert(RemoteId::new(id));
    }

    pub fn delay_listing(&self, id: &str, delay: Duration) {
        self.tree.lock().unwrap().list_delays.insert(RemoteId::new(id), delay);
    }

    /// Listing or opening `id` fails as if the password had been changed
    pub fn reject_credentials(&self, id: &str) {
        self.tree.lock().unwrap().rejected.insert(RemoteId::new(id));
    }

    pub fn make_root_unreachable(&self) {
        self.tree.lock().unwrap().root_unreachable = true;
    }

    pub fn list_calls(&self, id: &str) -> usize {
        self.tree.lock().unwrap().list_calls.get(&RemoteId::new(id)).copied().unwrap_or(0)
    }

    pub fn open_calls(&self, id: &str) -> usize {
        self.tree.lock().unwrap().open_calls.get(&RemoteId::new(id)).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.tree.lock().unwrap().open_calls.values().sum()
    }
}

fn take_failure(failures: &mut HashMap<RemoteId, usize>, id: &RemoteId) -> bool {
    match failures.get_mut(id) {
        Some(left) if *left > 0 => {
            *left -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl RemoteSource for FakeSource {
    async fn resolve_root(&self, _url: &str) -> Result<RemoteNode, SourceError> {
        let tree = self.tree.lock().unwrap();
        if tree.root_unreachable {
            return Err(SourceError::Status {
                status: 404,
                url: "fake://root".into(),
            });
        }
        Ok(tree.nodes[&RemoteId::new(ROOT)].clone())
    }

    async fn list_children(&self, folder: &RemoteNode) -> Result<Vec<RemoteNode>, SourceError> {
        let delay = {
            let mut tree = self.tree.lock().unwrap();
            *tree.list_calls.entry(folder.remote_id.clone()).or_default() += 1;
            if tree.rejected.contains(&folder.remote_id) {
                return Err(SourceError::Auth(AuthError::InvalidCredentials));
            }
            if tree.broken_folders.contains(&folder.remote_id) {
                return Err(SourceError::Platform(format!("no access to {}", folder.remote_id)));
            }
            if take_failure(&mut tree.list_failures, &folder.remote_id) {
                return Err(SourceError::Timeout("fake timeout".into()));
            }
            tree.list_delays.get(&folder.remote_id).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let tree = self.tree.lock().unwrap();
        let children = tree
            .children
            .get(&folder.remote_id)
            .map(|ids| {
                ids.iter()
                    .map(|id| tree.nodes[id].clone().with_parent(folder.remote_id.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(children)
    }

    async fn open_file(&self, file: &RemoteNode) -> Result<RemoteContent, SourceError> {
        let mut tree = self.tree.lock().unwrap();
        *tree.open_calls.entry(file.remote_id.clone()).or_default() += 1;
        if tree.rejected.contains(&file.remote_id) {
            return Err(SourceError::Auth(AuthError::InvalidCredentials));
        }
        if take_failure(&mut tree.open_failures, &file.remote_id) {
            return Err(SourceError::Connect("fake connection reset".into()));
        }
        let content = tree
            .contents
            .get(&file.remote_id)
            .cloned()
            .ok_or_else(|| SourceError::Status {
                status: 404,
                url: format!("fake://{}", file.remote_id),
            })?;

        let announced = if tree.truncated.contains(&file.remote_id) {
            content.len() as u64 + 10
        } else {
            content.len() as u64
        };
        let chunks: Vec<Result<Bytes, SourceError>> = content
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        if tree.stalled.contains(&file.remote_id) {
            let first = chunks.into_iter().take(1);
            let body = stream::iter(first).chain(stream::pending());
            return Ok(RemoteContent::new(Some(announced), body.boxed()));
        }
        Ok(RemoteContent::new(Some(announced), stream::iter(chunks).boxed()))
    }
}
