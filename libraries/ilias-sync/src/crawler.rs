//! Breadth-first traversal of the remote folder graph.
//!
//! The same object can be linked from several courses and folders, and links
//! may form cycles. Every `remote_id` is visited exactly once and gets one
//! canonical path: the one found at the smallest depth, ties broken by the
//! lexicographically smallest parent path. Within a folder, children are
//! taken in `(sanitized name, remote_id)` order and a later child whose name
//! is already taken is renamed to `name (remote_id)`.
//!
//! Each level is expanded concurrently, bounded by `jobs`, and merged in
//! frontier order, so the output does not depend on response timing.

use crate::error::CrawlError;
use crate::paths;
use futures_util::stream::{self, BoxStream, StreamExt};
use ilias_client::{retry_if, RetryConfig};
use ilias_core::{RemoteId, RemoteNode, RemoteSource, SourceError};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A node together with where it will live locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNode {
    pub node: RemoteNode,
    /// Relative, `/`-separated path below the output directory
    pub path: String,
    /// 1 for children of the root
    pub depth: usize,
}

#[derive(Debug)]
pub enum CrawlEvent {
    Discovered(DiscoveredNode),
    /// A folder could not be listed; nothing below it was discovered.
    /// The root folder has an empty `path`. A rejected login is the last
    /// event of a crawl.
    FolderFailed {
        folder: RemoteNode,
        path: String,
        error: CrawlError,
    },
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Concurrent folder expansions
    pub jobs: usize,
    pub retry: RetryConfig,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            retry: RetryConfig::request(),
        }
    }
}

pub struct Crawler<S> {
    source: Arc<S>,
    options: CrawlOptions,
    cancel: CancellationToken,
}

/// A folder waiting to be expanded
struct Pending {
    folder: RemoteNode,
    path: String,
    depth: usize,
}

impl<S: RemoteSource + 'static> Crawler<S> {
    pub fn new(source: Arc<S>, options: CrawlOptions, cancel: CancellationToken) -> Self {
        Self {
            source,
            options,
            cancel,
        }
    }

    /// Crawl everything below `root`.
    ///
    /// Events are produced by a background task as the consumer reads them;
    /// dropping the stream stops the crawl.
    pub fn crawl(&self, root: RemoteNode) -> BoxStream<'static, CrawlEvent> {
        let (tx, mut rx) = mpsc::channel(256);
        let walk = Walk {
            source: Arc::clone(&self.source),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
            tx,
        };
        tokio::spawn(walk.run(root));
        Box::pin(stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }
}

struct Walk<S> {
    source: Arc<S>,
    options: CrawlOptions,
    cancel: CancellationToken,
    tx: mpsc::Sender<CrawlEvent>,
}

impl<S: RemoteSource + 'static> Walk<S> {
    async fn run(self, root: RemoteNode) {
        let mut visited: HashSet<RemoteId> = HashSet::new();
        let mut discovered = 0usize;
        visited.insert(root.remote_id.clone());

        let mut frontier = vec![Pending {
            folder: root,
            path: String::new(),
            depth: 0,
        }];
        let jobs = self.options.jobs.max(1);

        while !frontier.is_empty() {
            if self.cancel.is_cancelled() {
                info!("Crawl cancelled");
                return;
            }
            frontier.sort_by(|a, b| a.path.cmp(&b.path));
            debug!(level = frontier[0].depth, folders = frontier.len(), "Expanding level");

            let mut expansions = Vec::with_capacity(frontier.len());
            for pending in &frontier {
                expansions.push(self.expand(&pending.folder));
            }
            // `buffered` keeps results in frontier order
            let listings: Vec<Result<Vec<RemoteNode>, CrawlError>> =
                stream::iter(expansions).buffered(jobs).collect().await;

            let mut next = Vec::new();
            for (pending, listing) in frontier.into_iter().zip(listings) {
                let children = match listing {
                    Ok(children) => children,
                    Err(CrawlError::Cancelled) => return,
                    Err(error) => {
                        let fatal = error.is_invalid_credentials();
                        if fatal {
                            error!(path = %pending.path, "Login rejected, stopping crawl");
                        } else {
                            warn!(path = %pending.path, id = %pending.folder.remote_id, error = %error, "Folder failed, skipping its subtree");
                        }
                        let event = CrawlEvent::FolderFailed {
                            folder: pending.folder,
                            path: pending.path,
                            error,
                        };
                        if self.tx.send(event).await.is_err() || fatal {
                            return;
                        }
                        continue;
                    }
                };

                for child in place_children(&pending, children, &mut visited) {
                    if child.node.is_folder() {
                        next.push(Pending {
                            folder: child.node.clone(),
                            path: child.path.clone(),
                            depth: child.depth,
                        });
                    }
                    discovered += 1;
                    if self.tx.send(CrawlEvent::Discovered(child)).await.is_err() {
                        // Consumer went away
                        return;
                    }
                }
            }
            frontier = next;
        }

        info!(nodes = discovered, "Crawl finished");
    }

    async fn expand(&self, folder: &RemoteNode) -> Result<Vec<RemoteNode>, CrawlError> {
        let listing = retry_if(
            "list folder",
            &self.options.retry,
            SourceError::is_transient,
            || self.source.list_children(folder),
        );
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CrawlError::Cancelled),
            result = listing => result.map_err(CrawlError::from),
        }
    }
}

/// Assign paths to the unvisited children of one folder.
fn place_children(
    parent: &Pending,
    children: Vec<RemoteNode>,
    visited: &mut HashSet<RemoteId>,
) -> Vec<DiscoveredNode> {
    let mut named: Vec<(String, RemoteNode)> = children
        .into_iter()
        .map(|child| {
            let name = paths::sanitize_name(&child.display_name, child.remote_id.as_str());
            (name, child)
        })
        .collect();
    named.sort_by(|(a_name, a), (b_name, b)| {
        a_name
            .cmp(b_name)
            .then_with(|| a.remote_id.cmp(&b.remote_id))
    });

    let mut taken: HashSet<String> = HashSet::new();
    let mut placed = Vec::new();
    for (name, mut child) in named {
        if !visited.insert(child.remote_id.clone()) {
            debug!(id = %child.remote_id, parent = %parent.path, "Already visited, skipping");
            continue;
        }
        let name = if taken.contains(&name) {
            paths::with_id_suffix(&name, child.remote_id.as_str())
        } else {
            name
        };
        taken.insert(name.clone());
        child.parent_id = Some(parent.folder.remote_id.clone());

        placed.push(DiscoveredNode {
            path: paths::join(&parent.path, &name),
            depth: parent.depth + 1,
            node: child,
        });
    }
    placed
}
