/// Core traits for the ILIAS mirror
use crate::error::{Result, SourceError};
use crate::types::RemoteNode;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

/// Streamed body of a remote file.
pub type ContentStream = BoxStream<'static, Result<Bytes>>;

/// An opened remote file, ready to be streamed.
pub struct RemoteContent {
    /// Size announced by the server (`Content-Length`), if any
    pub content_length: Option<u64>,
    pub body: ContentStream,
}

impl RemoteContent {
    pub fn new(content_length: Option<u64>, body: ContentStream) -> Self {
        Self {
            content_length,
            body,
        }
    }

    /// Content from a single in-memory chunk
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        let len = data.len() as u64;
        let body = futures_util::stream::once(async move { Ok::<_, SourceError>(data) });
        Self::new(Some(len), Box::pin(body))
    }
}

/// A link-tree content host the mirror can crawl and download from.
///
/// Implementers are responsible for authentication, session renewal and
/// request throttling; callers only see listings and content streams.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Turn a starting URL into the root folder node of a crawl
    ///
    /// # Errors
    /// Returns an error if the URL does not point at a container
    async fn resolve_root(&self, url: &str) -> Result<RemoteNode>;

    /// List the direct children of a folder node
    ///
    /// # Errors
    /// Returns an error if the listing could not be fetched or parsed
    async fn list_children(&self, folder: &RemoteNode) -> Result<Vec<RemoteNode>>;

    /// Open a file node for streaming
    ///
    /// # Errors
    /// Returns an error if the download could not be started
    async fn open_file(&self, file: &RemoteNode) -> Result<RemoteContent>;
}
