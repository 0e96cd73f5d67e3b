/// Remote tree node types
use super::ids::RemoteId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A folder or file discovered on the remote platform.
///
/// Courses, groups and folders are all containers from the mirror's point of
/// view and are represented as [`NodeKind::Folder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub remote_id: RemoteId,
    pub display_name: String,
    pub parent_id: Option<RemoteId>,
    pub kind: NodeKind,
}

/// The closed set of node kinds the mirror understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A container; its children are found at `listing_url`
    Folder { listing_url: String },
    /// A downloadable file
    File(FileMeta),
}

/// Metadata the platform shows for a file without downloading it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileMeta {
    /// Approximate size as displayed by the platform
    pub size_hint: Option<u64>,
    /// Last-modified text as displayed by the platform
    pub modified_hint: Option<String>,
    /// File version, if the platform versions uploads
    pub version: Option<u32>,
    /// URL that streams the file content
    pub download_handle: String,
    pub retrieval: Retrieval,
}

/// How the bytes behind a [`FileMeta::download_handle`] are obtained.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Retrieval {
    /// The handle streams the content
    #[default]
    Direct,
    /// The handle is a player page that names the media URL
    MediaPage,
    /// The listing already carried the whole content
    Inline(Bytes),
}

impl FileMeta {
    pub fn new(download_handle: impl Into<String>) -> Self {
        Self {
            download_handle: download_handle.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    pub fn with_modified(mut self, modified: impl Into<String>) -> Self {
        self.modified_hint = Some(modified.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_retrieval(mut self, retrieval: Retrieval) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Content embedded in the listing; its length is the size hint
    pub fn inline(download_handle: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content: Bytes = content.into();
        Self::new(download_handle)
            .with_size(content.len() as u64)
            .with_retrieval(Retrieval::Inline(content))
    }

    /// The cheap change-detection surrogate for this file
    pub fn fingerprint(&self) -> RemoteFingerprint {
        RemoteFingerprint {
            size: self.size_hint,
            modified: self.modified_hint.clone(),
            version: self.version,
        }
    }
}

/// Remote-side content fingerprint: the hints shown in listings.
///
/// Two fingerprints that compare equal mean "no visible remote change".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteFingerprint {
    pub size: Option<u64>,
    pub modified: Option<String>,
    pub version: Option<u32>,
}

impl RemoteNode {
    /// Create a folder node
    pub fn folder(
        remote_id: RemoteId,
        display_name: impl Into<String>,
        listing_url: impl Into<String>,
    ) -> Self {
        Self {
            remote_id,
            display_name: display_name.into(),
            parent_id: None,
            kind: NodeKind::Folder {
                listing_url: listing_url.into(),
            },
        }
    }

    /// Create a file node
    pub fn file(remote_id: RemoteId, display_name: impl Into<String>, meta: FileMeta) -> Self {
        Self {
            remote_id,
            display_name: display_name.into(),
            parent_id: None,
            kind: NodeKind::File(meta),
        }
    }

    /// Set the parent this node was listed under
    pub fn with_parent(mut self, parent_id: RemoteId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder { .. })
    }

    /// File metadata, if this is a file
    pub fn file_meta(&self) -> Option<&FileMeta> {
        match &self.kind {
            NodeKind::File(meta) => Some(meta),
            NodeKind::Folder { .. } => None,
        }
    }

    /// Kind label for logs
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            NodeKind::Folder { .. } => "folder",
            NodeKind::File(_) => "file",
        }
    }
}
