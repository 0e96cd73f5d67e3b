//! ILIAS Mirror Core
//!
//! Platform-agnostic types, traits, and error handling shared by the HTTP
//! client and the sync engine.
//!
//! # Architecture
//!
//! The core crate defines:
//! - **Domain Types**: `RemoteNode`, `RemoteId`, `Credentials`, fingerprints
//! - **Core Traits**: `RemoteSource`, the seam between crawling/downloading
//!   and the concrete platform client
//! - **Error Handling**: `AuthError` and `SourceError`
//!
//! # Example
//!
//! ```rust
//! use ilias_core::types::{FileMeta, NodeKind, RemoteId, RemoteNode};
//!
//! let folder = RemoteNode::folder(RemoteId::new("42"), "Lectures", "https://ilias.example.org/goto.php?target=fold_42");
//! let file = RemoteNode::file(
//!     RemoteId::new("43"),
//!     "Slides.pdf",
//!     FileMeta::new("https://ilias.example.org/goto.php?target=file_43_download"),
//! )
//! .with_parent(folder.remote_id.clone());
//!
//! assert!(folder.is_folder());
//! assert!(matches!(file.kind, NodeKind::File(_)));
//! ```

#![forbid(unsafe_code)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{AuthError, Result, SourceError};
pub use traits::{ContentStream, RemoteContent, RemoteSource};
pub use types::{Credentials, FileMeta, NodeKind, RemoteFingerprint, RemoteId, RemoteNode, Retrieval};
