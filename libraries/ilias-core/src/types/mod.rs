mod credentials;
mod ids;
mod node;

pub use credentials::Credentials;
pub use ids::RemoteId;
pub use node::{FileMeta, NodeKind, RemoteFingerprint, RemoteNode, Retrieval};
