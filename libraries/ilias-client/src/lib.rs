//! ILIAS Client
//!
//! HTTP client library for crawling and downloading from an ILIAS
//! installation.
//!
//! # Features
//!
//! - **Authentication**: Shibboleth (KIT) or plain form login, transparent
//!   re-login when the session expires
//! - **Rate limiting**: every request waits on a shared token-bucket gate
//! - **Retry**: exponential backoff helpers for transient failures
//! - **Listings**: container pages parsed into `RemoteNode`s, optionally
//!   merged with the course content tree
//! - **Videos and forums**: Opencast series become folders of `.mp4` files,
//!   forum threads folders of HTML posts
//!
//! # Example
//!
//! ```ignore
//! use ilias_client::{ClientConfig, IliasClient};
//! use ilias_core::{Credentials, RemoteSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = IliasClient::new(ClientConfig::default(), Credentials::new("uxxxx", "secret"))?;
//!     client.login().await?;
//!
//!     let root = client.resolve_root("").await?;
//!     for node in client.list_children(&root).await? {
//!         println!("{} {}", node.kind_label(), node.display_name);
//!     }
//!     Ok(())
//! }
//! ```

mod auth;
mod client;
mod config;
mod error;
pub mod parse;
mod rate_gate;
pub mod retry;
mod session;

pub use auth::LoginFlow;
pub use client::IliasClient;
pub use config::{ClientConfig, RateConfig, DEFAULT_BASE_URL};
pub use error::{ClientError, Result};
pub use rate_gate::{RateGate, RatePermit};
pub use retry::{retry, retry_if, RetryConfig};
pub use session::{Session, SessionManager};
