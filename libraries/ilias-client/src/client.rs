/// ILIAS client implementation
use crate::config::ClientConfig;
use crate::error::{transport_error, ClientError, Result};
use crate::parse::{self, forum, opencast, tree, ListingKind, PageContext};
use crate::rate_gate::RateGate;
use crate::session::{Session, SessionManager};
use async_trait::async_trait;
use chrono::Local;
use futures_util::TryStreamExt;
use ilias_core::{
    AuthError, Credentials, NodeKind, RemoteContent, RemoteId, RemoteNode, RemoteSource,
    Retrieval, SourceError,
};
use reqwest::{Response, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;

/// Client for one ILIAS installation.
///
/// Every request goes through the shared [`RateGate`] and runs on the
/// current [`Session`]; a request that finds its session expired triggers a
/// renewal and is replayed once on the new session.
#[derive(Debug, Clone)]
pub struct IliasClient {
    config: Arc<ClientConfig>,
    base: Url,
    gate: Arc<RateGate>,
    sessions: Arc<SessionManager>,
    /// Set once the repository view was switched to tree mode
    tree_mode: Arc<OnceCell<()>>,
}

impl IliasClient {
    /// Create a client that throttles according to `config.rate`.
    pub fn new(config: ClientConfig, credentials: Credentials) -> Result<Self> {
        let gate = Arc::new(RateGate::from_config(&config.rate));
        Self::with_rate_gate(config, credentials, gate)
    }

    /// Create a client sharing an existing gate.
    pub fn with_rate_gate(
        config: ClientConfig,
        credentials: Credentials,
        gate: Arc<RateGate>,
    ) -> Result<Self> {
        let config = config.validated()?;
        let base = Url::parse(&config.base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let sessions = Arc::new(SessionManager::new(
            config.clone(),
            credentials,
            Arc::clone(&gate),
        )?);

        Ok(Self {
            config: Arc::new(config),
            base,
            gate,
            sessions,
            tree_mode: Arc::new(OnceCell::new()),
        })
    }

    /// Establish the first session eagerly.
    ///
    /// Without this the first request logs in lazily.
    pub async fn login(&self) -> std::result::Result<(), AuthError> {
        self.sessions.authenticate().await.map(|_| ())
    }

    pub fn rate_gate(&self) -> &Arc<RateGate> {
        &self.gate
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The page listing the user's courses
    pub fn dashboard_url(&self) -> std::result::Result<Url, SourceError> {
        self.resolve(&self.config.dashboard_path)
    }

    fn resolve(&self, url: &str) -> std::result::Result<Url, SourceError> {
        self.base
            .join(url)
            .map_err(|e| SourceError::parse(format!("invalid URL {:?}: {}", url, e)))
    }

    /// GET `url` on the current session, renewing it once if it expired.
    async fn get(&self, url: &Url) -> std::result::Result<Response, SourceError> {
        let mut session = self.sessions.current().await?;
        let mut renewed = false;

        loop {
            let response = self.send(&session, url).await?;
            if is_expired(&response) {
                if renewed {
                    // A fresh session was rejected as well
                    return Err(SourceError::SessionExpired);
                }
                session = self.sessions.ensure_valid(&session).await?;
                renewed = true;
                continue;
            }

            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            return Ok(response);
        }
    }

    async fn send(&self, session: &Session, url: &Url) -> std::result::Result<Response, SourceError> {
        let _permit = self.gate.acquire().await;
        debug!(%url, session = session.version(), "GET");
        session
            .http()
            .get(url.clone())
            .send()
            .await
            .map_err(transport_error)
    }

    /// GET a page and return its final URL and body.
    async fn get_html(&self, url: &Url) -> std::result::Result<(Url, String), SourceError> {
        let response = self.get(url).await?;
        let landed = response.url().clone();
        let body = response.text().await.map_err(transport_error)?;
        if let Some(message) = parse::page_error(&body) {
            return Err(SourceError::Platform(message));
        }
        Ok((landed, body))
    }

    fn page_context<'a>(&self, base: &'a Url, parent: &'a RemoteId) -> PageContext<'a> {
        PageContext {
            base,
            parent,
            today: Local::now().date_naive(),
            videos: self.config.videos,
            forums: self.config.forums,
        }
    }

    async fn list_container(&self, url: &Url, folder: &RemoteNode) -> std::result::Result<Vec<RemoteNode>, SourceError> {
        let (landed, html) = self.get_html(url).await?;
        if parse::requires_join(&html) {
            warn!("Course not joined, skipping its content");
            return Ok(Vec::new());
        }
        Ok(parse::container_items(
            &html,
            &self.page_context(&landed, &folder.remote_id),
        ))
    }

    /// Course page items plus those only the content tree shows.
    async fn list_course(
        &self,
        url: &Url,
        ref_id: &str,
        folder: &RemoteNode,
    ) -> std::result::Result<Vec<RemoteNode>, SourceError> {
        let (landed, html) = self.get_html(url).await?;
        if parse::requires_join(&html) {
            warn!("Course not joined, skipping its content");
            return Ok(Vec::new());
        }
        let ctx = self.page_context(&landed, &folder.remote_id);
        let mut children = parse::container_items(&html, &ctx);

        match self.course_tree(&html, ref_id, &ctx).await {
            Ok(extra) => {
                let mut known: HashSet<RemoteId> =
                    children.iter().map(|n| n.remote_id.clone()).collect();
                let before = children.len();
                children.extend(extra.into_iter().filter(|n| known.insert(n.remote_id.clone())));
                debug!(added = children.len() - before, "Merged content tree");
            }
            Err(error) if error.is_invalid_credentials() => return Err(error),
            Err(error) => warn!(%error, "Content tree unavailable, using the course page only"),
        }
        Ok(children)
    }

    async fn course_tree(
        &self,
        page: &str,
        ref_id: &str,
        ctx: &PageContext<'_>,
    ) -> std::result::Result<Vec<RemoteNode>, SourceError> {
        let cmd_node = tree::course_cmd_node(page)
            .ok_or_else(|| SourceError::parse("course page names no control node"))?;

        self.tree_mode
            .get_or_try_init(|| async {
                self.get(&tree::tree_mode_url(&self.base)?).await?;
                debug!("Switched repository view to tree mode");
                Ok::<_, SourceError>(())
            })
            .await?;

        let url = tree::tree_url(&self.base, ref_id, &cmd_node)?;
        let (_, fragment) = self.get_html(&url).await?;
        Ok(tree::tree_items(&fragment, ctx))
    }

    async fn list_videos(&self, url: &Url, folder: &RemoteNode) -> std::result::Result<Vec<RemoteNode>, SourceError> {
        let (landed, html) = self.get_html(url).await?;
        Ok(opencast::series_videos(&html, &landed, &folder.remote_id))
    }

    async fn list_threads(&self, url: &Url, folder: &RemoteNode) -> std::result::Result<Vec<RemoteNode>, SourceError> {
        let (mut landed, mut html) = self.get_html(url).await?;
        // The overview is paged unless asked for all rows
        if let Some(all) = forum::all_threads_link(&html, &landed) {
            (landed, html) = self.get_html(&all).await?;
        }
        Ok(forum::threads(&html, &landed, &folder.remote_id))
    }

    async fn list_posts(&self, url: &Url, folder: &RemoteNode) -> std::result::Result<Vec<RemoteNode>, SourceError> {
        let mut posts = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(url.clone());

        while let Some(page_url) = next.take() {
            if !visited.insert(page_url.clone()) {
                warn!(%page_url, "Thread pager points back, stopping");
                break;
            }
            let (landed, html) = self.get_html(&page_url).await?;
            let page = forum::thread_page(&html, &landed, &folder.remote_id);
            posts.extend(page.posts);
            next = page.next_page;
        }
        Ok(posts)
    }
}

fn is_expired(response: &Response) -> bool {
    response.status() == StatusCode::UNAUTHORIZED || parse::is_login_url(response.url())
}

#[async_trait]
impl RemoteSource for IliasClient {
    async fn resolve_root(&self, url: &str) -> std::result::Result<RemoteNode, SourceError> {
        let url = url.trim();
        if url.is_empty() {
            let dashboard = self.dashboard_url()?;
            return parse::root_node(dashboard.as_str(), &self.base);
        }
        parse::root_node(url, &self.base)
    }

    #[instrument(skip(self, folder), fields(id = %folder.remote_id, name = %folder.display_name))]
    async fn list_children(&self, folder: &RemoteNode) -> std::result::Result<Vec<RemoteNode>, SourceError> {
        let NodeKind::Folder { listing_url } = &folder.kind else {
            return Err(SourceError::parse(format!(
                "{} is not a folder",
                folder.remote_id
            )));
        };
        let url = self.resolve(listing_url)?;

        let children = match parse::listing_kind(&url) {
            ListingKind::VideoSeries => self.list_videos(&url, folder).await?,
            ListingKind::Forum => self.list_threads(&url, folder).await?,
            ListingKind::Thread => self.list_posts(&url, folder).await?,
            ListingKind::Course { ref_id } if self.config.content_tree => {
                self.list_course(&url, &ref_id, folder).await?
            }
            ListingKind::Course { .. } | ListingKind::Container => {
                self.list_container(&url, folder).await?
            }
        };
        debug!(count = children.len(), "Listed folder");
        Ok(children)
    }

    async fn open_file(&self, file: &RemoteNode) -> std::result::Result<RemoteContent, SourceError> {
        let Some(meta) = file.file_meta() else {
            return Err(SourceError::parse(format!("{} is not a file", file.remote_id)));
        };
        let url = match &meta.retrieval {
            Retrieval::Inline(content) => return Ok(RemoteContent::from_bytes(content.clone())),
            Retrieval::MediaPage => {
                let page = self.resolve(&meta.download_handle)?;
                let (landed, html) = self.get_html(&page).await?;
                let media = opencast::player_media_url(&html)?;
                parse::join(&landed, &media)?
            }
            Retrieval::Direct => self.resolve(&meta.download_handle)?,
        };
        let response = self.get(&url).await?;
        let content_length = response.content_length();
        let body = response.bytes_stream().map_err(transport_error);
        Ok(RemoteContent::new(content_length, Box::pin(body)))
    }
}
