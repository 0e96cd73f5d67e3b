//! ILIAS page parsing.
//!
//! All functions take the page text and return owned values; the parsed DOM
//! never crosses an `.await`.

pub mod dates;
pub mod forum;
pub mod opencast;
pub mod tree;

use chrono::NaiveDate;
use ilias_core::{AuthError, FileMeta, RemoteId, RemoteNode, SourceError};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html};
use url::Url;

#[allow(non_upper_case_globals)]
mod selectors {
    use lazy_static::lazy_static;
    use scraper::Selector;
    // construct CSS selectors once
    lazy_static! {
        pub static ref container_item: Selector = Selector::parse("div.il_ContainerListItem").expect("valid selector");
        pub static ref container_item_title: Selector = Selector::parse("a.il_ContainerItemTitle").expect("valid selector");
        pub static ref item_property: Selector = Selector::parse("span.il_ItemProperty").expect("valid selector");
        pub static ref alert_danger: Selector = Selector::parse("div.alert-danger").expect("valid selector");
        pub static ref saml_response: Selector = Selector::parse(r#"input[name="SAMLResponse"]"#).expect("valid selector");
        pub static ref relay_state: Selector = Selector::parse(r#"input[name="RelayState"]"#).expect("valid selector");
        pub static ref otp_input: Selector = Selector::parse(r#"input[name="j_tokenNumber"]"#).expect("valid selector");
    }
}
use selectors::*;

lazy_static! {
    /// Static permalinks, e.g. `goto_produktiv_fold_1234.html`
    static ref PERMALINK: Regex =
        Regex::new(r"goto_[^/_]+_(crs|grp|fold|file)_(\d+)(_download)?\.html$").expect("valid regex");
    /// Displayed sizes, e.g. `1,2 MB` or `734 Bytes`
    static ref SIZE: Regex =
        Regex::new(r"^(?i)([\d.,]+)\s*(bytes|byte|b|kb|mb|gb|tb)$").expect("valid regex");
}

/// What a repository link points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// Course, group or folder
    Container { ref_id: String, url: Url },
    /// Direct file download
    File { ref_id: String, url: Url },
    /// Opencast video series
    VideoSeries { ref_id: String, url: Url },
    /// Forum; its threads are listed separately
    Forum { ref_id: String, url: Url },
    /// Anything the mirror does not follow (wikis, tests, ...)
    Other,
}

/// Classify a link found on an ILIAS page.
pub fn classify_link(href: &str, base: &Url) -> LinkTarget {
    let Ok(url) = base.join(href) else {
        return LinkTarget::Other;
    };

    let mut target = None;
    let mut ref_id = None;
    let mut base_class = String::new();
    let mut cmd = None;
    let mut thread = false;
    for (k, v) in url.query_pairs() {
        match &*k {
            "target" => target = Some(v.into_owned()),
            "ref_id" => ref_id = Some(v.into_owned()),
            "baseClass" => base_class = v.to_ascii_lowercase(),
            "cmd" => cmd = Some(v.into_owned()),
            "thr_pk" => thread = true,
            _ => {}
        }
    }

    // Threads are reached through their forum
    if thread {
        return LinkTarget::Other;
    }

    if url.path().ends_with("goto.php") {
        let Some(target) = target else {
            return LinkTarget::Other;
        };
        let mut parts = target.split('_');
        let kind = parts.next().unwrap_or_default();
        let id = parts.next().unwrap_or_default().to_string();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return LinkTarget::Other;
        }
        return match kind {
            "crs" | "grp" | "fold" => LinkTarget::Container { ref_id: id, url },
            // without the `_download` suffix this is the file's info page
            "file" if target.ends_with("download") => LinkTarget::File { ref_id: id, url },
            "frm" => LinkTarget::Forum { ref_id: id, url },
            "xoct" => LinkTarget::VideoSeries { ref_id: id, url },
            _ => LinkTarget::Other,
        };
    }

    if let Some(caps) = PERMALINK.captures(url.path()) {
        let id = caps[2].to_string();
        return match (&caps[1], caps.get(3).is_some()) {
            ("file", true) => LinkTarget::File { ref_id: id, url },
            ("file", false) => LinkTarget::Other,
            _ => LinkTarget::Container { ref_id: id, url },
        };
    }

    let Some(ref_id) = ref_id.filter(|id| !id.is_empty()) else {
        return LinkTarget::Other;
    };
    match base_class.as_str() {
        "ilrepositorygui" => match cmd.as_deref() {
            None | Some("view" | "render" | "frameset") => LinkTarget::Container { ref_id, url },
            Some("showThreads") => LinkTarget::Forum { ref_id, url },
            Some(_) => LinkTarget::Other,
        },
        "ilobjplugindispatchgui" => LinkTarget::VideoSeries { ref_id, url },
        _ => LinkTarget::Other,
    }
}

/// How the page behind a folder's listing URL is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingKind {
    /// Course, group, folder or dashboard page
    Container,
    /// A course page, which also has a content tree
    Course { ref_id: String },
    /// Event table of an Opencast series
    VideoSeries,
    /// Thread overview of a forum
    Forum,
    /// Posts of one forum thread
    Thread,
}

/// Decide how to read the page at a folder's listing URL.
pub fn listing_kind(url: &Url) -> ListingKind {
    let mut target = None;
    let mut cmd_class = String::new();
    let mut cmd = None;
    for (k, v) in url.query_pairs() {
        match &*k {
            "thr_pk" => return ListingKind::Thread,
            "target" => target = Some(v.into_owned()),
            "cmdClass" => cmd_class = v.to_ascii_lowercase(),
            "cmd" => cmd = Some(v.into_owned()),
            _ => {}
        }
    }

    if cmd_class == "xocteventgui" && cmd.as_deref() == Some("asyncGetTableGUI") {
        return ListingKind::VideoSeries;
    }
    if cmd.as_deref() == Some("showThreads") {
        return ListingKind::Forum;
    }

    let course = target
        .as_deref()
        .and_then(|t| t.strip_prefix("crs_"))
        .map(str::to_string)
        .or_else(|| {
            PERMALINK
                .captures(url.path())
                .filter(|caps| &caps[1] == "crs")
                .map(|caps| caps[2].to_string())
        });
    match course {
        Some(ref_id) if !ref_id.is_empty() && ref_id.chars().all(|c| c.is_ascii_digit()) => {
            ListingKind::Course { ref_id }
        }
        _ => ListingKind::Container,
    }
}

/// What a page is parsed against.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    /// URL the page was served from; relative links resolve against it
    pub base: &'a Url,
    /// The folder being listed
    pub parent: &'a RemoteId,
    /// Day the page was fetched, for relative dates
    pub today: NaiveDate,
    /// Whether Opencast series are listed
    pub videos: bool,
    /// Whether forums are listed
    pub forums: bool,
}

impl<'a> PageContext<'a> {
    /// Everything enabled except forums, as on a default run
    pub fn new(base: &'a Url, parent: &'a RemoteId, today: NaiveDate) -> Self {
        Self {
            base,
            parent,
            today,
            videos: true,
            forums: false,
        }
    }

    /// Turn a classified link into a node, if the mirror follows it.
    fn node(&self, target: LinkTarget, name: String, props: &FileProperties) -> Option<RemoteNode> {
        let node = match target {
            LinkTarget::Container { ref_id, url } => {
                RemoteNode::folder(RemoteId::new(ref_id), name, url.as_str())
            }
            LinkTarget::File { ref_id, url } => RemoteNode::file(
                RemoteId::new(ref_id),
                props.file_name(&name),
                props.meta(url.as_str(), self.today),
            ),
            LinkTarget::VideoSeries { ref_id, .. } if self.videos => {
                let listing = opencast::series_table_url(self.base, &ref_id).ok()?;
                RemoteNode::folder(RemoteId::new(ref_id), name, listing.as_str())
            }
            LinkTarget::Forum { ref_id, .. } if self.forums => {
                let listing = forum::threads_url(self.base, &ref_id).ok()?;
                RemoteNode::folder(RemoteId::new(ref_id), name, listing.as_str())
            }
            _ => return None,
        };
        Some(node.with_parent(self.parent.clone()))
    }
}

/// Parse the object list of a container page (course, folder, dashboard).
///
/// Items the mirror does not follow are dropped.
pub fn container_items(html: &str, ctx: &PageContext<'_>) -> Vec<RemoteNode> {
    let dom = Html::parse_document(html);
    let mut nodes = Vec::new();

    for item in dom.select(&container_item) {
        let Some(link) = item.select(&container_item_title).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if href.is_empty() {
            // disabled entry
            continue;
        }
        let target = classify_link(href, ctx.base);
        let props = if matches!(target, LinkTarget::File { .. }) {
            FileProperties::from_item(item)
        } else {
            FileProperties::default()
        };
        nodes.extend(ctx.node(target, link_text(link), &props));
    }

    nodes
}

fn link_text(link: ElementRef<'_>) -> String {
    link.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('/', "-")
}

/// Properties ILIAS shows next to a file entry.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FileProperties {
    pub extension: Option<String>,
    pub size: Option<u64>,
    pub modified: Option<String>,
    pub version: Option<u32>,
}

impl FileProperties {
    fn from_item(item: ElementRef<'_>) -> Self {
        let texts: Vec<String> = item
            .select(&item_property)
            .map(|p| p.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Self::from_texts(&texts)
    }

    /// Interpret the property texts: extension first, then size, version
    /// and date in any order.
    pub fn from_texts(texts: &[String]) -> Self {
        let mut props = Self::default();
        let mut iter = texts.iter();
        props.extension = iter.next().map(|ext| ext.trim_start_matches('.').to_string());

        for text in iter {
            if let Some(v) = text.strip_prefix("Version:") {
                props.version = v.trim().parse().ok();
            } else if let Some(size) = parse_size(text) {
                props.size = props.size.or(Some(size));
            } else if props.modified.is_none() {
                props.modified = Some(text.clone());
            }
        }
        props
    }

    /// `name_vN.ext`, the way files are named on disk
    pub fn file_name(&self, name: &str) -> String {
        let mut file_name = name.to_string();
        if let Some(version) = self.version {
            file_name.push_str(&format!("_v{}", version));
        }
        if let Some(ext) = self.extension.as_deref().filter(|e| !e.is_empty()) {
            let suffix = format!(".{}", ext);
            if !file_name.to_lowercase().ends_with(&suffix.to_lowercase()) {
                file_name.push_str(&suffix);
            }
        }
        file_name
    }

    /// Listing hints as file metadata; dates are normalized against `today`.
    fn meta(&self, download_handle: &str, today: NaiveDate) -> FileMeta {
        FileMeta {
            size_hint: self.size,
            modified_hint: self
                .modified
                .as_deref()
                .map(|text| dates::normalize_date(text, today)),
            version: self.version,
            download_handle: download_handle.to_string(),
            ..Default::default()
        }
    }
}

/// Parse a displayed size such as `1,2 MB` into bytes (binary multiples).
pub fn parse_size(text: &str) -> Option<u64> {
    let caps = SIZE.captures(text.trim())?;
    let number = &caps[1];
    // German formatting: `1.234,5` ; English: `1,234.5`
    let normalized = if number.contains(',') && number.contains('.') {
        if number.rfind(',') > number.rfind('.') {
            number.replace('.', "").replace(',', ".")
        } else {
            number.replace(',', "")
        }
    } else {
        number.replace(',', ".")
    };
    let value: f64 = normalized.parse().ok()?;
    let multiplier: f64 = match caps[2].to_ascii_lowercase().as_str() {
        "kb" => 1024.0,
        "mb" => 1024.0 * 1024.0,
        "gb" => 1024.0 * 1024.0 * 1024.0,
        "tb" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    };
    Some((value * multiplier).round() as u64)
}

/// Error text of an ILIAS error page, if the page is one.
pub fn page_error(html: &str) -> Option<String> {
    let dom = Html::parse_document(html);
    dom.select(&alert_danger)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
}

/// Courses the user has not joined offer a join button instead of content.
pub fn requires_join(html: &str) -> bool {
    html.contains("cmd[join]")
}

/// Whether a final response URL is one of the platform's login pages.
pub fn is_login_url(url: &Url) -> bool {
    let path = url.path();
    if path.ends_with("login.php") || path.contains("Shibboleth.sso/Login") {
        return true;
    }
    url.query_pairs()
        .any(|(k, v)| k == "baseClass" && v.eq_ignore_ascii_case("ilStartUpGUI"))
}

/// Hidden fields the identity provider posts back to the service provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlForm {
    pub saml_response: String,
    pub relay_state: String,
}

/// Extract the SAML hand-off from the identity provider's answer.
pub fn saml_form(html: &str) -> Result<SamlForm, AuthError> {
    let dom = Html::parse_document(html);
    if dom.select(&otp_input).next().is_some() {
        return Err(AuthError::UnexpectedResponseShape(
            "two-factor authentication is not supported".into(),
        ));
    }
    let Some(saml) = dom.select(&saml_response).next() else {
        // The IdP re-renders its login form on a wrong password
        return Err(AuthError::InvalidCredentials);
    };
    let relay = dom.select(&relay_state).next().ok_or_else(|| {
        AuthError::UnexpectedResponseShape("no relay state".into())
    })?;

    let value = |e: ElementRef<'_>, name: &str| {
        e.value().attr("value").map(str::to_string).ok_or_else(|| {
            AuthError::UnexpectedResponseShape(format!("{} has no value", name))
        })
    };
    Ok(SamlForm {
        saml_response: value(saml, "SAMLResponse")?,
        relay_state: value(relay, "RelayState")?,
    })
}

/// Build the root folder node for a sync root URL.
pub fn root_node(url: &str, base: &Url) -> Result<RemoteNode, SourceError> {
    let absolute = base
        .join(url)
        .map_err(|e| SourceError::parse(format!("invalid sync root {:?}: {}", url, e)))?;

    match classify_link(absolute.as_str(), base) {
        LinkTarget::Container { ref_id, url } => {
            Ok(RemoteNode::folder(RemoteId::new(ref_id), "", url.as_str()))
        }
        LinkTarget::VideoSeries { ref_id, .. } => Ok(RemoteNode::folder(
            RemoteId::new(ref_id.clone()),
            "",
            opencast::series_table_url(base, &ref_id)?.as_str(),
        )),
        LinkTarget::Forum { ref_id, .. } => Ok(RemoteNode::folder(
            RemoteId::new(ref_id.clone()),
            "",
            forum::threads_url(base, &ref_id)?.as_str(),
        )),
        LinkTarget::File { .. } => Err(SourceError::parse(format!(
            "sync root {} is a file, not a container",
            absolute
        ))),
        // Dashboards and other listing pages have no ref_id; the URL is the identity
        LinkTarget::Other => Ok(RemoteNode::folder(
            RemoteId::new(absolute.as_str()),
            "",
            absolute.as_str(),
        )),
    }
}

/// Resolve `path` against the installation's base URL.
pub(crate) fn join(base: &Url, path: &str) -> Result<Url, SourceError> {
    base.join(path)
        .map_err(|e| SourceError::parse(format!("invalid URL {:?}: {}", path, e)))
}
