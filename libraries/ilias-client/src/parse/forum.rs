//! Forums, their threads and posts.
//!
//! A forum is mirrored as a folder of threads; each thread is a folder
//! holding one HTML file per post. Post bodies are already on the thread
//! page, so post files carry their content inline.

use super::join;
use ilias_core::{FileMeta, RemoteId, RemoteNode, SourceError};
use scraper::{ElementRef, Html};
use url::Url;

#[allow(non_upper_case_globals)]
mod selectors {
    use lazy_static::lazy_static;
    use scraper::Selector;
    lazy_static! {
        pub static ref link: Selector = Selector::parse("a").expect("valid selector");
        pub static ref row: Selector = Selector::parse("tr").expect("valid selector");
        pub static ref cell: Selector = Selector::parse("td").expect("valid selector");
        pub static ref thread_link: Selector = Selector::parse("a[href]").expect("valid selector");
        pub static ref table: Selector = Selector::parse("table").expect("valid selector");
        pub static ref pager_link: Selector = Selector::parse("tbody tr td a").expect("valid selector");
        pub static ref post_row: Selector = Selector::parse(".ilFrmPostRow").expect("valid selector");
        pub static ref post_title: Selector = Selector::parse(".ilFrmPostTitle").expect("valid selector");
        pub static ref post_author: Selector = Selector::parse("span.small").expect("valid selector");
        pub static ref post_anchor: Selector =
            Selector::parse(".ilFrmPostContentContainer a[name]").expect("valid selector");
        pub static ref post_content: Selector = Selector::parse(".ilFrmPostContent").expect("valid selector");
    }
}
use selectors::*;

/// Thread overview of the forum with `ref_id`.
pub fn threads_url(base: &Url, ref_id: &str) -> Result<Url, SourceError> {
    join(
        base,
        &format!(
            "ilias.php?ref_id={}&cmd=showThreads&cmdClass=ilrepositorygui&cmdNode=uf&baseClass=ilrepositorygui",
            ref_id
        ),
    )
}

/// The overview variant that shows every thread on one page, if offered.
pub fn all_threads_link(html: &str, base: &Url) -> Option<Url> {
    let dom = Html::parse_document(html);
    let href = dom
        .select(&link)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.contains("trows=800"))?;
    base.join(href).ok()
}

/// Threads of a forum overview, one folder each.
///
/// Thread rows have six cells with the thread link in the second.
pub fn threads(html: &str, base: &Url, parent: &RemoteId) -> Vec<RemoteNode> {
    let dom = Html::parse_document(html);
    let mut nodes = Vec::new();

    for tr in dom.select(&row) {
        let cells: Vec<ElementRef<'_>> = tr.select(&cell).collect();
        if cells.len() != 6 {
            continue;
        }
        let Some(a) = cells[1].select(&thread_link).next() else {
            continue;
        };
        let Some(url) = a.value().attr("href").and_then(|href| base.join(href).ok()) else {
            continue;
        };
        let Some(pk) = url
            .query_pairs()
            .find(|(k, _)| k == "thr_pk")
            .map(|(_, v)| v.into_owned())
        else {
            continue;
        };
        let title = clean(&a.text().collect::<String>());

        nodes.push(
            RemoteNode::folder(
                RemoteId::new(format!("thr_{}", pk)),
                format!("{}_{}", pk, title),
                url.as_str(),
            )
            .with_parent(parent.clone()),
        );
    }

    nodes
}

/// One page of a thread.
#[derive(Debug)]
pub struct ThreadPage {
    pub posts: Vec<RemoteNode>,
    /// Next page of a long thread
    pub next_page: Option<Url>,
}

/// Posts on a thread page, each an inline HTML file.
pub fn thread_page(html: &str, page_url: &Url, parent: &RemoteId) -> ThreadPage {
    let dom = Html::parse_document(html);
    let mut posts = Vec::new();

    for post in dom.select(&post_row) {
        let Some(anchor) = post
            .select(&post_anchor)
            .next()
            .and_then(|a| a.value().attr("name"))
            .filter(|name| !name.is_empty())
        else {
            continue;
        };
        let title = post
            .select(&post_title)
            .next()
            .map(|e| clean(&e.text().collect::<String>()))
            .unwrap_or_default();
        // `date | author | ...`
        let author = post
            .select(&post_author)
            .next()
            .and_then(|e| {
                e.text()
                    .collect::<String>()
                    .split('|')
                    .nth(1)
                    .map(clean)
            })
            .unwrap_or_default();
        let content = post
            .select(&post_content)
            .next()
            .map(|e| e.inner_html())
            .unwrap_or_default();

        let mut handle = page_url.clone();
        handle.set_fragment(Some(anchor));
        posts.push(
            RemoteNode::file(
                RemoteId::new(format!("post_{}", anchor)),
                format!("{}_{}_{}.html", anchor, author, title),
                FileMeta::inline(handle.as_str(), content),
            )
            .with_parent(parent.clone()),
        );
    }

    let next_page = dom
        .select(&table)
        .next()
        .and_then(|t| t.select(&pager_link).last())
        .filter(|a| a.text().collect::<String>().trim() == ">>")
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| page_url.join(href).ok());

    ThreadPage { posts, next_page }
}

fn clean(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('/', "-")
}
