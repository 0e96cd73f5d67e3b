//! Course content tree.
//!
//! Besides its object list a course offers an explorer tree that can show
//! items the course page hides behind page layouts. The tree is only
//! served once the session is switched to tree mode.

use super::{classify_link, join, link_text, FileProperties, PageContext};
use ilias_core::{RemoteNode, SourceError};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

lazy_static! {
    static ref CMD_NODE: Regex = Regex::new(r"cmdNode=(uf:\w\w)").expect("valid regex");
    static ref TREE_LINK: Selector = Selector::parse("a[href]").expect("valid selector");
}

/// Request that switches the session's repository view to tree mode.
pub fn tree_mode_url(base: &Url) -> Result<Url, SourceError> {
    join(
        base,
        "ilias.php?baseClass=ilRepositoryGUI&cmd=frameset&set_mode=tree&ref_id=1",
    )
}

/// Control node of the course GUI, as named in the course page's links.
pub fn course_cmd_node(html: &str) -> Option<String> {
    CMD_NODE.captures(html).map(|caps| caps[1].to_string())
}

/// Asynchronous tree fragment below the course with `ref_id`.
pub fn tree_url(base: &Url, ref_id: &str, cmd_node: &str) -> Result<Url, SourceError> {
    join(
        base,
        &format!(
            "ilias.php?ref_id={ref}&cmdClass=ilobjcoursegui&cmd=showRepTree&cmdNode={node}&baseClass=ilRepositoryGUI&cmdMode=asynch&exp_cmd=getNodeAsync&node_id=exp_node_rep_exp_{ref}&exp_cont=il_expl2_jstree_cont_rep_exp&searchterm=",
            ref = ref_id,
            node = cmd_node
        ),
    )
}

/// Items named in a tree fragment.
///
/// The tree shows no file properties, so files carry bare metadata.
pub fn tree_items(html: &str, ctx: &PageContext<'_>) -> Vec<RemoteNode> {
    let fragment = Html::parse_fragment(html);
    let props = FileProperties::default();

    fragment
        .select(&TREE_LINK)
        .filter_map(|link| {
            let href = link.value().attr("href").filter(|h| !h.is_empty())?;
            ctx.node(classify_link(href, ctx.base), link_text(link), &props)
        })
        .collect()
}
