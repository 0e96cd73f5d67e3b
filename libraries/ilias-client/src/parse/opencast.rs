//! Opencast video series.
//!
//! A series object lists its recordings in an event table that is loaded
//! asynchronously; each recording links to a player page whose inline
//! script names the MP4 stream.

use super::join;
use ilias_core::{FileMeta, RemoteId, RemoteNode, Retrieval, SourceError};
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

/// Rows requested from the event table in one page
pub const TABLE_LIMIT: usize = 500;

lazy_static! {
    static ref ROW: Selector = Selector::parse("tr").expect("valid selector");
    static ref CELL: Selector = Selector::parse("td").expect("valid selector");
    static ref PLAYER_LINK: Selector = Selector::parse(r#"a[target="_blank"]"#).expect("valid selector");
    static ref PLAYER_INIT: Regex =
        Regex::new(r"(?m)<script>\s+xoctPaellaPlayer\.init\(([\s\S]+)\)\s+</script>").expect("valid regex");
}

/// Event table of the series with `ref_id`.
pub fn series_table_url(base: &Url, ref_id: &str) -> Result<Url, SourceError> {
    join(
        base,
        &format!(
            "ilias.php?ref_id={}&cmdClass=xocteventgui&cmdNode=n7:mz:14p&baseClass=ilObjPluginDispatchGUI&lang=de&limit={}&cmd=asyncGetTableGUI&cmdMode=asynch",
            ref_id, TABLE_LIMIT
        ),
    )
}

/// Recordings in an event table, one `.mp4` file each.
///
/// The player URL is the recording's identity; rows whose title cell holds
/// markup instead of text are still being processed and are skipped.
pub fn series_videos(html: &str, base: &Url, parent: &RemoteId) -> Vec<RemoteNode> {
    let fragment = Html::parse_fragment(html);
    let mut videos = Vec::new();

    for row in fragment.select(&ROW) {
        let Some(href) = row
            .select(&PLAYER_LINK)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            continue;
        };
        let Some(title_cell) = row.select(&CELL).nth(2) else {
            continue;
        };
        if title_cell.inner_html().trim_start().starts_with("<div") {
            continue;
        }
        let title = title_cell
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let Ok(player) = base.join(href) else {
            continue;
        };
        if title.is_empty() {
            continue;
        }

        let meta = FileMeta::new(player.as_str()).with_retrieval(Retrieval::MediaPage);
        videos.push(
            RemoteNode::file(
                RemoteId::new(player.as_str()),
                format!("{}.mp4", title.replace('/', "-")),
                meta,
            )
            .with_parent(parent.clone()),
        );
    }

    videos
}

/// The MP4 source named by a player page.
pub fn player_media_url(html: &str) -> Result<String, SourceError> {
    let caps = PLAYER_INIT
        .captures(html)
        .ok_or_else(|| SourceError::parse("player page has no player configuration"))?;
    let config = caps[1].split(",\n").next().unwrap_or_default();
    let value: serde_json::Value = serde_json::from_str(config)
        .map_err(|e| SourceError::parse(format!("invalid player configuration: {}", e)))?;
    value["streams"][0]["sources"]["mp4"][0]["src"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SourceError::parse("player configuration names no mp4 stream"))
}
