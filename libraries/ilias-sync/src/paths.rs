//! Relative paths inside the sync root.
//!
//! Paths are kept as `/`-separated strings relative to the output directory
//! so the manifest reads the same on every platform.

use std::path::{Path, PathBuf};

/// Names starting with this belong to the mirror itself (manifest,
/// partial downloads); remote objects never get one.
pub const RESERVED_PREFIX: &str = ".ilias-";

/// Make a remote display name usable as a single path component.
///
/// Falls back to `fallback` (the remote id) when nothing usable is left.
/// Names in the mirror's reserved namespace get a leading `_`.
pub fn sanitize_name(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            // Invalid on Windows: < > : " / \ | ? *
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    // Windows also refuses trailing dots and spaces
    let cleaned = cleaned
        .trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        sanitize_fallback(fallback)
    } else if is_reserved(&cleaned) {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}

fn is_reserved(name: &str) -> bool {
    name.get(..RESERVED_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(RESERVED_PREFIX))
}

fn sanitize_fallback(fallback: &str) -> String {
    let cleaned: String = fallback
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// `"Skript.pdf"` -> `"Skript (42).pdf"`; names without extension get the
/// suffix at the end. Ids that are URLs are flattened first.
pub fn with_id_suffix(name: &str, id: &str) -> String {
    let id = sanitize_fallback(id);
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({}){}", &name[..dot], id, &name[dot..]),
        _ => format!("{} ({})", name, id),
    }
}

/// Join a relative parent path and a sanitized name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Whether `path` equals `dir` or lies below it.
pub fn is_within(path: &str, dir: &str) -> bool {
    dir.is_empty()
        || path == dir
        || (path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/')
}

/// Directory part of a relative path (`""` for top-level entries).
pub fn parent(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

/// Resolve a relative path against the output directory.
pub fn to_fs(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|c| !c.is_empty())
        .fold(root.to_path_buf(), |acc, component| acc.join(component))
}
