//! Path helpers shared by the stores, the directory view and the resolver.
//!
//! Store paths are '/'-separated and rooted at the store's base. Listing
//! results may carry percent-encoded segments; comparisons go through
//! [`decode`] so that `A%20B/` and `A B/` name the same collection.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped inside one URL path segment
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^');

pub fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Percent-encode every segment of `path`, decoding first so already-encoded
/// input is not double-escaped
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(&decode(segment), SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Canonical form: leading '/', no empty segments, trailing '/' iff `is_dir`
pub fn normalize(path: &str, is_dir: bool) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(path.len() + 2);
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if is_dir {
        out.push('/');
    }
    out
}

/// Normalized directory form with percent-encoding removed, for equality checks
pub fn dir_key(path: &str) -> String {
    normalize(&decode(path), true)
}

/// Decoded, normalized form that ignores whether the path names a directory
pub fn entry_key(path: &str) -> String {
    normalize(&decode(path), false)
}

/// Join a directory and a relative path
pub fn join(dir: &str, relative: &str) -> String {
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

/// Containing directory of `path`, with a trailing '/'
pub fn parent_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => normalize(&trimmed[..idx], true),
        None => "/".to_string(),
    }
}

/// Decoded last segment of `path`
pub fn file_name(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    decode(last)
}

/// File name without its last extension; dot-files keep their name
pub fn base_name(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}
