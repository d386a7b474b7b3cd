//! Document formatting and content-type defaults

/// Content type applied when a committed response carries none.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain;charset=utf-8";

pub fn is_html(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|t| t.trim().eq_ignore_ascii_case("text/html"))
        .unwrap_or(false)
}

/// Normalize a materialized HTML document: guarantee a doctype and a single
/// trailing newline. Streaming bodies never pass through here.
pub fn normalize_document(document: &str) -> String {
    let mut out = String::with_capacity(document.len() + 16);
    if !document.trim_start().get(..9).map_or(false, |head| {
        head.eq_ignore_ascii_case("<!doctype")
    }) {
        out.push_str("<!DOCTYPE html>\n");
    }
    out.push_str(document.trim_end());
    out.push('\n');
    out
}
