//! Base-URL normalization for session registry keys.
//!
//! An absolute `http(s)` URL is reduced to its serialized origin plus its
//! path without a trailing slash. Scheme and host casing and default ports
//! are normalized by URL parsing. A URL naming the host page's own origin
//! collapses to the empty key, which means "same origin as the host page"
//! and uses cookie sessions against the page's application path.

use reqwest::Url;

/// Registry key of the session serving the host page's own origin.
pub const LOCAL_KEY: &str = "";

/// Normalize `url` into a registry key relative to `page_origin`.
#[must_use]
pub fn session_key(url: &str, page_origin: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return LOCAL_KEY.to_owned();
    }

    let Some(key) = absolute_key(trimmed) else {
        return trimmed.trim_end_matches('/').to_owned();
    };

    match absolute_key(page_origin) {
        Some(page) if page == key => LOCAL_KEY.to_owned(),
        _ => key,
    }
}

/// Resolve the base URL a session talks to. The local key resolves to the
/// page origin joined with the configured application path.
#[must_use]
pub fn base_url_for(key: &str, page_origin: &str, application_path: &str) -> String {
    if key != LOCAL_KEY {
        return key.to_owned();
    }
    let origin = absolute_key(page_origin).unwrap_or_else(|| page_origin.trim_end_matches('/').to_owned());
    let path = application_path.trim_end_matches('/');
    format!("{origin}{path}")
}

fn absolute_key(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    let origin = url.origin().ascii_serialization();
    let path = url.path().trim_end_matches('/');
    Some(format!("{origin}{path}"))
}

#[cfg(test)]
#[path = "origin_test.rs"]
mod tests;
