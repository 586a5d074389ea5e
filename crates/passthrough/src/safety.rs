//! Outbound safety controls: endpoint path confinement and redaction.
//!
//! The caller-controlled `endpoint` is never concatenated onto the base URL. It is split,
//! percent-decoded and normalized into path segments here, and the final URL is checked to
//! still live under the configured base (same origin, base path prefix).

use crate::error::{PassthroughError, Result};
use percent_encoding::percent_decode_str;
use url::Url;

const REDACTED: &str = "[REDACTED]";

/// Normalize a caller-supplied endpoint into path segments relative to the base URL.
///
/// `.` segments are dropped and `..` pops the previous segment; popping past the base is an
/// error. Returned segments are percent-decoded (the URL builder re-encodes them).
///
/// # Errors
///
/// Returns `InvalidRequest` for empty endpoints, absolute/scheme-relative URLs, query or
/// fragment markers, backslashes, control characters, invalid percent-encoding, or paths that
/// escape the base.
pub fn normalize_endpoint(endpoint: &str) -> Result<Vec<String>> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(PassthroughError::invalid("endpoint is required"));
    }
    if endpoint.contains("://") || endpoint.starts_with("//") {
        return Err(PassthroughError::invalid(
            "endpoint must be a path relative to the configured base URL, not an absolute URL",
        ));
    }
    if let Some(c) = endpoint
        .chars()
        .find(|c| matches!(c, '?' | '#' | '\\') || c.is_control())
    {
        return Err(PassthroughError::invalid(format!(
            "endpoint contains a disallowed character {c:?}; pass query values via params"
        )));
    }

    let mut segments: Vec<String> = Vec::new();
    for raw in endpoint.split('/') {
        let decoded = percent_decode_str(raw).decode_utf8().map_err(|_| {
            PassthroughError::invalid("endpoint contains invalid percent-encoding")
        })?;

        match decoded.as_ref() {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(PassthroughError::invalid(
                        "endpoint escapes the configured base URL",
                    ));
                }
            }
            seg => {
                // Encoded separators survive as one segment, but must not smuggle traversal
                // for servers that decode them.
                if seg.contains('\\')
                    || seg.chars().any(char::is_control)
                    || seg.split('/').any(|p| p == "." || p == "..")
                {
                    return Err(PassthroughError::invalid(
                        "endpoint contains an encoded path traversal sequence",
                    ));
                }
                segments.push(seg.to_string());
            }
        }
    }

    if segments.is_empty() {
        return Err(PassthroughError::invalid(
            "endpoint must name a resource below the configured base URL",
        ));
    }
    Ok(segments)
}

/// Ensure `url` still points below `base` (same scheme, host and port; base path prefix).
///
/// # Errors
///
/// Returns `InvalidRequest` if the URL left the base.
pub fn ensure_within_base(url: &Url, base: &Url) -> Result<()> {
    let same_origin = url.scheme() == base.scheme()
        && url.host_str() == base.host_str()
        && url.port_or_known_default() == base.port_or_known_default();
    if !same_origin || !url.path().starts_with(base.path()) || url.path() == base.path() {
        return Err(PassthroughError::invalid(
            "endpoint resolves outside the configured base URL",
        ));
    }
    Ok(())
}

#[must_use]
pub fn redact_url(url: &Url) -> String {
    let mut u = url.clone();
    // Best-effort: drop credentials + query + fragment.
    let _ = u.set_username("");
    let _ = u.set_password(None);
    u.set_query(None);
    u.set_fragment(None);
    u.to_string()
}

#[must_use]
pub fn sanitize_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        msg = msg.replace(u.as_str(), &redact_url(u));
    }
    msg
}

/// Replace every occurrence of each (non-empty) secret in `msg`.
#[must_use]
pub fn redact_secrets(msg: &str, secrets: &[&str]) -> String {
    let mut out = msg.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        if out.contains(secret) {
            out = out.replace(secret, REDACTED);
        }
    }
    out
}
