//! Maps a generic [`ToolCall`] onto a concrete upstream HTTP request.
//!
//! The mapper never sees the service token; credentials are added by the upstream client.

use crate::config::UpstreamConfig;
use crate::error::{PassthroughError, Result};
use crate::safety::{ensure_within_base, normalize_endpoint};
use crate::tool::{HttpMethod, ToolCall};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RANGE};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use url::Url;

const VERSION_HEADER: HeaderName = HeaderName::from_static("version");
const JSON: &str = "application/json";

/// A fully resolved request toward the console, minus credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

/// Build the upstream request for `call`.
///
/// GET/DELETE send `params` as the query string. POST/PUT send `params` as a JSON object body,
/// unless an explicit `body` is given, in which case `params` go to the query string.
///
/// # Errors
///
/// Returns `InvalidRequest` when the endpoint is unsafe or resolves outside the base URL, when a
/// body is supplied for GET/DELETE, or when `range` is malformed.
pub fn map_request(call: &ToolCall, config: &UpstreamConfig) -> Result<UpstreamRequest> {
    let segments = normalize_endpoint(&call.endpoint)?;

    if call.body.is_some() && !call.method.carries_body() {
        return Err(PassthroughError::invalid(format!(
            "a request body is not allowed for {}",
            call.method
        )));
    }

    let base = config.base_url();
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| PassthroughError::Config("base URL cannot carry a path".to_string()))?
        .pop_if_empty()
        .extend(&segments);
    ensure_within_base(&url, base)?;

    let (query, body) = match (call.method.carries_body(), &call.body) {
        (false, _) => (Some(&call.params), None),
        (true, Some(explicit)) => (Some(&call.params), Some(explicit.clone())),
        (true, None) if call.params.is_empty() => (None, None),
        (true, None) => (None, Some(params_body(&call.params))),
    };
    if let Some(params) = query.filter(|p| !p.is_empty()) {
        url.set_query(Some(&build_query(params)));
    }

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(JSON));
    if let Some(version) = config.api_version.as_deref().filter(|v| !v.is_empty()) {
        let value = HeaderValue::from_str(version).map_err(|_| {
            PassthroughError::Config(format!("invalid API version header value '{version}'"))
        })?;
        headers.insert(VERSION_HEADER, value);
    }
    if body.is_some() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    }
    if let Some(range) = call.range.as_deref() {
        headers.insert(RANGE, range_header(range)?);
    }

    Ok(UpstreamRequest {
        method: call.method,
        url,
        headers,
        body,
    })
}

fn params_body(params: &BTreeMap<String, String>) -> Value {
    let fields: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(fields)
}

fn build_query(params: &BTreeMap<String, String>) -> String {
    let mut query = String::new();
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            query.push('&');
        }
        query.push_str(&encode_query_component(key));
        query.push('=');
        query.push_str(&encode_query_component(value));
    }
    query
}

/// Percent-encode everything but RFC 3986 unreserved bytes.
fn encode_query_component(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn is_unreserved(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~')
}

/// `"<start>-<end>"` → `items=<start>-<end>`.
fn range_header(range: &str) -> Result<HeaderValue> {
    let invalid = || {
        PassthroughError::invalid(format!(
            "range must look like '<start>-<end>' with start <= end, got '{range}'"
        ))
    };
    let (start, end) = range.trim().split_once('-').ok_or_else(invalid)?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(start) || !digits(end) {
        return Err(invalid());
    }
    let start: u64 = start.parse().map_err(|_| invalid())?;
    let end: u64 = end.parse().map_err(|_| invalid())?;
    if start > end {
        return Err(invalid());
    }
    HeaderValue::from_str(&format!("items={start}-{end}")).map_err(|_| invalid())
}
