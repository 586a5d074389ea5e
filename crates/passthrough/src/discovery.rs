//! Endpoint discovery over the console's `/help/endpoints` catalogue.
//!
//! Discovery is an ordinary GET routed through the same pipeline as any passthrough call; this
//! module only builds the query and reshapes the catalogue entries.

use crate::error::{PassthroughError, Result};
use crate::tool::{DISCOVER_TOOL, HttpMethod, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub const CATALOGUE_ENDPOINT: &str = "/help/endpoints";
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 50;

const DESCRIPTION_CHARS: usize = 150;
const SAMPLE_CHARS: usize = 500;
const WRITE_LOOKUP_LIMIT: u32 = 50;
const SIMILAR_SHOWN: usize = 3;

/// Catalogue methods accepted as a filter. PATCH exists in the catalogue even though the
/// passthrough tool cannot issue it.
const FILTER_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "PATCH"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverQuery {
    pub search: String,
    pub method: Option<String>,
    pub limit: u32,
}

impl DiscoverQuery {
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a missing search term, characters that would break out of
    /// the catalogue filter literal, an unknown method or an out-of-range limit.
    pub fn from_arguments(arguments: Value) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RawQuery {
            search: String,
            #[serde(default)]
            method: Option<String>,
            #[serde(default)]
            limit: Option<u32>,
        }

        let raw: RawQuery = serde_json::from_value(arguments)
            .map_err(|e| PassthroughError::invalid(format!("invalid arguments: {e}")))?;

        let search = raw.search.trim().to_string();
        if search.is_empty() {
            return Err(PassthroughError::invalid("search term is required"));
        }
        if !is_filter_literal_safe(&search) {
            return Err(PassthroughError::invalid(
                "search term must not contain quotes, backslashes or control characters",
            ));
        }

        let method = match raw.method.map(|m| m.trim().to_ascii_uppercase()) {
            None => None,
            Some(m) if m.is_empty() => None,
            Some(m) if FILTER_METHODS.contains(&m.as_str()) => Some(m),
            Some(m) => {
                return Err(PassthroughError::invalid(format!("unsupported method filter '{m}'")));
            }
        };

        let limit = raw.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(PassthroughError::invalid(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }

        Ok(Self {
            search,
            method,
            limit,
        })
    }

    /// The catalogue request for this query.
    #[must_use]
    pub fn to_tool_call(&self) -> ToolCall {
        let mut filter = format!(
            "(path ILIKE '%{s}%' OR summary ILIKE '%{s}%')",
            s = self.search
        );
        if let Some(method) = &self.method {
            filter.push_str(&format!(" AND http_method='{method}'"));
        }
        ToolCall {
            range: Some(format!("0-{}", self.limit - 1)),
            ..ToolCall::get(CATALOGUE_ENDPOINT).with_param("filter", filter)
        }
    }
}

/// Coarse operation label derived from method and path shape.
#[must_use]
pub fn categorize_endpoint(http_method: &str, path: &str) -> String {
    let has_path_param = path.contains('{');
    match http_method {
        "POST" if has_path_param => "UPDATE/ACTION",
        "POST" => "CREATE",
        "GET" if has_path_param => "GET_ONE",
        "GET" => "LIST",
        "DELETE" => "DELETE",
        "PUT" | "PATCH" => "UPDATE",
        other => return other.to_string(),
    }
    .to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParamInfo {
    pub name: Option<String>,
    pub required: bool,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointParams {
    pub query: Vec<ParamInfo>,
    pub path: Vec<ParamInfo>,
    pub body: Vec<ParamInfo>,
    pub header: Vec<ParamInfo>,
}

/// Split catalogue parameters by location, truncating descriptions and body samples.
#[must_use]
pub fn parse_parameters(parameters: &[Value]) -> EndpointParams {
    let mut out = EndpointParams::default();
    for p in parameters {
        let mut info = ParamInfo {
            name: p
                .get("parameter_name")
                .and_then(Value::as_str)
                .map(str::to_string),
            required: p.get("required").and_then(Value::as_bool).unwrap_or(false),
            description: truncate_chars(
                p.get("description").and_then(Value::as_str).unwrap_or(""),
                DESCRIPTION_CHARS,
            ),
            sample: None,
        };
        match p.get("type").and_then(Value::as_str).unwrap_or("") {
            "QUERY" => out.query.push(info),
            "PATH" => out.path.push(info),
            "BODY" => {
                info.sample = p
                    .get("mime_types")
                    .and_then(Value::as_array)
                    .and_then(|m| m.first())
                    .and_then(|m| m.get("sample"))
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(|s| truncate_chars(s, SAMPLE_CHARS));
                out.body.push(info);
            }
            "HEADER" => out.header.push(info),
            _ => {}
        }
    }
    out
}

/// Reshape one raw catalogue entry for callers.
#[must_use]
pub fn format_endpoint(raw: &Value) -> Value {
    let path = raw.get("path").and_then(Value::as_str).unwrap_or("");
    let method = raw.get("http_method").and_then(Value::as_str).unwrap_or("");
    let params = parse_parameters(
        raw.get("parameters")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
    );

    let mut out = Map::new();
    out.insert("method".into(), json!(method));
    out.insert("path".into(), json!(path));
    out.insert("operation".into(), json!(categorize_endpoint(method, path)));
    out.insert(
        "summary".into(),
        raw.get("summary").cloned().unwrap_or_else(|| json!("")),
    );
    out.insert(
        "deprecated".into(),
        json!(raw.get("deprecated").and_then(Value::as_bool).unwrap_or(false)),
    );
    for (key, list) in [
        ("queryParams", &params.query),
        ("pathParams", &params.path),
        ("bodyParams", &params.body),
        ("headerParams", &params.header),
    ] {
        if !list.is_empty() {
            out.insert(key.into(), json!(list));
        }
    }

    let mut usage = format!("method=\"{method}\", endpoint=\"{path}\"");
    if let Some(name) = params
        .query
        .iter()
        .find(|p| p.required)
        .and_then(|p| p.name.as_deref())
    {
        usage.push_str(&format!(", params={{\"{name}\": \"...\"}}"));
    }
    if params.body.first().is_some_and(|p| p.required) {
        usage.push_str(", body={...}");
    }
    out.insert("usageExample".into(), json!(usage));

    Value::Object(out)
}

/// Reshape a successful catalogue response into `{"count", "endpoints"}`.
#[must_use]
pub fn summarize(catalogue: &Value) -> Value {
    let endpoints: Vec<Value> = catalogue
        .as_array()
        .map(|entries| entries.iter().map(format_endpoint).collect())
        .unwrap_or_default();
    json!({
        "count": endpoints.len(),
        "endpoints": endpoints,
    })
}

/// Whether `actual` matches a catalogue `pattern` with `{param}` placeholders.
#[must_use]
pub fn paths_match(pattern: &str, actual: &str) -> bool {
    let pattern: Vec<&str> = pattern.trim_end_matches('/').split('/').collect();
    let actual: Vec<&str> = actual.trim_end_matches('/').split('/').collect();
    pattern.len() == actual.len()
        && pattern
            .iter()
            .zip(&actual)
            .all(|(p, a)| (p.starts_with('{') && p.ends_with('}')) || p == a)
}

/// Catalogue request listing every `method` endpoint under the first two segments of a
/// normalized endpoint, for [`check_write`].
///
/// # Errors
///
/// Returns `InvalidRequest` if a segment cannot be embedded in a catalogue filter.
pub fn write_lookup(method: HttpMethod, segments: &[String]) -> Result<ToolCall> {
    let prefix = segments
        .iter()
        .take(2)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("/");
    if !is_filter_literal_safe(&prefix) {
        return Err(PassthroughError::invalid(
            "endpoint contains characters that cannot be checked against the catalogue",
        ));
    }
    Ok(ToolCall {
        range: Some(format!("0-{}", WRITE_LOOKUP_LIMIT - 1)),
        ..ToolCall::get(CATALOGUE_ENDPOINT).with_param(
            "filter",
            format!("path ILIKE '/{prefix}%' AND http_method='{method}'"),
        )
    })
}

/// Check a write against the catalogue entries returned for [`write_lookup`].
///
/// # Errors
///
/// Returns `InvalidRequest` naming similar endpoints when no entry matches `path`, or carrying
/// the body sample when the matched endpoint requires a body that `has_body` says is missing.
pub fn check_write(
    catalogue: &Value,
    method: HttpMethod,
    path: &str,
    has_body: bool,
) -> Result<()> {
    let entries = catalogue.as_array().map_or(&[][..], Vec::as_slice);
    let entry_path = |e: &Value| e.get("path").and_then(Value::as_str).unwrap_or("").to_string();

    let Some(entry) = entries.iter().find(|e| paths_match(&entry_path(e), path)) else {
        let similar: Vec<String> = entries
            .iter()
            .take(SIMILAR_SHOWN)
            .map(|e| format!("{method} {}", entry_path(e)))
            .collect();
        let hint = if similar.is_empty() {
            format!("use {DISCOVER_TOOL} to find valid endpoints")
        } else {
            format!("similar endpoints: {}", similar.join(", "))
        };
        return Err(PassthroughError::invalid(format!(
            "endpoint not found: {method} {path}; {hint}"
        )));
    };

    if has_body {
        return Ok(());
    }
    let params = parse_parameters(
        entry
            .get("parameters")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
    );
    match params.body.first() {
        Some(body) if body.required => {
            let mut msg = format!(
                "{method} {} requires a JSON request body; pass it in 'body', not 'params'",
                entry_path(entry)
            );
            if let Some(sample) = &body.sample {
                msg.push_str(&format!("; sample: {sample}"));
            }
            Err(PassthroughError::invalid(msg))
        }
        _ => Ok(()),
    }
}

/// Whether `s` can sit inside a single-quoted catalogue filter literal.
fn is_filter_literal_safe(s: &str) -> bool {
    !s.chars()
        .any(|c| matches!(c, '\'' | '"' | '\\') || c.is_control())
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_and_limits() {
        let q = DiscoverQuery::from_arguments(json!({"search": " offenses "})).expect("query");
        assert_eq!(q.search, "offenses");
        assert_eq!(q.method, None);
        assert_eq!(q.limit, DEFAULT_LIMIT);

        let args = json!({"search": "sets", "method": "patch", "limit": 50});
        let q = DiscoverQuery::from_arguments(args).expect("query");
        assert_eq!(q.method.as_deref(), Some("PATCH"));

        for bad in [
            json!({"search": ""}),
            json!({"search": "x", "limit": 0}),
            json!({"search": "x", "limit": 51}),
            json!({"search": "x", "method": "HEAD"}),
            json!({"search": "x' OR '1'='1"}),
            json!({"search": "x", "qradar_host": "evil"}),
        ] {
            assert!(DiscoverQuery::from_arguments(bad.clone()).is_err(), "{bad}");
        }
    }

    #[test]
    fn query_builds_catalogue_call() {
        let q = DiscoverQuery {
            search: "reference_data/sets".to_string(),
            method: Some("POST".to_string()),
            limit: 5,
        };
        let call = q.to_tool_call();
        assert_eq!(call.endpoint, CATALOGUE_ENDPOINT);
        assert_eq!(call.range.as_deref(), Some("0-4"));
        assert_eq!(
            call.params.get("filter").map(String::as_str),
            Some(
                "(path ILIKE '%reference_data/sets%' OR summary ILIKE '%reference_data/sets%') AND http_method='POST'"
            )
        );
    }

    #[test]
    fn categorizes_by_method_and_path_shape() {
        assert_eq!(categorize_endpoint("POST", "/siem/offenses"), "CREATE");
        assert_eq!(categorize_endpoint("POST", "/siem/offenses/{offense_id}"), "UPDATE/ACTION");
        assert_eq!(categorize_endpoint("GET", "/siem/offenses/{offense_id}"), "GET_ONE");
        assert_eq!(categorize_endpoint("GET", "/siem/offenses"), "LIST");
        assert_eq!(categorize_endpoint("DELETE", "/x/{id}"), "DELETE");
        assert_eq!(categorize_endpoint("PATCH", "/x/{id}"), "UPDATE");
        assert_eq!(categorize_endpoint("OPTIONS", "/x"), "OPTIONS");
    }

    #[test]
    fn formats_catalogue_entry() {
        let long = "d".repeat(400);
        let raw = json!({
            "path": "/reference_data/sets/{name}",
            "http_method": "POST",
            "summary": "Add a value",
            "parameters": [
                {"parameter_name": "name", "type": "PATH", "required": true, "description": "set"},
                {"parameter_name": "value", "type": "QUERY", "required": true, "description": long},
                {"parameter_name": "fields", "type": "QUERY", "required": false},
                {"parameter_name": "data", "type": "BODY", "required": true,
                 "mime_types": [{"sample": "s".repeat(900)}]}
            ]
        });
        let out = format_endpoint(&raw);
        assert_eq!(out["operation"], "UPDATE/ACTION");
        assert_eq!(out["deprecated"], false);
        assert_eq!(out["pathParams"][0]["name"], "name");
        assert_eq!(
            out["queryParams"][0]["description"].as_str().map(str::len),
            Some(DESCRIPTION_CHARS)
        );
        assert_eq!(
            out["bodyParams"][0]["sample"].as_str().map(str::len),
            Some(SAMPLE_CHARS)
        );
        assert!(out.get("headerParams").is_none());
        assert_eq!(
            out["usageExample"],
            "method=\"POST\", endpoint=\"/reference_data/sets/{name}\", params={\"value\": \"...\"}, body={...}"
        );
    }

    #[test]
    fn summarize_counts_entries_and_tolerates_non_arrays() {
        let body = summarize(&json!([{"path": "/a", "http_method": "GET"}]));
        assert_eq!(body["count"], 1);
        assert_eq!(body["endpoints"][0]["operation"], "LIST");

        let body = summarize(&json!({"unexpected": true}));
        assert_eq!(body["count"], 0);
    }

    #[test]
    fn template_paths_match_concrete_paths() {
        assert!(paths_match("/siem/offenses/{offense_id}", "/siem/offenses/42"));
        assert!(paths_match("/siem/offenses/", "/siem/offenses"));
        assert!(!paths_match("/siem/offenses/{offense_id}", "/siem/offenses"));
        assert!(!paths_match("/siem/offenses/{id}/notes", "/siem/offenses/42/close"));
    }

    fn catalogue() -> Value {
        json!([
            {"path": "/reference_data/sets", "http_method": "POST", "parameters": [
                {"parameter_name": "name", "type": "QUERY", "required": true}
            ]},
            {"path": "/reference_data/sets/{name}", "http_method": "POST", "parameters": [
                {"parameter_name": "value", "type": "QUERY", "required": true}
            ]},
            {"path": "/reference_data/sets/bulk_load/{name}", "http_method": "POST", "parameters": [
                {"parameter_name": "data", "type": "BODY", "required": true,
                 "mime_types": [{"sample": "[\"1.2.3.4\"]"}]}
            ]}
        ])
    }

    #[test]
    fn write_lookup_filters_on_the_leading_segments() {
        let segments = vec!["reference_data".to_string(), "sets".into(), "blocked".into()];
        let call = write_lookup(HttpMethod::Post, &segments).expect("lookup");
        assert_eq!(call.endpoint, CATALOGUE_ENDPOINT);
        assert_eq!(call.range.as_deref(), Some("0-49"));
        assert_eq!(
            call.params.get("filter").map(String::as_str),
            Some("path ILIKE '/reference_data/sets%' AND http_method='POST'")
        );

        let quoted = vec!["x' OR '1'='1".to_string()];
        assert!(write_lookup(HttpMethod::Put, &quoted).is_err());
    }

    #[test]
    fn writes_to_catalogued_endpoints_pass() {
        let cat = catalogue();
        assert!(check_write(&cat, HttpMethod::Post, "/reference_data/sets", false).is_ok());
        let named = "/reference_data/sets/blocked";
        assert!(check_write(&cat, HttpMethod::Post, named, false).is_ok());
        let bulk = "/reference_data/sets/bulk_load/blocked";
        assert!(check_write(&cat, HttpMethod::Post, bulk, true).is_ok());
    }

    #[test]
    fn unknown_write_endpoints_list_similar_ones() {
        let path = "/reference_data/sets/a/b/c";
        let err = check_write(&catalogue(), HttpMethod::Post, path, false)
            .expect_err("unknown endpoint");
        let msg = err.to_string();
        assert!(msg.contains("endpoint not found: POST /reference_data/sets/a/b/c"), "{msg}");
        assert!(msg.contains("similar endpoints: POST /reference_data/sets,"), "{msg}");

        let err = check_write(&json!([]), HttpMethod::Put, "/nothing/here", false)
            .expect_err("empty catalogue");
        assert!(err.to_string().contains("use siem_discover"), "{err}");
    }

    #[test]
    fn missing_required_body_is_reported_with_its_sample() {
        let err = check_write(
            &catalogue(),
            HttpMethod::Post,
            "/reference_data/sets/bulk_load/blocked",
            false,
        )
        .expect_err("body required");
        let msg = err.to_string();
        assert!(msg.contains("requires a JSON request body"), "{msg}");
        assert!(msg.contains("sample: [\"1.2.3.4\"]"), "{msg}");
    }
}
