//! The tool surface exposed to callers: one generic passthrough tool plus a read-only
//! discovery helper.

use crate::discovery::DiscoverQuery;
use crate::error::{PassthroughError, Result};
use crate::semantics::annotations_for_methods;
use rmcp::model::{JsonObject, Tool};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Name of the generic passthrough tool.
pub const REQUEST_TOOL: &str = "siem_request";

/// Name of the endpoint discovery tool.
pub const DISCOVER_TOOL: &str = "siem_discover";

/// HTTP methods the passthrough tool accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub const ALL: [Self; 4] = [Self::Get, Self::Post, Self::Put, Self::Delete];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether `params` travel in a JSON body (POST/PUT) rather than the query string.
    #[must_use]
    pub const fn carries_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }

    #[must_use]
    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = PassthroughError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            other => Err(PassthroughError::invalid(format!(
                "unsupported method '{other}' (expected GET, POST, PUT or DELETE)"
            ))),
        }
    }
}

/// A generic request against one upstream resource.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolCall {
    /// Resource path relative to the configured base URL.
    pub endpoint: String,
    pub method: HttpMethod,
    /// Query parameters (GET/DELETE, or POST/PUT with an explicit `body`) or JSON body fields.
    pub params: BTreeMap<String, String>,
    /// Explicit JSON body for POST/PUT.
    pub body: Option<Value>,
    /// Pagination window `"<start>-<end>"`, sent as `Range: items=<start>-<end>`.
    pub range: Option<String>,
}

impl ToolCall {
    #[must_use]
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Parse `siem_request` arguments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if arguments are not an object, contain unknown fields, carry an
    /// unsupported method, or have non-scalar `params` values.
    pub fn from_arguments(arguments: Value) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RawToolCall {
            endpoint: String,
            #[serde(default)]
            method: Option<String>,
            #[serde(default)]
            params: Option<Map<String, Value>>,
            #[serde(default)]
            body: Option<Value>,
            #[serde(default)]
            range: Option<String>,
        }

        let raw: RawToolCall = serde_json::from_value(arguments)
            .map_err(|e| PassthroughError::invalid(format!("invalid arguments: {e}")))?;

        let method = match raw.method.as_deref().map(str::trim) {
            None | Some("") => HttpMethod::Get,
            Some(m) => m.parse()?,
        };

        let mut params = BTreeMap::new();
        for (key, value) in raw.params.unwrap_or_default() {
            let value = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(PassthroughError::invalid(format!(
                        "param '{key}' must be a string, number or boolean"
                    )));
                }
            };
            params.insert(key, value);
        }

        Ok(Self {
            endpoint: raw.endpoint,
            method,
            params,
            body: raw.body.filter(|b| !b.is_null()),
            range: raw.range.filter(|r| !r.trim().is_empty()),
        })
    }
}

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    Request(ToolCall),
    Discover(DiscoverQuery),
}

impl ToolInvocation {
    /// # Errors
    ///
    /// Returns `InvalidRequest` for unknown tool names or malformed arguments.
    pub fn parse(name: &str, arguments: Value) -> Result<Self> {
        match name {
            REQUEST_TOOL => ToolCall::from_arguments(arguments).map(Self::Request),
            DISCOVER_TOOL => DiscoverQuery::from_arguments(arguments).map(Self::Discover),
            other => Err(PassthroughError::invalid(format!("unknown tool: {other}"))),
        }
    }
}

/// MCP descriptors for every tool the gateway exposes.
#[must_use]
pub fn tool_descriptors() -> Vec<Tool> {
    vec![request_tool(), discover_tool()]
}

fn request_tool() -> Tool {
    let schema = json!({
        "type": "object",
        "properties": {
            "endpoint": {
                "type": "string",
                "description": "API path relative to the console API root, e.g. /siem/offenses or /siem/offenses/123"
            },
            "method": {
                "type": "string",
                "enum": ["GET", "POST", "PUT", "DELETE"],
                "default": "GET"
            },
            "params": {
                "type": "object",
                "additionalProperties": {"type": ["string", "number", "boolean"]},
                "description": "Query parameters for GET/DELETE (e.g. filter, fields); JSON body fields for POST/PUT unless `body` is given"
            },
            "body": {
                "description": "Explicit JSON request body for POST/PUT; `params` then become query parameters"
            },
            "range": {
                "type": "string",
                "pattern": "^[0-9]+-[0-9]+$",
                "description": "Pagination window, e.g. 0-49"
            }
        },
        "required": ["endpoint"],
        "additionalProperties": false
    });
    let mut tool = Tool::new(
        REQUEST_TOOL,
        "Call the SIEM console REST API. Examples: endpoint=\"/siem/offenses\" with params {\"filter\": \"status=OPEN\"}; endpoint=\"/ariel/searches\", method=\"POST\", params {\"query_expression\": \"...\"}.",
        Arc::new(schema_object(schema)),
    );
    tool.annotations = Some(annotations_for_methods(&HttpMethod::ALL));
    tool
}

fn discover_tool() -> Tool {
    let schema = json!({
        "type": "object",
        "properties": {
            "search": {
                "type": "string",
                "description": "Text matched against endpoint paths and summaries, e.g. offenses or reference_data/sets"
            },
            "method": {
                "type": "string",
                "enum": ["GET", "POST", "PUT", "DELETE", "PATCH"]
            },
            "limit": {
                "type": "integer",
                "minimum": 1,
                "maximum": crate::discovery::MAX_LIMIT,
                "default": crate::discovery::DEFAULT_LIMIT
            }
        },
        "required": ["search"],
        "additionalProperties": false
    });
    let mut tool = Tool::new(
        DISCOVER_TOOL,
        "Find console API endpoints and their parameters. Use the exact paths returned with siem_request.",
        Arc::new(schema_object(schema)),
    );
    tool.annotations = Some(annotations_for_methods(&[HttpMethod::Get]));
    tool
}

fn schema_object(schema: Value) -> JsonObject {
    schema.as_object().cloned().unwrap_or_else(JsonObject::new)
}
