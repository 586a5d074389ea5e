//! The uniform result envelope and the normalizer that produces it.

use crate::auth::AuthContext;
use crate::client::HttpResult;
use crate::error::{PassthroughError, Result};
use crate::safety::redact_secrets;
use base64::Engine as _;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Synthetic status for outcomes where no HTTP response was obtained.
pub const NO_RESPONSE_STATUS: u16 = 599;

const EXCERPT_CHARS: usize = 300;

/// Closed error taxonomy carried in envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    AuthError,
    InvalidRequest,
    UpstreamError,
    TransportError,
    TimeoutError,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthError => "AuthError",
            Self::InvalidRequest => "InvalidRequest",
            Self::UpstreamError => "UpstreamError",
            Self::TransportError => "TransportError",
            Self::TimeoutError => "TimeoutError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// What every tool call returns: either a body or an error, always with a status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub ok: bool,
    pub status: u16,
    pub body: Option<Value>,
    pub error: Option<EnvelopeError>,
}

impl ResultEnvelope {
    #[must_use]
    pub fn success(status: u16, body: Option<Value>) -> Self {
        Self {
            ok: true,
            status,
            body,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(status: u16, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            status,
            body: None,
            error: Some(EnvelopeError {
                kind,
                message: message.into(),
            }),
        }
    }

    #[must_use]
    pub fn unauthorized() -> Self {
        Self::failure(
            StatusCode::UNAUTHORIZED.as_u16(),
            ErrorKind::AuthError,
            "missing or invalid client credential",
        )
    }

    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::failure(
            StatusCode::BAD_REQUEST.as_u16(),
            ErrorKind::InvalidRequest,
            message,
        )
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Convert a gateway-side error into an envelope.
#[must_use]
pub fn from_error(err: &PassthroughError, auth: &AuthContext<'_>) -> ResultEnvelope {
    let secrets = auth.secrets();
    match err {
        PassthroughError::InvalidRequest(msg) => {
            ResultEnvelope::invalid_request(redact_secrets(msg, &secrets))
        }
        PassthroughError::Timeout(msg) => ResultEnvelope::failure(
            NO_RESPONSE_STATUS,
            ErrorKind::TimeoutError,
            redact_secrets(msg, &secrets),
        ),
        PassthroughError::Transport(msg) => ResultEnvelope::failure(
            NO_RESPONSE_STATUS,
            ErrorKind::TransportError,
            redact_secrets(msg, &secrets),
        ),
        PassthroughError::Config(msg) => ResultEnvelope::failure(
            NO_RESPONSE_STATUS,
            ErrorKind::TransportError,
            format!("gateway misconfiguration: {}", redact_secrets(msg, &secrets)),
        ),
    }
}

/// Normalize an upstream outcome into an envelope.
///
/// 2xx bodies are parsed as JSON, falling back to text (or base64 for binary) and to `null` for
/// empty bodies. Non-2xx responses become `UpstreamError` with a message derived from the body.
#[must_use]
pub fn normalize(outcome: Result<HttpResult>, auth: &AuthContext<'_>) -> ResultEnvelope {
    let response = match outcome {
        Ok(response) => response,
        Err(err) => return from_error(&err, auth),
    };
    let status = response.status.as_u16();

    if response.status.is_success() {
        let content_type = response
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let body = parse_body(&response.body, content_type).map(|body| match body {
            Value::String(s) => Value::String(redact_secrets(&s, &auth.secrets())),
            other => other,
        });
        return ResultEnvelope::success(status, body);
    }

    let message = redact_secrets(
        &error_message(response.status, &response.body),
        &auth.secrets(),
    );
    ResultEnvelope::failure(status, ErrorKind::UpstreamError, message)
}

fn parse_body(bytes: &[u8], content_type: Option<&str>) -> Option<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    if let Ok(v) = serde_json::from_slice::<Value>(bytes) {
        return Some(v);
    }
    Some(bytes_to_text_or_base64_json(bytes, content_type))
}

fn bytes_to_text_or_base64_json(bytes: &[u8], content_type: Option<&str>) -> Value {
    if let Ok(s) = std::str::from_utf8(bytes) {
        Value::String(s.to_string())
    } else {
        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        json!({
            "encoding": "base64",
            "mimeType": content_type,
            "data": b64
        })
    }
}

fn status_label(status: StatusCode) -> String {
    let label = match status.as_u16() {
        400 => "Bad request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not found",
        409 => "Conflict",
        422 => "Invalid parameter",
        429 => "Rate limited",
        500 => "Server error",
        code => return format!("HTTP {code}"),
    };
    label.to_string()
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    let label = status_label(status);
    let detail = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(obj)) => ["message", "description"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(str::to_string),
        _ => excerpt(body),
    };
    match detail.filter(|d| !d.is_empty()) {
        Some(detail) => format!("{label}: {detail}"),
        None => label,
    }
}

fn excerpt(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        out.push_str("...");
    }
    Some(out)
}
