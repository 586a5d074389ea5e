//! Inbound HTTP surface.
//!
//! - `GET /health`: public liveness check.
//! - `GET /tools`: tool descriptors (authenticated).
//! - `POST /tools/call`: `{"name", "arguments"}` → result envelope (authenticated).
//! - `/mcp`: MCP over streamable HTTP, see [`crate::mcp`].

use crate::mcp;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use siem_passthrough::{ErrorKind, Gateway, ResultEnvelope};
use std::sync::Arc;
use tracing::{Instrument as _, info_span, warn};
use uuid::Uuid;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CallRequest {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/call", post(call_tool))
        .route_service("/mcp", mcp::streamable_http_service(gateway.clone()))
        .with_state(AppState { gateway })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "tools": state.gateway.tools().len(),
        "tlsVerification": state.gateway.client().config().verify_tls,
    }))
}

async fn list_tools(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let credential = extract_api_key_secret(&headers);
    if !state.gateway.is_authorized(credential.as_deref()) {
        warn!("rejected tool listing: missing or invalid client credential");
        return envelope_response(&ResultEnvelope::unauthorized(), None);
    }
    Json(json!({ "tools": state.gateway.tools() })).into_response()
}

async fn call_tool(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("http_request", request_id = %request_id);
    async move {
        let credential = extract_api_key_secret(&headers);
        // Authenticate before looking at the body so unauthenticated callers learn nothing.
        if !state.gateway.is_authorized(credential.as_deref()) {
            warn!("rejected tool call: missing or invalid client credential");
            return envelope_response(&ResultEnvelope::unauthorized(), Some(request_id));
        }

        let req: CallRequest = match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => {
                let env = ResultEnvelope::invalid_request(format!("invalid tool call body: {e}"));
                return envelope_response(&env, Some(request_id));
            }
        };

        // Dropping this future (caller disconnect) cancels the upstream request.
        let env = state
            .gateway
            .call_tool(&req.name, req.arguments, credential.as_deref())
            .await;
        envelope_response(&env, Some(request_id))
    }
    .instrument(span)
    .await
}

fn envelope_response(env: &ResultEnvelope, request_id: Option<Uuid>) -> Response {
    let status = match env.error_kind() {
        Some(ErrorKind::AuthError) => StatusCode::UNAUTHORIZED,
        Some(ErrorKind::InvalidRequest) => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    let mut response = (status, Json(env)).into_response();
    if let Some(id) = request_id
        && let Ok(value) = HeaderValue::from_str(&id.to_string())
    {
        response.headers_mut().insert(REQUEST_ID, value);
    }
    response
}

pub(crate) fn extract_api_key_secret(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers.get("x-api-key").and_then(|h| h.to_str().ok()) {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    let authz = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    let token = authz.strip_prefix("Bearer ").map(str::trim)?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}
