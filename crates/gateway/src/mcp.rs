//! MCP server surface: `tools/list` and `tools/call` backed by the passthrough [`Gateway`].
//!
//! Served over streamable HTTP at `/mcp` (credential taken from each request's headers) or over
//! stdio (the process owner is trusted and the configured client key is used).

use crate::http::extract_api_key_secret;
use axum::http::request::Parts;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::{StreamableHttpServerConfig, StreamableHttpService};
use rmcp::{ErrorData, RoleServer, ServerHandler};
use secrecy::{ExposeSecret as _, SecretString};
use serde_json::{Map, Value};
use siem_passthrough::{Gateway, ResultEnvelope};
use std::sync::Arc;
use tracing::warn;

const INSTRUCTIONS: &str = "Passthrough to the SIEM console REST API. Use siem_discover to find \
endpoints and their parameters, then siem_request to call them.";

enum CredentialSource {
    /// `Authorization: Bearer` or `X-Api-Key` on the HTTP request carrying the message.
    RequestHeaders,
    /// Fixed credential for transports without per-request headers.
    Trusted(SecretString),
}

#[derive(Clone)]
pub struct SiemMcpServer {
    gateway: Arc<Gateway>,
    credential: Arc<CredentialSource>,
}

impl SiemMcpServer {
    /// Server for streamable HTTP, authenticating every request from its headers.
    #[must_use]
    pub fn http(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            credential: Arc::new(CredentialSource::RequestHeaders),
        }
    }

    /// Server for stdio, presenting `credential` on behalf of the local client.
    #[must_use]
    pub fn trusted(gateway: Arc<Gateway>, credential: SecretString) -> Self {
        Self {
            gateway,
            credential: Arc::new(CredentialSource::Trusted(credential)),
        }
    }

    fn credential(&self, context: &RequestContext<RoleServer>) -> Option<String> {
        match &*self.credential {
            CredentialSource::Trusted(secret) => Some(secret.expose_secret().to_string()),
            CredentialSource::RequestHeaders => context
                .extensions
                .get::<Parts>()
                .and_then(|parts| extract_api_key_secret(&parts.headers)),
        }
    }
}

/// Stateless streamable-HTTP service for mounting at `/mcp`.
pub fn streamable_http_service(
    gateway: Arc<Gateway>,
) -> StreamableHttpService<SiemMcpServer, LocalSessionManager> {
    let config = StreamableHttpServerConfig {
        stateful_mode: false,
        ..StreamableHttpServerConfig::default()
    };
    StreamableHttpService::new(
        move || Ok(SiemMcpServer::http(gateway.clone())),
        Arc::new(LocalSessionManager::default()),
        config,
    )
}

impl ServerHandler for SiemMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Implementation::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
            ..ServerInfo::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let credential = self.credential(&context);
        if !self.gateway.is_authorized(credential.as_deref()) {
            warn!("rejected MCP tool listing: missing or invalid client credential");
            return Err(ErrorData::invalid_request(
                "missing or invalid client credential",
                None,
            ));
        }
        Ok(ListToolsResult::with_all_items(self.gateway.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let credential = self.credential(&context);
        let arguments = Value::Object(request.arguments.unwrap_or_else(Map::new));
        let envelope = self
            .gateway
            .call_tool(&request.name, arguments, credential.as_deref())
            .await;
        envelope_result(&envelope)
    }
}

/// The envelope as structured tool output, flagged as an error when `ok` is false.
fn envelope_result(envelope: &ResultEnvelope) -> Result<CallToolResult, ErrorData> {
    let value = serde_json::to_value(envelope)
        .map_err(|e| ErrorData::internal_error(format!("encode result: {e}"), None))?;
    Ok(if envelope.ok {
        CallToolResult::structured(value)
    } else {
        CallToolResult::structured_error(value)
    })
}
