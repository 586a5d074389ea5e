//! Authenticated request-forwarding core for the SIEM MCP gateway.
//!
//! A tool call flows through [`Gateway`]: the client credential is validated, the generic
//! [`ToolCall`] is mapped onto a request below the configured console base URL, the service
//! token is injected by the [`UpstreamClient`] (with retries, backoff and a concurrency bound),
//! and the outcome is normalized into a [`ResultEnvelope`].
//!
//! This crate has no process or inbound-HTTP concerns; see `siem-mcp-gateway` for those.

pub mod auth;
pub mod backoff;
pub mod client;
pub mod config;
pub mod discovery;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod mapper;
pub mod safety;
pub mod semantics;
pub mod tool;

pub use auth::{AuthContext, CredentialValidator, ServiceToken};
pub use backoff::{BackoffPolicy, Clock, TokioClock};
pub use client::{HttpResult, UpstreamClient};
pub use config::UpstreamConfig;
pub use dispatcher::Gateway;
pub use envelope::{EnvelopeError, ErrorKind, ResultEnvelope};
pub use error::{PassthroughError, Result};
pub use mapper::{UpstreamRequest, map_request};
pub use tool::{DISCOVER_TOOL, HttpMethod, REQUEST_TOOL, ToolCall};
