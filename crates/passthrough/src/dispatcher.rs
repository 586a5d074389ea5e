//! Per-call orchestration: validate → map → call → normalize.

use crate::auth::{AuthContext, CredentialValidator, ServiceToken};
use crate::client::UpstreamClient;
use crate::discovery::{self, DiscoverQuery};
use crate::envelope::{self, ErrorKind, NO_RESPONSE_STATUS, ResultEnvelope};
use crate::mapper::map_request;
use crate::safety::{normalize_endpoint, redact_url};
use crate::tool::{HttpMethod, REQUEST_TOOL, ToolCall, ToolInvocation, tool_descriptors};
use rmcp::model::Tool;
use serde_json::Value;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{Instrument as _, Span, debug, field, info, info_span, warn};

/// Pipeline stages, logged at debug level as a call moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    Validating,
    Mapping,
    Calling,
    Normalizing,
    Responded,
}

impl Stage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validating => "validating",
            Self::Mapping => "mapping",
            Self::Calling => "calling",
            Self::Normalizing => "normalizing",
            Self::Responded => "responded",
        }
    }
}

fn enter(stage: Stage) {
    debug!(stage = stage.as_str(), "tool call stage");
}

/// The request-forwarding gateway.
///
/// Holds only immutable configuration and the shared upstream client, so one instance serves
/// any number of concurrent calls.
#[derive(Debug)]
pub struct Gateway {
    validator: CredentialValidator,
    service_token: ServiceToken,
    client: UpstreamClient,
    request_deadline: Option<Duration>,
    validate_writes: bool,
}

impl Gateway {
    #[must_use]
    pub fn new(
        validator: CredentialValidator,
        service_token: ServiceToken,
        client: UpstreamClient,
    ) -> Self {
        Self {
            validator,
            service_token,
            client,
            request_deadline: None,
            validate_writes: false,
        }
    }

    /// Bound every call (retries and backoff included) by `deadline`.
    #[must_use]
    pub fn with_request_deadline(mut self, deadline: Duration) -> Self {
        self.request_deadline = Some(deadline).filter(|d| !d.is_zero());
        self
    }

    /// Check POST/PUT calls against the console's endpoint catalogue before sending them.
    ///
    /// Unknown endpoints and writes missing a required body are rejected as invalid requests
    /// without reaching the target endpoint.
    #[must_use]
    pub fn with_write_validation(mut self, enabled: bool) -> Self {
        self.validate_writes = enabled;
        self
    }

    #[must_use]
    pub fn client(&self) -> &UpstreamClient {
        &self.client
    }

    #[must_use]
    pub fn is_authorized(&self, credential: Option<&str>) -> bool {
        self.validator.validate(credential)
    }

    #[must_use]
    pub fn tools(&self) -> Vec<Tool> {
        tool_descriptors()
    }

    /// Handle one tool invocation by name.
    ///
    /// The credential is checked before the arguments are even parsed; rejected calls never
    /// touch the service token or the network.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        credential: Option<&str>,
    ) -> ResultEnvelope {
        traced(name, async move {
            let Some(auth) = self.authenticate(credential) else {
                return ResultEnvelope::unauthorized();
            };
            match ToolInvocation::parse(name, arguments) {
                Err(err) => envelope::from_error(&err, &auth),
                Ok(ToolInvocation::Request(call)) => self.passthrough(&call, &auth).await,
                Ok(ToolInvocation::Discover(query)) => self.discover(&query, &auth).await,
            }
        })
        .await
    }

    /// Run a single passthrough call.
    pub async fn dispatch(&self, call: &ToolCall, credential: Option<&str>) -> ResultEnvelope {
        traced(REQUEST_TOOL, async move {
            match self.authenticate(credential) {
                None => ResultEnvelope::unauthorized(),
                Some(auth) => self.passthrough(call, &auth).await,
            }
        })
        .await
    }

    fn authenticate<'a>(&'a self, credential: Option<&'a str>) -> Option<AuthContext<'a>> {
        enter(Stage::Validating);
        if !self.validator.validate(credential) {
            warn!(
                credential_present = credential.is_some_and(|c| !c.is_empty()),
                "rejected tool call: missing or invalid client credential"
            );
            return None;
        }
        Some(AuthContext {
            client_credential: credential,
            service_token: &self.service_token,
        })
    }

    async fn passthrough(&self, call: &ToolCall, auth: &AuthContext<'_>) -> ResultEnvelope {
        if self.validate_writes
            && matches!(call.method, HttpMethod::Post | HttpMethod::Put)
            && let Some(rejection) = self.check_write(call, auth).await
        {
            return rejection;
        }
        self.forward(call, auth).await
    }

    /// Look the write up in the catalogue; `Some` carries the envelope to return instead.
    async fn check_write(&self, call: &ToolCall, auth: &AuthContext<'_>) -> Option<ResultEnvelope> {
        let segments = match normalize_endpoint(&call.endpoint) {
            Ok(segments) => segments,
            Err(err) => return Some(envelope::from_error(&err, auth)),
        };
        let lookup = match discovery::write_lookup(call.method, &segments) {
            Ok(lookup) => lookup,
            Err(err) => return Some(envelope::from_error(&err, auth)),
        };
        let catalogue = self.forward(&lookup, auth).await;
        if !catalogue.ok {
            return Some(catalogue);
        }

        let path = format!("/{}", segments.join("/"));
        let entries = catalogue.body.unwrap_or(Value::Null);
        match discovery::check_write(&entries, call.method, &path, call.body.is_some()) {
            Ok(()) => None,
            Err(err) => {
                debug!(error = %err, "write rejected by catalogue check");
                Some(envelope::from_error(&err, auth))
            }
        }
    }

    async fn forward(&self, call: &ToolCall, auth: &AuthContext<'_>) -> ResultEnvelope {
        enter(Stage::Mapping);
        let request = match map_request(call, self.client.config()) {
            Ok(request) => request,
            Err(err) => {
                debug!(error = %err, "tool call rejected during mapping");
                return envelope::from_error(&err, auth);
            }
        };
        let span = Span::current();
        span.record("method", request.method.as_str());
        span.record("url", redact_url(&request.url).as_str());

        enter(Stage::Calling);
        let deadline = self
            .request_deadline
            .and_then(|d| self.client.clock().now().checked_add(d));
        let send = self.client.send(&request, auth, deadline);
        let outcome = match self.request_deadline {
            // Also bounds waiting for a concurrency permit; dropping the future cancels the
            // in-flight request.
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return ResultEnvelope::failure(
                        NO_RESPONSE_STATUS,
                        ErrorKind::TimeoutError,
                        format!("request deadline of {}s elapsed", limit.as_secs_f64()),
                    );
                }
            },
            None => send.await,
        };
        if let Ok(result) = &outcome {
            let status = result.status.as_u16();
            debug!(status, attempts = result.attempts, "upstream responded");
        }

        enter(Stage::Normalizing);
        envelope::normalize(outcome, auth)
    }

    async fn discover(&self, query: &DiscoverQuery, auth: &AuthContext<'_>) -> ResultEnvelope {
        let mut envelope = self.forward(&query.to_tool_call(), auth).await;
        if envelope.ok {
            let catalogue = envelope.body.take().unwrap_or(Value::Null);
            envelope.body = Some(discovery::summarize(&catalogue));
        }
        envelope
    }
}

/// Run `work` inside a `tool_call` span, logging stage transitions and the outcome.
async fn traced<F>(tool: &str, work: F) -> ResultEnvelope
where
    F: Future<Output = ResultEnvelope>,
{
    let span = info_span!(
        "tool_call",
        tool = %tool,
        method = field::Empty,
        url = field::Empty,
    );
    async move {
        let started = Instant::now();
        enter(Stage::Received);
        let envelope = work.await;
        enter(Stage::Responded);
        log_outcome(&envelope, started);
        envelope
    }
    .instrument(span)
    .await
}

fn log_outcome(envelope: &ResultEnvelope, started: Instant) {
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match envelope.error_kind() {
        None => info!(ok = true, status = envelope.status, elapsed_ms, "tool call completed"),
        Some(kind) => info!(
            ok = false,
            status = envelope.status,
            kind = kind.as_str(),
            elapsed_ms,
            "tool call completed"
        ),
    }
}
