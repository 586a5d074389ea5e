//! Upstream HTTP client: credential injection, TLS policy, bounded concurrency, retries.

use crate::auth::AuthContext;
use crate::backoff::{Clock, TokioClock, retry_after_hint};
use crate::config::UpstreamConfig;
use crate::error::{PassthroughError, Result};
use crate::mapper::UpstreamRequest;
use crate::safety::{redact_secrets, redact_url, sanitize_reqwest_error};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// A terminal HTTP response from the console.
#[derive(Debug, Clone)]
pub struct HttpResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Attempts made, including the one that produced this response.
    pub attempts: u32,
}

/// Shared, cheaply clonable client for the configured console.
#[derive(Clone)]
pub struct UpstreamClient {
    inner: Arc<UpstreamClientInner>,
}

struct UpstreamClientInner {
    config: UpstreamConfig,
    http: reqwest::Client,
    permits: Semaphore,
    clock: Arc<dyn Clock>,
}

enum AttemptError {
    /// No response obtained, but another attempt may succeed.
    Retryable(String),
    /// No response obtained and retrying will not help.
    Fatal(String),
}

impl UpstreamClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Build a client whose backoff waits and deadline checks go through `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_clock(config: UpstreamConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        // The service token must never be replayed to a redirect target.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| PassthroughError::Config(format!("failed to build HTTP client: {e}")))?;
        let permits = Semaphore::new(config.max_concurrency.clamp(1, Semaphore::MAX_PERMITS));

        Ok(Self {
            inner: Arc::new(UpstreamClientInner {
                config,
                http,
                permits,
                clock,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &UpstreamConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Send `request` with the service token injected, retrying transient failures.
    ///
    /// Connection errors, timeouts, 5xx and 429 are retried up to `max_retries` times. Any other
    /// status is returned as-is after a single attempt. `deadline` bounds the whole exchange,
    /// backoff waits included.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if no HTTP response was obtained, or `Timeout` if `deadline` elapsed
    /// before a terminal response.
    pub async fn send(
        &self,
        request: &UpstreamRequest,
        auth: &AuthContext<'_>,
        deadline: Option<Instant>,
    ) -> Result<HttpResult> {
        let cfg = &self.inner.config;
        let token = auth.service_token.header_value()?;
        let max_attempts = cfg.max_retries.saturating_add(1);
        let url = redact_url(&request.url);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(self.inner.clock.now());
                    if remaining.is_zero() {
                        return Err(deadline_exceeded(attempt - 1));
                    }
                    remaining.min(cfg.timeout)
                }
                None => cfg.timeout,
            };

            debug!(attempt, max_attempts, url = %url, "sending upstream request");
            let outcome = self.attempt(request, &token, timeout).await;

            let (reason, hint) = match outcome {
                Ok((status, headers, body)) => {
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(HttpResult {
                            status,
                            headers,
                            body,
                            attempts: attempt,
                        });
                    }
                    let hint = retry_after_hint(&headers, SystemTime::now());
                    (format!("HTTP {}", status.as_u16()), hint)
                }
                Err(AttemptError::Fatal(msg)) => {
                    return Err(PassthroughError::Transport(redact_secrets(
                        &msg,
                        &auth.secrets(),
                    )));
                }
                Err(AttemptError::Retryable(msg)) => {
                    let msg = redact_secrets(&msg, &auth.secrets());
                    if attempt >= max_attempts {
                        return Err(PassthroughError::Transport(format!(
                            "{msg} (after {attempt} attempts)"
                        )));
                    }
                    (msg, None)
                }
            };

            // A Retry-After hint replaces the backoff schedule; the deadline still bounds it.
            let delay = hint.unwrap_or_else(|| cfg.backoff.delay_for(attempt));
            if let Some(deadline) = deadline
                && self
                    .inner
                    .clock
                    .now()
                    .checked_add(delay)
                    .is_none_or(|resume| resume >= deadline)
            {
                return Err(deadline_exceeded(attempt));
            }

            warn!(
                attempt,
                max_attempts,
                url = %url,
                reason = %reason,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying upstream request"
            );
            self.inner.clock.sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        request: &UpstreamRequest,
        token: &reqwest::header::HeaderValue,
        timeout: Duration,
    ) -> std::result::Result<(StatusCode, HeaderMap, Vec<u8>), AttemptError> {
        let cfg = &self.inner.config;
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| AttemptError::Fatal("upstream client is shutting down".to_string()))?;

        let mut builder = self
            .inner
            .http
            .request(request.method.to_reqwest(), request.url.clone())
            .headers(request.headers.clone())
            .header(cfg.auth_header.clone(), token.clone())
            .timeout(timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = read_response_body_limited_bytes(response, cfg.max_response_bytes).await?;
        Ok((status, headers, body))
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("base_url", &self.inner.config.base_url().as_str())
            .field("verify_tls", &self.inner.config.verify_tls)
            .finish_non_exhaustive()
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify(e: reqwest::Error) -> AttemptError {
    let msg = sanitize_reqwest_error(&e);
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        AttemptError::Retryable(msg)
    } else {
        AttemptError::Fatal(msg)
    }
}

fn deadline_exceeded(attempts: u32) -> PassthroughError {
    PassthroughError::Timeout(format!(
        "request deadline elapsed after {attempts} attempt(s)"
    ))
}

async fn read_response_body_limited_bytes(
    mut response: reqwest::Response,
    max_bytes: Option<usize>,
) -> std::result::Result<Vec<u8>, AttemptError> {
    let Some(max) = max_bytes else {
        let bytes = response.bytes().await.map_err(classify)?;
        return Ok(bytes.to_vec());
    };

    if let Some(len) = response.content_length()
        && len > max as u64
    {
        return Err(AttemptError::Fatal(format!(
            "Response too large: {len} bytes (limit {max})"
        )));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(classify)? {
        if out.len().saturating_add(chunk.len()) > max {
            return Err(AttemptError::Fatal(format!(
                "Response too large: exceeded {max} bytes"
            )));
        }
        out.extend_from_slice(&chunk);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_5xx_and_429_are_retryable() {
        for code in [500, 502, 503, 504, 429] {
            let status = StatusCode::from_u16(code).expect("status");
            assert!(is_retryable_status(status), "{code}");
        }
        for code in [200, 204, 301, 400, 401, 403, 404, 409, 422] {
            let status = StatusCode::from_u16(code).expect("status");
            assert!(!is_retryable_status(status), "{code}");
        }
    }

    #[test]
    fn client_builds_with_tls_verification_disabled() {
        let mut cfg = UpstreamConfig::new("https://siem.example.com/api").expect("config");
        cfg.verify_tls = false;
        cfg.max_concurrency = 0;
        let client = UpstreamClient::new(cfg).expect("client");
        assert!(!client.config().verify_tls);
        assert!(format!("{client:?}").contains("siem.example.com"));
    }
}
