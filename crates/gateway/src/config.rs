//! Process configuration: CLI flags with environment fallbacks.

use crate::mcp::SiemMcpServer;
use crate::telemetry::LogFormat;
use anyhow::Context as _;
use clap::{ArgAction, Parser};
use secrecy::SecretString;
use siem_passthrough::config::{DEFAULT_API_VERSION, DEFAULT_AUTH_HEADER};
use siem_passthrough::{
    BackoffPolicy, CredentialValidator, Gateway, ServiceToken, UpstreamClient, UpstreamConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Parser)]
#[command(
    name = "siem-mcp-gateway",
    version,
    about = "Authenticated passthrough from AI tool calls to a SIEM console REST API"
)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "GATEWAY_BIND", default_value = "127.0.0.1:8001")]
    pub bind: SocketAddr,

    /// Credential clients must present (`Authorization: Bearer` or `X-Api-Key`).
    #[arg(long, env = "GATEWAY_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Console API root, e.g. `https://qradar.example.com/api`.
    #[arg(long, env = "SIEM_BASE_URL")]
    pub base_url: String,

    /// Service token injected into every upstream request.
    #[arg(long, env = "SIEM_API_TOKEN", hide_env_values = true)]
    pub api_token: String,

    /// Header carrying the service token.
    #[arg(long, env = "SIEM_AUTH_HEADER", default_value = DEFAULT_AUTH_HEADER)]
    pub auth_header: String,

    /// Console `Version` header; empty disables it.
    #[arg(long, env = "SIEM_API_VERSION", default_value = DEFAULT_API_VERSION)]
    pub api_version: String,

    /// Verify the console's TLS certificate.
    #[arg(
        long,
        env = "SIEM_VERIFY_TLS",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = parse_flag
    )]
    pub verify_tls: bool,

    /// Per-attempt upstream timeout, in seconds.
    #[arg(long, env = "SIEM_TIMEOUT_SECS", default_value_t = 120)]
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures.
    #[arg(long, env = "SIEM_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, env = "SIEM_RETRY_BASE_MS", default_value_t = 250)]
    pub retry_base_ms: u64,

    #[arg(long, env = "SIEM_RETRY_CAP_MS", default_value_t = 10_000)]
    pub retry_cap_ms: u64,

    /// Maximum concurrent requests toward the console.
    #[arg(long, env = "SIEM_MAX_CONCURRENCY", default_value_t = 16)]
    pub max_concurrency: usize,

    /// Maximum upstream response size in bytes; 0 = unlimited.
    #[arg(long, env = "SIEM_MAX_RESPONSE_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_response_bytes: usize,

    /// Check POST/PUT requests against the console's endpoint catalogue before sending them.
    #[arg(
        long,
        env = "SIEM_VALIDATE_WRITES",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = parse_flag
    )]
    pub validate_writes: bool,

    /// Serve MCP over stdin/stdout instead of listening on `--bind`.
    #[arg(long, env = "GATEWAY_STDIO")]
    pub stdio: bool,

    /// Overall deadline per tool call, retries included; 0 disables it.
    #[arg(long, env = "GATEWAY_REQUEST_DEADLINE_SECS", default_value_t = 300)]
    pub request_deadline_secs: u64,

    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "GATEWAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Validated, immutable process settings.
pub struct Settings {
    pub bind: SocketAddr,
    pub upstream: UpstreamConfig,
    pub request_deadline: Duration,
    pub validate_writes: bool,
    pub stdio: bool,
    api_key: SecretString,
    api_token: SecretString,
}

impl Args {
    /// Validate flags and convert them into [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns an error for empty secrets, an invalid base URL or header name, or zero-valued
    /// limits that would disable the gateway.
    pub fn into_settings(self) -> anyhow::Result<Settings> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("GATEWAY_API_KEY must not be empty");
        }
        if self.api_token.trim().is_empty() {
            anyhow::bail!("SIEM_API_TOKEN must not be empty");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("SIEM_TIMEOUT_SECS must be greater than 0");
        }
        if self.max_concurrency == 0 {
            anyhow::bail!("SIEM_MAX_CONCURRENCY must be greater than 0");
        }
        if self.max_concurrency > Semaphore::MAX_PERMITS {
            anyhow::bail!(
                "SIEM_MAX_CONCURRENCY must not exceed {}",
                Semaphore::MAX_PERMITS
            );
        }
        if self.retry_base_ms > self.retry_cap_ms {
            anyhow::bail!("SIEM_RETRY_BASE_MS must not exceed SIEM_RETRY_CAP_MS");
        }

        let mut upstream = UpstreamConfig::new(&self.base_url).context("SIEM_BASE_URL")?;
        upstream
            .set_auth_header(&self.auth_header)
            .context("SIEM_AUTH_HEADER")?;
        upstream.verify_tls = self.verify_tls;
        upstream.timeout = Duration::from_secs(self.timeout_secs);
        upstream.max_retries = self.max_retries;
        upstream.backoff = BackoffPolicy {
            base: Duration::from_millis(self.retry_base_ms),
            cap: Duration::from_millis(self.retry_cap_ms),
            ..BackoffPolicy::default()
        };
        upstream.api_version = Some(self.api_version.trim().to_string()).filter(|v| !v.is_empty());
        upstream.max_concurrency = self.max_concurrency;
        upstream.max_response_bytes = Some(self.max_response_bytes).filter(|b| *b > 0);

        Ok(Settings {
            bind: self.bind,
            upstream,
            request_deadline: Duration::from_secs(self.request_deadline_secs),
            validate_writes: self.validate_writes,
            stdio: self.stdio,
            api_key: SecretString::from(self.api_key.trim().to_string()),
            api_token: SecretString::from(self.api_token.trim().to_string()),
        })
    }
}

impl Settings {
    /// Build the gateway these settings describe.
    ///
    /// # Errors
    ///
    /// Returns an error if a secret is unusable or the HTTP client cannot be built.
    pub fn build_gateway(&self) -> anyhow::Result<Gateway> {
        let validator = CredentialValidator::new(&self.api_key).context("GATEWAY_API_KEY")?;
        let token = ServiceToken::new(self.api_token.clone()).context("SIEM_API_TOKEN")?;
        let client = UpstreamClient::new(self.upstream.clone())?;
        Ok(Gateway::new(validator, token, client)
            .with_request_deadline(self.request_deadline)
            .with_write_validation(self.validate_writes))
    }

    /// MCP server for the stdio transport, acting with the configured client credential.
    #[must_use]
    pub fn stdio_server(&self, gateway: Arc<Gateway>) -> SiemMcpServer {
        SiemMcpServer::trusted(gateway, self.api_key.clone())
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("bind", &self.bind)
            .field("upstream", &self.upstream)
            .field("request_deadline", &self.request_deadline)
            .field("validate_writes", &self.validate_writes)
            .field("stdio", &self.stdio)
            .finish_non_exhaustive()
    }
}

/// Parse a boolean flag leniently (`1/true/yes/on`, `0/false/no/off`).
fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean (true/false), got '{other}'")),
    }
}
