//! Upstream (SIEM console) configuration.
//!
//! Built once at process start and never mutated afterwards; the upstream client and mapper
//! only ever read it.

use crate::backoff::BackoffPolicy;
use crate::error::{PassthroughError, Result};
use reqwest::header::HeaderName;
use std::time::Duration;
use url::Url;

/// Default name of the header carrying the service token (`QRadar` style).
pub const DEFAULT_AUTH_HEADER: &str = "SEC";

/// Default console API version sent in the `Version` header.
pub const DEFAULT_API_VERSION: &str = "26.0";

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    base_url: Url,
    /// Verify the console's TLS certificate chain and hostname.
    pub verify_tls: bool,
    /// Timeout for a single attempt (connect + response body).
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    /// Header the service token is injected into.
    pub auth_header: HeaderName,
    /// Value for the console `Version` header; `None` omits the header.
    pub api_version: Option<String>,
    /// Maximum in-flight requests toward the console.
    pub max_concurrency: usize,
    /// Maximum response body size (bytes). `None` = unlimited.
    pub max_response_bytes: Option<usize>,
}

impl UpstreamConfig {
    /// Create a configuration with defaults for everything but the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not an absolute `http(s)` URL with a host, or carries
    /// credentials, a query or a fragment.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            verify_tls: true,
            timeout: Duration::from_secs(120),
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            auth_header: HeaderName::from_static("sec"),
            api_version: Some(DEFAULT_API_VERSION.to_string()),
            max_concurrency: 16,
            max_response_bytes: Some(10 * 1024 * 1024),
        })
    }

    /// Base URL every endpoint is resolved against. Always ends with `/`.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Set the auth header name from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if `name` is not a valid HTTP header name.
    pub fn set_auth_header(&mut self, name: &str) -> Result<()> {
        self.auth_header = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
            PassthroughError::Config(format!("Invalid auth header name '{name}': {e}"))
        })?;
        Ok(())
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| PassthroughError::Config(format!("Invalid base URL '{raw}': {e}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(PassthroughError::Config(format!(
            "Invalid base URL: unsupported scheme '{scheme}'"
        )));
    }
    if url.host_str().is_none() {
        return Err(PassthroughError::Config(
            "Invalid base URL: missing host".to_string(),
        ));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(PassthroughError::Config(
            "Invalid base URL: credentials must not be embedded in the URL".to_string(),
        ));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(PassthroughError::Config(
            "Invalid base URL: query and fragment are not allowed".to_string(),
        ));
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
