//! Error types for `siem-passthrough`.

use thiserror::Error;

/// Main error type for the passthrough core.
///
/// Authentication failures are not represented here: the credential validator answers with a
/// plain `bool` and the dispatcher turns a rejection straight into an envelope.
#[derive(Error, Debug)]
pub enum PassthroughError {
    /// Configuration errors (invalid base URL, empty secrets, bad header names).
    #[error("config error: {0}")]
    Config(String),

    /// The tool call cannot be mapped onto an upstream request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No HTTP response was obtained (DNS, connect, TLS, per-attempt timeout, oversized body).
    #[error("http transport error: {0}")]
    Transport(String),

    /// The overall request deadline elapsed, possibly between retries.
    #[error("deadline exceeded: {0}")]
    Timeout(String),
}

/// Result type alias for passthrough operations.
pub type Result<T> = std::result::Result<T, PassthroughError>;

impl PassthroughError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
