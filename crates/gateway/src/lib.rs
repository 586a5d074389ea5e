//! SIEM MCP gateway process: configuration, logging and the inbound HTTP surface around
//! the `siem-passthrough` core.

pub mod config;
pub mod http;
pub mod mcp;
pub mod telemetry;
