use anyhow::Context as _;
use clap::Parser as _;
use siem_mcp_gateway::config::Args;
use siem_mcp_gateway::{http, telemetry};
use siem_passthrough::safety::redact_url;
use std::sync::Arc;
use rmcp::ServiceExt as _;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(&args.log_level, args.log_format)?;

    let settings = args.into_settings()?;
    if !settings.upstream.verify_tls {
        warn!("TLS verification for the SIEM console is DISABLED (SIEM_VERIFY_TLS=false)");
    }

    let gateway = Arc::new(settings.build_gateway()?);
    if settings.stdio {
        info!(
            upstream = %redact_url(settings.upstream.base_url()),
            "siem-mcp-gateway serving MCP on stdio"
        );
        let service = settings
            .stdio_server(gateway)
            .serve(rmcp::transport::stdio())
            .await
            .context("start stdio transport")?;
        tokio::select! {
            quit = service.waiting() => { quit.context("stdio transport")?; }
            () = shutdown_signal() => {}
        }
        info!("siem-mcp-gateway stopped");
        return Ok(());
    }
    let app = http::router(gateway);

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("bind {}", settings.bind))?;
    info!(
        bind = %listener.local_addr()?,
        upstream = %redact_url(settings.upstream.base_url()),
        max_retries = settings.upstream.max_retries,
        max_concurrency = settings.upstream.max_concurrency,
        "siem-mcp-gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    info!("siem-mcp-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
