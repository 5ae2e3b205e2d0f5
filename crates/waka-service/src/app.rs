use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use waka_api::{ApiState, HttpApi};
use waka_core::{CompletionRegistry, ExecutionCoordinator, LogBroadcast, TokenAuthenticator};
use waka_exec::ShellRunner;
use waka_observe::{StreamConfig, logger_init_with, stream_layer};

use crate::config::ServiceConfig;

/// Startup and shutdown routine. Every shared component is built here and
/// handed down explicitly.
pub async fn run(cfg: ServiceConfig) -> anyhow::Result<()> {
    // 1) Log stream + logger
    let logs = Arc::new(LogBroadcast::new());
    let stream = stream_layer(Arc::clone(&logs), &StreamConfig::default());
    logger_init_with(&cfg.logger(), vec![stream])?;
    info!(version = env!("CARGO_PKG_VERSION"), "logger initialized");

    // 2) Token; without it nothing may be served
    let system_dir = cfg.system_dir()?;
    let auth = Arc::new(TokenAuthenticator::new(&system_dir));
    if let Err(e) = auth.initialize() {
        error!(error = %e, "token initialization failed; refusing to start");
        return Err(e).context("token initialization failed");
    }
    info!(path = %auth.path().display(), "token ready");

    // 3) Runner + coordinator
    let shell = cfg.shell();
    info!(shell = %shell.shell, kill_grace_ms = cfg.kill_grace_ms, "shell runner configured");
    let runner = Arc::new(ShellRunner::new(shell));
    let coordinator =
        ExecutionCoordinator::new(runner, logs, Arc::new(CompletionRegistry::new()));

    // 4) Serve
    let router = HttpApi::new(ApiState::new(coordinator.clone(), auth)).router();
    let addr = cfg.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // 5) Shutdown
    info!("shutting down...");
    coordinator.stop();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
