//! meshnode - gossip mesh node binary.

use std::sync::Arc;

use clap::Parser;
use gossip_mesh::{Identity, NodeRuntime, TcpTransport, TelemetryLogger};
use meshnode::{ApiServer, NodeConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the event stream; logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("meshnode=info,gossip_mesh=info")),
        )
        .init();

    let config = NodeConfig::parse();
    config.validate()?;

    let identity = Identity::generate();
    let transport =
        TcpTransport::bind_with(&identity, config.p2p_addr()?, config.seen_cache()).await?;
    if config.print_peer_id {
        println!("{}", identity.peer_id());
    }
    info!(
        peer_id = %identity.peer_id(),
        listen = %transport.addr(),
        "peer listener bound"
    );

    let telemetry = TelemetryLogger::stdout();
    let runtime = Arc::new(
        NodeRuntime::start(
            Arc::new(transport),
            telemetry.clone(),
            config.runtime_config(),
        )
        .await?,
    );

    let report = runtime.bootstrap(&config.bootstrap_peers()).await;
    if report.is_seed() {
        info!("no bootstrap peers, acting as seed");
    } else {
        info!(
            connected = report.connected(),
            failed = report.failed(),
            "bootstrap finished"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api = match ApiServer::bind(config.api_addr()?).await {
        Ok(api) => api,
        Err(e) => {
            error!(error = %e, "http server failed to start");
            telemetry.http_server_failed();
            runtime.shutdown().await;
            return Err(e.into());
        }
    };
    let api_task = tokio::spawn(api.serve(Arc::clone(&runtime), shutdown_rx));

    wait_for_signal().await;
    info!("signal received, stopping");

    let _ = shutdown_tx.send(true);
    runtime.shutdown().await;
    if let Err(e) = api_task.await {
        warn!(error = %e, "api task ended abnormally");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
