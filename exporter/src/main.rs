// src/main.rs
//
// Exporter binary that wires up the library:
//
// - HTTP JSON-RPC transport to the node
// - Node collector (chain head, block walk, health, finality, mempool, identity)
// - Poller publishing a fresh state on a fixed interval
// - Prometheus exporter on /metrics
// - Graceful shutdown on SIGINT / SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use polkadot_exporter::{
    Cli, DefaultCollector, ExporterConfig, HttpTransport, NodeClient, NodeCollector, Poller,
    publisher,
};

#[tokio::main]
async fn main() {
    // `--help` and usage errors exit here, before anything is started.
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("polkadot_exporter=info")),
        )
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = ExporterConfig::from_cli(&cli).context("invalid configuration")?;

    // ---------------------------
    // Node client + collector
    // ---------------------------

    let transport = HttpTransport::new(cfg.rpc.url.clone(), cfg.rpc.timeout)
        .context("failed to create RPC client")?;
    tracing::info!(
        rpc_url = transport.url(),
        timeout_ms = cfg.rpc.timeout.as_millis() as u64,
        "using node RPC endpoint"
    );
    let collector: DefaultCollector =
        NodeCollector::new(NodeClient::new(transport), cfg.collector.clone());

    // ---------------------------
    // Listener (fails fast on a bad address)
    // ---------------------------

    let listener = publisher::bind(cfg.publisher.listen_addr).await?;

    // ---------------------------
    // Poller + publisher tasks
    // ---------------------------

    let poller = Poller::new(collector, cfg.poller.clone());
    let reader = poller.reader();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller_task = tokio::spawn(poller.run(wait_for_shutdown(shutdown_rx.clone())));
    let server_task = tokio::spawn(publisher::serve(
        listener,
        reader,
        wait_for_shutdown(shutdown_rx),
    ));

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = poller_task.await {
        tracing::warn!("poller task ended abnormally: {e}");
    }
    if let Err(e) = server_task.await {
        tracing::warn!("metrics server task ended abnormally: {e}");
    }

    tracing::info!("exporter stopped");
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Waits for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
