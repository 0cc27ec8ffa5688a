mod cli;
mod handlers;
mod router;

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{info, warn};
use vex_exporter::{DumpSource, ScrapeCoordinator, SharedVersion, Varnishstat};
use vex_metrics::DescriptorCache;

use crate::{
    cli::Cli,
    router::{AppState, RoutePaths, exporter_router},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.init_tracing()?;
    cli.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_address = %cli.listen_address,
        telemetry_path = %cli.telemetry_path,
        health_path = ?cli.health_path,
        instance = ?cli.instance,
        vsm = ?cli.vsm,
        "starting varnish_exporter"
    );

    let source: Arc<dyn DumpSource> =
        Arc::new(Varnishstat::new(&cli.varnishstat_path).with_timeout(cli.timeout()));
    let version = Arc::new(SharedVersion::default());
    version
        .resolve_from(source.as_ref())
        .await
        .map_err(|failure| anyhow!("varnish version initialize failed: {failure}"))?;
    info!(version = %version.current(), "found varnishstat");

    let coordinator = Arc::new(ScrapeCoordinator::new(
        source,
        cli.exporter_config(),
        version,
        Arc::new(DescriptorCache::new()),
    ));

    // one cycle before serving, so a broken setup fails at startup
    let started = Instant::now();
    let collection = coordinator.collect().await;
    match &collection.outcome {
        Ok(counters) => info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            counters,
            "test scrape done"
        ),
        Err(failure) => {
            if !failure.output.is_empty() {
                eprintln!("\n{}\n", failure.output_text());
            }
            bail!("test scrape failed: {failure}");
        }
    }

    if cli.test {
        for descriptor in coordinator.describe() {
            println!(
                "{} {:?} {}",
                descriptor.name, descriptor.variable_labels, descriptor.help
            );
        }
        println!();
        print!("{}", collection.encode()?);
        return Ok(());
    }

    let (fatal, fatal_rx) = watch::channel(false);
    let state = Arc::new(AppState::new(coordinator, cli.exit_on_errors, fatal));
    let paths = RoutePaths {
        metrics: cli.telemetry_path.clone(),
        health: cli.health_path.clone(),
    };
    let app = exporter_router(state, &paths);

    let addr = cli.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, path = %paths.metrics, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(fatal_rx.clone()))
        .await?;

    if *fatal_rx.borrow() {
        bail!("stopped after a failed scrape");
    }
    info!("server stopped");
    Ok(())
}

/// Resolves on SIGINT, SIGTERM, or when a failed scrape asks to stop.
async fn shutdown_signal(mut fatal: watch::Receiver<bool>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        Ok(_) = fatal.wait_for(|failed| *failed) => {},
    }
}
