use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use honeysink_core::BatchSink;
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use tokio::io::BufReader;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod cmdline;
mod intake;
mod metrics_server;
mod setup_tracing;

fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run());
    // a pending stdin read cannot be cancelled, don't let it hold up the exit
    runtime.shutdown_timeout(Duration::from_secs(1));

    if let Err(e) = result {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let settings = cmdline::Settings::try_from(&matches)?;
    let sink = BatchSink::new(settings.sink)?;

    let cln_token = CancellationToken::new();
    let shutdown_cln_token = cln_token.clone();
    let shutdown_handle = tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_cln_token.cancel();
    });

    let metrics_handle = settings.metrics_port.map(|port| {
        let mut registry = Registry::default();
        sink.register_metrics(&mut registry);
        tokio::spawn(metrics_server::start_metrics_server(
            port,
            Arc::new(Mutex::new(registry)),
            cln_token.clone(),
        ))
    });

    let intake =
        intake::read_records(BufReader::new(tokio::io::stdin()), &sink, cln_token.clone()).await;
    sink.close().await?;

    // stop the metrics server only once the final counts are in
    cln_token.cancel();
    if let Some(handle) = metrics_handle {
        match handle.await {
            Ok(Err(e)) => error!(?e, "Metrics server failed"),
            Err(e) => error!(?e, "Metrics server task failed"),
            Ok(Ok(())) => {}
        }
    }
    if !shutdown_handle.is_finished() {
        shutdown_handle.abort();
    }

    let intake = intake?;
    let stats = sink.stats();
    info!(
        accepted = intake.accepted,
        skipped = intake.skipped,
        total_sent = stats.total_sent,
        total_failed = stats.total_failed,
        total_retried = stats.total_retried,
        total_indeterminate = stats.total_indeterminate,
        "Final stats"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => {
                error!(?e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                error!(?e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
