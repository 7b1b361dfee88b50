/// live_main.rs — Live Mode Entry Point
///
/// Assembles the core pipeline against a long-running tick source and runs
/// until a shutdown signal arrives. The live feed itself (broker WebSocket,
/// credentials, reconnection policy) is an external collaborator (§6); this
/// binary only demonstrates the wiring.
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use tickbar_engine::config::AppConfig;
use tickbar_engine::pipeline::Pipeline;
use tickbar_engine::sink::{LoggingBarSink, LoggingSignalSink};
use tickbar_engine::source::VecTickSource;
use tickbar_engine::threshold::StaticThresholdProvider;

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════╗");
    info!("║       TICKBAR ENGINE  —  LIVE MODE          ║");
    info!("╚══════════════════════════════════════════════╝");

    let app_cfg = AppConfig::from_env()?;
    if app_cfg.engine.instruments.is_empty() {
        warn!("no INSTRUMENTS configured — the pipeline will idle until its source is wired up");
    }

    let mut pipeline = Pipeline::new(
        &app_cfg.engine,
        Arc::new(LoggingBarSink),
        Arc::new(LoggingSignalSink),
        None,
    );
    // A real deployment swaps this for a provider backed by whatever parameter
    // store holds per-instrument thresholds; the pipeline polls it at startup
    // and again on `THRESHOLD_REFRESH_MINUTES` if configured.
    pipeline.set_threshold_provider(Arc::new(StaticThresholdProvider::new(HashMap::new())));
    for (name, token) in &app_cfg.engine.instruments {
        info!(stock = %name, instrument_token = *token, "instrument registered");
    }

    // Placeholder live source: a real deployment swaps this for a broker
    // WebSocket adapter implementing `TickSource`.
    let source = Box::new(VecTickSource::new(Vec::new()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctrl_c = tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, signaling shutdown");
        let _ = shutdown_tx.send(true);
    });

    pipeline.run(source, shutdown_rx).await;
    ctrl_c.abort();

    info!("Live pipeline stopped.");
    Ok(())
}
