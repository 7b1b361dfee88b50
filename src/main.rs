/// main.rs — Replay Mode Entry Point
///
/// Assembles the core pipeline behind its injected interfaces and drives it
/// from an in-memory tick source, standing in for the chronological
/// multi-file CSV replay this crate deliberately leaves external (§6).
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tickbar_engine::config::AppConfig;
use tickbar_engine::model::Tick;
use tickbar_engine::pipeline::Pipeline;
use tickbar_engine::sink::{LoggingBarSink, LoggingSignalSink};
use tickbar_engine::source::VecTickSource;
use tickbar_engine::threshold::StaticThresholdProvider;

/// Builds a small synthetic tick stream for one instrument — enough to walk
/// the pipeline end to end without a real replay file reader.
fn demo_ticks(instrument_token: i64, stock_name: &str) -> Vec<Tick> {
    let start = Utc::now();
    let prices = [100.0, 100.5, 101.2, 100.8, 99.9, 100.3, 101.0, 101.6, 100.7, 100.1];
    let mut cum_volume = 0i64;
    prices
        .iter()
        .enumerate()
        .map(|(i, &price)| {
            cum_volume += 250;
            Tick {
                timestamp: start + ChronoDuration::seconds(i as i64 * 6),
                instrument_token,
                stock_name: stock_name.to_string(),
                last_price: Some(price),
                last_traded_quantity: Some(250),
                average_traded_price: Some(price),
                volume_traded: Some(cum_volume),
                total_buy_quantity: None,
                total_sell_quantity: None,
                depth: None,
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════╗");
    info!("║      TICKBAR ENGINE  —  REPLAY MODE         ║");
    info!("╚══════════════════════════════════════════════╝");

    // ── Config ───────────────────────────────────────────────────────────
    let app_cfg = AppConfig::from_env()?;
    info!(
        "Config: intervals={:?} indicator_period={} signal_variant={:?}",
        app_cfg.engine.intervals_minutes, app_cfg.engine.indicator_period, app_cfg.engine.signal_variant
    );

    let mut pipeline = Pipeline::new(
        &app_cfg.engine,
        Arc::new(LoggingBarSink),
        Arc::new(LoggingSignalSink),
        None,
    );
    // No real threshold source in replay mode; an empty table means every
    // instrument falls back to the dynamic percentile threshold.
    pipeline.set_threshold_provider(Arc::new(StaticThresholdProvider::new(HashMap::new())));
    for (name, token) in &app_cfg.engine.instruments {
        info!(stock = %name, instrument_token = *token, "instrument registered");
    }

    let ticks = if app_cfg.engine.instruments.is_empty() {
        demo_ticks(1, "DEMO")
    } else {
        app_cfg
            .engine
            .instruments
            .iter()
            .flat_map(|(name, token)| demo_ticks(*token, name))
            .collect()
    };
    info!("Replaying {} ticks from '{}'", ticks.len(), app_cfg.replay_data_directory);

    let source = Box::new(VecTickSource::new(ticks));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    pipeline.run(source, shutdown_rx).await;

    info!("Replay complete.");
    Ok(())
}
