/// pipeline.rs — bounded-queue orchestrator between a tick source and sinks (C7)
///
/// Single bounded mpsc channel feeds a single-threaded processor: enrich,
/// dispatch to per-interval aggregators, run the signal engine on finalized
/// bars, and batch everything out to sinks by size or age.
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};

use crate::config::EngineConfig;
use crate::enrich::FeatureEnricher;
use crate::model::{Bar, EnrichedTick, SignalEvent, Tick};
use crate::registry::BarAggregatorRegistry;
use crate::signal_engine::SignalEngine;
use crate::sink::{BarSink, EnrichedTickSink, SignalSink};
use crate::source::TickSource;
use crate::threshold::ThresholdProvider;

const QUEUE_CAPACITY: usize = 4096;
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Pipeline {
    config: EngineConfig,
    enricher: FeatureEnricher,
    registry: BarAggregatorRegistry,
    signal_engine: SignalEngine,
    data_window: VecDeque<EnrichedTick>,
    bar_sink: Arc<dyn BarSink>,
    signal_sink: Arc<dyn SignalSink>,
    tick_sink: Option<Arc<dyn EnrichedTickSink>>,
    threshold_provider: Option<Arc<dyn ThresholdProvider>>,
}

impl Pipeline {
    pub fn new(
        config: &EngineConfig,
        bar_sink: Arc<dyn BarSink>,
        signal_sink: Arc<dyn SignalSink>,
        tick_sink: Option<Arc<dyn EnrichedTickSink>>,
    ) -> Self {
        Self {
            enricher: FeatureEnricher::new(config.iceberg_confirmation_threshold),
            registry: BarAggregatorRegistry::new(
                config.intervals_minutes.clone(),
                config.indicator_period,
                config.divergence_lookback_minutes,
            ),
            signal_engine: SignalEngine::new(
                config.signal_variant,
                config.cost_regime_threshold,
                config.path_regime_threshold,
                config.path_chop_threshold,
                config.pressure_entry_threshold,
                config.pressure_exit_threshold,
                config.stop_loss_pct,
            ),
            data_window: VecDeque::new(),
            bar_sink,
            signal_sink,
            tick_sink,
            threshold_provider: None,
            config: config.clone(),
        }
    }

    /// Preloads a per-instrument large-trade threshold (C8 startup hookup).
    pub fn preload_threshold(&mut self, instrument_token: i64, threshold: Option<i64>) {
        self.enricher.set_threshold(instrument_token, threshold);
    }

    /// Registers the provider `run` polls at startup, and again on
    /// `config.threshold_refresh_minutes` if set (C8).
    pub fn set_threshold_provider(&mut self, provider: Arc<dyn ThresholdProvider>) {
        self.threshold_provider = Some(provider);
    }

    /// Polls the registered `ThresholdProvider`, if any, and preloads each
    /// configured instrument's threshold from the returned table. A failed
    /// poll is logged and leaves the previously preloaded table untouched.
    async fn refresh_thresholds(&mut self) {
        let Some(provider) = self.threshold_provider.clone() else { return };
        match provider.get_thresholds().await {
            Ok(thresholds) => {
                for (name, token) in &self.config.instruments {
                    self.enricher.set_threshold(*token, thresholds.get(name).copied());
                }
                tracing::info!(count = thresholds.len(), "threshold table refreshed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "threshold refresh failed, keeping previously preloaded table");
            }
        }
    }

    /// Runs until the source is exhausted or `shutdown` reports `true`.
    pub async fn run(&mut self, mut source: Box<dyn TickSource>, mut shutdown: watch::Receiver<bool>) {
        self.refresh_thresholds().await;

        let (tx, mut rx) = mpsc::channel::<Tick>(QUEUE_CAPACITY);

        let producer = tokio::spawn(async move {
            loop {
                match source.next_tick().await {
                    Ok(Some(tick)) => {
                        if tx.send(tick).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "tick source failed, stopping producer");
                        break;
                    }
                }
            }
        });

        let mut tick_batch: Vec<EnrichedTick> = Vec::new();
        let mut bar_batch: Vec<Bar> = Vec::new();
        let mut signal_batch: Vec<SignalEvent> = Vec::new();
        let mut last_flush = Instant::now();
        let mut last_threshold_refresh = Instant::now();

        loop {
            if *shutdown.borrow() {
                tracing::info!("shutdown signaled, draining queue");
                break;
            }

            match timeout(RECV_TIMEOUT, rx.recv()).await {
                Ok(Some(tick)) => {
                    self.ingest(tick, &mut tick_batch, &mut bar_batch, &mut signal_batch);
                }
                Ok(None) => break,
                Err(_) => {}
            }

            self.maybe_flush(&mut tick_batch, &mut bar_batch, &mut signal_batch, &mut last_flush).await;

            if let Some(minutes) = self.config.threshold_refresh_minutes {
                if last_threshold_refresh.elapsed() >= Duration::from_secs(minutes * 60) {
                    self.refresh_thresholds().await;
                    last_threshold_refresh = Instant::now();
                }
            }
        }

        while let Ok(tick) = rx.try_recv() {
            self.ingest(tick, &mut tick_batch, &mut bar_batch, &mut signal_batch);
        }
        self.flush(&mut tick_batch, &mut bar_batch, &mut signal_batch).await;
        producer.abort();
    }

    fn ingest(
        &mut self,
        tick: Tick,
        tick_batch: &mut Vec<EnrichedTick>,
        bar_batch: &mut Vec<Bar>,
        signal_batch: &mut Vec<SignalEvent>,
    ) {
        let enriched = self.enricher.enrich(&tick);
        self.push_window(enriched.clone());

        for update in self.registry.process_tick(&enriched) {
            if let Some(finalized) = &update.finalized {
                signal_batch.extend(self.signal_engine.process_bar(finalized));
                bar_batch.push(finalized.clone());
            }
            bar_batch.push(update.building);
        }
        tick_batch.push(enriched);
    }

    fn push_window(&mut self, tick: EnrichedTick) {
        let now = tick.timestamp();
        self.data_window.push_back(tick);
        let window_seconds = self.config.data_window_minutes * 60;
        while let Some(front) = self.data_window.front() {
            if (now - front.timestamp()).num_seconds() > window_seconds {
                self.data_window.pop_front();
            } else {
                break;
            }
        }
    }

    async fn maybe_flush(
        &self,
        tick_batch: &mut Vec<EnrichedTick>,
        bar_batch: &mut Vec<Bar>,
        signal_batch: &mut Vec<SignalEvent>,
        last_flush: &mut Instant,
    ) {
        let age_exceeded = last_flush.elapsed() >= Duration::from_secs(self.config.batch_interval_seconds);
        let has_pending = !tick_batch.is_empty() || !bar_batch.is_empty() || !signal_batch.is_empty();
        let size_exceeded =
            tick_batch.len() >= self.config.batch_size_ticks || bar_batch.len() >= self.config.batch_size_bars;

        if size_exceeded || (age_exceeded && has_pending) {
            self.flush(tick_batch, bar_batch, signal_batch).await;
            *last_flush = Instant::now();
        }
    }

    /// A failed sink keeps its batch for the next flush attempt instead of
    /// dropping data or propagating the failure to the caller (§5).
    async fn flush(&self, tick_batch: &mut Vec<EnrichedTick>, bar_batch: &mut Vec<Bar>, signal_batch: &mut Vec<SignalEvent>) {
        if !bar_batch.is_empty() {
            match self.bar_sink.upsert_batch(bar_batch).await {
                Ok(()) => bar_batch.clear(),
                Err(e) => tracing::warn!(error = %e, count = bar_batch.len(), "bar sink flush failed, retrying next interval"),
            }
        }
        if !signal_batch.is_empty() {
            match self.signal_sink.append(signal_batch).await {
                Ok(()) => signal_batch.clear(),
                Err(e) => tracing::warn!(error = %e, count = signal_batch.len(), "signal sink flush failed, retrying next interval"),
            }
        }
        if let Some(sink) = &self.tick_sink {
            if !tick_batch.is_empty() {
                match sink.append_batch(tick_batch).await {
                    Ok(()) => tick_batch.clear(),
                    Err(e) => tracing::warn!(error = %e, count = tick_batch.len(), "tick sink flush failed, retrying next interval"),
                }
            }
        } else {
            tick_batch.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{LoggingBarSink, LoggingSignalSink};
    use crate::source::VecTickSource;
    use chrono::Utc;

    fn tick(price: f64) -> Tick {
        Tick {
            timestamp: Utc::now(),
            instrument_token: 1,
            stock_name: "TEST".into(),
            last_price: Some(price),
            last_traded_quantity: None,
            average_traded_price: None,
            volume_traded: None,
            total_buy_quantity: None,
            total_sell_quantity: None,
            depth: None,
        }
    }

    #[tokio::test]
    async fn drains_a_finite_source_and_returns() {
        let mut config = EngineConfig::default();
        config.intervals_minutes = vec![1];
        let mut pipeline = Pipeline::new(&config, Arc::new(LoggingBarSink), Arc::new(LoggingSignalSink), None);

        let source = Box::new(VecTickSource::new(vec![tick(100.0), tick(101.0), tick(99.0)]));
        let (_tx, rx) = watch::channel(false);

        pipeline.run(source, rx).await;
        assert_eq!(pipeline.data_window.len(), 3);
    }

    #[tokio::test]
    async fn startup_poll_preloads_threshold_from_provider() {
        use crate::threshold::StaticThresholdProvider;
        use std::collections::HashMap;

        let mut config = EngineConfig::default();
        config.intervals_minutes = vec![1];
        config.instruments.insert("TEST".into(), 1);
        let mut pipeline = Pipeline::new(&config, Arc::new(LoggingBarSink), Arc::new(LoggingSignalSink), None);

        let mut table = HashMap::new();
        table.insert("TEST".to_string(), 5000);
        pipeline.set_threshold_provider(Arc::new(StaticThresholdProvider::new(table)));

        let source = Box::new(VecTickSource::new(vec![tick(100.0)]));
        let (_tx, rx) = watch::channel(false);
        pipeline.run(source, rx).await;

        assert_eq!(pipeline.enricher.threshold_for(1), Some(5000));
    }
}
