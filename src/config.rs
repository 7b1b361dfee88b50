/// config.rs — injected engine configuration (§6) plus an env-backed loader
/// for the demo binaries. The core itself never reads the environment.
use std::collections::BTreeMap;

use crate::error::EngineError;

/// Selects which §4.6 state-machine variant a `SignalEngine` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalVariant {
    /// PATH/COST/ACCEPTANCE — the core's mandated machine.
    Base,
    /// PATH/COST/PRESSURE with a hard stop and partial-exit (§4.6 superset).
    TimingWithStops,
}

/// Operating mode; affects only how the enclosing program wires the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Live,
    Replay,
}

/// Typed, validated configuration record (§6, §10.3). Construct via
/// `EngineConfig::default()` and override fields, or `AppConfig::from_env()`
/// for the demo binaries.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub instruments: BTreeMap<String, i64>,
    pub intervals_minutes: Vec<u32>,
    pub data_window_minutes: i64,
    pub indicator_period: usize,
    pub iceberg_confirmation_threshold: u32,
    pub divergence_lookback_minutes: u32,

    pub path_regime_threshold: f64,
    pub cost_regime_threshold: f64,
    pub path_chop_threshold: f64,
    pub pressure_entry_threshold: f64,
    pub pressure_exit_threshold: f64,
    pub stop_loss_pct: f64,

    pub batch_size_ticks: usize,
    pub batch_size_bars: usize,
    pub batch_interval_seconds: u64,

    pub mode: Mode,
    pub signal_variant: SignalVariant,
    pub threshold_refresh_minutes: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instruments: BTreeMap::new(),
            intervals_minutes: vec![1, 3, 5, 10, 15],
            data_window_minutes: 60,
            indicator_period: 14,
            iceberg_confirmation_threshold: 2,
            divergence_lookback_minutes: 30,

            path_regime_threshold: 0.25,
            cost_regime_threshold: 0.25,
            path_chop_threshold: 0.25,
            pressure_entry_threshold: 0.25,
            pressure_exit_threshold: 0.10,
            stop_loss_pct: 0.003,

            batch_size_ticks: 1000,
            batch_size_bars: 100,
            batch_interval_seconds: 2,

            mode: Mode::Replay,
            signal_variant: SignalVariant::Base,
            threshold_refresh_minutes: None,
        }
    }
}

impl EngineConfig {
    /// Fail-fast validation (§7: "Configuration invalid ... fails fast at startup").
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.intervals_minutes.is_empty() {
            return Err(EngineError::ConfigInvalid("intervals_minutes must not be empty".into()));
        }
        if self.intervals_minutes.iter().any(|m| *m == 0) {
            return Err(EngineError::ConfigInvalid("interval minutes must be positive".into()));
        }
        if self.indicator_period == 0 {
            return Err(EngineError::ConfigInvalid("indicator_period must be positive".into()));
        }
        if self.data_window_minutes <= 0 {
            return Err(EngineError::ConfigInvalid("data_window_minutes must be positive".into()));
        }
        for (name, value) in [
            ("path_regime_threshold", self.path_regime_threshold),
            ("cost_regime_threshold", self.cost_regime_threshold),
            ("path_chop_threshold", self.path_chop_threshold),
            ("pressure_entry_threshold", self.pressure_entry_threshold),
            ("pressure_exit_threshold", self.pressure_exit_threshold),
            ("stop_loss_pct", self.stop_loss_pct),
        ] {
            if value < 0.0 {
                return Err(EngineError::ConfigInvalid(format!("{name} must be non-negative")));
            }
        }
        if self.batch_size_ticks == 0 || self.batch_size_bars == 0 {
            return Err(EngineError::ConfigInvalid("batch sizes must be positive".into()));
        }
        Ok(())
    }
}

/// Env-backed configuration for the demo binaries (`src/main.rs`,
/// `src/live_main.rs`). Not part of the core — §6 is explicit that no CLI,
/// environment, or on-disk format lives inside it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    /// Directory of per-instrument CSV files for replay mode.
    pub replay_data_directory: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let mut cfg = EngineConfig::default();

        cfg.data_window_minutes = parse_env("DATA_WINDOW_MINUTES", cfg.data_window_minutes)?;
        cfg.indicator_period = parse_env("INDICATOR_PERIOD", cfg.indicator_period)?;
        cfg.iceberg_confirmation_threshold =
            parse_env("ICEBERG_CONFIRMATION_THRESHOLD", cfg.iceberg_confirmation_threshold)?;
        cfg.divergence_lookback_minutes =
            parse_env("DIVERGENCE_LOOKBACK_MINUTES", cfg.divergence_lookback_minutes)?;

        cfg.path_regime_threshold = parse_env("PATH_REGIME_THRESHOLD", cfg.path_regime_threshold)?;
        cfg.cost_regime_threshold = parse_env("COST_REGIME_THRESHOLD", cfg.cost_regime_threshold)?;
        cfg.path_chop_threshold = parse_env("PATH_CHOP_THRESHOLD", cfg.path_chop_threshold)?;
        cfg.pressure_entry_threshold =
            parse_env("PRESSURE_ENTRY_THRESHOLD", cfg.pressure_entry_threshold)?;
        cfg.pressure_exit_threshold =
            parse_env("PRESSURE_EXIT_THRESHOLD", cfg.pressure_exit_threshold)?;
        cfg.stop_loss_pct = parse_env("STOP_LOSS_PCT", cfg.stop_loss_pct)?;

        cfg.batch_size_ticks = parse_env("BATCH_SIZE_TICKS", cfg.batch_size_ticks)?;
        cfg.batch_size_bars = parse_env("BATCH_SIZE_BARS", cfg.batch_size_bars)?;
        cfg.batch_interval_seconds = parse_env("BATCH_INTERVAL_SECONDS", cfg.batch_interval_seconds)?;

        cfg.mode = match std::env::var("PIPELINE_MODE").unwrap_or_else(|_| "replay".into()).as_str() {
            "live" => Mode::Live,
            _ => Mode::Replay,
        };
        cfg.signal_variant = match std::env::var("SIGNAL_VARIANT")
            .unwrap_or_else(|_| "base".into())
            .as_str()
        {
            "timing_with_stops" => SignalVariant::TimingWithStops,
            _ => SignalVariant::Base,
        };
        cfg.threshold_refresh_minutes = std::env::var("THRESHOLD_REFRESH_MINUTES")
            .ok()
            .and_then(|v| v.parse::<u64>().ok());

        let instruments = std::env::var("INSTRUMENTS").unwrap_or_default();
        for pair in instruments.split(',').filter(|s| !s.trim().is_empty()) {
            let mut parts = pair.splitn(2, ':');
            let name = parts.next().unwrap_or_default().trim().to_string();
            let token: i64 = parts
                .next()
                .unwrap_or_default()
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("INSTRUMENTS entry '{pair}': {e}"))?;
            cfg.instruments.insert(name, token);
        }

        cfg.validate().map_err(|e| anyhow::anyhow!(e.to_string()))?;

        Ok(Self {
            engine: cfg,
            replay_data_directory: std::env::var("REPLAY_DATA_DIRECTORY")
                .unwrap_or_else(|_| "./data".into()),
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v.parse::<T>().map_err(|e| anyhow::anyhow!("config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_intervals_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.intervals_minutes.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.stop_loss_pct = -0.01;
        assert!(cfg.validate().is_err());
    }
}
