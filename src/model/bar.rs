/// model/bar.rs — finalized/in-progress bar and its typed indicator record (C1, C4)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Categorical market-structure label assigned at finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Structure {
    Up,
    Down,
    Inside,
    Outside,
    Mixed,
    Init,
}

/// Tier-1/Tier-2 divergence scores, keyed by closed enumeration rather than a
/// dynamic map (see DESIGN.md — replaces the attribute-keyed scores dict).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DivergenceScores {
    pub price_vs_lvc: f64,
    pub price_vs_cvd: f64,
    pub price_vs_obv: f64,
    pub price_vs_rsi: f64,
    pub price_vs_mfi: f64,
    pub price_vs_clv: f64,
    pub lvc_vs_cvd: f64,
    pub lvc_vs_obv: f64,
    pub lvc_vs_rsi: f64,
    pub lvc_vs_mfi: f64,
}

/// Indicator values attached to a bar. `divergence` is `None` until the
/// lookback window has enough history (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScores {
    pub bar_delta: i64,
    pub cvd_5m: i64,
    pub cvd_10m: i64,
    pub cvd_30m: i64,
    pub rsi: f64,
    pub mfi: f64,
    pub obv: i64,
    pub lvc_delta: i64,
    pub large_buy_volume: i64,
    pub large_sell_volume: i64,
    pub passive_buy_volume: i64,
    pub passive_sell_volume: i64,
    pub clv: f64,
    pub clv_smoothed: f64,
    pub divergence: Option<DivergenceScores>,

    // finalization-only fields
    pub hh: bool,
    pub hl: bool,
    pub lh: bool,
    pub ll: bool,
    pub inside: bool,
    pub outside: bool,
    pub structure: Structure,
    pub structure_ratio: f64,
    pub price_acceptance: i8,
}

impl Default for RawScores {
    fn default() -> Self {
        Self {
            bar_delta: 0,
            cvd_5m: 0,
            cvd_10m: 0,
            cvd_30m: 0,
            rsi: 50.0,
            mfi: 50.0,
            obv: 0,
            lvc_delta: 0,
            large_buy_volume: 0,
            large_sell_volume: 0,
            passive_buy_volume: 0,
            passive_sell_volume: 0,
            clv: 0.0,
            clv_smoothed: 0.0,
            divergence: None,
            hh: false,
            hl: false,
            lh: false,
            ll: false,
            inside: false,
            outside: false,
            structure: Structure::Init,
            structure_ratio: 0.0,
            price_acceptance: 0,
        }
    }
}

/// One interval's OHLCV bucket plus derived features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub stock_name: String,
    pub instrument_token: i64,
    pub interval_minutes: u32,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub bar_vwap: f64,
    pub session_vwap: Option<f64>,
    pub bar_count: usize,
    pub raw_scores: RawScores,
}

impl Bar {
    pub fn key(&self) -> (i64, u32, DateTime<Utc>) {
        (self.instrument_token, self.interval_minutes, self.timestamp)
    }
}
