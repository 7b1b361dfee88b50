/// model/signal.rs — trade-state and signal-event value types (C1, C6)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bar::RawScores;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    None,
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LongEntry,
    ShortEntry,
    LongExit,
    ShortExit,
    PartialExit,
}

/// Semantic label attached to an interval, used to route signals to
/// timeframe-appropriate consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    Micro,
    Fast,
    Trade,
    Swing,
    Structural,
}

impl Authority {
    /// `1m→micro, 3m→fast, 5m→trade, 10m→swing, 15m→structural` (§4.6).
    /// Intervals outside the default set fall back to the nearest named tier.
    pub fn for_interval_minutes(interval_minutes: u32) -> Self {
        match interval_minutes {
            0..=1 => Authority::Micro,
            2..=3 => Authority::Fast,
            4..=5 => Authority::Trade,
            6..=10 => Authority::Swing,
            _ => Authority::Structural,
        }
    }
}

/// Per (instrument, interval) open-position bookkeeping.
#[derive(Debug, Clone)]
pub struct TradeState {
    pub position: Position,
    pub entry_price: f64,
    pub entry_time: Option<DateTime<Utc>>,
    pub stop_price: Option<f64>,
    pub peak_price: f64,
    pub mae_price: f64,
    pub scaled_out: bool,
}

impl Default for TradeState {
    fn default() -> Self {
        Self {
            position: Position::None,
            entry_price: 0.0,
            entry_time: None,
            stop_price: None,
            peak_price: 0.0,
            mae_price: 0.0,
            scaled_out: false,
        }
    }
}

/// Emitted entry/exit/partial-exit event with full performance accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvent {
    pub event_time: DateTime<Utc>,
    pub stock_name: String,
    pub instrument_token: i64,
    pub interval_minutes: u32,
    pub authority: Authority,
    pub event_type: EventType,
    pub side: Side,
    pub price: f64,
    pub vwap: Option<f64>,
    pub cost_regime: i8,
    pub path_regime: i8,
    pub accept_regime: i8,
    pub entry_price: f64,
    pub peak_price: f64,
    pub mfe_pct: f64,
    pub mae_pct: f64,
    pub pnl_pct: f64,
    pub reason: String,
    pub indicators: RawScores,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_follows_the_default_interval_map() {
        assert_eq!(Authority::for_interval_minutes(1), Authority::Micro);
        assert_eq!(Authority::for_interval_minutes(3), Authority::Fast);
        assert_eq!(Authority::for_interval_minutes(5), Authority::Trade);
        assert_eq!(Authority::for_interval_minutes(10), Authority::Swing);
        assert_eq!(Authority::for_interval_minutes(15), Authority::Structural);
    }
}
