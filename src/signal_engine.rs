/// signal_engine.rs — per (instrument, interval) sensor state machine (C6)
///
/// Three sensors are read off every finalized bar: COST (OBV divergence),
/// PATH (structure ratio), and either ACCEPTANCE (the base machine) or
/// PRESSURE (the timing-with-stops variant). COST and PATH go through a
/// 3-bar regime handshake before they can flip a position.
use std::collections::VecDeque;

use ahash::AHashMap;
use tracing::info;

use crate::config::SignalVariant;
use crate::model::{Authority, Bar, DivergenceScores, EventType, Position, Side, SignalEvent, TradeState};

struct RegimeHistory {
    cost: VecDeque<f64>,
    path: VecDeque<f64>,
}

impl RegimeHistory {
    fn new() -> Self {
        Self { cost: VecDeque::with_capacity(3), path: VecDeque::with_capacity(3) }
    }
}

fn update_regime(hist: &mut VecDeque<f64>, value: f64, threshold: f64) -> i8 {
    if hist.len() >= 3 {
        hist.pop_front();
    }
    hist.push_back(value);
    if hist.len() < 3 {
        return 0;
    }
    if hist.iter().all(|v| *v > threshold) {
        1
    } else if hist.iter().all(|v| *v < -threshold) {
        -1
    } else {
        0
    }
}

fn round_pct(fraction: f64) -> f64 {
    (fraction * 100.0 * 10_000.0).round() / 10_000.0
}

pub struct SignalEngine {
    variant: SignalVariant,
    cost_regime_threshold: f64,
    path_regime_threshold: f64,
    path_chop_threshold: f64,
    pressure_entry_threshold: f64,
    pressure_exit_threshold: f64,
    stop_loss_pct: f64,
    states: AHashMap<(i64, u32), TradeState>,
    regime_hist: AHashMap<(i64, u32), RegimeHistory>,
}

impl SignalEngine {
    pub fn new(
        variant: SignalVariant,
        cost_regime_threshold: f64,
        path_regime_threshold: f64,
        path_chop_threshold: f64,
        pressure_entry_threshold: f64,
        pressure_exit_threshold: f64,
        stop_loss_pct: f64,
    ) -> Self {
        Self {
            variant,
            cost_regime_threshold,
            path_regime_threshold,
            path_chop_threshold,
            pressure_entry_threshold,
            pressure_exit_threshold,
            stop_loss_pct,
            states: AHashMap::new(),
            regime_hist: AHashMap::new(),
        }
    }

    /// Runs on every finalized bar; returns zero or more emitted events.
    pub fn process_bar(&mut self, bar: &Bar) -> Vec<SignalEvent> {
        let key = (bar.instrument_token, bar.interval_minutes);
        let div = bar.raw_scores.divergence.unwrap_or_default();

        let hist = self.regime_hist.entry(key).or_insert_with(RegimeHistory::new);
        let cost = update_regime(&mut hist.cost, div.price_vs_obv, self.cost_regime_threshold);
        let path = update_regime(&mut hist.path, bar.raw_scores.structure_ratio, self.path_regime_threshold);

        match self.variant {
            SignalVariant::Base => self.process_base(bar, key, cost, path),
            SignalVariant::TimingWithStops => self.process_timing(bar, key, cost, path, div),
        }
    }

    fn process_base(&mut self, bar: &Bar, key: (i64, u32), cost: i8, path: i8) -> Vec<SignalEvent> {
        let accept = bar.raw_scores.price_acceptance;
        let state = self.states.entry(key).or_insert_with(TradeState::default);
        let mut events = Vec::new();

        match state.position {
            Position::None => {
                if cost == 1 && accept == 1 && path != -1 {
                    enter_long(state, bar, None);
                    events.push(entry_event(bar, state, EventType::LongEntry, Side::Long, cost, path, accept, "COST+PATH+ACCEPTANCE"));
                } else if cost == -1 && accept == -1 && path != 1 {
                    enter_short(state, bar, None);
                    events.push(entry_event(bar, state, EventType::ShortEntry, Side::Short, cost, path, accept, "COST+PATH+ACCEPTANCE"));
                }
            }
            Position::Long => {
                update_long_extremes(state, bar);
                if cost < 1 || path < 0 {
                    events.push(exit_event(bar, state, EventType::LongExit, Side::Long, cost, path, accept, "INTENT_FADE_OR_PATH_FLIP"));
                    *state = TradeState::default();
                }
            }
            Position::Short => {
                update_short_extremes(state, bar);
                if cost > -1 || path > 0 {
                    events.push(exit_event(bar, state, EventType::ShortExit, Side::Short, cost, path, accept, "INTENT_FADE_OR_PATH_FLIP"));
                    *state = TradeState::default();
                }
            }
        }
        events
    }

    fn process_timing(&mut self, bar: &Bar, key: (i64, u32), cost: i8, path: i8, div: DivergenceScores) -> Vec<SignalEvent> {
        let pressure = div.price_vs_clv;
        let pressure_signal: i8 = if pressure > self.pressure_entry_threshold {
            1
        } else if pressure < -self.pressure_entry_threshold {
            -1
        } else {
            0
        };

        let path_chop_threshold = self.path_chop_threshold;
        let pressure_exit_threshold = self.pressure_exit_threshold;
        let stop_loss_pct = self.stop_loss_pct;
        let state = self.states.entry(key).or_insert_with(TradeState::default);
        let mut events = Vec::new();

        match state.position {
            Position::None => {
                if cost == 1 && pressure_signal == 1 && path != -1 {
                    enter_long(state, bar, Some(stop_loss_pct));
                    events.push(entry_event(bar, state, EventType::LongEntry, Side::Long, cost, path, pressure_signal, "COST+PATH+PRESSURE"));
                } else if cost == -1 && pressure_signal == -1 && path != 1 {
                    enter_short(state, bar, Some(stop_loss_pct));
                    events.push(entry_event(bar, state, EventType::ShortEntry, Side::Short, cost, path, pressure_signal, "COST+PATH+PRESSURE"));
                }
            }
            Position::Long => {
                update_long_extremes(state, bar);
                if !state.scaled_out && pressure < -pressure_exit_threshold && cost == 1 {
                    state.scaled_out = true;
                    events.push(exit_event(bar, state, EventType::PartialExit, Side::Long, cost, path, pressure_signal, "CLV_RESOLUTION_AGAINST_POSITION"));
                }
                let stop_hit = state.stop_price.is_some_and(|sp| bar.close <= sp)
                    && bar.raw_scores.structure_ratio.abs() <= path_chop_threshold;
                if stop_hit || cost < 1 || path < 0 {
                    let reason = if stop_hit { "STOP_LOSS" } else { "INTENT_FADE_OR_PATH_FLIP" };
                    events.push(exit_event(bar, state, EventType::LongExit, Side::Long, cost, path, pressure_signal, reason));
                    *state = TradeState::default();
                }
            }
            Position::Short => {
                update_short_extremes(state, bar);
                if !state.scaled_out && pressure > pressure_exit_threshold && cost == -1 {
                    state.scaled_out = true;
                    events.push(exit_event(bar, state, EventType::PartialExit, Side::Short, cost, path, pressure_signal, "CLV_RESOLUTION_AGAINST_POSITION"));
                }
                let stop_hit = state.stop_price.is_some_and(|sp| bar.close >= sp)
                    && bar.raw_scores.structure_ratio.abs() <= path_chop_threshold;
                if stop_hit || cost > -1 || path > 0 {
                    let reason = if stop_hit { "STOP_LOSS" } else { "INTENT_FADE_OR_PATH_FLIP" };
                    events.push(exit_event(bar, state, EventType::ShortExit, Side::Short, cost, path, pressure_signal, reason));
                    *state = TradeState::default();
                }
            }
        }
        events
    }
}

fn enter_long(state: &mut TradeState, bar: &Bar, stop_loss_pct: Option<f64>) {
    state.position = Position::Long;
    state.entry_price = bar.close;
    state.entry_time = Some(bar.timestamp);
    state.peak_price = bar.high;
    state.mae_price = bar.low;
    state.scaled_out = false;
    state.stop_price = stop_loss_pct.map(|pct| bar.close * (1.0 - pct));
}

fn enter_short(state: &mut TradeState, bar: &Bar, stop_loss_pct: Option<f64>) {
    state.position = Position::Short;
    state.entry_price = bar.close;
    state.entry_time = Some(bar.timestamp);
    state.peak_price = bar.low;
    state.mae_price = bar.high;
    state.scaled_out = false;
    state.stop_price = stop_loss_pct.map(|pct| bar.close * (1.0 + pct));
}

fn update_long_extremes(state: &mut TradeState, bar: &Bar) {
    state.peak_price = state.peak_price.max(bar.high);
    state.mae_price = state.mae_price.min(bar.low);
}

fn update_short_extremes(state: &mut TradeState, bar: &Bar) {
    state.peak_price = state.peak_price.min(bar.low);
    state.mae_price = state.mae_price.max(bar.high);
}

#[allow(clippy::too_many_arguments)]
fn entry_event(
    bar: &Bar,
    state: &TradeState,
    event_type: EventType,
    side: Side,
    cost: i8,
    path: i8,
    accept: i8,
    reason: &str,
) -> SignalEvent {
    let authority = Authority::for_interval_minutes(bar.interval_minutes);
    info!(stock = %bar.stock_name, ?event_type, price = bar.close, "signal entry");
    SignalEvent {
        event_time: bar.timestamp,
        stock_name: bar.stock_name.clone(),
        instrument_token: bar.instrument_token,
        interval_minutes: bar.interval_minutes,
        authority,
        event_type,
        side,
        price: bar.close,
        vwap: bar.session_vwap,
        cost_regime: cost,
        path_regime: path,
        accept_regime: accept,
        entry_price: state.entry_price,
        peak_price: state.peak_price,
        mfe_pct: 0.0,
        mae_pct: 0.0,
        pnl_pct: 0.0,
        reason: format!("[{authority:?}] {reason}"),
        indicators: bar.raw_scores.clone(),
    }
}

#[allow(clippy::too_many_arguments)]
fn exit_event(
    bar: &Bar,
    state: &TradeState,
    event_type: EventType,
    side: Side,
    cost: i8,
    path: i8,
    accept: i8,
    reason: &str,
) -> SignalEvent {
    let authority = Authority::for_interval_minutes(bar.interval_minutes);
    let entry = state.entry_price;
    let (mfe, mae, pnl) = match side {
        Side::Long => (
            (state.peak_price - entry) / entry,
            (state.mae_price - entry) / entry,
            (bar.close - entry) / entry,
        ),
        Side::Short => (
            (entry - state.peak_price) / entry,
            (entry - state.mae_price) / entry,
            (entry - bar.close) / entry,
        ),
    };
    info!(stock = %bar.stock_name, ?event_type, pnl_pct = round_pct(pnl), "signal exit");
    SignalEvent {
        event_time: bar.timestamp,
        stock_name: bar.stock_name.clone(),
        instrument_token: bar.instrument_token,
        interval_minutes: bar.interval_minutes,
        authority,
        event_type,
        side,
        price: bar.close,
        vwap: bar.session_vwap,
        cost_regime: cost,
        path_regime: path,
        accept_regime: accept,
        entry_price: entry,
        peak_price: state.peak_price,
        mfe_pct: round_pct(mfe),
        mae_pct: round_pct(mae),
        pnl_pct: round_pct(pnl),
        reason: format!("[{authority:?}] {reason}"),
        indicators: bar.raw_scores.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawScores;
    use chrono::Utc;

    fn bar(close: f64, high: f64, low: f64, structure_ratio: f64, price_acceptance: i8, price_vs_obv: f64) -> Bar {
        Bar {
            timestamp: Utc::now(),
            stock_name: "TEST".into(),
            instrument_token: 1,
            interval_minutes: 5,
            open: close,
            high,
            low,
            close,
            volume: 100,
            bar_vwap: close,
            session_vwap: Some(close),
            bar_count: 1,
            raw_scores: RawScores {
                structure_ratio,
                price_acceptance,
                divergence: Some(DivergenceScores { price_vs_obv, ..Default::default() }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn long_entry_requires_three_bar_cost_handshake() {
        let mut engine = SignalEngine::new(SignalVariant::Base, 0.25, 0.25, 0.25, 0.25, 0.10, 0.003);
        let b = bar(100.0, 101.0, 99.0, 1.0, 1, 0.5);
        assert!(engine.process_bar(&b).is_empty());
        assert!(engine.process_bar(&b).is_empty());
        let events = engine.process_bar(&b);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::LongEntry);
    }

    #[test]
    fn long_exit_fires_when_cost_fades() {
        let mut engine = SignalEngine::new(SignalVariant::Base, 0.25, 0.25, 0.25, 0.25, 0.10, 0.003);
        let entering = bar(100.0, 101.0, 99.0, 1.0, 1, 0.5);
        for _ in 0..3 {
            engine.process_bar(&entering);
        }
        let fading = bar(101.0, 102.0, 100.0, 1.0, 1, 0.0);
        let events = engine.process_bar(&fading);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::LongExit);
        assert!(events[0].mfe_pct >= events[0].pnl_pct);
        assert!(events[0].pnl_pct >= events[0].mae_pct);
    }
}
