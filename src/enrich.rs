/// enrich.rs — per-instrument feature enrichment (C2)
///
/// Maintains, per instrument: previous tick, previous best bid/ask, iceberg
/// refill counters, a large-trade threshold (preloaded or none), the last
/// non-zero trade sign, and a rolling window of recent `tick_volume` samples
/// used as a dynamic-threshold fallback once the window has enough history.
use std::collections::{HashMap, VecDeque};

use ahash::RandomState;
use tracing::warn;

use crate::model::{EnrichedTick, Tick};
use crate::numeric::percentile;

const VOLUME_WINDOW_CAP: usize = 1000;
const FALLBACK_MIN_SAMPLES: usize = 200;
const FALLBACK_PERCENTILE: f64 = 99.0;
const ABSORPTION_CONFIRM_DEFAULT: u32 = 2;

#[derive(Debug, Clone, Copy)]
struct BestLevel {
    price: f64,
    quantity: i64,
}

struct InstrumentState {
    prev_cum_volume: Option<i64>,
    prev_last_price: Option<f64>,
    prev_best_bid: Option<BestLevel>,
    prev_best_ask: Option<BestLevel>,
    buy_refill_count: u32,
    sell_refill_count: u32,
    large_trade_threshold: Option<i64>,
    last_nonzero_sign: i8,
    volume_window: VecDeque<i64>,
}

impl InstrumentState {
    fn new(large_trade_threshold: Option<i64>) -> Self {
        Self {
            prev_cum_volume: None,
            prev_last_price: None,
            prev_best_bid: None,
            prev_best_ask: None,
            buy_refill_count: 0,
            sell_refill_count: 0,
            large_trade_threshold,
            last_nonzero_sign: 0,
            volume_window: VecDeque::with_capacity(VOLUME_WINDOW_CAP),
        }
    }
}

/// C2: per-instrument feature enrichment. `enrich` is a pure function of the
/// tick plus this state; state is updated after the output is produced.
pub struct FeatureEnricher {
    states: HashMap<i64, InstrumentState, RandomState>,
    absorption_confirm_threshold: u32,
}

impl FeatureEnricher {
    pub fn new(absorption_confirm_threshold: u32) -> Self {
        Self {
            states: HashMap::with_hasher(RandomState::new()),
            absorption_confirm_threshold: if absorption_confirm_threshold == 0 {
                ABSORPTION_CONFIRM_DEFAULT
            } else {
                absorption_confirm_threshold
            },
        }
    }

    /// Preload (or clear) a per-instrument large-trade threshold (C8 hookup).
    pub fn set_threshold(&mut self, instrument_token: i64, threshold: Option<i64>) {
        self.states
            .entry(instrument_token)
            .or_insert_with(|| InstrumentState::new(threshold))
            .large_trade_threshold = threshold;
    }

    /// The threshold currently preloaded for an instrument, if any (test hook).
    pub fn threshold_for(&self, instrument_token: i64) -> Option<i64> {
        self.states.get(&instrument_token).and_then(|s| s.large_trade_threshold)
    }

    pub fn enrich(&mut self, tick: &Tick) -> EnrichedTick {
        let state = self
            .states
            .entry(tick.instrument_token)
            .or_insert_with(|| InstrumentState::new(None));

        let tick_volume = match (state.prev_cum_volume, tick.volume_traded) {
            (Some(prev), Some(cur)) if cur >= prev => cur - prev,
            _ => 0,
        };

        let best_bid = tick.best_bid().map(|l| BestLevel { price: l.price, quantity: l.quantity });
        let best_ask = tick.best_ask().map(|l| BestLevel { price: l.price, quantity: l.quantity });

        let trade_sign = classify_trade_sign(tick.last_price, best_bid, best_ask, state);

        record_volume_sample(tick_volume, state);
        let is_large_trade = if tick_volume > 0 { classify_large_trade(tick_volume, state) } else { false };

        let (is_buy_absorption, is_sell_absorption) =
            update_absorption(tick_volume, trade_sign, best_bid, best_ask, state, self.absorption_confirm_threshold);

        if let Some(last_price) = tick.last_price {
            state.prev_last_price = Some(last_price);
        }
        if let Some(cum_volume) = tick.volume_traded {
            state.prev_cum_volume = Some(cum_volume);
        }
        state.prev_best_bid = best_bid;
        state.prev_best_ask = best_ask;
        if trade_sign != 0 {
            state.last_nonzero_sign = trade_sign;
        }

        EnrichedTick {
            tick: tick.clone(),
            tick_volume,
            trade_sign,
            is_large_trade,
            is_buy_absorption,
            is_sell_absorption,
        }
    }
}

fn classify_trade_sign(
    last_price: Option<f64>,
    best_bid: Option<BestLevel>,
    best_ask: Option<BestLevel>,
    state: &InstrumentState,
) -> i8 {
    let tick_rule = |price: f64| -> i8 {
        match state.prev_last_price {
            Some(prev) if price > prev => 1,
            Some(prev) if price < prev => -1,
            Some(_) => state.last_nonzero_sign,
            None => state.last_nonzero_sign,
        }
    };

    if let (Some(bid), Some(ask)) = (best_bid, best_ask) {
        if ask.price <= bid.price {
            return match last_price {
                Some(p) => tick_rule(p),
                None => state.last_nonzero_sign,
            };
        }
        if let Some(price) = last_price {
            if price >= ask.price {
                return 1;
            }
            if price <= bid.price {
                return -1;
            }
            return tick_rule(price);
        }
        return state.last_nonzero_sign;
    }

    match last_price {
        Some(price) => tick_rule(price),
        None => state.last_nonzero_sign,
    }
}

/// Appends to the fallback volume window regardless of whether this tick
/// carried a trade, so the rolling percentile isn't biased by omitting
/// zero-volume ticks.
fn record_volume_sample(tick_volume: i64, state: &mut InstrumentState) {
    if state.volume_window.len() == VOLUME_WINDOW_CAP {
        state.volume_window.pop_front();
    }
    state.volume_window.push_back(tick_volume);
}

fn classify_large_trade(tick_volume: i64, state: &mut InstrumentState) -> bool {
    match state.large_trade_threshold {
        Some(threshold) => tick_volume >= threshold,
        None => {
            if state.volume_window.len() > FALLBACK_MIN_SAMPLES {
                let p99 = percentile(state.volume_window.make_contiguous(), FALLBACK_PERCENTILE);
                tick_volume as f64 >= p99
            } else {
                false
            }
        }
    }
}

fn update_absorption(
    tick_volume: i64,
    trade_sign: i8,
    best_bid: Option<BestLevel>,
    best_ask: Option<BestLevel>,
    state: &mut InstrumentState,
    confirm_threshold: u32,
) -> (bool, bool) {
    let ask_price_changed = match (state.prev_best_ask, best_ask) {
        (Some(prev), Some(cur)) => (prev.price - cur.price).abs() > f64::EPSILON,
        (None, Some(_)) => true,
        _ => false,
    };
    let bid_price_changed = match (state.prev_best_bid, best_bid) {
        (Some(prev), Some(cur)) => (prev.price - cur.price).abs() > f64::EPSILON,
        (None, Some(_)) => true,
        _ => false,
    };

    if ask_price_changed {
        state.sell_refill_count = 0;
    } else if trade_sign == 1 && tick_volume > 0 {
        if let (Some(prev_ask), Some(cur_ask)) = (state.prev_best_ask, best_ask) {
            if cur_ask.quantity > prev_ask.quantity - tick_volume {
                state.sell_refill_count += 1;
            }
        }
    }

    if bid_price_changed {
        state.buy_refill_count = 0;
    } else if trade_sign == -1 && tick_volume > 0 {
        if let (Some(prev_bid), Some(cur_bid)) = (state.prev_best_bid, best_bid) {
            if cur_bid.quantity > prev_bid.quantity - tick_volume {
                state.buy_refill_count += 1;
            }
        }
    }

    let is_sell_absorption = state.sell_refill_count >= confirm_threshold;
    let is_buy_absorption = state.buy_refill_count >= confirm_threshold;
    if is_sell_absorption || is_buy_absorption {
        warn!(sell = is_sell_absorption, buy = is_buy_absorption, "absorption confirmed");
    }
    (is_buy_absorption, is_sell_absorption)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DepthLevel, OrderBookSnapshot};
    use chrono::Utc;

    fn tick_with(
        last_price: Option<f64>,
        volume_traded: Option<i64>,
        bid: Option<(f64, i64)>,
        ask: Option<(f64, i64)>,
    ) -> Tick {
        let depth = if bid.is_some() || ask.is_some() {
            Some(OrderBookSnapshot {
                timestamp: Utc::now(),
                stock_name: "TEST".into(),
                instrument_token: 1,
                buy: bid
                    .map(|(p, q)| vec![DepthLevel { price: p, quantity: q, orders: 1 }])
                    .unwrap_or_default(),
                sell: ask
                    .map(|(p, q)| vec![DepthLevel { price: p, quantity: q, orders: 1 }])
                    .unwrap_or_default(),
            })
        } else {
            None
        };
        Tick {
            timestamp: Utc::now(),
            instrument_token: 1,
            stock_name: "TEST".into(),
            last_price,
            last_traded_quantity: None,
            average_traded_price: None,
            volume_traded,
            total_buy_quantity: None,
            total_sell_quantity: None,
            depth,
        }
    }

    #[test]
    fn tick_volume_is_zero_on_first_tick() {
        let mut e = FeatureEnricher::new(2);
        let out = e.enrich(&tick_with(Some(100.0), Some(10_000), None, None));
        assert_eq!(out.tick_volume, 0);
    }

    #[test]
    fn tick_volume_clamps_to_zero_on_regression() {
        let mut e = FeatureEnricher::new(2);
        e.enrich(&tick_with(Some(100.0), Some(10_000), None, None));
        let out = e.enrich(&tick_with(Some(100.0), Some(9_000), None, None));
        assert_eq!(out.tick_volume, 0);
    }

    #[test]
    fn large_trade_flagged_via_preloaded_threshold() {
        // S4
        let mut e = FeatureEnricher::new(2);
        e.set_threshold(1, Some(1000));
        e.enrich(&tick_with(Some(100.0), Some(10_000), None, None));
        let out = e.enrich(&tick_with(Some(100.0), Some(11_500), None, None));
        assert_eq!(out.tick_volume, 1500);
        assert!(out.is_large_trade);
    }

    #[test]
    fn aggressor_at_ask_is_buy() {
        // S5
        let mut e = FeatureEnricher::new(2);
        let out = e.enrich(&tick_with(Some(100.50), None, Some((100.0, 10)), Some((100.50, 10))));
        assert_eq!(out.trade_sign, 1);
    }

    #[test]
    fn sell_side_absorption_confirms_on_third_tick() {
        // S6: stable ask, repeated aggressive buys that don't deplete displayed quantity
        let mut e = FeatureEnricher::new(2);
        let mut cum = 10_000i64;
        let mut last = e.enrich(&tick_with(Some(100.50), Some(cum), Some((100.0, 50)), Some((100.50, 20))));
        assert!(!last.is_sell_absorption);
        for _ in 0..2 {
            cum += 10;
            last = e.enrich(&tick_with(Some(100.50), Some(cum), Some((100.0, 50)), Some((100.50, 20))));
        }
        assert!(last.is_sell_absorption, "expected sell absorption confirmed by third tick");
    }
}
