/// registry.rs — multi-interval bar-aggregator registry (C5)
///
/// Lazily creates one `BarAggregator` per (instrument, interval) and fans
/// each enriched tick out to all of an instrument's configured intervals.
use ahash::AHashMap;
use tracing::info;

use crate::bar_aggregator::BarAggregator;
use crate::model::{Bar, EnrichedTick};

/// One tick's worth of aggregation output across every interval it touched.
/// Mirrors the Python processor's habit of always surfacing the in-progress
/// building bar alongside any bar that just finalized.
#[derive(Debug, Clone)]
pub struct BarUpdate {
    pub interval_minutes: u32,
    pub finalized: Option<Bar>,
    pub building: Bar,
}

pub struct BarAggregatorRegistry {
    intervals_minutes: Vec<u32>,
    indicator_period: usize,
    divergence_lookback_minutes: u32,
    aggregators: AHashMap<(i64, u32), BarAggregator>,
}

impl BarAggregatorRegistry {
    pub fn new(intervals_minutes: Vec<u32>, indicator_period: usize, divergence_lookback_minutes: u32) -> Self {
        Self {
            intervals_minutes,
            indicator_period,
            divergence_lookback_minutes,
            aggregators: AHashMap::new(),
        }
    }

    /// Feeds `tick` to every configured interval for its instrument, returning
    /// one `BarUpdate` per interval (finalized bar is `Some` only on rollover).
    pub fn process_tick(&mut self, tick: &EnrichedTick) -> Vec<BarUpdate> {
        let instrument_token = tick.tick.instrument_token;
        let stock_name = tick.tick.stock_name.clone();
        let intervals = self.intervals_minutes.clone();

        let mut updates = Vec::with_capacity(intervals.len());
        for interval_minutes in intervals {
            let key = (instrument_token, interval_minutes);
            let aggregator = self.aggregators.entry(key).or_insert_with(|| {
                info!(stock = %stock_name, instrument_token, interval_minutes, "creating new bar aggregator");
                BarAggregator::new(
                    stock_name.clone(),
                    instrument_token,
                    interval_minutes,
                    self.indicator_period,
                    self.divergence_lookback_minutes,
                )
            });

            let finalized = aggregator.add_tick(tick);
            if let Some(building) = aggregator.building_bar().cloned() {
                updates.push(BarUpdate { interval_minutes, finalized, building });
            }
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tick;
    use chrono::Utc;

    fn tick(price: f64) -> EnrichedTick {
        EnrichedTick {
            tick: Tick {
                timestamp: Utc::now(),
                instrument_token: 7,
                stock_name: "TEST".into(),
                last_price: Some(price),
                last_traded_quantity: None,
                average_traded_price: None,
                volume_traded: None,
                total_buy_quantity: None,
                total_sell_quantity: None,
                depth: None,
            },
            tick_volume: 0,
            trade_sign: 0,
            is_large_trade: false,
            is_buy_absorption: false,
            is_sell_absorption: false,
        }
    }

    #[test]
    fn fans_one_tick_out_to_every_configured_interval() {
        let mut registry = BarAggregatorRegistry::new(vec![1, 5], 14, 30);
        let updates = registry.process_tick(&tick(100.0));
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn lazily_creates_aggregators_per_instrument_and_interval() {
        let mut registry = BarAggregatorRegistry::new(vec![1], 14, 30);
        registry.process_tick(&tick(100.0));
        assert_eq!(registry.aggregators.len(), 1);
    }
}
