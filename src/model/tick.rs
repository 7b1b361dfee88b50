/// model/tick.rs — input tick and order-book value types (C1)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single price level in an order book ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: i64,
    pub orders: i32,
}

/// Best-bid/ask ladder for one instrument at one instant.
///
/// `buy` is ordered bid-descending, `sell` ask-ascending; index 0 is "best".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub timestamp: DateTime<Utc>,
    pub stock_name: String,
    pub instrument_token: i64,
    pub buy: Vec<DepthLevel>,
    pub sell: Vec<DepthLevel>,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.buy.first()
    }

    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.sell.first()
    }
}

/// Raw market-data update for one instrument. Fields are immutable once built;
/// all mutation lives in the enricher/aggregator state that consumes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub instrument_token: i64,
    pub stock_name: String,
    pub last_price: Option<f64>,
    pub last_traded_quantity: Option<i64>,
    pub average_traded_price: Option<f64>,
    pub volume_traded: Option<i64>,
    pub total_buy_quantity: Option<i64>,
    pub total_sell_quantity: Option<i64>,
    pub depth: Option<OrderBookSnapshot>,
}

impl Tick {
    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.depth.as_ref().and_then(|d| d.best_bid())
    }

    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.depth.as_ref().and_then(|d| d.best_ask())
    }
}

/// `Tick` extended with derived per-tick features (C2 output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedTick {
    pub tick: Tick,
    /// Non-negative; zero on first tick for the instrument or on cum-volume regression.
    pub tick_volume: i64,
    /// -1, 0, or +1.
    pub trade_sign: i8,
    pub is_large_trade: bool,
    pub is_buy_absorption: bool,
    pub is_sell_absorption: bool,
}

impl EnrichedTick {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.tick.timestamp
    }

    pub fn last_price(&self) -> Option<f64> {
        self.tick.last_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(buy: Vec<(f64, i64, i32)>, sell: Vec<(f64, i64, i32)>) -> OrderBookSnapshot {
        OrderBookSnapshot {
            timestamp: Utc::now(),
            stock_name: "TEST".into(),
            instrument_token: 1,
            buy: buy
                .into_iter()
                .map(|(price, quantity, orders)| DepthLevel { price, quantity, orders })
                .collect(),
            sell: sell
                .into_iter()
                .map(|(price, quantity, orders)| DepthLevel { price, quantity, orders })
                .collect(),
        }
    }

    #[test]
    fn best_bid_ask_are_level_zero() {
        let d = depth(vec![(100.0, 10, 1), (99.5, 20, 2)], vec![(100.5, 5, 1), (101.0, 8, 3)]);
        assert_eq!(d.best_bid().unwrap().price, 100.0);
        assert_eq!(d.best_ask().unwrap().price, 100.5);
    }

    #[test]
    fn tick_with_no_depth_has_no_best_levels() {
        let t = Tick {
            timestamp: Utc::now(),
            instrument_token: 1,
            stock_name: "TEST".into(),
            last_price: Some(100.0),
            last_traded_quantity: None,
            average_traded_price: None,
            volume_traded: None,
            total_buy_quantity: None,
            total_sell_quantity: None,
            depth: None,
        };
        assert!(t.best_bid().is_none());
        assert!(t.best_ask().is_none());
    }
}
