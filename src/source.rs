/// source.rs — injected tick source (§6)
///
/// Produces a lazy, possibly-infinite sequence of ticks into the pipeline's
/// bounded queue. Live feed and chronological CSV replay are both external
/// realizations; this crate only depends on the trait.
use async_trait::async_trait;

use crate::error::EngineError;
use crate::model::Tick;

#[async_trait]
pub trait TickSource: Send {
    /// Returns the next tick, or `None` once the source is exhausted
    /// (replay) — a live feed's `None` never comes and the pipeline only
    /// stops on its shutdown flag.
    async fn next_tick(&mut self) -> Result<Option<Tick>, EngineError>;
}

/// Replays a fixed, pre-ordered sequence of ticks — the demo replay binary's
/// source, standing in for the chronological multi-file CSV merge (§6).
pub struct VecTickSource {
    ticks: std::vec::IntoIter<Tick>,
}

impl VecTickSource {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self { ticks: ticks.into_iter() }
    }
}

#[async_trait]
impl TickSource for VecTickSource {
    async fn next_tick(&mut self) -> Result<Option<Tick>, EngineError> {
        Ok(self.ticks.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tick() -> Tick {
        Tick {
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
        }
    }

    #[tokio::test]
    async fn vec_source_yields_ticks_then_none() {
        let mut source = VecTickSource::new(vec![tick(), tick()]);
        assert!(source.next_tick().await.unwrap().is_some());
        assert!(source.next_tick().await.unwrap().is_some());
        assert!(source.next_tick().await.unwrap().is_none());
    }
}
