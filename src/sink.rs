/// sink.rs — injected, append-only output interfaces (§6)
///
/// The core never reads a sink back. A failed flush is retried at the next
/// batch interval and reported but must not corrupt in-memory state (§5).
use async_trait::async_trait;

use crate::error::EngineError;
use crate::model::{Bar, EnrichedTick, OrderBookSnapshot, SignalEvent};

#[async_trait]
pub trait BarSink: Send + Sync {
    /// `(stock, interval, timestamp)` is the primary key; later calls overwrite.
    async fn upsert_batch(&self, bars: &[Bar]) -> Result<(), EngineError>;
}

#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn append(&self, events: &[SignalEvent]) -> Result<(), EngineError>;
}

#[async_trait]
pub trait EnrichedTickSink: Send + Sync {
    async fn append_batch(&self, ticks: &[EnrichedTick]) -> Result<(), EngineError>;
}

/// Optional; many deployments disable depth capture entirely (§6).
#[async_trait]
pub trait DepthSink: Send + Sync {
    async fn append_batch(&self, snapshots: &[OrderBookSnapshot]) -> Result<(), EngineError>;
}

/// Logs every batch at debug level and never fails. Used by the demo
/// binaries in place of the persistence store this core deliberately
/// excludes (§1).
pub struct LoggingBarSink;

#[async_trait]
impl BarSink for LoggingBarSink {
    async fn upsert_batch(&self, bars: &[Bar]) -> Result<(), EngineError> {
        for bar in bars {
            tracing::debug!(stock = %bar.stock_name, interval = bar.interval_minutes, timestamp = %bar.timestamp, close = bar.close, "bar");
        }
        Ok(())
    }
}

pub struct LoggingSignalSink;

#[async_trait]
impl SignalSink for LoggingSignalSink {
    async fn append(&self, events: &[SignalEvent]) -> Result<(), EngineError> {
        for event in events {
            tracing::info!(stock = %event.stock_name, event_type = ?event.event_type, price = event.price, pnl_pct = event.pnl_pct, "signal");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar() -> Bar {
        Bar {
            timestamp: Utc::now(),
            stock_name: "TEST".into(),
            instrument_token: 1,
            interval_minutes: 1,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0,
            bar_vwap: 0.0,
            session_vwap: None,
            bar_count: 1,
            raw_scores: crate::model::RawScores::default(),
        }
    }

    #[tokio::test]
    async fn logging_bar_sink_never_fails() {
        let sink = LoggingBarSink;
        assert!(sink.upsert_batch(&[bar()]).await.is_ok());
    }
}
