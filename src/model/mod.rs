/// model — value types for C1: tick, depth, enriched tick, bar, signal.
mod bar;
mod signal;
mod tick;

pub use bar::{Bar, DivergenceScores, RawScores, Structure};
pub use signal::{Authority, EventType, Position, Side, SignalEvent, TradeState};
pub use tick::{DepthLevel, EnrichedTick, OrderBookSnapshot, Tick};
