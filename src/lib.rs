/// tickbar_engine — real-time tick enrichment, multi-interval bar
/// aggregation, divergence scoring, and a sensor-based trade-signal engine.
pub mod bar_aggregator;
pub mod config;
pub mod divergence;
pub mod enrich;
pub mod error;
pub mod model;
pub mod numeric;
pub mod pipeline;
pub mod registry;
pub mod signal_engine;
pub mod sink;
pub mod source;
pub mod threshold;

pub use error::{EngineError, Result};
