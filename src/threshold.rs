/// threshold.rs — abstract source of per-instrument large-trade thresholds (C8)
use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::EngineError;

/// Injected by the enclosing program; no source-specific coupling lives here.
/// Missing instruments default to "no preloaded threshold" at the call site.
#[async_trait]
pub trait ThresholdProvider: Send + Sync {
    async fn get_thresholds(&self) -> Result<HashMap<String, i64>, EngineError>;
}

/// A fixed, in-memory table — the demo binaries' default provider.
pub struct StaticThresholdProvider {
    thresholds: HashMap<String, i64>,
}

impl StaticThresholdProvider {
    pub fn new(thresholds: HashMap<String, i64>) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl ThresholdProvider for StaticThresholdProvider {
    async fn get_thresholds(&self) -> Result<HashMap<String, i64>, EngineError> {
        Ok(self.thresholds.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_preloaded_table() {
        let mut table = HashMap::new();
        table.insert("RELIANCE".to_string(), 5000);
        let provider = StaticThresholdProvider::new(table);
        let thresholds = provider.get_thresholds().await.unwrap();
        assert_eq!(thresholds.get("RELIANCE"), Some(&5000));
    }
}
