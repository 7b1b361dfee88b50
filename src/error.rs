/// error.rs — crate-level error taxonomy (§7)
use thiserror::Error;

/// Recoverable-or-fatal error split from the error-handling design (§7).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed tick for instrument {instrument_token}: {reason}")]
    MalformedInput { instrument_token: i64, reason: String },

    #[error("sink failure ({sink}): {reason}")]
    SinkFailure { sink: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("threshold provider failure: {0}")]
    ThresholdProviderFailure(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Whether the processor may continue after logging this error (§7).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::Fatal(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
