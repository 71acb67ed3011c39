/// Errors raised by the aggregation engine.
///
/// Missing scores are not errors; they flow through as null cells and are
/// excluded from counts and means.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed thresholds, weights, mode flags or table layout. Raised
    /// immediately, before any aggregation runs.
    #[error("{0}")]
    Config(String),

    /// An observation could not be coerced to what an aggregator expects.
    #[error("{0}")]
    DataFormat(String),
}

impl EngineError {
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Config(message.into())
    }

    pub fn data_format(message: impl Into<String>) -> Self {
        EngineError::DataFormat(message.into())
    }

    /// Error code reported over IPC.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "bad_config",
            EngineError::DataFormat(_) => "data_format",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
