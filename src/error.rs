/// Typed error surface for the replay engine.
///
/// The HTTP layer maps each variant to a status code (spec §6.2/§7); the
/// binary layer (startup, background tasks) still uses `anyhow`, matching
/// the split already present in the teacher crate.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("timeframe {0} is not available")]
    TimeframeUnavailable(String),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("transition timed out after {0}ms")]
    TransitionTimedOut(u64),

    #[error("transition failed: {0}")]
    TransitionFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl ReplayError {
    /// Whether this error is an input error (4xx, no state mutation) per
    /// the taxonomy in spec §7, as opposed to a transition/data error.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            ReplayError::UnknownTimeframe(_)
                | ReplayError::TimeframeUnavailable(_)
                | ReplayError::InvalidDate(_)
        )
    }
}
