//! Error taxonomy for the rate-limit decision engine.
//!
//! Algorithm cores never produce these for data-dependent outcomes (a
//! rejection is a value, not an error); only system failures propagate here.

use thiserror::Error;

/// The kinds of failure the decision engine can report, per the error
/// taxonomy: `InvalidInput`, `ConfigConflict`, `StoreUnavailable`,
/// `Timeout`, `Internal`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RateLimitError {
    /// `tokens <= 0`, an empty key, or a malformed pattern/cron expression.
    /// Reported synchronously; no state is mutated.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Overlapping schedules with equal priority and identical pattern.
    /// Resolved by lexicographic tie-break; this is informational, not fatal.
    #[error("config conflict: {0}")]
    ConfigConflict(String),

    /// The remote store is unreachable or a script call failed. Callers of
    /// the Decide API never see this — the facade fails open instead.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A remote call exceeded its deadline. Treated identically to
    /// `StoreUnavailable` by every caller.
    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An unexpected failure inside an algorithm core. Treated as a
    /// conservative rejection; must never leave state corrupted.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RateLimitError {
    /// `StoreUnavailable` and `Timeout` both resolve to a fail-open decision
    /// at the adapter boundary; this groups them for that purpose.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, RateLimitError>;
