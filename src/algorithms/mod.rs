//! Algorithm cores: token bucket, sliding window, fixed window, leaky bucket.
//!
//! Each algorithm exposes one operation, `try_consume`, that is atomic with
//! respect to any other invocation against the same state (enforced by the
//! caller — see `crate::backend`). State is modeled as a tagged variant
//! rather than a trait-object hierarchy: the four algorithms share one
//! signature and nothing else, so a closed sum is the honest shape.

mod fixed_window;
mod leaky_bucket;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindowState;
pub use leaky_bucket::LeakyBucketState;
pub use sliding_window::SlidingWindowState;
pub use token_bucket::BucketState;

use serde::{Deserialize, Serialize};

/// Which of the four algorithms an `EffectiveConfig` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    TokenBucket,
    SlidingWindow,
    FixedWindow,
    LeakyBucket,
}

/// Effective parameters for a single decision, after layered resolution.
/// Copy because it is value-copied per decision, never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub algorithm: AlgorithmKind,
    pub capacity: u32,
    pub refill_rate: u32,
    pub window_ms: u64,
    pub cleanup_interval_ms: u64,
}

impl EffectiveConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.capacity == 0 {
            return Err(crate::error::RateLimitError::InvalidInput(
                "capacity must be >= 1".into(),
            ));
        }
        if self.window_ms == 0 {
            return Err(crate::error::RateLimitError::InvalidInput(
                "windowMs must be >= 1".into(),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(crate::error::RateLimitError::InvalidInput(
                "cleanupIntervalMs must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Observable outcome of one decision, beyond the plain admit/reject bit.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Observable {
    pub remaining: u32,
    pub retry_after_ms: Option<u64>,
}

/// One admit-or-reject decision against a single algorithm instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    pub observable: Observable,
}

/// Per-key algorithm state, closed over the four variants. Owned
/// exclusively by the bucket registry.
#[derive(Debug, Clone)]
pub enum AlgorithmInstance {
    TokenBucket(BucketState),
    SlidingWindow(SlidingWindowState),
    FixedWindow(FixedWindowState),
    LeakyBucket(LeakyBucketState),
}

impl AlgorithmInstance {
    pub fn new(cfg: &EffectiveConfig) -> Self {
        match cfg.algorithm {
            AlgorithmKind::TokenBucket => Self::TokenBucket(BucketState::new(cfg)),
            AlgorithmKind::SlidingWindow => Self::SlidingWindow(SlidingWindowState::new()),
            AlgorithmKind::FixedWindow => Self::FixedWindow(FixedWindowState::new()),
            AlgorithmKind::LeakyBucket => Self::LeakyBucket(LeakyBucketState::new()),
        }
    }

    /// `tryConsume(state, nowMs, tokens, cfg)` of spec.md §4.1, dispatched
    /// over the closed sum. `requested < 0` is represented by the caller
    /// never constructing a negative `u32`; the facade rejects before this
    /// is reached (see `error::RateLimitError::InvalidInput`).
    pub fn try_consume(&mut self, now_ms: i64, requested: u32, cfg: &EffectiveConfig) -> Decision {
        if requested > cfg.capacity {
            return Decision {
                allowed: false,
                observable: Observable::default(),
            };
        }
        match self {
            Self::TokenBucket(s) => s.try_consume(now_ms, requested, cfg),
            Self::SlidingWindow(s) => s.try_consume(now_ms, requested, cfg),
            Self::FixedWindow(s) => s.try_consume(now_ms, requested, cfg),
            Self::LeakyBucket(s) => s.try_consume(now_ms, requested, cfg),
        }
    }

    pub fn last_access_ms(&self) -> i64 {
        match self {
            Self::TokenBucket(s) => s.last_access_ms,
            Self::SlidingWindow(s) => s.last_access_ms,
            Self::FixedWindow(s) => s.last_access_ms,
            Self::LeakyBucket(s) => s.last_access_ms,
        }
    }
}

/// Seam used by the backend adapters (local vs remote) and by tests that
/// want to exercise all four algorithms uniformly. Not used on the
/// registry's hot path — `AlgorithmInstance::try_consume` dispatches
/// directly and avoids the `dyn` indirection there.
pub trait RateLimitAlgorithm: Send + Sync {
    fn try_consume(&mut self, now_ms: i64, requested: u32, cfg: &EffectiveConfig) -> Decision;
}

impl RateLimitAlgorithm for AlgorithmInstance {
    fn try_consume(&mut self, now_ms: i64, requested: u32, cfg: &EffectiveConfig) -> Decision {
        AlgorithmInstance::try_consume(self, now_ms, requested, cfg)
    }
}
