use super::{Decision, EffectiveConfig, Observable};

/// `(tokens, lastRefillMs)` per spec.md §3. `tokens` is tracked as
/// milli-tokens (`u64`, scaled by 1000) so refill can use integer
/// arithmetic without losing fractional progress between calls, the way
/// the teacher's bucket keeps a `f64` running total — same idea, integer
/// instead of float so it can also back the remote Lua script 1:1.
#[derive(Debug, Clone)]
pub struct BucketState {
    milli_tokens: u64,
    last_refill_ms: i64,
    pub last_access_ms: i64,
}

impl BucketState {
    pub fn new(cfg: &EffectiveConfig) -> Self {
        Self {
            milli_tokens: cfg.capacity as u64 * 1000,
            last_refill_ms: 0,
            last_access_ms: 0,
        }
    }

    pub fn try_consume(&mut self, now_ms: i64, requested: u32, cfg: &EffectiveConfig) -> Decision {
        self.last_access_ms = now_ms;
        let elapsed = (now_ms - self.last_refill_ms).max(0) as u64;
        let add = elapsed.saturating_mul(cfg.refill_rate as u64);
        let cap_milli = cfg.capacity as u64 * 1000;
        self.milli_tokens = (self.milli_tokens + add).min(cap_milli);
        self.last_refill_ms = now_ms;

        let requested_milli = requested as u64 * 1000;
        if requested == 0 {
            // query semantics: refill applies, never allowed
            return Decision {
                allowed: false,
                observable: Observable {
                    remaining: (self.milli_tokens / 1000) as u32,
                    retry_after_ms: None,
                },
            };
        }
        if self.milli_tokens >= requested_milli {
            self.milli_tokens -= requested_milli;
            Decision {
                allowed: true,
                observable: Observable {
                    remaining: (self.milli_tokens / 1000) as u32,
                    retry_after_ms: None,
                },
            }
        } else {
            let deficit_milli = requested_milli - self.milli_tokens;
            let retry_after_ms = if cfg.refill_rate > 0 {
                Some(deficit_milli.div_ceil(cfg.refill_rate as u64))
            } else {
                None
            };
            Decision {
                allowed: false,
                observable: Observable {
                    remaining: (self.milli_tokens / 1000) as u32,
                    retry_after_ms,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::AlgorithmKind;

    fn cfg(capacity: u32, refill_rate: u32) -> EffectiveConfig {
        EffectiveConfig {
            algorithm: AlgorithmKind::TokenBucket,
            capacity,
            refill_rate,
            window_ms: 1000,
            cleanup_interval_ms: 60_000,
        }
    }

    #[test]
    fn burst_then_refill() {
        let c = cfg(2, 1);
        let mut s = BucketState::new(&c);
        assert!(s.try_consume(0, 1, &c).allowed);
        assert!(s.try_consume(0, 1, &c).allowed);
        assert!(!s.try_consume(0, 1, &c).allowed);
        assert!(s.try_consume(1000, 1, &c).allowed);
    }

    #[test]
    fn never_exceeds_capacity() {
        let c = cfg(5, 10);
        let mut s = BucketState::new(&c);
        let d = s.try_consume(10_000, 0, &c);
        assert_eq!(d.observable.remaining, 5);
    }

    #[test]
    fn zero_refill_rate_never_regenerates() {
        let c = cfg(1, 0);
        let mut s = BucketState::new(&c);
        assert!(s.try_consume(0, 1, &c).allowed);
        assert!(!s.try_consume(1_000_000, 1, &c).allowed);
    }

    #[test]
    fn clock_moving_backwards_treats_elapsed_as_zero() {
        let c = cfg(1, 1);
        let mut s = BucketState::new(&c);
        assert!(s.try_consume(1000, 1, &c).allowed);
        let d = s.try_consume(500, 1, &c);
        assert!(!d.allowed);
    }

    #[test]
    fn query_never_mutates_beyond_refill() {
        let c = cfg(3, 1);
        let mut s = BucketState::new(&c);
        let before = s.try_consume(0, 0, &c).observable.remaining;
        let after = s.try_consume(0, 0, &c).observable.remaining;
        assert_eq!(before, after);
        assert!(!s.try_consume(0, 0, &c).allowed);
    }
}
