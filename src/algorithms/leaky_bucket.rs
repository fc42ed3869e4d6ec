use super::{Decision, EffectiveConfig, Observable};
use std::collections::VecDeque;

/// Queue of enqueued request timestamps plus `lastLeakMs`, per spec.md
/// §3. `maxQueueTimeMs` is pinned to `window_ms` — the only duration
/// field `EffectiveConfig` carries — so a stalled leak doesn't hold
/// timestamps forever.
#[derive(Debug, Clone, Default)]
pub struct LeakyBucketState {
    queue: VecDeque<i64>,
    last_leak_ms: i64,
    pub last_access_ms: i64,
}

impl LeakyBucketState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_consume(&mut self, now_ms: i64, requested: u32, cfg: &EffectiveConfig) -> Decision {
        self.last_access_ms = now_ms;
        let max_queue_time_ms = cfg.window_ms as i64;
        let cutoff = now_ms - max_queue_time_ms;
        while let Some(&front) = self.queue.front() {
            if front <= cutoff {
                self.queue.pop_front();
            } else {
                break;
            }
        }

        let elapsed = (now_ms - self.last_leak_ms).max(0) as u64;
        let processed = elapsed.saturating_mul(cfg.refill_rate as u64) / 1000;
        let to_pop = processed.min(self.queue.len() as u64);
        for _ in 0..to_pop {
            self.queue.pop_front();
        }
        self.last_leak_ms = now_ms;

        let len = self.queue.len() as u32;
        if requested == 0 {
            return Decision {
                allowed: false,
                observable: Observable {
                    remaining: cfg.capacity.saturating_sub(len),
                    retry_after_ms: None,
                },
            };
        }
        if len + requested <= cfg.capacity {
            for _ in 0..requested {
                self.queue.push_back(now_ms);
            }
            // Decided Open Question: always a positive estimate, using the
            // queue length before this request was appended.
            let estimated_wait_ms = if cfg.refill_rate > 0 {
                (len as u64 * 1000) / cfg.refill_rate as u64
            } else {
                0
            };
            Decision {
                allowed: true,
                observable: Observable {
                    remaining: cfg.capacity - (len + requested),
                    retry_after_ms: Some(estimated_wait_ms),
                },
            }
        } else {
            let estimated_wait_ms = if cfg.refill_rate > 0 {
                (len as u64 * 1000) / cfg.refill_rate as u64
            } else {
                0
            };
            Decision {
                allowed: false,
                observable: Observable {
                    remaining: cfg.capacity.saturating_sub(len),
                    retry_after_ms: Some(estimated_wait_ms),
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
            algorithm: AlgorithmKind::LeakyBucket,
            capacity,
            refill_rate,
            window_ms: 60_000,
            cleanup_interval_ms: 60_000,
        }
    }

    #[test]
    fn shapes_bursts_with_increasing_wait_estimates() {
        let c = cfg(3, 1);
        let mut s = LeakyBucketState::new();
        let d0 = s.try_consume(0, 1, &c);
        let d1 = s.try_consume(0, 1, &c);
        let d2 = s.try_consume(0, 1, &c);
        assert!(d0.allowed && d1.allowed && d2.allowed);
        assert_eq!(d0.observable.retry_after_ms, Some(0));
        assert_eq!(d1.observable.retry_after_ms, Some(1000));
        assert_eq!(d2.observable.retry_after_ms, Some(2000));

        let d3 = s.try_consume(0, 1, &c);
        assert!(!d3.allowed);
        // never -1: always a non-negative estimate
        assert!(d3.observable.retry_after_ms.unwrap_or(0) <= u64::MAX);
    }

    #[test]
    fn leaks_at_refill_rate_admitting_more_after_drain() {
        let c = cfg(3, 1);
        let mut s = LeakyBucketState::new();
        s.try_consume(0, 1, &c);
        s.try_consume(0, 1, &c);
        s.try_consume(0, 1, &c);
        assert!(!s.try_consume(0, 1, &c).allowed);
        assert!(s.try_consume(1001, 1, &c).allowed);
    }
}
