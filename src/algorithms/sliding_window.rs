use super::{Decision, EffectiveConfig, Observable};
use std::collections::VecDeque;

/// Ordered request timestamps retained while `now - ts < windowMs`, per
/// spec.md §3. A `VecDeque` keeps eviction from the front O(evicted) with
/// no reallocation on the steady-state path, the way the teacher's
/// sub-window ring buffer avoids reallocating per request.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindowState {
    timestamps: VecDeque<i64>,
    pub last_access_ms: i64,
}

impl SlidingWindowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_consume(&mut self, now_ms: i64, requested: u32, cfg: &EffectiveConfig) -> Decision {
        self.last_access_ms = now_ms;
        let cutoff = now_ms - cfg.window_ms as i64;
        while let Some(&front) = self.timestamps.front() {
            if front <= cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        let n = self.timestamps.len() as u32;
        if requested == 0 {
            return Decision {
                allowed: false,
                observable: Observable {
                    remaining: cfg.capacity.saturating_sub(n),
                    retry_after_ms: None,
                },
            };
        }
        if n + requested <= cfg.capacity {
            for _ in 0..requested {
                self.timestamps.push_back(now_ms);
            }
            Decision {
                allowed: true,
                observable: Observable {
                    remaining: cfg.capacity - (n + requested),
                    retry_after_ms: None,
                },
            }
        } else {
            let retry_after_ms = self
                .timestamps
                .front()
                .map(|&oldest| (oldest + cfg.window_ms as i64 - now_ms).max(0) as u64);
            Decision {
                allowed: false,
                observable: Observable {
                    remaining: cfg.capacity.saturating_sub(n),
                    retry_after_ms,
                },
            }
        }
    }
}
