use super::{Decision, EffectiveConfig, Observable};

/// `(windowStartMs, count)` per spec.md §3. Uses the **aligned** reset
/// form decided for this crate (`windowStartMs = nowMs - (nowMs %
/// windowMs)`): every instance — local or remote — lands on the same
/// window boundary without coordinating, which a sliding/rolling reset
/// cannot offer across independent processes.
#[derive(Debug, Clone)]
pub struct FixedWindowState {
    window_start_ms: i64,
    count: u32,
    initialized: bool,
    pub last_access_ms: i64,
}

impl FixedWindowState {
    pub fn new() -> Self {
        Self {
            window_start_ms: 0,
            count: 0,
            initialized: false,
            last_access_ms: 0,
        }
    }

    fn aligned_start(now_ms: i64, window_ms: i64) -> i64 {
        now_ms - now_ms.rem_euclid(window_ms)
    }

    pub fn try_consume(&mut self, now_ms: i64, requested: u32, cfg: &EffectiveConfig) -> Decision {
        self.last_access_ms = now_ms;
        let window_ms = cfg.window_ms as i64;
        if !self.initialized || now_ms >= self.window_start_ms + window_ms {
            self.window_start_ms = Self::aligned_start(now_ms, window_ms);
            self.count = 0;
            self.initialized = true;
        }

        if requested == 0 {
            return Decision {
                allowed: false,
                observable: Observable {
                    remaining: cfg.capacity.saturating_sub(self.count),
                    retry_after_ms: None,
                },
            };
        }
        if self.count + requested <= cfg.capacity {
            self.count += requested;
            Decision {
                allowed: true,
                observable: Observable {
                    remaining: cfg.capacity - self.count,
                    retry_after_ms: None,
                },
            }
        } else {
            let retry_after_ms = (self.window_start_ms + window_ms - now_ms).max(0) as u64;
            Decision {
                allowed: false,
                observable: Observable {
                    remaining: cfg.capacity.saturating_sub(self.count),
                    retry_after_ms: Some(retry_after_ms),
                },
            }
        }
    }
}

impl Default for FixedWindowState {
    fn default() -> Self {
        Self::new()
    }
}
