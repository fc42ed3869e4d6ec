use super::{namespaced_key, BackendAdapter};
use crate::algorithms::{AlgorithmKind, Decision, EffectiveConfig, Observable};
use crate::error::{RateLimitError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// 24h inactivity TTL refreshed on every successful call, per spec.md §4.2.
const STORE_TTL_SECS: i64 = 86_400;

/// Redis-backed adapter: one atomic Lua script per algorithm, executed
/// server-side so a script either commits the new state or leaves the
/// previous state intact (spec.md §4.2 "no partial writes"). Grounded on
/// `examples/other_examples/.../ferrex-server-.../rate_limit.rs.rs`'s
/// `scripts::{sliding_window_log, token_bucket}` module, generalized here
/// to all four algorithms and to this crate's own wire contract (one hash
/// per key, namespaced `bucket:<key>:<algorithm-suffix>`).
pub struct RemoteBackend {
    conn: ConnectionManager,
    deadline: Duration,
    healthy: AtomicBool,
    token_bucket_script: Script,
    sliding_window_script: Script,
    fixed_window_script: Script,
    leaky_bucket_script: Script,
}

impl RemoteBackend {
    pub async fn connect(redis_url: &str, deadline: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RateLimitError::StoreUnavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RateLimitError::StoreUnavailable(e.to_string()))?;
        Ok(Self {
            conn,
            deadline,
            healthy: AtomicBool::new(true),
            token_bucket_script: scripts::token_bucket(),
            sliding_window_script: scripts::sliding_window(),
            fixed_window_script: scripts::fixed_window(),
            leaky_bucket_script: scripts::leaky_bucket(),
        })
    }

    fn mark_healthy(&self, healthy: bool) {
        let was_healthy = self.healthy.swap(healthy, Ordering::Relaxed);
        if let Some(transition) = health_transition(was_healthy, healthy) {
            match transition {
                HealthTransition::Recovered => {
                    info!("rate-limit store recovered, resuming atomic remote execution")
                }
                HealthTransition::Lost => warn!("rate-limit store unavailable, failing open"),
            }
        }
    }

    async fn invoke(
        &self,
        script: &Script,
        redis_key: &str,
        args: &[i64],
    ) -> std::result::Result<Vec<i64>, RateLimitError> {
        let mut conn = self.conn.clone();
        let mut invocation = script.key(redis_key);
        for arg in args {
            invocation = invocation.arg(*arg);
        }
        let fut = invocation.invoke_async::<Vec<i64>>(&mut conn);
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(RateLimitError::StoreUnavailable(e.to_string())),
            Err(_) => Err(RateLimitError::Timeout(self.deadline)),
        }
    }
}

#[async_trait]
impl BackendAdapter for RemoteBackend {
    async fn execute(
        &self,
        key: &str,
        cfg: &EffectiveConfig,
        requested: u32,
        now_ms: i64,
    ) -> Decision {
        let redis_key = namespaced_key(key, cfg.algorithm);
        let script = match cfg.algorithm {
            AlgorithmKind::TokenBucket => &self.token_bucket_script,
            AlgorithmKind::SlidingWindow => &self.sliding_window_script,
            AlgorithmKind::FixedWindow => &self.fixed_window_script,
            AlgorithmKind::LeakyBucket => &self.leaky_bucket_script,
        };
        let args = [
            now_ms,
            requested as i64,
            cfg.capacity as i64,
            cfg.refill_rate as i64,
            cfg.window_ms as i64,
            STORE_TTL_SECS,
        ];

        match self.invoke(script, &redis_key, &args).await {
            Ok(result) => {
                self.mark_healthy(true);
                let allowed = result.first().copied().unwrap_or(0) == 1;
                let remaining = result.get(1).copied().unwrap_or(0).max(0) as u32;
                let retry_after_ms = result.get(2).copied().filter(|v| *v >= 0).map(|v| v as u64);
                Decision {
                    allowed,
                    observable: Observable {
                        remaining,
                        retry_after_ms,
                    },
                }
            }
            Err(_) => {
                // spec.md §4.2/§7: any store failure or deadline expiry
                // fails open and flips storeHealthy.
                self.mark_healthy(false);
                Decision {
                    allowed: true,
                    observable: Observable::default(),
                }
            }
        }
    }

    async fn sweep_idle(&self, _now_ms: i64) -> u64 {
        // The remote store expires idle keys via TTL; no local sweep needed.
        0
    }

    fn is_store_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Issues a `PING` against the store on the dedicated 30s probe cadence
    /// (spec.md §4.6), independent of whatever decision traffic is or isn't
    /// flowing. A successful reply is the "next successful probe" that
    /// flips `storeHealthy` back to true and logs one INFO (spec.md §7).
    async fn probe_health(&self) -> bool {
        let mut conn = self.conn.clone();
        let ping = redis::cmd("PING").query_async::<String>(&mut conn);
        let healthy = matches!(tokio::time::timeout(self.deadline, ping).await, Ok(Ok(_)));
        self.mark_healthy(healthy);
        healthy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthTransition {
    Recovered,
    Lost,
}

/// One WARN per transition into failure and one INFO per transition back
/// to healthy, never per request (spec.md §7 `StoreUnavailable`) — pulled
/// out as a pure function so the transition logic is testable without a
/// live store connection.
fn health_transition(was_healthy: bool, now_healthy: bool) -> Option<HealthTransition> {
    match (was_healthy, now_healthy) {
        (true, false) => Some(HealthTransition::Lost),
        (false, true) => Some(HealthTransition::Recovered),
        _ => None,
    }
}

mod scripts {
    use redis::Script;

    /// KEYS[1] = bucket key. ARGV = [now_ms, requested, capacity,
    /// refill_rate (tokens/sec), window_ms (unused), ttl_secs]. Mirrors
    /// `algorithms::token_bucket` exactly so local and remote adapters are
    /// externally indistinguishable.
    pub fn token_bucket() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local requested = tonumber(ARGV[2])
            local capacity = tonumber(ARGV[3])
            local refill_rate = tonumber(ARGV[4])
            local ttl = tonumber(ARGV[6])

            local bucket = redis.call('HMGET', key, 'milli_tokens', 'last_refill')
            local milli_tokens = tonumber(bucket[1]) or (capacity * 1000)
            local last_refill = tonumber(bucket[2]) or now

            local elapsed = math.max(0, now - last_refill)
            local add = elapsed * refill_rate
            milli_tokens = math.min(capacity * 1000, milli_tokens + add)

            local requested_milli = requested * 1000
            if requested == 0 then
                redis.call('HMSET', key, 'milli_tokens', milli_tokens, 'last_refill', now)
                redis.call('EXPIRE', key, ttl)
                return {0, math.floor(milli_tokens / 1000)}
            end

            if milli_tokens >= requested_milli then
                milli_tokens = milli_tokens - requested_milli
                redis.call('HMSET', key, 'milli_tokens', milli_tokens, 'last_refill', now)
                redis.call('EXPIRE', key, ttl)
                return {1, math.floor(milli_tokens / 1000)}
            else
                redis.call('HMSET', key, 'milli_tokens', milli_tokens, 'last_refill', now)
                redis.call('EXPIRE', key, ttl)
                local deficit = requested_milli - milli_tokens
                local wait = refill_rate > 0 and math.ceil(deficit / refill_rate) or -1
                return {0, math.floor(milli_tokens / 1000), wait}
            end
            "#,
        )
    }

    /// ARGV = [now_ms, requested, capacity, refill_rate(unused), window_ms, ttl_secs].
    pub fn sliding_window() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local requested = tonumber(ARGV[2])
            local capacity = tonumber(ARGV[3])
            local window = tonumber(ARGV[5])
            local ttl = tonumber(ARGV[6])

            redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
            local n = redis.call('ZCARD', key)

            if requested == 0 then
                redis.call('EXPIRE', key, ttl)
                return {0, capacity - n}
            end

            if n + requested <= capacity then
                for i = 1, requested do
                    redis.call('ZADD', key, now, now .. ':' .. i .. ':' .. math.random(1, 1000000000))
                end
                redis.call('EXPIRE', key, ttl)
                return {1, capacity - n - requested}
            else
                local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
                local retry = window
                if oldest[2] then
                    retry = (tonumber(oldest[2]) + window) - now
                end
                redis.call('EXPIRE', key, ttl)
                return {0, capacity - n, math.max(0, retry)}
            end
            "#,
        )
    }

    /// ARGV = [now_ms, requested, capacity, refill_rate(unused), window_ms, ttl_secs].
    pub fn fixed_window() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local requested = tonumber(ARGV[2])
            local capacity = tonumber(ARGV[3])
            local window = tonumber(ARGV[5])
            local ttl = tonumber(ARGV[6])

            local state = redis.call('HMGET', key, 'window_start', 'count')
            local window_start = tonumber(state[1])
            local count = tonumber(state[2]) or 0

            if window_start == nil or now >= window_start + window then
                window_start = now - (now % window)
                count = 0
            end

            if requested == 0 then
                redis.call('HMSET', key, 'window_start', window_start, 'count', count)
                redis.call('EXPIRE', key, ttl)
                return {0, capacity - count}
            end

            if count + requested <= capacity then
                count = count + requested
                redis.call('HMSET', key, 'window_start', window_start, 'count', count)
                redis.call('EXPIRE', key, ttl)
                return {1, capacity - count}
            else
                redis.call('HMSET', key, 'window_start', window_start, 'count', count)
                redis.call('EXPIRE', key, ttl)
                return {0, capacity - count, math.max(0, window_start + window - now)}
            end
            "#,
        )
    }

    /// ARGV = [now_ms, requested, capacity, refill_rate, window_ms (max queue time), ttl_secs].
    pub fn leaky_bucket() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local now = tonumber(ARGV[1])
            local requested = tonumber(ARGV[2])
            local capacity = tonumber(ARGV[3])
            local refill_rate = tonumber(ARGV[4])
            local max_queue_time = tonumber(ARGV[5])
            local ttl = tonumber(ARGV[6])

            redis.call('ZREMRANGEBYSCORE', key, '-inf', now - max_queue_time)
            local len = redis.call('ZCARD', key)

            local last_leak = tonumber(redis.call('HGET', key .. ':leak', 'last_leak_ms')) or now
            local elapsed = math.max(0, now - last_leak)
            local processed = math.floor((elapsed * refill_rate) / 1000)
            if processed > 0 and len > 0 then
                local to_pop = math.min(processed, len)
                local stale = redis.call('ZRANGE', key, 0, to_pop - 1)
                for _, member in ipairs(stale) do
                    redis.call('ZREM', key, member)
                end
                len = redis.call('ZCARD', key)
            end
            redis.call('HSET', key .. ':leak', 'last_leak_ms', now)
            redis.call('EXPIRE', key .. ':leak', ttl)

            local wait = refill_rate > 0 and math.floor((len * 1000) / refill_rate) or 0

            if requested == 0 then
                redis.call('EXPIRE', key, ttl)
                return {0, capacity - len, wait}
            end

            if len + requested <= capacity then
                for i = 1, requested do
                    redis.call('ZADD', key, now, now .. ':' .. i .. ':' .. math.random(1, 1000000000))
                end
                redis.call('EXPIRE', key, ttl)
                return {1, capacity - len - requested, wait}
            else
                redis.call('EXPIRE', key, ttl)
                return {0, capacity - len, wait}
            end
            "#,
        )
    }
}
