//! Environment-sourced configuration, mirroring the teacher's
//! `Config::from_env()` / `parse_duration` pattern: `anyhow::Context` at
//! the boundary, `dotenvy::dotenv().ok()` before reading, sensible
//! defaults for every key, and a `validate()` pass before the config is
//! trusted.

use crate::algorithms::{AlgorithmKind, EffectiveConfig};
use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub default_config: EffectiveConfig,
    pub remote_store: Option<RemoteStoreConfig>,
    pub fail_open: bool,
    pub scheduling_evaluation_interval: Duration,
    pub registry_cleanup_interval: Duration,
    pub metrics_slow_threshold_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub host: String,
    pub port: u16,
    pub database: u8,
    pub timeout: Duration,
}

impl RemoteStoreConfig {
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.database)
    }
}

impl Config {
    /// Reads `RATELIMIT_*` environment variables (renamed from the
    /// teacher's `SWEETMCP_*` prefix), loading a local `.env` file first
    /// if present, exactly as the teacher's own `Config::from_env` does.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let algorithm = match env_or("RATELIMIT_ALGORITHM", "token_bucket").as_str() {
            "token_bucket" => AlgorithmKind::TokenBucket,
            "sliding_window" => AlgorithmKind::SlidingWindow,
            "fixed_window" => AlgorithmKind::FixedWindow,
            "leaky_bucket" => AlgorithmKind::LeakyBucket,
            other => {
                return Err(anyhow::anyhow!("unknown RATELIMIT_ALGORITHM '{other}'"));
            }
        };

        let default_config = EffectiveConfig {
            algorithm,
            capacity: env_parse("RATELIMIT_CAPACITY", 100)?,
            refill_rate: env_parse("RATELIMIT_REFILL_RATE", 10)?,
            window_ms: env_parse("RATELIMIT_WINDOW_MS", 1000)?,
            cleanup_interval_ms: env_parse("RATELIMIT_CLEANUP_INTERVAL_MS", 60_000)?,
        };

        let remote_store = if std::env::var("RATELIMIT_REMOTE_STORE_HOST").is_ok() {
            Some(RemoteStoreConfig {
                host: env_or("RATELIMIT_REMOTE_STORE_HOST", "127.0.0.1"),
                port: env_parse("RATELIMIT_REMOTE_STORE_PORT", 6379)?,
                database: env_parse("RATELIMIT_REMOTE_STORE_DATABASE", 0)?,
                timeout: parse_duration(&env_or("RATELIMIT_REMOTE_STORE_TIMEOUT", "1s"))
                    .context("parsing RATELIMIT_REMOTE_STORE_TIMEOUT")?,
            })
        } else {
            None
        };

        let config = Self {
            default_config,
            remote_store,
            fail_open: env_parse("RATELIMIT_FAIL_OPEN", true)?,
            scheduling_evaluation_interval: parse_duration(&env_or(
                "RATELIMIT_SCHEDULING_EVALUATION_INTERVAL_MS",
                "60s",
            ))
            .context("parsing RATELIMIT_SCHEDULING_EVALUATION_INTERVAL_MS")?,
            registry_cleanup_interval: parse_duration(&env_or(
                "RATELIMIT_REGISTRY_CLEANUP_INTERVAL",
                "60s",
            ))
            .context("parsing RATELIMIT_REGISTRY_CLEANUP_INTERVAL")?,
            metrics_slow_threshold_ms: env_parse("RATELIMIT_METRICS_SLOW_THRESHOLD_MS", 10)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.default_config
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .context("validating default EffectiveConfig")?;
        if let Some(store) = &self.remote_store {
            if store.host.is_empty() {
                anyhow::bail!("RATELIMIT_REMOTE_STORE_HOST must not be empty");
            }
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Parses durations like `"500ms"`, `"30s"`, `"5m"`, `"1h"`, `"1d"` — the
/// teacher's own `parse_duration` helper, unit set unchanged.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (number, unit) = raw
        .find(|c: char| !c.is_ascii_digit())
        .map(|idx| raw.split_at(idx))
        .unwrap_or((raw, "ms"));
    let value: u64 = number
        .parse()
        .with_context(|| format!("invalid duration '{raw}'"))?;
    let millis = match unit {
        "ms" | "" => value,
        "s" => value * 1000,
        "m" => value * 60_000,
        "h" => value * 3_600_000,
        "d" => value * 86_400_000,
        other => anyhow::bail!("unknown duration unit '{other}' in '{raw}'"),
    };
    Ok(Duration::from_millis(millis))
}

/// Monotonic wall-clock reading shared by the registry cleanup task and
/// schedule evaluator. Not used on the algorithm hot path, which always
/// takes `now_ms` from the caller (spec.md §4.1) so tests can drive time
/// deterministically.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
