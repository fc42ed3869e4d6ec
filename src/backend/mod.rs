//! Backend adapters: one contract, two interchangeable implementations
//! (spec.md §4.2, §9 "strategy abstraction"). The facade holds a single
//! adapter chosen at deployment time; it never switches between them at
//! runtime.

mod local;
mod remote;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

use crate::algorithms::{AlgorithmKind, Decision, EffectiveConfig};
use async_trait::async_trait;

/// `execute(key, algorithm, cfg, requested, nowMs) -> (allowed, observable)`
/// of spec.md §4.2. Implementations must serialize mutations on a single
/// key's state (§5); cross-key concurrency is unrestricted.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    async fn execute(
        &self,
        key: &str,
        cfg: &EffectiveConfig,
        requested: u32,
        now_ms: i64,
    ) -> Decision;

    /// Removes entries idle for at least `cfg.cleanup_interval_ms`,
    /// returning the number removed for the `bucketCleaned` metric
    /// (spec.md §4.3). The remote adapter relies entirely on its TTL and
    /// always returns 0.
    async fn sweep_idle(&self, now_ms: i64) -> u64;

    /// `true` once the store backing this adapter has confirmed health
    /// (spec.md §4.6 `storeHealthy`). The local adapter is always healthy.
    fn is_store_healthy(&self) -> bool;

    /// Active health probe (spec.md §4.6 "Probes the remote store health
    /// every 30s"), distinct from the passive flip that happens as a side
    /// effect of a failed decision call — this is what lets `storeHealthy`
    /// recover even during a lull with no live traffic. The local adapter
    /// has nothing to probe and is always healthy.
    async fn probe_health(&self) -> bool;
}

pub(crate) fn algorithm_suffix(kind: AlgorithmKind) -> &'static str {
    match kind {
        AlgorithmKind::TokenBucket => "tb",
        AlgorithmKind::SlidingWindow => "sw",
        AlgorithmKind::FixedWindow => "fw",
        AlgorithmKind::LeakyBucket => "lb",
    }
}

/// `bucket:<key>:<algorithm-suffix>` namespacing, per spec.md §4.2/§6,
/// grounded on `redis-shield`'s `"tp:<suffix>:<key>"` key-building.
pub(crate) fn namespaced_key(key: &str, kind: AlgorithmKind) -> String {
    format!("bucket:{key}:{}", algorithm_suffix(kind))
}
