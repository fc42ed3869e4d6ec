use super::BackendAdapter;
use crate::algorithms::{AlgorithmInstance, Decision, EffectiveConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct Entry {
    state: Mutex<AlgorithmInstance>,
    cleanup_interval_ms: u64,
}

/// Per-key critical section over an in-process map (spec.md §4.2). One
/// `Mutex<AlgorithmInstance>` per key gives total ordering of mutations on
/// that key without a global lock — `DashMap`'s own sharding keeps
/// cross-key lookups independent, the same structure the teacher uses for
/// `endpoint_limiters`/`peer_limiters`. This map doubles as the bucket
/// registry's backing store for the local deployment (spec.md §4.3):
/// there is no separate map to keep in sync.
pub struct LocalBackend {
    buckets: DashMap<Arc<str>, Entry>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendAdapter for LocalBackend {
    async fn execute(
        &self,
        key: &str,
        cfg: &EffectiveConfig,
        requested: u32,
        now_ms: i64,
    ) -> Decision {
        if !self.buckets.contains_key(key) {
            self.buckets.entry(Arc::from(key)).or_insert_with(|| Entry {
                state: Mutex::new(AlgorithmInstance::new(cfg)),
                cleanup_interval_ms: cfg.cleanup_interval_ms,
            });
        }
        let entry = self.buckets.get(key).expect("just inserted");
        let mut state = entry.state.lock().await;
        state.try_consume(now_ms, requested, cfg)
    }

    async fn sweep_idle(&self, now_ms: i64) -> u64 {
        let before = self.buckets.len();
        let mut idle_keys = Vec::new();
        for item in self.buckets.iter() {
            if let Ok(state) = item.value().state.try_lock() {
                if now_ms - state.last_access_ms() >= item.value().cleanup_interval_ms as i64 {
                    idle_keys.push(item.key().clone());
                }
            }
        }
        for key in &idle_keys {
            self.buckets.remove(key);
        }
        (before - self.buckets.len()) as u64
    }

    fn is_store_healthy(&self) -> bool {
        true
    }

    async fn probe_health(&self) -> bool {
        true
    }
}
