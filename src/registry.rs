//! Bucket registry (spec.md §4.3): owns algorithm instances, created
//! lazily on first decision for a key, and runs a background sweep that
//! evicts idle entries. The per-key map itself lives inside whichever
//! `BackendAdapter` is active — see `backend::LocalBackend` — so this
//! module is a thin lifecycle wrapper rather than a second map to keep in
//! sync with the adapter's own state.

use crate::algorithms::{Decision, EffectiveConfig};
use crate::backend::BackendAdapter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct BucketRegistry {
    adapter: Arc<dyn BackendAdapter>,
    sweep_interval: Duration,
    buckets_cleaned: AtomicU64,
    running: Arc<AtomicBool>,
    cleanup_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BucketRegistry {
    pub fn new(adapter: Arc<dyn BackendAdapter>, sweep_interval: Duration) -> Self {
        Self {
            adapter,
            sweep_interval,
            buckets_cleaned: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(false)),
            cleanup_handle: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn decide(
        &self,
        key: &str,
        cfg: &EffectiveConfig,
        requested: u32,
        now_ms: i64,
    ) -> Decision {
        self.adapter.execute(key, cfg, requested, now_ms).await
    }

    pub fn is_store_healthy(&self) -> bool {
        self.adapter.is_store_healthy()
    }

    /// Runs one active health probe against the backing store (spec.md
    /// §4.6), used by the facade's dedicated probe task.
    pub async fn probe_store_health(&self) -> bool {
        self.adapter.probe_health().await
    }

    pub fn buckets_cleaned_total(&self) -> u64 {
        self.buckets_cleaned.load(Ordering::Relaxed)
    }

    /// Starts the background sweep task (default interval 60s per
    /// spec.md §4.3), grounded on the teacher's
    /// `AdvancedRateLimitManager::start_cleanup_task`.
    pub async fn start_cleanup_task(self: &Arc<Self>) {
        let mut handle_guard = self.cleanup_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }
        self.running.store(true, Ordering::Relaxed);

        let registry = Arc::clone(self);
        let running = Arc::clone(&self.running);
        let interval = self.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                let now_ms = crate::config::now_ms();
                let cleaned = registry.adapter.sweep_idle(now_ms).await;
                if cleaned > 0 {
                    registry.buckets_cleaned.fetch_add(cleaned, Ordering::Relaxed);
                    debug!(cleaned, "bucket registry cleanup sweep");
                }
            }
        });

        *handle_guard = Some(handle);
    }

    /// Stops the sweep task, bounded by spec.md §9's "must shut down
    /// within 5s" requirement for periodic background tasks.
    pub async fn stop_cleanup_task(&self) {
        self.running.store(false, Ordering::Relaxed);
        let mut handle_guard = self.cleanup_handle.lock().await;
        if let Some(handle) = handle_guard.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::AlgorithmKind;
    use crate::backend::LocalBackend;

    fn cfg() -> EffectiveConfig {
        EffectiveConfig {
            algorithm: AlgorithmKind::TokenBucket,
            capacity: 2,
            refill_rate: 1,
            window_ms: 1000,
            cleanup_interval_ms: 50,
        }
    }

    #[tokio::test]
    async fn creates_bucket_lazily_and_reuses_it() {
        let registry = BucketRegistry::new(Arc::new(LocalBackend::new()), Duration::from_millis(10));
        let c = cfg();
        assert!(registry.decide("k", &c, 1, 0).await.allowed);
        assert!(registry.decide("k", &c, 1, 0).await.allowed);
        assert!(!registry.decide("k", &c, 1, 0).await.allowed);
    }

    #[tokio::test]
    async fn cleanup_sweep_evicts_idle_entries() {
        let registry = Arc::new(BucketRegistry::new(
            Arc::new(LocalBackend::new()),
            Duration::from_millis(20),
        ));
        let c = cfg();
        registry.decide("k", &c, 1, 0).await;
        registry.start_cleanup_task().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        registry.stop_cleanup_task().await;
        assert!(registry.buckets_cleaned_total() >= 1);
    }
}
