//! Rate-limit service facade (spec.md §4.7): orchestrates the resolver,
//! the bucket registry, the backend adapter, and the metrics core behind
//! one entry point, grounded on the teacher's `AdvancedRateLimitManager`
//! (`rate_limit.rs`) — same shape of "resolve config, reach a limiter,
//! check it, record the outcome" — generalized from an endpoint/peer key
//! to the spec's generic string key and widened to four algorithms.

use crate::algorithms::EffectiveConfig;
use crate::config::now_ms;
use crate::error::{RateLimitError, Result};
use crate::metrics::{MetricsCore, MetricsSnapshot};
use crate::registry::BucketRegistry;
use crate::resolver::ConfigResolver;
use crate::schedule::{ScheduleEntry, ScheduleManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default store-health probe cadence (spec.md §4.6 "every 30s").
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// `{key, tokensRequested, allowed, retryAfterMs?}` of spec.md §6 Decide API.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub key: String,
    pub tokens_requested: u32,
    pub allowed: bool,
    pub retry_after_ms: Option<u64>,
}

/// Composition root: resolver + registry + schedule manager + metrics,
/// held by value (spec.md §9 "cyclic ownership: none required").
pub struct RateLimitService {
    resolver: Arc<ConfigResolver>,
    registry: Arc<BucketRegistry>,
    schedule_manager: Arc<ScheduleManager>,
    metrics: Arc<MetricsCore>,
    tz: String,
    health_probe_running: Arc<AtomicBool>,
    health_probe_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RateLimitService {
    pub fn new(
        resolver: Arc<ConfigResolver>,
        registry: Arc<BucketRegistry>,
        schedule_manager: Arc<ScheduleManager>,
        metrics: Arc<MetricsCore>,
    ) -> Self {
        Self {
            resolver,
            registry,
            schedule_manager,
            metrics,
            tz: "UTC".to_string(),
            health_probe_running: Arc::new(AtomicBool::new(false)),
            health_probe_handle: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts the registry cleanup sweep, the schedule evaluation loop, and
    /// the store-health probe (spec.md §9 "Scheduler thread" names all
    /// three as dedicated periodic background tasks). Idempotent.
    pub async fn start_background_tasks(&self) {
        self.registry.start_cleanup_task().await;
        self.schedule_manager.start().await;
        self.start_health_probe_task().await;
    }

    /// Stops all three background tasks, each bounded to a 5s shutdown per
    /// spec.md §9.
    pub async fn stop_background_tasks(&self) {
        self.registry.stop_cleanup_task().await;
        self.schedule_manager.stop().await;
        self.stop_health_probe_task().await;
    }

    async fn start_health_probe_task(&self) {
        let mut guard = self.health_probe_handle.lock().await;
        if guard.is_some() {
            return;
        }
        self.health_probe_running.store(true, Ordering::Relaxed);
        let registry = Arc::clone(&self.registry);
        let metrics = Arc::clone(&self.metrics);
        let running = Arc::clone(&self.health_probe_running);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_PROBE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                let healthy = registry.probe_store_health().await;
                metrics.set_store_healthy(healthy);
            }
        });
        *guard = Some(handle);
    }

    async fn stop_health_probe_task(&self) {
        self.health_probe_running.store(false, Ordering::Relaxed);
        let mut guard = self.health_probe_handle.lock().await;
        if let Some(handle) = guard.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }

    /// `isAllowed(key, tokens) -> bool` of spec.md §4.7, returning the
    /// fuller `CheckOutcome` the Decide API (§6) specifies. Steps:
    /// validate, resolve, reach the algorithm instance via the registry,
    /// execute through the backend adapter, record metrics, log.
    pub async fn check(&self, key: &str, tokens: u32) -> CheckOutcome {
        let start = Instant::now();
        let now = now_ms();

        if key.is_empty() || tokens == 0 {
            warn!(key, tokens_requested = tokens, outcome = "rejected", error_kind = "invalid_input", "rate-limit request rejected");
            return CheckOutcome {
                key: key.to_string(),
                tokens_requested: tokens,
                allowed: false,
                retry_after_ms: None,
            };
        }

        let cfg = self.resolver.resolve(key, now, &self.tz);
        let outcome = self.decide(key, &cfg, tokens, now).await;

        let processing_time_ms = start.elapsed().as_millis() as u64;
        self.metrics.record_decision(key, outcome.allowed, now, processing_time_ms);

        if outcome.allowed {
            debug!(
                key,
                tokens_requested = tokens,
                outcome = "allowed",
                processing_time_ms,
                "rate-limit decision"
            );
        } else {
            warn!(
                key,
                tokens_requested = tokens,
                outcome = "denied",
                processing_time_ms,
                retry_after_ms = outcome.retry_after_ms,
                "rate-limit violation"
            );
        }

        outcome
    }

    /// Multi-backend policy (spec.md §4.7): the registry's adapter is
    /// tried first; if it reports the store unhealthy the call has
    /// already failed open inside the remote adapter itself (spec.md
    /// §4.2), so there is nothing further to retry against here except
    /// the conservative fail-open path for a genuinely unexpected panic,
    /// which `catch_unwind` would be needed for and which the algorithm
    /// cores are documented never to produce (spec.md §7 "never throws
    /// for data-dependent conditions").
    async fn decide(&self, key: &str, cfg: &EffectiveConfig, tokens: u32, now_ms: i64) -> CheckOutcome {
        let decision = self.registry.decide(key, cfg, tokens, now_ms).await;
        CheckOutcome {
            key: key.to_string(),
            tokens_requested: tokens,
            allowed: decision.allowed,
            retry_after_ms: decision.observable.retry_after_ms,
        }
    }

    // ---- Config API (spec.md §6) ----

    pub fn default_config(&self) -> EffectiveConfig {
        self.resolver.default_config()
    }

    pub fn set_default_config(&self, cfg: EffectiveConfig) -> Result<()> {
        cfg.validate()?;
        self.resolver.set_default_config(cfg);
        Ok(())
    }

    pub fn set_key_override(&self, key: impl Into<String>, cfg: EffectiveConfig) -> Result<()> {
        cfg.validate()?;
        self.resolver.set_exact_override(key, cfg);
        Ok(())
    }

    pub fn remove_key_override(&self, key: &str) {
        self.resolver.remove_exact_override(key);
    }

    pub fn set_pattern_override(&self, pattern: impl Into<String>, cfg: EffectiveConfig) -> Result<()> {
        cfg.validate()?;
        self.resolver.set_pattern_override(pattern, cfg);
        Ok(())
    }

    pub fn remove_pattern_override(&self, pattern: &str) {
        self.resolver.remove_pattern_override(pattern);
    }

    /// Reload operation (spec.md §6): re-reads operator-supplied config.
    /// Static overrides are installed by the caller via the setters above;
    /// this simply bumps the resolver's cache-invalidating version so a
    /// bulk reload (many setters called in sequence) is observed as one
    /// logical generation rather than several, without restarting any
    /// in-flight decision.
    pub fn reload(&self) {
        self.resolver.bump_static_version();
    }

    // ---- Schedule API (spec.md §6) ----

    pub fn create_schedule(&self, entry: ScheduleEntry) -> Result<()> {
        self.schedule_manager.create_schedule(entry)
    }

    pub fn update_schedule(&self, entry: ScheduleEntry) -> Result<()> {
        self.schedule_manager.update_schedule(entry)
    }

    pub fn delete_schedule(&self, name: &str) {
        self.schedule_manager.delete_schedule(name);
    }

    pub fn activate_schedule(&self, name: &str) -> Result<()> {
        self.schedule_manager.activate_schedule(name)
    }

    pub fn deactivate_schedule(&self, name: &str) -> Result<()> {
        self.schedule_manager.deactivate_schedule(name)
    }

    pub fn list_schedules(&self) -> Vec<ScheduleEntry> {
        self.schedule_manager.list_schedules()
    }

    /// `createEmergencySchedule(pattern, duration, capacity, refillRate,
    /// reason)` of spec.md §6: a convenience constructor over
    /// `ScheduleEntry::emergency`, created and activated in one call.
    pub fn create_emergency_schedule(
        &self,
        pattern: impl Into<String>,
        duration: Duration,
        cfg: EffectiveConfig,
        reason: &str,
    ) -> Result<()> {
        cfg.validate()?;
        let name = format!("emergency-{}", now_ms());
        let entry = ScheduleEntry::emergency(name, pattern, duration, cfg, now_ms());
        warn!(reason, duration_ms = duration.as_millis() as u64, "emergency schedule created");
        self.schedule_manager.create_schedule(entry)
    }

    /// Forces an immediate schedule evaluation; mainly useful for tests
    /// and operator-triggered re-evaluation outside the timer cadence.
    pub fn evaluate_schedules_now(&self) {
        self.schedule_manager.evaluate(now_ms());
    }

    // ---- Metrics API (spec.md §6) ----

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.metrics.snapshot();
        snapshot.store_healthy = self.registry.is_store_healthy();
        snapshot
    }

    pub fn clear_metrics(&self) {
        self.metrics.clear();
    }

    pub fn is_store_healthy(&self) -> bool {
        self.registry.is_store_healthy()
    }
}

/// Surfaces an `Internal` error as a conservative rejection without ever
/// corrupting algorithm state (spec.md §7), used by callers that want a
/// `Result`-shaped wrapper around `check` for uniform error handling at
/// a higher layer (e.g. the out-of-scope HTTP surface).
pub fn reject_on_internal_error(err: &RateLimitError) -> CheckOutcome {
    error!(error = %err, "internal error in rate-limit decision, rejecting conservatively");
    CheckOutcome {
        key: String::new(),
        tokens_requested: 0,
        allowed: false,
        retry_after_ms: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::AlgorithmKind;
    use crate::backend::LocalBackend;
    use std::time::Duration;

    fn make_service(capacity: u32, refill_rate: u32) -> RateLimitService {
        let default_config = EffectiveConfig {
            algorithm: AlgorithmKind::TokenBucket,
            capacity,
            refill_rate,
            window_ms: 1000,
            cleanup_interval_ms: 60_000,
        };
        let (schedule_manager, active_set) = ScheduleManager::new(Duration::from_secs(60));
        let resolver = Arc::new(ConfigResolver::new(default_config, active_set));
        let registry = Arc::new(BucketRegistry::new(Arc::new(LocalBackend::new()), Duration::from_secs(60)));
        let metrics = Arc::new(MetricsCore::new(10));
        RateLimitService::new(resolver, registry, schedule_manager, metrics)
    }

    #[tokio::test]
    async fn rejects_zero_tokens_without_mutating_state() {
        let svc = make_service(1, 0);
        let outcome = svc.check("k", 0).await;
        assert!(!outcome.allowed);
        assert!(svc.check("k", 1).await.allowed);
    }

    #[tokio::test]
    async fn rejects_empty_key() {
        let svc = make_service(1, 0);
        let outcome = svc.check("", 1).await;
        assert!(!outcome.allowed);
    }

    #[tokio::test]
    async fn records_metrics_on_every_decision() {
        let svc = make_service(1, 0);
        svc.check("k", 1).await;
        svc.check("k", 1).await;
        let snap = svc.get_metrics();
        assert_eq!(snap.total_allowed, 1);
        assert_eq!(snap.total_denied, 1);
    }

    #[tokio::test]
    async fn key_override_beats_default() {
        let svc = make_service(10, 1);
        svc.set_key_override(
            "vip",
            EffectiveConfig {
                algorithm: AlgorithmKind::TokenBucket,
                capacity: 1,
                refill_rate: 0,
                window_ms: 1000,
                cleanup_interval_ms: 60_000,
            },
        )
        .unwrap();
        assert!(svc.check("vip", 1).await.allowed);
        assert!(!svc.check("vip", 1).await.allowed);
    }

    #[tokio::test]
    async fn emergency_schedule_overrides_matching_keys() {
        let svc = make_service(10, 1);
        svc.create_emergency_schedule(
            "api:*",
            Duration::from_secs(60),
            EffectiveConfig {
                algorithm: AlgorithmKind::TokenBucket,
                capacity: 1,
                refill_rate: 0,
                window_ms: 1000,
                cleanup_interval_ms: 60_000,
            },
            "incident-123",
        )
        .unwrap();
        svc.evaluate_schedules_now();
        assert!(svc.check("api:x", 1).await.allowed);
        assert!(!svc.check("api:x", 1).await.allowed);
    }

    #[tokio::test]
    async fn background_tasks_start_and_stop_cleanly_with_health_probe() {
        let svc = make_service(1, 0);
        svc.start_background_tasks().await;
        svc.start_background_tasks().await; // idempotent
        tokio::time::sleep(Duration::from_millis(10)).await;
        svc.stop_background_tasks().await;
        assert!(svc.is_store_healthy());
    }

    #[tokio::test]
    async fn clear_metrics_resets_counters_not_health() {
        let svc = make_service(5, 1);
        svc.check("k", 1).await;
        svc.clear_metrics();
        let snap = svc.get_metrics();
        assert_eq!(snap.total_allowed, 0);
        assert!(snap.store_healthy);
    }
}
