//! End-to-end scenarios from spec.md §8, exercised against
//! `RateLimitService` with the local in-process backend.

use sluice::algorithms::{AlgorithmKind, EffectiveConfig};
use sluice::backend::LocalBackend;
use sluice::metrics::MetricsCore;
use sluice::registry::BucketRegistry;
use sluice::resolver::ConfigResolver;
use sluice::schedule::{ScheduleEntry, ScheduleKind, ScheduleManager};
use sluice::RateLimitService;
use std::sync::Arc;
use std::time::Duration;

fn build_service(default: EffectiveConfig) -> RateLimitService {
    build_service_with_sweep(default, Duration::from_secs(60))
}

fn build_service_with_sweep(default: EffectiveConfig, sweep_interval: Duration) -> RateLimitService {
    let (schedule_manager, active_set) = ScheduleManager::new(Duration::from_secs(60));
    let resolver = Arc::new(ConfigResolver::new(default, active_set));
    let registry = Arc::new(BucketRegistry::new(Arc::new(LocalBackend::new()), sweep_interval));
    let metrics = Arc::new(MetricsCore::new(10));
    RateLimitService::new(resolver, registry, schedule_manager, metrics)
}

/// Scenario 1: basic token bucket refill.
#[tokio::test]
async fn scenario_basic_token_bucket_refill() {
    let svc = build_service(EffectiveConfig {
        algorithm: AlgorithmKind::TokenBucket,
        capacity: 2,
        refill_rate: 1,
        window_ms: 1000,
        cleanup_interval_ms: 60_000,
    });

    assert!(svc.check("k", 1).await.allowed);
    assert!(svc.check("k", 1).await.allowed);
    assert!(!svc.check("k", 1).await.allowed);
}

/// Scenario 2: sliding window exact admission sequence.
#[tokio::test]
async fn scenario_sliding_window_exact() {
    let svc = build_service(EffectiveConfig {
        algorithm: AlgorithmKind::SlidingWindow,
        capacity: 3,
        refill_rate: 0,
        window_ms: 1000,
        cleanup_interval_ms: 60_000,
    });

    assert!(svc.check("k", 1).await.allowed);
    assert!(svc.check("k", 1).await.allowed);
    assert!(svc.check("k", 1).await.allowed);
    assert!(!svc.check("k", 1).await.allowed);
}

/// Scenario 3: schedule override wins over static default while active.
#[tokio::test]
async fn scenario_schedule_override() {
    let svc = build_service(EffectiveConfig {
        algorithm: AlgorithmKind::TokenBucket,
        capacity: 10,
        refill_rate: 0,
        window_ms: 1000,
        cleanup_interval_ms: 60_000,
    });

    svc.create_schedule(ScheduleEntry {
        name: "s1".to_string(),
        key_pattern: "api:*".to_string(),
        kind: ScheduleKind::OneTime,
        cron: None,
        tz: "UTC".to_string(),
        start_ms: Some(0),
        end_ms: Some(i64::MAX),
        limits: EffectiveConfig {
            algorithm: AlgorithmKind::TokenBucket,
            capacity: 1,
            refill_rate: 0,
            window_ms: 1000,
            cleanup_interval_ms: 60_000,
        },
        fallback_limits: None,
        priority: 10,
        enabled: true,
        ramp_up_minutes: 0,
        ramp_down_minutes: 0,
    })
    .unwrap();
    svc.evaluate_schedules_now();

    assert!(svc.check("api:x", 1).await.allowed);
    assert!(!svc.check("api:x", 1).await.allowed);
    // A key outside the schedule's pattern still sees the generous default.
    assert!(svc.check("other", 1).await.allowed);
}

/// Scenario 4: fail-open on store outage is exercised at the adapter
/// boundary by `backend::remote`'s health-transition unit tests (no live
/// Redis here); this checks the facade surfaces `is_store_healthy` from
/// the adapter end to end against the always-healthy local backend.
#[tokio::test]
async fn scenario_local_backend_always_healthy() {
    let svc = build_service(EffectiveConfig {
        algorithm: AlgorithmKind::TokenBucket,
        capacity: 1,
        refill_rate: 1,
        window_ms: 1000,
        cleanup_interval_ms: 60_000,
    });
    assert!(svc.is_store_healthy());
    svc.check("k", 1).await;
    assert!(svc.is_store_healthy());
}

/// Scenario 5: cleanup sweep evicts idle buckets; a subsequent check
/// creates a fresh, full bucket.
#[tokio::test]
async fn scenario_cleanup_sweep_evicts_idle_entries() {
    let svc = build_service_with_sweep(
        EffectiveConfig {
            algorithm: AlgorithmKind::TokenBucket,
            capacity: 1,
            refill_rate: 0,
            window_ms: 1000,
            cleanup_interval_ms: 100,
        },
        Duration::from_millis(20),
    );

    assert!(svc.check("k", 1).await.allowed);
    assert!(!svc.check("k", 1).await.allowed);

    svc.start_background_tasks().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    svc.stop_background_tasks().await;

    // Fresh bucket: full capacity available again.
    assert!(svc.check("k", 1).await.allowed);
}

/// Scenario 6: leaky bucket shaping with increasing wait estimates, then
/// rejection, then admission after drain.
#[tokio::test]
async fn scenario_leaky_bucket_shaping() {
    let svc = build_service(EffectiveConfig {
        algorithm: AlgorithmKind::LeakyBucket,
        capacity: 3,
        refill_rate: 1,
        window_ms: 60_000,
        cleanup_interval_ms: 60_000,
    });

    let d0 = svc.check("k", 1).await;
    let d1 = svc.check("k", 1).await;
    let d2 = svc.check("k", 1).await;
    assert!(d0.allowed && d1.allowed && d2.allowed);
    assert_eq!(d0.retry_after_ms, Some(0));
    assert_eq!(d1.retry_after_ms, Some(1000));
    assert_eq!(d2.retry_after_ms, Some(2000));

    let d3 = svc.check("k", 1).await;
    assert!(!d3.allowed);
}

/// Config reload does not disturb in-flight resolved state for other keys.
#[tokio::test]
async fn reload_is_a_no_op_for_unrelated_keys() {
    let svc = build_service(EffectiveConfig {
        algorithm: AlgorithmKind::TokenBucket,
        capacity: 5,
        refill_rate: 1,
        window_ms: 1000,
        cleanup_interval_ms: 60_000,
    });
    svc.check("k", 1).await;
    svc.reload();
    let snap_before = svc.get_metrics();
    svc.reload();
    let snap_after = svc.get_metrics();
    assert_eq!(snap_before.total_allowed, snap_after.total_allowed);
}
