//! Metrics core (spec.md §4.6): per-key counters plus process totals and
//! a store-health signal, backed by `DashMap` + atomics as the source of
//! truth for `getMetrics()`/`clearMetrics()`, mirrored into process-global
//! Prometheus gauges/counters via `once_cell::sync::Lazy` +
//! `prometheus::register_*` — the teacher's exact idiom in its own
//! `metrics.rs`, generalized from HTTP/proxy counters to rate-limit ones.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, IntGauge, Opts};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Per-key counters (spec.md §3 `KeyMetrics`).
#[derive(Debug, Default)]
pub struct KeyMetrics {
    pub allowed: AtomicU64,
    pub denied: AtomicU64,
    pub last_access_ms: AtomicI64,
}

pub struct MetricsCore {
    per_key: DashMap<Arc<str>, Arc<KeyMetrics>>,
    total_allowed: AtomicU64,
    total_denied: AtomicU64,
    store_healthy: AtomicBool,
    buckets_cleaned: AtomicU64,
    slow_threshold_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyMetricsSnapshot {
    pub allowed: u64,
    pub denied: u64,
    pub last_access_ms: i64,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub per_key: Vec<(Arc<str>, KeyMetricsSnapshot)>,
    pub total_allowed: u64,
    pub total_denied: u64,
    pub store_healthy: bool,
    pub buckets_cleaned: u64,
}

impl MetricsCore {
    pub fn new(slow_threshold_ms: u64) -> Self {
        Self {
            per_key: DashMap::new(),
            total_allowed: AtomicU64::new(0),
            total_denied: AtomicU64::new(0),
            store_healthy: AtomicBool::new(true),
            buckets_cleaned: AtomicU64::new(0),
            slow_threshold_ms,
        }
    }

    pub fn record_decision(&self, key: &str, allowed: bool, now_ms: i64, processing_time_ms: u64) {
        let entry = self
            .per_key
            .entry(Arc::from(key))
            .or_insert_with(|| Arc::new(KeyMetrics::default()));
        if allowed {
            entry.allowed.fetch_add(1, Ordering::Relaxed);
            self.total_allowed.fetch_add(1, Ordering::Relaxed);
            RATE_LIMIT_ALLOWED_TOTAL.inc();
        } else {
            entry.denied.fetch_add(1, Ordering::Relaxed);
            self.total_denied.fetch_add(1, Ordering::Relaxed);
            RATE_LIMIT_DENIED_TOTAL.inc();
        }
        entry.last_access_ms.store(now_ms, Ordering::Relaxed);
        RATE_LIMIT_DECISION_LATENCY_MS.observe(processing_time_ms as f64);

        if processing_time_ms > self.slow_threshold_ms {
            warn!(
                key,
                processing_time_ms,
                threshold_ms = self.slow_threshold_ms,
                "rate-limit decision exceeded latency threshold"
            );
        }
    }

    pub fn record_bucket_cleanup(&self, cleaned: u64) {
        self.buckets_cleaned.fetch_add(cleaned, Ordering::Relaxed);
        RATE_LIMIT_BUCKETS_CLEANED_TOTAL.add(cleaned as i64);
    }

    pub fn set_store_healthy(&self, healthy: bool) {
        self.store_healthy.store(healthy, Ordering::Relaxed);
        RATE_LIMIT_STORE_HEALTHY.set(healthy as i64);
    }

    pub fn store_healthy(&self) -> bool {
        self.store_healthy.load(Ordering::Relaxed)
    }

    /// `getMetrics()` of spec.md §6.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let per_key = self
            .per_key
            .iter()
            .map(|e| {
                let m = e.value();
                (
                    e.key().clone(),
                    KeyMetricsSnapshot {
                        allowed: m.allowed.load(Ordering::Relaxed),
                        denied: m.denied.load(Ordering::Relaxed),
                        last_access_ms: m.last_access_ms.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        MetricsSnapshot {
            per_key,
            total_allowed: self.total_allowed.load(Ordering::Relaxed),
            total_denied: self.total_denied.load(Ordering::Relaxed),
            store_healthy: self.store_healthy(),
            buckets_cleaned: self.buckets_cleaned.load(Ordering::Relaxed),
        }
    }

    /// `clearMetrics()` resets counters but not the health signal
    /// (spec.md §4.6) — and must not reset the process-global Prometheus
    /// totals, which are a separate scrape side-channel (SPEC_FULL.md §4.6).
    pub fn clear(&self) {
        self.per_key.clear();
        self.total_allowed.store(0, Ordering::Relaxed);
        self.total_denied.store(0, Ordering::Relaxed);
        self.buckets_cleaned.store(0, Ordering::Relaxed);
    }
}

static RATE_LIMIT_ALLOWED_TOTAL: Lazy<prometheus::IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!(
        "sluice_rate_limit_allowed_total",
        "Total number of admitted rate-limit decisions"
    )
    .unwrap_or_else(|e| {
        tracing::error!("failed to register sluice_rate_limit_allowed_total: {e}");
        std::process::exit(1)
    })
});

static RATE_LIMIT_DENIED_TOTAL: Lazy<prometheus::IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!(
        "sluice_rate_limit_denied_total",
        "Total number of rejected rate-limit decisions"
    )
    .unwrap_or_else(|e| {
        tracing::error!("failed to register sluice_rate_limit_denied_total: {e}");
        std::process::exit(1)
    })
});

static RATE_LIMIT_BUCKETS_CLEANED_TOTAL: Lazy<prometheus::IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!(
        "sluice_rate_limit_buckets_cleaned_total",
        "Total number of idle buckets evicted by the registry cleanup sweep"
    )
    .unwrap_or_else(|e| {
        tracing::error!("failed to register sluice_rate_limit_buckets_cleaned_total: {e}");
        std::process::exit(1)
    })
});

static RATE_LIMIT_STORE_HEALTHY: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!(
        "sluice_rate_limit_store_healthy",
        "1 if the remote store is healthy, 0 if the adapter is failing open"
    )
    .unwrap_or_else(|e| {
        tracing::error!("failed to register sluice_rate_limit_store_healthy: {e}");
        std::process::exit(1)
    })
});

static RATE_LIMIT_DECISION_LATENCY_MS: Lazy<prometheus::Histogram> = Lazy::new(|| {
    prometheus::register_histogram!(
        "sluice_rate_limit_decision_latency_ms",
        "Processing time of a single rate-limit decision, in milliseconds"
    )
    .unwrap_or_else(|e| {
        tracing::error!("failed to register sluice_rate_limit_decision_latency_ms: {e}");
        std::process::exit(1)
    })
});

// Kept for parity with the teacher's per-label counters (e.g. rejections
// tagged by endpoint); unused labels are collapsed into the scalar
// counters above since this crate has no endpoint dimension of its own.
#[allow(dead_code)]
static RATE_LIMIT_REJECTIONS_BY_ALGORITHM: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!(
        Opts::new(
            "sluice_rate_limit_rejections_by_algorithm_total",
            "Rejections broken down by algorithm kind"
        ),
        &["algorithm"]
    )
    .unwrap_or_else(|e| {
        tracing::error!("failed to register sluice_rate_limit_rejections_by_algorithm_total: {e}");
        std::process::exit(1)
    })
});
