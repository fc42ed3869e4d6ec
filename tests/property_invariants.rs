//! Property-based tests for the quantified invariants in spec.md §8,
//! run against the algorithm cores directly (no network, no registry).

use proptest::prelude::*;
use sluice::algorithms::{AlgorithmInstance, AlgorithmKind, EffectiveConfig};

fn token_bucket_cfg(capacity: u32, refill_rate: u32) -> EffectiveConfig {
    EffectiveConfig {
        algorithm: AlgorithmKind::TokenBucket,
        capacity,
        refill_rate,
        window_ms: 1000,
        cleanup_interval_ms: 60_000,
    }
}

fn sliding_window_cfg(capacity: u32, window_ms: u64) -> EffectiveConfig {
    EffectiveConfig {
        algorithm: AlgorithmKind::SlidingWindow,
        capacity,
        refill_rate: 0,
        window_ms,
        cleanup_interval_ms: 60_000,
    }
}

fn fixed_window_cfg(capacity: u32, window_ms: u64) -> EffectiveConfig {
    EffectiveConfig {
        algorithm: AlgorithmKind::FixedWindow,
        capacity,
        refill_rate: 0,
        window_ms,
        cleanup_interval_ms: 60_000,
    }
}

proptest! {
    /// "For all keys k, all decisions d on k: after d, 0 <= tokens(k) <= capacity(k)"
    /// — exercised indirectly via `remaining`, which is always in [0, capacity].
    #[test]
    fn token_bucket_remaining_never_exceeds_capacity(
        capacity in 1u32..200,
        refill_rate in 0u32..50,
        requests in proptest::collection::vec(0u32..20, 1..50),
    ) {
        let cfg = token_bucket_cfg(capacity, refill_rate);
        let mut state = AlgorithmInstance::new(&cfg);
        let mut now = 0i64;
        for requested in requests {
            let decision = state.try_consume(now, requested, &cfg);
            prop_assert!(decision.observable.remaining <= capacity);
            now += 100;
        }
    }

    /// Total admissions against token bucket starting full never exceed
    /// `capacity + floor(refill_rate * elapsed_seconds)`.
    #[test]
    fn token_bucket_admission_bound_over_time(
        capacity in 1u32..50,
        refill_rate in 0u32..20,
        seconds in 1i64..20,
    ) {
        let cfg = token_bucket_cfg(capacity, refill_rate);
        let mut state = AlgorithmInstance::new(&cfg);
        let total_ms = seconds * 1000;
        let mut admitted = 0u32;
        let mut now = 0i64;
        while now <= total_ms {
            if state.try_consume(now, 1, &cfg).allowed {
                admitted += 1;
            }
            now += 50;
        }
        let bound = capacity + (refill_rate as i64 * seconds) as u32;
        prop_assert!(admitted <= bound);
    }

    /// Sliding window: retained timestamp count never exceeds capacity.
    #[test]
    fn sliding_window_count_never_exceeds_capacity(
        capacity in 1u32..50,
        window_ms in 100u64..5000,
        requests in proptest::collection::vec(0i64..50, 1..80),
    ) {
        let cfg = sliding_window_cfg(capacity, window_ms);
        let mut state = AlgorithmInstance::new(&cfg);
        let mut now = 0i64;
        for step in requests {
            now += step;
            let decision = state.try_consume(now, 1, &cfg);
            prop_assert!(decision.observable.remaining <= capacity);
        }
    }

    /// Fixed window: admissions within any single aligned window never
    /// exceed capacity. Window boundaries are tracked the same way the
    /// algorithm itself aligns them (spec.md §9a "aligned" reset form).
    #[test]
    fn fixed_window_admissions_bounded_within_window(
        capacity in 1u32..50,
        window_ms in 100i64..5000,
    ) {
        let cfg = fixed_window_cfg(capacity, window_ms as u64);
        let mut state = AlgorithmInstance::new(&cfg);
        let mut current_window_start = 0i64;
        let mut admitted_in_window = 0u32;
        let mut now = 0i64;
        for _ in 0..200 {
            let window_start = now - now.rem_euclid(window_ms);
            if window_start != current_window_start {
                current_window_start = window_start;
                admitted_in_window = 0;
            }
            let decision = state.try_consume(now, 1, &cfg);
            if decision.allowed {
                admitted_in_window += 1;
            }
            prop_assert!(admitted_in_window <= capacity);
            now += (window_ms / 20).max(1);
        }
    }

    /// `check(k, 0)` never mutates state beyond refill — repeated queries
    /// observe identical remaining capacity.
    #[test]
    fn zero_token_query_is_idempotent(capacity in 1u32..100, refill_rate in 0u32..20) {
        let cfg = token_bucket_cfg(capacity, refill_rate);
        let mut state = AlgorithmInstance::new(&cfg);
        let first = state.try_consume(0, 0, &cfg);
        let second = state.try_consume(0, 0, &cfg);
        prop_assert!(!first.allowed);
        prop_assert!(!second.allowed);
        prop_assert_eq!(first.observable.remaining, second.observable.remaining);
    }
}
