//! Layered configuration resolver (spec.md §4.4): exact key override →
//! active schedule → longest wildcard pattern → process default, cached
//! by `(key, active_set_version, static_version)`.

use crate::algorithms::EffectiveConfig;
use crate::pattern;
use crate::schedule::ActiveSet;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct ConfigResolver {
    default_config: ArcSwap<EffectiveConfig>,
    exact_overrides: DashMap<String, EffectiveConfig>,
    pattern_overrides: DashMap<String, EffectiveConfig>,
    active_set: Arc<ArcSwap<ActiveSet>>,
    static_version: AtomicU64,
    cache: DashMap<(String, u64, u64), EffectiveConfig>,
}

impl ConfigResolver {
    pub fn new(default_config: EffectiveConfig, active_set: Arc<ArcSwap<ActiveSet>>) -> Self {
        Self {
            default_config: ArcSwap::from_pointee(default_config),
            exact_overrides: DashMap::new(),
            pattern_overrides: DashMap::new(),
            active_set,
            static_version: AtomicU64::new(0),
            cache: DashMap::new(),
        }
    }

    pub fn default_config(&self) -> EffectiveConfig {
        **self.default_config.load()
    }

    pub fn set_default_config(&self, cfg: EffectiveConfig) {
        self.default_config.store(Arc::new(cfg));
        self.bump_static_version();
    }

    pub fn set_exact_override(&self, key: impl Into<String>, cfg: EffectiveConfig) {
        self.exact_overrides.insert(key.into(), cfg);
        self.bump_static_version();
    }

    pub fn remove_exact_override(&self, key: &str) {
        self.exact_overrides.remove(key);
        self.bump_static_version();
    }

    pub fn set_pattern_override(&self, pattern: impl Into<String>, cfg: EffectiveConfig) {
        self.pattern_overrides.insert(pattern.into(), cfg);
        self.bump_static_version();
    }

    pub fn remove_pattern_override(&self, pattern: &str) {
        self.pattern_overrides.remove(pattern);
        self.bump_static_version();
    }

    /// Re-reads operator-supplied config without restarting in-flight
    /// decisions (spec.md §6 Config API "Reload operation"); since every
    /// mutator already bumps the static version and the cache is never
    /// read by a decision already past resolution, a reload is simply
    /// "caller installs new overrides" — nothing extra to flush.
    pub fn bump_static_version(&self) {
        self.static_version.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resolve(&self, key: &str, now_ms: i64, tz: &str) -> EffectiveConfig {
        let active_set = self.active_set.load();
        let cache_key = (
            key.to_string(),
            active_set.version,
            self.static_version.load(Ordering::Relaxed),
        );
        if let Some(hit) = self.cache.get(&cache_key) {
            return *hit;
        }
        let resolved = self.resolve_uncached(key, &active_set, now_ms, tz);
        self.cache.insert(cache_key, resolved);
        resolved
    }

    fn resolve_uncached(
        &self,
        key: &str,
        active_set: &ActiveSet,
        now_ms: i64,
        tz: &str,
    ) -> EffectiveConfig {
        if let Some(cfg) = self.exact_overrides.get(key) {
            return *cfg;
        }
        if let Some(cfg) = active_set.effective_config_for(key, now_ms, tz) {
            return cfg;
        }
        // DashMap iteration can't hand out borrows that outlive the guard,
        // so the candidate pattern strings are cloned before picking a winner.
        let candidates: Vec<String> = self.pattern_overrides.iter().map(|e| e.key().clone()).collect();
        if let Some(best) = pattern::best_match(key, candidates.iter().map(|s| s.as_str())) {
            if let Some(cfg) = self.pattern_overrides.get(best) {
                return *cfg;
            }
        }
        self.default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::AlgorithmKind;
    use crate::schedule::ActiveSet;

    fn cfg(capacity: u32) -> EffectiveConfig {
        EffectiveConfig {
            algorithm: AlgorithmKind::TokenBucket,
            capacity,
            refill_rate: 1,
            window_ms: 1000,
            cleanup_interval_ms: 60_000,
        }
    }

    #[test]
    fn exact_override_beats_pattern_and_default() {
        let active_set = Arc::new(ArcSwap::from_pointee(ActiveSet::empty()));
        let resolver = ConfigResolver::new(cfg(10), active_set);
        resolver.set_pattern_override("api:*", cfg(5));
        resolver.set_exact_override("api:x", cfg(1));
        assert_eq!(resolver.resolve("api:x", 0, "UTC").capacity, 1);
        assert_eq!(resolver.resolve("api:y", 0, "UTC").capacity, 5);
        assert_eq!(resolver.resolve("other", 0, "UTC").capacity, 10);
    }

    #[test]
    fn cache_invalidates_on_static_config_change() {
        let active_set = Arc::new(ArcSwap::from_pointee(ActiveSet::empty()));
        let resolver = ConfigResolver::new(cfg(10), active_set);
        assert_eq!(resolver.resolve("k", 0, "UTC").capacity, 10);
        resolver.set_default_config(cfg(20));
        assert_eq!(resolver.resolve("k", 0, "UTC").capacity, 20);
    }
}
