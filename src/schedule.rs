//! Schedule manager (spec.md §4.5): time-windowed configuration
//! overrides — recurring (cron, seconds precision), one-time, and
//! event-driven — that win over static config while active. Evaluated on
//! a timer and published as an immutable `ActiveSet` via lock-free
//! pointer swap, grounded on the teacher's `arc_swap` dependency and its
//! `ArcSwap`-based config-hot-reload idiom.

use crate::algorithms::EffectiveConfig;
use crate::error::{RateLimitError, Result};
use crate::pattern;
use arc_swap::ArcSwap;
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Recurring,
    OneTime,
    EventDriven,
}

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub name: String,
    pub key_pattern: String,
    pub kind: ScheduleKind,
    pub cron: Option<cron::Schedule>,
    pub tz: String,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    pub limits: EffectiveConfig,
    pub fallback_limits: Option<EffectiveConfig>,
    pub priority: i32,
    pub enabled: bool,
    pub ramp_up_minutes: u32,
    pub ramp_down_minutes: u32,
}

impl ScheduleEntry {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RateLimitError::InvalidInput("schedule name must be non-empty".into()));
        }
        if self.key_pattern.is_empty() {
            return Err(RateLimitError::InvalidInput("schedule pattern must be non-empty".into()));
        }
        if self.kind == ScheduleKind::Recurring && self.cron.is_none() {
            return Err(RateLimitError::InvalidInput(format!(
                "schedule '{}' is RECURRING but has no parseable cron expression",
                self.name
            )));
        }
        if matches!(self.kind, ScheduleKind::OneTime | ScheduleKind::EventDriven) {
            match (self.start_ms, self.end_ms) {
                (Some(start), Some(end)) if end > start => {}
                _ => {
                    return Err(RateLimitError::InvalidInput(format!(
                        "schedule '{}' requires endMs > startMs",
                        self.name
                    )))
                }
            }
        }
        self.limits.validate()?;
        Ok(())
    }

    fn is_active_at(&self, now_ms: i64) -> bool {
        if !self.enabled {
            return false;
        }
        match self.kind {
            ScheduleKind::OneTime | ScheduleKind::EventDriven => match (self.start_ms, self.end_ms) {
                (Some(start), Some(end)) => now_ms >= start && now_ms < end,
                _ => false,
            },
            ScheduleKind::Recurring => self
                .cron
                .as_ref()
                .map(|cron| cron_matches_minute(cron, &self.tz, now_ms))
                .unwrap_or(false),
        }
    }

    /// Convenience constructor for `createEmergencySchedule` (spec.md §6):
    /// an event-driven override at maximum priority, active immediately
    /// for `duration`. Not a new variant — just a pre-filled `ScheduleEntry`.
    pub fn emergency(
        name: impl Into<String>,
        key_pattern: impl Into<String>,
        duration: Duration,
        limits: EffectiveConfig,
        now_ms: i64,
    ) -> Self {
        Self {
            name: name.into(),
            key_pattern: key_pattern.into(),
            kind: ScheduleKind::EventDriven,
            cron: None,
            tz: "UTC".to_string(),
            start_ms: Some(now_ms),
            end_ms: Some(now_ms + duration.as_millis() as i64),
            limits,
            fallback_limits: None,
            priority: i32::MAX,
            enabled: true,
            ramp_up_minutes: 0,
            ramp_down_minutes: 0,
        }
    }
}

/// "active" means the cron expression matches the current minute
/// (spec.md §4.5), evaluated in the schedule's declared IANA timezone.
fn cron_matches_minute(schedule: &cron::Schedule, tz_name: &str, now_ms: i64) -> bool {
    let tz: Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    let Some(dt) = Utc.timestamp_millis_opt(now_ms).single() else {
        return false;
    };
    let local = dt.with_timezone(&tz).with_second(0).unwrap().with_nanosecond(0).unwrap();
    schedule.includes(local)
}

use chrono::Timelike;

/// An active schedule, annotated with the moment it most recently
/// transitioned into its current active/inactive state, so ramps can be
/// sampled per-decision without re-deriving transition history.
#[derive(Debug, Clone)]
struct ActiveEntry {
    entry: Arc<ScheduleEntry>,
    became_active_ms: i64,
}

/// Immutable snapshot published after each evaluation (spec.md §4.5),
/// sorted by priority desc with lexicographic name as a stable tie-break.
#[derive(Debug, Clone)]
pub struct ActiveSet {
    pub version: u64,
    entries: Vec<ActiveEntry>,
}

impl ActiveSet {
    pub fn empty() -> Self {
        Self {
            version: 0,
            entries: Vec::new(),
        }
    }

    /// Resolves the effective config for `key` from the highest-priority
    /// matching active schedule, applying the transition ramp (spec.md
    /// §4.5) if one is configured.
    pub fn effective_config_for(&self, key: &str, now_ms: i64, _tz: &str) -> Option<EffectiveConfig> {
        let active = self
            .entries
            .iter()
            .find(|e| pattern::matches(&e.entry.key_pattern, key))?;
        Some(ramped_config(active, now_ms))
    }
}

fn ramped_config(active: &ActiveEntry, now_ms: i64) -> EffectiveConfig {
    let entry = &active.entry;
    let Some(fallback) = entry.fallback_limits else {
        return entry.limits;
    };
    if entry.ramp_up_minutes == 0 {
        return entry.limits;
    }
    let ramp_ms = entry.ramp_up_minutes as i64 * 60_000;
    let elapsed = (now_ms - active.became_active_ms).clamp(0, ramp_ms);
    let fraction = elapsed as f64 / ramp_ms as f64;
    let mut cfg = entry.limits;
    cfg.capacity = lerp_u32(fallback.capacity, entry.limits.capacity, fraction);
    cfg.refill_rate = lerp_u32(fallback.refill_rate, entry.limits.refill_rate, fraction);
    cfg
}

fn lerp_u32(from: u32, to: u32, fraction: f64) -> u32 {
    (from as f64 + (to as f64 - from as f64) * fraction).round() as u32
}

pub struct ScheduleManager {
    entries: DashMap<String, ScheduleEntry>,
    active_set: Arc<ArcSwap<ActiveSet>>,
    transitions: DashMap<String, (bool, i64)>,
    running: Arc<AtomicBool>,
    eval_interval: Duration,
    task_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ScheduleManager {
    pub fn new(eval_interval: Duration) -> (Arc<Self>, Arc<ArcSwap<ActiveSet>>) {
        let active_set = Arc::new(ArcSwap::from_pointee(ActiveSet::empty()));
        let manager = Arc::new(Self {
            entries: DashMap::new(),
            active_set: Arc::clone(&active_set),
            transitions: DashMap::new(),
            running: Arc::new(AtomicBool::new(false)),
            eval_interval,
            task_handle: tokio::sync::Mutex::new(None),
        });
        (manager, active_set)
    }

    pub fn active_set(&self) -> Arc<ArcSwap<ActiveSet>> {
        Arc::clone(&self.active_set)
    }

    pub fn create_schedule(&self, entry: ScheduleEntry) -> Result<()> {
        entry.validate()?;
        self.check_conflict(&entry);
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn update_schedule(&self, entry: ScheduleEntry) -> Result<()> {
        entry.validate()?;
        if !self.entries.contains_key(&entry.name) {
            return Err(RateLimitError::InvalidInput(format!(
                "no schedule named '{}' to update",
                entry.name
            )));
        }
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn delete_schedule(&self, name: &str) {
        self.entries.remove(name);
        self.transitions.remove(name);
    }

    pub fn activate_schedule(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    pub fn deactivate_schedule(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| RateLimitError::InvalidInput(format!("no schedule named '{name}'")))?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn list_schedules(&self) -> Vec<ScheduleEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// `ConfigConflict` is informational (spec.md §7): overlapping
    /// schedules with equal priority and identical pattern are resolved
    /// by lexicographic tie-break in evaluation, not rejected here.
    fn check_conflict(&self, candidate: &ScheduleEntry) {
        for existing in self.entries.iter() {
            if existing.priority == candidate.priority
                && existing.key_pattern == candidate.key_pattern
                && existing.name != candidate.name
            {
                info!(
                    existing = %existing.name,
                    candidate = %candidate.name,
                    "config conflict: equal-priority schedules on identical pattern, resolved lexicographically"
                );
            }
        }
    }

    /// Evaluates every schedule against `now_ms`, publishes a new
    /// `ActiveSet`, and bumps the version counter.
    pub fn evaluate(&self, now_ms: i64) {
        let mut newly_active: Vec<ActiveEntry> = Vec::new();
        for item in self.entries.iter() {
            let entry = item.value();
            let is_active = entry.is_active_at(now_ms);
            let prev = self.transitions.get(&entry.name).map(|v| *v);
            let became_active_ms = match prev {
                Some((was_active, since)) if was_active == is_active => since,
                _ => now_ms,
            };
            self.transitions.insert(entry.name.clone(), (is_active, became_active_ms));
            if is_active {
                newly_active.push(ActiveEntry {
                    entry: Arc::new(entry.clone()),
                    became_active_ms,
                });
            }
        }
        newly_active.sort_by(|a, b| {
            b.entry
                .priority
                .cmp(&a.entry.priority)
                .then(a.entry.name.cmp(&b.entry.name))
        });

        let next_version = self.active_set.load().version + 1;
        self.active_set.store(Arc::new(ActiveSet {
            version: next_version,
            entries: newly_active,
        }));
    }

    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.task_handle.lock().await;
        if guard.is_some() {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let manager = Arc::clone(self);
        let running = Arc::clone(&self.running);
        let interval = self.eval_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while running.load(Ordering::Relaxed) {
                ticker.tick().await;
                manager.evaluate(crate::config::now_ms());
            }
        });
        *guard = Some(handle);
        info!("schedule manager evaluation task started");
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        let mut guard = self.task_handle.lock().await;
        if let Some(handle) = guard.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

/// Parses a standard cron expression with seconds precision, per spec.md
/// §4.5. Returns `InvalidInput` rather than panicking so callers of the
/// Schedule API get a structured rejection.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(expr).map_err(|e| RateLimitError::InvalidInput(e.to_string()))
}
