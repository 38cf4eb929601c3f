use crate::budget::MemoryBudget;
use crate::eviction::{EvictionRequest, MemoryEvictor};
use crate::pressure::{MemoryPressure, MemoryPressureThresholds};
use crate::report::{ComponentUsage, MemoryReport};
use crate::types::{MemoryBreakdown, MemoryCategory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

type MemoryEventListener = Arc<dyn Fn(MemoryEvent) + Send + Sync>;
type EvictorEntry = (MemoryCategory, Arc<AtomicU64>, Arc<dyn MemoryEvictor>);

struct RegistrationEntry {
    name: String,
    category: MemoryCategory,
    usage_bytes: Arc<AtomicU64>,
    evictor: Option<Arc<dyn MemoryEvictor>>,
}

struct Inner {
    budget: MemoryBudget,
    thresholds: MemoryPressureThresholds,
    next_id: AtomicU64,
    registrations: Mutex<HashMap<u64, RegistrationEntry>>,
    pressure: Mutex<MemoryPressure>,
    listeners: Mutex<Vec<MemoryEventListener>>,
}

/// An update emitted when pressure crosses a threshold (after enforcement).
#[derive(Debug, Clone)]
pub struct MemoryEvent {
    pub previous_pressure: MemoryPressure,
    pub pressure: MemoryPressure,
    pub report: MemoryReport,
}

/// Memory-pressure notifier shared by every index of a process.
///
/// Components register through [`MemoryManager::register_evictor`] and keep the
/// returned [`MemoryRegistration`]; dropping it unregisters the component.
#[derive(Clone)]
pub struct MemoryManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("budget", &self.inner.budget)
            .field("registrations", &lock(&self.inner.registrations).len())
            .finish_non_exhaustive()
    }
}

impl MemoryManager {
    pub fn new(budget: MemoryBudget) -> Self {
        Self::with_thresholds(budget, MemoryPressureThresholds::default())
    }

    pub fn with_thresholds(budget: MemoryBudget, thresholds: MemoryPressureThresholds) -> Self {
        Self {
            inner: Arc::new(Inner {
                budget,
                thresholds,
                next_id: AtomicU64::new(1),
                registrations: Mutex::new(HashMap::new()),
                pressure: Mutex::new(MemoryPressure::Low),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    pub fn thresholds(&self) -> MemoryPressureThresholds {
        self.inner.thresholds
    }

    /// Subscribe to memory pressure events.
    pub fn subscribe(&self, listener: MemoryEventListener) {
        lock(&self.inner.listeners).push(listener);
    }

    /// Register a component for memory accounting only.
    pub fn register_tracker(
        &self,
        name: impl Into<String>,
        category: MemoryCategory,
    ) -> MemoryRegistration {
        self.register_inner(name.into(), category, None)
    }

    /// Register a component for memory accounting and eviction participation.
    pub fn register_evictor(
        &self,
        name: impl Into<String>,
        category: MemoryCategory,
        evictor: Arc<dyn MemoryEvictor>,
    ) -> MemoryRegistration {
        self.register_inner(name.into(), category, Some(evictor))
    }

    fn register_inner(
        &self,
        name: String,
        category: MemoryCategory,
        evictor: Option<Arc<dyn MemoryEvictor>>,
    ) -> MemoryRegistration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let usage_bytes = Arc::new(AtomicU64::new(0));

        lock(&self.inner.registrations).insert(
            id,
            RegistrationEntry {
                name: name.clone(),
                category,
                usage_bytes: usage_bytes.clone(),
                evictor,
            },
        );

        MemoryRegistration {
            id,
            name,
            category,
            usage_bytes,
            manager: Arc::downgrade(&self.inner),
        }
    }

    pub fn registration_count(&self) -> usize {
        lock(&self.inner.registrations).len()
    }

    /// Current memory pressure level (no eviction).
    pub fn pressure(&self) -> MemoryPressure {
        self.pressure_for_total(self.usage_breakdown().total())
    }

    /// Snapshot of current memory state (no eviction).
    pub fn report(&self) -> MemoryReport {
        let usage = self.usage_breakdown();
        MemoryReport {
            budget: self.inner.budget,
            usage,
            pressure: self.pressure_for_total(usage.total()),
        }
    }

    /// Per-component usage, largest first.
    pub fn components(&self) -> Vec<ComponentUsage> {
        let mut components: Vec<ComponentUsage> = lock(&self.inner.registrations)
            .values()
            .map(|entry| ComponentUsage {
                name: entry.name.clone(),
                category: entry.category,
                bytes: entry.usage_bytes.load(Ordering::Relaxed),
            })
            .collect();
        components.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.name.cmp(&b.name)));
        components
    }

    /// Recompute pressure and attempt eviction if needed.
    ///
    /// This function is deterministic and synchronous; callers can drive it from
    /// a timer, after large commits, or before starting a rebuild.
    pub fn enforce(&self) -> MemoryReport {
        let before_pressure = self.pressure();

        // Under high pressure, ask evictors to persist dirty state first so the
        // eviction pass below can actually release it.
        if before_pressure.flushes_first() {
            self.flush_to_disk_best_effort();
        }

        let ratio = before_pressure.eviction_target_ratio();
        self.evict_to_ratio(before_pressure, ratio);

        let after_report = self.report();
        self.maybe_emit_event(after_report.clone());
        after_report
    }

    /// Signal that the runtime is low on memory regardless of tracked usage.
    ///
    /// Every evictor is asked to flush and then drop everything it can.
    pub fn notify_low_memory(&self) -> MemoryReport {
        tracing::debug!(target = "nova.memory", "low memory notification");
        self.flush_to_disk_best_effort();
        for (_category, _usage, evictor) in self.collect_evictor_entries() {
            let result = evictor.evict(EvictionRequest {
                pressure: MemoryPressure::Critical,
                target_bytes: 0,
            });
            tracing::debug!(
                target = "nova.memory",
                component = evictor.name(),
                freed_bytes = result.freed_bytes(),
                "evicted under low memory"
            );
        }

        let report = self.report();
        self.maybe_emit_event(report.clone());
        report
    }

    fn flush_to_disk_best_effort(&self) {
        for (_category, _usage, evictor) in self.collect_evictor_entries() {
            if let Err(err) = evictor.flush_to_disk() {
                tracing::warn!(
                    target = "nova.memory",
                    component = evictor.name(),
                    error = %err,
                    "failed to flush component before eviction"
                );
            }
        }
    }

    fn evict_to_ratio(&self, pressure: MemoryPressure, ratio: f64) {
        let mut target = self.inner.budget.categories;
        for category in MemoryBreakdown::categories() {
            let bytes = target.get(category);
            target.set(category, ((bytes as f64) * ratio).round() as u64);
        }

        // Snapshot registrations so we don't hold the lock while calling out into
        // evictors.
        let entries = self.collect_evictor_entries();

        // A few passes give evictors a chance to converge without risking long
        // stalls.
        for _round in 0..3 {
            let usage = self.usage_breakdown();
            if within_targets(usage, target) {
                break;
            }
            evict_once(pressure, usage, target, &entries);
        }
    }

    fn collect_evictor_entries(&self) -> Vec<EvictorEntry> {
        lock(&self.inner.registrations)
            .values()
            .filter_map(|entry| {
                entry.evictor.as_ref().map(|evictor| {
                    (entry.category, entry.usage_bytes.clone(), evictor.clone())
                })
            })
            .collect()
    }

    fn maybe_emit_event(&self, report: MemoryReport) {
        let previous_pressure = {
            let mut pressure = lock(&self.inner.pressure);
            if *pressure == report.pressure {
                return;
            }
            std::mem::replace(&mut *pressure, report.pressure)
        };

        let listeners = lock(&self.inner.listeners).clone();
        let event = MemoryEvent {
            previous_pressure,
            pressure: report.pressure,
            report,
        };
        for listener in listeners {
            listener(event.clone());
        }
    }

    fn pressure_for_total(&self, usage_total: u64) -> MemoryPressure {
        self.inner
            .thresholds
            .level_for(usage_total, self.inner.budget.total)
    }

    fn usage_breakdown(&self) -> MemoryBreakdown {
        let registrations = lock(&self.inner.registrations);
        let mut breakdown = MemoryBreakdown::default();
        for entry in registrations.values() {
            let bytes = entry.usage_bytes.load(Ordering::Relaxed);
            let prev = breakdown.get(entry.category);
            breakdown.set(entry.category, prev.saturating_add(bytes));
        }
        breakdown
    }
}

fn within_targets(usage: MemoryBreakdown, target: MemoryBreakdown) -> bool {
    MemoryBreakdown::categories()
        .into_iter()
        .all(|category| usage.get(category) <= target.get(category))
}

fn evict_once(
    pressure: MemoryPressure,
    usage: MemoryBreakdown,
    target: MemoryBreakdown,
    entries: &[EvictorEntry],
) {
    for category in MemoryBreakdown::categories() {
        let category_usage = usage.get(category);
        let category_target = target.get(category);
        if category_usage <= category_target {
            continue;
        }

        let candidates: Vec<(u64, &Arc<dyn MemoryEvictor>)> = entries
            .iter()
            .filter(|(entry_category, _, _)| *entry_category == category)
            .map(|(_, usage, evictor)| (usage.load(Ordering::Relaxed), evictor))
            .collect();
        let evictable_usage: u64 = candidates.iter().map(|(bytes, _)| *bytes).sum();
        if evictable_usage == 0 {
            continue;
        }

        // Trackers without an evictor count against the category but cannot
        // shrink; only the evictable share is redistributed.
        let non_evictable = category_usage.saturating_sub(evictable_usage);
        let evictable_target = category_target.saturating_sub(non_evictable);

        for (component_usage, evictor) in candidates {
            let numer = (component_usage as u128) * (evictable_target as u128);
            let component_target = (numer / evictable_usage.max(1) as u128) as u64;
            let _ = evictor.evict(EvictionRequest {
                pressure,
                target_bytes: component_target,
            });
        }
    }
}

#[track_caller]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(err) => {
            let loc = std::panic::Location::caller();
            tracing::error!(
                target = "nova.memory",
                file = loc.file(),
                line = loc.line(),
                "mutex poisoned; continuing with recovered guard"
            );
            err.into_inner()
        }
    }
}

/// Handle kept by the registering component; dropping it unregisters the
/// component and removes its contribution from memory accounting.
pub struct MemoryRegistration {
    id: u64,
    name: String,
    category: MemoryCategory,
    usage_bytes: Arc<AtomicU64>,
    manager: Weak<Inner>,
}

impl MemoryRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> MemoryCategory {
        self.category
    }

    pub fn tracker(&self) -> MemoryTracker {
        MemoryTracker {
            usage_bytes: self.usage_bytes.clone(),
        }
    }
}

impl std::fmt::Debug for MemoryRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("usage_bytes", &self.usage_bytes.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for MemoryRegistration {
    fn drop(&mut self) {
        self.usage_bytes.store(0, Ordering::Relaxed);
        if let Some(manager) = self.manager.upgrade() {
            lock(&manager.registrations).remove(&self.id);
        }
    }
}

/// Lightweight per-component memory accounting handle.
#[derive(Clone)]
pub struct MemoryTracker {
    usage_bytes: Arc<AtomicU64>,
}

impl MemoryTracker {
    pub fn set_bytes(&self, bytes: u64) {
        self.usage_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.usage_bytes.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MemoryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTracker")
            .field("bytes", &self.bytes())
            .finish()
    }
}
