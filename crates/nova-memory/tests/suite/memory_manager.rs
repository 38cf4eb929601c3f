use nova_memory::{
    EvictionRequest, EvictionResult, MemoryBudget, MemoryCategory, MemoryEvent, MemoryEvictor,
    MemoryManager, MemoryPressure,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

struct TestEvictor {
    name: String,
    category: MemoryCategory,
    bytes: Mutex<u64>,
    flushes: AtomicUsize,
    registration: OnceLock<nova_memory::MemoryRegistration>,
    tracker: OnceLock<nova_memory::MemoryTracker>,
}

impl TestEvictor {
    fn new(manager: &MemoryManager, name: &str, category: MemoryCategory) -> Arc<Self> {
        let evictor = Arc::new(Self {
            name: name.to_string(),
            category,
            bytes: Mutex::new(0),
            flushes: AtomicUsize::new(0),
            registration: OnceLock::new(),
            tracker: OnceLock::new(),
        });

        let registration = manager.register_evictor(name.to_string(), category, evictor.clone());
        evictor
            .tracker
            .set(registration.tracker())
            .unwrap_or_else(|_| panic!("tracker only set once"));
        evictor
            .registration
            .set(registration)
            .unwrap_or_else(|_| panic!("registration only set once"));

        evictor
    }

    fn set_bytes(&self, bytes: u64) {
        *self.bytes.lock().unwrap() = bytes;
        self.tracker.get().unwrap().set_bytes(bytes);
    }

    fn add_bytes(&self, delta: u64) {
        let mut bytes = self.bytes.lock().unwrap();
        *bytes = bytes.saturating_add(delta);
        self.tracker.get().unwrap().set_bytes(*bytes);
    }

    fn bytes(&self) -> u64 {
        *self.bytes.lock().unwrap()
    }
}

impl MemoryEvictor for TestEvictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> MemoryCategory {
        self.category
    }

    fn evict(&self, request: EvictionRequest) -> EvictionResult {
        let mut bytes = self.bytes.lock().unwrap();
        let before = *bytes;
        let after = before.min(request.target_bytes);
        *bytes = after;
        self.tracker.get().unwrap().set_bytes(after);
        EvictionResult {
            before_bytes: before,
            after_bytes: after,
        }
    }

    fn flush_to_disk(&self) -> std::io::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn evicts_over_category_budget_even_under_low_pressure() {
    let budget = MemoryBudget::from_total(1_000);
    let manager = MemoryManager::new(budget);

    let shards = TestEvictor::new(&manager, "forward", MemoryCategory::ForwardIndex);
    shards.set_bytes(400);

    assert_eq!(manager.pressure(), MemoryPressure::Low);

    let report = manager.enforce();
    assert_eq!(shards.bytes(), budget.categories.forward_index);
    assert_eq!(report.pressure, MemoryPressure::Low);
}

#[test]
fn pressure_event_when_non_evictable_memory_dominates() {
    let budget = MemoryBudget::from_total(1_000);
    let manager = MemoryManager::new(budget);

    let events: Arc<Mutex<Vec<MemoryEvent>>> = Arc::new(Mutex::new(Vec::new()));
    manager.subscribe({
        let events = events.clone();
        Arc::new(move |event: MemoryEvent| {
            events.lock().unwrap().push(event);
        })
    });

    let other = manager.register_tracker("other", MemoryCategory::Other);
    other.tracker().set_bytes(900);

    let shards = TestEvictor::new(&manager, "inverted", MemoryCategory::InvertedIndex);
    shards.set_bytes(200);

    let report = manager.enforce();

    // Critical pressure forces aggressive eviction of evictable components.
    assert_eq!(shards.bytes(), 0);
    assert_eq!(shards.flushes.load(Ordering::SeqCst), 1);

    assert_eq!(report.pressure, MemoryPressure::High);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous_pressure, MemoryPressure::Low);
    assert_eq!(events[0].pressure, report.pressure);
    assert_eq!(events[0].report, report);
}

#[test]
fn medium_pressure_scales_targets() {
    let budget = MemoryBudget::from_total(1_000);
    let manager = MemoryManager::new(budget);

    let inverted = TestEvictor::new(&manager, "inverted", MemoryCategory::InvertedIndex);
    let forward = TestEvictor::new(&manager, "forward", MemoryCategory::ForwardIndex);
    inverted.set_bytes(600);
    forward.set_bytes(200);

    // 800/1000 is medium pressure for default thresholds.
    let report = manager.enforce();

    assert_eq!(inverted.bytes(), 420);
    assert_eq!(forward.bytes(), 175);
    assert_eq!(report.pressure, MemoryPressure::Low);
}

#[test]
fn synthetic_growth_is_bounded_by_budget() {
    let budget = MemoryBudget::from_total(1_000);
    let manager = MemoryManager::new(budget);

    let shards = TestEvictor::new(&manager, "inverted", MemoryCategory::InvertedIndex);

    for _ in 0..50 {
        shards.add_bytes(50);
        manager.enforce();
        assert!(shards.bytes() <= budget.categories.inverted_index);
    }
}

#[test]
fn low_memory_notification_flushes_then_drops_everything() {
    let manager = MemoryManager::new(MemoryBudget::from_total(1_000_000));

    let inverted = TestEvictor::new(&manager, "inverted", MemoryCategory::InvertedIndex);
    let forward = TestEvictor::new(&manager, "forward", MemoryCategory::ForwardIndex);
    inverted.set_bytes(10);
    forward.set_bytes(20);

    let report = manager.notify_low_memory();

    assert_eq!(inverted.flushes.load(Ordering::SeqCst), 1);
    assert_eq!(forward.flushes.load(Ordering::SeqCst), 1);
    assert_eq!(inverted.bytes(), 0);
    assert_eq!(forward.bytes(), 0);
    assert_eq!(report.usage_total_bytes(), 0);
}

#[test]
fn dropping_registration_unregisters_component() {
    let manager = MemoryManager::new(MemoryBudget::from_total(1_000));

    let registration = manager.register_tracker("tracked", MemoryCategory::Other);
    registration.tracker().set_bytes(123);
    assert_eq!(manager.registration_count(), 1);
    assert_eq!(manager.report().usage.other, 123);

    let components = manager.components();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0].name, "tracked");

    drop(registration);
    assert_eq!(manager.registration_count(), 0);
    assert_eq!(manager.report().usage_total_bytes(), 0);
}

#[test]
fn report_serializes_with_snake_case_categories() {
    let manager = MemoryManager::new(MemoryBudget::from_total(1_000));
    let json = serde_json::to_value(manager.report()).unwrap();
    assert_eq!(json["pressure"], "low");
    assert!(json["usage"].get("inverted_index").is_some());
}
