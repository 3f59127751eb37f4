//! Producer simulation through the manager: capacity clamp, Δ=0
//! idempotence, persistence of producer state, and offline catch-up on load.

mod common;

use common::{mine, Harness};
use idlesave_core::{
    config::ProducerCatalog,
    event::SaveEvent,
    producer::ProducerDefinition,
    types::StateCategory,
};

fn catalog(defs: Vec<ProducerDefinition>) -> ProducerCatalog {
    ProducerCatalog::from_definitions(defs).unwrap()
}

#[tokio::test]
async fn capacity_clamp_credits_the_difference() {
    let h = Harness::with(|_| {}, catalog(vec![mine(10.0, 100.0)]));

    let first = h.manager.tick_producers(2.0);
    assert_eq!(first.get("ore"), Some(&20.0));

    let second = h.manager.tick_producers(1000.0);
    assert_eq!(second.get("ore"), Some(&80.0));
    assert_eq!(h.get("ore"), 100.0);
    h.manager.with_producers(|p| assert_eq!(p.state("mine").unwrap().current_output, 100.0));

    // Full: further ticks credit nothing.
    assert!(h.manager.tick_producers(50.0).is_empty());
    assert_eq!(h.get("ore"), 100.0);
}

#[tokio::test]
async fn zero_delta_changes_nothing() {
    let h = Harness::with(|_| {}, catalog(vec![mine(3.0, 1000.0)]));
    h.manager.tick_producers(7.0);
    let before = h.manager.with_producers(|p| p.state("mine").cloned().unwrap());

    assert!(h.manager.tick_producers(0.0).is_empty());
    let after = h.manager.with_producers(|p| p.state("mine").cloned().unwrap());
    assert_eq!(before, after);
}

#[tokio::test]
async fn ticking_marks_resources_and_world_dirty() {
    let h = Harness::with(|_| {}, catalog(vec![mine(1.0, 10.0)]));
    assert!(!h.manager.has_dirty_flags());
    h.manager.tick_producers(1.0);
    assert!(h.manager.is_dirty(StateCategory::Resources));
    assert!(h.manager.is_dirty(StateCategory::WorldState));
}

#[tokio::test]
async fn producer_state_persists_across_engines() {
    let h = Harness::with(
        |c| c.offline_catch_up = false,
        catalog(vec![mine(5.0, 100.0)]),
    );
    h.manager.tick_producers(4.0);
    assert!(h.manager.set_producer_workers("mine", 3));
    assert!(h.manager.set_producer_active("mine", false));
    h.manager.save_slot("s1").await.unwrap();

    let (fresh, ledger) = h.reopen();
    fresh.load_slot("s1").await.unwrap();
    let state = fresh.with_producers(|p| p.state("mine").cloned().unwrap());
    assert_eq!(state.current_output, 20.0);
    assert_eq!(state.worker_count, 3);
    assert!(!state.is_active);
    assert_eq!(ledger.lock().unwrap().get("ore"), 20.0);
}

#[tokio::test]
async fn offline_gap_is_replayed_on_load() {
    let h = Harness::with(|_| {}, catalog(vec![mine(2.0, 1_000_000.0)]));
    h.manager.save_slot("s1").await.unwrap();
    h.clock.advance_secs(600);

    let (fresh, ledger) = h.reopen();
    let mut events = fresh.subscribe();
    let report = fresh.load_slot("s1").await.unwrap();

    let offline = report.offline.expect("offline report");
    assert_eq!(offline.gap_secs, 600.0);
    assert!(!offline.clamped);
    assert_eq!(offline.credits.get("ore"), Some(&1200.0));
    assert_eq!(ledger.lock().unwrap().get("ore"), 1200.0);
    assert!(fresh.is_dirty(StateCategory::Resources));
    assert!(common::drain(&mut events)
        .iter()
        .any(|e| matches!(e, SaveEvent::OfflineProgressApplied { .. })));
}

#[tokio::test]
async fn offline_gap_is_clamped_to_the_maximum() {
    let h = Harness::with(
        |c| c.max_offline_secs = 3600,
        catalog(vec![mine(1.0, 1_000_000.0)]),
    );
    h.manager.save_slot("s1").await.unwrap();
    h.clock.advance_secs(3 * 3600);

    let (fresh, ledger) = h.reopen();
    let offline = fresh.load_slot("s1").await.unwrap().offline.unwrap();
    assert_eq!(offline.applied_secs, 3600.0);
    assert!(offline.clamped);
    assert_eq!(ledger.lock().unwrap().get("ore"), 3600.0);
}

#[tokio::test]
async fn catch_up_can_be_disabled() {
    let h = Harness::with(
        |c| c.offline_catch_up = false,
        catalog(vec![mine(1.0, 1_000.0)]),
    );
    h.manager.save_slot("s1").await.unwrap();
    h.clock.advance_secs(500);

    let (fresh, ledger) = h.reopen();
    let report = fresh.load_slot("s1").await.unwrap();
    assert!(report.offline.is_none());
    assert_eq!(ledger.lock().unwrap().get("ore"), 0.0);
    assert!(!fresh.has_dirty_flags());
}

#[test]
fn catalog_loads_from_json() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("producers.json");
    std::fs::write(
        &path,
        r#"{ "producers": [
            { "id": "farm", "output_resource": "food", "rate_per_sec": 0.5, "capacity": 50 },
            { "id": "mill", "output_resource": "flour", "rate_per_sec": 1, "capacity": 10,
              "passive": true, "decay_rate": 0.01 }
        ] }"#,
    )
    .unwrap();
    let catalog = ProducerCatalog::load(&path).unwrap();
    assert_eq!(catalog.definitions.len(), 2);
    assert_eq!(catalog.definitions[0].worker_count, 1);
    assert!(catalog.definitions[1].passive);
}
