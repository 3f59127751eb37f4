//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use idlesave_core::{
    clock::{Clock, ManualClock},
    config::{ProducerCatalog, SaveConfig},
    event::SaveEvent,
    ledger::ResourceLedger,
    manager::SaveManager,
    producer::ProducerDefinition,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::broadcast;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

pub fn mine(rate: f64, capacity: f64) -> ProducerDefinition {
    ProducerDefinition {
        id: "mine".into(),
        output_resource: "ore".into(),
        rate_per_sec: rate,
        capacity,
        passive: true,
        worker_count: 1,
        decay_rate: 0.0,
    }
}

/// One engine instance over a temp save root, on a manual clock.
pub struct Harness {
    pub dir:     TempDir,
    pub config:  SaveConfig,
    pub catalog: ProducerCatalog,
    pub clock:   Arc<ManualClock>,
    pub manager: SaveManager,
    pub ledger:  Arc<Mutex<ResourceLedger>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|_| {}, ProducerCatalog::default())
    }

    pub fn with(tweak: impl FnOnce(&mut SaveConfig), catalog: ProducerCatalog) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let mut config = SaveConfig::default_test(dir.path().join("saves"));
        tweak(&mut config);
        let clock = Arc::new(ManualClock::new(start_time()));
        let (manager, ledger) = engine(&config, &catalog, &clock);
        Self { dir, config, catalog, clock, manager, ledger }
    }

    /// A second, fresh engine over the same save root and clock.
    pub fn reopen(&self) -> (SaveManager, Arc<Mutex<ResourceLedger>>) {
        engine(&self.config, &self.catalog, &self.clock)
    }

    pub fn set(&self, resource: &str, amount: f64) {
        self.ledger.lock().unwrap().set(resource, amount);
    }

    pub fn get(&self, resource: &str) -> f64 {
        self.ledger.lock().unwrap().get(resource)
    }

    pub fn slot_dir(&self, slot: &str) -> std::path::PathBuf {
        self.config.root_folder.join(slot)
    }

    /// Move past the crash-detection window.
    pub fn settle(&self) {
        self.clock.advance_secs(self.config.crash_detection_window_secs as i64 + 60);
    }
}

pub fn engine(
    config: &SaveConfig,
    catalog: &ProducerCatalog,
    clock: &Arc<ManualClock>,
) -> (SaveManager, Arc<Mutex<ResourceLedger>>) {
    let clock: Arc<dyn Clock> = clock.clone();
    let manager = SaveManager::build(config.clone(), catalog, clock, None).expect("manager");
    let ledger = Arc::new(Mutex::new(ResourceLedger::new()));
    manager.register_provider(ledger.clone());
    manager.set_resource_sink(ledger.clone());
    (manager, ledger)
}

/// Everything already published, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<SaveEvent>) -> Vec<SaveEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
