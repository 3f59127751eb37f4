//! Backup rotation and crash repair: ring bound, compaction, repair from
//! the newest valid backup, the minimal fallback, stale temp files and the
//! crash-detection window.

mod common;

use common::Harness;
use idlesave_core::{
    config::ProducerCatalog,
    event::SaveEvent,
    store::recovery::CrashCheck,
};
use std::path::PathBuf;

fn backup_dirs(h: &Harness, slot: &str) -> Vec<PathBuf> {
    let root = h.slot_dir(slot).join("backup");
    let mut dirs: Vec<PathBuf> = match std::fs::read_dir(&root) {
        Ok(entries) => entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect(),
        Err(_) => Vec::new(),
    };
    dirs.sort();
    dirs
}

async fn save_coins(h: &Harness, slot: &str, coins: f64) {
    h.set("coins", coins);
    h.manager.save_slot(slot).await.unwrap();
    h.settle();
}

#[tokio::test]
async fn ring_holds_exactly_max_backups() {
    let h = Harness::with(|c| c.max_backups = 3, ProducerCatalog::default());
    for coins in 1..=4 {
        save_coins(&h, "s1", coins as f64).await;
    }
    let dirs = backup_dirs(&h, "s1");
    let names: Vec<String> = dirs
        .iter()
        .map(|d| d.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, ["backup_1", "backup_2", "backup_3"]);

    // Another save keeps the bound.
    save_coins(&h, "s1", 5.0).await;
    assert_eq!(backup_dirs(&h, "s1").len(), 3);
}

#[tokio::test]
async fn newest_backup_is_the_previous_save() {
    let h = Harness::with(|c| c.max_backups = 2, ProducerCatalog::default());
    save_coins(&h, "s1", 1.0).await;
    save_coins(&h, "s1", 2.0).await;
    save_coins(&h, "s1", 3.0).await;

    // Destroy the primary; repair must pick backup_1, i.e. the save of 2 coins.
    std::fs::write(h.slot_dir("s1").join("meta.sav"), b"").unwrap();
    let (fresh, ledger) = h.reopen();
    let report = fresh.load_slot("s1").await.unwrap();
    assert_eq!(report.recovery.state, CrashCheck::Repaired { generation: 1 });
    assert_eq!(ledger.lock().unwrap().get("coins"), 2.0);
}

#[tokio::test]
async fn first_save_creates_no_backup() {
    let h = Harness::new();
    save_coins(&h, "s1", 1.0).await;
    assert!(backup_dirs(&h, "s1").is_empty());
}

#[tokio::test]
async fn compaction_keeps_only_the_newest() {
    let h = Harness::with(|c| c.max_backups = 4, ProducerCatalog::default());
    for coins in 1..=5 {
        save_coins(&h, "s1", coins as f64).await;
    }
    assert_eq!(backup_dirs(&h, "s1").len(), 4);
    let removed = h.manager.compact_backups("s1").await.unwrap();
    assert_eq!(removed, 3);
    let dirs = backup_dirs(&h, "s1");
    assert_eq!(dirs.len(), 1);
    assert!(dirs[0].ends_with("backup_1"));
}

#[tokio::test]
async fn corrupt_newest_backup_is_skipped() {
    let h = Harness::with(|c| c.max_backups = 3, ProducerCatalog::default());
    save_coins(&h, "s1", 1.0).await;
    save_coins(&h, "s1", 2.0).await;
    save_coins(&h, "s1", 3.0).await;

    let slot = h.slot_dir("s1");
    std::fs::write(slot.join("backup/backup_1/world.sav"), b"torn").unwrap();
    std::fs::write(slot.join("meta.sav"), b"").unwrap();

    let (fresh, ledger) = h.reopen();
    let report = fresh.load_slot("s1").await.unwrap();
    assert_eq!(report.recovery.state, CrashCheck::Repaired { generation: 2 });
    assert_eq!(report.recovery.candidates_tried, 2);
    assert_eq!(ledger.lock().unwrap().get("coins"), 1.0);
    // Repair never deletes a candidate.
    assert!(slot.join("backup/backup_1/world.sav").exists());
}

#[tokio::test]
async fn unrepairable_slot_falls_back_to_minimal_save() {
    let h = Harness::new();
    save_coins(&h, "s1", 50.0).await;
    std::fs::write(h.slot_dir("s1").join("meta.sav"), b"\x00\x01").unwrap();

    let (fresh, ledger) = h.reopen();
    let report = fresh.load_slot("s1").await.unwrap();
    assert_eq!(report.recovery.state, CrashCheck::Unrepairable);
    assert!(report.restored);
    assert!(!report.metadata.is_corrupted);
    assert!(report.metadata.checksum.is_some());
    assert_eq!(ledger.lock().unwrap().get("coins"), 0.0);

    // The minimal save is itself a valid generation.
    h.settle();
    let again = h.reopen().0.load_slot("s1").await.unwrap();
    assert_eq!(again.recovery.state, CrashCheck::CheckedOk);
}

#[tokio::test]
async fn payload_digest_mismatch_triggers_repair() {
    let h = Harness::new();
    save_coins(&h, "s1", 1.0).await;
    save_coins(&h, "s1", 2.0).await;
    std::fs::write(h.slot_dir("s1").join("world.sav"), b"half written").unwrap();

    let (fresh, ledger) = h.reopen();
    let report = fresh.load_slot("s1").await.unwrap();
    assert!(report.recovery.corruption_found);
    assert_eq!(report.recovery.state, CrashCheck::Repaired { generation: 1 });
    assert_eq!(ledger.lock().unwrap().get("coins"), 1.0);
}

#[tokio::test]
async fn recent_save_is_validated_but_not_repaired() {
    let h = Harness::new();
    h.set("coins", 9.0);
    h.manager.save_slot("s1").await.unwrap();
    h.manager.save_slot("s1").await.unwrap();

    let (fresh, ledger) = h.reopen();
    let report = fresh.load_slot("s1").await.unwrap();
    assert!(report.recovery.suspicious);
    assert!(!report.recovery.corruption_found);
    assert_eq!(report.recovery.state, CrashCheck::CheckedOk);
    assert_eq!(ledger.lock().unwrap().get("coins"), 9.0);
}

#[tokio::test]
async fn stale_temp_files_are_removed_on_load() {
    let h = Harness::new();
    save_coins(&h, "s1", 4.0).await;
    let stale = h.slot_dir("s1").join(".world.sav.0123abcd.tmp");
    std::fs::write(&stale, b"partial").unwrap();

    let report = h.reopen().0.load_slot("s1").await.unwrap();
    assert_eq!(report.recovery.temp_files_cleaned, 1);
    assert!(report.recovery.suspicious);
    assert_eq!(report.recovery.state, CrashCheck::CheckedOk);
    assert!(!stale.exists());
}

#[tokio::test]
async fn backup_failure_does_not_abort_the_save() {
    let h = Harness::new();
    save_coins(&h, "s1", 1.0).await;
    // A plain file where the backup directory should be.
    std::fs::write(h.slot_dir("s1").join("backup"), b"in the way").unwrap();

    let mut events = h.manager.subscribe();
    h.set("coins", 2.0);
    let report = h.manager.save_slot("s1").await.unwrap();
    assert!(!report.backup_warnings.is_empty());

    let events = common::drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, SaveEvent::BackupWarning { .. })));
    assert!(events.iter().any(|e| matches!(e, SaveEvent::SaveCompleted { .. })));

    h.settle();
    let (fresh, ledger) = h.reopen();
    fresh.load_slot("s1").await.unwrap();
    assert_eq!(ledger.lock().unwrap().get("coins"), 2.0);
}
