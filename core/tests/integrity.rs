//! Corruption detection: edited metadata, flipped payload bytes, wrong
//! keys, and slot listings that tolerate a broken slot.

mod common;

use common::Harness;
use idlesave_core::{
    config::{KeySource, ProducerCatalog},
    event::SaveEvent,
    store::recovery::CrashCheck,
    types::StateCategory,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

fn no_repair() -> Harness {
    Harness::with(|c| c.auto_repair = false, ProducerCatalog::default())
}

fn replace_once(haystack: &[u8], needle: &[u8], with: &[u8]) -> Vec<u8> {
    let at = haystack
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("needle present");
    let mut out = haystack[..at].to_vec();
    out.extend_from_slice(with);
    out.extend_from_slice(&haystack[at + needle.len()..]);
    out
}

#[tokio::test]
async fn edited_metadata_is_flagged_corrupted() {
    let h = no_repair();
    h.set("coins", 100.0);
    h.manager.save_slot("s1").await.unwrap();
    h.settle();

    let meta = h.slot_dir("s1").join("meta.sav");
    let bytes = std::fs::read(&meta).unwrap();
    std::fs::write(&meta, replace_once(&bytes, b"100.0", b"999.0")).unwrap();

    let (fresh, ledger) = h.reopen();
    let mut events = fresh.subscribe();
    let report = fresh.load_slot("s1").await.unwrap();

    assert!(report.metadata.is_corrupted);
    assert!(!report.restored);
    assert!(report.recovery.corruption_found);
    assert_eq!(report.recovery.state, CrashCheck::CheckedSuspicious);
    assert_eq!(ledger.lock().unwrap().get("coins"), 0.0, "corrupted data must not reach providers");
    assert!(common::drain(&mut events)
        .iter()
        .any(|e| matches!(e, SaveEvent::LoadCompleted { corrupted: true, .. })));
}

/// Any single flipped byte in a compressed payload is caught by its digest.
#[tokio::test]
async fn flipped_payload_bytes_are_detected() {
    for seed in 0..8u64 {
        let h = Harness::with(
            |c| {
                c.auto_repair = false;
                c.compression = true;
            },
            ProducerCatalog::default(),
        );
        h.set("coins", 100.0);
        h.set("wood", 12.0);
        h.manager.save_slot("s1").await.unwrap();
        h.settle();

        let world = h.slot_dir("s1").join("world.sav");
        let mut bytes = std::fs::read(&world).unwrap();
        let mut rng = Pcg64::seed_from_u64(seed);
        let at = rng.gen_range(0..bytes.len());
        bytes[at] ^= 0xFF;
        std::fs::write(&world, &bytes).unwrap();

        let report = h.reopen().0.load_slot("s1").await.unwrap();
        assert!(report.metadata.is_corrupted, "seed {seed}: flip at {at} went unnoticed");
        assert!(!report.restored);
    }
}

#[tokio::test]
async fn wrong_password_reads_as_corrupted() {
    let h = Harness::with(
        |c| {
            c.auto_repair = false;
            c.encryption.enabled = true;
            c.encryption.key_source = KeySource::Password;
            c.encryption.password = Some("right".into());
        },
        ProducerCatalog::default(),
    );
    h.set("coins", 5.0);
    h.manager.save_slot("s1").await.unwrap();
    h.settle();

    let mut config = h.config.clone();
    config.encryption.password = Some("wrong".into());
    let (intruder, ledger) = common::engine(&config, &h.catalog, &h.clock);
    let report = intruder.load_slot("s1").await.unwrap();
    assert!(report.metadata.is_corrupted);
    assert_eq!(ledger.lock().unwrap().get("coins"), 0.0);

    // The slot itself is untouched and still opens with the right key.
    let report = h.reopen().0.load_slot("s1").await.unwrap();
    assert!(!report.metadata.is_corrupted);
}

#[tokio::test]
async fn summaries_list_a_corrupted_slot_as_placeholder() {
    let h = Harness::new();
    h.set("coins", 100.0);
    h.set("gems", 7.0);
    h.manager.mark_dirty(StateCategory::Resources);
    h.manager.save_slot("good").await.unwrap();
    h.clock.advance_secs(10);
    h.manager.save_slot("bad").await.unwrap();
    std::fs::write(h.slot_dir("bad").join("meta.sav"), b"garbage").unwrap();

    let summaries = h.manager.get_save_summaries().await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].slot_id, "good");
    assert!(!summaries[0].is_corrupted);
    assert_eq!(summaries[0].top_resources[0].id, "coins");
    assert_eq!(summaries[1].slot_id, "bad");
    assert!(summaries[1].is_corrupted);
}

#[tokio::test]
async fn summaries_are_newest_first() {
    let h = Harness::new();
    for slot in ["a", "b", "c"] {
        h.manager.save_slot(slot).await.unwrap();
        h.clock.advance_secs(5);
    }
    let order: Vec<String> = h
        .manager
        .get_save_summaries()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.slot_id)
        .collect();
    assert_eq!(order, ["c", "b", "a"]);
}
