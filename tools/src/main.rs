//! save-runner: headless driver for the idlesave engine.
//!
//! Usage:
//!   save-runner --root ./saves --slot s1 --ticks 30
//!   save-runner --root ./saves --slot s1 --offline-secs 3600
//!   save-runner --root ./saves --config save.json --catalog producers.json
//!   save-runner --root ./saves --list
//!   save-runner --root ./saves --slot s1 --delete

use anyhow::{Context, Result};
use chrono::Utc;
use idlesave_core::{
    clock::{Clock, ManualClock},
    config::{ProducerCatalog, SaveConfig},
    ledger::ResourceLedger,
    manager::SaveManager,
    producer::ProducerDefinition,
    types::StateCategory,
};
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ticks = parse_arg(&args, "--ticks", 10u64);
    let offline_secs = parse_arg(&args, "--offline-secs", 0i64);
    let list_only = args.iter().any(|a| a == "--list");
    let delete = args.iter().any(|a| a == "--delete");
    let slot = string_arg(&args, "--slot");

    let mut config = match string_arg(&args, "--config") {
        Some(path) => SaveConfig::load(&path)?,
        None => SaveConfig::default(),
    };
    if let Some(root) = string_arg(&args, "--root") {
        config.root_folder = PathBuf::from(root);
    }
    // A headless run has no frame loop to debounce against.
    config.instant_save.enabled = false;
    let slot = slot.unwrap_or_else(|| config.default_slot.clone());

    let catalog = match string_arg(&args, "--catalog") {
        Some(path) => ProducerCatalog::load(&path)?,
        None => demo_catalog()?,
    };

    println!("idlesave save-runner");
    println!("  root:      {}", config.root_folder.display());
    println!("  slot:      {slot}");
    println!("  producers: {}", catalog.definitions.len());
    println!();

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (manager, ledger) = build_manager(config.clone(), &catalog, clock.clone())?;

    if list_only {
        print_summaries(&manager).await?;
        return Ok(());
    }
    if delete {
        manager.delete_slot(&slot).await.with_context(|| format!("deleting '{slot}'"))?;
        println!("Deleted slot '{slot}'.");
        return Ok(());
    }

    let exists = manager
        .get_save_summaries()
        .await?
        .iter()
        .any(|s| s.slot_id == slot);
    if exists {
        let report = manager.load_slot(&slot).await?;
        println!(
            "Loaded '{slot}': crash check {:?}, corrupted={}, play time {:.0}s",
            report.recovery.state, report.metadata.is_corrupted, report.metadata.play_time_secs
        );
    } else {
        println!("Slot '{slot}' does not exist yet; starting fresh.");
        manager.mark_dirty(StateCategory::Resources);
    }

    for _ in 0..ticks {
        clock.advance_secs(1);
        manager.tick_producers(1.0);
    }
    let report = manager.save_slot(&slot).await?;
    println!(
        "Saved '{slot}' after {ticks} tick(s); {} backup warning(s)",
        report.backup_warnings.len()
    );
    print_ledger(&ledger);

    if offline_secs > 0 {
        clock.advance_secs(offline_secs);
        println!();
        println!("Simulating {offline_secs}s offline, reloading with a fresh engine...");
        let (reloaded, reloaded_ledger) = build_manager(config, &catalog, clock.clone())?;
        let report = reloaded.load_slot(&slot).await?;
        if let Some(offline) = &report.offline {
            println!(
                "  applied {:.0}s of {:.0}s (clamped={})",
                offline.applied_secs, offline.gap_secs, offline.clamped
            );
        }
        print_ledger(&reloaded_ledger);
        reloaded.save_slot(&slot).await?;
    }

    println!();
    print_summaries(&manager).await
}

fn build_manager(
    config: SaveConfig,
    catalog: &ProducerCatalog,
    clock: Arc<ManualClock>,
) -> Result<(SaveManager, Arc<Mutex<ResourceLedger>>)> {
    let clock: Arc<dyn Clock> = clock;
    let manager = SaveManager::build(config, catalog, clock, None)?;
    let ledger = Arc::new(Mutex::new(ResourceLedger::new()));
    manager.register_provider(ledger.clone());
    manager.set_resource_sink(ledger.clone());
    Ok((manager, ledger))
}

fn demo_catalog() -> Result<ProducerCatalog> {
    let definitions = vec![
        ProducerDefinition {
            id: "gold_mine".into(),
            output_resource: "gold".into(),
            rate_per_sec: 2.0,
            capacity: 500.0,
            passive: true,
            worker_count: 1,
            decay_rate: 0.0,
        },
        ProducerDefinition {
            id: "lumber_camp".into(),
            output_resource: "wood".into(),
            rate_per_sec: 0.5,
            capacity: 200.0,
            passive: false,
            worker_count: 3,
            decay_rate: 0.0001,
        },
    ];
    ProducerCatalog::from_definitions(definitions)
}

fn print_ledger(ledger: &Mutex<ResourceLedger>) {
    let ledger = match ledger.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    for (resource, amount) in ledger.amounts() {
        println!("  {resource:<12} {amount:>12.2}");
    }
}

async fn print_summaries(manager: &SaveManager) -> Result<()> {
    let summaries = manager.get_save_summaries().await?;
    println!("{} slot(s):", summaries.len());
    for summary in &summaries {
        println!("{}", serde_json::to_string_pretty(summary)?);
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}
