//! The save manager: the one façade collaborators talk to.
//!
//! RULES:
//!   - At most one save and one load per slot are in flight. A second
//!     `save_slot`/`load_slot` is rejected with `SaveError::Busy`, never
//!     queued. `force_save` is the only caller that waits.
//!   - Providers are captured on the calling task before any file I/O
//!     starts and restored only after a load has fully validated.
//!   - All file I/O runs on the blocking pool, off the caller's task.
//!   - Disk work on one slot holds that slot's I/O lock. A load running
//!     beside a save never sees a half-written generation and never
//!     sweeps the save's temp files.
//!   - A save or load, once started, runs to completion on its own task.
//!     Dropping the caller's future does not release the slot early.
//!   - Dirty flags clear only after the metadata of the new generation
//!     is on disk. A failed save leaves them set.
//!   - Every save/load/delete ends in exactly one completion or failure
//!     event (busy rejections are logged, not published).

use crate::{
    clock::{elapsed_secs, Clock, SystemClock},
    codec::Codec,
    config::{ProducerCatalog, SaveConfig},
    crypto::{KeyMaterial, SecretStore},
    dirty::DirtyTracker,
    error::{SaveError, SaveResult},
    event::{event_type_name, SaveEvent},
    metadata::{SaveMetadata, SaveSummary, SceneSummary},
    payload::WorldPayload,
    producer::{OfflineReport, ProducerSimulator},
    provider::{SharedProvider, SharedSink},
    snapshot::GameSnapshot,
    store::{
        backup::BackupManager,
        layout::SlotLayout,
        recovery::{CrashCheck, CrashDetector, RecoveryReport},
        Generation, SlotStore,
    },
    types::{validate_slot_id, ResourceId, SlotId, StateCategory},
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const EVENT_CAPACITY: usize = 256;

/// Host lifecycle moments the embedding application forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleHook {
    Pause,
    FocusLost,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub slot_id:         SlotId,
    /// The metadata as committed, checksum included.
    pub metadata:        SaveMetadata,
    pub backup_warnings: Vec<String>,
    pub forced:          bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub slot_id:  SlotId,
    pub metadata: SaveMetadata,
    pub recovery: RecoveryReport,
    /// False when the slot was corrupted and repair was disabled; providers
    /// were left untouched in that case.
    pub restored: bool,
    pub offline:  Option<OfflineReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Save,
    Load,
}

impl Op {
    fn name(self) -> &'static str {
        match self {
            Op::Save => "save",
            Op::Load => "load",
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    saves: HashSet<SlotId>,
    loads: HashSet<SlotId>,
}

impl InFlight {
    fn set_mut(&mut self, op: Op) -> &mut HashSet<SlotId> {
        match op {
            Op::Save => &mut self.saves,
            Op::Load => &mut self.loads,
        }
    }
}

#[derive(Debug)]
struct Session {
    active_slot:    Option<SlotId>,
    /// Play time restored by the last load.
    base_play_time: f64,
    session_start:  DateTime<Utc>,
}

struct Shared {
    config:      SaveConfig,
    store:       SlotStore,
    backups:     BackupManager,
    clock:       Arc<dyn Clock>,
    providers:   Mutex<Vec<SharedProvider>>,
    sink:        Mutex<Option<SharedSink>>,
    producers:   Mutex<ProducerSimulator>,
    dirty:       Mutex<DirtyTracker>,
    in_flight:   Mutex<InFlight>,
    slot_io:     Mutex<HashMap<SlotId, Arc<Mutex<()>>>>,
    save_done:   Notify,
    session:     Mutex<Session>,
    instant_seq: AtomicU64,
    events:      broadcast::Sender<SaveEvent>,
}

impl Shared {
    /// The lock serializing disk work on `slot_id`.
    fn slot_io(&self, slot_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(lock(&self.slot_io).entry(slot_id.to_string()).or_default())
    }
}

/// Poisoning only means a provider panicked mid-call; the data is still usable.
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases an in-flight slot when dropped, including on error paths.
struct InFlightGuard {
    shared:  Arc<Shared>,
    slot_id: SlotId,
    op:      Op,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.shared.in_flight).set_mut(self.op).remove(&self.slot_id);
        if self.op == Op::Save {
            self.shared.save_done.notify_waiters();
        }
    }
}

/// Cheap to clone; every clone drives the same engine.
#[derive(Clone)]
pub struct SaveManager {
    shared: Arc<Shared>,
}

impl SaveManager {
    /// Build a manager on the system clock with no secure key store.
    pub fn new(config: SaveConfig, catalog: &ProducerCatalog) -> SaveResult<Self> {
        Self::build(config, catalog, Arc::new(SystemClock), None)
    }

    pub fn build(
        config: SaveConfig,
        catalog: &ProducerCatalog,
        clock: Arc<dyn Clock>,
        secrets: Option<Arc<dyn SecretStore>>,
    ) -> SaveResult<Self> {
        config.validate()?;
        let key = KeyMaterial::from_config(&config.encryption, secrets.as_ref())?;
        let codec = Codec::new(config.compression, key);
        let layout = SlotLayout::new(config.root_folder.clone());
        let store = SlotStore::new(layout.clone(), codec, config.payload_mode);
        let backups = BackupManager::new(layout, config.max_backups);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let now = clock.now();

        log::info!(
            "save manager ready: root={} compression={} encryption={} backups={}",
            config.root_folder.display(),
            config.compression,
            config.encryption.enabled,
            config.max_backups
        );

        Ok(Self {
            shared: Arc::new(Shared {
                store,
                backups,
                clock,
                providers:   Mutex::new(Vec::new()),
                sink:        Mutex::new(None),
                producers:   Mutex::new(ProducerSimulator::new(catalog)),
                dirty:       Mutex::new(DirtyTracker::new()),
                in_flight:   Mutex::new(InFlight::default()),
                slot_io:     Mutex::new(HashMap::new()),
                save_done:   Notify::new(),
                session:     Mutex::new(Session {
                    active_slot:    None,
                    base_play_time: 0.0,
                    session_start:  now,
                }),
                instant_seq: AtomicU64::new(0),
                events,
                config,
            }),
        })
    }

    // ── Wiring ─────────────────────────────────────────────────────

    /// Register a provider. Providers are captured and restored in
    /// registration order.
    pub fn register_provider(&self, provider: SharedProvider) {
        let (name, category) = {
            let provider = lock(provider.as_ref());
            (provider.name(), provider.category())
        };
        log::debug!("registered state provider '{name}' ({})", category.name());
        lock(&self.shared.providers).push(provider);
    }

    /// Where producer output is credited.
    pub fn set_resource_sink(&self, sink: SharedSink) {
        *lock(&self.shared.sink) = Some(sink);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &SaveConfig { &self.shared.config }

    // ── Session ────────────────────────────────────────────────────

    /// The slot last loaded or saved, else the configured default.
    pub fn active_slot(&self) -> SlotId {
        lock(&self.shared.session)
            .active_slot
            .clone()
            .unwrap_or_else(|| self.shared.config.default_slot.clone())
    }

    /// Cumulative play time: restored play time plus this session's wall time.
    pub fn play_time_secs(&self) -> f64 {
        let session = lock(&self.shared.session);
        session.base_play_time + elapsed_secs(session.session_start, self.shared.clock.now())
    }

    pub fn is_saving(&self, slot_id: &str) -> bool {
        lock(&self.shared.in_flight).saves.contains(slot_id)
    }

    pub fn is_loading(&self, slot_id: &str) -> bool {
        lock(&self.shared.in_flight).loads.contains(slot_id)
    }

    // ── Dirty flags ────────────────────────────────────────────────

    /// Record a mutation. Resource and character changes also schedule a
    /// debounced instant save when one is configured.
    pub fn mark_dirty(&self, category: StateCategory) {
        let seq = lock(&self.shared.dirty).mark(category);
        log::debug!("dirty: {} (seq {seq})", category.name());
        let instant = &self.shared.config.instant_save;
        if instant.enabled && category.wants_instant_save() {
            self.schedule_instant_save(Duration::from_millis(instant.delay_ms));
        }
    }

    pub fn has_dirty_flags(&self) -> bool {
        lock(&self.shared.dirty).has_dirty_flags()
    }

    pub fn is_dirty(&self, category: StateCategory) -> bool {
        lock(&self.shared.dirty).is_dirty(category)
    }

    pub fn dirty_categories(&self) -> Vec<StateCategory> {
        lock(&self.shared.dirty).dirty_categories()
    }

    /// Each mark restarts the delay; only the last timer in a burst saves.
    fn schedule_instant_save(&self, delay: Duration) {
        let token = self.shared.instant_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!("no async runtime; instant save left to autosave");
            return;
        };
        let manager = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if manager.shared.instant_seq.load(Ordering::SeqCst) != token {
                return;
            }
            if !manager.has_dirty_flags() {
                return;
            }
            let slot_id = manager.active_slot();
            match manager.save_slot(&slot_id).await {
                Ok(_) => log::debug!("instant save of '{slot_id}' done"),
                Err(e) if e.is_busy() => log::debug!("instant save skipped: {e}"),
                Err(e) => log::warn!("instant save of '{slot_id}' failed: {e}"),
            }
        });
    }

    // ── Producers ──────────────────────────────────────────────────

    /// Foreground producer tick. Credits go to the resource sink and mark
    /// Resources and WorldState dirty; they are left to the autosave timer
    /// rather than scheduling instant saves.
    pub fn tick_producers(&self, elapsed_secs: f64) -> BTreeMap<ResourceId, f64> {
        let credits = lock(&self.shared.producers).tick(elapsed_secs);
        self.apply_credits(&credits);
        credits
    }

    pub fn set_producer_active(&self, producer_id: &str, active: bool) -> bool {
        let found = lock(&self.shared.producers).set_active(producer_id, active);
        if found {
            lock(&self.shared.dirty).mark(StateCategory::WorldState);
        }
        found
    }

    pub fn set_producer_workers(&self, producer_id: &str, workers: u32) -> bool {
        let found = lock(&self.shared.producers).set_workers(producer_id, workers);
        if found {
            lock(&self.shared.dirty).mark(StateCategory::WorldState);
        }
        found
    }

    /// Read access to the simulator, for display and tests.
    pub fn with_producers<R>(&self, f: impl FnOnce(&ProducerSimulator) -> R) -> R {
        f(&lock(&self.shared.producers))
    }

    fn apply_credits(&self, credits: &BTreeMap<ResourceId, f64>) {
        if credits.is_empty() {
            return;
        }
        match lock(&self.shared.sink).as_ref() {
            Some(sink) => {
                let mut sink = lock(sink.as_ref());
                for (resource, amount) in credits {
                    sink.credit(resource, *amount);
                }
            }
            None => log::warn!("producer output for {} resource(s) dropped: no sink", credits.len()),
        }
        let mut dirty = lock(&self.shared.dirty);
        dirty.mark(StateCategory::Resources);
        dirty.mark(StateCategory::WorldState);
    }

    // ── Save ───────────────────────────────────────────────────────

    /// Save the current state into `slot_id`. Rejected with `Busy` when a
    /// save of the same slot is already running.
    pub async fn save_slot(&self, slot_id: &str) -> SaveResult<SaveReport> {
        self.check_slot_id(slot_id, Op::Save)?;
        let guard = self.try_begin(slot_id, Op::Save)?;
        self.run_save(guard, false).await
    }

    /// Save even when nothing is dirty. Waits for an in-flight save of the
    /// same slot instead of failing, so quit hooks always get a save.
    pub async fn force_save(&self, slot_id: &str) -> SaveResult<SaveReport> {
        self.check_slot_id(slot_id, Op::Save)?;
        loop {
            let finished = self.shared.save_done.notified();
            match self.try_begin(slot_id, Op::Save) {
                Ok(guard) => return self.run_save(guard, true).await,
                Err(_) => {
                    log::debug!("force save of '{slot_id}' waiting for the running save");
                    finished.await;
                }
            }
        }
    }

    async fn run_save(&self, guard: InFlightGuard, forced: bool) -> SaveResult<SaveReport> {
        let slot_id = guard.slot_id.clone();
        let checkpoint = lock(&self.shared.dirty).checkpoint();
        let now = self.shared.clock.now();
        let generation = self.capture_generation(&slot_id, now);

        log::info!(
            "saving slot '{slot_id}' ({} scene(s), forced={forced})",
            generation.scenes.len()
        );

        let manager = self.clone();
        let task = tokio::spawn(async move { manager.finish_save(guard, generation, checkpoint, forced).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                let e = SaveError::TaskJoin(format!("save of '{slot_id}': {e}"));
                self.publish(SaveEvent::SaveFailed { slot_id: slot_id.clone(), message: e.to_string() });
                Err(e)
            }
        }
    }

    /// Owns the in-flight guard until the generation is on disk or failed.
    async fn finish_save(
        &self,
        guard: InFlightGuard,
        generation: Generation,
        checkpoint: u64,
        forced: bool,
    ) -> SaveResult<SaveReport> {
        let slot_id = guard.slot_id.clone();
        let shared = Arc::clone(&self.shared);
        let slot = slot_id.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let io = shared.slot_io(&slot);
            let _io = lock(&*io);
            let backup = shared.backups.rotate(&slot);
            let written = shared.store.write_generation(&slot, generation);
            (backup, written)
        })
        .await
        .map_err(|e| SaveError::TaskJoin(format!("save of '{slot_id}': {e}")));

        let result = match outcome {
            Ok((backup, Ok(metadata))) => {
                for warning in &backup.warnings {
                    self.publish(SaveEvent::BackupWarning {
                        slot_id: slot_id.clone(),
                        message: warning.clone(),
                    });
                }
                lock(&self.shared.dirty).commit(checkpoint);
                lock(&self.shared.session).active_slot = Some(slot_id.clone());
                self.publish(SaveEvent::SaveCompleted {
                    slot_id: slot_id.clone(),
                    saved_at: metadata.last_saved,
                    forced,
                });
                Ok(SaveReport {
                    slot_id: slot_id.clone(),
                    metadata,
                    backup_warnings: backup.warnings,
                    forced,
                })
            }
            Ok((_, Err(e))) | Err(e) => {
                log::warn!("save of slot '{slot_id}' failed: {e}");
                self.publish(SaveEvent::SaveFailed { slot_id: slot_id.clone(), message: e.to_string() });
                Err(e)
            }
        };
        drop(guard);
        result
    }

    /// Snapshot every provider and the producer states into a new generation.
    fn capture_generation(&self, slot_id: &str, now: DateTime<Utc>) -> Generation {
        let mut snapshot = GameSnapshot::default();
        let providers: Vec<SharedProvider> = lock(&self.shared.providers).clone();
        for provider in &providers {
            lock(provider.as_ref()).capture(&mut snapshot);
        }
        let producers = lock(&self.shared.producers).states();

        let mut metadata = SaveMetadata::new(slot_id, now);
        metadata.play_time_secs = self.play_time_secs();
        metadata.set_resources(snapshot.resources, self.shared.config.top_resource_count);
        metadata.character = snapshot.character;
        metadata.scenes = snapshot
            .scenes
            .iter()
            .map(|scene| SceneSummary {
                name:                scene.name.clone(),
                object_count:        scene.object_count,
                broken_object_count: scene.broken_entities.len() as u32,
            })
            .collect();

        Generation {
            metadata,
            world: WorldPayload {
                scenes:      Vec::new(),
                producers,
                player_data: snapshot.player_data,
                settings:    snapshot.settings,
            },
            scenes: snapshot.scenes,
        }
    }

    // ── Load ───────────────────────────────────────────────────────

    /// Crash-check, repair if needed, then restore every provider and the
    /// producer states, then replay the offline gap.
    pub async fn load_slot(&self, slot_id: &str) -> SaveResult<LoadReport> {
        self.check_slot_id(slot_id, Op::Load)?;
        let guard = self.try_begin(slot_id, Op::Load)?;
        let manager = self.clone();
        let task = tokio::spawn(async move { manager.finish_load(guard).await });
        match task.await {
            Ok(result) => result,
            Err(e) => {
                let e = SaveError::TaskJoin(format!("load of '{slot_id}': {e}"));
                self.publish(SaveEvent::LoadFailed { slot_id: slot_id.to_string(), message: e.to_string() });
                Err(e)
            }
        }
    }

    async fn finish_load(&self, guard: InFlightGuard) -> SaveResult<LoadReport> {
        let slot_id = guard.slot_id.as_str();
        let now = self.shared.clock.now();

        let shared = Arc::clone(&self.shared);
        let slot = slot_id.to_string();
        let outcome = tokio::task::spawn_blocking(move || load_blocking(&shared, &slot, now))
            .await
            .map_err(|e| SaveError::TaskJoin(format!("load of '{slot_id}': {e}")))
            .and_then(|loaded| loaded);

        let result = match outcome {
            Ok(LoadOutcome { recovery, generation: Some(generation), .. }) => {
                Ok(self.apply_generation(slot_id, generation, recovery, now))
            }
            Ok(LoadOutcome { recovery, generation: None, corrupted }) => {
                log::warn!("slot '{slot_id}' is corrupted and was not restored");
                let metadata = corrupted.unwrap_or_else(|| SaveMetadata::corrupted_placeholder(slot_id));
                self.publish(SaveEvent::LoadCompleted {
                    slot_id: slot_id.to_string(),
                    crash_check: recovery.state,
                    corrupted: true,
                });
                Ok(LoadReport {
                    slot_id: slot_id.to_string(),
                    metadata,
                    recovery,
                    restored: false,
                    offline: None,
                })
            }
            Err(e) => {
                log::warn!("load of slot '{slot_id}' failed: {e}");
                self.publish(SaveEvent::LoadFailed { slot_id: slot_id.to_string(), message: e.to_string() });
                Err(e)
            }
        };
        drop(guard);
        result
    }

    fn apply_generation(
        &self,
        slot_id: &str,
        generation: Generation,
        recovery: RecoveryReport,
        now: DateTime<Utc>,
    ) -> LoadReport {
        let Generation { metadata, world, scenes } = generation;
        let snapshot = GameSnapshot {
            resources:   metadata.resources.clone(),
            character:   metadata.character.clone(),
            scenes,
            player_data: world.player_data,
            settings:    world.settings,
        };
        let providers: Vec<SharedProvider> = lock(&self.shared.providers).clone();
        for provider in &providers {
            lock(provider.as_ref()).restore(&snapshot);
        }
        lock(&self.shared.producers).restore(world.producers);
        lock(&self.shared.dirty).clear_all();
        {
            let mut session = lock(&self.shared.session);
            session.active_slot = Some(slot_id.to_string());
            session.base_play_time = metadata.play_time_secs;
            session.session_start = now;
        }

        self.publish(SaveEvent::LoadCompleted {
            slot_id: slot_id.to_string(),
            crash_check: recovery.state,
            corrupted: false,
        });

        let offline = if self.shared.config.offline_catch_up {
            self.catch_up_offline(slot_id, metadata.last_saved, now)
        } else {
            None
        };
        log::info!(
            "loaded slot '{slot_id}' ({:?}, play time {:.0}s)",
            recovery.state,
            metadata.play_time_secs
        );

        LoadReport {
            slot_id: slot_id.to_string(),
            metadata,
            recovery,
            restored: true,
            offline,
        }
    }

    fn catch_up_offline(&self, slot_id: &str, last_saved: DateTime<Utc>, now: DateTime<Utc>) -> Option<OfflineReport> {
        let report = {
            let mut producers = lock(&self.shared.producers);
            if producers.is_empty() {
                return None;
            }
            producers.catch_up(elapsed_secs(last_saved, now), self.shared.config.max_offline_secs as f64)
        };
        self.apply_credits(&report.credits);
        self.publish(SaveEvent::OfflineProgressApplied {
            slot_id: slot_id.to_string(),
            applied_secs: report.applied_secs,
            clamped: report.clamped,
            credits: report.credits.clone(),
        });
        Some(report)
    }

    // ── Delete, listing, backups ───────────────────────────────────

    /// Remove a slot and its backups. Refused while the slot is being
    /// saved or loaded.
    pub async fn delete_slot(&self, slot_id: &str) -> SaveResult<()> {
        if !validate_slot_id(slot_id) {
            let e = SaveError::InvalidSlotId(slot_id.to_string());
            self.publish(SaveEvent::DeleteFailed { slot_id: slot_id.to_string(), message: e.to_string() });
            return Err(e);
        }
        let _save = self.try_begin(slot_id, Op::Save)?;
        let _load = self.try_begin(slot_id, Op::Load)?;

        let shared = Arc::clone(&self.shared);
        let slot = slot_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let io = shared.slot_io(&slot);
            let _io = lock(&*io);
            shared.store.delete_slot(&slot)
        })
            .await
            .map_err(|e| SaveError::TaskJoin(format!("delete of '{slot_id}': {e}")))
            .and_then(|deleted| deleted);

        match result {
            Ok(()) => {
                let mut session = lock(&self.shared.session);
                if session.active_slot.as_deref() == Some(slot_id) {
                    session.active_slot = None;
                }
                drop(session);
                log::info!("deleted slot '{slot_id}'");
                self.publish(SaveEvent::SlotDeleted { slot_id: slot_id.to_string() });
                Ok(())
            }
            Err(e) => {
                log::warn!("delete of slot '{slot_id}' failed: {e}");
                self.publish(SaveEvent::DeleteFailed { slot_id: slot_id.to_string(), message: e.to_string() });
                Err(e)
            }
        }
    }

    /// Lightweight summaries for a slot picker, newest first. Unreadable
    /// slots appear as corrupted placeholders.
    pub async fn get_save_summaries(&self) -> SaveResult<Vec<SaveSummary>> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.store.summaries())
            .await
            .map_err(|e| SaveError::TaskJoin(format!("listing slots: {e}")))
    }

    /// Drop every backup generation of `slot_id` except the newest.
    /// Returns how many were removed.
    pub async fn compact_backups(&self, slot_id: &str) -> SaveResult<usize> {
        if !validate_slot_id(slot_id) {
            return Err(SaveError::InvalidSlotId(slot_id.to_string()));
        }
        let _save = self.try_begin(slot_id, Op::Save)?;
        let shared = Arc::clone(&self.shared);
        let slot = slot_id.to_string();
        tokio::task::spawn_blocking(move || {
            let io = shared.slot_io(&slot);
            let _io = lock(&*io);
            shared.backups.compact(&slot, 1)
        })
            .await
            .map_err(|e| SaveError::TaskJoin(format!("compacting '{slot_id}': {e}")))
    }

    // ── Scheduling ─────────────────────────────────────────────────

    /// One autosave cycle: saves the active slot when something is dirty
    /// and no save is running. `None` means the cycle was a no-op.
    pub async fn autosave_tick(&self) -> Option<SaveResult<SaveReport>> {
        if !self.has_dirty_flags() {
            return None;
        }
        let slot_id = self.active_slot();
        if self.is_saving(&slot_id) {
            log::debug!("autosave skipped: save of '{slot_id}' in flight");
            return None;
        }
        Some(self.save_slot(&slot_id).await)
    }

    /// Run `autosave_tick` every `autosave_interval_secs` until the handle
    /// is aborted. Requires a running tokio runtime.
    pub fn spawn_autosave(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let period = Duration::from_secs(self.shared.config.autosave_interval_secs.max(1));
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            timer.tick().await;
            loop {
                timer.tick().await;
                if let Some(Err(e)) = manager.autosave_tick().await {
                    if !e.is_busy() {
                        log::warn!("autosave failed: {e}");
                    }
                }
            }
        })
    }

    /// Forward a host lifecycle moment. Force-saves the active slot when
    /// the matching `save_on_*` option is set; `None` when it is not.
    pub async fn handle_lifecycle(&self, hook: LifecycleHook) -> Option<SaveResult<SaveReport>> {
        let config = &self.shared.config;
        let wanted = match hook {
            LifecycleHook::Pause     => config.save_on_pause,
            LifecycleHook::FocusLost => config.save_on_focus_loss,
            LifecycleHook::Quit      => config.save_on_quit,
        };
        if !wanted {
            return None;
        }
        let slot_id = self.active_slot();
        log::info!("{hook:?}: saving slot '{slot_id}'");
        Some(self.force_save(&slot_id).await)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn check_slot_id(&self, slot_id: &str, op: Op) -> SaveResult<()> {
        if validate_slot_id(slot_id) {
            return Ok(());
        }
        let e = SaveError::InvalidSlotId(slot_id.to_string());
        let message = e.to_string();
        self.publish(match op {
            Op::Save => SaveEvent::SaveFailed { slot_id: slot_id.to_string(), message },
            Op::Load => SaveEvent::LoadFailed { slot_id: slot_id.to_string(), message },
        });
        Err(e)
    }

    fn try_begin(&self, slot_id: &str, op: Op) -> SaveResult<InFlightGuard> {
        let inserted = lock(&self.shared.in_flight).set_mut(op).insert(slot_id.to_string());
        if !inserted {
            log::warn!("{} of slot '{slot_id}' rejected: already in progress", op.name());
            return Err(SaveError::Busy { slot_id: slot_id.to_string(), op: op.name() });
        }
        Ok(InFlightGuard { shared: Arc::clone(&self.shared), slot_id: slot_id.to_string(), op })
    }

    fn publish(&self, event: SaveEvent) {
        log::debug!("event {} for slot '{}'", event_type_name(&event), event.slot_id());
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }
}

struct LoadOutcome {
    recovery:   RecoveryReport,
    generation: Option<Generation>,
    /// Flagged metadata of a slot that could not be restored.
    corrupted:  Option<SaveMetadata>,
}

/// Blocking half of a load: crash check, read, and repair on a failed read.
fn load_blocking(shared: &Shared, slot_id: &str, now: DateTime<Utc>) -> SaveResult<LoadOutcome> {
    let io = shared.slot_io(slot_id);
    let _io = lock(&*io);
    let config = &shared.config;
    let detector = CrashDetector::new(
        &shared.store,
        &shared.backups,
        config.crash_detection_window_secs,
        config.auto_repair,
    );
    let mut recovery = detector.check(slot_id, now)?;

    if recovery.is_loadable() {
        match shared.store.read_generation(slot_id) {
            Ok(generation) => {
                return Ok(LoadOutcome { recovery, generation: Some(generation), corrupted: None });
            }
            Err(e) if e.is_integrity() => {
                let repaired = detector.repair_after_failed_read(slot_id, now, e.to_string())?;
                recovery = RecoveryReport {
                    suspicious: recovery.suspicious,
                    temp_files_cleaned: recovery.temp_files_cleaned,
                    ..repaired
                };
                if recovery.is_loadable() {
                    let generation = shared.store.read_generation(slot_id)?;
                    return Ok(LoadOutcome { recovery, generation: Some(generation), corrupted: None });
                }
            }
            Err(e) => return Err(e),
        }
    }

    debug_assert_eq!(recovery.state, CrashCheck::CheckedSuspicious);
    let metadata = match shared.store.read_metadata(slot_id) {
        Ok(mut metadata) => {
            metadata.is_corrupted = true;
            metadata
        }
        Err(_) => SaveMetadata::corrupted_placeholder(slot_id),
    };
    Ok(LoadOutcome { recovery, generation: None, corrupted: Some(metadata) })
}
