//! Crash detection and repair, run before every load.
//!
//! State machine per load:
//!   Unchecked → CheckedOk | CheckedSuspicious → Repaired | Unrepairable
//!
//! A fresh `last_saved` (inside the crash-detection window) or a leftover
//! temp file is only a reason to validate the slot deeply. Repair starts
//! when validation actually fails. Candidates are validated in place
//! before anything is copied, so a bad backup never overwrites the slot
//! and no backup is ever deleted.

use super::{atomic_io::remove_stale_temp_files, backup::BackupManager, SlotStore};
use crate::{
    error::{SaveError, SaveResult},
    metadata::SaveMetadata,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Windows longer than ten years are treated as ten years.
const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CrashCheck {
    #[default]
    Unchecked,
    CheckedOk,
    CheckedSuspicious,
    Repaired { generation: usize },
    /// No backup validated; a minimal record was written in its place.
    Unrepairable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecoveryReport {
    pub state:              CrashCheck,
    /// Recent timestamp or stale temp files pointed at a crash.
    pub suspicious:         bool,
    pub temp_files_cleaned: usize,
    /// The primary slot failed validation.
    pub corruption_found:   bool,
    pub candidates_tried:   usize,
    pub failure_reason:     Option<String>,
}

impl RecoveryReport {
    /// True when the slot on disk can be read as a valid generation.
    pub fn is_loadable(&self) -> bool {
        matches!(
            self.state,
            CrashCheck::CheckedOk | CrashCheck::Repaired { .. } | CrashCheck::Unrepairable
        )
    }
}

pub struct CrashDetector<'a> {
    store:       &'a SlotStore,
    backups:     &'a BackupManager,
    window:      Duration,
    auto_repair: bool,
}

impl<'a> CrashDetector<'a> {
    pub fn new(store: &'a SlotStore, backups: &'a BackupManager, window_secs: u64, auto_repair: bool) -> Self {
        Self {
            store,
            backups,
            window: Duration::seconds(window_secs.min(MAX_WINDOW_SECS) as i64),
            auto_repair,
        }
    }

    /// Inspect `slot_id` and repair it when validation fails.
    pub fn check(&self, slot_id: &str, now: DateTime<Utc>) -> SaveResult<RecoveryReport> {
        if !self.store.slot_exists(slot_id) {
            return Err(SaveError::SlotNotFound(slot_id.to_string()));
        }
        let slot_dir = self.store.layout().slot_dir(slot_id);
        let mut report = RecoveryReport {
            temp_files_cleaned: remove_stale_temp_files(&slot_dir),
            ..RecoveryReport::default()
        };

        // Cheap pass first: metadata only.
        let metadata = match self.store.read_metadata_in(&slot_dir) {
            Ok(meta) if !meta.is_corrupted => meta,
            Ok(_) => return self.fail(slot_id, now, report, "metadata checksum mismatch".into()),
            Err(e) => return self.fail(slot_id, now, report, e.to_string()),
        };

        report.suspicious = report.temp_files_cleaned > 0 || self.in_crash_window(&metadata, now);
        if report.suspicious {
            log::info!(
                "slot '{slot_id}': possible interrupted write (saved {}), validating",
                metadata.last_saved
            );
            if let Err(reason) = self.store.validate_dir(&slot_dir) {
                return self.fail(slot_id, now, report, reason);
            }
        }

        report.state = CrashCheck::CheckedOk;
        Ok(report)
    }

    /// Entry point once a read has already failed an integrity check.
    pub fn repair_after_failed_read(
        &self,
        slot_id: &str,
        now: DateTime<Utc>,
        reason: String,
    ) -> SaveResult<RecoveryReport> {
        self.fail(slot_id, now, RecoveryReport::default(), reason)
    }

    fn in_crash_window(&self, metadata: &SaveMetadata, now: DateTime<Utc>) -> bool {
        metadata.last_saved > now - self.window
    }

    fn fail(
        &self,
        slot_id: &str,
        now: DateTime<Utc>,
        mut report: RecoveryReport,
        reason: String,
    ) -> SaveResult<RecoveryReport> {
        log::warn!("slot '{slot_id}' failed validation: {reason}");
        report.state = CrashCheck::CheckedSuspicious;
        report.corruption_found = true;
        report.failure_reason = Some(reason);
        if !self.auto_repair {
            return Ok(report);
        }

        for (generation, dir) in self.backups.generations(slot_id) {
            report.candidates_tried += 1;
            if let Err(reason) = self.store.validate_dir(&dir) {
                log::warn!("slot '{slot_id}': backup_{generation} rejected: {reason}");
                continue;
            }
            if let Err(e) = self.backups.restore(slot_id, &dir) {
                log::warn!("slot '{slot_id}': restoring backup_{generation} failed: {e}");
                continue;
            }
            match self.store.validate_dir(&self.store.layout().slot_dir(slot_id)) {
                Ok(_) => {
                    log::info!("slot '{slot_id}': repaired from backup_{generation}");
                    report.state = CrashCheck::Repaired { generation };
                    return Ok(report);
                }
                Err(reason) => {
                    log::warn!("slot '{slot_id}': restored backup_{generation} still invalid: {reason}");
                }
            }
        }

        log::warn!("slot '{slot_id}': no valid backup, writing a minimal save");
        self.store.write_minimal(slot_id, now)?;
        report.state = CrashCheck::Unrepairable;
        Ok(report)
    }
}
