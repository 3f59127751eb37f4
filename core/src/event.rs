//! Save engine notifications.
//!
//! RULE: Every public operation ends in exactly one completion or failure
//! event for its slot. Events are published on a broadcast channel; a
//! subscriber that lags simply misses old events, it never blocks a save.

use crate::{
    store::recovery::CrashCheck,
    types::{ResourceId, SlotId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every event the manager emits.
/// Variants are only ever appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaveEvent {
    // ── Save ───────────────────────────────────────
    SaveCompleted {
        slot_id: SlotId,
        saved_at: DateTime<Utc>,
        forced: bool,
    },
    SaveFailed {
        slot_id: SlotId,
        message: String,
    },
    BackupWarning {
        slot_id: SlotId,
        message: String,
    },

    // ── Load ───────────────────────────────────────
    LoadCompleted {
        slot_id: SlotId,
        crash_check: CrashCheck,
        corrupted: bool,
    },
    LoadFailed {
        slot_id: SlotId,
        message: String,
    },
    OfflineProgressApplied {
        slot_id: SlotId,
        applied_secs: f64,
        clamped: bool,
        credits: BTreeMap<ResourceId, f64>,
    },

    // ── Delete ─────────────────────────────────────
    SlotDeleted {
        slot_id: SlotId,
    },
    DeleteFailed {
        slot_id: SlotId,
        message: String,
    },
}

impl SaveEvent {
    pub fn slot_id(&self) -> &str {
        match self {
            Self::SaveCompleted { slot_id, .. }
            | Self::SaveFailed { slot_id, .. }
            | Self::BackupWarning { slot_id, .. }
            | Self::LoadCompleted { slot_id, .. }
            | Self::LoadFailed { slot_id, .. }
            | Self::OfflineProgressApplied { slot_id, .. }
            | Self::SlotDeleted { slot_id }
            | Self::DeleteFailed { slot_id, .. } => slot_id,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::SaveFailed { .. } | Self::LoadFailed { .. } | Self::DeleteFailed { .. }
        )
    }
}

/// Stable name of an event variant, used in log lines.
pub fn event_type_name(event: &SaveEvent) -> &'static str {
    match event {
        SaveEvent::SaveCompleted { .. }          => "save_completed",
        SaveEvent::SaveFailed { .. }             => "save_failed",
        SaveEvent::BackupWarning { .. }          => "backup_warning",
        SaveEvent::LoadCompleted { .. }          => "load_completed",
        SaveEvent::LoadFailed { .. }             => "load_failed",
        SaveEvent::OfflineProgressApplied { .. } => "offline_progress_applied",
        SaveEvent::SlotDeleted { .. }            => "slot_deleted",
        SaveEvent::DeleteFailed { .. }           => "delete_failed",
    }
}
