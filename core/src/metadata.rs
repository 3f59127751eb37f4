//! Save Metadata: the versioned record that commits a generation.
//!
//! The checksum is a SHA-256 over the canonical JSON form of the record
//! with the checksum field omitted. Maps are `BTreeMap`, so the canonical
//! form is stable across processes.
//!
//! RULE: Verification never throws. A mismatch sets `is_corrupted`.

use crate::{
    error::SaveResult,
    hashing::{digests_match, sha256_hex},
    types::{ResourceId, SlotId, SAVE_VERSION},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceAmount {
    pub id:     ResourceId,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneSummary {
    pub name:                String,
    pub object_count:        u32,
    pub broken_object_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CharacterSnapshot {
    pub scene:    String,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

/// A payload file belonging to this generation, with its on-disk digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayloadDigest {
    pub file:   String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveMetadata {
    pub slot_id:        SlotId,
    pub save_version:   u32,
    pub last_saved:     DateTime<Utc>,
    pub play_time_secs: f64,
    pub resources:      BTreeMap<ResourceId, f64>,
    pub top_resources:  Vec<ResourceAmount>,
    pub scenes:         Vec<SceneSummary>,
    #[serde(default)]
    pub character:      Option<CharacterSnapshot>,
    #[serde(default)]
    pub payload_files:  Vec<PayloadDigest>,
    #[serde(default)]
    pub is_corrupted:   bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum:       Option<String>,
}

impl SaveMetadata {
    pub fn new(slot_id: impl Into<SlotId>, last_saved: DateTime<Utc>) -> Self {
        Self {
            slot_id:        slot_id.into(),
            save_version:   SAVE_VERSION,
            last_saved,
            play_time_secs: 0.0,
            resources:      BTreeMap::new(),
            top_resources:  Vec::new(),
            scenes:         Vec::new(),
            character:      None,
            payload_files:  Vec::new(),
            is_corrupted:   false,
            checksum:       None,
        }
    }

    /// A minimal valid record used when nothing on disk can be repaired.
    pub fn minimal(slot_id: impl Into<SlotId>, now: DateTime<Utc>) -> SaveResult<Self> {
        let mut meta = Self::new(slot_id, now);
        meta.seal()?;
        Ok(meta)
    }

    /// Listing placeholder for a slot whose metadata cannot be read.
    pub fn corrupted_placeholder(slot_id: impl Into<SlotId>) -> Self {
        let mut meta = Self::new(slot_id, DateTime::<Utc>::default());
        meta.is_corrupted = true;
        meta
    }

    /// Canonical bytes: the record as JSON with the checksum omitted.
    pub fn canonical_bytes(&self) -> SaveResult<Vec<u8>> {
        let mut unsealed = self.clone();
        unsealed.checksum = None;
        Ok(serde_json::to_vec(&unsealed)?)
    }

    pub fn compute_checksum(&self) -> SaveResult<String> {
        Ok(sha256_hex(&self.canonical_bytes()?))
    }

    /// Store a fresh checksum. Call after every field is final.
    pub fn seal(&mut self) -> SaveResult<()> {
        self.is_corrupted = false;
        self.checksum = Some(self.compute_checksum()?);
        Ok(())
    }

    /// Recompute and compare. Returns `false` and flags the record on
    /// mismatch; a record without a checksum passes.
    pub fn verify(&mut self) -> bool {
        let Some(stored) = self.checksum.clone() else {
            return !self.is_corrupted;
        };
        let ok = match self.compute_checksum() {
            Ok(actual) => digests_match(&stored, &actual),
            Err(_) => false,
        };
        if !ok {
            self.is_corrupted = true;
        }
        ok
    }

    pub fn set_resources(&mut self, resources: BTreeMap<ResourceId, f64>, top_count: usize) {
        self.top_resources = top_resources(&resources, top_count);
        self.resources = resources;
    }

    pub fn summary(&self) -> SaveSummary {
        SaveSummary {
            slot_id:        self.slot_id.clone(),
            last_saved:     self.last_saved,
            play_time_secs: self.play_time_secs,
            top_resources:  self.top_resources.clone(),
            scenes:         self.scenes.clone(),
            is_corrupted:   self.is_corrupted,
        }
    }
}

/// Lightweight per-slot listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveSummary {
    pub slot_id:        SlotId,
    pub last_saved:     DateTime<Utc>,
    pub play_time_secs: f64,
    pub top_resources:  Vec<ResourceAmount>,
    pub scenes:         Vec<SceneSummary>,
    pub is_corrupted:   bool,
}

/// Largest amounts first; ties broken by id so the order is stable.
pub fn top_resources(resources: &BTreeMap<ResourceId, f64>, count: usize) -> Vec<ResourceAmount> {
    let mut all: Vec<ResourceAmount> = resources
        .iter()
        .map(|(id, amount)| ResourceAmount { id: id.clone(), amount: *amount })
        .collect();
    all.sort_by(|a, b| b.amount.total_cmp(&a.amount).then_with(|| a.id.cmp(&b.id)));
    all.truncate(count);
    all
}
