//! Slot persistence layer.
//!
//! RULE: Only the store modules touch slot files.
//! The manager hands the store whole generations and receives whole
//! generations back; it never builds paths or opens files itself.
//!
//! A generation is committed by writing `meta.sav` last. Every payload file
//! is listed in the metadata with the SHA-256 of its on-disk bytes, so a
//! payload written by an interrupted save is detected on read.

pub mod atomic_io;
pub mod backup;
pub mod layout;
pub mod recovery;

use crate::{
    codec::Codec,
    config::PayloadMode,
    error::{SaveError, SaveResult},
    hashing::{digests_match, sha256_hex},
    metadata::{PayloadDigest, SaveMetadata, SaveSummary},
    payload::{ScenePayload, WorldPayload},
    types::{validate_slot_id, SlotId},
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use atomic_io::write_bytes_atomic;
use layout::{is_scene_file, SlotLayout, META_FILE, WORLD_FILE};

/// One complete version of a slot's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub metadata: SaveMetadata,
    pub world:    WorldPayload,
    pub scenes:   Vec<ScenePayload>,
}

impl Generation {
    pub fn empty(slot_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            metadata: SaveMetadata::new(slot_id, now),
            world:    WorldPayload::default(),
            scenes:   Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotStore {
    layout: SlotLayout,
    codec:  Codec,
    mode:   PayloadMode,
}

impl SlotStore {
    pub fn new(layout: SlotLayout, codec: Codec, mode: PayloadMode) -> Self {
        Self { layout, codec, mode }
    }

    pub fn layout(&self) -> &SlotLayout { &self.layout }

    pub fn slot_exists(&self, slot_id: &str) -> bool {
        self.layout.slot_dir(slot_id).is_dir()
    }

    // ── Write ──────────────────────────────────────────────────────

    /// Write payloads, then the sealed metadata. Returns the metadata as
    /// written (checksum and payload digests filled in).
    pub fn write_generation(&self, slot_id: &str, generation: Generation) -> SaveResult<SaveMetadata> {
        let dir = self.layout.slot_dir(slot_id);
        fs::create_dir_all(&dir).map_err(|e| SaveError::io(&dir, e))?;

        let Generation { mut metadata, mut world, scenes } = generation;
        let mut digests = Vec::with_capacity(scenes.len() + 1);

        match self.mode {
            PayloadMode::PerScene => {
                let mut names = BTreeSet::new();
                for scene in &scenes {
                    let file = scene.file_name();
                    if !names.insert(file.clone()) {
                        return Err(SaveError::Other(anyhow::anyhow!(
                            "scene '{}' maps to an already used file name {file}",
                            scene.name
                        )));
                    }
                    digests.push(self.write_record(&dir, &file, scene)?);
                }
                world.scenes.clear();
            }
            PayloadMode::Global => world.scenes = scenes,
        }
        digests.push(self.write_record(&dir, WORLD_FILE, &world)?);

        metadata.payload_files = digests;
        metadata.seal()?;
        self.write_record(&dir, META_FILE, &metadata)?;

        self.prune_unlisted_scenes(&dir, &metadata);
        log::debug!(
            "slot '{slot_id}': wrote generation with {} payload file(s)",
            metadata.payload_files.len()
        );
        Ok(metadata)
    }

    /// Write a default, valid generation so the slot is always loadable.
    pub fn write_minimal(&self, slot_id: &str, now: DateTime<Utc>) -> SaveResult<SaveMetadata> {
        self.write_generation(slot_id, Generation::empty(slot_id, now))
    }

    fn write_record<T: Serialize>(&self, dir: &Path, file: &str, value: &T) -> SaveResult<PayloadDigest> {
        let path = dir.join(file);
        let json = serde_json::to_vec(value)?;
        let framed = self.codec.encode(&json)?;
        write_bytes_atomic(&path, &framed).map_err(|e| SaveError::io(&path, e))?;
        Ok(PayloadDigest { file: file.to_string(), sha256: sha256_hex(&framed) })
    }

    /// Scene files left over from an older generation are no longer
    /// referenced once the new metadata is committed.
    fn prune_unlisted_scenes(&self, dir: &Path, metadata: &SaveMetadata) {
        let listed: BTreeSet<&str> = metadata.payload_files.iter().map(|p| p.file.as_str()).collect();
        let Ok(entries) = fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_scene_file(&name) && !listed.contains(name.as_str()) {
                if let Err(e) = fs::remove_file(entry.path()) {
                    log::debug!("could not prune stale scene file {name}: {e}");
                }
            }
        }
    }

    // ── Read ───────────────────────────────────────────────────────

    /// Read and verify the metadata of `slot_id`. A checksum mismatch
    /// returns the record with `is_corrupted` set, not an error.
    pub fn read_metadata(&self, slot_id: &str) -> SaveResult<SaveMetadata> {
        if !self.slot_exists(slot_id) {
            return Err(SaveError::SlotNotFound(slot_id.to_string()));
        }
        self.read_metadata_in(&self.layout.slot_dir(slot_id))
    }

    pub fn read_metadata_in(&self, dir: &Path) -> SaveResult<SaveMetadata> {
        let path = dir.join(META_FILE);
        let bytes = fs::read(&path).map_err(|e| SaveError::io(&path, e))?;
        let mut metadata: SaveMetadata = self.decode_record(&path, &bytes)?;
        if !metadata.verify() {
            log::warn!("metadata checksum mismatch in {}", path.display());
        }
        Ok(metadata)
    }

    /// Full integrity check of a slot or backup directory: metadata
    /// readable and checksum-clean, every listed payload present and
    /// matching its digest.
    pub fn validate_dir(&self, dir: &Path) -> Result<SaveMetadata, String> {
        let metadata = self.read_metadata_in(dir).map_err(|e| e.to_string())?;
        if metadata.is_corrupted {
            return Err("metadata checksum mismatch".into());
        }
        for digest in &metadata.payload_files {
            self.read_listed_payload(dir, digest).map_err(|e| e.to_string())?;
        }
        Ok(metadata)
    }

    /// Read a whole generation. Fails with an integrity error when the
    /// metadata is corrupted or any payload does not match its digest.
    pub fn read_generation(&self, slot_id: &str) -> SaveResult<Generation> {
        let metadata = self.read_metadata(slot_id)?;
        let dir = self.layout.slot_dir(slot_id);
        if metadata.is_corrupted {
            return Err(SaveError::integrity(dir.join(META_FILE), "metadata checksum mismatch"));
        }

        let mut world: Option<WorldPayload> = None;
        let mut scenes = Vec::new();
        for digest in &metadata.payload_files {
            let (path, bytes) = self.read_listed_payload(&dir, digest)?;
            if digest.file == WORLD_FILE {
                world = Some(self.decode_record(&path, &bytes)?);
            } else {
                scenes.push(self.decode_record::<ScenePayload>(&path, &bytes)?);
            }
        }
        let mut world = world
            .ok_or_else(|| SaveError::integrity(&dir, "generation has no world payload"))?;
        scenes.append(&mut world.scenes);

        Ok(Generation { metadata, world, scenes })
    }

    fn read_listed_payload(&self, dir: &Path, digest: &PayloadDigest) -> SaveResult<(std::path::PathBuf, Vec<u8>)> {
        let name = digest.file.as_str();
        if name.contains(['/', '\\']) || !(name == WORLD_FILE || is_scene_file(name)) {
            return Err(SaveError::integrity(dir, format!("unexpected payload file name '{name}'")));
        }
        let path = dir.join(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SaveError::integrity(&path, "payload file missing"));
            }
            Err(e) => return Err(SaveError::io(&path, e)),
        };
        if !digests_match(&sha256_hex(&bytes), &digest.sha256) {
            return Err(SaveError::integrity(&path, "payload digest mismatch"));
        }
        Ok((path, bytes))
    }

    /// Decode a framed record. Schema violations count as integrity failures.
    fn decode_record<T: DeserializeOwned>(&self, path: &Path, bytes: &[u8]) -> SaveResult<T> {
        let json = self.codec.decode(path, bytes)?;
        serde_json::from_slice(&json)
            .map_err(|e| SaveError::integrity(path, format!("malformed record: {e}")))
    }

    // ── Listing and deletion ───────────────────────────────────────

    pub fn list_slots(&self) -> Vec<SlotId> {
        let Ok(entries) = fs::read_dir(self.layout.root()) else { return Vec::new() };
        let mut slots: Vec<SlotId> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| validate_slot_id(name))
            .collect();
        slots.sort();
        slots
    }

    /// One summary per slot, newest first. Unreadable slots yield a
    /// placeholder flagged as corrupted instead of an error.
    pub fn summaries(&self) -> Vec<SaveSummary> {
        let mut summaries: Vec<SaveSummary> = self
            .list_slots()
            .into_iter()
            .map(|slot| match self.read_metadata(&slot) {
                Ok(metadata) => metadata.summary(),
                Err(e) => {
                    log::warn!("slot '{slot}' unreadable for listing: {e}");
                    SaveMetadata::corrupted_placeholder(slot).summary()
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.last_saved.cmp(&a.last_saved).then_with(|| a.slot_id.cmp(&b.slot_id)));
        summaries
    }

    pub fn delete_slot(&self, slot_id: &str) -> SaveResult<()> {
        let dir = self.layout.slot_dir(slot_id);
        if !dir.is_dir() {
            return Err(SaveError::SlotNotFound(slot_id.to_string()));
        }
        fs::remove_dir_all(&dir).map_err(|e| SaveError::io(&dir, e))
    }
}
