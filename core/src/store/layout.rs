//! On-disk layout of the save root.
//!
//! ```text
//! <root>/<slot_id>/meta.sav
//! <root>/<slot_id>/world.sav
//! <root>/<slot_id>/scene_<name>.sav      (per-scene mode)
//! <root>/<slot_id>/backup/backup_1 ... backup_N
//! ```

use std::path::{Path, PathBuf};

pub const META_FILE: &str = "meta.sav";
pub const WORLD_FILE: &str = "world.sav";
pub const SCENE_PREFIX: &str = "scene_";
pub const BACKUP_DIR: &str = "backup";
pub const BACKUP_PREFIX: &str = "backup_";

#[derive(Debug, Clone)]
pub struct SlotLayout {
    root: PathBuf,
}

impl SlotLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn slot_dir(&self, slot_id: &str) -> PathBuf {
        self.root.join(slot_id)
    }

    pub fn meta_path(&self, slot_id: &str) -> PathBuf {
        self.slot_dir(slot_id).join(META_FILE)
    }

    pub fn backup_root(&self, slot_id: &str) -> PathBuf {
        self.slot_dir(slot_id).join(BACKUP_DIR)
    }
}

pub fn backup_generation_dir(backup_root: &Path, generation: usize) -> PathBuf {
    backup_root.join(format!("{BACKUP_PREFIX}{generation}"))
}

/// Parse `backup_<n>` into `n`.
pub fn parse_backup_generation(name: &str) -> Option<usize> {
    name.strip_prefix(BACKUP_PREFIX)?.parse().ok().filter(|n| *n > 0)
}

pub fn is_scene_file(name: &str) -> bool {
    name.starts_with(SCENE_PREFIX) && name.ends_with(".sav")
}
