//! Backup generations: a bounded ring of prior slot snapshots.
//!
//! RULES:
//!   - backup_1 is always the most recent prior generation.
//!   - Rotation shifts backup_k to backup_k+1 and discards anything past
//!     `max_backups`.
//!   - Backup work is best-effort: failures become warnings and never
//!     abort the primary save.

use super::{
    atomic_io::{copy_file_atomic, is_temp_file},
    layout::{backup_generation_dir, parse_backup_generation, SlotLayout, META_FILE},
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupReport {
    /// True when a new backup_1 was written.
    pub created:  bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    layout:      SlotLayout,
    max_backups: usize,
}

impl BackupManager {
    pub fn new(layout: SlotLayout, max_backups: usize) -> Self {
        Self { layout, max_backups }
    }

    pub fn max_backups(&self) -> usize { self.max_backups }

    /// Existing generations, newest (1) first.
    pub fn generations(&self, slot_id: &str) -> Vec<(usize, PathBuf)> {
        let root = self.layout.backup_root(slot_id);
        let Ok(entries) = fs::read_dir(&root) else { return Vec::new() };
        let mut generations: Vec<(usize, PathBuf)> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let n = parse_backup_generation(&e.file_name().to_string_lossy())?;
                Some((n, e.path()))
            })
            .collect();
        generations.sort_by_key(|(n, _)| *n);
        generations
    }

    /// Rotate the ring and copy the slot's current files into backup_1.
    /// A slot with no committed generation yet has nothing to back up.
    pub fn rotate(&self, slot_id: &str) -> BackupReport {
        let mut report = BackupReport::default();
        let slot_dir = self.layout.slot_dir(slot_id);
        if self.max_backups == 0 || !slot_dir.join(META_FILE).is_file() {
            return report;
        }
        let root = self.layout.backup_root(slot_id);
        if let Err(e) = fs::create_dir_all(&root) {
            report.warn(format!("cannot create {}: {e}", root.display()));
            return report;
        }

        // Drop everything at or beyond the bound, including leftovers from
        // a previously larger max_backups.
        for (generation, dir) in self.generations(slot_id) {
            if generation >= self.max_backups {
                if let Err(e) = fs::remove_dir_all(&dir) {
                    report.warn(format!("cannot discard {}: {e}", dir.display()));
                }
            }
        }

        for generation in (1..self.max_backups).rev() {
            let from = backup_generation_dir(&root, generation);
            if !from.is_dir() {
                continue;
            }
            let to = backup_generation_dir(&root, generation + 1);
            if to.exists() {
                if let Err(e) = fs::remove_dir_all(&to) {
                    report.warn(format!("cannot clear {}: {e}", to.display()));
                    continue;
                }
            }
            if let Err(e) = fs::rename(&from, &to) {
                report.warn(format!("cannot shift {} -> {}: {e}", from.display(), to.display()));
            }
        }

        let newest = backup_generation_dir(&root, 1);
        match snapshot_files(&slot_dir, &newest) {
            Ok(()) => report.created = true,
            Err(e) => report.warn(format!("cannot snapshot slot '{slot_id}': {e}")),
        }
        report
    }

    /// Remove every generation past `keep` (at least the newest stays).
    pub fn compact(&self, slot_id: &str, keep: usize) -> usize {
        let keep = keep.max(1);
        let mut removed = 0;
        for (generation, dir) in self.generations(slot_id) {
            if generation <= keep {
                continue;
            }
            match fs::remove_dir_all(&dir) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("backup compaction: cannot remove {}: {e}", dir.display()),
            }
        }
        removed
    }

    /// Copy a validated backup generation's files over the primary slot.
    /// Files only present in the primary are left alone.
    pub fn restore(&self, slot_id: &str, backup_dir: &Path) -> io::Result<()> {
        let slot_dir = self.layout.slot_dir(slot_id);
        let mut files = regular_files(backup_dir)?;
        // Metadata last: it commits the restored generation.
        files.sort_by_key(|p| p.file_name().is_some_and(|n| n == META_FILE));
        for file in files {
            if let Some(name) = file.file_name() {
                copy_file_atomic(&file, &slot_dir.join(name))?;
            }
        }
        Ok(())
    }
}

impl BackupReport {
    fn warn(&mut self, message: String) {
        log::warn!("backup: {message}");
        self.warnings.push(message);
    }
}

/// Copy the slot's regular files into `dest`, staging in a sibling
/// directory and renaming so a half-copied backup is never visible.
fn snapshot_files(slot_dir: &Path, dest: &Path) -> io::Result<()> {
    let staging = dest.with_extension("partial");
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;
    for file in regular_files(slot_dir)? {
        if let Some(name) = file.file_name() {
            fs::copy(&file, staging.join(name))?;
        }
    }
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    fs::rename(&staging, dest)
}

fn regular_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && !is_temp_file(&path) {
            files.push(path);
        }
    }
    Ok(files)
}
