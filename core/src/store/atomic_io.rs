//! Write-then-rename file replacement.
//!
//! Bytes go to a uniquely named `.tmp` sibling, are flushed with
//! `sync_all()`, then renamed over the destination. A crash at any point
//! leaves either the old file or the new one, never a torn write.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub(crate) const TEMP_SUFFIX: &str = ".tmp";

pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = temp_path_for(path);
    if let Err(error) = write_and_sync(&tmp_path, bytes) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }
    if let Err(error) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }
    sync_parent(path);
    Ok(())
}

/// Copy `from` to `to` through the same temp-and-rename path.
pub(crate) fn copy_file_atomic(from: &Path, to: &Path) -> io::Result<()> {
    let bytes = fs::read(from)?;
    write_bytes_atomic(to, &bytes)
}

pub(crate) fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(TEMP_SUFFIX))
}

/// Remove leftover temp files from interrupted writes in `dir`.
/// Returns how many were removed.
pub(crate) fn remove_stale_temp_files(dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(dir) else { return 0 };
    let mut cleaned = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_temp_file(&path) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!("crash recovery: removed stale temp file {}", path.display());
                cleaned += 1;
            }
            Err(e) => log::warn!("crash recovery: cannot remove {}: {e}", path.display()),
        }
    }
    cleaned
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("save");
    let tmp_name = format!(".{file_name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4().simple());
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn overwrites_and_leaves_no_temp_behind() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("nested").join("meta.sav");

        write_bytes_atomic(&path, b"version 1").expect("first write");
        write_bytes_atomic(&path, b"version 2").expect("second write");
        assert_eq!(fs::read(&path).expect("read"), b"version 2");

        let leftovers = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| is_temp_file(&e.path()))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn interrupted_write_leaves_original_intact() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("meta.sav");
        write_bytes_atomic(&path, b"committed").expect("write");

        // A crash between "write temp" and "rename" leaves only the temp file.
        fs::write(temp.path().join(".meta.sav.deadbeef.tmp"), b"half-writ").expect("tmp");

        assert_eq!(fs::read(&path).expect("read"), b"committed");
        assert_eq!(remove_stale_temp_files(temp.path()), 1);
        assert_eq!(fs::read(&path).expect("read"), b"committed");
    }
}
