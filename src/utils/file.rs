//! Filesystem helpers for [`crate::storage::engine::Engine::stat`] and
//! [`crate::storage::engine::Engine::backup`].

use std::path::Path;

use fs4::available_space;

use crate::error::Result;

/// Total size in bytes of all regular files directly and transitively
/// under `dir_path`.
pub fn dir_disk_size(dir_path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir_path) else {
        return 0;
    };
    let mut total = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            total += dir_disk_size(&path);
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

/// Bytes free on the filesystem backing `dir_path`.
pub fn available_disk_size(dir_path: &Path) -> u64 {
    available_space(dir_path).unwrap_or(0)
}

/// Recursively copies `src` into `dst`, creating `dst` if needed, skipping
/// any top-level entry whose name appears in `exclude` (used to leave the
/// flock file behind when snapshotting a live database).
pub fn copy_dir(src: &Path, dst: &Path, exclude: &[&str]) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if exclude.iter().any(|e| name == std::ffi::OsStr::new(e)) {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        if from.is_dir() {
            copy_dir(&from, &to, exclude)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}
