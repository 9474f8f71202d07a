//! Configuration surface.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which in-memory index backend a database uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    /// Balanced in-memory tree ordered by key bytes.
    BTree,
    /// Radix tree over key bytes.
    Radix,
    /// On-disk B+ tree; the index survives process restarts untouched.
    BPlusTree,
}

/// Which [`IOManager`](crate::storage::io::IOManager) a data file is
/// opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IOType {
    /// Positional reads/writes through a standard file handle.
    Standard,
    /// Read-only memory-mapped file, used only during startup recovery.
    MemoryMap,
}

/// Database-wide configuration (option table).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Options {
    /// Directory the engine owns; created if absent.
    pub dir_path: PathBuf,
    /// Rotation threshold in bytes for the active data file.
    pub data_file_size: u64,
    /// If true, fsync the active file after every Put/Delete.
    pub sync_writes: bool,
    /// If greater than zero, fsync after this many unsynced bytes have
    /// accumulated since the last sync.
    pub bytes_per_sync: usize,
    /// Which index backend to build.
    pub index_type: IndexType,
    /// Use memory-mapped reads during startup recovery only.
    pub mmap_at_startup: bool,
    /// Minimum `reclaimable_bytes / total_bytes` ratio for `merge()` to
    /// proceed.
    pub merge_threshold_ratio: f32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dir_path: std::env::temp_dir().join("caskdb"),
            data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
            merge_threshold_ratio: 0.5,
        }
    }
}

impl Options {
    /// Builds an [`Options`] by layering an optional TOML config file over
    /// [`Options::default`] through the `config` crate. The file is
    /// entirely optional — nothing in the core requires it.
    pub fn load(dir_path: PathBuf, config_path: Option<&Path>) -> crate::error::Result<Options> {
        let defaults = Options { dir_path, ..Options::default() };
        let Some(path) = config_path else { return Ok(defaults) };

        let raw = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        let mut merged = defaults;
        if let Ok(v) = raw.get_string("data_file_size") {
            merged.data_file_size = v.parse().map_err(|_| {
                crate::error::errinput!("data_file_size must be an integer byte count")
            })?;
        }
        if let Ok(v) = raw.get_bool("sync_writes") {
            merged.sync_writes = v;
        }
        if let Ok(v) = raw.get_int("bytes_per_sync") {
            merged.bytes_per_sync = v as usize;
        }
        if let Ok(v) = raw.get_bool("mmap_at_startup") {
            merged.mmap_at_startup = v;
        }
        if let Ok(v) = raw.get_float("merge_threshold_ratio") {
            merged.merge_threshold_ratio = v as f32;
        }
        merged.validate()?;
        Ok(merged)
    }

    /// The IO backend a freshly created active file should open with:
    /// memory-mapped reads make no sense for a file about to be written
    /// to, so this only ever returns [`IOType::Standard`] and exists to
    /// keep that decision in one place.
    pub(crate) fn io_type_for_active(&self) -> IOType {
        IOType::Standard
    }

    /// The IO backend existing data files should be opened with while
    /// scanning them during startup recovery: memory-mapped if
    /// `mmap_at_startup` is set, standard otherwise. Callers reset back to
    /// [`IOType::Standard`] once recovery finishes.
    pub(crate) fn io_type_for_recovery(&self) -> IOType {
        if self.mmap_at_startup { IOType::MemoryMap } else { IOType::Standard }
    }

    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(crate::error::errinput!("dir_path must not be empty"));
        }
        if self.data_file_size == 0 {
            return Err(crate::error::errinput!("data_file_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.merge_threshold_ratio) {
            return Err(crate::error::errinput!(
                "merge_threshold_ratio must be within [0, 1], got {}",
                self.merge_threshold_ratio
            ));
        }
        Ok(())
    }
}

/// Per-batch options.
#[derive(Clone, Copy, Debug)]
pub struct WriteBatchOptions {
    /// Reject the batch if staging grows past this many operations.
    pub max_batch_num: usize,
    /// Fsync the log file after the batch commits.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        WriteBatchOptions { max_batch_num: 10_000, sync_writes: true }
    }
}

/// Options for [`super::iterator::DatabaseIterator`].
#[derive(Clone, Debug, Default)]
pub struct IteratorOptions {
    /// Only enumerate keys starting with this prefix.
    pub prefix: Vec<u8>,
    /// Enumerate in descending key order.
    pub reverse: bool,
}
