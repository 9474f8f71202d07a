//! Merge (compaction) engine: rewrites still-live records into
//! a staging directory, leaving tombstones and overwritten values behind,
//! then swaps the result in on the *next* startup rather than live.

use std::path::{Path, PathBuf};

use log::info;

use super::batch::{encode_key_with_seq, parse_key_with_seq, NON_TXN_SEQ_NO};
use super::data_file::{
    is_eof, scan_data_file_ids, DataFile, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME,
};
use super::engine::Engine;
use super::index::Indexer;
use super::log_record::{LogRecord, LogRecordPos, LogRecordType};
use super::options::IOType;
use crate::error::{Error, Result};

const MERGE_DIR_SUFFIX: &str = "-merge";
const MERGE_BOUNDARY_KEY: &[u8] = b"merge.boundary-file-id";

/// Reclaims space held by overwritten and deleted records.
/// Concurrent merges are rejected with [`Error::MergeInProgress`]; a
/// merge below [`super::options::Options::merge_threshold_ratio`] is
/// rejected with [`Error::MergeBelowThreshold`].
pub fn merge(engine: &Engine) -> Result<()> {
    let _guard = engine.merging.try_lock().ok_or(Error::MergeInProgress)?;

    let stat = engine.stat()?;
    if !meets_merge_threshold(stat.reclaimable_size, stat.disk_size, engine.merge_threshold_ratio())
    {
        return Err(Error::MergeBelowThreshold);
    }

    let dir_path = engine.dir_path().to_path_buf();
    let merge_dir = merge_dir_path(&dir_path);
    if merge_dir.exists() {
        std::fs::remove_dir_all(&merge_dir)?;
    }
    std::fs::create_dir_all(&merge_dir)?;

    // Freezing the active file fixes the boundary: every file id at or
    // below it is a complete, immutable snapshot this merge will rewrite;
    // anything appended afterwards is "unmerged" and stays untouched.
    let boundary_file_id = engine.rotate_active_file()?;
    let source_ids: Vec<u32> =
        scan_data_file_ids(&dir_path)?.into_iter().filter(|&id| id <= boundary_file_id).collect();

    let hint_file = DataFile::open_hint_file(&merge_dir)?;
    let mut writer = MergeWriter::new(&merge_dir, engine.data_file_size())?;

    for file_id in source_ids {
        let source = DataFile::open(&dir_path, file_id, IOType::Standard)?;
        let mut offset = 0u64;
        loop {
            let read = match source.read_log_record(offset) {
                Ok(read) => read,
                Err(e) if is_eof(&e) => break,
                Err(e) => return Err(e),
            };
            let record_size = read.size;

            if read.record.kind == LogRecordType::Normal {
                let (_, real_key) = parse_key_with_seq(&read.record.key)?;
                if is_still_live(engine.index.as_ref(), &real_key, file_id, offset)? {
                    let keyed = LogRecord {
                        key: encode_key_with_seq(&real_key, NON_TXN_SEQ_NO),
                        value: read.record.value,
                        kind: LogRecordType::Normal,
                    };
                    let pos = writer.append(&keyed)?;
                    hint_file.append_hint_record(&real_key, pos)?;
                }
            }

            offset += record_size;
        }
    }

    writer.sync()?;
    hint_file.sync()?;

    let finished_file = DataFile::open_merge_finished_file(&merge_dir)?;
    let marker = LogRecord {
        key: MERGE_BOUNDARY_KEY.to_vec(),
        value: boundary_file_id.to_string().into_bytes(),
        kind: LogRecordType::Normal,
    };
    finished_file.append(&marker.encode())?;
    finished_file.sync()?;

    info!("merge complete: rewrote files up to id {boundary_file_id} into {merge_dir:?}");
    Ok(())
}

/// Whether `reclaimable / disk_size` clears `threshold`. An empty
/// database (`disk_size == 0`) always passes, since there is nothing to
/// measure a ratio against.
fn meets_merge_threshold(reclaimable: u64, disk_size: u64, threshold: f32) -> bool {
    if disk_size == 0 {
        return true;
    }
    (reclaimable as f32 / disk_size as f32) >= threshold
}

fn is_still_live(index: &dyn Indexer, key: &[u8], file_id: u32, offset: u64) -> Result<bool> {
    Ok(matches!(index.get(key)?, Some(pos) if pos.file_id == file_id && pos.offset == offset))
}

/// If a completed merge is staged from a previous run, deletes the
/// data files it superseded and moves the merged files and hint index
/// into the main directory.
/// Returns whether a merge was swapped in.
pub fn load_merge_files(dir_path: &Path) -> Result<bool> {
    let merge_dir = merge_dir_path(dir_path);
    if !merge_dir.exists() {
        return Ok(false);
    }

    let finished_marker = merge_dir.join(MERGE_FINISHED_FILE_NAME);
    if !finished_marker.exists() {
        // an incomplete merge from a run that crashed mid-merge; discard it
        std::fs::remove_dir_all(&merge_dir)?;
        return Ok(false);
    }

    let boundary_file_id = read_merge_boundary(&merge_dir)?;

    for id in scan_data_file_ids(dir_path)?.into_iter().filter(|&id| id <= boundary_file_id) {
        let path = super::data_file::data_file_name(dir_path, id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }
    let _ = std::fs::remove_file(dir_path.join(HINT_FILE_NAME));
    let _ = std::fs::remove_file(dir_path.join(MERGE_FINISHED_FILE_NAME));

    for entry in std::fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let from = entry.path();
        let to = dir_path.join(entry.file_name());
        std::fs::rename(&from, &to)?;
    }
    std::fs::remove_dir_all(&merge_dir)?;

    Ok(true)
}

/// File ids that a just-swapped-in hint file does *not* cover: those
/// written after the merge snapshot was taken, which must be replayed in
/// full during recovery.
pub fn unmerged_file_ids(dir_path: &Path) -> Result<Vec<u32>> {
    let marker = dir_path.join(MERGE_FINISHED_FILE_NAME);
    if !marker.exists() {
        return scan_data_file_ids(dir_path);
    }
    let boundary_file_id = read_merge_boundary(dir_path)?;
    Ok(scan_data_file_ids(dir_path)?.into_iter().filter(|&id| id > boundary_file_id).collect())
}

/// Loads `key -> pos` pairs from `dir_path/hint-index` straight into
/// `index`, skipping the need to replay every merged record. Returns
/// whether a hint file was present.
pub fn load_hint_index(dir_path: &Path, index: &dyn Indexer) -> Result<bool> {
    let path = dir_path.join(HINT_FILE_NAME);
    if !path.exists() {
        return Ok(false);
    }
    let hint_file = DataFile::open_hint_file(dir_path)?;
    let mut offset = 0u64;
    loop {
        let read = match hint_file.read_log_record(offset) {
            Ok(read) => read,
            Err(e) if is_eof(&e) => break,
            Err(e) => return Err(e),
        };
        let pos = LogRecordPos::decode(&read.record.value)?;
        index.put(read.record.key, pos)?;
        offset += read.size;
    }
    Ok(true)
}

fn read_merge_boundary(dir_path: &Path) -> Result<u32> {
    let finished_file = DataFile::open_merge_finished_file(dir_path)?;
    let read = finished_file.read_log_record(0)?;
    let text = String::from_utf8_lossy(&read.record.value);
    text.parse()
        .map_err(|_| Error::DataCorrupted(format!("invalid merge boundary marker: {text}")))
}

fn merge_dir_path(dir_path: &Path) -> PathBuf {
    let name = dir_path.file_name().unwrap_or_default().to_string_lossy();
    dir_path.with_file_name(format!("{name}{MERGE_DIR_SUFFIX}"))
}

struct MergeWriter {
    dir_path: PathBuf,
    data_file_size: u64,
    active: DataFile,
}

impl MergeWriter {
    fn new(dir_path: &Path, data_file_size: u64) -> Result<Self> {
        let active = DataFile::open(dir_path, 0, IOType::Standard)?;
        Ok(MergeWriter { dir_path: dir_path.to_path_buf(), data_file_size, active })
    }

    fn append(&mut self, record: &LogRecord) -> Result<LogRecordPos> {
        let encoded = record.encode();
        if self.active.write_off() + encoded.len() as u64 > self.data_file_size {
            self.active.sync()?;
            let next_id = self.active.file_id() + 1;
            self.active = DataFile::open(&self.dir_path, next_id, IOType::Standard)?;
        }
        let file_id = self.active.file_id();
        let offset = self.active.append(&encoded)?;
        Ok(LogRecordPos { file_id, offset, size: encoded.len() as u32 })
    }

    fn sync(&self) -> Result<()> {
        self.active.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::Engine;
    use crate::storage::options::{Options, WriteBatchOptions};
    use test_case::test_case;

    #[test_case(0, 100, 0.5 => true; "empty disk always allowed")]
    #[test_case(49, 100, 0.5 => false; "below ratio")]
    #[test_case(50, 100, 0.5 => true; "at ratio")]
    #[test_case(51, 100, 0.5 => true; "above ratio")]
    #[test_case(0, 0, 0.5 => true; "zero disk size always allowed")]
    fn meets_merge_threshold_boundaries(reclaimable: u64, disk_size: u64, threshold: f32) -> bool {
        meets_merge_threshold(reclaimable, disk_size, threshold)
    }

    #[test]
    fn merge_reclaims_overwritten_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.dir_path = dir.path().to_path_buf();
        options.data_file_size = 4 * 1024;
        options.merge_threshold_ratio = 0.0;

        {
            let engine = Engine::open(options.clone()).unwrap();
            for i in 0..200u32 {
                engine.put(format!("key-{i}").into_bytes(), vec![1u8; 32]).unwrap();
            }
            for i in 0..200u32 {
                engine.put(format!("key-{i}").into_bytes(), vec![2u8; 32]).unwrap();
            }
            engine.merge().unwrap();
        }

        let engine = Engine::open(options).unwrap();
        for i in 0..200u32 {
            assert_eq!(engine.get(format!("key-{i}").as_bytes()).unwrap(), vec![2u8; 32]);
        }
    }

    #[test]
    fn merge_below_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.dir_path = dir.path().to_path_buf();
        options.merge_threshold_ratio = 0.99;
        let engine = Engine::open(options).unwrap();
        engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        assert!(matches!(engine.merge(), Err(Error::MergeBelowThreshold)));
    }

    #[test]
    fn merge_preserves_batch_committed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.dir_path = dir.path().to_path_buf();
        options.merge_threshold_ratio = 0.0;

        {
            let engine = Engine::open(options.clone()).unwrap();
            let batch = engine.new_write_batch(WriteBatchOptions::default());
            batch.put(b"x".to_vec(), b"1".to_vec()).unwrap();
            batch.put(b"y".to_vec(), b"2".to_vec()).unwrap();
            batch.commit().unwrap();
            engine.merge().unwrap();
        }

        let engine = Engine::open(options).unwrap();
        assert_eq!(engine.get(b"x").unwrap(), b"1");
        assert_eq!(engine.get(b"y").unwrap(), b"2");
    }
}
