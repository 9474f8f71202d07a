//! The top-level database handle: glues the active file,
//! sealed older files, the in-memory index, write batches, and the merge
//! engine into one `Put`/`Get`/`Delete`/iterate surface.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use fs4::FileExt;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use super::batch::{encode_key_with_seq, parse_key_with_seq, WriteBatch, NON_TXN_SEQ_NO};
use super::data_file::{is_eof, scan_data_file_ids, DataFile, LOCK_FILE_NAME, SEQ_NO_FILE_NAME};
use super::index::{self, Indexer};
use super::iterator::DatabaseIterator;
use super::log_record::{LogRecord, LogRecordPos, LogRecordType, TXN_FIN_KEY};
use super::merge;
use super::options::{IOType, IndexType, IteratorOptions, Options, WriteBatchOptions};
use crate::error::{errinput, Error, Result};
use crate::utils::file::{available_disk_size, copy_dir, dir_disk_size};

/// Point-in-time counters returned by [`Engine::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub key_count: usize,
    pub data_file_count: usize,
    pub reclaimable_size: u64,
    pub disk_size: u64,
}

/// An open Bitcask database. One process may hold a given
/// directory open at a time, enforced by an advisory flock on
/// `<dir>/flock`.
pub struct Engine {
    options: Options,
    active_file: RwLock<DataFile>,
    older_files: RwLock<HashMap<u32, DataFile>>,
    pub(crate) index: Box<dyn Indexer>,
    pub(crate) batch_commit_lock: Mutex<()>,
    seq_no: AtomicU64,
    pub(crate) merging: Mutex<()>,
    bytes_since_sync: AtomicUsize,
    reclaimable_size: AtomicU64,
    _lock_file: File,
}

impl Engine {
    /// Opens (creating if absent) the database rooted at
    /// `options.dir_path`, running startup recovery.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        let dir_path = options.dir_path.clone();
        if !dir_path.exists() {
            std::fs::create_dir_all(&dir_path)?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir_path.join(LOCK_FILE_NAME))?;
        lock_file.try_lock_exclusive().map_err(|_| Error::DirectoryBusy)?;

        let loaded_merge = merge::load_merge_files(&dir_path)?;
        if loaded_merge {
            info!("loaded merge results from previous run");
        }

        let mut file_ids = scan_data_file_ids(&dir_path)?;

        let index = index::new_indexer(options.index_type, &dir_path)?;

        let recovery_io_type = options.io_type_for_recovery();
        let mut older_files = HashMap::new();
        let active_file = if let Some(&active_id) = file_ids.last() {
            for &id in &file_ids[..file_ids.len() - 1] {
                let file = DataFile::open(&dir_path, id, recovery_io_type)?;
                older_files.insert(id, file);
            }
            DataFile::open(&dir_path, active_id, recovery_io_type)?
        } else {
            file_ids.push(0);
            DataFile::open(&dir_path, 0, options.io_type_for_active())?
        };

        let engine = Engine {
            options,
            active_file: RwLock::new(active_file),
            older_files: RwLock::new(older_files),
            index,
            batch_commit_lock: Mutex::new(()),
            seq_no: AtomicU64::new(NON_TXN_SEQ_NO),
            merging: Mutex::new(()),
            bytes_since_sync: AtomicUsize::new(0),
            reclaimable_size: AtomicU64::new(0),
            _lock_file: lock_file,
        };

        let non_merged_ids = merge::unmerged_file_ids(&dir_path)?;
        let loaded_from_hint =
            matches!(engine.options.index_type, IndexType::BTree | IndexType::Radix)
                && merge::load_hint_index(&dir_path, engine.index.as_ref())?;

        let max_seq_no = if engine.options.index_type == IndexType::BPlusTree {
            // The index itself is durable; only the active file's write
            // offset needs recovering.
            engine.recover_active_write_offset(&file_ids)?;
            read_seq_no_file(&dir_path)?
        } else {
            engine.load_index_from_data_files(&file_ids, &non_merged_ids, loaded_from_hint)?
        };
        engine.seq_no.store(max_seq_no, Ordering::SeqCst);

        if engine.options.mmap_at_startup {
            engine.reset_active_io_to_standard(&dir_path)?;
        }

        Ok(engine)
    }

    fn reset_active_io_to_standard(&self, dir_path: &Path) -> Result<()> {
        self.active_file.read().reset_io(dir_path, IOType::Standard)?;
        for file in self.older_files.read().values() {
            file.reset_io(dir_path, IOType::Standard)?;
        }
        Ok(())
    }

    /// Closes the database cleanly: syncs the active file and writes the
    /// sequence-number sidecar so the next [`Engine::open`] can skip
    /// reconstructing it from scratch.
    ///
    /// The sidecar is rewritten from scratch on every close: it holds only
    /// the single latest counter value, and the underlying file is
    /// append-only, so the old file is removed first rather than appended
    /// to (which would leave offset 0 holding the oldest value ever
    /// written instead of the newest).
    pub fn close(&self) -> Result<()> {
        if !self.options.dir_path.exists() {
            return Ok(());
        }
        self.active_file.read().sync()?;
        let seq_no_path = self.options.dir_path.join(SEQ_NO_FILE_NAME);
        let _ = std::fs::remove_file(&seq_no_path);
        let seq_file = DataFile::open_seq_no_file(&self.options.dir_path)?;
        let record = LogRecord {
            key: b"seq-no".to_vec(),
            value: self.seq_no.load(Ordering::SeqCst).to_string().into_bytes(),
            kind: LogRecordType::Normal,
        };
        seq_file.append(&record.encode())?;
        seq_file.sync()?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.active_file.read().sync()
    }

    /// Inserts or replaces `key`.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(errinput!("key must not be empty"));
        }
        let record = LogRecord {
            key: encode_key_with_seq(&key, NON_TXN_SEQ_NO),
            value,
            kind: LogRecordType::Normal,
        };
        let pos = self.append_log_record(&record)?;
        if let Some(old) = self.index.put(key, pos)? {
            self.reclaimable_size.fetch_add(old.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(errinput!("key must not be empty"));
        }
        let pos = self.index.get(key)?.ok_or(Error::KeyNotFound)?;
        self.read_value_at(pos)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(errinput!("key must not be empty"));
        }
        if self.index.get(key)?.is_none() {
            return Ok(());
        }
        let record = LogRecord {
            key: encode_key_with_seq(key, NON_TXN_SEQ_NO),
            value: Vec::new(),
            kind: LogRecordType::Tombstone,
        };
        let pos = self.append_log_record(&record)?;
        self.reclaimable_size.fetch_add(pos.size as u64, Ordering::SeqCst);
        let (old, _) = self.index.delete(key)?;
        if let Some(old) = old {
            self.reclaimable_size.fetch_add(old.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    /// All keys currently visible, in index order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut it = self.index.iterator(false)?;
        let mut keys = Vec::with_capacity(self.index.size()?);
        it.rewind();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        Ok(keys)
    }

    /// Visits every live key/value pair in index order, stopping early if
    /// `f` returns `false`.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        let mut it = self.index.iterator(false)?;
        it.rewind();
        while it.valid() {
            let value = self.read_value_at(it.value())?;
            if !f(it.key(), &value)? {
                break;
            }
            it.next();
        }
        Ok(())
    }

    pub fn new_iterator(&self, options: IteratorOptions) -> Result<DatabaseIterator<'_>> {
        DatabaseIterator::new(self, options)
    }

    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch::new(self, options)
    }

    /// Reclaims space held by overwritten and deleted records by rewriting
    /// still-live records into a fresh log.
    pub fn merge(&self) -> Result<()> {
        merge::merge(self)
    }

    pub fn stat(&self) -> Result<Stat> {
        Ok(Stat {
            key_count: self.index.size()?,
            data_file_count: self.older_files.read().len() + 1,
            reclaimable_size: self.reclaimable_size.load(Ordering::SeqCst),
            disk_size: dir_disk_size(&self.options.dir_path),
        })
    }

    /// Copies the whole database directory (excluding the process flock)
    /// to `dest`, for an offline or cold backup.
    pub fn backup(&self, dest: &Path) -> Result<()> {
        if available_disk_size(dest) < dir_disk_size(&self.options.dir_path) {
            return Err(errinput!("not enough free space at backup destination"));
        }
        copy_dir(&self.options.dir_path, dest, &[LOCK_FILE_NAME])
    }

    pub(crate) fn next_seq_no(&self) -> u64 {
        self.seq_no.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn update_index(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<()> {
        if let Some(old) = self.index.put(key, pos)? {
            self.reclaimable_size.fetch_add(old.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    pub(crate) fn remove_index(&self, key: &[u8]) -> Result<()> {
        if let (Some(old), _) = self.index.delete(key)? {
            self.reclaimable_size.fetch_add(old.size as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    pub(crate) fn dir_path(&self) -> &Path {
        &self.options.dir_path
    }

    pub(crate) fn data_file_size(&self) -> u64 {
        self.options.data_file_size
    }

    pub(crate) fn merge_threshold_ratio(&self) -> f32 {
        self.options.merge_threshold_ratio
    }

    /// Seals the current active file and opens a fresh one, establishing
    /// the boundary the merge engine treats as "everything up to and
    /// including this file id is eligible". Returns the
    /// sealed file's id.
    pub(crate) fn rotate_active_file(&self) -> Result<u32> {
        let mut active = self.active_file.write();
        active.sync()?;
        let old_id = active.file_id();
        let new_file = DataFile::open(&self.options.dir_path, old_id + 1, IOType::Standard)?;
        let sealed = std::mem::replace(&mut *active, new_file);
        self.older_files.write().insert(old_id, sealed);
        Ok(old_id)
    }

    pub(crate) fn read_value_at(&self, pos: LogRecordPos) -> Result<Vec<u8>> {
        let active = self.active_file.read();
        if pos.file_id == active.file_id() {
            return Ok(active.read_log_record(pos.offset)?.record.value);
        }
        let older = self.older_files.read();
        let file = older.get(&pos.file_id).ok_or(Error::KeyNotFound)?;
        Ok(file.read_log_record(pos.offset)?.record.value)
    }

    /// Appends `record` to the active file, rotating to a new active file
    /// first if it would exceed `data_file_size`.
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
        let dir_path = self.options.dir_path.clone();
        let encoded = record.encode();
        let encoded_len = encoded.len() as u64;

        let mut active = self.active_file.write();
        if active.write_off() + encoded_len > self.options.data_file_size {
            active.sync()?;
            let previous_id = active.file_id();
            let new_file = DataFile::open(&dir_path, previous_id + 1, IOType::Standard)?;
            let sealed = std::mem::replace(&mut *active, new_file);
            self.older_files.write().insert(previous_id, sealed);
        }

        let file_id = active.file_id();
        let offset = active.append(&encoded)?;

        let should_sync = self.options.sync_writes
            || {
                let prev = self.bytes_since_sync.fetch_add(encoded.len(), Ordering::SeqCst);
                self.options.bytes_per_sync > 0
                    && prev + encoded.len() >= self.options.bytes_per_sync
            };
        if should_sync {
            active.sync()?;
            self.bytes_since_sync.store(0, Ordering::SeqCst);
        }

        Ok(LogRecordPos { file_id, offset, size: encoded_len as u32 })
    }

    /// B+ tree indexes persist themselves; recovery only needs to find
    /// the active file's true write offset by scanning past its last
    /// record.
    fn recover_active_write_offset(&self, file_ids: &[u32]) -> Result<()> {
        let Some(&active_id) = file_ids.last() else { return Ok(()) };
        let active = self.active_file.read();
        debug_assert_eq!(active.file_id(), active_id);
        let mut offset = 0u64;
        loop {
            match active.read_log_record(offset) {
                Ok(read) => offset += read.size,
                Err(e) if is_eof(&e) => break,
                Err(e) => return Err(e),
            }
        }
        active.set_write_off(offset);
        Ok(())
    }

    /// Rebuilds the in-memory index by replaying every data file not
    /// already covered by a loaded hint file. Returns the
    /// highest sequence number observed, so batch commits keep
    /// allocating strictly increasing numbers across restarts.
    fn load_index_from_data_files(
        &self,
        file_ids: &[u32],
        non_merged_ids: &[u32],
        loaded_from_hint: bool,
    ) -> Result<u64> {
        if file_ids.is_empty() {
            return Ok(NON_TXN_SEQ_NO);
        }

        let mut max_seq_no = NON_TXN_SEQ_NO;
        let mut pending_txns: HashMap<u64, Vec<(Vec<u8>, LogRecord, LogRecordPos)>> =
            HashMap::new();

        for &file_id in file_ids {
            if loaded_from_hint && !non_merged_ids.contains(&file_id) {
                // already covered by the hint file produced by the last merge
                continue;
            }

            let active_id = self.active_file.read().file_id();
            let mut offset = 0u64;
            loop {
                let read = if file_id == active_id {
                    self.active_file.read().read_log_record(offset)
                } else {
                    let older = self.older_files.read();
                    let Some(file) = older.get(&file_id) else { break };
                    file.read_log_record(offset)
                };
                let read = match read {
                    Ok(read) => read,
                    Err(e) if is_eof(&e) => break,
                    Err(e) => return Err(e),
                };

                let pos = LogRecordPos { file_id, offset, size: read.size as u32 };
                let (seq_no, real_key) = parse_key_with_seq(&read.record.key)?;
                max_seq_no = max_seq_no.max(seq_no);

                if seq_no == NON_TXN_SEQ_NO {
                    self.apply_recovered_record(&real_key, read.record.kind, pos)?;
                } else if real_key == TXN_FIN_KEY && read.record.kind == LogRecordType::TxnFinished
                {
                    if let Some(staged) = pending_txns.remove(&seq_no) {
                        for (key, record, pos) in staged {
                            self.apply_recovered_record(&key, record.kind, pos)?;
                        }
                    }
                } else {
                    pending_txns.entry(seq_no).or_default().push((
                        real_key.clone(),
                        LogRecord { key: real_key, value: read.record.value, kind: read.record.kind },
                        pos,
                    ));
                }

                offset += read.size;
                if file_id == active_id {
                    self.active_file.read().set_write_off(offset);
                }
            }
        }

        if !pending_txns.is_empty() {
            warn!("discarding {} uncommitted write batch(es) found during recovery", pending_txns.len());
        }

        Ok(max_seq_no)
    }

    fn apply_recovered_record(&self, key: &[u8], kind: LogRecordType, pos: LogRecordPos) -> Result<()> {
        match kind {
            LogRecordType::Normal => {
                self.update_index(key.to_vec(), pos)?;
            }
            LogRecordType::Tombstone => {
                self.remove_index(key)?;
            }
            LogRecordType::TxnFinished => {}
        }
        Ok(())
    }
}


fn read_seq_no_file(dir_path: &Path) -> Result<u64> {
    let path = dir_path.join(SEQ_NO_FILE_NAME);
    if !path.exists() {
        return Ok(NON_TXN_SEQ_NO);
    }
    let file = DataFile::open_seq_no_file(dir_path)?;
    match file.read_log_record(0) {
        Ok(read) => {
            let text = String::from_utf8_lossy(&read.record.value);
            Ok(text.parse().unwrap_or(NON_TXN_SEQ_NO))
        }
        Err(e) if is_eof(&e) => Ok(NON_TXN_SEQ_NO),
        Err(e) => Err(e),
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("error closing database: {e}");
        }
        let _ = FileExt::unlock(&self._lock_file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::options::Options;

    fn open_test_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.dir_path = dir.path().to_path_buf();
        options.data_file_size = 64 * 1024;
        let engine = Engine::open(options).unwrap();
        (dir, engine)
    }

    #[test]
    fn put_get_delete_round_trip() {
        let (_dir, engine) = open_test_engine();
        engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"1");

        engine.put(b"a".to_vec(), b"2".to_vec()).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"2");

        engine.delete(b"a").unwrap();
        assert!(matches!(engine.get(b"a"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn empty_key_is_rejected() {
        let (_dir, engine) = open_test_engine();
        assert!(engine.put(Vec::new(), b"x".to_vec()).is_err());
        assert!(engine.get(b"").is_err());
    }

    #[test]
    fn recovers_index_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.dir_path = dir.path().to_path_buf();
        {
            let engine = Engine::open(options.clone()).unwrap();
            engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
            engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
            engine.delete(b"a").unwrap();
        }
        let engine = Engine::open(options).unwrap();
        assert!(matches!(engine.get(b"a"), Err(Error::KeyNotFound)));
        assert_eq!(engine.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn rotates_active_file_past_size_limit() {
        let (_dir, engine) = open_test_engine();
        for i in 0..2000u32 {
            engine.put(format!("key-{i}").into_bytes(), vec![0u8; 64]).unwrap();
        }
        assert!(engine.stat().unwrap().data_file_count > 1);
    }

    /// 10,000 1 KiB records with a 1 MiB rotation threshold produce
    /// roughly 11 data files, all readable after a reopen, with the
    /// iterator enumerating every key exactly once.
    #[test]
    fn large_write_survives_reopen_and_iterates_fully() {
        use crate::storage::test_util;

        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.dir_path = dir.path().to_path_buf();
        options.data_file_size = 1024 * 1024;

        {
            let engine = Engine::open(options.clone()).unwrap();
            for i in 0..10_000 {
                engine.put(test_util::key(i), test_util::value(1024)).unwrap();
            }
        }

        let engine = Engine::open(options).unwrap();
        let stat = engine.stat().unwrap();
        assert_eq!(stat.key_count, 10_000);
        assert!(stat.data_file_count >= 9 && stat.data_file_count <= 13);

        let mut it = engine.new_iterator(IteratorOptions::default()).unwrap();
        let mut count = 0;
        it.rewind();
        while it.valid() {
            count += 1;
            it.next();
        }
        assert_eq!(count, 10_000);
    }
}
