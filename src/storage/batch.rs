//! Atomic multi-key write batches.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::engine::Engine;
use super::log_record::{LogRecord, LogRecordType, TXN_FIN_KEY};
use super::options::WriteBatchOptions;
use crate::error::{errinput, Error, Result};

/// Sequence number used for writes made outside any batch. These still go
/// through [`encode_key_with_seq`] so recovery can tell a plain `Put` from
/// a record staged under a real transaction without a dedicated wire
/// flag.
pub const NON_TXN_SEQ_NO: u64 = 0;

/// A set of `Put`/`Delete` operations that become visible atomically on
/// [`WriteBatch::commit`].
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending_writes: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(engine: &'a Engine, options: WriteBatchOptions) -> Self {
        WriteBatch { engine, options, pending_writes: Mutex::new(HashMap::new()) }
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(errinput!("key must not be empty"));
        }
        let record = LogRecord { key: key.clone(), value, kind: LogRecordType::Normal };
        self.pending_writes.lock().insert(key, record);
        Ok(())
    }

    pub fn delete(&self, key: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(errinput!("key must not be empty"));
        }
        let mut pending = self.pending_writes.lock();
        if self.engine.index.get(&key)?.is_none() && !pending.contains_key(&key) {
            // nothing durable and nothing staged: deleting is a no-op
            return Ok(());
        }
        pending.insert(
            key.clone(),
            LogRecord { key, value: Vec::new(), kind: LogRecordType::Tombstone },
        );
        Ok(())
    }

    /// Commits every staged write as one atomic unit: a single sequence
    /// number shared by every record, a trailing
    /// [`LogRecordType::TxnFinished`] marker, and an index update that
    /// only runs once every record is durably appended.
    pub fn commit(&self) -> Result<()> {
        let pending = self.pending_writes.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(errinput!(
                "write batch has {} operations, exceeding max_batch_num {}",
                pending.len(),
                self.options.max_batch_num
            ));
        }

        let _guard = self.engine.batch_commit_lock.lock();
        let seq_no = self.engine.next_seq_no();

        let mut positions = HashMap::with_capacity(pending.len());
        for record in pending.values() {
            let keyed = LogRecord {
                key: encode_key_with_seq(&record.key, seq_no),
                value: record.value.clone(),
                kind: record.kind,
            };
            let pos = self.engine.append_log_record(&keyed)?;
            positions.insert(record.key.clone(), pos);
        }

        let finish_record = LogRecord {
            key: encode_key_with_seq(TXN_FIN_KEY, seq_no),
            value: Vec::new(),
            kind: LogRecordType::TxnFinished,
        };
        self.engine.append_log_record(&finish_record)?;

        if self.options.sync_writes {
            self.engine.sync()?;
        }

        for (key, record) in pending.iter() {
            let pos = positions[key];
            match record.kind {
                LogRecordType::Normal => self.engine.update_index(key.clone(), pos)?,
                LogRecordType::Tombstone => self.engine.remove_index(key)?,
                LogRecordType::TxnFinished => {
                    unreachable!("staged writes are never finish markers")
                }
            }
        }

        Ok(())
    }
}

/// Folds `seq_no` into `key` as a leading unsigned varint: the transaction
/// id is carried in the on-disk record not as a dedicated field, but inside
/// the key bytes themselves.
pub fn encode_key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = bytes::BytesMut::with_capacity(10 + key.len());
    prost::encoding::encode_varint(seq_no, &mut buf);
    buf.extend_from_slice(key);
    buf.to_vec()
}

/// The inverse of [`encode_key_with_seq`].
pub fn parse_key_with_seq(keyed: &[u8]) -> Result<(u64, Vec<u8>)> {
    let mut buf = keyed;
    let seq_no = prost::encoding::decode_varint(&mut buf)
        .map_err(|e| Error::DataCorrupted(format!("invalid sequenced key: {e}")))?;
    Ok((seq_no, buf.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::engine::Engine;
    use crate::storage::options::Options;

    #[test]
    fn key_with_seq_round_trips() {
        let encoded = encode_key_with_seq(b"hello", 42);
        let (seq_no, key) = parse_key_with_seq(&encoded).unwrap();
        assert_eq!(seq_no, 42);
        assert_eq!(key, b"hello");
    }

    #[test]
    fn uncommitted_batch_is_invisible() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.dir_path = dir.path().to_path_buf();
        let engine = Engine::open(options).unwrap();

        let batch = engine.new_write_batch(WriteBatchOptions::default());
        batch.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        assert!(engine.get(b"a").is_err());

        batch.commit().unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"1");
    }

    #[test]
    fn batch_commit_is_all_or_nothing_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.dir_path = dir.path().to_path_buf();
        {
            let engine = Engine::open(options.clone()).unwrap();
            let batch = engine.new_write_batch(WriteBatchOptions::default());
            batch.put(b"x".to_vec(), b"1".to_vec()).unwrap();
            batch.put(b"y".to_vec(), b"2".to_vec()).unwrap();
            batch.commit().unwrap();
        }
        let engine = Engine::open(options).unwrap();
        assert_eq!(engine.get(b"x").unwrap(), b"1");
        assert_eq!(engine.get(b"y").unwrap(), b"2");
    }
}
