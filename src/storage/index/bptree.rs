//! Persistent B+ tree index backend: the index itself is
//! durable, stored in its own `jammdb` database under
//! `<dir_path>/bptree-index/`. Because the index survives a restart on
//! disk, startup recovery for this variant only needs to recover the
//! active file's write offset, not replay every record.

use std::path::Path;

use jammdb::DB;

use super::{IndexIterator, Indexer};
use crate::error::{Error, Result};
use crate::storage::log_record::LogRecordPos;

const BUCKET_NAME: &str = "caskdb-index";
pub const BPTREE_DIR_NAME: &str = "bptree-index";
const BPTREE_FILE_NAME: &str = "index.db";

pub struct BPlusTreeIndex {
    db: DB,
}

impl BPlusTreeIndex {
    pub fn open(dir_path: &Path) -> Result<Self> {
        let index_dir = dir_path.join(BPTREE_DIR_NAME);
        std::fs::create_dir_all(&index_dir)?;
        let db = DB::open(index_dir.join(BPTREE_FILE_NAME))
            .map_err(|e| Error::Internal(format!("opening bptree index: {e}")))?;
        let tx = db.tx(true).map_err(|e| Error::Internal(e.to_string()))?;
        tx.get_or_create_bucket(BUCKET_NAME).map_err(|e| Error::Internal(e.to_string()))?;
        tx.commit().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(BPlusTreeIndex { db })
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let tx = self.db.tx(true).map_err(tx_err)?;
        let bucket = tx.get_or_create_bucket(BUCKET_NAME).map_err(tx_err)?;
        let old = bucket
            .get(key.as_slice())
            .and_then(|data| LogRecordPos::decode(data.kv().value()).ok());
        bucket.put(key, pos.encode()).map_err(tx_err)?;
        tx.commit().map_err(tx_err)?;
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        let tx = self.db.tx(false).map_err(tx_err)?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(tx_err)?;
        Ok(bucket.get(key).and_then(|data| LogRecordPos::decode(data.kv().value()).ok()))
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        let tx = self.db.tx(true).map_err(tx_err)?;
        let bucket = tx.get_or_create_bucket(BUCKET_NAME).map_err(tx_err)?;
        let old = match bucket.delete(key) {
            Ok(data) => LogRecordPos::decode(data.kv().value()).ok(),
            Err(_) => None,
        };
        tx.commit().map_err(tx_err)?;
        let existed = old.is_some();
        Ok((old, existed))
    }

    fn size(&self) -> Result<usize> {
        let tx = self.db.tx(false).map_err(tx_err)?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(tx_err)?;
        Ok(bucket.kv_pairs().count())
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let tx = self.db.tx(false).map_err(tx_err)?;
        let bucket = tx.get_bucket(BUCKET_NAME).map_err(tx_err)?;
        let mut items: Vec<(Vec<u8>, LogRecordPos)> = bucket
            .kv_pairs()
            .filter_map(|kv| {
                let pos = LogRecordPos::decode(kv.value()).ok()?;
                Some((kv.key().to_vec(), pos))
            })
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        if reverse {
            items.reverse();
        }
        Ok(Box::new(BPlusTreeIterator { items, reverse, index: 0 }))
    }
}

/// Wraps a `jammdb` transaction/bucket error as an [`Error::Internal`],
/// the same treatment [`BPlusTreeIndex::open`] gives them.
fn tx_err(e: impl std::fmt::Display) -> Error {
    Error::Internal(e.to_string())
}

struct BPlusTreeIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    reverse: bool,
    index: usize,
}

impl IndexIterator for BPlusTreeIterator {
    fn rewind(&mut self) {
        self.index = 0;
    }

    fn seek(&mut self, target: &[u8]) {
        self.index = self.items.partition_point(|(k, _)| {
            if self.reverse { k.as_slice() > target } else { k.as_slice() < target }
        });
    }

    fn next(&mut self) {
        self.index += 1;
    }

    fn valid(&self) -> bool {
        self.index < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.index].0
    }

    fn value(&self) -> LogRecordPos {
        self.items[self.index].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::index::test_contract;

    #[test]
    fn satisfies_index_contract() {
        let dir = tempfile::tempdir().unwrap();
        let index = BPlusTreeIndex::open(dir.path()).unwrap();
        test_contract::exercise(&index);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = BPlusTreeIndex::open(dir.path()).unwrap();
            index.put(b"durable".to_vec(), test_contract::pos(3, 7)).unwrap();
        }
        let reopened = BPlusTreeIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.get(b"durable").unwrap(), Some(test_contract::pos(3, 7)));
    }
}
