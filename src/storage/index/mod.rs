//! The in-memory index abstraction: three interchangeable
//! implementations behind one [`Indexer`] contract.

mod art;
mod bptree;
mod btree;

use std::path::Path;

use super::log_record::LogRecordPos;
use super::options::IndexType;
use crate::error::Result;

/// Ordered map from key bytes to [`LogRecordPos`].
///
/// Every method is fallible: the in-memory backends never actually fail,
/// but the durable B+ tree backend opens a `jammdb` transaction per call
/// and surfaces its errors through [`Result`] instead of panicking.
pub trait Indexer: Send + Sync {
    /// Inserts or replaces `key`, returning the position it previously
    /// pointed to, if any (so callers can account for merge-reclaimable
    /// space).
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>>;

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>>;

    /// Removes `key`, returning `(previous position, existed)`.
    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)>;

    fn size(&self) -> Result<usize>;

    /// A snapshot iterator over the index taken at call time:
    /// later mutations do not affect the set or order of keys already
    /// being iterated.
    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>>;
}

/// A snapshot iterator over an [`Indexer`].
pub trait IndexIterator {
    /// Returns to the first item of the snapshot.
    fn rewind(&mut self);

    /// Positions at the first key `>= target` (forward) or `<= target`
    /// (reverse).
    fn seek(&mut self, target: &[u8]);

    /// Advances to the next item.
    fn next(&mut self);

    fn valid(&self) -> bool;

    fn key(&self) -> &[u8];

    fn value(&self) -> LogRecordPos;

    /// Releases the snapshot. Every backend here eagerly
    /// copies its key set into the iterator at construction time, so
    /// this is a no-op; it exists as an explicit lifecycle step because
    /// the contract names one, not because any current backend needs it.
    fn close(&mut self) {}
}

/// Builds the index backend named by `index_type`. B+ tree indexes are
/// durable under `dir_path/bptree-index`; the other two are purely
/// in-memory and must be rebuilt by replaying the log.
pub fn new_indexer(index_type: IndexType, dir_path: &Path) -> Result<Box<dyn Indexer>> {
    match index_type {
        IndexType::BTree => Ok(Box::new(btree::BTreeIndex::new())),
        IndexType::Radix => Ok(Box::new(art::RadixIndex::new())),
        IndexType::BPlusTree => Ok(Box::new(bptree::BPlusTreeIndex::open(dir_path)?)),
    }
}

#[cfg(test)]
pub(crate) mod test_contract {
    //! A shared battery of assertions every [`super::Indexer`]
    //! implementation must satisfy, run once per backend from each
    //! submodule's own tests.
    use super::*;

    pub(crate) fn pos(file_id: u32, offset: u64) -> LogRecordPos {
        LogRecordPos { file_id, offset, size: 10 }
    }

    pub(crate) fn exercise(index: &dyn Indexer) {
        assert_eq!(index.put(b"a".to_vec(), pos(1, 0)).unwrap(), None);
        assert_eq!(index.put(b"b".to_vec(), pos(1, 10)).unwrap(), None);
        assert_eq!(index.put(b"a".to_vec(), pos(1, 20)).unwrap(), Some(pos(1, 0)));
        assert_eq!(index.get(b"a").unwrap(), Some(pos(1, 20)));
        assert_eq!(index.size().unwrap(), 2);

        let (old, existed) = index.delete(b"b").unwrap();
        assert_eq!(old, Some(pos(1, 10)));
        assert!(existed);
        assert_eq!(index.get(b"b").unwrap(), None);
        assert_eq!(index.size().unwrap(), 1);

        let (old, existed) = index.delete(b"does-not-exist").unwrap();
        assert_eq!(old, None);
        assert!(!existed);

        index.put(b"c".to_vec(), pos(1, 30)).unwrap();
        let mut it = index.iterator(false).unwrap();
        let mut seen = Vec::new();
        it.rewind();
        while it.valid() {
            seen.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"c".to_vec()]);

        let mut it = index.iterator(true).unwrap();
        it.rewind();
        let mut seen_rev = Vec::new();
        while it.valid() {
            seen_rev.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(seen_rev, vec![b"c".to_vec(), b"a".to_vec()]);
    }
}
