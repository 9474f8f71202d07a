//! Ordered-tree index backend: the default,
//! fully in-memory variant.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{IndexIterator, Indexer};
use crate::error::Result;
use crate::storage::log_record::LogRecordPos;

pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        BTreeIndex { tree: RwLock::new(BTreeMap::new()) }
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        let old = self.tree.write().remove(key);
        let existed = old.is_some();
        Ok((old, existed))
    }

    fn size(&self) -> Result<usize> {
        Ok(self.tree.read().len())
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let mut items: Vec<(Vec<u8>, LogRecordPos)> =
            self.tree.read().iter().map(|(k, v)| (k.clone(), *v)).collect();
        if reverse {
            items.reverse();
        }
        Ok(Box::new(BTreeIterator { items, reverse, index: 0 }))
    }
}

struct BTreeIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    reverse: bool,
    index: usize,
}

impl IndexIterator for BTreeIterator {
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
        test_contract::exercise(&BTreeIndex::new());
    }

    #[test]
    fn seek_positions_at_lower_bound() {
        let index = BTreeIndex::new();
        index.put(b"a".to_vec(), test_contract::pos(1, 0)).unwrap();
        index.put(b"c".to_vec(), test_contract::pos(1, 1)).unwrap();
        index.put(b"e".to_vec(), test_contract::pos(1, 2)).unwrap();

        let mut it = index.iterator(false).unwrap();
        it.seek(b"b");
        assert_eq!(it.key(), b"c");

        let mut it = index.iterator(true).unwrap();
        it.seek(b"d");
        assert_eq!(it.key(), b"c");
    }
}
