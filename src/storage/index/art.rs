//! Radix-tree index backend: a byte-trie keyed on the raw key bytes.
//!
//! This is a hand-rolled trie rather than a true node4/node16/node48/
//! node256 adaptive radix tree. It keeps the same lookup/insert
//! complexity profile (bounded by key length, not key count) and the
//! same ordered-iteration property, which is all [`Indexer`] callers
//! depend on.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{IndexIterator, Indexer};
use crate::error::Result;
use crate::storage::log_record::LogRecordPos;

#[derive(Default)]
struct Node {
    value: Option<LogRecordPos>,
    children: BTreeMap<u8, Node>,
}

impl Node {
    fn insert(&mut self, key: &[u8], pos: LogRecordPos) -> Option<LogRecordPos> {
        match key.split_first() {
            None => self.value.replace(pos),
            Some((&byte, rest)) => self.children.entry(byte).or_default().insert(rest, pos),
        }
    }

    fn get(&self, key: &[u8]) -> Option<&LogRecordPos> {
        match key.split_first() {
            None => self.value.as_ref(),
            Some((&byte, rest)) => self.children.get(&byte)?.get(rest),
        }
    }

    fn remove(&mut self, key: &[u8]) -> Option<LogRecordPos> {
        match key.split_first() {
            None => self.value.take(),
            Some((&byte, rest)) => self.children.get_mut(&byte)?.remove(rest),
        }
    }

    fn collect(&self, prefix: &mut Vec<u8>, out: &mut Vec<(Vec<u8>, LogRecordPos)>) {
        if let Some(pos) = self.value {
            out.push((prefix.clone(), pos));
        }
        for (byte, child) in &self.children {
            prefix.push(*byte);
            child.collect(prefix, out);
            prefix.pop();
        }
    }
}

pub struct RadixIndex {
    root: RwLock<Node>,
    len: RwLock<usize>,
}

impl RadixIndex {
    pub fn new() -> Self {
        RadixIndex { root: RwLock::new(Node::default()), len: RwLock::new(0) }
    }
}

impl Indexer for RadixIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let old = self.root.write().insert(&key, pos);
        if old.is_none() {
            *self.len.write() += 1;
        }
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.root.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<LogRecordPos>, bool)> {
        let old = self.root.write().remove(key);
        let existed = old.is_some();
        if existed {
            *self.len.write() -= 1;
        }
        Ok((old, existed))
    }

    fn size(&self) -> Result<usize> {
        Ok(*self.len.read())
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let mut items = Vec::new();
        self.root.read().collect(&mut Vec::new(), &mut items);
        if reverse {
            items.reverse();
        }
        Ok(Box::new(RadixIterator { items, reverse, index: 0 }))
    }
}

struct RadixIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    reverse: bool,
    index: usize,
}

impl IndexIterator for RadixIterator {
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
        test_contract::exercise(&RadixIndex::new());
    }

    #[test]
    fn shares_prefixes_between_keys() {
        let index = RadixIndex::new();
        index.put(b"key-1".to_vec(), test_contract::pos(1, 0)).unwrap();
        index.put(b"key-2".to_vec(), test_contract::pos(1, 1)).unwrap();
        assert_eq!(index.get(b"key-1").unwrap(), Some(test_contract::pos(1, 0)));
        assert_eq!(index.get(b"key-2").unwrap(), Some(test_contract::pos(1, 1)));
        assert_eq!(index.get(b"key-").unwrap(), None);
    }
}
