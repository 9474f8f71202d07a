//! Database-level iteration: a thin wrapper over an
//! [`super::index::IndexIterator`] snapshot that applies prefix
//! filtering and resolves values lazily from disk.

use super::engine::Engine;
use super::options::IteratorOptions;
use crate::error::Result;

pub struct DatabaseIterator<'a> {
    engine: &'a Engine,
    inner: Box<dyn super::index::IndexIterator + 'a>,
    prefix: Vec<u8>,
}

impl<'a> DatabaseIterator<'a> {
    pub(crate) fn new(engine: &'a Engine, options: IteratorOptions) -> Result<Self> {
        let mut inner = engine.index.iterator(options.reverse)?;
        inner.rewind();
        let mut it = DatabaseIterator { engine, inner, prefix: options.prefix };
        it.skip_to_matching_prefix();
        Ok(it)
    }

    fn skip_to_matching_prefix(&mut self) {
        if self.prefix.is_empty() {
            return;
        }
        while self.inner.valid() && !self.inner.key().starts_with(&self.prefix) {
            self.inner.next();
        }
    }

    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_to_matching_prefix();
    }

    pub fn seek(&mut self, target: &[u8]) {
        self.inner.seek(target);
        self.skip_to_matching_prefix();
    }

    pub fn next(&mut self) {
        self.inner.next();
        self.skip_to_matching_prefix();
    }

    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    pub fn value(&self) -> Result<Vec<u8>> {
        self.engine.read_value_at(self.inner.value())
    }

    pub fn close(&mut self) {
        self.inner.close();
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
        let engine = Engine::open(options).unwrap();
        (dir, engine)
    }

    #[test]
    fn filters_by_prefix() {
        let (_dir, engine) = open_test_engine();
        engine.put(b"user:1".to_vec(), b"a".to_vec()).unwrap();
        engine.put(b"user:2".to_vec(), b"b".to_vec()).unwrap();
        engine.put(b"order:1".to_vec(), b"c".to_vec()).unwrap();

        let mut it =
            engine.new_iterator(IteratorOptions { prefix: b"user:".to_vec(), reverse: false }).unwrap();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"user:1".to_vec(), b"user:2".to_vec()]);
    }

    #[test]
    fn reverse_order() {
        let (_dir, engine) = open_test_engine();
        engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();

        let mut it = engine.new_iterator(IteratorOptions { prefix: Vec::new(), reverse: true }).unwrap();
        assert_eq!(it.key(), b"b");
        assert_eq!(it.value().unwrap(), b"2");
        it.next();
        assert_eq!(it.key(), b"a");
    }
}
