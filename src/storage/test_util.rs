//! Shared test data generators used throughout the engine's benchmark
//! and test suites.

use rand::Rng;

/// A deterministic, sortable test key, e.g. `caskdb-test-key-000042`.
pub(crate) fn key(i: usize) -> Vec<u8> {
    format!("caskdb-test-key-{i:06}").into_bytes()
}

/// `n` bytes of random lowercase-letter filler, for value payloads where
/// the content doesn't matter but the size does.
pub(crate) fn value(n: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(b'a'..=b'z')).collect()
}
