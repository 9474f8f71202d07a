//! Uniform Read-at / Append / Sync / Size / Close over a file, with two
//! backends: a positional-read standard file, and a read-only
//! memory-mapped file used only during startup recovery.

mod file_io;
mod mmap_io;

use std::path::Path;

pub use file_io::FileIO;
pub use mmap_io::MmapIO;

use crate::error::Result;
use crate::storage::options::IOType;

/// Abstract IO backend a [`super::data_file::DataFile`] reads and writes
/// through.
pub trait IOManager: Send + Sync {
    /// Reads into `buf` starting at byte `offset`, returning the number of
    /// bytes read (short reads at end-of-file are not an error).
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Appends `buf` to the end of the file, returning the number of bytes
    /// written.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Flushes any buffered writes to stable storage.
    fn sync(&self) -> Result<()>;

    /// Current file size in bytes.
    fn size(&self) -> u64;
}

/// Opens the IO backend named by `io_type` over `path`, creating the file
/// if it does not already exist.
pub fn open(path: &Path, io_type: IOType) -> Result<Box<dyn IOManager>> {
    match io_type {
        IOType::Standard => Ok(Box::new(FileIO::new(path)?)),
        IOType::MemoryMap => Ok(Box::new(MmapIO::new(path)?)),
    }
}
