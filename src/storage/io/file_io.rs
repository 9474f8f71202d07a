//! Standard positional-read file IO backend.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Mutex;

use super::IOManager;
use crate::error::Result;

/// Positional reads, append-only writes. A single [`Mutex`] serializes
/// writes the same way the data-file registry's write lock does; reads
/// use `pread` and need no lock.
pub struct FileIO {
    file: Mutex<File>,
}

impl FileIO {
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).append(true).create(true).open(path)?;
        Ok(FileIO { file: Mutex::new(file) })
    }
}

impl IOManager for FileIO {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let file = self.file.lock().unwrap();
        let mut total = 0;
        loop {
            match file.read_at(&mut buf[total..], offset + total as u64) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    if total == buf.len() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut file = self.file.lock().unwrap();
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> u64 {
        let file = self.file.lock().unwrap();
        file.metadata().map(|m| m.len()).unwrap_or(0)
    }
}
