//! Read-only memory-mapped file IO, used only during startup recovery
//! (`mmap_at_startup`) where scanning benefits from the kernel's
//! page cache and random access patterns, and no writer is active yet.

use std::fs::OpenOptions;
use std::path::Path;

use memmap2::Mmap;

use super::IOManager;
use crate::error::{Error, Result};

pub struct MmapIO {
    map: Option<Mmap>,
}

impl MmapIO {
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).create(true).open(path)?;
        let len = file.metadata()?.len();
        // `Mmap::map` requires a non-empty file on some platforms.
        let map = if len == 0 { None } else { Some(unsafe { Mmap::map(&file)? }) };
        Ok(MmapIO { map })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl IOManager for MmapIO {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.bytes();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Internal("mmap IO backend is read-only".into()))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> u64 {
        self.bytes().len() as u64
    }
}
