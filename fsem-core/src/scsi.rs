//! Block storage behind the emulated SCSI controller.
//!
//! The hosted program addresses the disk in 256-byte sectors. The backing
//! store only needs positioned reads and writes; `FileBlockStore` uses a disk
//! image file and `MemoryBlockStore` keeps everything in a `Vec` for tests.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::FsemResult;

/// Sector size of the emulated disk.
pub const SECTOR_SIZE: usize = 256;

/// Random-access byte store backing the SCSI disk.
pub trait BlockStore: Send {
    /// Read up to `buf.len()` bytes at `offset`. Returns bytes read; fewer
    /// than requested means the end of the store was reached.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `data` at `offset`. Returns bytes written.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize>;

    /// Push buffered writes to the backing medium.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Disk image file opened for reading and writing.
pub struct FileBlockStore {
    file: File,
}

impl FileBlockStore {
    /// Open an existing image. The file is never created or truncated.
    pub fn open(path: impl AsRef<Path>) -> FsemResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl BlockStore for FileBlockStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// In-memory disk image. Writes past the end grow it.
#[derive(Debug, Default, Clone)]
pub struct MemoryBlockStore {
    data: Vec<u8>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with `sectors` zeroed sectors.
    pub fn with_sectors(sectors: usize) -> Self {
        Self {
            data: vec![0; sectors * SECTOR_SIZE],
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl BlockStore for MemoryBlockStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = (offset as usize).min(self.data.len());
        let end = (start + buf.len()).min(self.data.len());
        let n = end - start;
        buf[..n].copy_from_slice(&self.data[start..end]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize> {
        let start = offset as usize;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_short_read() {
        let mut store = MemoryBlockStore::with_sectors(1);
        store.data_mut()[SECTOR_SIZE - 1] = 0x55;
        let mut buf = [0u8; 16];
        assert_eq!(store.read_at(SECTOR_SIZE as u64 - 1, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x55);
    }

    #[test]
    fn test_memory_store_write_grows() {
        let mut store = MemoryBlockStore::new();
        assert_eq!(store.write_at(512, &[1, 2, 3]).unwrap(), 3);
        assert_eq!(store.data().len(), 515);
        assert_eq!(&store.data()[512..], &[1, 2, 3]);
    }

    #[test]
    fn test_file_store_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; SECTOR_SIZE * 4]).unwrap();

        let mut store = FileBlockStore::open(tmp.path()).unwrap();
        let sector = [0xA5u8; SECTOR_SIZE];
        assert_eq!(store.write_at(2 * SECTOR_SIZE as u64, &sector).unwrap(), SECTOR_SIZE);
        store.flush().unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(store.read_at(2 * SECTOR_SIZE as u64, &mut buf).unwrap(), SECTOR_SIZE);
        assert_eq!(buf, sector);

        // Reading across the end returns what exists.
        let mut big = [0u8; SECTOR_SIZE * 2];
        assert_eq!(store.read_at(3 * SECTOR_SIZE as u64, &mut big).unwrap(), SECTOR_SIZE);
    }

    #[test]
    fn test_file_store_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileBlockStore::open(dir.path().join("missing.dat")).is_err());
    }
}
