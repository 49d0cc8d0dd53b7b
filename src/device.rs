//! The block device contract the cache is layered over.
//!
//! A [`BlockDevice`] is a synchronous, sector-addressed store: fixed-size
//! reads and writes, no partial sectors, no queueing. The cache is the only
//! thing that is allowed to know about residency, dirtiness, or ordering —
//! a device just does what it's told.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

/// Size in bytes of a single addressable unit on a [`BlockDevice`].
pub const SECTOR_SIZE: usize = 512;

/// Reserved sector number meaning "no sector" / "free slot".
///
/// Callers must never pass this to [`crate::Cache::lock`] or
/// [`crate::Cache::submit_read_ahead`].
pub const INVALID_SECTOR: u32 = u32::MAX;

/// A synchronous, fixed-sector-size block device.
///
/// Implementors only need to move bytes in and out of a sector; every
/// concurrency and caching concern is the cache's job, not the device's.
pub trait BlockDevice: Send + Sync {
    /// Error type returned by a failed read or write.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reads sector `sector` into `buf`.
    fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error>;

    /// Writes `buf` to sector `sector`.
    fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error>;
}

impl<T: BlockDevice + ?Sized> BlockDevice for Arc<T> {
    type Error = T::Error;

    fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        (**self).read_sector(sector, buf)
    }

    fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        (**self).write_sector(sector, buf)
    }
}

/// An in-memory [`BlockDevice`] backed by a flat `Vec<u8>`.
///
/// Intended for tests: cheap to construct, trivially inspectable, and its
/// `Error` type is uninhabited, so callers never have to handle I/O failure.
pub struct MemoryBlockDevice {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemoryBlockDevice {
    /// Creates a device with `sector_count` zeroed sectors.
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; sector_count]),
        }
    }
}

/// [`MemoryBlockDevice`] never fails; this type has no values.
#[derive(Debug, thiserror::Error)]
pub enum MemoryDeviceError {}

impl BlockDevice for MemoryBlockDevice {
    type Error = MemoryDeviceError;

    fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let sectors = self.sectors.lock().unwrap();
        buf.copy_from_slice(&sectors[sector as usize]);
        Ok(())
    }

    fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let mut sectors = self.sectors.lock().unwrap();
        sectors[sector as usize].copy_from_slice(buf);
        Ok(())
    }
}

/// A [`BlockDevice`] backed by a real file on the host filesystem.
///
/// Sector `n` maps to byte offset `n * SECTOR_SIZE`. The file is extended
/// lazily on write if it is shorter than the sector being written.
pub struct FileBlockDevice {
    file: Mutex<File>,
}

impl FileBlockDevice {
    /// Opens (or creates) `path` for sector-addressed access.
    pub fn open(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl BlockDevice for FileBlockDevice {
    type Error = io::Error;

    fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let mut file = self.file.lock().unwrap();
        let offset = sector as u64 * SECTOR_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        match file.read(buf) {
            Ok(n) if n == SECTOR_SIZE => Ok(()),
            Ok(n) => {
                // short read past EOF: treat the unread tail as zeroed
                buf[n..].fill(0);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), Self::Error> {
        let mut file = self.file.lock().unwrap();
        let offset = sector as u64 * SECTOR_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_device_round_trips() {
        let dev = MemoryBlockDevice::new(4);
        let mut buf = [7u8; SECTOR_SIZE];
        dev.write_sector(2, &buf).unwrap();
        buf = [0u8; SECTOR_SIZE];
        dev.read_sector(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 7));
    }

    #[test]
    fn memory_device_sectors_are_independent() {
        let dev = MemoryBlockDevice::new(4);
        dev.write_sector(0, &[1u8; SECTOR_SIZE]).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        dev.read_sector(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }
}
