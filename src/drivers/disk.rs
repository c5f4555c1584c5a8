//! Sector storage
//!
//! [`BlockDevice`] is the raw device contract: fixed-size, whole-sector
//! transfers addressed by sector number. [`SynchDisk`] is the front end the
//! rest of the kernel uses: one transfer at a time, each call returning only
//! once the transfer is complete, with counters for the statistics.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use log::trace;
use spin::Mutex;

use crate::config::SECTOR_SIZE;

/// Errors reported by sector devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// The sector number is past the end of the device.
    SectorOutOfRange(u32),
    /// The transfer buffer is not exactly one sector long.
    BadBufferLength(usize),
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SectorOutOfRange(sector) => write!(f, "sector {} out of range", sector),
            Self::BadBufferLength(len) => {
                write!(f, "transfer buffer is {} bytes, expected {}", len, SECTOR_SIZE)
            }
        }
    }
}

/// A raw sector device.
pub trait BlockDevice: Send {
    /// Number of sectors on the device.
    fn num_sectors(&self) -> u32;

    /// Read sector `sector` into `buf`, which must be `SECTOR_SIZE` bytes.
    fn read_sector(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), DiskError>;

    /// Write `buf`, which must be `SECTOR_SIZE` bytes, to sector `sector`.
    fn write_sector(&mut self, sector: u32, buf: &[u8]) -> Result<(), DiskError>;
}

/// A zero-filled RAM disk.
#[derive(Debug, Clone)]
pub struct MemDisk {
    data: Vec<u8>,
}

impl MemDisk {
    /// Create a disk of `num_sectors` zeroed sectors.
    pub fn new(num_sectors: usize) -> Self {
        Self {
            data: vec![0; num_sectors * SECTOR_SIZE],
        }
    }

    /// Raw contents of the whole disk.
    pub fn image(&self) -> &[u8] {
        &self.data
    }

    fn range(&self, sector: u32, len: usize) -> Result<core::ops::Range<usize>, DiskError> {
        if len != SECTOR_SIZE {
            return Err(DiskError::BadBufferLength(len));
        }
        let start = sector as usize * SECTOR_SIZE;
        if start + SECTOR_SIZE > self.data.len() {
            return Err(DiskError::SectorOutOfRange(sector));
        }
        Ok(start..start + SECTOR_SIZE)
    }
}

impl BlockDevice for MemDisk {
    fn num_sectors(&self) -> u32 {
        (self.data.len() / SECTOR_SIZE) as u32
    }

    fn read_sector(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        let range = self.range(sector, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sector(&mut self, sector: u32, buf: &[u8]) -> Result<(), DiskError> {
        let range = self.range(sector, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }
}

/// Synchronous, serialized access to a [`BlockDevice`].
///
/// Each call blocks the issuing flow until its sector has been transferred;
/// concurrent callers queue on the device lock.
pub struct SynchDisk {
    device: Mutex<Box<dyn BlockDevice>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl SynchDisk {
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        Self {
            device: Mutex::new(device),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn num_sectors(&self) -> u32 {
        self.device.lock().num_sectors()
    }

    pub fn read_sector(&self, sector: u32, buf: &mut [u8]) -> Result<(), DiskError> {
        trace!(target: "disk", "read sector {}", sector);
        self.device.lock().read_sector(sector, buf)?;
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn write_sector(&self, sector: u32, buf: &[u8]) -> Result<(), DiskError> {
        trace!(target: "disk", "write sector {}", sector);
        self.device.lock().write_sector(sector, buf)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Sectors read so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Sectors written so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for SynchDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchDisk")
            .field("reads", &self.reads())
            .field("writes", &self.writes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_sector_transfer() {
        let disk = SynchDisk::new(Box::new(MemDisk::new(4)));
        let data = [0xA5u8; SECTOR_SIZE];
        disk.write_sector(3, &data).unwrap();

        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(3, &mut buf).unwrap();
        assert_eq!(buf, data);
        disk.read_sector(2, &mut buf).unwrap();
        assert_eq!(buf, [0u8; SECTOR_SIZE]);

        assert_eq!(disk.reads(), 2);
        assert_eq!(disk.writes(), 1);
    }

    #[test]
    fn test_rejects_bad_requests() {
        let disk = SynchDisk::new(Box::new(MemDisk::new(2)));
        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(disk.read_sector(2, &mut buf), Err(DiskError::SectorOutOfRange(2)));

        let mut short = [0u8; 10];
        assert_eq!(disk.read_sector(0, &mut short), Err(DiskError::BadBufferLength(10)));
        assert_eq!(disk.reads(), 0);
    }
}
