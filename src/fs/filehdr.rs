//! File header
//!
//! Per-file metadata: the length in bytes and the table mapping each logical
//! sector of the file to a physical disk sector. A header occupies exactly
//! one disk sector:
//!
//! ```text
//! +-----------+-------------+------------------------------+
//! | num_bytes | num_sectors | data_sectors[NUM_DIRECT]     |
//! +-----------+-------------+------------------------------+
//!   i32 LE      i32 LE        i32 LE each, unused slots 0
//! ```
//!
//! Invariant: `data_sectors` holds exactly `ceil(num_bytes / SECTOR_SIZE)`
//! entries, each marked in the free map.

use alloc::vec::Vec;
use log::debug;

use crate::config::{MAX_FILE_SIZE, NUM_DIRECT, SECTOR_SIZE};
use crate::drivers::disk::SynchDisk;

use super::bitmap::BitMap;
use super::FsError;

const WORD: usize = core::mem::size_of::<i32>();

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    num_bytes: usize,
    data_sectors: Vec<u32>,
}

impl FileHeader {
    /// An empty header: zero bytes, no sectors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize a fresh header for a file of `file_size` bytes, taking
    /// data sectors from `free_map`. On failure neither is modified.
    pub fn allocate(&mut self, free_map: &mut BitMap, file_size: usize) -> Result<(), FsError> {
        if file_size > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }
        let num_sectors = file_size.div_ceil(SECTOR_SIZE);
        let sectors = take_sectors(free_map, num_sectors)?;
        self.num_bytes = file_size;
        self.data_sectors = sectors;
        Ok(())
    }

    /// Grow a file of `current_len` bytes by `increment` bytes, allocating
    /// whatever new sectors the larger length needs. On failure neither the
    /// header nor `free_map` is modified.
    pub fn extend(
        &mut self,
        free_map: &mut BitMap,
        current_len: usize,
        increment: usize,
    ) -> Result<(), FsError> {
        debug_assert_eq!(current_len, self.num_bytes);
        let new_len = current_len.checked_add(increment).ok_or(FsError::FileTooLarge)?;
        if new_len > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }
        let needed = new_len.div_ceil(SECTOR_SIZE).saturating_sub(self.data_sectors.len());
        let sectors = take_sectors(free_map, needed)?;
        debug!(
            target: "fs",
            "extending header from {} to {} bytes, {} new sectors",
            current_len, new_len, needed
        );
        self.data_sectors.extend(sectors);
        self.num_bytes = new_len;
        Ok(())
    }

    /// Return every data sector to `free_map`.
    pub fn deallocate(&self, free_map: &mut BitMap) -> Result<(), FsError> {
        if self.data_sectors.iter().any(|&s| !free_map.test(s as usize)) {
            return Err(FsError::Corrupt);
        }
        for &sector in &self.data_sectors {
            free_map.clear(sector as usize);
        }
        Ok(())
    }

    /// Read the header stored at `sector`.
    pub fn fetch_from(disk: &SynchDisk, sector: u32) -> Result<Self, FsError> {
        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sector(sector, &mut buf)?;

        let num_bytes = word(&buf, 0);
        let num_sectors = word(&buf, 1);
        if num_bytes < 0
            || num_sectors < 0
            || num_sectors as usize > NUM_DIRECT
            || (num_bytes as usize).div_ceil(SECTOR_SIZE) != num_sectors as usize
        {
            return Err(FsError::Corrupt);
        }
        let data_sectors = (0..num_sectors as usize)
            .map(|i| word(&buf, 2 + i) as u32)
            .collect();
        Ok(Self {
            num_bytes: num_bytes as usize,
            data_sectors,
        })
    }

    /// Write the header to `sector`.
    pub fn write_back(&self, disk: &SynchDisk, sector: u32) -> Result<(), FsError> {
        let mut buf = [0u8; SECTOR_SIZE];
        let words = [self.num_bytes as i32, self.data_sectors.len() as i32]
            .into_iter()
            .chain(self.data_sectors.iter().map(|&s| s as i32));
        for (slot, value) in buf.chunks_exact_mut(WORD).zip(words) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        disk.write_sector(sector, &buf)?;
        Ok(())
    }

    /// Physical sector holding byte `offset` of the file.
    ///
    /// # Panics
    /// Panics if `offset` lies beyond the last mapped sector.
    pub fn byte_to_sector(&self, offset: usize) -> u32 {
        self.data_sectors[offset / SECTOR_SIZE]
    }

    /// File length in bytes.
    pub fn file_length(&self) -> usize {
        self.num_bytes
    }

    pub fn num_sectors(&self) -> usize {
        self.data_sectors.len()
    }

    pub fn data_sectors(&self) -> &[u32] {
        &self.data_sectors
    }
}

/// Allocate `count` sectors from `free_map`, or none at all.
fn take_sectors(free_map: &mut BitMap, count: usize) -> Result<Vec<u32>, FsError> {
    if free_map.num_clear() < count {
        return Err(FsError::NoSpace);
    }
    (0..count)
        .map(|_| free_map.find().map(|s| s as u32).ok_or(FsError::NoSpace))
        .collect()
}

fn word(buf: &[u8], index: usize) -> i32 {
    let mut bytes = [0u8; WORD];
    bytes.copy_from_slice(&buf[index * WORD..(index + 1) * WORD]);
    i32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::disk::MemDisk;
    use alloc::boxed::Box;

    #[test]
    fn test_allocate_maps_whole_sectors() {
        let mut map = BitMap::new(64);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut map, SECTOR_SIZE + 1).unwrap();
        assert_eq!(hdr.file_length(), SECTOR_SIZE + 1);
        assert_eq!(hdr.data_sectors(), &[0, 1]);
        assert_eq!(hdr.byte_to_sector(SECTOR_SIZE), 1);
        assert_eq!(map.num_clear(), 62);
    }

    #[test]
    fn test_extend_within_last_sector_allocates_nothing() {
        let mut map = BitMap::new(64);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut map, 10).unwrap();
        hdr.extend(&mut map, 10, SECTOR_SIZE - 10).unwrap();
        assert_eq!(hdr.num_sectors(), 1);
        assert_eq!(hdr.file_length(), SECTOR_SIZE);

        hdr.extend(&mut map, SECTOR_SIZE, 1).unwrap();
        assert_eq!(hdr.num_sectors(), 2);
        assert_eq!(map.num_clear(), 62);
    }

    #[test]
    fn test_extend_failure_changes_nothing() {
        let mut map = BitMap::new(3);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut map, SECTOR_SIZE).unwrap();
        let before = (hdr.clone(), map.clone());

        assert_eq!(hdr.extend(&mut map, SECTOR_SIZE, 3 * SECTOR_SIZE), Err(FsError::NoSpace));
        assert_eq!((hdr.clone(), map.clone()), before);

        assert_eq!(hdr.extend(&mut map, SECTOR_SIZE, MAX_FILE_SIZE), Err(FsError::FileTooLarge));
        assert_eq!((hdr, map), before);
    }

    #[test]
    fn test_deallocate() {
        let mut map = BitMap::new(8);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut map, 3 * SECTOR_SIZE).unwrap();
        hdr.deallocate(&mut map).unwrap();
        assert_eq!(map.num_clear(), 8);
        assert_eq!(hdr.deallocate(&mut map), Err(FsError::Corrupt));
    }

    #[test]
    fn test_disk_format() {
        let disk = SynchDisk::new(Box::new(MemDisk::new(8)));
        let mut map = BitMap::new(8);
        map.mark(0);
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut map, 200).unwrap();
        hdr.write_back(&disk, 0).unwrap();

        let mut raw = [0u8; SECTOR_SIZE];
        disk.read_sector(0, &mut raw).unwrap();
        assert_eq!(word(&raw, 0), 200);
        assert_eq!(word(&raw, 1), 2);
        assert_eq!(word(&raw, 2), 1);
        assert_eq!(word(&raw, 3), 2);
        assert_eq!(word(&raw, 4), 0);

        assert_eq!(FileHeader::fetch_from(&disk, 0).unwrap(), hdr);
    }

    #[test]
    fn test_fetch_rejects_garbage() {
        let disk = SynchDisk::new(Box::new(MemDisk::new(2)));
        let mut raw = [0u8; SECTOR_SIZE];
        raw[..4].copy_from_slice(&500i32.to_le_bytes());
        raw[4..8].copy_from_slice(&1i32.to_le_bytes());
        disk.write_sector(1, &raw).unwrap();
        assert_eq!(FileHeader::fetch_from(&disk, 1), Err(FsError::Corrupt));
    }
}
