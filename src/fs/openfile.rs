//! Open files
//!
//! An [`OpenFile`] keeps the file's header in memory while the file is open
//! and turns byte-range requests into whole-sector transfers:
//!
//! - reads fetch every sector the range touches and copy out the part asked
//!   for;
//! - writes pre-read the first and last sectors when they are only partly
//!   covered, patch in the new bytes and write the whole span back;
//! - a write ending past end of file first grows the header against the
//!   shared free map.
//!
//! Header changes live only in memory until [`OpenFile::write_back`].
//! Closing or dropping a handle does NOT flush it: forgetting the write-back
//! loses every growth and length change made through the handle.
//!
//! The same handle type also represents the console pseudo-files, whose
//! transfers go straight to a [`ConsoleDevice`].

use alloc::sync::Arc;
use alloc::vec;
use log::debug;

use crate::config::{KernelConfig, SECTOR_SIZE};
use crate::drivers::console::{ConsoleDevice, CONSOLE};
use crate::drivers::disk::SynchDisk;

use super::filehdr::FileHeader;
use super::{FsError, Volume};

enum Backing {
    Disk {
        volume: Volume,
        hdr: FileHeader,
        header_sector: u32,
    },
    Console(Arc<dyn ConsoleDevice>),
}

/// A handle on an open file or on the console.
pub struct OpenFile {
    backing: Backing,
    seek_position: usize,
}

impl OpenFile {
    /// Open the file whose header is stored at `header_sector`.
    pub fn open(volume: Volume, header_sector: u32) -> Result<Self, FsError> {
        let hdr = FileHeader::fetch_from(volume.disk(), header_sector)?;
        Ok(Self {
            backing: Backing::Disk {
                volume,
                hdr,
                header_sector,
            },
            seek_position: 0,
        })
    }

    /// A console pseudo-file on `device`.
    pub fn console(device: Arc<dyn ConsoleDevice>) -> Self {
        Self {
            backing: Backing::Console(device),
            seek_position: 0,
        }
    }

    pub fn is_console(&self) -> bool {
        matches!(self.backing, Backing::Console(_))
    }

    /// Release the handle and its in-memory header. Does not write back.
    pub fn close(self) {}

    /// Move the cursor. Any position is accepted; past end of file the
    /// stateful calls simply transfer nothing.
    pub fn seek(&mut self, position: usize) {
        self.seek_position = position;
    }

    /// Current cursor position.
    pub fn tell(&self) -> usize {
        self.seek_position
    }

    /// Read from the cursor and advance it by the bytes read.
    ///
    /// With the `read-from-start` feature every read starts at offset 0 and
    /// the cursor is left alone.
    pub fn read(&mut self, into: &mut [u8]) -> Result<usize, FsError> {
        if self.is_console() {
            return Ok(self.read_stdin(into));
        }
        if KernelConfig::read_from_start() {
            return self.read_at(into, 0);
        }
        let result = self.read_at(into, self.seek_position)?;
        self.seek_position += result;
        Ok(result)
    }

    /// Write at the cursor and advance it by the bytes written.
    pub fn write(&mut self, from: &[u8]) -> Result<usize, FsError> {
        if self.is_console() {
            return Ok(self.write_stdout(from));
        }
        let result = self.write_at(from, self.seek_position)?;
        self.seek_position += result;
        Ok(result)
    }

    /// Read up to `into.len()` bytes starting at `position`, stopping at end
    /// of file. Returns the bytes read; zero when `into` is empty or
    /// `position` is at or past end of file. The cursor is not used.
    pub fn read_at(&self, into: &mut [u8], position: usize) -> Result<usize, FsError> {
        let Backing::Disk { volume, hdr, .. } = &self.backing else {
            return Err(FsError::NotSeekable);
        };
        let file_length = hdr.file_length();
        if into.is_empty() || position >= file_length {
            return Ok(0);
        }
        let num_bytes = into.len().min(file_length - position);
        debug!(
            target: "fs",
            "Reading {} bytes at {}, from file of length {}.",
            num_bytes, position, file_length
        );

        let first_sector = position / SECTOR_SIZE;
        let last_sector = (position + num_bytes - 1) / SECTOR_SIZE;
        let mut buf = vec![0u8; (last_sector - first_sector + 1) * SECTOR_SIZE];
        for (i, chunk) in (first_sector..=last_sector).zip(buf.chunks_exact_mut(SECTOR_SIZE)) {
            volume.disk().read_sector(hdr.byte_to_sector(i * SECTOR_SIZE), chunk)?;
        }

        let start = position - first_sector * SECTOR_SIZE;
        into[..num_bytes].copy_from_slice(&buf[start..start + num_bytes]);
        Ok(num_bytes)
    }

    /// Write all of `from` starting at `position`, growing the file when the
    /// write ends past end of file. `position` may equal the file length
    /// (append) but not exceed it.
    ///
    /// If sectors cannot be allocated, nothing changes. If the transfer
    /// fails after growth, the header and the free map are as they were, but
    /// sectors already written keep the new bytes, including ones within the
    /// old length.
    pub fn write_at(&mut self, from: &[u8], position: usize) -> Result<usize, FsError> {
        let Backing::Disk { volume, hdr, .. } = &mut self.backing else {
            return Err(FsError::NotSeekable);
        };
        let file_length = hdr.file_length();
        let num_bytes = from.len();
        if num_bytes == 0 || position > file_length {
            return Err(FsError::InvalidRequest);
        }

        let end = position + num_bytes;
        if end <= file_length {
            debug!(
                target: "fs",
                "Writing {} bytes at {}, from file of length {}.",
                num_bytes, position, file_length
            );
            write_span(volume.disk(), hdr, from, position)?;
            return Ok(num_bytes);
        }

        let free_map = volume.free_map().ok_or(FsError::NotGrowable)?;
        let mut grown = hdr.clone();
        free_map.transaction(|map| grown.extend(map, file_length, end - file_length))?;
        debug!(
            target: "fs",
            "Writing {} bytes at {}, growing file from {} to {} bytes.",
            num_bytes, position, file_length, end
        );

        if let Err(e) = write_span(volume.disk(), &grown, from, position) {
            let added = &grown.data_sectors()[hdr.num_sectors()..];
            free_map.transaction(|map| {
                for &sector in added {
                    map.clear(sector as usize);
                }
                Ok(())
            })?;
            return Err(e);
        }
        *hdr = grown;
        Ok(num_bytes)
    }

    /// File length in bytes. Console handles have length zero.
    pub fn length(&self) -> usize {
        match &self.backing {
            Backing::Disk { hdr, .. } => hdr.file_length(),
            Backing::Console(_) => 0,
        }
    }

    /// Persist the in-memory header to its sector.
    pub fn write_back(&self) -> Result<(), FsError> {
        match &self.backing {
            Backing::Disk {
                volume,
                hdr,
                header_sector,
            } => hdr.write_back(volume.disk(), *header_sector),
            Backing::Console(_) => Ok(()),
        }
    }

    /// Write `from` to standard output, bypassing the disk. Console handles
    /// use their own device; disk handles use the kernel console.
    pub fn write_stdout(&self, from: &[u8]) -> usize {
        if let Some(device) = self.console_device() {
            device.put_bytes(from);
        }
        from.len()
    }

    /// Read whatever standard input has ready, up to `into.len()` bytes.
    pub fn read_stdin(&self, into: &mut [u8]) -> usize {
        self.console_device().map_or(0, |device| device.get_bytes(into))
    }

    /// Sector holding this file's header.
    pub fn header_sector(&self) -> Option<u32> {
        match &self.backing {
            Backing::Disk { header_sector, .. } => Some(*header_sector),
            Backing::Console(_) => None,
        }
    }

    /// The in-memory header.
    pub fn header(&self) -> Option<&FileHeader> {
        match &self.backing {
            Backing::Disk { hdr, .. } => Some(hdr),
            Backing::Console(_) => None,
        }
    }

    fn console_device(&self) -> Option<Arc<dyn ConsoleDevice>> {
        match &self.backing {
            Backing::Console(device) => Some(device.clone()),
            Backing::Disk { .. } => CONSOLE.lock().device(),
        }
    }
}

/// Read-modify-write the sectors covering `[position, position + from.len())`.
fn write_span(
    disk: &SynchDisk,
    hdr: &FileHeader,
    from: &[u8],
    position: usize,
) -> Result<(), FsError> {
    let end = position + from.len();
    let first_sector = position / SECTOR_SIZE;
    let last_sector = (end - 1) / SECTOR_SIZE;
    let mut buf = vec![0u8; (last_sector - first_sector + 1) * SECTOR_SIZE];

    let first_aligned = position == first_sector * SECTOR_SIZE;
    let last_aligned = end == (last_sector + 1) * SECTOR_SIZE;

    // Keep the bytes of partly-covered end sectors.
    if !first_aligned {
        disk.read_sector(
            hdr.byte_to_sector(first_sector * SECTOR_SIZE),
            &mut buf[..SECTOR_SIZE],
        )?;
    }
    if !last_aligned && (first_sector != last_sector || first_aligned) {
        let offset = (last_sector - first_sector) * SECTOR_SIZE;
        disk.read_sector(
            hdr.byte_to_sector(last_sector * SECTOR_SIZE),
            &mut buf[offset..offset + SECTOR_SIZE],
        )?;
    }

    let start = position - first_sector * SECTOR_SIZE;
    buf[start..start + from.len()].copy_from_slice(from);

    for (i, chunk) in (first_sector..=last_sector).zip(buf.chunks_exact(SECTOR_SIZE)) {
        disk.write_sector(hdr.byte_to_sector(i * SECTOR_SIZE), chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_FILE_SIZE, NUM_SECTORS};
    use crate::drivers::console::MemoryConsole;
    use crate::drivers::disk::{BlockDevice, DiskError, MemDisk};
    use crate::fs::FileSystem;
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use core::sync::atomic::{AtomicU32, Ordering};
    use proptest::prelude::*;

    /// RAM disk whose writes to one chosen sector fail.
    struct FailingDisk {
        inner: MemDisk,
        fail_at: Arc<AtomicU32>,
    }

    impl BlockDevice for FailingDisk {
        fn num_sectors(&self) -> u32 {
            self.inner.num_sectors()
        }

        fn read_sector(&mut self, sector: u32, buf: &mut [u8]) -> Result<(), DiskError> {
            self.inner.read_sector(sector, buf)
        }

        fn write_sector(&mut self, sector: u32, buf: &[u8]) -> Result<(), DiskError> {
            if sector == self.fail_at.load(Ordering::Relaxed) {
                return Err(DiskError::SectorOutOfRange(sector));
            }
            self.inner.write_sector(sector, buf)
        }
    }

    fn fs_with(name: &str, size: usize) -> (FileSystem, OpenFile) {
        let mut fs = FileSystem::format(Box::new(MemDisk::new(NUM_SECTORS))).unwrap();
        fs.create(name, size).unwrap();
        let file = fs.open(name).unwrap();
        (fs, file)
    }

    fn contents(file: &OpenFile) -> Vec<u8> {
        let mut out = vec![0u8; file.length()];
        let n = file.read_at(&mut out, 0).unwrap();
        assert_eq!(n, out.len());
        out
    }

    #[test]
    fn test_hello_then_patch() {
        let (_fs, mut file) = fs_with("hello", 0);
        assert_eq!(file.write_at(b"hello", 0), Ok(5));
        assert_eq!(file.length(), 5);

        let mut out = [0u8; 5];
        assert_eq!(file.read_at(&mut out, 0), Ok(5));
        assert_eq!(&out, b"hello");

        assert_eq!(file.write_at(b"X", 2), Ok(1));
        assert_eq!(file.read_at(&mut out, 0), Ok(5));
        assert_eq!(&out, b"heXlo");
    }

    #[test]
    fn test_read_clamps_to_length() {
        let (_fs, mut file) = fs_with("f", 0);
        file.write_at(b"0123456789", 0).unwrap();

        let mut out = [0u8; 8];
        assert_eq!(file.read_at(&mut out, 6), Ok(4));
        assert_eq!(&out[..4], b"6789");
        assert_eq!(file.read_at(&mut out, 10), Ok(0));
        assert_eq!(file.read_at(&mut out, 1000), Ok(0));
        assert_eq!(file.read_at(&mut [], 0), Ok(0));
    }

    #[test]
    fn test_invalid_writes() {
        let (fs, mut file) = fs_with("f", 4);
        let map_before = fs.free_map().fetch();
        assert_eq!(file.write_at(b"", 0), Err(FsError::InvalidRequest));
        assert_eq!(file.write_at(b"x", 5), Err(FsError::InvalidRequest));
        assert_eq!(file.length(), 4);
        assert_eq!(fs.free_map().fetch(), map_before);

        // exactly at end of file is an append
        assert_eq!(file.write_at(b"x", 4), Ok(1));
        assert_eq!(file.length(), 5);
    }

    #[test]
    fn test_growth_allocates_each_new_sector_once() {
        let mut fs = FileSystem::format(Box::new(MemDisk::new(NUM_SECTORS))).unwrap();
        fs.create("a", 0).unwrap();
        fs.create("b", 0).unwrap();
        let mut a = fs.open("a").unwrap();
        let mut b = fs.open("b").unwrap();

        let before = fs.free_map().num_clear();
        a.write_at(&[1u8; 300], 0).unwrap();
        assert_eq!(a.length(), 300);
        assert_eq!(fs.free_map().num_clear(), before - 3);

        b.write_at(&[2u8; 200], 0).unwrap();
        let map = fs.free_map().fetch();
        let a_sectors = a.header().unwrap().data_sectors();
        let b_sectors = b.header().unwrap().data_sectors();
        assert_eq!(a_sectors.len(), 3);
        assert_eq!(b_sectors.len(), 2);
        for s in a_sectors.iter().chain(b_sectors) {
            assert!(map.test(*s as usize));
        }
        assert!(a_sectors.iter().all(|s| !b_sectors.contains(s)));

        // growing inside the last sector allocates nothing
        let before = fs.free_map().num_clear();
        a.write_at(&[3u8; 10], 300).unwrap();
        assert_eq!(a.length(), 310);
        assert_eq!(fs.free_map().num_clear(), before);
    }

    #[test]
    fn test_growth_failure_is_all_or_nothing() {
        let mut fs = FileSystem::format(Box::new(MemDisk::new(16))).unwrap();
        fs.create("small", 0).unwrap();
        let mut file = fs.open("small").unwrap();
        file.write_at(b"keep", 0).unwrap();

        let map_before = fs.free_map().fetch();
        let free = map_before.num_clear();
        let too_much = vec![9u8; (free + 2) * SECTOR_SIZE];
        assert_eq!(file.write_at(&too_much, 0), Err(FsError::NoSpace));
        assert_eq!(file.length(), 4);
        assert_eq!(fs.free_map().fetch(), map_before);
        assert_eq!(contents(&file), b"keep");
    }

    #[test]
    fn test_failed_transfer_releases_new_sectors() {
        let fail_at = Arc::new(AtomicU32::new(u32::MAX));
        let disk = FailingDisk {
            inner: MemDisk::new(NUM_SECTORS),
            fail_at: fail_at.clone(),
        };
        let mut fs = FileSystem::format(Box::new(disk)).unwrap();
        fs.create("f", 0).unwrap();
        let mut file = fs.open("f").unwrap();
        file.write_at(&[b'A'; SECTOR_SIZE], 0).unwrap();

        let map_before = fs.free_map().fetch();
        let next = map_before.clone().find().unwrap() as u32;
        fail_at.store(next, Ordering::Relaxed);

        assert_eq!(
            file.write_at(&[b'B'; 2 * SECTOR_SIZE], 0),
            Err(FsError::Disk(DiskError::SectorOutOfRange(next)))
        );
        assert_eq!(file.length(), SECTOR_SIZE);
        assert_eq!(file.header().unwrap().num_sectors(), 1);
        assert_eq!(fs.free_map().fetch(), map_before);

        fail_at.store(u32::MAX, Ordering::Relaxed);
        assert_eq!(file.write_at(&[b'C'; 2 * SECTOR_SIZE], 0), Ok(2 * SECTOR_SIZE));
        assert_eq!(contents(&file), vec![b'C'; 2 * SECTOR_SIZE]);
    }

    #[test]
    fn test_growth_past_max_file_size() {
        let (_fs, mut file) = fs_with("f", 0);
        let data = vec![0u8; MAX_FILE_SIZE + 1];
        assert_eq!(file.write_at(&data, 0), Err(FsError::FileTooLarge));
        assert_eq!(file.write_at(&data[..MAX_FILE_SIZE], 0), Ok(MAX_FILE_SIZE));
    }

    #[test]
    fn test_partial_sector_preserved() {
        let (_fs, mut file) = fs_with("f", 0);
        let original: Vec<u8> = (0..3 * SECTOR_SIZE).map(|i| i as u8).collect();
        file.write_at(&original, 0).unwrap();

        // straddles the boundary between sectors 0 and 1
        let position = SECTOR_SIZE - 3;
        file.write_at(&[0xEE; 6], position).unwrap();

        let mut expected = original.clone();
        expected[position..position + 6].fill(0xEE);
        assert_eq!(contents(&file), expected);
    }

    #[test]
    fn test_sector_traffic() {
        let (fs, mut file) = fs_with("f", 0);
        file.write_at(&[7u8; 2 * SECTOR_SIZE], 0).unwrap();

        let disk = fs.disk();
        let reads = disk.reads();
        let mut out = [0u8; 10];
        file.read_at(&mut out, SECTOR_SIZE - 5).unwrap();
        assert_eq!(disk.reads() - reads, 2);

        // aligned whole-sector write needs no pre-read
        let (reads, writes) = (disk.reads(), disk.writes());
        file.write_at(&[1u8; SECTOR_SIZE], SECTOR_SIZE).unwrap();
        assert_eq!(disk.reads(), reads);
        assert_eq!(disk.writes() - writes, 1);

        // a partial write inside one sector pre-reads it once
        let reads = disk.reads();
        file.write_at(&[1u8; 4], 2).unwrap();
        assert_eq!(disk.reads() - reads, 1);
    }

    #[test]
    fn test_length_is_stable() {
        let (_fs, file) = fs_with("f", 77);
        assert_eq!(file.length(), 77);
        assert_eq!(file.length(), 77);
    }

    #[test]
    fn test_cursor() {
        let (_fs, mut file) = fs_with("f", 0);
        assert_eq!(file.write(b"abc"), Ok(3));
        assert_eq!(file.write(b"def"), Ok(3));
        assert_eq!(file.tell(), 6);
        assert_eq!(contents(&file), b"abcdef");

        file.seek(2);
        let mut out = [0u8; 2];
        assert_eq!(file.read(&mut out), Ok(2));
        if KernelConfig::read_from_start() {
            assert_eq!(&out, b"ab");
            assert_eq!(file.tell(), 2);
        } else {
            assert_eq!(&out, b"cd");
            assert_eq!(file.tell(), 4);
        }

        // positional calls neither use nor move the cursor
        file.read_at(&mut out, 0).unwrap();
        file.write_at(b"Z", 0).unwrap();
        assert_eq!(file.tell(), if KernelConfig::read_from_start() { 2 } else { 4 });

        file.seek(100);
        if !KernelConfig::read_from_start() {
            assert_eq!(file.read(&mut out), Ok(0));
        }
        assert_eq!(file.write(b"x"), Err(FsError::InvalidRequest));
        assert_eq!(file.tell(), 100);
    }

    #[test]
    fn test_write_back_is_explicit() {
        let mut fs = FileSystem::format(Box::new(MemDisk::new(NUM_SECTORS))).unwrap();
        fs.create("f", 0).unwrap();

        let mut file = fs.open("f").unwrap();
        file.write_at(b"lost", 0).unwrap();
        file.close();
        assert_eq!(fs.open("f").unwrap().length(), 0);

        let mut file = fs.open("f").unwrap();
        file.write_at(b"kept", 0).unwrap();
        file.write_back().unwrap();
        file.close();
        let file = fs.open("f").unwrap();
        assert_eq!(contents(&file), b"kept");
    }

    #[test]
    fn test_console_handle() {
        let device = Arc::new(MemoryConsole::with_input(b"in"));
        let mut console = OpenFile::console(device.clone());
        assert!(console.is_console());
        assert_eq!(console.write(b"out"), Ok(3));
        assert_eq!(device.output(), b"out");

        let mut buf = [0u8; 4];
        assert_eq!(console.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"in");
        assert_eq!(console.read_at(&mut buf, 0), Err(FsError::NotSeekable));
        assert_eq!(console.write_at(b"x", 0), Err(FsError::NotSeekable));
        assert_eq!(console.length(), 0);
        assert_eq!(console.tell(), 0);
    }

    #[test]
    fn test_fixed_volume_cannot_grow() {
        let (fs, _) = fs_with("f", 10);
        let sector = fs.open("f").unwrap().header_sector().unwrap();
        let disk = fs.volume().disk.clone();
        let mut fixed = OpenFile::open(Volume::fixed(disk), sector).unwrap();
        assert_eq!(fixed.write_at(b"ok", 8), Ok(2));
        assert_eq!(fixed.write_at(b"no", 9), Err(FsError::NotGrowable));
    }

    proptest! {
        #[test]
        fn prop_write_then_read_round_trips(
            initial in proptest::collection::vec(any::<u8>(), 0..600),
            position_seed in any::<usize>(),
            data in proptest::collection::vec(any::<u8>(), 1..400),
        ) {
            let (_fs, mut file) = fs_with("p", 0);
            if !initial.is_empty() {
                file.write_at(&initial, 0).unwrap();
            }
            let position = position_seed % (initial.len() + 1);

            prop_assert_eq!(file.write_at(&data, position), Ok(data.len()));

            let mut expected = initial.clone();
            let end = position + data.len();
            if end > expected.len() {
                expected.resize(end, 0);
            }
            expected[position..end].copy_from_slice(&data);

            prop_assert_eq!(file.length(), expected.len());
            let mut back = vec![0u8; data.len()];
            prop_assert_eq!(file.read_at(&mut back, position), Ok(data.len()));
            prop_assert_eq!(&back, &data);
            prop_assert_eq!(contents(&file), expected);
        }
    }
}
