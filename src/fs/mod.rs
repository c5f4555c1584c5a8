//! File system
//!
//! A flat, sector-addressed file system:
//! - sector [`FREE_MAP_SECTOR`] holds the header of the free-map file, a
//!   [`BitMap`] with one bit per disk sector
//! - sector [`DIRECTORY_SECTOR`] holds the header of the root directory file
//! - every other file is a [`FileHeader`] sector plus its data sectors
//!
//! Files are read and written through [`OpenFile`], which reconciles byte
//! ranges against whole-sector transfers and grows files on demand.
//!
//! # Shared state
//! The free-sector bitmap is the only state shared between open files. It
//! lives behind [`FreeMap`], whose [`FreeMap::transaction`] runs
//! fetch-mutate-store as one step under its lock.

mod bitmap;
mod directory;
mod filehdr;
mod openfile;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use log::{debug, info};
use spin::Mutex;

use crate::config::{DIRECTORY_SECTOR, FILE_NAME_MAX_LEN, FREE_MAP_SECTOR, NUM_DIR_ENTRIES};
use crate::drivers::disk::{BlockDevice, DiskError, SynchDisk};

pub use bitmap::BitMap;
pub use directory::{Directory, DIRECTORY_FILE_SIZE};
pub use filehdr::FileHeader;
pub use openfile::OpenFile;

/// Errors reported by the file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The underlying sector transfer failed.
    Disk(DiskError),
    /// Zero-length write, or a write starting past end of file.
    InvalidRequest,
    /// Not enough free sectors.
    NoSpace,
    /// The file would exceed the largest size a header can map.
    FileTooLarge,
    /// No file with that name.
    NotFound,
    /// A file with that name already exists.
    AlreadyExists,
    /// Every directory slot is in use.
    DirectoryFull,
    /// The name is empty or longer than the directory can store.
    InvalidName,
    /// Positional operation on a console handle.
    NotSeekable,
    /// The handle was opened without access to the free map.
    NotGrowable,
    /// On-disk metadata is inconsistent.
    Corrupt,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disk(e) => write!(f, "disk error: {}", e),
            Self::InvalidRequest => write!(f, "invalid request"),
            Self::NoSpace => write!(f, "no free sectors"),
            Self::FileTooLarge => write!(f, "file too large"),
            Self::NotFound => write!(f, "file not found"),
            Self::AlreadyExists => write!(f, "file already exists"),
            Self::DirectoryFull => write!(f, "directory full"),
            Self::InvalidName => write!(f, "invalid file name"),
            Self::NotSeekable => write!(f, "console handles are not seekable"),
            Self::NotGrowable => write!(f, "file cannot grow"),
            Self::Corrupt => write!(f, "corrupt file system metadata"),
        }
    }
}

impl From<DiskError> for FsError {
    fn from(value: DiskError) -> Self {
        Self::Disk(value)
    }
}

/// The free-sector bitmap and the file it persists to.
pub struct FreeMap {
    state: Mutex<FreeMapState>,
}

struct FreeMapState {
    bitmap: BitMap,
    file: OpenFile,
}

impl FreeMap {
    fn new(bitmap: BitMap, file: OpenFile) -> Self {
        Self {
            state: Mutex::new(FreeMapState { bitmap, file }),
        }
    }

    /// Snapshot of the current bitmap.
    pub fn fetch(&self) -> BitMap {
        self.state.lock().bitmap.clone()
    }

    /// Replace the bitmap and persist it to the free-map file.
    pub fn store(&self, bitmap: BitMap) -> Result<(), FsError> {
        let mut state = self.state.lock();
        bitmap.write_back(&mut state.file)?;
        state.bitmap = bitmap;
        Ok(())
    }

    /// Run `f` against a copy of the bitmap and commit the copy only if `f`
    /// succeeds and the copy reaches disk. On failure the shared bitmap is
    /// untouched.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut BitMap) -> Result<T, FsError>,
    ) -> Result<T, FsError> {
        let mut state = self.state.lock();
        let mut scratch = state.bitmap.clone();
        let value = f(&mut scratch)?;
        scratch.write_back(&mut state.file)?;
        state.bitmap = scratch;
        Ok(value)
    }

    /// Number of free sectors.
    pub fn num_clear(&self) -> usize {
        self.state.lock().bitmap.num_clear()
    }
}

/// What an [`OpenFile`] needs from the file system: the disk, and the free
/// map when the file may grow.
#[derive(Clone)]
pub struct Volume {
    disk: Arc<SynchDisk>,
    free_map: Option<Arc<FreeMap>>,
}

impl Volume {
    /// A volume whose files can be read and rewritten but never grown.
    pub fn fixed(disk: Arc<SynchDisk>) -> Self {
        Self { disk, free_map: None }
    }

    pub fn disk(&self) -> &SynchDisk {
        &self.disk
    }

    pub fn free_map(&self) -> Option<&FreeMap> {
        self.free_map.as_deref()
    }
}

/// The mounted file system.
pub struct FileSystem {
    volume: Volume,
    free_map: Arc<FreeMap>,
    directory_file: OpenFile,
}

impl FileSystem {
    /// Write an empty file system to `device` and mount it.
    pub fn format(device: Box<dyn BlockDevice>) -> Result<Self, FsError> {
        let disk = Arc::new(SynchDisk::new(device));
        let num_sectors = disk.num_sectors() as usize;
        info!(target: "fs", "formatting {} sectors", num_sectors);

        let mut bitmap = BitMap::new(num_sectors);
        bitmap.mark(FREE_MAP_SECTOR as usize);
        bitmap.mark(DIRECTORY_SECTOR as usize);

        let mut map_hdr = FileHeader::new();
        let map_len = bitmap.as_bytes().len();
        map_hdr.allocate(&mut bitmap, map_len)?;
        let mut dir_hdr = FileHeader::new();
        dir_hdr.allocate(&mut bitmap, DIRECTORY_FILE_SIZE)?;
        map_hdr.write_back(&disk, FREE_MAP_SECTOR)?;
        dir_hdr.write_back(&disk, DIRECTORY_SECTOR)?;

        let mut map_file = OpenFile::open(Volume::fixed(disk.clone()), FREE_MAP_SECTOR)?;
        bitmap.write_back(&mut map_file)?;

        let free_map = Arc::new(FreeMap::new(bitmap, map_file));
        let volume = Volume {
            disk,
            free_map: Some(free_map.clone()),
        };
        let mut directory_file = OpenFile::open(volume.clone(), DIRECTORY_SECTOR)?;
        Directory::new(NUM_DIR_ENTRIES).write_back(&mut directory_file)?;

        Ok(Self {
            volume,
            free_map,
            directory_file,
        })
    }

    /// Mount the file system already on `device`.
    pub fn mount(device: Box<dyn BlockDevice>) -> Result<Self, FsError> {
        let disk = Arc::new(SynchDisk::new(device));
        let map_file = OpenFile::open(Volume::fixed(disk.clone()), FREE_MAP_SECTOR)?;
        let mut bitmap = BitMap::new(disk.num_sectors() as usize);
        if map_file.length() < bitmap.as_bytes().len() {
            return Err(FsError::Corrupt);
        }
        bitmap.fetch_from(&map_file)?;

        let free_map = Arc::new(FreeMap::new(bitmap, map_file));
        let volume = Volume {
            disk,
            free_map: Some(free_map.clone()),
        };
        let directory_file = OpenFile::open(volume.clone(), DIRECTORY_SECTOR)?;
        info!(target: "fs", "mounted, {} sectors free", free_map.num_clear());

        Ok(Self {
            volume,
            free_map,
            directory_file,
        })
    }

    /// Create `name` with `initial_size` bytes of (unspecified) content.
    pub fn create(&mut self, name: &str, initial_size: usize) -> Result<(), FsError> {
        debug!(target: "fs", "creating file {}, size {}", name, initial_size);
        validate_name(name)?;

        let mut directory = Directory::fetch_from(&self.directory_file)?;
        if directory.find(name).is_some() {
            return Err(FsError::AlreadyExists);
        }

        let disk = &self.volume.disk;
        self.free_map.transaction(|map| {
            let sector = map.find().ok_or(FsError::NoSpace)? as u32;
            directory.add(name, sector)?;
            let mut hdr = FileHeader::new();
            hdr.allocate(map, initial_size)?;
            hdr.write_back(disk, sector)
        })?;
        directory.write_back(&mut self.directory_file)
    }

    /// Open `name` for reading and writing.
    pub fn open(&self, name: &str) -> Result<OpenFile, FsError> {
        debug!(target: "fs", "opening file {}", name);
        let directory = Directory::fetch_from(&self.directory_file)?;
        let sector = directory.find(name).ok_or(FsError::NotFound)?;
        OpenFile::open(self.volume.clone(), sector)
    }

    /// Delete `name` and release its sectors.
    pub fn remove(&mut self, name: &str) -> Result<(), FsError> {
        debug!(target: "fs", "removing file {}", name);
        let mut directory = Directory::fetch_from(&self.directory_file)?;
        let sector = directory.find(name).ok_or(FsError::NotFound)?;
        let hdr = FileHeader::fetch_from(&self.volume.disk, sector)?;

        self.free_map.transaction(|map| {
            hdr.deallocate(map)?;
            if !map.test(sector as usize) {
                return Err(FsError::Corrupt);
            }
            map.clear(sector as usize);
            Ok(())
        })?;
        directory.remove(name)?;
        directory.write_back(&mut self.directory_file)
    }

    /// Names of every file in the directory.
    pub fn list(&self) -> Result<Vec<String>, FsError> {
        Ok(Directory::fetch_from(&self.directory_file)?.names())
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn disk(&self) -> &SynchDisk {
        &self.volume.disk
    }

    /// The free-sector bitmap access point.
    pub fn free_map(&self) -> &FreeMap {
        &self.free_map
    }
}

fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name.len() > FILE_NAME_MAX_LEN || name.as_bytes().contains(&0) {
        return Err(FsError::InvalidName);
    }
    Ok(())
}
