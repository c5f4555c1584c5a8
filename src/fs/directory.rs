//! Root directory
//!
//! A fixed table of name-to-header-sector entries stored in an ordinary
//! file. Each entry is `DIR_ENTRY_SIZE` bytes on disk:
//! `in_use: u8`, three pad bytes, `sector: i32 LE`, and the name padded with
//! NULs to `FILE_NAME_MAX_LEN + 1` bytes, then two pad bytes.

use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use crate::config::{FILE_NAME_MAX_LEN, NUM_DIR_ENTRIES};

use super::openfile::OpenFile;
use super::FsError;

const NAME_FIELD: usize = FILE_NAME_MAX_LEN + 1;

/// Bytes per directory entry on disk.
pub const DIR_ENTRY_SIZE: usize = 20;

/// Bytes in the directory file.
pub const DIRECTORY_FILE_SIZE: usize = DIR_ENTRY_SIZE * NUM_DIR_ENTRIES;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DirectoryEntry {
    in_use: bool,
    sector: u32,
    name: [u8; NAME_FIELD],
}

impl DirectoryEntry {
    fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD);
        &self.name[..len]
    }

    fn encode(&self, out: &mut [u8]) {
        out.fill(0);
        out[0] = self.in_use as u8;
        out[4..8].copy_from_slice(&(self.sector as i32).to_le_bytes());
        out[8..8 + NAME_FIELD].copy_from_slice(&self.name);
    }

    fn decode(raw: &[u8]) -> Self {
        let mut sector = [0u8; 4];
        sector.copy_from_slice(&raw[4..8]);
        let mut name = [0u8; NAME_FIELD];
        name.copy_from_slice(&raw[8..8 + NAME_FIELD]);
        Self {
            in_use: raw[0] != 0,
            sector: i32::from_le_bytes(sector) as u32,
            name,
        }
    }
}

/// In-memory copy of the directory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    table: Vec<DirectoryEntry>,
}

impl Directory {
    /// An empty directory with `size` slots.
    pub fn new(size: usize) -> Self {
        Self {
            table: vec![DirectoryEntry::default(); size],
        }
    }

    /// Read the table from `file`.
    pub fn fetch_from(file: &OpenFile) -> Result<Self, FsError> {
        let mut raw = vec![0u8; file.length()];
        file.read_at(&mut raw, 0)?;
        Ok(Self {
            table: raw.chunks_exact(DIR_ENTRY_SIZE).map(DirectoryEntry::decode).collect(),
        })
    }

    /// Write the table to `file`.
    pub fn write_back(&self, file: &mut OpenFile) -> Result<(), FsError> {
        let mut raw = vec![0u8; self.table.len() * DIR_ENTRY_SIZE];
        for (entry, out) in self.table.iter().zip(raw.chunks_exact_mut(DIR_ENTRY_SIZE)) {
            entry.encode(out);
        }
        file.write_at(&raw, 0)?;
        Ok(())
    }

    /// Header sector of `name`, if present.
    pub fn find(&self, name: &str) -> Option<u32> {
        self.index_of(name).map(|i| self.table[i].sector)
    }

    /// Add `name` pointing at header `sector`.
    pub fn add(&mut self, name: &str, sector: u32) -> Result<(), FsError> {
        if name.is_empty() || name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::InvalidName);
        }
        if self.index_of(name).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self
            .table
            .iter_mut()
            .find(|e| !e.in_use)
            .ok_or(FsError::DirectoryFull)?;
        let mut entry = DirectoryEntry {
            in_use: true,
            sector,
            name: [0; NAME_FIELD],
        };
        entry.name[..name.len()].copy_from_slice(name.as_bytes());
        *slot = entry;
        Ok(())
    }

    /// Remove `name`.
    pub fn remove(&mut self, name: &str) -> Result<(), FsError> {
        let index = self.index_of(name).ok_or(FsError::NotFound)?;
        self.table[index].in_use = false;
        Ok(())
    }

    /// Names in use, in slot order.
    pub fn names(&self) -> Vec<String> {
        self.table
            .iter()
            .filter(|e| e.in_use)
            .map(|e| String::from_utf8_lossy(e.name()).to_string())
            .collect()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.table
            .iter()
            .position(|e| e.in_use && e.name() == name.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_find_remove() {
        let mut dir = Directory::new(2);
        dir.add("a", 7).unwrap();
        dir.add("b", 9).unwrap();
        assert_eq!(dir.find("a"), Some(7));
        assert_eq!(dir.add("c", 11), Err(FsError::DirectoryFull));
        assert_eq!(dir.add("a", 11), Err(FsError::AlreadyExists));

        dir.remove("a").unwrap();
        assert_eq!(dir.find("a"), None);
        assert_eq!(dir.remove("a"), Err(FsError::NotFound));
        dir.add("c", 11).unwrap();
        assert_eq!(dir.names(), ["c", "b"]);
    }

    #[test]
    fn test_entry_encoding() {
        let mut dir = Directory::new(1);
        dir.add("ninechars", 300).unwrap();
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        dir.table[0].encode(&mut raw);
        assert_eq!(raw[0], 1);
        assert_eq!(&raw[4..8], &300i32.to_le_bytes());
        assert_eq!(&raw[8..17], b"ninechars");
        assert_eq!(DirectoryEntry::decode(&raw), dir.table[0]);
    }

    #[test]
    fn test_name_limits() {
        let mut dir = Directory::new(1);
        assert_eq!(dir.add("", 1), Err(FsError::InvalidName));
        assert_eq!(dir.add("tenletters", 1), Err(FsError::InvalidName));
    }
}
