//! Per-process open file table
//!
//! Ids 0 and 1 are the console input and output pseudo-files and exist from
//! the start. Files opened by the program get the lowest free id above them.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use log::{debug, warn};

use crate::drivers::console::ConsoleDevice;
use crate::fs::{FsError, OpenFile};

pub type OpenFileId = i32;

pub const CONSOLE_INPUT: OpenFileId = 0;
pub const CONSOLE_OUTPUT: OpenFileId = 1;

/// Most files one process may hold open, console included.
pub const MAX_OPEN_FILES: usize = 16;

pub struct FileTable {
    files: BTreeMap<OpenFileId, OpenFile>,
}

impl FileTable {
    pub fn new(console: Arc<dyn ConsoleDevice>) -> Self {
        let mut files = BTreeMap::new();
        files.insert(CONSOLE_INPUT, OpenFile::console(console.clone()));
        files.insert(CONSOLE_OUTPUT, OpenFile::console(console));
        Self { files }
    }

    /// Add `file`, returning its id, or `None` when the table is full.
    pub fn insert(&mut self, file: OpenFile) -> Option<OpenFileId> {
        if self.files.len() >= MAX_OPEN_FILES {
            return None;
        }
        let id = (CONSOLE_OUTPUT + 1..)
            .find(|id| !self.files.contains_key(id))?;
        self.files.insert(id, file);
        Some(id)
    }

    pub fn get_mut(&mut self, id: OpenFileId) -> Option<&mut OpenFile> {
        self.files.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write back and release `id`.
    pub fn close(&mut self, id: OpenFileId) -> Result<(), FsError> {
        let file = self.files.remove(&id).ok_or(FsError::NotFound)?;
        let result = file.write_back();
        file.close();
        result
    }

    /// Write back and release everything still open.
    pub fn close_all(&mut self) {
        for (id, file) in core::mem::take(&mut self.files) {
            if let Err(e) = file.write_back() {
                warn!(target: "addrspace", "write-back of open file {} failed: {}", id, e);
            }
            file.close();
        }
        debug!(target: "addrspace", "file table closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::console::MemoryConsole;
    use crate::drivers::disk::MemDisk;
    use crate::fs::FileSystem;
    use alloc::boxed::Box;

    #[test]
    fn test_console_ids_preopened() {
        let console = Arc::new(MemoryConsole::with_input(b"in"));
        let mut table = FileTable::new(console.clone());
        assert_eq!(table.len(), 2);

        table.get_mut(CONSOLE_OUTPUT).unwrap().write(b"out").unwrap();
        assert_eq!(console.output(), b"out");
        let mut buf = [0u8; 4];
        assert_eq!(table.get_mut(CONSOLE_INPUT).unwrap().read(&mut buf).unwrap(), 2);
    }

    #[test]
    fn test_ids_are_reused_lowest_first() {
        let mut fs = FileSystem::format(Box::new(MemDisk::new(64))).unwrap();
        fs.create("a", 0).unwrap();
        let mut table = FileTable::new(Arc::new(MemoryConsole::new()));

        let first = table.insert(fs.open("a").unwrap()).unwrap();
        let second = table.insert(fs.open("a").unwrap()).unwrap();
        assert_eq!((first, second), (2, 3));
        table.close(first).unwrap();
        assert_eq!(table.close(first), Err(FsError::NotFound));
        assert_eq!(table.insert(fs.open("a").unwrap()), Some(2));
    }

    #[test]
    fn test_close_writes_back_growth() {
        let mut fs = FileSystem::format(Box::new(MemDisk::new(64))).unwrap();
        fs.create("log", 0).unwrap();
        let mut table = FileTable::new(Arc::new(MemoryConsole::new()));
        let id = table.insert(fs.open("log").unwrap()).unwrap();
        table.get_mut(id).unwrap().write(b"kept").unwrap();
        table.close_all();
        assert!(table.is_empty());
        assert_eq!(fs.open("log").unwrap().length(), 4);
    }

    #[test]
    fn test_table_limit() {
        let mut fs = FileSystem::format(Box::new(MemDisk::new(64))).unwrap();
        fs.create("a", 0).unwrap();
        let mut table = FileTable::new(Arc::new(MemoryConsole::new()));
        for _ in 2..MAX_OPEN_FILES {
            assert!(table.insert(fs.open("a").unwrap()).is_some());
        }
        assert_eq!(table.insert(fs.open("a").unwrap()), None);
    }
}
