//! Kernel Configuration
//!
//! Compile-time geometry of the disk, memory and file system, plus the
//! runtime [`KernelConfig`] handed to [`crate::kernel::Kernel::new`].
//!
//! # Build-time switches
//! - `read-from-start`: stateful [`crate::fs::OpenFile::read`] always reads
//!   from offset 0 and never moves the cursor. Used when random access is
//!   administratively disabled; off by default.

use bitflags::bitflags;
use log::LevelFilter;

/// Bytes per disk sector. Every device transfer moves exactly this much.
pub const SECTOR_SIZE: usize = 128;

/// Sectors on the default disk.
pub const NUM_SECTORS: usize = 1024;

/// Bytes per page of simulated physical memory (one sector per page).
pub const PAGE_SIZE: usize = SECTOR_SIZE;

/// Default number of physical pages.
pub const NUM_PHYS_PAGES: usize = 64;

/// Direct sector slots in a file header: what is left of one sector after
/// the two length words.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 2 * core::mem::size_of::<i32>()) / core::mem::size_of::<i32>();

/// Largest file a header can describe.
pub const MAX_FILE_SIZE: usize = NUM_DIRECT * SECTOR_SIZE;

/// Sector holding the free-map file header.
pub const FREE_MAP_SECTOR: u32 = 0;

/// Sector holding the directory file header.
pub const DIRECTORY_SECTOR: u32 = 1;

/// Longest file name a directory entry stores.
pub const FILE_NAME_MAX_LEN: usize = 9;

/// Entries in the flat root directory.
pub const NUM_DIR_ENTRIES: usize = 10;

/// Bytes reserved for each user stack.
pub const USER_STACK_SIZE: usize = 1024;

/// Default bound on strings copied in from user memory.
pub const MAX_PATH_LEN: usize = 64;

/// Most address spaces alive at once.
pub const MAX_SPACES: usize = 128;

bitflags! {
    /// Subsystems whose trace output is enabled.
    ///
    /// Mirrors the classic single-letter debug flags; see [`DebugFlags::parse`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DebugFlags: u32 {
        /// `f`: file system and open files.
        const FILESYS = 1 << 0;
        /// `d`: sector transfers.
        const DISK = 1 << 1;
        /// `t`: thread and scheduler events.
        const THREAD = 1 << 2;
        /// `a`: address space construction.
        const ADDRSPACE = 1 << 3;
        /// `s`: system call dispatch.
        const SYSCALL = 1 << 4;
        /// `m`: simulated machine.
        const MACHINE = 1 << 5;
    }
}

impl DebugFlags {
    /// Parse a flag string such as `"fd"` or `"+"` (everything).
    ///
    /// Unknown letters are ignored.
    pub fn parse(letters: &str) -> Self {
        letters.chars().fold(Self::empty(), |flags, c| {
            flags
                | match c {
                    '+' => Self::all(),
                    'f' => Self::FILESYS,
                    'd' => Self::DISK,
                    't' => Self::THREAD,
                    'a' => Self::ADDRSPACE,
                    's' => Self::SYSCALL,
                    'm' => Self::MACHINE,
                    _ => Self::empty(),
                }
        })
    }

    /// Flag guarding a log target, if the target belongs to a subsystem.
    pub fn for_target(target: &str) -> Option<Self> {
        let subsystem = target.rsplit("::").next().unwrap_or(target);
        match subsystem {
            "fs" => Some(Self::FILESYS),
            "disk" => Some(Self::DISK),
            "thread" => Some(Self::THREAD),
            "addrspace" => Some(Self::ADDRSPACE),
            "syscall" => Some(Self::SYSCALL),
            "machine" => Some(Self::MACHINE),
            _ => None,
        }
    }
}

/// What `Exec` does when the executable cannot be opened or loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecFailurePolicy {
    /// Write `-1` into the result register and advance the PC, so the
    /// caller continues after the trap and can test the result.
    #[default]
    ReturnError,
    /// Leave the registers untouched and return without advancing the PC.
    /// The faulting instruction traps again when the thread resumes.
    Retrap,
}

/// Runtime kernel configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Pages of simulated physical memory available to user programs.
    pub physical_pages: usize,
    /// Bound on names copied in from user memory.
    pub max_path_len: usize,
    /// Behavior of a failed `Exec`.
    pub exec_failure: ExecFailurePolicy,
    /// Subsystems traced at `debug`/`trace` level.
    pub debug: DebugFlags,
    /// Most verbose level the kernel logger emits.
    pub log_level: LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            physical_pages: NUM_PHYS_PAGES,
            max_path_len: MAX_PATH_LEN,
            exec_failure: ExecFailurePolicy::default(),
            debug: DebugFlags::empty(),
            log_level: LevelFilter::Info,
        }
    }
}

impl KernelConfig {
    pub fn with_physical_pages(mut self, pages: usize) -> Self {
        self.physical_pages = pages;
        self
    }

    pub fn with_max_path_len(mut self, len: usize) -> Self {
        self.max_path_len = len;
        self
    }

    pub fn with_exec_failure(mut self, policy: ExecFailurePolicy) -> Self {
        self.exec_failure = policy;
        self
    }

    pub fn with_debug(mut self, flags: DebugFlags) -> Self {
        self.debug = flags;
        self
    }

    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// Whether the stateful read path ignores the cursor.
    pub const fn read_from_start() -> bool {
        cfg!(feature = "read-from-start")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fits_one_sector() {
        assert_eq!(NUM_DIRECT, 30);
        assert_eq!((2 + NUM_DIRECT) * 4, SECTOR_SIZE);
    }

    #[test]
    fn test_debug_flag_parsing() {
        assert_eq!(DebugFlags::parse("fd"), DebugFlags::FILESYS | DebugFlags::DISK);
        assert_eq!(DebugFlags::parse("+"), DebugFlags::all());
        assert_eq!(DebugFlags::parse("xyz"), DebugFlags::empty());
    }

    #[test]
    fn test_target_mapping() {
        assert_eq!(DebugFlags::for_target("fs"), Some(DebugFlags::FILESYS));
        assert_eq!(DebugFlags::for_target("minos::syscall"), Some(DebugFlags::SYSCALL));
        assert_eq!(DebugFlags::for_target("boot"), None);
    }

    #[test]
    fn test_builder() {
        let config = KernelConfig::default()
            .with_physical_pages(8)
            .with_exec_failure(ExecFailurePolicy::Retrap);
        assert_eq!(config.physical_pages, 8);
        assert_eq!(config.exec_failure, ExecFailurePolicy::Retrap);
        assert_eq!(config.max_path_len, MAX_PATH_LEN);
    }
}
