//! User programs
//!
//! Loading NOFF executables into address spaces, and the per-process state
//! that travels with them: saved registers and the open file table.

pub mod addrspace;
pub mod file_table;
pub mod noff;

use core::fmt;

use crate::fs::FsError;

pub use addrspace::{AddrSpace, SpaceId};
pub use file_table::{FileTable, OpenFileId, CONSOLE_INPUT, CONSOLE_OUTPUT};

/// Why a program could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// Reading the executable failed.
    Fs(FsError),
    /// The file is shorter than its header says.
    Truncated,
    /// Not a NOFF executable.
    BadMagic,
    /// A segment has a negative address, offset or size.
    BadSegment,
    /// Not enough free physical pages.
    OutOfMemory { needed: usize, free: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fs(e) => write!(f, "cannot read executable: {}", e),
            Self::Truncated => write!(f, "executable truncated"),
            Self::BadMagic => write!(f, "not a NOFF executable"),
            Self::BadSegment => write!(f, "malformed segment"),
            Self::OutOfMemory { needed, free } => {
                write!(f, "need {} pages, {} free", needed, free)
            }
        }
    }
}

impl From<FsError> for LoadError {
    fn from(value: FsError) -> Self {
        Self::Fs(value)
    }
}
