//! System Call Interface
//!
//! User programs trap with the call code in r2 and up to four arguments in
//! r4-r7. Results go back in r2, and the PC is advanced past the trap before
//! the program resumes.
//!
//! # Syscalls
//! - 0: halt() - stop the machine
//! - 1: exit(status) - terminate the calling process
//! - 2: exec(name) -> space id, or -1
//! - 3: join(space id) -> exit code of that process, or -1
//! - 4: create(name) -> 0, or -1
//! - 5: open(name) -> open file id, or -1
//! - 6: read(buf, size, id) -> bytes read, or -1
//! - 7: write(buf, size, id) -> bytes written, or -1
//! - 8: close(id) -> 0, or -1
//! - 9: fork() - not supported, fatal
//! - 10: yield() - give up the CPU
//!
//! Every argument is validated: user pointers go through the machine's
//! translation and strings are bounded.

mod handler;
mod validate;

use core::fmt;

pub use validate::{copy_in, copy_out, copy_string_in, MAX_USER_BUFFER};

/// System call numbers
pub mod numbers {
    pub const SC_HALT: i32 = 0;
    pub const SC_EXIT: i32 = 1;
    pub const SC_EXEC: i32 = 2;
    pub const SC_JOIN: i32 = 3;
    pub const SC_CREATE: i32 = 4;
    pub const SC_OPEN: i32 = 5;
    pub const SC_READ: i32 = 6;
    pub const SC_WRITE: i32 = 7;
    pub const SC_CLOSE: i32 = 8;
    pub const SC_FORK: i32 = 9;
    pub const SC_YIELD: i32 = 10;
}

/// Exit code that makes `Exit` reap every terminated thread first.
pub const REAP_EXIT_CODE: i32 = 99;

/// What user programs see for any failed call.
pub const SYSCALL_FAILURE: i32 = -1;

/// Why a syscall argument was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// Bad address (unmapped or misaligned user pointer)
    Efault,
    /// Invalid argument
    Einval,
    /// Bad open file id
    Ebadf,
    /// String not terminated within the allowed length
    Enametoolong,
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Efault => write!(f, "bad user address"),
            Self::Einval => write!(f, "invalid argument"),
            Self::Ebadf => write!(f, "bad open file id"),
            Self::Enametoolong => write!(f, "name too long"),
        }
    }
}
