//! Exception Handling
//!
//! Single entry point for every trap out of user mode. A
//! [`ExceptionType::SyscallException`] is dispatched on the code in r2;
//! every other exception is fatal for the kernel.
//!
//! # Dispositions
//! The handler tells the run loop what became of the trapping thread:
//! - `Continue`: resume it immediately
//! - `Yielded`, `Blocked`, `Finished`: it gave up the CPU, pick another
//! - `Halt`: stop the machine
//!
//! # Fatal conditions
//! Unknown syscall codes, non-syscall exceptions and a failed start-up
//! check are reported as [`KernelFault`] and end [`Kernel::run`].

use core::fmt;
use log::error;

use crate::kernel::Kernel;
use crate::machine::{ExceptionType, Machine, BAD_VADDR_REG, PC_REG, RESULT_REG};
use crate::userprog::SpaceId;

/// What the run loop does after a trap has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Yielded,
    Blocked,
    Finished,
    Halt,
}

/// Unrecoverable kernel condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelFault {
    /// A trap other than a syscall.
    UnexpectedException {
        which: ExceptionType,
        pc: i32,
        bad_vaddr: i32,
    },
    /// A syscall code with no handler.
    UnknownSyscall(i32),
    /// A trap arrived with no thread on the CPU.
    NoCurrentThread,
    /// The running thread has no address space.
    NoAddressSpace,
    /// A process started on a thread that does not own its space id.
    StartupMismatch {
        expected: SpaceId,
        found: Option<SpaceId>,
    },
}

impl fmt::Display for KernelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedException { which, pc, bad_vaddr } => write!(
                f,
                "unexpected user mode exception {} at pc {:#x} (bad vaddr {:#x})",
                which, pc, bad_vaddr
            ),
            Self::UnknownSyscall(code) => write!(f, "unexpected system call {}", code),
            Self::NoCurrentThread => write!(f, "trap with no current thread"),
            Self::NoAddressSpace => write!(f, "current thread has no address space"),
            Self::StartupMismatch { expected, found } => write!(
                f,
                "process start for space {} on thread owning {:?}",
                expected, found
            ),
        }
    }
}

impl<M: Machine> Kernel<M> {
    /// Handle one trap out of user mode.
    ///
    /// # Arguments
    /// * `which` - the exception the machine stopped with
    ///
    /// # Returns
    /// What the run loop should do with the trapping thread, or the fatal
    /// condition that stops the kernel.
    pub fn exception_handler(&mut self, which: ExceptionType) -> Result<Disposition, KernelFault> {
        let result = match which {
            ExceptionType::SyscallException => {
                let code = self.machine.read_register(RESULT_REG);
                self.stats.syscalls += 1;
                self.dispatch(code)
            }
            _ => Err(KernelFault::UnexpectedException {
                which,
                pc: self.machine.read_register(PC_REG),
                bad_vaddr: self.machine.read_register(BAD_VADDR_REG),
            }),
        };
        if let Err(fault) = &result {
            error!(target: "kernel", "{}", fault);
        }
        result
    }
}
