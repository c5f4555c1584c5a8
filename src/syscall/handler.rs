//! System Call Handler
//!
//! Dispatches system calls and implements individual syscall handlers.
//!
//! Every handler that returns control to the caller writes r2 and then
//! advances the PC. The exceptions are a blocked `Join`, completed when the
//! joiner is next switched to, and a failed `Exec` under
//! [`ExecFailurePolicy::Retrap`].

use alloc::string::String;
use alloc::vec;
use log::{debug, info, warn};

use crate::config::ExecFailurePolicy;
use crate::exception::{Disposition, KernelFault};
use crate::kernel::Kernel;
use crate::machine::{advance_pc, Machine, ARG_REGS, RESULT_REG};
use crate::threads::JoinOutcome;
use crate::userprog::{OpenFileId, CONSOLE_INPUT, CONSOLE_OUTPUT};

use super::numbers::*;
use super::validate::{self, buffer_len};
use super::{SyscallError, REAP_EXIT_CODE, SYSCALL_FAILURE};

impl<M: Machine> Kernel<M> {
    /// Dispatch a system call
    ///
    /// # Arguments
    /// * `code` - System call number (from r2)
    ///
    /// # Security
    /// - Unknown syscall numbers are fatal
    /// - Each handler validates its own arguments
    pub(crate) fn dispatch(&mut self, code: i32) -> Result<Disposition, KernelFault> {
        debug!(target: "syscall", "syscall {} from thread {:?}", code, self.current_name());
        match code {
            SC_HALT => Ok(self.sys_halt()),
            SC_EXIT => self.sys_exit(self.arg(0)),
            SC_EXEC => self.sys_exec(self.arg(0)),
            SC_JOIN => self.sys_join(self.arg(0)),
            SC_CREATE => Ok(self.sys_create(self.arg(0))),
            SC_OPEN => self.sys_open(self.arg(0)),
            SC_READ => self.sys_read(self.arg(0), self.arg(1), self.arg(2)),
            SC_WRITE => self.sys_write(self.arg(0), self.arg(1), self.arg(2)),
            SC_CLOSE => self.sys_close(self.arg(0)),
            SC_YIELD => self.sys_yield(),
            _ => Err(KernelFault::UnknownSyscall(code)),
        }
    }

    fn arg(&self, n: usize) -> i32 {
        self.machine.read_register(ARG_REGS[n])
    }

    fn current_name(&self) -> Option<&str> {
        self.scheduler.current().map(|t| t.name())
    }

    /// Write the result and step past the trap.
    fn complete(&mut self, result: i32) -> Disposition {
        self.machine.write_register(RESULT_REG, result);
        advance_pc(&mut self.machine);
        Disposition::Continue
    }

    /// Report a rejected argument as -1.
    fn fail(&mut self, e: SyscallError) -> Disposition {
        debug!(target: "syscall", "syscall failed: {}", e);
        self.complete(SYSCALL_FAILURE)
    }

    fn sys_halt(&mut self) -> Disposition {
        info!(target: "syscall", "Shutdown, initiated by user program.");
        self.stats.print(self.file_system.disk());
        Disposition::Halt
    }

    /// Exit system call
    ///
    /// Records the exit code, tears down the address space and finishes the
    /// thread. The PC is advanced first although the thread never returns
    /// to user mode.
    fn sys_exit(&mut self, status: i32) -> Result<Disposition, KernelFault> {
        self.machine.write_register(RESULT_REG, status);
        advance_pc(&mut self.machine);

        let thread = self
            .scheduler
            .current_mut()
            .ok_or(KernelFault::NoCurrentThread)?;
        thread.set_exit_code(status);
        info!(target: "syscall", "\"{}\" exited with status {}", thread.name(), status);
        let space = thread.take_space();

        if let Some(space) = space {
            space.release(&mut self.frames);
        }
        if status == REAP_EXIT_CODE {
            self.reap_terminated();
        }
        self.scheduler.finish_current();
        Ok(Disposition::Finished)
    }

    /// Exec system call
    ///
    /// Loads the named program into a new address space and forks a thread
    /// to run it. Returns the new space id.
    fn sys_exec(&mut self, name_addr: i32) -> Result<Disposition, KernelFault> {
        let max_len = self.config.max_path_len;
        let name = match validate::copy_string_in(&mut self.machine, name_addr, max_len) {
            Ok(name) => name,
            Err(e) => {
                warn!(target: "syscall", "exec: bad file name: {}", e);
                return Ok(self.exec_failed());
            }
        };
        match self.exec(&name) {
            Ok(space_id) => {
                debug!(target: "syscall", "exec \"{}\" as space {}", name, space_id);
                Ok(self.complete(space_id))
            }
            Err(e) => {
                warn!(target: "syscall", "Unable to exec {}: {}", name, e);
                Ok(self.exec_failed())
            }
        }
    }

    fn exec_failed(&mut self) -> Disposition {
        match self.config.exec_failure {
            ExecFailurePolicy::ReturnError => self.complete(SYSCALL_FAILURE),
            ExecFailurePolicy::Retrap => Disposition::Continue,
        }
    }

    /// Join system call
    ///
    /// Returns at once if the target already exited; otherwise parks the
    /// caller with its registers saved and the PC still on the trap.
    fn sys_join(&mut self, target: i32) -> Result<Disposition, KernelFault> {
        match self.scheduler.join(target) {
            JoinOutcome::Exited(code) => {
                if let Some(thread) = self.scheduler.current_mut() {
                    thread.set_wait_exit_code(code);
                }
                Ok(self.complete(code))
            }
            JoinOutcome::Running => {
                self.save_user_state()?;
                self.scheduler.block_current_on(target);
                Ok(Disposition::Blocked)
            }
            JoinOutcome::Unknown => {
                warn!(target: "syscall", "join on unknown space {}", target);
                Ok(self.complete(SYSCALL_FAILURE))
            }
        }
    }

    fn sys_yield(&mut self) -> Result<Disposition, KernelFault> {
        advance_pc(&mut self.machine);
        self.save_user_state()?;
        self.scheduler.yield_current();
        Ok(Disposition::Yielded)
    }

    fn sys_create(&mut self, name_addr: i32) -> Disposition {
        let name = match self.user_name(name_addr) {
            Ok(name) => name,
            Err(e) => return self.fail(e),
        };
        match self.file_system.create(&name, 0) {
            Ok(()) => self.complete(0),
            Err(e) => {
                debug!(target: "syscall", "create \"{}\": {}", name, e);
                self.complete(SYSCALL_FAILURE)
            }
        }
    }

    fn sys_open(&mut self, name_addr: i32) -> Result<Disposition, KernelFault> {
        let name = match self.user_name(name_addr) {
            Ok(name) => name,
            Err(e) => return Ok(self.fail(e)),
        };
        let file = match self.file_system.open(&name) {
            Ok(file) => file,
            Err(e) => {
                debug!(target: "syscall", "open \"{}\": {}", name, e);
                return Ok(self.complete(SYSCALL_FAILURE));
            }
        };
        let id = self.current_files()?.insert(file);
        Ok(self.complete(id.unwrap_or(SYSCALL_FAILURE)))
    }

    /// Read system call
    ///
    /// # Returns
    /// Bytes read, 0 at end of file, -1 on a bad id or buffer.
    fn sys_read(&mut self, buf: i32, size: i32, id: OpenFileId) -> Result<Disposition, KernelFault> {
        let len = match buffer_len(size) {
            Ok(len) if id != CONSOLE_OUTPUT => len,
            Ok(_) => return Ok(self.fail(SyscallError::Ebadf)),
            Err(e) => return Ok(self.fail(e)),
        };
        let mut data = vec![0u8; len];
        let read = match self.current_files()?.get_mut(id) {
            Some(file) => {
                let console = file.is_console();
                file.read(&mut data).map(|n| (n, console)).ok()
            }
            None => None,
        };
        let Some((n, console)) = read else {
            return Ok(self.fail(SyscallError::Ebadf));
        };
        if console {
            self.stats.console_bytes_read += n as u64;
        }
        Ok(match validate::copy_out(&mut self.machine, buf, &data[..n]) {
            Ok(()) => self.complete(n as i32),
            Err(e) => self.fail(e),
        })
    }

    /// Write system call
    ///
    /// # Returns
    /// Bytes written, -1 on a bad id or buffer or a failed disk write.
    fn sys_write(&mut self, buf: i32, size: i32, id: OpenFileId) -> Result<Disposition, KernelFault> {
        if id == CONSOLE_INPUT {
            return Ok(self.fail(SyscallError::Ebadf));
        }
        let data = match validate::copy_in(&mut self.machine, buf, size) {
            Ok(data) => data,
            Err(e) => return Ok(self.fail(e)),
        };
        let written = match self.current_files()?.get_mut(id) {
            Some(_) if data.is_empty() => Some((0, false)),
            Some(file) => {
                let console = file.is_console();
                file.write(&data).map(|n| (n, console)).ok()
            }
            None => return Ok(self.fail(SyscallError::Ebadf)),
        };
        match written {
            Some((n, console)) => {
                if console {
                    self.stats.console_bytes_written += n as u64;
                }
                Ok(self.complete(n as i32))
            }
            None => Ok(self.complete(SYSCALL_FAILURE)),
        }
    }

    fn sys_close(&mut self, id: OpenFileId) -> Result<Disposition, KernelFault> {
        let result = self.current_files()?.close(id);
        Ok(match result {
            Ok(()) => self.complete(0),
            Err(e) => {
                debug!(target: "syscall", "close {}: {}", id, e);
                self.complete(SYSCALL_FAILURE)
            }
        })
    }

    fn user_name(&mut self, addr: i32) -> Result<String, SyscallError> {
        let max_len = self.config.max_path_len;
        validate::copy_string_in(&mut self.machine, addr, max_len)
    }
}
