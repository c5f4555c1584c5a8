//! Kernel
//!
//! Owns the machine, the file system and every process, and runs the
//! cooperative loop: pick the next ready thread, put it on the CPU, run user
//! code until it traps, handle the trap, repeat. Context switches happen
//! only at `Yield`, a blocking `Join` and `Exit`.

use alloc::sync::Arc;
use core::fmt;
use log::{debug, error, info, warn};

use crate::config::{KernelConfig, MAX_SPACES, PAGE_SIZE};
use crate::drivers::console::ConsoleDevice;
use crate::drivers::disk::SynchDisk;
use crate::exception::{Disposition, KernelFault};
use crate::fs::{BitMap, FileSystem, FsError};
use crate::machine::{advance_pc, Machine, RESULT_REG};
use crate::threads::{Resume, Scheduler, Thread};
use crate::userprog::{AddrSpace, FileTable, LoadError, SpaceId};

/// Why [`Kernel::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// A user program called `Halt`.
    Halted,
    /// No thread is ready to run.
    Idle,
}

/// Why a program could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// The executable could not be opened.
    Open(FsError),
    /// Every space id is in use.
    NoSpaceIds,
    Load(LoadError),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "cannot open executable: {}", e),
            Self::NoSpaceIds => write!(f, "too many processes"),
            Self::Load(e) => write!(f, "cannot load executable: {}", e),
        }
    }
}

/// Kernel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub syscalls: u64,
    pub context_switches: u64,
    pub processes_started: u64,
    pub console_bytes_read: u64,
    pub console_bytes_written: u64,
}

impl Statistics {
    /// Print the counters, with the disk's transfer counts.
    pub fn print(&self, disk: &SynchDisk) {
        crate::kprintln!("Syscalls: {}, context switches: {}", self.syscalls, self.context_switches);
        crate::kprintln!("Processes started: {}", self.processes_started);
        crate::kprintln!("Disk I/O: reads {}, writes {}", disk.reads(), disk.writes());
        crate::kprintln!(
            "Console I/O: reads {}, writes {}",
            self.console_bytes_read,
            self.console_bytes_written
        );
    }
}

pub struct Kernel<M: Machine> {
    pub(crate) config: KernelConfig,
    pub(crate) machine: M,
    pub(crate) file_system: FileSystem,
    pub(crate) scheduler: Scheduler,
    /// Free physical pages.
    pub(crate) frames: BitMap,
    pub(crate) space_ids: BitMap,
    pub(crate) console: Arc<dyn ConsoleDevice>,
    pub(crate) stats: Statistics,
}

impl<M: Machine> Kernel<M> {
    pub fn new(
        config: KernelConfig,
        mut machine: M,
        file_system: FileSystem,
        console: Arc<dyn ConsoleDevice>,
    ) -> Self {
        let available = machine.main_memory().len() / PAGE_SIZE;
        if available < config.physical_pages {
            warn!(
                target: "kernel",
                "machine has {} pages, {} configured",
                available, config.physical_pages
            );
        }
        let frames = BitMap::new(config.physical_pages.min(available));
        let mut space_ids = BitMap::new(MAX_SPACES);
        // id 0 is never handed out
        space_ids.mark(0);
        Self {
            config,
            machine,
            file_system,
            scheduler: Scheduler::new(),
            frames,
            space_ids,
            console,
            stats: Statistics::default(),
        }
    }

    /// Load `path` into a new address space and make its thread ready.
    pub fn exec(&mut self, path: &str) -> Result<SpaceId, ExecError> {
        let executable = self.file_system.open(path).map_err(ExecError::Open)?;
        let space_id = match self.space_ids.find() {
            Some(id) => id,
            None => {
                // joiners leave the wait list when their target finishes, so
                // no parked Join refers to a terminated thread
                debug!(target: "kernel", "out of space ids, reaping terminated threads");
                self.reap_terminated();
                self.space_ids.find().ok_or(ExecError::NoSpaceIds)?
            }
        };
        let loaded = AddrSpace::load(
            &executable,
            space_id as SpaceId,
            &mut self.frames,
            &mut self.machine,
            self.console.clone(),
        );
        executable.close();

        let space = loaded.map_err(|e| {
            self.space_ids.clear(space_id);
            ExecError::Load(e)
        })?;
        let thread = self.scheduler.fork(Thread::new(path, space));
        self.stats.processes_started += 1;
        info!(target: "kernel", "started \"{}\" as space {} on thread {}", path, space_id, thread);
        Ok(space_id as SpaceId)
    }

    /// Run threads until the machine halts or nothing is runnable.
    pub fn run(&mut self) -> Result<Shutdown, KernelFault> {
        loop {
            if self.scheduler.find_next_to_run().is_none() {
                let blocked = self.scheduler.num_blocked();
                if blocked > 0 {
                    warn!(target: "kernel", "{} threads blocked with nothing runnable", blocked);
                }
                info!(target: "kernel", "No threads ready or runnable, and no pending interrupts.");
                return Ok(Shutdown::Idle);
            }
            self.stats.context_switches += 1;
            self.switch_to().map_err(|fault| {
                error!(target: "kernel", "{}", fault);
                fault
            })?;

            loop {
                let which = self.machine.run();
                match self.exception_handler(which)? {
                    Disposition::Continue => {}
                    Disposition::Yielded | Disposition::Blocked | Disposition::Finished => break,
                    Disposition::Halt => return Ok(Shutdown::Halted),
                }
            }
        }
    }

    /// Put the newly selected thread on the CPU according to its
    /// continuation.
    fn switch_to(&mut self) -> Result<(), KernelFault> {
        let thread = self
            .scheduler
            .current_mut()
            .ok_or(KernelFault::NoCurrentThread)?;
        let resume = thread.resume();
        let owner = thread.user_program_id();
        let wait_exit_code = thread.wait_exit_code().unwrap_or(0);
        let space = thread.space_mut().ok_or(KernelFault::NoAddressSpace)?;

        match resume {
            Resume::StartProcess(space_id) => {
                if owner != Some(space_id) || space.space_id() != space_id {
                    return Err(KernelFault::StartupMismatch {
                        expected: space_id,
                        found: owner,
                    });
                }
                space.init_registers(&mut self.machine);
                space.restore_state(&mut self.machine);
                debug!(target: "thread", "starting user program in space {}", space_id);
            }
            Resume::UserCode => space.restore_state(&mut self.machine),
            Resume::JoinComplete => {
                space.restore_state(&mut self.machine);
                self.machine.write_register(RESULT_REG, wait_exit_code);
                advance_pc(&mut self.machine);
                debug!(target: "thread", "join complete with code {}", wait_exit_code);
            }
        }
        thread.set_resume(Resume::UserCode);
        Ok(())
    }

    /// Snapshot the running thread's registers into its address space.
    pub(crate) fn save_user_state(&mut self) -> Result<(), KernelFault> {
        let thread = self
            .scheduler
            .current_mut()
            .ok_or(KernelFault::NoCurrentThread)?;
        let space = thread.space_mut().ok_or(KernelFault::NoAddressSpace)?;
        space.save_state(&self.machine);
        Ok(())
    }

    /// Open file table of the running process.
    pub(crate) fn current_files(&mut self) -> Result<&mut FileTable, KernelFault> {
        let thread = self
            .scheduler
            .current_mut()
            .ok_or(KernelFault::NoCurrentThread)?;
        let space = thread.space_mut().ok_or(KernelFault::NoAddressSpace)?;
        Ok(space.files_mut())
    }

    /// Destroy every terminated thread and free their space ids.
    pub fn reap_terminated(&mut self) -> usize {
        let mut reaped = self.scheduler.empty_terminated_list();
        for thread in reaped.iter_mut() {
            if let Some(space) = thread.take_space() {
                space.release(&mut self.frames);
            }
            if let Some(space_id) = thread.user_program_id() {
                self.space_ids.clear(space_id as usize);
            }
        }
        info!(target: "kernel", "reaped {} terminated threads", reaped.len());
        reaped.len()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn file_system(&self) -> &FileSystem {
        &self.file_system
    }

    pub fn file_system_mut(&mut self) -> &mut FileSystem {
        &mut self.file_system
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    /// Physical pages not owned by any address space.
    pub fn free_frames(&self) -> usize {
        self.frames.num_clear()
    }
}
