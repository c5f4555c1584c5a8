//! Thread control blocks
//!
//! Kernel threads here are continuations rather than stacks: a thread that
//! is not running records in [`Resume`] what the kernel must do to put it
//! back on the CPU.

use alloc::string::String;
use core::fmt;

use crate::userprog::{AddrSpace, SpaceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub(super) u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    JustCreated,
    Ready,
    Running,
    Blocked,
    Finished,
}

/// How a thread continues when it is next switched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// First run of a process: check that the thread owns `SpaceId`, set
    /// fresh registers, then enter user mode.
    StartProcess(SpaceId),
    /// Restore the saved user registers and continue.
    UserCode,
    /// Restore, then finish the pending `Join`: the wait exit code goes in
    /// the result register and the PC moves past the trap.
    JoinComplete,
}

pub struct Thread {
    id: ThreadId,
    name: String,
    status: ThreadStatus,
    space: Option<AddrSpace>,
    space_id: Option<SpaceId>,
    exit_code: Option<i32>,
    wait_exit_code: Option<i32>,
    resume: Resume,
}

impl Thread {
    /// A thread that will run the user program loaded in `space`.
    pub fn new(name: &str, space: AddrSpace) -> Self {
        let space_id = space.space_id();
        Self {
            id: ThreadId(0),
            name: String::from(name),
            status: ThreadStatus::JustCreated,
            space: Some(space),
            space_id: Some(space_id),
            exit_code: None,
            wait_exit_code: None,
            resume: Resume::StartProcess(space_id),
        }
    }

    /// A thread owning `space_id` with no address space behind it.
    #[cfg(test)]
    pub(crate) fn detached(name: &str, space_id: SpaceId) -> Self {
        Self {
            id: ThreadId(0),
            name: String::from(name),
            status: ThreadStatus::JustCreated,
            space: None,
            space_id: Some(space_id),
            exit_code: None,
            wait_exit_code: None,
            resume: Resume::StartProcess(space_id),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub(super) fn set_id(&mut self, id: ThreadId) {
        self.id = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    pub(super) fn set_status(&mut self, status: ThreadStatus) {
        self.status = status;
    }

    /// The space id this thread was created for. Survives teardown of the
    /// address space itself.
    pub fn user_program_id(&self) -> Option<SpaceId> {
        self.space_id
    }

    pub fn space(&self) -> Option<&AddrSpace> {
        self.space.as_ref()
    }

    pub fn space_mut(&mut self) -> Option<&mut AddrSpace> {
        self.space.as_mut()
    }

    /// Detach the address space for teardown.
    pub fn take_space(&mut self) -> Option<AddrSpace> {
        self.space.take()
    }

    pub fn set_exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Exit code collected by the last `Join` this thread made.
    pub fn wait_exit_code(&self) -> Option<i32> {
        self.wait_exit_code
    }

    pub fn set_wait_exit_code(&mut self, code: i32) {
        self.wait_exit_code = Some(code);
    }

    pub fn resume(&self) -> Resume {
        self.resume
    }

    pub fn set_resume(&mut self, resume: Resume) {
        self.resume = resume;
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("space_id", &self.space_id)
            .field("exit_code", &self.exit_code)
            .finish()
    }
}
