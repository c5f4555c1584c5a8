//! Cooperative scheduler
//!
//! FIFO ready queue, one running thread, joiners parked per target space
//! id, and a list of terminated threads kept until they are reaped so that
//! a late `Join` can still collect the exit code.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use log::debug;

use crate::userprog::SpaceId;

use super::thread::{Resume, Thread, ThreadId, ThreadStatus};

/// What a `Join` on a space id found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The target already terminated with this exit code.
    Exited(i32),
    /// The target is alive; the caller must block.
    Running,
    /// No thread owns the space id, or it has been reaped, or it is the
    /// caller itself.
    Unknown,
}

pub struct Scheduler {
    threads: BTreeMap<ThreadId, Thread>,
    ready: VecDeque<ThreadId>,
    current: Option<ThreadId>,
    joiners: BTreeMap<SpaceId, Vec<ThreadId>>,
    terminated: Vec<ThreadId>,
    next_id: u32,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            threads: BTreeMap::new(),
            ready: VecDeque::new(),
            current: None,
            joiners: BTreeMap::new(),
            terminated: Vec::new(),
            next_id: 1,
        }
    }

    /// Make `thread` runnable. It starts with its current [`Resume`].
    pub fn fork(&mut self, mut thread: Thread) -> ThreadId {
        let id = ThreadId(self.next_id);
        self.next_id += 1;
        thread.set_id(id);
        thread.set_status(ThreadStatus::Ready);
        debug!(target: "thread", "forking thread {} \"{}\"", id, thread.name());
        self.threads.insert(id, thread);
        self.ready.push_back(id);
        id
    }

    /// Dequeue the next ready thread and mark it running.
    pub fn find_next_to_run(&mut self) -> Option<ThreadId> {
        debug_assert!(self.current.is_none(), "switching with a thread still running");
        let id = self.ready.pop_front()?;
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.set_status(ThreadStatus::Running);
            debug!(target: "thread", "switching to thread {} \"{}\"", id, thread.name());
        }
        self.current = Some(id);
        Some(id)
    }

    pub fn current(&self) -> Option<&Thread> {
        self.current.and_then(|id| self.threads.get(&id))
    }

    pub fn current_mut(&mut self) -> Option<&mut Thread> {
        self.current.and_then(|id| self.threads.get_mut(&id))
    }

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    /// The unreaped thread that owns `space_id`.
    pub fn thread_for_space(&self, space_id: SpaceId) -> Option<&Thread> {
        self.threads
            .values()
            .find(|t| t.user_program_id() == Some(space_id))
    }

    /// Put the running thread at the back of the ready queue.
    pub fn yield_current(&mut self) {
        if let Some(id) = self.current.take() {
            if let Some(thread) = self.threads.get_mut(&id) {
                thread.set_status(ThreadStatus::Ready);
                thread.set_resume(Resume::UserCode);
            }
            debug!(target: "thread", "yielding thread {}", id);
            self.ready.push_back(id);
        }
    }

    /// Look up `target` on behalf of the running thread.
    pub fn join(&self, target: SpaceId) -> JoinOutcome {
        if self.current().and_then(Thread::user_program_id) == Some(target) {
            return JoinOutcome::Unknown;
        }
        let Some(thread) = self.thread_for_space(target) else {
            return JoinOutcome::Unknown;
        };
        match (thread.status(), thread.exit_code()) {
            (ThreadStatus::Finished, Some(code)) => JoinOutcome::Exited(code),
            (ThreadStatus::Finished, None) => JoinOutcome::Exited(0),
            _ => JoinOutcome::Running,
        }
    }

    /// Park the running thread until the owner of `target` finishes.
    pub fn block_current_on(&mut self, target: SpaceId) {
        if let Some(id) = self.current.take() {
            if let Some(thread) = self.threads.get_mut(&id) {
                thread.set_status(ThreadStatus::Blocked);
            }
            debug!(target: "thread", "thread {} joining space {}", id, target);
            self.joiners.entry(target).or_default().push(id);
        }
    }

    /// Terminate the running thread and wake everything joined on it.
    ///
    /// Each woken joiner has its wait exit code set and resumes with
    /// [`Resume::JoinComplete`]. The finished thread stays on the
    /// terminated list until [`Scheduler::empty_terminated_list`].
    pub fn finish_current(&mut self) -> Option<ThreadId> {
        let id = self.current.take()?;
        let (space_id, code) = {
            let thread = self.threads.get_mut(&id)?;
            thread.set_status(ThreadStatus::Finished);
            (thread.user_program_id(), thread.exit_code().unwrap_or(0))
        };
        debug!(target: "thread", "finishing thread {} with code {}", id, code);
        self.terminated.push(id);

        let woken = space_id
            .and_then(|space_id| self.joiners.remove(&space_id))
            .unwrap_or_default();
        for joiner in woken {
            if let Some(thread) = self.threads.get_mut(&joiner) {
                thread.set_wait_exit_code(code);
                thread.set_resume(Resume::JoinComplete);
                thread.set_status(ThreadStatus::Ready);
                debug!(target: "thread", "waking joiner {}", joiner);
                self.ready.push_back(joiner);
            }
        }
        Some(id)
    }

    /// Threads that finished and have not been reaped.
    pub fn terminated(&self) -> &[ThreadId] {
        &self.terminated
    }

    /// Destroy every terminated thread and hand them back for cleanup.
    pub fn empty_terminated_list(&mut self) -> Vec<Thread> {
        let reaped: Vec<Thread> = self
            .terminated
            .drain(..)
            .filter_map(|id| self.threads.remove(&id))
            .collect();
        debug!(target: "thread", "reaped {} terminated threads", reaped.len());
        reaped
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Threads parked in `Join`.
    pub fn num_blocked(&self) -> usize {
        self.joiners.values().map(Vec::len).sum()
    }

    /// Threads that exist and have not been reaped.
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
