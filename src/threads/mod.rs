//! Threads and scheduling

pub mod scheduler;
pub mod thread;

pub use scheduler::{JoinOutcome, Scheduler};
pub use thread::{Resume, Thread, ThreadId, ThreadStatus};
