//! Minos - Instructional Kernel Core
//!
//! The file and process core of a small teaching kernel, running user
//! programs on a simulated MIPS-subset machine.
//!
//! # Components
//! - [`fs`]: sector-addressed files that grow on demand against a shared
//!   free-sector bitmap, a flat directory, and console pseudo-files
//! - [`exception`] and [`syscall`]: the trap entry point and the handlers
//!   for Halt, Exit, Exec, Join, Yield and the file calls
//! - [`threads`]: cooperative scheduling with join and reaping
//! - [`userprog`]: NOFF loading, address spaces and per-process file tables
//! - [`kernel`]: the run loop tying them together
//!
//! # Architecture
//! - `no_std` + `alloc`; the `std` feature adds the host console and the
//!   boot binary
//! - Devices behind traits: [`drivers::disk::BlockDevice`],
//!   [`drivers::console::ConsoleDevice`] and [`machine::Machine`]

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod drivers;
pub mod exception;
pub mod fs;
pub mod kernel;
pub mod logger;
pub mod machine;
pub mod syscall;
pub mod threads;
pub mod userprog;

pub use config::KernelConfig;
pub use exception::{Disposition, KernelFault};
pub use kernel::{ExecError, Kernel, Shutdown, Statistics};

/// Kernel version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
