//! Device drivers for minos
//!
//! The kernel core consumes devices through narrow traits so that the
//! hosted build, the tests and a real board can plug in their own:
//! - [`disk::BlockDevice`]: whole-sector storage
//! - [`console::ConsoleDevice`]: byte-stream console

pub mod console;
pub mod disk;
