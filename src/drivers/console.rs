//! Console driver
//!
//! A byte-stream console shared by kernel diagnostics (`kprint!`) and the
//! console pseudo-files that user programs reach through file ids 0 and 1.
//!
//! Until a device is installed, output is discarded and input reads as empty.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::{self, Write};
use spin::Mutex;

/// A console device. Implementations use interior mutability so one device
/// can be shared by the kernel console and every open console handle.
pub trait ConsoleDevice: Send + Sync {
    /// Write all of `bytes` to the output stream.
    fn put_bytes(&self, bytes: &[u8]);

    /// Read up to `into.len()` bytes that are already available.
    /// Returns the number of bytes read; zero means no input is pending.
    fn get_bytes(&self, into: &mut [u8]) -> usize;
}

/// In-memory console: input is queued up front, output is captured.
#[derive(Default)]
pub struct MemoryConsole {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a console whose input stream holds `input`.
    pub fn with_input(input: &[u8]) -> Self {
        let console = Self::new();
        console.push_input(input);
        console
    }

    /// Append bytes to the pending input.
    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    /// Everything written so far.
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }

    /// Drain the captured output.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }
}

impl ConsoleDevice for MemoryConsole {
    fn put_bytes(&self, bytes: &[u8]) {
        self.output.lock().extend_from_slice(bytes);
    }

    fn get_bytes(&self, into: &mut [u8]) -> usize {
        let mut input = self.input.lock();
        let count = into.len().min(input.len());
        for (slot, byte) in into.iter_mut().zip(input.drain(..count)) {
            *slot = byte;
        }
        count
    }
}

/// Console on the host process's stdin/stdout.
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct StdConsole;

#[cfg(feature = "std")]
impl ConsoleDevice for StdConsole {
    fn put_bytes(&self, bytes: &[u8]) {
        use std::io::Write as _;
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(bytes);
        let _ = out.flush();
    }

    fn get_bytes(&self, into: &mut [u8]) -> usize {
        use std::io::Read as _;
        std::io::stdin().lock().read(into).unwrap_or(0)
    }
}

/// The kernel console: whichever device is currently installed.
pub struct Console {
    device: Option<Arc<dyn ConsoleDevice>>,
}

impl Console {
    /// Create a console with no device attached.
    pub const fn new() -> Self {
        Self { device: None }
    }

    /// Attach `device`, replacing any previous one.
    pub fn attach(&mut self, device: Arc<dyn ConsoleDevice>) {
        self.device = Some(device);
    }

    /// The attached device, if any.
    pub fn device(&self) -> Option<Arc<dyn ConsoleDevice>> {
        self.device.clone()
    }

    /// Write a string to the console
    pub fn write_str(&self, s: &str) {
        if let Some(device) = &self.device {
            device.put_bytes(s.as_bytes());
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global kernel console protected by spinlock
pub static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Install `device` as the kernel console.
pub fn install(device: Arc<dyn ConsoleDevice>) {
    CONSOLE.lock().attach(device);
}

/// Print macro for kernel output
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut console = $crate::drivers::console::CONSOLE.lock();
        let _ = write!(console, $($arg)*);
    }};
}

/// Println macro for kernel output
#[macro_export]
macro_rules! kprintln {
    () => {
        $crate::kprint!("\n")
    };
    ($($arg:tt)*) => {{
        $crate::kprint!($($arg)*);
        $crate::kprint!("\n");
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_console_round_trip() {
        let console = MemoryConsole::with_input(b"abc");
        let mut buf = [0u8; 2];
        assert_eq!(console.get_bytes(&mut buf), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(console.get_bytes(&mut buf), 1);
        assert_eq!(buf[0], b'c');
        assert_eq!(console.get_bytes(&mut buf), 0);

        console.put_bytes(b"out");
        assert_eq!(console.output(), b"out");
        assert_eq!(console.take_output(), b"out");
        assert!(console.output().is_empty());
    }

    #[test]
    fn test_detached_console_discards() {
        let mut console = Console::new();
        assert!(console.device().is_none());
        assert!(write!(console, "dropped {}", 1).is_ok());

        let device = Arc::new(MemoryConsole::new());
        console.attach(device.clone());
        assert!(write!(console, "kept {}", 2).is_ok());
        assert_eq!(device.output(), b"kept 2");
    }
}
