//! Kernel logger
//!
//! Routes `log` records to the kernel console as `[TARGET] message`, the
//! same shape as the boot banner lines. `error`/`warn`/`info` records pass
//! the level filter alone. `debug`/`trace` records from a subsystem target
//! additionally need that subsystem's [`DebugFlags`] bit.

use alloc::string::String;
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use crate::config::DebugFlags;

struct Filter {
    level: LevelFilter,
    flags: DebugFlags,
}

pub struct KernelLogger {
    filter: Mutex<Filter>,
}

static LOGGER: KernelLogger = KernelLogger::new(LevelFilter::Info, DebugFlags::empty());

impl KernelLogger {
    pub const fn new(level: LevelFilter, flags: DebugFlags) -> Self {
        Self {
            filter: Mutex::new(Filter { level, flags }),
        }
    }

    pub fn set_filter(&self, level: LevelFilter, flags: DebugFlags) {
        *self.filter.lock() = Filter { level, flags };
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let filter = self.filter.lock();
        if metadata.level() > filter.level {
            return false;
        }
        if metadata.level() < Level::Debug {
            return true;
        }
        DebugFlags::for_target(metadata.target()).map_or(true, |flag| filter.flags.contains(flag))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag: String = record
            .target()
            .rsplit("::")
            .next()
            .unwrap_or("kernel")
            .to_ascii_uppercase();
        match record.level() {
            Level::Error | Level::Warn => {
                crate::kprintln!("[{}] {}: {}", tag, record.level(), record.args())
            }
            _ => crate::kprintln!("[{}] {}", tag, record.args()),
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Later calls only update the filter.
pub fn init(level: LevelFilter, flags: DebugFlags) {
    LOGGER.set_filter(level, flags);
    // Fails only when a logger is already installed, which may be us.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::MetadataBuilder;

    fn meta(level: Level, target: &str) -> Metadata<'_> {
        MetadataBuilder::new().level(level).target(target).build()
    }

    #[test]
    fn test_level_filter() {
        let logger = KernelLogger::new(LevelFilter::Warn, DebugFlags::all());
        assert!(logger.enabled(&meta(Level::Error, "fs")));
        assert!(!logger.enabled(&meta(Level::Info, "fs")));
    }

    #[test]
    fn test_debug_needs_subsystem_flag() {
        let logger = KernelLogger::new(LevelFilter::Trace, DebugFlags::DISK);
        assert!(logger.enabled(&meta(Level::Trace, "disk")));
        assert!(!logger.enabled(&meta(Level::Debug, "fs")));
        // info is never gated by flags
        assert!(logger.enabled(&meta(Level::Info, "fs")));
        // unflagged targets follow the level alone
        assert!(logger.enabled(&meta(Level::Debug, "boot")));

        logger.set_filter(LevelFilter::Trace, DebugFlags::parse("f"));
        assert!(logger.enabled(&meta(Level::Debug, "fs")));
    }
}
