//! Minos boot demo
//!
//! Formats a RAM disk, installs two hand-assembled user programs and runs
//! the first one on the simulated machine:
//!
//! - `parent` prints a line, execs `child`, joins it and exits with the
//!   child's exit code
//! - `child` prints a line, yields once and exits with 7
//!
//! # Usage
//! `minos [-d FLAGS] [-x PROGRAM]`, where FLAGS are debug letters
//! (`f` file system, `d` disk, `t` threads, `a` address spaces,
//! `s` syscalls, `m` machine, `+` everything).

use std::process::ExitCode;
use std::sync::Arc;

use log::LevelFilter;

use minos::config::{DebugFlags, KernelConfig, NUM_SECTORS};
use minos::drivers::console::{self, StdConsole};
use minos::drivers::disk::MemDisk;
use minos::fs::{FileSystem, FsError};
use minos::kernel::{Kernel, Shutdown};
use minos::kprintln;
use minos::machine::sim::asm::{addu, li, syscall};
use minos::machine::sim::SimMachine;
use minos::syscall::numbers::{SC_EXEC, SC_EXIT, SC_JOIN, SC_WRITE, SC_YIELD};
use minos::userprog::noff::assemble;
use minos::userprog::CONSOLE_OUTPUT;

const V0: u32 = 2;
const A0: u32 = 4;
const A1: u32 = 5;
const A2: u32 = 6;

/// `write(text, len, stdout)` for text at `addr`.
fn print(addr: i16, len: usize) -> [u32; 5] {
    [
        li(A0, addr),
        li(A1, len as i16),
        li(A2, CONSOLE_OUTPUT as i16),
        li(V0, SC_WRITE as i16),
        syscall(),
    ]
}

fn parent_program() -> Vec<u8> {
    const BANNER: &[u8] = b"parent: starting child\n";
    let mut data = b"child\0".to_vec();
    data.extend_from_slice(BANNER);
    assemble(&data, |base| {
        let mut code = print(base + 6, BANNER.len()).to_vec();
        code.extend([li(A0, base), li(V0, SC_EXEC as i16), syscall()]);
        code.extend([addu(A0, V0, 0), li(V0, SC_JOIN as i16), syscall()]);
        code.extend([addu(A0, V0, 0), li(V0, SC_EXIT as i16), syscall()]);
        code
    })
}

fn child_program() -> Vec<u8> {
    const GREETING: &[u8] = b"child: hello\n";
    assemble(GREETING, |base| {
        let mut code = print(base, GREETING.len()).to_vec();
        code.extend([li(V0, SC_YIELD as i16), syscall()]);
        code.extend([li(A0, 7), li(V0, SC_EXIT as i16), syscall()]);
        code
    })
}

fn install(fs: &mut FileSystem, name: &str, image: &[u8]) -> Result<(), FsError> {
    fs.create(name, 0)?;
    let mut file = fs.open(name)?;
    file.write_at(image, 0)?;
    file.write_back()
}

fn main() -> ExitCode {
    let mut flags = DebugFlags::empty();
    let mut program = String::from("parent");
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match (arg.as_str(), args.next()) {
            ("-d", Some(value)) => flags = DebugFlags::parse(&value),
            ("-x", Some(value)) => program = value,
            _ => {
                eprintln!("usage: minos [-d FLAGS] [-x PROGRAM]");
                return ExitCode::FAILURE;
            }
        }
    }

    let device = Arc::new(StdConsole);
    console::install(device.clone());
    let level = if flags.is_empty() { LevelFilter::Info } else { LevelFilter::Trace };
    let config = KernelConfig::default().with_debug(flags).with_log_level(level);
    minos::logger::init(config.log_level, config.debug);

    kprintln!();
    kprintln!("Minos v{} - Instructional Kernel", minos::VERSION);
    kprintln!("================================");
    kprintln!();

    let mut fs = match FileSystem::format(Box::new(MemDisk::new(NUM_SECTORS))) {
        Ok(fs) => fs,
        Err(e) => {
            kprintln!("[BOOT] Cannot format disk: {}", e);
            return ExitCode::FAILURE;
        }
    };
    for (name, image) in [("parent", parent_program()), ("child", child_program())] {
        if let Err(e) = install(&mut fs, name, &image) {
            kprintln!("[BOOT] Cannot install {}: {}", name, e);
            return ExitCode::FAILURE;
        }
    }
    kprintln!("[BOOT] RAM disk formatted, {} sectors free", fs.free_map().num_clear());

    let machine = SimMachine::new(config.physical_pages);
    let mut kernel = Kernel::new(config, machine, fs, device);
    if let Err(e) = kernel.exec(&program) {
        kprintln!("[BOOT] Unable to run {}: {}", program, e);
        return ExitCode::FAILURE;
    }

    match kernel.run() {
        Ok(shutdown) => {
            if shutdown == Shutdown::Idle {
                kernel.stats().print(kernel.file_system().disk());
            }
            kprintln!("[BOOT] Machine halting ({:?})", shutdown);
            ExitCode::SUCCESS
        }
        Err(fault) => {
            kprintln!();
            kprintln!("!!! KERNEL FAULT !!!");
            kprintln!("{}", fault);
            ExitCode::FAILURE
        }
    }
}
