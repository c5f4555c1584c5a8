//! Machine interface
//!
//! The kernel never executes user instructions itself. It consumes the CPU
//! through [`Machine`]: registers, byte-addressed user memory behind a page
//! table, raw physical memory for loading programs, and `run`, which
//! executes user code until the next trap.
//!
//! # Register file
//! 32 general purpose registers followed by the special registers below.
//! The syscall ABI uses r2 for the code and the result, r4-r7 for arguments.

pub mod sim;

use alloc::vec::Vec;
use core::fmt;

pub const NUM_GP_REGS: usize = 32;
pub const STACK_REG: usize = 29;
pub const RET_ADDR_REG: usize = 31;
pub const HI_REG: usize = 32;
pub const LO_REG: usize = 33;
pub const PC_REG: usize = 34;
pub const NEXT_PC_REG: usize = 35;
pub const PREV_PC_REG: usize = 36;
pub const LOAD_REG: usize = 37;
pub const LOAD_VALUE_REG: usize = 38;
pub const BAD_VADDR_REG: usize = 39;
pub const NUM_TOTAL_REGS: usize = 40;

/// Syscall code and result.
pub const RESULT_REG: usize = 2;
/// Syscall arguments, in order.
pub const ARG_REGS: [usize; 4] = [4, 5, 6, 7];

/// Width of one instruction in bytes.
pub const INSTRUCTION_WIDTH: i32 = 4;

/// Snapshot of every register.
pub type RegisterFile = [i32; NUM_TOTAL_REGS];

/// Why user execution trapped into the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionType {
    /// Everything ok
    NoException = 0,
    /// A program executed a system call
    SyscallException = 1,
    /// No valid translation found
    PageFaultException = 2,
    /// Write attempted to a read-only page
    ReadOnlyException = 3,
    /// Translation resulted in an invalid physical address
    BusErrorException = 4,
    /// Unaligned reference or one past the end of the address space
    AddressErrorException = 5,
    /// Integer overflow in add or sub
    OverflowException = 6,
    /// Unimplemented or reserved instruction
    IllegalInstrException = 7,
}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One page table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    pub physical_page: usize,
    pub valid: bool,
    pub read_only: bool,
    /// Set by the machine on every reference.
    pub used: bool,
    /// Set by the machine on every write.
    pub dirty: bool,
}

/// The CPU and memory the kernel runs user programs on.
pub trait Machine {
    fn read_register(&self, num: usize) -> i32;

    fn write_register(&mut self, num: usize, value: i32);

    /// Read `size` (1, 2 or 4) bytes at user address `addr`.
    fn read_mem(&mut self, addr: u32, size: usize) -> Result<i32, ExceptionType>;

    /// Write the low `size` (1, 2 or 4) bytes of `value` at user address `addr`.
    fn write_mem(&mut self, addr: u32, size: usize, value: i32) -> Result<(), ExceptionType>;

    /// Raw physical memory.
    fn main_memory(&mut self) -> &mut [u8];

    /// Install the page table used to translate user addresses.
    fn set_page_table(&mut self, table: Vec<TranslationEntry>);

    /// Execute user instructions until one traps.
    fn run(&mut self) -> ExceptionType;

    fn save_registers(&self) -> RegisterFile {
        let mut registers = [0; NUM_TOTAL_REGS];
        for (num, slot) in registers.iter_mut().enumerate() {
            *slot = self.read_register(num);
        }
        registers
    }

    fn restore_registers(&mut self, registers: &RegisterFile) {
        for (num, &value) in registers.iter().enumerate() {
            self.write_register(num, value);
        }
    }
}

/// Move the PC past the instruction that trapped:
/// previous <- current, current <- next, next <- next + 4.
///
/// Must run before returning to user code after every completed syscall,
/// or the same syscall traps again forever.
pub fn advance_pc(machine: &mut dyn Machine) {
    let pc = machine.read_register(PC_REG);
    let next_pc = machine.read_register(NEXT_PC_REG);
    machine.write_register(PREV_PC_REG, pc);
    machine.write_register(PC_REG, next_pc);
    machine.write_register(NEXT_PC_REG, next_pc.wrapping_add(INSTRUCTION_WIDTH));
}
