//! Simulated user CPU
//!
//! A small MIPS-subset interpreter sufficient for hand-assembled user
//! programs. Supported instructions:
//!
//! | mnemonic | encoding             |
//! |----------|----------------------|
//! | `sll`    | special, funct 0x00  |
//! | `syscall`| special, funct 0x0c  |
//! | `addu`   | special, funct 0x21  |
//! | `or`     | special, funct 0x25  |
//! | `j`      | opcode 0x02          |
//! | `addiu`  | opcode 0x09          |
//! | `ori`    | opcode 0x0d          |
//! | `lui`    | opcode 0x0f          |
//! | `lw`     | opcode 0x23          |
//! | `sw`     | opcode 0x2b          |
//!
//! Jumps have a branch delay slot. A `syscall` traps with the PC still
//! pointing at the `syscall` instruction; the kernel advances it.

use alloc::vec;
use alloc::vec::Vec;
use log::trace;

use crate::config::PAGE_SIZE;

use super::{
    ExceptionType, Machine, TranslationEntry, BAD_VADDR_REG, INSTRUCTION_WIDTH, NEXT_PC_REG,
    NUM_TOTAL_REGS, PC_REG, PREV_PC_REG,
};

const OP_SPECIAL: u32 = 0x00;
const OP_J: u32 = 0x02;
const OP_ADDIU: u32 = 0x09;
const OP_ORI: u32 = 0x0d;
const OP_LUI: u32 = 0x0f;
const OP_LW: u32 = 0x23;
const OP_SW: u32 = 0x2b;

const FUNCT_SLL: u32 = 0x00;
const FUNCT_SYSCALL: u32 = 0x0c;
const FUNCT_ADDU: u32 = 0x21;
const FUNCT_OR: u32 = 0x25;

pub struct SimMachine {
    registers: [i32; NUM_TOTAL_REGS],
    memory: Vec<u8>,
    page_table: Vec<TranslationEntry>,
    instructions: u64,
}

impl SimMachine {
    /// A machine with `num_pages` physical pages of zeroed memory.
    pub fn new(num_pages: usize) -> Self {
        Self {
            registers: [0; NUM_TOTAL_REGS],
            memory: vec![0; num_pages * PAGE_SIZE],
            page_table: Vec::new(),
            instructions: 0,
        }
    }

    /// Instructions retired so far.
    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn page_table(&self) -> &[TranslationEntry] {
        &self.page_table
    }

    /// Translate user address `addr` to an index into physical memory.
    fn translate(&mut self, addr: u32, size: usize, writing: bool) -> Result<usize, ExceptionType> {
        let addr = addr as usize;
        if (size == 4 && addr % 4 != 0) || (size == 2 && addr % 2 != 0) {
            return Err(ExceptionType::AddressErrorException);
        }
        let vpn = addr / PAGE_SIZE;
        let offset = addr % PAGE_SIZE;
        let entry = self
            .page_table
            .get_mut(vpn)
            .ok_or(ExceptionType::AddressErrorException)?;
        if !entry.valid {
            return Err(ExceptionType::PageFaultException);
        }
        if writing && entry.read_only {
            return Err(ExceptionType::ReadOnlyException);
        }
        entry.used = true;
        if writing {
            entry.dirty = true;
        }
        let physical = entry.physical_page * PAGE_SIZE + offset;
        if physical + size > self.memory.len() {
            return Err(ExceptionType::BusErrorException);
        }
        Ok(physical)
    }

    fn trap(&mut self, which: ExceptionType, bad_addr: u32) -> ExceptionType {
        self.registers[BAD_VADDR_REG] = bad_addr as i32;
        which
    }

    fn set(&mut self, reg: u32, value: i32) {
        if reg != 0 {
            self.registers[reg as usize] = value;
        }
    }

    fn get(&self, reg: u32) -> i32 {
        self.registers[reg as usize]
    }

    /// Execute one instruction. `Err` carries the trap.
    fn one_instruction(&mut self) -> Result<(), ExceptionType> {
        let pc = self.registers[PC_REG] as u32;
        let instr = self
            .read_mem(pc, 4)
            .map_err(|which| self.trap(which, pc))? as u32;

        let op = instr >> 26;
        let rs = (instr >> 21) & 0x1f;
        let rt = (instr >> 16) & 0x1f;
        let rd = (instr >> 11) & 0x1f;
        let shamt = (instr >> 6) & 0x1f;
        let funct = instr & 0x3f;
        let imm = instr & 0xffff;
        let simm = imm as u16 as i16 as i32;

        let mut next_pc = self.registers[NEXT_PC_REG].wrapping_add(INSTRUCTION_WIDTH);

        match op {
            OP_SPECIAL => match funct {
                FUNCT_SLL => self.set(rd, self.get(rt) << shamt),
                FUNCT_SYSCALL => return Err(ExceptionType::SyscallException),
                FUNCT_ADDU => self.set(rd, self.get(rs).wrapping_add(self.get(rt))),
                FUNCT_OR => self.set(rd, self.get(rs) | self.get(rt)),
                _ => return Err(ExceptionType::IllegalInstrException),
            },
            OP_J => {
                let target = (pc & 0xf000_0000) | ((instr & 0x03ff_ffff) << 2);
                next_pc = target as i32;
            }
            OP_ADDIU => self.set(rt, self.get(rs).wrapping_add(simm)),
            OP_ORI => self.set(rt, self.get(rs) | imm as i32),
            OP_LUI => self.set(rt, (imm << 16) as i32),
            OP_LW => {
                let addr = self.get(rs).wrapping_add(simm) as u32;
                let value = self.read_mem(addr, 4).map_err(|which| self.trap(which, addr))?;
                self.set(rt, value);
            }
            OP_SW => {
                let addr = self.get(rs).wrapping_add(simm) as u32;
                let value = self.get(rt);
                self.write_mem(addr, 4, value)
                    .map_err(|which| self.trap(which, addr))?;
            }
            _ => return Err(ExceptionType::IllegalInstrException),
        }

        self.instructions += 1;
        self.registers[PREV_PC_REG] = self.registers[PC_REG];
        self.registers[PC_REG] = self.registers[NEXT_PC_REG];
        self.registers[NEXT_PC_REG] = next_pc;
        Ok(())
    }
}

impl Machine for SimMachine {
    fn read_register(&self, num: usize) -> i32 {
        self.registers[num]
    }

    fn write_register(&mut self, num: usize, value: i32) {
        if num != 0 {
            self.registers[num] = value;
        }
    }

    fn read_mem(&mut self, addr: u32, size: usize) -> Result<i32, ExceptionType> {
        let physical = self.translate(addr, size, false)?;
        let bytes = &self.memory[physical..physical + size];
        Ok(match size {
            1 => bytes[0] as i32,
            2 => u16::from_le_bytes([bytes[0], bytes[1]]) as i32,
            _ => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        })
    }

    fn write_mem(&mut self, addr: u32, size: usize, value: i32) -> Result<(), ExceptionType> {
        let physical = self.translate(addr, size, true)?;
        let bytes = value.to_le_bytes();
        self.memory[physical..physical + size].copy_from_slice(&bytes[..size]);
        Ok(())
    }

    fn main_memory(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    fn set_page_table(&mut self, table: Vec<TranslationEntry>) {
        self.page_table = table;
    }

    fn run(&mut self) -> ExceptionType {
        loop {
            if let Err(which) = self.one_instruction() {
                trace!(
                    target: "machine",
                    "trap {} at pc {:#x} after {} instructions",
                    which,
                    self.registers[PC_REG],
                    self.instructions
                );
                return which;
            }
        }
    }
}

/// Instruction encoders for hand-assembled programs.
pub mod asm {
    use super::*;

    fn i_type(op: u32, rs: u32, rt: u32, imm: u16) -> u32 {
        (op << 26) | (rs << 21) | (rt << 16) | imm as u32
    }

    fn r_type(rs: u32, rt: u32, rd: u32, shamt: u32, funct: u32) -> u32 {
        (rs << 21) | (rt << 16) | (rd << 11) | (shamt << 6) | funct
    }

    pub fn nop() -> u32 {
        0
    }

    pub fn syscall() -> u32 {
        r_type(0, 0, 0, 0, FUNCT_SYSCALL)
    }

    pub fn addu(rd: u32, rs: u32, rt: u32) -> u32 {
        r_type(rs, rt, rd, 0, FUNCT_ADDU)
    }

    pub fn or(rd: u32, rs: u32, rt: u32) -> u32 {
        r_type(rs, rt, rd, 0, FUNCT_OR)
    }

    pub fn sll(rd: u32, rt: u32, shamt: u32) -> u32 {
        r_type(0, rt, rd, shamt, FUNCT_SLL)
    }

    pub fn addiu(rt: u32, rs: u32, imm: i16) -> u32 {
        i_type(OP_ADDIU, rs, rt, imm as u16)
    }

    pub fn ori(rt: u32, rs: u32, imm: u16) -> u32 {
        i_type(OP_ORI, rs, rt, imm)
    }

    pub fn lui(rt: u32, imm: u16) -> u32 {
        i_type(OP_LUI, 0, rt, imm)
    }

    pub fn lw(rt: u32, base: u32, offset: i16) -> u32 {
        i_type(OP_LW, base, rt, offset as u16)
    }

    pub fn sw(rt: u32, base: u32, offset: i16) -> u32 {
        i_type(OP_SW, base, rt, offset as u16)
    }

    /// Jump to byte address `target` (same 256 MiB region).
    pub fn j(target: u32) -> u32 {
        (OP_J << 26) | ((target >> 2) & 0x03ff_ffff)
    }

    /// Load a 16-bit signed constant: `addiu rt, $zero, value`.
    pub fn li(rt: u32, value: i16) -> u32 {
        addiu(rt, 0, value)
    }
}

#[cfg(test)]
mod tests {
    use super::asm::*;
    use super::*;

    /// Identity-map `pages` pages and copy `code` to address 0.
    fn machine_with(code: &[u32], pages: usize) -> SimMachine {
        let mut machine = SimMachine::new(pages);
        machine.set_page_table(
            (0..pages)
                .map(|page| TranslationEntry {
                    virtual_page: page,
                    physical_page: page,
                    valid: true,
                    ..Default::default()
                })
                .collect(),
        );
        for (i, word) in code.iter().enumerate() {
            machine.main_memory()[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        machine.write_register(NEXT_PC_REG, 4);
        machine
    }

    #[test]
    fn test_arithmetic_then_syscall() {
        let mut machine = machine_with(
            &[li(4, -5), lui(5, 1), ori(5, 5, 2), addu(6, 4, 5), li(2, 10), syscall()],
            1,
        );
        assert_eq!(machine.run(), ExceptionType::SyscallException);
        assert_eq!(machine.read_register(4), -5);
        assert_eq!(machine.read_register(5), 0x1_0002);
        assert_eq!(machine.read_register(6), 0x1_0002 - 5);
        assert_eq!(machine.read_register(2), 10);
        // still at the syscall
        assert_eq!(machine.read_register(PC_REG), 20);
        assert_eq!(machine.read_register(NEXT_PC_REG), 24);
        assert_eq!(machine.instructions(), 5);
    }

    #[test]
    fn test_register_zero_is_hardwired() {
        let mut machine = machine_with(&[li(0, 7), syscall()], 1);
        machine.write_register(0, 3);
        machine.run();
        assert_eq!(machine.read_register(0), 0);
    }

    #[test]
    fn test_jump_executes_delay_slot() {
        let mut machine = machine_with(&[j(12), li(4, 1), li(4, 2), syscall()], 1);
        assert_eq!(machine.run(), ExceptionType::SyscallException);
        assert_eq!(machine.read_register(4), 1);
        assert_eq!(machine.read_register(PC_REG), 12);
    }

    #[test]
    fn test_load_store() {
        let mut machine = machine_with(&[li(4, 99), sw(4, 0, 64), lw(5, 0, 64), syscall()], 1);
        machine.run();
        assert_eq!(machine.read_register(5), 99);
        assert_eq!(machine.read_mem(64, 4), Ok(99));
        assert!(machine.page_table()[0].dirty);
    }

    #[test]
    fn test_running_off_the_end_traps() {
        let mut machine = machine_with(&[nop()], 1);
        machine.write_register(PC_REG, PAGE_SIZE as i32 - 4);
        machine.write_register(NEXT_PC_REG, PAGE_SIZE as i32);
        assert_eq!(machine.run(), ExceptionType::AddressErrorException);
        assert_eq!(machine.read_register(BAD_VADDR_REG), PAGE_SIZE as i32);
    }

    #[test]
    fn test_translation_faults() {
        let mut machine = machine_with(&[], 2);
        let mut table = machine.page_table().to_vec();
        table[1].valid = false;
        table[0].read_only = true;
        machine.set_page_table(table);

        assert_eq!(machine.read_mem(2, 4), Err(ExceptionType::AddressErrorException));
        assert_eq!(machine.read_mem(PAGE_SIZE as u32, 1), Err(ExceptionType::PageFaultException));
        assert_eq!(machine.write_mem(0, 1, 1), Err(ExceptionType::ReadOnlyException));
        assert_eq!(
            machine.read_mem(4 * PAGE_SIZE as u32, 1),
            Err(ExceptionType::AddressErrorException)
        );
    }

    #[test]
    fn test_unknown_instruction() {
        let mut machine = machine_with(&[0xffff_ffff], 1);
        assert_eq!(machine.run(), ExceptionType::IllegalInstrException);
    }
}
