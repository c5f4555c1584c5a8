//! User address spaces
//!
//! An [`AddrSpace`] is a linear page table from virtual page `i` to some
//! free physical frame, laid out as
//!
//! ```text
//! 0                                                         size
//! +------+-----------+-------------+---------+---------------+
//! | code | init data | uninit data | (round) | stack (1 KiB) |
//! +------+-----------+-------------+---------+---------------+
//! ```
//!
//! Frames are taken from the kernel frame bitmap only after the whole
//! request is known to fit, and go back in [`AddrSpace::release`].

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use log::{debug, info};

use crate::config::{PAGE_SIZE, USER_STACK_SIZE};
use crate::drivers::console::ConsoleDevice;
use crate::fs::{BitMap, OpenFile};
use crate::machine::{
    Machine, RegisterFile, TranslationEntry, NEXT_PC_REG, NUM_TOTAL_REGS, PC_REG, STACK_REG,
};

use super::file_table::FileTable;
use super::noff::{NoffHeader, Segment, NOFF_HEADER_SIZE};
use super::LoadError;

/// Identifier of a loaded program, as returned by `Exec`.
pub type SpaceId = i32;

pub struct AddrSpace {
    space_id: SpaceId,
    page_table: Vec<TranslationEntry>,
    user_registers: RegisterFile,
    files: FileTable,
}

impl AddrSpace {
    /// Load the NOFF program in `executable` into fresh frames of `machine`
    /// memory, taken from `frames`.
    pub fn load(
        executable: &OpenFile,
        space_id: SpaceId,
        frames: &mut BitMap,
        machine: &mut dyn Machine,
        console: Arc<dyn ConsoleDevice>,
    ) -> Result<Self, LoadError> {
        let mut raw = [0u8; NOFF_HEADER_SIZE];
        if executable.read_at(&mut raw, 0)? < NOFF_HEADER_SIZE {
            return Err(LoadError::Truncated);
        }
        let header = NoffHeader::parse(&raw)?;

        let size = (header.image_size() + USER_STACK_SIZE).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let num_pages = size / PAGE_SIZE;
        if num_pages > frames.num_clear() {
            return Err(LoadError::OutOfMemory {
                needed: num_pages,
                free: frames.num_clear(),
            });
        }
        debug!(
            target: "addrspace",
            "initializing address space {}, {} pages, size {}",
            space_id, num_pages, size
        );

        let mut page_table: Vec<TranslationEntry> = Vec::with_capacity(num_pages);
        for virtual_page in 0..num_pages {
            let Some(physical_page) = frames.find() else {
                for entry in &page_table {
                    frames.clear(entry.physical_page);
                }
                return Err(LoadError::OutOfMemory {
                    needed: num_pages,
                    free: virtual_page,
                });
            };
            let start = physical_page * PAGE_SIZE;
            machine.main_memory()[start..start + PAGE_SIZE].fill(0);
            page_table.push(TranslationEntry {
                virtual_page,
                physical_page,
                valid: true,
                ..Default::default()
            });
        }

        let space = Self {
            space_id,
            page_table,
            user_registers: [0; NUM_TOTAL_REGS],
            files: FileTable::new(console),
        };
        let loaded = space
            .copy_segment(executable, &header.code, machine)
            .and_then(|_| space.copy_segment(executable, &header.init_data, machine));
        if let Err(e) = loaded {
            space.release(frames);
            return Err(e);
        }
        info!(target: "addrspace", "loaded space {} into {} pages", space_id, num_pages);
        Ok(space)
    }

    fn copy_segment(
        &self,
        executable: &OpenFile,
        segment: &Segment,
        machine: &mut dyn Machine,
    ) -> Result<(), LoadError> {
        if segment.size == 0 {
            return Ok(());
        }
        let mut contents = vec![0u8; segment.size as usize];
        let n = executable.read_at(&mut contents, segment.in_file_addr as usize)?;
        if n < contents.len() {
            return Err(LoadError::Truncated);
        }
        debug!(
            target: "addrspace",
            "initializing segment at {:#x}, size {}",
            segment.virtual_addr, segment.size
        );
        let memory = machine.main_memory();
        for (i, &byte) in contents.iter().enumerate() {
            let vaddr = segment.virtual_addr as usize + i;
            let entry = &self.page_table[vaddr / PAGE_SIZE];
            memory[entry.physical_page * PAGE_SIZE + vaddr % PAGE_SIZE] = byte;
        }
        Ok(())
    }

    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    pub fn num_pages(&self) -> usize {
        self.page_table.len()
    }

    /// Bytes of virtual address space.
    pub fn size(&self) -> usize {
        self.page_table.len() * PAGE_SIZE
    }

    pub fn files_mut(&mut self) -> &mut FileTable {
        &mut self.files
    }

    /// Set the registers for a fresh start: everything zero, PC at 0 and
    /// the stack pointer just below the top of the space.
    pub fn init_registers(&mut self, machine: &mut dyn Machine) {
        let mut registers: RegisterFile = [0; NUM_TOTAL_REGS];
        registers[PC_REG] = 0;
        registers[NEXT_PC_REG] = 4;
        // a little headroom so the top frame stays inside the space
        registers[STACK_REG] = self.size() as i32 - 16;
        debug!(target: "addrspace", "initializing stack register to {}", self.size() - 16);
        machine.restore_registers(&registers);
        self.user_registers = registers;
    }

    /// The saved user registers.
    pub fn user_registers(&self) -> &RegisterFile {
        &self.user_registers
    }

    /// Snapshot the user registers before the owning thread is switched out.
    pub fn save_state(&mut self, machine: &dyn Machine) {
        self.user_registers = machine.save_registers();
    }

    /// Reload the user registers and make this space the one the machine
    /// translates through.
    pub fn restore_state(&self, machine: &mut dyn Machine) {
        machine.restore_registers(&self.user_registers);
        machine.set_page_table(self.page_table.clone());
    }

    /// Return every frame to `frames` and close every open file.
    pub fn release(mut self, frames: &mut BitMap) {
        for entry in &self.page_table {
            frames.clear(entry.physical_page);
        }
        self.files.close_all();
        debug!(target: "addrspace", "released space {}", self.space_id);
    }
}
