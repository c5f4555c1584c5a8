//! NOFF executable format
//!
//! ```text
//! +-------+-----------------+-----------------+-----------------+----------
//! | magic | code            | init_data       | uninit_data     | contents
//! +-------+-----------------+-----------------+-----------------+----------
//!   i32     vaddr,off,size    vaddr,off,size    vaddr,off,size
//! ```
//!
//! All words little-endian. `uninit_data` has no file contents; it is
//! zero-filled at load time.

use alloc::vec::Vec;

use super::LoadError;

pub const NOFF_MAGIC: i32 = 0x00ba_dfad;

/// Bytes in the on-disk header.
pub const NOFF_HEADER_SIZE: usize = 40;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    /// Location of the segment in the user address space.
    pub virtual_addr: u32,
    /// Location of the segment contents in the executable.
    pub in_file_addr: u32,
    pub size: u32,
}

impl Segment {
    /// One past the last virtual address, 0 for an empty segment.
    pub fn end(&self) -> usize {
        if self.size == 0 {
            0
        } else {
            self.virtual_addr as usize + self.size as usize
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoffHeader {
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
}

impl NoffHeader {
    pub fn parse(raw: &[u8]) -> Result<Self, LoadError> {
        if raw.len() < NOFF_HEADER_SIZE {
            return Err(LoadError::Truncated);
        }
        let word = |i: usize| i32::from_le_bytes([raw[4 * i], raw[4 * i + 1], raw[4 * i + 2], raw[4 * i + 3]]);
        if word(0) != NOFF_MAGIC {
            return Err(LoadError::BadMagic);
        }
        let segment = |first: usize| -> Result<Segment, LoadError> {
            let (vaddr, offset, size) = (word(first), word(first + 1), word(first + 2));
            if vaddr < 0 || offset < 0 || size < 0 {
                return Err(LoadError::BadSegment);
            }
            Ok(Segment {
                virtual_addr: vaddr as u32,
                in_file_addr: offset as u32,
                size: size as u32,
            })
        };
        Ok(Self {
            code: segment(1)?,
            init_data: segment(4)?,
            uninit_data: segment(7)?,
        })
    }

    pub fn encode(&self) -> [u8; NOFF_HEADER_SIZE] {
        let mut raw = [0u8; NOFF_HEADER_SIZE];
        let words = [
            NOFF_MAGIC,
            self.code.virtual_addr as i32,
            self.code.in_file_addr as i32,
            self.code.size as i32,
            self.init_data.virtual_addr as i32,
            self.init_data.in_file_addr as i32,
            self.init_data.size as i32,
            self.uninit_data.virtual_addr as i32,
            self.uninit_data.in_file_addr as i32,
            self.uninit_data.size as i32,
        ];
        for (slot, value) in raw.chunks_exact_mut(4).zip(words) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        raw
    }

    /// Bytes of address space the segments cover, before the stack.
    pub fn image_size(&self) -> usize {
        self.code
            .end()
            .max(self.init_data.end())
            .max(self.uninit_data.end())
    }
}

/// Build an executable from code words and initialized data.
///
/// Code is placed at virtual address 0 and data right after it. `code` is
/// called with the data address and must return the same number of words
/// whatever address it is given.
pub fn assemble(data: &[u8], code: impl Fn(i16) -> Vec<u32>) -> Vec<u8> {
    let code_len = code(0).len() * 4;
    let words = code(code_len as i16);
    debug_assert_eq!(words.len() * 4, code_len);

    let header = NoffHeader {
        code: Segment {
            virtual_addr: 0,
            in_file_addr: NOFF_HEADER_SIZE as u32,
            size: code_len as u32,
        },
        init_data: Segment {
            virtual_addr: code_len as u32,
            in_file_addr: (NOFF_HEADER_SIZE + code_len) as u32,
            size: data.len() as u32,
        },
        uninit_data: Segment::default(),
    };

    let mut image = header.encode().to_vec();
    for word in words {
        image.extend_from_slice(&word.to_le_bytes());
    }
    image.extend_from_slice(data);
    image
}
