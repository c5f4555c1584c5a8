//! Allocation bitmap
//!
//! One bit per object (disk sector, physical page, space id).
//!
//! # Design
//! - Bit = 0: object is free
//! - Bit = 1: object is allocated
//! - Bit `n` lives in byte `n / 8` at position `n % 8`, which is also the
//!   on-disk layout of the free-map file.

use alloc::vec;
use alloc::vec::Vec;

use super::openfile::OpenFile;
use super::FsError;

const BITS_IN_BYTE: usize = 8;

/// A fixed-size set of allocation flags.
#[derive(Clone, PartialEq, Eq)]
pub struct BitMap {
    num_bits: usize,
    map: Vec<u8>,
}

impl BitMap {
    /// Create a bitmap of `num_bits` clear bits.
    pub fn new(num_bits: usize) -> Self {
        Self {
            num_bits,
            map: vec![0; num_bits.div_ceil(BITS_IN_BYTE)],
        }
    }

    /// Number of bits tracked.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Mark bit `which` as allocated.
    ///
    /// # Panics
    /// Panics if `which` is out of range.
    pub fn mark(&mut self, which: usize) {
        assert!(which < self.num_bits, "bit {} out of range", which);
        self.map[which / BITS_IN_BYTE] |= 1 << (which % BITS_IN_BYTE);
    }

    /// Mark bit `which` as free.
    ///
    /// # Panics
    /// Panics if `which` is out of range or already free (double free).
    pub fn clear(&mut self, which: usize) {
        assert!(which < self.num_bits, "bit {} out of range", which);
        if !self.test(which) {
            panic!("Double free detected for bit {}", which);
        }
        self.map[which / BITS_IN_BYTE] &= !(1 << (which % BITS_IN_BYTE));
    }

    /// Check if bit `which` is allocated. Out of range counts as allocated.
    #[inline]
    pub fn test(&self, which: usize) -> bool {
        if which >= self.num_bits {
            return true;
        }
        (self.map[which / BITS_IN_BYTE] >> (which % BITS_IN_BYTE)) & 1 == 1
    }

    /// Allocate the lowest free bit.
    pub fn find(&mut self) -> Option<usize> {
        let which = (0..self.num_bits).find(|&i| !self.test(i))?;
        self.mark(which);
        Some(which)
    }

    /// Number of free bits.
    pub fn num_clear(&self) -> usize {
        (0..self.num_bits).filter(|&i| !self.test(i)).count()
    }

    /// Raw byte representation.
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    /// Rebuild a bitmap of `num_bits` from its byte representation.
    pub fn from_bytes(num_bits: usize, bytes: &[u8]) -> Self {
        let mut bitmap = Self::new(num_bits);
        let len = bitmap.map.len().min(bytes.len());
        bitmap.map[..len].copy_from_slice(&bytes[..len]);
        bitmap
    }

    /// Initialize the bitmap from the contents of `file`.
    pub fn fetch_from(&mut self, file: &OpenFile) -> Result<(), FsError> {
        let mut bytes = vec![0u8; self.map.len()];
        file.read_at(&mut bytes, 0)?;
        self.map.copy_from_slice(&bytes);
        Ok(())
    }

    /// Store the bitmap into `file`.
    pub fn write_back(&self, file: &mut OpenFile) -> Result<(), FsError> {
        file.write_at(&self.map, 0)?;
        Ok(())
    }
}

impl core::fmt::Debug for BitMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BitMap")
            .field("num_bits", &self.num_bits)
            .field("num_clear", &self.num_clear())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_allocates_lowest_free() {
        let mut map = BitMap::new(10);
        map.mark(0);
        map.mark(2);
        assert_eq!(map.find(), Some(1));
        assert_eq!(map.find(), Some(3));
        assert!(map.test(3));
        assert_eq!(map.num_clear(), 6);
    }

    #[test]
    fn test_exhaustion() {
        let mut map = BitMap::new(3);
        assert_eq!(map.find(), Some(0));
        assert_eq!(map.find(), Some(1));
        assert_eq!(map.find(), Some(2));
        assert_eq!(map.find(), None);
        assert_eq!(map.num_clear(), 0);
    }

    #[test]
    fn test_clear_and_out_of_range() {
        let mut map = BitMap::new(9);
        map.mark(8);
        assert!(map.test(8));
        map.clear(8);
        assert!(!map.test(8));
        assert!(map.test(9));
    }

    #[test]
    #[should_panic(expected = "Double free")]
    fn test_double_free_panics() {
        let mut map = BitMap::new(4);
        map.clear(1);
    }

    #[test]
    fn test_byte_layout() {
        let mut map = BitMap::new(16);
        map.mark(1);
        map.mark(9);
        assert_eq!(map.as_bytes(), &[0b10, 0b10]);
        assert_eq!(BitMap::from_bytes(16, map.as_bytes()), map);
    }
}
