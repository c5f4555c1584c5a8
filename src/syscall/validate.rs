//! System Call Input Validation
//!
//! User memory is only touched through [`Machine::read_mem`] and
//! [`Machine::write_mem`], so every byte goes through the current page
//! table. Data is copied into kernel buffers before use.
//!
//! # Security Principles
//! - Validate lengths before allocating for them
//! - Fail on the first untranslatable byte
//! - Bound every string copy-in

use alloc::string::String;
use alloc::vec::Vec;

use crate::machine::Machine;

use super::SyscallError;

/// Largest buffer a single read or write may name.
pub const MAX_USER_BUFFER: usize = 64 * 1024;

/// Copy a NUL-terminated string of at most `max_len` bytes (terminator not
/// counted) out of user memory.
///
/// # Returns
/// * `Err(Efault)` - some byte is not mapped
/// * `Err(Enametoolong)` - no terminator within `max_len + 1` bytes
/// * `Err(Einval)` - the bytes are not UTF-8
pub fn copy_string_in(
    machine: &mut dyn Machine,
    addr: i32,
    max_len: usize,
) -> Result<String, SyscallError> {
    let base = user_address(addr)?;
    let mut bytes = Vec::new();
    for i in 0..=max_len {
        let at = base.checked_add(i as u32).ok_or(SyscallError::Efault)?;
        let byte = machine.read_mem(at, 1).map_err(|_| SyscallError::Efault)? as u8;
        if byte == 0 {
            return String::from_utf8(bytes).map_err(|_| SyscallError::Einval);
        }
        bytes.push(byte);
    }
    Err(SyscallError::Enametoolong)
}

/// Copy `len` bytes out of user memory.
pub fn copy_in(machine: &mut dyn Machine, addr: i32, len: i32) -> Result<Vec<u8>, SyscallError> {
    let base = user_address(addr)?;
    let len = buffer_len(len)?;
    (0..len)
        .map(|i| {
            let at = base.checked_add(i as u32).ok_or(SyscallError::Efault)?;
            machine
                .read_mem(at, 1)
                .map(|b| b as u8)
                .map_err(|_| SyscallError::Efault)
        })
        .collect()
}

/// Copy `bytes` into user memory at `addr`.
pub fn copy_out(machine: &mut dyn Machine, addr: i32, bytes: &[u8]) -> Result<(), SyscallError> {
    let base = user_address(addr)?;
    for (i, &byte) in bytes.iter().enumerate() {
        let at = base.checked_add(i as u32).ok_or(SyscallError::Efault)?;
        machine
            .write_mem(at, 1, byte as i32)
            .map_err(|_| SyscallError::Efault)?;
    }
    Ok(())
}

/// Validate a user buffer length.
pub(super) fn buffer_len(len: i32) -> Result<usize, SyscallError> {
    usize::try_from(len)
        .ok()
        .filter(|&len| len <= MAX_USER_BUFFER)
        .ok_or(SyscallError::Einval)
}

fn user_address(addr: i32) -> Result<u32, SyscallError> {
    u32::try_from(addr).map_err(|_| SyscallError::Efault)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;
    use crate::machine::sim::SimMachine;
    use crate::machine::TranslationEntry;
    use alloc::vec;

    fn machine_with(bytes: &[u8]) -> SimMachine {
        let mut machine = SimMachine::new(1);
        machine.set_page_table(vec![TranslationEntry {
            valid: true,
            ..Default::default()
        }]);
        machine.main_memory()[..bytes.len()].copy_from_slice(bytes);
        machine
    }

    #[test]
    fn test_string_copy_in() {
        let mut machine = machine_with(b"xx\0name\0");
        assert_eq!(copy_string_in(&mut machine, 3, 8).unwrap(), "name");
        assert_eq!(copy_string_in(&mut machine, 2, 8).unwrap(), "");
    }

    #[test]
    fn test_string_bound_is_enforced() {
        let mut machine = machine_with(b"abcdef\0");
        assert_eq!(copy_string_in(&mut machine, 0, 6).unwrap(), "abcdef");
        assert_eq!(copy_string_in(&mut machine, 0, 5), Err(SyscallError::Enametoolong));
    }

    #[test]
    fn test_unterminated_string_faults_at_end_of_space() {
        let mut machine = machine_with(&[b'a'; PAGE_SIZE]);
        assert_eq!(
            copy_string_in(&mut machine, 0, 4 * PAGE_SIZE),
            Err(SyscallError::Efault)
        );
        assert_eq!(copy_string_in(&mut machine, -4, 8), Err(SyscallError::Efault));
    }

    #[test]
    fn test_buffer_copies() {
        let mut machine = machine_with(b"hello");
        assert_eq!(copy_in(&mut machine, 1, 3).unwrap(), b"ell");
        assert_eq!(copy_in(&mut machine, 0, -1), Err(SyscallError::Einval));
        assert_eq!(copy_in(&mut machine, PAGE_SIZE as i32 - 1, 2), Err(SyscallError::Efault));

        copy_out(&mut machine, 10, b"ok").unwrap();
        assert_eq!(&machine.main_memory()[10..12], b"ok");
        assert_eq!(copy_out(&mut machine, PAGE_SIZE as i32, b"!"), Err(SyscallError::Efault));
    }

    #[test]
    fn test_zero_length() {
        let mut machine = machine_with(&[]);
        assert!(copy_in(&mut machine, 0, 0).unwrap().is_empty());
        assert_eq!(buffer_len(MAX_USER_BUFFER as i32 + 1), Err(SyscallError::Einval));
    }
}
