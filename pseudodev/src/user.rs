//! Caller memory
//!
//! The device never touches caller buffers directly. Transfers go through
//! [`UserWriter`] (device → caller) and [`UserReader`] (caller → device), which
//! report a fault instead of panicking when the requested range is not
//! addressable. Plain byte slices and vectors fault when the range runs past
//! their length, the same way `copy_to_user` fails on a short user mapping.

use crate::error::DeviceError;

/// Destination for bytes copied out of the device
pub trait UserWriter {
    /// Copy `src` into caller memory starting at `offset`
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::Fault` if the range is not writable.
    fn copy_to_user(&mut self, offset: usize, src: &[u8]) -> Result<(), DeviceError>;
}

/// Source of bytes copied into the device
pub trait UserReader {
    /// Fill `dst` from caller memory starting at `offset`
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::Fault` if the range is not readable.
    fn copy_from_user(&self, offset: usize, dst: &mut [u8]) -> Result<(), DeviceError>;
}

fn checked_range(
    offset: usize,
    len: usize,
    available: usize,
) -> Result<std::ops::Range<usize>, DeviceError> {
    match offset.checked_add(len) {
        Some(end) if end <= available => Ok(offset..end),
        _ => Err(DeviceError::Fault {
            offset: offset.min(available),
        }),
    }
}

impl UserWriter for [u8] {
    fn copy_to_user(&mut self, offset: usize, src: &[u8]) -> Result<(), DeviceError> {
        let range = checked_range(offset, src.len(), self.len())?;
        self[range].copy_from_slice(src);
        Ok(())
    }
}

impl UserWriter for Vec<u8> {
    fn copy_to_user(&mut self, offset: usize, src: &[u8]) -> Result<(), DeviceError> {
        self.as_mut_slice().copy_to_user(offset, src)
    }
}

impl UserReader for [u8] {
    fn copy_from_user(&self, offset: usize, dst: &mut [u8]) -> Result<(), DeviceError> {
        let range = checked_range(offset, dst.len(), self.len())?;
        dst.copy_from_slice(&self[range]);
        Ok(())
    }
}

impl UserReader for Vec<u8> {
    fn copy_from_user(&self, offset: usize, dst: &mut [u8]) -> Result<(), DeviceError> {
        self.as_slice().copy_from_user(offset, dst)
    }
}
