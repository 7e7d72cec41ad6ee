//! Control codes
//!
//! Codes follow the Linux `_IOC` layout so that a caller built against the
//! driver headers (`_IOW('p', 1, signed char)`) passes the same number here.

use crate::error::DeviceError;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

/// Caller writes, device reads
const IOC_WRITE: u32 = 1;

/// `_IOW(ty, nr, T)` where `size == size_of::<T>()`
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn iow(ty: u8, nr: u8, size: usize) -> u32 {
    (IOC_WRITE << IOC_DIRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

/// Magic number of the device
pub const PSEUDO_MAGIC: u8 = b'p';

/// Add a signed byte to every byte of the buffer
pub const PSEUDO_INC: u32 = iow(PSEUDO_MAGIC, 1, std::mem::size_of::<i8>());

/// Recognized control operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    Increment,
}

impl ControlCode {
    /// Number of argument bytes the operation reads from the caller
    #[must_use]
    pub fn arg_size(self) -> usize {
        match self {
            Self::Increment => std::mem::size_of::<i8>(),
        }
    }
}

impl TryFrom<u32> for ControlCode {
    type Error = DeviceError;

    fn try_from(cmd: u32) -> Result<Self, Self::Error> {
        match cmd {
            PSEUDO_INC => Ok(Self::Increment),
            other => Err(DeviceError::Unsupported(other)),
        }
    }
}

impl From<ControlCode> for u32 {
    fn from(code: ControlCode) -> Self {
        match code {
            ControlCode::Increment => PSEUDO_INC,
        }
    }
}
