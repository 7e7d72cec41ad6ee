//! Error types for device operations.
//!
//! Every variant maps to the errno a character device driver would return,
//! so callers speaking the POSIX dialect can translate results directly.

use std::io;

use crate::idgen::Handle;

pub const EBADF: i32 = 9;
pub const EFAULT: i32 = 14;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;
pub const ENOTTY: i32 = 25;
/// Kernel-internal "restart the system call" code
pub const ERESTARTSYS: i32 = 512;

/// Error type for device operations
///
/// None of these is fatal: the device stays usable after any of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Waiting for the device lock was cancelled; nothing was done, retry.
    #[error("interrupted while waiting for the device lock")]
    Interrupted,

    /// Copying to or from caller memory failed at the given offset.
    #[error("bad address: caller buffer fault at offset {offset}")]
    Fault { offset: usize },

    #[error("seek position {candidate} outside device of capacity {capacity}")]
    OutOfRange { candidate: i128, capacity: usize },

    #[error("unsupported control code {0:#010x}")]
    Unsupported(u32),

    #[error("invalid whence value {0}")]
    InvalidWhence(i32),

    #[error("handle {0} is not open")]
    BadHandle(Handle),

    /// The device service is gone; only reported by `DeviceClient`.
    #[error("device service is not running")]
    Disconnected,
}

impl DeviceError {
    /// Positive errno value for this error
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::Interrupted => ERESTARTSYS,
            Self::Fault { .. } => EFAULT,
            Self::OutOfRange { .. } | Self::InvalidWhence(_) => EINVAL,
            Self::Unsupported(_) => ENOTTY,
            Self::BadHandle(_) => EBADF,
            Self::Disconnected => ENODEV,
        }
    }
}

impl From<DeviceError> for io::Error {
    fn from(e: DeviceError) -> Self {
        let kind = match e {
            DeviceError::Interrupted => io::ErrorKind::Interrupted,
            DeviceError::Fault { .. }
            | DeviceError::OutOfRange { .. }
            | DeviceError::InvalidWhence(_) => io::ErrorKind::InvalidInput,
            DeviceError::Unsupported(_) => io::ErrorKind::Unsupported,
            DeviceError::BadHandle(_) | DeviceError::Disconnected => io::ErrorKind::NotConnected,
        };
        io::Error::new(kind, e)
    }
}
