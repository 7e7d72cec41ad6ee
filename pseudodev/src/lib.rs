pub mod config;
pub mod device;
pub mod error;
pub mod idgen;
pub mod ioctl;
pub mod service;
pub mod user;

// Re-export device types for convenience
pub use device::{Device, Whence};

// Re-export error and config types
pub use config::{ConfigError, CursorMode, DeviceConfig};
pub use error::DeviceError;

pub use idgen::{Handle, IdGen};

pub use ioctl::{ControlCode, PSEUDO_INC};

// Re-export the service layer
pub use service::{DeviceClient, DeviceService, IoRequest};

pub use user::{UserReader, UserWriter};

// Callers need the token type to interrupt lock waits
pub use tokio_util::sync::CancellationToken;
