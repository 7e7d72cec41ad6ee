use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Token returned by `open`, identifying one open session on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    id: u64,
}

impl Handle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.id)
    }
}

/// Thread-safe handle generator
#[derive(Debug)]
pub struct IdGen {
    next_id: AtomicU64,
}

impl IdGen {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Get the next unique handle
    pub fn next_handle(&self) -> Handle {
        Handle::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}
