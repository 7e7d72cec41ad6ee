//! The pseudo device
//!
//! A fixed-capacity byte buffer behind one lock. Every operation that touches
//! the buffer or a cursor runs with the lock held, so operations are totally
//! ordered and a bulk transform never interleaves with a read or a write.
//!
//! Offset rules:
//! - `read` wraps: when the cursor reaches the end it restarts at 0, so any
//!   `count` can be served. The wrap happens lazily before the next byte, so a
//!   read that ends exactly at the end leaves the cursor at `capacity`.
//! - `write` never wraps: it is truncated to the space left, and at the end it
//!   accepts nothing.
//! - `seek` only accepts positions in `[0, capacity)`, even though `write` may
//!   legitimately leave the cursor at `capacity`.
//!
//! # Waiting for the lock
//!
//! Operations that move data take a [`CancellationToken`]. If the lock is
//! busy, the caller waits until it is released or until the token is
//! cancelled; in the latter case the call returns
//! [`DeviceError::Interrupted`] without touching any state. A cancelled
//! token does not prevent taking a free lock.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, CursorMode, DeviceConfig};
use crate::error::DeviceError;
use crate::idgen::{Handle, IdGen};
use crate::ioctl::ControlCode;
use crate::user::{UserReader, UserWriter};

/// Reference point of a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// `SEEK_SET`
    Start,
    /// `SEEK_CUR`
    Current,
    /// `SEEK_END`; note the device treats `offset 0` as the last byte
    End,
}

impl TryFrom<i32> for Whence {
    type Error = DeviceError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Start),
            1 => Ok(Self::Current),
            2 => Ok(Self::End),
            other => Err(DeviceError::InvalidWhence(other)),
        }
    }
}

enum Cursor {
    Shared(usize),
    PerHandle(HashMap<Handle, usize>),
}

struct DeviceState {
    buffer: Vec<u8>,
    cursor: Cursor,
    open: HashSet<Handle>,
}

impl DeviceState {
    fn position(&self, handle: Handle) -> Result<usize, DeviceError> {
        if !self.open.contains(&handle) {
            return Err(DeviceError::BadHandle(handle));
        }
        Ok(match &self.cursor {
            Cursor::Shared(pos) => *pos,
            Cursor::PerHandle(positions) => positions.get(&handle).copied().unwrap_or(0),
        })
    }

    /// Caller must have validated `handle` with `position()`
    fn set_position(&mut self, handle: Handle, pos: usize) {
        match &mut self.cursor {
            Cursor::Shared(shared) => *shared = pos,
            Cursor::PerHandle(positions) => {
                positions.insert(handle, pos);
            }
        }
    }

    fn increment(&mut self, delta: i8) {
        let step = u8::from_ne_bytes(delta.to_ne_bytes());
        for byte in &mut self.buffer {
            *byte = byte.wrapping_add(step);
        }
    }
}

/// Single-buffer virtual storage device
///
/// Share it between callers with `Arc<Device>`; all methods take `&self`.
pub struct Device {
    capacity: usize,
    cursor_mode: CursorMode,
    state: Mutex<DeviceState>,
    ids: IdGen,
}

impl Device {
    /// Create a device and fill it so that `buffer[i] == i mod 256`
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid (zero capacity).
    pub fn new(config: &DeviceConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        #[allow(clippy::cast_possible_truncation)]
        let buffer: Vec<u8> = (0..config.capacity).map(|i| i as u8).collect();
        let cursor = match config.cursor_mode {
            CursorMode::Shared => Cursor::Shared(0),
            CursorMode::PerHandle => Cursor::PerHandle(HashMap::new()),
        };

        log::debug!(
            "pseudo: created device, capacity {}, cursor mode {:?}",
            config.capacity,
            config.cursor_mode
        );

        Ok(Self {
            capacity: config.capacity,
            cursor_mode: config.cursor_mode,
            state: Mutex::new(DeviceState {
                buffer,
                cursor,
                open: HashSet::new(),
            }),
            ids: IdGen::new(),
        })
    }

    /// Shortcut for a shared-cursor device of the given capacity
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ZeroCapacity` if `capacity` is 0.
    pub fn with_capacity(capacity: usize) -> Result<Self, ConfigError> {
        Self::new(&DeviceConfig::new(capacity))
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn cursor_mode(&self) -> CursorMode {
        self.cursor_mode
    }

    /// Take the lock, giving up if `cancel` fires while waiting
    async fn lock_interruptible(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'_, DeviceState>, DeviceError> {
        tokio::select! {
            biased;
            guard = self.state.lock() => Ok(guard),
            () = cancel.cancelled() => {
                log::debug!("pseudo: lock wait interrupted");
                Err(DeviceError::Interrupted)
            }
        }
    }

    /// Open a session. Always succeeds.
    pub async fn open(&self) -> Handle {
        let handle = self.ids.next_handle();
        let mut state = self.state.lock().await;
        state.open.insert(handle);
        if let Cursor::PerHandle(positions) = &mut state.cursor {
            positions.insert(handle, 0);
        }
        log::debug!("pseudo: opening device, handle {handle}");
        handle
    }

    /// Close a session. Always succeeds; the buffer is kept.
    pub async fn close(&self, handle: Handle) {
        let mut state = self.state.lock().await;
        if !state.open.remove(&handle) {
            log::warn!("pseudo: close() called on handle {handle} which is not open");
            return;
        }
        if let Cursor::PerHandle(positions) = &mut state.cursor {
            positions.remove(&handle);
        }
        log::debug!("pseudo: closing device, handle {handle}");
    }

    /// Read exactly `count` bytes into `out`, wrapping at the end of the buffer
    ///
    /// # Errors
    ///
    /// - `Interrupted` if `cancel` fires while waiting for the lock
    /// - `BadHandle` if `handle` is not open
    /// - `Fault` if `out` cannot take `count` bytes; the cursor is not moved
    pub async fn read<W>(
        &self,
        handle: Handle,
        count: usize,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<usize, DeviceError>
    where
        W: UserWriter + ?Sized,
    {
        let mut state = self.lock_interruptible(cancel).await?;
        let start = state.position(handle)?;

        let mut pos = start;
        let mut done = 0;
        while done < count {
            if pos >= self.capacity {
                pos = 0;
            }
            let chunk = (count - done).min(self.capacity - pos);
            // pos < capacity and pos + chunk <= capacity
            out.copy_to_user(done, &state.buffer[pos..pos + chunk])?;
            done += chunk;
            pos += chunk;
        }

        state.set_position(handle, pos);
        log::trace!("pseudo: read handle {handle}, count {count}, pos {start} -> {pos}");
        Ok(count)
    }

    /// Write up to `count` bytes from `data` at the cursor
    ///
    /// The write is truncated to the space left before the end of the buffer;
    /// the returned count tells how much was taken. At the end of the buffer
    /// nothing is written and 0 is returned.
    ///
    /// # Errors
    ///
    /// - `Interrupted` if `cancel` fires while waiting for the lock
    /// - `BadHandle` if `handle` is not open
    /// - `Fault` if `data` cannot supply the (truncated) count; nothing is
    ///   committed in that case
    pub async fn write<R>(
        &self,
        handle: Handle,
        count: usize,
        data: &R,
        cancel: &CancellationToken,
    ) -> Result<usize, DeviceError>
    where
        R: UserReader + ?Sized,
    {
        let mut state = self.lock_interruptible(cancel).await?;
        let pos = state.position(handle)?;

        if pos >= self.capacity {
            log::trace!("pseudo: write handle {handle} at end of device, nothing written");
            return Ok(0);
        }

        let n = count.min(self.capacity - pos);
        let mut staged = vec![0u8; n];
        data.copy_from_user(0, &mut staged)?;

        state.buffer[pos..pos + n].copy_from_slice(&staged);
        state.set_position(handle, pos + n);

        log::trace!("pseudo: write handle {handle}, requested {count}, written {n}, pos {pos}");
        Ok(n)
    }

    /// Move the cursor. The result must lie in `[0, capacity)`.
    ///
    /// # Errors
    ///
    /// - `Interrupted` if `cancel` fires while waiting for the lock
    /// - `BadHandle` if `handle` is not open
    /// - `OutOfRange` if the new position is outside the buffer; the cursor is
    ///   not moved
    pub async fn seek(
        &self,
        handle: Handle,
        offset: i64,
        whence: Whence,
        cancel: &CancellationToken,
    ) -> Result<usize, DeviceError> {
        let mut state = self.lock_interruptible(cancel).await?;
        let pos = state.position(handle)?;

        let capacity = self.capacity as i128;
        let offset = i128::from(offset);
        let candidate = match whence {
            Whence::Start => offset,
            Whence::Current => pos as i128 + offset,
            Whence::End => capacity + offset - 1,
        };

        let out_of_range = DeviceError::OutOfRange {
            candidate,
            capacity: self.capacity,
        };
        if candidate < 0 || candidate >= capacity {
            return Err(out_of_range);
        }
        let new_pos = usize::try_from(candidate).map_err(|_| out_of_range)?;

        state.set_position(handle, new_pos);
        log::trace!("pseudo: seek handle {handle}, {whence:?} {offset}, pos {pos} -> {new_pos}");
        Ok(new_pos)
    }

    /// Run a control operation; `arg` holds its argument bytes
    ///
    /// # Errors
    ///
    /// - `Unsupported` for an unknown `cmd`
    /// - `Interrupted` if `cancel` fires while waiting for the lock
    /// - `BadHandle` if `handle` is not open
    /// - `Fault` if the argument cannot be read from `arg`
    pub async fn ioctl<R>(
        &self,
        handle: Handle,
        cmd: u32,
        arg: &R,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceError>
    where
        R: UserReader + ?Sized,
    {
        let code = ControlCode::try_from(cmd)?;
        let mut state = self.lock_interruptible(cancel).await?;
        state.position(handle)?;

        match code {
            ControlCode::Increment => {
                let mut raw = [0u8; std::mem::size_of::<i8>()];
                arg.copy_from_user(0, &mut raw[..code.arg_size()])?;
                let delta = i8::from_ne_bytes(raw);
                state.increment(delta);
                log::trace!("pseudo: increment handle {handle}, delta {delta}");
            }
        }
        Ok(())
    }

    /// Add `delta` (mod 256) to every byte of the buffer
    ///
    /// # Errors
    ///
    /// Same as [`Device::ioctl`] with `PSEUDO_INC`.
    pub async fn increment(
        &self,
        handle: Handle,
        delta: i8,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceError> {
        self.ioctl(handle, ControlCode::Increment.into(), &delta.to_ne_bytes()[..], cancel)
            .await
    }

    /// Current cursor of `handle`
    ///
    /// # Errors
    ///
    /// Returns `BadHandle` if `handle` is not open.
    pub async fn tell(&self, handle: Handle) -> Result<usize, DeviceError> {
        self.state.lock().await.position(handle)
    }

    /// Snapshot of the whole buffer
    pub async fn contents(&self) -> Vec<u8> {
        self.state.lock().await.buffer.clone()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device(capacity={}, cursor_mode={:?}, locked={})",
            self.capacity,
            self.cursor_mode,
            self.state.try_lock().is_err()
        )
    }
}
