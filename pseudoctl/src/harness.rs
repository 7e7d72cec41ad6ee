//! Runs steps against a device service through one open handle.

use std::fmt;
use std::fmt::Write as _;

use pseudodev::{CancellationToken, DeviceClient, DeviceError, Handle};
use tracing::debug;

use crate::step::Step;

/// Result of one successful step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Read(Vec<u8>),
    Written { requested: usize, written: usize },
    Seeked(usize),
    Incremented(i8),
    Control(u32),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(data) => write!(f, "Read {} bytes:\n{}", data.len(), hex_dump(data)),
            Self::Written { requested, written } if written < requested => {
                write!(f, "Wrote {written} of {requested} bytes (device full)")
            }
            Self::Written { written, .. } => write!(f, "Wrote {written} bytes"),
            Self::Seeked(pos) => write!(f, "New offset after seek: {pos}"),
            Self::Incremented(delta) => {
                write!(f, "PSEUDO_INC ioctl completed successfully (delta {delta})")
            }
            Self::Control(cmd) => write!(f, "ioctl {cmd:#010x} completed successfully"),
        }
    }
}

/// Classic 16-bytes-per-line hex dump with offsets
#[must_use]
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in data.chunks(16).enumerate() {
        if line > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:08x}:", line * 16);
        for byte in chunk {
            let _ = write!(out, " {byte:02x}");
        }
    }
    out
}

/// A failed step, with the errno a C harness would have printed
#[derive(Debug)]
pub struct StepFailure {
    pub op: &'static str,
    pub source: DeviceError,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed: {} (errno {})",
            self.op,
            self.source,
            self.source.errno()
        )
    }
}

impl std::error::Error for StepFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// One open session on the device
pub struct Harness {
    client: DeviceClient,
    handle: Handle,
    cancel: CancellationToken,
}

impl Harness {
    /// Open the device
    ///
    /// # Errors
    ///
    /// Fails only if the service is not running.
    pub async fn open(
        client: DeviceClient,
        cancel: CancellationToken,
    ) -> Result<Self, StepFailure> {
        let handle = client
            .open()
            .await
            .map_err(|source| StepFailure { op: "open", source })?;
        debug!(%handle, "device opened");
        Ok(Self {
            client,
            handle,
            cancel,
        })
    }

    async fn call(&self, step: &Step) -> Result<Outcome, DeviceError> {
        let (client, handle, cancel) = (&self.client, self.handle, &self.cancel);
        match step {
            Step::Read(count) => client.read(handle, *count, cancel).await.map(Outcome::Read),
            Step::Write(data) => client
                .write(handle, data, cancel)
                .await
                .map(|written| Outcome::Written {
                    requested: data.len(),
                    written,
                }),
            Step::Seek { offset, whence } => client
                .seek(handle, *offset, *whence, cancel)
                .await
                .map(Outcome::Seeked),
            Step::Inc(delta) => client
                .increment(handle, *delta, cancel)
                .await
                .map(|()| Outcome::Incremented(*delta)),
            Step::Ioctl { cmd, arg } => client
                .ioctl(handle, *cmd, arg, cancel)
                .await
                .map(|()| Outcome::Control(*cmd)),
        }
    }

    /// Run one step
    ///
    /// An interrupted step is reported as is: the harness token is the only
    /// thing that interrupts a wait, so retrying with it would fail again.
    ///
    /// # Errors
    ///
    /// Returns the device error together with the name of the call.
    pub async fn run_step(&self, step: &Step) -> Result<Outcome, StepFailure> {
        let op = match step {
            Step::Read(_) => "read",
            Step::Write(_) => "write",
            Step::Seek { .. } => "llseek",
            Step::Inc(_) => "PSEUDO_INC ioctl",
            Step::Ioctl { .. } => "ioctl",
        };
        let outcome = self
            .call(step)
            .await
            .map_err(|source| StepFailure { op, source })?;
        debug!(op, %outcome, "step completed");
        Ok(outcome)
    }

    /// Run steps in order, stopping at the first failure
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error; outcomes of earlier steps are
    /// lost, so callers wanting them should use `run_step`.
    pub async fn run_all(&self, steps: &[Step]) -> Result<Vec<Outcome>, StepFailure> {
        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps {
            outcomes.push(self.run_step(step).await?);
        }
        Ok(outcomes)
    }

    /// Close the handle
    ///
    /// # Errors
    ///
    /// Fails only if the service is not running.
    pub async fn close(self) -> Result<(), StepFailure> {
        self.client
            .close(self.handle)
            .await
            .map_err(|source| StepFailure { op: "close", source })
    }
}
