//! Device service
//!
//! Runs one [`Device`] behind a request channel so that any number of callers
//! can reach it through cloned [`DeviceClient`]s. It handles:
//! - request routing from clients to the device
//! - driving operations concurrently, so a request waiting for the device
//!   lock does not stop the loop from accepting (or cancelling) others
//! - replying to each client over its own oneshot channel
//!
//! The loop exits once every client is dropped and no request is pending.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::device::{Device, Whence};
use crate::error::DeviceError;
use crate::idgen::Handle;

/// Requests sent from `DeviceClient` to `DeviceService`
pub enum IoRequest {
    Open {
        response: oneshot::Sender<Handle>,
    },
    Close {
        handle: Handle,
        response: oneshot::Sender<()>,
    },
    /// Read `count` bytes; the reply carries exactly `count` bytes on success
    Read {
        handle: Handle,
        count: usize,
        cancel: CancellationToken,
        response: oneshot::Sender<Result<Vec<u8>, DeviceError>>,
    },
    Write {
        handle: Handle,
        data: Vec<u8>,
        cancel: CancellationToken,
        response: oneshot::Sender<Result<usize, DeviceError>>,
    },
    Seek {
        handle: Handle,
        offset: i64,
        whence: Whence,
        cancel: CancellationToken,
        response: oneshot::Sender<Result<usize, DeviceError>>,
    },
    Ioctl {
        handle: Handle,
        cmd: u32,
        arg: Vec<u8>,
        cancel: CancellationToken,
        response: oneshot::Sender<Result<(), DeviceError>>,
    },
}

/// Type alias for in-flight operations
pub type IoFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn reply<T>(response: oneshot::Sender<T>, value: T, op: &'static str) {
    if response.send(value).is_err() {
        debug!(op, "client dropped before the reply");
    }
}

/// `DeviceService` owns the device and serves client requests
pub struct DeviceService {
    device: Arc<Device>,
    /// Kept to hand out clients; dropped when `run()` starts
    system_tx: mpsc::UnboundedSender<IoRequest>,
    request_rx: mpsc::UnboundedReceiver<IoRequest>,
}

impl DeviceService {
    #[must_use]
    pub fn new(device: Arc<Device>) -> Self {
        let (system_tx, request_rx) = mpsc::unbounded_channel();
        Self {
            device,
            system_tx,
            request_rx,
        }
    }

    /// Create a client connected to this service
    #[must_use]
    pub fn client(&self) -> DeviceClient {
        DeviceClient {
            tx: self.system_tx.clone(),
        }
    }

    fn dispatch(device: &Arc<Device>, request: IoRequest) -> IoFuture {
        let device = Arc::clone(device);
        match request {
            IoRequest::Open { response } => Box::pin(async move {
                let handle = device.open().await;
                reply(response, handle, "open");
            }),
            IoRequest::Close { handle, response } => Box::pin(async move {
                device.close(handle).await;
                reply(response, (), "close");
            }),
            IoRequest::Read {
                handle,
                count,
                cancel,
                response,
            } => Box::pin(async move {
                let mut buf = Vec::new();
                if buf.try_reserve_exact(count).is_err() {
                    debug!(count, "read buffer allocation failed");
                    reply(response, Err(DeviceError::Fault { offset: 0 }), "read");
                    return;
                }
                buf.resize(count, 0);
                let result = device.read(handle, count, &mut buf, &cancel).await;
                reply(response, result.map(|_| buf), "read");
            }),
            IoRequest::Write {
                handle,
                data,
                cancel,
                response,
            } => Box::pin(async move {
                let result = device.write(handle, data.len(), &data, &cancel).await;
                reply(response, result, "write");
            }),
            IoRequest::Seek {
                handle,
                offset,
                whence,
                cancel,
                response,
            } => Box::pin(async move {
                let result = device.seek(handle, offset, whence, &cancel).await;
                reply(response, result, "seek");
            }),
            IoRequest::Ioctl {
                handle,
                cmd,
                arg,
                cancel,
                response,
            } => Box::pin(async move {
                let result = device.ioctl(handle, cmd, &arg, &cancel).await;
                reply(response, result, "ioctl");
            }),
        }
    }

    /// Main event loop
    pub async fn run(self) {
        let Self {
            device,
            system_tx,
            mut request_rx,
        } = self;
        // Drop our copy of the sender so the channel closes when all clients finish
        drop(system_tx);

        info!(capacity = device.capacity(), "device service started");

        let mut pending_ops: FuturesUnordered<IoFuture> = FuturesUnordered::new();
        let mut request_rx_open = true;

        loop {
            if !request_rx_open && pending_ops.is_empty() {
                info!("no more work, exiting");
                break;
            }

            tokio::select! {
                request = request_rx.recv(), if request_rx_open => {
                    if let Some(request) = request {
                        trace!(pending = pending_ops.len(), "received request");
                        pending_ops.push(Self::dispatch(&device, request));
                    } else {
                        debug!("request channel closed");
                        request_rx_open = false;
                    }
                }

                Some(()) = pending_ops.next(), if !pending_ops.is_empty() => {
                    trace!(pending = pending_ops.len(), "operation completed");
                }
            }
        }
    }
}

/// Cloneable handle for talking to a running `DeviceService`
///
/// Every method fails with `DeviceError::Disconnected` once the service is gone.
#[derive(Clone)]
pub struct DeviceClient {
    tx: mpsc::UnboundedSender<IoRequest>,
}

impl DeviceClient {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> IoRequest,
    ) -> Result<T, DeviceError> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(make(response))
            .map_err(|_| DeviceError::Disconnected)?;
        rx.await.map_err(|_| DeviceError::Disconnected)
    }

    /// # Errors
    ///
    /// Fails only if the service is gone.
    pub async fn open(&self) -> Result<Handle, DeviceError> {
        self.call(|response| IoRequest::Open { response }).await
    }

    /// # Errors
    ///
    /// Fails only if the service is gone.
    pub async fn close(&self, handle: Handle) -> Result<(), DeviceError> {
        self.call(|response| IoRequest::Close { handle, response })
            .await
    }

    /// # Errors
    ///
    /// See [`Device::read`].
    pub async fn read(
        &self,
        handle: Handle,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, DeviceError> {
        self.call(|response| IoRequest::Read {
            handle,
            count,
            cancel: cancel.clone(),
            response,
        })
        .await?
    }

    /// # Errors
    ///
    /// See [`Device::write`].
    pub async fn write(
        &self,
        handle: Handle,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<usize, DeviceError> {
        self.call(|response| IoRequest::Write {
            handle,
            data: data.to_vec(),
            cancel: cancel.clone(),
            response,
        })
        .await?
    }

    /// # Errors
    ///
    /// See [`Device::seek`].
    pub async fn seek(
        &self,
        handle: Handle,
        offset: i64,
        whence: Whence,
        cancel: &CancellationToken,
    ) -> Result<usize, DeviceError> {
        self.call(|response| IoRequest::Seek {
            handle,
            offset,
            whence,
            cancel: cancel.clone(),
            response,
        })
        .await?
    }

    /// # Errors
    ///
    /// See [`Device::ioctl`].
    pub async fn ioctl(
        &self,
        handle: Handle,
        cmd: u32,
        arg: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), DeviceError> {
        self.call(|response| IoRequest::Ioctl {
            handle,
            cmd,
            arg: arg.to_vec(),
            cancel: cancel.clone(),
            response,
        })
        .await?
    }

    /// # Errors
    ///
    /// See [`Device::increment`].
    pub async fn increment(
        &self,
        handle: Handle,
        delta: i8,
        cancel: &CancellationToken,
    ) -> Result<(), DeviceError> {
        self.ioctl(handle, crate::ioctl::PSEUDO_INC, &delta.to_ne_bytes(), cancel)
            .await
    }
}
