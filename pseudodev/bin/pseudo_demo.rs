//! Device Demo
//!
//! Runs a device service and hammers it from several concurrent clients:
//! one reader, one writer and one task flipping the whole buffer with
//! `PSEUDO_INC`. Every read is printed; each line is either all before or all
//! after an increment, never a mix.
//!
//! Set `PSEUDO_CAPACITY` (and optionally `PSEUDO_CURSOR_MODE`) to configure
//! the device; the capacity defaults to 16.

use std::sync::Arc;
use std::time::Duration;

use pseudodev::config::{ConfigError, ENV_CAPACITY};
use pseudodev::{CancellationToken, Device, DeviceClient, DeviceConfig, DeviceService, Whence};

const ROUNDS: usize = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match DeviceConfig::from_env() {
        Ok(config) => config,
        Err(ConfigError::Missing(ENV_CAPACITY)) => DeviceConfig::new(16),
        Err(e) => return Err(e.into()),
    };
    let device = Arc::new(Device::new(&config)?);
    let service = DeviceService::new(device);

    let reader = service.client();
    let writer = service.client();
    let incrementer = service.client();

    let service_task = tokio::spawn(service.run());

    let reader_task = tokio::spawn(async move { read_rounds(reader).await });
    let writer_task = tokio::spawn(async move { write_rounds(writer).await });
    let inc_task = tokio::spawn(async move { increment_rounds(incrementer).await });

    let (r, w, i) = tokio::join!(reader_task, writer_task, inc_task);
    r??;
    w??;
    i??;
    service_task.await?;

    println!("All tasks completed");
    Ok(())
}

async fn read_rounds(client: DeviceClient) -> Result<(), pseudodev::DeviceError> {
    let cancel = CancellationToken::new();
    let handle = client.open().await?;
    for round in 0..ROUNDS {
        client.seek(handle, 0, Whence::Start, &cancel).await?;
        let data = client.read(handle, 8, &cancel).await?;
        println!("[reader] round {round}: {data:02x?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    client.close(handle).await
}

async fn write_rounds(client: DeviceClient) -> Result<(), pseudodev::DeviceError> {
    let cancel = CancellationToken::new();
    let handle = client.open().await?;
    for round in 0..ROUNDS {
        let n = client.write(handle, b"demo", &cancel).await?;
        println!("[writer] round {round}: wrote {n} bytes");
        tokio::time::sleep(Duration::from_millis(7)).await;
    }
    client.close(handle).await
}

async fn increment_rounds(client: DeviceClient) -> Result<(), pseudodev::DeviceError> {
    let cancel = CancellationToken::new();
    let handle = client.open().await?;
    for round in 0..ROUNDS {
        client.increment(handle, 1, &cancel).await?;
        println!("[inc] round {round}: +1");
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    client.close(handle).await
}
