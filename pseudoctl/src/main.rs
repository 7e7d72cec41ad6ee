use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use pseudoctl::{Cli, Harness};
use pseudodev::{CancellationToken, Device, DeviceService};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("pseudoctl: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let steps = cli.command.steps()?;
    let config = cli.device_config()?;
    let device = Arc::new(Device::new(&config)?);
    info!(capacity = device.capacity(), cursor_mode = ?device.cursor_mode(), "device ready");

    let service = DeviceService::new(device);
    let client = service.client();
    let service_task = tokio::spawn(service.run());

    // Sole client of a private device: calls never wait for the lock
    let harness = Harness::open(client, CancellationToken::new()).await?;
    let mut result = Ok(());
    for step in &steps {
        match harness.run_step(step).await {
            Ok(outcome) => println!("{outcome}"),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    harness.close().await?;
    service_task.await?;

    Ok(result?)
}
