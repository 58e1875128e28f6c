//! Armflow server binary
//!
//! Loads `.env`, builds the configuration from the environment and starts the
//! HTTP control server. Device transports are attached by integrators through
//! the library; the stock binary starts with an empty device set.

use armflow::{config::Config, device::DeviceSet, server::start_server};
use std::sync::Arc;

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Run control at /api/workflows/{name}/run and /api/run/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::default();

    start_server(config, Arc::new(DeviceSet::new())).await?;

    Ok(())
}
