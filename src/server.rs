//! Server setup and initialization
//!
//! Wires together the device set, resolver, registry and HTTP routes.
//! Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_run_routes, create_workflow_routes, AppState},
    config::Config,
    device::DeviceSet,
    runtime::resolver::Resolver,
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Devices are attached by the caller; the same set is shared by every
/// workflow the server loads.
pub async fn create_app(config: Config, devices: Arc<DeviceSet>) -> Result<Router> {
    tracing::info!("📁 Using workflow directory: {}", config.storage.workflow_dir);
    let storage = WorkflowStorage::new(&config.storage.workflow_dir);

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(storage));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflow registry: {}", e))?;

    tracing::info!("⚙️ Initializing resolver (unknown motion policy: {:?})", config.runtime.unknown_motion_policy);
    let resolver = Resolver::new(devices, Arc::new(config.runtime.clone()));

    let app_state = AppState::new(registry, resolver);

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_run_routes())
        .with_state(app_state);

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config, devices: Arc<DeviceSet>) -> Result<()> {
    // Initialize tracing subscriber for logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting armflow server...");

    let app = create_app(config.clone(), devices).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
