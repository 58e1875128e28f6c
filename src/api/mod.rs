//! HTTP API Layer
//!
//! This module provides the REST API endpoints for workflow management
//! and run control. It handles:
//! - Registering, exporting and unregistering named workflows
//! - Pre-run validation
//! - Starting, observing and cancelling a run

// Workflow management endpoints (POST/GET/DELETE)
pub mod workflows;

// Run control endpoints
pub mod runs;

// Re-export router builders
pub use runs::create_run_routes;
pub use workflows::{create_workflow_routes, AppState};
