//! Armflow: workflow sequencer for robot arm and serial peripheral cells
//!
//! This library provides the step registry, action resolution, completion
//! detection and sequencing engine, plus JSON persistence and a small HTTP
//! control surface.

// Core configuration and setup
pub mod config;

// Error taxonomy
pub mod error;

// Device handle layer - motion controller and serial peripherals
pub mod device;

// Workflow management layer - definitions, editing, documents and registry
pub mod workflow;

// Runtime execution engine - resolution, detection and sequencing
pub mod runtime;

// HTTP API layer - workflow management and run control
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use device::{DeviceSet, MotionHandle, PeripheralHandle};
pub use error::{DeviceError, WorkflowError};
pub use runtime::{Resolver, RunOutcome, RunStatus, Sequencer, StatusReporter};
pub use server::start_server;
pub use workflow::{Workflow, WorkflowRegistry};
