//! Runtime Execution Layer
//!
//! Everything that happens while a workflow runs:
//! - Resolving declarative specs into bound actions and waits
//! - Detecting completion on motion controllers and peripherals
//! - Executing steps under timeouts and device leases
//! - Sequencing steps with jumps, fallbacks and parallel fan-out
//! - Publishing progress for status readers

// Payload encoding for peripheral commands
pub mod encoding;

// Spec -> callable binding
pub mod resolver;

// Completion detection strategies
pub mod detector;

// Per-step execution handlers
pub mod executor;

// Step traversal
pub mod sequencer;

// Execution record and status snapshots
pub mod status;

// Re-export main types
pub use detector::Completion;
pub use executor::StepExecutor;
pub use resolver::{BoundAction, BoundStep, BoundWait, Resolver};
pub use sequencer::{RunOutcome, Sequencer};
pub use status::{CompletedStep, RunStatus, StatusReport, StatusReporter};
