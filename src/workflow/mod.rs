//! Workflow Management Layer
//!
//! Workflow definitions, editing, persistence and the named registry:
//! - Type definitions (Step, action/wait specs, metadata)
//! - The editable step registry
//! - JSON documents and file storage
//! - Lock-free named registry using ArcSwap
//! - Pre-run validation with petgraph
//! - Built-in templates

// Core workflow type definitions
pub mod types;

// Ordered, editable step list
pub mod steps;

// JSON document import/export
pub mod document;

// File persistence for documents and the registry index
pub mod storage;

// Named registry using ArcSwap
pub mod registry;

// Control-flow validation
pub mod validate;

// Built-in coffee cell templates
pub mod templates;

// Re-export commonly used types
pub use document::WorkflowDocument;
pub use registry::{RegistryEntry, WorkflowRegistry};
pub use steps::{StepRegistry, Workflow};
pub use storage::WorkflowStorage;
pub use templates::Template;
pub use types::{ActionSpec, ConditionSpec, Step, StepDraft, StepFlow, StepPatch, StepType, WaitSpec};
pub use validate::{validate, ValidationReport};
