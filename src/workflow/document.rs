//! Workflow documents
//!
//! The JSON form of a workflow. Only declarative specs are persisted; the
//! bound actions and waits are rebuilt by replaying every step through the
//! resolver on import.

use crate::error::{Result, WorkflowError};
use crate::runtime::resolver::Resolver;
use crate::workflow::steps::{StepRegistry, Workflow};
use crate::workflow::types::{now_epoch, Step, WorkflowMeta};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_name() -> String {
    "Imported Workflow".to_string()
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Persisted workflow document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default = "Uuid::new_v4")]
    pub workflow_id: Uuid,
    #[serde(default = "default_name")]
    pub workflow_name: String,
    #[serde(default = "default_version")]
    pub workflow_version: String,
    #[serde(default)]
    pub workflow_description: String,
    #[serde(default = "now_epoch")]
    pub created_at: f64,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl WorkflowDocument {
    /// Snapshot a workflow's metadata and declarative step specs
    pub fn export(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.meta.id,
            workflow_name: workflow.meta.name.clone(),
            workflow_version: workflow.meta.version.clone(),
            workflow_description: workflow.meta.description.clone(),
            created_at: workflow.meta.created_at,
            steps: workflow.steps.iter().map(|bound| bound.step().clone()).collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| WorkflowError::MalformedDocument(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| WorkflowError::Storage(e.to_string()))
    }

    /// Build a fresh workflow, replaying every step through the resolver
    ///
    /// Duplicate ids and specs the resolver rejects both surface as
    /// `MalformedDocument`.
    pub fn into_workflow(self, resolver: &Resolver) -> Result<Workflow> {
        let mut steps = StepRegistry::new(resolver.clone());
        for step in self.steps {
            let id = step.id.clone();
            steps.insert_step(step, None).map_err(|e| {
                WorkflowError::MalformedDocument(format!("step '{}': {}", id, e))
            })?;
        }
        Ok(Workflow {
            meta: WorkflowMeta {
                id: self.workflow_id,
                name: self.workflow_name,
                version: self.workflow_version,
                description: self.workflow_description,
                created_at: self.created_at,
            },
            steps,
        })
    }
}

/// Export a workflow as pretty-printed JSON
pub fn export_json(workflow: &Workflow) -> Result<String> {
    WorkflowDocument::export(workflow).to_json()
}

/// Parse and resolve a document into a new workflow
pub fn import_json(json: &str, resolver: &Resolver) -> Result<Workflow> {
    let workflow = WorkflowDocument::from_json(json)?.into_workflow(resolver)?;
    tracing::info!(
        "📥 Imported workflow: {} ({} steps)",
        workflow.meta.name,
        workflow.steps.len()
    );
    Ok(workflow)
}

impl Workflow {
    /// Replace this workflow with the document's content
    ///
    /// On error the current workflow is left as it was.
    pub fn load_json(&mut self, json: &str) -> Result<()> {
        let resolver = self.steps.resolver().clone();
        *self = import_json(json, &resolver)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeSettings;
    use crate::device::DeviceSet;
    use serde_json::json;
    use std::sync::Arc;

    fn resolver() -> Resolver {
        Resolver::new(Arc::new(DeviceSet::new()), Arc::new(RuntimeSettings::default()))
    }

    #[test]
    fn metadata_defaults_when_absent() {
        let doc = WorkflowDocument::from_json(r#"{"steps": []}"#).unwrap();
        assert_eq!(doc.workflow_name, "Imported Workflow");
        assert_eq!(doc.workflow_version, "1.0");
        assert_eq!(doc.workflow_description, "");
        assert!(doc.created_at > 0.0);
    }

    #[test]
    fn missing_step_field_is_malformed() {
        let json = json!({
            "workflow_name": "broken",
            "steps": [{"id": "a", "name": "no type", "action_config": {"type": "none"},
                       "wait_config": {"type": "none"}, "timeout": 1.0, "created_at": 0.0}]
        });
        let err = import_json(&json.to_string(), &resolver()).unwrap_err();
        assert!(matches!(err, WorkflowError::MalformedDocument(_)));
    }

    #[test]
    fn failed_load_keeps_current_workflow() {
        let mut workflow = Workflow::new("keep me", resolver());
        let err = workflow.load_json("{not json").unwrap_err();
        assert!(matches!(err, WorkflowError::MalformedDocument(_)));
        assert_eq!(workflow.name(), "keep me");
    }
}
