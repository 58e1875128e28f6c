//! Step Registry
//!
//! The ordered, editable step list of one workflow. Every step is stored in
//! its bound form, so an edit that would leave a step unrunnable is rejected
//! on the spot and the list is never half-updated.

use crate::error::{Result, WorkflowError};
use crate::runtime::resolver::{BoundStep, Resolver};
use crate::workflow::types::{now_epoch, Step, StepDraft, StepFlow, StepPatch, StepSummary, WorkflowMeta};
use uuid::Uuid;

/// Ordered list of bound steps
#[derive(Debug, Clone)]
pub struct StepRegistry {
    steps: Vec<BoundStep>,
    resolver: Resolver,
}

impl StepRegistry {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            steps: Vec::new(),
            resolver,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Add a new step at `position` (default: end) and return its generated id
    pub fn add(&mut self, draft: StepDraft, position: Option<usize>) -> Result<String> {
        let step = Step {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            step_type: draft.step_type,
            action_config: draft.action,
            wait_config: draft.wait,
            timeout: draft.timeout,
            created_at: now_epoch(),
            updated_at: None,
            flow: draft.flow,
        };
        let id = step.id.clone();
        self.insert_step(step, position)?;
        Ok(id)
    }

    /// Insert a fully formed step, keeping its id
    pub(crate) fn insert_step(&mut self, step: Step, position: Option<usize>) -> Result<()> {
        let position = position.unwrap_or(self.steps.len());
        if position > self.steps.len() {
            return Err(WorkflowError::InvalidPosition {
                position,
                max: self.steps.len(),
            });
        }
        if self.position_of(&step.id).is_some() {
            return Err(WorkflowError::InvalidSpec(format!("duplicate step id '{}'", step.id)));
        }
        let bound = self.resolver.resolve_step(step)?;
        tracing::info!("➕ Step added: {} ({:?}) at {}", bound.name(), bound.step_type(), position);
        self.steps.insert(position, bound);
        Ok(())
    }

    /// Apply a patch atomically; the step is untouched if re-resolution fails
    pub fn update(&mut self, id: &str, patch: StepPatch) -> Result<()> {
        let index = self.require(id)?;
        let mut step = self.steps[index].step().clone();
        if let Some(name) = patch.name {
            step.name = name;
        }
        if let Some(step_type) = patch.step_type {
            step.step_type = step_type;
        }
        if let Some(timeout) = patch.timeout {
            step.timeout = timeout;
        }
        if let Some(action) = patch.action {
            step.action_config = action;
        }
        if let Some(wait) = patch.wait {
            step.wait_config = wait;
        }
        step.updated_at = Some(now_epoch());

        self.steps[index] = self.resolver.resolve_step(step)?;
        tracing::info!("✏️ Step updated: {}", id);
        Ok(())
    }

    /// Replace the control references of a step
    pub fn set_flow(&mut self, id: &str, flow: StepFlow) -> Result<()> {
        let index = self.require(id)?;
        let bound = &mut self.steps[index];
        bound.set_flow(flow);
        bound.touch();
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<Step> {
        let index = self.require(id)?;
        let removed = self.steps.remove(index).into_step();
        tracing::info!("🗑️ Step deleted: {} ({})", removed.name, removed.id);
        Ok(removed)
    }

    pub fn move_step(&mut self, id: &str, new_position: usize) -> Result<()> {
        let index = self.require(id)?;
        if new_position >= self.steps.len() {
            return Err(WorkflowError::InvalidPosition {
                position: new_position,
                max: self.steps.len() - 1,
            });
        }
        let step = self.steps.remove(index);
        self.steps.insert(new_position, step);
        tracing::info!("↕️ Step moved: {} {} -> {}", id, index, new_position);
        Ok(())
    }

    /// Copy a step to just after the original; returns the copy's id
    pub fn duplicate(&mut self, id: &str, new_name: Option<&str>) -> Result<String> {
        let index = self.require(id)?;
        let mut copy = self.steps[index].step().clone();
        copy.id = Uuid::new_v4().to_string();
        copy.name = match new_name {
            Some(name) => name.to_string(),
            None => format!("{} (Copy)", copy.name),
        };
        copy.created_at = now_epoch();
        copy.updated_at = None;

        let copy_id = copy.id.clone();
        self.insert_step(copy, Some(index + 1))?;
        Ok(copy_id)
    }

    /// Summaries in list order; call again to restart
    pub fn list(&self) -> impl Iterator<Item = StepSummary> + '_ {
        self.steps.iter().enumerate().map(|(position, bound)| {
            let step = bound.step();
            StepSummary {
                id: step.id.clone(),
                name: step.name.clone(),
                step_type: step.step_type,
                timeout: step.timeout,
                position,
            }
        })
    }

    pub fn get(&self, id: &str) -> Option<&BoundStep> {
        self.steps.iter().find(|bound| bound.id() == id)
    }

    pub fn at(&self, index: usize) -> Option<&BoundStep> {
        self.steps.get(index)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|bound| bound.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    fn require(&self, id: &str) -> Result<usize> {
        self.position_of(id)
            .ok_or_else(|| WorkflowError::StepNotFound(id.to_string()))
    }
}

/// A workflow: metadata plus its ordered steps
#[derive(Debug, Clone)]
pub struct Workflow {
    pub meta: WorkflowMeta,
    pub steps: StepRegistry,
}

impl Workflow {
    pub fn new(name: impl Into<String>, resolver: Resolver) -> Self {
        Self {
            meta: WorkflowMeta::new(name),
            steps: StepRegistry::new(resolver),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeSettings;
    use crate::device::DeviceSet;
    use crate::workflow::types::{ActionSpec, StepType, WaitSpec};
    use std::sync::Arc;

    fn registry() -> StepRegistry {
        StepRegistry::new(Resolver::new(
            Arc::new(DeviceSet::new()),
            Arc::new(RuntimeSettings::default()),
        ))
    }

    fn delay(name: &str) -> StepDraft {
        StepDraft::new(
            name,
            StepType::Delay,
            ActionSpec::Delay { seconds: 0.5 },
            WaitSpec::None,
            5.0,
        )
    }

    fn names(registry: &StepRegistry) -> Vec<String> {
        registry.list().map(|s| s.name).collect()
    }

    #[test]
    fn add_appends_and_inserts() {
        let mut steps = registry();
        steps.add(delay("a"), None).unwrap();
        steps.add(delay("c"), None).unwrap();
        steps.add(delay("b"), Some(1)).unwrap();
        assert_eq!(names(&steps), vec!["a", "b", "c"]);

        let err = steps.add(delay("z"), Some(4)).unwrap_err();
        assert_eq!(err, WorkflowError::InvalidPosition { position: 4, max: 3 });
        assert_eq!(steps.len(), 3);
    }

    #[test]
    fn failed_update_leaves_step_untouched() {
        let mut steps = registry();
        let id = steps.add(delay("a"), None).unwrap();
        let before = steps.get(&id).unwrap().step().clone();

        let err = steps
            .update(&id, StepPatch::default().name("renamed").timeout(-1.0))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidSpec(_)));
        assert_eq!(steps.get(&id).unwrap().step(), &before);

        steps.update(&id, StepPatch::default().name("renamed")).unwrap();
        let after = steps.get(&id).unwrap().step();
        assert_eq!(after.name, "renamed");
        assert!(after.updated_at.is_some());
    }

    #[test]
    fn move_checks_range_and_id() {
        let mut steps = registry();
        let a = steps.add(delay("a"), None).unwrap();
        steps.add(delay("b"), None).unwrap();
        steps.add(delay("c"), None).unwrap();

        steps.move_step(&a, 2).unwrap();
        assert_eq!(names(&steps), vec!["b", "c", "a"]);

        assert_eq!(
            steps.move_step(&a, 3).unwrap_err(),
            WorkflowError::InvalidPosition { position: 3, max: 2 }
        );
        assert_eq!(
            steps.move_step("missing", 0).unwrap_err(),
            WorkflowError::StepNotFound("missing".into())
        );
    }

    #[test]
    fn duplicate_then_delete_restores_count() {
        let mut steps = registry();
        let a = steps.add(delay("pour"), None).unwrap();
        steps.add(delay("serve"), None).unwrap();

        let copy = steps.duplicate(&a, None).unwrap();
        assert_eq!(names(&steps), vec!["pour", "pour (Copy)", "serve"]);
        assert_ne!(copy, a);

        let original = steps.get(&a).unwrap().step().clone();
        let copied = steps.get(&copy).unwrap().step().clone();
        assert_eq!(original.action_config, copied.action_config);
        assert_eq!(original.wait_config, copied.wait_config);
        assert_eq!(original.timeout, copied.timeout);

        steps.delete(&copy).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(matches!(steps.delete(&copy), Err(WorkflowError::StepNotFound(_))));
    }

    #[test]
    fn list_is_restartable() {
        let mut steps = registry();
        steps.add(delay("a"), None).unwrap();
        steps.add(delay("b"), None).unwrap();
        let first: Vec<_> = steps.list().collect();
        let second: Vec<_> = steps.list().collect();
        assert_eq!(first, second);
        assert_eq!(first[1].position, 1);
    }

    #[test]
    fn insert_step_rejects_duplicate_ids() {
        let mut steps = registry();
        let id = steps.add(delay("a"), None).unwrap();
        let step = steps.get(&id).unwrap().step().clone();
        assert!(matches!(steps.insert_step(step, None), Err(WorkflowError::InvalidSpec(_))));
    }
}
