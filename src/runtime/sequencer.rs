//! Sequencer
//!
//! Drives a workflow's steps in list order. Condition steps can jump, failed
//! steps can run their fallback once, parallel steps fan out through the
//! executor. Progress is published to the execution record after every step.

use crate::config::RuntimeSettings;
use crate::error::{Result, WorkflowError};
use crate::runtime::executor::StepExecutor;
use crate::runtime::resolver::BoundStep;
use crate::runtime::status::{
    CompletedStep, ExecutionRecord, RunRecorder, RunStatus, StatusReporter,
};
use crate::workflow::steps::{StepRegistry, Workflow};
use crate::workflow::types::StepType;
use crate::workflow::validate::{detached_steps, main_line, validate};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Final state of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub completed: Vec<CompletedStep>,
    pub failed_step: Option<String>,
    pub failure_reason: Option<String>,
}

impl RunOutcome {
    pub fn completed_names(&self) -> Vec<String> {
        self.completed.iter().map(|step| step.name.clone()).collect()
    }
}

/// Where traversal goes after a step
enum Advance {
    Next,
    Jump(usize),
}

/// Owns one workflow and runs it
#[derive(Debug)]
pub struct Sequencer {
    workflow: Workflow,
    executor: StepExecutor,
    settings: Arc<RuntimeSettings>,
    record: Arc<ArcSwap<ExecutionRecord>>,
}

impl Sequencer {
    /// Devices and settings come from the workflow's resolver
    pub fn new(workflow: Workflow) -> Self {
        let resolver = workflow.steps.resolver();
        let settings = Arc::clone(resolver.settings());
        let executor = StepExecutor::new(Arc::clone(resolver.devices()), Arc::clone(&settings));
        let record = Arc::new(ArcSwap::from_pointee(ExecutionRecord::pending(
            workflow.name(),
            main_line(&workflow.steps).len(),
        )));
        Self {
            workflow,
            executor,
            settings,
            record,
        }
    }

    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(Arc::clone(&self.record))
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn workflow_mut(&mut self) -> &mut Workflow {
        &mut self.workflow
    }

    pub fn into_workflow(self) -> Workflow {
        self.workflow
    }

    /// Run the workflow to completion, failure or cancellation
    ///
    /// Step failures end the run with `Ok` and a `Failed` outcome. `Err` is
    /// reserved for faults in the workflow itself: no steps, failed validation,
    /// an unresolvable jump target, or a runaway loop.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunOutcome> {
        let steps = &self.workflow.steps;
        if steps.is_empty() {
            tracing::warn!("⚠️ Workflow '{}' has no steps", self.workflow.meta.name);
            return Err(WorkflowError::WorkflowEmpty);
        }
        if self.settings.validate_before_run {
            let report = validate(steps)?;
            for warning in &report.warnings {
                tracing::warn!("⚠️ {}", warning);
            }
        }

        let detached = detached_steps(steps);
        let total = main_line(steps).len();
        let recorder = RunRecorder::new(Arc::clone(&self.record));
        recorder.start(&self.workflow.meta.name, total);

        tracing::info!("🎬 Starting workflow: {} ({} steps)", self.workflow.meta.name, total);
        let run_started = tokio::time::Instant::now();

        let mut run = Run {
            steps,
            executor: &self.executor,
            recorder: &recorder,
            cancel: &cancel,
            detached: &detached,
            executions: 0,
            max_executions: self.settings.max_step_executions,
        };
        let result = run.traverse().await;

        match &result {
            Ok(()) => {
                recorder.finish(RunStatus::Completed, None);
                tracing::info!(
                    "🎉 Workflow '{}' completed in {:?}",
                    self.workflow.meta.name,
                    run_started.elapsed()
                );
            }
            Err(StepFailure::Cancelled) => {
                recorder.finish(RunStatus::Cancelled, None);
                tracing::warn!("🛑 Workflow '{}' cancelled", self.workflow.meta.name);
            }
            Err(StepFailure::Step { name, reason }) | Err(StepFailure::Fatal { name, reason, .. }) => {
                recorder.finish(RunStatus::Failed, Some((name.clone(), reason.clone())));
                tracing::error!(
                    "💥 Workflow '{}' failed at '{}': {}",
                    self.workflow.meta.name,
                    name,
                    reason
                );
            }
        }

        let record = self.record.load();
        let outcome = RunOutcome {
            status: record.status,
            completed: record.completed.clone(),
            failed_step: record.failed_step.clone(),
            failure_reason: record.failure_reason.clone(),
        };
        match result {
            Err(StepFailure::Fatal { error, .. }) => Err(error),
            _ => Ok(outcome),
        }
    }
}

/// Why traversal stopped early
enum StepFailure {
    Cancelled,
    /// The step failed and recovery was not possible
    Step { name: String, reason: String },
    /// The workflow itself is broken; surfaced as `Err` from `run`
    Fatal { name: String, reason: String, error: WorkflowError },
}

impl StepFailure {
    fn fatal(bound: &BoundStep, error: WorkflowError) -> Self {
        StepFailure::Fatal {
            name: bound.name().to_string(),
            reason: error.to_string(),
            error,
        }
    }
}

/// State of one traversal
struct Run<'a> {
    steps: &'a StepRegistry,
    executor: &'a StepExecutor,
    recorder: &'a RunRecorder,
    cancel: &'a CancellationToken,
    detached: &'a HashSet<String>,
    executions: usize,
    max_executions: usize,
}

impl Run<'_> {
    async fn traverse(&mut self) -> std::result::Result<(), StepFailure> {
        let mut index = 0;
        let mut jumped = false;

        while let Some(bound) = self.steps.at(index) {
            // detached steps only run through a referencing step or an explicit jump
            if !jumped && self.detached.contains(bound.id()) {
                index += 1;
                continue;
            }
            jumped = false;

            self.count_execution(bound)?;
            self.recorder.step_started(index, bound.name());
            tracing::info!(
                "📍 Step {}/{}: {} (type: {:?})",
                index + 1,
                self.steps.len(),
                bound.name(),
                bound.step_type()
            );

            match self.run_step(bound).await? {
                Advance::Next => index += 1,
                Advance::Jump(target) => {
                    index = target;
                    jumped = true;
                }
            }
        }
        Ok(())
    }

    fn count_execution(&mut self, bound: &BoundStep) -> std::result::Result<(), StepFailure> {
        if self.cancel.is_cancelled() {
            return Err(StepFailure::Cancelled);
        }
        self.executions += 1;
        if self.executions > self.max_executions {
            tracing::error!("❌ Step execution limit ({}) exceeded", self.max_executions);
            return Err(StepFailure::fatal(
                bound,
                WorkflowError::ExecutionLimit(self.max_executions),
            ));
        }
        Ok(())
    }

    async fn run_step(&mut self, bound: &BoundStep) -> std::result::Result<Advance, StepFailure> {
        if bound.step_type() == StepType::Condition {
            return match self.executor.execute_condition(bound, self.cancel).await {
                Ok(holds) => {
                    self.recorder
                        .step_completed(CompletedStep::now(bound.id(), bound.name()));
                    self.branch(bound, holds)
                }
                Err(error) => self.recover(bound, error).await.map(|()| Advance::Next),
            };
        }

        match self.executor.execute_step(bound, self.steps, self.cancel).await {
            Ok(sub_steps) => {
                self.recorder.step_completed(CompletedStep {
                    sub_steps,
                    ..CompletedStep::now(bound.id(), bound.name())
                });
                Ok(Advance::Next)
            }
            Err(error) => self.recover(bound, error).await.map(|()| Advance::Next),
        }
    }

    fn branch(&self, bound: &BoundStep, holds: bool) -> std::result::Result<Advance, StepFailure> {
        let flow = &bound.step().flow;
        let target = if holds { &flow.if_true } else { &flow.if_false };
        let Some(target) = target else {
            tracing::info!("➡️ Condition {} with no jump target; continuing", holds);
            return Ok(Advance::Next);
        };
        match self.steps.position_of(target) {
            Some(position) => {
                tracing::info!("↪️ Condition {}: jumping to '{}'", holds, target);
                Ok(Advance::Jump(position))
            }
            None => {
                tracing::error!("❌ Jump target '{}' does not exist", target);
                Err(StepFailure::fatal(bound, WorkflowError::StepNotFound(target.clone())))
            }
        }
    }

    /// Run the step's fallback once; its success stands in for the step
    async fn recover(&mut self, bound: &BoundStep, error: WorkflowError) -> std::result::Result<(), StepFailure> {
        if matches!(error, WorkflowError::Cancelled) || self.cancel.is_cancelled() {
            return Err(StepFailure::Cancelled);
        }
        let Some(fallback_id) = bound.step().flow.fallback_step.as_ref() else {
            return Err(StepFailure::Step {
                name: bound.name().to_string(),
                reason: error.to_string(),
            });
        };
        let Some(fallback) = self.steps.get(fallback_id) else {
            return Err(StepFailure::fatal(bound, WorkflowError::StepNotFound(fallback_id.clone())));
        };

        tracing::warn!(
            "🛟 Step '{}' failed ({}); running fallback '{}'",
            bound.name(),
            error,
            fallback.name()
        );
        self.count_execution(fallback)?;

        match self.executor.execute_step(fallback, self.steps, self.cancel).await {
            Ok(sub_steps) => {
                self.recorder.step_completed(CompletedStep {
                    recovered_by: Some(fallback.id().to_string()),
                    sub_steps,
                    ..CompletedStep::now(bound.id(), bound.name())
                });
                Ok(())
            }
            Err(WorkflowError::Cancelled) => Err(StepFailure::Cancelled),
            Err(fallback_error) => Err(StepFailure::Step {
                name: bound.name().to_string(),
                reason: format!(
                    "{}; fallback '{}' also failed: {}",
                    error,
                    fallback.name(),
                    fallback_error
                ),
            }),
        }
    }
}
