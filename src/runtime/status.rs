//! Status Reporter
//!
//! The execution record of a run lives behind an `ArcSwap`. The sequencer is
//! its only writer and publishes a new record on every change; readers on any
//! thread take lock-free snapshots.

use crate::workflow::types::now_epoch;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Run lifecycle: `Pending -> Running -> {Completed, Failed, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// A step that finished successfully in the current run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedStep {
    pub step_id: String,
    pub name: String,
    pub completed_at: f64,
    /// Fallback step whose success stands in for this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_by: Option<String>,
    /// Completed sub-steps of a parallel step
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<CompletedStep>,
}

impl CompletedStep {
    pub fn now(step_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            completed_at: now_epoch(),
            recovered_by: None,
            sub_steps: Vec::new(),
        }
    }
}

/// Transient record of one run
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub workflow_name: String,
    pub status: RunStatus,
    /// Main-line steps only; detached steps run through their referencing step
    pub total_steps: usize,
    pub current_step_index: Option<usize>,
    pub current_step_name: Option<String>,
    /// Wall-clock start, epoch seconds
    pub started_at: Option<f64>,
    /// Append-only
    pub completed: Vec<CompletedStep>,
    pub failed_step: Option<String>,
    pub failure_reason: Option<String>,
    started: Option<Instant>,
    finished: Option<Instant>,
}

impl ExecutionRecord {
    pub fn pending(workflow_name: impl Into<String>, total_steps: usize) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            status: RunStatus::Pending,
            total_steps,
            current_step_index: None,
            current_step_name: None,
            started_at: None,
            completed: Vec::new(),
            failed_step: None,
            failure_reason: None,
            started: None,
            finished: None,
        }
    }

    /// Time since the run started; frozen once it ends
    pub fn elapsed(&self) -> Duration {
        match (self.started, self.finished) {
            (Some(started), Some(finished)) => finished.duration_since(started),
            (Some(started), None) => started.elapsed(),
            _ => Duration::ZERO,
        }
    }

    pub fn completed_names(&self) -> Vec<String> {
        self.completed.iter().map(|step| step.name.clone()).collect()
    }
}

/// Snapshot returned by [`StatusReporter::snapshot`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub workflow_name: String,
    pub total_steps: usize,
    pub completed_count: usize,
    pub progress_fraction: f64,
    pub elapsed_seconds: f64,
    pub run_status: RunStatus,
    pub completed_step_names: Vec<String>,
    pub current_step_name: Option<String>,
    pub current_step_index: Option<usize>,
    pub failed_step: Option<String>,
    pub failure_reason: Option<String>,
    pub completed_steps: Vec<CompletedStep>,
}

/// Read-only view of a run's execution record
#[derive(Debug, Clone)]
pub struct StatusReporter {
    record: Arc<ArcSwap<ExecutionRecord>>,
}

impl StatusReporter {
    pub(crate) fn new(record: Arc<ArcSwap<ExecutionRecord>>) -> Self {
        Self { record }
    }

    pub fn record(&self) -> Arc<ExecutionRecord> {
        self.record.load_full()
    }

    pub fn status(&self) -> RunStatus {
        self.record.load().status
    }

    pub fn snapshot(&self) -> StatusReport {
        let record = self.record.load();
        let completed_count = record.completed.len();
        // condition loops can complete a step more than once
        let progress_fraction = if record.total_steps == 0 {
            0.0
        } else {
            (completed_count as f64 / record.total_steps as f64).min(1.0)
        };
        StatusReport {
            workflow_name: record.workflow_name.clone(),
            total_steps: record.total_steps,
            completed_count,
            progress_fraction,
            elapsed_seconds: record.elapsed().as_secs_f64(),
            run_status: record.status,
            completed_step_names: record.completed_names(),
            current_step_name: record.current_step_name.clone(),
            current_step_index: record.current_step_index,
            failed_step: record.failed_step.clone(),
            failure_reason: record.failure_reason.clone(),
            completed_steps: record.completed.clone(),
        }
    }
}

/// Single writer of an execution record
#[derive(Debug)]
pub(crate) struct RunRecorder {
    record: Arc<ArcSwap<ExecutionRecord>>,
}

impl RunRecorder {
    pub(crate) fn new(record: Arc<ArcSwap<ExecutionRecord>>) -> Self {
        Self { record }
    }

    fn update(&self, change: impl FnOnce(&mut ExecutionRecord)) {
        let mut next = (**self.record.load()).clone();
        change(&mut next);
        self.record.store(Arc::new(next));
    }

    /// Reset the record for a new run
    pub(crate) fn start(&self, workflow_name: &str, total_steps: usize) {
        let mut record = ExecutionRecord::pending(workflow_name, total_steps);
        record.status = RunStatus::Running;
        record.started_at = Some(now_epoch());
        record.started = Some(Instant::now());
        self.record.store(Arc::new(record));
    }

    pub(crate) fn step_started(&self, index: usize, name: &str) {
        self.update(|record| {
            record.current_step_index = Some(index);
            record.current_step_name = Some(name.to_string());
        });
    }

    pub(crate) fn step_completed(&self, step: CompletedStep) {
        self.update(|record| record.completed.push(step));
    }

    pub(crate) fn finish(&self, status: RunStatus, failure: Option<(String, String)>) {
        self.update(|record| {
            record.status = status;
            record.finished = Some(Instant::now());
            if let Some((step, reason)) = failure {
                record.failed_step = Some(step);
                record.failure_reason = Some(reason);
            }
        });
    }
}
