//! Step execution handlers
//!
//! Runs one step's action-then-wait cycle under the step's cycle budget (its
//! timeout plus whatever time the action itself declares), holding a lease on
//! every device the step touches. Parallel steps fan out to one tokio task per
//! sub-step and join within the smaller of the step timeout and the join ceiling.

use crate::config::RuntimeSettings;
use crate::device::DeviceSet;
use crate::error::{Result, WorkflowError};
use crate::runtime::resolver::BoundStep;
use crate::runtime::status::CompletedStep;
use crate::workflow::steps::StepRegistry;
use crate::workflow::types::{now_epoch, StepType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Executes individual steps against the shared device set
#[derive(Debug, Clone)]
pub struct StepExecutor {
    devices: Arc<DeviceSet>,
    settings: Arc<RuntimeSettings>,
}

impl StepExecutor {
    pub fn new(devices: Arc<DeviceSet>, settings: Arc<RuntimeSettings>) -> Self {
        Self { devices, settings }
    }

    /// Execute a non-branching step
    ///
    /// Returns the completed sub-steps of a parallel step (empty otherwise).
    pub async fn execute_step(
        &self,
        bound: &BoundStep,
        steps: &StepRegistry,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedStep>> {
        tracing::info!("🚀 Starting step: {} (type: {:?})", bound.name(), bound.step_type());
        let started = tokio::time::Instant::now();

        let result = match bound.step_type() {
            StepType::Parallel => self.execute_parallel(bound, steps, cancel).await,
            _ => self.run_cycle(bound, cancel).await.map(|()| Vec::new()),
        };

        match &result {
            Ok(_) => tracing::info!("✅ Step completed: {} in {:?}", bound.name(), started.elapsed()),
            Err(e) => tracing::error!("❌ Step failed: {} in {:?} - {}", bound.name(), started.elapsed(), e),
        }
        result
    }

    /// Run a condition step's action, then evaluate its condition
    pub async fn execute_condition(&self, bound: &BoundStep, cancel: &CancellationToken) -> Result<bool> {
        tracing::info!("🔍 Evaluating condition step: {}", bound.name());
        let _lease = self.devices.lease(&bound.devices())?;

        let timeout = bound.cycle_budget();
        let cycle = async {
            bound.action().try_invoke(cancel).await?;
            Ok::<_, WorkflowError>(bound.wait().condition_outcome(cancel).await.unwrap_or(false))
        };
        let outcome = tokio::time::timeout(timeout, cycle)
            .await
            .unwrap_or_else(|_| Err(timed_out(bound)));

        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        outcome
    }

    /// Action then wait, bounded together by the step's cycle budget
    async fn run_cycle(&self, bound: &BoundStep, cancel: &CancellationToken) -> Result<()> {
        let _lease = self.devices.lease(&bound.devices())?;

        let cycle = async {
            bound.action().try_invoke(cancel).await?;
            bound.wait().try_check(cancel).await
        };
        tokio::time::timeout(bound.cycle_budget(), cycle)
            .await
            .unwrap_or_else(|_| Err(timed_out(bound)))
    }

    async fn execute_parallel(
        &self,
        bound: &BoundStep,
        steps: &StepRegistry,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedStep>> {
        let subs = bound
            .step()
            .flow
            .parallel_steps
            .iter()
            .map(|id| {
                steps
                    .get(id)
                    .cloned()
                    .ok_or_else(|| WorkflowError::StepNotFound(id.clone()))
            })
            .collect::<Result<Vec<BoundStep>>>()?;

        tracing::info!("🔀 Fanning out {} sub-steps of {}", subs.len(), bound.name());

        let mut tasks = JoinSet::new();
        for sub in &subs {
            let executor = self.clone();
            let sub = sub.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = executor.run_cycle(&sub, &cancel).await;
                match &result {
                    Ok(()) => tracing::info!("  ✅ Sub-step completed: {}", sub.name()),
                    Err(e) => tracing::warn!("  ⚠️ Sub-step failed: {} - {}", sub.name(), e),
                }
                (sub.id().to_string(), result.map(|()| now_epoch()))
            });
        }

        // one key per sub-step
        let mut results: HashMap<String, Result<f64>> = HashMap::new();
        let ceiling = self.settings.parallel_join_ceiling().min(bound.timeout());
        let join_all = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, result)) => {
                        results.insert(id, result);
                    }
                    Err(e) => tracing::error!("❌ Sub-step task aborted: {}", e),
                }
            }
        };

        let joined = tokio::select! {
            joined = tokio::time::timeout(ceiling, join_all) => joined.is_ok(),
            _ = cancel.cancelled() => {
                tasks.abort_all();
                return Err(WorkflowError::Cancelled);
            }
        };
        if !joined {
            tasks.abort_all();
            return Err(WorkflowError::WaitTimeoutOrFailed {
                step: bound.id().to_string(),
                reason: format!("sub-steps did not join within {:?}", ceiling),
            });
        }

        let mut completed = Vec::with_capacity(subs.len());
        let mut first_failure = None;
        for sub in &subs {
            match results.remove(sub.id()) {
                Some(Ok(completed_at)) => completed.push(CompletedStep {
                    completed_at,
                    ..CompletedStep::now(sub.id(), sub.name())
                }),
                Some(Err(WorkflowError::Cancelled)) => return Err(WorkflowError::Cancelled),
                Some(Err(e)) => {
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
                None => {
                    if first_failure.is_none() {
                        first_failure = Some(WorkflowError::ActionFailed {
                            step: sub.id().to_string(),
                            reason: "sub-step task did not finish".to_string(),
                        });
                    }
                }
            }
        }

        match first_failure {
            Some(e) => Err(WorkflowError::ActionFailed {
                step: bound.id().to_string(),
                reason: format!("sub-step failed: {}", e),
            }),
            None => Ok(completed),
        }
    }
}

fn timed_out(bound: &BoundStep) -> WorkflowError {
    WorkflowError::WaitTimeoutOrFailed {
        step: bound.id().to_string(),
        reason: format!("step exceeded its {:?} cycle budget", bound.cycle_budget()),
    }
}
