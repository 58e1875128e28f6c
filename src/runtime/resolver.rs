//! Action Resolver
//!
//! Turns the declarative action and wait specs of a step into callable forms
//! bound to the shared [`DeviceSet`]. Everything that can be checked without
//! touching a device is checked here, so a bad payload fails when the step is
//! added or imported rather than halfway through a run.

use crate::config::{secs, RuntimeSettings};
use crate::device::{DeviceRef, DeviceSet, TargetPose};
use crate::error::{Result, WorkflowError};
use crate::runtime::detector::{
    evaluate_condition, sleep_or_cancel, wait_for_motion, wait_for_response, Completion,
    ResponseExpectation,
};
use crate::runtime::encoding::{encode_payload, expected_bytes, to_hex};
use crate::workflow::types::{ActionSpec, ConditionSpec, Step, StepType, WaitSpec};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builds bound steps against one device set and runtime configuration
#[derive(Debug, Clone)]
pub struct Resolver {
    devices: Arc<DeviceSet>,
    settings: Arc<RuntimeSettings>,
}

impl Resolver {
    pub fn new(devices: Arc<DeviceSet>, settings: Arc<RuntimeSettings>) -> Self {
        Self { devices, settings }
    }

    pub fn devices(&self) -> &Arc<DeviceSet> {
        &self.devices
    }

    pub fn settings(&self) -> &Arc<RuntimeSettings> {
        &self.settings
    }

    /// Check a step and bind its action and wait
    pub fn resolve_step(&self, step: Step) -> Result<BoundStep> {
        if !(step.timeout > 0.0 && Duration::try_from_secs_f64(step.timeout).is_ok()) {
            return Err(WorkflowError::InvalidSpec(format!(
                "step '{}' timeout must be a positive number of seconds, got {}",
                step.name, step.timeout
            )));
        }
        step.step_type
            .accepts(&step.action_config, &step.wait_config)
            .map_err(|reason| WorkflowError::InvalidSpec(format!("step '{}': {}", step.name, reason)))?;

        let action = self.resolve_action(&step.id, &step.action_config)?;
        let wait = match step.wait_config {
            WaitSpec::Default => self.bind_wait(&step.id, self.implied_wait(&step)),
            ref spec => self.resolve_wait(&step.id, spec)?,
        };
        tracing::debug!(
            "🔧 Resolved step '{}' ({}): action={} wait={}",
            step.name,
            step.id,
            step.action_config.kind(),
            step.wait_config.kind()
        );
        Ok(BoundStep { step, action, wait })
    }

    pub fn resolve_action(&self, step_id: &str, spec: &ActionSpec) -> Result<BoundAction> {
        let invalid = |reason: String| WorkflowError::InvalidSpec(format!("step '{}': {}", step_id, reason));

        let kind = match spec {
            ActionSpec::RunMotionProgram { program_name, completion_timeout } => {
                if program_name.trim().is_empty() {
                    return Err(invalid("program_name must not be empty".to_string()));
                }
                let budget = match completion_timeout {
                    Some(seconds) => non_negative(*seconds, "completion_timeout").map_err(invalid)?,
                    None => self.settings.motion_completion_timeout(),
                };
                ResolvedAction::RunMotionProgram {
                    path: format!("{}{}", self.settings.program_root, program_name.trim()),
                    budget,
                }
            }
            ActionSpec::MoveToPosition { position } => {
                if position.xyz.iter().any(|v| !v.is_finite()) {
                    return Err(invalid(format!("position {:?} must be six finite numbers", position.xyz)));
                }
                ResolvedAction::Move(*position)
            }
            ActionSpec::GripperOpen => ResolvedAction::Gripper { open: true },
            ActionSpec::GripperClose => ResolvedAction::Gripper { open: false },
            ActionSpec::SendPeripheralCommand { device, payload, encoding, terminator } => {
                let bytes = encode_payload(
                    payload,
                    encoding.unwrap_or_default(),
                    terminator.unwrap_or_default(),
                )
                .map_err(invalid)?;
                ResolvedAction::WriteCommand {
                    device: device.clone(),
                    bytes,
                    label: "command",
                }
            }
            ActionSpec::Delay { seconds } => {
                ResolvedAction::Delay(non_negative(*seconds, "seconds").map_err(invalid)?)
            }
            ActionSpec::ReadPeripheralValue { device, channel } => ResolvedAction::WriteCommand {
                device: device.clone(),
                bytes: format!("READ_{}", channel.to_uppercase()).into_bytes(),
                label: "read query",
            },
            ActionSpec::SetPeripheralParameter { device, parameter, value } => {
                ResolvedAction::WriteCommand {
                    device: device.clone(),
                    bytes: format!("SET_{}_{}", parameter.to_uppercase(), render_value(value))
                        .into_bytes(),
                    label: "parameter set",
                }
            }
            ActionSpec::None => ResolvedAction::NoOp,
        };

        Ok(BoundAction {
            step_id: step_id.to_string(),
            kind,
            devices: Arc::clone(&self.devices),
            settings: Arc::clone(&self.settings),
        })
    }

    pub fn resolve_wait(&self, step_id: &str, spec: &WaitSpec) -> Result<BoundWait> {
        let invalid = |reason: String| WorkflowError::InvalidSpec(format!("step '{}': {}", step_id, reason));

        let kind = match spec {
            WaitSpec::MotionComplete => ResolvedWait::MotionComplete,
            WaitSpec::PeripheralResponse {
                device,
                expected_ascii,
                expected_hex,
                timeout,
                prefer_raw,
            } => {
                let expected =
                    expected_bytes(expected_ascii.as_deref(), expected_hex.as_deref()).map_err(invalid)?;
                let timeout = match timeout {
                    Some(seconds) => Some(non_negative(*seconds, "timeout").map_err(invalid)?),
                    None => None,
                };
                ResolvedWait::PeripheralResponse {
                    device: device.clone(),
                    expectation: ResponseExpectation {
                        expected,
                        timeout,
                        prefer_raw: *prefer_raw,
                    },
                }
            }
            WaitSpec::ConditionCheck { condition } => {
                if let ConditionSpec::SensorValue { threshold, .. } = condition {
                    if !threshold.is_finite() {
                        return Err(invalid("condition threshold must be finite".to_string()));
                    }
                }
                ResolvedWait::Condition(condition.clone())
            }
            WaitSpec::TimeDelay { seconds } => {
                ResolvedWait::TimeDelay(non_negative(*seconds, "seconds").map_err(invalid)?)
            }
            WaitSpec::Default | WaitSpec::None => ResolvedWait::None,
        };

        Ok(self.bind_wait(step_id, kind))
    }

    /// What a `default` wait checks on this kind of step
    fn implied_wait(&self, step: &Step) -> ResolvedWait {
        match (step.step_type, &step.action_config) {
            // the program action already awaited completion
            (StepType::Motion, ActionSpec::RunMotionProgram { .. }) => ResolvedWait::None,
            (StepType::Motion, _) => ResolvedWait::MotionSettled(secs(step.timeout)),
            (
                StepType::Peripheral,
                ActionSpec::SendPeripheralCommand { device, .. }
                | ActionSpec::ReadPeripheralValue { device, .. }
                | ActionSpec::SetPeripheralParameter { device, .. },
            ) => ResolvedWait::PeripheralResponse {
                device: device.clone(),
                expectation: ResponseExpectation {
                    expected: None,
                    timeout: None,
                    prefer_raw: false,
                },
            },
            _ => ResolvedWait::None,
        }
    }

    fn bind_wait(&self, step_id: &str, kind: ResolvedWait) -> BoundWait {
        BoundWait {
            step_id: step_id.to_string(),
            kind,
            devices: Arc::clone(&self.devices),
            settings: Arc::clone(&self.settings),
        }
    }
}

/// Durations too large to represent are rejected along with negative ones
fn non_negative(seconds: f64, field: &str) -> std::result::Result<Duration, String> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("{} must be a non-negative number of seconds, got {}", field, seconds))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A step together with its bound action and wait
#[derive(Debug, Clone)]
pub struct BoundStep {
    step: Step,
    action: BoundAction,
    wait: BoundWait,
}

impl BoundStep {
    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn into_step(self) -> Step {
        self.step
    }

    pub fn id(&self) -> &str {
        &self.step.id
    }

    pub fn name(&self) -> &str {
        &self.step.name
    }

    pub fn step_type(&self) -> StepType {
        self.step.step_type
    }

    pub fn timeout(&self) -> Duration {
        secs(self.step.timeout)
    }

    /// Bound on one action-then-wait cycle
    ///
    /// The time an action or wait declares for itself (a delay, the embedded
    /// completion budget of a motion program, an implied motion wait) is
    /// granted on top of the step timeout, which then bounds the device round
    /// trips and any open-ended wait.
    pub fn cycle_budget(&self) -> Duration {
        self.timeout()
            .saturating_add(self.action.allowance())
            .saturating_add(self.wait.allowance())
    }

    pub fn devices(&self) -> Vec<DeviceRef> {
        self.step.devices()
    }

    pub fn action(&self) -> &BoundAction {
        &self.action
    }

    pub fn wait(&self) -> &BoundWait {
        &self.wait
    }

    /// Replace the flow fields; action and wait bindings are unaffected
    pub(crate) fn set_flow(&mut self, flow: crate::workflow::types::StepFlow) {
        self.step.flow = flow;
    }

    pub(crate) fn touch(&mut self) {
        self.step.updated_at = Some(crate::workflow::types::now_epoch());
    }
}

#[derive(Debug, Clone)]
enum ResolvedAction {
    RunMotionProgram { path: String, budget: Duration },
    Move(TargetPose),
    Gripper { open: bool },
    WriteCommand { device: String, bytes: Vec<u8>, label: &'static str },
    Delay(Duration),
    NoOp,
}

/// Callable form of an action spec
#[derive(Debug, Clone)]
pub struct BoundAction {
    step_id: String,
    kind: ResolvedAction,
    devices: Arc<DeviceSet>,
    settings: Arc<RuntimeSettings>,
}

impl BoundAction {
    /// Time the action is declared to take
    pub fn allowance(&self) -> Duration {
        match &self.kind {
            ResolvedAction::RunMotionProgram { budget, .. } => *budget,
            ResolvedAction::Delay(duration) => *duration,
            _ => Duration::ZERO,
        }
    }

    /// Perform the action; faults are logged and reported as `false`
    pub async fn invoke(&self, cancel: &CancellationToken) -> bool {
        match self.try_invoke(cancel).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("❌ {}", e);
                false
            }
        }
    }

    pub(crate) async fn try_invoke(&self, cancel: &CancellationToken) -> Result<()> {
        match &self.kind {
            ResolvedAction::RunMotionProgram { path, budget } => {
                self.run_motion_program(path, *budget, cancel).await
            }
            ResolvedAction::Move(pose) => self.move_to(pose).await,
            ResolvedAction::Gripper { open } => self.set_gripper(*open).await,
            ResolvedAction::WriteCommand { device, bytes, label } => {
                let handle = self.devices.connected_peripheral(device)?;
                tracing::info!("📤 Sending {} to {}: {}", label, handle.name(), to_hex(bytes));
                let written = handle
                    .port()
                    .write_raw(bytes)
                    .await
                    .map_err(|e| self.failed(format!("write to {} failed: {}", device, e)))?;
                if written == 0 {
                    return Err(self.failed(format!("no bytes written to {}", device)));
                }
                Ok(())
            }
            ResolvedAction::Delay(duration) => {
                tracing::info!("⏱️ Delaying {:?}", duration);
                if sleep_or_cancel(*duration, cancel).await {
                    Ok(())
                } else {
                    Err(WorkflowError::Cancelled)
                }
            }
            ResolvedAction::NoOp => Ok(()),
        }
    }

    async fn run_motion_program(
        &self,
        path: &str,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let handle = self.devices.connected_motion()?;
        let controller = handle.controller();

        tracing::info!("🤖 Loading motion program: {}", path);
        let code = controller
            .load_program(path)
            .await
            .map_err(|e| self.failed(format!("loading {} failed: {}", path, e)))?;
        if code != 0 {
            return Err(self.failed(format!("loading {} returned code {}", path, code)));
        }

        let code = controller
            .start_program()
            .await
            .map_err(|e| self.failed(format!("starting {} failed: {}", path, e)))?;
        if code != 0 {
            return Err(self.failed(format!("starting {} returned code {}", path, code)));
        }
        tracing::info!("▶️ Motion program started: {}", path);

        match wait_for_motion(&handle, budget, &self.settings, cancel).await {
            Completion::Done => Ok(()),
            Completion::Cancelled => Err(WorkflowError::Cancelled),
            other => Err(self.failed(format!("{} did not complete: {}", path, other.describe()))),
        }
    }

    async fn move_to(&self, pose: &TargetPose) -> Result<()> {
        let handle = self.devices.connected_motion()?;
        if !handle.capabilities().direct_move {
            return Err(self.failed(format!("'{}' does not support direct moves", handle.name())));
        }
        tracing::info!("🎯 Moving '{}' to {:?} ({:?})", handle.name(), pose.xyz, pose.mode);
        let code = handle
            .controller()
            .move_to(pose)
            .await
            .map_err(|e| self.failed(format!("move to {:?} failed: {}", pose.xyz, e)))?;
        if code != 0 {
            return Err(self.failed(format!("move to {:?} returned code {}", pose.xyz, code)));
        }
        Ok(())
    }

    /// A controller without gripper control skips the command
    async fn set_gripper(&self, open: bool) -> Result<()> {
        let verb = if open { "open" } else { "close" };
        let handle = self.devices.connected_motion()?;
        if !handle.capabilities().gripper {
            tracing::warn!("⚠️ '{}' has no gripper control, skipping gripper {}", handle.name(), verb);
            return Ok(());
        }
        tracing::info!("✋ Gripper {} on '{}'", verb, handle.name());
        let code = handle
            .controller()
            .set_gripper(open)
            .await
            .map_err(|e| self.failed(format!("gripper {} failed: {}", verb, e)))?;
        if code != 0 {
            return Err(self.failed(format!("gripper {} returned code {}", verb, code)));
        }
        Ok(())
    }

    fn failed(&self, reason: String) -> WorkflowError {
        WorkflowError::ActionFailed {
            step: self.step_id.clone(),
            reason,
        }
    }
}

#[derive(Debug, Clone)]
enum ResolvedWait {
    MotionComplete,
    /// Poll the arm until it reports done
    MotionSettled(Duration),
    PeripheralResponse { device: String, expectation: ResponseExpectation },
    Condition(ConditionSpec),
    TimeDelay(Duration),
    None,
}

/// Callable form of a wait spec
#[derive(Debug, Clone)]
pub struct BoundWait {
    step_id: String,
    kind: ResolvedWait,
    devices: Arc<DeviceSet>,
    settings: Arc<RuntimeSettings>,
}

impl BoundWait {
    /// Time the wait is declared to take
    pub fn allowance(&self) -> Duration {
        match &self.kind {
            ResolvedWait::MotionSettled(budget) => *budget,
            _ => Duration::ZERO,
        }
    }

    /// Wait for completion; faults are logged and reported as `false`
    pub async fn check(&self, cancel: &CancellationToken) -> bool {
        match self.try_check(cancel).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("❌ {}", e);
                false
            }
        }
    }

    pub(crate) async fn try_check(&self, cancel: &CancellationToken) -> Result<()> {
        match &self.kind {
            // completion was already awaited inside the motion action
            ResolvedWait::MotionComplete => Ok(()),
            ResolvedWait::MotionSettled(budget) => {
                let handle = self.devices.connected_motion()?;
                match wait_for_motion(&handle, *budget, &self.settings, cancel).await {
                    Completion::Done => Ok(()),
                    Completion::Cancelled => Err(WorkflowError::Cancelled),
                    other => Err(self.failed(other.describe())),
                }
            }
            ResolvedWait::PeripheralResponse { device, expectation } => {
                let handle = self.devices.connected_peripheral(device)?;
                match wait_for_response(&handle, expectation, &self.settings, cancel).await {
                    Completion::Done => Ok(()),
                    Completion::Cancelled => Err(WorkflowError::Cancelled),
                    other => Err(self.failed(other.describe())),
                }
            }
            ResolvedWait::Condition(condition) => {
                if evaluate_condition(condition, &self.devices, &self.settings, cancel).await {
                    Ok(())
                } else if cancel.is_cancelled() {
                    Err(WorkflowError::Cancelled)
                } else {
                    Err(self.failed("condition not met".to_string()))
                }
            }
            ResolvedWait::TimeDelay(duration) => {
                tracing::info!("⏱️ Waiting {:?}", duration);
                if sleep_or_cancel(*duration, cancel).await {
                    Ok(())
                } else {
                    Err(WorkflowError::Cancelled)
                }
            }
            ResolvedWait::None => Ok(()),
        }
    }

    /// Evaluate the condition of a `condition_check` wait; `None` for other waits
    pub async fn condition_outcome(&self, cancel: &CancellationToken) -> Option<bool> {
        match &self.kind {
            ResolvedWait::Condition(condition) => {
                Some(evaluate_condition(condition, &self.devices, &self.settings, cancel).await)
            }
            _ => None,
        }
    }

    fn failed(&self, reason: String) -> WorkflowError {
        WorkflowError::WaitTimeoutOrFailed {
            step: self.step_id.clone(),
            reason,
        }
    }
}
