//! Core workflow type definitions
//!
//! Steps, their declarative action/wait specifications and workflow metadata.
//! These are exactly what a workflow document stores; the callable forms are
//! rebuilt from them by the resolver (see `runtime::resolver`).

use crate::device::{DeviceRef, TargetPose};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Current wall-clock time as fractional epoch seconds
pub fn now_epoch() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn one_second() -> f64 {
    1.0
}

/// Step type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Robot arm program or direct arm command
    #[serde(alias = "robot")]
    Motion,
    /// Serial peripheral command and response
    #[serde(alias = "iot")]
    Peripheral,
    /// Plain time delay
    Delay,
    /// Branch on a peripheral reading
    Condition,
    /// Fan out to sub-steps and join
    Parallel,
}

impl StepType {
    /// Check that an action/wait pair makes sense for this step type
    pub fn accepts(&self, action: &ActionSpec, wait: &WaitSpec) -> Result<(), String> {
        use ActionSpec as A;
        use WaitSpec as W;

        let action_ok = match self {
            StepType::Motion => action.is_motion() || matches!(action, A::None),
            StepType::Peripheral => matches!(
                action,
                A::SendPeripheralCommand { .. }
                    | A::ReadPeripheralValue { .. }
                    | A::SetPeripheralParameter { .. }
                    | A::Delay { .. }
                    | A::None
            ),
            StepType::Delay => matches!(action, A::Delay { .. } | A::None),
            StepType::Condition => !action.is_motion(),
            StepType::Parallel => matches!(action, A::None),
        };
        if !action_ok {
            return Err(format!(
                "action '{}' is not allowed on a {:?} step",
                action.kind(),
                self
            ));
        }

        let wait_ok = match self {
            StepType::Motion => matches!(
                wait,
                W::MotionComplete | W::TimeDelay { .. } | W::Default | W::None
            ),
            StepType::Peripheral => matches!(
                wait,
                W::PeripheralResponse { .. }
                    | W::ConditionCheck { .. }
                    | W::TimeDelay { .. }
                    | W::Default
                    | W::None
            ),
            StepType::Delay => matches!(wait, W::TimeDelay { .. } | W::Default | W::None),
            StepType::Condition => matches!(wait, W::ConditionCheck { .. }),
            StepType::Parallel => matches!(wait, W::Default | W::None),
        };
        if !wait_ok {
            return Err(format!(
                "wait '{}' is not allowed on a {:?} step",
                wait.kind(),
                self
            ));
        }
        Ok(())
    }
}

/// Payload encoding for peripheral commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Hex,
    Ascii,
    /// Hex if the payload looks like an even-length hex string, else ASCII
    #[default]
    Auto,
}

/// Line terminator appended after a command payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Terminator {
    #[serde(rename = "CR", alias = "cr")]
    Cr,
    #[serde(rename = "LF", alias = "lf")]
    Lf,
    #[serde(rename = "CRLF", alias = "crlf")]
    CrLf,
    #[default]
    #[serde(rename = "none", alias = "NONE")]
    None,
}

impl Terminator {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            Terminator::Cr => b"\r",
            Terminator::Lf => b"\n",
            Terminator::CrLf => b"\r\n",
            Terminator::None => b"",
        }
    }
}

/// Declarative action specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    /// Load and start a motion program, then wait for it to finish
    #[serde(alias = "run_lua")]
    RunMotionProgram {
        #[serde(alias = "file")]
        program_name: String,
        /// Embedded completion budget in seconds (defaults to runtime setting)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completion_timeout: Option<f64>,
    },
    /// Move the arm straight to a pose
    MoveToPosition { position: TargetPose },
    GripperOpen,
    GripperClose,
    /// Write an encoded payload to a peripheral
    #[serde(alias = "send_command")]
    SendPeripheralCommand {
        device: String,
        #[serde(alias = "command")]
        payload: String,
        #[serde(default, alias = "mode", skip_serializing_if = "Option::is_none")]
        encoding: Option<Encoding>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        terminator: Option<Terminator>,
    },
    Delay {
        #[serde(alias = "delay", default = "one_second")]
        seconds: f64,
    },
    /// Write a `READ_<CHANNEL>` query
    #[serde(alias = "read_sensor")]
    ReadPeripheralValue {
        device: String,
        #[serde(alias = "sensor")]
        channel: String,
    },
    /// Write a `SET_<PARAMETER>_<value>` command
    #[serde(alias = "set_parameter")]
    SetPeripheralParameter {
        device: String,
        parameter: String,
        value: Value,
    },
    #[serde(alias = "default")]
    None,
}

impl ActionSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionSpec::RunMotionProgram { .. } => "run_motion_program",
            ActionSpec::MoveToPosition { .. } => "move_to_position",
            ActionSpec::GripperOpen => "gripper_open",
            ActionSpec::GripperClose => "gripper_close",
            ActionSpec::SendPeripheralCommand { .. } => "send_peripheral_command",
            ActionSpec::Delay { .. } => "delay",
            ActionSpec::ReadPeripheralValue { .. } => "read_peripheral_value",
            ActionSpec::SetPeripheralParameter { .. } => "set_peripheral_parameter",
            ActionSpec::None => "none",
        }
    }

    /// Actions addressed to the motion controller
    pub fn is_motion(&self) -> bool {
        matches!(
            self,
            ActionSpec::RunMotionProgram { .. }
                | ActionSpec::MoveToPosition { .. }
                | ActionSpec::GripperOpen
                | ActionSpec::GripperClose
        )
    }

    fn device(&self) -> Option<DeviceRef> {
        match self {
            action if action.is_motion() => Some(DeviceRef::Motion),
            ActionSpec::SendPeripheralCommand { device, .. }
            | ActionSpec::ReadPeripheralValue { device, .. }
            | ActionSpec::SetPeripheralParameter { device, .. } => Some(DeviceRef::peripheral(device)),
            _ => None,
        }
    }
}

/// Relational operator for condition checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Operator {
    #[default]
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

impl Operator {
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Gt => lhs > rhs,
            Operator::Lt => lhs < rhs,
            Operator::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Operator::Ge => lhs >= rhs,
            Operator::Le => lhs <= rhs,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "==",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        }
    }
}

/// Boolean predicate evaluated by condition checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionSpec {
    /// Read a numeric value from a peripheral channel and compare it
    SensorValue {
        device: String,
        #[serde(alias = "sensor")]
        channel: String,
        #[serde(default)]
        operator: Operator,
        #[serde(alias = "value", default)]
        threshold: f64,
    },
    AlwaysTrue,
    AlwaysFalse,
}

/// Declarative wait specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitSpec {
    /// Completion is awaited inside `run_motion_program`; this wait passes
    #[serde(alias = "robot_complete")]
    MotionComplete,
    /// Wait for a response frame from a peripheral
    #[serde(alias = "iot_response")]
    PeripheralResponse {
        device: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_ascii: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected_hex: Option<String>,
        /// Seconds; absent means wait until a response arrives
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<f64>,
        #[serde(default)]
        prefer_raw: bool,
    },
    ConditionCheck { condition: ConditionSpec },
    TimeDelay {
        #[serde(alias = "delay", default = "one_second")]
        seconds: f64,
    },
    /// Completion check implied by the step type, bounded by the step timeout
    ///
    /// Motion steps poll the arm (a program action already did), peripheral
    /// steps wait for any frame from the commanded device, others pass.
    Default,
    None,
}

impl WaitSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            WaitSpec::MotionComplete => "motion_complete",
            WaitSpec::PeripheralResponse { .. } => "peripheral_response",
            WaitSpec::ConditionCheck { .. } => "condition_check",
            WaitSpec::TimeDelay { .. } => "time_delay",
            WaitSpec::Default => "default",
            WaitSpec::None => "none",
        }
    }

    fn device(&self) -> Option<DeviceRef> {
        match self {
            WaitSpec::PeripheralResponse { device, .. } => Some(DeviceRef::peripheral(device)),
            WaitSpec::ConditionCheck {
                condition: ConditionSpec::SensorValue { device, .. },
            } => Some(DeviceRef::peripheral(device)),
            _ => None,
        }
    }
}

/// Control references carried by a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepFlow {
    /// Step executed once in place of this step's failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_step: Option<String>,
    /// Jump target when a condition holds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_true: Option<String>,
    /// Jump target when a condition does not hold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_false: Option<String>,
    /// Sub-steps fanned out by a parallel step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parallel_steps: Vec<String>,
}

impl StepFlow {
    pub fn with_fallback(mut self, step_id: impl Into<String>) -> Self {
        self.fallback_step = Some(step_id.into());
        self
    }

    pub fn with_branches(mut self, if_true: Option<String>, if_false: Option<String>) -> Self {
        self.if_true = if_true;
        self.if_false = if_false;
        self
    }

    pub fn with_parallel<I, S>(mut self, step_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parallel_steps = step_ids.into_iter().map(Into::into).collect();
        self
    }

    /// Every step id this flow refers to
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.fallback_step
            .iter()
            .chain(self.if_true.iter())
            .chain(self.if_false.iter())
            .chain(self.parallel_steps.iter())
            .map(String::as_str)
    }
}

/// A single workflow step, exactly as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Stable identifier used by edits and flow references
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub action_config: ActionSpec,
    pub wait_config: WaitSpec,
    /// Overall timeout for action plus wait, in seconds
    pub timeout: f64,
    pub created_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<f64>,
    #[serde(flatten)]
    pub flow: StepFlow,
}

impl Step {
    /// Devices this step's action and wait address, deduplicated
    pub fn devices(&self) -> Vec<DeviceRef> {
        let implied = match (self.step_type, &self.wait_config) {
            (StepType::Motion, WaitSpec::Default) => Some(DeviceRef::Motion),
            _ => None,
        };
        let mut devices: Vec<DeviceRef> = self
            .action_config
            .device()
            .into_iter()
            .chain(self.wait_config.device())
            .chain(implied)
            .collect();
        devices.sort();
        devices.dedup();
        devices
    }
}

/// Read-only summary row returned by `StepRegistry::list`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub timeout: f64,
    pub position: usize,
}

/// Input for `StepRegistry::add`
#[derive(Debug, Clone, PartialEq)]
pub struct StepDraft {
    pub name: String,
    pub step_type: StepType,
    pub action: ActionSpec,
    pub wait: WaitSpec,
    pub timeout: f64,
    pub flow: StepFlow,
}

impl StepDraft {
    pub fn new(
        name: impl Into<String>,
        step_type: StepType,
        action: ActionSpec,
        wait: WaitSpec,
        timeout: f64,
    ) -> Self {
        Self {
            name: name.into(),
            step_type,
            action,
            wait,
            timeout,
            flow: StepFlow::default(),
        }
    }

    pub fn with_flow(mut self, flow: StepFlow) -> Self {
        self.flow = flow;
        self
    }
}

/// Field changes applied by `StepRegistry::update`; `None` leaves a field as is
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPatch {
    pub name: Option<String>,
    pub step_type: Option<StepType>,
    pub timeout: Option<f64>,
    pub action: Option<ActionSpec>,
    pub wait: Option<WaitSpec>,
}

impl StepPatch {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn step_type(mut self, step_type: StepType) -> Self {
        self.step_type = Some(step_type);
        self
    }

    pub fn timeout(mut self, timeout: f64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn action(mut self, action: ActionSpec) -> Self {
        self.action = Some(action);
        self
    }

    pub fn wait(mut self, wait: WaitSpec) -> Self {
        self.wait = Some(wait);
        self
    }
}

/// Workflow metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMeta {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub description: String,
    pub created_at: f64,
}

impl WorkflowMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            version: "1.0".to_string(),
            description: String::new(),
            created_at: now_epoch(),
        }
    }
}
