//! Motion controller contract
//!
//! A controller declares which status queries it supports once, when it is
//! wrapped in a [`MotionHandle`]. The completion detector consults that cached
//! capability set on every poll tick instead of re-probing the transport.

use crate::error::DeviceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Program state reported through the controller's state field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgramState {
    Idle,
    Running,
    Paused,
    Error,
    Finished,
    Unknown(i32),
}

impl From<i32> for ProgramState {
    /// Controller encoding: 0 idle, 1 running, 2 paused, 3 error, 4 finished
    fn from(code: i32) -> Self {
        match code {
            0 => ProgramState::Idle,
            1 => ProgramState::Running,
            2 => ProgramState::Paused,
            3 => ProgramState::Error,
            4 => ProgramState::Finished,
            other => ProgramState::Unknown(other),
        }
    }
}

/// Reply of a status query: an SDK error code plus an optional value
///
/// Controllers that answer with a bare scalar report `error: 0` and the scalar
/// as `value`; an absent value maps to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryReply {
    pub error: i32,
    pub value: Option<i64>,
}

impl QueryReply {
    pub fn ok(value: i64) -> Self {
        Self { error: 0, value: Some(value) }
    }

    pub fn empty() -> Self {
        Self { error: 0, value: None }
    }

    pub fn failed(error: i32) -> Self {
        Self { error, value: None }
    }
}

/// Alternately-named run-state queries found on different firmware versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunStateQuery {
    ProgramState,
    GetProgramRunState,
    IsProgramRunning,
}

impl RunStateQuery {
    pub fn name(&self) -> &'static str {
        match self {
            RunStateQuery::ProgramState => "ProgramState",
            RunStateQuery::GetProgramRunState => "GetProgramRunState",
            RunStateQuery::IsProgramRunning => "IsProgramRunning",
        }
    }
}

/// Interpolation used by a direct move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MoveMode {
    /// Straight line in Cartesian space (controller mode 0)
    #[default]
    Linear,
    /// Joint interpolation (controller mode 1)
    Joint,
}

impl TryFrom<u8> for MoveMode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(MoveMode::Linear),
            1 => Ok(MoveMode::Joint),
            other => Err(format!("unknown move mode {}, expected 0 (linear) or 1 (joint)", other)),
        }
    }
}

impl From<MoveMode> for u8 {
    fn from(mode: MoveMode) -> Self {
        match mode {
            MoveMode::Linear => 0,
            MoveMode::Joint => 1,
        }
    }
}

/// Target of a direct move: `x, y, z, rx, ry, rz`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPose {
    pub xyz: [f64; 6],
    #[serde(default)]
    pub mode: MoveMode,
}

/// Capability set declared by a motion controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MotionCapabilities {
    pub state_field: bool,
    pub program_state: bool,
    pub run_state_queries: Vec<RunStateQuery>,
    pub command_finished: bool,
    pub motion_state: bool,
    pub program_load: bool,
    pub program_start: bool,
    /// Direct moves to a [`TargetPose`]
    pub direct_move: bool,
    pub gripper: bool,
}

impl MotionCapabilities {
    /// True when none of the five completion queries is available
    pub fn has_no_completion_query(&self) -> bool {
        !self.state_field
            && !self.program_state
            && self.run_state_queries.is_empty()
            && !self.command_finished
            && !self.motion_state
    }
}

/// Robot motion SDK boundary
///
/// Every method has a default that reports [`DeviceError::Unsupported`], so a
/// transport implements only what it actually exposes and lists it in
/// [`MotionController::capabilities`].
#[async_trait]
pub trait MotionController: Send + Sync {
    /// Status queries and commands this controller supports
    fn capabilities(&self) -> MotionCapabilities;

    async fn state_field(&self) -> Result<ProgramState, DeviceError> {
        Err(DeviceError::Unsupported("state field"))
    }

    async fn program_state(&self) -> Result<QueryReply, DeviceError> {
        Err(DeviceError::Unsupported("program state query"))
    }

    async fn run_state(&self, _query: RunStateQuery) -> Result<QueryReply, DeviceError> {
        Err(DeviceError::Unsupported("run state query"))
    }

    async fn command_finished(&self) -> Result<QueryReply, DeviceError> {
        Err(DeviceError::Unsupported("command finished query"))
    }

    async fn motion_state(&self) -> Result<QueryReply, DeviceError> {
        Err(DeviceError::Unsupported("motion state query"))
    }

    /// Load a program by controller path; returns the SDK result code
    async fn load_program(&self, _path: &str) -> Result<i32, DeviceError> {
        Err(DeviceError::Unsupported("program load"))
    }

    /// Start the loaded program; returns the SDK result code
    async fn start_program(&self) -> Result<i32, DeviceError> {
        Err(DeviceError::Unsupported("program start"))
    }

    /// Move to a pose and return once the controller accepts or finishes it
    async fn move_to(&self, _pose: &TargetPose) -> Result<i32, DeviceError> {
        Err(DeviceError::Unsupported("direct move"))
    }

    /// Open (`true`) or close the gripper; returns the SDK result code
    async fn set_gripper(&self, _open: bool) -> Result<i32, DeviceError> {
        Err(DeviceError::Unsupported("gripper"))
    }
}

/// Named motion controller with its cached capability set
pub struct MotionHandle {
    name: String,
    controller: Arc<dyn MotionController>,
    capabilities: MotionCapabilities,
    lease: Arc<Mutex<()>>,
}

impl MotionHandle {
    /// Wrap a controller, caching its capability set for the handle's lifetime
    pub fn connect(name: impl Into<String>, controller: Arc<dyn MotionController>) -> Self {
        let name = name.into();
        let capabilities = controller.capabilities();
        tracing::info!("🤖 Motion handle '{}' connected with capabilities {:?}", name, capabilities);
        Self {
            name,
            controller,
            capabilities,
            lease: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &MotionCapabilities {
        &self.capabilities
    }

    pub fn controller(&self) -> &dyn MotionController {
        self.controller.as_ref()
    }

    pub(crate) fn lease(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.lease)
    }
}

impl std::fmt::Debug for MotionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionHandle")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
