//! Scripted mock devices and builders shared by the integration tests
#![allow(dead_code)]

use armflow::config::RuntimeSettings;
use armflow::device::{
    DeviceSet, MotionCapabilities, MotionController, MotionHandle, PeripheralHandle,
    PeripheralPort, ProgramState, QueryReply, TargetPose,
};
use armflow::error::DeviceError;
use armflow::runtime::Resolver;
use armflow::workflow::{ActionSpec, StepDraft, StepType, WaitSpec, Workflow};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Motion controller whose state field replays a script, then repeats the last state
pub struct ScriptedMotion {
    capabilities: MotionCapabilities,
    states: Mutex<VecDeque<ProgramState>>,
    last: Mutex<ProgramState>,
    program_state: Mutex<Option<QueryReply>>,
    pub loaded: Mutex<Vec<String>>,
    pub polls: AtomicUsize,
    /// Poses and gripper commands received, in order
    pub moves: Mutex<Vec<ArmCommand>>,
    load_code: i32,
    move_code: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArmCommand {
    Move(TargetPose),
    Gripper(bool),
}

impl ScriptedMotion {
    pub fn with_states(states: Vec<ProgramState>) -> Self {
        let last = states.last().copied().unwrap_or(ProgramState::Idle);
        Self {
            capabilities: MotionCapabilities {
                state_field: true,
                program_load: true,
                program_start: true,
                ..MotionCapabilities::default()
            },
            states: Mutex::new(states.into()),
            last: Mutex::new(last),
            program_state: Mutex::new(None),
            loaded: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            moves: Mutex::new(Vec::new()),
            load_code: 0,
            move_code: 0,
        }
    }

    /// Controller that exposes no completion query at all
    pub fn blind() -> Self {
        Self {
            capabilities: MotionCapabilities {
                program_load: true,
                program_start: true,
                ..MotionCapabilities::default()
            },
            ..Self::with_states(Vec::new())
        }
    }

    /// Controller answering only the program-state query
    pub fn program_state_only(reply: QueryReply) -> Self {
        let motion = Self {
            capabilities: MotionCapabilities {
                program_state: true,
                program_load: true,
                program_start: true,
                ..MotionCapabilities::default()
            },
            ..Self::with_states(Vec::new())
        };
        *motion.program_state.lock().unwrap() = Some(reply);
        motion
    }

    pub fn failing_load(mut self, code: i32) -> Self {
        self.load_code = code;
        self
    }

    /// Also accept direct moves and gripper commands
    pub fn with_arm_commands(mut self) -> Self {
        self.capabilities.direct_move = true;
        self.capabilities.gripper = true;
        self
    }

    pub fn failing_moves(mut self, code: i32) -> Self {
        self.move_code = code;
        self
    }
}

#[async_trait]
impl MotionController for ScriptedMotion {
    fn capabilities(&self) -> MotionCapabilities {
        self.capabilities.clone()
    }

    async fn state_field(&self) -> Result<ProgramState, DeviceError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.states.lock().unwrap().pop_front();
        match next {
            Some(state) => {
                *self.last.lock().unwrap() = state;
                Ok(state)
            }
            None => Ok(*self.last.lock().unwrap()),
        }
    }

    async fn program_state(&self) -> Result<QueryReply, DeviceError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.program_state
            .lock()
            .unwrap()
            .ok_or(DeviceError::Unsupported("program state query"))
    }

    async fn load_program(&self, path: &str) -> Result<i32, DeviceError> {
        self.loaded.lock().unwrap().push(path.to_string());
        Ok(self.load_code)
    }

    async fn start_program(&self) -> Result<i32, DeviceError> {
        Ok(0)
    }

    async fn move_to(&self, pose: &TargetPose) -> Result<i32, DeviceError> {
        self.moves.lock().unwrap().push(ArmCommand::Move(*pose));
        Ok(self.move_code)
    }

    async fn set_gripper(&self, open: bool) -> Result<i32, DeviceError> {
        self.moves.lock().unwrap().push(ArmCommand::Gripper(open));
        Ok(0)
    }
}

/// Serial peripheral with scripted frames, buffered bytes and query replies
#[derive(Default)]
pub struct MockPeripheral {
    connected: AtomicBool,
    pub writes: Mutex<Vec<Vec<u8>>>,
    frames: Mutex<VecDeque<(Duration, Vec<u8>)>>,
    buffered: Mutex<Vec<u8>>,
    replies: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MockPeripheral {
    pub fn new() -> Self {
        let port = Self::default();
        port.connected.store(true, Ordering::SeqCst);
        port
    }

    pub fn closed() -> Self {
        Self::default()
    }

    /// Deliver `bytes` as a frame `after` the next frame read starts
    pub fn queue_frame(&self, after: Duration, bytes: &[u8]) {
        self.frames.lock().unwrap().push_back((after, bytes.to_vec()));
    }

    pub fn set_buffered(&self, bytes: &[u8]) {
        *self.buffered.lock().unwrap() = bytes.to_vec();
    }

    /// Answer a written query with a frame
    pub fn reply_to(&self, query: &[u8], response: &[u8]) {
        self.replies
            .lock()
            .unwrap()
            .insert(query.to_vec(), response.to_vec());
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeripheralPort for MockPeripheral {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<usize, DeviceError> {
        if !self.is_connected() {
            return Err(DeviceError::Disconnected);
        }
        self.writes.lock().unwrap().push(bytes.to_vec());
        let reply = self.replies.lock().unwrap().get(bytes).cloned();
        if let Some(reply) = reply {
            self.queue_frame(Duration::from_millis(10), &reply);
        }
        Ok(bytes.len())
    }

    async fn read_frame(&self, timeout: Duration) -> Result<Option<Vec<u8>>, DeviceError> {
        let next = self.frames.lock().unwrap().pop_front();
        match next {
            Some((after, bytes)) if after <= timeout => {
                tokio::time::sleep(after).await;
                Ok(Some(bytes))
            }
            Some((after, bytes)) => {
                self.frames.lock().unwrap().push_front((after - timeout, bytes));
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn read_buffered(&self) -> Result<Vec<u8>, DeviceError> {
        Ok(std::mem::take(&mut *self.buffered.lock().unwrap()))
    }
}

pub fn settings() -> RuntimeSettings {
    RuntimeSettings {
        poll_interval_ms: 100,
        motion_completion_timeout_secs: 8.0,
        ..RuntimeSettings::default()
    }
}

pub fn resolver_with(devices: Arc<DeviceSet>, settings: RuntimeSettings) -> Resolver {
    Resolver::new(devices, Arc::new(settings))
}

pub fn attach_peripheral(devices: &DeviceSet, name: &str) -> Arc<MockPeripheral> {
    let port = Arc::new(MockPeripheral::new());
    devices.connect_peripheral(PeripheralHandle::connect(name, port.clone()));
    port
}

pub fn attach_motion(devices: &DeviceSet, motion: ScriptedMotion) -> Arc<ScriptedMotion> {
    let motion = Arc::new(motion);
    devices.connect_motion(MotionHandle::connect("arm", motion.clone()));
    motion
}

pub fn delay_step(name: &str, seconds: f64) -> StepDraft {
    StepDraft::new(
        name,
        StepType::Delay,
        ActionSpec::Delay { seconds },
        WaitSpec::None,
        seconds + 5.0,
    )
}

pub fn command_step(name: &str, device: &str, payload: &str) -> StepDraft {
    StepDraft::new(
        name,
        StepType::Peripheral,
        ActionSpec::SendPeripheralCommand {
            device: device.into(),
            payload: payload.into(),
            encoding: None,
            terminator: None,
        },
        WaitSpec::None,
        5.0,
    )
}

pub fn workflow(name: &str, resolver: Resolver) -> Workflow {
    Workflow::new(name, resolver)
}
