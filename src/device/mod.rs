//! Device Handle Layer
//!
//! Holds the motion controller and serial peripherals a workflow talks to.
//! Handles are attached and detached through lock-free pointer swaps, so a
//! workflow can be loaded before its devices come online.

// Robot arm SDK boundary and capability set
pub mod motion;

// Serial peripheral boundary
pub mod peripheral;

pub use motion::{
    MotionCapabilities, MotionController, MotionHandle, MoveMode, ProgramState, QueryReply,
    RunStateQuery, TargetPose,
};
pub use peripheral::{PeripheralHandle, PeripheralPort};

use crate::error::WorkflowError;
use arc_swap::{ArcSwap, ArcSwapOption};
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::sync::OwnedMutexGuard;

/// A device a step touches, used for leasing and conflict checks
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceRef {
    Motion,
    Peripheral(String),
}

impl DeviceRef {
    pub fn peripheral(name: &str) -> Self {
        DeviceRef::Peripheral(normalize(name))
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Motion => write!(f, "motion"),
            DeviceRef::Peripheral(name) => write!(f, "{}", name),
        }
    }
}

/// Device names are matched case-insensitively
fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Lease over the devices of one running step; released on drop
#[derive(Debug)]
pub struct DeviceLease {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// The set of devices available to a workflow
///
/// Shared by every resolved action and wait. Reads never block: each lookup
/// loads the current pointer, and connect/disconnect swap in a new map.
#[derive(Debug, Default)]
pub struct DeviceSet {
    motion: ArcSwapOption<MotionHandle>,
    peripherals: ArcSwap<HashMap<String, Arc<PeripheralHandle>>>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach (or replace) the motion controller
    pub fn connect_motion(&self, handle: MotionHandle) {
        tracing::info!("✅ Motion controller attached: {}", handle.name());
        self.motion.store(Some(Arc::new(handle)));
    }

    pub fn disconnect_motion(&self) {
        if self.motion.swap(None).is_some() {
            tracing::info!("🔌 Motion controller detached");
        }
    }

    pub fn motion(&self) -> Option<Arc<MotionHandle>> {
        self.motion.load_full()
    }

    /// Attach (or replace) a peripheral under its handle name
    pub fn connect_peripheral(&self, handle: PeripheralHandle) {
        let key = normalize(handle.name());
        let handle = Arc::new(handle);
        self.peripherals.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(key.clone(), Arc::clone(&handle));
            next
        });
        tracing::info!("✅ Peripheral attached: {}", key);
    }

    pub fn disconnect_peripheral(&self, name: &str) -> bool {
        let key = normalize(name);
        let mut removed = false;
        self.peripherals.rcu(|current| {
            let mut next = (**current).clone();
            removed = next.remove(&key).is_some();
            next
        });
        if removed {
            tracing::info!("🔌 Peripheral detached: {}", key);
        }
        removed
    }

    pub fn peripheral(&self, name: &str) -> Option<Arc<PeripheralHandle>> {
        self.peripherals.load().get(&normalize(name)).cloned()
    }

    /// Peripheral lookup that also checks the port is open
    pub fn connected_motion(&self) -> Result<Arc<MotionHandle>, WorkflowError> {
        self.motion()
            .ok_or_else(|| WorkflowError::DeviceNotConnected("motion".to_string()))
    }

    pub fn connected_peripheral(&self, name: &str) -> Result<Arc<PeripheralHandle>, WorkflowError> {
        match self.peripheral(name) {
            Some(handle) if handle.is_connected() => Ok(handle),
            Some(_) => Err(WorkflowError::DeviceNotConnected(format!("{} (port closed)", name))),
            None => Err(WorkflowError::DeviceNotConnected(name.to_string())),
        }
    }

    pub fn peripheral_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.peripherals.load().keys().cloned().collect();
        names.sort();
        names
    }

    /// Lease every listed device for the duration of a step
    ///
    /// Absent devices are skipped; the action addressing them reports
    /// `DeviceNotConnected` on its own.
    pub fn lease(&self, devices: &[DeviceRef]) -> Result<DeviceLease, WorkflowError> {
        let mut guards = Vec::with_capacity(devices.len());
        for device in devices {
            let lock = match device {
                DeviceRef::Motion => self.motion().map(|handle| handle.lease()),
                DeviceRef::Peripheral(name) => self.peripheral(name).map(|handle| handle.lease()),
            };
            if let Some(lock) = lock {
                let guard = lock
                    .try_lock_owned()
                    .map_err(|_| WorkflowError::DeviceBusy(device.to_string()))?;
                guards.push(guard);
            }
        }
        Ok(DeviceLease { _guards: guards })
    }
}
