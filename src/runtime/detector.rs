//! Completion Detector
//!
//! Decides whether the device-side effect of the most recent action has
//! finished. Three strategies live here:
//! - motion completion: poll the motion controller's cached status queries
//! - peripheral completion: wait for a response frame (or raw bytes)
//! - condition evaluation: read a numeric value and compare it
//!
//! Every loop checks the cancellation token on each tick.

use crate::config::{RuntimeSettings, UnknownMotionPolicy};
use crate::device::{DeviceSet, MotionHandle, PeripheralHandle, ProgramState};
use crate::runtime::encoding::to_hex;
use crate::workflow::types::ConditionSpec;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of a completion wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Done,
    Failed(String),
    TimedOut,
    Cancelled,
}

impl Completion {
    pub fn is_done(&self) -> bool {
        matches!(self, Completion::Done)
    }

    pub fn describe(&self) -> String {
        match self {
            Completion::Done => "done".to_string(),
            Completion::Failed(reason) => reason.clone(),
            Completion::TimedOut => "timed out".to_string(),
            Completion::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Sleep unless the token fires first; returns false when cancelled
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Poll a motion controller until its program finishes, fails, or `timeout` elapses
pub async fn wait_for_motion(
    handle: &MotionHandle,
    timeout: Duration,
    settings: &RuntimeSettings,
    cancel: &CancellationToken,
) -> Completion {
    tracing::info!("⏳ Waiting for motion on '{}' (timeout: {:?})", handle.name(), timeout);

    if handle.capabilities().has_no_completion_query() {
        return match settings.unknown_motion_policy {
            UnknownMotionPolicy::TrustTimeout => {
                let budget = timeout.max(Duration::from_millis(500));
                tracing::warn!(
                    "⚠️ Motion handle '{}' exposes no status API; trusting the {:?} timeout as completion",
                    handle.name(),
                    budget
                );
                if sleep_or_cancel(budget, cancel).await {
                    Completion::Done
                } else {
                    Completion::Cancelled
                }
            }
            UnknownMotionPolicy::FailClosed => {
                tracing::warn!(
                    "⚠️ Motion handle '{}' exposes no status API; failing closed",
                    handle.name()
                );
                Completion::Failed("motion controller exposes no completion query".to_string())
            }
        };
    }

    // a deadline past the clock's range never arrives
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if cancel.is_cancelled() {
            return Completion::Cancelled;
        }
        if let Some(outcome) = poll_motion_once(handle).await {
            return outcome;
        }
        let now = Instant::now();
        let remaining = deadline.map(|deadline| deadline.saturating_duration_since(now));
        if remaining == Some(Duration::ZERO) {
            tracing::warn!("⚠️ Motion completion timed out on '{}' ({:?})", handle.name(), timeout);
            return Completion::TimedOut;
        }
        let pause = remaining.map_or(settings.poll_interval(), |left| settings.poll_interval().min(left));
        if !sleep_or_cancel(pause, cancel).await {
            return Completion::Cancelled;
        }
    }
}

/// One pass over the status queries in priority order; `None` means keep polling
async fn poll_motion_once(handle: &MotionHandle) -> Option<Completion> {
    let controller = handle.controller();
    let caps = handle.capabilities();

    if caps.state_field {
        match controller.state_field().await {
            Ok(state) => {
                tracing::debug!("📊 Program state: {:?}", state);
                match state {
                    ProgramState::Idle | ProgramState::Finished => {
                        tracing::info!("✅ Motion finished (state field)");
                        return Some(Completion::Done);
                    }
                    ProgramState::Error => {
                        tracing::error!("❌ Controller reported a program error");
                        return Some(Completion::Failed(
                            "controller reported a program error".to_string(),
                        ));
                    }
                    ProgramState::Running | ProgramState::Paused | ProgramState::Unknown(_) => {}
                }
            }
            Err(e) => tracing::debug!("state field read failed: {}", e),
        }
    }

    if caps.program_state {
        match controller.program_state().await {
            Ok(reply) if reply.error == 0 && reply.value == Some(0) => {
                tracing::info!("✅ Motion finished (program state query)");
                return Some(Completion::Done);
            }
            Ok(reply) => tracing::debug!("program state: {:?}", reply),
            Err(e) => tracing::debug!("program state query failed: {}", e),
        }
    }

    for query in &caps.run_state_queries {
        match controller.run_state(*query).await {
            Ok(reply) if reply.error == 0 && matches!(reply.value, None | Some(0)) => {
                tracing::info!("✅ Motion finished ({})", query.name());
                return Some(Completion::Done);
            }
            Ok(reply) => tracing::debug!("{}: {:?}", query.name(), reply),
            Err(e) => tracing::debug!("{} failed: {}", query.name(), e),
        }
    }

    if caps.command_finished {
        match controller.command_finished().await {
            Ok(reply) if reply.error == 0 && reply.value.is_some_and(|v| v != 0) => {
                tracing::info!("✅ Motion finished (command finished query)");
                return Some(Completion::Done);
            }
            Ok(reply) => tracing::debug!("command finished: {:?}", reply),
            Err(e) => tracing::debug!("command finished query failed: {}", e),
        }
    }

    // diagnostic only
    if caps.motion_state {
        match controller.motion_state().await {
            Ok(reply) => tracing::debug!("📊 Motion state: {:?}", reply),
            Err(e) => tracing::debug!("motion state query failed: {}", e),
        }
    }

    None
}

/// How a peripheral response is awaited and judged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseExpectation {
    /// Exact bytes required; `None` accepts any non-empty response
    pub expected: Option<Vec<u8>>,
    /// `None` waits until something arrives
    pub timeout: Option<Duration>,
    /// Skip frame delimiting and accept the first non-empty raw read
    pub prefer_raw: bool,
}

/// Wait for a response from a peripheral
pub async fn wait_for_response(
    handle: &PeripheralHandle,
    expectation: &ResponseExpectation,
    settings: &RuntimeSettings,
    cancel: &CancellationToken,
) -> Completion {
    if !handle.is_connected() {
        tracing::error!("❌ Peripheral '{}' port is not open", handle.name());
        return Completion::Failed(format!("peripheral '{}' is not connected", handle.name()));
    }
    match expectation.timeout {
        Some(timeout) => tracing::info!("⏳ Waiting for response from {} (timeout: {:?})", handle.name(), timeout),
        None => tracing::info!("⏳ Waiting for response from {} (no timeout)", handle.name()),
    }

    let response = if expectation.prefer_raw {
        read_raw_until(handle, expectation.timeout, settings, cancel).await
    } else {
        read_framed(handle, expectation.timeout, settings, cancel).await
    };

    match response {
        Ok(Some(bytes)) => judge_response(handle.name(), &bytes, expectation.expected.as_deref()),
        Ok(None) => {
            tracing::warn!("⚠️ No response from {}", handle.name());
            Completion::TimedOut
        }
        Err(outcome) => outcome,
    }
}

fn judge_response(device: &str, response: &[u8], expected: Option<&[u8]>) -> Completion {
    tracing::info!("📥 Response from {}: {}", device, to_hex(response));
    match expected {
        Some(expected) if response == expected => {
            tracing::info!("✅ Response matches expected");
            Completion::Done
        }
        Some(expected) => {
            tracing::warn!("⚠️ Response mismatch. Expected: {}", to_hex(expected));
            Completion::Failed(format!(
                "response {} does not match expected {}",
                to_hex(response),
                to_hex(expected)
            ))
        }
        None => Completion::Done,
    }
}

/// Poll raw buffered bytes only
async fn read_raw_until(
    handle: &PeripheralHandle,
    timeout: Option<Duration>,
    settings: &RuntimeSettings,
    cancel: &CancellationToken,
) -> Result<Option<Vec<u8>>, Completion> {
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(Completion::Cancelled);
        }
        match handle.port().read_buffered().await {
            Ok(bytes) if !bytes.is_empty() => return Ok(Some(bytes)),
            Ok(_) => {}
            Err(e) => return Err(Completion::Failed(format!("raw read failed: {}", e))),
        }
        if let Some(timeout) = timeout {
            if started.elapsed() >= timeout {
                tracing::warn!("⚠️ Raw wait timed out on {}", handle.name());
                return Ok(None);
            }
        }
        if !sleep_or_cancel(settings.poll_interval(), cancel).await {
            return Err(Completion::Cancelled);
        }
    }
}

/// One frame within the timeout, or frames in short slices until one arrives;
/// each empty frame read falls back to whatever raw bytes are buffered
async fn read_framed(
    handle: &PeripheralHandle,
    timeout: Option<Duration>,
    settings: &RuntimeSettings,
    cancel: &CancellationToken,
) -> Result<Option<Vec<u8>>, Completion> {
    match timeout {
        Some(timeout) => read_frame_or_buffered(handle, timeout, cancel).await,
        None => loop {
            if let Some(bytes) = read_frame_or_buffered(handle, settings.frame_slice(), cancel).await? {
                return Ok(Some(bytes));
            }
            if !sleep_or_cancel(settings.poll_interval(), cancel).await {
                return Err(Completion::Cancelled);
            }
        },
    }
}

async fn read_frame_or_buffered(
    handle: &PeripheralHandle,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Option<Vec<u8>>, Completion> {
    let frame = tokio::select! {
        frame = handle.port().read_frame(timeout) => frame,
        _ = cancel.cancelled() => return Err(Completion::Cancelled),
    };
    match frame {
        Ok(Some(bytes)) if !bytes.is_empty() => return Ok(Some(bytes)),
        Ok(_) => {}
        Err(e) => return Err(Completion::Failed(format!("frame read failed: {}", e))),
    }
    match handle.port().read_buffered().await {
        Ok(bytes) if !bytes.is_empty() => Ok(Some(bytes)),
        Ok(_) => Ok(None),
        Err(e) => Err(Completion::Failed(format!("raw read failed: {}", e))),
    }
}

/// Evaluate a condition; missing devices and unreadable values count as false
pub async fn evaluate_condition(
    condition: &ConditionSpec,
    devices: &DeviceSet,
    settings: &RuntimeSettings,
    cancel: &CancellationToken,
) -> bool {
    let (device, channel, operator, threshold) = match condition {
        ConditionSpec::AlwaysTrue => return true,
        ConditionSpec::AlwaysFalse => return false,
        ConditionSpec::SensorValue { device, channel, operator, threshold } => {
            (device, channel, *operator, *threshold)
        }
    };

    let handle = match devices.connected_peripheral(device) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("❌ Condition device unavailable: {}", e);
            return false;
        }
    };

    let query = format!("READ_{}", channel.to_uppercase());
    match handle.port().write_raw(query.as_bytes()).await {
        Ok(written) if written > 0 => {}
        Ok(_) => {
            tracing::warn!("⚠️ Condition query to {} wrote no bytes", device);
            return false;
        }
        Err(e) => {
            tracing::error!("❌ Condition query to {} failed: {}", device, e);
            return false;
        }
    }

    let response = match read_frame_or_buffered(&handle, settings.condition_settle(), cancel).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            tracing::warn!("⚠️ No reading from {} for {}", device, channel);
            return false;
        }
        Err(outcome) => {
            tracing::warn!("⚠️ Condition read on {} ended: {}", device, outcome.describe());
            return false;
        }
    };

    let text = String::from_utf8_lossy(&response);
    let value: f64 = match text.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("❌ Could not parse reading '{}' from {}", text.trim(), device);
            return false;
        }
    };

    let result = operator.compare(value, threshold);
    tracing::info!("🔍 Condition: {} {} {} = {}", value, operator.symbol(), threshold, result);
    result
}
