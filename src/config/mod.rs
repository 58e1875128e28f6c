//! Configuration management for the armflow engine
//!
//! Handles server binding, the workflow registry directory, and the runtime
//! knobs used by the sequencer and completion detectors.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Workflow document storage
    pub storage: StorageConfig,
    /// Sequencer and detector settings
    pub runtime: RuntimeSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Workflow registry storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON document per registered workflow plus the
    /// registry index (default: "workflows")
    pub workflow_dir: String,
}

/// What motion completion reports when the controller exposes no status API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownMotionPolicy {
    /// Sleep the full timeout, then assume the motion finished
    TrustTimeout,
    /// Report failure immediately
    FailClosed,
}

impl FromStr for UnknownMotionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trust_timeout" | "fail_open" => Ok(Self::TrustTimeout),
            "fail_closed" => Ok(Self::FailClosed),
            other => Err(format!("unknown motion policy: {}", other)),
        }
    }
}

/// Runtime knobs shared by the resolver, detectors and sequencer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Poll interval for completion loops, in milliseconds
    pub poll_interval_ms: u64,
    /// Embedded completion budget for `run_motion_program`, in seconds
    pub motion_completion_timeout_secs: f64,
    /// Ceiling on the join wait of a parallel step, in seconds
    pub parallel_join_ceiling_secs: f64,
    /// Policy when a motion handle exposes no completion capability
    pub unknown_motion_policy: UnknownMotionPolicy,
    /// Directory prefix on the controller where motion programs live
    pub program_root: String,
    /// Settle time for condition reads, in seconds
    pub condition_settle_secs: f64,
    /// Frame read slice used when a peripheral wait has no timeout, in seconds
    pub frame_slice_secs: f64,
    /// Upper bound on step executions in one run (guards runaway jump loops)
    pub max_step_executions: usize,
    /// Run validation before every run
    pub validate_before_run: bool,
}

impl RuntimeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn motion_completion_timeout(&self) -> Duration {
        secs(self.motion_completion_timeout_secs)
    }

    pub fn parallel_join_ceiling(&self) -> Duration {
        secs(self.parallel_join_ceiling_secs)
    }

    pub fn condition_settle(&self) -> Duration {
        secs(self.condition_settle_secs)
    }

    pub fn frame_slice(&self) -> Duration {
        secs(self.frame_slice_secs)
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: env_or("ARMFLOW_POLL_INTERVAL_MS", 100),
            motion_completion_timeout_secs: env_or("ARMFLOW_MOTION_TIMEOUT_SECS", 8.0),
            parallel_join_ceiling_secs: env_or("ARMFLOW_PARALLEL_JOIN_SECS", 300.0),
            unknown_motion_policy: env_or(
                "ARMFLOW_UNKNOWN_MOTION_POLICY",
                UnknownMotionPolicy::TrustTimeout,
            ),
            program_root: std::env::var("ARMFLOW_PROGRAM_ROOT")
                .unwrap_or_else(|_| "/fruser/".to_string()),
            condition_settle_secs: env_or("ARMFLOW_CONDITION_SETTLE_SECS", 0.3),
            frame_slice_secs: env_or("ARMFLOW_FRAME_SLICE_SECS", 2.0),
            max_step_executions: env_or("ARMFLOW_MAX_STEP_EXECUTIONS", 1000),
            validate_before_run: env_or("ARMFLOW_VALIDATE_BEFORE_RUN", true),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("ARMFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("ARMFLOW_PORT", 3004),
            },
            storage: StorageConfig {
                workflow_dir: std::env::var("ARMFLOW_WORKFLOW_DIR")
                    .unwrap_or_else(|_| "workflows".to_string()),
            },
            runtime: RuntimeSettings::default(),
        }
    }
}

/// Seconds as a Duration, clamping negative and non-finite values to zero
/// and values beyond the representable range to `Duration::MAX`
pub(crate) fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Read and parse an env var, falling back to the default when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_policy_parses_both_spellings() {
        assert_eq!("trust_timeout".parse(), Ok(UnknownMotionPolicy::TrustTimeout));
        assert_eq!("FAIL_OPEN".parse(), Ok(UnknownMotionPolicy::TrustTimeout));
        assert_eq!(" fail_closed ".parse(), Ok(UnknownMotionPolicy::FailClosed));
        assert!("maybe".parse::<UnknownMotionPolicy>().is_err());
    }

    #[test]
    fn secs_clamps_bad_values() {
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(1.5), Duration::from_millis(1500));
        assert_eq!(secs(1e20), Duration::MAX);
    }
}
