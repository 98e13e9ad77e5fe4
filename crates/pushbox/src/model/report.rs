use crate::model::{CommandResult, RunId};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const REPORT_VERSION: u32 = 1;

/// Position of a scenario in its state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Pending,
    SandboxStarting,
    HealthWaiting,
    TrustBootstrapping,
    Executing,
    Classifying,
    Passed,
    Failed,
}

impl ScenarioState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::SandboxStarting => "sandbox starting",
            Self::HealthWaiting => "waiting for health",
            Self::TrustBootstrapping => "bootstrapping trust",
            Self::Executing => "executing subject",
            Self::Classifying => "classifying output",
            Self::Passed => "passed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: ScenarioState,
    pub at_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub status: ScenarioStatus,
    pub states: Vec<StateTransition>,
    pub sandbox: Option<String>,
    /// Rendered expected pattern, e.g. `/error|failed/i`.
    pub expected: String,
    pub subject: Option<CommandResult>,
    pub error: Option<ErrorInfo>,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
}

impl ScenarioReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }

    /// States visited, in order.
    #[must_use]
    pub fn state_path(&self) -> Vec<ScenarioState> {
        self.states.iter().map(|t| t.state).collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Errored,
    Canceled,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupReport {
    /// Sandboxes discovered by prefix or still tracked.
    pub found: usize,
    pub removed: usize,
    /// Names whose removal failed; swallowed, reported for humans.
    pub failed: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactOutcome {
    pub name: String,
    pub cached: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetupReport {
    pub artifacts: Vec<ArtifactOutcome>,
    /// Image tags in the order their builds completed, wave by wave.
    pub images: Vec<String>,
    pub key_generated: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuiteReport {
    pub report_version: u32,
    pub run_id: RunId,
    pub suite: String,
    pub status: RunStatus,
    pub setup: Option<SetupReport>,
    pub scenarios: Vec<ScenarioReport>,
    pub cleanup: Option<CleanupReport>,
    pub error: Option<ErrorInfo>,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
}

impl SuiteReport {
    #[must_use]
    pub fn failed_scenarios(&self) -> Vec<&ScenarioReport> {
        self.scenarios.iter().filter(|s| !s.passed()).collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub context: Option<serde_json::Value>,
}

/// Runtime-reported readiness of a sandbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Starting,
    Unhealthy,
    Healthy,
}

impl HealthState {
    /// Parse the runtime's `{{.State.Health.Status}}` output.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            "starting" => Self::Starting,
            _ => Self::Unknown,
        }
    }
}
