use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One provision-execute-classify cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub target: ScenarioTarget,
    /// Shell commands run inside the sandbox right before the subject.
    #[serde(default)]
    pub prepare: Vec<String>,
    pub expect: OutputPattern,
    #[serde(default = "default_scenario_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_scenario_timeout_ms() -> u64 {
    60_000
}

impl ScenarioSpec {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sandbox name, if this scenario provisions one.
    #[must_use]
    pub fn sandbox_name(&self) -> Option<&str> {
        match &self.target {
            ScenarioTarget::Sandbox { sandbox, .. } => Some(sandbox),
            ScenarioTarget::Direct { .. } => None,
        }
    }
}

/// Where the subject binary is pointed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioTarget {
    /// Start `image` as a sandbox called `sandbox` and deploy into it.
    Sandbox { image: String, sandbox: String },
    /// No sandbox; the subject is pointed at `destination` verbatim.
    Direct { destination: String },
}

/// Expected semantic category of the subject's output.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputPattern {
    Contains {
        text: String,
    },
    Regex {
        pattern: String,
        #[serde(default)]
        case_insensitive: bool,
    },
}

impl OutputPattern {
    #[must_use]
    pub fn contains(text: impl Into<String>) -> Self {
        Self::Contains { text: text.into() }
    }

    /// Case-insensitive regex, the form every built-in scenario uses.
    #[must_use]
    pub fn regex_ci(pattern: impl Into<String>) -> Self {
        Self::Regex {
            pattern: pattern.into(),
            case_insensitive: true,
        }
    }
}

impl fmt::Display for OutputPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains { text } => write!(f, "\"{text}\""),
            Self::Regex {
                pattern,
                case_insensitive,
            } => {
                let flags = if *case_insensitive { "i" } else { "" };
                write!(f, "/{pattern}/{flags}")
            }
        }
    }
}
