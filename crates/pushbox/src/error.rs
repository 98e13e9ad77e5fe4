//! Error type shared by every harness component.
//!
//! Errors carry a stable [`ErrorCode`], a human message and an optional JSON
//! context. Diagnostic context (captured streams, exit codes) always travels
//! in `context` so the CLI can render it verbatim or emit it as JSON.

use crate::model::ErrorInfo;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub type HarnessResult<T> = Result<T, HarnessError>;

/// Stable error codes surfaced in reports and JSON output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Suite configuration is invalid or could not be parsed.
    #[serde(rename = "E_CONFIG")]
    Config,
    /// Local filesystem operation failed.
    #[serde(rename = "E_IO")]
    Io,
    /// An external program could not be spawned.
    #[serde(rename = "E_SPAWN")]
    Spawn,
    /// An operation exceeded its time budget.
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    /// The container runtime refused to start a sandbox.
    #[serde(rename = "E_SANDBOX_START")]
    SandboxStart,
    /// Another tracked sandbox already holds the requested port.
    #[serde(rename = "E_PORT_IN_USE")]
    PortInUse,
    /// A command inside a sandbox failed.
    #[serde(rename = "E_SANDBOX_EXEC")]
    SandboxExec,
    /// An image build failed.
    #[serde(rename = "E_IMAGE_BUILD")]
    ImageBuild,
    /// A setup artifact step (compile, download) failed.
    #[serde(rename = "E_ARTIFACT")]
    Artifact,
    /// Key pair or ssh config could not be prepared.
    #[serde(rename = "E_TRUST_MATERIAL")]
    TrustMaterial,
    /// Key-based access into a sandbox could not be established.
    #[serde(rename = "E_TRUST_BOOTSTRAP")]
    TrustBootstrap,
    /// Subject output did not match the expected category.
    #[serde(rename = "E_CLASSIFICATION")]
    Classification,
    /// The run was interrupted before completing.
    #[serde(rename = "E_INTERRUPTED")]
    Interrupted,
    /// Invalid command-line arguments.
    #[serde(rename = "E_CLI_INVALID_ARG")]
    CliInvalidArg,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "E_CONFIG",
            Self::Io => "E_IO",
            Self::Spawn => "E_SPAWN",
            Self::Timeout => "E_TIMEOUT",
            Self::SandboxStart => "E_SANDBOX_START",
            Self::PortInUse => "E_PORT_IN_USE",
            Self::SandboxExec => "E_SANDBOX_EXEC",
            Self::ImageBuild => "E_IMAGE_BUILD",
            Self::Artifact => "E_ARTIFACT",
            Self::TrustMaterial => "E_TRUST_MATERIAL",
            Self::TrustBootstrap => "E_TRUST_BOOTSTRAP",
            Self::Classification => "E_CLASSIFICATION",
            Self::Interrupted => "E_INTERRUPTED",
            Self::CliInvalidArg => "E_CLI_INVALID_ARG",
        }
    }

    /// Parse a wire code back into an [`ErrorCode`].
    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        let all = [
            Self::Config,
            Self::Io,
            Self::Spawn,
            Self::Timeout,
            Self::SandboxStart,
            Self::PortInUse,
            Self::SandboxExec,
            Self::ImageBuild,
            Self::Artifact,
            Self::TrustMaterial,
            Self::TrustBootstrap,
            Self::Classification,
            Self::Interrupted,
            Self::CliInvalidArg,
        ];
        all.into_iter().find(|candidate| candidate.as_str() == code)
    }

    /// Process exit code the CLI uses for this error class.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Classification
            | Self::SandboxStart
            | Self::PortInUse
            | Self::SandboxExec
            | Self::TrustBootstrap
            | Self::Timeout => 1,
            Self::CliInvalidArg => 2,
            Self::Config => 3,
            Self::Spawn | Self::ImageBuild | Self::Artifact | Self::TrustMaterial => 4,
            Self::Io => 5,
            Self::Interrupted => 130,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by harness components.
#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("{code}: {message}")]
pub struct HarnessError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl HarnessError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(
        code: ErrorCode,
        message: impl Into<String>,
        context: impl Into<Option<Value>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Config, message)
    }

    pub fn io(code: ErrorCode, message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self {
            code,
            message: message.into(),
            context: Some(serde_json::json!({ "source": err.to_string() })),
        }
    }

    pub fn interrupted() -> Self {
        Self::new(ErrorCode::Interrupted, "run interrupted")
    }

    pub fn cli_invalid_arg(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CliInvalidArg, message)
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}
