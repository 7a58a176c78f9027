//! Error taxonomy for the parity harness.
//!
//! Every failure carries enough context (command line, exit code, captured
//! output) to diagnose a broken case without re-running it.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Location of the first difference between two outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    /// Byte offset of the first differing byte (or the shorter length).
    pub byte_offset: usize,
    /// 1-based line number containing that byte.
    pub line: usize,
}

/// Errors produced while configuring or running equivalence checks.
#[derive(Debug, Error)]
pub enum ParityError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid environment variable value for {key}: {value}")]
    InvalidEnvVar { key: String, value: String },

    #[error("invalid test case '{case}': {reason}")]
    InvalidCase { case: String, reason: String },

    #[error("fixture '{name}' could not be resolved: {reason}")]
    FixtureResolution { name: String, reason: String },

    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "variant '{variant}' exited with {} running `{command}`\n--- stderr ---\n{stderr}",
        describe_exit(*code)
    )]
    NonZeroExit { variant: String, command: String, code: Option<i32>, stderr: String },

    #[error("variant '{variant}' timed out after {timeout:?} running `{command}`; process killed")]
    Timeout { variant: String, command: String, timeout: Duration },

    #[error(
        "outputs of '{left}' and '{right}' differ at byte {} (line {})\n--- {left} ---\n{left_output}\n--- {right} ---\n{right_output}",
        divergence.byte_offset,
        divergence.line
    )]
    OutputMismatch {
        left: String,
        right: String,
        divergence: Divergence,
        left_output: String,
        right_output: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse failure classification used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    FixtureResolution,
    Execution,
    NonZeroExit,
    Timeout,
    OutputMismatch,
    Io,
}

impl ParityError {
    /// Classify this error for reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Config(_) | Self::InvalidEnvVar { .. } | Self::InvalidCase { .. } => {
                FailureKind::Configuration
            }
            Self::FixtureResolution { .. } => FailureKind::FixtureResolution,
            Self::Spawn { .. } => FailureKind::Execution,
            Self::NonZeroExit { .. } => FailureKind::NonZeroExit,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::OutputMismatch { .. } => FailureKind::OutputMismatch,
            Self::Io(_) | Self::TomlParse(_) | Self::TomlSerialize(_) | Self::Json(_) => {
                FailureKind::Io
            }
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_case(case: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCase { case: case.into(), reason: reason.into() }
    }

    pub fn fixture(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FixtureResolution { name: name.into(), reason: reason.into() }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, ParityError>;
