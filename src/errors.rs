//! Typed error hierarchy for the Crucible orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `ConfigError` — configuration loading and validation failures
//! - `RotationError` — detector rotation failures
//! - `RunError` — fatal failures of a whole orchestration run
//!
//! Recoverable conditions (a stage timing out, a fixer returning the
//! artifact unchanged, a failing sandbox verdict) never appear here; they
//! are absorbed into `StageOutcome`s by the pipeline stage runner.

use std::path::PathBuf;

use thiserror::Error;

/// Process exit status for a successful run.
pub const EXIT_SUCCESS: u8 = 0;
/// Process exit status for generation/fix failures and other fatal errors.
pub const EXIT_FAILURE: u8 = 1;
/// Process exit status when the sandbox backend is unavailable.
pub const EXIT_SANDBOX_UNAVAILABLE: u8 = 2;

/// Errors raised while loading or validating configuration.
///
/// All of these are fatal before the iteration loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid rotation strategy '{value}'. Valid values: fixed, random, round_robin")]
    InvalidRotationStrategy { value: String },

    #[error("Unknown agent '{name}' in [agents] section")]
    UnknownAgent { name: String },

    #[error("[agents] detectors must name at least one detection agent")]
    NoDetectors,
}

/// Errors from the detector rotation policy. Fatal to the current run.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("Detector pool is empty")]
    EmptyPool,
}

/// Fatal failures of a whole orchestration run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Initial code generation produced no artifact")]
    GenerationFailed,

    #[error("Fix stage returned no artifact at iteration {iteration}, round {round}")]
    FixFailed { iteration: u32, round: u32 },

    #[error("Sandbox backend unavailable: {reason}")]
    SandboxUnavailable { reason: String },

    #[error(transparent)]
    Rotation(#[from] RotationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RunError {
    /// Map a fatal run error to the process exit status.
    ///
    /// Sandbox unavailability gets its own status so callers can tell
    /// "the backend is down" apart from "the run itself failed".
    pub fn exit_status(&self) -> u8 {
        match self {
            RunError::SandboxUnavailable { .. } => EXIT_SANDBOX_UNAVAILABLE,
            _ => EXIT_FAILURE,
        }
    }
}
