//! Sandbox boundary.
//!
//! The orchestrator hands the artifact to an isolated execution backend
//! and gets back a verdict. The verdict is advisory: a failing artifact
//! reflects artifact quality, not orchestrator health. The one fatal
//! condition is the backend itself being unavailable, which carries its
//! own process exit status.

pub mod docker;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::Artifact;

pub use docker::DockerSandbox;

/// Result of executing the artifact in isolation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxVerdict {
    pub ok: bool,
    pub exit_status: i64,
    pub combined_output: String,
}

impl SandboxVerdict {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            exit_status: 0,
            combined_output: output.into(),
        }
    }

    pub fn failed(exit_status: i64, output: impl Into<String>) -> Self {
        Self {
            ok: false,
            exit_status,
            combined_output: output.into(),
        }
    }
}

/// The backend itself failed, as opposed to the artifact.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The execution backend cannot be reached at all. Fatal for the run.
    #[error("sandbox backend unavailable: {0}")]
    Unavailable(String),
}

/// Isolated execution backend.
///
/// Implementations map internal container/runtime failures to a failed
/// [`SandboxVerdict`]; only backend unreachability surfaces as
/// [`SandboxError::Unavailable`].
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        artifact: &Artifact,
        timeout: Duration,
    ) -> Result<SandboxVerdict, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_constructors() {
        let pass = SandboxVerdict::passed("ok");
        assert!(pass.ok);
        assert_eq!(pass.exit_status, 0);

        let fail = SandboxVerdict::failed(7, "boom");
        assert!(!fail.ok);
        assert_eq!(fail.exit_status, 7);
        assert_eq!(fail.combined_output, "boom");
    }

    #[test]
    fn unavailable_error_carries_reason() {
        let err = SandboxError::Unavailable("daemon not running".into());
        assert!(err.to_string().contains("daemon not running"));
    }
}
