//! Pipeline stage runner.
//!
//! Runs one labeled stage against one agent: applies the per-call timeout,
//! normalizes the agent's raw output, classifies severity, and reports a
//! [`StageOutcome`]. Recoverable problems (timeouts, agent errors, a fixer
//! that gives up) are absorbed here as `succeeded = false` outcomes; the
//! only condition escalated to the orchestrator is a fix call returning no
//! artifact at all, signaled by the `None` artifact slot of
//! [`StageRunner::fix`].

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::Agent;
use crate::artifact::Artifact;
use crate::report::{IssueReport, Severity};
use crate::sandbox::SandboxVerdict;

/// Pipeline stage labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BugCheck,
    Fix,
    Performance,
    Documentation,
    Refactor,
    Sandbox,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BugCheck => "bug_check",
            Stage::Fix => "fix",
            Stage::Performance => "performance",
            Stage::Documentation => "documentation",
            Stage::Refactor => "refactor",
            Stage::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized output of one stage execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum StagePayload {
    /// Nothing to report (clean pass, or a failed call that produced
    /// nothing).
    Empty,
    /// Findings from a detection stage. An empty report is a meaningful
    /// "no issues" value.
    Report(IssueReport),
    /// Free-text output from an advisory stage.
    Text(String),
    /// The fixer handed back the input artifact unchanged.
    Unchanged,
    /// Verdict from the sandbox boundary.
    Verdict(SandboxVerdict),
}

/// Record of one stage execution. Written once, never amended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub agent: String,
    pub succeeded: bool,
    pub payload: StagePayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl StageOutcome {
    pub fn sandbox(backend: &str, verdict: SandboxVerdict) -> Self {
        Self {
            stage: Stage::Sandbox,
            agent: backend.to_string(),
            // The verdict reflects the artifact; reaching the backend at
            // all counts as stage success.
            succeeded: true,
            payload: StagePayload::Verdict(verdict),
            severity: None,
        }
    }

    /// Findings carried by this outcome, if it was a detection stage.
    pub fn report(&self) -> Option<&IssueReport> {
        match &self.payload {
            StagePayload::Report(report) => Some(report),
            _ => None,
        }
    }

    /// Whether an advisory stage reported any issue text.
    pub fn has_advisory_issues(&self) -> bool {
        matches!(&self.payload, StagePayload::Text(text) if !text.trim().is_empty())
    }
}

/// Executes stages with a shared per-call timeout and the run's one
/// sanctioned source of non-determinism: the fix-order shuffle RNG.
pub struct StageRunner {
    call_timeout: Duration,
    shuffle_rng: StdRng,
}

impl StageRunner {
    /// `shuffle_seed` pins the fix-application order for reproducible
    /// runs; `None` seeds from entropy.
    pub fn new(call_timeout: Duration, shuffle_seed: Option<u64>) -> Self {
        let shuffle_rng = match shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            call_timeout,
            shuffle_rng,
        }
    }

    /// Run a detection stage. Empty or not-applicable output is a success
    /// carrying the empty report; raw text is split into findings with
    /// severity classified per finding.
    pub async fn detect(&self, agent: &dyn Agent, artifact: &Artifact) -> StageOutcome {
        let call = tokio::time::timeout(self.call_timeout, agent.detect_issues(artifact)).await;
        let raw = match Self::unwrap_call(Stage::BugCheck, agent.name(), call) {
            Ok(raw) => raw,
            Err(()) => {
                return StageOutcome {
                    stage: Stage::BugCheck,
                    agent: agent.name().to_string(),
                    succeeded: false,
                    payload: StagePayload::Empty,
                    severity: None,
                };
            }
        };

        let report = match raw {
            Some(text) => IssueReport::from_raw(&text),
            None => IssueReport::default(),
        };
        let severity = report.dominant_severity();
        StageOutcome {
            stage: Stage::BugCheck,
            agent: agent.name().to_string(),
            succeeded: true,
            payload: StagePayload::Report(report),
            severity,
        }
    }

    /// Run the fix stage for a non-empty report.
    ///
    /// Findings are shuffled before the call to model independent,
    /// non-conflicting patches. Returns the outcome plus the artifact to
    /// continue with; a `None` artifact means the fixer produced nothing
    /// at all, which the orchestrator must treat as fatal.
    pub async fn fix(
        &mut self,
        agent: &dyn Agent,
        artifact: &Artifact,
        report: &IssueReport,
    ) -> (StageOutcome, Option<Artifact>) {
        let mut shuffled = report.clone();
        shuffled.findings.shuffle(&mut self.shuffle_rng);
        let severity = report.dominant_severity();

        let call =
            tokio::time::timeout(self.call_timeout, agent.apply_fix(artifact, &shuffled)).await;
        let fixed = match Self::unwrap_call(Stage::Fix, agent.name(), call) {
            Ok(fixed) => fixed,
            Err(()) => {
                // Recoverable: continue with the artifact we already have.
                let outcome = StageOutcome {
                    stage: Stage::Fix,
                    agent: agent.name().to_string(),
                    succeeded: false,
                    payload: StagePayload::Unchanged,
                    severity,
                };
                return (outcome, Some(artifact.clone()));
            }
        };

        match fixed {
            None => {
                let outcome = StageOutcome {
                    stage: Stage::Fix,
                    agent: agent.name().to_string(),
                    succeeded: false,
                    payload: StagePayload::Empty,
                    severity,
                };
                (outcome, None)
            }
            Some(fixed) if fixed == *artifact => {
                let outcome = StageOutcome {
                    stage: Stage::Fix,
                    agent: agent.name().to_string(),
                    succeeded: false,
                    payload: StagePayload::Unchanged,
                    severity,
                };
                (outcome, Some(fixed))
            }
            Some(fixed) => {
                let outcome = StageOutcome {
                    stage: Stage::Fix,
                    agent: agent.name().to_string(),
                    succeeded: true,
                    payload: StagePayload::Empty,
                    severity,
                };
                (outcome, Some(fixed))
            }
        }
    }

    pub async fn performance(&self, agent: &dyn Agent, artifact: &Artifact) -> StageOutcome {
        let call = tokio::time::timeout(self.call_timeout, agent.check_performance(artifact)).await;
        Self::advisory_outcome(Stage::Performance, agent.name(), call)
    }

    pub async fn documentation(&self, agent: &dyn Agent, artifact: &Artifact) -> StageOutcome {
        let call =
            tokio::time::timeout(self.call_timeout, agent.check_documentation(artifact)).await;
        Self::advisory_outcome(Stage::Documentation, agent.name(), call)
    }

    pub async fn refactor(&self, agent: &dyn Agent, artifact: &Artifact) -> StageOutcome {
        let call = tokio::time::timeout(self.call_timeout, agent.refactor(artifact)).await;
        Self::advisory_outcome(Stage::Refactor, agent.name(), call)
    }

    /// Shared timeout/error normalization: `Err(())` means the stage
    /// failed recoverably and has already been logged.
    fn unwrap_call<T>(
        stage: Stage,
        agent: &str,
        call: Result<Result<T>, tokio::time::error::Elapsed>,
    ) -> Result<T, ()> {
        match call {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => {
                warn!(%stage, agent, %error, "stage call failed");
                Err(())
            }
            Err(_) => {
                warn!(%stage, agent, "stage call exceeded its timeout");
                Err(())
            }
        }
    }

    fn advisory_outcome(
        stage: Stage,
        agent: &str,
        call: Result<Result<Option<String>>, tokio::time::error::Elapsed>,
    ) -> StageOutcome {
        let (succeeded, payload) = match Self::unwrap_call(stage, agent, call) {
            Err(()) => (false, StagePayload::Empty),
            // Absent capability or empty output is a pass with no issues.
            Ok(None) => (true, StagePayload::Empty),
            Ok(Some(text)) if text.trim().is_empty() => (true, StagePayload::Empty),
            Ok(Some(text)) => (true, StagePayload::Text(text)),
        };
        StageOutcome {
            stage,
            agent: agent.to_string(),
            succeeded,
            payload,
            severity: None,
        }
    }
}
