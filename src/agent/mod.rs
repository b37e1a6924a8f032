//! The agent capability interface.
//!
//! Every pluggable strategy implements [`Agent`]. A concrete agent
//! implements only the capabilities it supports; the default method
//! bodies return `Ok(None)`, the explicit "not applicable" signal; a
//! routine "this agent doesn't do X" is never an error.
//!
//! Contract notes:
//! - Calls never mutate the input artifact; transformations return a new
//!   [`Artifact`].
//! - Callers bound every capability call with a timeout (see the pipeline
//!   stage runner); implementations may simulate latency but must not
//!   assume they run to completion.
//! - Randomized behavior (hallucination or failure probabilities) is local
//!   to the agent instance and seeded at construction, so test suites can
//!   force deterministic paths.

pub mod mock;
pub mod roster;

use anyhow::Result;
use async_trait::async_trait;

use crate::artifact::Artifact;
use crate::report::IssueReport;

pub use roster::Roster;

/// A named, stateless-per-call strategy exposing some subset of the
/// capability set. Object-safe; implementations must be `Send + Sync` for
/// use behind `Arc<dyn Agent>`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Identity of this agent, used as a foreign key in the ledger.
    fn name(&self) -> &str;

    /// Produce a fresh artifact from a prompt. `Ok(None)` means no
    /// artifact could be produced: fatal for initial generation,
    /// recoverable for feature injection.
    async fn generate(&self, _prompt: &str) -> Result<Option<Artifact>> {
        Ok(None)
    }

    /// Inspect the artifact for issues, reported as raw text with one
    /// finding per line. `Ok(None)` means not applicable; empty text means
    /// "no issues", which is a meaningful success.
    async fn detect_issues(&self, _artifact: &Artifact) -> Result<Option<String>> {
        Ok(None)
    }

    /// Apply fixes for the given report, returning a (possibly unchanged)
    /// artifact. `Ok(None)` means the fixer produced nothing at all,
    /// the one fatal outcome of this capability.
    async fn apply_fix(&self, _artifact: &Artifact, _report: &IssueReport) -> Result<Option<Artifact>> {
        Ok(None)
    }

    /// Suggest refactorings as free text. Advisory only.
    async fn refactor(&self, _artifact: &Artifact) -> Result<Option<String>> {
        Ok(None)
    }

    /// Report performance concerns as free text.
    async fn check_performance(&self, _artifact: &Artifact) -> Result<Option<String>> {
        Ok(None)
    }

    /// Report documentation gaps as free text.
    async fn check_documentation(&self, _artifact: &Artifact) -> Result<Option<String>> {
        Ok(None)
    }
}
