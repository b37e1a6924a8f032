//! The iteration loop.
//!
//! One [`Orchestrator`] owns the roster, the rotation state, and the stage
//! runner, and drives the run on a single logical thread of control:
//!
//! ```text
//! Init → Generating → per iteration i:
//!     score → (detect → fix)×N → [performance] → [documentation]
//!     → [refactor] → [feature injection] → sandbox
//! → Done | fatal failure
//! ```
//!
//! Fatal conditions (no initial artifact, a fix call returning nothing,
//! sandbox backend unavailable, an empty detector pool) unwind out of
//! [`Orchestrator::run`] as [`RunError`]; everything already written to
//! the ledger stays written. Recoverable conditions are recorded as stage
//! outcomes and the loop keeps going with the last committed artifact.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::agent::Roster;
use crate::artifact::Artifact;
use crate::config::CrucibleConfig;
use crate::errors::RunError;
use crate::ledger::Ledger;
use crate::report::Severity;
use crate::rotation::RotationState;
use crate::sandbox::{Sandbox, SandboxError};
use crate::scoring::ScoreSet;
use crate::stage::{StageOutcome, StageRunner};

/// Result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    /// The last committed artifact.
    pub artifact: Artifact,
    /// Iterations fully executed.
    pub iterations: u32,
}

pub struct Orchestrator<S> {
    config: CrucibleConfig,
    roster: Roster,
    rotation: RotationState,
    stages: StageRunner,
    sandbox: S,
}

/// Mirror a log line into the ledger, the way every run-visible event is
/// kept for offline reporting.
async fn note_info(ledger: &Ledger, message: String) {
    tracing::info!("{message}");
    ledger.log("INFO", message).await;
}

async fn note_warn(ledger: &Ledger, message: String) {
    tracing::warn!("{message}");
    ledger.log("WARN", message).await;
}

async fn note_error(ledger: &Ledger, message: String) {
    tracing::error!("{message}");
    ledger.log("ERROR", message).await;
}

impl<S: Sandbox> Orchestrator<S> {
    pub fn new(config: CrucibleConfig, roster: Roster, sandbox: S) -> Self {
        let rotation = RotationState::new(config.run.rotation, config.agents.seed);
        let stages = StageRunner::new(config.run.call_timeout(), config.agents.seed);
        Self {
            config,
            roster,
            rotation,
            stages,
            sandbox,
        }
    }

    /// Execute a full run: generate the initial artifact, then drive
    /// `iteration_limit` iterations against the ledger and the sandbox.
    pub async fn run(
        &mut self,
        ledger: &Ledger,
        initial_prompt: &str,
        feature_request: Option<&str>,
    ) -> Result<RunOutcome, RunError> {
        ledger.config_snapshot(self.config.snapshot()).await;
        ledger.register_agents(self.roster.registry()).await;

        let call_timeout = self.config.run.call_timeout();
        let mut artifact = match self
            .generate(call_timeout, initial_prompt)
            .await
        {
            Some(artifact) => artifact,
            None => {
                note_error(ledger, "Initial code generation failed.".to_string()).await;
                return Err(RunError::GenerationFailed);
            }
        };

        let iteration_limit = self.config.run.iteration_limit;
        for iteration in 1..=iteration_limit {
            info!(iteration, "--- iteration start ---");

            // 1. Score the artifact before anything mutates it this
            //    iteration.
            let scores = ScoreSet::measure(&artifact, &self.config.scoring);
            ledger.version(iteration, &artifact, scores.clone()).await;
            note_info(
                ledger,
                format!(
                    "Iteration {iteration}: quality {:.2}, complexity {:.2}, volume {:.2}",
                    scores.quality, scores.complexity, scores.volume
                ),
            )
            .await;

            // 2. Detection/fix sub-rounds through the rotation policy.
            for round in 1..=self.config.run.bug_checks_per_iteration {
                artifact = self
                    .bug_check_round(ledger, iteration, round, artifact)
                    .await?;
            }

            // 3./4. Coarse two-valued stage scores, amending this
            //       iteration's version record as they arrive.
            let mut scores = scores;
            if self.config.run.enable_performance_check {
                let outcome = self
                    .stages
                    .performance(self.roster.performance.as_ref(), &artifact)
                    .await;
                if outcome.succeeded {
                    let score = if outcome.has_advisory_issues() {
                        self.config.scoring.performance_flagged_score
                    } else {
                        self.config.scoring.performance_pass_score
                    };
                    scores = scores.with_performance(score);
                    ledger.version(iteration, &artifact, scores.clone()).await;
                    note_info(ledger, format!("Performance score: {score:.2}")).await;
                } else {
                    note_warn(ledger, "Performance check did not complete.".to_string()).await;
                }
                ledger.outcome(iteration, outcome).await;
            }

            if self.config.run.enable_documentation_check {
                let outcome = self
                    .stages
                    .documentation(self.roster.documentation.as_ref(), &artifact)
                    .await;
                if outcome.succeeded {
                    let score = if outcome.has_advisory_issues() {
                        self.config.scoring.documentation_flagged_score
                    } else {
                        self.config.scoring.documentation_pass_score
                    };
                    scores = scores.with_documentation(score);
                    ledger.version(iteration, &artifact, scores.clone()).await;
                    note_info(ledger, format!("Documentation score: {score:.2}")).await;
                } else {
                    note_warn(ledger, "Documentation check did not complete.".to_string()).await;
                }
                ledger.outcome(iteration, outcome).await;
            }

            // 5. Refactor suggestions: advisory, never touch the artifact.
            if self.config.run.enable_refactor {
                let outcome = self
                    .stages
                    .refactor(self.roster.refactorer.as_ref(), &artifact)
                    .await;
                if outcome.has_advisory_issues() {
                    note_info(ledger, "Refactoring suggestions recorded.".to_string()).await;
                }
                ledger.outcome(iteration, outcome).await;
            }

            // 6. Scheduled feature injection; failure is non-fatal.
            if iteration == self.config.run.feature_injection_iteration {
                if let Some(feature) = feature_request {
                    note_info(ledger, "Injecting feature request.".to_string()).await;
                    match self.generate(call_timeout, feature).await {
                        Some(with_feature) => artifact = with_feature,
                        None => {
                            note_warn(
                                ledger,
                                "Feature injection produced no artifact; continuing.".to_string(),
                            )
                            .await;
                        }
                    }
                }
            }

            // 7. Sandbox hand-off. The verdict is advisory; only a
            //    missing backend stops the run.
            match self
                .sandbox
                .execute(&artifact, self.config.sandbox.timeout())
                .await
            {
                Ok(verdict) => {
                    if !verdict.ok {
                        note_info(
                            ledger,
                            format!(
                                "Sandbox reported exit status {} for iteration {iteration}.",
                                verdict.exit_status
                            ),
                        )
                        .await;
                    }
                    ledger
                        .outcome(iteration, StageOutcome::sandbox(self.sandbox.name(), verdict))
                        .await;
                }
                Err(SandboxError::Unavailable(reason)) => {
                    note_error(ledger, format!("Sandbox backend unavailable: {reason}")).await;
                    return Err(RunError::SandboxUnavailable { reason });
                }
            }
        }

        note_info(ledger, "Run complete.".to_string()).await;
        Ok(RunOutcome {
            artifact,
            iterations: iteration_limit,
        })
    }

    /// One detection/fix sub-round. Returns the artifact to continue
    /// with, or the fatal fix error.
    async fn bug_check_round(
        &mut self,
        ledger: &Ledger,
        iteration: u32,
        round: u32,
        artifact: Artifact,
    ) -> Result<Artifact, RunError> {
        let index = self.rotation.select_next(self.roster.detectors.len())?;
        let detector = Arc::clone(&self.roster.detectors[index]);
        info!(
            iteration,
            round,
            detector = detector.name(),
            "running bug check"
        );

        let outcome = self.stages.detect(detector.as_ref(), &artifact).await;
        let report = outcome.report().cloned();
        ledger.outcome(iteration, outcome).await;

        // Zero findings (or a failed detection) never trigger a fix call.
        let Some(report) = report.filter(|report| !report.is_empty()) else {
            return Ok(artifact);
        };

        let severity = report.dominant_severity().unwrap_or(Severity::Unknown);
        note_info(
            ledger,
            format!(
                "Iteration {iteration} round {round}: {} finding(s) from {} (dominant {severity})",
                report.len(),
                detector.name()
            ),
        )
        .await;
        ledger
            .issues(
                iteration,
                round,
                detector.name(),
                severity,
                report.to_string(),
            )
            .await;

        let (fix_outcome, fixed) = self
            .stages
            .fix(self.roster.fixer.as_ref(), &artifact, &report)
            .await;
        let fix_succeeded = fix_outcome.succeeded;
        ledger.outcome(iteration, fix_outcome).await;

        match fixed {
            Some(fixed) => {
                if !fix_succeeded {
                    note_warn(
                        ledger,
                        format!("Fix left the artifact unchanged at iteration {iteration} round {round}."),
                    )
                    .await;
                }
                Ok(fixed)
            }
            None => {
                note_error(ledger, "Bug fixing failed. Stopping.".to_string()).await;
                Err(RunError::FixFailed { iteration, round })
            }
        }
    }

    /// Bounded generation call; `None` covers "no artifact", errors, and
    /// timeouts alike. Fatality is the caller's decision.
    async fn generate(&self, call_timeout: Duration, prompt: &str) -> Option<Artifact> {
        match tokio::time::timeout(call_timeout, self.roster.generator.generate(prompt)).await {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(error)) => {
                tracing::warn!(%error, "generation call failed");
                None
            }
            Err(_) => {
                tracing::warn!("generation call exceeded its timeout");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::agent::Agent;
    use crate::config::AgentsSection;
    use crate::ledger::MemoryStore;
    use crate::report::IssueReport;
    use crate::sandbox::SandboxVerdict;

    struct CleanDetector;

    #[async_trait]
    impl Agent for CleanDetector {
        fn name(&self) -> &str {
            "clean-detector"
        }
        async fn detect_issues(&self, _artifact: &Artifact) -> Result<Option<String>> {
            Ok(Some(String::new()))
        }
    }

    struct StaticGenerator;

    #[async_trait]
    impl Agent for StaticGenerator {
        fn name(&self) -> &str {
            "static-generator"
        }
        async fn generate(&self, _prompt: &str) -> Result<Option<Artifact>> {
            Ok(Some(Artifact::new("x = 1")))
        }
    }

    /// Fixer that must never run: apply_fix returning `None` is fatal, so
    /// a passing run proves no fix call happened.
    struct TrapFixer;

    #[async_trait]
    impl Agent for TrapFixer {
        fn name(&self) -> &str {
            "trap-fixer"
        }
    }

    struct NoopGenerator;

    #[async_trait]
    impl Agent for NoopGenerator {
        fn name(&self) -> &str {
            "noop-generator"
        }
    }

    struct OkSandbox;

    #[async_trait]
    impl Sandbox for OkSandbox {
        fn name(&self) -> &str {
            "stub"
        }
        async fn execute(
            &self,
            _artifact: &Artifact,
            _timeout: Duration,
        ) -> std::result::Result<SandboxVerdict, SandboxError> {
            Ok(SandboxVerdict::passed(""))
        }
    }

    fn quiet_config() -> CrucibleConfig {
        let mut config = CrucibleConfig::default();
        config.run.iteration_limit = 2;
        config.run.bug_checks_per_iteration = 1;
        config.run.enable_performance_check = false;
        config.run.enable_documentation_check = false;
        config.run.enable_refactor = false;
        config.agents = AgentsSection {
            latency_ms: 0,
            seed: Some(0),
            ..Default::default()
        };
        config
    }

    fn roster_with(generator: Arc<dyn Agent>, detector: Arc<dyn Agent>) -> Roster {
        Roster {
            generator,
            detectors: vec![detector],
            fixer: Arc::new(TrapFixer),
            refactorer: Arc::new(TrapFixer),
            performance: Arc::new(TrapFixer),
            documentation: Arc::new(TrapFixer),
        }
    }

    #[tokio::test]
    async fn zero_findings_never_trigger_a_fix_call() {
        let roster = roster_with(Arc::new(StaticGenerator), Arc::new(CleanDetector));
        let mut orchestrator = Orchestrator::new(quiet_config(), roster, OkSandbox);
        let (ledger, writer) = Ledger::spawn(Box::new(MemoryStore::default()));

        // TrapFixer would abort the run if a fix were attempted.
        let outcome = orchestrator.run(&ledger, "prompt", None).await.unwrap();
        writer.shutdown(ledger).await;
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.artifact, Artifact::new("x = 1"));
    }

    #[tokio::test]
    async fn generation_failure_runs_no_iterations() {
        let store = MemoryStore::default();
        let records = store.records();
        let roster = roster_with(Arc::new(NoopGenerator), Arc::new(CleanDetector));
        let mut orchestrator = Orchestrator::new(quiet_config(), roster, OkSandbox);
        let (ledger, writer) = Ledger::spawn(Box::new(store));

        let result = orchestrator.run(&ledger, "prompt", None).await;
        writer.shutdown(ledger).await;

        assert!(matches!(result, Err(RunError::GenerationFailed)));
        let records = records.lock().unwrap();
        assert!(
            !records
                .iter()
                .any(|r| matches!(r, crate::ledger::LedgerRecord::Version { .. })),
            "no version record may exist when generation fails"
        );
    }
}
