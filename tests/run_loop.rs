//! End-to-end iteration-loop scenarios.
//!
//! These drive the orchestrator with scripted agents, a stub sandbox, and
//! the in-memory ledger store: zero latency, seeded randomness, no Docker.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crucible::agent::mock::PatchFixer;
use crucible::agent::{Agent, Roster};
use crucible::artifact::Artifact;
use crucible::config::{AgentsSection, CrucibleConfig, RotationStrategy};
use crucible::errors::{EXIT_FAILURE, EXIT_SANDBOX_UNAVAILABLE, RunError};
use crucible::ledger::{Ledger, LedgerRecord, MemoryStore};
use crucible::orchestrator::Orchestrator;
use crucible::report::Severity;
use crucible::sandbox::{Sandbox, SandboxError, SandboxVerdict};
use crucible::stage::{Stage, StagePayload};

// ── Test doubles ──────────────────────────────────────────────────────

/// Generator with one artifact per prompt keyword.
struct KeyedGenerator;

#[async_trait]
impl Agent for KeyedGenerator {
    fn name(&self) -> &str {
        "keyed-generator"
    }

    async fn generate(&self, prompt: &str) -> Result<Option<Artifact>> {
        if prompt.contains("nothing") {
            Ok(None)
        } else if prompt.contains("feature") {
            Ok(Some(Artifact::new("base()\nextra_feature()")))
        } else {
            Ok(Some(Artifact::new("base()")))
        }
    }
}

/// Detector that always reports the same raw findings.
struct ScriptedDetector {
    name: &'static str,
    raw: &'static str,
}

#[async_trait]
impl Agent for ScriptedDetector {
    fn name(&self) -> &str {
        self.name
    }

    async fn detect_issues(&self, _artifact: &Artifact) -> Result<Option<String>> {
        Ok(Some(self.raw.to_string()))
    }
}

/// Fixer that appends one line per invocation.
struct AppendingFixer;

#[async_trait]
impl Agent for AppendingFixer {
    fn name(&self) -> &str {
        "appending-fixer"
    }

    async fn apply_fix(
        &self,
        artifact: &Artifact,
        _report: &crucible::report::IssueReport,
    ) -> Result<Option<Artifact>> {
        Ok(Some(Artifact::new(format!("{}\npatched()", artifact.as_str()))))
    }
}

/// Fixer that produces nothing at all: the fatal case.
struct AbsentFixer;

#[async_trait]
impl Agent for AbsentFixer {
    fn name(&self) -> &str {
        "absent-fixer"
    }

    async fn apply_fix(
        &self,
        _artifact: &Artifact,
        _report: &crucible::report::IssueReport,
    ) -> Result<Option<Artifact>> {
        Ok(None)
    }
}

/// Unused roles default to "not applicable" for every capability.
struct Bystander;

#[async_trait]
impl Agent for Bystander {
    fn name(&self) -> &str {
        "bystander"
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
    ) -> Result<SandboxVerdict, SandboxError> {
        Ok(SandboxVerdict::passed("ran fine"))
    }
}

/// Sandbox that works for N calls, then reports the backend gone.
struct FlakyBackend {
    healthy_calls: u32,
    calls: AtomicU32,
}

impl FlakyBackend {
    fn new(healthy_calls: u32) -> Self {
        Self {
            healthy_calls,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Sandbox for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn execute(
        &self,
        _artifact: &Artifact,
        _timeout: Duration,
    ) -> Result<SandboxVerdict, SandboxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.healthy_calls {
            Ok(SandboxVerdict::passed(""))
        } else {
            Err(SandboxError::Unavailable("daemon went away".to_string()))
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────

fn test_config() -> CrucibleConfig {
    let mut config = CrucibleConfig::default();
    config.run.iteration_limit = 1;
    config.run.bug_checks_per_iteration = 1;
    config.run.feature_injection_iteration = 0;
    config.run.enable_performance_check = false;
    config.run.enable_documentation_check = false;
    config.run.enable_refactor = false;
    config.agents = AgentsSection {
        latency_ms: 0,
        seed: Some(7),
        ..Default::default()
    };
    config
}

fn quiet_roster(detectors: Vec<Arc<dyn Agent>>, fixer: Arc<dyn Agent>) -> Roster {
    Roster {
        generator: Arc::new(KeyedGenerator),
        detectors,
        fixer,
        refactorer: Arc::new(Bystander),
        performance: Arc::new(Bystander),
        documentation: Arc::new(Bystander),
    }
}

async fn run_to_records<S: Sandbox>(
    config: CrucibleConfig,
    roster: Roster,
    sandbox: S,
    prompt: &str,
    feature: Option<&str>,
) -> (Result<crucible::RunOutcome, RunError>, Vec<LedgerRecord>) {
    let store = MemoryStore::default();
    let records = store.records();
    let (ledger, writer) = Ledger::spawn(Box::new(store));
    let mut orchestrator = Orchestrator::new(config, roster, sandbox);
    let result = orchestrator.run(&ledger, prompt, feature).await;
    writer.shutdown(ledger).await;
    let records = records.lock().unwrap().clone();
    (result, records)
}

fn failed_outcomes(records: &[LedgerRecord]) -> Vec<&crucible::stage::StageOutcome> {
    records
        .iter()
        .filter_map(|record| match record {
            LedgerRecord::Outcome { outcome, .. } if !outcome.succeeded => Some(outcome),
            _ => None,
        })
        .collect()
}

// ── Scenarios ─────────────────────────────────────────────────────────

mod forced_fix_failure {
    use super::*;

    /// Spec scenario: a detector that always finds one Major issue, and a
    /// fixer with failure probability forced to 1. The run completes
    /// non-fatally, the artifact is unchanged, and exactly one stage
    /// outcome is recorded as failed.
    #[tokio::test]
    async fn run_completes_with_unchanged_artifact() {
        let detector = Arc::new(ScriptedDetector {
            name: "major-detector",
            raw: "Line 1: Hard-coded credential. Severity: Major",
        });
        let fixer = Arc::new(PatchFixer::new(Duration::ZERO, 1.0, Some(3)));
        let roster = quiet_roster(vec![detector], fixer);

        let (result, records) =
            run_to_records(test_config(), roster, OkSandbox, "base prompt", None).await;

        let outcome = result.unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.artifact, Artifact::new("base()"));

        let failed = failed_outcomes(&records);
        assert_eq!(failed.len(), 1, "exactly one failed stage outcome");
        assert_eq!(failed[0].stage, Stage::Fix);
        assert_eq!(failed[0].payload, StagePayload::Unchanged);
        assert_eq!(failed[0].severity, Some(Severity::Major));
    }

    #[tokio::test]
    async fn issue_report_is_persisted_with_dominant_severity() {
        let detector = Arc::new(ScriptedDetector {
            name: "major-detector",
            raw: "Line 1: note. Severity: Info\nLine 2: broken. Severity: Major",
        });
        let fixer = Arc::new(PatchFixer::new(Duration::ZERO, 1.0, Some(3)));
        let roster = quiet_roster(vec![detector], fixer);

        let (result, records) =
            run_to_records(test_config(), roster, OkSandbox, "base prompt", None).await;
        result.unwrap();

        let issues: Vec<_> = records
            .iter()
            .filter_map(|record| match record {
                LedgerRecord::Issues {
                    iteration,
                    round,
                    agent,
                    severity,
                    ..
                } => Some((*iteration, *round, agent.clone(), *severity)),
                _ => None,
            })
            .collect();
        assert_eq!(
            issues,
            vec![(1, 1, "major-detector".to_string(), Severity::Major)]
        );
    }
}

mod fatal_fix_failure {
    use super::*;

    #[tokio::test]
    async fn fixer_returning_nothing_aborts_with_exit_one() {
        let detector = Arc::new(ScriptedDetector {
            name: "major-detector",
            raw: "Line 1: broken. Severity: Major",
        });
        let roster = quiet_roster(vec![detector], Arc::new(AbsentFixer));

        let (result, records) =
            run_to_records(test_config(), roster, OkSandbox, "base prompt", None).await;

        let error = result.unwrap_err();
        assert!(matches!(
            error,
            RunError::FixFailed {
                iteration: 1,
                round: 1
            }
        ));
        assert_eq!(error.exit_status(), EXIT_FAILURE);

        // Ledger writes made before the abort survive.
        assert!(records
            .iter()
            .any(|r| matches!(r, LedgerRecord::Version { iteration: 1, .. })));
        assert!(records
            .iter()
            .any(|r| matches!(r, LedgerRecord::Issues { .. })));
    }
}

mod generation_failure {
    use super::*;

    #[tokio::test]
    async fn no_artifact_means_exit_one_and_no_iterations() {
        let roster = quiet_roster(
            vec![Arc::new(ScriptedDetector {
                name: "unused",
                raw: "",
            })],
            Arc::new(Bystander),
        );
        let (result, records) = run_to_records(
            test_config(),
            roster,
            OkSandbox,
            "generate nothing please",
            None,
        )
        .await;

        let error = result.unwrap_err();
        assert!(matches!(error, RunError::GenerationFailed));
        assert_eq!(error.exit_status(), EXIT_FAILURE);
        assert!(
            !records
                .iter()
                .any(|r| matches!(r, LedgerRecord::Version { .. })),
            "no iteration may run when generation fails"
        );
    }
}

mod sandbox_unavailable {
    use super::*;

    #[tokio::test]
    async fn backend_loss_halts_run_and_keeps_prior_records() {
        let detector = Arc::new(ScriptedDetector {
            name: "quiet",
            raw: "",
        });
        let roster = quiet_roster(vec![detector], Arc::new(Bystander));
        let mut config = test_config();
        config.run.iteration_limit = 3;

        // Healthy for iteration 1, gone at iteration 2.
        let (result, records) = run_to_records(
            config,
            roster,
            FlakyBackend::new(1),
            "base prompt",
            None,
        )
        .await;

        let error = result.unwrap_err();
        assert!(matches!(error, RunError::SandboxUnavailable { .. }));
        assert_eq!(error.exit_status(), EXIT_SANDBOX_UNAVAILABLE);

        // Iterations 1 and 2 both left version records; iteration 3 never
        // started.
        let versions: Vec<u32> = records
            .iter()
            .filter_map(|record| match record {
                LedgerRecord::Version { iteration, .. } => Some(*iteration),
                _ => None,
            })
            .collect();
        assert_eq!(versions, vec![1, 2]);

        // The healthy iteration's sandbox verdict is persisted.
        let sandbox_outcomes = records
            .iter()
            .filter(|record| {
                matches!(
                    record,
                    LedgerRecord::Outcome { outcome, .. } if outcome.stage == Stage::Sandbox
                )
            })
            .count();
        assert_eq!(sandbox_outcomes, 1);
    }
}

mod rotation_sequences {
    use super::*;

    fn bug_check_agents(records: &[LedgerRecord]) -> Vec<String> {
        records
            .iter()
            .filter_map(|record| match record {
                LedgerRecord::Outcome { outcome, .. } if outcome.stage == Stage::BugCheck => {
                    Some(outcome.agent.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn round_robin_starts_at_the_second_detector() {
        let d1: Arc<dyn Agent> = Arc::new(ScriptedDetector { name: "d1", raw: "" });
        let d2: Arc<dyn Agent> = Arc::new(ScriptedDetector { name: "d2", raw: "" });
        let roster = quiet_roster(vec![d1, d2], Arc::new(Bystander));

        let mut config = test_config();
        config.run.rotation = RotationStrategy::RoundRobin;
        config.run.bug_checks_per_iteration = 3;

        let (result, records) =
            run_to_records(config, roster, OkSandbox, "base prompt", None).await;
        result.unwrap();

        assert_eq!(bug_check_agents(&records), vec!["d2", "d1", "d2"]);
    }

    #[tokio::test]
    async fn fixed_strategy_always_uses_the_first_detector() {
        let d1: Arc<dyn Agent> = Arc::new(ScriptedDetector { name: "d1", raw: "" });
        let d2: Arc<dyn Agent> = Arc::new(ScriptedDetector { name: "d2", raw: "" });
        let roster = quiet_roster(vec![d1, d2], Arc::new(Bystander));

        let mut config = test_config();
        config.run.bug_checks_per_iteration = 4;

        let (result, records) =
            run_to_records(config, roster, OkSandbox, "base prompt", None).await;
        result.unwrap();

        assert_eq!(bug_check_agents(&records), vec!["d1"; 4]);
    }

    #[tokio::test]
    async fn rotation_cursor_persists_across_iterations() {
        let d1: Arc<dyn Agent> = Arc::new(ScriptedDetector { name: "d1", raw: "" });
        let d2: Arc<dyn Agent> = Arc::new(ScriptedDetector { name: "d2", raw: "" });
        let d3: Arc<dyn Agent> = Arc::new(ScriptedDetector { name: "d3", raw: "" });
        let roster = quiet_roster(vec![d1, d2, d3], Arc::new(Bystander));

        let mut config = test_config();
        config.run.rotation = RotationStrategy::RoundRobin;
        config.run.iteration_limit = 2;
        config.run.bug_checks_per_iteration = 2;

        let (result, records) =
            run_to_records(config, roster, OkSandbox, "base prompt", None).await;
        result.unwrap();

        // One continuous cycle across both iterations, starting at d2.
        assert_eq!(bug_check_agents(&records), vec!["d2", "d3", "d1", "d2"]);
    }
}

mod feature_injection {
    use super::*;

    #[tokio::test]
    async fn feature_request_replaces_artifact_at_configured_iteration() {
        let detector = Arc::new(ScriptedDetector {
            name: "quiet",
            raw: "",
        });
        let roster = quiet_roster(vec![detector], Arc::new(Bystander));
        let mut config = test_config();
        config.run.iteration_limit = 2;
        config.run.feature_injection_iteration = 2;

        let (result, _) = run_to_records(
            config,
            roster,
            OkSandbox,
            "base prompt",
            Some("add the feature"),
        )
        .await;

        let outcome = result.unwrap();
        assert_eq!(
            outcome.artifact,
            Artifact::new("base()\nextra_feature()")
        );
    }

    #[tokio::test]
    async fn failed_feature_injection_is_non_fatal() {
        let detector = Arc::new(ScriptedDetector {
            name: "quiet",
            raw: "",
        });
        let roster = quiet_roster(vec![detector], Arc::new(Bystander));
        let mut config = test_config();
        config.run.iteration_limit = 2;
        config.run.feature_injection_iteration = 2;

        let (result, _) = run_to_records(
            config,
            roster,
            OkSandbox,
            "base prompt",
            Some("generate nothing for this feature"),
        )
        .await;

        let outcome = result.unwrap();
        assert_eq!(outcome.artifact, Artifact::new("base()"));
    }

    #[tokio::test]
    async fn no_feature_request_means_no_injection() {
        let detector = Arc::new(ScriptedDetector {
            name: "quiet",
            raw: "",
        });
        let roster = quiet_roster(vec![detector], Arc::new(Bystander));
        let mut config = test_config();
        config.run.iteration_limit = 2;
        config.run.feature_injection_iteration = 2;

        let (result, _) = run_to_records(config, roster, OkSandbox, "base prompt", None).await;
        assert_eq!(result.unwrap().artifact, Artifact::new("base()"));
    }
}

mod full_mock_roster {
    use super::*;

    /// Whole-system happy path: the real mock roster with zero latency,
    /// zero randomness, and a stub sandbox.
    #[tokio::test]
    async fn add_two_numbers_run_succeeds_and_records_everything() {
        let mut config = CrucibleConfig::default();
        config.run.iteration_limit = 3;
        config.run.feature_injection_iteration = 0;
        config.agents = AgentsSection {
            latency_ms: 0,
            hallucination_rate: 0.0,
            fix_failure_rate: 0.0,
            seed: Some(99),
            ..Default::default()
        };
        let roster = Roster::from_config(&config.agents).unwrap();

        let store = MemoryStore::default();
        let records_handle = store.records();
        let (ledger, writer) = Ledger::spawn(Box::new(store));
        let mut orchestrator = Orchestrator::new(config, roster, OkSandbox);
        let result = orchestrator
            .run(&ledger, "please add two numbers", None)
            .await;
        writer.shutdown(ledger).await;
        let records = records_handle.lock().unwrap();

        let outcome = result.unwrap();
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.artifact.as_str().contains("def add(x, y):"));

        // Config snapshot and agent registry are persisted up front.
        assert!(records
            .iter()
            .any(|r| matches!(r, LedgerRecord::Config { key, .. } if key == "run.iteration_limit")));
        assert!(records
            .iter()
            .any(|r| matches!(r, LedgerRecord::Agent { role, .. } if role == "generation")));

        // Every iteration left at least one version record.
        for iteration in 1..=3u32 {
            assert!(
                records.iter().any(|r| matches!(
                    r,
                    LedgerRecord::Version { iteration: i, .. } if *i == iteration
                )),
                "missing version record for iteration {iteration}"
            );
        }

        // Performance and documentation stages amended the score set.
        assert!(records.iter().any(|r| matches!(
            r,
            LedgerRecord::Version { scores, .. }
                if scores.performance.is_some() && scores.documentation.is_some()
        )));
    }

    /// Two runs with the same seed produce the same final artifact and
    /// the same record sequence shape.
    #[tokio::test]
    async fn seeded_runs_are_reproducible() {
        async fn one_run() -> (String, usize) {
            let mut config = CrucibleConfig::default();
            config.run.iteration_limit = 2;
            config.run.feature_injection_iteration = 0;
            config.run.rotation = RotationStrategy::RoundRobin;
            config.agents = AgentsSection {
                latency_ms: 0,
                hallucination_rate: 0.5,
                fix_failure_rate: 0.5,
                seed: Some(1234),
                ..Default::default()
            };
            let roster = Roster::from_config(&config.agents).unwrap();

            let store = MemoryStore::default();
            let records_handle = store.records();
            let (ledger, writer) = Ledger::spawn(Box::new(store));
            let mut orchestrator = Orchestrator::new(config, roster, OkSandbox);
            let result = orchestrator
                .run(&ledger, "please add two numbers", None)
                .await;
            writer.shutdown(ledger).await;

            let artifact = result.unwrap().artifact.as_str().to_string();
            let count = records_handle.lock().unwrap().len();
            (artifact, count)
        }

        let (artifact_a, count_a) = one_run().await;
        let (artifact_b, count_b) = one_run().await;
        assert_eq!(artifact_a, artifact_b);
        assert_eq!(count_a, count_b);
    }
}

mod cli {
    use assert_cmd::Command;
    use predicates::prelude::*;

    #[test]
    fn help_mentions_the_surface() {
        Command::cargo_bin("crucible")
            .unwrap()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("--feature-request"))
            .stdout(predicate::str::contains("--ledger-path"));
    }

    #[test]
    fn version_flag_works() {
        Command::cargo_bin("crucible")
            .unwrap()
            .arg("--version")
            .assert()
            .success();
    }

    #[test]
    fn missing_prompt_is_a_usage_error() {
        Command::cargo_bin("crucible").unwrap().assert().failure();
    }
}
