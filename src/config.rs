//! Configuration for a Crucible run.
//!
//! Settings are read from a TOML file with per-field defaults, so a partial
//! (or absent) file always yields a complete configuration:
//!
//! ```toml
//! [run]
//! iteration_limit = 3
//! feature_injection_iteration = 2
//! bug_checks_per_iteration = 2
//! rotation = "round_robin"
//! call_timeout_secs = 5.0
//! enable_performance_check = true
//! enable_documentation_check = true
//! enable_refactor = true
//!
//! [scoring]
//! max_line_length = 80
//! long_line_penalty = 0.5
//! missing_doc_penalty = 2.0
//! missing_comment_penalty = 1.0
//!
//! [agents]
//! detectors = ["style-auditor", "logic-auditor"]
//! hallucination_rate = 0.1
//! fix_failure_rate = 0.05
//! seed = 42
//!
//! [sandbox]
//! image = "python:3.12-slim"
//! timeout_secs = 10
//!
//! [ledger]
//! path = "crucible.db"
//! ```
//!
//! Unknown rotation strategies and unknown agent names are configuration
//! errors, never silent fallbacks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Strategy for selecting the next detection agent from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Always use the first detector in the pool.
    #[default]
    Fixed,
    /// Pick uniformly at random (seedable) on every call.
    Random,
    /// Cycle through the pool, advancing the cursor before each use.
    RoundRobin,
}

impl fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationStrategy::Fixed => write!(f, "fixed"),
            RotationStrategy::Random => write!(f, "random"),
            RotationStrategy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

impl FromStr for RotationStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(RotationStrategy::Fixed),
            "random" => Ok(RotationStrategy::Random),
            "round_robin" => Ok(RotationStrategy::RoundRobin),
            other => Err(ConfigError::InvalidRotationStrategy {
                value: other.to_string(),
            }),
        }
    }
}

/// `[run]`: iteration loop shape and per-call budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Number of iterations to execute.
    #[serde(default = "default_iteration_limit")]
    pub iteration_limit: u32,
    /// Iteration at which the feature request (if any) is injected.
    #[serde(default = "default_feature_injection_iteration")]
    pub feature_injection_iteration: u32,
    /// Detection/fix sub-rounds per iteration.
    #[serde(default = "default_bug_checks_per_iteration")]
    pub bug_checks_per_iteration: u32,
    /// Detector rotation strategy.
    #[serde(default)]
    pub rotation: RotationStrategy,
    /// Budget for a single capability call, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: f64,
    #[serde(default = "default_true")]
    pub enable_performance_check: bool,
    #[serde(default = "default_true")]
    pub enable_documentation_check: bool,
    #[serde(default = "default_true")]
    pub enable_refactor: bool,
}

fn default_iteration_limit() -> u32 {
    3
}

fn default_feature_injection_iteration() -> u32 {
    2
}

fn default_bug_checks_per_iteration() -> u32 {
    2
}

fn default_call_timeout_secs() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            iteration_limit: default_iteration_limit(),
            feature_injection_iteration: default_feature_injection_iteration(),
            bug_checks_per_iteration: default_bug_checks_per_iteration(),
            rotation: RotationStrategy::default(),
            call_timeout_secs: default_call_timeout_secs(),
            enable_performance_check: true,
            enable_documentation_check: true,
            enable_refactor: true,
        }
    }
}

impl RunSection {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.call_timeout_secs.max(0.0))
    }
}

/// `[scoring]`: quality penalties and coarse stage score values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Lines longer than this are penalized.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Penalty per over-length line.
    #[serde(default = "default_long_line_penalty")]
    pub long_line_penalty: f64,
    /// Penalty when the artifact lacks a leading doc comment.
    #[serde(default = "default_missing_doc_penalty")]
    pub missing_doc_penalty: f64,
    /// Penalty when the artifact has no inline comment anywhere.
    #[serde(default = "default_missing_comment_penalty")]
    pub missing_comment_penalty: f64,
    /// Performance score when the check reports no issues.
    #[serde(default = "default_stage_pass_score")]
    pub performance_pass_score: f64,
    /// Performance score when the check reports issues.
    #[serde(default = "default_performance_flagged_score")]
    pub performance_flagged_score: f64,
    /// Documentation score when the check reports no issues.
    #[serde(default = "default_stage_pass_score")]
    pub documentation_pass_score: f64,
    /// Documentation score when the check reports issues.
    #[serde(default = "default_documentation_flagged_score")]
    pub documentation_flagged_score: f64,
}

fn default_max_line_length() -> usize {
    80
}

fn default_long_line_penalty() -> f64 {
    0.5
}

fn default_missing_doc_penalty() -> f64 {
    2.0
}

fn default_missing_comment_penalty() -> f64 {
    1.0
}

fn default_stage_pass_score() -> f64 {
    100.0
}

fn default_performance_flagged_score() -> f64 {
    50.0
}

fn default_documentation_flagged_score() -> f64 {
    70.0
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
            long_line_penalty: default_long_line_penalty(),
            missing_doc_penalty: default_missing_doc_penalty(),
            missing_comment_penalty: default_missing_comment_penalty(),
            performance_pass_score: default_stage_pass_score(),
            performance_flagged_score: default_performance_flagged_score(),
            documentation_pass_score: default_stage_pass_score(),
            documentation_flagged_score: default_documentation_flagged_score(),
        }
    }
}

/// `[agents]`: roster composition and simulated-behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsSection {
    #[serde(default = "default_generator")]
    pub generator: String,
    #[serde(default = "default_detectors")]
    pub detectors: Vec<String>,
    #[serde(default = "default_fixer")]
    pub fixer: String,
    #[serde(default = "default_refactorer")]
    pub refactorer: String,
    #[serde(default = "default_performance")]
    pub performance: String,
    #[serde(default = "default_documentation")]
    pub documentation: String,
    /// Probability that a detector invents a spurious finding.
    #[serde(default = "default_hallucination_rate")]
    pub hallucination_rate: f64,
    /// Probability that the fixer gives up and returns the input unchanged.
    #[serde(default = "default_fix_failure_rate")]
    pub fix_failure_rate: f64,
    /// Simulated per-call latency in milliseconds. Tests set this to zero.
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,
    /// Seed for all agent-local and shuffle randomness. `None` seeds from
    /// entropy; setting it makes a whole run reproducible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_generator() -> String {
    "snippet-generator".to_string()
}

fn default_detectors() -> Vec<String> {
    vec![
        "style-auditor".to_string(),
        "logic-auditor".to_string(),
        "robustness-auditor".to_string(),
    ]
}

fn default_fixer() -> String {
    "patch-fixer".to_string()
}

fn default_refactorer() -> String {
    "refactor-advisor".to_string()
}

fn default_performance() -> String {
    "performance-oracle".to_string()
}

fn default_documentation() -> String {
    "docs-auditor".to_string()
}

fn default_hallucination_rate() -> f64 {
    0.1
}

fn default_fix_failure_rate() -> f64 {
    0.05
}

fn default_latency_ms() -> u64 {
    100
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            generator: default_generator(),
            detectors: default_detectors(),
            fixer: default_fixer(),
            refactorer: default_refactorer(),
            performance: default_performance(),
            documentation: default_documentation(),
            hallucination_rate: default_hallucination_rate(),
            fix_failure_rate: default_fix_failure_rate(),
            latency_ms: default_latency_ms(),
            seed: None,
        }
    }
}

impl AgentsSection {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// `[sandbox]`: execution backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,
    /// Container command. The `{artifact}` placeholder is replaced with the
    /// artifact text, so the default runs it as an inline script.
    #[serde(default = "default_sandbox_command")]
    pub command: Vec<String>,
}

fn default_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_sandbox_timeout_secs() -> u64 {
    10
}

fn default_sandbox_command() -> Vec<String> {
    vec![
        "python3".to_string(),
        "-c".to_string(),
        "{artifact}".to_string(),
    ]
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            image: default_image(),
            timeout_secs: default_sandbox_timeout_secs(),
            command: default_sandbox_command(),
        }
    }
}

impl SandboxSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[ledger]`: persistence destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("crucible.db")
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

/// Complete configuration for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrucibleConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub agents: AgentsSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub ledger: LedgerSection,
}

impl CrucibleConfig {
    /// Load configuration from an optional TOML file.
    ///
    /// `None` yields the documented defaults. A file that exists but fails
    /// to read or parse is an error, never a silent fallback.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Flatten to `section.key = value` pairs for the ledger's config
    /// snapshot. Best-effort: serialization of a default-constructed
    /// config cannot fail.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Ok(toml::Value::Table(sections)) = toml::Value::try_from(self) {
            for (section, value) in sections {
                if let toml::Value::Table(entries) = value {
                    for (key, value) in entries {
                        pairs.push((format!("{section}.{key}"), value.to_string()));
                    }
                }
            }
        }
        pairs
    }
}
