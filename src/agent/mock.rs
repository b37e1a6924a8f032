//! Mock strategy implementations.
//!
//! These agents stand in for real LLM backends: the generator returns
//! canned snippets keyed on prompt keywords, the auditors run cheap
//! textual heuristics, and the fixer applies pattern-based patches. They
//! exist to exercise the orchestration contract, not to be good at
//! software engineering.
//!
//! All randomness (hallucinated findings, simulated fix failures,
//! synthetic performance numbers) comes from a per-instance seeded
//! [`StdRng`], so a seeded run is fully reproducible. Simulated latency is
//! a plain `Duration`; tests construct agents with `Duration::ZERO`.

use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use tracing::warn;

use crate::agent::Agent;
use crate::artifact::Artifact;
use crate::report::IssueReport;

static DEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"def\s+(\w+)\(").expect("valid regex"));
static NAMED_FUNC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Function '(\w+)'").expect("valid regex"));
static BARE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("valid regex"));

async fn pause(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

fn seeded_rng(seed: Option<u64>) -> Mutex<StdRng> {
    Mutex::new(match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    })
}

fn sample(rng: &Mutex<StdRng>) -> Result<f64> {
    let mut rng = rng.lock().map_err(|_| anyhow!("agent RNG lock poisoned"))?;
    Ok(rng.r#gen())
}

fn sample_range(rng: &Mutex<StdRng>, range: std::ops::Range<u64>) -> Result<u64> {
    let mut rng = rng.lock().map_err(|_| anyhow!("agent RNG lock poisoned"))?;
    Ok(rng.gen_range(range))
}

/// Join findings the way detectors report them: one per line, empty
/// string when clean.
fn join_findings(findings: Vec<String>) -> Option<String> {
    Some(findings.join("\n"))
}

// ── Generation ────────────────────────────────────────────────────────

const ADD_SNIPPET: &str = r#"def add(x, y):
    """Adds two numbers."""
    return x + y
"#;

const SUBTRACT_SNIPPET: &str = r#"def subtract(x, y):
    """Subtracts y from x."""
    return x - y
"#;

const CIRCLE_AREA_SNIPPET: &str = r#"import math

def circle_area(radius):
    """Calculates the area of a circle."""
    return math.pi * radius * radius
"#;

const READ_FILE_SNIPPET: &str = r#"def read_first_line(filepath):
    """Reads the first line of a file."""
    try:
        with open(filepath, 'r') as f:
            return f.readline().strip()
    except FileNotFoundError:
        return "File not found."
"#;

const HELLO_WORLD_SNIPPET: &str = r#"def hello_world():
    """Prints hello world"""
    print('Hello, world!')
"#;

/// Prompt-keyed snippet generator.
pub struct SnippetGenerator {
    latency: Duration,
}

impl SnippetGenerator {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Agent for SnippetGenerator {
    fn name(&self) -> &str {
        "snippet-generator"
    }

    async fn generate(&self, prompt: &str) -> Result<Option<Artifact>> {
        pause(self.latency).await;
        let snippet = if prompt.contains("add two numbers") {
            ADD_SNIPPET
        } else if prompt.contains("subtract") {
            SUBTRACT_SNIPPET
        } else if prompt.contains("calculate area of circle") {
            CIRCLE_AREA_SNIPPET
        } else if prompt.contains("read file") {
            READ_FILE_SNIPPET
        } else {
            HELLO_WORLD_SNIPPET
        };
        Ok(Some(Artifact::new(snippet)))
    }
}

// ── Detection ─────────────────────────────────────────────────────────

/// Flags indentation and docstring problems.
pub struct StyleAuditor {
    latency: Duration,
    hallucination_rate: f64,
    rng: Mutex<StdRng>,
}

impl StyleAuditor {
    pub fn new(latency: Duration, hallucination_rate: f64, seed: Option<u64>) -> Self {
        Self {
            latency,
            hallucination_rate,
            rng: seeded_rng(seed),
        }
    }
}

#[async_trait]
impl Agent for StyleAuditor {
    fn name(&self) -> &str {
        "style-auditor"
    }

    async fn detect_issues(&self, artifact: &Artifact) -> Result<Option<String>> {
        pause(self.latency).await;
        let lines: Vec<&str> = artifact.lines().collect();
        let mut findings = Vec::new();

        if !lines.is_empty() && sample(&self.rng)? < self.hallucination_rate {
            let line = sample_range(&self.rng, 0..lines.len() as u64)? + 1;
            findings.push(format!("Line {line}: Spurious indentation bug!"));
        }

        if lines.len() > 1 {
            let second = lines[1].trim();
            if !second.is_empty() && !second.starts_with("\"\"\"") {
                findings.push("Line 2: Missing docstring. Severity: Minor".to_string());
            }
        }
        for (i, line) in lines.iter().enumerate() {
            let indent = line.len() - line.trim_start_matches(' ').len();
            if (indent == 2 || indent == 3) && line.trim_start().starts_with("return") {
                findings.push(format!(
                    "Line {}: Inconsistent indentation. Severity: Major",
                    i + 1
                ));
            }
        }

        Ok(join_findings(findings))
    }
}

/// Flags missing output and unused or untyped functions.
pub struct LogicAuditor {
    latency: Duration,
    hallucination_rate: f64,
    rng: Mutex<StdRng>,
}

impl LogicAuditor {
    pub fn new(latency: Duration, hallucination_rate: f64, seed: Option<u64>) -> Self {
        Self {
            latency,
            hallucination_rate,
            rng: seeded_rng(seed),
        }
    }
}

#[async_trait]
impl Agent for LogicAuditor {
    fn name(&self) -> &str {
        "logic-auditor"
    }

    async fn detect_issues(&self, artifact: &Artifact) -> Result<Option<String>> {
        pause(self.latency).await;
        let code = artifact.as_str();
        let lines: Vec<&str> = artifact.lines().collect();
        let mut findings = Vec::new();

        if !lines.is_empty() && sample(&self.rng)? < self.hallucination_rate {
            let line = sample_range(&self.rng, 0..lines.len() as u64)? + 1;
            findings.push(format!("Line {line}: False logic error detected!"));
        }

        if !code.contains("print(") && !code.contains("return") && !code.trim().is_empty() {
            findings.push(format!(
                "Line {}: Missing output (print or return). Severity: Minor",
                lines.len()
            ));
        }
        for (i, line) in lines.iter().enumerate() {
            if let Some(captures) = DEF_RE.captures(line) {
                let func = &captures[1];
                let called_elsewhere = lines
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && other.contains(&format!("{func}(")));
                if !called_elsewhere {
                    findings.push(format!(
                        "Line {}: Function '{}' defined but not called. Severity: Info",
                        i + 1,
                        func
                    ));
                }
            }
        }
        if code.contains("circle_area") && code.contains("radius") && !code.contains("radius:") {
            findings
                .push("Line ?: Consider type hinting radius. Severity: Info".to_string());
        }

        Ok(join_findings(findings))
    }
}

/// Flags missing input validation and missing exception handling.
pub struct RobustnessAuditor {
    latency: Duration,
    hallucination_rate: f64,
    rng: Mutex<StdRng>,
}

impl RobustnessAuditor {
    pub fn new(latency: Duration, hallucination_rate: f64, seed: Option<u64>) -> Self {
        Self {
            latency,
            hallucination_rate,
            rng: seeded_rng(seed),
        }
    }
}

#[async_trait]
impl Agent for RobustnessAuditor {
    fn name(&self) -> &str {
        "robustness-auditor"
    }

    async fn detect_issues(&self, artifact: &Artifact) -> Result<Option<String>> {
        pause(self.latency).await;
        let code = artifact.as_str();
        let line_count = artifact.line_count();
        let mut findings = Vec::new();

        if line_count > 0 && sample(&self.rng)? < self.hallucination_rate {
            let line = sample_range(&self.rng, 0..line_count as u64)? + 1;
            findings.push(format!("Line {line}: Phantom logic flaw detected!"));
        }

        if code.contains("calculate_area") && !code.contains("if length <= 0 or width <= 0:") {
            findings.push(
                "Line ?: Missing input validation for calculate_area (non-positive inputs). Severity: Major"
                    .to_string(),
            );
        }
        if code.contains("circle_area") && !code.contains("radius <= 0") {
            findings.push(
                "Line ?: Missing input validation for circle_area (non-positive radius). Severity: Major"
                    .to_string(),
            );
        }
        if code.contains("read_first_line") && !code.contains("FileNotFoundError") {
            findings.push(
                "Line ?: Missing exception handling for FileNotFoundError in read_first_line. Severity: Major"
                    .to_string(),
            );
        }

        Ok(join_findings(findings))
    }
}

// ── Fixing ────────────────────────────────────────────────────────────

/// Pattern-based patcher keyed on finding descriptions.
pub struct PatchFixer {
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl PatchFixer {
    pub fn new(latency: Duration, failure_rate: f64, seed: Option<u64>) -> Self {
        Self {
            latency,
            failure_rate,
            rng: seeded_rng(seed),
        }
    }
}

#[async_trait]
impl Agent for PatchFixer {
    fn name(&self) -> &str {
        "patch-fixer"
    }

    async fn apply_fix(&self, artifact: &Artifact, report: &IssueReport) -> Result<Option<Artifact>> {
        pause(self.latency).await;
        if report.is_empty() {
            return Ok(Some(artifact.clone()));
        }
        if sample(&self.rng)? < self.failure_rate {
            warn!(agent = self.name(), "simulated fix failure, artifact unchanged");
            return Ok(Some(artifact.clone()));
        }

        let mut lines: Vec<String> = artifact.lines().map(String::from).collect();
        let mut patched = false;

        for finding in &report.findings {
            let desc = finding.description.as_str();
            let index = finding.line.map(|n| (n as usize).saturating_sub(1));

            if desc.contains("Missing docstring") {
                if let Some(i) = index.filter(|i| *i <= lines.len()) {
                    lines.insert(i, "    \"\"\"Generated docstring.\"\"\"".to_string());
                    patched = true;
                }
            } else if desc.contains("Inconsistent indentation") {
                if let Some(i) = index.filter(|i| *i < lines.len()) {
                    lines[i] = format!("    {}", lines[i].trim_start());
                    patched = true;
                }
            } else if desc.contains("Missing output") {
                lines.push(output_call_for(artifact.as_str()));
                patched = true;
            } else if desc.contains("defined but not called") {
                if let Some(call) = uncalled_function_patch(desc, &lines) {
                    lines.push(call);
                    patched = true;
                }
            } else if desc.contains("Missing input validation for calculate_area") {
                patched |= insert_after_def(
                    &mut lines,
                    "def calculate_area",
                    &[
                        "    if length <= 0 or width <= 0:",
                        "        raise ValueError(\"Length and width must be positive values.\")",
                    ],
                );
            } else if desc.contains("Missing input validation for circle_area") {
                patched |= insert_after_def(
                    &mut lines,
                    "def circle_area",
                    &[
                        "    if radius <= 0:",
                        "        raise ValueError(\"Radius must be a positive value.\")",
                    ],
                );
            } else if desc.contains("FileNotFoundError") {
                lines.push("    except FileNotFoundError:".to_string());
                lines.push("        return \"Error: File not found.\"".to_string());
                patched = true;
            } else if desc.contains("type hinting radius") {
                for line in lines.iter_mut() {
                    if line.contains("def circle_area(radius):") {
                        *line = line.replace("radius)", "radius: float)");
                        patched = true;
                        break;
                    }
                }
            }
        }

        if !patched {
            // Nothing matched a known pattern; hand back the exact input.
            return Ok(Some(artifact.clone()));
        }
        Ok(Some(Artifact::new(lines.join("\n"))))
    }
}

fn output_call_for(code: &str) -> String {
    if code.contains("add(") {
        "    print('Result:', add(5, 3))".to_string()
    } else if code.contains("subtract(") {
        "    print('Result:', subtract(10, 3))".to_string()
    } else if code.contains("circle_area(") {
        "    print('Circle Area:', circle_area(7))".to_string()
    } else {
        "    print('Output:')".to_string()
    }
}

fn uncalled_function_patch(desc: &str, lines: &[String]) -> Option<String> {
    let func = NAMED_FUNC_RE.captures(desc)?.get(1)?.as_str().to_string();
    let def_line = lines
        .iter()
        .find(|line| line.contains(&format!("def {func}(")))?;
    let params = def_line.split_once('(')?.1.split_once(')')?.0;
    let arity = if params.trim().is_empty() {
        0
    } else {
        params.split(',').count()
    };
    let args = vec!["0"; arity].join(", ");
    Some(format!("    print('{func} result:', {func}({args}))"))
}

fn insert_after_def(lines: &mut Vec<String>, def_prefix: &str, patch: &[&str]) -> bool {
    let Some(position) = lines.iter().position(|line| line.contains(def_prefix)) else {
        return false;
    };
    for (offset, patch_line) in patch.iter().enumerate() {
        lines.insert(position + 1 + offset, patch_line.to_string());
    }
    true
}

// ── Advisory stages ───────────────────────────────────────────────────

/// Suggests structural refactorings. Advisory only; never touches the
/// artifact.
pub struct RefactorAdvisor {
    latency: Duration,
}

impl RefactorAdvisor {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Agent for RefactorAdvisor {
    fn name(&self) -> &str {
        "refactor-advisor"
    }

    async fn refactor(&self, artifact: &Artifact) -> Result<Option<String>> {
        pause(self.latency).await;
        let lines: Vec<&str> = artifact.lines().collect();
        let mut suggestions = Vec::new();

        if lines.len() > 8 {
            suggestions.push(
                "Refactor: Function is getting long, consider breaking it down.".to_string(),
            );
        }
        if lines.iter().any(|line| line.chars().count() > 100) {
            suggestions.push(
                "Refactor: Line length exceeds 100 characters, improve readability.".to_string(),
            );
        }
        if lines.iter().any(|line| BARE_NUMBER_RE.is_match(line)) {
            suggestions.push(
                "Refactor: Consider replacing magic numbers with named constants for clarity."
                    .to_string(),
            );
        }

        Ok(join_findings(suggestions))
    }
}

/// Synthesizes execution-time and memory numbers against thresholds.
pub struct PerformanceOracle {
    latency: Duration,
    time_threshold_secs: f64,
    memory_threshold_mb: u64,
    rng: Mutex<StdRng>,
}

impl PerformanceOracle {
    pub const DEFAULT_TIME_THRESHOLD_SECS: f64 = 1.0;
    pub const DEFAULT_MEMORY_THRESHOLD_MB: u64 = 100;

    pub fn new(latency: Duration, seed: Option<u64>) -> Self {
        Self {
            latency,
            time_threshold_secs: Self::DEFAULT_TIME_THRESHOLD_SECS,
            memory_threshold_mb: Self::DEFAULT_MEMORY_THRESHOLD_MB,
            rng: seeded_rng(seed),
        }
    }

    pub fn with_thresholds(mut self, time_secs: f64, memory_mb: u64) -> Self {
        self.time_threshold_secs = time_secs;
        self.memory_threshold_mb = memory_mb;
        self
    }
}

#[async_trait]
impl Agent for PerformanceOracle {
    fn name(&self) -> &str {
        "performance-oracle"
    }

    async fn check_performance(&self, _artifact: &Artifact) -> Result<Option<String>> {
        pause(self.latency).await;
        // Synthetic measurements drawn from the seeded RNG; no wall-clock
        // dependence, so seeded runs reproduce byte for byte.
        let execution_time = 0.1 + sample(&self.rng)? * self.time_threshold_secs * 1.4;
        let memory_usage = sample_range(&self.rng, 50..self.memory_threshold_mb + 51)?;

        let mut issues = Vec::new();
        if execution_time > self.time_threshold_secs {
            issues.push(format!(
                "Performance: Execution time ({execution_time:.2}s) exceeds threshold ({}s).",
                self.time_threshold_secs
            ));
        }
        if memory_usage > self.memory_threshold_mb {
            issues.push(format!(
                "Performance: Memory usage ({memory_usage}MB) exceeds threshold ({}MB).",
                self.memory_threshold_mb
            ));
        }

        Ok(join_findings(issues))
    }
}

/// Reports functions missing a docstring.
pub struct DocsAuditor {
    latency: Duration,
}

impl DocsAuditor {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Agent for DocsAuditor {
    fn name(&self) -> &str {
        "docs-auditor"
    }

    async fn check_documentation(&self, artifact: &Artifact) -> Result<Option<String>> {
        pause(self.latency).await;
        let lines: Vec<&str> = artifact.lines().collect();
        let mut issues = Vec::new();

        for (i, line) in lines.iter().enumerate() {
            if !line.trim_start().starts_with("def ") {
                continue;
            }
            let Some(captures) = DEF_RE.captures(line) else {
                continue;
            };
            let has_docstring = lines
                .get(i + 1)
                .map(|next| next.trim().starts_with("\"\"\""))
                .unwrap_or(false);
            if !has_docstring {
                issues.push(format!(
                    "Documentation: Function '{}' is missing a docstring.",
                    &captures[1]
                ));
            }
        }

        Ok(join_findings(issues))
    }
}
