//! Static scoring of an artifact.
//!
//! Three pure, total functions over the artifact text: a quality score in
//! [0, 100], a coarse structural-complexity score, and a length-derived
//! volume metric. None of them can fail or panic for any input, including
//! empty text. These are deliberately blunt proxies (line-width and
//! comment-presence penalties, keyword counting instead of a control-flow
//! graph), tuned for comparing successive versions of one artifact rather
//! than for absolute judgment.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::config::ScoringConfig;

/// Quality starts here and only penalties are subtracted.
pub const INITIAL_QUALITY_SCORE: f64 = 100.0;

/// Branch/loop keywords counted by the complexity proxy.
const BRANCH_KEYWORDS: [&str; 4] = ["if ", "for ", "while ", "match "];

/// Markers that open a leading doc comment.
const DOC_MARKERS: [&str; 4] = ["\"\"\"", "'''", "///", "//!"];

/// Score bundle for one (iteration, artifact) pair.
///
/// `performance` and `documentation` stay `None` until their stage has run
/// in that iteration; callers must not assume completeness mid-iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub quality: f64,
    pub complexity: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<f64>,
}

impl ScoreSet {
    /// Compute the stage-independent scores for an artifact.
    pub fn measure(artifact: &Artifact, config: &ScoringConfig) -> Self {
        Self {
            quality: quality_score(artifact.as_str(), config),
            complexity: complexity_score(artifact.as_str()),
            volume: volume_metric(artifact.as_str()),
            performance: None,
            documentation: None,
        }
    }

    pub fn with_performance(mut self, score: f64) -> Self {
        self.performance = Some(score);
        self
    }

    pub fn with_documentation(mut self, score: f64) -> Self {
        self.documentation = Some(score);
        self
    }
}

/// Quality score in [0, 100].
///
/// Starts at 100 and subtracts the configured penalty per over-length
/// line, one penalty if the artifact lacks a leading doc comment, and one
/// penalty if no line carries an inline comment.
pub fn quality_score(text: &str, config: &ScoringConfig) -> f64 {
    let mut score = INITIAL_QUALITY_SCORE;
    let lines: Vec<&str> = text.lines().collect();

    for line in &lines {
        if line.chars().count() > config.max_line_length {
            score -= config.long_line_penalty;
        }
    }
    if !has_leading_doc_comment(&lines) {
        score -= config.missing_doc_penalty;
    }
    if !lines.iter().any(|line| has_inline_comment(line)) {
        score -= config.missing_comment_penalty;
    }

    score.clamp(0.0, INITIAL_QUALITY_SCORE)
}

/// Branch/loop keyword occurrences + 1. A coarse cyclomatic proxy, not a
/// control-flow-graph analysis.
pub fn complexity_score(text: &str) -> f64 {
    let branches: usize = BRANCH_KEYWORDS
        .iter()
        .map(|keyword| text.matches(keyword).count())
        .sum();
    branches as f64 + 1.0
}

/// Monotonic function of artifact length, standing in for a real
/// code-volume metric.
pub fn volume_metric(text: &str) -> f64 {
    text.len() as f64 * 2.0
}

/// A doc comment counts as "leading" when one of the first two non-blank
/// lines opens with a doc marker. Generated snippets often start with a
/// definition line, so the marker commonly sits on the second line.
fn has_leading_doc_comment(lines: &[&str]) -> bool {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .take(2)
        .any(|line| DOC_MARKERS.iter().any(|marker| line.starts_with(marker)))
}

fn has_inline_comment(line: &str) -> bool {
    line.contains('#') || line.contains("//")
}
