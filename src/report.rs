//! Issue report types produced by detection agents.
//!
//! A detection agent emits raw text, one finding per line, in the form
//! `Line 12: Inconsistent indentation. Severity: Major` (the line number
//! may be `?` when unknown, and the severity tag may be absent). The
//! pipeline stage runner normalizes that text into an [`IssueReport`] of
//! [`Finding`]s before handing it to the fixer.
//!
//! An empty report is a meaningful value ("no issues found"), never an
//! error.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a single finding, ordered from most to least severe so the
/// `Ord` minimum of a report is its dominant severity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Likely-breaking defect.
    Major,
    /// Worth fixing, not breaking.
    Minor,
    /// Observation only.
    Info,
    /// No severity tag was present in the raw finding.
    #[default]
    Unknown,
}

impl Severity {
    /// Parse an embedded severity tag. Unrecognized tags are `None` so the
    /// caller can fall back to [`Severity::Unknown`].
    pub fn parse_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "Major" => Some(Severity::Major),
            "Minor" => Some(Severity::Minor),
            "Info" => Some(Severity::Info),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Major => "Major",
            Severity::Minor => "Minor",
            Severity::Info => "Info",
            Severity::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reported issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// 1-based line number, or `None` when the detector could not localize
    /// the issue (`Line ?:` in the raw form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub description: String,
    pub severity: Severity,
}

impl Finding {
    pub fn new(line: Option<u32>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            line,
            description: description.into(),
            severity,
        }
    }

    /// Parse one raw finding line.
    ///
    /// Accepted shape: `Line <n|?>: <description>[ Severity: <tag>]`.
    /// Lines without the `Line ` prefix are still kept as findings with an
    /// unknown location; a detector's output is never silently dropped.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let (location, rest) = match raw.strip_prefix("Line ") {
            Some(tail) => match tail.split_once(':') {
                Some((loc, rest)) => (loc.trim().parse::<u32>().ok(), rest.trim()),
                None => (None, raw),
            },
            None => (None, raw),
        };

        let (description, severity) = match rest.rsplit_once("Severity:") {
            Some((desc, tag)) => match Severity::parse_tag(tag) {
                Some(severity) => (desc.trim().trim_end_matches('.').to_string(), severity),
                None => (rest.to_string(), Severity::Unknown),
            },
            None => (rest.to_string(), Severity::Unknown),
        };

        Some(Self {
            line: location,
            description,
            severity,
        })
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "Line {}: {} [{}]", line, self.description, self.severity),
            None => write!(f, "Line ?: {} [{}]", self.description, self.severity),
        }
    }
}

/// Ordered collection of findings from one detection call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReport {
    pub findings: Vec<Finding>,
}

impl IssueReport {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self { findings }
    }

    /// Normalize raw detector output: one finding per non-empty line.
    /// Empty or whitespace-only input yields the empty ("no issues")
    /// report.
    pub fn from_raw(raw: &str) -> Self {
        Self {
            findings: raw.lines().filter_map(Finding::parse).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    /// Highest severity present, with ties broken Major > Minor > Info >
    /// Unknown. `None` for an empty report.
    pub fn dominant_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).min()
    }
}

impl fmt::Display for IssueReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, finding) in self.findings.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{finding}")?;
        }
        Ok(())
    }
}
