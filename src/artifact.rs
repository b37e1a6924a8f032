//! The evolving code artifact.
//!
//! An [`Artifact`] is an immutable snapshot of the code text. Every
//! transformation (generation, fix, feature injection) produces a new
//! value; nothing edits an artifact in place, so version records in the
//! ledger always describe exactly what a stage saw.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Immutable code text flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact(String);

impl Artifact {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.0.lines()
    }

    pub fn line_count(&self) -> usize {
        self.0.lines().count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Artifact {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for Artifact {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_count_handles_trailing_newline() {
        assert_eq!(Artifact::new("a\nb\n").line_count(), 2);
        assert_eq!(Artifact::new("a\nb").line_count(), 2);
        assert_eq!(Artifact::new("").line_count(), 0);
    }

    #[test]
    fn equality_is_textual() {
        assert_eq!(Artifact::new("x = 1"), Artifact::from("x = 1"));
        assert_ne!(Artifact::new("x = 1"), Artifact::new("x = 2"));
    }

    #[test]
    fn display_round_trips_text() {
        let artifact = Artifact::new("def f():\n    pass\n");
        assert_eq!(artifact.to_string(), "def f():\n    pass\n");
    }
}
