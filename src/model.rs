//! Core identifiers shared by every layer: questions and answer versions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One question of the answer key. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSpec {
    pub question_id: i64,
    pub question_text: String,
    pub reference_text: String,
}

impl ReferenceSpec {
    pub fn new(
        question_id: i64,
        question_text: impl Into<String>,
        reference_text: impl Into<String>,
    ) -> Self {
        Self {
            question_id,
            question_text: question_text.into(),
            reference_text: reference_text.into(),
        }
    }
}

/// Baseline vs. candidate answer for the same question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerVersion {
    Original,
    Optimized,
}

impl AnswerVersion {
    pub const ALL: [AnswerVersion; 2] = [AnswerVersion::Original, AnswerVersion::Optimized];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerVersion::Original => "original",
            AnswerVersion::Optimized => "optimized",
        }
    }
}

impl fmt::Display for AnswerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" | "baseline" | "a" | "version_a" => Ok(AnswerVersion::Original),
            "optimized" | "optimised" | "candidate" | "b" | "version_b" => {
                Ok(AnswerVersion::Optimized)
            }
            other => Err(format!(
                "unknown answer version '{}' (expected original or optimized)",
                other
            )),
        }
    }
}

/// A value per answer version.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionPair<T> {
    pub original: T,
    pub optimized: T,
}

impl<T> VersionPair<T> {
    pub fn new(original: T, optimized: T) -> Self {
        Self {
            original,
            optimized,
        }
    }

    pub fn get(&self, version: AnswerVersion) -> &T {
        match version {
            AnswerVersion::Original => &self.original,
            AnswerVersion::Optimized => &self.optimized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing_is_lenient() {
        assert_eq!("Original".parse::<AnswerVersion>(), Ok(AnswerVersion::Original));
        assert_eq!(" OPTIMIZED ".parse::<AnswerVersion>(), Ok(AnswerVersion::Optimized));
        assert_eq!("b".parse::<AnswerVersion>(), Ok(AnswerVersion::Optimized));
        assert!("latest".parse::<AnswerVersion>().is_err());
    }

    #[test]
    fn test_version_serializes_lowercase() {
        let json = serde_json::to_string(&AnswerVersion::Optimized).unwrap();
        assert_eq!(json, "\"optimized\"");
    }
}
