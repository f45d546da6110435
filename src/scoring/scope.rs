//! Scope heuristic: penalize figures and dates the reference never states.
//!
//! The thresholds are fixed so that scores stay comparable across runs.

use super::keywords::KeywordSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static NUMBERS: OnceLock<Regex> = OnceLock::new();

static DATES: OnceLock<Regex> = OnceLock::new();

fn number_pattern() -> &'static Regex {
    NUMBERS.get_or_init(|| Regex::new(r"\b\d+\b").expect("valid number regex"))
}

fn date_pattern() -> &'static Regex {
    DATES.get_or_init(|| {
        Regex::new(r"\d{4}[-/]\d{1,2}[-/]\d{1,2}|\d{1,2}[-/]\d{1,2}").expect("valid date regex")
    })
}

/// Connectives that mark elaboration rather than new claims.
pub const DEFAULT_CONNECTIVES: &[&str] = &[
    "因此", "所以", "包括", "例如", "如", "即", "也就是", "用於", "目的",
];

/// Verdict attached to a scope score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLabel {
    ModeratelyFaithful,
    HighlyFaithful,
    VeryHighlyFaithful,
    FullyFaithful,
    NoAnswer,
}

impl ScopeLabel {
    pub fn description(&self) -> &'static str {
        match self {
            ScopeLabel::ModeratelyFaithful => "moderately faithful: several unstated figures or dates",
            ScopeLabel::HighlyFaithful => "highly faithful: a few unstated figures or dates",
            ScopeLabel::VeryHighlyFaithful => "very highly faithful: reasonable elaboration",
            ScopeLabel::FullyFaithful => "fully faithful",
            ScopeLabel::NoAnswer => "no answer given, nothing to fabricate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScopeDetail {
    /// Distinct numbers in the answer that the reference never states.
    pub extra_numbers: Vec<String>,
    /// Distinct dates in the answer that the reference never states.
    pub extra_dates: Vec<String>,
    /// Distinct explanatory connectives found in the answer.
    pub connectives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeResult {
    pub score: f64,
    pub label: ScopeLabel,
    pub detail: ScopeDetail,
}

impl ScopeResult {
    pub fn description(&self) -> &'static str {
        self.label.description()
    }
}

/// Heuristic scope scorer.
#[derive(Debug, Clone)]
pub struct ScopeScorer {
    connectives: Vec<String>,
}

impl Default for ScopeScorer {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTIVES.iter().map(|c| c.to_string()).collect())
    }
}

impl ScopeScorer {
    pub fn new(connectives: Vec<String>) -> Self {
        Self { connectives }
    }

    /// Score the answer against the reference's key terms.
    ///
    /// Rules, first match wins:
    /// more than two unstated numbers or more than one unstated date gives 50;
    /// any unstated number or date gives 75;
    /// more than three distinct connectives gives 90;
    /// otherwise 100. A missing answer scores 100.
    pub fn score(&self, keywords: &KeywordSet, answer: Option<&str>) -> ScopeResult {
        let Some(answer) = answer.filter(|a| !a.trim().is_empty()) else {
            return ScopeResult {
                score: 100.0,
                label: ScopeLabel::NoAnswer,
                detail: ScopeDetail::default(),
            };
        };

        let reference = keywords.joined();
        let detail = ScopeDetail {
            extra_numbers: unstated(number_pattern(), &reference, answer),
            extra_dates: unstated(date_pattern(), &reference, answer),
            connectives: self
                .connectives
                .iter()
                .filter(|c| !c.is_empty() && answer.contains(c.as_str()))
                .cloned()
                .collect(),
        };

        let (score, label) = if detail.extra_numbers.len() > 2 || detail.extra_dates.len() > 1 {
            (50.0, ScopeLabel::ModeratelyFaithful)
        } else if !detail.extra_numbers.is_empty() || !detail.extra_dates.is_empty() {
            (75.0, ScopeLabel::HighlyFaithful)
        } else if detail.connectives.len() > 3 {
            (90.0, ScopeLabel::VeryHighlyFaithful)
        } else {
            (100.0, ScopeLabel::FullyFaithful)
        };

        ScopeResult {
            score,
            label,
            detail,
        }
    }
}

/// Distinct matches in `answer` absent from `reference`, in answer order.
fn unstated(pattern: &Regex, reference: &str, answer: &str) -> Vec<String> {
    let stated: Vec<&str> = pattern.find_iter(reference).map(|m| m.as_str()).collect();
    let mut extra: Vec<String> = Vec::new();
    for found in pattern.find_iter(answer).map(|m| m.as_str()) {
        if !stated.contains(&found) && !extra.iter().any(|e| e == found) {
            extra.push(found.to_string());
        }
    }
    extra
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords() -> KeywordSet {
        KeywordSet::new(["work permit", "fire zone", "3"])
    }

    #[test]
    fn test_three_unstated_numbers_is_moderate() {
        let scorer = ScopeScorer::default();
        let result = scorer.score(
            &keywords(),
            Some("Apply 5 days ahead, keep 10 meters clear, renew every 30 days."),
        );
        assert_eq!(result.score, 50.0);
        assert_eq!(result.label, ScopeLabel::ModeratelyFaithful);
        assert_eq!(result.detail.extra_numbers, vec!["5", "10", "30"]);
    }

    #[test]
    fn test_stated_numbers_are_not_penalized() {
        let scorer = ScopeScorer::default();
        let result = scorer.score(&keywords(), Some("Keep 3 extinguishers in the fire zone."));
        assert_eq!(result.score, 100.0);
        assert_eq!(result.label, ScopeLabel::FullyFaithful);
    }

    #[test]
    fn test_one_unstated_number() {
        let scorer = ScopeScorer::default();
        let result = scorer.score(&keywords(), Some("Allow 7 days for approval."));
        assert_eq!(result.score, 75.0);
        assert_eq!(result.label, ScopeLabel::HighlyFaithful);
    }

    #[test]
    fn test_repeated_number_counts_once() {
        let scorer = ScopeScorer::default();
        let result = scorer.score(&keywords(), Some("7 people, 7 shifts, 7 hours"));
        assert_eq!(result.score, 75.0);
    }

    #[test]
    fn test_two_unstated_dates() {
        let scorer = ScopeScorer::default();
        let result = scorer.score(
            &KeywordSet::new(["permit"]),
            Some("Valid from 2024/01/05 until 2024/02/05"),
        );
        assert_eq!(result.score, 50.0);
        assert_eq!(result.detail.extra_dates.len(), 2);
    }

    #[test]
    fn test_many_connectives() {
        let scorer = ScopeScorer::default();
        let result = scorer.score(
            &KeywordSet::new(["電焊"]),
            Some("電焊作業因此需要許可，所以先申請，包括動火，例如切割"),
        );
        assert_eq!(result.score, 90.0);
        assert_eq!(result.label, ScopeLabel::VeryHighlyFaithful);
    }

    #[test]
    fn test_missing_answer_is_fully_safe() {
        let scorer = ScopeScorer::default();
        let result = scorer.score(&keywords(), None);
        assert_eq!(result.score, 100.0);
        assert_eq!(result.label, ScopeLabel::NoAnswer);
    }

    #[test]
    fn test_score_is_one_of_fixed_levels() {
        let scorer = ScopeScorer::default();
        for answer in ["", "1", "1 2", "1 2 3 4", "即 如 所以 因此", "2024-01-01 2024-01-02"] {
            let score = scorer.score(&keywords(), Some(answer)).score;
            assert!([50.0, 75.0, 90.0, 100.0].contains(&score), "{}", answer);
        }
    }
}
