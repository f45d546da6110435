//! Lexical coverage: the share of key terms an answer mentions.

use super::keywords::KeywordSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Built-in synonym families: key and its interchangeable terms.
pub const DEFAULT_SYNONYMS: &[(&str, &[&str])] = &[
    ("包商", &["承包商", "廠商", "承攬商"]),
    ("負責人", &["主管", "管理人", "聯絡人"]),
    ("工安", &["安全", "職安", "工業安全"]),
    ("許可證", &["許可", "證明", "核准"]),
    ("contractor", &["vendor", "subcontractor"]),
    ("supervisor", &["manager", "foreman"]),
    ("permit", &["authorization", "approval"]),
];

/// A key term with the terms that may stand in for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynonymFamily {
    pub key: String,
    pub members: Vec<String>,
}

impl SynonymFamily {
    fn spellings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.key.as_str()).chain(self.members.iter().map(String::as_str))
    }

    /// The family applies to a term that contains its key, or that is
    /// exactly one of its members. A member inside a longer term does not
    /// count: "安全帽" is not about "安全".
    fn applies_to(&self, term_lower: &str) -> bool {
        let key = self.key.to_lowercase();
        (!key.is_empty() && term_lower.contains(&key))
            || self.members.iter().any(|m| m.to_lowercase() == term_lower)
    }

    /// First spelling found in the answer.
    fn find_in(&self, answer_lower: &str) -> Option<String> {
        self.spellings()
            .find(|s| !s.is_empty() && answer_lower.contains(&s.to_lowercase()))
            .map(str::to_string)
    }
}

/// Ordered synonym families.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SynonymTable {
    families: Vec<SynonymFamily>,
}

impl SynonymTable {
    pub fn builtin() -> Self {
        Self {
            families: DEFAULT_SYNONYMS
                .iter()
                .map(|(key, members)| SynonymFamily {
                    key: key.to_string(),
                    members: members.iter().map(|m| m.to_string()).collect(),
                })
                .collect(),
        }
    }

    /// Built-in families plus configured ones. A configured key extends an
    /// existing family instead of duplicating it.
    pub fn with_extra(extra: &BTreeMap<String, Vec<String>>) -> Self {
        let mut table = Self::builtin();
        for (key, members) in extra {
            match table.families.iter_mut().find(|f| &f.key == key) {
                Some(family) => {
                    for member in members {
                        if !family.members.contains(member) {
                            family.members.push(member.clone());
                        }
                    }
                }
                None => table.families.push(SynonymFamily {
                    key: key.clone(),
                    members: members.clone(),
                }),
            }
        }
        table
    }

    pub fn families(&self) -> &[SynonymFamily] {
        &self.families
    }

    /// The spelling that satisfied `term` through a synonym family, if any.
    pub fn match_in(&self, term: &str, answer_lower: &str) -> Option<String> {
        let term_lower = term.to_lowercase();
        self.families
            .iter()
            .filter(|family| family.applies_to(&term_lower))
            .find_map(|family| family.find_in(answer_lower))
    }
}

/// Why a coverage score is zero without any term being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageReason {
    NoKeywords,
    EmptyAnswer,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoverageDetail {
    pub total_terms: usize,
    pub matched_terms: usize,
    /// Terms that matched only through a synonym, as `term -> spelling`.
    pub synonym_hits: BTreeMap<String, String>,
    pub reason: Option<CoverageReason>,
}

/// Lexical coverage result for one answer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoverageResult {
    /// 0-100.
    pub score: f64,
    pub matched: Vec<String>,
    pub missing: Vec<String>,
    pub detail: CoverageDetail,
}

/// Scores key-term coverage with synonym tolerance.
#[derive(Debug, Clone)]
pub struct LexicalScorer {
    synonyms: SynonymTable,
}

impl Default for LexicalScorer {
    fn default() -> Self {
        Self::new(SynonymTable::builtin())
    }
}

impl LexicalScorer {
    pub fn new(synonyms: SynonymTable) -> Self {
        Self { synonyms }
    }

    /// `matched / total x 100`. A term matches when it appears in the
    /// answer case-insensitively, or when a synonym of it does.
    pub fn score(&self, keywords: &KeywordSet, answer: Option<&str>) -> CoverageResult {
        let total_terms = keywords.len();
        let answer = answer.filter(|a| !a.trim().is_empty());

        let reason = if keywords.is_empty() {
            Some(CoverageReason::NoKeywords)
        } else if answer.is_none() {
            Some(CoverageReason::EmptyAnswer)
        } else {
            None
        };
        let (Some(answer), None) = (answer, reason) else {
            return CoverageResult {
                score: 0.0,
                matched: Vec::new(),
                missing: keywords.terms().to_vec(),
                detail: CoverageDetail {
                    total_terms,
                    reason,
                    ..Default::default()
                },
            };
        };

        let answer_lower = answer.to_lowercase();
        let mut result = CoverageResult::default();
        for term in keywords.iter() {
            if answer_lower.contains(&term.to_lowercase()) {
                result.matched.push(term.clone());
            } else if let Some(spelling) = self.synonyms.match_in(term, &answer_lower) {
                result.detail.synonym_hits.insert(term.clone(), spelling);
                result.matched.push(term.clone());
            } else {
                result.missing.push(term.clone());
            }
        }

        result.detail.total_terms = total_terms;
        result.detail.matched_terms = result.matched.len();
        result.score = result.matched.len() as f64 / total_terms as f64 * 100.0;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_coverage() {
        let scorer = LexicalScorer::default();
        let keywords = KeywordSet::new(["work permit", "fire zone"]);
        let result = scorer.score(&keywords, Some("You must obtain a work permit first."));
        assert_eq!(result.score, 50.0);
        assert_eq!(result.matched, vec!["work permit"]);
        assert_eq!(result.missing, vec!["fire zone"]);
        assert!(result.detail.reason.is_none());
    }

    #[test]
    fn test_case_insensitive() {
        let scorer = LexicalScorer::default();
        let keywords = KeywordSet::new(["Fire Zone"]);
        let result = scorer.score(&keywords, Some("inside the FIRE ZONE"));
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_synonym_family_counts_as_match() {
        let scorer = LexicalScorer::default();
        let keywords = KeywordSet::new(["contractor", "承包商現場負責人"]);
        let result = scorer.score(&keywords, Some("The vendor must name a 主管 on site."));
        assert_eq!(result.score, 100.0);
        assert_eq!(result.detail.synonym_hits["contractor"], "vendor");
        assert_eq!(result.detail.synonym_hits["承包商現場負責人"], "主管");
    }

    #[test]
    fn test_member_inside_longer_term_does_not_apply_family() {
        let scorer = LexicalScorer::default();
        let keywords = KeywordSet::new(["安全帽"]);
        let result = scorer.score(&keywords, Some("進場前請注意安全"));
        assert_eq!(result.score, 0.0);
        assert!(result.detail.synonym_hits.is_empty());
        assert_eq!(result.missing, vec!["安全帽"]);

        let keywords = KeywordSet::new(["證明文件"]);
        assert_eq!(scorer.score(&keywords, Some("需要主管核准")).score, 0.0);
    }

    #[test]
    fn test_exact_member_term_uses_family() {
        let scorer = LexicalScorer::default();
        let keywords = KeywordSet::new(["承攬商", "manager"]);
        let result = scorer.score(&keywords, Some("包商 and the foreman sign off"));
        assert_eq!(result.score, 100.0);
        assert_eq!(result.detail.synonym_hits["承攬商"], "包商");
        assert_eq!(result.detail.synonym_hits["manager"], "foreman");
    }

    #[test]
    fn test_configured_family_extends_builtin() {
        let mut extra = BTreeMap::new();
        extra.insert("contractor".to_string(), vec!["supplier".to_string()]);
        extra.insert("helmet".to_string(), vec!["hard hat".to_string()]);
        let scorer = LexicalScorer::new(SynonymTable::with_extra(&extra));
        let keywords = KeywordSet::new(["contractor", "helmet"]);
        let result = scorer.score(&keywords, Some("supplier staff wear a hard hat"));
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_zero_only_with_reason_for_empty_inputs() {
        let scorer = LexicalScorer::default();
        let keywords = KeywordSet::new(["permit"]);

        let empty_answer = scorer.score(&keywords, None);
        assert_eq!(empty_answer.score, 0.0);
        assert_eq!(empty_answer.detail.reason, Some(CoverageReason::EmptyAnswer));

        let blank = scorer.score(&keywords, Some("   "));
        assert_eq!(blank.detail.reason, Some(CoverageReason::EmptyAnswer));

        let no_keywords = scorer.score(&KeywordSet::default(), Some("anything"));
        assert_eq!(no_keywords.score, 0.0);
        assert_eq!(no_keywords.detail.reason, Some(CoverageReason::NoKeywords));

        let unmatched = scorer.score(&keywords, Some("nothing relevant"));
        assert_eq!(unmatched.score, 0.0);
        assert!(unmatched.detail.reason.is_none());
    }

    #[test]
    fn test_score_bounded() {
        let scorer = LexicalScorer::default();
        let keywords = KeywordSet::new(["a1", "b2", "c3"]);
        for answer in ["a1", "a1 b2", "a1 b2 c3 a1 b2 c3"] {
            let score = scorer.score(&keywords, Some(answer)).score;
            assert!((0.0..=100.0).contains(&score));
        }
    }
}
