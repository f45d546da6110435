//! Tolerant decoding of free-form judge text.
//!
//! Strategies run in a fixed order and stop at the first that yields an
//! object: strict JSON, JSON after ASCII punctuation normalization, a
//! permissive literal parse (single quotes, trailing commas, Python
//! booleans), then the same three against the widest `{...}` substring.

use super::schema::{JudgeRecord, value_as_f64, value_to_list, value_to_text};
use crate::model::AnswerVersion;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// Judge text that no strategy could decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub reason: String,
    pub raw_text: String,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for ParseFailure {}

impl ParseFailure {
    fn new(reason: impl Into<String>, raw_text: &str) -> Self {
        Self {
            reason: reason.into(),
            raw_text: raw_text.to_string(),
        }
    }
}

/// Decode and normalize a single-answer judge response.
pub fn parse_judge_text(text: &str) -> Result<JudgeRecord, ParseFailure> {
    let value = decode_object(text)?;
    JudgeRecord::from_value(value)
        .ok_or_else(|| ParseFailure::new("judge response is not a JSON object", text))
}

/// Decode judge text into a JSON object without interpreting it.
pub fn decode_object(text: &str) -> Result<Value, ParseFailure> {
    if text.trim().is_empty() {
        return Err(ParseFailure::new("judge response is empty", text));
    }

    let mut saw_non_object = false;
    let mut candidates = vec![text.trim().to_string()];
    if let Some(snippet) = widest_brace_span(text) {
        if snippet != candidates[0] {
            candidates.push(snippet);
        }
    }

    let strategies: [(&str, fn(&str) -> Option<Value>); 3] = [
        ("strict", parse_strict),
        ("normalized", |t| parse_strict(&normalize_punctuation(t))),
        ("literal", |t| parse_literal(&normalize_punctuation(t))),
    ];

    for (index, candidate) in candidates.iter().enumerate() {
        for (strategy, parse) in strategies {
            match parse(candidate) {
                Some(value @ Value::Object(_)) => {
                    debug!(strategy, snippet = (index > 0), "Decoded judge response");
                    return Ok(value);
                }
                Some(_) => saw_non_object = true,
                None => {}
            }
        }
    }

    let reason = if saw_non_object {
        "judge response is not a JSON object"
    } else {
        "no parsing strategy produced a JSON object"
    };
    Err(ParseFailure::new(reason, text))
}

fn parse_strict(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Widest `{...}` span, which also strips code fences and chatter.
fn widest_brace_span(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

fn quoted_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[“”]([^“”]+)[“”]\s*[:：]").expect("valid quoted key regex"))
}

/// Replace typographic quotes and full-width punctuation with ASCII.
fn normalize_punctuation(text: &str) -> String {
    let keyed = quoted_key_pattern().replace_all(text, "\"$1\":");
    keyed
        .chars()
        .map(|c| match c {
            '“' | '”' | '＂' | '„' => '"',
            '「' | '」' | '『' | '』' | '‘' | '’' | '＇' => '\'',
            '：' => ':',
            '，' => ',',
            '｛' => '{',
            '｝' => '}',
            other => other,
        })
        .collect()
}

/// Permissive literal parse for Python-dict style output.
fn parse_literal(text: &str) -> Option<Value> {
    json5::from_str::<Value>(&python_literals_to_json(text)).ok()
}

/// Rewrite bare `True`/`False`/`None` outside of string literals.
fn python_literals_to_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut word = String::new();

    let flush = |word: &mut String, out: &mut String| {
        let replacement = match word.as_str() {
            "True" => "true",
            "False" => "false",
            "None" => "null",
            other => other,
        };
        out.push_str(replacement);
        word.clear();
    };

    for c in text.chars() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        flush(&mut word, &mut out);
        if c == '"' || c == '\'' {
            quote = Some(c);
        }
        out.push(c);
    }
    flush(&mut word, &mut out);
    out
}

/// Judge output comparing both versions of one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonJudgement {
    pub question_id: Option<i64>,
    pub original: JudgeRecord,
    pub optimized: JudgeRecord,
    /// Optimized minus original, as reported by the judge.
    pub improvement: Option<f64>,
    pub better_version: Option<AnswerVersion>,
    pub key_differences: Vec<String>,
    pub recommendation: String,
    pub reasoning: String,
}

/// Decode a side-by-side comparison response.
///
/// Expects `version_a` (original) and `version_b` (optimized) blocks plus an
/// optional `comparison` object.
pub fn parse_comparison_text(text: &str) -> Result<ComparisonJudgement, ParseFailure> {
    let value = decode_object(text)?;
    let Value::Object(mut map) = value else {
        return Err(ParseFailure::new("comparison response is not a JSON object", text));
    };

    let mut side = |key: &str, version: AnswerVersion| -> Result<JudgeRecord, ParseFailure> {
        let block = map
            .remove(key)
            .ok_or_else(|| ParseFailure::new(format!("comparison response lacks '{}'", key), text))?;
        let mut record = JudgeRecord::from_value(block)
            .ok_or_else(|| ParseFailure::new(format!("'{}' is not an object", key), text))?;
        record.version = Some(version);
        Ok(record)
    };
    let mut original = side("version_a", AnswerVersion::Original)?;
    let mut optimized = side("version_b", AnswerVersion::Optimized)?;

    let question_id = map.get("question_id").and_then(value_as_f64).map(|id| id as i64);
    if let Some(id) = question_id {
        original.question_id.get_or_insert(id);
        optimized.question_id.get_or_insert(id);
    }

    let comparison = map.get("comparison").cloned().unwrap_or(Value::Null);
    let better_version = comparison
        .get("better_version")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok());

    Ok(ComparisonJudgement {
        question_id,
        original,
        optimized,
        improvement: comparison.get("improvement").and_then(value_as_f64),
        better_version,
        key_differences: comparison
            .get("key_differences")
            .map(value_to_list)
            .unwrap_or_default(),
        recommendation: comparison
            .get("recommendation")
            .map(value_to_text)
            .unwrap_or_default(),
        reasoning: map.get("reasoning").map(value_to_text).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::Dimension;

    #[test]
    fn test_strict_json() {
        let record = parse_judge_text(r#"{"relevance": 90, "overall": 90}"#).unwrap();
        assert_eq!(record.score(Dimension::Relevance), Some(90.0));
    }

    #[test]
    fn test_code_fence_and_chatter() {
        let text = "Here is my evaluation:\n```json\n{\"accuracy\": {\"score\": 72}}\n```\nThanks!";
        let record = parse_judge_text(text).unwrap();
        assert_eq!(record.score(Dimension::Accuracy), Some(72.0));
    }

    #[test]
    fn test_full_width_punctuation() {
        let text = "{“relevance”： 88， “overall_reasoning”： “concise”}";
        let record = parse_judge_text(text).unwrap();
        assert_eq!(record.score(Dimension::Relevance), Some(88.0));
        assert_eq!(record.overall_reasoning, "concise");
    }

    #[test]
    fn test_python_literal() {
        let text = "{'relevance': {'score': 75, 'quality_notes': {'shallow_flag': True}}, 'overall': None,}";
        let record = parse_judge_text(text).unwrap();
        let block = record.block(Dimension::Relevance).unwrap();
        assert_eq!(block.score, Some(75.0));
        assert_eq!(block.shallow_flag, Some(true));
        assert_eq!(record.overall, Some(75.0));
        assert!(record.overall_derived);
    }

    #[test]
    fn test_literal_rewrite_leaves_strings_alone() {
        let rewritten = python_literals_to_json("{'note': 'True story', 'flag': False}");
        assert_eq!(rewritten, "{'note': 'True story', 'flag': false}");
    }

    #[test]
    fn test_unparsable_text_reports_failure() {
        let failure = parse_judge_text("The answer looks fine to me.").unwrap_err();
        assert_eq!(failure.raw_text, "The answer looks fine to me.");
        assert!(!failure.reason.is_empty());

        let failure = parse_judge_text("[1, 2, 3]").unwrap_err();
        assert!(failure.reason.contains("not a JSON object"));

        assert!(parse_judge_text("   ").is_err());
    }

    #[test]
    fn test_comparison_response() {
        let text = r#"{
            "question_id": 4,
            "version_a": {"relevance": {"score": 70}, "overall": 70},
            "version_b": {"relevance": {"score": 85}, "overall": 85},
            "comparison": {
                "improvement": 15,
                "better_version": "optimized",
                "key_differences": ["adds the permit step"],
                "recommendation": "ship b"
            },
            "reasoning": "b covers more"
        }"#;
        let comparison = parse_comparison_text(text).unwrap();
        assert_eq!(comparison.question_id, Some(4));
        assert_eq!(comparison.original.version, Some(AnswerVersion::Original));
        assert_eq!(comparison.optimized.score(Dimension::Relevance), Some(85.0));
        assert_eq!(comparison.optimized.question_id, Some(4));
        assert_eq!(comparison.improvement, Some(15.0));
        assert_eq!(comparison.better_version, Some(AnswerVersion::Optimized));
        assert_eq!(comparison.key_differences, vec!["adds the permit step"]);
        assert_eq!(comparison.reasoning, "b covers more");
    }

    #[test]
    fn test_comparison_requires_both_versions() {
        let err = parse_comparison_text(r#"{"version_a": {"relevance": 1}}"#).unwrap_err();
        assert!(err.reason.contains("version_b"));
    }
}
