//! Consistency checks for normalized judge records.
//!
//! Errors block persistence unless the caller forces it; warnings are
//! advisory and always recorded.

use super::schema::{Dimension, JudgeRecord, METRIC_KEYS, metric_range};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    /// Allowed gap between `overall` and the mean of the four scores.
    pub overall_tolerance: f64,
    /// Dimensions that must be present.
    pub required: Vec<Dimension>,
    /// Also warn on a missing question_id and on missing
    /// dimension-specific metrics.
    pub strict: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            overall_tolerance: 2.0,
            required: Dimension::ALL.to_vec(),
            strict: false,
        }
    }
}

impl ValidationConfig {
    pub fn with_tolerance(overall_tolerance: f64) -> Self {
        Self {
            overall_tolerance,
            ..Default::default()
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// One problem found in a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub dimension: Option<Dimension>,
    pub field: String,
    pub value: Option<String>,
    pub message: String,
}

impl Finding {
    fn new(dimension: Option<Dimension>, field: &str, message: impl Into<String>) -> Self {
        Self {
            dimension,
            field: field.to_string(),
            value: None,
            message: message.into(),
        }
    }

    fn with_value(mut self, value: impl fmt::Display) -> Self {
        self.value = Some(value.to_string());
        self
    }

    /// `relevance.p`, or just the field for record-level findings.
    pub fn location(&self) -> String {
        match self.dimension {
            Some(dim) if self.field.is_empty() => dim.key().to_string(),
            Some(dim) => format!("{}.{}", dim.key(), self.field),
            None => self.field.clone(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.location(), self.message)?;
        if let Some(value) = &self.value {
            write!(f, " (got {})", value)?;
        }
        Ok(())
    }
}

/// Warnings and errors for one record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub warnings: Vec<Finding>,
    pub errors: Vec<Finding>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Whether the record must be kept out of the ledger.
    pub fn blocks_persistence(&self, force: bool) -> bool {
        self.has_errors() && !force
    }

    /// Errors joined into one line, for error messages.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn warn(&mut self, finding: Finding) {
        self.warnings.push(finding);
    }

    fn error(&mut self, finding: Finding) {
        self.errors.push(finding);
    }
}

fn in_range(value: f64, (low, high): (f64, f64)) -> bool {
    value.is_finite() && value >= low && value <= high
}

/// Check a normalized record for missing fields and out-of-range values.
pub fn validate(record: &JudgeRecord, config: &ValidationConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.strict && record.question_id.is_none() {
        report.warn(Finding::new(None, "question_id", "question_id is missing"));
    }

    match record.overall {
        None => report.error(Finding::new(None, "overall", "overall score is missing")),
        Some(overall) if !in_range(overall, (0.0, 100.0)) => report.error(
            Finding::new(None, "overall", "overall must be within [0, 100]").with_value(overall),
        ),
        Some(_) if record.overall_derived => report.warn(Finding::new(
            None,
            "overall",
            "overall was not reported; derived from the dimension mean",
        )),
        Some(_) => {}
    }

    if record.overall_reasoning.trim().is_empty() {
        report.warn(Finding::new(
            None,
            "overall_reasoning",
            "overall_reasoning is missing",
        ));
    }

    for dim in &config.required {
        check_dimension(record, *dim, config.strict, &mut report);
    }

    if let (Some(overall), Some(mean), false) =
        (record.overall, record.full_mean(), record.overall_derived)
    {
        let gap = (overall - mean).abs();
        if gap > config.overall_tolerance {
            report.warn(
                Finding::new(
                    None,
                    "overall",
                    format!(
                        "overall deviates from the dimension mean {:.2} by {:.2}",
                        mean, gap
                    ),
                )
                .with_value(overall),
            );
        }
    }

    report
}

fn check_dimension(record: &JudgeRecord, dim: Dimension, strict: bool, report: &mut ValidationReport) {
    let Some(block) = record.block(dim) else {
        report.error(Finding::new(Some(dim), "", "dimension is missing"));
        return;
    };

    match block.score {
        None => {
            let mut finding = Finding::new(Some(dim), "score", "score is missing or not numeric");
            if let Some(raw) = block.raw_fields.get("score").or(block.raw_fields.get("raw_value")) {
                finding = finding.with_value(raw);
            }
            report.error(finding);
        }
        Some(score) if !in_range(score, (0.0, 100.0)) => report.error(
            Finding::new(Some(dim), "score", "score must be within [0, 100]").with_value(score),
        ),
        Some(_) => {}
    }

    for metric in METRIC_KEYS {
        let range = metric_range(metric);
        if let Some(value) = block.metric(metric) {
            if !in_range(value, range) {
                report.error(
                    Finding::new(
                        Some(dim),
                        metric,
                        format!("{} must be within [{}, {}]", metric, range.0, range.1),
                    )
                    .with_value(value),
                );
            }
        } else if let Some(raw) = block.raw_fields.get(metric) {
            report.error(
                Finding::new(Some(dim), metric, format!("{} is not numeric", metric))
                    .with_value(raw),
            );
        } else if strict && dim.metrics().contains(&metric) {
            report.warn(Finding::new(
                Some(dim),
                metric,
                format!("{} is missing", metric),
            ));
        }
    }

    if block.reasoning.trim().is_empty() {
        report.warn(Finding::new(Some(dim), "reasoning", "reasoning is missing"));
    }
    if block.positive_drivers.is_empty() {
        report.warn(Finding::new(
            Some(dim),
            "positive_drivers",
            "no positive score drivers",
        ));
    }
    if block.negative_drivers.is_empty() {
        report.warn(Finding::new(
            Some(dim),
            "negative_drivers",
            "no negative score drivers",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::parse_judge_text;
    use serde_json::{Value, json};

    fn block(score: f64, metrics: &[(&str, f64)]) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("score".to_string(), json!(score));
        for (name, value) in metrics {
            map.insert(name.to_string(), json!(value));
        }
        map.insert("reasoning".to_string(), json!("explained"));
        map.insert(
            "score_drivers".to_string(),
            json!({"positive": ["good"], "negative": ["minor gap"]}),
        );
        Value::Object(map)
    }

    fn complete_record(overall: f64) -> JudgeRecord {
        let value = json!({
            "question_id": 1,
            "relevance": block(92.0, &[("p", 0.92)]),
            "completeness": block(88.0, &[("q", 0.9), ("k", 0.98)]),
            "accuracy": block(95.0, &[("r", 0.95)]),
            "faithfulness": block(90.0, &[("g", 0.9)]),
            "overall": overall,
            "overall_reasoning": "consistent"
        });
        parse_judge_text(&value.to_string()).unwrap()
    }

    fn has_overall_mismatch(report: &ValidationReport) -> bool {
        report
            .warnings
            .iter()
            .any(|w| w.field == "overall" && w.message.contains("deviates"))
    }

    #[test]
    fn test_complete_record_is_clean() {
        let report = validate(&complete_record(91.0), &ValidationConfig::default());
        assert!(report.is_clean(), "{:?}", report);
        assert!(!report.blocks_persistence(false));
    }

    #[test]
    fn test_overall_mismatch_depends_on_tolerance() {
        let record = complete_record(91.0);
        // Mean is 91.25, so a gap of 0.25.
        assert!(!has_overall_mismatch(&validate(&record, &ValidationConfig::with_tolerance(2.0))));
        assert!(!has_overall_mismatch(&validate(&record, &ValidationConfig::with_tolerance(0.25))));
        assert!(has_overall_mismatch(&validate(&record, &ValidationConfig::with_tolerance(0.2))));

        let far = complete_record(70.0);
        let report = validate(&far, &ValidationConfig::default());
        assert!(has_overall_mismatch(&report));
        assert!(!report.has_errors());
    }

    #[test]
    fn test_out_of_range_values_are_errors() {
        let record = parse_judge_text(
            r#"{"relevance": {"score": 120, "p": 1.4},
                "completeness": {"score": 50, "q": "lots", "k": 0.5},
                "accuracy": {"score": 80, "r": 0.7},
                "faithfulness": 80, "overall": 101}"#,
        )
        .unwrap();
        let report = validate(&record, &ValidationConfig::default());
        let locations: Vec<String> = report.errors.iter().map(Finding::location).collect();
        assert!(locations.contains(&"overall".to_string()));
        assert!(locations.contains(&"relevance.score".to_string()));
        assert!(locations.contains(&"relevance.p".to_string()));
        assert!(locations.contains(&"completeness.q".to_string()));
        assert!(locations.contains(&"completeness.k".to_string()));
        assert!(!locations.contains(&"accuracy.r".to_string()));
        // A missing metric is only a warning, and only in strict mode.
        assert!(!report.warnings.iter().any(|w| w.location() == "faithfulness.g"));
        let strict = validate(&record, &ValidationConfig::default().strict(true));
        assert!(strict.warnings.iter().any(|w| w.location() == "faithfulness.g"));
        assert!(report.blocks_persistence(false));
        assert!(!report.blocks_persistence(true));
    }

    #[test]
    fn test_missing_dimension_and_score() {
        let record = parse_judge_text(
            r#"{"relevance": "high", "completeness": 70, "accuracy": 70, "overall": 70}"#,
        )
        .unwrap();
        let report = validate(&record, &ValidationConfig::default());
        let locations: Vec<String> = report.errors.iter().map(Finding::location).collect();
        assert!(locations.contains(&"relevance.score".to_string()));
        assert!(locations.contains(&"faithfulness".to_string()));
        let score_error = report
            .errors
            .iter()
            .find(|e| e.location() == "relevance.score")
            .unwrap();
        assert_eq!(score_error.value.as_deref(), Some("\"high\""));
    }

    #[test]
    fn test_soft_gaps_are_warnings() {
        let record = parse_judge_text(
            r#"{"relevance": 80, "completeness": 80, "accuracy": 80, "faithfulness": 80}"#,
        )
        .unwrap();
        let report = validate(&record, &ValidationConfig::default().strict(true));
        assert!(!report.has_errors(), "{:?}", report.errors);
        let fields: Vec<&str> = report.warnings.iter().map(|w| w.field.as_str()).collect();
        for expected in [
            "question_id",
            "overall",
            "overall_reasoning",
            "reasoning",
            "positive_drivers",
            "negative_drivers",
            "p",
        ] {
            assert!(fields.contains(&expected), "missing warning for {}", expected);
        }
    }

    #[test]
    fn test_scores_without_ids_or_metrics_are_clean_by_default() {
        let value = json!({
            "relevance": block(92.0, &[]),
            "completeness": block(88.0, &[]),
            "accuracy": block(95.0, &[]),
            "faithfulness": block(90.0, &[]),
            "overall": 91,
            "overall_reasoning": "consistent"
        });
        let record = parse_judge_text(&value.to_string()).unwrap();
        let report = validate(&record, &ValidationConfig::default());
        assert!(report.is_clean(), "{:?}", report);

        let strict = validate(&record, &ValidationConfig::default().strict(true));
        let fields: Vec<&str> = strict.warnings.iter().map(|w| w.field.as_str()).collect();
        assert!(fields.contains(&"question_id"));
        assert!(fields.contains(&"k"));
        assert!(!strict.has_errors());
    }

    #[test]
    fn test_required_subset() {
        let record = parse_judge_text(r#"{"relevance": 80, "overall": 80}"#).unwrap();
        let config = ValidationConfig {
            required: vec![Dimension::Relevance],
            ..Default::default()
        };
        assert!(!validate(&record, &config).has_errors());
        assert!(validate(&record, &ValidationConfig::default()).has_errors());
    }
}
