//! Canonical judge record and the normalizer that produces it.
//!
//! Judges emit several shapes for the same information: nested objects per
//! dimension, bare numbers, numeric strings, sibling `<dim>_reasoning` keys,
//! legacy top-level `reasoning`/`strengths`/`weaknesses`. [`JudgeRecord::from_value`]
//! folds them all into one form, and [`JudgeRecord::to_value`] writes that form
//! back so that normalizing twice is a no-op.

use crate::model::AnswerVersion;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// One of the four judged quality axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dimension {
    #[serde(rename = "relevance")]
    Relevance,
    #[serde(rename = "completeness")]
    Completeness,
    #[serde(rename = "accuracy")]
    Accuracy,
    /// Whether the answer stays within what the reference supports.
    /// Carried on the wire as `faithfulness`.
    #[serde(rename = "faithfulness", alias = "scope_adherence")]
    ScopeAdherence,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Relevance,
        Dimension::Completeness,
        Dimension::Accuracy,
        Dimension::ScopeAdherence,
    ];

    /// Wire key used in judge output and ledger rows.
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::Relevance => "relevance",
            Dimension::Completeness => "completeness",
            Dimension::Accuracy => "accuracy",
            Dimension::ScopeAdherence => "faithfulness",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Relevance => "Relevance",
            Dimension::Completeness => "Completeness",
            Dimension::Accuracy => "Accuracy",
            Dimension::ScopeAdherence => "Scope adherence",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "relevance" => Some(Dimension::Relevance),
            "completeness" => Some(Dimension::Completeness),
            "accuracy" => Some(Dimension::Accuracy),
            "faithfulness" | "scope_adherence" | "scope" => Some(Dimension::ScopeAdherence),
            _ => None,
        }
    }

    /// Supporting metrics the judge is asked to report for this dimension.
    pub fn metrics(&self) -> &'static [&'static str] {
        match self {
            Dimension::Relevance => &["p"],
            Dimension::Completeness => &["q", "k"],
            Dimension::Accuracy => &["r"],
            Dimension::ScopeAdherence => &["g"],
        }
    }

    /// Dimension-specific list fields kept alongside the drivers.
    pub fn list_fields(&self) -> &'static [&'static str] {
        match self {
            Dimension::Relevance => &["on_topic_examples", "off_topic_examples"],
            Dimension::Completeness => &["covered", "partially", "missing"],
            Dimension::Accuracy => &["correct_facts", "incorrect_facts", "unverifiable_facts"],
            Dimension::ScopeAdherence => &["essential", "supportive", "extraneous"],
        }
    }

    /// Fields that stand in for missing positive/negative drivers.
    /// The negative side lists alternatives in priority order.
    fn driver_fallback(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Dimension::Relevance => ("on_topic_examples", &["off_topic_examples"]),
            Dimension::Completeness => ("covered", &["missing", "partially"]),
            Dimension::Accuracy => ("correct_facts", &["incorrect_facts", "unverifiable_facts"]),
            Dimension::ScopeAdherence => ("essential", &["extraneous"]),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Names of the supporting metrics.
pub const METRIC_KEYS: [&str; 5] = ["p", "q", "k", "r", "g"];

/// Valid closed range for a supporting metric.
///
/// `k` is the completeness quality multiplier and lives in `[0.8, 1.0]`;
/// the others are proportions in `[0, 1]`.
pub fn metric_range(metric: &str) -> (f64, f64) {
    if metric == "k" { (0.8, 1.0) } else { (0.0, 1.0) }
}

/// Normalized content for one dimension.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DimensionBlock {
    /// 0-100. `None` only when the judge gave no numeric score.
    pub score: Option<f64>,
    /// Supporting metrics that parsed as numbers.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub positive_drivers: Vec<String>,
    #[serde(default)]
    pub negative_drivers: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub shallow_flag: Option<bool>,
    /// Everything else the judge returned for this dimension, verbatim.
    #[serde(default)]
    pub raw_fields: Map<String, Value>,
}

impl DimensionBlock {
    pub fn with_score(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Default::default()
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// A dimension-specific list field as strings; empty when absent.
    pub fn list_field(&self, name: &str) -> Vec<String> {
        self.raw_fields.get(name).map(value_to_list).unwrap_or_default()
    }

    fn from_nested(mut map: Map<String, Value>, dim: Dimension) -> Self {
        let mut block = DimensionBlock::default();

        if let Some(score) = map.get("score").and_then(value_as_f64) {
            block.score = Some(score);
            map.remove("score");
        }

        for metric in METRIC_KEYS {
            if let Some(value) = map.get(metric).and_then(value_as_f64) {
                block.metrics.insert(metric.to_string(), value);
                map.remove(metric);
            }
        }

        let mut explicit_drivers = false;
        if let Some(Value::Object(drivers)) = map.get("score_drivers") {
            block.positive_drivers = drivers.get("positive").map(value_to_list).unwrap_or_default();
            block.negative_drivers = drivers.get("negative").map(value_to_list).unwrap_or_default();
            explicit_drivers = true;
        }
        if explicit_drivers {
            map.remove("score_drivers");
        }
        for (key, target) in [
            ("positive_drivers", &mut block.positive_drivers),
            ("negative_drivers", &mut block.negative_drivers),
        ] {
            if target.is_empty() {
                if let Some(value @ Value::Array(_)) = map.get(key) {
                    *target = value_to_list(value);
                    map.remove(key);
                }
            }
        }

        if let Some(reasoning) = map.remove("reasoning") {
            block.reasoning = value_to_text(&reasoning);
        }

        if let Some(Value::Bool(flag)) = map.get("shallow_flag") {
            block.shallow_flag = Some(*flag);
            map.remove("shallow_flag");
        } else if let Some(flag) = map
            .get("quality_notes")
            .and_then(|notes| notes.get("shallow_flag"))
            .and_then(Value::as_bool)
        {
            block.shallow_flag = Some(flag);
        }

        block.raw_fields = map;
        block.fill_driver_fallback(dim);
        block
    }

    /// Fill empty driver lists from the dimension's alternative fields.
    fn fill_driver_fallback(&mut self, dim: Dimension) {
        let (positive_key, negative_keys) = dim.driver_fallback();
        if self.positive_drivers.is_empty() {
            self.positive_drivers = self.list_field(positive_key);
        }
        if self.negative_drivers.is_empty() {
            self.negative_drivers = negative_keys
                .iter()
                .map(|key| self.list_field(key))
                .find(|list| !list.is_empty())
                .unwrap_or_default();
        }
    }

    /// The block in judge wire form.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(score) = self.score {
            map.insert("score".to_string(), Value::from(score));
        }
        for (name, value) in &self.metrics {
            map.insert(name.clone(), Value::from(*value));
        }
        if !self.positive_drivers.is_empty() || !self.negative_drivers.is_empty() {
            let mut drivers = Map::new();
            drivers.insert("positive".to_string(), string_array(&self.positive_drivers));
            drivers.insert("negative".to_string(), string_array(&self.negative_drivers));
            map.insert("score_drivers".to_string(), Value::Object(drivers));
        }
        if !self.reasoning.is_empty() {
            map.insert("reasoning".to_string(), Value::String(self.reasoning.clone()));
        }

        let flag_in_notes = self
            .raw_fields
            .get("quality_notes")
            .and_then(|notes| notes.get("shallow_flag"))
            .and_then(Value::as_bool);
        if let Some(flag) = self.shallow_flag {
            if flag_in_notes != Some(flag) {
                map.insert("shallow_flag".to_string(), Value::Bool(flag));
            }
        }

        for (key, value) in &self.raw_fields {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(map)
    }
}

/// The accepted shapes of a dimension value.
enum RawDimension {
    Nested(Map<String, Value>),
    Score(f64),
    Unparsed(Value),
}

impl RawDimension {
    fn classify(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Object(map) => Some(RawDimension::Nested(map)),
            other => match value_as_f64(&other) {
                Some(score) => Some(RawDimension::Score(score)),
                None => Some(RawDimension::Unparsed(other)),
            },
        }
    }

    fn into_block(self, dim: Dimension) -> DimensionBlock {
        match self {
            RawDimension::Nested(map) => DimensionBlock::from_nested(map, dim),
            RawDimension::Score(score) => DimensionBlock::with_score(score),
            RawDimension::Unparsed(value) => {
                let mut block = DimensionBlock::default();
                block.raw_fields.insert("raw_value".to_string(), value);
                block
            }
        }
    }
}

/// The normalized judge output for one answer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JudgeRecord {
    pub question_id: Option<i64>,
    pub version: Option<AnswerVersion>,
    /// Only dimensions the judge actually returned.
    pub dimensions: BTreeMap<Dimension, DimensionBlock>,
    /// Judge-reported overall, or the mean of the present scores.
    pub overall: Option<f64>,
    /// Set when `overall` was not reported and had to be derived.
    #[serde(default)]
    pub overall_derived: bool,
    #[serde(default)]
    pub overall_reasoning: String,
    /// Unrecognized top-level keys, kept for audit.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl JudgeRecord {
    /// Normalize an already-decoded judge object.
    ///
    /// Returns `None` when the value is not an object.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };

        let mut record = JudgeRecord {
            question_id: map.get("question_id").and_then(value_as_i64),
            version: map
                .get("version")
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse().ok()),
            ..Default::default()
        };
        if record.question_id.is_some() {
            map.remove("question_id");
        }
        if record.version.is_some() {
            map.remove("version");
        }

        for dim in Dimension::ALL {
            let mut raw = map.remove(dim.key());
            if raw.is_none() && dim == Dimension::ScopeAdherence {
                raw = map.remove("scope_adherence");
            }
            let Some(block) = raw.and_then(RawDimension::classify) else {
                continue;
            };
            let mut block = block.into_block(dim);

            let sibling = format!("{}_reasoning", dim.key());
            if let Some(reasoning) = map.remove(&sibling) {
                if block.reasoning.is_empty() {
                    block.reasoning = value_to_text(&reasoning);
                }
            }
            record.dimensions.insert(dim, block);
        }

        if let Some(reasoning) = map.remove("overall_reasoning") {
            record.overall_reasoning = value_to_text(&reasoning);
        } else if let Some(reasoning) = map.remove("reasoning") {
            record.overall_reasoning = value_to_text(&reasoning);
        }

        let strengths = map.get("strengths").map(value_to_list).unwrap_or_default();
        let weaknesses = map.get("weaknesses").map(value_to_list).unwrap_or_default();
        for block in record.dimensions.values_mut() {
            if block.positive_drivers.is_empty() {
                block.positive_drivers = strengths.clone();
            }
            if block.negative_drivers.is_empty() {
                block.negative_drivers = weaknesses.clone();
            }
        }

        match map.get("overall").and_then(value_as_f64) {
            Some(overall) => {
                record.overall = Some(overall);
                map.remove("overall");
            }
            None => {
                record.overall = record.mean_score();
                record.overall_derived = record.overall.is_some();
            }
        }

        record.extra = map;
        Some(record)
    }

    /// Write the record back in judge wire form.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(id) = self.question_id {
            map.insert("question_id".to_string(), Value::from(id));
        }
        if let Some(version) = self.version {
            map.insert("version".to_string(), Value::from(version.as_str()));
        }
        for (dim, block) in &self.dimensions {
            map.insert(dim.key().to_string(), block.to_value());
        }
        if let (Some(overall), false) = (self.overall, self.overall_derived) {
            map.insert("overall".to_string(), Value::from(overall));
        }
        if !self.overall_reasoning.is_empty() {
            map.insert(
                "overall_reasoning".to_string(),
                Value::String(self.overall_reasoning.clone()),
            );
        }
        for (key, value) in &self.extra {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(map)
    }

    pub fn block(&self, dim: Dimension) -> Option<&DimensionBlock> {
        self.dimensions.get(&dim)
    }

    pub fn score(&self, dim: Dimension) -> Option<f64> {
        self.block(dim).and_then(|block| block.score)
    }

    /// Unweighted mean of the dimension scores that are present.
    pub fn mean_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self.dimensions.values().filter_map(|b| b.score).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    /// Mean of all four scores; `None` unless every dimension scored.
    pub fn full_mean(&self) -> Option<f64> {
        let scores: Option<Vec<f64>> = Dimension::ALL.iter().map(|dim| self.score(*dim)).collect();
        scores.map(|s| s.iter().sum::<f64>() / s.len() as f64)
    }

    /// Overall reasoning followed by each dimension's reasoning.
    pub fn combined_reasoning(&self) -> String {
        let mut parts = Vec::new();
        if !self.overall_reasoning.is_empty() {
            parts.push(self.overall_reasoning.clone());
        }
        for (dim, block) in &self.dimensions {
            if !block.reasoning.is_empty() {
                parts.push(format!("{}: {}", dim.label(), block.reasoning));
            }
        }
        parts.join("\n")
    }

    /// Bind the record to a question and version.
    pub fn assign(&mut self, question_id: i64, version: AnswerVersion) {
        self.question_id = Some(question_id);
        self.version = Some(version);
    }
}

/// Best-effort numeric read of a JSON value, accepting numeric strings.
pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn value_as_i64(value: &Value) -> Option<i64> {
    if let Some(id) = value.as_i64() {
        return Some(id);
    }
    value_as_f64(value)
        .filter(|n| n.fract() == 0.0 && n.abs() < i64::MAX as f64)
        .map(|n| n as i64)
}

/// Render a JSON value as plain text; strings are not quoted.
pub(crate) fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Read a list-like JSON value as strings. Scalars become one-item lists.
pub(crate) fn value_to_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|item| !item.is_empty())
            .collect(),
        Value::Null => Vec::new(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value_to_text(value)))
            .collect(),
        other => vec![value_to_text(other)],
    }
}

fn string_array(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(value: Value) -> JudgeRecord {
        JudgeRecord::from_value(value).unwrap()
    }

    #[test]
    fn test_bare_number_and_numeric_string() {
        let record = normalize(json!({"relevance": 88, "accuracy": "91.5"}));
        assert_eq!(record.score(Dimension::Relevance), Some(88.0));
        assert_eq!(record.score(Dimension::Accuracy), Some(91.5));
        assert_eq!(record.score(Dimension::Completeness), None);
        assert!(!record.dimensions.contains_key(&Dimension::Completeness));
    }

    #[test]
    fn test_non_numeric_value_kept_raw() {
        let record = normalize(json!({"completeness": "N/A"}));
        let block = record.block(Dimension::Completeness).unwrap();
        assert_eq!(block.score, None);
        assert_eq!(block.raw_fields["raw_value"], json!("N/A"));
    }

    #[test]
    fn test_sibling_reasoning_merged() {
        let record = normalize(json!({
            "relevance": {"score": 80},
            "relevance_reasoning": "stays on topic",
            "accuracy": {"score": 70, "reasoning": "own"},
            "accuracy_reasoning": "ignored"
        }));
        assert_eq!(record.block(Dimension::Relevance).unwrap().reasoning, "stays on topic");
        assert_eq!(record.block(Dimension::Accuracy).unwrap().reasoning, "own");
        assert!(!record.extra.contains_key("relevance_reasoning"));
    }

    #[test]
    fn test_metrics_and_drivers() {
        let record = normalize(json!({
            "relevance": {
                "score": 90, "p": 0.9, "q": "0.8", "k": 1.0,
                "score_drivers": {"positive": ["direct"], "negative": ["one digression"]},
                "quality_notes": {"shallow_flag": false}
            }
        }));
        let block = record.block(Dimension::Relevance).unwrap();
        assert_eq!(block.metric("p"), Some(0.9));
        assert_eq!(block.metric("q"), Some(0.8));
        assert_eq!(block.positive_drivers, vec!["direct"]);
        assert_eq!(block.negative_drivers, vec!["one digression"]);
        assert_eq!(block.shallow_flag, Some(false));
    }

    #[test]
    fn test_driver_fallback_per_dimension() {
        let record = normalize(json!({
            "completeness": {"score": 60, "covered": ["permit"], "partially": ["zone"]},
            "accuracy": {"score": 70, "correct_facts": ["a"], "unverifiable_facts": ["b"]},
            "faithfulness": {"score": 80, "essential": ["x"], "extraneous": ["y"]}
        }));
        let completeness = record.block(Dimension::Completeness).unwrap();
        assert_eq!(completeness.positive_drivers, vec!["permit"]);
        assert_eq!(completeness.negative_drivers, vec!["zone"]);
        let accuracy = record.block(Dimension::Accuracy).unwrap();
        assert_eq!(accuracy.negative_drivers, vec!["b"]);
        let scope = record.block(Dimension::ScopeAdherence).unwrap();
        assert_eq!(scope.positive_drivers, vec!["x"]);
        assert_eq!(scope.negative_drivers, vec!["y"]);
    }

    #[test]
    fn test_legacy_flat_schema() {
        let record = normalize(json!({
            "relevance": 80, "completeness": 70, "accuracy": 90, "faithfulness": 60,
            "reasoning": "solid overall",
            "strengths": ["clear"], "weaknesses": ["brief"]
        }));
        assert_eq!(record.overall_reasoning, "solid overall");
        assert_eq!(record.overall, Some(75.0));
        assert!(record.overall_derived);
        for dim in Dimension::ALL {
            assert_eq!(record.block(dim).unwrap().positive_drivers, vec!["clear"]);
        }
    }

    #[test]
    fn test_scope_adherence_alias() {
        let record = normalize(json!({"scope_adherence": 55}));
        assert_eq!(record.score(Dimension::ScopeAdherence), Some(55.0));
    }

    #[test]
    fn test_identity_fields() {
        let record = normalize(json!({"question_id": "12", "version": "optimized", "relevance": 1}));
        assert_eq!(record.question_id, Some(12));
        assert_eq!(record.version, Some(AnswerVersion::Optimized));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let inputs = [
            json!({
                "question_id": 3,
                "relevance": {"score": 90, "p": 0.9, "q": 0.95, "k": 1.0,
                    "score_drivers": {"positive": ["direct"], "negative": []},
                    "on_topic_examples": ["a"], "off_topic_examples": ["b"],
                    "quality_notes": {"shallow_flag": true, "note": "short"},
                    "reasoning": "ok"},
                "completeness": "85",
                "accuracy": "unknown",
                "faithfulness": {"score": 70, "extraneous": ["dates"]},
                "overall": 80,
                "overall_reasoning": "fine",
                "comparison": {"better": "b"}
            }),
            json!({
                "relevance": 80, "completeness": 70, "accuracy_reasoning": "x",
                "accuracy": 60, "reasoning": "legacy", "strengths": ["s"]
            }),
        ];
        for input in inputs {
            let once = normalize(input);
            let twice = normalize(once.to_value());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_full_mean_requires_all_dimensions() {
        let partial = normalize(json!({"relevance": 80}));
        assert_eq!(partial.full_mean(), None);
        let full = normalize(json!({"relevance": 80, "completeness": 60, "accuracy": 100, "faithfulness": 40}));
        assert_eq!(full.full_mean(), Some(70.0));
    }
}
