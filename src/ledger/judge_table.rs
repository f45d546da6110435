//! Flattened one-row-per-dimension projection of judge records.

use crate::error::{Result, ScorecardError};
use crate::judge::{Dimension, DimensionBlock, JudgeRecord, value_to_list};
use crate::model::{AnswerVersion, ReferenceSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// List-valued columns, in table order.
const LIST_COLUMNS: [&str; 11] = [
    "on_topic_examples",
    "off_topic_examples",
    "covered",
    "partially",
    "missing",
    "correct_facts",
    "incorrect_facts",
    "unverifiable_facts",
    "essential",
    "supportive",
    "extraneous",
];

/// Object-valued columns stored as raw JSON text.
const OBJECT_COLUMNS: [&str; 3] = ["quality_notes", "coverage_debug", "k_debug"];

/// Where a judged answer came from.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub timestamp: DateTime<Utc>,
    pub source_file: &'a str,
    pub reference: &'a ReferenceSpec,
    pub answer: Option<&'a str>,
    pub version: AnswerVersion,
}

/// One judged dimension of one answer. List fields hold JSON array text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeTableRow {
    pub timestamp: DateTime<Utc>,
    pub source_file: String,
    pub question_id: i64,
    pub question_text: String,
    pub reference_text: String,
    pub answer: String,
    pub version: AnswerVersion,
    pub dimension: Dimension,
    pub score: Option<f64>,
    pub p: Option<f64>,
    pub q: Option<f64>,
    pub k: Option<f64>,
    pub r: Option<f64>,
    pub g: Option<f64>,
    pub shallow_flag: Option<bool>,
    pub positive_drivers: String,
    pub negative_drivers: String,
    pub on_topic_examples: String,
    pub off_topic_examples: String,
    pub covered: String,
    pub partially: String,
    pub missing: String,
    pub correct_facts: String,
    pub incorrect_facts: String,
    pub unverifiable_facts: String,
    pub essential: String,
    pub supportive: String,
    pub extraneous: String,
    /// Raw JSON text; may be an object.
    pub quality_notes: String,
    pub coverage_debug: String,
    pub k_debug: String,
    pub reasoning: String,
    /// Record-level overall, repeated on every row of the record.
    #[serde(default)]
    pub overall: Option<f64>,
    #[serde(default)]
    pub overall_derived: bool,
    #[serde(default)]
    pub overall_reasoning: String,
    /// The whole normalized block.
    pub raw_json: String,
}

impl JudgeTableRow {
    /// One row per dimension present in the record, in dimension order.
    pub fn rows(record: &JudgeRecord, context: RowContext<'_>) -> Vec<Self> {
        record
            .dimensions
            .iter()
            .map(|(dim, block)| Self {
                overall: record.overall,
                overall_derived: record.overall_derived,
                overall_reasoning: record.overall_reasoning.clone(),
                ..Self::from_block(*dim, block, context)
            })
            .collect()
    }

    pub fn from_block(dimension: Dimension, block: &DimensionBlock, context: RowContext<'_>) -> Self {
        let list = |name: &str| serialize_list_field(&block.list_field(name));
        let raw = |name: &str| {
            block
                .raw_fields
                .get(name)
                .filter(|value| !value.is_null())
                .map(Value::to_string)
                .unwrap_or_default()
        };

        Self {
            timestamp: context.timestamp,
            source_file: context.source_file.to_string(),
            question_id: context.reference.question_id,
            question_text: context.reference.question_text.clone(),
            reference_text: context.reference.reference_text.clone(),
            answer: context.answer.unwrap_or_default().to_string(),
            version: context.version,
            dimension,
            score: block.score,
            p: block.metric("p"),
            q: block.metric("q"),
            k: block.metric("k"),
            r: block.metric("r"),
            g: block.metric("g"),
            shallow_flag: block.shallow_flag,
            positive_drivers: serialize_list_field(&block.positive_drivers),
            negative_drivers: serialize_list_field(&block.negative_drivers),
            on_topic_examples: list("on_topic_examples"),
            off_topic_examples: list("off_topic_examples"),
            covered: list("covered"),
            partially: list("partially"),
            missing: list("missing"),
            correct_facts: list("correct_facts"),
            incorrect_facts: list("incorrect_facts"),
            unverifiable_facts: list("unverifiable_facts"),
            essential: list("essential"),
            supportive: list("supportive"),
            extraneous: list("extraneous"),
            quality_notes: raw("quality_notes"),
            coverage_debug: raw("coverage_debug"),
            k_debug: raw("k_debug"),
            reasoning: block.reasoning.clone(),
            overall: None,
            overall_derived: false,
            overall_reasoning: String::new(),
            raw_json: block.to_value().to_string(),
        }
    }

    fn column(&self, name: &str) -> &str {
        match name {
            "on_topic_examples" => &self.on_topic_examples,
            "off_topic_examples" => &self.off_topic_examples,
            "covered" => &self.covered,
            "partially" => &self.partially,
            "missing" => &self.missing,
            "correct_facts" => &self.correct_facts,
            "incorrect_facts" => &self.incorrect_facts,
            "unverifiable_facts" => &self.unverifiable_facts,
            "essential" => &self.essential,
            "supportive" => &self.supportive,
            "extraneous" => &self.extraneous,
            "quality_notes" => &self.quality_notes,
            "coverage_debug" => &self.coverage_debug,
            "k_debug" => &self.k_debug,
            _ => "",
        }
    }

    /// Rebuild the dimension block from the flattened columns.
    pub fn to_dimension_block(&self) -> Result<DimensionBlock> {
        let mut block = DimensionBlock {
            score: self.score,
            positive_drivers: parse_list_field(&self.positive_drivers),
            negative_drivers: parse_list_field(&self.negative_drivers),
            reasoning: self.reasoning.clone(),
            shallow_flag: self.shallow_flag,
            ..Default::default()
        };

        for (name, value) in [("p", self.p), ("q", self.q), ("k", self.k), ("r", self.r), ("g", self.g)] {
            if let Some(value) = value {
                block.metrics.insert(name.to_string(), value);
            }
        }

        for name in LIST_COLUMNS.iter().chain(OBJECT_COLUMNS.iter()) {
            let text = self.column(name).trim();
            if text.is_empty() {
                continue;
            }
            let value = if OBJECT_COLUMNS.contains(name) {
                serde_json::from_str(text).map_err(|e| {
                    ScorecardError::Serialization(format!(
                        "column '{}' of question {} is not JSON: {}",
                        name, self.question_id, e
                    ))
                })?
            } else {
                Value::Array(parse_list_field(text).into_iter().map(Value::String).collect())
            };
            block.raw_fields.insert(name.to_string(), value);
        }

        Ok(block)
    }
}

/// Rebuild one judge record from the rows of a single judged answer.
///
/// Returns `None` for an empty slice. Rows for a different question or
/// version than the first row are an error.
pub fn record_from_rows(rows: &[&JudgeTableRow]) -> Result<Option<JudgeRecord>> {
    let Some(first) = rows.first() else {
        return Ok(None);
    };

    let mut record = JudgeRecord {
        overall: first.overall,
        overall_derived: first.overall_derived,
        overall_reasoning: first.overall_reasoning.clone(),
        ..Default::default()
    };
    for row in rows {
        if row.question_id != first.question_id || row.version != first.version {
            return Err(ScorecardError::Input(format!(
                "judge rows mix question {} {} with question {} {}",
                first.question_id, first.version, row.question_id, row.version
            )));
        }
        record.dimensions.insert(row.dimension, row.to_dimension_block()?);
    }
    if record.overall.is_none() {
        record.overall = record.mean_score();
        record.overall_derived = record.overall.is_some();
    }
    record.assign(first.question_id, first.version);
    Ok(Some(record))
}

/// Encode a list for a table cell. Empty lists become an empty cell.
pub fn serialize_list_field(items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    Value::Array(items.iter().cloned().map(Value::String).collect()).to_string()
}

/// Decode a table cell into a list; plain text becomes a single item.
pub fn parse_list_field(cell: &str) -> Vec<String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(cell) {
        Ok(value) => value_to_list(&value),
        Err(_) => vec![cell.to_string()],
    }
}
