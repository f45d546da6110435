//! Tabular export of evaluation records.

use super::{EvaluationRecord, write_atomic};
use crate::error::{Result, ScorecardError};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// One exported row: both versions side by side plus deltas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub timestamp: String,
    pub source_file: String,
    pub question_id: i64,
    pub question_text: String,
    pub original_keyword: f64,
    pub original_scope: f64,
    pub original_semantic: Option<f64>,
    pub original_judge: Option<f64>,
    pub original_final: f64,
    pub optimized_keyword: f64,
    pub optimized_scope: f64,
    pub optimized_semantic: Option<f64>,
    pub optimized_judge: Option<f64>,
    pub optimized_final: f64,
    pub keyword_improvement: f64,
    pub semantic_improvement: Option<f64>,
    pub judge_improvement: Option<f64>,
    pub final_improvement: f64,
    pub original_weight_keyword: f64,
    pub original_weight_semantic: f64,
    pub original_weight_judge: f64,
    pub optimized_weight_keyword: f64,
    pub optimized_weight_semantic: f64,
    pub optimized_weight_judge: f64,
    /// Fallback flags from both versions, `;`-separated.
    pub flags: String,
}

impl ReportRow {
    pub fn from_record(record: &EvaluationRecord) -> Self {
        let original = &record.scores.original;
        let optimized = &record.scores.optimized;
        let delta = |a: Option<f64>, b: Option<f64>| Some(b? - a?);

        let flags: Vec<String> = original
            .flags
            .iter()
            .map(|flag| format!("original:{}", flag))
            .chain(optimized.flags.iter().map(|flag| format!("optimized:{}", flag)))
            .collect();

        Self {
            timestamp: record.timestamp.to_rfc3339(),
            source_file: record.source_file.clone(),
            question_id: record.question_id,
            question_text: record.question_text.clone(),
            original_keyword: original.keyword_score,
            original_scope: original.scope_score,
            original_semantic: original.semantic_score,
            original_judge: original.judge_overall,
            original_final: original.final_score,
            optimized_keyword: optimized.keyword_score,
            optimized_scope: optimized.scope_score,
            optimized_semantic: optimized.semantic_score,
            optimized_judge: optimized.judge_overall,
            optimized_final: optimized.final_score,
            keyword_improvement: optimized.keyword_score - original.keyword_score,
            semantic_improvement: delta(original.semantic_score, optimized.semantic_score),
            judge_improvement: delta(original.judge_overall, optimized.judge_overall),
            final_improvement: record.improvement(),
            original_weight_keyword: record.weights.original.keyword,
            original_weight_semantic: record.weights.original.semantic,
            original_weight_judge: record.weights.original.judge,
            optimized_weight_keyword: record.weights.optimized.keyword,
            optimized_weight_semantic: record.weights.optimized.semantic,
            optimized_weight_judge: record.weights.optimized.judge,
            flags: flags.join(";"),
        }
    }
}

/// Render records as CSV text.
pub fn to_csv(records: &[EvaluationRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(ReportRow::from_record(record))?;
    }
    writer
        .into_inner()
        .map_err(|e| ScorecardError::Serialization(e.to_string()))
}

/// Write records to a CSV report. Returns the number of rows written.
pub fn export_csv(records: &[EvaluationRecord], path: &Path) -> Result<usize> {
    let bytes = to_csv(records)?;
    write_atomic(path, &bytes)?;
    info!(path = %path.display(), rows = records.len(), "Exported report");
    Ok(records.len())
}
