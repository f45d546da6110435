//! Evaluation session: everything one scoring run needs, passed explicitly.
//!
//! A session owns the scorers, the keyword cache and the judge records
//! collected so far. It is created per dataset and dropped when the run
//! ends; only the ledger outlives it.

use crate::aggregate::{DimensionWeights, LayerScores, WeightConfig, aggregate, judge_overall};
use crate::config::{Config, ScoringConfig};
use crate::dataset::DatasetItem;
use crate::embeddings::build_embedder;
use crate::error::Result;
use crate::judge::{
    Dimension, JudgeRecord, LlmJudge, ParseFailure, ValidationConfig, ValidationReport,
    parse_judge_text, validate,
};
use crate::ledger::{
    EvaluationLedger, EvaluationRecord, JudgeTableRow, RowContext, VersionScores, latest_per_question,
    record_from_rows,
};
use crate::model::{AnswerVersion, ReferenceSpec, VersionPair};
use crate::scoring::{
    CoverageReason, CoverageResult, KeywordCache, KeywordExtractor, KeywordSet, LexicalScorer,
    ScopeResult, ScopeScorer, SemanticResult, SemanticScorer, SynonymTable,
};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Deterministic layer results for one answer.
#[derive(Debug, Clone)]
pub struct AnswerEvaluation {
    pub keywords: Arc<KeywordSet>,
    pub coverage: CoverageResult,
    pub scope: ScopeResult,
    /// `None` when the semantic layer is disabled.
    pub semantic: Option<SemanticResult>,
}

/// Both versions of one question.
#[derive(Debug, Clone)]
pub struct ItemEvaluation {
    pub question_id: i64,
    pub answers: VersionPair<AnswerEvaluation>,
}

/// Outcome of handing judge text to the session.
#[derive(Debug, Clone)]
pub enum JudgeIngest {
    /// Stored; the report may still carry warnings or forced errors.
    Accepted(ValidationReport),
    /// Validation errors and no override; nothing stored.
    Rejected(ValidationReport),
    /// No strategy could decode the text; nothing stored.
    Unparsable(ParseFailure),
}

impl JudgeIngest {
    pub fn is_accepted(&self) -> bool {
        matches!(self, JudgeIngest::Accepted(_))
    }
}

/// Counts from an automated judge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JudgeRunSummary {
    pub judged: usize,
    pub rejected: usize,
    pub failed: usize,
    pub skipped: usize,
}

type AnswerKey = (i64, AnswerVersion);

pub struct EvaluationSession {
    source_file: String,
    extractor: KeywordExtractor,
    keyword_cache: KeywordCache,
    lexical: LexicalScorer,
    scope: ScopeScorer,
    semantic: SemanticScorer,
    layer_weights: Option<WeightConfig>,
    judge_dimensions: Vec<Dimension>,
    dimension_weights: DimensionWeights,
    validation: ValidationConfig,
    judge_records: HashMap<AnswerKey, JudgeRecord>,
    /// Records reloaded from the ledger; already on disk.
    restored: HashSet<AnswerKey>,
    judge_failures: HashMap<AnswerKey, String>,
}

impl EvaluationSession {
    pub fn new(source_file: impl Into<String>, scoring: &ScoringConfig, semantic: SemanticScorer) -> Self {
        let connectives = if scoring.explanatory_connectives.is_empty() {
            crate::scoring::scope::DEFAULT_CONNECTIVES
                .iter()
                .map(|c| c.to_string())
                .collect()
        } else {
            scoring.explanatory_connectives.clone()
        };

        Self {
            source_file: source_file.into(),
            extractor: KeywordExtractor::with_extra_terms(scoring.extra_gazetteer.iter().cloned()),
            keyword_cache: KeywordCache::new(),
            lexical: LexicalScorer::new(SynonymTable::with_extra(&scoring.synonyms)),
            scope: ScopeScorer::new(connectives),
            semantic,
            layer_weights: scoring.layer_weights.clone(),
            judge_dimensions: scoring.judge_dimensions.clone(),
            dimension_weights: scoring.dimension_weights.clone(),
            validation: ValidationConfig::with_tolerance(scoring.overall_tolerance)
                .strict(scoring.strict_validation),
            judge_records: HashMap::new(),
            restored: HashSet::new(),
            judge_failures: HashMap::new(),
        }
    }

    /// Build scorers from configuration, including the embedding backend.
    pub fn from_config(source_file: impl Into<String>, config: &Config) -> Result<Self> {
        let embedder = build_embedder(&config.embedding)?;
        Ok(Self::new(source_file, &config.scoring, SemanticScorer::new(embedder)))
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn semantic_enabled(&self) -> bool {
        self.semantic.is_enabled()
    }

    pub fn validation(&self) -> &ValidationConfig {
        &self.validation
    }

    pub fn keywords(&self, reference: &ReferenceSpec) -> Arc<KeywordSet> {
        self.keyword_cache
            .get_or_extract(&self.extractor, &reference.reference_text)
    }

    /// Run the deterministic layers for one answer.
    pub fn evaluate_answer(&self, reference: &ReferenceSpec, answer: Option<&str>) -> AnswerEvaluation {
        let keywords = self.keywords(reference);
        let coverage = self.lexical.score(&keywords, answer);
        let scope = self.scope.score(&keywords, answer);
        let semantic = self.semantic.score(&reference.reference_text, answer);

        debug!(
            question_id = reference.question_id,
            keyword = coverage.score,
            scope = scope.score,
            semantic = semantic.as_ref().map(|s| s.score),
            "Scored answer"
        );

        AnswerEvaluation {
            keywords,
            coverage,
            scope,
            semantic,
        }
    }

    pub fn evaluate_item(&self, item: &DatasetItem) -> ItemEvaluation {
        let reference = &item.reference;
        ItemEvaluation {
            question_id: reference.question_id,
            answers: VersionPair::new(
                self.evaluate_answer(reference, item.answer(AnswerVersion::Original)),
                self.evaluate_answer(reference, item.answer(AnswerVersion::Optimized)),
            ),
        }
    }

    /// Score every item in parallel. Output order matches input order.
    pub fn evaluate_all(&self, items: &[DatasetItem]) -> Vec<ItemEvaluation> {
        items.par_iter().map(|item| self.evaluate_item(item)).collect()
    }

    /// Parse, validate and store judge text for one answer.
    ///
    /// Errors block storage unless `force` is set; warnings never do.
    pub fn attach_judge_text(
        &mut self,
        question_id: i64,
        version: AnswerVersion,
        text: &str,
        force: bool,
    ) -> JudgeIngest {
        match parse_judge_text(text) {
            Ok(mut record) => {
                if let Some(stated) = record.question_id.filter(|id| *id != question_id) {
                    warn!(stated, question_id, "Judge text names a different question; using the caller's id");
                }
                record.assign(question_id, version);
                self.attach_judge_record(record, force)
            }
            Err(failure) => {
                warn!(question_id, %version, reason = %failure.reason, "Judge text rejected as unparsable");
                JudgeIngest::Unparsable(failure)
            }
        }
    }

    /// Validate and store an already-normalized record.
    ///
    /// The record must carry its question id and version.
    pub fn attach_judge_record(&mut self, record: JudgeRecord, force: bool) -> JudgeIngest {
        let report = validate(&record, &self.validation);
        for finding in &report.warnings {
            debug!(question_id = ?record.question_id, %finding, "Judge warning");
        }

        let (Some(question_id), Some(version)) = (record.question_id, record.version) else {
            warn!("Judge record without question id or version cannot be stored");
            return JudgeIngest::Rejected(report);
        };

        if report.blocks_persistence(force) {
            warn!(
                question_id,
                %version,
                errors = %report.error_summary(),
                "Judge record rejected by validation"
            );
            return JudgeIngest::Rejected(report);
        }
        if report.has_errors() {
            warn!(question_id, %version, "Storing judge record despite validation errors");
        }

        let key = (question_id, version);
        self.judge_failures.remove(&key);
        self.restored.remove(&key);
        self.judge_records.insert(key, record);
        JudgeIngest::Accepted(report)
    }

    /// Note that the automated judge could not score an answer.
    pub fn record_judge_failure(&mut self, question_id: i64, version: AnswerVersion, reason: impl Into<String>) {
        self.judge_failures.insert((question_id, version), reason.into());
    }

    /// Reload judge results that earlier runs stored for this source file.
    ///
    /// Judge table rows are preferred, taking the newest batch per answer;
    /// history scores stand in for answers that have no rows. Restored
    /// records were validated when first stored and are not re-validated.
    /// Records already attached to this session are kept. Returns how many
    /// answers were restored.
    pub fn restore_judges(&mut self, ledger: &EvaluationLedger) -> Result<usize> {
        let table = ledger.load_judge_table()?;
        let mut batches: HashMap<AnswerKey, (DateTime<Utc>, Vec<&JudgeTableRow>)> = HashMap::new();
        for row in table.iter().filter(|row| row.source_file == self.source_file) {
            let batch = batches
                .entry((row.question_id, row.version))
                .or_insert_with(|| (row.timestamp, Vec::new()));
            if row.timestamp > batch.0 {
                *batch = (row.timestamp, Vec::new());
            }
            if row.timestamp == batch.0 {
                batch.1.push(row);
            }
        }

        let mut found: HashMap<AnswerKey, JudgeRecord> = HashMap::new();
        for (key, (_, rows)) in batches {
            match record_from_rows(&rows) {
                Ok(Some(record)) => {
                    found.insert(key, record);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(question_id = key.0, version = %key.1, error = %e, "Skipping unreadable judge rows");
                }
            }
        }

        for record in latest_per_question(ledger.query_by_file(&self.source_file)?) {
            for version in AnswerVersion::ALL {
                let key = (record.question_id, version);
                if found.contains_key(&key) {
                    continue;
                }
                if let Some(judge) = record.scores.get(version).to_judge_record(record.question_id, version) {
                    found.insert(key, judge);
                }
            }
        }

        let mut count = 0;
        for (key, record) in found {
            if self.judge_records.contains_key(&key) {
                continue;
            }
            self.judge_failures.remove(&key);
            self.restored.insert(key);
            self.judge_records.insert(key, record);
            count += 1;
        }

        if count > 0 {
            info!(source_file = %self.source_file, restored = count, "Restored judge results from the ledger");
        }
        Ok(count)
    }

    pub fn judge_record(&self, question_id: i64, version: AnswerVersion) -> Option<&JudgeRecord> {
        self.judge_records.get(&(question_id, version))
    }

    pub fn judge_count(&self) -> usize {
        self.judge_records.len()
    }

    /// Call the automated judge for every answer that has no record yet.
    ///
    /// Call failures are downgraded to a recorded failure; the run continues.
    pub async fn judge_all(&mut self, judge: &LlmJudge, items: &[DatasetItem]) -> JudgeRunSummary {
        let mut summary = JudgeRunSummary::default();

        for item in items {
            for version in AnswerVersion::ALL {
                let question_id = item.question_id();
                if self.judge_record(question_id, version).is_some() {
                    summary.skipped += 1;
                    continue;
                }

                match judge
                    .judge_answer(&item.reference, item.answer(version), version)
                    .await
                {
                    Ok(record) => {
                        if self.attach_judge_record(record, false).is_accepted() {
                            summary.judged += 1;
                        } else {
                            summary.rejected += 1;
                        }
                    }
                    Err(e) => {
                        warn!(question_id, %version, error = %e, "Judge unavailable; judge layer set to 0");
                        self.record_judge_failure(question_id, version, e.to_string());
                        summary.failed += 1;
                    }
                }
            }
        }

        info!(
            judged = summary.judged,
            rejected = summary.rejected,
            failed = summary.failed,
            skipped = summary.skipped,
            "Judge pass complete"
        );
        summary
    }

    /// Fold layer results and any judge record into stored scores.
    pub fn version_scores(
        &self,
        question_id: i64,
        version: AnswerVersion,
        evaluation: &AnswerEvaluation,
    ) -> VersionScores {
        let mut flags = Vec::new();
        let key = (question_id, version);

        match evaluation.coverage.detail.reason {
            Some(CoverageReason::NoKeywords) => flags.push("keyword_empty_reference".to_string()),
            Some(CoverageReason::EmptyAnswer) => flags.push("keyword_empty_answer".to_string()),
            None => {}
        }

        let semantic_score = evaluation.semantic.as_ref().map(|result| {
            if let Some(error) = &result.detail.error {
                flags.push(format!("semantic_unavailable: {}", error));
            }
            result.score
        });

        let mut judge_dimensions = std::collections::BTreeMap::new();
        let mut judge_reasoning = String::new();
        let judge_score = match self.judge_records.get(&key) {
            Some(record) => {
                for dim in Dimension::ALL {
                    if let Some(score) = record.score(dim) {
                        judge_dimensions.insert(dim, score);
                    }
                }
                judge_reasoning = record.combined_reasoning();
                if record.overall_derived {
                    flags.push("judge_overall_derived".to_string());
                }
                judge_overall(record, &self.judge_dimensions, &self.dimension_weights)
            }
            None => self.judge_failures.get(&key).map(|reason| {
                flags.push(format!("judge_unavailable: {}", reason));
                0.0
            }),
        };

        let layers = LayerScores {
            keyword: Some(evaluation.coverage.score),
            semantic: semantic_score,
            judge: judge_score,
        };
        let weights = self
            .layer_weights
            .clone()
            .unwrap_or_else(|| WeightConfig::default_for(layers.active()));
        let aggregation = aggregate(&layers, &weights);

        VersionScores {
            keyword_score: evaluation.coverage.score,
            scope_score: evaluation.scope.score,
            semantic_score,
            judge_overall: judge_score,
            judge_dimensions,
            judge_reasoning,
            final_score: aggregation.final_score,
            weights: aggregation.weights,
            flags,
        }
    }

    /// Weights as configured for a set of version scores.
    fn configured_weights(&self, scores: &VersionScores) -> WeightConfig {
        self.layer_weights
            .clone()
            .unwrap_or_else(|| WeightConfig::default_for(scores.layer_scores().active()))
    }

    /// Ledger records for the evaluated items, in item order.
    pub fn build_records(&self, items: &[DatasetItem], evaluations: &[ItemEvaluation]) -> Vec<EvaluationRecord> {
        let timestamp = Utc::now();

        items
            .iter()
            .zip(evaluations)
            .map(|(item, evaluation)| {
                let reference = &item.reference;
                let scores = VersionPair::new(
                    self.version_scores(
                        reference.question_id,
                        AnswerVersion::Original,
                        &evaluation.answers.original,
                    ),
                    self.version_scores(
                        reference.question_id,
                        AnswerVersion::Optimized,
                        &evaluation.answers.optimized,
                    ),
                );

                let mut metadata = Map::new();
                metadata.insert(
                    "semantic_backend".to_string(),
                    self.semantic.backend().map_or(Value::Null, Value::from),
                );
                metadata.insert(
                    "judge_dimensions".to_string(),
                    Value::from(
                        self.judge_dimensions
                            .iter()
                            .map(|d| d.key())
                            .collect::<Vec<_>>(),
                    ),
                );

                EvaluationRecord {
                    timestamp,
                    source_file: self.source_file.clone(),
                    question_id: reference.question_id,
                    question_text: reference.question_text.clone(),
                    reference_text: reference.reference_text.clone(),
                    reference_keywords: evaluation.answers.original.keywords.terms().to_vec(),
                    answers: item.answers.clone(),
                    weights: VersionPair::new(
                        self.configured_weights(&scores.original),
                        self.configured_weights(&scores.optimized),
                    ),
                    scores,
                    metadata,
                }
            })
            .collect()
    }

    /// Judge table rows for judge records attached in this session, in item
    /// order. Restored records already have rows and are left out.
    pub fn judge_rows(&self, items: &[DatasetItem]) -> Vec<JudgeTableRow> {
        let timestamp = Utc::now();
        let mut rows = Vec::new();
        for item in items {
            for version in AnswerVersion::ALL {
                let key = (item.question_id(), version);
                if self.restored.contains(&key) {
                    continue;
                }
                let Some(record) = self.judge_records.get(&key) else {
                    continue;
                };
                let context = RowContext {
                    timestamp,
                    source_file: &self.source_file,
                    reference: &item.reference,
                    answer: item.answer(version),
                    version,
                };
                rows.extend(JudgeTableRow::rows(record, context));
            }
        }
        rows
    }

    /// Append judge rows, then records, to the ledger.
    ///
    /// Rows go first: if the history append then fails, the judge results
    /// are still on disk and `restore_judges` picks them up next run.
    pub fn persist(
        &self,
        ledger: &EvaluationLedger,
        records: Vec<EvaluationRecord>,
        judge_rows: &[JudgeTableRow],
    ) -> Result<()> {
        ledger.append_judge_rows(judge_rows)?;
        if let Err(e) = ledger.append_all(records) {
            if !judge_rows.is_empty() {
                warn!(
                    source_file = %self.source_file,
                    rows = judge_rows.len(),
                    "Judge rows were written but the history append failed"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Mean scores of one version across a run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LayerMeans {
    pub keyword: f64,
    pub scope: f64,
    /// Over answers where the layer was active.
    pub semantic: Option<f64>,
    pub judge: Option<f64>,
    pub final_score: f64,
    /// Share of answers with a final score of 80 or more.
    pub share_above_80: f64,
}

impl LayerMeans {
    fn from_scores<'a>(scores: impl Iterator<Item = &'a VersionScores> + Clone) -> Self {
        let count = scores.clone().count();
        if count == 0 {
            return Self::default();
        }
        let n = count as f64;
        Self {
            keyword: scores.clone().map(|s| s.keyword_score).sum::<f64>() / n,
            scope: scores.clone().map(|s| s.scope_score).sum::<f64>() / n,
            semantic: mean(scores.clone().filter_map(|s| s.semantic_score)),
            judge: mean(scores.clone().filter_map(|s| s.judge_overall)),
            final_score: scores.clone().map(|s| s.final_score).sum::<f64>() / n,
            share_above_80: scores.filter(|s| s.final_score >= 80.0).count() as f64 / n,
        }
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Run-level summary over a set of records.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSummary {
    pub questions: usize,
    pub means: VersionPair<LayerMeans>,
    pub mean_improvement: f64,
    pub mean_keyword_improvement: f64,
    /// Share of questions that improved by 10 points or more.
    pub share_improved: f64,
    /// Share of questions whose final score dropped.
    pub share_declined: f64,
}

impl SessionSummary {
    pub fn from_records(records: &[EvaluationRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let n = records.len() as f64;
        let improvements: Vec<f64> = records.iter().map(EvaluationRecord::improvement).collect();

        Self {
            questions: records.len(),
            means: VersionPair::new(
                LayerMeans::from_scores(records.iter().map(|r| &r.scores.original)),
                LayerMeans::from_scores(records.iter().map(|r| &r.scores.optimized)),
            ),
            mean_improvement: improvements.iter().sum::<f64>() / n,
            mean_keyword_improvement: records
                .iter()
                .map(|r| r.scores.optimized.keyword_score - r.scores.original.keyword_score)
                .sum::<f64>()
                / n,
            share_improved: improvements.iter().filter(|d| **d >= 10.0).count() as f64 / n,
            share_declined: improvements.iter().filter(|d| **d < 0.0).count() as f64 / n,
        }
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let optional = |value: Option<f64>| value.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v));

        writeln!(f, "Questions: {}", self.questions)?;
        writeln!(f, "{:<12} {:>10} {:>10}", "layer", "original", "optimized")?;
        let (a, b) = (&self.means.original, &self.means.optimized);
        writeln!(f, "{:<12} {:>10.2} {:>10.2}", "keyword", a.keyword, b.keyword)?;
        writeln!(f, "{:<12} {:>10.2} {:>10.2}", "scope", a.scope, b.scope)?;
        writeln!(f, "{:<12} {:>10} {:>10}", "semantic", optional(a.semantic), optional(b.semantic))?;
        writeln!(f, "{:<12} {:>10} {:>10}", "judge", optional(a.judge), optional(b.judge))?;
        writeln!(f, "{:<12} {:>10.2} {:>10.2}", "final", a.final_score, b.final_score)?;
        writeln!(
            f,
            "{:<12} {:>9.1}% {:>9.1}%",
            "final >= 80",
            a.share_above_80 * 100.0,
            b.share_above_80 * 100.0
        )?;
        writeln!(f, "Mean improvement:         {:+.2}", self.mean_improvement)?;
        writeln!(f, "Mean keyword improvement: {:+.2}", self.mean_keyword_improvement)?;
        writeln!(f, "Improved by 10+:          {:.1}%", self.share_improved * 100.0)?;
        write!(f, "Declined:                 {:.1}%", self.share_declined * 100.0)
    }
}
