//! Append-only evaluation ledger.
//!
//! Two files live in the ledger directory:
//! - `evaluation_history.json`: `{"evaluations": [...]}`, one entry per
//!   question per scoring pass;
//! - `llm_judge_table.csv`: one row per judged dimension.
//!
//! Every write rewrites the whole file into a temp file in the same
//! directory and renames it over the old one, so a failed write leaves the
//! previous contents intact. Appends are serialized within the process;
//! concurrent writers in different processes are not coordinated.

mod judge_table;
pub mod report;

pub use judge_table::{
    JudgeTableRow, RowContext, parse_list_field, record_from_rows, serialize_list_field,
};

use crate::aggregate::{LayerScores, NormalizedWeights, WeightConfig};
use crate::error::{Result, ScorecardError};
use crate::judge::{Dimension, DimensionBlock, JudgeRecord};
use crate::model::{AnswerVersion, VersionPair};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::info;

/// Default filename for the evaluation history.
pub const HISTORY_FILENAME: &str = "evaluation_history.json";

/// Default filename for the flattened judge table.
pub const JUDGE_TABLE_FILENAME: &str = "llm_judge_table.csv";

/// Scores of one answer version in one scoring pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VersionScores {
    pub keyword_score: f64,
    /// Scope heuristic; reported but not aggregated.
    pub scope_score: f64,
    /// `None` when the semantic layer was disabled.
    pub semantic_score: Option<f64>,
    /// `None` when no judge result was attached.
    pub judge_overall: Option<f64>,
    #[serde(default)]
    pub judge_dimensions: BTreeMap<Dimension, f64>,
    #[serde(default)]
    pub judge_reasoning: String,
    pub final_score: f64,
    /// Weights actually applied after renormalization.
    pub weights: NormalizedWeights,
    /// Fallbacks and overrides that affected these scores.
    #[serde(default)]
    pub flags: Vec<String>,
}

impl VersionScores {
    pub fn layer_scores(&self) -> LayerScores {
        LayerScores {
            keyword: Some(self.keyword_score),
            semantic: self.semantic_score,
            judge: self.judge_overall,
        }
    }

    /// A score-only judge record for answers whose judge rows are gone.
    ///
    /// `None` when no judge result was stored, or when the stored judge
    /// score is the zero written for an unavailable judge.
    pub fn to_judge_record(&self, question_id: i64, version: AnswerVersion) -> Option<JudgeRecord> {
        if self.flags.iter().any(|flag| flag.starts_with("judge_unavailable")) {
            return None;
        }
        let overall = self.judge_overall?;
        let mut record = JudgeRecord {
            dimensions: self
                .judge_dimensions
                .iter()
                .map(|(dim, score)| (*dim, DimensionBlock::with_score(*score)))
                .collect(),
            overall: Some(overall),
            overall_derived: self.flags.iter().any(|flag| flag == "judge_overall_derived"),
            overall_reasoning: self.judge_reasoning.clone(),
            ..Default::default()
        };
        record.assign(question_id, version);
        Some(record)
    }
}

/// One question's scoring pass. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub timestamp: DateTime<Utc>,
    pub source_file: String,
    pub question_id: i64,
    pub question_text: String,
    pub reference_text: String,
    #[serde(default)]
    pub reference_keywords: Vec<String>,
    pub answers: VersionPair<Option<String>>,
    pub scores: VersionPair<VersionScores>,
    /// Weights as configured for each version, before renormalization.
    /// The defaults depend on which layers were active for that version.
    pub weights: VersionPair<WeightConfig>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EvaluationRecord {
    /// Final score of the optimized answer minus the original.
    pub fn improvement(&self) -> f64 {
        self.scores.optimized.final_score - self.scores.original.final_score
    }

    pub fn final_score(&self, version: AnswerVersion) -> f64 {
        self.scores.get(version).final_score
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    evaluations: Vec<EvaluationRecord>,
}

/// Aggregate view over every record in the ledger.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LedgerStatistics {
    pub total_evaluations: usize,
    pub files_evaluated: usize,
    pub avg_improvement: f64,
    pub questions_with_improvement: usize,
    pub questions_with_decline: usize,
    pub questions_unchanged: usize,
}

impl LedgerStatistics {
    pub fn from_records(records: &[EvaluationRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let files: HashSet<&str> = records.iter().map(|r| r.source_file.as_str()).collect();
        let improvements: Vec<f64> = records.iter().map(EvaluationRecord::improvement).collect();

        Self {
            total_evaluations: records.len(),
            files_evaluated: files.len(),
            avg_improvement: improvements.iter().sum::<f64>() / improvements.len() as f64,
            questions_with_improvement: improvements.iter().filter(|d| **d > 0.0).count(),
            questions_with_decline: improvements.iter().filter(|d| **d < 0.0).count(),
            questions_unchanged: improvements.iter().filter(|d| **d == 0.0).count(),
        }
    }
}

impl fmt::Display for LedgerStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total evaluations:  {}", self.total_evaluations)?;
        writeln!(f, "Files evaluated:    {}", self.files_evaluated)?;
        writeln!(f, "Avg improvement:    {:+.2}", self.avg_improvement)?;
        writeln!(f, "Improved:           {}", self.questions_with_improvement)?;
        writeln!(f, "Declined:           {}", self.questions_with_decline)?;
        write!(f, "Unchanged:          {}", self.questions_unchanged)
    }
}

/// File-backed ledger rooted at one directory.
#[derive(Debug)]
pub struct EvaluationLedger {
    history_path: PathBuf,
    judge_table_path: PathBuf,
    write_lock: Mutex<()>,
}

impl EvaluationLedger {
    /// Open a ledger directory. Nothing is created until the first write.
    pub fn open(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            history_path: dir.join(HISTORY_FILENAME),
            judge_table_path: dir.join(JUDGE_TABLE_FILENAME),
            write_lock: Mutex::new(()),
        }
    }

    pub fn history_path(&self) -> &Path {
        &self.history_path
    }

    pub fn judge_table_path(&self) -> &Path {
        &self.judge_table_path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guard protects no data, so a poisoned lock is still usable.
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one record.
    pub fn append(&self, record: EvaluationRecord) -> Result<()> {
        self.append_all(vec![record])
    }

    /// Append records as one batch: all of them are stored or none.
    pub fn append_all(&self, records: Vec<EvaluationRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.lock();

        let mut history = self.read_history()?;
        let added = records.len();
        history.evaluations.extend(records);

        let json = serde_json::to_string_pretty(&history)?;
        write_atomic(&self.history_path, json.as_bytes())?;
        info!(
            path = %self.history_path.display(),
            added,
            total = history.evaluations.len(),
            "Appended evaluation records"
        );
        Ok(())
    }

    /// Append judge table rows as one batch.
    pub fn append_judge_rows(&self, rows: &[JudgeTableRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let _guard = self.lock();

        let existing = match fs::read(&self.judge_table_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(ScorecardError::io(&self.judge_table_path, e)),
        };
        let needs_header = existing.iter().all(u8::is_ascii_whitespace);

        let mut buffer = if needs_header { Vec::new() } else { existing };
        if !buffer.is_empty() && !buffer.ends_with(b"\n") {
            buffer.push(b'\n');
        }
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(needs_header)
                .from_writer(&mut buffer);
            for row in rows {
                writer.serialize(row)?;
            }
            writer
                .flush()
                .map_err(|e| ScorecardError::io(&self.judge_table_path, e))?;
        }

        write_atomic(&self.judge_table_path, &buffer)?;
        info!(
            path = %self.judge_table_path.display(),
            added = rows.len(),
            "Appended judge table rows"
        );
        Ok(())
    }

    /// Every record, in append order. A missing file is an empty ledger.
    pub fn load_all(&self) -> Result<Vec<EvaluationRecord>> {
        Ok(self.read_history()?.evaluations)
    }

    pub fn load_judge_table(&self) -> Result<Vec<JudgeTableRow>> {
        let file = match fs::File::open(&self.judge_table_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ScorecardError::io(&self.judge_table_path, e)),
        };
        let mut reader = csv::Reader::from_reader(file);
        reader
            .deserialize()
            .map(|row| row.map_err(ScorecardError::from))
            .collect()
    }

    pub fn query_by_file(&self, source_file: &str) -> Result<Vec<EvaluationRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|record| record.source_file == source_file)
            .collect())
    }

    /// Records with `start <= timestamp <= end`.
    pub fn query_by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EvaluationRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|record| record.timestamp >= start && record.timestamp <= end)
            .collect())
    }

    pub fn statistics(&self) -> Result<LedgerStatistics> {
        Ok(LedgerStatistics::from_records(&self.load_all()?))
    }

    /// Most recent record per (source file, question), ordered by both.
    pub fn latest_per_question(&self) -> Result<Vec<EvaluationRecord>> {
        Ok(latest_per_question(self.load_all()?))
    }

    /// Wipe the whole store: history and judge table.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock();
        let json = serde_json::to_string_pretty(&HistoryFile::default())?;
        write_atomic(&self.history_path, json.as_bytes())?;
        match fs::remove_file(&self.judge_table_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ScorecardError::io(&self.judge_table_path, e)),
        }
        info!(dir = %self.history_path.display(), "Cleared evaluation ledger");
        Ok(())
    }

    fn read_history(&self) -> Result<HistoryFile> {
        let content = match fs::read_to_string(&self.history_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HistoryFile::default());
            }
            Err(e) => return Err(ScorecardError::io(&self.history_path, e)),
        };
        if content.trim().is_empty() {
            return Ok(HistoryFile::default());
        }
        serde_json::from_str(&content).map_err(|e| {
            ScorecardError::store(&self.history_path, format!("unreadable history: {}", e))
        })
    }
}

/// Keep the latest record per (source file, question). Later entries win
/// timestamp ties.
pub fn latest_per_question(records: Vec<EvaluationRecord>) -> Vec<EvaluationRecord> {
    let mut latest: BTreeMap<(String, i64), EvaluationRecord> = BTreeMap::new();
    for record in records {
        let key = (record.source_file.clone(), record.question_id);
        match latest.get(&key) {
            Some(current) if current.timestamp > record.timestamp => {}
            _ => {
                latest.insert(key, record);
            }
        }
    }
    latest.into_values().collect()
}

/// Replace `path` with `bytes` via a same-directory temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| ScorecardError::store(path, e.to_string()))?;

    let mut temp =
        NamedTempFile::new_in(dir).map_err(|e| ScorecardError::store(path, e.to_string()))?;
    temp.write_all(bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| ScorecardError::store(path, e.to_string()))?;
    temp.persist(path)
        .map_err(|e| ScorecardError::store(path, e.error.to_string()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    pub(crate) fn record(source_file: &str, question_id: i64, original: f64, optimized: f64) -> EvaluationRecord {
        let scores = |final_score: f64| VersionScores {
            keyword_score: final_score,
            scope_score: 100.0,
            final_score,
            weights: NormalizedWeights {
                keyword: 1.0,
                ..Default::default()
            },
            ..Default::default()
        };
        EvaluationRecord {
            timestamp: Utc::now(),
            source_file: source_file.to_string(),
            question_id,
            question_text: format!("question {}", question_id),
            reference_text: "work permit".to_string(),
            reference_keywords: vec!["work permit".to_string()],
            answers: VersionPair::new(Some("a".to_string()), Some("b".to_string())),
            scores: VersionPair::new(scores(original), scores(optimized)),
            weights: VersionPair::new(WeightConfig::new(1.0, 0.0, 0.0), WeightConfig::new(1.0, 0.0, 0.0)),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_judge_record_from_stored_scores() {
        let mut scores = record("run.csv", 1, 50.0, 80.0).scores.optimized;
        assert!(scores.to_judge_record(1, AnswerVersion::Optimized).is_none());

        scores.judge_overall = Some(85.0);
        scores.judge_dimensions.insert(Dimension::Relevance, 90.0);
        scores.judge_dimensions.insert(Dimension::Accuracy, 80.0);
        scores.judge_reasoning = "cites the permit".to_string();
        let judge = scores.to_judge_record(1, AnswerVersion::Optimized).unwrap();
        assert_eq!(judge.question_id, Some(1));
        assert_eq!(judge.score(Dimension::Accuracy), Some(80.0));
        assert_eq!(judge.overall, Some(85.0));
        assert_eq!(judge.combined_reasoning(), "cites the permit");

        scores.flags.push("judge_unavailable: timed out".to_string());
        assert!(scores.to_judge_record(1, AnswerVersion::Optimized).is_none());
    }

    #[test]
    fn test_statistics_reflect_append_immediately() {
        let dir = TempDir::new().unwrap();
        let ledger = EvaluationLedger::open(dir.path());
        assert_eq!(ledger.statistics().unwrap().total_evaluations, 0);

        ledger.append(record("run.csv", 1, 50.0, 80.0)).unwrap();
        let stats = ledger.statistics().unwrap();
        assert_eq!(stats.total_evaluations, 1);
        assert!((stats.avg_improvement - 30.0).abs() < 1e-9);

        ledger.append(record("run.csv", 2, 70.0, 60.0)).unwrap();
        let stats = ledger.statistics().unwrap();
        assert_eq!(stats.total_evaluations, 2);
        assert!((stats.avg_improvement - 10.0).abs() < 1e-9);
        assert_eq!(stats.questions_with_improvement, 1);
        assert_eq!(stats.questions_with_decline, 1);
    }

    #[test]
    fn test_history_file_layout() {
        let dir = TempDir::new().unwrap();
        let ledger = EvaluationLedger::open(dir.path());
        ledger.append(record("run.csv", 1, 50.0, 50.0)).unwrap();

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(ledger.history_path()).unwrap()).unwrap();
        let first = &raw["evaluations"][0];
        assert_eq!(first["question_id"], 1);
        assert_eq!(first["scores"]["optimized"]["final_score"], 50.0);
        assert!(first["scores"]["original"]["semantic_score"].is_null());
    }

    #[test]
    fn test_records_are_retained_not_replaced() {
        let dir = TempDir::new().unwrap();
        let ledger = EvaluationLedger::open(dir.path());

        let mut first = record("run.csv", 1, 40.0, 50.0);
        first.timestamp = Utc::now() - Duration::hours(1);
        let second = record("run.csv", 1, 40.0, 90.0);
        ledger.append_all(vec![first, second]).unwrap();

        assert_eq!(ledger.load_all().unwrap().len(), 2);
        let latest = ledger.latest_per_question().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].final_score(AnswerVersion::Optimized), 90.0);
    }

    #[test]
    fn test_queries() {
        let dir = TempDir::new().unwrap();
        let ledger = EvaluationLedger::open(dir.path());

        let mut old = record("a.csv", 1, 0.0, 0.0);
        old.timestamp = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
        let mut new = record("b.csv", 1, 0.0, 0.0);
        new.timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        ledger.append_all(vec![old, new]).unwrap();

        assert_eq!(ledger.query_by_file("a.csv").unwrap().len(), 1);
        assert!(ledger.query_by_file("c.csv").unwrap().is_empty());

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
        let january = ledger.query_by_date_range(start, end).unwrap();
        assert_eq!(january.len(), 1);
        assert_eq!(january[0].source_file, "a.csv");
    }

    #[test]
    fn test_clear_wipes_everything() {
        let dir = TempDir::new().unwrap();
        let ledger = EvaluationLedger::open(dir.path());
        ledger.append(record("run.csv", 1, 1.0, 2.0)).unwrap();
        ledger.clear().unwrap();

        assert!(ledger.load_all().unwrap().is_empty());
        assert!(ledger.load_judge_table().unwrap().is_empty());
    }

    #[test]
    fn test_unwritable_store_is_error_and_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "file").unwrap();

        let ledger = EvaluationLedger::open(&blocker);
        let err = ledger.append(record("run.csv", 1, 1.0, 2.0)).unwrap_err();
        assert!(matches!(err, ScorecardError::Store { .. } | ScorecardError::Io { .. }));
        assert_eq!(fs::read_to_string(&blocker).unwrap(), "file");
    }

    #[test]
    fn test_corrupt_history_is_not_silently_discarded() {
        let dir = TempDir::new().unwrap();
        let ledger = EvaluationLedger::open(dir.path());
        fs::write(ledger.history_path(), "{ not json").unwrap();

        assert!(matches!(ledger.load_all(), Err(ScorecardError::Store { .. })));
        assert!(ledger.append(record("run.csv", 1, 1.0, 2.0)).is_err());
        assert_eq!(fs::read_to_string(ledger.history_path()).unwrap(), "{ not json");
    }
}
