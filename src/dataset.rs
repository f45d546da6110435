//! Tabular answer datasets.
//!
//! A dataset is a CSV file with one row per question: an id, the question,
//! the reference key, and the two answer versions. Header spellings vary
//! between exports, so columns are located through a [`TermResolver`]
//! (exact names first, then fragment heuristics).

use crate::error::{Result, ScorecardError};
use crate::model::{AnswerVersion, ReferenceSpec, VersionPair};
use crate::resolver::{MatchKind, TermEntry, TermResolver};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const QUESTION_ID: &str = "question_id";
pub const QUESTION_TEXT: &str = "question_text";
pub const REFERENCE_TEXT: &str = "reference_text";
pub const ORIGINAL_ANSWER: &str = "original_answer";
pub const OPTIMIZED_ANSWER: &str = "optimized_answer";

const MANDATORY: [&str; 5] = [
    QUESTION_ID,
    QUESTION_TEXT,
    REFERENCE_TEXT,
    ORIGINAL_ANSWER,
    OPTIMIZED_ANSWER,
];

/// Column resolution table shared by every loader.
pub fn header_resolver() -> TermResolver {
    TermResolver::new(vec![
        TermEntry::new(QUESTION_ID)
            .alias("序號")
            .alias("編號")
            .alias("id")
            .alias("qid")
            .fragments(["序號"])
            .fragments(["編號"])
            .fragments(["question", "id"]),
        TermEntry::new(QUESTION_TEXT)
            .alias("測試問題")
            .alias("問題")
            .alias("question")
            .fragments(["問題"])
            .fragments(["question"]),
        TermEntry::new(REFERENCE_TEXT)
            .alias("應回答之詞彙")
            .alias("回答重點")
            .alias("reference")
            .fragments(["詞彙"])
            .fragments(["重點"])
            .fragments(["reference"])
            .fragments(["keyword"]),
        TermEntry::new(ORIGINAL_ANSWER)
            .alias("ANSWER_ORIGINAL")
            .alias("original")
            .fragments(["向量", "原始"])
            .fragments(["原始"])
            .fragments(["original"]),
        TermEntry::new(OPTIMIZED_ANSWER)
            .alias("ANSWER_OPTIMIZED")
            .alias("optimized")
            .fragments(["智慧", "彙整"])
            .fragments(["文檔", "彙整"])
            .fragments(["彙整"])
            .fragments(["優化"])
            .fragments(["optimized"]),
    ])
}

/// One question with both candidate answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub reference: ReferenceSpec,
    /// `None` where the cell was blank.
    pub answers: VersionPair<Option<String>>,
}

impl DatasetItem {
    pub fn new(
        reference: ReferenceSpec,
        original: Option<String>,
        optimized: Option<String>,
    ) -> Self {
        Self {
            reference,
            answers: VersionPair::new(original, optimized),
        }
    }

    pub fn question_id(&self) -> i64 {
        self.reference.question_id
    }

    pub fn answer(&self, version: AnswerVersion) -> Option<&str> {
        self.answers.get(version).as_deref()
    }
}

/// Which header fed each field, for display.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub question_id: String,
    pub question_text: String,
    pub reference_text: String,
    pub original_answer: String,
    pub optimized_answer: String,
}

/// A loaded evaluation dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    /// Usually the source file name; recorded in the ledger.
    pub name: String,
    pub items: Vec<DatasetItem>,
    #[serde(default)]
    pub columns: ColumnMapping,
}

impl Dataset {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            items: Vec::new(),
            columns: ColumnMapping::default(),
        }
    }

    pub fn add_item(&mut self, item: DatasetItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get a subset of items (for quick runs).
    pub fn take(&self, n: usize) -> Self {
        Self {
            name: self.name.clone(),
            items: self.items.iter().take(n).cloned().collect(),
            columns: self.columns.clone(),
        }
    }

    pub fn get(&self, question_id: i64) -> Option<&DatasetItem> {
        self.items.iter().find(|item| item.question_id() == question_id)
    }

    /// Load from a CSV file; the dataset is named after the file.
    pub fn load_csv(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| ScorecardError::io(path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let dataset = Self::from_csv_reader(&name, file)?;
        info!(path = %path.display(), items = dataset.len(), "Loaded dataset");
        Ok(dataset)
    }

    /// Parse CSV from any reader.
    pub fn from_csv_reader<R: Read>(name: &str, reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        let resolved = header_resolver().resolve_all(&headers);

        let mut indices = [0usize; 5];
        for (slot, column) in indices.iter_mut().zip(MANDATORY) {
            let Some((index, kind)) = resolved.get(column) else {
                return Err(ScorecardError::MissingColumn {
                    column: column.to_string(),
                    available: headers.join(", "),
                });
            };
            if *kind == MatchKind::Heuristic {
                debug!(column, header = %headers[*index], "Column resolved by heuristic");
            }
            *slot = *index;
        }
        let [id_col, question_col, reference_col, original_col, optimized_col] = indices;

        let mut dataset = Dataset::new(name);
        dataset.columns = ColumnMapping {
            question_id: headers[id_col].clone(),
            question_text: headers[question_col].clone(),
            reference_text: headers[reference_col].clone(),
            original_answer: headers[original_col].clone(),
            optimized_answer: headers[optimized_col].clone(),
        };

        for (row_index, record) in reader.records().enumerate() {
            let record = record?;
            let cell = |index: usize| record.get(index).unwrap_or("").trim();
            // Header is line 1.
            let line = row_index + 2;

            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }

            let question_id = parse_question_id(cell(id_col)).ok_or_else(|| {
                ScorecardError::Input(format!(
                    "{}: line {} has invalid question id '{}'",
                    name,
                    line,
                    cell(id_col)
                ))
            })?;

            if dataset.get(question_id).is_some() {
                warn!(question_id, line, "Duplicate question id; keeping both rows");
            }

            dataset.add_item(DatasetItem::new(
                ReferenceSpec::new(question_id, cell(question_col), cell(reference_col)),
                non_blank(cell(original_col)),
                non_blank(cell(optimized_col)),
            ));
        }

        Ok(dataset)
    }
}

/// Accepts integer ids and spreadsheet floats such as "3.0".
fn parse_question_id(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    let float = raw.parse::<f64>().ok()?;
    (float.is_finite() && float.fract() == 0.0).then_some(float as i64)
}

fn non_blank(cell: &str) -> Option<String> {
    let cell = cell.trim();
    (!cell.is_empty() && !cell.eq_ignore_ascii_case("nan")).then(|| cell.to_string())
}

/// List CSV files under a directory, sorted by path.
pub fn discover_datasets(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ScorecardError::Input(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }

    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    Ok(found)
}

/// Small built-in dataset for trying the pipeline without input files.
pub fn sample_dataset() -> Dataset {
    let mut dataset = Dataset::new("sample");

    dataset.add_item(DatasetItem::new(
        ReferenceSpec::new(
            1,
            "What is required before welding on site?",
            "must mention work permit, fire zone",
        ),
        Some("A work permit must be issued before any welding starts.".to_string()),
        Some(
            "Welding needs an approved work permit, and the fire zone must be isolated first."
                .to_string(),
        ),
    ));

    dataset.add_item(DatasetItem::new(
        ReferenceSpec::new(
            2,
            "Who checks hot work at the end of a shift?",
            "site supervisor, hot work",
        ),
        Some("The site supervisor inspects hot work areas 30 minutes after the shift, at 18 and 19 hours, on 2024-01-05.".to_string()),
        Some("The site supervisor inspects all hot work areas before leaving.".to_string()),
    ));

    dataset.add_item(DatasetItem::new(
        ReferenceSpec::new(3, "承攬商進場前需要完成什麼？", "1.承攬商 2.安全衛生 教育訓練"),
        None,
        Some("承攬商進場前必須完成安全衛生教育訓練。".to_string()),
    ));

    dataset
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_english_headers() {
        let csv = "question_id,question,reference,original,optimized\n\
                   1,What first?,work permit,Get a permit,Get a work permit\n\
                   2.0,Then?,fire zone,,Check the fire zone\n";
        let dataset = Dataset::from_csv_reader("run.csv", csv.as_bytes()).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.items[1].question_id(), 2);
        assert_eq!(dataset.items[1].answer(AnswerVersion::Original), None);
        assert_eq!(
            dataset.items[1].answer(AnswerVersion::Optimized),
            Some("Check the fire zone")
        );
        assert_eq!(dataset.columns.reference_text, "reference");
    }

    #[test]
    fn test_load_chinese_headers_by_heuristic() {
        let csv = "序號,測試資料,測試問題,應回答之詞彙,向量原始版回答,智慧文檔彙整版回答\n\
                   7,doc,動火作業要做什麼？,動火作業 許可,需申請許可,動火作業需申請許可\n";
        let dataset = Dataset::from_csv_reader("chinese.csv", csv.as_bytes()).unwrap();

        let item = dataset.get(7).unwrap();
        assert_eq!(item.reference.question_text, "動火作業要做什麼？");
        assert_eq!(item.reference.reference_text, "動火作業 許可");
        assert_eq!(dataset.columns.original_answer, "向量原始版回答");
        assert_eq!(dataset.columns.optimized_answer, "智慧文檔彙整版回答");
    }

    #[test]
    fn test_missing_mandatory_column_is_error() {
        let csv = "question_id,question,reference,original\n1,q,r,a\n";
        let err = Dataset::from_csv_reader("bad.csv", csv.as_bytes()).unwrap_err();
        match err {
            ScorecardError::MissingColumn { column, available } => {
                assert_eq!(column, OPTIMIZED_ANSWER);
                assert!(available.contains("original"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_question_id_is_error() {
        let csv = "question_id,question,reference,original,optimized\nabc,q,r,a,b\n";
        let err = Dataset::from_csv_reader("bad.csv", csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ScorecardError::Input(msg) if msg.contains("line 2")));
    }

    #[test]
    fn test_blank_rows_skipped() {
        let csv = "question_id,question,reference,original,optimized\n1,q,r,a,b\n,,,,\n";
        let dataset = Dataset::from_csv_reader("run.csv", csv.as_bytes()).unwrap();
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn test_parse_question_id() {
        assert_eq!(parse_question_id("12"), Some(12));
        assert_eq!(parse_question_id(" 3.0 "), Some(3));
        assert_eq!(parse_question_id("3.5"), None);
        assert_eq!(parse_question_id(""), None);
    }

    #[test]
    fn test_load_csv_and_discover() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("runs");
        std::fs::create_dir_all(&nested).unwrap();
        let path = nested.join("batch.CSV");
        std::fs::write(
            &path,
            "\u{feff}question_id,question,reference,original,optimized\n1,q,r,a,b\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let found = discover_datasets(dir.path()).unwrap();
        assert_eq!(found, vec![path.clone()]);

        let dataset = Dataset::load_csv(&path).unwrap();
        assert_eq!(dataset.name, "batch.CSV");
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn test_sample_dataset() {
        let dataset = sample_dataset();
        assert_eq!(dataset.len(), 3);
        assert!(dataset.items.iter().all(|i| !i.reference.reference_text.is_empty()));
        assert!(dataset.get(3).unwrap().answer(AnswerVersion::Original).is_none());
    }
}
