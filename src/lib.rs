//! RAG Scorecard - scores retrieval-augmented answers against a reference key.
//!
//! Each question carries a reference key (the points a good answer must make)
//! and two candidate answers, an original and an optimized version. Every
//! answer is scored by up to three layers and the layer scores are folded into
//! one final score per answer.
//!
//! # Overview
//!
//! 1. **Keyword coverage**: key terms are extracted from the reference and
//!    matched against the answer, with synonym families.
//! 2. **Semantic similarity**: cosine similarity of reference and answer
//!    embeddings (optional).
//! 3. **LLM judge**: a four-dimension rubric scored by an LLM, either called
//!    automatically or pasted in by hand (optional).
//!
//! A scope check reports extra numbers, dates and explanatory padding beside
//! the layers. Results are appended to a JSON ledger on disk.
//!
//! # Quick Start
//!
//! ```no_run
//! use rag_scorecard::{
//!     config::Config,
//!     dataset::Dataset,
//!     ledger::EvaluationLedger,
//!     session::{EvaluationSession, SessionSummary},
//! };
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     let dataset = Dataset::load_csv(Path::new("answers.csv"))?;
//!     let session = EvaluationSession::from_config(&dataset.name, &config)?;
//!
//!     let evaluations = session.evaluate_all(&dataset.items);
//!     let records = session.build_records(&dataset.items, &evaluations);
//!     println!("{}", SessionSummary::from_records(&records));
//!
//!     let ledger = EvaluationLedger::open(&config.ledger.dir);
//!     session.persist(&ledger, records, &session.judge_rows(&dataset.items))?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **scoring**: keyword extraction, lexical coverage, scope and semantic scorers
//! - **judge**: judge schema, tolerant parsing, validation and the LLM judge client
//! - **aggregate**: weight normalization and the final score
//! - **session**: one scoring run over a dataset
//! - **ledger**: evaluation history, judge table and CSV export

pub mod aggregate;
pub mod config;
pub mod dataset;
pub mod embeddings;
pub mod error;
pub mod judge;
pub mod ledger;
pub mod llm;
pub mod model;
pub mod resolver;
pub mod scoring;
pub mod session;

// Re-export commonly used types
pub use aggregate::{LayerScores, WeightConfig, aggregate};
pub use config::Config;
pub use dataset::{Dataset, DatasetItem};
pub use error::{Result, ScorecardError};
pub use judge::{JudgeRecord, LlmJudge, parse_judge_text, validate};
pub use ledger::{EvaluationLedger, EvaluationRecord};
pub use llm::LlmClient;
pub use model::{AnswerVersion, ReferenceSpec, VersionPair};
pub use session::{EvaluationSession, SessionSummary};
