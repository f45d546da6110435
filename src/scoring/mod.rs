//! Deterministic answer scorers.
//!
//! None of these return errors for bad answer data: missing or empty inputs
//! produce sentinel results with the reason recorded in the detail.

pub mod keywords;
pub mod lexical;
pub mod scope;
pub mod semantic;

pub use keywords::{KeywordCache, KeywordExtractor, KeywordSet};
pub use lexical::{CoverageReason, CoverageResult, LexicalScorer, SynonymTable};
pub use scope::{ScopeLabel, ScopeResult, ScopeScorer};
pub use semantic::{SemanticResult, SemanticScorer, split_sentences};
