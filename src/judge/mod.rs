//! LLM judge ingestion.
//!
//! Judge output arrives as free-form text, either pasted by hand or returned
//! by [`LlmJudge`]. It is decoded tolerantly ([`parse_judge_text`]),
//! normalized into a [`JudgeRecord`], and checked by [`validate`] before it
//! may reach the ledger.

mod client;
mod parse;
mod schema;
mod validate;

pub use client::{LlmJudge, with_timeout};
pub use parse::{
    ComparisonJudgement, ParseFailure, decode_object, parse_comparison_text, parse_judge_text,
};
pub use schema::{DimensionBlock, Dimension, JudgeRecord, METRIC_KEYS, metric_range};
pub use validate::{Finding, ValidationConfig, ValidationReport, validate};

pub(crate) use schema::{value_to_list, value_to_text};
