//! Keyword extraction from reference text.
//!
//! Domain phrases from the gazetteer are pulled out first so the word
//! segmenter cannot split them; whatever remains is segmented and tokens
//! longer than one character are kept.

use crate::resolver::{TermEntry, TermResolver};
use jieba_rs::Jieba;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::trace;

/// Segmenter with the bundled dictionary; loading it is not cheap.
static SEGMENTER: OnceLock<Jieba> = OnceLock::new();

static ENUMERATION: OnceLock<Regex> = OnceLock::new();

static PUNCTUATION: OnceLock<Regex> = OnceLock::new();

fn segmenter() -> &'static Jieba {
    SEGMENTER.get_or_init(Jieba::new)
}

fn enumeration_pattern() -> &'static Regex {
    ENUMERATION.get_or_init(|| Regex::new(r"\d+\.").expect("valid enumeration regex"))
}

fn punctuation_pattern() -> &'static Regex {
    PUNCTUATION.get_or_init(|| Regex::new(r"[：:。，,、()（）；;]").expect("valid punctuation regex"))
}

/// Built-in gazetteer of domain phrases.
pub const DEFAULT_GAZETTEER: &[&str] = &[
    "工作許可證",
    "施工轄區",
    "包商名稱",
    "作業內容",
    "承包商現場負責人",
    "工安業務主管",
    "施工人員",
    "煙火管制區",
    "電焊",
    "切割",
    "烘烤",
    "work permit",
    "fire zone",
    "hot work",
    "site supervisor",
];

/// Ordered, duplicate-free key terms for one reference.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeywordSet(Vec<String>);

impl KeywordSet {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = KeywordSet::default();
        for term in terms {
            set.push(term.into());
        }
        set
    }

    /// Append unless the term is blank or already present.
    pub fn push(&mut self, term: String) -> bool {
        let term = term.trim().to_string();
        if term.is_empty() || self.0.contains(&term) {
            return false;
        }
        self.0.push(term);
        true
    }

    pub fn terms(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Terms joined by single spaces.
    pub fn joined(&self) -> String {
        self.0.join(" ")
    }
}

/// Gazetteer-first keyword extractor.
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    gazetteer: TermResolver,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new(TermResolver::from_terms(DEFAULT_GAZETTEER.iter().copied()))
    }
}

impl KeywordExtractor {
    pub fn new(gazetteer: TermResolver) -> Self {
        Self { gazetteer }
    }

    /// Built-in gazetteer extended with `extra` terms.
    pub fn with_extra_terms<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut extractor = Self::default();
        for term in extra {
            extractor.gazetteer.push(TermEntry::new(term));
        }
        extractor
    }

    pub fn gazetteer(&self) -> &TermResolver {
        &self.gazetteer
    }

    /// Extract key terms. Deterministic for a given gazetteer.
    pub fn extract(&self, reference: &str) -> KeywordSet {
        let mut keywords = KeywordSet::default();
        if reference.trim().is_empty() {
            return keywords;
        }

        let cleaned = enumeration_pattern().replace_all(reference, "");
        let cleaned = punctuation_pattern().replace_all(&cleaned, " ");

        let (found, remaining) = self.gazetteer.extract(&cleaned);
        for hit in found {
            keywords.push(hit.canonical);
        }

        for token in segmenter().cut(&remaining, false) {
            let token = token.trim();
            if token.chars().count() > 1 && token.chars().any(char::is_alphanumeric) {
                keywords.push(token.to_string());
            }
        }

        trace!(count = keywords.len(), "Extracted keywords");
        keywords
    }
}

/// Memoized extraction keyed by reference text.
///
/// Safe to share across scoring threads.
#[derive(Debug, Default)]
pub struct KeywordCache {
    entries: RwLock<HashMap<String, Arc<KeywordSet>>>,
}

impl KeywordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_extract(&self, extractor: &KeywordExtractor, reference: &str) -> Arc<KeywordSet> {
        if let Ok(entries) = self.entries.read() {
            if let Some(cached) = entries.get(reference) {
                return Arc::clone(cached);
            }
        }

        let keywords = Arc::new(extractor.extract(reference));
        if let Ok(mut entries) = self.entries.write() {
            entries
                .entry(reference.to_string())
                .or_insert_with(|| Arc::clone(&keywords));
        }
        keywords
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
