//! Term resolution: map loosely-written labels or phrases onto canonical names.
//!
//! One resolver type serves two callers. The dataset loader resolves column
//! headers; the keyword extractor locates gazetteer terms inside reference
//! text. Both go through the same two steps: an exact table first, then a
//! fallback heuristic.

use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, HashSet};

/// How a label or phrase was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Canonical name or a listed alias.
    Exact,
    /// Substring heuristic.
    Heuristic,
}

/// One canonical term with its accepted spellings.
#[derive(Debug, Clone, PartialEq)]
pub struct TermEntry {
    pub canonical: String,
    /// Alternative exact spellings.
    pub aliases: Vec<String>,
    /// Fallback: a label matches when it contains every fragment of any group.
    pub fragments: Vec<Vec<String>>,
}

impl TermEntry {
    pub fn new(canonical: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into(),
            aliases: Vec::new(),
            fragments: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn fragments<I, S>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fragments.push(group.into_iter().map(Into::into).collect());
        self
    }

    fn spellings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    fn matches_exact(&self, label: &str) -> bool {
        let label = label.trim();
        self.spellings()
            .any(|spelling| spelling.trim().eq_ignore_ascii_case(label))
    }

    fn matches_heuristic(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.fragments.iter().any(|group| {
            !group.is_empty()
                && group
                    .iter()
                    .all(|fragment| label.contains(&fragment.to_lowercase()))
        })
    }
}

/// A phrase located in text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatch {
    pub canonical: String,
    pub kind: MatchKind,
    /// The literal spelling found in the text.
    pub matched: String,
}

/// Ordered resolution table. Earlier entries win ties.
#[derive(Debug, Clone, Default)]
pub struct TermResolver {
    entries: Vec<TermEntry>,
}

impl TermResolver {
    pub fn new(entries: Vec<TermEntry>) -> Self {
        Self { entries }
    }

    /// A table of plain terms with no aliases or heuristics.
    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(terms.into_iter().map(TermEntry::new).collect())
    }

    pub fn push(&mut self, entry: TermEntry) {
        if !self.entries.iter().any(|e| e.canonical == entry.canonical) {
            self.entries.push(entry);
        }
    }

    pub fn entries(&self) -> &[TermEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a single canonical name against candidate labels.
    pub fn resolve_label(&self, canonical: &str, labels: &[String]) -> Option<(usize, MatchKind)> {
        let entry = self.entries.iter().find(|e| e.canonical == canonical)?;
        if let Some(index) = labels.iter().position(|label| entry.matches_exact(label)) {
            return Some((index, MatchKind::Exact));
        }
        labels
            .iter()
            .position(|label| entry.matches_heuristic(label))
            .map(|index| (index, MatchKind::Heuristic))
    }

    /// Resolve every entry against the labels; each label is claimed at most once.
    ///
    /// All exact matches are assigned before any heuristic runs, so a loose
    /// fragment cannot steal a label that another entry names exactly.
    pub fn resolve_all(&self, labels: &[String]) -> BTreeMap<String, (usize, MatchKind)> {
        let mut resolved = BTreeMap::new();
        let mut claimed = HashSet::new();

        for entry in &self.entries {
            if let Some(index) = (0..labels.len())
                .find(|i| !claimed.contains(i) && entry.matches_exact(&labels[*i]))
            {
                claimed.insert(index);
                resolved.insert(entry.canonical.clone(), (index, MatchKind::Exact));
            }
        }

        for entry in &self.entries {
            if resolved.contains_key(&entry.canonical) {
                continue;
            }
            if let Some(index) = (0..labels.len())
                .find(|i| !claimed.contains(i) && entry.matches_heuristic(&labels[*i]))
            {
                claimed.insert(index);
                resolved.insert(entry.canonical.clone(), (index, MatchKind::Heuristic));
            }
        }

        resolved
    }

    /// Locate an entry's spelling inside free text.
    ///
    /// Exact (case-sensitive) occurrences are tried first, then a
    /// case-insensitive search.
    pub fn find_in_text(&self, entry: &TermEntry, text: &str) -> Option<TextMatch> {
        for spelling in entry.spellings().filter(|s| !s.is_empty()) {
            if text.contains(spelling) {
                return Some(TextMatch {
                    canonical: entry.canonical.clone(),
                    kind: MatchKind::Exact,
                    matched: spelling.to_string(),
                });
            }
        }
        for spelling in entry.spellings().filter(|s| !s.is_empty()) {
            let Some(pattern) = insensitive(spelling) else {
                continue;
            };
            if let Some(found) = pattern.find(text) {
                return Some(TextMatch {
                    canonical: entry.canonical.clone(),
                    kind: MatchKind::Heuristic,
                    matched: found.as_str().to_string(),
                });
            }
        }
        None
    }

    /// Pull every entry out of `text` in table order.
    ///
    /// Each found phrase is replaced by a space so later entries and
    /// downstream tokenization never see it twice.
    pub fn extract(&self, text: &str) -> (Vec<TextMatch>, String) {
        let mut remaining = text.to_string();
        let mut found = Vec::new();
        for entry in &self.entries {
            if let Some(hit) = self.find_in_text(entry, &remaining) {
                remaining = match hit.kind {
                    MatchKind::Exact => remaining.replace(&hit.matched, " "),
                    MatchKind::Heuristic => match insensitive(&hit.matched) {
                        Some(pattern) => pattern.replace_all(&remaining, " ").into_owned(),
                        None => remaining.replace(&hit.matched, " "),
                    },
                };
                found.push(hit);
            }
        }
        (found, remaining)
    }
}

fn insensitive(literal: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(literal))
        .case_insensitive(true)
        .build()
        .ok()
}
