//! Semantic similarity between the reference and an answer.

use crate::embeddings::{Embedder, cosine_similarity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SemanticDetail {
    /// Cosine similarity before scaling; absent on failure.
    pub raw_similarity: Option<f64>,
    pub reference_length: usize,
    pub answer_length: usize,
    /// Why the score fell back to zero.
    pub error: Option<String>,
    /// Each reference sentence with its own 0-100 similarity to the answer.
    /// Empty on failure or when the reference is a single sentence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sentence_breakdown: Vec<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SemanticResult {
    /// 0-100.
    pub score: f64,
    pub detail: SemanticDetail,
}

impl SemanticResult {
    fn fallback(reference_length: usize, answer_length: usize, error: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            detail: SemanticDetail {
                raw_similarity: None,
                reference_length,
                answer_length,
                error: Some(error.into()),
                sentence_breakdown: Vec::new(),
            },
        }
    }

    /// False when the score is a fallback rather than a measurement.
    pub fn is_measured(&self) -> bool {
        self.detail.error.is_none()
    }
}

/// Split text into sentences on CJK and ASCII sentence ends and line
/// breaks. A period only ends a sentence before whitespace or the end of
/// the text, so "3.5" stays whole.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let ends = match c {
            '。' | '！' | '？' | '!' | '?' | '\n' | '\r' => true,
            '.' => chars.peek().is_none_or(|next| next.is_whitespace()),
            _ => false,
        };
        if ends {
            push_sentence(&mut sentences, &mut current);
        } else {
            current.push(c);
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

fn scaled(similarity: f64) -> f64 {
    (similarity * 100.0).clamp(0.0, 100.0)
}

/// Cosine similarity scaled to 0-100. Disabled without an embedder.
#[derive(Clone, Default)]
pub struct SemanticScorer {
    embedder: Option<Arc<dyn Embedder>>,
}

impl SemanticScorer {
    pub fn new(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { embedder }
    }

    pub fn disabled() -> Self {
        Self { embedder: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn backend(&self) -> Option<&str> {
        self.embedder.as_deref().map(|e| e.name())
    }

    /// `None` when disabled. Failures and empty inputs give a zero score
    /// with the reason in `detail.error`.
    pub fn score(&self, reference: &str, answer: Option<&str>) -> Option<SemanticResult> {
        let embedder = self.embedder.as_ref()?;
        let answer = answer.unwrap_or("");
        let reference_length = reference.chars().count();
        let answer_length = answer.chars().count();

        if reference.trim().is_empty() || answer.trim().is_empty() {
            return Some(SemanticResult::fallback(
                reference_length,
                answer_length,
                "empty reference or answer",
            ));
        }

        let sentences = split_sentences(reference);
        let breakdown_wanted = sentences.len() > 1;
        let mut texts = vec![reference, answer];
        if breakdown_wanted {
            texts.extend(sentences.iter().map(String::as_str));
        }

        let vectors = match embedder.embed_batch(&texts) {
            Ok(vectors) => vectors,
            Err(e) => {
                warn!(backend = embedder.name(), error = %e, "Embedding failed; semantic score set to 0");
                return Some(SemanticResult::fallback(
                    reference_length,
                    answer_length,
                    e.to_string(),
                ));
            }
        };
        let (true, [reference_vec, answer_vec, sentence_vecs @ ..]) =
            (vectors.len() == texts.len(), vectors.as_slice())
        else {
            return Some(SemanticResult::fallback(
                reference_length,
                answer_length,
                format!("expected {} vectors, got {}", texts.len(), vectors.len()),
            ));
        };
        if vectors.iter().any(|v| v.len() != answer_vec.len()) {
            return Some(SemanticResult::fallback(
                reference_length,
                answer_length,
                "embedding dimensions differ",
            ));
        }

        let similarity = f64::from(cosine_similarity(reference_vec, answer_vec));
        let sentence_breakdown = sentences
            .into_iter()
            .zip(sentence_vecs)
            .map(|(sentence, vec)| {
                let score = scaled(f64::from(cosine_similarity(vec, answer_vec)));
                (sentence, score)
            })
            .collect();

        Some(SemanticResult {
            score: scaled(similarity),
            detail: SemanticDetail {
                raw_similarity: Some(similarity),
                reference_length,
                answer_length,
                error: None,
                sentence_breakdown,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashEmbedder;
    use crate::error::{Result, ScorecardError};

    struct Failing;

    impl Embedder for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(ScorecardError::external("embedding", "service unavailable"))
        }
    }

    /// Maps every text onto a fixed direction.
    struct Fixed(Vec<f32>, Vec<f32>);

    impl Embedder for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.starts_with("ref") { self.0.clone() } else { self.1.clone() })
        }
    }

    /// Direction picked by topic word.
    struct Topical;

    impl Embedder for Topical {
        fn name(&self) -> &str {
            "topical"
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.contains("permit") {
                vec![1.0, 0.0]
            } else if text.contains("fire") {
                vec![0.0, 1.0]
            } else {
                vec![1.0, 1.0]
            })
        }
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("先申請許可。再隔離火區！Why? Pi is 3.14. Done\nlast line"),
            vec!["先申請許可", "再隔離火區", "Why", "Pi is 3.14", "Done", "last line"]
        );
        assert!(split_sentences("  。\n ").is_empty());
        assert_eq!(split_sentences("one sentence"), vec!["one sentence"]);
    }

    #[test]
    fn test_sentence_breakdown_scores_each_reference_sentence() {
        let scorer = SemanticScorer::new(Some(Arc::new(Topical)));
        let result = scorer
            .score("Get a work permit. Clear the fire zone.", Some("permit first"))
            .unwrap();

        assert_eq!(
            result.detail.sentence_breakdown,
            vec![
                ("Get a work permit".to_string(), 100.0),
                ("Clear the fire zone".to_string(), 0.0),
            ]
        );
    }

    #[test]
    fn test_single_sentence_reference_has_no_breakdown() {
        let scorer = SemanticScorer::new(Some(Arc::new(Topical)));
        let result = scorer.score("Get a work permit", Some("permit first")).unwrap();
        assert!(result.detail.sentence_breakdown.is_empty());
        assert!((result.score - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_disabled_returns_none() {
        assert!(SemanticScorer::disabled().score("ref", Some("answer")).is_none());
    }

    #[test]
    fn test_identical_text_scores_full() {
        let scorer = SemanticScorer::new(Some(Arc::new(HashEmbedder::new(64))));
        let result = scorer.score("work permit required", Some("work permit required")).unwrap();
        assert!((result.score - 100.0).abs() < 1e-4);
        assert!(result.is_measured());
    }

    #[test]
    fn test_negative_similarity_clamped() {
        let scorer = SemanticScorer::new(Some(Arc::new(Fixed(vec![1.0, 0.0], vec![-1.0, 0.0]))));
        let result = scorer.score("ref text", Some("answer")).unwrap();
        assert_eq!(result.score, 0.0);
        assert!((result.detail.raw_similarity.unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_failure_is_flagged_fallback() {
        let scorer = SemanticScorer::new(Some(Arc::new(Failing)));
        let result = scorer.score("ref", Some("answer")).unwrap();
        assert_eq!(result.score, 0.0);
        assert!(!result.is_measured());
        assert!(result.detail.error.unwrap().contains("service unavailable"));
    }

    #[test]
    fn test_empty_answer_is_flagged_fallback() {
        let scorer = SemanticScorer::new(Some(Arc::new(HashEmbedder::new(8))));
        let result = scorer.score("reference", None).unwrap();
        assert_eq!(result.score, 0.0);
        assert!(result.detail.error.is_some());
        assert_eq!(result.detail.answer_length, 0);
    }
}
