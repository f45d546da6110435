//! Judge prompts.
//!
//! Templates are plain strings with `{placeholder}` markers; the `render_*`
//! helpers fill them. The requested JSON shape is the nested schema that
//! [`crate::judge::parse_judge_text`] normalizes.

use crate::model::{AnswerVersion, ReferenceSpec};

/// Collection of prompts used for judging answers.
pub struct Prompts;

/// Questions per prompt when batching.
pub const DEFAULT_BATCH_SIZE: usize = 5;

impl Prompts {
    /// System message for every judge call.
    pub fn judge_system() -> &'static str {
        "You are a rigorous evaluator of retrieval-augmented answers. Score only from the evidence given, show your counts, and reply with the requested JSON and nothing else."
    }

    /// Single-answer judge prompt with the four-dimension rubric.
    pub fn judge_answer() -> &'static str {
        r#"Evaluate the answer below. Every score must trace back to countable numerators and denominators; interpolate linearly inside a band and round to an integer.

[Question {question_id}]
{question}

[Key points the answer must cover]
{reference}

[Answer under review ({version} version)]
{answer}

# 1) Relevance
Split the answer into sentences and mark each On-Topic or Off-Topic.
p = on-topic sentences / all sentences; score = p x 100.
Bands of 10 points: 90-100 when p >= 0.90, 80-89 when 0.80 <= p < 0.90, and so on down to 0-9 when p < 0.10.
List representative on/off-topic sentences and name the ones that raised or lowered the score in score_drivers.

# 2) Completeness
Mark every key point Covered, Partially or Missing.
q = (Covered + 0.5 x Partially) / key points.
For covered or partial points rate depth, context utilization and information synthesis, each in [0.80, 1.00]; k is their mean.
If the answer is shallow (bare term lists, no explanation or causality) cap k at 0.89 and set shallow_flag.
score = q x 100 x k.

# 3) Accuracy
Split the answer into atomic facts marked Correct, Incorrect or Unverifiable.
r = Correct / (Correct + Incorrect); score = r x 100.

# 4) Scope adherence (reported under the key "faithfulness")
Penalize content beyond the question and key points, even when correct.
Mark statements Essential, Supportive or Extraneous.
g = (Essential + 0.5 x Supportive) / (Essential + Supportive + Extraneous); score = g x 100.

# Overall
overall = mean(relevance, completeness, accuracy, faithfulness)

Return strict JSON:
{
  "question_id": {question_id},
  "relevance": {
    "score": <0-100>, "p": <0-1>,
    "on_topic_examples": ["..."], "off_topic_examples": ["..."],
    "score_drivers": {"positive": ["..."], "negative": ["..."]},
    "reasoning": "..."
  },
  "completeness": {
    "score": <0-100>, "q": <0-1>, "k": <0.80-1.00>,
    "covered": ["..."], "partially": ["..."], "missing": ["..."],
    "quality_notes": {"depth": <0.80-1.00>, "context_utilization": <0.80-1.00>, "information_synthesis": <0.80-1.00>, "shallow_flag": <true/false>},
    "coverage_debug": {"points": [{"label": "...", "status": "Covered"}], "q": <0-1>},
    "k_debug": {"depth": <0.80-1.00>, "context": <0.80-1.00>, "synthesis": <0.80-1.00>, "k_avg": <0.80-1.00>},
    "score_drivers": {"positive": ["..."], "negative": ["..."]},
    "reasoning": "..."
  },
  "accuracy": {
    "score": <0-100>, "r": <0-1>,
    "correct_facts": ["..."], "incorrect_facts": ["..."], "unverifiable_facts": ["..."],
    "score_drivers": {"positive": ["..."], "negative": ["..."]},
    "reasoning": "..."
  },
  "faithfulness": {
    "score": <0-100>, "g": <0-1>,
    "essential": ["..."], "supportive": ["..."], "extraneous": ["..."],
    "score_drivers": {"positive": ["..."], "negative": ["..."]},
    "reasoning": "..."
  },
  "overall": <0-100>,
  "overall_reasoning": "..."
}"#
    }

    /// Side-by-side prompt scoring both versions at once.
    pub fn judge_comparison() -> &'static str {
        r#"Compare two answers to the same question and score each one.

[Question {question_id}]
{question}

[Key points the answer must cover]
{reference}

[Version A: original]
{original}

[Version B: optimized]
{optimized}

Score each version on relevance, completeness, accuracy and faithfulness (scope adherence), 0-100 each, then compare them.

Return strict JSON:
{
  "question_id": {question_id},
  "version_a": {"relevance": <0-100>, "completeness": <0-100>, "accuracy": <0-100>, "faithfulness": <0-100>, "overall": <0-100>},
  "version_b": {"relevance": <0-100>, "completeness": <0-100>, "accuracy": <0-100>, "faithfulness": <0-100>, "overall": <0-100>},
  "comparison": {
    "improvement": <overall of B minus overall of A>,
    "better_version": "original" or "optimized",
    "key_differences": ["..."],
    "recommendation": "..."
  },
  "reasoning": "..."
}"#
    }

    /// Fill [`Prompts::judge_answer`] for one answer.
    pub fn render_judge_answer(
        reference: &ReferenceSpec,
        answer: Option<&str>,
        version: AnswerVersion,
    ) -> String {
        Self::judge_answer()
            .replace("{question_id}", &reference.question_id.to_string())
            .replace("{version}", version.as_str())
            .replace("{question}", &reference.question_text)
            .replace("{reference}", &reference.reference_text)
            .replace("{answer}", answer.unwrap_or(NO_ANSWER))
    }

    /// Fill [`Prompts::judge_comparison`] for both versions.
    pub fn render_judge_comparison(
        reference: &ReferenceSpec,
        original: Option<&str>,
        optimized: Option<&str>,
    ) -> String {
        Self::judge_comparison()
            .replace("{question_id}", &reference.question_id.to_string())
            .replace("{question}", &reference.question_text)
            .replace("{reference}", &reference.reference_text)
            .replace("{original}", original.unwrap_or(NO_ANSWER))
            .replace("{optimized}", optimized.unwrap_or(NO_ANSWER))
    }

    /// Concatenate single-answer prompts into batches of `per_batch`.
    pub fn render_batches<'a, I>(items: I, version: AnswerVersion, per_batch: usize) -> Vec<String>
    where
        I: IntoIterator<Item = (&'a ReferenceSpec, Option<&'a str>)>,
    {
        let prompts: Vec<String> = items
            .into_iter()
            .map(|(reference, answer)| Self::render_judge_answer(reference, answer, version))
            .collect();

        prompts
            .chunks(per_batch.max(1))
            .map(|chunk| chunk.join(&format!("\n\n{}\n\n", "=".repeat(80))))
            .collect()
    }
}

const NO_ANSWER: &str = "(no answer given)";
