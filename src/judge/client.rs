//! Automated LLM judge.
//!
//! Sends the judge prompt, bounds the call with a timeout, and hands the raw
//! text to the tolerant parser. Callers that paste judge output by hand skip
//! this module and go straight to [`crate::judge::parse_judge_text`].

use super::parse::{ComparisonJudgement, parse_comparison_text, parse_judge_text};
use super::schema::JudgeRecord;
use crate::config::LlmConfig;
use crate::error::{Result, ScorecardError};
use crate::llm::{LlmClient, Message, Prompts};
use crate::model::{AnswerVersion, ReferenceSpec};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// LLM-as-judge for scoring answers.
pub struct LlmJudge {
    client: LlmClient,
    timeout: Duration,
}

impl LlmJudge {
    /// Create a new judge with the given LLM client.
    pub fn new(client: LlmClient) -> Self {
        let timeout = client.timeout();
        Self { client, timeout }
    }

    /// Create from LLM config.
    pub fn from_config(config: LlmConfig) -> Self {
        Self::new(LlmClient::new(config))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Raw judge text for one answer.
    pub async fn judge_text(
        &self,
        reference: &ReferenceSpec,
        answer: Option<&str>,
        version: AnswerVersion,
    ) -> Result<String> {
        let prompt = Prompts::render_judge_answer(reference, answer, version);
        debug!(
            question_id = reference.question_id,
            %version,
            model = self.client.model(),
            "Requesting judge score"
        );
        self.call(&prompt).await
    }

    /// Judge one answer and normalize the result.
    pub async fn judge_answer(
        &self,
        reference: &ReferenceSpec,
        answer: Option<&str>,
        version: AnswerVersion,
    ) -> Result<JudgeRecord> {
        let text = self.judge_text(reference, answer, version).await?;
        let mut record = parse_judge_text(&text).map_err(|failure| {
            warn!(question_id = reference.question_id, %version, reason = %failure.reason, "Unparsable judge response");
            ScorecardError::JudgeParse(failure.reason)
        })?;
        record.assign(reference.question_id, version);
        Ok(record)
    }

    /// Score both versions in one call.
    pub async fn compare_answers(
        &self,
        reference: &ReferenceSpec,
        original: Option<&str>,
        optimized: Option<&str>,
    ) -> Result<ComparisonJudgement> {
        let prompt = Prompts::render_judge_comparison(reference, original, optimized);
        let text = self.call(&prompt).await?;
        let mut comparison =
            parse_comparison_text(&text).map_err(|failure| ScorecardError::JudgeParse(failure.reason))?;
        comparison.original.assign(reference.question_id, AnswerVersion::Original);
        comparison.optimized.assign(reference.question_id, AnswerVersion::Optimized);
        Ok(comparison)
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        let messages = [
            Message::system(Prompts::judge_system()),
            Message::user(prompt),
        ];
        let completion = with_timeout("judge", self.timeout, self.client.chat(&messages)).await?;
        Ok(completion.content)
    }

    /// Test connectivity to the judge endpoint.
    pub async fn test_connection(&self) -> Result<()> {
        with_timeout("judge", self.timeout, self.client.test_connection()).await
    }
}

/// Bound an external call; expiry maps to [`ScorecardError::Timeout`].
pub async fn with_timeout<T, F>(service: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ScorecardError::Timeout {
            service: service.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_maps_to_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ScorecardError>(1)
        };
        let err = with_timeout("judge", Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, ScorecardError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let fast = async { Ok::<_, ScorecardError>(7) };
        let value = with_timeout("judge", Duration::from_secs(1), fast).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_judge_from_config_uses_configured_timeout() {
        let config = LlmConfig {
            timeout_secs: 5,
            ..Default::default()
        };
        let judge = LlmJudge::from_config(config);
        assert_eq!(judge.timeout, Duration::from_secs(5));
    }
}
