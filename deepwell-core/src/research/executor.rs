//! Phase 2: answer sub-questions in bounded batches.

use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use super::phase_request;
use super::progress::ProgressReporter;
use super::prompts;
use super::types::{ResearchFinding, ResearchPhase, ResearchQuestion};
use crate::factory::InvocationFactory;
use crate::types::{ReasoningEffort, TokenUsage};

/// Confidence of a successful finding.
///
/// `0.5 + 0.1` per source, plus `0.3` when the answer is longer than
/// `threshold` characters (`0.1` otherwise), capped at 1.
pub fn confidence(source_count: usize, answer_chars: usize, threshold: usize) -> f64 {
    let length_bonus = if answer_chars > threshold { 0.3 } else { 0.1 };
    (0.5 + 0.1 * source_count as f64 + length_bonus).min(1.0)
}

pub struct Executor<'a> {
    factory: &'a InvocationFactory,
    model: &'a str,
    parallel: usize,
    grounded: bool,
    answer_length_threshold: usize,
    reasoning_effort: ReasoningEffort,
}

impl<'a> Executor<'a> {
    pub fn new(factory: &'a InvocationFactory, model: &'a str, parallel: usize) -> Self {
        Self {
            factory,
            model,
            parallel: parallel.max(1),
            grounded: true,
            answer_length_threshold: 500,
            reasoning_effort: ReasoningEffort::Medium,
        }
    }

    pub fn with_grounding(mut self, grounded: bool) -> Self {
        self.grounded = grounded;
        self
    }

    pub fn with_answer_length_threshold(mut self, threshold: usize) -> Self {
        self.answer_length_threshold = threshold;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = effort;
        self
    }

    /// Answer every question. The result is index-aligned with `questions`
    /// and always has the same length; failures become degraded findings.
    pub async fn execute(
        &self,
        query: &str,
        questions: &[ResearchQuestion],
        progress: &ProgressReporter,
    ) -> (Vec<ResearchFinding>, TokenUsage) {
        let total = questions.len();
        let completed = AtomicUsize::new(0);
        let mut findings = Vec::with_capacity(total);
        let mut usage = TokenUsage::default();

        for (batch_index, batch) in questions.chunks(self.parallel).enumerate() {
            debug!(batch = batch_index, size = batch.len(), "Starting executor batch");
            let results = join_all(batch.iter().map(|question| async {
                let result = self.answer(query, question).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                progress
                    .within(
                        ResearchPhase::Executing,
                        done as f64 / total.max(1) as f64,
                        format!("Answered {done}/{total}: {}", question.question),
                        Some(question.question.clone()),
                        Some(done),
                    )
                    .await;
                result
            }))
            .await;

            for (finding, call_usage) in results {
                usage.accumulate(&call_usage);
                findings.push(finding);
            }
        }

        let failed = findings.iter().filter(|f| f.is_degraded()).count();
        info!(total, failed, "Sub-questions answered");
        (findings, usage)
    }

    async fn answer(&self, query: &str, question: &ResearchQuestion) -> (ResearchFinding, TokenUsage) {
        let request = phase_request(
            self.factory,
            self.model,
            prompts::execute(query, question, self.grounded),
            Some(self.reasoning_effort),
            None,
            self.grounded,
        );

        match self.factory.call(&request).await {
            Ok(response) => {
                let sources = response.metadata.grounding_sources;
                let confidence = confidence(
                    sources.len(),
                    response.content.chars().count(),
                    self.answer_length_threshold,
                );
                let finding = ResearchFinding {
                    question_id: question.id.clone(),
                    question: question.question.clone(),
                    answer: response.content,
                    sources,
                    confidence,
                    tokens_used: response.usage.total(),
                    error: None,
                };
                (finding, response.usage)
            }
            Err(e) => {
                warn!(question_id = %question.id, kind = %e.kind(), error = %e, "Sub-question failed, keeping a degraded finding");
                let finding = ResearchFinding {
                    question_id: question.id.clone(),
                    question: question.question.clone(),
                    answer: format!(
                        "This question could not be answered ({}): {e}",
                        e.kind()
                    ),
                    sources: Vec::new(),
                    confidence: 0.0,
                    tokens_used: 0,
                    error: Some(e.to_string()),
                };
                (finding, TokenUsage::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeepwellConfig;
    use crate::error::LlmError;
    use crate::providers::{HandlerKey, MockHandler, RawResponse};
    use crate::registry::{HandlerFamily, ModelRegistry};
    use crate::research::progress::{NoOpProgressCallback, spawn_consumer};
    use crate::types::GroundingSource;
    use std::sync::Arc;

    #[test]
    fn test_confidence_formula() {
        assert!((confidence(0, 10, 500) - 0.6).abs() < 1e-9);
        assert!((confidence(2, 501, 500) - 1.0).abs() < 1e-9);
        assert!((confidence(1, 500, 500) - 0.7).abs() < 1e-9);
        assert_eq!(confidence(9, 9000, 500), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_findings_aligned_despite_failure_and_completion_order() {
        let mock = Arc::new(
            MockHandler::from_fn(HandlerFamily::GeminiGenerate, |call, _| {
                let input = call.prompt.user_input();
                if input.contains("second") {
                    return Err(LlmError::network("connection reset"));
                }
                let mut raw = RawResponse::text(format!("answer for {input}"));
                raw.grounding_sources = vec![GroundingSource::new(None, Some("https://a.example".into()))];
                Ok(raw)
            })
            .with_delay(std::time::Duration::from_millis(10)),
        );
        let mut config = DeepwellConfig::default();
        config.retry.jitter = false;
        let factory = InvocationFactory::new(ModelRegistry::builtin(), &config)
            .with_handler(HandlerKey::GeminiGenerate, mock.clone());
        let questions = vec![
            ResearchQuestion::new("a", "first"),
            ResearchQuestion::new("b", "second"),
            ResearchQuestion::new("c", "third"),
        ];
        let (reporter, handle) = spawn_consumer(Arc::new(NoOpProgressCallback), 8);

        let (findings, _) = Executor::new(&factory, "gemini-2.5-pro", 2)
            .execute("query", &questions, &reporter)
            .await;
        drop(reporter);
        handle.await.unwrap();

        assert_eq!(findings.len(), 3);
        for (q, f) in questions.iter().zip(&findings) {
            assert_eq!(q.id, f.question_id);
        }
        assert_eq!(findings[1].confidence, 0.0);
        assert!(findings[1].answer.contains("could not be answered"));
        assert!(findings[0].error.is_none());
        assert!((findings[2].confidence - 0.7).abs() < 1e-9);
        // 1 + 3 retries for the failing question.
        assert_eq!(mock.call_count(), 6);
    }
}
