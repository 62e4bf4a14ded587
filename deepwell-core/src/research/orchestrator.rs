//! Research orchestrator: drives plan → execute → publish → finalize.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::executor::Executor;
use super::finalizer::{self, FinalizeInput};
use super::planner::Planner;
use super::progress::{ProgressCallback, ProgressReporter, ProgressUpdate, spawn_consumer};
use super::publisher;
use super::types::{DepthTier, ResearchPhase, ResearchReport, ResearchRequest, RunMetadata};
use crate::config::ResearchConfig;
use crate::error::{DeepwellError, ResearchError};
use crate::factory::InvocationFactory;
use crate::types::TokenUsage;

/// Settings for one run after request overrides are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRun {
    pub max_questions: usize,
    pub parallel_executors: usize,
    pub enable_grounding: bool,
    pub depth: DepthTier,
    pub planner_model: String,
    pub executor_model: String,
    pub synthesis_model: String,
}

/// Furthest phase reached, readable after the pipeline future is dropped.
struct PhaseCursor(AtomicU8);

impl PhaseCursor {
    const ORDER: [ResearchPhase; 4] = [
        ResearchPhase::Planning,
        ResearchPhase::Executing,
        ResearchPhase::Publishing,
        ResearchPhase::Finalizing,
    ];

    fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    fn advance(&self, phase: ResearchPhase) {
        if let Some(index) = Self::ORDER.iter().position(|p| *p == phase) {
            self.0.fetch_max(index as u8, Ordering::SeqCst);
        }
    }

    fn get(&self) -> ResearchPhase {
        let index = self.0.load(Ordering::SeqCst) as usize;
        Self::ORDER
            .get(index)
            .copied()
            .unwrap_or(ResearchPhase::Planning)
    }
}

/// Runs research requests against a shared invocation factory.
pub struct ResearchOrchestrator {
    factory: Arc<InvocationFactory>,
    config: ResearchConfig,
}

impl ResearchOrchestrator {
    pub fn new(factory: Arc<InvocationFactory>, config: ResearchConfig) -> Self {
        Self { factory, config }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    /// Apply request overrides to the configured defaults and validate.
    pub fn resolve(&self, request: &ResearchRequest) -> Result<ResolvedRun, ResearchError> {
        if request.query.trim().is_empty() {
            return Err(ResearchError::InvalidRequest {
                message: "query must not be empty".into(),
            });
        }
        let max_questions = request.max_questions.unwrap_or(self.config.max_questions);
        let parallel_executors = request
            .parallel_executors
            .unwrap_or(self.config.parallel_executors);
        if max_questions == 0 {
            return Err(ResearchError::InvalidRequest {
                message: "max_questions must be at least 1".into(),
            });
        }
        if parallel_executors == 0 {
            return Err(ResearchError::InvalidRequest {
                message: "parallel_executors must be at least 1".into(),
            });
        }
        let pick = |over: &Option<String>, default: &str| {
            over.as_deref()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Ok(ResolvedRun {
            max_questions,
            parallel_executors,
            enable_grounding: request.enable_grounding.unwrap_or(self.config.enable_grounding),
            depth: request.depth.unwrap_or(self.config.depth),
            planner_model: pick(&request.planner_model, &self.config.planner_model),
            executor_model: pick(&request.executor_model, &self.config.executor_model),
            synthesis_model: pick(&request.synthesis_model, &self.config.synthesis_model),
        })
    }

    /// Run the full pipeline.
    ///
    /// Progress goes to `callback` from a single consumer task; every update
    /// has been delivered by the time this returns.
    pub async fn run(
        &self,
        request: ResearchRequest,
        callback: Arc<dyn ProgressCallback>,
    ) -> Result<ResearchReport, ResearchError> {
        let run = self.resolve(&request)?;
        let run_id = Uuid::new_v4();
        let timeout_secs = self.config.run_timeout_secs;
        info!(%run_id, depth = %run.depth, max_questions = run.max_questions, "Research run started");

        let (reporter, consumer) = spawn_consumer(callback, self.config.progress_buffer);
        let cursor = PhaseCursor::new();
        let outcome = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.pipeline(run_id, &request, &run, &reporter, &cursor),
        )
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(ResearchError::RunTimeout {
                phase: cursor.get(),
                timeout_secs,
            }),
        };

        let last = match &result {
            Ok(_) => ProgressUpdate {
                stage: ResearchPhase::Complete,
                message: "Research complete".into(),
                progress_percent: 100,
                current_question: None,
                findings: None,
            },
            Err(e) => {
                error!(%run_id, phase = ?e.phase(), kind = %e.kind(), error = %e, "Research run failed");
                ProgressUpdate {
                    stage: ResearchPhase::Error,
                    message: e.to_string(),
                    // Clamped up to the last reported value.
                    progress_percent: 0,
                    current_question: None,
                    findings: None,
                }
            }
        };
        reporter.report(last).await;
        drop(reporter);
        if let Err(e) = consumer.await {
            warn!(%run_id, error = %e, "Progress consumer ended abnormally");
        }
        result
    }

    /// Run the pipeline to completion on a private runtime.
    ///
    /// For callers outside async code. Must not be called from within a
    /// Tokio runtime.
    pub fn run_blocking(
        &self,
        request: ResearchRequest,
        callback: Arc<dyn ProgressCallback>,
    ) -> Result<ResearchReport, DeepwellError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(self.run(request, callback))?)
    }

    async fn pipeline(
        &self,
        run_id: Uuid,
        request: &ResearchRequest,
        run: &ResolvedRun,
        progress: &ProgressReporter,
        cursor: &PhaseCursor,
    ) -> Result<ResearchReport, ResearchError> {
        let started_at = Utc::now();
        let factory = self.factory.as_ref();
        let profile = run.depth.profile();
        let mut usage = TokenUsage::default();

        cursor.advance(ResearchPhase::Planning);
        info!(%run_id, phase = %ResearchPhase::Planning, model = %run.planner_model, "Entering phase");
        progress
            .phase(ResearchPhase::Planning, "Planning research questions")
            .await;
        let plan = Planner::new(factory, &run.planner_model, run.max_questions)
            .plan(&request.query)
            .await;
        usage.accumulate(&plan.usage);

        cursor.advance(ResearchPhase::Executing);
        info!(%run_id, phase = %ResearchPhase::Executing, questions = plan.questions.len(), fallback = plan.fallback, "Entering phase");
        progress
            .phase(
                ResearchPhase::Executing,
                format!("Researching {} questions", plan.questions.len()),
            )
            .await;
        let (findings, exec_usage) = Executor::new(factory, &run.executor_model, run.parallel_executors)
            .with_grounding(run.enable_grounding)
            .with_answer_length_threshold(self.config.answer_length_threshold)
            .with_reasoning_effort(profile.reasoning_effort)
            .execute(&request.query, &plan.questions, progress)
            .await;
        usage.accumulate(&exec_usage);

        cursor.advance(ResearchPhase::Publishing);
        info!(%run_id, phase = %ResearchPhase::Publishing, "Entering phase");
        progress
            .phase(ResearchPhase::Publishing, "Synthesizing findings")
            .await;
        let publication = publisher::publish(
            factory,
            &run.synthesis_model,
            &request.query,
            &findings,
            &profile,
        )
        .await
        .map_err(|source| ResearchError::PhaseFailed {
            phase: ResearchPhase::Publishing,
            source,
        })?;
        usage.accumulate(&publication.usage);

        cursor.advance(ResearchPhase::Finalizing);
        info!(%run_id, phase = %ResearchPhase::Finalizing, "Entering phase");
        progress
            .phase(ResearchPhase::Finalizing, "Writing final deliverable")
            .await;
        let (synthesis, final_usage) = finalizer::finalize(
            factory,
            &run.synthesis_model,
            FinalizeInput {
                instruction: request.original_instruction(),
                post_processing: request.post_processing.as_deref(),
                published: &publication.report,
                findings: &findings,
                sources: &publication.sources,
                profile: &profile,
            },
        )
        .await
        .map_err(|source| ResearchError::PhaseFailed {
            phase: ResearchPhase::Finalizing,
            source,
        })?;
        usage.accumulate(&final_usage);

        let failed_questions = findings.iter().filter(|f| f.is_degraded()).count();
        let metadata = RunMetadata {
            run_id,
            started_at,
            finished_at: Utc::now(),
            depth: run.depth,
            planner_model: run.planner_model.clone(),
            executor_model: run.executor_model.clone(),
            synthesis_model: run.synthesis_model.clone(),
            planner_fallback: plan.fallback,
            question_count: plan.questions.len(),
            failed_questions,
            usage,
        };
        info!(
            %run_id,
            questions = metadata.question_count,
            failed = failed_questions,
            sources = publication.sources.len(),
            total_tokens = usage.total(),
            "Research run complete"
        );

        Ok(ResearchReport {
            query: request.query.clone(),
            summary: publication.report,
            questions: plan.questions,
            findings,
            synthesis,
            sources: publication.sources,
            metadata,
        })
    }
}
