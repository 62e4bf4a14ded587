//! Integration tests for the research orchestrator.
//!
//! A single scripted `MockHandler` plays every phase; it recognises the
//! phase from the system instruction the pipeline sends.

use deepwell_core::config::DeepwellConfig;
use deepwell_core::error::{ErrorKind, LlmError, ResearchError};
use deepwell_core::providers::{HandlerKey, MockHandler, ProviderCall, RawResponse};
use deepwell_core::registry::{HandlerFamily, ModelRegistry};
use deepwell_core::research::{
    NoOpProgressCallback, ProgressUpdate, ResearchOrchestrator, ResearchPhase, ResearchRequest,
};
use deepwell_core::types::GroundingSource;
use deepwell_core::InvocationFactory;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PLAN_JSON: &str = r#"```json
{"questions": [
  {"id": "q1", "question": "What problem do CRDTs solve?", "priority": 1, "expected_scope": "motivation"},
  {"id": "q2", "question": "How do state-based CRDTs merge?", "priority": 2},
  {"id": "q3", "question": "Which Rust crates implement CRDTs?", "priority": 3}
]}
```"#;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Plan,
    Execute,
    Publish,
    Finalize,
}

fn phase_of(call: &ProviderCall<'_>) -> Phase {
    let system = call.prompt.system_instruction().unwrap_or_default();
    if system.contains("research planner") {
        Phase::Plan
    } else if system.contains("research editor") {
        Phase::Publish
    } else if system.contains("final deliverable") {
        Phase::Finalize
    } else {
        Phase::Execute
    }
}

fn source(url: &str) -> GroundingSource {
    GroundingSource::new(Some(format!("Title of {url}")), Some(url.to_string()))
}

/// Plays a healthy pipeline; `behaviour` may override any call.
fn scripted<F>(behaviour: F) -> Arc<MockHandler>
where
    F: Fn(Phase, &ProviderCall<'_>) -> Option<Result<RawResponse, LlmError>> + Send + Sync + 'static,
{
    Arc::new(MockHandler::from_fn(HandlerFamily::GeminiGenerate, move |call, _| {
        let phase = phase_of(call);
        if let Some(result) = behaviour(phase, call) {
            return result;
        }
        let mut raw = match phase {
            Phase::Plan => RawResponse::text(PLAN_JSON),
            Phase::Execute => RawResponse::text(format!(
                "Findings for: {}",
                call.prompt.user_input()
            )),
            Phase::Publish => RawResponse::text("# Intermediate report\n\nCRDTs converge."),
            Phase::Finalize => RawResponse::text("Final deliverable body."),
        };
        if phase == Phase::Execute {
            raw.grounding_sources = vec![source("https://crdt.tech"), source("https://docs.rs/automerge")];
        }
        raw.usage.input_tokens = 10;
        raw.usage.output_tokens = 5;
        Ok(raw)
    }))
}

fn orchestrator(mock: Arc<MockHandler>) -> ResearchOrchestrator {
    let mut config = DeepwellConfig::default();
    config.retry.jitter = false;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 4;
    let factory = InvocationFactory::new(ModelRegistry::builtin(), &config)
        .with_handler(HandlerKey::GeminiGenerate, mock);
    ResearchOrchestrator::new(Arc::new(factory), config.research)
}

fn recording() -> (Arc<Mutex<Vec<ProgressUpdate>>>, Arc<dyn deepwell_core::ProgressCallback>) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    let callback = Arc::new(move |update: &ProgressUpdate| {
        sink.lock().unwrap().push(update.clone());
    });
    (updates, callback)
}

#[tokio::test]
async fn test_failed_question_degrades_without_failing_run() {
    let mock = scripted(|phase, call| {
        (phase == Phase::Execute && call.prompt.user_input().contains("state-based"))
            .then(|| Err(LlmError::network("connection reset by peer")))
    });
    let (updates, callback) = recording();

    let report = orchestrator(mock.clone())
        .run(
            ResearchRequest::new("How do CRDTs work?")
                .with_max_questions(3)
                .with_parallel_executors(2),
            callback,
        )
        .await
        .unwrap();

    assert_eq!(report.questions.len(), 3);
    assert_eq!(report.findings.len(), 3);
    for (question, finding) in report.questions.iter().zip(&report.findings) {
        assert_eq!(question.id, finding.question_id);
    }

    let failed = &report.findings[1];
    assert_eq!(failed.confidence, 0.0);
    assert!(failed.is_degraded());
    assert!(failed.answer.contains("could not be answered"));

    for finding in [&report.findings[0], &report.findings[2]] {
        assert!(!finding.is_degraded());
        assert!((finding.confidence - 0.8).abs() < 1e-9);
        assert!(finding.answer.starts_with("Findings for:"));
    }

    assert_eq!(report.metadata.question_count, 3);
    assert_eq!(report.metadata.failed_questions, 1);
    assert!(!report.metadata.planner_fallback);
    assert_eq!(report.sources.len(), 2, "sources are de-duplicated");
    assert_eq!(report.summary, "# Intermediate report\n\nCRDTs converge.");
    assert!(report.synthesis.starts_with("Final deliverable body."));
    assert!(report.synthesis.contains("## Sources"));
    assert!(report.synthesis.contains("1. Title of https://crdt.tech - https://crdt.tech"));

    // plan + 2 good questions + 4 attempts for the failing one + publish + finalize
    assert_eq!(mock.call_count(), 1 + 2 + 4 + 2);

    let updates = updates.lock().unwrap();
    assert!(updates.windows(2).all(|w| w[0].progress_percent <= w[1].progress_percent));
    let last = updates.last().unwrap();
    assert_eq!(last.stage, ResearchPhase::Complete);
    assert_eq!(last.progress_percent, 100);
    let executing = updates
        .iter()
        .filter(|u| u.stage == ResearchPhase::Executing && u.current_question.is_some())
        .count();
    assert_eq!(executing, 3);
}

#[tokio::test]
async fn test_unparsable_plan_falls_back_to_query() {
    let mock = scripted(|phase, _| {
        (phase == Phase::Plan).then(|| Ok(RawResponse::text("Here are some thoughts, no JSON.")))
    });

    let report = orchestrator(mock.clone())
        .run(ResearchRequest::new("Is WASI ready?"), Arc::new(NoOpProgressCallback))
        .await
        .unwrap();

    assert!(report.metadata.planner_fallback);
    assert_eq!(report.questions.len(), 1);
    assert_eq!(report.questions[0].question, "Is WASI ready?");
    assert_eq!(report.findings.len(), 1);
    assert!(!report.findings[0].is_degraded());

    let phases: Vec<Phase> = mock
        .recorded_calls()
        .iter()
        .map(|c| {
            let system = c.system_instruction.clone().unwrap_or_default();
            if system.contains("research editor") {
                Phase::Publish
            } else if system.contains("final deliverable") {
                Phase::Finalize
            } else if system.contains("research planner") {
                Phase::Plan
            } else {
                Phase::Execute
            }
        })
        .collect();
    assert_eq!(phases, vec![Phase::Plan, Phase::Execute, Phase::Publish, Phase::Finalize]);
}

#[tokio::test]
async fn test_finalize_receives_original_instruction_and_directive() {
    let mock = scripted(|_, _| None);

    orchestrator(mock.clone())
        .run(
            ResearchRequest::new("CRDTs")
                .with_instruction("Write a two-paragraph brief for a CTO.")
                .with_post_processing("End with a one-line recommendation."),
            Arc::new(NoOpProgressCallback),
        )
        .await
        .unwrap();

    let calls = mock.recorded_calls();
    let finalize = calls
        .iter()
        .find(|c| {
            c.system_instruction
                .as_deref()
                .is_some_and(|s| s.contains("final deliverable"))
        })
        .unwrap();
    assert!(finalize.user_input.contains("Write a two-paragraph brief for a CTO."));
    assert!(finalize.user_input.contains("# Intermediate report"));
    assert!(finalize
        .system_instruction
        .as_deref()
        .unwrap()
        .contains("End with a one-line recommendation."));
}

#[tokio::test]
async fn test_publish_failure_propagates() {
    let mock = scripted(|phase, _| {
        (phase == Phase::Publish).then(|| {
            Err(LlmError::Authentication {
                provider: "google".into(),
                message: "key revoked".into(),
            })
        })
    });
    let (updates, callback) = recording();

    let err = orchestrator(mock)
        .run(ResearchRequest::new("CRDTs"), callback)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResearchError::PhaseFailed {
            phase: ResearchPhase::Publishing,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Authentication);
    let updates = updates.lock().unwrap();
    assert_eq!(updates.last().unwrap().stage, ResearchPhase::Error);
}

#[tokio::test]
async fn test_finalize_failure_propagates() {
    let mock = scripted(|phase, _| {
        (phase == Phase::Finalize).then(|| Err(LlmError::ExternalProvider {
            message: "blocked".into(),
            status: None,
        }))
    });

    let err = orchestrator(mock)
        .run(ResearchRequest::new("CRDTs"), Arc::new(NoOpProgressCallback))
        .await
        .unwrap_err();
    assert_eq!(err.phase(), Some(ResearchPhase::Finalizing));
}

#[tokio::test]
async fn test_grounding_flag_reaches_provider() {
    let mock = scripted(|_, _| None);
    orchestrator(mock.clone())
        .run(
            ResearchRequest::new("CRDTs").with_max_questions(1).with_grounding(false),
            Arc::new(NoOpProgressCallback),
        )
        .await
        .unwrap();
    assert!(mock.recorded_calls().iter().all(|c| !c.params.web_search));

    let mock = scripted(|_, _| None);
    orchestrator(mock.clone())
        .run(ResearchRequest::new("CRDTs").with_max_questions(1), Arc::new(NoOpProgressCallback))
        .await
        .unwrap();
    assert!(mock.recorded_calls().iter().any(|c| c.params.web_search));
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_reports_furthest_phase() {
    let mock = Arc::new(
        MockHandler::from_fn(HandlerFamily::GeminiGenerate, |call, _| match phase_of(call) {
            Phase::Plan => Ok(RawResponse::text(PLAN_JSON)),
            _ => Ok(RawResponse::text("slow answer")),
        })
        .with_delay(Duration::from_secs(20)),
    );
    let mut config = DeepwellConfig::default();
    config.research.run_timeout_secs = 30;
    let factory = InvocationFactory::new(ModelRegistry::builtin(), &config)
        .with_handler(HandlerKey::GeminiGenerate, mock);
    let orchestrator = ResearchOrchestrator::new(Arc::new(factory), config.research);

    let err = orchestrator
        .run(ResearchRequest::new("CRDTs"), Arc::new(NoOpProgressCallback))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResearchError::RunTimeout {
            phase: ResearchPhase::Executing,
            timeout_secs: 30,
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_empty_query_rejected_before_any_call() {
    let mock = scripted(|_, _| None);
    let err = orchestrator(mock.clone())
        .run(ResearchRequest::new(""), Arc::new(NoOpProgressCallback))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(mock.call_count(), 0);
}

#[test]
fn test_run_blocking_outside_runtime() {
    let mock = scripted(|_, _| None);
    let report = orchestrator(mock)
        .run_blocking(
            ResearchRequest::new("CRDTs").with_max_questions(2),
            Arc::new(NoOpProgressCallback),
        )
        .unwrap();
    assert_eq!(report.findings.len(), 2);
    assert!(report.to_markdown().contains("## Findings"));
}
