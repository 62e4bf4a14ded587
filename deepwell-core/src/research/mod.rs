//! Deep research pipeline over one free-text query.
//!
//! Four phases, each built on the invocation factory:
//! 1. **Plan**: decompose the query into bounded sub-questions
//! 2. **Execute**: answer them in parallel batches, optionally grounded
//! 3. **Publish**: synthesize an intermediate report from the findings
//! 4. **Finalize**: rewrite it against the caller's original instruction

pub mod executor;
pub mod finalizer;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod prompts;
pub mod publisher;
pub mod types;

pub use orchestrator::ResearchOrchestrator;
pub use progress::{NoOpProgressCallback, ProgressCallback, ProgressUpdate};
pub use types::{
    DepthProfile, DepthTier, ResearchFinding, ResearchPhase, ResearchQuestion, ResearchReport,
    ResearchRequest, RunMetadata,
};

use crate::factory::InvocationFactory;
use crate::types::{InvocationRequest, Parameter, Prompt, ReasoningEffort};

/// Build a phase request, setting only the optional parameters `model`
/// supports so the factory has nothing to neutralize.
pub(crate) fn phase_request(
    factory: &InvocationFactory,
    model: &str,
    prompt: Prompt,
    reasoning_effort: Option<ReasoningEffort>,
    max_output_tokens: Option<u32>,
    web_search: bool,
) -> InvocationRequest {
    let mut request = InvocationRequest::new(model, prompt);
    let Ok(spec) = factory.registry().lookup(model) else {
        // Unknown model: the factory reports it on call.
        return request;
    };
    if let Some(effort) = reasoning_effort
        && spec.supports_parameter(Parameter::ReasoningEffort)
    {
        request = request.with_reasoning_effort(effort);
    }
    if let Some(max) = max_output_tokens
        && spec.supports_parameter(Parameter::MaxOutputTokens)
    {
        request = request.with_max_output_tokens(max);
    }
    if web_search && spec.supports_parameter(Parameter::WebSearch) {
        request = request.with_web_search(true);
    }
    request
}
