//! Input validation and capability-based parameter filtering.

use std::collections::BTreeSet;

use crate::error::LlmError;
use crate::registry::ModelCapabilitySpec;
use crate::types::{
    FilteredParams, GenerationParams, NEUTRAL_TEMPERATURE, NEUTRAL_TOP_K, NEUTRAL_TOP_P, Parameter,
    Prompt, ReasoningEffort, Verbosity,
};

/// Upper bound on prompt length, counted in chars across both prompt parts.
pub const MAX_PROMPT_CHARS: usize = 1_000_000;

pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
pub const TOP_P_RANGE: (f32, f32) = (0.0, 1.0);
pub const MAX_TOP_K: u32 = 1000;

/// Reject empty, whitespace-only and oversized prompts.
pub fn validate_prompt(prompt: &Prompt) -> Result<(), LlmError> {
    if prompt.user_input().trim().is_empty() {
        return Err(LlmError::validation("prompt must not be empty"));
    }
    let chars = prompt.char_count();
    if chars > MAX_PROMPT_CHARS {
        return Err(LlmError::validation(format!(
            "prompt is {chars} chars, limit is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(())
}

/// Check numeric parameters against their documented ranges.
pub fn validate_ranges(params: &GenerationParams) -> Result<(), LlmError> {
    if let Some(t) = params.temperature
        && !(t.is_finite() && (TEMPERATURE_RANGE.0..=TEMPERATURE_RANGE.1).contains(&t))
    {
        return Err(LlmError::validation(format!(
            "temperature {t} outside [{}, {}]",
            TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1
        )));
    }
    if let Some(p) = params.top_p
        && !(p.is_finite() && (TOP_P_RANGE.0..=TOP_P_RANGE.1).contains(&p))
    {
        return Err(LlmError::validation(format!(
            "topP {p} outside [{}, {}]",
            TOP_P_RANGE.0, TOP_P_RANGE.1
        )));
    }
    if let Some(k) = params.top_k
        && k > MAX_TOP_K
    {
        return Err(LlmError::validation(format!(
            "topK {k} exceeds {MAX_TOP_K}"
        )));
    }
    if params.max_output_tokens == Some(0) {
        return Err(LlmError::validation("maxOutputTokens must be positive"));
    }
    if let Some(bad) = params.attachments.iter().find(|a| a.mime_type.trim().is_empty()) {
        return Err(LlmError::validation(format!(
            "attachment {} has no MIME type",
            bad.name.as_deref().unwrap_or("<unnamed>")
        )));
    }
    Ok(())
}

/// Filter `params` against `spec`.
///
/// Supported parameters pass through unchanged (max output tokens is
/// clamped to the model's ceiling). Unsupported or omitted parameters get
/// their neutral default so every outgoing request has the same shape.
/// Pure: the same inputs always give the same output.
pub fn filter_parameters(params: &GenerationParams, spec: &ModelCapabilitySpec) -> FilteredParams {
    let supported = &spec.supported_parameters;
    let allowed = |p: Parameter| supported.contains(&p);

    let (requested, neutralized): (BTreeSet<Parameter>, BTreeSet<Parameter>) =
        params.specified().into_iter().partition(|p| allowed(*p));

    let temperature = params
        .temperature
        .filter(|_| allowed(Parameter::Temperature))
        .unwrap_or(NEUTRAL_TEMPERATURE);
    let top_p = params
        .top_p
        .filter(|_| allowed(Parameter::TopP))
        .unwrap_or(NEUTRAL_TOP_P);
    let top_k = params
        .top_k
        .filter(|_| allowed(Parameter::TopK))
        .unwrap_or(NEUTRAL_TOP_K);
    let max_output_tokens = params
        .max_output_tokens
        .filter(|_| allowed(Parameter::MaxOutputTokens))
        .unwrap_or(spec.default_output_tokens)
        .min(spec.max_output_tokens);
    let reasoning_effort = params
        .reasoning_effort
        .filter(|_| allowed(Parameter::ReasoningEffort))
        .unwrap_or(ReasoningEffort::default());
    let verbosity = params
        .verbosity
        .filter(|_| allowed(Parameter::Verbosity))
        .unwrap_or(Verbosity::default());
    let web_search = allowed(Parameter::WebSearch) && params.wants_web_search();
    let attachments = if allowed(Parameter::Attachments) {
        params.attachments.clone()
    } else {
        Vec::new()
    };

    FilteredParams {
        temperature,
        top_p,
        top_k,
        max_output_tokens,
        reasoning_effort,
        verbosity,
        web_search,
        attachments,
        supported: supported.clone(),
        requested,
        neutralized,
    }
}
