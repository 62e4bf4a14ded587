//! Phase 3: synthesize findings into an intermediate report.

use std::collections::HashSet;
use tracing::info;

use super::phase_request;
use super::prompts;
use super::types::{DepthProfile, ResearchFinding};
use crate::error::LlmError;
use crate::factory::InvocationFactory;
use crate::types::{GroundingSource, TokenUsage};

/// The published intermediate report.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub report: String,
    /// De-duplicated sources in first-seen order.
    pub sources: Vec<GroundingSource>,
    pub usage: TokenUsage,
}

/// Collect the sources of all findings, keyed by URL with title fallback.
/// Sources with neither are dropped.
pub fn dedup_sources(findings: &[ResearchFinding]) -> Vec<GroundingSource> {
    let mut seen = HashSet::new();
    findings
        .iter()
        .flat_map(|f| f.sources.iter())
        .filter(|s| s.dedup_key().is_some_and(|key| seen.insert(key)))
        .cloned()
        .collect()
}

pub async fn publish(
    factory: &InvocationFactory,
    model: &str,
    query: &str,
    findings: &[ResearchFinding],
    profile: &DepthProfile,
) -> Result<Publication, LlmError> {
    let sources = dedup_sources(findings);
    let request = phase_request(
        factory,
        model,
        prompts::publish(query, findings, &sources, profile),
        Some(profile.reasoning_effort),
        Some(profile.output_token_budget()),
        false,
    );
    let response = factory.call(&request).await?;
    info!(
        sources = sources.len(),
        chars = response.content.len(),
        "Intermediate report published"
    );
    Ok(Publication {
        report: response.content,
        sources,
        usage: response.usage,
    })
}
