//! Phase 4: produce the final deliverable for the caller's instruction.

use tracing::info;

use super::phase_request;
use super::prompts;
use super::types::{DepthProfile, ResearchFinding};
use crate::error::LlmError;
use crate::factory::InvocationFactory;
use crate::types::{GroundingSource, TokenUsage};

/// Inputs to the finalize call.
pub struct FinalizeInput<'a> {
    pub instruction: &'a str,
    pub post_processing: Option<&'a str>,
    pub published: &'a str,
    pub findings: &'a [ResearchFinding],
    pub sources: &'a [GroundingSource],
    pub profile: &'a DepthProfile,
}

/// The `## Sources` section appended to every deliverable.
pub fn sources_section(sources: &[GroundingSource]) -> String {
    let mut out = String::from("## Sources\n\n");
    if sources.is_empty() {
        out.push_str("No sources were cited.\n");
        return out;
    }
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, prompts::source_line(source)));
    }
    out
}

/// Run the finalize call and append the sources section.
pub async fn finalize(
    factory: &InvocationFactory,
    model: &str,
    input: FinalizeInput<'_>,
) -> Result<(String, TokenUsage), LlmError> {
    let request = phase_request(
        factory,
        model,
        prompts::finalize(
            input.instruction,
            input.post_processing,
            input.published,
            input.findings,
            input.sources,
            input.profile,
        ),
        Some(input.profile.reasoning_effort),
        Some(input.profile.output_token_budget()),
        false,
    );
    let response = factory.call(&request).await?;

    let mut deliverable = response.content.trim_end().to_string();
    deliverable.push_str("\n\n");
    deliverable.push_str(&sources_section(input.sources));
    info!(chars = deliverable.len(), "Final deliverable ready");
    Ok((deliverable, response.usage))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_section_lists_numbered_sources() {
        let section = sources_section(&[
            GroundingSource::new(Some("Rust book".into()), Some("https://doc.rust-lang.org/book".into())),
            GroundingSource::new(Some("RFC 9000".into()), None),
        ]);
        assert_eq!(
            section,
            "## Sources\n\n1. Rust book - https://doc.rust-lang.org/book\n2. RFC 9000\n"
        );
    }

    #[test]
    fn test_sources_section_when_empty() {
        assert!(sources_section(&[]).contains("No sources were cited."));
    }
}
