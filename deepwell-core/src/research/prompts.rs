//! Prompt builders for the four research phases.

use super::types::{DepthProfile, ResearchFinding, ResearchQuestion};
use crate::types::{GroundingSource, Prompt};

pub fn plan(query: &str, max_questions: usize) -> Prompt {
    Prompt::split(
        format!(
            "You are a research planner. Decompose the user's research query into at most \
             {max_questions} focused, independently answerable sub-questions that together cover it.\n\
             Respond with JSON only, no prose, in this shape:\n\
             {{\"questions\": [{{\"id\": \"q1\", \"question\": \"...\", \"priority\": 1, \
             \"expected_scope\": \"what a complete answer covers\"}}]}}\n\
             Priority 1 is most important."
        ),
        query,
    )
}

pub fn execute(query: &str, question: &ResearchQuestion, grounded: bool) -> Prompt {
    let mut system = String::from(
        "You are a meticulous researcher answering one sub-question of a larger research \
         project. Answer factually and specifically. Say so plainly when evidence is thin.",
    );
    if grounded {
        system.push_str(" Use web search and cite the sources you rely on.");
    }
    let mut user = format!(
        "Overall research query: {query}\n\nSub-question: {}",
        question.question
    );
    if !question.expected_scope.trim().is_empty() {
        user.push_str(&format!("\nExpected scope: {}", question.expected_scope));
    }
    Prompt::split(system, user)
}

pub fn publish(
    query: &str,
    findings: &[ResearchFinding],
    sources: &[GroundingSource],
    profile: &DepthProfile,
) -> Prompt {
    let system = format!(
        "You are a research editor. Synthesize the findings below into one coherent report.\n\
         - Executive summary: about {} words.\n\
         - One section per major theme: about {} words each.\n\
         - Whole report: at most {} words.\n\
         Flag findings marked as failed as gaps rather than inventing answers. \
         Reference sources by their [n] number.",
        profile.summary_words, profile.section_words, profile.total_words
    );
    let user = format!(
        "Research query: {query}\n\n{}\n{}",
        render_findings(findings),
        render_sources(sources)
    );
    Prompt::split(system, user)
}

pub fn finalize(
    instruction: &str,
    post_processing: Option<&str>,
    published: &str,
    findings: &[ResearchFinding],
    sources: &[GroundingSource],
    profile: &DepthProfile,
) -> Prompt {
    let mut system = format!(
        "You produce the final deliverable for a research request. Follow the caller's \
         original instruction exactly, including any structure, format and tone it asks for. \
         Use the draft report and the underlying findings as your only evidence. \
         Stay within about {} words. Do not add a sources section; one is appended for you.",
        profile.total_words
    );
    if let Some(directive) = post_processing.filter(|d| !d.trim().is_empty()) {
        system.push_str(&format!("\n\nAdditional directive: {directive}"));
    }
    let user = format!(
        "Original instruction:\n{instruction}\n\nDraft report:\n{published}\n\n{}\n{}",
        render_findings(findings),
        render_sources(sources)
    );
    Prompt::split(system, user)
}

fn render_findings(findings: &[ResearchFinding]) -> String {
    let mut out = String::from("Findings:\n");
    for (i, f) in findings.iter().enumerate() {
        let status = if f.is_degraded() { " [FAILED]" } else { "" };
        out.push_str(&format!(
            "\n## {}. {}{status} (confidence {:.2})\n{}\n",
            i + 1,
            f.question,
            f.confidence,
            f.answer
        ));
    }
    out
}

/// Numbered source list, `[n] title - url`.
pub fn render_sources(sources: &[GroundingSource]) -> String {
    if sources.is_empty() {
        return "Sources: none\n".to_string();
    }
    let mut out = String::from("Sources:\n");
    for (i, s) in sources.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n", i + 1, source_line(s)));
    }
    out
}

pub fn source_line(source: &GroundingSource) -> String {
    match (&source.title, &source.url) {
        (Some(title), Some(url)) => format!("{title} - {url}"),
        (Some(title), None) => title.clone(),
        (None, Some(url)) => url.clone(),
        (None, None) => "(untitled)".to_string(),
    }
}
