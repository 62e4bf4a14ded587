//! Research pipeline data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::types::{GroundingSource, ReasoningEffort, TokenUsage};

/// Phase of a research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchPhase {
    /// Decomposing the query into sub-questions.
    Planning,
    /// Answering sub-questions.
    Executing,
    /// Synthesizing the intermediate report.
    Publishing,
    /// Producing the final deliverable.
    Finalizing,
    Complete,
    Error,
}

impl ResearchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchPhase::Planning => "planning",
            ResearchPhase::Executing => "executing",
            ResearchPhase::Publishing => "publishing",
            ResearchPhase::Finalizing => "finalizing",
            ResearchPhase::Complete => "complete",
            ResearchPhase::Error => "error",
        }
    }

    /// Progress range `[start, end)` this phase covers, in percent.
    pub fn progress_range(&self) -> (u8, u8) {
        match self {
            ResearchPhase::Planning => (0, 10),
            ResearchPhase::Executing => (10, 70),
            ResearchPhase::Publishing => (70, 85),
            ResearchPhase::Finalizing => (85, 100),
            ResearchPhase::Complete | ResearchPhase::Error => (100, 100),
        }
    }
}

impl fmt::Display for ResearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long and thorough the generated report should be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthTier {
    Concise,
    #[default]
    Balanced,
    Comprehensive,
}

impl DepthTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepthTier::Concise => "concise",
            DepthTier::Balanced => "balanced",
            DepthTier::Comprehensive => "comprehensive",
        }
    }

    pub fn profile(&self) -> DepthProfile {
        DepthProfile::for_tier(*self)
    }
}

impl fmt::Display for DepthTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DepthTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "concise" => Ok(DepthTier::Concise),
            "balanced" => Ok(DepthTier::Balanced),
            "comprehensive" => Ok(DepthTier::Comprehensive),
            other => Err(format!(
                "unknown depth '{other}' (expected concise, balanced or comprehensive)"
            )),
        }
    }
}

/// Word-count targets and reasoning effort for one depth tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthProfile {
    pub tier: DepthTier,
    /// Executive summary length.
    pub summary_words: u32,
    /// Length of each per-topic section.
    pub section_words: u32,
    /// Upper bound for the whole report.
    pub total_words: u32,
    pub reasoning_effort: ReasoningEffort,
}

impl DepthProfile {
    pub fn for_tier(tier: DepthTier) -> Self {
        let (summary_words, section_words, total_words, reasoning_effort) = match tier {
            DepthTier::Concise => (150, 300, 1000, ReasoningEffort::Low),
            DepthTier::Balanced => (250, 600, 2500, ReasoningEffort::Medium),
            DepthTier::Comprehensive => (400, 1200, 6000, ReasoningEffort::High),
        };
        Self {
            tier,
            summary_words,
            section_words,
            total_words,
            reasoning_effort,
        }
    }

    /// Output token budget large enough for `total_words` (~1.5 tokens/word).
    pub fn output_token_budget(&self) -> u32 {
        self.total_words * 3 / 2 + 1024
    }
}

/// One sub-question produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchQuestion {
    pub id: String,
    pub question: String,
    /// 1 is most important.
    pub priority: u32,
    /// What a complete answer should cover.
    pub expected_scope: String,
}

impl ResearchQuestion {
    pub fn new(id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            priority: 1,
            expected_scope: String::new(),
        }
    }
}

/// The answer to one sub-question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchFinding {
    pub question_id: String,
    pub question: String,
    pub answer: String,
    pub sources: Vec<GroundingSource>,
    /// 0.0 for degraded findings, otherwise in (0, 1].
    pub confidence: f64,
    pub tokens_used: usize,
    /// Set when the question could not be answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchFinding {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// What the caller asks the orchestrator to research.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    /// The free-text research query.
    pub query: String,
    /// The caller's original instruction, including any structure, format
    /// or tone requirements. Defaults to the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Optional directive applied while finalizing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_processing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<DepthTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_questions: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_executors: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_grounding: Option<bool>,
    /// Per-phase model overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_model: Option<String>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_post_processing(mut self, directive: impl Into<String>) -> Self {
        self.post_processing = Some(directive.into());
        self
    }

    pub fn with_depth(mut self, depth: DepthTier) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_max_questions(mut self, n: usize) -> Self {
        self.max_questions = Some(n);
        self
    }

    pub fn with_parallel_executors(mut self, n: usize) -> Self {
        self.parallel_executors = Some(n);
        self
    }

    pub fn with_grounding(mut self, enabled: bool) -> Self {
        self.enable_grounding = Some(enabled);
        self
    }

    pub fn with_planner_model(mut self, model: impl Into<String>) -> Self {
        self.planner_model = Some(model.into());
        self
    }

    pub fn with_executor_model(mut self, model: impl Into<String>) -> Self {
        self.executor_model = Some(model.into());
        self
    }

    pub fn with_synthesis_model(mut self, model: impl Into<String>) -> Self {
        self.synthesis_model = Some(model.into());
        self
    }

    /// The instruction to honour in the final deliverable.
    pub fn original_instruction(&self) -> &str {
        self.instruction
            .as_deref()
            .filter(|i| !i.trim().is_empty())
            .unwrap_or(&self.query)
    }
}

/// Facts about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub depth: DepthTier,
    pub planner_model: String,
    pub executor_model: String,
    pub synthesis_model: String,
    /// The plan fell back to the single original query.
    pub planner_fallback: bool,
    pub question_count: usize,
    pub failed_questions: usize,
    pub usage: TokenUsage,
}

/// The assembled result of a research run. Never mutated after return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub query: String,
    /// The intermediate (published) report.
    pub summary: String,
    pub questions: Vec<ResearchQuestion>,
    /// Index-aligned with `questions`.
    pub findings: Vec<ResearchFinding>,
    /// The final deliverable, with its sources section.
    pub synthesis: String,
    /// De-duplicated across all findings.
    pub sources: Vec<GroundingSource>,
    pub metadata: RunMetadata,
}

impl ResearchReport {
    /// Render the whole report, including per-question findings.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# Research: {}\n\n", self.query);
        out.push_str(&self.synthesis);
        out.push_str("\n\n---\n\n## Findings\n\n");
        for (i, finding) in self.findings.iter().enumerate() {
            out.push_str(&format!(
                "### {}. {} (confidence {:.0}%)\n\n{}\n\n",
                i + 1,
                finding.question,
                finding.confidence * 100.0,
                finding.answer
            ));
        }
        let meta = &self.metadata;
        out.push_str(&format!(
            "---\n\n_Run {} · depth {} · {} questions ({} failed) · {} sources · {} tokens · {}s_\n",
            meta.run_id,
            meta.depth,
            meta.question_count,
            meta.failed_questions,
            self.sources.len(),
            meta.usage.total(),
            (meta.finished_at - meta.started_at).num_seconds()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display_is_lowercase() {
        assert_eq!(ResearchPhase::Publishing.to_string(), "publishing");
        assert_eq!(
            serde_json::to_string(&ResearchPhase::Finalizing).unwrap(),
            "\"finalizing\""
        );
    }

    #[test]
    fn test_phase_ranges_are_contiguous() {
        let phases = [
            ResearchPhase::Planning,
            ResearchPhase::Executing,
            ResearchPhase::Publishing,
            ResearchPhase::Finalizing,
        ];
        for pair in phases.windows(2) {
            assert_eq!(pair[0].progress_range().1, pair[1].progress_range().0);
        }
        assert_eq!(ResearchPhase::Finalizing.progress_range().1, 100);
    }

    #[test]
    fn test_depth_profiles_scale() {
        let concise = DepthTier::Concise.profile();
        let comprehensive = DepthTier::Comprehensive.profile();
        assert!(concise.total_words < comprehensive.total_words);
        assert_eq!(comprehensive.reasoning_effort, ReasoningEffort::High);
        assert_eq!(DepthTier::default(), DepthTier::Balanced);
    }

    #[test]
    fn test_depth_from_str() {
        assert_eq!("Comprehensive".parse::<DepthTier>().unwrap(), DepthTier::Comprehensive);
        assert!("deep".parse::<DepthTier>().is_err());
    }

    #[test]
    fn test_original_instruction_falls_back_to_query() {
        let request = ResearchRequest::new("What is WASI?");
        assert_eq!(request.original_instruction(), "What is WASI?");
        let request = request.with_instruction("Write a bulleted brief on WASI.");
        assert_eq!(request.original_instruction(), "Write a bulleted brief on WASI.");
    }
}
