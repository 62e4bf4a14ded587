//! Phase 1: decompose the query into sub-questions.
//!
//! The planner never fails the run. A response that is not a usable plan,
//! or a failed call, degrades to a single question equal to the query.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::phase_request;
use super::prompts;
use super::types::ResearchQuestion;
use crate::factory::InvocationFactory;
use crate::types::{ReasoningEffort, TokenUsage};

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid fenced-block regex")
});

/// Outcome of the planning phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub questions: Vec<ResearchQuestion>,
    /// The plan is the single fallback question.
    pub fallback: bool,
    pub usage: TokenUsage,
}

impl Plan {
    fn fallback(query: &str, usage: TokenUsage) -> Self {
        Self {
            questions: vec![ResearchQuestion::new("q1", query)],
            fallback: true,
            usage,
        }
    }
}

pub struct Planner<'a> {
    factory: &'a InvocationFactory,
    model: &'a str,
    max_questions: usize,
}

impl<'a> Planner<'a> {
    pub fn new(factory: &'a InvocationFactory, model: &'a str, max_questions: usize) -> Self {
        Self {
            factory,
            model,
            max_questions: max_questions.max(1),
        }
    }

    pub async fn plan(&self, query: &str) -> Plan {
        let request = phase_request(
            self.factory,
            self.model,
            prompts::plan(query, self.max_questions),
            Some(ReasoningEffort::Low),
            None,
            false,
        );
        let response = match self.factory.call(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(model = self.model, kind = %e.kind(), error = %e, "Planning call failed, researching the query as a single question");
                return Plan::fallback(query, TokenUsage::default());
            }
        };

        match parse_plan(&response.content, self.max_questions) {
            Ok(questions) => {
                info!(count = questions.len(), "Research plan ready");
                Plan {
                    questions,
                    fallback: false,
                    usage: response.usage,
                }
            }
            Err(reason) => {
                warn!(model = self.model, reason = %reason, "Unusable research plan, researching the query as a single question");
                Plan::fallback(query, response.usage)
            }
        }
    }
}

/// Parse a planner response into at most `max_questions` questions.
///
/// Accepts bare or fenced JSON, either `{"questions": [...]}` or a bare
/// array. Items may be objects or plain strings. Missing or duplicate ids
/// are replaced by `q{n}`.
pub fn parse_plan(text: &str, max_questions: usize) -> Result<Vec<ResearchQuestion>, String> {
    let value = extract_json(text).ok_or_else(|| "no JSON found in planner output".to_string())?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .get("questions")
            .and_then(Value::as_array)
            .ok_or_else(|| "plan object has no questions array".to_string())?,
        _ => return Err("plan is neither an object nor an array".into()),
    };

    let mut seen = HashSet::new();
    let mut questions = Vec::new();
    for item in items {
        if questions.len() >= max_questions {
            break;
        }
        let Some(mut question) = parse_question(item) else {
            debug!(?item, "Skipping malformed plan entry");
            continue;
        };
        let n = questions.len() + 1;
        if question.id.is_empty() || !seen.insert(question.id.clone()) {
            let mut k = n;
            while !seen.insert(format!("q{k}")) {
                k += 1;
            }
            question.id = format!("q{k}");
        }
        if question.priority == 0 {
            question.priority = n as u32;
        }
        questions.push(question);
    }

    if questions.is_empty() {
        return Err("plan contains no usable questions".into());
    }
    Ok(questions)
}

fn parse_question(item: &Value) -> Option<ResearchQuestion> {
    if let Some(text) = item.as_str() {
        let text = text.trim();
        return (!text.is_empty()).then(|| ResearchQuestion {
            id: String::new(),
            question: text.to_string(),
            priority: 0,
            expected_scope: String::new(),
        });
    }
    let obj = item.as_object()?;
    let question = obj
        .get("question")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|q| !q.is_empty())?;
    let id = match obj.get("id") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => format!("q{n}"),
        _ => String::new(),
    };
    let priority = obj
        .get("priority")
        .and_then(Value::as_u64)
        .map(|p| p.min(u32::MAX as u64) as u32)
        .unwrap_or(0);
    let expected_scope = obj
        .get("expected_scope")
        .or_else(|| obj.get("expectedScope"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    Some(ResearchQuestion {
        id,
        question: question.to_string(),
        priority,
        expected_scope,
    })
}

fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    if let Some(caps) = FENCED_JSON.captures(trimmed)
        && let Ok(value) = serde_json::from_str(caps[1].trim())
    {
        return Some(value);
    }
    // Prose around the payload: take the widest bracketed span.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
            && start < end
            && let Ok(value) = serde_json::from_str(&trimmed[start..=end])
        {
            return Some(value);
        }
    }
    None
}
