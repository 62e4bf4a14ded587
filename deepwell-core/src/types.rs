//! Fundamental request and response types shared by every layer.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::registry::ProviderFamily;

/// Neutral temperature substituted when the model does not accept one.
pub const NEUTRAL_TEMPERATURE: f32 = 1.0;
/// Neutral nucleus-sampling value: keep the whole distribution.
pub const NEUTRAL_TOP_P: f32 = 1.0;
/// Neutral top-k value. Zero means "no top-k truncation".
pub const NEUTRAL_TOP_K: u32 = 0;

/// A caller-controllable generation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parameter {
    Temperature,
    TopP,
    TopK,
    MaxOutputTokens,
    ReasoningEffort,
    Verbosity,
    WebSearch,
    Attachments,
}

impl Parameter {
    pub const ALL: [Parameter; 8] = [
        Parameter::Temperature,
        Parameter::TopP,
        Parameter::TopK,
        Parameter::MaxOutputTokens,
        Parameter::ReasoningEffort,
        Parameter::Verbosity,
        Parameter::WebSearch,
        Parameter::Attachments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Temperature => "temperature",
            Parameter::TopP => "topP",
            Parameter::TopK => "topK",
            Parameter::MaxOutputTokens => "maxOutputTokens",
            Parameter::ReasoningEffort => "reasoningEffort",
            Parameter::Verbosity => "verbosity",
            Parameter::WebSearch => "webSearch",
            Parameter::Attachments => "attachments",
        }
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How hard a reasoning model should think before answering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }

    /// Thinking-token budget for providers that take a budget instead of a level.
    pub fn thinking_budget(&self) -> u32 {
        match self {
            ReasoningEffort::Minimal => 1024,
            ReasoningEffort::Low => 2048,
            ReasoningEffort::Medium => 8192,
            ReasoningEffort::High => 24_576,
        }
    }
}

/// Requested answer length/verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    #[default]
    Medium,
    High,
}

impl Verbosity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Low => "low",
            Verbosity::Medium => "medium",
            Verbosity::High => "high",
        }
    }
}

/// Input text: either one combined prompt or a system/user pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Prompt {
    Single {
        text: String,
    },
    Split {
        system_instruction: String,
        user_input: String,
    },
}

impl Prompt {
    pub fn single(text: impl Into<String>) -> Self {
        Prompt::Single { text: text.into() }
    }

    pub fn split(system_instruction: impl Into<String>, user_input: impl Into<String>) -> Self {
        Prompt::Split {
            system_instruction: system_instruction.into(),
            user_input: user_input.into(),
        }
    }

    /// System instruction, if one was given and is not blank.
    pub fn system_instruction(&self) -> Option<&str> {
        match self {
            Prompt::Split {
                system_instruction, ..
            } if !system_instruction.trim().is_empty() => Some(system_instruction),
            _ => None,
        }
    }

    /// The user-facing part of the prompt.
    pub fn user_input(&self) -> &str {
        match self {
            Prompt::Single { text } => text,
            Prompt::Split { user_input, .. } => user_input,
        }
    }

    /// Flatten into one string for providers without a system slot.
    pub fn combined(&self) -> String {
        match self.system_instruction() {
            Some(system) => format!("{system}\n\n{}", self.user_input()),
            None => self.user_input().to_string(),
        }
    }

    pub fn char_count(&self) -> usize {
        match self {
            Prompt::Single { text } => text.chars().count(),
            Prompt::Split {
                system_instruction,
                user_input,
            } => system_instruction.chars().count() + user_input.chars().count(),
        }
    }
}

/// A binary attachment passed inline to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            name: None,
            data,
        }
    }

    pub fn base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// Caller-supplied generation parameters. `None` means "not specified".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<Verbosity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl GenerationParams {
    /// Parameters the caller explicitly set.
    pub fn specified(&self) -> BTreeSet<Parameter> {
        let mut set = BTreeSet::new();
        if self.temperature.is_some() {
            set.insert(Parameter::Temperature);
        }
        if self.top_p.is_some() {
            set.insert(Parameter::TopP);
        }
        if self.top_k.is_some() {
            set.insert(Parameter::TopK);
        }
        if self.max_output_tokens.is_some() {
            set.insert(Parameter::MaxOutputTokens);
        }
        if self.reasoning_effort.is_some() {
            set.insert(Parameter::ReasoningEffort);
        }
        if self.verbosity.is_some() {
            set.insert(Parameter::Verbosity);
        }
        if self.web_search.is_some() {
            set.insert(Parameter::WebSearch);
        }
        if !self.attachments.is_empty() {
            set.insert(Parameter::Attachments);
        }
        set
    }

    pub fn wants_web_search(&self) -> bool {
        self.web_search.unwrap_or(false)
    }
}

/// Parameters after filtering against a model's capability spec.
///
/// Every field is populated. Fields for unsupported parameters hold the
/// documented neutral default, never the caller's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub reasoning_effort: ReasoningEffort,
    pub verbosity: Verbosity,
    pub web_search: bool,
    pub attachments: Vec<Attachment>,
    /// The model's supported set, carried so handlers know what to send.
    pub supported: BTreeSet<Parameter>,
    /// Supported parameters the caller set explicitly. Handlers use this to
    /// decide whether to enable optional provider features.
    pub requested: BTreeSet<Parameter>,
    /// Parameters the caller set that were replaced by neutral defaults.
    pub neutralized: BTreeSet<Parameter>,
}

impl FilteredParams {
    pub fn supports(&self, param: Parameter) -> bool {
        self.supported.contains(&param)
    }

    pub fn was_requested(&self, param: Parameter) -> bool {
        self.requested.contains(&param)
    }
}

/// One invocation of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub model: String,
    /// Optional provider the caller expects the model to belong to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderFamily>,
    pub prompt: Prompt,
    #[serde(default)]
    pub params: GenerationParams,
}

impl InvocationRequest {
    pub fn new(model: impl Into<String>, prompt: Prompt) -> Self {
        Self {
            model: model.into(),
            provider: None,
            prompt,
            params: GenerationParams::default(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderFamily) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.params.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.params.top_k = Some(top_k);
        self
    }

    pub fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.params.max_output_tokens = Some(max);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.params.reasoning_effort = Some(effort);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.params.verbosity = Some(verbosity);
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.params.web_search = Some(enabled);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.params.attachments.push(attachment);
        self
    }
}

/// Token usage for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    #[serde(default)]
    pub reasoning_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
    }
}

/// A web source cited by a grounded response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroundingSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl GroundingSource {
    pub fn new(title: Option<String>, url: Option<String>) -> Self {
        Self {
            title: title.filter(|t| !t.trim().is_empty()),
            url: url.filter(|u| !u.trim().is_empty()),
        }
    }

    /// Identity used for de-duplication: URL, falling back to title.
    pub fn dedup_key(&self) -> Option<String> {
        self.url
            .as_deref()
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.title
                    .as_deref()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
            })
    }
}

/// Provider-side facts about a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub model: String,
    pub provider: ProviderFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub grounding_sources: Vec<GroundingSource>,
    /// The provider stopped at its output ceiling; `content` is partial.
    pub incomplete: bool,
    /// Transport attempts the call needed, including the successful one.
    pub attempts: u32,
}

/// A validated response from one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub duration: Duration,
    pub metadata: ResponseMetadata,
}
