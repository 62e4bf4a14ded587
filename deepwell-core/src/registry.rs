//! Model capability registry.
//!
//! A static map from model identifier to the capability spec that decides
//! which parameters the model accepts, which handler family talks to it and
//! how long a call may run. Built once at startup and read-only afterwards.

use crate::error::RegistryError;
use crate::types::Parameter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;

/// Vendor a model belongs to. Credentials and base URLs are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderFamily {
    pub const ALL: [ProviderFamily; 3] = [
        ProviderFamily::OpenAi,
        ProviderFamily::Anthropic,
        ProviderFamily::Google,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::Google => "google",
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderFamily::OpenAi),
            "anthropic" => Ok(ProviderFamily::Anthropic),
            "google" | "gemini" => Ok(ProviderFamily::Google),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Which handler implementation speaks to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerFamily {
    OpenAiResponses,
    OpenAiDeepResearch,
    AnthropicMessages,
    GeminiGenerate,
}

impl HandlerFamily {
    /// The provider family every model of this handler family must belong to.
    pub fn provider(&self) -> ProviderFamily {
        match self {
            HandlerFamily::OpenAiResponses | HandlerFamily::OpenAiDeepResearch => {
                ProviderFamily::OpenAi
            }
            HandlerFamily::AnthropicMessages => ProviderFamily::Anthropic,
            HandlerFamily::GeminiGenerate => ProviderFamily::Google,
        }
    }
}

/// Static description of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCapabilitySpec {
    pub id: String,
    pub display_name: String,
    pub provider: ProviderFamily,
    pub handler: HandlerFamily,
    pub supported_parameters: BTreeSet<Parameter>,
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// Output budget used when the caller does not set one.
    pub default_output_tokens: u32,
    pub default_timeout: Duration,
    /// Upper bound used for grounded or long-running calls.
    pub max_timeout: Duration,
    /// The model needs a non-standard transport (background job + polling).
    pub special_transport: bool,
}

impl ModelCapabilitySpec {
    pub fn new(id: impl Into<String>, handler: HandlerFamily) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            provider: handler.provider(),
            handler,
            supported_parameters: BTreeSet::new(),
            context_window: 128_000,
            max_output_tokens: 8192,
            default_output_tokens: 4096,
            default_timeout: Duration::from_secs(120),
            max_timeout: Duration::from_secs(600),
            special_transport: false,
        }
    }

    pub fn named(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn supports(mut self, params: impl IntoIterator<Item = Parameter>) -> Self {
        self.supported_parameters.extend(params);
        self
    }

    pub fn with_token_limits(mut self, context_window: u32, max_output: u32, default_output: u32) -> Self {
        self.context_window = context_window;
        self.max_output_tokens = max_output;
        self.default_output_tokens = default_output.min(max_output);
        self
    }

    pub fn with_timeouts(mut self, default_timeout: Duration, max_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self.max_timeout = max_timeout.max(default_timeout);
        self
    }

    pub fn with_special_transport(mut self) -> Self {
        self.special_transport = true;
        self
    }

    pub fn supports_parameter(&self, param: Parameter) -> bool {
        self.supported_parameters.contains(&param)
    }
}

/// Read-only registry of capability specs keyed by model id.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    specs: BTreeMap<String, ModelCapabilitySpec>,
}

impl ModelRegistry {
    /// Build a registry from explicit specs. Ids must be unique.
    pub fn new(specs: impl IntoIterator<Item = ModelCapabilitySpec>) -> Result<Self, RegistryError> {
        let mut map = BTreeMap::new();
        for spec in specs {
            if map.contains_key(&spec.id) {
                return Err(RegistryError::Duplicate { model: spec.id });
            }
            map.insert(spec.id.clone(), spec);
        }
        Ok(Self { specs: map })
    }

    /// Registry preloaded with the built-in model table.
    pub fn builtin() -> Self {
        let specs = builtin_specs()
            .into_iter()
            .map(|spec| (spec.id.clone(), spec))
            .collect();
        Self { specs }
    }

    pub fn lookup(&self, model_id: &str) -> Result<&ModelCapabilitySpec, RegistryError> {
        self.specs
            .get(model_id)
            .ok_or_else(|| RegistryError::NotRegistered {
                model: model_id.to_string(),
            })
    }

    pub fn list_supported_parameters(
        &self,
        model_id: &str,
    ) -> Result<BTreeSet<&'static str>, RegistryError> {
        Ok(self
            .lookup(model_id)?
            .supported_parameters
            .iter()
            .map(Parameter::as_str)
            .collect())
    }

    pub fn list_available_models(&self) -> Vec<&ModelCapabilitySpec> {
        self.specs.values().collect()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

/// The built-in model table.
pub fn builtin_specs() -> Vec<ModelCapabilitySpec> {
    use Parameter::*;

    let openai_reasoning = [MaxOutputTokens, ReasoningEffort, Verbosity, WebSearch, Attachments];
    let openai_classic = [Temperature, TopP, MaxOutputTokens, WebSearch, Attachments];
    let deep_research = [MaxOutputTokens, WebSearch];
    let anthropic_thinking = [
        Temperature,
        TopP,
        TopK,
        MaxOutputTokens,
        ReasoningEffort,
        WebSearch,
        Attachments,
    ];
    let anthropic_plain = [Temperature, TopP, TopK, MaxOutputTokens, WebSearch, Attachments];
    let gemini = [
        Temperature,
        TopP,
        TopK,
        MaxOutputTokens,
        ReasoningEffort,
        WebSearch,
        Attachments,
    ];

    vec![
        ModelCapabilitySpec::new("gpt-5", HandlerFamily::OpenAiResponses)
            .named("GPT-5")
            .supports(openai_reasoning)
            .with_token_limits(400_000, 128_000, 16_384)
            .with_timeouts(secs(180), secs(600)),
        ModelCapabilitySpec::new("gpt-5-mini", HandlerFamily::OpenAiResponses)
            .named("GPT-5 mini")
            .supports(openai_reasoning)
            .with_token_limits(400_000, 128_000, 16_384)
            .with_timeouts(secs(120), secs(600)),
        ModelCapabilitySpec::new("gpt-4.1", HandlerFamily::OpenAiResponses)
            .named("GPT-4.1")
            .supports(openai_classic)
            .with_token_limits(1_047_576, 32_768, 8192)
            .with_timeouts(secs(120), secs(600)),
        ModelCapabilitySpec::new("o3-deep-research", HandlerFamily::OpenAiDeepResearch)
            .named("o3 Deep Research")
            .supports(deep_research)
            .with_token_limits(200_000, 100_000, 32_768)
            .with_timeouts(secs(1200), secs(3600))
            .with_special_transport(),
        ModelCapabilitySpec::new("o4-mini-deep-research", HandlerFamily::OpenAiDeepResearch)
            .named("o4-mini Deep Research")
            .supports(deep_research)
            .with_token_limits(200_000, 100_000, 32_768)
            .with_timeouts(secs(900), secs(2400))
            .with_special_transport(),
        ModelCapabilitySpec::new("claude-sonnet-4-5", HandlerFamily::AnthropicMessages)
            .named("Claude Sonnet 4.5")
            .supports(anthropic_thinking)
            .with_token_limits(200_000, 64_000, 8192)
            .with_timeouts(secs(180), secs(600)),
        ModelCapabilitySpec::new("claude-opus-4-1", HandlerFamily::AnthropicMessages)
            .named("Claude Opus 4.1")
            .supports(anthropic_thinking)
            .with_token_limits(200_000, 32_000, 8192)
            .with_timeouts(secs(240), secs(600)),
        ModelCapabilitySpec::new("claude-haiku-4-5", HandlerFamily::AnthropicMessages)
            .named("Claude Haiku 4.5")
            .supports(anthropic_plain)
            .with_token_limits(200_000, 64_000, 8192)
            .with_timeouts(secs(90), secs(300)),
        ModelCapabilitySpec::new("gemini-2.5-pro", HandlerFamily::GeminiGenerate)
            .named("Gemini 2.5 Pro")
            .supports(gemini)
            .with_token_limits(1_048_576, 65_536, 8192)
            .with_timeouts(secs(180), secs(600)),
        ModelCapabilitySpec::new("gemini-2.5-flash", HandlerFamily::GeminiGenerate)
            .named("Gemini 2.5 Flash")
            .supports(gemini)
            .with_token_limits(1_048_576, 65_536, 8192)
            .with_timeouts(secs(120), secs(600)),
    ]
}
