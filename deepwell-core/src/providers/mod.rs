//! Provider handlers: one implementation per provider family.
//!
//! Handlers only perform the raw call and normalize the provider's response
//! shape. Validation, timeouts, retries and breaker accounting live in
//! [`crate::resilience`], composed around a handler as a decorator.

pub mod anthropic;
pub mod deep_research;
pub mod gemini;
pub mod mock;
pub mod normalize;
pub mod openai;
pub mod transport;

pub use anthropic::AnthropicHandler;
pub use deep_research::{DeepResearchHandler, DeepResearchVariant};
pub use gemini::GeminiHandler;
pub use mock::MockHandler;
pub use openai::OpenAiHandler;

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::registry::{HandlerFamily, ModelCapabilitySpec};
use crate::types::{FilteredParams, GenerationParams, GroundingSource, Parameter, Prompt, TokenUsage};

/// Everything a handler needs for one raw call.
#[derive(Debug, Clone, Copy)]
pub struct ProviderCall<'a> {
    pub spec: &'a ModelCapabilitySpec,
    pub prompt: &'a Prompt,
    pub params: &'a FilteredParams,
}

/// A provider response before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Processing time reported by the provider, if any. May be garbage.
    pub reported_duration_ms: Option<f64>,
    pub finish_reason: Option<String>,
    pub grounding_sources: Vec<GroundingSource>,
    /// The provider stopped at its output ceiling.
    pub incomplete: bool,
    /// Model name echoed by the provider.
    pub model: Option<String>,
}

impl RawResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("stop".into()),
            ..Default::default()
        }
    }
}

/// Trait for provider handlers.
#[async_trait]
pub trait ProviderHandler: Send + Sync {
    /// The capability family this handler serves.
    fn family(&self) -> HandlerFamily;

    /// Parameters this handler can send at all.
    fn supported_parameters(&self) -> BTreeSet<Parameter>;

    /// Family-specific checks on the caller's parameters.
    ///
    /// Parameters the family ignores wholesale produce warnings, not errors.
    fn validate_parameters(&self, params: &GenerationParams) -> Result<Vec<String>, LlmError> {
        let supported = self.supported_parameters();
        Ok(params
            .specified()
            .into_iter()
            .filter(|p| !supported.contains(p))
            .map(|p| format!("{p} is ignored by {:?} models", self.family()))
            .collect())
    }

    /// Perform the raw call. Must stop promptly once `cancel` fires.
    async fn invoke(
        &self,
        call: &ProviderCall<'_>,
        cancel: CancellationToken,
    ) -> Result<RawResponse, LlmError>;
}

/// Key under which a wrapped handler is registered with the factory.
///
/// Deep-research models share one capability family but run on two
/// sub-variants selected by model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    OpenAiResponses,
    DeepResearch(DeepResearchVariant),
    AnthropicMessages,
    GeminiGenerate,
}

impl HandlerKey {
    pub fn resolve(spec: &ModelCapabilitySpec) -> Self {
        match spec.handler {
            HandlerFamily::OpenAiResponses => HandlerKey::OpenAiResponses,
            HandlerFamily::OpenAiDeepResearch => {
                HandlerKey::DeepResearch(DeepResearchVariant::for_model(&spec.id))
            }
            HandlerFamily::AnthropicMessages => HandlerKey::AnthropicMessages,
            HandlerFamily::GeminiGenerate => HandlerKey::GeminiGenerate,
        }
    }

    pub fn family(&self) -> HandlerFamily {
        match self {
            HandlerKey::OpenAiResponses => HandlerFamily::OpenAiResponses,
            HandlerKey::DeepResearch(_) => HandlerFamily::OpenAiDeepResearch,
            HandlerKey::AnthropicMessages => HandlerFamily::AnthropicMessages,
            HandlerKey::GeminiGenerate => HandlerFamily::GeminiGenerate,
        }
    }

    pub const ALL: [HandlerKey; 5] = [
        HandlerKey::OpenAiResponses,
        HandlerKey::DeepResearch(DeepResearchVariant::Full),
        HandlerKey::DeepResearch(DeepResearchVariant::Mini),
        HandlerKey::AnthropicMessages,
        HandlerKey::GeminiGenerate,
    ];
}
