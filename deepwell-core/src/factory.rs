//! The invocation factory: the single entry point for model calls.
//!
//! Holds everything that used to be ambient state (registry, wrapped
//! handlers, breaker map) in one context object built at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DeepwellConfig, ProvidersConfig, RetryConfig};
use crate::credentials::Credentials;
use crate::error::LlmError;
use crate::providers::{
    AnthropicHandler, DeepResearchHandler, DeepResearchVariant, GeminiHandler, HandlerKey,
    OpenAiHandler, ProviderCall, ProviderHandler,
};
use crate::registry::{ModelCapabilitySpec, ModelRegistry};
use crate::resilience::breaker::{BreakerRegistry, CallOutcome};
use crate::resilience::validation::{filter_parameters, validate_ranges};
use crate::resilience::wrapper::ResilientHandler;
use crate::types::{FilteredParams, InvocationRequest, InvocationResponse};

/// Validates, filters, dispatches and records every model call.
pub struct InvocationFactory {
    registry: Arc<ModelRegistry>,
    handlers: HashMap<HandlerKey, ResilientHandler>,
    breakers: BreakerRegistry,
    providers: ProvidersConfig,
    retry: RetryConfig,
}

impl InvocationFactory {
    /// A factory with no handlers. Add them with [`Self::with_handler`].
    pub fn new(registry: ModelRegistry, config: &DeepwellConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            handlers: HashMap::new(),
            breakers: BreakerRegistry::new(config.circuit_breaker.clone()),
            providers: config.providers.clone(),
            retry: config.retry.clone(),
        }
    }

    /// Register `handler` under `key`, wrapped in the resilience layer.
    pub fn with_handler(mut self, key: HandlerKey, handler: Arc<dyn ProviderHandler>) -> Self {
        self.handlers
            .insert(key, ResilientHandler::new(handler, self.retry.clone()));
        self
    }

    /// The built-in registry with a live HTTP handler for every family.
    pub fn from_config(config: &DeepwellConfig, credentials: &Credentials) -> Result<Self, LlmError> {
        let providers = &config.providers;
        let factory = Self::new(ModelRegistry::builtin(), config)
            .with_handler(
                HandlerKey::OpenAiResponses,
                Arc::new(OpenAiHandler::new(&providers.openai, credentials)?),
            )
            .with_handler(
                HandlerKey::DeepResearch(DeepResearchVariant::Full),
                Arc::new(DeepResearchHandler::new(
                    DeepResearchVariant::Full,
                    &providers.openai,
                    credentials,
                )?),
            )
            .with_handler(
                HandlerKey::DeepResearch(DeepResearchVariant::Mini),
                Arc::new(DeepResearchHandler::new(
                    DeepResearchVariant::Mini,
                    &providers.openai,
                    credentials,
                )?),
            )
            .with_handler(
                HandlerKey::AnthropicMessages,
                Arc::new(AnthropicHandler::new(&providers.anthropic, credentials)?),
            )
            .with_handler(
                HandlerKey::GeminiGenerate,
                Arc::new(GeminiHandler::new(&providers.google, credentials)?),
            );
        info!(models = factory.registry.len(), "Invocation factory ready");
        Ok(factory)
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Check a request against the registry before anything is sent.
    ///
    /// Provider/model mismatches and out-of-range values are errors.
    /// Parameters the model does not support are logged and returned as
    /// warnings; they will be neutralized, not rejected.
    pub fn validate_config(
        &self,
        request: &InvocationRequest,
    ) -> Result<(&ModelCapabilitySpec, Vec<String>), LlmError> {
        let spec = self.registry.lookup(&request.model)?;
        if let Some(provider) = request.provider
            && provider != spec.provider
        {
            return Err(LlmError::validation(format!(
                "model {} belongs to {}, not {provider}",
                spec.id, spec.provider
            )));
        }
        validate_ranges(&request.params)?;

        let mut warnings = match self.handlers.get(&HandlerKey::resolve(spec)) {
            Some(handler) => handler.inner().validate_parameters(&request.params)?,
            None => Vec::new(),
        };
        for param in request.params.specified() {
            if !spec.supports_parameter(param) {
                warn!(model = %spec.id, parameter = %param, "Parameter not supported by model, using neutral default");
                warnings.push(format!("{param} is not supported by {}", spec.id));
            }
        }
        Ok((spec, warnings))
    }

    /// Filter a request's parameters against `spec`. Pure.
    pub fn filter_parameters(
        &self,
        request: &InvocationRequest,
        spec: &ModelCapabilitySpec,
    ) -> FilteredParams {
        filter_parameters(&request.params, spec)
    }

    /// The wrapped handler serving `spec`.
    pub fn select_handler(&self, spec: &ModelCapabilitySpec) -> Result<&ResilientHandler, LlmError> {
        let key = HandlerKey::resolve(spec);
        self.handlers.get(&key).ok_or_else(|| {
            LlmError::validation(format!("no handler registered for {key:?} (model {})", spec.id))
        })
    }

    /// Deadline for one attempt at `spec`, extended for grounded calls.
    pub fn effective_timeout(&self, spec: &ModelCapabilitySpec, params: &FilteredParams) -> Duration {
        self.providers
            .get(spec.provider)
            .effective_timeout(spec, params.web_search)
    }

    /// Invoke a model.
    pub async fn call(&self, request: &InvocationRequest) -> Result<InvocationResponse, LlmError> {
        let (spec, _warnings) = self.validate_config(request)?;
        let params = self.filter_parameters(request, spec);
        let handler = self.select_handler(spec)?;
        let timeout = self.effective_timeout(spec, &params);

        let permit = self.breakers.admit(&spec.id).await?;
        debug!(model = %spec.id, admission = ?permit.admission(), timeout_secs = timeout.as_secs(), "Dispatching call");

        let call = ProviderCall {
            spec,
            prompt: &request.prompt,
            params: &params,
        };
        let result = handler.call(&call, timeout).await;
        permit.settle(CallOutcome::of(&result));

        match &result {
            Ok(resp) => info!(
                model = %spec.id,
                attempts = resp.metadata.attempts,
                duration_ms = resp.duration.as_millis() as u64,
                input_tokens = resp.usage.input_tokens,
                output_tokens = resp.usage.output_tokens,
                incomplete = resp.metadata.incomplete,
                "Model call succeeded"
            ),
            Err(e) => warn!(model = %spec.id, kind = %e.kind(), error = %e, "Model call failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::providers::{MockHandler, RawResponse};
    use crate::registry::{HandlerFamily, ProviderFamily};
    use crate::types::{Parameter, Prompt};

    fn test_config() -> DeepwellConfig {
        let mut config = DeepwellConfig::default();
        config.retry.jitter = false;
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 5;
        config.circuit_breaker = CircuitBreakerConfig {
            failure_threshold: 5,
            cooldown_secs: 0,
            cooldown_ms: Some(50),
        };
        config
    }

    fn factory_with(mock: Arc<MockHandler>) -> InvocationFactory {
        InvocationFactory::new(ModelRegistry::builtin(), &test_config())
            .with_handler(HandlerKey::GeminiGenerate, mock)
    }

    #[tokio::test]
    async fn test_call_success() {
        let mock = Arc::new(MockHandler::with_response(HandlerFamily::GeminiGenerate, "hello"));
        let factory = factory_with(mock.clone());
        let resp = factory
            .call(&InvocationRequest::new("gemini-2.5-flash", Prompt::single("hi")))
            .await
            .unwrap();
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.metadata.provider, ProviderFamily::Google);
        assert_eq!(resp.metadata.attempts, 1);
    }

    #[tokio::test]
    async fn test_unknown_model_is_validation() {
        let factory = factory_with(Arc::new(MockHandler::with_response(
            HandlerFamily::GeminiGenerate,
            "x",
        )));
        let err = factory
            .call(&InvocationRequest::new("nope", Prompt::single("hi")))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_provider_mismatch_is_validation() {
        let mock = Arc::new(MockHandler::with_response(HandlerFamily::GeminiGenerate, "x"));
        let factory = factory_with(mock.clone());
        let request = InvocationRequest::new("gemini-2.5-flash", Prompt::single("hi"))
            .with_provider(ProviderFamily::Anthropic);
        let err = factory.call(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::Validation { .. }));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_handler_is_validation() {
        let factory = factory_with(Arc::new(MockHandler::with_response(
            HandlerFamily::GeminiGenerate,
            "x",
        )));
        let err = factory
            .call(&InvocationRequest::new("gpt-5", Prompt::single("hi")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no handler"));
    }

    #[test]
    fn test_validate_config_warns_on_unsupported() {
        let factory = factory_with(Arc::new(MockHandler::with_response(
            HandlerFamily::GeminiGenerate,
            "x",
        )));
        let request = InvocationRequest::new("gemini-2.5-flash", Prompt::single("hi"))
            .with_verbosity(crate::types::Verbosity::High);
        let (spec, warnings) = factory.validate_config(&request).unwrap();
        assert!(!spec.supports_parameter(Parameter::Verbosity));
        assert!(warnings.iter().any(|w| w.contains("verbosity")));
    }

    #[test]
    fn test_effective_timeout_extends_for_grounding() {
        let factory = factory_with(Arc::new(MockHandler::with_response(
            HandlerFamily::GeminiGenerate,
            "x",
        )));
        let spec = factory.registry().lookup("gemini-2.5-pro").unwrap().clone();
        let plain = InvocationRequest::new("gemini-2.5-pro", Prompt::single("q"));
        let grounded = plain.clone().with_web_search(true);
        let t_plain = factory.effective_timeout(&spec, &factory.filter_parameters(&plain, &spec));
        let t_grounded =
            factory.effective_timeout(&spec, &factory.filter_parameters(&grounded, &spec));
        assert_eq!(t_plain, spec.default_timeout);
        assert_eq!(t_grounded, spec.max_timeout);
    }

    #[tokio::test]
    async fn test_breaker_opens_after_five_failed_calls() {
        let mock = Arc::new(MockHandler::failing(
            HandlerFamily::GeminiGenerate,
            LlmError::network("down"),
        ));
        let factory = factory_with(mock.clone());
        let request = InvocationRequest::new("gemini-2.5-flash", Prompt::single("hi"));
        for _ in 0..5 {
            assert!(matches!(factory.call(&request).await, Err(LlmError::Network { .. })));
        }
        let calls_before = mock.call_count();
        let err = factory.call(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::CircuitOpen { .. }));
        assert_eq!(mock.call_count(), calls_before);
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_trip_breaker() {
        let mock = Arc::new(MockHandler::with_response(HandlerFamily::GeminiGenerate, "ok"));
        let factory = factory_with(mock);
        let bad = InvocationRequest::new("gemini-2.5-flash", Prompt::single(" "));
        for _ in 0..10 {
            let _ = factory.call(&bad).await;
        }
        assert!(factory.breakers().snapshot("gemini-2.5-flash").await.is_none());
        let good = InvocationRequest::new("gemini-2.5-flash", Prompt::single("hi"));
        assert!(factory.call(&good).await.is_ok());
    }

    #[tokio::test]
    async fn test_breaker_recovers_after_cooldown() {
        let mock = Arc::new(MockHandler::from_fn(HandlerFamily::GeminiGenerate, |_, n| {
            // 5 calls x 4 attempts fail, then the provider recovers.
            if n < 20 {
                Err(LlmError::network("down"))
            } else {
                Ok(RawResponse::text("back"))
            }
        }));
        let factory = factory_with(mock.clone());
        let request = InvocationRequest::new("gemini-2.5-flash", Prompt::single("hi"));
        for _ in 0..5 {
            let _ = factory.call(&request).await;
        }
        assert!(matches!(
            factory.call(&request).await,
            Err(LlmError::CircuitOpen { .. })
        ));
        tokio::time::sleep(Duration::from_millis(80)).await;
        let resp = factory.call(&request).await.unwrap();
        assert_eq!(resp.content, "back");
        assert_eq!(mock.call_count(), 21);
    }
}
