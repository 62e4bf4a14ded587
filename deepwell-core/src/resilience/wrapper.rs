//! The resilience decorator composed around every provider handler.
//!
//! Adds input validation, a per-attempt deadline with cooperative
//! cancellation, retry with backoff, and response validation. Breaker
//! accounting happens one level up in the factory, once per call.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::retry::with_retry;
use super::validation::{TEMPERATURE_RANGE, TOP_P_RANGE, validate_prompt};
use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::providers::normalize::TRUNCATION_NOTICE;
use crate::providers::{ProviderCall, ProviderHandler, RawResponse};
use crate::types::{FilteredParams, InvocationResponse, ResponseMetadata};

/// How long a timed-out handler may take to wind down after cancellation.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// A provider handler wrapped with retries, deadlines and validation.
pub struct ResilientHandler {
    inner: Arc<dyn ProviderHandler>,
    retry: RetryConfig,
}

impl ResilientHandler {
    pub fn new(inner: Arc<dyn ProviderHandler>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }

    pub fn inner(&self) -> &dyn ProviderHandler {
        self.inner.as_ref()
    }

    /// Run `call` with each attempt bounded by `timeout`.
    pub async fn call(
        &self,
        call: &ProviderCall<'_>,
        timeout: Duration,
    ) -> Result<InvocationResponse, LlmError> {
        self.validate_call(call)?;

        let started = Instant::now();
        let (raw, attempts) =
            with_retry(&self.retry, &call.spec.id, |attempt| self.attempt(call, timeout, attempt))
                .await?;
        Ok(self.finish(call, raw, attempts, started.elapsed()))
    }

    fn validate_call(&self, call: &ProviderCall<'_>) -> Result<(), LlmError> {
        validate_prompt(call.prompt)?;
        if call.spec.handler != self.inner.family() {
            return Err(LlmError::validation(format!(
                "model {} needs a {:?} handler, not {:?}",
                call.spec.id,
                call.spec.handler,
                self.inner.family()
            )));
        }
        validate_filtered(call.params)
    }

    async fn attempt(
        &self,
        call: &ProviderCall<'_>,
        timeout: Duration,
        attempt: u32,
    ) -> Result<RawResponse, LlmError> {
        debug!(model = %call.spec.id, attempt = attempt + 1, timeout_ms = timeout.as_millis() as u64, "Invoking provider");
        let cancel = CancellationToken::new();
        let invoke = self.inner.invoke(call, cancel.clone());
        tokio::pin!(invoke);
        let raw = tokio::select! {
            result = &mut invoke => result?,
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                warn!(model = %call.spec.id, timeout_ms = timeout.as_millis() as u64, "Provider call timed out");
                // Keep polling so the handler can observe the cancellation and clean up.
                if tokio::time::timeout(CANCEL_GRACE, &mut invoke).await.is_err() {
                    debug!(model = %call.spec.id, "Handler did not stop within the cancellation grace period");
                }
                return Err(LlmError::timeout(timeout));
            }
        };

        if raw.content.trim().is_empty() && !raw.incomplete {
            return Err(LlmError::invalid_response(format!(
                "{} returned empty content",
                call.spec.id
            )));
        }
        Ok(raw)
    }

    fn finish(
        &self,
        call: &ProviderCall<'_>,
        mut raw: RawResponse,
        attempts: u32,
        elapsed: Duration,
    ) -> InvocationResponse {
        if raw.incomplete {
            warn!(
                model = %call.spec.id,
                max_output_tokens = call.params.max_output_tokens,
                "Provider response is incomplete"
            );
            if raw.content.trim().is_empty() {
                raw.content = TRUNCATION_NOTICE.to_string();
            }
        }

        InvocationResponse {
            content: raw.content,
            usage: raw.usage,
            duration: sanitize_duration(raw.reported_duration_ms, elapsed),
            metadata: ResponseMetadata {
                model: raw.model.unwrap_or_else(|| call.spec.id.clone()),
                provider: call.spec.provider,
                finish_reason: raw.finish_reason,
                grounding_sources: raw.grounding_sources,
                incomplete: raw.incomplete,
                attempts,
            },
        }
    }
}

/// Provider-reported duration if usable, measured time if absent.
///
/// Negative or non-finite reports become zero.
pub fn sanitize_duration(reported_ms: Option<f64>, measured: Duration) -> Duration {
    match reported_ms {
        None => measured,
        Some(ms) if ms.is_finite() && ms >= 0.0 => Duration::from_secs_f64(ms / 1000.0),
        Some(ms) => {
            debug!(reported_ms = ms, "Discarding invalid provider duration");
            Duration::ZERO
        }
    }
}

fn validate_filtered(params: &FilteredParams) -> Result<(), LlmError> {
    let t = params.temperature;
    if !(t.is_finite() && (TEMPERATURE_RANGE.0..=TEMPERATURE_RANGE.1).contains(&t)) {
        return Err(LlmError::validation(format!("temperature {t} out of range")));
    }
    let p = params.top_p;
    if !(p.is_finite() && (TOP_P_RANGE.0..=TOP_P_RANGE.1).contains(&p)) {
        return Err(LlmError::validation(format!("topP {p} out of range")));
    }
    if params.max_output_tokens == 0 {
        return Err(LlmError::validation("maxOutputTokens must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockHandler;
    use crate::registry::{HandlerFamily, ModelCapabilitySpec, ModelRegistry};
    use crate::resilience::validation::filter_parameters;
    use crate::types::{GenerationParams, Prompt};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        }
    }

    fn gemini() -> ModelCapabilitySpec {
        ModelRegistry::builtin().lookup("gemini-2.5-flash").unwrap().clone()
    }

    async fn run(
        mock: Arc<MockHandler>,
        prompt: Prompt,
        timeout: Duration,
    ) -> Result<InvocationResponse, LlmError> {
        let spec = gemini();
        let params = filter_parameters(&GenerationParams::default(), &spec);
        let wrapper = ResilientHandler::new(mock, no_jitter());
        wrapper
            .call(
                &ProviderCall {
                    spec: &spec,
                    prompt: &prompt,
                    params: &params,
                },
                timeout,
            )
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds_with_attempt_count() {
        let mock = Arc::new(MockHandler::sequence(
            HandlerFamily::GeminiGenerate,
            vec![
                Err(LlmError::network("reset")),
                Err(LlmError::network("reset")),
                Ok(RawResponse::text("done")),
            ],
        ));
        let resp = run(mock.clone(), Prompt::single("q"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(resp.content, "done");
        assert_eq!(resp.metadata.attempts, 3);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_and_retries() {
        let mock = Arc::new(
            MockHandler::with_response(HandlerFamily::GeminiGenerate, "slow")
                .with_delay(Duration::from_secs(60)),
        );
        let err = run(mock.clone(), Prompt::single("q"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, LlmError::Timeout { timeout_ms: 1000 });
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test]
    async fn test_empty_prompt_never_reaches_provider() {
        let mock = Arc::new(MockHandler::with_response(HandlerFamily::GeminiGenerate, "x"));
        let err = run(mock.clone(), Prompt::single("  "), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Validation { .. }));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_handler_family_rejected() {
        let mock = Arc::new(MockHandler::with_response(HandlerFamily::AnthropicMessages, "x"));
        let err = run(mock.clone(), Prompt::single("q"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Validation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_content_retried_once_then_surfaced() {
        let mock = Arc::new(MockHandler::with_response(HandlerFamily::GeminiGenerate, ""));
        let err = run(mock.clone(), Prompt::single("q"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_incomplete_response_kept() {
        let mock = Arc::new(MockHandler::from_fn(HandlerFamily::GeminiGenerate, |_, _| {
            Ok(RawResponse {
                content: "half".into(),
                incomplete: true,
                reported_duration_ms: Some(-5.0),
                ..Default::default()
            })
        }));
        let resp = run(mock, Prompt::single("q"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(resp.content, "half");
        assert!(resp.metadata.incomplete);
        assert_eq!(resp.duration, Duration::ZERO);
    }

    #[test]
    fn test_sanitize_duration() {
        let measured = Duration::from_millis(250);
        assert_eq!(sanitize_duration(None, measured), measured);
        assert_eq!(sanitize_duration(Some(1500.0), measured), Duration::from_millis(1500));
        assert_eq!(sanitize_duration(Some(f64::NAN), measured), Duration::ZERO);
        assert_eq!(sanitize_duration(Some(-1.0), measured), Duration::ZERO);
    }
}
