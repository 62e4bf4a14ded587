//! OpenAI deep-research handler.
//!
//! Deep-research models run as background jobs on the Responses API: the
//! handler submits the job, then polls until it reaches a terminal status.
//! Two sub-variants share the capability family and differ in tools and
//! poll cadence.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::openai::{DEFAULT_BASE_URL, build_input, parse_responses_body};
use super::transport::{build_client, cancelled, endpoint, send_json};
use super::{ProviderCall, ProviderHandler, RawResponse};
use crate::config::ProviderConfig;
use crate::credentials::{ApiKey, Credentials};
use crate::error::LlmError;
use crate::redact::sanitize;
use crate::registry::{HandlerFamily, ProviderFamily};
use crate::types::{GenerationParams, Parameter};

/// Deep-research sub-variant, chosen by model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeepResearchVariant {
    /// Full model: web search plus code interpreter, slower cadence.
    Full,
    /// Mini model: web search only.
    Mini,
}

impl DeepResearchVariant {
    /// `Mini` when any dash-separated segment of the model id is `mini`.
    pub fn for_model(model_id: &str) -> Self {
        if model_id.split('-').any(|seg| seg.eq_ignore_ascii_case("mini")) {
            DeepResearchVariant::Mini
        } else {
            DeepResearchVariant::Full
        }
    }

    pub fn default_poll_interval(&self) -> Duration {
        match self {
            DeepResearchVariant::Full => Duration::from_secs(15),
            DeepResearchVariant::Mini => Duration::from_secs(5),
        }
    }

    fn tools(&self) -> Value {
        match self {
            DeepResearchVariant::Full => json!([
                { "type": "web_search_preview" },
                { "type": "code_interpreter", "container": { "type": "auto" } }
            ]),
            DeepResearchVariant::Mini => json!([{ "type": "web_search_preview" }]),
        }
    }
}

/// Background-mode handler for deep-research models.
pub struct DeepResearchHandler {
    variant: DeepResearchVariant,
    client: Client,
    base_url: String,
    api_key: Option<ApiKey>,
    poll_interval: Duration,
}

impl DeepResearchHandler {
    pub fn new(
        variant: DeepResearchVariant,
        config: &ProviderConfig,
        credentials: &Credentials,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            variant,
            client: build_client()?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: credentials.get(ProviderFamily::OpenAi).cloned(),
            poll_interval: variant.default_poll_interval(),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn variant(&self) -> DeepResearchVariant {
        self.variant
    }

    fn build_request_body(&self, call: &ProviderCall<'_>) -> Value {
        let mut body = json!({
            "model": call.spec.id,
            "input": build_input(call.prompt, call.params),
            "background": true,
            "tools": self.variant.tools(),
            "reasoning": { "summary": "auto" },
            "max_output_tokens": call.params.max_output_tokens,
        });
        if let Some(system) = call.prompt.system_instruction() {
            body["instructions"] = json!(system);
        }
        body
    }

    /// Ask the provider to stop a job we no longer wait for. Best effort.
    fn abandon(&self, api_key: &ApiKey, job_id: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(job_id = %job_id, "No runtime left to cancel background job");
            return;
        };
        let request = self
            .client
            .post(endpoint(&self.base_url, &format!("responses/{job_id}/cancel")))
            .bearer_auth(api_key.expose());
        let job_id = job_id.to_string();
        runtime.spawn(async move {
            if let Err(e) = request.send().await {
                debug!(job_id = %job_id, error = %sanitize(&e.to_string()), "Failed to cancel background job");
            }
        });
    }
}

/// Cancels a submitted job unless the poll loop saw it reach a terminal
/// status. Covers cancellation, poll errors and the future being dropped.
struct JobGuard<'a> {
    handler: &'a DeepResearchHandler,
    api_key: &'a ApiKey,
    job_id: &'a str,
    armed: bool,
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(job_id = %self.job_id, "Abandoning deep-research job");
            self.handler.abandon(self.api_key, self.job_id);
        }
    }
}

/// Terminal status of a background job, if it has one.
fn terminal_status(body: &Value) -> Option<&str> {
    match body["status"].as_str() {
        Some(s @ ("completed" | "incomplete" | "failed" | "cancelled")) => Some(s),
        _ => None,
    }
}

#[async_trait]
impl ProviderHandler for DeepResearchHandler {
    fn family(&self) -> HandlerFamily {
        HandlerFamily::OpenAiDeepResearch
    }

    fn supported_parameters(&self) -> BTreeSet<Parameter> {
        BTreeSet::from([Parameter::MaxOutputTokens, Parameter::WebSearch])
    }

    fn validate_parameters(&self, params: &GenerationParams) -> Result<Vec<String>, LlmError> {
        let mut warnings: Vec<String> = params
            .specified()
            .into_iter()
            .filter(|p| !self.supported_parameters().contains(p))
            .map(|p| format!("{p} is ignored by deep-research models"))
            .collect();
        if params.web_search == Some(false) {
            warnings.push("deep-research models always search the web".into());
        }
        Ok(warnings)
    }

    async fn invoke(
        &self,
        call: &ProviderCall<'_>,
        cancel: CancellationToken,
    ) -> Result<RawResponse, LlmError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| LlmError::Authentication {
            provider: ProviderFamily::OpenAi.to_string(),
            message: "no API key configured".into(),
        })?;

        let submit = self
            .client
            .post(endpoint(&self.base_url, "responses"))
            .bearer_auth(api_key.expose())
            .json(&self.build_request_body(call));
        let mut job = send_json(ProviderFamily::OpenAi, submit, &cancel).await?;
        let job_id = job["id"]
            .as_str()
            .ok_or_else(|| LlmError::invalid_response("background job has no id"))?
            .to_string();
        info!(model = %call.spec.id, variant = ?self.variant, job_id = %job_id, "Deep-research job submitted");

        let mut guard = JobGuard {
            handler: self,
            api_key,
            job_id: &job_id,
            armed: terminal_status(&job).is_none(),
        };
        let mut polls = 0u32;
        while terminal_status(&job).is_none() {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => {
                    debug!(job_id = %job_id, polls, "Poll loop cancelled");
                    return Err(cancelled());
                }
            }
            let poll = self
                .client
                .get(endpoint(&self.base_url, &format!("responses/{job_id}")))
                .bearer_auth(api_key.expose());
            job = send_json(ProviderFamily::OpenAi, poll, &cancel).await?;
            polls += 1;
            debug!(job_id = %job_id, polls, status = job["status"].as_str().unwrap_or("?"), "Polled deep-research job");
        }
        guard.armed = false;

        match terminal_status(&job) {
            Some("failed") => Err(LlmError::ExternalProvider {
                message: sanitize(&format!(
                    "deep-research job {job_id} failed: {}",
                    job["error"]["message"].as_str().unwrap_or("no detail")
                )),
                status: None,
            }),
            Some("cancelled") => Err(LlmError::ExternalProvider {
                message: format!("deep-research job {job_id} was cancelled by the provider"),
                status: None,
            }),
            _ => {
                let mut raw = parse_responses_body(&job)?;
                raw.reported_duration_ms = job["created_at"]
                    .as_f64()
                    .zip(job["completed_at"].as_f64())
                    .map(|(start, end)| (end - start) * 1000.0);
                Ok(raw)
            }
        }
    }
}
