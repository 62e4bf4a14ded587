//! Google Gemini `generateContent` handler.
//!
//! Gemini expects a fully populated `generationConfig`, so every sampling
//! field is sent, using the neutral defaults when the caller gave none.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::normalize::{Segment, select_content};
use super::transport::{build_client, endpoint, send_json};
use super::{ProviderCall, ProviderHandler, RawResponse};
use crate::config::ProviderConfig;
use crate::credentials::{ApiKey, Credentials};
use crate::error::LlmError;
use crate::redact::sanitize;
use crate::registry::{HandlerFamily, ProviderFamily};
use crate::types::{GenerationParams, GroundingSource, Parameter, ReasoningEffort, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Handler for Gemini models.
pub struct GeminiHandler {
    client: Client,
    base_url: String,
    api_key: Option<ApiKey>,
}

impl GeminiHandler {
    pub fn new(config: &ProviderConfig, credentials: &Credentials) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client()?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: credentials.get(ProviderFamily::Google).cloned(),
        })
    }

    fn build_request_body(call: &ProviderCall<'_>) -> Value {
        let params = call.params;
        let mut parts = vec![json!({ "text": call.prompt.user_input() })];
        for attachment in &params.attachments {
            parts.push(json!({
                "inline_data": {
                    "mime_type": attachment.mime_type,
                    "data": attachment.base64(),
                }
            }));
        }

        let mut generation_config = json!({
            "temperature": params.temperature,
            "topP": params.top_p,
            "maxOutputTokens": params.max_output_tokens,
        });
        // Gemini rejects topK = 0; omitting it means no truncation.
        if params.top_k > 0 {
            generation_config["topK"] = json!(params.top_k);
        }
        if params.was_requested(Parameter::ReasoningEffort) {
            let budget = match params.reasoning_effort {
                ReasoningEffort::Minimal => 0,
                effort => effort.thinking_budget(),
            };
            generation_config["thinkingConfig"] = json!({
                "thinkingBudget": budget,
                "includeThoughts": false,
            });
        }

        let mut body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        });
        if let Some(system) = call.prompt.system_instruction() {
            body["system_instruction"] = json!({ "parts": [{ "text": system }] });
        }
        if params.web_search {
            body["tools"] = json!([{ "google_search": {} }]);
        }
        body
    }

    fn parse_response(body: &Value) -> Result<RawResponse, LlmError> {
        let Some(candidate) = body["candidates"].as_array().and_then(|c| c.first()) else {
            if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
                return Err(LlmError::ExternalProvider {
                    message: sanitize(&format!("Gemini blocked the prompt: {reason}")),
                    status: None,
                });
            }
            return Err(LlmError::invalid_response("Missing 'candidates' in Gemini response"));
        };

        let segments: Vec<Segment> = candidate["content"]["parts"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|part| {
                let text = part["text"].as_str()?;
                Some(if part["thought"].as_bool() == Some(true) {
                    Segment::reasoning(text)
                } else {
                    Segment::message(text)
                })
            })
            .collect();

        let finish_reason = candidate["finishReason"].as_str();
        let incomplete = finish_reason == Some("MAX_TOKENS");
        let content = select_content(&segments, incomplete)?;

        let sources = candidate["groundingMetadata"]["groundingChunks"]
            .as_array()
            .into_iter()
            .flatten()
            .map(|chunk| {
                GroundingSource::new(
                    chunk["web"]["title"].as_str().map(str::to_string),
                    chunk["web"]["uri"].as_str().map(str::to_string),
                )
            })
            .collect();

        let usage = &body["usageMetadata"];
        Ok(RawResponse {
            content,
            usage: TokenUsage {
                input_tokens: usage["promptTokenCount"].as_u64().unwrap_or(0) as usize,
                output_tokens: usage["candidatesTokenCount"].as_u64().unwrap_or(0) as usize,
                reasoning_tokens: usage["thoughtsTokenCount"].as_u64().unwrap_or(0) as usize,
            },
            reported_duration_ms: None,
            finish_reason: finish_reason.map(str::to_string),
            grounding_sources: sources,
            incomplete,
            model: body["modelVersion"].as_str().map(str::to_string),
        })
    }
}

#[async_trait]
impl ProviderHandler for GeminiHandler {
    fn family(&self) -> HandlerFamily {
        HandlerFamily::GeminiGenerate
    }

    fn supported_parameters(&self) -> BTreeSet<Parameter> {
        use Parameter::*;
        BTreeSet::from([
            Temperature,
            TopP,
            TopK,
            MaxOutputTokens,
            ReasoningEffort,
            WebSearch,
            Attachments,
        ])
    }

    fn validate_parameters(&self, params: &GenerationParams) -> Result<Vec<String>, LlmError> {
        let mut warnings = Vec::new();
        if params.verbosity.is_some() {
            warnings.push("verbosity is ignored by Gemini models".into());
        }
        if params.top_k == Some(0) {
            warnings.push("topK = 0 disables top-k sampling on Gemini".into());
        }
        Ok(warnings)
    }

    async fn invoke(
        &self,
        call: &ProviderCall<'_>,
        cancel: CancellationToken,
    ) -> Result<RawResponse, LlmError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| LlmError::Authentication {
            provider: ProviderFamily::Google.to_string(),
            message: "no API key configured".into(),
        })?;
        let body = Self::build_request_body(call);
        debug!(model = %call.spec.id, grounded = call.params.web_search, "Sending Gemini request");

        // Key goes in a header so it never appears in URLs or error text.
        let request = self
            .client
            .post(endpoint(
                &self.base_url,
                &format!("models/{}:generateContent", call.spec.id),
            ))
            .header("x-goog-api-key", api_key.expose())
            .json(&body);
        let json = send_json(ProviderFamily::Google, request, &cancel).await?;
        Self::parse_response(&json)
    }
}
