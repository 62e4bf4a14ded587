//! Anthropic Messages API handler.
//!
//! - Auth via `x-api-key` header (not `Authorization: Bearer`)
//! - Required `anthropic-version` header
//! - `max_tokens` and `temperature` are always sent
//! - Extended thinking is enabled only when the caller asks for a
//!   reasoning effort, and forces temperature to 1

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
use crate::registry::{HandlerFamily, ProviderFamily};
use crate::types::{
    GenerationParams, GroundingSource, Parameter, ReasoningEffort, TokenUsage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Smallest thinking budget the API accepts.
const MIN_THINKING_BUDGET: u32 = 1024;
const WEB_SEARCH_MAX_USES: u32 = 5;

/// Handler for Claude models.
pub struct AnthropicHandler {
    client: Client,
    base_url: String,
    api_key: Option<ApiKey>,
}

impl AnthropicHandler {
    pub fn new(config: &ProviderConfig, credentials: &Credentials) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client()?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: credentials.get(ProviderFamily::Anthropic).cloned(),
        })
    }

    /// Thinking budget for this call, if extended thinking applies.
    fn thinking_budget(call: &ProviderCall<'_>) -> Option<u32> {
        let params = call.params;
        if !params.was_requested(Parameter::ReasoningEffort)
            || params.reasoning_effort == ReasoningEffort::Minimal
        {
            return None;
        }
        // The budget must leave room for the visible answer.
        let budget = params
            .reasoning_effort
            .thinking_budget()
            .min(params.max_output_tokens.saturating_sub(MIN_THINKING_BUDGET));
        (budget >= MIN_THINKING_BUDGET).then_some(budget)
    }

    fn build_request_body(call: &ProviderCall<'_>) -> Value {
        let params = call.params;
        let mut content = vec![json!({ "type": "text", "text": call.prompt.user_input() })];
        for attachment in &params.attachments {
            let block_type = if attachment.mime_type.starts_with("image/") {
                "image"
            } else {
                "document"
            };
            content.push(json!({
                "type": block_type,
                "source": {
                    "type": "base64",
                    "media_type": attachment.mime_type,
                    "data": attachment.base64(),
                },
            }));
        }

        let thinking = Self::thinking_budget(call);
        let mut body = json!({
            "model": call.spec.id,
            "max_tokens": params.max_output_tokens,
            "temperature": if thinking.is_some() { 1.0 } else { params.temperature },
            "messages": [{ "role": "user", "content": content }],
        });

        if let Some(system) = call.prompt.system_instruction() {
            body["system"] = Value::String(system.to_string());
        }
        if let Some(budget) = thinking {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        } else {
            // The API rejects sampling overrides alongside extended thinking.
            if params.was_requested(Parameter::TopP) {
                body["top_p"] = json!(params.top_p);
            }
            if params.was_requested(Parameter::TopK) && params.top_k > 0 {
                body["top_k"] = json!(params.top_k);
            }
        }
        if params.web_search {
            body["tools"] = json!([{
                "type": "web_search_20250305",
                "name": "web_search",
                "max_uses": WEB_SEARCH_MAX_USES,
            }]);
        }
        body
    }

    fn parse_response(body: &Value) -> Result<RawResponse, LlmError> {
        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| LlmError::invalid_response("Missing 'content' array in response"))?;

        let mut segments = Vec::new();
        let mut sources = Vec::new();
        for block in blocks {
            match block["type"].as_str().unwrap_or("text") {
                "text" => {
                    segments.push(Segment::message(block["text"].as_str().unwrap_or("")));
                    for citation in block["citations"].as_array().into_iter().flatten() {
                        sources.push(GroundingSource::new(
                            citation["title"].as_str().map(str::to_string),
                            citation["url"].as_str().map(str::to_string),
                        ));
                    }
                }
                "thinking" => {
                    segments.push(Segment::reasoning(block["thinking"].as_str().unwrap_or("")));
                }
                "web_search_tool_result" => {
                    for result in block["content"].as_array().into_iter().flatten() {
                        sources.push(GroundingSource::new(
                            result["title"].as_str().map(str::to_string),
                            result["url"].as_str().map(str::to_string),
                        ));
                    }
                }
                other => debug!(block_type = other, "Ignoring content block"),
            }
        }

        let stop_reason = body["stop_reason"].as_str();
        let incomplete = stop_reason == Some("max_tokens");
        let content = select_content(&segments, incomplete)?;

        Ok(RawResponse {
            content,
            usage: TokenUsage {
                input_tokens: body["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
                output_tokens: body["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
                reasoning_tokens: 0,
            },
            reported_duration_ms: None,
            finish_reason: stop_reason.map(str::to_string),
            grounding_sources: sources,
            incomplete,
            model: body["model"].as_str().map(str::to_string),
        })
    }
}

#[async_trait]
impl ProviderHandler for AnthropicHandler {
    fn family(&self) -> HandlerFamily {
        HandlerFamily::AnthropicMessages
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
        if let Some(t) = params.temperature
            && t > 1.0
        {
            return Err(LlmError::validation(format!(
                "Anthropic temperature must be within [0, 1], got {t}"
            )));
        }
        let mut warnings = Vec::new();
        if params.verbosity.is_some() {
            warnings.push("verbosity is ignored by Anthropic models".into());
        }
        if params.reasoning_effort.is_some() && (params.top_p.is_some() || params.top_k.is_some()) {
            warnings.push("topP/topK are dropped while extended thinking is enabled".into());
        }
        Ok(warnings)
    }

    async fn invoke(
        &self,
        call: &ProviderCall<'_>,
        cancel: CancellationToken,
    ) -> Result<RawResponse, LlmError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| LlmError::Authentication {
            provider: ProviderFamily::Anthropic.to_string(),
            message: "no API key configured".into(),
        })?;
        let body = Self::build_request_body(call);
        debug!(model = %call.spec.id, thinking = body.get("thinking").is_some(), "Sending Anthropic request");

        let request = self
            .client
            .post(endpoint(&self.base_url, "messages"))
            .header("x-api-key", api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let json = send_json(ProviderFamily::Anthropic, request, &cancel).await?;
        Self::parse_response(&json)
    }
}
