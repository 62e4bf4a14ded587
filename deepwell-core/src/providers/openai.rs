//! OpenAI Responses API handler.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::normalize::{Segment, collect_text, select_content};
use super::transport::{build_client, endpoint, send_json};
use super::{ProviderCall, ProviderHandler, RawResponse};
use crate::config::ProviderConfig;
use crate::credentials::{ApiKey, Credentials};
use crate::error::LlmError;
use crate::registry::{HandlerFamily, ProviderFamily};
use crate::types::{FilteredParams, GenerationParams, GroundingSource, Parameter, Prompt, TokenUsage};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Handler for GPT models served by `POST /responses`.
pub struct OpenAiHandler {
    client: Client,
    base_url: String,
    api_key: Option<ApiKey>,
}

impl OpenAiHandler {
    pub fn new(config: &ProviderConfig, credentials: &Credentials) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client()?,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: credentials.get(ProviderFamily::OpenAi).cloned(),
        })
    }

    fn build_request_body(call: &ProviderCall<'_>) -> Value {
        let params = call.params;
        let mut body = json!({
            "model": call.spec.id,
            "input": build_input(call.prompt, params),
            "max_output_tokens": params.max_output_tokens,
        });
        if let Some(system) = call.prompt.system_instruction() {
            body["instructions"] = json!(system);
        }
        if params.supports(Parameter::Temperature) {
            body["temperature"] = json!(params.temperature);
        }
        if params.supports(Parameter::TopP) {
            body["top_p"] = json!(params.top_p);
        }
        if params.supports(Parameter::ReasoningEffort) {
            body["reasoning"] = json!({ "effort": params.reasoning_effort.as_str() });
        }
        if params.supports(Parameter::Verbosity) {
            body["text"] = json!({ "verbosity": params.verbosity.as_str() });
        }
        if params.web_search {
            body["tools"] = json!([{ "type": "web_search" }]);
        }
        body
    }
}

/// The `input` array: one user turn with text plus inline attachments.
pub(crate) fn build_input(prompt: &Prompt, params: &FilteredParams) -> Value {
    let mut content = vec![json!({ "type": "input_text", "text": prompt.user_input() })];
    for attachment in &params.attachments {
        if attachment.mime_type.starts_with("image/") {
            content.push(json!({
                "type": "input_image",
                "image_url": attachment.data_url(),
            }));
        } else {
            content.push(json!({
                "type": "input_file",
                "filename": attachment.name.clone().unwrap_or_else(|| "attachment".into()),
                "file_data": attachment.data_url(),
            }));
        }
    }
    json!([{ "role": "user", "content": content }])
}

/// Parse a Responses API body (shared with the deep-research handler).
pub(crate) fn parse_responses_body(body: &Value) -> Result<RawResponse, LlmError> {
    let output = body["output"].as_array().ok_or_else(|| {
        LlmError::invalid_response("Missing 'output' array in Responses API body")
    })?;

    // Some gateways add a top-level `output_text` that duplicates the message parts.
    let flattened = body["output_text"].as_str();
    let mut segments: Vec<Segment> = flattened.map(Segment::message).into_iter().collect();
    let mut sources = Vec::new();
    for item in output {
        match item["type"].as_str() {
            Some("message") => {
                for part in item["content"].as_array().into_iter().flatten() {
                    if flattened.is_none() {
                        let text = if part["type"] == "refusal" {
                            collect_text(&part["refusal"])
                        } else {
                            collect_text(part)
                        };
                        segments.push(Segment::message(text));
                    }
                    for ann in part["annotations"].as_array().into_iter().flatten() {
                        if ann["type"] == "url_citation" {
                            sources.push(GroundingSource::new(
                                ann["title"].as_str().map(str::to_string),
                                ann["url"].as_str().map(str::to_string),
                            ));
                        }
                    }
                }
            }
            Some("reasoning") => {
                segments.push(Segment::reasoning(collect_text(&item["summary"])));
            }
            _ => {}
        }
    }

    let status = body["status"].as_str();
    let incomplete_reason = body["incomplete_details"]["reason"].as_str();
    let incomplete = status == Some("incomplete");
    let content = select_content(&segments, incomplete)?;

    let usage = &body["usage"];
    Ok(RawResponse {
        content,
        usage: TokenUsage {
            input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as usize,
            output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as usize,
            reasoning_tokens: usage["output_tokens_details"]["reasoning_tokens"]
                .as_u64()
                .unwrap_or(0) as usize,
        },
        reported_duration_ms: None,
        finish_reason: incomplete_reason.or(status).map(str::to_string),
        grounding_sources: sources,
        incomplete,
        model: body["model"].as_str().map(str::to_string),
    })
}

#[async_trait]
impl ProviderHandler for OpenAiHandler {
    fn family(&self) -> HandlerFamily {
        HandlerFamily::OpenAiResponses
    }

    fn supported_parameters(&self) -> BTreeSet<Parameter> {
        use Parameter::*;
        BTreeSet::from([
            Temperature,
            TopP,
            MaxOutputTokens,
            ReasoningEffort,
            Verbosity,
            WebSearch,
            Attachments,
        ])
    }

    fn validate_parameters(&self, params: &GenerationParams) -> Result<Vec<String>, LlmError> {
        let mut warnings = Vec::new();
        if params.top_k.is_some() {
            warnings.push("topK is not accepted by the OpenAI Responses API and will be ignored".into());
        }
        if params.reasoning_effort.is_some() && params.temperature.is_some() {
            warnings.push(
                "OpenAI reasoning models ignore temperature; only one of them will be sent".into(),
            );
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
        let body = Self::build_request_body(call);
        debug!(model = %call.spec.id, web_search = call.params.web_search, "Sending OpenAI request");

        let request = self
            .client
            .post(endpoint(&self.base_url, "responses"))
            .bearer_auth(api_key.expose())
            .json(&body);
        let json = send_json(ProviderFamily::OpenAi, request, &cancel).await?;
        parse_responses_body(&json)
    }
}
