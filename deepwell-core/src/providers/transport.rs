//! Shared HTTP plumbing for provider handlers.
//!
//! Maps every reqwest failure and non-success status into [`LlmError`],
//! with credentials scrubbed from the detail text.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LlmError;
use crate::redact::sanitize;
use crate::registry::ProviderFamily;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Backstop only; per-call deadlines are enforced by the resilience layer.
const REQUEST_CEILING: Duration = Duration::from_secs(3600);

/// Build the HTTP client shared by a handler's calls.
pub fn build_client() -> Result<Client, LlmError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_CEILING)
        .build()
        .map_err(|e| LlmError::network(sanitize(&format!("Failed to build HTTP client: {e}"))))
}

/// Send `request`, returning the decoded JSON body of a 2xx response.
///
/// Stops waiting as soon as `cancel` fires; dropping the in-flight future
/// aborts the connection.
pub async fn send_json(
    provider: ProviderFamily,
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Value, LlmError> {
    let exchange = async {
        let response = request.send().await.map_err(|e| map_transport_error(&e))?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(|e| map_transport_error(&e))?;

        if !status.is_success() {
            debug!(provider = %provider, status = status.as_u16(), "Provider returned error status");
            return Err(map_http_error(provider, status, &body, retry_after));
        }

        serde_json::from_str::<Value>(&body).map_err(|e| {
            LlmError::invalid_response(sanitize(&format!(
                "{provider} returned undecodable JSON: {e}"
            )))
        })
    };

    tokio::select! {
        result = exchange => result,
        _ = cancel.cancelled() => Err(cancelled()),
    }
}

/// Error returned when a call is abandoned because its deadline fired.
pub fn cancelled() -> LlmError {
    LlmError::Timeout { timeout_ms: 0 }
}

/// Map a non-success HTTP status into the error taxonomy.
pub fn map_http_error(
    provider: ProviderFamily,
    status: StatusCode,
    body: &str,
    retry_after_secs: Option<u64>,
) -> LlmError {
    let detail = sanitize(&format!(
        "HTTP {} from {provider}: {}",
        status.as_u16(),
        extract_error_message(body)
    ));
    match status.as_u16() {
        400 | 422 => LlmError::Validation { message: detail },
        401 | 403 => LlmError::Authentication {
            provider: provider.to_string(),
            message: detail,
        },
        408 => LlmError::Timeout { timeout_ms: 0 },
        429 => LlmError::RateLimited {
            provider: provider.to_string(),
            message: detail,
            retry_after_secs,
        },
        500..=599 => LlmError::Network {
            message: detail,
            status: Some(status.as_u16()),
            retry_after_secs,
        },
        other => LlmError::ExternalProvider {
            message: detail,
            status: Some(other),
        },
    }
}

/// Map a reqwest failure (no HTTP status) into the error taxonomy.
pub fn map_transport_error(err: &reqwest::Error) -> LlmError {
    if err.is_timeout() && !err.is_connect() {
        LlmError::timeout(REQUEST_CEILING)
    } else if err.is_decode() {
        LlmError::invalid_response(sanitize(&err.to_string()))
    } else if err.is_connect() || err.is_request() || err.is_body() {
        LlmError::network(sanitize(&err.to_string()))
    } else {
        LlmError::ExternalProvider {
            message: sanitize(&err.to_string()),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// `Retry-After` in whole seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| s.ceil() as u64)
}

/// Pull `error.message` out of a JSON error body, else return the raw body.
pub fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["message"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Join a base URL and a path without doubling slashes.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
