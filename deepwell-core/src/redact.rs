//! Credential redaction for error text and log fields.
//!
//! Provider error bodies and transport messages routinely echo request URLs
//! and headers. Everything that ends up inside an `LlmError` is passed
//! through [`sanitize`] first so that API keys and bearer tokens never reach
//! logs or callers.

use crate::error::MAX_ERROR_DETAIL_CHARS;
use regex::Regex;
use std::sync::OnceLock;

/// Trait for redacting secrets from text before it is surfaced.
///
/// Implementors replace detected secrets with `[REDACTED:<type>]` markers.
pub trait Redactor: Send + Sync {
    fn redact(&self, text: &str) -> String;
}

/// Redactor covering the credential shapes used by the supported providers.
pub struct CredentialRedactor {
    patterns: Vec<(Regex, &'static str)>,
}

impl CredentialRedactor {
    pub fn new() -> Self {
        // Order matters: the more specific key shapes run before the
        // generic `key=` / bearer patterns.
        let patterns = [
            (r"\bsk-ant-[A-Za-z0-9\-_]{8,}", "ANTHROPIC_KEY"),
            (r"\bsk-(proj-)?[A-Za-z0-9\-_]{16,}", "OPENAI_KEY"),
            (r"\bAIza[0-9A-Za-z\-_]{20,}", "GOOGLE_KEY"),
            (
                r"eyJ[A-Za-z0-9\-_]{10,}\.eyJ[A-Za-z0-9\-_]{10,}\.[A-Za-z0-9\-_.]{10,}",
                "JWT_TOKEN",
            ),
            (r"(?i)bearer\s+[A-Za-z0-9\-_.~+/=]{8,}", "BEARER_TOKEN"),
            (r#"(?i)x-(api|goog-api)-key["']?\s*[:=]\s*["']?[^\s"',&]{8,}"#, "API_KEY_HEADER"),
            (r"(?i)([?&](api_?)?key=)[^&\s]+", "API_KEY_PARAM"),
            (
                r#"(?i)(api[_-]?key|apikey|api[_-]?secret)["']?\s*[:=]\s*["']?[A-Za-z0-9\-_]{16,}["']?"#,
                "API_KEY",
            ),
        ];
        let patterns = patterns
            .into_iter()
            .filter_map(|(re, name)| Regex::new(re).ok().map(|re| (re, name)))
            .collect();
        Self { patterns }
    }
}

impl Default for CredentialRedactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor for CredentialRedactor {
    fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (pattern, name) in &self.patterns {
            result = if *name == "API_KEY_PARAM" {
                // Keep the parameter name so the URL stays readable.
                pattern
                    .replace_all(&result, format!("${{1}}[REDACTED:{name}]"))
                    .into_owned()
            } else {
                pattern
                    .replace_all(&result, format!("[REDACTED:{name}]"))
                    .into_owned()
            };
        }
        result
    }
}

fn shared() -> &'static CredentialRedactor {
    static REDACTOR: OnceLock<CredentialRedactor> = OnceLock::new();
    REDACTOR.get_or_init(CredentialRedactor::new)
}

/// Redact credentials and truncate to [`MAX_ERROR_DETAIL_CHARS`].
pub fn sanitize(text: &str) -> String {
    truncate(&shared().redact(text), MAX_ERROR_DETAIL_CHARS)
}

/// Truncate on a char boundary, marking how much was dropped.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}… [{} more chars]", total - max_chars)
}
