//! Configuration system for Deepwell.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config dir (`deepwell/config.toml`) and/or
//! `.deepwell/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::registry::{ModelCapabilitySpec, ProviderFamily};
use crate::research::types::DepthTier;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeepwellConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub research: ResearchConfig,
}

/// Per-family provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub openai: ProviderConfig,
    pub anthropic: ProviderConfig,
    pub google: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: ProviderConfig::new("OPENAI_API_KEY"),
            anthropic: ProviderConfig::new("ANTHROPIC_API_KEY"),
            google: ProviderConfig::new("GEMINI_API_KEY"),
        }
    }
}

impl ProvidersConfig {
    pub fn get(&self, family: ProviderFamily) -> &ProviderConfig {
        match family {
            ProviderFamily::OpenAi => &self.openai,
            ProviderFamily::Anthropic => &self.anthropic,
            ProviderFamily::Google => &self.google,
        }
    }
}

/// Settings for one provider family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Overrides the registry's default timeout for every model of this family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// Overrides the registry's extended timeout used for grounded calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounded_timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn new(api_key_env: impl Into<String>) -> Self {
        Self {
            api_key_env: api_key_env.into(),
            base_url: None,
            request_timeout_secs: None,
            grounded_timeout_secs: None,
        }
    }

    /// Effective timeout for a call to `spec`.
    ///
    /// Grounded (web-search) calls and models with special transport get
    /// the longer bound.
    pub fn effective_timeout(&self, spec: &ModelCapabilitySpec, grounded: bool) -> Duration {
        let standard = self
            .request_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(spec.default_timeout);
        if grounded || spec.special_transport {
            let extended = self
                .grounded_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(spec.max_timeout);
            extended.max(standard)
        } else {
            standard
        }
    }
}

/// Retry policy for transient provider failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 10% of the base delay as random jitter.
    pub jitter: bool,
    /// Also retry `RateLimited` errors (honouring retry-after).
    pub retry_rate_limited: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
            retry_rate_limited: false,
        }
    }
}

/// Per-model circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing one trial call.
    pub cooldown_secs: u64,
    /// Sub-second cool-down, mostly for tests. Takes precedence when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        self.cooldown_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_secs(self.cooldown_secs))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
            cooldown_ms: None,
        }
    }
}

/// Research pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub max_questions: usize,
    pub parallel_executors: usize,
    pub depth: DepthTier,
    pub enable_grounding: bool,
    pub planner_model: String,
    pub executor_model: String,
    pub synthesis_model: String,
    /// Deadline for one whole research run.
    pub run_timeout_secs: u64,
    /// Answers longer than this (in chars) earn the higher confidence bonus.
    pub answer_length_threshold: usize,
    /// Capacity of the progress queue between sub-tasks and the callback.
    pub progress_buffer: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_questions: 5,
            parallel_executors: 3,
            depth: DepthTier::Balanced,
            enable_grounding: true,
            planner_model: "gemini-2.5-flash".to_string(),
            executor_model: "gemini-2.5-pro".to_string(),
            synthesis_model: "gemini-2.5-pro".to_string(),
            run_timeout_secs: 1800,
            answer_length_threshold: 500,
            progress_buffer: 64,
        }
    }
}

impl DeepwellConfig {
    /// Validate this config.
    ///
    /// Hard violations are returned as `ConfigError`; questionable but
    /// workable values come back as human-readable warnings.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        if self.research.parallel_executors == 0 {
            return Err(ConfigError::Invalid {
                message: "research.parallel_executors must be at least 1".into(),
            });
        }
        if self.research.max_questions == 0 {
            return Err(ConfigError::Invalid {
                message: "research.max_questions must be at least 1".into(),
            });
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "circuit_breaker.failure_threshold must be at least 1".into(),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "retry.backoff_multiplier ({}) must be >= 1.0",
                    self.retry.backoff_multiplier
                ),
            });
        }
        for family in ProviderFamily::ALL {
            if let Some(base) = &self.providers.get(family).base_url {
                let parsed = url::Url::parse(base).map_err(|e| ConfigError::Invalid {
                    message: format!("providers.{family}.base_url '{base}' is not a valid URL: {e}"),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::Invalid {
                        message: format!(
                            "providers.{family}.base_url must use http or https, got '{}'",
                            parsed.scheme()
                        ),
                    });
                }
            }
        }

        let mut warnings = Vec::new();
        if self.retry.max_retries > 3 {
            warnings.push(format!(
                "retry.max_retries ({}) exceeds 3; failing providers will see amplified load",
                self.retry.max_retries
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            warnings.push(format!(
                "retry.initial_backoff_ms ({}) > retry.max_backoff_ms ({}); every delay will be capped",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            ));
        }
        if self.research.parallel_executors > self.research.max_questions {
            warnings.push(format!(
                "research.parallel_executors ({}) > research.max_questions ({}); extra executors stay idle",
                self.research.parallel_executors, self.research.max_questions
            ));
        }
        if self.research.run_timeout_secs < 60 {
            warnings.push(format!(
                "research.run_timeout_secs ({}) is shorter than a single grounded call usually takes",
                self.research.run_timeout_secs
            ));
        }
        Ok(warnings)
    }
}

/// Load configuration with layered merging.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DEEPWELL_`)
/// 3. Workspace-local config (`.deepwell/config.toml`)
/// 4. User config (`<config dir>/deepwell/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DeepwellConfig>,
) -> Result<DeepwellConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(DeepwellConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "deepwell", "deepwell") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".deepwell").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DEEPWELL_RETRY__MAX_RETRIES, DEEPWELL_RESEARCH__DEPTH, ...
    figment = figment.merge(Env::prefixed("DEEPWELL_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment
        .extract()
        .map_err(|e| ConfigError::Parse(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HandlerFamily, ModelCapabilitySpec};

    #[test]
    fn test_defaults() {
        let config = DeepwellConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown(), Duration::from_secs(60));
        assert_eq!(config.research.max_questions, 5);
        assert_eq!(config.research.parallel_executors, 3);
        assert!(!config.retry.retry_rate_limited);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut config = DeepwellConfig::default();
        config.research.parallel_executors = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut config = DeepwellConfig::default();
        config.providers.google.base_url = Some("not a url".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.providers.google.base_url = Some("ftp://example.com/v1".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.providers.google.base_url = Some("http://127.0.0.1:8080/v1beta".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_warns_on_aggressive_retry() {
        let mut config = DeepwellConfig::default();
        config.retry.max_retries = 8;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("max_retries"));
    }

    #[test]
    fn test_effective_timeout() {
        let spec = ModelCapabilitySpec::new("m", HandlerFamily::GeminiGenerate)
            .with_timeouts(Duration::from_secs(60), Duration::from_secs(300));
        let provider = ProviderConfig::new("KEY");
        assert_eq!(provider.effective_timeout(&spec, false), Duration::from_secs(60));
        assert_eq!(provider.effective_timeout(&spec, true), Duration::from_secs(300));

        let tuned = ProviderConfig {
            request_timeout_secs: Some(30),
            grounded_timeout_secs: Some(90),
            ..ProviderConfig::new("KEY")
        };
        assert_eq!(tuned.effective_timeout(&spec, false), Duration::from_secs(30));
        assert_eq!(tuned.effective_timeout(&spec, true), Duration::from_secs(90));
    }

    #[test]
    fn test_special_transport_uses_extended_timeout() {
        let spec = ModelCapabilitySpec::new("dr", HandlerFamily::OpenAiDeepResearch)
            .with_timeouts(Duration::from_secs(600), Duration::from_secs(1800))
            .with_special_transport();
        let provider = ProviderConfig::new("KEY");
        assert_eq!(provider.effective_timeout(&spec, false), Duration::from_secs(1800));
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let cfg_dir = dir.path().join(".deepwell");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            r#"
[retry]
max_retries = 2
initial_backoff_ms = 250
max_backoff_ms = 5000
backoff_multiplier = 2.0
jitter = false
retry_rate_limited = true

[research]
max_questions = 3
parallel_executors = 2
depth = "comprehensive"
enable_grounding = false
planner_model = "gpt-5-mini"
executor_model = "gpt-5"
synthesis_model = "claude-sonnet-4-5"
run_timeout_secs = 900
answer_length_threshold = 400
progress_buffer = 16
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.retry.max_retries, 2);
        assert!(config.retry.retry_rate_limited);
        assert_eq!(config.research.depth, DepthTier::Comprehensive);
        assert_eq!(config.research.synthesis_model, "claude-sonnet-4-5");
        // Untouched sections keep their defaults.
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.providers.openai.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_load_config_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = DeepwellConfig::default();
        overrides.circuit_breaker.failure_threshold = 3;
        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
    }
}
