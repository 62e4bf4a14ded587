//! Provider credentials.
//!
//! Keys are resolved once at construction and never mutated or persisted.

use std::collections::HashMap;
use std::fmt;

use crate::config::ProvidersConfig;
use crate::error::{ConfigError, LlmError};
use crate::registry::ProviderFamily;

/// An opaque API key. Neither `Debug` nor `Display` reveal it.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw secret, for building request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// One key per provider family.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    keys: HashMap<ProviderFamily, ApiKey>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, family: ProviderFamily, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.trim().is_empty() {
            self.keys.insert(family, ApiKey::new(key.trim()));
        }
        self
    }

    /// Read each family's key from the environment variable named in config.
    ///
    /// Missing variables are skipped; calls to that family will fail with
    /// `Authentication` instead.
    pub fn from_env(providers: &ProvidersConfig) -> Self {
        let mut creds = Self::new();
        for family in ProviderFamily::ALL {
            let var = &providers.get(family).api_key_env;
            match std::env::var(var) {
                Ok(key) => creds = creds.with_key(family, key),
                Err(_) => tracing::debug!(provider = %family, env_var = %var, "No API key in environment"),
            }
        }
        creds
    }

    /// Like [`Credentials::from_env`], but every family must be present.
    pub fn from_env_strict(providers: &ProvidersConfig) -> Result<Self, ConfigError> {
        let creds = Self::from_env(providers);
        for family in ProviderFamily::ALL {
            if !creds.has(family) {
                return Err(ConfigError::EnvVarMissing {
                    var: providers.get(family).api_key_env.clone(),
                });
            }
        }
        Ok(creds)
    }

    pub fn has(&self, family: ProviderFamily) -> bool {
        self.keys.contains_key(&family)
    }

    pub fn get(&self, family: ProviderFamily) -> Option<&ApiKey> {
        self.keys.get(&family)
    }

    /// The family's key, or an `Authentication` error naming the family.
    pub fn require(&self, family: ProviderFamily) -> Result<&ApiKey, LlmError> {
        self.get(family).ok_or_else(|| LlmError::Authentication {
            provider: family.to_string(),
            message: "no API key configured".into(),
        })
    }
}
