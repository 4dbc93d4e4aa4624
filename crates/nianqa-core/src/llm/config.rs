//! Model options, loaded from a persisted JSON file with env credential overrides.

use crate::error::LlmError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const API_BASE_ENV: &str = "OPENAI_API_BASE";

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Whole-request timeout.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 150,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            api_key: None,
            api_base: None,
            timeout_secs: 60,
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl LlmConfig {
    /// Defaults, then the JSON file at `path` if present, then the credential env vars.
    pub fn load(path: &Path) -> Result<Self, LlmError> {
        let d = Self::default();
        let builder = config::Config::builder()
            .set_default("model", d.model)?
            .set_default("temperature", d.temperature)?
            .set_default("max_tokens", i64::from(d.max_tokens))?
            .set_default("top_p", d.top_p)?
            .set_default("frequency_penalty", d.frequency_penalty)?
            .set_default("presence_penalty", d.presence_penalty)?
            .set_default("timeout_secs", d.timeout_secs as i64)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path).format(config::FileFormat::Json))
        } else {
            builder
        };

        let built = builder
            .set_override_option("api_key", env_nonempty(API_KEY_ENV))?
            .set_override_option("api_base", env_nonempty(API_BASE_ENV))?
            .build()?;

        Ok(built.try_deserialize()?)
    }

    /// Endpoint root, without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_base
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
    }

    /// Writes the config as pretty JSON. Credentials taken from the environment are left out.
    pub fn save(&self, path: &Path) -> Result<(), LlmError> {
        let mut persisted = self.clone();
        if env_nonempty(API_KEY_ENV).is_some() {
            persisted.api_key = None;
        }
        if env_nonempty(API_BASE_ENV).is_some() {
            persisted.api_base = None;
        }
        let json = serde_json::to_string_pretty(&persisted)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        std::fs::write(path, json).map_err(|source| LlmError::Persist {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn apply(&mut self, update: LlmConfigUpdate) {
        let LlmConfigUpdate {
            model,
            temperature,
            max_tokens,
            top_p,
            frequency_penalty,
            presence_penalty,
        } = update;
        if let Some(v) = model {
            self.model = v;
        }
        if let Some(v) = temperature {
            self.temperature = v;
        }
        if let Some(v) = max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = top_p {
            self.top_p = v;
        }
        if let Some(v) = frequency_penalty {
            self.frequency_penalty = v;
        }
        if let Some(v) = presence_penalty {
            self.presence_penalty = v;
        }
    }
}

/// Partial change to the tunable options. Credentials are not updatable at runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmConfigUpdate {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
}
