//! Startup settings: a TOML file plus environment overrides for secrets.
//!
//! Settings are read once at process start. The runtime-tunable part of the
//! configuration ([`AgentConfig`]) lives in the activity store; the
//! `[defaults]` table only seeds it when the store holds none yet.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;
use crate::types::{AgentConfig, Persona};

pub const ENV_MOLTBOOK_API_KEY: &str = "MOLTBOOK_API_KEY";
pub const ENV_MOLTBOOK_BASE_URL: &str = "MOLTBOOK_BASE_URL";
pub const ENV_OPENROUTER_API_KEY: &str = "OPENROUTER_API_KEY";
pub const ENV_AGENT_MODEL: &str = "AGENT_MODEL";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub moltbook: MoltbookSettings,
    pub llm: LlmSettings,
    pub database: DatabaseSettings,
    pub agent: AgentSettings,
    pub defaults: AgentConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MoltbookSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub user_agent: String,
    pub requests_per_minute: u32,
    pub request_timeout_seconds: u64,
}

impl Default for MoltbookSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.moltbook.com/api/v1".to_string(),
            api_key: None,
            user_agent: "moltbook-agent/0.1".to_string(),
            requests_per_minute: 100,
            request_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub approval_threshold: f64,
    pub request_timeout_seconds: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            model: "openai/gpt-4o-mini".to_string(),
            approval_threshold: 0.7,
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://moltbook-agent.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub name: String,
    pub description: String,
    /// Upper bound on every external call made by a pipeline stage.
    pub call_timeout_seconds: u64,
    /// Fire one scheduled tick as soon as the scheduler starts.
    pub run_on_start: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "Azoni".to_string(),
            description: "AI agent building in public. Interested in AI agents, developer \
                          tools and fitness tech. Direct communication style; proof of work \
                          over claims of work."
                .to_string(),
            call_timeout_seconds: 90,
            run_on_start: true,
        }
    }
}

impl AgentSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Persona for a run, combining fixed identity with the run's config snapshot.
    pub fn persona(&self, config: &AgentConfig) -> Persona {
        Persona {
            name: self.name.clone(),
            description: self.description.clone(),
            topics: config.topics.clone(),
            style_hints: config.style_hints.clone(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (if given) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(raw)?;
        Ok(settings)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_MOLTBOOK_API_KEY) {
            debug!("Using Moltbook API key from {}", ENV_MOLTBOOK_API_KEY);
            self.moltbook.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_MOLTBOOK_BASE_URL) {
            self.moltbook.base_url = url;
        }
        if let Some(key) = lookup(ENV_OPENROUTER_API_KEY) {
            debug!("Using OpenRouter API key from {}", ENV_OPENROUTER_API_KEY);
            self.llm.api_key = Some(key);
        }
        if let Some(model) = lookup(ENV_AGENT_MODEL) {
            self.llm.model = model;
        }
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database.url = url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.call_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.call_timeout_seconds".to_string(),
                value: "0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.llm.approval_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "llm.approval_threshold".to_string(),
                value: self.llm.approval_threshold.to_string(),
            });
        }
        if self.moltbook.requests_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                field: "moltbook.requests_per_minute".to_string(),
                value: "0".to_string(),
            });
        }
        self.defaults
            .validate()
            .map_err(|e| ConfigError::ValidationFailed {
                reason: format!("[defaults] {}", e),
            })
    }

    pub fn moltbook_api_key(&self) -> Result<&str, ConfigError> {
        self.moltbook
            .api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: ENV_MOLTBOOK_API_KEY.to_string(),
            })
    }

    pub fn llm_api_key(&self) -> Result<&str, ConfigError> {
        self.llm
            .api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvironmentVariable {
                var_name: ENV_OPENROUTER_API_KEY.to_string(),
            })
    }
}
