//! Completion endpoint configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request/response dialect spoken by the endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFlavor {
    /// `chat/completions` with `choices[0].message.content`
    #[default]
    OpenAi,
    /// `models/{model}:generateContent` with `candidates[0].content.parts[0].text`
    Gemini,
}

/// Configuration for the completion client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// API credential (sent as bearer token or `key` query parameter)
    pub api_key: String,

    /// Endpoint base URL, with trailing slash
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Temperature for sampling (0.0 = deterministic)
    pub temperature: f32,

    /// Maximum tokens in the reply
    pub max_tokens: u32,

    /// Whole-request timeout in seconds
    pub timeout_secs: u64,

    /// Wire format of the endpoint
    pub flavor: ApiFlavor,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1/".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 150,
            timeout_secs: 30,
            flavor: ApiFlavor::OpenAi,
        }
    }
}

impl CompletionConfig {
    /// Create a configuration for the given model
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Defaults for Google's Generative Language API
    pub fn gemini(model: impl Into<String>) -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/".to_string(),
            model: model.into(),
            flavor: ApiFlavor::Gemini,
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_flavor(mut self, flavor: ApiFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Join `path` onto the base URL regardless of trailing slashes
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model identifier is required".to_string());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(format!("Invalid endpoint URL: {}", self.base_url));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            return Err("Timeout must be at least one second".to_string());
        }
        Ok(())
    }
}
