//! Configuration for the assistant
//!
//! Everything an embedder may change between turns, loadable from a TOML file.
//! Every field has a default, so a partial file is enough.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::llm::config::CompletionConfig;
use crate::speech::config::RecognizerConfig;
use crate::{AssistError, Result};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant providing concise and accurate information.";

/// Configuration for one conversation engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Recognition language (BCP-47)
    pub language: String,

    /// Model identifier sent to the completion endpoint
    pub llm_model: String,

    /// Speak replies
    pub use_text_to_speech: bool,

    /// Voice name passed to the speaker; empty for its default
    pub tts_voice: String,

    /// Non-system messages kept in history (0 = unbounded)
    pub max_context_messages: usize,

    /// Credential for the completion endpoint
    pub api_key: String,

    /// Seed message of every conversation
    pub system_prompt: String,

    /// External synthesizer command line, e.g. `"espeak -s 160"`
    pub tts_command: Option<String>,

    /// Endpoint, wire format and generation parameters
    pub completion: CompletionConfig,

    /// Recognizer backend and its settings
    pub recognizer: RecognizerConfig,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            llm_model: "gpt-3.5-turbo".to_string(),
            use_text_to_speech: true,
            tts_voice: String::new(),
            max_context_messages: 10,
            api_key: String::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tts_command: None,
            completion: CompletionConfig::default(),
            recognizer: RecognizerConfig::default(),
        }
    }
}

impl AssistantConfig {
    /// Load from a TOML file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AssistError::IOError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| AssistError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate().map_err(AssistError::ConfigError)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AssistError::ConfigError(format!("Failed to serialize config: {}", e)))
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_llm_model(mut self, model: impl Into<String>) -> Self {
        self.llm_model = model.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_text_to_speech(mut self, enabled: bool) -> Self {
        self.use_text_to_speech = enabled;
        self
    }

    pub fn with_tts_voice(mut self, voice: impl Into<String>) -> Self {
        self.tts_voice = voice.into();
        self
    }

    pub fn with_max_context_messages(mut self, max: usize) -> Self {
        self.max_context_messages = max;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_completion(mut self, completion: CompletionConfig) -> Self {
        self.completion = completion;
        self
    }

    pub fn with_recognizer(mut self, recognizer: RecognizerConfig) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn with_tts_command(mut self, command: impl Into<String>) -> Self {
        self.tts_command = Some(command.into());
        self
    }

    /// Completion parameters with the top-level model and key applied
    pub fn completion_config(&self) -> CompletionConfig {
        let mut completion = self.completion.clone();
        completion.model = self.llm_model.clone();
        if !self.api_key.is_empty() {
            completion.api_key = self.api_key.clone();
        }
        completion
    }

    /// Recognizer settings with the top-level language applied
    pub fn recognizer_config(&self) -> RecognizerConfig {
        let mut recognizer = self.recognizer.clone();
        recognizer.language = self.language.clone();
        recognizer
    }

    /// First setting that differs from `self` and only takes effect when the
    /// orchestrator is built. The top-level language is not one of them.
    pub fn build_time_change(&self, next: &AssistantConfig) -> Option<&'static str> {
        if self.recognizer_config() != next.recognizer_config().with_language(self.language.clone()) {
            return Some("recognizer");
        }
        if self.tts_command != next.tts_command {
            return Some("tts_command");
        }
        None
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.language.trim().is_empty() {
            return Err("Language is required".to_string());
        }
        if self.system_prompt.trim().is_empty() {
            return Err("System prompt cannot be empty".to_string());
        }
        if let Some(command) = &self.tts_command {
            if command.trim().is_empty() {
                return Err("TTS command cannot be empty".to_string());
            }
        }
        self.completion_config().validate()?;
        self.recognizer_config().validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AssistantConfig::default();
        assert_eq!(config.language, "en-US");
        assert_eq!(config.llm_model, "gpt-3.5-turbo");
        assert_eq!(config.max_context_messages, 10);
        assert!(config.use_text_to_speech);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = AssistantConfig::default()
            .with_llm_model("gpt-4o-mini")
            .with_api_key("sk-test")
            .with_language("de-DE")
            .with_text_to_speech(false)
            .with_max_context_messages(4);

        let completion = config.completion_config();
        assert_eq!(completion.model, "gpt-4o-mini");
        assert_eq!(completion.api_key, "sk-test");
        assert_eq!(config.recognizer_config().language, "de-DE");
        assert!(!config.use_text_to_speech);
    }

    #[test]
    fn test_partial_toml() {
        let config = AssistantConfig::from_toml_str(
            r#"
            llm_model = "gemini-1.5-flash"
            max_context_messages = 4

            [completion]
            flavor = "gemini"
            base_url = "https://generativelanguage.googleapis.com/"

            [recognizer]
            backend = "pipe"
            source = "/tmp/transcripts"
            "#,
        )
        .unwrap();

        assert_eq!(config.llm_model, "gemini-1.5-flash");
        assert_eq!(config.max_context_messages, 4);
        assert_eq!(config.completion.flavor, crate::llm::ApiFlavor::Gemini);
        assert_eq!(config.completion.max_tokens, 150);
        assert_eq!(config.recognizer.backend, "pipe");
        assert_eq!(config.language, "en-US");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AssistantConfig::from_toml_str("max_context_messages = \"many\"").unwrap_err();
        assert!(matches!(err, AssistError::ConfigError(_)));

        let err = AssistantConfig::from_toml_str("system_prompt = \"  \"").unwrap_err();
        assert!(matches!(err, AssistError::ConfigError(_)));
    }

    #[test]
    fn test_build_time_change() {
        let config = AssistantConfig::default();

        let relabelled = config.clone().with_language("fr-FR").with_llm_model("other");
        assert_eq!(config.build_time_change(&relabelled), None);

        let rescripted = config
            .clone()
            .with_recognizer(RecognizerConfig::new("scripted").with_script(["hello"]));
        assert_eq!(config.build_time_change(&rescripted), Some("recognizer"));

        let spoken = config.clone().with_tts_command("say");
        assert_eq!(config.build_time_change(&spoken), Some("tts_command"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "language = \"fr-FR\"").unwrap();
        writeln!(file, "tts_voice = \"fr\"").unwrap();
        file.flush().unwrap();

        let config = AssistantConfig::load(file.path()).unwrap();
        assert_eq!(config.language, "fr-FR");
        assert_eq!(config.tts_voice, "fr");

        let missing = AssistantConfig::load("/nonexistent/voice-assist.toml").unwrap_err();
        assert!(matches!(missing, AssistError::IOError(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AssistantConfig::default().with_tts_command("espeak");
        let text = config.to_toml_string().unwrap();
        assert_eq!(AssistantConfig::from_toml_str(&text).unwrap(), config);
    }
}
