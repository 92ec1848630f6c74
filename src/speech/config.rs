use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings handed to the speech engine each time a session is opened
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Engine name resolved through the `EngineRegistry`
    pub backend: String,

    /// BCP-47 language tag
    pub language: String,

    /// File or named pipe read by the `pipe` engine
    pub source: Option<PathBuf>,

    /// Phrases replayed by the `scripted` engine
    pub script: Vec<String>,

    /// Pause before each scripted phrase
    pub script_interval_ms: u64,

    /// Longest an utterance may stay open before its latest partial is
    /// taken as final. 0 disables the cap.
    pub max_recording_time_ms: u64,

    /// Time without a new partial after which the utterance is taken as
    /// final. 0 disables it.
    pub silence_timeout_ms: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            backend: "scripted".to_string(),
            language: "en-US".to_string(),
            source: None,
            script: Vec::new(),
            script_interval_ms: 1000,
            max_recording_time_ms: 15_000,
            silence_timeout_ms: 2_000,
        }
    }
}

impl RecognizerConfig {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            ..Default::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_script<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script = phrases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_script_interval_ms(mut self, interval_ms: u64) -> Self {
        self.script_interval_ms = interval_ms;
        self
    }

    pub fn with_silence_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.silence_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_recording_time_ms(mut self, limit_ms: u64) -> Self {
        self.max_recording_time_ms = limit_ms;
        self
    }

    pub fn script_interval(&self) -> Duration {
        Duration::from_millis(self.script_interval_ms)
    }

    pub fn silence_timeout(&self) -> Option<Duration> {
        (self.silence_timeout_ms > 0).then(|| Duration::from_millis(self.silence_timeout_ms))
    }

    pub fn max_recording_time(&self) -> Option<Duration> {
        (self.max_recording_time_ms > 0).then(|| Duration::from_millis(self.max_recording_time_ms))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.backend.trim().is_empty() {
            return Err("Recognizer backend name is required".to_string());
        }
        if self.language.trim().is_empty() {
            return Err("Recognizer language is required".to_string());
        }
        if self.max_recording_time_ms > 0 && self.silence_timeout_ms > self.max_recording_time_ms {
            return Err("Silence timeout cannot exceed the maximum recording time".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognizer_config_default() {
        let config = RecognizerConfig::default();
        assert_eq!(config.language, "en-US");
        assert_eq!(config.max_recording_time_ms, 15_000);
        assert_eq!(config.silence_timeout_ms, 2_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_recognizer_config_validation() {
        let config = RecognizerConfig::new("pipe")
            .with_silence_timeout_ms(5_000)
            .with_max_recording_time_ms(1_000);
        assert!(config.validate().is_err());

        // Zero turns a limit off
        let config = RecognizerConfig::new("pipe")
            .with_silence_timeout_ms(5_000)
            .with_max_recording_time_ms(0);
        assert!(config.validate().is_ok());
        assert_eq!(config.max_recording_time(), None);
        assert_eq!(config.silence_timeout(), Some(Duration::from_secs(5)));

        let config = RecognizerConfig::new("").with_language("de-DE");
        assert!(config.validate().is_err());
    }
}
