use std::collections::HashMap;
use tracing::debug;

use super::config::RecognizerConfig;
use super::engine::SpeechEngine;
use super::engines::{PipeEngine, ScriptedEngine};
use crate::{AssistError, Result};

pub type EngineFactory =
    Box<dyn Fn(&RecognizerConfig) -> Result<Box<dyn SpeechEngine>> + Send + Sync>;

/// Maps backend names to engine constructors
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl EngineRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the `pipe` and `scripted` engines
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register("pipe", |config| {
            let source = config.source.clone().ok_or_else(|| {
                AssistError::InitializationError(
                    "The pipe recognizer requires a source path".to_string(),
                )
            })?;
            Ok(Box::new(PipeEngine::new(source)) as Box<dyn SpeechEngine>)
        });

        registry.register("scripted", |config| {
            Ok(Box::new(ScriptedEngine::new(
                config.script.clone(),
                config.script_interval(),
            )) as Box<dyn SpeechEngine>)
        });

        registry
    }

    /// Add or replace a backend
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&RecognizerConfig) -> Result<Box<dyn SpeechEngine>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Build the engine named by `config.backend`
    pub fn create(&self, config: &RecognizerConfig) -> Result<Box<dyn SpeechEngine>> {
        let factory = self.factories.get(&config.backend).ok_or_else(|| {
            AssistError::InitializationError(format!(
                "Unknown recognizer backend '{}' (available: {})",
                config.backend,
                self.names().join(", ")
            ))
        })?;

        debug!("Creating recognizer backend '{}'", config.backend);
        factory(config)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
