//! Voice Assist - turn-based voice conversation engine
//!
//! Captures audio, turns finalized transcripts into conversation turns, sends the
//! trimmed history to a remote language model and speaks the reply.

pub mod audio;
pub mod integration;
pub mod llm;
pub mod messages;
pub mod speech;

use thiserror::Error;

pub use integration::{
    AssistantConfig, OrchestrationState, Orchestrator, OrchestratorBuilder,
};
pub use llm::{CompletionClient, CompletionConfig, CompletionError};
pub use messages::{ConversationStore, Message, Role};

#[derive(Error, Debug, Clone)]
pub enum AssistError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    #[error("Recognition error: {0}")]
    RecognitionError(String),

    #[error("Completion failed: {0}")]
    CompletionFailed(#[from] CompletionError),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: String,
        state: OrchestrationState,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Playback error: {0}")]
    PlaybackError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for AssistError {
    fn from(e: std::io::Error) -> Self {
        AssistError::IOError(e.to_string())
    }
}

impl AssistError {
    pub(crate) fn invalid_state(operation: &str, state: OrchestrationState) -> Self {
        AssistError::InvalidState {
            operation: operation.to_string(),
            state,
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Backends could not be built; the engine must be rebuilt
            AssistError::InitializationError(_) => false,
            // Hardware/device errors may require user intervention
            AssistError::AudioDeviceError(_) => false,
            AssistError::RecognitionError(_) => true,
            AssistError::CompletionFailed(_) => true,
            // Repeating the call in the right state succeeds
            AssistError::InvalidState { .. } => true,
            AssistError::InvalidInput(_) => true,
            AssistError::PlaybackError(_) => true,
            AssistError::ConfigError(_) => false,
            AssistError::IOError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            AssistError::InitializationError(_) => {
                "Failed to start the assistant. Please check the configured backends.".to_string()
            }
            AssistError::AudioDeviceError(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            AssistError::RecognitionError(_) => {
                "Speech recognition stopped working. Please try again.".to_string()
            }
            AssistError::CompletionFailed(CompletionError::Cancelled) => {
                "Response cancelled.".to_string()
            }
            AssistError::CompletionFailed(_) => {
                "AI response generation failed. Please try again.".to_string()
            }
            AssistError::InvalidState { .. } => {
                "The assistant is busy. Please wait for the current turn to finish.".to_string()
            }
            AssistError::InvalidInput(_) => "Nothing to send. Please enter a message.".to_string(),
            AssistError::PlaybackError(_) => {
                "Text-to-speech failed. Response is shown as text.".to_string()
            }
            AssistError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            AssistError::IOError(_) => "File system error occurred.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AssistError>;
