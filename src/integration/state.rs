use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the conversation is in its turn cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrchestrationState {
    /// Ready for input
    #[default]
    Idle,
    /// Recognizer and capture running, waiting for a final transcript
    Listening,
    /// Waiting for the model's reply
    Processing,
    /// Reply received, playback being dispatched
    Responding,
}

impl OrchestrationState {
    pub fn is_idle(&self) -> bool {
        *self == OrchestrationState::Idle
    }
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestrationState::Idle => "Idle",
            OrchestrationState::Listening => "Listening",
            OrchestrationState::Processing => "Processing",
            OrchestrationState::Responding => "Responding",
        };
        f.write_str(name)
    }
}
