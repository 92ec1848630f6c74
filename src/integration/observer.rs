use parking_lot::RwLock;
use std::sync::Arc;

use super::state::OrchestrationState;

pub type StateChangeCallback = Arc<dyn Fn(OrchestrationState) + Send + Sync>;
pub type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A notification produced under the state lock, dispatched after release
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StateChanged(OrchestrationState),
    Transcription(String),
    Response(String),
    Error(String),
}

/// One registration per channel; registering again replaces the previous one
#[derive(Default)]
pub struct Observers {
    state_change: RwLock<Option<StateChangeCallback>>,
    transcription: RwLock<Option<TextCallback>>,
    response: RwLock<Option<TextCallback>>,
    error: RwLock<Option<TextCallback>>,
}

impl Observers {
    pub fn set_state_change(&self, callback: StateChangeCallback) {
        *self.state_change.write() = Some(callback);
    }

    pub fn set_transcription(&self, callback: TextCallback) {
        *self.transcription.write() = Some(callback);
    }

    pub fn set_response(&self, callback: TextCallback) {
        *self.response.write() = Some(callback);
    }

    pub fn set_error(&self, callback: TextCallback) {
        *self.error.write() = Some(callback);
    }

    /// Deliver in order. Each callback is cloned out so none runs under a lock.
    pub fn dispatch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            match notification {
                Notification::StateChanged(state) => {
                    let callback = self.state_change.read().clone();
                    if let Some(callback) = callback {
                        callback(state);
                    }
                }
                Notification::Transcription(text) => Self::emit(&self.transcription, &text),
                Notification::Response(text) => Self::emit(&self.response, &text),
                Notification::Error(text) => Self::emit(&self.error, &text),
            }
        }
    }

    fn emit(slot: &RwLock<Option<TextCallback>>, text: &str) {
        let callback = slot.read().clone();
        if let Some(callback) = callback {
            callback(text);
        }
    }
}
