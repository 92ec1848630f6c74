//! Seam between the recognition state machine and a concrete speech engine
//!
//! An engine opens sessions; a session is polled from the recognizer's
//! listener thread until it is closed. Everything platform specific lives
//! behind these two traits.

use std::time::Duration;
use thiserror::Error;

use super::config::RecognizerConfig;

/// Failure to open a session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Worth retrying after a short delay
    #[error("{0}")]
    Recoverable(String),

    /// Retrying will not help
    #[error("{0}")]
    Fatal(String),
}

impl EngineError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Recoverable(_))
    }
}

/// Outcome of one poll of an open session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePoll {
    Transcript { text: String, is_final: bool },
    /// Nothing arrived within the timeout
    Idle,
    /// The input stream closed underneath the session
    StreamEnded,
    /// The engine hit a runtime error
    Fault(String),
}

pub trait SpeechEngine: Send {
    fn name(&self) -> &str;

    fn open(&mut self, settings: &RecognizerConfig) -> Result<Box<dyn EngineSession>, EngineError>;
}

pub trait EngineSession: Send {
    /// Wait up to `timeout` for the next result
    fn poll(&mut self, timeout: Duration) -> EnginePoll;

    /// Release the session's resources. Called once, before the session is dropped.
    fn close(&mut self);
}
