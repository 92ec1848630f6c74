//! Remote language-model access
//!
//! `CompletionClient` runs requests on a worker thread and resolves each one
//! exactly once through a callback. The HTTP side lives behind the
//! `ChatTransport` trait so the client can be driven by any transport.

pub mod client;
pub mod config;
pub mod transport;
pub mod wire;

pub use client::{CompletionCallback, CompletionClient, RequestId};
pub use config::{ApiFlavor, CompletionConfig};
pub use transport::{ChatRequest, ChatTransport, HttpTransport};

use thiserror::Error;

/// Why a completion did not produce reply text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// Network failure, DNS, TLS or timeout
    #[error("Transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-2xx status
    #[error("HTTP error {status}: {body}")]
    Status { status: u16, body: String },

    /// The payload did not have the expected shape
    #[error("Invalid response format: {0}")]
    MalformedResponse(String),

    /// The provider refused to answer
    #[error("Request blocked by API for safety reasons: {0}")]
    Blocked(String),

    #[error("Request canceled")]
    Cancelled,
}

impl From<reqwest::Error> for CompletionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CompletionError::Transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            CompletionError::MalformedResponse(err.to_string())
        } else {
            CompletionError::Transport(err.to_string())
        }
    }
}
