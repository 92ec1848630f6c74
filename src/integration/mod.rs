//! Integration layer tying recognition, completion and playback together
//!
//! `Orchestrator` owns the conversation state machine; `AssistantConfig` is
//! its configuration surface.

pub mod config;
pub mod observer;
pub mod orchestrator;
pub mod state;

pub use config::{AssistantConfig, DEFAULT_SYSTEM_PROMPT};
pub use observer::Notification;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use state::OrchestrationState;
