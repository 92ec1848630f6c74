//! Speech recognition and speech output
//!
//! - `recognizer`: the `Recognizer` contract and `RecognitionBackend`, the
//!   retrying state machine shared by every engine
//! - `engine` / `engines`: the per-platform seam and the built-in engines
//! - `registry`: backend name to engine lookup
//! - `tts`: fire-and-forget playback

pub mod config;
pub mod engine;
pub mod engines;
pub mod recognizer;
pub mod registry;
pub mod tts;

pub use config::RecognizerConfig;
pub use engine::{EngineError, EnginePoll, EngineSession, SpeechEngine};
pub use engines::{ChannelEngine, PipeEngine, ScriptedEngine, TranscriptFeed};
pub use recognizer::{
    RecognitionBackend, RecognitionCallback, RecognitionEvent, Recognizer, RecognizerStatus,
    RetryPolicy, MAX_RETRY_COUNT, RETRY_DELAY,
};
pub use registry::{EngineFactory, EngineRegistry};
pub use tts::{LogSpeaker, ProcessSpeaker, Speaker};
