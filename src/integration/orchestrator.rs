//! Conversation state machine
//!
//! Idle -> Listening -> Processing -> Responding -> Idle, with a direct
//! Idle -> Processing path for typed input.
//!
//! All mutable conversation state sits behind one lock. Observer callbacks,
//! recognizer and capture calls, and completion sends never run while it is
//! held: notifications are collected under the lock and dispatched after it
//! is released.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use super::config::AssistantConfig;
use super::observer::{Notification, Observers};
use super::state::OrchestrationState;
use crate::audio::{AudioCapture, NullCapture, SampleCallback};
use crate::llm::{ChatTransport, CompletionClient, CompletionError};
use crate::messages::{ConversationStore, Message};
use crate::speech::{
    EngineRegistry, LogSpeaker, ProcessSpeaker, RecognitionBackend, RecognitionEvent, Recognizer,
    RecognizerStatus, Speaker,
};
use crate::{AssistError, Result};

struct Core {
    state: OrchestrationState,
    store: ConversationStore,
    config: AssistantConfig,
    /// Turn whose completion is awaited; results for any other turn are stale
    pending_turn: Option<u64>,
    next_turn: u64,
    /// Set while `start_listening` is bringing devices up
    starting: bool,
    /// Recognizer events that arrived before Listening was published
    early_events: Vec<RecognitionEvent>,
}

impl Core {
    fn transition(&mut self, to: OrchestrationState, notes: &mut Vec<Notification>) {
        if self.state != to {
            info!("State {} -> {}", self.state, to);
            self.state = to;
            notes.push(Notification::StateChanged(to));
        }
    }

    /// Append a user turn and return the snapshot to send
    fn begin_turn(&mut self, text: &str, notes: &mut Vec<Notification>) -> (u64, Vec<Message>) {
        notes.push(Notification::Transcription(text.to_string()));
        self.transition(OrchestrationState::Processing, notes);

        self.store.append(Message::user(text));
        self.store.trim(self.config.max_context_messages);

        let turn = self.next_turn;
        self.next_turn += 1;
        self.pending_turn = Some(turn);

        (turn, self.store.snapshot())
    }

    fn record_reply(&mut self, reply: &str) {
        self.store.append(Message::assistant(reply));
        self.store.trim(self.config.max_context_messages);
    }
}

struct Inner {
    core: Mutex<Core>,
    observers: Observers,
    recognizer: Box<dyn Recognizer>,
    capture: Box<dyn AudioCapture>,
    speaker: Box<dyn Speaker>,
    completion: CompletionClient,
    captured_samples: Arc<AtomicU64>,
}

impl Inner {
    fn fail(&self, err: AssistError) -> Result<()> {
        warn!("{}", err);
        self.observers
            .dispatch(vec![Notification::Error(err.to_string())]);
        Err(err)
    }

    fn send_turn(self: &Arc<Self>, turn: u64, snapshot: Vec<Message>) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let request_id = self.completion.send(
            snapshot,
            Box::new(move |result| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_completion(turn, result);
                }
            }),
        );
        debug!("Turn {} sent as request {}", turn, request_id);
    }

    fn handle_recognition_event(self: &Arc<Self>, event: RecognitionEvent) {
        match event {
            RecognitionEvent::Transcript {
                text,
                is_final: false,
            } => {
                debug!("Partial transcript: {}", text);
            }
            RecognitionEvent::Transcript {
                text,
                is_final: true,
            } => {
                let text = text.trim();
                if text.is_empty() {
                    debug!("Ignoring empty transcript");
                    return;
                }

                let mut notes = Vec::new();
                let (turn, snapshot) = {
                    let mut core = self.core.lock();
                    if core.starting {
                        core.early_events.push(RecognitionEvent::Transcript {
                            text: text.to_string(),
                            is_final: true,
                        });
                        return;
                    }
                    if core.state != OrchestrationState::Listening {
                        debug!("Dropping transcript received while {}", core.state);
                        return;
                    }
                    core.begin_turn(text, &mut notes)
                };

                // One utterance per listening session
                self.recognizer.stop();
                self.capture.stop_capture();

                self.observers.dispatch(notes);
                self.send_turn(turn, snapshot);
            }
            RecognitionEvent::Failed(reason) => {
                let mut notes = Vec::new();
                {
                    let mut core = self.core.lock();
                    if core.starting {
                        core.early_events.push(RecognitionEvent::Failed(reason));
                        return;
                    }
                    if core.state != OrchestrationState::Listening {
                        return;
                    }
                    core.transition(OrchestrationState::Idle, &mut notes);
                    notes.push(Notification::Error(
                        AssistError::RecognitionError(reason).to_string(),
                    ));
                }

                self.capture.stop_capture();
                self.observers.dispatch(notes);
            }
        }
    }

    fn handle_completion(&self, turn: u64, result: std::result::Result<String, CompletionError>) {
        let mut notes = Vec::new();
        let playback = {
            let mut core = self.core.lock();
            if core.state != OrchestrationState::Processing || core.pending_turn != Some(turn) {
                debug!("Discarding stale result for turn {}", turn);
                return;
            }
            core.pending_turn = None;

            match result {
                Ok(reply) => {
                    core.record_reply(&reply);
                    core.transition(OrchestrationState::Responding, &mut notes);
                    let voice = core.config.tts_voice.clone();
                    let speak = core.config.use_text_to_speech;
                    notes.push(Notification::Response(reply.clone()));
                    speak.then_some((reply, voice))
                }
                Err(e) => {
                    core.transition(OrchestrationState::Idle, &mut notes);
                    notes.push(Notification::Error(AssistError::CompletionFailed(e).to_string()));
                    None
                }
            }
        };
        self.observers.dispatch(notes);

        let responded = {
            let core = self.core.lock();
            core.state == OrchestrationState::Responding
        };
        if !responded {
            return;
        }

        let mut notes = Vec::new();
        if let Some((reply, voice)) = playback {
            if !self.speaker.speak(&reply, &voice) {
                notes.push(Notification::Error(
                    AssistError::PlaybackError("Failed to start speech output".to_string())
                        .to_string(),
                ));
            }
        }

        {
            let mut core = self.core.lock();
            if core.state == OrchestrationState::Responding {
                core.transition(OrchestrationState::Idle, &mut notes);
            }
        }
        self.observers.dispatch(notes);
    }
}

/// Public conversation API. Methods are meant to be called from one control
/// thread; observer callbacks may fire on background threads.
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Build with default backends for `config`
    pub fn new(config: AssistantConfig) -> Result<Self> {
        OrchestratorBuilder::new(config).build()
    }

    pub fn builder(config: AssistantConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// Idle -> Listening. Starts capture, then the recognizer.
    pub fn start_listening(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut core = inner.core.lock();
            if !core.state.is_idle() || core.starting {
                let state = core.state;
                drop(core);
                return inner.fail(AssistError::invalid_state("start listening", state));
            }
            core.starting = true;
        }

        let samples = inner.captured_samples.clone();
        let on_samples: SampleCallback = Arc::new(move |buffer: &[f32]| {
            samples.fetch_add(buffer.len() as u64, Ordering::Relaxed);
        });

        if let Err(e) = inner.capture.start_capture(on_samples) {
            self.abort_start();
            return inner.fail(e);
        }

        let weak = Arc::downgrade(inner);
        let started = inner.recognizer.start(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_recognition_event(event);
            }
        }));

        if let Err(e) = started {
            inner.capture.stop_capture();
            self.abort_start();
            return inner.fail(e);
        }

        let mut notes = Vec::new();
        let early = {
            let mut core = inner.core.lock();
            core.starting = false;
            core.transition(OrchestrationState::Listening, &mut notes);
            std::mem::take(&mut core.early_events)
        };
        inner.observers.dispatch(notes);

        for event in early {
            inner.handle_recognition_event(event);
        }
        Ok(())
    }

    fn abort_start(&self) {
        let mut core = self.inner.core.lock();
        core.starting = false;
        core.early_events.clear();
    }

    /// Listening -> Idle
    pub fn stop_listening(&self) -> Result<()> {
        let inner = &self.inner;
        let mut notes = Vec::new();
        {
            let mut core = inner.core.lock();
            if core.state != OrchestrationState::Listening {
                let state = core.state;
                drop(core);
                return inner.fail(AssistError::invalid_state("stop listening", state));
            }
            core.transition(OrchestrationState::Idle, &mut notes);
        }

        inner.recognizer.stop();
        inner.capture.stop_capture();
        inner.observers.dispatch(notes);
        Ok(())
    }

    /// Idle -> Processing with typed input
    pub fn send_text_input(&self, text: &str) -> Result<()> {
        let inner = &self.inner;
        let text = text.trim();

        let mut notes = Vec::new();
        let (turn, snapshot) = {
            let mut core = inner.core.lock();
            if !core.state.is_idle() || core.starting {
                let state = core.state;
                drop(core);
                return inner.fail(AssistError::invalid_state("send text input", state));
            }
            if text.is_empty() {
                drop(core);
                return inner.fail(AssistError::InvalidInput("Text input is empty".to_string()));
            }
            core.begin_turn(text, &mut notes)
        };

        inner.observers.dispatch(notes);
        inner.send_turn(turn, snapshot);
        Ok(())
    }

    /// Cancel the reply being generated. The turn ends with an error
    /// notification and the state returns to Idle.
    pub fn cancel_response(&self) -> Result<()> {
        let inner = &self.inner;
        let state = inner.core.lock().state;
        if state != OrchestrationState::Processing {
            return inner.fail(AssistError::invalid_state("cancel the response", state));
        }

        if !inner.completion.cancel() {
            debug!("No request in flight to cancel");
        }
        Ok(())
    }

    /// Reset history to the system prompt. Allowed in any state.
    pub fn clear_conversation(&self) {
        let mut core = self.inner.core.lock();
        let prompt = core.config.system_prompt.clone();
        core.store.reset(prompt);
        info!("Conversation cleared");
    }

    /// Replace the configuration. Only allowed while Idle, and the recognizer
    /// and TTS command must match the ones the orchestrator was built with.
    pub fn set_config(&self, config: AssistantConfig) -> Result<()> {
        let inner = &self.inner;
        if let Err(e) = config.validate() {
            return inner.fail(AssistError::ConfigError(e));
        }

        {
            let mut core = inner.core.lock();
            if !core.state.is_idle() || core.starting {
                let state = core.state;
                drop(core);
                return inner.fail(AssistError::invalid_state("change the configuration", state));
            }
            if let Some(setting) = core.config.build_time_change(&config) {
                drop(core);
                return inner.fail(AssistError::ConfigError(format!(
                    "The {} setting cannot change after startup",
                    setting
                )));
            }
            core.store.trim(config.max_context_messages);
            core.config = config.clone();
        }

        inner.completion.set_config(config.completion_config());
        inner.recognizer.set_language(&config.language);
        info!(
            "Configuration updated (model {}, language {})",
            config.llm_model, config.language
        );
        Ok(())
    }

    pub fn config(&self) -> AssistantConfig {
        self.inner.core.lock().config.clone()
    }

    pub fn state(&self) -> OrchestrationState {
        self.inner.core.lock().state
    }

    pub fn conversation_history(&self) -> Vec<Message> {
        self.inner.core.lock().store.snapshot()
    }

    /// Samples received from the capture device since creation
    pub fn captured_samples(&self) -> u64 {
        self.inner.captured_samples.load(Ordering::Relaxed)
    }

    pub fn recognizer_status(&self) -> RecognizerStatus {
        self.inner.recognizer.status()
    }

    /// Stop every background activity and return to Idle. Further turns fail
    /// with a completion error.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        let mut notes = Vec::new();
        {
            let mut core = inner.core.lock();
            core.pending_turn = None;
            core.transition(OrchestrationState::Idle, &mut notes);
        }

        inner.recognizer.stop();
        inner.capture.stop_capture();
        inner.completion.shutdown();
        inner.observers.dispatch(notes);
        info!("Orchestrator shut down");
    }

    pub fn set_state_change_callback<F>(&self, callback: F)
    where
        F: Fn(OrchestrationState) + Send + Sync + 'static,
    {
        self.inner.observers.set_state_change(Arc::new(callback));
    }

    pub fn set_transcription_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.observers.set_transcription(Arc::new(callback));
    }

    pub fn set_response_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.observers.set_response(Arc::new(callback));
    }

    pub fn set_error_callback<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.observers.set_error(Arc::new(callback));
    }
}

/// Builder for creating an orchestrator
pub struct OrchestratorBuilder {
    config: AssistantConfig,
    recognizer: Option<Box<dyn Recognizer>>,
    registry: Option<EngineRegistry>,
    capture: Option<Box<dyn AudioCapture>>,
    speaker: Option<Box<dyn Speaker>>,
    transport: Option<Arc<dyn ChatTransport>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            recognizer: None,
            registry: None,
            capture: None,
            speaker: None,
            transport: None,
        }
    }

    /// Use this recognizer instead of resolving `config.recognizer.backend`
    pub fn with_recognizer(mut self, recognizer: Box<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Registry used to resolve the recognizer backend
    pub fn with_engine_registry(mut self, registry: EngineRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_capture(mut self, capture: Box<dyn AudioCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_speaker(mut self, speaker: Box<dyn Speaker>) -> Self {
        self.speaker = Some(speaker);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config;
        config.validate().map_err(AssistError::ConfigError)?;

        let recognizer = match self.recognizer {
            Some(recognizer) => recognizer,
            None => {
                let registry = self.registry.unwrap_or_else(EngineRegistry::with_defaults);
                let settings = config.recognizer_config();
                let engine = registry.create(&settings)?;
                Box::new(RecognitionBackend::new(engine, settings)) as Box<dyn Recognizer>
            }
        };

        let completion = match self.transport {
            Some(transport) => CompletionClient::with_transport(config.completion_config(), transport)?,
            None => CompletionClient::new(config.completion_config())?,
        };

        let speaker = match (self.speaker, &config.tts_command) {
            (Some(speaker), _) => speaker,
            (None, Some(command)) => match ProcessSpeaker::from_command_line(command) {
                Some(speaker) => Box::new(speaker) as Box<dyn Speaker>,
                None => Box::new(LogSpeaker),
            },
            (None, None) => Box::new(LogSpeaker),
        };

        let capture = self
            .capture
            .unwrap_or_else(|| Box::new(NullCapture::new()) as Box<dyn AudioCapture>);

        info!(
            "Orchestrator ready (model {}, max context {})",
            config.llm_model, config.max_context_messages
        );

        let store = ConversationStore::with_system_prompt(&config.system_prompt);
        Ok(Orchestrator {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    state: OrchestrationState::Idle,
                    store,
                    config,
                    pending_turn: None,
                    next_turn: 0,
                    starting: false,
                    early_events: Vec::new(),
                }),
                observers: Observers::default(),
                recognizer,
                capture,
                speaker,
                completion,
                captured_samples: Arc::new(AtomicU64::new(0)),
            }),
        })
    }
}
