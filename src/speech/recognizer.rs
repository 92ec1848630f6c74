//! Speech recognition state machine with bounded recovery
//!
//! `RecognitionBackend` owns one `SpeechEngine` and drives its sessions from a
//! listener thread. Recoverable engine failures are retried up to
//! `MAX_RETRY_COUNT` times with `RETRY_DELAY` between attempts; only
//! exhaustion is reported to the caller.
//!
//! Engines that leave an utterance open are endpointed here: the latest
//! partial becomes final after `silence_timeout_ms` without a new partial or
//! `max_recording_time_ms` after the utterance began.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::config::RecognizerConfig;
use super::engine::{EngineError, EnginePoll, EngineSession, SpeechEngine};
use crate::{AssistError, Result};

pub const MAX_RETRY_COUNT: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// How long one session poll may block before the shutdown signal is checked
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerStatus {
    Idle,
    Initializing,
    Active,
    Recovering,
    Failed,
}

impl fmt::Display for RecognizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecognizerStatus::Idle => "Idle",
            RecognizerStatus::Initializing => "Initializing",
            RecognizerStatus::Active => "Active",
            RecognizerStatus::Recovering => "Recovering",
            RecognizerStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Transcript { text: String, is_final: bool },
    /// Retries are exhausted; the recognizer is now `Failed`
    Failed(String),
}

pub type RecognitionCallback = Box<dyn Fn(RecognitionEvent) + Send>;

/// Anything that turns live audio into transcripts
pub trait Recognizer: Send + Sync {
    /// Begin a session. Events are delivered on a background thread.
    fn start(&self, on_event: RecognitionCallback) -> Result<()>;

    /// End the session. No event is delivered after this returns.
    fn stop(&self);

    fn is_active(&self) -> bool;

    fn status(&self) -> RecognizerStatus;

    /// Used from the next session on
    fn set_language(&self, language: &str);
}

/// Retry budget for recoverable engine failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY_COUNT,
            delay: RETRY_DELAY,
        }
    }
}

/// The open session, shared so `stop()` can close it from a callback
type SessionSlot = Arc<Mutex<Option<Box<dyn EngineSession>>>>;

struct Listener {
    shutdown_tx: Sender<()>,
    session: SessionSlot,
    handle: JoinHandle<()>,
}

impl Listener {
    /// Signal shutdown and wait for the thread, unless called from it
    fn shut_down(self) {
        drop(self.shutdown_tx);
        if self.handle.thread().id() == thread::current().id() {
            // The thread exits once the current callback returns
            close_session(&self.session);
            debug!("Recognizer stopped from its own listener");
        } else if self.handle.join().is_err() {
            error!("Recognizer listener panicked");
        }
    }
}

/// State shared with the listener thread
struct Shared {
    engine: Mutex<Box<dyn SpeechEngine>>,
    settings: RwLock<RecognizerConfig>,
    status: RwLock<RecognizerStatus>,
    policy: RetryPolicy,
}

impl Shared {
    fn set_status(&self, status: RecognizerStatus) {
        let mut current = self.status.write();
        if *current != status {
            debug!("Recognizer status {} -> {}", *current, status);
            *current = status;
        }
    }

    fn open(&self) -> std::result::Result<Box<dyn EngineSession>, EngineError> {
        let settings = self.settings.read().clone();
        self.engine.lock().open(&settings)
    }

    /// Re-open after a failure. `None` means shutdown was requested.
    fn reopen(&self, reason: String, shutdown_rx: &Receiver<()>) -> Option<Recovery> {
        let mut last_error = reason;

        for attempt in 1..=self.policy.max_retries {
            self.set_status(RecognizerStatus::Recovering);
            warn!(
                "Recognizer failure ({}), retrying in {:?} (attempt {}/{})",
                last_error, self.policy.delay, attempt, self.policy.max_retries
            );

            match shutdown_rx.recv_timeout(self.policy.delay) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return None,
            }

            self.set_status(RecognizerStatus::Initializing);
            match self.open() {
                Ok(session) => {
                    info!("Recognizer recovered after {} attempt(s)", attempt);
                    self.set_status(RecognizerStatus::Active);
                    return Some(Recovery::Resumed(session));
                }
                Err(EngineError::Fatal(e)) => {
                    last_error = e;
                    break;
                }
                Err(EngineError::Recoverable(e)) => last_error = e,
            }
        }

        Some(Recovery::Exhausted(last_error))
    }
}

enum Recovery {
    Resumed(Box<dyn EngineSession>),
    Exhausted(String),
}

/// The single implementation of the recognition state machine, parameterized
/// by the engine chosen at construction time.
pub struct RecognitionBackend {
    shared: Arc<Shared>,
    listener: Mutex<Option<Listener>>,
}

impl RecognitionBackend {
    pub fn new(engine: Box<dyn SpeechEngine>, settings: RecognizerConfig) -> Self {
        Self::with_retry_policy(engine, settings, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        engine: Box<dyn SpeechEngine>,
        settings: RecognizerConfig,
        policy: RetryPolicy,
    ) -> Self {
        info!("Recognition backend using '{}' engine", engine.name());
        Self {
            shared: Arc::new(Shared {
                engine: Mutex::new(engine),
                settings: RwLock::new(settings),
                status: RwLock::new(RecognizerStatus::Idle),
                policy,
            }),
            listener: Mutex::new(None),
        }
    }

    pub fn engine_name(&self) -> String {
        self.shared.engine.lock().name().to_string()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.shared.policy
    }

    pub fn language(&self) -> String {
        self.shared.settings.read().language.clone()
    }

    /// Open a session, retrying recoverable failures
    fn open_with_retry(&self) -> Result<Box<dyn EngineSession>> {
        let shared = &self.shared;
        let mut retries = 0;

        loop {
            shared.set_status(RecognizerStatus::Initializing);
            match shared.open() {
                Ok(session) => return Ok(session),
                Err(EngineError::Fatal(e)) => {
                    error!("Recognizer failed to start: {}", e);
                    shared.set_status(RecognizerStatus::Failed);
                    return Err(AssistError::RecognitionError(e));
                }
                Err(EngineError::Recoverable(e)) => {
                    if retries >= shared.policy.max_retries {
                        error!("Recognizer failed to start after {} retries: {}", retries, e);
                        shared.set_status(RecognizerStatus::Failed);
                        return Err(AssistError::RecognitionError(format!(
                            "Failed to start recognizer after {} retries: {}",
                            retries, e
                        )));
                    }
                    retries += 1;
                    shared.set_status(RecognizerStatus::Recovering);
                    warn!(
                        "Recognizer start failed ({}), retrying in {:?} (attempt {}/{})",
                        e, shared.policy.delay, retries, shared.policy.max_retries
                    );
                    thread::sleep(shared.policy.delay);
                }
            }
        }
    }
}

impl Recognizer for RecognitionBackend {
    fn start(&self, on_event: RecognitionCallback) -> Result<()> {
        // Claim the start under the lock so concurrent callers see Initializing
        let stale = {
            let mut listener = self.listener.lock();
            let status = self.status();
            if matches!(
                status,
                RecognizerStatus::Active | RecognizerStatus::Initializing | RecognizerStatus::Recovering
            ) {
                return Err(AssistError::RecognitionError(format!(
                    "Recognizer is already running ({})",
                    status
                )));
            }
            self.shared.set_status(RecognizerStatus::Initializing);
            listener.take()
        };

        // A session that ended on its own (Failed) leaves its thread behind.
        // Joined without holding the lock, its last callback may call stop().
        if let Some(stale) = stale {
            stale.shut_down();
        }

        let mut listener = self.listener.lock();
        let session = self.open_with_retry()?;
        self.shared.set_status(RecognizerStatus::Active);

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let slot: SessionSlot = Arc::new(Mutex::new(Some(session)));
        let shared = self.shared.clone();
        let listener_slot = slot.clone();

        let handle = thread::Builder::new()
            .name("recognizer-listener".to_string())
            .spawn(move || listen(shared, listener_slot, on_event, shutdown_rx))
            .map_err(|e| {
                close_session(&slot);
                self.shared.set_status(RecognizerStatus::Failed);
                AssistError::RecognitionError(format!("Failed to spawn listener: {}", e))
            })?;

        *listener = Some(Listener {
            shutdown_tx,
            session: slot,
            handle,
        });
        info!("Recognizer started");
        Ok(())
    }

    fn stop(&self) {
        let listener = self.listener.lock().take();

        if let Some(listener) = listener {
            listener.shut_down();
            info!("Recognizer stopped");
        }

        self.shared.set_status(RecognizerStatus::Idle);
    }

    fn is_active(&self) -> bool {
        self.status() == RecognizerStatus::Active
    }

    fn status(&self) -> RecognizerStatus {
        *self.shared.status.read()
    }

    fn set_language(&self, language: &str) {
        self.shared.settings.write().language = language.to_string();
    }
}

impl Drop for RecognitionBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_requested(shutdown_rx: &Receiver<()>) -> bool {
    !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty))
}

fn close_session(slot: &SessionSlot) {
    let session = slot.lock().take();
    if let Some(mut session) = session {
        session.close();
    }
}

/// Partial transcript the engine has not finalized yet
struct Utterance {
    text: String,
    started: Instant,
    updated: Instant,
}

/// Finalizes utterances the engine leaves open too long
struct Endpointer {
    silence: Option<Duration>,
    max_length: Option<Duration>,
    pending: Option<Utterance>,
    /// The pending utterance was finalized here, so the engine's own final
    /// for it is dropped
    finalized: bool,
}

impl Endpointer {
    fn new(settings: &RecognizerConfig) -> Self {
        Self {
            silence: settings.silence_timeout(),
            max_length: settings.max_recording_time(),
            pending: None,
            finalized: false,
        }
    }

    fn partial(&mut self, text: &str, now: Instant) {
        self.finalized = false;
        if let Some(utterance) = self.pending.as_mut() {
            utterance.text = text.to_string();
            utterance.updated = now;
            return;
        }
        self.pending = Some(Utterance {
            text: text.to_string(),
            started: now,
            updated: now,
        });
    }

    /// Whether an engine final should be delivered
    fn finish(&mut self) -> bool {
        self.pending = None;
        !std::mem::take(&mut self.finalized)
    }

    fn take_expired(&mut self, now: Instant) -> Option<String> {
        let utterance = self.pending.as_ref()?;
        let silent = self
            .silence
            .is_some_and(|limit| now.duration_since(utterance.updated) >= limit);
        let too_long = self
            .max_length
            .is_some_and(|limit| now.duration_since(utterance.started) >= limit);
        if !silent && !too_long {
            return None;
        }

        self.finalized = true;
        self.pending.take().map(|utterance| utterance.text)
    }

    fn reset(&mut self) {
        self.pending = None;
        self.finalized = false;
    }
}

/// Listener thread body: poll the session, deliver events, recover
fn listen(
    shared: Arc<Shared>,
    slot: SessionSlot,
    on_event: RecognitionCallback,
    shutdown_rx: Receiver<()>,
) {
    let mut endpointer = Endpointer::new(&shared.settings.read());
    debug!("Recognizer listener running");

    while !stop_requested(&shutdown_rx) {
        // Not held across callbacks, which may call stop()
        let polled = match slot.lock().as_mut() {
            Some(session) => session.poll(POLL_INTERVAL),
            None => break,
        };

        let failure = match polled {
            EnginePoll::Idle => None,
            EnginePoll::Transcript { text, is_final } => {
                let deliver = if is_final {
                    endpointer.finish()
                } else {
                    endpointer.partial(&text, Instant::now());
                    true
                };
                if deliver {
                    if stop_requested(&shutdown_rx) {
                        break;
                    }
                    on_event(RecognitionEvent::Transcript { text, is_final });
                }
                None
            }
            EnginePoll::StreamEnded => Some("input stream ended".to_string()),
            EnginePoll::Fault(reason) => Some(reason),
        };

        let Some(failure) = failure else {
            if let Some(text) = endpointer.take_expired(Instant::now()) {
                if stop_requested(&shutdown_rx) {
                    break;
                }
                debug!("Utterance endpointed: {}", text);
                on_event(RecognitionEvent::Transcript {
                    text,
                    is_final: true,
                });
            }
            continue;
        };

        close_session(&slot);
        endpointer.reset();

        match shared.reopen(failure, &shutdown_rx) {
            Some(Recovery::Resumed(next)) => *slot.lock() = Some(next),
            Some(Recovery::Exhausted(reason)) => {
                error!("Recognizer giving up: {}", reason);
                shared.set_status(RecognizerStatus::Failed);
                if !stop_requested(&shutdown_rx) {
                    on_event(RecognitionEvent::Failed(reason));
                }
                return;
            }
            None => {
                debug!("Recognizer listener stopped during recovery");
                return;
            }
        }
    }

    close_session(&slot);
    debug!("Recognizer listener exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::engines::ChannelEngine;
    use crossbeam_channel::unbounded;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: MAX_RETRY_COUNT,
            delay: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_millis(500));
    }

    #[test]
    fn test_start_and_stop() {
        let (engine, feed) = ChannelEngine::new();
        let backend = RecognitionBackend::with_retry_policy(
            Box::new(engine),
            RecognizerConfig::default(),
            fast_policy(),
        );
        assert_eq!(backend.status(), RecognizerStatus::Idle);

        let (tx, rx) = unbounded();
        backend
            .start(Box::new(move |event| {
                let _ = tx.send(event);
            }))
            .unwrap();
        assert!(backend.is_active());

        feed.push_final("hello");
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(1)).unwrap(),
            RecognitionEvent::Transcript {
                text: "hello".to_string(),
                is_final: true
            }
        );

        backend.stop();
        assert_eq!(backend.status(), RecognizerStatus::Idle);
        assert_eq!(feed.close_count(), 1);

        // Idempotent
        backend.stop();
        assert_eq!(backend.status(), RecognizerStatus::Idle);
    }

    #[test]
    fn test_start_while_active_fails() {
        let (engine, _feed) = ChannelEngine::new();
        let backend = RecognitionBackend::new(Box::new(engine), RecognizerConfig::default());

        backend.start(Box::new(|_| {})).unwrap();
        let err = backend.start(Box::new(|_| {})).unwrap_err();
        assert!(matches!(err, AssistError::RecognitionError(_)));
        backend.stop();
    }

    #[test]
    fn test_fatal_open_is_not_retried() {
        let (engine, feed) = ChannelEngine::new();
        feed.fail_opens_fatally(Some("permission denied".to_string()));
        let backend = RecognitionBackend::with_retry_policy(
            Box::new(engine),
            RecognizerConfig::default(),
            fast_policy(),
        );

        assert!(backend.start(Box::new(|_| {})).is_err());
        assert_eq!(feed.open_count(), 1);
        assert_eq!(backend.status(), RecognizerStatus::Failed);
    }

    #[test]
    fn test_endpointer_limits() {
        let settings = RecognizerConfig::default()
            .with_silence_timeout_ms(100)
            .with_max_recording_time_ms(1_000);
        let mut endpointer = Endpointer::new(&settings);
        let t0 = Instant::now();

        assert_eq!(endpointer.take_expired(t0 + Duration::from_secs(5)), None);

        endpointer.partial("turn", t0);
        endpointer.partial("turn on", t0 + Duration::from_millis(80));
        assert_eq!(endpointer.take_expired(t0 + Duration::from_millis(150)), None);
        assert_eq!(
            endpointer.take_expired(t0 + Duration::from_millis(180)),
            Some("turn on".to_string())
        );
        // The engine's late final for the same utterance is dropped
        assert!(!endpointer.finish());
        assert!(endpointer.finish());

        // Steady partials still hit the length cap
        for step in 0..=10 {
            endpointer.partial("still talking", t0 + Duration::from_millis(step * 90));
        }
        assert_eq!(
            endpointer.take_expired(t0 + Duration::from_millis(1_000)),
            Some("still talking".to_string())
        );
    }

    #[test]
    fn test_endpointer_disabled_with_zero() {
        let settings = RecognizerConfig::default()
            .with_silence_timeout_ms(0)
            .with_max_recording_time_ms(0);
        let mut endpointer = Endpointer::new(&settings);
        let t0 = Instant::now();

        endpointer.partial("hello", t0);
        assert_eq!(endpointer.take_expired(t0 + Duration::from_secs(60)), None);
        assert!(endpointer.finish());
    }

    #[test]
    fn test_set_language_applies_to_next_session() {
        let (engine, _feed) = ChannelEngine::new();
        let backend = RecognitionBackend::new(Box::new(engine), RecognizerConfig::default());

        backend.set_language("fr-FR");
        assert_eq!(backend.language(), "fr-FR");
        assert_eq!(backend.engine_name(), "channel");
    }
}
