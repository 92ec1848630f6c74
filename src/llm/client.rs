//! Asynchronous completion client
//!
//! Requests are queued to a worker thread that owns a tokio runtime. Each
//! request runs as its own task and resolves its callback exactly once, with
//! the reply text, an error, or `CompletionError::Cancelled`.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::CompletionConfig;
use super::transport::{ChatRequest, ChatTransport, HttpTransport};
use super::CompletionError;
use crate::messages::Message;
use crate::{AssistError, Result};

/// Receives the outcome of one `send`
pub type CompletionCallback = Box<dyn FnOnce(std::result::Result<String, CompletionError>) + Send>;

/// Identifies one `send` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct PendingRequest {
    id: RequestId,
    token: CancellationToken,
}

type PendingSlot = Arc<Mutex<Option<PendingRequest>>>;

/// Delivers a request's result once. Dropping an unresolved slot reports
/// `Cancelled`, which covers jobs discarded at shutdown.
struct ResultSlot {
    id: RequestId,
    pending: PendingSlot,
    callback: Option<CompletionCallback>,
}

impl ResultSlot {
    fn resolve(mut self, result: std::result::Result<String, CompletionError>) {
        self.deliver(result);
    }

    fn deliver(&mut self, result: std::result::Result<String, CompletionError>) {
        if let Some(callback) = self.callback.take() {
            {
                let mut pending = self.pending.lock();
                if pending.as_ref().is_some_and(|p| p.id == self.id) {
                    *pending = None;
                }
            }
            callback(result);
        }
    }
}

impl Drop for ResultSlot {
    fn drop(&mut self) {
        self.deliver(Err(CompletionError::Cancelled));
    }
}

enum ClientCommand {
    Complete {
        request: ChatRequest,
        token: CancellationToken,
        slot: ResultSlot,
    },
    Shutdown,
}

/// Sends conversation snapshots to the language model off the caller's thread
pub struct CompletionClient {
    config: RwLock<CompletionConfig>,
    pending: PendingSlot,
    command_tx: Sender<ClientCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CompletionClient {
    /// Create a client speaking HTTP through reqwest
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let transport = HttpTransport::new()
            .map_err(|e| AssistError::InitializationError(e.to_string()))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client on top of an arbitrary transport
    pub fn with_transport(config: CompletionConfig, transport: Arc<dyn ChatTransport>) -> Result<Self> {
        let (command_tx, command_rx) = unbounded::<ClientCommand>();

        let worker = std::thread::Builder::new()
            .name("completion-worker".to_string())
            .spawn(move || {
                info!("Completion worker starting");

                let runtime = match Runtime::new() {
                    Ok(rt) => rt,
                    Err(e) => {
                        // Queued and future requests fail through their slots
                        error!("Failed to create tokio runtime: {}", e);
                        return;
                    }
                };

                loop {
                    match command_rx.recv() {
                        Ok(ClientCommand::Complete {
                            request,
                            token,
                            slot,
                        }) => {
                            runtime.spawn(run_request(transport.clone(), request, token, slot));
                        }
                        Ok(ClientCommand::Shutdown) => {
                            info!("Completion worker shutting down");
                            break;
                        }
                        Err(_) => break,
                    }
                }

                // Unfinished tasks are dropped here and resolve as cancelled
                runtime.shutdown_timeout(Duration::from_millis(100));
                info!("Completion worker stopped");
            })
            .map_err(|e| {
                AssistError::InitializationError(format!("Failed to spawn completion worker: {}", e))
            })?;

        Ok(Self {
            config: RwLock::new(config),
            pending: Arc::new(Mutex::new(None)),
            command_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a completion for `snapshot`. Returns immediately; `on_result`
    /// runs exactly once on the worker (or inline if the worker is gone).
    pub fn send(&self, snapshot: Vec<Message>, on_result: CompletionCallback) -> RequestId {
        let id = RequestId::new();
        let token = CancellationToken::new();
        let request = ChatRequest::new(snapshot, self.config.read().clone());

        {
            let mut pending = self.pending.lock();
            if let Some(previous) = pending.replace(PendingRequest {
                id,
                token: token.clone(),
            }) {
                debug!("Request {} replaced by {}", previous.id, id);
            }
        }

        let slot = ResultSlot {
            id,
            pending: self.pending.clone(),
            callback: Some(on_result),
        };

        debug!(
            "Dispatching request {} ({} messages, model {})",
            id,
            request.messages.len(),
            request.config.model
        );

        if let Err(e) = self.command_tx.send(ClientCommand::Complete {
            request,
            token,
            slot,
        }) {
            warn!("Completion worker unavailable, failing request {}", id);
            if let ClientCommand::Complete { slot, .. } = e.into_inner() {
                slot.resolve(Err(CompletionError::Transport(
                    "Completion worker is not running".to_string(),
                )));
            }
        }

        id
    }

    /// Send and wait for the result on the calling thread.
    ///
    /// Must not be called from inside a completion callback.
    pub fn send_blocking(
        &self,
        snapshot: Vec<Message>,
    ) -> std::result::Result<String, CompletionError> {
        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        self.send(
            snapshot,
            Box::new(move |result| {
                let _ = result_tx.send(result);
            }),
        );
        result_rx.recv().unwrap_or(Err(CompletionError::Cancelled))
    }

    /// Cancel the tracked pending request. Returns false if nothing was pending.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().as_ref() {
            Some(pending) => {
                info!("Cancelling request {}", pending.id);
                pending.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        self.pending.lock().as_ref().map(|p| p.id)
    }

    pub fn config(&self) -> CompletionConfig {
        self.config.read().clone()
    }

    /// Takes effect for the next `send`; requests in flight keep their parameters
    pub fn set_config(&self, config: CompletionConfig) {
        *self.config.write() = config;
    }

    /// Stop the worker. Unresolved requests resolve as cancelled.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        if let Some(pending) = self.pending.lock().as_ref() {
            pending.token.cancel();
        }

        let _ = self.command_tx.send(ClientCommand::Shutdown);
        if worker.thread().id() == std::thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            error!("Completion worker panicked");
        }
    }
}

impl Drop for CompletionClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_request(
    transport: Arc<dyn ChatTransport>,
    request: ChatRequest,
    token: CancellationToken,
    slot: ResultSlot,
) {
    if token.is_cancelled() {
        debug!("Request {} cancelled before transport", slot.id);
        slot.resolve(Err(CompletionError::Cancelled));
        return;
    }

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(CompletionError::Cancelled),
        result = transport.complete(&request) => result,
    };

    match &result {
        Ok(text) => debug!("Request {} completed ({} chars)", slot.id, text.len()),
        Err(CompletionError::Cancelled) => debug!("Request {} cancelled", slot.id),
        Err(e) => warn!("Request {} failed: {}", slot.id, e),
    }

    slot.resolve(result);
}
