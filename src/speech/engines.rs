//! Built-in speech engines

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::config::RecognizerConfig;
use super::engine::{EngineError, EnginePoll, EngineSession, SpeechEngine};

enum FeedItem {
    Transcript { text: String, is_final: bool },
    Fault(String),
    StreamEnd,
}

#[derive(Default)]
struct FeedControl {
    failing_opens: usize,
    fatal_open: Option<String>,
    opens: usize,
    closes: usize,
}

/// Engine fed by another component through a [`TranscriptFeed`].
///
/// Items pushed while no session is open are delivered to the next session.
pub struct ChannelEngine {
    rx: Receiver<FeedItem>,
    control: Arc<Mutex<FeedControl>>,
}

/// Producer half of a [`ChannelEngine`]
#[derive(Clone)]
pub struct TranscriptFeed {
    tx: Sender<FeedItem>,
    control: Arc<Mutex<FeedControl>>,
}

impl ChannelEngine {
    pub fn new() -> (Self, TranscriptFeed) {
        let (tx, rx) = unbounded();
        let control = Arc::new(Mutex::new(FeedControl::default()));
        (
            Self {
                rx,
                control: control.clone(),
            },
            TranscriptFeed { tx, control },
        )
    }
}

impl SpeechEngine for ChannelEngine {
    fn name(&self) -> &str {
        "channel"
    }

    fn open(&mut self, _settings: &RecognizerConfig) -> Result<Box<dyn EngineSession>, EngineError> {
        let mut control = self.control.lock();
        control.opens += 1;

        if let Some(reason) = &control.fatal_open {
            return Err(EngineError::Fatal(reason.clone()));
        }
        if control.failing_opens > 0 {
            control.failing_opens -= 1;
            return Err(EngineError::Recoverable("transcript feed unavailable".to_string()));
        }

        Ok(Box::new(ChannelSession {
            rx: self.rx.clone(),
            control: self.control.clone(),
        }))
    }
}

impl TranscriptFeed {
    pub fn push_partial(&self, text: impl Into<String>) -> bool {
        self.push(FeedItem::Transcript {
            text: text.into(),
            is_final: false,
        })
    }

    pub fn push_final(&self, text: impl Into<String>) -> bool {
        self.push(FeedItem::Transcript {
            text: text.into(),
            is_final: true,
        })
    }

    /// Make the open session report a runtime fault
    pub fn inject_fault(&self, reason: impl Into<String>) -> bool {
        self.push(FeedItem::Fault(reason.into()))
    }

    /// Make the open session report that its stream closed
    pub fn end_stream(&self) -> bool {
        self.push(FeedItem::StreamEnd)
    }

    /// Fail the next `count` session opens with a recoverable error
    pub fn fail_next_opens(&self, count: usize) {
        self.control.lock().failing_opens = count;
    }

    /// Fail every open with a fatal error until cleared with `None`
    pub fn fail_opens_fatally(&self, reason: Option<String>) {
        self.control.lock().fatal_open = reason;
    }

    pub fn open_count(&self) -> usize {
        self.control.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.control.lock().closes
    }

    fn push(&self, item: FeedItem) -> bool {
        self.tx.send(item).is_ok()
    }
}

struct ChannelSession {
    rx: Receiver<FeedItem>,
    control: Arc<Mutex<FeedControl>>,
}

impl EngineSession for ChannelSession {
    fn poll(&mut self, timeout: Duration) -> EnginePoll {
        match self.rx.recv_timeout(timeout) {
            Ok(FeedItem::Transcript { text, is_final }) => EnginePoll::Transcript { text, is_final },
            Ok(FeedItem::Fault(reason)) => EnginePoll::Fault(reason),
            Ok(FeedItem::StreamEnd) => EnginePoll::StreamEnded,
            Err(RecvTimeoutError::Timeout) => EnginePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => EnginePoll::StreamEnded,
        }
    }

    fn close(&mut self) {
        self.control.lock().closes += 1;
    }
}

/// Reads finalized transcripts, one per line, from a file or named pipe
/// written by an external recognizer.
///
/// One reader thread serves every session of the engine and reads a single
/// line per request, so a line is consumed only by the session that asked
/// for it. The read position survives between sessions. End of file ends
/// the current session's stream; a named pipe is reopened on the next
/// request so the next writer can be heard.
pub struct PipeEngine {
    source: PathBuf,
    reader: Option<Arc<Mutex<PipeReader>>>,
    opening: Arc<AtomicBool>,
}

enum PipeItem {
    Line(String),
    End,
    Error(String),
}

struct PipeReader {
    demand_tx: Sender<()>,
    lines_rx: Receiver<PipeItem>,
    /// A line was requested and not yet received
    requested: bool,
}

impl PipeEngine {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            reader: None,
            opening: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_reader(&self) -> Result<Arc<Mutex<PipeReader>>, EngineError> {
        let (demand_tx, demand_rx) = unbounded::<()>();
        let (line_tx, lines_rx) = unbounded::<PipeItem>();
        let source = self.source.clone();
        let opening = self.opening.clone();

        thread::Builder::new()
            .name("pipe-reader".to_string())
            .spawn(move || read_lines(source, demand_rx, line_tx, opening))
            .map_err(|e| EngineError::Recoverable(format!("Failed to spawn pipe reader: {}", e)))?;

        Ok(Arc::new(Mutex::new(PipeReader {
            demand_tx,
            lines_rx,
            requested: false,
        })))
    }
}

impl SpeechEngine for PipeEngine {
    fn name(&self) -> &str {
        "pipe"
    }

    fn open(&mut self, settings: &RecognizerConfig) -> Result<Box<dyn EngineSession>, EngineError> {
        if !self.source.exists() {
            return Err(EngineError::Recoverable(format!(
                "Transcript source {} not found",
                self.source.display()
            )));
        }

        let reader = match &self.reader {
            Some(reader) => reader.clone(),
            None => {
                let reader = self.spawn_reader()?;
                self.reader = Some(reader.clone());
                reader
            }
        };

        info!(
            "Reading {} transcripts from {}",
            settings.language,
            self.source.display()
        );
        Ok(Box::new(PipeSession { reader }))
    }
}

impl Drop for PipeEngine {
    fn drop(&mut self) {
        // The reader exits once its demand channel closes
        self.reader = None;

        // Opening a FIFO for reading blocks until a writer appears
        if self.opening.load(Ordering::SeqCst) && is_fifo(&self.source) {
            let source = self.source.clone();
            let _ = thread::Builder::new()
                .name("pipe-unblock".to_string())
                .spawn(move || {
                    let _ = OpenOptions::new().write(true).open(&source);
                });
        }
    }
}

/// Reader thread body: answer each demand with exactly one item
fn read_lines(
    source: PathBuf,
    demand_rx: Receiver<()>,
    line_tx: Sender<PipeItem>,
    opening: Arc<AtomicBool>,
) {
    let mut input: Option<BufReader<File>> = None;

    while demand_rx.recv().is_ok() {
        let item = loop {
            if input.is_none() {
                opening.store(true, Ordering::SeqCst);
                let opened = File::open(&source);
                opening.store(false, Ordering::SeqCst);
                match opened {
                    Ok(file) => input = Some(BufReader::new(file)),
                    Err(e) => break PipeItem::Error(format!("Failed to open {}: {}", source.display(), e)),
                }
            }
            let Some(lines) = input.as_mut() else {
                continue;
            };

            let mut line = String::new();
            match lines.read_line(&mut line) {
                Ok(0) => {
                    if is_fifo(&source) {
                        input = None;
                    }
                    break PipeItem::End;
                }
                Ok(_) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        break PipeItem::Line(line.to_string());
                    }
                }
                Err(e) => {
                    input = None;
                    break PipeItem::Error(format!("Read error: {}", e));
                }
            }
        };

        if line_tx.send(item).is_err() {
            break;
        }
    }
    debug!("Pipe reader for {} finished", source.display());
}

#[cfg(unix)]
fn is_fifo(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata(path)
        .map(|meta| meta.file_type().is_fifo())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_fifo(_path: &Path) -> bool {
    false
}

struct PipeSession {
    reader: Arc<Mutex<PipeReader>>,
}

impl EngineSession for PipeSession {
    fn poll(&mut self, timeout: Duration) -> EnginePoll {
        let mut reader = self.reader.lock();

        // An unanswered request carries over to the next session
        if !reader.requested {
            if reader.demand_tx.send(()).is_err() {
                return EnginePoll::Fault("pipe reader stopped".to_string());
            }
            reader.requested = true;
        }

        let item = match reader.lines_rx.recv_timeout(timeout) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => return EnginePoll::Idle,
            Err(RecvTimeoutError::Disconnected) => {
                return EnginePoll::Fault("pipe reader stopped".to_string())
            }
        };
        reader.requested = false;

        match item {
            PipeItem::Line(text) => EnginePoll::Transcript {
                text,
                is_final: true,
            },
            PipeItem::End => EnginePoll::StreamEnded,
            PipeItem::Error(reason) => EnginePoll::Fault(reason),
        }
    }

    fn close(&mut self) {}
}

/// Replays a fixed list of phrases, each first as a partial then as a final
/// transcript. Position is kept across sessions, so each listening session
/// continues with the next phrase.
pub struct ScriptedEngine {
    script: Arc<Vec<String>>,
    interval: Duration,
    cursor: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<String>, interval: Duration) -> Self {
        Self {
            script: Arc::new(script),
            interval,
            cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script
            .len()
            .saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

impl SpeechEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn open(&mut self, _settings: &RecognizerConfig) -> Result<Box<dyn EngineSession>, EngineError> {
        if self.remaining() == 0 && !self.script.is_empty() {
            warn!("Scripted engine has no phrases left");
        }

        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            interval: self.interval,
            cursor: self.cursor.clone(),
            next_at: Instant::now() + self.interval,
            partial_sent: false,
        }))
    }
}

struct ScriptedSession {
    script: Arc<Vec<String>>,
    interval: Duration,
    cursor: Arc<AtomicUsize>,
    next_at: Instant,
    partial_sent: bool,
}

impl EngineSession for ScriptedSession {
    fn poll(&mut self, timeout: Duration) -> EnginePoll {
        let index = self.cursor.load(Ordering::SeqCst);
        let Some(phrase) = self.script.get(index) else {
            thread::sleep(timeout);
            return EnginePoll::Idle;
        };

        let now = Instant::now();
        if now < self.next_at {
            thread::sleep((self.next_at - now).min(timeout));
            if Instant::now() < self.next_at {
                return EnginePoll::Idle;
            }
        }

        if !self.partial_sent {
            self.partial_sent = true;
            return EnginePoll::Transcript {
                text: leading_words(phrase),
                is_final: false,
            };
        }

        self.partial_sent = false;
        self.cursor.fetch_add(1, Ordering::SeqCst);
        self.next_at = Instant::now() + self.interval;
        EnginePoll::Transcript {
            text: phrase.clone(),
            is_final: true,
        }
    }

    fn close(&mut self) {}
}

/// First half of the words in `phrase`, rounded up
fn leading_words(phrase: &str) -> String {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let keep = words.len().div_ceil(2);
    words[..keep].join(" ")
}
