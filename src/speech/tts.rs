//! Speech output
//!
//! Playback is fire-and-forget: `speak` hands the text off and returns at once.

use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, info, warn};

/// Speaks reply text
pub trait Speaker: Send + Sync {
    /// Start speaking `text`. Returns false if playback could not be started.
    fn speak(&self, text: &str, voice: &str) -> bool;
}

/// Writes replies to the log instead of an audio device
#[derive(Debug, Default)]
pub struct LogSpeaker;

impl Speaker for LogSpeaker {
    fn speak(&self, text: &str, voice: &str) -> bool {
        info!("[tts:{}] {}", voice, text);
        true
    }
}

/// Runs an external synthesizer such as `espeak` for each reply
#[derive(Debug, Clone)]
pub struct ProcessSpeaker {
    program: String,
    voice_flag: Option<String>,
    args: Vec<String>,
}

impl ProcessSpeaker {
    /// `program` is invoked as `program [args..] [voice_flag voice] text`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            voice_flag: Some("-v".to_string()),
            args: Vec::new(),
        }
    }

    /// Build from a command line such as `"espeak -s 160"`
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).with_args(parts.map(str::to_string)))
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    /// Flag used to pass the voice, or `None` to never pass one
    pub fn with_voice_flag(mut self, flag: Option<String>) -> Self {
        self.voice_flag = flag;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, text: &str, voice: &str) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(flag) = &self.voice_flag {
            if !voice.is_empty() {
                command.arg(flag).arg(voice);
            }
        }
        command
            .arg(clean_for_speech(text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

impl Speaker for ProcessSpeaker {
    fn speak(&self, text: &str, voice: &str) -> bool {
        match self.command(text, voice).spawn() {
            Ok(mut child) => {
                debug!("Spawned {} (pid {})", self.program, child.id());
                // Reap in the background so playback never blocks the caller
                let spawned = thread::Builder::new()
                    .name("tts-reaper".to_string())
                    .spawn(move || {
                        let _ = child.wait();
                    });
                if let Err(e) = spawned {
                    warn!("Failed to spawn tts reaper: {}", e);
                }
                true
            }
            Err(e) => {
                warn!("Failed to run {}: {}", self.program, e);
                false
            }
        }
    }
}

/// Drop markdown markers a synthesizer would read aloud
pub fn clean_for_speech(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '#' | '`' | '_' | '~'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
