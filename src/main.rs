use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voice_assist::{AssistantConfig, OrchestrationState, Orchestrator, OrchestratorBuilder};

const HELP: &str = "\
Voice Assistant Commands:
  listen      - Start listening for voice input
  stop        - Stop listening
  type TEXT   - Send text directly to the assistant
  cancel      - Cancel the response being generated
  clear       - Clear conversation history
  history     - Show the conversation so far
  api KEY     - Set the API key
  model MODEL - Set the LLM model
  tts on|off  - Enable/disable text-to-speech
  voice NAME  - Set the text-to-speech voice
  help        - Display this help message
  exit        - Exit the application";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Listen,
    Stop,
    Type(&'a str),
    Cancel,
    Clear,
    History,
    Api(&'a str),
    Model(&'a str),
    Tts(Option<bool>),
    Voice(&'a str),
    Help,
    Exit,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (name, arg) = match line.split_once(' ') {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };

    Some(match name {
        "listen" => Command::Listen,
        "stop" => Command::Stop,
        "type" => Command::Type(arg),
        "cancel" => Command::Cancel,
        "clear" => Command::Clear,
        "history" => Command::History,
        "api" => Command::Api(arg),
        "model" => Command::Model(arg),
        "tts" => Command::Tts(match arg {
            "on" => Some(true),
            "off" => Some(false),
            _ => None,
        }),
        "voice" => Command::Voice(arg),
        "help" => Command::Help,
        "exit" | "quit" => Command::Exit,
        other => Command::Unknown(other),
    })
}

fn load_config() -> Result<AssistantConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => AssistantConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => AssistantConfig::default(),
    };

    if config.api_key.is_empty() {
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.api_key = key;
        }
    }
    if config.api_key.is_empty() {
        warn!("No API key found. Set it with 'api YOUR_KEY' or the LLM_API_KEY env var.");
    }

    Ok(config)
}

fn build_orchestrator(config: AssistantConfig) -> Result<Orchestrator> {
    #[allow(unused_mut)]
    let mut builder = OrchestratorBuilder::new(config);

    #[cfg(feature = "audio-io")]
    match voice_assist::audio::CpalCapture::new() {
        Ok(capture) => builder = builder.with_capture(Box::new(capture)),
        Err(e) => warn!("Microphone unavailable, continuing without capture: {}", e),
    }

    let orchestrator = builder.build().context("Failed to initialize voice assistant")?;

    orchestrator.set_state_change_callback(|state| match state {
        OrchestrationState::Idle => println!("State: IDLE"),
        other => println!("State: {}...", other.to_string().to_uppercase()),
    });
    orchestrator.set_transcription_callback(|text| println!("You said: {}", text));
    orchestrator.set_response_callback(|text| println!("Assistant: {}", text));
    orchestrator.set_error_callback(|error| eprintln!("Error: {}", error));

    Ok(orchestrator)
}

/// Apply a config edit; errors were already reported through the error callback
fn update_config(orchestrator: &Orchestrator, edit: impl FnOnce(&mut AssistantConfig)) -> bool {
    let mut config = orchestrator.config();
    edit(&mut config);
    orchestrator.set_config(config).is_ok()
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_assist=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting voice assistant");

    println!("Voice Assistant - Command Line");
    println!("Type 'help' for a list of commands");

    let config = load_config()?;
    let orchestrator = build_orchestrator(config)?;

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("Failed to read command")?;

        let Some(command) = parse_command(&line) else {
            continue;
        };

        // Failures are printed by the error callback
        match command {
            Command::Help => println!("{}", HELP),
            Command::Exit => break,
            Command::Listen => {
                let _ = orchestrator.start_listening();
            }
            Command::Stop => {
                let _ = orchestrator.stop_listening();
            }
            Command::Type("") => println!("Please provide text to send"),
            Command::Type(text) => {
                let _ = orchestrator.send_text_input(text);
            }
            Command::Cancel => {
                let _ = orchestrator.cancel_response();
            }
            Command::Clear => {
                orchestrator.clear_conversation();
                println!("Conversation history cleared");
            }
            Command::History => {
                for message in orchestrator.conversation_history() {
                    println!("[{}] {}", message.role(), message.content());
                }
            }
            Command::Api("") => println!("Please provide an API key"),
            Command::Api(key) => {
                if update_config(&orchestrator, |c| c.api_key = key.to_string()) {
                    println!("API key set");
                }
            }
            Command::Model("") => println!("Please provide a model name"),
            Command::Model(model) => {
                if update_config(&orchestrator, |c| c.llm_model = model.to_string()) {
                    println!("Model set to: {}", model);
                }
            }
            Command::Tts(None) => println!("Please specify 'on' or 'off'"),
            Command::Tts(Some(enabled)) => {
                if update_config(&orchestrator, |c| c.use_text_to_speech = enabled) {
                    println!(
                        "Text-to-speech {}",
                        if enabled { "enabled" } else { "disabled" }
                    );
                }
            }
            Command::Voice(voice) => {
                if update_config(&orchestrator, |c| c.tts_voice = voice.to_string()) {
                    println!("Voice set to: {}", if voice.is_empty() { "default" } else { voice });
                }
            }
            Command::Unknown(name) => {
                println!("Unknown command: {}", name);
                println!("Type 'help' for available commands");
            }
        }
    }

    println!("Exiting...");
    orchestrator.shutdown();
    Ok(())
}
