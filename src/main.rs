use anyhow::{Context, Result};
use clap::Parser;
use murmur::speech::{ConsoleSpeaker, TypedCapture};
use murmur::{
    AppEvent, AssistantConfig, ConversationState, OrchestratorBuilder, OrchestratorHandle, Role,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Terminal front end for the murmur voice assistant
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL of the primary LLM server
    #[arg(long, env = "MURMUR_PRIMARY_URL")]
    primary_url: Option<String>,

    /// Model name sent to the primary server
    #[arg(long, env = "MURMUR_MODEL")]
    model: Option<String>,

    /// GGUF file for the on-device fallback model
    #[arg(long, env = "MURMUR_MODEL_PATH")]
    model_path: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<AssistantConfig> {
        let mut config = match &self.config {
            Some(path) => AssistantConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => AssistantConfig::default(),
        };
        if let Some(url) = self.primary_url {
            config.gateway.base_url = url;
        }
        if let Some(model) = self.model {
            config.gateway.model = model;
        }
        if let Some(path) = self.model_path {
            config.gateway.local_model_path = path;
        }
        config.validate()?;
        Ok(config)
    }
}

const HELP: &str = "Type a message to send it. Commands:
  /say <text>  speak <text> into the microphone
  /listen      start listening
  /stop        stop listening
  /clear       dismiss the current error
  /status      show conversation state
  /quit        exit";

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Args::parse().into_config()?;
    info!(
        "Starting murmur (primary: {}, fallback: {})",
        config.gateway.base_url,
        config.gateway.local_model_path.display()
    );

    let capture = Arc::new(TypedCapture::new());
    let (orchestrator, handle) = OrchestratorBuilder::new()
        .with_config(config)
        .with_capture(capture.clone())
        .with_output(Arc::new(ConsoleSpeaker::new()))
        .build()?;
    let mut threads = orchestrator.start()?;
    let handle = Arc::new(handle);

    let printer = {
        let handle = handle.clone();
        thread::Builder::new()
            .name("murmur-printer".to_string())
            .spawn(move || print_events(&handle))?
    };
    threads.push(printer);

    println!("{}", HELP);
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => continue,
            ("/quit", _) => break,
            ("/say", text) => {
                capture.say(text.trim());
                handle.start_listening()?;
            }
            ("/listen", _) => handle.start_listening()?,
            ("/stop", _) => handle.stop_listening()?,
            ("/clear", _) => handle.clear_error()?,
            ("/status", _) => {
                let snapshot = handle.snapshot();
                println!(
                    "{} | {} | {} messages",
                    snapshot.conversation,
                    snapshot.provider_label(),
                    snapshot.messages.len()
                );
            }
            _ if line.starts_with('/') => println!("{}", HELP),
            _ => handle.submit_text(line)?,
        }
    }

    handle.shutdown()?;
    for thread in threads {
        if thread.join().is_err() {
            tracing::error!("Worker thread panicked");
        }
    }
    Ok(())
}

fn print_events(handle: &OrchestratorHandle) {
    // Reply text printed from chunks, and the id of the last reply shown in full
    let mut shown = String::new();
    let mut rendered: Option<Uuid> = None;
    while let Ok(event) = handle.recv_event() {
        match event {
            AppEvent::ProviderChanged(provider) => println!("[{}]", provider),
            AppEvent::MessageChunk { text, .. } => {
                shown.push_str(&text);
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            AppEvent::StateChanged(ConversationState::Speaking | ConversationState::Idle) => {
                // Chunk events can be dropped, so finish from the transcript
                let reply = {
                    let state = handle.state().read();
                    state
                        .transcript
                        .last()
                        .filter(|m| m.role() == Role::Assistant && !m.is_streaming())
                        .map(|m| (m.id(), m.text().to_string()))
                };
                if let Some((id, text)) = reply {
                    if rendered != Some(id) {
                        println!("{}", remaining_text(&shown, &text));
                        rendered = Some(id);
                    }
                }
                shown.clear();
            }
            AppEvent::ErrorChanged(Some(error)) => eprintln!("! {}", error),
            AppEvent::Shutdown => break,
            _ => {}
        }
    }
}

/// What is left to print after `shown` so the terminal ends up showing `reply`
fn remaining_text(shown: &str, reply: &str) -> String {
    match reply.strip_prefix(shown) {
        Some(rest) => rest.to_string(),
        None => format!("\n{}", reply),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_text_completes_streamed_reply() {
        assert_eq!(remaining_text("Hel", "Hello"), "lo");
        assert_eq!(remaining_text("Hello", "Hello"), "");
        assert_eq!(remaining_text("", "Hello"), "Hello");
    }

    #[test]
    fn test_remaining_text_reprints_after_gap() {
        assert_eq!(remaining_text("Helo", "Hello"), "\nHello");
    }
}
