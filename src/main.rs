use anyhow::{Context, Result};
use luna::agent::AgentClient;
use luna::integration::{LunaConfig, OrchestratorBuilder, OrchestratorCommand, OrchestratorEvent};
use luna::turn::message_label;
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: luna [--api-url URL] [--no-stream] [--mute]";

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "luna=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = parse_args(LunaConfig::from_env().context("Failed to load configuration")?)?;
    info!("Starting Luna against {}", config.agent.api_url);

    print_suggestions(&config);

    let builder = OrchestratorBuilder::new().with_config(config.clone());
    let builder = with_speaker(builder, &config);
    let (orchestrator, handle) = builder.build()?;
    let thread = orchestrator.start()?;

    let stdin = std::io::stdin();
    prompt()?;
    for line in stdin.lock().lines() {
        let line = line?;
        let text = line.trim();
        match text {
            "" => {}
            "/quit" | "/exit" => break,
            "/clear" => handle.send_command(OrchestratorCommand::ClearHistory)?,
            "/stop" => handle.send_command(OrchestratorCommand::StopSpeaking)?,
            "/replay" => handle.send_command(OrchestratorCommand::Replay)?,
            _ => {
                handle.send_command(OrchestratorCommand::SendText(text.to_string()))?;
                print_turn(&handle)?;
            }
        }
        prompt()?;
    }

    handle.send_command(OrchestratorCommand::Shutdown)?;
    if thread.join().is_err() {
        warn!("Orchestrator thread panicked");
    }
    Ok(())
}

fn parse_args(mut config: LunaConfig) -> Result<LunaConfig> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        config = match arg.as_str() {
            "--api-url" => config.with_api_url(args.next().context(USAGE)?),
            "--no-stream" => config.without_streaming(),
            "--mute" => config.without_voice(),
            _ => anyhow::bail!("unknown argument '{}'\n{}", arg, USAGE),
        };
    }
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "audio-io")]
fn with_speaker(builder: OrchestratorBuilder, config: &LunaConfig) -> OrchestratorBuilder {
    if !config.playback.enable_voice {
        return builder;
    }
    match luna::playback::SpeakerOutput::new() {
        Ok(speaker) => builder.with_media(std::sync::Arc::new(speaker)),
        Err(e) => {
            warn!("No speaker output, answers stay text-only: {}", e);
            builder
        }
    }
}

#[cfg(not(feature = "audio-io"))]
fn with_speaker(builder: OrchestratorBuilder, _config: &LunaConfig) -> OrchestratorBuilder {
    builder
}

fn print_suggestions(config: &LunaConfig) {
    let Ok(client) = AgentClient::new(config.agent.clone()) else {
        return;
    };
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
        return;
    };
    let questions = runtime.block_on(client.suggested_questions(config.agent.suggested_question_count));

    println!("Try asking:");
    for question in questions {
        println!("  - {}", question);
    }
}

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}

/// Print one streamed answer until the turn completes
fn print_turn(handle: &luna::integration::OrchestratorHandle) -> Result<()> {
    let mut out = std::io::stdout();
    let mut printed = String::new();
    let mut label: Option<String> = None;

    while let Some(event) = handle.recv_event_timeout(Duration::from_secs(120)) {
        match event {
            OrchestratorEvent::MessageUpdated(message) if message.is_assistant() => {
                let current = message_label(&message);
                if current.is_some() && current != label {
                    if let Some(text) = &current {
                        eprintln!("[{}]", text);
                    }
                }
                label = current;

                match message.content.strip_prefix(printed.as_str()) {
                    Some(delta) => write!(out, "{}", delta)?,
                    // The answer was replaced by an improved one
                    None => write!(out, "\n{}", message.content)?,
                }
                out.flush()?;
                printed = message.content.clone();
            }
            OrchestratorEvent::Error(error) => eprintln!("\n[error] {}", error),
            OrchestratorEvent::TurnComplete { timing, .. } => {
                writeln!(out)?;
                info!("{}", timing.summary());
                return Ok(());
            }
            _ => {}
        }
    }

    writeln!(out)?;
    warn!("Timed out waiting for the answer");
    Ok(())
}
