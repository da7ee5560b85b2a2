//! voice-concierge: voice-first assistant daemon
//!
//! Runs the whole assistant in one process:
//! - Continuous speech capture with pause bookkeeping, backoff and watchdog
//! - Spoken output that keeps capture paused while the assistant talks
//! - Intent classification and the multi-turn dialogue orchestrator
//! - IPC server for status, event subscription and operator commands
//!
//! The bundled engines are terminal stand-ins: typed lines are heard as
//! final transcripts and replies are printed to stdout.

mod capture;
mod collaborators;
mod config;
mod console;
mod dialogue;
mod events;
mod intent;
mod ipc;
mod lifecycle;
mod output;
mod speech;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::console::{ConsoleFeed, ConsoleSynthesizer};
use crate::dialogue::Orchestrator;
use crate::events::AssistantEvent;
use crate::ipc::{Control, Server};
use crate::lifecycle::ShutdownSignal;
use crate::speech::{SpeechHandle, SpeechService};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the console synthesizer
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "voice-concierge starting");

    let config = Config::load()?;
    config.ensure_dirs().context("failed to create data directory")?;
    info!(?config.socket_path, "configuration loaded");

    let mut shutdown = ShutdownSignal::new()?;

    // Speech service and orchestrator -> IPC server and subscribers
    let (event_tx, _event_rx) = broadcast::channel::<AssistantEvent>(256);
    // Capture and operator socket -> orchestrator
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    // Orchestrator and operator socket -> speech service
    let (speech, speech_rx) = SpeechHandle::channel();

    let feed = ConsoleFeed::new();
    let service = SpeechService::new(
        &config,
        Box::new(feed.factory()),
        Box::new(ConsoleSynthesizer::new()),
        inbox_tx.clone(),
        event_tx.clone(),
    )
    .context("failed to initialize speech engines")?;
    feed.spawn_stdin().context("failed to start console input")?;

    let mut orchestrator = Orchestrator::new(
        config.dialogue.clone(),
        Collaborators::offline(),
        speech.clone(),
        event_tx.clone(),
    );

    let server = Server::new(
        &config.socket_path,
        Control {
            speech,
            dialogue: inbox_tx,
        },
        event_tx,
    )?;

    info!("assistant initialized, type to speak");

    tokio::select! {
        _ = service.run(speech_rx) => {
            info!("speech service exited");
        }

        _ = orchestrator.run(inbox_rx) => {
            info!("dialogue orchestrator exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    server.shutdown().await;

    info!("voice-concierge stopped");

    Ok(())
}
