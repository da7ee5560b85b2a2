//! Single-task runner for capture and output
//!
//! Multiplexes orchestrator commands, engine signals and the earliest
//! pending timer of either controller. Final transcripts are forwarded to
//! the dialogue inbox in the order the engine produced them.

use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::capture::{CaptureController, CaptureSignal, EngineError, SessionFactory, SessionId};
use crate::config::Config;
use crate::dialogue::DialogueInput;
use crate::events::AssistantEvent;
use crate::output::{OutputCoordinator, OutputSignal, OutputSink, SpeechSynthesizer, UtteranceId};

use super::SpeechCommand;

pub struct SpeechService {
    capture: CaptureController,
    output: OutputCoordinator,
    capture_rx: mpsc::UnboundedReceiver<(SessionId, CaptureSignal)>,
    output_rx: mpsc::UnboundedReceiver<(UtteranceId, OutputSignal)>,
    transcripts: mpsc::UnboundedSender<DialogueInput>,
}

impl SpeechService {
    /// Bind the first recognition handle and the output engine
    pub fn new(
        config: &Config,
        mut factory: Box<dyn SessionFactory>,
        mut synthesizer: Box<dyn SpeechSynthesizer>,
        transcripts: mpsc::UnboundedSender<DialogueInput>,
        event_tx: broadcast::Sender<AssistantEvent>,
    ) -> Result<Self, EngineError> {
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let mut capture = CaptureController::new(config.capture.clone(), capture_tx, event_tx.clone());
        capture.initialize(factory.create()?);
        capture.set_factory(factory);

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        synthesizer.attach(OutputSink::new(output_tx));
        let output = OutputCoordinator::new(config.output.clone(), synthesizer, event_tx);

        Ok(Self {
            capture,
            output,
            capture_rx,
            output_rx,
            transcripts,
        })
    }

    /// Run until the command channel closes
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<SpeechCommand>) {
        let SpeechService {
            mut capture,
            mut output,
            mut capture_rx,
            mut output_rx,
            transcripts,
        } = self;

        info!("speech service started");
        capture.start("boot", Instant::now());

        loop {
            let deadline = [capture.next_deadline(), output.next_deadline()]
                .into_iter()
                .flatten()
                .min();

            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    apply(&mut capture, &mut output, command, Instant::now());
                }

                Some((session, signal)) = capture_rx.recv() => {
                    let now = Instant::now();
                    let Some(heard) = capture.handle_signal(session, signal, now) else { continue };

                    if output.is_speaking() {
                        debug!("user speech during output, barging in");
                        output.interrupt(true, now);
                    }

                    if heard.is_final {
                        debug!(text = %heard.text, "final transcript");
                        if transcripts.send(DialogueInput::Transcript(heard.text)).is_err() {
                            debug!("dialogue inbox closed, transcript dropped");
                        }
                    }
                }

                Some((utterance, signal)) = output_rx.recv() => {
                    output.handle_signal(utterance, signal, Instant::now());
                }

                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    output.on_tick(&mut capture, now);
                    capture.on_tick(now);
                }
            }
        }

        output.interrupt(false, Instant::now());
        capture.stop();
        info!("speech service stopped");
    }
}

fn apply(capture: &mut CaptureController, output: &mut OutputCoordinator, command: SpeechCommand, now: Instant) {
    match command {
        SpeechCommand::Speak { text, options } => {
            output.speak(&text, options, capture, now);
        }
        SpeechCommand::Interrupt { resume_capture } => {
            output.interrupt(resume_capture, now);
        }
        SpeechCommand::WarmUp => output.warm_up(),
        SpeechCommand::Pause(reason) => {
            capture.pause(reason, now);
        }
        SpeechCommand::Resume(reason) => {
            capture.resume(reason, now);
        }
        SpeechCommand::StartCapture => {
            capture.start("command", now);
        }
        SpeechCommand::StopCapture => capture.stop(),
        SpeechCommand::ForceUnlock => {
            capture.force_unlock(now);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
