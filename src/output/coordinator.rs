//! Serialized speech output
//!
//! At most one utterance is ever in flight; there is no queue. While speech
//! is playing, and for a short grace period afterwards, capture is held
//! paused with `PauseReason::SpeakingOutput` so the assistant never
//! transcribes its own voice.

use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::capture::{CaptureController, PauseReason};
use crate::config::OutputTimings;
use crate::events::AssistantEvent;

use super::synthesizer::{OutputSignal, SpeechSynthesizer, Utterance, UtteranceId};

/// Per-call speech options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeakOptions {
    /// Cancel the utterance in flight instead of dropping this one
    pub force_interrupt_previous: bool,
    pub volume: Option<f32>,
    pub rate: Option<f32>,
}

impl SpeakOptions {
    pub fn interrupting() -> Self {
        Self {
            force_interrupt_previous: true,
            ..Self::default()
        }
    }
}

/// What happened to a speak request
#[derive(Debug, Clone, PartialEq)]
pub enum SpeakOutcome {
    Started(UtteranceId),
    /// Something else is being spoken, or the text was empty
    Dropped,
    /// The engine refused the utterance
    Failed,
}

pub struct OutputCoordinator {
    timings: OutputTimings,
    synthesizer: Box<dyn SpeechSynthesizer>,
    next_id: UtteranceId,
    /// Utterance currently being spoken
    current: Option<UtteranceId>,
    /// Silent priming utterance, not tied to capture
    warm_up: Option<UtteranceId>,
    holds_pause: bool,
    release_at: Option<Instant>,
    safety_at: Option<Instant>,
    event_tx: broadcast::Sender<AssistantEvent>,
}

impl OutputCoordinator {
    pub fn new(
        timings: OutputTimings,
        synthesizer: Box<dyn SpeechSynthesizer>,
        event_tx: broadcast::Sender<AssistantEvent>,
    ) -> Self {
        Self {
            timings,
            synthesizer,
            next_id: 0,
            current: None,
            warm_up: None,
            holds_pause: false,
            release_at: None,
            safety_at: None,
            event_tx,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    /// Whether `SpeakingOutput` is currently held on capture
    pub fn holds_pause(&self) -> bool {
        self.holds_pause
    }

    pub fn speak(
        &mut self,
        text: &str,
        options: SpeakOptions,
        capture: &mut CaptureController,
        now: Instant,
    ) -> SpeakOutcome {
        let text = text.trim();
        if text.is_empty() {
            debug!("ignoring empty utterance");
            return SpeakOutcome::Dropped;
        }

        if let Some(active) = self.current {
            if !options.force_interrupt_previous {
                debug!(active, dropped = text, "already speaking, dropping utterance");
                let _ = self.event_tx.send(AssistantEvent::SpeechDropped);
                return SpeakOutcome::Dropped;
            }

            // The pause stays held: the new utterance claims it
            self.synthesizer.cancel();
            self.current = None;
            self.safety_at = None;
            info!(utterance = active, "speech interrupted by newer utterance");
            let _ = self.event_tx.send(AssistantEvent::SpeechInterrupted { utterance: active });
        }

        // The capture watchdog may have cleared the reason behind our back
        self.release_at = None;
        capture.pause(PauseReason::SpeakingOutput, now);
        self.holds_pause = true;

        self.next_id += 1;
        let id = self.next_id;
        let utterance = Utterance {
            id,
            text: text.to_string(),
            volume: options.volume.unwrap_or(1.0),
            rate: options.rate.unwrap_or(1.0),
        };

        if let Err(e) = self.synthesizer.speak(utterance) {
            warn!(error = %e, "speech engine refused utterance");
            self.release_now(capture, now);
            return SpeakOutcome::Failed;
        }

        self.current = Some(id);
        self.safety_at = Some(now + self.timings.safety_timeout());
        debug!(utterance = id, text, "speaking");
        let _ = self.event_tx.send(AssistantEvent::SpeechStarted { utterance: id });

        SpeakOutcome::Started(id)
    }

    /// Hard-cancel speech in flight. Returns false if nothing was playing.
    /// With `resume_capture`, `SpeakingOutput` is released after a short
    /// settle delay; otherwise it stays held for whoever speaks next.
    pub fn interrupt(&mut self, resume_capture: bool, now: Instant) -> bool {
        let interrupted = self.current.take();
        if let Some(utterance) = interrupted {
            self.synthesizer.cancel();
            self.safety_at = None;
            info!(utterance, resume_capture, "speech interrupted");
            let _ = self.event_tx.send(AssistantEvent::SpeechInterrupted { utterance });
        }

        if resume_capture && self.holds_pause {
            self.release_at = Some(now + self.timings.settle());
        } else if !resume_capture {
            self.release_at = None;
        }

        interrupted.is_some()
    }

    /// Prime engines that only accept background speech after a first call
    pub fn warm_up(&mut self) {
        if self.current.is_some() || self.warm_up.is_some() {
            return;
        }

        self.next_id += 1;
        let id = self.next_id;
        let utterance = Utterance {
            id,
            text: " ".to_string(),
            volume: 0.0,
            rate: 1.0,
        };

        match self.synthesizer.speak(utterance) {
            Ok(()) => {
                debug!(utterance = id, "speech engine warm-up issued");
                self.warm_up = Some(id);
            }
            Err(e) => warn!(error = %e, "speech engine warm-up failed"),
        }
    }

    pub fn handle_signal(
        &mut self,
        utterance: UtteranceId,
        signal: OutputSignal,
        now: Instant,
    ) {
        if self.warm_up == Some(utterance) {
            if signal != OutputSignal::Started {
                self.warm_up = None;
            }
            return;
        }

        if self.current != Some(utterance) {
            debug!(utterance, ?signal, "ignoring signal for stale utterance");
            return;
        }

        match signal {
            OutputSignal::Started => {
                debug!(utterance, "speech engine started");
            }
            OutputSignal::Finished => {
                self.finish(utterance, now);
            }
            OutputSignal::Failed(message) => {
                warn!(utterance, %message, "speech engine failed");
                self.finish(utterance, now);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [self.release_at, self.safety_at].into_iter().flatten().min()
    }

    pub fn on_tick(&mut self, capture: &mut CaptureController, now: Instant) {
        if self.safety_at.is_some_and(|at| at <= now) {
            if let Some(utterance) = self.current.take() {
                warn!(utterance, "speech never completed, force-finalizing");
                self.synthesizer.cancel();
                let _ = self.event_tx.send(AssistantEvent::SpeechFinished { utterance });
            }
            self.safety_at = None;
            self.release_now(capture, now);
            return;
        }

        if self.release_at.is_some_and(|at| at <= now) {
            self.release_now(capture, now);
        }
    }

    fn finish(&mut self, utterance: UtteranceId, now: Instant) {
        self.current = None;
        self.safety_at = None;
        self.release_at = Some(now + self.timings.grace());
        debug!(utterance, "speech finished");
        let _ = self.event_tx.send(AssistantEvent::SpeechFinished { utterance });
    }

    fn release_now(&mut self, capture: &mut CaptureController, now: Instant) {
        self.release_at = None;
        if self.holds_pause {
            self.holds_pause = false;
            capture.resume(PauseReason::SpeakingOutput, now);
        }
    }
}
