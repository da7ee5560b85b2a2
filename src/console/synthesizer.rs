//! Terminal speech output
//!
//! Prints each utterance and holds it "in the air" for a duration that
//! grows with its word count, so capture stays paused about as long as a
//! real voice would need.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::output::{OutputSignal, OutputSink, SpeechSynthesizer, SynthesisError, Utterance};

const BASE_MS: u64 = 200;
const MS_PER_WORD: u64 = 60;

pub struct ConsoleSynthesizer {
    sink: Option<OutputSink>,
    base: Duration,
    per_word: Duration,
    playing: Option<JoinHandle<()>>,
}

impl ConsoleSynthesizer {
    pub fn new() -> Self {
        Self::with_pacing(Duration::from_millis(BASE_MS), Duration::from_millis(MS_PER_WORD))
    }

    pub fn with_pacing(base: Duration, per_word: Duration) -> Self {
        Self {
            sink: None,
            base,
            per_word,
            playing: None,
        }
    }

    fn duration_of(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as u32;
        self.base + self.per_word * words
    }
}

impl Default for ConsoleSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for ConsoleSynthesizer {
    fn attach(&mut self, sink: OutputSink) {
        self.sink = Some(sink);
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), SynthesisError> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| SynthesisError::Unavailable("no output sink attached".into()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SynthesisError::Unavailable(e.to_string()))?;

        self.cancel();

        let duration = self.duration_of(&utterance.text);
        info!(utterance = utterance.id, ?duration, "speaking");
        println!("assistant> {}", utterance.text);

        let id = utterance.id;
        self.playing = Some(runtime.spawn(async move {
            sink.emit(id, OutputSignal::Started);
            tokio::time::sleep(duration).await;
            sink.emit(id, OutputSignal::Finished);
        }));

        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(playing) = self.playing.take() {
            if !playing.is_finished() {
                debug!("console speech cancelled");
            }
            playing.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn utterance(id: u64, text: &str) -> Utterance {
        Utterance {
            id,
            text: text.into(),
            volume: 1.0,
            rate: 1.0,
        }
    }

    #[test]
    fn test_duration_grows_with_words() {
        let synth = ConsoleSynthesizer::new();
        assert_eq!(synth.duration_of(""), Duration::from_millis(200));
        assert_eq!(synth.duration_of("opening your inbox"), Duration::from_millis(380));
    }

    #[test]
    fn test_speak_without_sink_is_unavailable() {
        let mut synth = ConsoleSynthesizer::new();
        assert!(matches!(
            synth.speak(utterance(1, "hello")),
            Err(SynthesisError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_reports_start_then_finish() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut synth = ConsoleSynthesizer::with_pacing(Duration::from_millis(5), Duration::from_millis(1));
        synth.attach(OutputSink::new(tx));

        synth.speak(utterance(7, "hello there")).unwrap();

        assert_eq!(rx.recv().await, Some((7, OutputSignal::Started)));
        assert_eq!(rx.recv().await, Some((7, OutputSignal::Finished)));
    }

    #[tokio::test]
    async fn test_cancel_suppresses_finish() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut synth = ConsoleSynthesizer::with_pacing(Duration::from_secs(60), Duration::ZERO);
        synth.attach(OutputSink::new(tx));

        synth.speak(utterance(1, "a long answer")).unwrap();
        assert_eq!(rx.recv().await, Some((1, OutputSignal::Started)));
        synth.cancel();
        drop(synth);

        // Sender held by the aborted task is dropped with it
        assert_eq!(rx.recv().await, None);
    }
}
