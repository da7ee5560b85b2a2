//! Speech output engine contract

use tokio::sync::mpsc;

/// Identifies one utterance handed to the engine
pub type UtteranceId = u64;

/// A single piece of speech
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub volume: f32,
    pub rate: f32,
}

/// Callbacks reported by the engine for an utterance
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSignal {
    Started,
    Finished,
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("speech engine unavailable: {0}")]
    Unavailable(String),

    #[error("speech engine rejected utterance: {0}")]
    Rejected(String),
}

/// Engine-side end of the output signal channel
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<(UtteranceId, OutputSignal)>,
}

impl OutputSink {
    pub fn new(tx: mpsc::UnboundedSender<(UtteranceId, OutputSignal)>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, utterance: UtteranceId, signal: OutputSignal) -> bool {
        self.tx.send((utterance, signal)).is_ok()
    }
}

/// Text-to-speech engine
pub trait SpeechSynthesizer: Send {
    fn attach(&mut self, sink: OutputSink);

    /// Begin speaking; completion is reported through the sink
    fn speak(&mut self, utterance: Utterance) -> Result<(), SynthesisError>;

    /// Drop whatever is being spoken
    fn cancel(&mut self);
}
