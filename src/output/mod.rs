//! Speech output module
//!
//! Serializes spoken responses and keeps them mutually exclusive with capture.

mod coordinator;
mod synthesizer;

pub use coordinator::{OutputCoordinator, SpeakOptions};
pub use synthesizer::{
    OutputSignal, OutputSink, SpeechSynthesizer, SynthesisError, Utterance, UtteranceId,
};
