//! Terminal stand-ins for the speech engines
//!
//! Lets the daemon run end to end without a microphone or a voice: typed
//! lines are recognized speech and spoken replies are printed.

mod recognizer;
mod synthesizer;

pub use recognizer::ConsoleFeed;
pub use synthesizer::ConsoleSynthesizer;
