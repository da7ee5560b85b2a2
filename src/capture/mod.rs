//! Speech capture module
//!
//! Supervises the single continuous recognition session:
//! - Idle: nothing running, waiting for `start`
//! - Listening: engine is producing transcripts
//! - Paused: one or more pause reasons are held

mod controller;
mod session;

pub use controller::{CaptureController, MicState, PauseReason};
pub use session::{
    CaptureSignal, CaptureSink, EngineError, EngineErrorKind, RecognitionSession, SessionFactory,
    SessionId,
};

#[cfg(test)]
pub(crate) use controller::tests as testing;
