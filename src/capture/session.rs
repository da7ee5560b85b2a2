//! Recognition engine contract
//!
//! The engine is opaque: it can be started, stopped and aborted, and it
//! reports lifecycle changes and transcripts through the `CaptureSink`
//! bound to it when the controller adopts the handle.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Identifies one bound recognition handle. Signals carrying an older id
/// come from a detached handle and are discarded.
pub type SessionId = u64;

/// Error conditions reported by a recognition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    /// Session was aborted, by us or by the engine
    Aborted,
    /// Silence timeout; not a fault
    NoSpeech,
    /// Transient network failure of a remote recognizer
    Network,
    /// Audio device could not be opened
    AudioCapture,
    /// Microphone permission denied
    NotAllowed,
    /// Recognition service refused the request
    ServiceNotAllowed,
    /// Engine reports it is already started
    InvalidState,
    /// Anything the engine could not classify
    Other,
}

impl EngineErrorKind {
    /// Parse the error tag an engine reports
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "aborted" => Self::Aborted,
            "no-speech" => Self::NoSpeech,
            "network" => Self::Network,
            "audio-capture" => Self::AudioCapture,
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "invalid-state" | "invalidstateerror" => Self::InvalidState,
            _ => Self::Other,
        }
    }

    /// Permission problems; retrying will not help
    pub fn is_permission(self) -> bool {
        matches!(self, Self::NotAllowed | Self::ServiceNotAllowed)
    }

    /// Whether this error counts toward backoff and re-initialization
    pub fn counts_as_failure(self) -> bool {
        !matches!(self, Self::NoSpeech | Self::InvalidState)
    }
}

impl std::fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Aborted => "aborted",
            Self::NoSpeech => "no-speech",
            Self::Network => "network",
            Self::AudioCapture => "audio-capture",
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::InvalidState => "invalid-state",
            Self::Other => "other",
        };
        write!(f, "{}", tag)
    }
}

/// Synchronous failure returned by an engine call
#[derive(Debug, Clone, thiserror::Error)]
#[error("recognition engine error ({kind}): {message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Lifecycle and result callbacks of a recognition session
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureSignal {
    Started,
    Ended,
    Error(EngineErrorKind),
    Result { text: String, is_final: bool },
}

/// Engine-side end of the signal channel, stamped with the session it belongs to
#[derive(Debug, Clone)]
pub struct CaptureSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<(SessionId, CaptureSignal)>,
}

impl CaptureSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<(SessionId, CaptureSignal)>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Deliver a signal; returns false once the controller is gone
    pub fn emit(&self, signal: CaptureSignal) -> bool {
        self.tx.send((self.session, signal)).is_ok()
    }
}

/// A continuous speech-recognition handle
pub trait RecognitionSession: Send {
    /// Bind lifecycle callbacks
    fn attach(&mut self, sink: CaptureSink);

    /// Drop the bound callbacks; nothing may be emitted afterwards
    fn detach(&mut self);

    /// Begin listening. `Started` is signalled once audio flows.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Graceful stop, pending results may still be delivered
    fn stop(&mut self);

    /// Hard stop, pending results are dropped
    fn abort(&mut self);
}

/// Builds a fresh recognition handle when the current one is beyond repair
pub trait SessionFactory: Send {
    fn create(&mut self) -> Result<Box<dyn RecognitionSession>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_tags() {
        assert_eq!(EngineErrorKind::from_tag("aborted"), EngineErrorKind::Aborted);
        assert_eq!(EngineErrorKind::from_tag("not-allowed"), EngineErrorKind::NotAllowed);
        assert_eq!(
            EngineErrorKind::from_tag("service_not_allowed"),
            EngineErrorKind::ServiceNotAllowed
        );
        assert_eq!(
            EngineErrorKind::from_tag("InvalidStateError"),
            EngineErrorKind::InvalidState
        );
        assert_eq!(EngineErrorKind::from_tag("bogus"), EngineErrorKind::Other);
    }

    #[test]
    fn test_failure_classification() {
        assert!(EngineErrorKind::NotAllowed.is_permission());
        assert!(!EngineErrorKind::Network.is_permission());
        assert!(EngineErrorKind::Aborted.counts_as_failure());
        assert!(!EngineErrorKind::NoSpeech.counts_as_failure());
    }

    #[test]
    fn test_sink_stamps_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = CaptureSink::new(7, tx);
        assert!(sink.emit(CaptureSignal::Started));
        assert_eq!(rx.try_recv().unwrap(), (7, CaptureSignal::Started));
    }
}
