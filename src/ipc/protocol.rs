//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::capture::{MicState, PauseReason};
use crate::dialogue::{AssistantState, AuthMode, AuthStep, ComposeStep};
use crate::events::AssistantEvent;
use crate::intent::Platform;

/// Requests from an operator client to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Receive every assistant event from now on
    Subscribe,

    /// Clear every capture pause and restart recognition
    ForceUnlock,

    StartCapture,

    /// Halt capture until started again
    StopCapture,

    /// Return the dialogue to its initial state
    ResetDialogue,

    /// Feed text to the dialogue as if it had been heard
    InjectTranscript { text: String },

    /// The surface now shows `platform`, or no platform view at all
    ViewChanged {
        #[serde(default)]
        platform: Option<Platform>,
    },

    PauseCapture { reason: PauseReason },

    ResumeCapture { reason: PauseReason },
}

/// Responses from daemon to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Command handed to the component that owns it
    Accepted,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification for subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: AssistantEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub mic_state: MicState,

    /// Pause reasons currently held on capture
    pub pause_reasons: BTreeSet<PauseReason>,

    pub speaking: bool,

    /// Failure count reported with the most recent scheduled restart
    pub consecutive_errors: u32,

    pub assistant_state: AssistantState,

    pub auth_mode: Option<AuthMode>,

    pub auth_step: AuthStep,

    pub compose_step: ComposeStep,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: 0,
            mic_state: MicState::Idle,
            pause_reasons: BTreeSet::new(),
            speaking: false,
            consecutive_errors: 0,
            assistant_state: AssistantState::default(),
            auth_mode: None,
            auth_step: AuthStep::default(),
            compose_step: ComposeStep::default(),
        }
    }
}

impl DaemonStatus {
    /// Fold one event into the snapshot
    pub fn apply_event(&mut self, event: &AssistantEvent) {
        match event {
            AssistantEvent::MicStateChanged { to, .. } => self.mic_state = *to,
            AssistantEvent::CapturePaused { reason } => {
                self.pause_reasons.insert(*reason);
            }
            AssistantEvent::CaptureResumed { reason } => {
                self.pause_reasons.remove(reason);
            }
            AssistantEvent::RestartScheduled {
                consecutive_errors, ..
            } => self.consecutive_errors = *consecutive_errors,
            AssistantEvent::WatchdogFired { cleared } => {
                for reason in cleared {
                    self.pause_reasons.remove(reason);
                }
            }
            AssistantEvent::SpeechStarted { .. } => self.speaking = true,
            AssistantEvent::SpeechFinished { .. } | AssistantEvent::SpeechInterrupted { .. } => {
                self.speaking = false
            }
            AssistantEvent::AssistantStateChanged { to, .. } => self.assistant_state = *to,
            AssistantEvent::ComposeStepChanged { to, .. } => self.compose_step = *to,
            AssistantEvent::AuthStepChanged { mode, step } => {
                self.auth_mode = *mode;
                self.auth_step = *step;
            }
            AssistantEvent::CaptureError { .. }
            | AssistantEvent::SessionReinitialized { .. }
            | AssistantEvent::SpeechDropped
            | AssistantEvent::TranscriptAppended { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialization() {
        let req: Request =
            serde_json::from_str(r#"{"type":"pause_capture","reason":"pin_entry"}"#).unwrap();
        assert_eq!(
            req,
            Request::PauseCapture {
                reason: PauseReason::PinEntry
            }
        );

        let req: Request =
            serde_json::from_str(r#"{"type":"inject_transcript","text":"open inbox"}"#).unwrap();
        assert_eq!(req, Request::InjectTranscript { text: "open inbox".into() });

        let req: Request =
            serde_json::from_str(r#"{"type":"view_changed","platform":"telegram"}"#).unwrap();
        assert_eq!(
            req,
            Request::ViewChanged {
                platform: Some(Platform::Telegram)
            }
        );

        let req: Request = serde_json::from_str(r#"{"type":"view_changed"}"#).unwrap();
        assert_eq!(req, Request::ViewChanged { platform: None });
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::default());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""mic_state":"idle""#));
    }

    #[test]
    fn test_notification_keeps_event_tag() {
        let note = Notification::Event {
            event: AssistantEvent::SpeechDropped,
        };
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(json, r#"{"type":"event","event":{"type":"speech_dropped"}}"#);
    }

    #[test]
    fn test_status_follows_events() {
        let mut status = DaemonStatus::default();
        let events = [
            AssistantEvent::MicStateChanged {
                from: MicState::Idle,
                to: MicState::Listening,
            },
            AssistantEvent::CapturePaused {
                reason: PauseReason::SpeakingOutput,
            },
            AssistantEvent::CapturePaused {
                reason: PauseReason::BiometricCapture,
            },
            AssistantEvent::SpeechStarted { utterance: 1 },
            AssistantEvent::CaptureResumed {
                reason: PauseReason::SpeakingOutput,
            },
            AssistantEvent::AuthStepChanged {
                mode: Some(AuthMode::Register),
                step: AuthStep::Face,
            },
            AssistantEvent::AssistantStateChanged {
                from: AssistantState::AuthRegister,
                to: AssistantState::WaitingForLiveness,
            },
        ];
        for event in &events {
            status.apply_event(event);
        }

        assert_eq!(status.mic_state, MicState::Listening);
        assert_eq!(
            status.pause_reasons.iter().copied().collect::<Vec<_>>(),
            vec![PauseReason::BiometricCapture]
        );
        assert!(status.speaking);
        assert_eq!(status.auth_mode, Some(AuthMode::Register));
        assert_eq!(status.assistant_state, AssistantState::WaitingForLiveness);

        status.apply_event(&AssistantEvent::WatchdogFired {
            cleared: vec![PauseReason::BiometricCapture],
        });
        assert!(status.pause_reasons.is_empty());
    }
}
