//! Events module for assistant transitions
//!
//! Every capture, output and dialogue transition is published as one
//! variant of a closed union on a broadcast channel. Observers (the IPC
//! status snapshot, subscribed clients) only ever read these.

use serde::{Deserialize, Serialize};

use crate::capture::{EngineErrorKind, MicState, PauseReason, SessionId};
use crate::dialogue::{AssistantState, AuthMode, AuthStep, ComposeStep, Role};
use crate::output::UtteranceId;

/// Events emitted by the speech service and the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    /// Capture moved between Idle, Listening and Paused
    MicStateChanged { from: MicState, to: MicState },

    CapturePaused { reason: PauseReason },

    CaptureResumed { reason: PauseReason },

    /// Auto-restart armed after an end or error
    RestartScheduled {
        delay_ms: u64,
        consecutive_errors: u32,
    },

    CaptureError { kind: EngineErrorKind },

    /// Recognition handle was rebuilt after repeated failures
    SessionReinitialized { session: SessionId },

    /// Capture was stuck paused and got force-cleared
    WatchdogFired { cleared: Vec<PauseReason> },

    SpeechStarted { utterance: UtteranceId },

    SpeechFinished { utterance: UtteranceId },

    /// A speak request arrived while busy and was discarded
    SpeechDropped,

    SpeechInterrupted { utterance: UtteranceId },

    AssistantStateChanged {
        from: AssistantState,
        to: AssistantState,
    },

    ComposeStepChanged { from: ComposeStep, to: ComposeStep },

    AuthStepChanged {
        mode: Option<AuthMode>,
        step: AuthStep,
    },

    TranscriptAppended { role: Role, text: String },
}

impl std::fmt::Display for AssistantEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssistantEvent::MicStateChanged { from, to } => {
                write!(f, "MIC_STATE_CHANGED ({} -> {})", from, to)
            }
            AssistantEvent::CapturePaused { reason } => write!(f, "CAPTURE_PAUSED ({:?})", reason),
            AssistantEvent::CaptureResumed { reason } => write!(f, "CAPTURE_RESUMED ({:?})", reason),
            AssistantEvent::RestartScheduled {
                delay_ms,
                consecutive_errors,
            } => write!(f, "RESTART_SCHEDULED ({}ms, errors={})", delay_ms, consecutive_errors),
            AssistantEvent::CaptureError { kind } => write!(f, "CAPTURE_ERROR ({})", kind),
            AssistantEvent::SessionReinitialized { session } => {
                write!(f, "SESSION_REINITIALIZED (#{})", session)
            }
            AssistantEvent::WatchdogFired { cleared } => {
                write!(f, "WATCHDOG_FIRED ({} cleared)", cleared.len())
            }
            AssistantEvent::SpeechStarted { utterance } => write!(f, "SPEECH_STARTED (#{})", utterance),
            AssistantEvent::SpeechFinished { utterance } => write!(f, "SPEECH_FINISHED (#{})", utterance),
            AssistantEvent::SpeechDropped => write!(f, "SPEECH_DROPPED"),
            AssistantEvent::SpeechInterrupted { utterance } => {
                write!(f, "SPEECH_INTERRUPTED (#{})", utterance)
            }
            AssistantEvent::AssistantStateChanged { from, to } => {
                write!(f, "ASSISTANT_STATE_CHANGED ({} -> {})", from, to)
            }
            AssistantEvent::ComposeStepChanged { from, to } => {
                write!(f, "COMPOSE_STEP_CHANGED ({:?} -> {:?})", from, to)
            }
            AssistantEvent::AuthStepChanged { mode, step } => {
                write!(f, "AUTH_STEP_CHANGED ({:?}/{:?})", mode, step)
            }
            AssistantEvent::TranscriptAppended { role, .. } => {
                write!(f, "TRANSCRIPT_APPENDED ({:?})", role)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = AssistantEvent::RestartScheduled {
            delay_ms: 5400,
            consecutive_errors: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"restart_scheduled""#));
        assert!(json.contains("5400"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"capture_paused","reason":"speaking_output"}"#;
        let event: AssistantEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            AssistantEvent::CapturePaused {
                reason: PauseReason::SpeakingOutput
            }
        );
    }

    #[test]
    fn test_dialogue_event_shape() {
        let event = AssistantEvent::AssistantStateChanged {
            from: AssistantState::Dormant,
            to: AssistantState::Awake,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["from"], "dormant");
        assert_eq!(json["to"], "awake");
        assert_eq!(event.to_string(), "ASSISTANT_STATE_CHANGED (Dormant -> Awake)");
    }
}
