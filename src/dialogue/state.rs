//! Dialogue state owned by the orchestrator

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intent::Platform;

/// Top-level assistant state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    /// Only a wake phrase is accepted
    Dormant,
    /// Just woken
    Awake,
    #[default]
    Listening,
    AuthLogin,
    AuthRegister,
    Authenticated,
    /// Login face match in progress
    WaitingForFace,
    /// Registration liveness capture in progress
    WaitingForLiveness,
    WaitingForPin,
}

impl std::fmt::Display for AssistantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssistantState::Dormant => write!(f, "Dormant"),
            AssistantState::Awake => write!(f, "Awake"),
            AssistantState::Listening => write!(f, "Listening"),
            AssistantState::AuthLogin => write!(f, "AuthLogin"),
            AssistantState::AuthRegister => write!(f, "AuthRegister"),
            AssistantState::Authenticated => write!(f, "Authenticated"),
            AssistantState::WaitingForFace => write!(f, "WaitingForFace"),
            AssistantState::WaitingForLiveness => write!(f, "WaitingForLiveness"),
            AssistantState::WaitingForPin => write!(f, "WaitingForPin"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Login,
    Register,
}

impl AuthMode {
    /// The steps of this flow, in order
    pub fn steps(self) -> &'static [AuthStep] {
        match self {
            AuthMode::Login => &[AuthStep::Email, AuthStep::Password, AuthStep::Face, AuthStep::Pin],
            AuthMode::Register => &[
                AuthStep::Email,
                AuthStep::Password,
                AuthStep::Face,
                AuthStep::Pin,
                AuthStep::ConfirmPin,
            ],
        }
    }

    /// Step after `step`; `Complete` once the flow is exhausted
    pub fn next_step(self, step: AuthStep) -> AuthStep {
        let steps = self.steps();
        match steps.iter().position(|s| *s == step) {
            Some(i) if i + 1 < steps.len() => steps[i + 1],
            Some(_) => AuthStep::Complete,
            None => steps[0],
        }
    }

    /// State shown while the flow collects typed-in answers
    pub fn state(self) -> AssistantState {
        match self {
            AuthMode::Login => AssistantState::AuthLogin,
            AuthMode::Register => AssistantState::AuthRegister,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStep {
    #[default]
    Idle,
    Email,
    Password,
    Face,
    Pin,
    ConfirmPin,
    Complete,
}

/// How a transcript is interpreted when no auth flow is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceRoutingMode {
    #[default]
    Global,
    /// A platform surface is open; commands still go through the classifier
    PlatformCommand,
    /// Raw text goes to the compose step handler
    ComposeFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComposeStep {
    #[default]
    Idle,
    To,
    ConfirmTo,
    Prompt,
    ConfirmDraft,
    ConfirmSend,
    Editing,
    Appending,
}

/// Message being composed across turns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeState {
    pub step: ComposeStep,
    pub platform: Option<Platform>,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub destination_chat_id: Option<String>,
    pub masked_field_types: Vec<String>,
}

impl ComposeState {
    /// Drop the generated content, keeping destination and recipient
    pub fn clear_draft(&mut self) {
        self.subject = None;
        self.body = None;
        self.masked_field_types.clear();
    }

    pub fn has_draft(&self) -> bool {
        self.subject.is_some() || self.body.is_some() || !self.masked_field_types.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only conversation log, oldest entries dropped past `limit`
#[derive(Debug, Clone)]
pub struct TranscriptLog {
    entries: VecDeque<TranscriptEntry>,
    limit: usize,
}

impl TranscriptLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, role: Role, text: &str) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(TranscriptEntry {
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A captured credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Progress through a login or registration flow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub mode: Option<AuthMode>,
    pub step: AuthStep,
    pub email: Option<String>,
    pub password: Option<Secret>,
    pub pin: Option<Secret>,
    pub face_token: Option<String>,
    pub pin_attempts: u32,
    pub face_attempts: u32,
}

impl AuthState {
    pub fn begin(mode: AuthMode) -> Self {
        Self {
            mode: Some(mode),
            step: mode.next_step(AuthStep::Idle),
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.mode.is_some()
    }
}

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub email: String,
    pub signed_in_at: DateTime<Utc>,
}

/// Everything the orchestrator tracks for one user session
#[derive(Debug, Clone)]
pub struct DialogueState {
    pub assistant_state: AssistantState,
    pub auth: AuthState,
    pub routing: VoiceRoutingMode,
    pub compose: ComposeState,
    /// Platform the user is looking at, as reported by the surface
    pub active_platform: Option<Platform>,
    /// Last platform a command succeeded against
    pub last_used_platform: Option<Platform>,
    pub open_conversation: Option<String>,
    pub summary: Option<String>,
    pub user: Option<UserSession>,
    pub transcript: TranscriptLog,
}

impl DialogueState {
    pub fn new(initial: AssistantState, transcript_limit: usize) -> Self {
        Self {
            assistant_state: initial,
            auth: AuthState::default(),
            routing: VoiceRoutingMode::Global,
            compose: ComposeState::default(),
            active_platform: None,
            last_used_platform: None,
            open_conversation: None,
            summary: None,
            user: None,
            transcript: TranscriptLog::new(transcript_limit),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Platform for an ambiguous platform command
    pub fn contextual_platform(&self) -> Option<Platform> {
        self.active_platform.or(self.last_used_platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_steps_are_ordered() {
        let mut step = AuthStep::Idle;
        let mut seen = Vec::new();
        while step != AuthStep::Complete {
            step = AuthMode::Register.next_step(step);
            seen.push(step);
        }
        assert_eq!(
            seen,
            vec![
                AuthStep::Email,
                AuthStep::Password,
                AuthStep::Face,
                AuthStep::Pin,
                AuthStep::ConfirmPin,
                AuthStep::Complete,
            ]
        );
        assert_eq!(AuthMode::Login.next_step(AuthStep::Pin), AuthStep::Complete);
    }

    #[test]
    fn test_transcript_log_is_capped() {
        let mut log = TranscriptLog::new(2);
        log.push(Role::User, "one");
        log.push(Role::Assistant, "two");
        log.push(Role::User, "three");

        let texts: Vec<_> = log.entries().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_secret_is_redacted() {
        let auth = AuthState {
            password: Some(Secret::new("hunter22")),
            ..AuthState::default()
        };
        assert!(!format!("{:?}", auth).contains("hunter22"));
    }

    #[test]
    fn test_clear_draft_keeps_recipient() {
        let mut compose = ComposeState {
            step: ComposeStep::ConfirmDraft,
            recipient: Some("bob".into()),
            body: Some("hi".into()),
            masked_field_types: vec!["email".into()],
            ..ComposeState::default()
        };
        compose.clear_draft();
        assert!(!compose.has_draft());
        assert_eq!(compose.recipient.as_deref(), Some("bob"));
    }
}
