//! External collaborators
//!
//! Platform executors, drafting, privacy masking and account services are
//! black boxes to the dialogue. Each is an async request/response contract;
//! `offline` provides in-process implementations for running without any
//! network service.

mod offline;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::intent::{Platform, ResolvedIntent};

pub use offline::{
    InMemoryAccounts, OfflineExecutor, PatternSanitizer, StaticBiometrics, TemplateDrafter,
};

/// Failure talking to a collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{service} timed out after {timeout_ms}ms")]
    Timeout { service: &'static str, timeout_ms: u64 },

    #[error("{service} unavailable: {message}")]
    Unavailable { service: &'static str, message: String },

    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Structured follow-up an executor asks the dialogue to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResultData {
    OpenCompose {
        #[serde(default)]
        recipient: Option<String>,
    },
    OpenComposeWithPrefill {
        #[serde(default)]
        recipient: Option<String>,
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        chat_id: Option<String>,
    },
    NavigateToConversation {
        chat_id: String,
        #[serde(default)]
        title: Option<String>,
    },
    NavigateToList {
        folder: String,
    },
    CloseConversation,
    SummaryReady {
        summary: String,
    },
}

/// Executor response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<ResultData>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: ResultData) -> Self {
        self.data = Some(data);
        self
    }
}

/// Runs platform-directed intents against one destination
#[async_trait]
pub trait PlatformExecutor: Send + Sync {
    fn platform(&self) -> Platform;

    async fn execute(&self, intent: &ResolvedIntent) -> Result<ExecutionResult, CollaboratorError>;
}

/// A generated message draft
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub subject: Option<String>,
    pub body: String,
    pub masked_field_types: Vec<String>,
}

/// Writes a message from a free-form description
#[async_trait]
pub trait Drafter: Send + Sync {
    async fn generate_draft(
        &self,
        free_text: &str,
        prior_subject: Option<&str>,
    ) -> Result<Draft, CollaboratorError>;
}

/// A detected piece of personal data, as byte offsets into the text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiSpan {
    pub start: usize,
    pub end: usize,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Masked {
    pub masked_text: String,
    pub masked_field_types: Vec<String>,
}

/// Detects and masks personal data before text leaves the device
pub trait PrivacySanitizer: Send + Sync {
    fn detect(&self, text: &str) -> Vec<PiiSpan>;

    fn mask(&self, text: &str, spans: &[PiiSpan]) -> Masked;
}

/// Tagged status returned by authentication services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum AuthOutcome {
    Ok,
    InvalidCredentials,
    UnknownAccount,
    AccountExists,
    NoFaceDetected,
    LivenessFailed,
    FaceMismatch,
    PinMismatch,
    Fail(String),
}

/// Everything the registration pipeline needs, submitted at once
#[derive(Clone)]
pub struct RegistrationRequest {
    pub email: String,
    pub password: String,
    pub pin: String,
    pub face_token: Option<String>,
}

impl std::fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("email", &self.email)
            .field("face_token", &self.face_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Account creation, credential and PIN verification
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Create the account, profile, biometric enrollment and PIN hash as one unit
    async fn register(&self, request: RegistrationRequest) -> Result<AuthOutcome, CollaboratorError>;

    async fn verify_credentials(&self, email: &str, password: &str) -> Result<AuthOutcome, CollaboratorError>;

    async fn verify_pin(&self, email: &str, pin: &str) -> Result<AuthOutcome, CollaboratorError>;

    async fn end_session(&self, email: &str) -> Result<(), CollaboratorError>;
}

/// Result of a liveness capture
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessReport {
    pub outcome: AuthOutcome,
    /// Enrollment token for the captured face
    pub face_token: Option<String>,
}

/// Face liveness and matching
#[async_trait]
pub trait BiometricVerifier: Send + Sync {
    async fn check_liveness(&self) -> Result<LivenessReport, CollaboratorError>;

    async fn verify_face(&self, email: &str) -> Result<AuthOutcome, CollaboratorError>;
}

/// The full set of collaborators handed to the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    executors: BTreeMap<Platform, Arc<dyn PlatformExecutor>>,
    pub drafter: Arc<dyn Drafter>,
    pub sanitizer: Arc<dyn PrivacySanitizer>,
    pub accounts: Arc<dyn AccountService>,
    pub biometrics: Arc<dyn BiometricVerifier>,
}

impl Collaborators {
    pub fn new(
        drafter: Arc<dyn Drafter>,
        sanitizer: Arc<dyn PrivacySanitizer>,
        accounts: Arc<dyn AccountService>,
        biometrics: Arc<dyn BiometricVerifier>,
    ) -> Self {
        Self {
            executors: BTreeMap::new(),
            drafter,
            sanitizer,
            accounts,
            biometrics,
        }
    }

    /// In-process stand-ins for every service
    pub fn offline() -> Self {
        Self::new(
            Arc::new(TemplateDrafter),
            Arc::new(PatternSanitizer),
            Arc::new(InMemoryAccounts::default()),
            Arc::new(StaticBiometrics::live()),
        )
        .with_executor(Arc::new(OfflineExecutor::new(Platform::Mail)))
        .with_executor(Arc::new(OfflineExecutor::new(Platform::Telegram)))
    }

    pub fn with_executor(mut self, executor: Arc<dyn PlatformExecutor>) -> Self {
        self.executors.insert(executor.platform(), executor);
        self
    }

    pub fn executor(&self, platform: Platform) -> Option<Arc<dyn PlatformExecutor>> {
        self.executors.get(&platform).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_data_uses_kebab_tags() {
        let data = ResultData::OpenComposeWithPrefill {
            recipient: Some("bob".into()),
            subject: None,
            body: None,
            chat_id: Some("42".into()),
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains(r#""type":"open-compose-with-prefill""#));

        let parsed: ResultData = serde_json::from_str(r#"{"type":"summary-ready","summary":"quiet day"}"#).unwrap();
        assert_eq!(parsed, ResultData::SummaryReady { summary: "quiet day".into() });
    }

    #[test]
    fn test_execution_result_without_data() {
        let parsed: ExecutionResult =
            serde_json::from_str(r#"{"success":false,"message":"rate limited"}"#).unwrap();
        assert!(!parsed.success);
        assert_eq!(parsed.data, None);
    }

    #[test]
    fn test_registration_request_hides_secrets() {
        let request = RegistrationRequest {
            email: "a@b.co".into(),
            password: "hunter22".into(),
            pin: "1234".into(),
            face_token: None,
        };
        let debug = format!("{:?}", request);
        assert!(!debug.contains("hunter22"));
        assert!(!debug.contains("1234"));
    }
}
