//! In-process collaborators
//!
//! Enough behavior to run the daemon without any remote service: an account
//! directory in memory, a biometric stub, regex-based masking, a template
//! drafter and an executor that answers with the result vocabulary the
//! dialogue understands.

use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::intent::{Action, Platform, ResolvedIntent};

use super::{
    AccountService, AuthOutcome, BiometricVerifier, CollaboratorError, Draft, Drafter,
    ExecutionResult, LivenessReport, Masked, PiiSpan, PlatformExecutor, PrivacySanitizer,
    RegistrationRequest, ResultData,
};

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Secrets are salted with the account email before hashing
fn salted(email: &str, secret: &str) -> String {
    sha256_hex(&format!("{}:{}", email.to_lowercase(), secret))
}

#[derive(Debug, Clone)]
struct Account {
    password_hash: String,
    pin_hash: String,
}

/// Account directory held in memory for the lifetime of the process
#[derive(Default)]
pub struct InMemoryAccounts {
    accounts: Mutex<HashMap<String, Account>>,
}

impl InMemoryAccounts {
    pub async fn contains(&self, email: &str) -> bool {
        self.accounts.lock().await.contains_key(&email.to_lowercase())
    }
}

#[async_trait]
impl AccountService for InMemoryAccounts {
    async fn register(&self, request: RegistrationRequest) -> Result<AuthOutcome, CollaboratorError> {
        let key = request.email.to_lowercase();
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(&key) {
            return Ok(AuthOutcome::AccountExists);
        }

        accounts.insert(
            key.clone(),
            Account {
                password_hash: salted(&key, &request.password),
                pin_hash: salted(&key, &request.pin),
            },
        );
        info!(email = %key, face_enrolled = request.face_token.is_some(), "account registered");
        Ok(AuthOutcome::Ok)
    }

    async fn verify_credentials(&self, email: &str, password: &str) -> Result<AuthOutcome, CollaboratorError> {
        let key = email.to_lowercase();
        let accounts = self.accounts.lock().await;
        Ok(match accounts.get(&key) {
            None => AuthOutcome::UnknownAccount,
            Some(account) if account.password_hash == salted(&key, password) => AuthOutcome::Ok,
            Some(_) => AuthOutcome::InvalidCredentials,
        })
    }

    async fn verify_pin(&self, email: &str, pin: &str) -> Result<AuthOutcome, CollaboratorError> {
        let key = email.to_lowercase();
        let accounts = self.accounts.lock().await;
        Ok(match accounts.get(&key) {
            None => AuthOutcome::UnknownAccount,
            Some(account) if account.pin_hash == salted(&key, pin) => AuthOutcome::Ok,
            Some(_) => AuthOutcome::PinMismatch,
        })
    }

    async fn end_session(&self, email: &str) -> Result<(), CollaboratorError> {
        debug!(email, "session ended");
        Ok(())
    }
}

/// Biometric stand-in with fixed answers
#[derive(Debug, Clone)]
pub struct StaticBiometrics {
    liveness: AuthOutcome,
    face: AuthOutcome,
}

impl StaticBiometrics {
    /// Every capture is live and every face matches
    pub fn live() -> Self {
        Self {
            liveness: AuthOutcome::Ok,
            face: AuthOutcome::Ok,
        }
    }

    pub fn with_outcomes(liveness: AuthOutcome, face: AuthOutcome) -> Self {
        Self { liveness, face }
    }
}

#[async_trait]
impl BiometricVerifier for StaticBiometrics {
    async fn check_liveness(&self) -> Result<LivenessReport, CollaboratorError> {
        let face_token = (self.liveness == AuthOutcome::Ok).then(|| "offline-face".to_string());
        Ok(LivenessReport {
            outcome: self.liveness.clone(),
            face_token,
        })
    }

    async fn verify_face(&self, _email: &str) -> Result<AuthOutcome, CollaboratorError> {
        Ok(self.face.clone())
    }
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex"));

static CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").expect("valid regex"));

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("valid regex"));

/// Pattern-based detector for emails, card numbers and phone numbers
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternSanitizer;

impl PrivacySanitizer for PatternSanitizer {
    fn detect(&self, text: &str) -> Vec<PiiSpan> {
        let mut spans: Vec<PiiSpan> = Vec::new();
        let patterns: [(&Regex, &str); 3] =
            [(&EMAIL_RE, "email"), (&CARD_RE, "card_number"), (&PHONE_RE, "phone")];

        for (re, kind) in patterns {
            for m in re.find_iter(text) {
                let overlaps = spans.iter().any(|s| m.start() < s.end && s.start < m.end());
                if !overlaps {
                    spans.push(PiiSpan {
                        start: m.start(),
                        end: m.end(),
                        kind: kind.to_string(),
                    });
                }
            }
        }

        spans.sort_by_key(|s| s.start);
        spans
    }

    fn mask(&self, text: &str, spans: &[PiiSpan]) -> Masked {
        let mut masked_text = String::with_capacity(text.len());
        let mut masked_field_types: Vec<String> = Vec::new();
        let mut cursor = 0;

        for span in spans {
            if span.start < cursor || span.end > text.len() {
                continue;
            }
            masked_text.push_str(&text[cursor..span.start]);
            masked_text.push_str(&format!("[{}]", span.kind.to_uppercase()));
            cursor = span.end;
            if !masked_field_types.contains(&span.kind) {
                masked_field_types.push(span.kind.clone());
            }
        }
        masked_text.push_str(&text[cursor..]);

        Masked {
            masked_text,
            masked_field_types,
        }
    }
}

/// Turns the spoken description into a short, polite message
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateDrafter;

#[async_trait]
impl Drafter for TemplateDrafter {
    async fn generate_draft(
        &self,
        free_text: &str,
        prior_subject: Option<&str>,
    ) -> Result<Draft, CollaboratorError> {
        let text = free_text.trim();
        if text.is_empty() {
            return Err(CollaboratorError::Rejected("nothing to draft".into()));
        }

        let subject = prior_subject
            .map(str::to_string)
            .unwrap_or_else(|| text.split_whitespace().take(6).collect::<Vec<_>>().join(" "));

        let mut body = sentence_case(text);
        if !body.ends_with(['.', '!', '?']) {
            body.push('.');
        }

        Ok(Draft {
            subject: Some(sentence_case(&subject)),
            body,
            masked_field_types: Vec::new(),
        })
    }
}

fn sentence_case(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Local executor for one platform
pub struct OfflineExecutor {
    platform: Platform,
    sent: Mutex<Vec<ResolvedIntent>>,
}

impl OfflineExecutor {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Messages delivered so far
    pub async fn sent(&self) -> Vec<ResolvedIntent> {
        self.sent.lock().await.clone()
    }
}

fn chat_slug(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("chat-{}", slug.trim_matches('-'))
}

#[async_trait]
impl PlatformExecutor for OfflineExecutor {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn execute(&self, intent: &ResolvedIntent) -> Result<ExecutionResult, CollaboratorError> {
        let platform = self.platform;
        let entities = &intent.entities;
        debug!(%platform, action = ?intent.action, "offline execute");

        let result = match intent.action {
            Action::Compose | Action::Draft => ExecutionResult::ok(format!("Starting a new {} message.", platform))
                .with_data(ResultData::OpenCompose {
                    recipient: entities.recipient.clone(),
                }),
            Action::Send | Action::Reply => match (&entities.recipient, &entities.body) {
                (Some(recipient), Some(_)) if intent.action == Action::Send => {
                    self.sent.lock().await.push(intent.clone());
                    info!(%platform, recipient, "message delivered");
                    ExecutionResult::ok(format!("Sent to {}.", recipient))
                }
                _ => ExecutionResult::ok("Let's write it.").with_data(ResultData::OpenComposeWithPrefill {
                    recipient: entities.recipient.clone(),
                    subject: entities.subject.clone(),
                    body: entities.body.clone(),
                    chat_id: entities.chat_id.clone(),
                }),
            },
            Action::ViewFolder => {
                let folder = entities.query.clone().unwrap_or_else(|| "inbox".into());
                ExecutionResult::ok(format!("Opening your {}.", folder))
                    .with_data(ResultData::NavigateToList { folder })
            }
            Action::ListChats => ExecutionResult::ok("Here are your chats.").with_data(ResultData::NavigateToList {
                folder: "chats".into(),
            }),
            Action::OpenChat => match &entities.recipient {
                Some(name) => ExecutionResult::ok(format!("Opening your chat with {}.", name)).with_data(
                    ResultData::NavigateToConversation {
                        chat_id: chat_slug(name),
                        title: Some(name.clone()),
                    },
                ),
                None => ExecutionResult::failed("Which chat should I open?"),
            },
            Action::Summarize => ExecutionResult::ok(format!("Here is your {} summary.", platform)).with_data(
                ResultData::SummaryReady {
                    summary: format!("Nothing new on {}.", platform),
                },
            ),
            Action::Read | Action::ReadUnread => {
                ExecutionResult::ok(format!("You have no unread {} messages.", platform))
            }
            Action::Search => match &entities.query {
                Some(query) => ExecutionResult::ok(format!("I found nothing matching {}.", query)),
                None => ExecutionResult::failed("What should I search for?"),
            },
            Action::Close => ExecutionResult::ok("Closed.").with_data(ResultData::CloseConversation),
            _ => ExecutionResult::failed(format!("I can't do that on {}.", platform)),
        };

        Ok(result)
    }
}
