//! Intent resolution
//!
//! Maps a raw utterance to a `ResolvedIntent` through an ordered keyword
//! rule table. Same text in, same route out.

mod classifier;

use serde::{Deserialize, Serialize};

pub use classifier::IntentClassifier;

/// What the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Login,
    Register,
    Logout,
    Sleep,
    Wake,
    Cancel,
    Help,
    ViewFolder,
    ReadUnread,
    ListChats,
    OpenChat,
    Search,
    Summarize,
    Read,
    Compose,
    Send,
    Draft,
    Reply,
    Close,
    Unknown,
}

impl Action {
    /// Actions every platform supports; eligible for contextual re-routing
    pub fn is_common(self) -> bool {
        matches!(
            self,
            Action::Read | Action::Send | Action::Summarize | Action::Close | Action::Draft | Action::Reply
        )
    }
}

/// A messaging surface the assistant can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Mail,
    Telegram,
}

impl Platform {
    /// Platforms whose drafts are written by the drafting collaborator
    pub fn supports_ai_drafting(self) -> bool {
        matches!(self, Platform::Mail)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Mail => write!(f, "email"),
            Platform::Telegram => write!(f, "Telegram"),
        }
    }
}

/// Where an intent should be executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Mail,
    Telegram,
    /// Local, or not yet tied to a platform
    System,
}

impl Destination {
    pub fn platform(self) -> Option<Platform> {
        match self {
            Destination::Mail => Some(Platform::Mail),
            Destination::Telegram => Some(Platform::Telegram),
            Destination::System => None,
        }
    }
}

impl From<Platform> for Destination {
    fn from(platform: Platform) -> Self {
        match platform {
            Platform::Mail => Destination::Mail,
            Platform::Telegram => Destination::Telegram,
        }
    }
}

/// Values pulled out of the utterance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Classifier output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIntent {
    pub action: Action,
    pub destination: Destination,
    pub source_text: String,
    pub entities: Entities,
    /// The utterance itself named the destination
    pub explicit_destination: bool,
}

impl ResolvedIntent {
    pub fn unknown(source_text: &str) -> Self {
        Self {
            action: Action::Unknown,
            destination: Destination::System,
            source_text: source_text.to_string(),
            entities: Entities {
                query: Some(source_text.to_string()),
                ..Entities::default()
            },
            explicit_destination: false,
        }
    }
}
