//! Ordered keyword rules
//!
//! Rules are scanned top to bottom and the first one with a keyword present
//! in the utterance wins, so specific phrasings (folders, unread) sit above
//! the generic verbs they contain.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{Action, Destination, Entities, ResolvedIntent};

struct Rule {
    action: Action,
    destination: Destination,
    keywords: &'static [&'static str],
}

const fn rule(action: Action, destination: Destination, keywords: &'static [&'static str]) -> Rule {
    Rule {
        action,
        destination,
        keywords,
    }
}

static RULES: &[Rule] = &[
    rule(Action::Wake, Destination::System, &["wake up"]),
    rule(Action::Sleep, Destination::System, &["go to sleep", "goodbye"]),
    rule(Action::Cancel, Destination::System, &["cancel", "never mind", "nevermind"]),
    rule(Action::Logout, Destination::System, &["log out", "logout", "sign out", "sign me out"]),
    rule(
        Action::Register,
        Destination::System,
        &["register", "sign up", "create an account", "create account", "new account"],
    ),
    rule(Action::Login, Destination::System, &["log in", "login", "sign in", "sign me in"]),
    rule(Action::Help, Destination::System, &["help", "what can you do"]),
    rule(
        Action::ViewFolder,
        Destination::Mail,
        &[
            "inbox", "spam", "junk", "sent folder", "sent mail", "sent items", "drafts", "starred",
            "trash", "archive",
        ],
    ),
    rule(
        Action::ReadUnread,
        Destination::Mail,
        &["unread email", "unread emails", "unread mail", "new emails", "new mail", "unread gmail"],
    ),
    rule(
        Action::ReadUnread,
        Destination::Telegram,
        &["unread telegram", "telegram unread", "unread chats", "new telegram"],
    ),
    rule(
        Action::Summarize,
        Destination::Mail,
        &["summarize email", "summarize emails", "summarize my email", "summarize my emails", "email summary"],
    ),
    rule(
        Action::Summarize,
        Destination::Telegram,
        &["summarize telegram", "summarize my telegram", "telegram summary"],
    ),
    rule(
        Action::Compose,
        Destination::Mail,
        &[
            "compose", "write an email", "write email", "new email", "send an email", "send email",
            "email to", "mail to", "draft an email", "draft email",
        ],
    ),
    rule(
        Action::ListChats,
        Destination::Telegram,
        &["open telegram", "show telegram", "telegram chats", "list chats", "my chats", "show chats"],
    ),
    rule(
        Action::OpenChat,
        Destination::Telegram,
        &["open chat", "open the chat", "chat with", "conversation with", "open conversation"],
    ),
    rule(
        Action::Read,
        Destination::Telegram,
        &["read telegram", "read my telegram", "telegram messages"],
    ),
    rule(
        Action::Send,
        Destination::Telegram,
        &["telegram message", "message on telegram", "on telegram", "via telegram", "telegram"],
    ),
    rule(
        Action::Read,
        Destination::Mail,
        &["read email", "read emails", "read my email", "read my emails", "read the email", "read mail"],
    ),
    rule(Action::Search, Destination::Mail, &["search", "find email", "find emails", "look for"]),
    rule(Action::Reply, Destination::System, &["reply", "respond"]),
    rule(Action::Summarize, Destination::System, &["summarize", "summarise", "summary", "sum up"]),
    rule(Action::Read, Destination::System, &["read", "what does it say"]),
    rule(Action::Draft, Destination::System, &["draft"]),
    rule(Action::Send, Destination::System, &["send", "message"]),
    rule(Action::Close, Destination::System, &["close", "go back"]),
];

/// Words that look like a name after a preposition but are not one
const NOT_A_NAME: &[&str] = &[
    "unread", "latest", "new", "recent", "inbox", "email", "emails", "mail", "message", "messages",
    "telegram", "chat", "chats", "me", "it", "this", "that", "them", "him", "her", "everyone", "all",
];

static PREPOSITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:with|from|to|for|chat|group|about)\s+").expect("valid regex"));

static BODY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\b(?:saying|that says|which says)\s+(.+)$").expect("valid regex"));

static SUBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+about\s+(.+)$").expect("valid regex"));

static PLATFORM_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+(?:on|via|over|by|through)\s+(?:telegram|email|e-mail|mail|gmail)$")
        .expect("valid regex")
});

static SEARCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:search(?:\s+for)?|find(?:\s+emails?)?|look\s+for)\s+(.+)$").expect("valid regex")
});

/// Deterministic rule-table classifier
#[derive(Debug, Default, Clone, Copy)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> ResolvedIntent {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return ResolvedIntent::unknown(text.trim());
        }

        let padded = format!(" {} ", normalized);
        for rule in RULES {
            let hit = rule
                .keywords
                .iter()
                .find(|keyword| padded.contains(&format!(" {} ", keyword)));

            if let Some(keyword) = hit {
                let intent = ResolvedIntent {
                    action: rule.action,
                    destination: rule.destination,
                    source_text: text.trim().to_string(),
                    entities: extract_entities(rule.action, keyword, &normalized),
                    explicit_destination: rule.destination != Destination::System,
                };
                debug!(action = ?intent.action, destination = ?intent.destination, keyword, "intent resolved");
                return intent;
            }
        }

        debug!("no rule matched");
        ResolvedIntent::unknown(text.trim())
    }
}

/// Lowercase, collapse whitespace, drop commas and trailing punctuation
fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace(',', " ");
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?'))
        .trim()
        .to_string()
}

fn extract_entities(action: Action, keyword: &str, normalized: &str) -> Entities {
    let mut entities = Entities::default();
    let mut rest = normalized.to_string();

    match action {
        Action::ViewFolder => {
            entities.query = Some(folder_name(keyword).to_string());
            return entities;
        }
        Action::Search => {
            entities.query = SEARCH_RE
                .captures(normalized)
                .map(|c| c[1].trim().to_string());
            return entities;
        }
        _ => {}
    }

    if let Some(found) = BODY_RE.captures(&rest) {
        entities.body = Some(found[1].trim().to_string());
        let start = found.get(0).map(|m| m.start()).unwrap_or(rest.len());
        rest.truncate(start);
    }

    if matches!(action, Action::Compose | Action::Send | Action::Draft | Action::Reply) {
        if let Some(found) = SUBJECT_RE.captures(&rest) {
            entities.subject = Some(found[1].trim().to_string());
            let start = found.get(0).map(|m| m.start()).unwrap_or(rest.len());
            rest.truncate(start);
        }
    }

    let rest = PLATFORM_SUFFIX_RE.replace(&rest, "");
    entities.recipient = extract_recipient(&rest);
    entities
}

fn extract_recipient(text: &str) -> Option<String> {
    let last = PREPOSITION_RE.find_iter(text).last()?;
    let candidate = text[last.end()..].trim();
    let candidate = candidate
        .strip_prefix("my ")
        .or_else(|| candidate.strip_prefix("the "))
        .unwrap_or(candidate)
        .trim();

    if candidate.is_empty() || NOT_A_NAME.contains(&candidate) {
        return None;
    }

    let first = candidate.split_whitespace().next().unwrap_or_default();
    if NOT_A_NAME.contains(&first) {
        return None;
    }

    Some(candidate.to_string())
}

fn folder_name(keyword: &str) -> &'static str {
    match keyword {
        "spam" | "junk" => "spam",
        "sent folder" | "sent mail" | "sent items" => "sent",
        "drafts" => "drafts",
        "starred" => "starred",
        "trash" => "trash",
        "archive" => "archive",
        _ => "inbox",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> ResolvedIntent {
        IntentClassifier::new().classify(text)
    }

    #[test]
    fn test_open_inbox_is_explicit_mail_folder() {
        let intent = classify("Open inbox");
        assert_eq!(intent.action, Action::ViewFolder);
        assert_eq!(intent.destination, Destination::Mail);
        assert_eq!(intent.entities.query.as_deref(), Some("inbox"));
        assert!(intent.explicit_destination);
    }

    #[test]
    fn test_folder_rules_precede_generic_read() {
        let intent = classify("read my spam");
        assert_eq!(intent.action, Action::ViewFolder);
        assert_eq!(intent.entities.query.as_deref(), Some("spam"));

        let intent = classify("read my unread emails");
        assert_eq!(intent.action, Action::ReadUnread);
        assert_eq!(intent.destination, Destination::Mail);
    }

    #[test]
    fn test_bare_summarize_is_ambiguous() {
        let intent = classify("summarize");
        assert_eq!(intent.action, Action::Summarize);
        assert_eq!(intent.destination, Destination::System);
        assert!(!intent.explicit_destination);
    }

    #[test]
    fn test_keywords_match_whole_words() {
        // "read" must not fire inside "already"
        let intent = classify("i already did that");
        assert_eq!(intent.action, Action::Unknown);
    }

    #[test]
    fn test_recipient_extraction() {
        let intent = classify("read the latest email from Amazon");
        assert_eq!(intent.action, Action::Read);
        assert_eq!(intent.entities.recipient.as_deref(), Some("amazon"));

        let intent = classify("open chat with my mom");
        assert_eq!(intent.action, Action::OpenChat);
        assert_eq!(intent.entities.recipient.as_deref(), Some("mom"));
    }

    #[test]
    fn test_recipient_rejects_action_words() {
        let intent = classify("reply to this");
        assert_eq!(intent.action, Action::Reply);
        assert_eq!(intent.entities.recipient, None);

        let intent = classify("read messages from unread");
        assert_eq!(intent.entities.recipient, None);
    }

    #[test]
    fn test_send_with_body_and_platform_suffix() {
        let intent = classify("send a message to Bob on telegram saying see you at five");
        assert_eq!(intent.action, Action::Send);
        assert_eq!(intent.destination, Destination::Telegram);
        assert_eq!(intent.entities.body.as_deref(), Some("see you at five"));
        assert_eq!(intent.entities.recipient.as_deref(), Some("bob"));
    }

    #[test]
    fn test_compose_extracts_subject() {
        let intent = classify("write an email to john about the quarterly report");
        assert_eq!(intent.action, Action::Compose);
        assert_eq!(intent.destination, Destination::Mail);
        assert_eq!(intent.entities.recipient.as_deref(), Some("john"));
        assert_eq!(intent.entities.subject.as_deref(), Some("the quarterly report"));
    }

    #[test]
    fn test_search_query() {
        let intent = classify("search for invoices from march");
        assert_eq!(intent.action, Action::Search);
        assert_eq!(intent.entities.query.as_deref(), Some("invoices from march"));
    }

    #[test]
    fn test_unknown_keeps_text_as_query() {
        let intent = classify("  What's the weather like?  ");
        assert_eq!(intent.action, Action::Unknown);
        assert_eq!(intent.destination, Destination::System);
        assert_eq!(intent.entities.query.as_deref(), Some("What's the weather like?"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let a = classify("summarize my telegram");
        let b = classify("summarize my telegram");
        assert_eq!(a, b);
        assert_eq!(a.destination, Destination::Telegram);
    }
}
