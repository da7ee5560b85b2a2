//! Interpreting spoken answers
//!
//! Recognizers hand back text the way it was said: "john dot doe at gmail
//! dot com", "one two three four", "yeah go ahead". These helpers turn that
//! into the shapes each dialogue step expects.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::intent::Platform;

/// Commands honored from any dialogue depth
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalCommand {
    Cancel,
    Sleep,
    Logout,
}

const CANCEL_PHRASES: &[&str] = &[
    "cancel", "cancel that", "cancel it", "stop", "stop it", "exit", "quit", "discard", "discard it",
    "discard that", "discard the draft", "never mind", "nevermind", "forget it",
];

const SLEEP_PHRASES: &[&str] = &["go to sleep", "sleep", "goodbye", "good bye"];

const LOGOUT_PHRASES: &[&str] = &["log out", "logout", "log me out", "sign out", "sign me out"];

const FILLERS: &[&str] = &["please", "okay", "ok", "just", "now"];

const YES_WORDS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "sure", "correct", "right", "ok", "okay", "confirm", "affirmative",
];

const NO_WORDS: &[&str] = &["no", "nope", "nah", "wrong", "incorrect", "negative", "not"];

static EMAIL_SHAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9._%+-]+@[a-z0-9-]+(?:\.[a-z0-9-]+)*\.[a-z]{2,}$").expect("valid regex"));

/// Lowercase, strip punctuation other than what addresses need, collapse spaces
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '\'' | '@' | '.' | '-' | '_' | '+') { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('.')
        .to_string()
}

fn words(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(|w| w.trim_matches('.').to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

/// A global command, only when it is the whole utterance
pub fn global_command(text: &str) -> Option<GlobalCommand> {
    let kept: Vec<String> = words(text)
        .into_iter()
        .filter(|w| !FILLERS.contains(&w.as_str()))
        .collect();
    let phrase = kept.join(" ");

    if CANCEL_PHRASES.contains(&phrase.as_str()) {
        Some(GlobalCommand::Cancel)
    } else if SLEEP_PHRASES.contains(&phrase.as_str()) {
        Some(GlobalCommand::Sleep)
    } else if LOGOUT_PHRASES.contains(&phrase.as_str()) {
        Some(GlobalCommand::Logout)
    } else {
        None
    }
}

/// Whether the utterance contains one of the wake phrases as whole words
pub fn contains_wake_phrase(text: &str, wake_words: &[String]) -> bool {
    let padded = format!(" {} ", words(text).join(" "));
    wake_words
        .iter()
        .map(|w| words(w).join(" "))
        .filter(|w| !w.is_empty())
        .any(|w| padded.contains(&format!(" {} ", w)))
}

/// Affirmative or negative answer; negatives win when both appear
pub fn yes_no(text: &str) -> Option<bool> {
    let words = words(text);
    if words.iter().any(|w| NO_WORDS.contains(&w.as_str())) {
        return Some(false);
    }

    let joined = words.join(" ");
    if words.iter().any(|w| YES_WORDS.contains(&w.as_str()))
        || joined.contains("go ahead")
        || joined.contains("that's it")
    {
        return Some(true);
    }

    None
}

/// Convert a spoken email address into its written form
pub fn normalize_email(text: &str) -> Option<String> {
    let mut out = String::new();
    for word in words(text) {
        let piece = match word.as_str() {
            "at" => "@",
            "dot" | "period" | "point" => ".",
            "underscore" => "_",
            "dash" | "hyphen" | "minus" => "-",
            "plus" => "+",
            other => other,
        };
        out.push_str(piece);
    }

    let out = out.trim_end_matches('.').to_string();
    EMAIL_SHAPE_RE.is_match(&out).then_some(out)
}

/// Recipient as spoken, with email syntax written out for mail
pub fn normalize_recipient(text: &str, platform: Option<Platform>) -> Option<String> {
    let trimmed = text
        .trim()
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?'))
        .trim();
    if trimmed.is_empty() {
        return None;
    }

    if platform == Some(Platform::Mail) {
        if let Some(email) = normalize_email(trimmed) {
            return Some(email);
        }
    }

    let lowered = trimmed.to_lowercase();
    let name = ["send it to ", "send to ", "to "]
        .iter()
        .find_map(|prefix| lowered.strip_prefix(prefix).and_then(|_| trimmed.get(prefix.len()..)))
        .unwrap_or(trimmed);
    Some(name.trim().to_string())
}

/// Spoken password: whitespace collapsed, trailing punctuation dropped
pub fn normalize_password(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let password = collapsed.trim_end_matches(|c: char| matches!(c, '.' | '!' | '?'));
    (password.chars().count() >= 4).then(|| password.to_string())
}

fn digit_word(word: &str) -> Option<char> {
    let digit = match word {
        "zero" | "oh" | "o" => '0',
        "one" | "won" => '1',
        "two" | "to" | "too" => '2',
        "three" => '3',
        "four" | "for" => '4',
        "five" => '5',
        "six" => '6',
        "seven" => '7',
        "eight" | "ate" => '8',
        "nine" => '9',
        _ => return None,
    };
    Some(digit)
}

/// Collect a 4 to 6 digit PIN from digits and number words
pub fn parse_pin(text: &str) -> Option<String> {
    let mut pin = String::new();
    for word in words(text) {
        let word = word.replace('-', "");
        if !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()) {
            pin.push_str(&word);
        } else if let Some(digit) = digit_word(&word) {
            pin.push(digit);
        }
    }

    (4..=6).contains(&pin.len()).then_some(pin)
}

/// What the user wants to do with a finished draft
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftChoice {
    ReadBack,
    Send,
    Restart,
    Edit,
    Append,
}

/// Classify a reply to the draft menu. Reading back beats sending, and a
/// bare "yes" reads the draft back before anything leaves.
pub fn draft_choice(text: &str) -> Option<DraftChoice> {
    let words = words(text);
    let has = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));
    let joined = words.join(" ");

    if has(&["read", "hear", "repeat", "play"]) {
        Some(DraftChoice::ReadBack)
    } else if has(&["edit", "modify", "rewrite", "replace"]) {
        Some(DraftChoice::Edit)
    } else if has(&["add", "append", "more"]) {
        Some(DraftChoice::Append)
    } else if has(&["send", "deliver"]) {
        Some(DraftChoice::Send)
    } else if has(&["change", "restart", "no", "redo"]) || joined.contains("start over") {
        Some(DraftChoice::Restart)
    } else if yes_no(text) == Some(true) {
        Some(DraftChoice::ReadBack)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_commands_match_whole_utterance() {
        assert_eq!(global_command("Cancel."), Some(GlobalCommand::Cancel));
        assert_eq!(global_command("okay never mind"), Some(GlobalCommand::Cancel));
        assert_eq!(global_command("Go to sleep please"), Some(GlobalCommand::Sleep));
        assert_eq!(global_command("sign me out"), Some(GlobalCommand::Logout));
        assert_eq!(global_command("tell him to stop by later"), None);
        assert_eq!(global_command("cancel my subscription email"), None);
    }

    #[test]
    fn test_wake_phrase() {
        let wake = vec!["hey concierge".to_string()];
        assert!(contains_wake_phrase("Hey, Concierge!", &wake));
        assert!(contains_wake_phrase("ok hey concierge open inbox", &wake));
        assert!(!contains_wake_phrase("hey there", &wake));
    }

    #[test]
    fn test_yes_no() {
        assert_eq!(yes_no("Yes"), Some(true));
        assert_eq!(yes_no("yeah go ahead"), Some(true));
        assert_eq!(yes_no("no"), Some(false));
        assert_eq!(yes_no("that's not right"), Some(false));
        assert_eq!(yes_no("maybe later"), None);
    }

    #[test]
    fn test_spoken_email() {
        assert_eq!(
            normalize_email("John dot Doe at Gmail dot com"),
            Some("john.doe@gmail.com".to_string())
        );
        assert_eq!(normalize_email("ana@example.com"), Some("ana@example.com".to_string()));
        assert_eq!(
            normalize_email("first underscore last at mail dot co dot uk"),
            Some("first_last@mail.co.uk".to_string())
        );
        assert_eq!(normalize_email("my name is ana"), None);
    }

    #[test]
    fn test_recipient_normalization() {
        assert_eq!(
            normalize_recipient("bob at example dot com", Some(Platform::Mail)),
            Some("bob@example.com".to_string())
        );
        assert_eq!(
            normalize_recipient("To Mom.", Some(Platform::Telegram)),
            Some("Mom".to_string())
        );
        assert_eq!(normalize_recipient("  ", Some(Platform::Mail)), None);
    }

    #[test]
    fn test_pin_parsing() {
        assert_eq!(parse_pin("one two three four"), Some("1234".to_string()));
        assert_eq!(parse_pin("My PIN is 4 8 2 1"), Some("4821".to_string()));
        assert_eq!(parse_pin("48-21"), Some("4821".to_string()));
        assert_eq!(parse_pin("nine oh five"), None);
        assert_eq!(parse_pin("one two three four five six seven"), None);
    }

    #[test]
    fn test_draft_choice_priorities() {
        assert_eq!(draft_choice("read it to me"), Some(DraftChoice::ReadBack));
        assert_eq!(draft_choice("yes send it but read it first"), Some(DraftChoice::ReadBack));
        assert_eq!(draft_choice("yes send it"), Some(DraftChoice::Send));
        assert_eq!(draft_choice("yes"), Some(DraftChoice::ReadBack));
        assert_eq!(draft_choice("edit"), Some(DraftChoice::Edit));
        assert_eq!(draft_choice("add something"), Some(DraftChoice::Append));
        assert_eq!(draft_choice("no, start over"), Some(DraftChoice::Restart));
        assert_eq!(draft_choice("banana"), None);
    }

    #[test]
    fn test_password_length() {
        assert_eq!(normalize_password(" correct  horse. "), Some("correct horse".to_string()));
        assert_eq!(normalize_password("abc"), None);
    }
}
