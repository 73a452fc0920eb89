//! Deterministic identity extraction from free text.
//!
//! Pure pattern matching, never the generation service: the receptionist's
//! identity turn must not cost a second round-trip, and the extractor must
//! stay independently testable from the LLM-backed intent classifier.

use std::sync::OnceLock;

use regex::Regex;

/// What a single identity-stage reply yielded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityInfo {
    /// Raw phone match as typed by the user, separators included.
    pub phone: Option<String>,
    /// Explicit return-visit cue, when one was present.
    pub is_return_visit: Option<bool>,
    /// Leftover tokens that look like symptom descriptions.
    pub additional_symptoms: Vec<String>,
}

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\+?\d[\d\s().-]{5,18}\d").expect("phone regex"))
}

fn split_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[,.;!?\n]+").expect("split regex"))
}

const RETURN_CUES: &[&str] = &[
    "return visit",
    "follow-up",
    "follow up",
    "been here before",
    "came before",
    "seen before",
];
const FIRST_VISIT_CUES: &[&str] = &["first time", "first visit", "never been", "new patient"];
const AFFIRMATIVE_CUES: &[&str] = &["yes", "yeah", "yep", "correct", "that's right"];
const NEGATIVE_CUES: &[&str] = &["no", "nope"];

const IDENTITY_PHRASES: &[&str] = &[
    "my phone number is",
    "phone number is",
    "my number is",
    "you can reach me at",
    "return visit",
    "follow-up",
    "follow up",
    "first time",
    "first visit",
    "new patient",
];

const FILLER_WORDS: &[&str] = &[
    "hello", "hi", "thanks", "thank you", "please", "i", "me", "yes", "no", "ok", "okay",
];

/// Extract phone number, return-visit indicator and stray symptoms from an
/// identity-stage reply.
pub fn extract_identity(message: &str) -> IdentityInfo {
    let phone = phone_regex().find(message).and_then(|candidate| {
        let digits: String = candidate
            .as_str()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        (7..=15).contains(&digits.len()).then(|| candidate.as_str().trim().to_string())
    });

    let lower = message.to_lowercase();
    let mut is_return_visit = None;
    if RETURN_CUES.iter().any(|cue| lower.contains(cue)) {
        is_return_visit = Some(true);
    } else if FIRST_VISIT_CUES.iter().any(|cue| lower.contains(cue)) {
        is_return_visit = Some(false);
    } else if AFFIRMATIVE_CUES
        .iter()
        .any(|cue| contains_word(&lower, cue))
    {
        is_return_visit = Some(true);
    } else if NEGATIVE_CUES.iter().any(|cue| contains_word(&lower, cue)) {
        is_return_visit = Some(false);
    }

    let mut symptom_text = lower.clone();
    if let Some(raw_phone) = &phone {
        symptom_text = symptom_text.replace(&raw_phone.to_lowercase(), " ");
    }
    for phrase in IDENTITY_PHRASES {
        symptom_text = symptom_text.replace(phrase, " ");
    }

    let additional_symptoms = split_regex()
        .split(&symptom_text)
        .map(str::trim)
        .filter(|part| part.len() > 2)
        .filter(|part| !part.chars().all(|c| c.is_ascii_digit() || c.is_whitespace()))
        .filter(|part| !FILLER_WORDS.contains(part))
        .map(str::to_string)
        .collect();

    IdentityInfo {
        phone,
        is_return_visit,
        additional_symptoms,
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|token| token == word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_with_separators() {
        let info = extract_identity("My phone number is +1 (555) 010-7788.");
        assert_eq!(info.phone.as_deref(), Some("+1 (555) 010-7788"));
    }

    #[test]
    fn test_short_digit_runs_ignored() {
        let info = extract_identity("I am 42 years old");
        assert_eq!(info.phone, None);
    }

    #[test]
    fn test_return_visit_cues() {
        assert_eq!(
            extract_identity("this is a return visit").is_return_visit,
            Some(true)
        );
        assert_eq!(
            extract_identity("it's my first time here").is_return_visit,
            Some(false)
        );
        assert_eq!(extract_identity("yes").is_return_visit, Some(true));
        assert_eq!(extract_identity("no, never").is_return_visit, Some(false));
        assert_eq!(extract_identity("5550107788").is_return_visit, None);
    }

    #[test]
    fn test_bare_yes_no_needs_word_boundary() {
        // "nose" must not read as a "no" cue.
        let info = extract_identity("my nose is runny");
        assert_eq!(info.is_return_visit, None);
    }

    #[test]
    fn test_symptoms_survive_identity_noise() {
        let info =
            extract_identity("My phone number is 5550107788, first time, and my throat hurts");
        assert_eq!(info.phone.as_deref(), Some("5550107788"));
        assert_eq!(info.is_return_visit, Some(false));
        assert!(
            info.additional_symptoms
                .iter()
                .any(|symptom| symptom.contains("throat hurts"))
        );
    }

    #[test]
    fn test_pure_identity_reply_has_no_symptoms() {
        let info = extract_identity("5550107788, return visit");
        assert_eq!(info.phone.as_deref(), Some("5550107788"));
        assert_eq!(info.is_return_visit, Some(true));
        assert!(info.additional_symptoms.is_empty());
    }
}
