//! Deterministic intake extraction from the first user message.

use std::sync::OnceLock;

use regex::Regex;

use clinic_core::UNCLEAR_SYMPTOM;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntakeInfo {
    pub age: Option<u32>,
    /// Never empty: falls back to a generic complaint or the unclear-description
    /// sentinel.
    pub symptoms: Vec<String>,
}

fn age_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,3})\s*(?:years?\s*old|y/?o)\b").expect("age regex")
    })
}

fn split_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[,.;!?\n]+").expect("split regex"))
}

/// Phrases that introduce the actual complaint; text after the first match is
/// preferred for symptom splitting.
const LEAD_INS: &[&str] = &[
    "symptoms are",
    "symptom is",
    "suffering from",
    "problem is",
    "i have been having",
    "i have",
    "i've got",
    "i feel",
    "i am feeling",
    "i'm feeling",
    "feeling",
];

const VAGUE_COMPLAINTS: &[&str] = &["not feeling well", "feel unwell", "feeling sick", "i am sick", "under the weather"];

const FILLER_PARTS: &[&str] = &[
    "hello", "hi", "good morning", "good afternoon", "doctor", "please", "thanks", "thank you",
    "i", "me", "well", "so", "um",
];

/// Extract age and candidate symptoms from a first-contact message.
///
/// Heuristic by design; the receptionist refines symptoms over later turns.
/// When nothing usable is found the result carries either a generic
/// "general discomfort" complaint or the [`UNCLEAR_SYMPTOM`] sentinel.
pub fn extract_initial_info(message: &str) -> IntakeInfo {
    let age = age_regex()
        .captures(message)
        .and_then(|captures| captures[1].parse::<u32>().ok())
        .filter(|age| (1..120).contains(age));

    let lower = message.to_lowercase();
    let mut candidate_text = lower.as_str();
    for lead_in in LEAD_INS {
        if let Some(index) = candidate_text.find(lead_in) {
            candidate_text = &candidate_text[index + lead_in.len()..];
            break;
        }
    }

    let age_span = age_regex().find(&lower).map(|m| m.as_str().to_string());

    let mut symptoms: Vec<String> = split_regex()
        .split(candidate_text)
        .map(str::trim)
        .map(|part| {
            // Drop the age phrase when it shares a clause with a symptom.
            match &age_span {
                Some(span) => part.replace(span.as_str(), " ").trim().to_string(),
                None => part.to_string(),
            }
        })
        .map(|part| {
            part.trim_start_matches(|c: char| !c.is_alphanumeric())
                .trim()
                .to_string()
        })
        .filter(|part| part.len() > 2)
        .filter(|part| !part.chars().all(|c| c.is_ascii_digit() || c.is_whitespace()))
        .filter(|part| !FILLER_PARTS.contains(&part.as_str()))
        .collect();
    symptoms.dedup();

    if symptoms.is_empty() {
        symptoms = if VAGUE_COMPLAINTS.iter().any(|vague| lower.contains(vague)) {
            vec!["general discomfort".to_string()]
        } else {
            vec![UNCLEAR_SYMPTOM.to_string()]
        };
    }

    IntakeInfo { age, symptoms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_and_symptoms() {
        let info = extract_initial_info("Hello, I am 34 years old and I have a bad cough, fever");
        assert_eq!(info.age, Some(34));
        assert!(info.symptoms.iter().any(|s| s.contains("cough")));
        assert!(info.symptoms.iter().any(|s| s.contains("fever")));
    }

    #[test]
    fn test_age_bounds() {
        assert_eq!(extract_initial_info("I am 0 years old").age, None);
        assert_eq!(extract_initial_info("I am 130 years old").age, None);
        assert_eq!(extract_initial_info("I am 119 years old").age, Some(119));
    }

    #[test]
    fn test_lead_in_preferred() {
        let info = extract_initial_info("Good morning doctor, my problem is persistent headaches");
        assert!(
            info.symptoms
                .iter()
                .any(|s| s.contains("persistent headaches"))
        );
    }

    #[test]
    fn test_vague_complaint() {
        let info = extract_initial_info("I'm not feeling well");
        assert_eq!(info.symptoms, vec!["general discomfort".to_string()]);
    }

    #[test]
    fn test_unclear_sentinel() {
        let info = extract_initial_info("hi");
        assert_eq!(info.symptoms, vec![UNCLEAR_SYMPTOM.to_string()]);
        assert_eq!(info.age, None);
    }
}
