//! LLM-backed intent classification for reception turns.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use clinic_llm::{GenerationService, extract};

/// Categories the classifier may assign to a reception turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    MedicalInquiry,
    GeneralChat,
    SeekingSpecificDoctor,
    ProvidingIdentity,
    AskingGuidance,
    Unclear,
}

impl Intent {
    fn from_label(label: &str) -> Self {
        match label {
            "medical_inquiry" => Self::MedicalInquiry,
            "general_chat" => Self::GeneralChat,
            "seeking_specific_doctor" => Self::SeekingSpecificDoctor,
            "providing_identity" => Self::ProvidingIdentity,
            "asking_guidance" => Self::AskingGuidance,
            _ => Self::Unclear,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
    pub has_sufficient_medical_info: bool,
    pub extracted_symptoms: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawIntent {
    intent: String,
    has_sufficient_medical_info: bool,
    extracted_symptoms: Vec<String>,
}

impl Default for RawIntent {
    fn default() -> Self {
        Self {
            intent: "unclear".to_string(),
            has_sufficient_medical_info: false,
            extracted_symptoms: Vec::new(),
        }
    }
}

const SYSTEM_MESSAGE: &str =
    "You are an intent recognition assistant. Analyze the user input and respond in JSON.";

/// Classify the latest user message, with up to four recent conversation
/// snippets as context. A classification that cannot be obtained or parsed is
/// an error the receptionist maps to its retryable error stage.
pub async fn classify_intent(
    generation: &dyn GenerationService,
    user_message: &str,
    snippets: &[String],
) -> Result<IntentResult> {
    let mut history = String::new();
    if !snippets.is_empty() {
        let tail = &snippets[snippets.len().saturating_sub(4)..];
        history = format!("\n\nRecent conversation:\n{}\n", tail.join("\n"));
    }

    let prompt = format!(
        "You are a clinic reception assistant and need to determine the user's intent.\n\
{history}\n\
Latest user message: \"{user_message}\"\n\n\
Analyze the main intent of the latest message and whether it carries enough \
medical information (at least one clear symptom).\n\
Possible intent categories:\n\
- \"medical_inquiry\": the user is describing symptoms or a health problem.\n\
- \"general_chat\": small talk, greetings, non-medical questions, thanks.\n\
- \"seeking_specific_doctor\": the user explicitly wants a particular doctor.\n\
- \"providing_identity\": the user is giving a phone number or saying whether \
this is a return visit (possibly replying to your question).\n\
- \"asking_guidance\": the user is unsure how to describe things and wants help.\n\
- \"unclear\": the intent cannot be determined.\n\n\
Respond strictly in this JSON format:\n\
{{\n\
  \"intent\": \"...\",\n\
  \"has_sufficient_medical_info\": true,\n\
  \"extracted_symptoms\": [\"...\"]\n\
}}\n\
If the intent is \"providing_identity\", \"has_sufficient_medical_info\" and \
\"extracted_symptoms\" may be false/[]."
    );

    let response = generation
        .generate(&prompt, SYSTEM_MESSAGE, 0.1, 200)
        .await
        .context("intent classification call failed")?;
    debug!(%response, "intent classification response");

    let raw: Value = extract::parse_object(&response)
        .context("intent classification response contained no JSON object")?;
    let raw: RawIntent = serde_json::from_value(raw).unwrap_or_default();

    let result = IntentResult {
        intent: Intent::from_label(&raw.intent),
        has_sufficient_medical_info: raw.has_sufficient_medical_info,
        extracted_symptoms: raw
            .extracted_symptoms
            .into_iter()
            .filter(|symptom| !symptom.trim().is_empty())
            .collect(),
    };
    info!(
        intent = ?result.intent,
        sufficient = result.has_sufficient_medical_info,
        symptoms = result.extracted_symptoms.len(),
        "intent classified"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_llm::ScriptedService;

    #[tokio::test]
    async fn test_classification_with_fenced_json() {
        let service = ScriptedService::new();
        service.push_reply(
            "```json\n{\"intent\": \"medical_inquiry\", \"has_sufficient_medical_info\": true, \"extracted_symptoms\": [\"fever\"]}\n```",
        );

        let result = classify_intent(&service, "I have a fever", &[]).await.unwrap();
        assert_eq!(result.intent, Intent::MedicalInquiry);
        assert!(result.has_sufficient_medical_info);
        assert_eq!(result.extracted_symptoms, vec!["fever".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_label_maps_to_unclear() {
        let service = ScriptedService::new();
        service.push_reply(r#"{"intent": "existential_dread"}"#);

        let result = classify_intent(&service, "hm", &[]).await.unwrap();
        assert_eq!(result.intent, Intent::Unclear);
        assert!(!result.has_sufficient_medical_info);
    }

    #[tokio::test]
    async fn test_classification_failure_is_error() {
        let service = ScriptedService::new();
        service.push_failure("backend down");
        assert!(classify_intent(&service, "hello", &[]).await.is_err());

        let service = ScriptedService::new();
        service.push_reply("plain prose, no json at all");
        assert!(classify_intent(&service, "hello", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_snippets_are_windowed_into_prompt() {
        let service = ScriptedService::new();
        service.push_reply(r#"{"intent": "general_chat"}"#);
        let snippets: Vec<String> = (0..6).map(|i| format!("snippet-{i}")).collect();

        classify_intent(&service, "hi", &snippets).await.unwrap();
        let prompt = &service.calls()[0].prompt;
        assert!(!prompt.contains("snippet-1"));
        assert!(prompt.contains("snippet-2"));
        assert!(prompt.contains("snippet-5"));
    }
}
