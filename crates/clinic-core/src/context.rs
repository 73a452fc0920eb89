//! Per-session consultation state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;
use crate::types::Prescription;

/// Sentinel symptom emitted by the deterministic intake extractor when the
/// first message yields nothing usable. Treated as "no symptoms" by the
/// receptionist's sufficiency check.
pub const UNCLEAR_SYMPTOM: &str = "unclear description";

const SNIPPET_CAP: usize = 6;
const INTERACTION_LOG_CAP: usize = 50;

/// One entry of the bounded interaction log kept inside the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub target: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl InteractionEvent {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        action: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            target: target.into(),
            action: action.into(),
            detail,
        }
    }
}

/// Mutable per-session state driving the stage machine.
///
/// Exactly one context exists per active session id; it is rehydrated from
/// the store on every turn and deleted when the workflow reaches a terminal
/// outcome. Nothing in here may be cached in process memory across turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationContext {
    pub session_id: String,
    pub patient_id: String,
    pub stage: Stage,

    /// Symptoms accumulated across reception and diagnosis turns.
    #[serde(default)]
    pub extracted_symptoms: BTreeSet<String>,
    /// Symptoms as they stood when the doctor took over.
    #[serde(default)]
    pub initial_symptoms: Vec<String>,
    /// Diagnosis confidence, clamped to [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub questions_asked: Vec<String>,
    #[serde(default)]
    pub patient_responses: Vec<String>,
    #[serde(default)]
    pub symptom_details: BTreeMap<String, String>,
    #[serde(default)]
    pub related_info: BTreeMap<String, String>,
    #[serde(default)]
    pub medical_history: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,

    #[serde(default)]
    pub is_return_visit: bool,
    #[serde(default)]
    pub identity_asked: bool,
    #[serde(default)]
    pub identity_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_provided: Option<String>,
    #[serde(default)]
    pub guidance_given: bool,

    #[serde(default)]
    pub chat_turns: u32,
    #[serde(default)]
    pub off_topic_turns: u32,

    /// Last few user/role exchanges, newest last, capped at 6.
    #[serde(default)]
    pub conversation_snippets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reception_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prescription_for_query: Option<Prescription>,

    /// Bounded audit of routing decisions for this session, capped at 50.
    #[serde(default)]
    pub interaction_log: Vec<InteractionEvent>,

    pub last_updated: DateTime<Utc>,
}

impl ConsultationContext {
    pub fn new(session_id: impl Into<String>, patient_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            patient_id: patient_id.into(),
            stage: Stage::IntentRecognition,
            extracted_symptoms: BTreeSet::new(),
            initial_symptoms: Vec::new(),
            confidence: 0.3,
            questions_asked: Vec::new(),
            patient_responses: Vec::new(),
            symptom_details: BTreeMap::new(),
            related_info: BTreeMap::new(),
            medical_history: Vec::new(),
            department: None,
            is_return_visit: false,
            identity_asked: false,
            identity_confirmed: false,
            phone_provided: None,
            guidance_given: false,
            chat_turns: 0,
            off_topic_turns: 0,
            conversation_snippets: Vec::new(),
            reception_notes: None,
            last_prescription_for_query: None,
            interaction_log: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Append a conversation snippet, keeping only the newest 6.
    pub fn push_snippet(&mut self, snippet: impl Into<String>) {
        self.conversation_snippets.push(snippet.into());
        if self.conversation_snippets.len() > SNIPPET_CAP {
            let excess = self.conversation_snippets.len() - SNIPPET_CAP;
            self.conversation_snippets.drain(..excess);
        }
    }

    /// Append an interaction event, keeping only the newest 50.
    pub fn log_event(&mut self, event: InteractionEvent) {
        self.interaction_log.push(event);
        if self.interaction_log.len() > INTERACTION_LOG_CAP {
            let excess = self.interaction_log.len() - INTERACTION_LOG_CAP;
            self.interaction_log.drain(..excess);
        }
    }

    /// Merge newly extracted symptoms, dropping empties.
    pub fn add_symptoms<I, S>(&mut self, symptoms: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for symptom in symptoms {
            let symptom = symptom.into();
            let trimmed = symptom.trim();
            if !trimmed.is_empty() {
                self.extracted_symptoms.insert(trimmed.to_string());
            }
        }
    }

    /// Whether enough symptom information exists to attempt triage: the set
    /// is non-empty and not just the intake sentinel.
    pub fn symptoms_sufficient(&self) -> bool {
        if self.extracted_symptoms.is_empty() {
            return false;
        }
        !(self.extracted_symptoms.len() == 1
            && self.extracted_symptoms.contains(UNCLEAR_SYMPTOM))
    }

    /// Raise confidence by `delta`, clamped to 1.0.
    pub fn bump_confidence(&mut self, delta: f64) {
        self.confidence = (self.confidence + delta).min(1.0);
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_ring_cap() {
        let mut context = ConsultationContext::new("web-1", "p-1");
        for i in 0..10 {
            context.push_snippet(format!("turn-{i}"));
        }
        assert_eq!(context.conversation_snippets.len(), 6);
        assert_eq!(context.conversation_snippets[0], "turn-4");
        assert_eq!(context.conversation_snippets[5], "turn-9");
    }

    #[test]
    fn test_interaction_log_cap() {
        let mut context = ConsultationContext::new("web-1", "p-1");
        for i in 0..60 {
            context.log_event(InteractionEvent::new(
                "user",
                "system",
                format!("event-{i}"),
                None,
            ));
        }
        assert_eq!(context.interaction_log.len(), 50);
        assert_eq!(context.interaction_log[0].action, "event-10");
    }

    #[test]
    fn test_symptoms_sufficient() {
        let mut context = ConsultationContext::new("web-1", "p-1");
        assert!(!context.symptoms_sufficient());

        context.add_symptoms([UNCLEAR_SYMPTOM]);
        assert!(!context.symptoms_sufficient());

        context.add_symptoms(["headache", "  ", ""]);
        assert!(context.symptoms_sufficient());
        assert_eq!(context.extracted_symptoms.len(), 2);
    }

    #[test]
    fn test_confidence_clamped() {
        let mut context = ConsultationContext::new("web-1", "p-1");
        assert!((context.confidence - 0.3).abs() < f64::EPSILON);
        context.bump_confidence(0.5);
        context.bump_confidence(0.5);
        assert!((context.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_context_serde_round_trip() {
        let mut context = ConsultationContext::new("web-1", "p-1");
        context.stage = Stage::AskingIdentity;
        context.add_symptoms(["fever"]);
        let json = serde_json::to_string(&context).unwrap();
        let back: ConsultationContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stage, Stage::AskingIdentity);
        assert!(back.extracted_symptoms.contains("fever"));
    }
}
