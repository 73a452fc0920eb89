//! Message envelopes exchanged at the orchestration boundary.

use serde::{Deserialize, Serialize};

use crate::context::InteractionEvent;
use crate::types::{Diagnosis, DiagnosisInfo, Prescription};

/// Inbound message routed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    pub role: String,
    pub content: RequestContent,
}

/// The known request kinds, one per well-known wire key.
///
/// Externally tagged so each serializes as `{"<kind>": {...}}`, matching the
/// single-request-key envelope consumed by the roles. Routing matches
/// exhaustively on this enum; unknown keys fail at deserialization instead of
/// being silently ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestContent {
    ReceptionRequest(ReceptionRequest),
    FollowupQuery(FollowupQuery),
    DiagnoseRequest(DiagnoseRequest),
    PatientResponse(PatientResponse),
    PrescriptionRequest(PrescriptionRequest),
    ReviewRequest(ReviewRequest),
    DrugInfoRequest(DrugInfoRequest),
    InteractionCheck(InteractionCheck),
    PrescriptionQuery(PrescriptionQuery),
}

impl RequestContent {
    /// Wire key for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReceptionRequest(_) => "reception_request",
            Self::FollowupQuery(_) => "followup_query",
            Self::DiagnoseRequest(_) => "diagnose_request",
            Self::PatientResponse(_) => "patient_response",
            Self::PrescriptionRequest(_) => "prescription_request",
            Self::ReviewRequest(_) => "review_request",
            Self::DrugInfoRequest(_) => "drug_info_request",
            Self::InteractionCheck(_) => "interaction_check",
            Self::PrescriptionQuery(_) => "prescription_query",
        }
    }
}

/// First contact for a session: raw message plus whatever intake extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceptionRequest {
    pub session_id: String,
    pub patient_id: String,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub patient_age: Option<u32>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    pub raw_message: String,
}

/// Any later user turn while the receptionist owns the stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupQuery {
    pub session_id: String,
    pub patient_id: String,
    pub query: String,
}

/// Hand-off from reception to the doctor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnoseRequest {
    pub session_id: String,
    pub patient_id: String,
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub medical_history: Vec<String>,
    pub department: String,
    #[serde(default)]
    pub is_return_visit: bool,
    #[serde(default)]
    pub reception_notes: Option<String>,
}

/// Patient answer to the doctor's last question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientResponse {
    pub session_id: String,
    pub patient_id: String,
    pub answer: String,
}

/// Standalone request to turn an existing diagnosis into a prescription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionRequest {
    pub patient_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub diagnosis: Diagnosis,
}

/// Prescription review request for the pharmacist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub patient_id: String,
    #[serde(default)]
    pub diagnosis: Option<DiagnosisInfo>,
    pub prescription: Prescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugInfoRequest {
    pub drug_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionCheck {
    pub drugs: Vec<String>,
}

/// Patient question about an already-approved prescription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionQuery {
    pub session_id: String,
    pub patient_id: String,
    pub query: String,
    pub prescription: Prescription,
}

/// Terminal classification of a caller-facing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    InProgress,
    InfoDisplayed,
    CompletedNoPrescription,
    CompletedPrescription,
    ErrorPrescriptionRejected,
    Error,
}

impl ResponseStatus {
    /// Whether this status ends the consultation workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CompletedNoPrescription
                | Self::CompletedPrescription
                | Self::ErrorPrescriptionRejected
                | Self::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::InfoDisplayed => "info_displayed",
            Self::CompletedNoPrescription => "completed_no_prescription",
            Self::CompletedPrescription => "completed_prescription",
            Self::ErrorPrescriptionRejected => "error_prescription_rejected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbound response envelope returned to the caller after every turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: ResponseStatus,
    pub message: String,
    /// Which role authored the message ("receptionist", "doctor", ...).
    pub agent_type: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription: Option<Prescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis_info: Option<DiagnosisInfo>,
    #[serde(default)]
    pub interaction_log: Vec<InteractionEvent>,
}

impl ResponseEnvelope {
    /// In-progress reply carrying only a message.
    pub fn in_progress(session_id: impl Into<String>, agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::InProgress,
            message: message.into(),
            agent_type: agent.into(),
            session_id: session_id.into(),
            prescription: None,
            diagnosis_info: None,
            interaction_log: Vec::new(),
        }
    }

    /// Error reply attributed to the system.
    pub fn error(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            agent_type: "system".into(),
            session_id: session_id.into(),
            prescription: None,
            diagnosis_info: None,
            interaction_log: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_content_wire_key() {
        let content = RequestContent::FollowupQuery(FollowupQuery {
            session_id: "web-1".into(),
            patient_id: "p-1".into(),
            query: "I have a headache".into(),
        });
        let json = serde_json::to_value(&content).unwrap();
        assert!(json.get("followup_query").is_some());
        assert_eq!(content.kind(), "followup_query");
    }

    #[test]
    fn test_request_content_round_trip() {
        let json = r#"{"reception_request": {
            "session_id": "web-2",
            "patient_id": "p-2",
            "symptoms": ["cough"],
            "raw_message": "I have a cough"
        }}"#;
        let content: RequestContent = serde_json::from_str(json).unwrap();
        match content {
            RequestContent::ReceptionRequest(request) => {
                assert_eq!(request.symptoms, vec!["cough".to_string()]);
                assert!(request.patient_age.is_none());
            }
            other => panic!("unexpected variant: {}", other.kind()),
        }
    }

    #[test]
    fn test_unknown_request_key_rejected() {
        let json = r#"{"mystery_request": {}}"#;
        assert!(serde_json::from_str::<RequestContent>(json).is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ResponseStatus::CompletedPrescription.is_terminal());
        assert!(ResponseStatus::ErrorPrescriptionRejected.is_terminal());
        assert!(ResponseStatus::Error.is_terminal());
        assert!(!ResponseStatus::InProgress.is_terminal());
        assert!(!ResponseStatus::InfoDisplayed.is_terminal());
    }
}
