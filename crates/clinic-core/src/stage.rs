//! Consultation workflow stages.

use serde::{Deserialize, Serialize};

/// Position of a session within the reception/doctor/pharmacist workflow.
///
/// The receptionist owns every `Reception*`-prefixed stage plus the chat and
/// clarification states; `InformationGathering` hands the session to the
/// doctor and `PrescriptionReview` to the pharmacist. The workflow:
///
/// ```text
///   IntentRecognition --> {AskingIdentity, Guiding, Chatting,
///                          Clarification, ReceptionError}
///                     --> Triage --> ReceptionCompleted
///   Chatting          --> ChatEnded                (terminal dead-end)
///   ReceptionCompleted -> InformationGathering     (doctor)
///   InformationGathering -> PrescriptionReview     (pharmacist Q&A)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    IntentRecognition,
    AskingIdentity,
    Guiding,
    Chatting,
    ChatEnded,
    Clarification,
    ReceptionError,
    Triage,
    ReceptionCompleted,
    InformationGathering,
    PrescriptionReview,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentRecognition => "intent_recognition",
            Self::AskingIdentity => "asking_identity",
            Self::Guiding => "guiding",
            Self::Chatting => "chatting",
            Self::ChatEnded => "chat_ended",
            Self::Clarification => "clarification",
            Self::ReceptionError => "reception_error",
            Self::Triage => "triage",
            Self::ReceptionCompleted => "reception_completed",
            Self::InformationGathering => "information_gathering",
            Self::PrescriptionReview => "prescription_review",
        }
    }

    /// Whether the receptionist still owns this stage.
    pub fn is_reception(&self) -> bool {
        matches!(
            self,
            Self::IntentRecognition
                | Self::AskingIdentity
                | Self::Guiding
                | Self::Chatting
                | Self::ChatEnded
                | Self::Clarification
                | Self::ReceptionError
                | Self::Triage
        )
    }

    /// Whether the workflow can make no further progress from this stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ChatEnded)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&Stage::AskingIdentity).unwrap();
        assert_eq!(json, "\"asking_identity\"");
        let back: Stage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Stage::AskingIdentity);
    }

    #[test]
    fn test_reception_ownership() {
        assert!(Stage::IntentRecognition.is_reception());
        assert!(Stage::ChatEnded.is_reception());
        assert!(!Stage::InformationGathering.is_reception());
        assert!(!Stage::PrescriptionReview.is_reception());
    }

    #[test]
    fn test_terminal_stages() {
        assert!(Stage::ChatEnded.is_terminal());
        assert!(!Stage::Guiding.is_terminal());
        assert!(!Stage::ReceptionCompleted.is_terminal());
    }
}
