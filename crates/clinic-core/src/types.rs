use serde::{Deserialize, Serialize};

/// Triage urgency level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    Priority,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Priority => "priority",
            Self::Urgent => "urgent",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "priority" => Ok(Self::Priority),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!(
                "Invalid priority '{other}'. Valid values: normal, priority, urgent"
            )),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One prescribed medication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Medication {
    pub name: String,
    pub dosage: String,
    pub frequency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// Prescription attached to a completed diagnosis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prescription {
    pub medications: Vec<Medication>,
    pub instructions: Vec<String>,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmacist_notes: Option<String>,
}

impl Prescription {
    pub fn is_empty(&self) -> bool {
        self.medications.is_empty()
    }
}

/// Structured diagnosis produced by the generation service.
///
/// Every field defaults so that a partially extracted response still
/// deserializes; callers treat missing fields as "not provided".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Diagnosis {
    pub condition: String,
    pub explanation: String,
    pub severity: String,
    pub recommendations: Vec<String>,
    pub medications: Vec<Medication>,
    pub follow_up: String,
    pub differential_diagnosis: Vec<String>,
    pub diagnostic_tests: Vec<String>,
}

impl Diagnosis {
    /// Prescription derived from the diagnosed medications.
    pub fn to_prescription(&self) -> Prescription {
        Prescription {
            medications: self.medications.clone(),
            instructions: self.recommendations.clone(),
            notes: self.follow_up.clone(),
            pharmacist_notes: None,
        }
    }
}

/// Caller-facing subset of a diagnosis, carried in the response envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosisInfo {
    pub condition: String,
    pub explanation: String,
    pub severity: String,
    pub diagnostic_tests: Vec<String>,
}

impl From<&Diagnosis> for DiagnosisInfo {
    fn from(diagnosis: &Diagnosis) -> Self {
        Self {
            condition: diagnosis.condition.clone(),
            explanation: diagnosis.explanation.clone(),
            severity: diagnosis.severity.clone(),
            diagnostic_tests: diagnosis.diagnostic_tests.clone(),
        }
    }
}
