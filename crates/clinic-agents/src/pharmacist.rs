//! Prescription review and medication Q&A.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use clinic_core::{Prescription, PrescriptionQuery, ReviewRequest};
use clinic_llm::{GenerationService, extract};
use clinic_memory::MemorySystem;

/// Synthetic issue recorded when the review feedback cannot be parsed.
pub const CANNOT_PARSE_REVIEW_ISSUE: &str = "cannot parse review feedback";

const REVIEW_SYSTEM_MESSAGE: &str = "You are an experienced, extremely rigorous clinical \
pharmacist. Inspect the prescription carefully and respond strictly in the requested JSON \
format, with no other text.";
const DRUG_INFO_SYSTEM_MESSAGE: &str = "You are a professional pharmaceutical reference. \
Provide accurate, structured drug information in JSON.";
const INTERACTION_SYSTEM_MESSAGE: &str = "You are a drug interaction reference engine. \
Return only known, clinically significant interactions as a JSON list.";
const QUERY_SYSTEM_MESSAGE: &str = "You are a patient, professional pharmacist answering \
questions about a dispensed prescription.";

/// Structured verdict of one prescription review.
///
/// `issues` are authoritative: a non-empty list forces `valid = false` no
/// matter what the raw response claimed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewVerdict {
    pub valid: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub notes: String,
}

impl ReviewVerdict {
    fn rejection(issue: &str, warning: String, notes: String) -> Self {
        Self {
            valid: false,
            issues: vec![issue.to_string()],
            warnings: vec![warning],
            recommendations: vec!["manual review required".to_string()],
            notes,
        }
    }

    /// Issues override the service's own validity claim.
    fn enforce_issue_rule(mut self) -> Self {
        if !self.issues.is_empty() {
            self.valid = false;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub enum ReviewOutcome {
    Approved {
        prescription: Prescription,
        notes: String,
    },
    Rejected {
        issues: Vec<String>,
        warnings: Vec<String>,
        message: String,
    },
}

/// Structured drug lookup result, deserialized leniently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrugInfo {
    pub drug_name: String,
    pub description: String,
    pub common_uses: Vec<String>,
    pub common_dosage: String,
    pub common_side_effects: Vec<String>,
    pub serious_side_effects: Vec<String>,
    pub contraindications: Vec<String>,
    pub warnings_precautions: Vec<String>,
    pub storage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrugInteraction {
    pub drug_pair: Vec<String>,
    pub severity: String,
    pub description: String,
    pub recommendation: String,
}

pub struct Pharmacist {
    memory: Arc<MemorySystem>,
    generation: Arc<dyn GenerationService>,
}

impl Pharmacist {
    pub fn new(memory: Arc<MemorySystem>, generation: Arc<dyn GenerationService>) -> Self {
        Self { memory, generation }
    }

    /// Review a prescription. Service and parse failures both land as
    /// deterministic rejections, never as propagated errors.
    pub async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome> {
        if request.prescription.is_empty() {
            return Ok(ReviewOutcome::Rejected {
                issues: vec!["prescription contains no medications".to_string()],
                warnings: Vec::new(),
                message: "Prescription review failed: prescription contains no medications."
                    .to_string(),
            });
        }

        let verdict = self
            .validate_prescription(&request.prescription, request.diagnosis.as_ref())
            .await
            .enforce_issue_rule();

        self.memory.append_memory(
            &request.patient_id,
            "prescription_review",
            json!({
                "prescription": &request.prescription,
                "verdict": &verdict,
                "approved": verdict.valid,
            }),
            BTreeMap::new(),
        )?;

        if verdict.valid {
            info!(patient_id = %request.patient_id, "prescription approved");
            let mut prescription = request.prescription.clone();
            if !verdict.recommendations.is_empty() {
                let recommendations = verdict.recommendations.join("; ");
                let annotation = format!("Pharmacist advice: {recommendations}");
                prescription.pharmacist_notes = Some(match prescription.pharmacist_notes {
                    Some(existing) => format!("{existing}\n{annotation}"),
                    None => annotation,
                });
            }
            Ok(ReviewOutcome::Approved {
                prescription,
                notes: format!("Prescription approved. {}", verdict.notes),
            })
        } else {
            let issue_text = if verdict.issues.is_empty() {
                "the prescription has unspecified problems".to_string()
            } else {
                verdict.issues.join("; ")
            };
            warn!(
                patient_id = %request.patient_id,
                issues = %issue_text,
                "prescription rejected"
            );
            Ok(ReviewOutcome::Rejected {
                message: format!(
                    "Prescription review failed: {issue_text}. {} Please have the doctor \
revise the prescription.",
                    verdict.notes
                ),
                issues: verdict.issues,
                warnings: verdict.warnings,
            })
        }
    }

    async fn validate_prescription(
        &self,
        prescription: &Prescription,
        diagnosis: Option<&clinic_core::DiagnosisInfo>,
    ) -> ReviewVerdict {
        let medication_lines: Vec<String> = prescription
            .medications
            .iter()
            .map(|medication| {
                format!(
                    "- {}: {}, {}, duration: {}",
                    medication.name,
                    medication.dosage,
                    medication.frequency,
                    medication.duration.as_deref().unwrap_or("unspecified"),
                )
            })
            .collect();
        let diagnosis_context = match diagnosis {
            Some(info) => format!(
                "Relevant diagnosis:\nCondition: {}\nSeverity: {}\nExplanation: {}",
                info.condition,
                info.severity,
                truncate_chars(&info.explanation, 150),
            ),
            None => "No diagnosis information available.".to_string(),
        };

        let prompt = format!(
            "As a senior clinical pharmacist, rigorously review the following prescription \
for soundness, safety and risks, in light of the partial diagnosis information.\n\n\
{diagnosis_context}\n\n\
Prescription:\n{medications}\n\n\
Instructions: {instructions}\n\
Other notes: {notes}\n\n\
Assess in particular, cross-checking against the diagnosis (e.g. whether the drugs fit \
the indication):\n\
1. Dosage and usage: is each drug's dose, frequency and duration clear, conventional and safe?\n\
2. Indication fit: does the drug combination match the diagnosis or common usage?\n\
3. Drug interactions: are there significant interactions within the prescription?\n\
4. Contraindications: any obvious contraindications or important cautions?\n\
5. Clarity: are the instructions clear and complete?\n\n\
Return ONLY a JSON object in exactly this format, with no markdown markers or other \
text:\n\
{{\n\
  \"valid\": true,\n\
  \"issues\": [],\n\
  \"warnings\": [],\n\
  \"recommendations\": [],\n\
  \"notes\": \"prescription is sound, no obvious problems found.\"\n\
}}\n\
If problems are found, fill the fields accordingly, for example:\n\
{{\n\
  \"valid\": false,\n\
  \"issues\": [\"drug X dose may be too high, needs verification\", \"duration unspecified\"],\n\
  \"warnings\": [\"drug X with drug Z may increase bleeding risk\"],\n\
  \"recommendations\": [\"verify the exact dose of drug X\", \"add the duration\"],\n\
  \"notes\": \"the prescription has dose and interaction risks and needs changes.\"\n\
}}",
            medications = medication_lines.join("\n"),
            instructions = if prescription.instructions.is_empty() {
                "none".to_string()
            } else {
                prescription.instructions.join("; ")
            },
            notes = if prescription.notes.is_empty() {
                "none"
            } else {
                &prescription.notes
            },
        );

        let response = match self
            .generation
            .generate(&prompt, REVIEW_SYSTEM_MESSAGE, 0.1, 800)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "prescription review call failed");
                return ReviewVerdict::rejection(
                    "prescription review service unavailable",
                    format!("generation error: {error}"),
                    "the review could not be completed due to an internal error.".to_string(),
                );
            }
        };

        let raw: Value = match extract::parse_object(&response) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(error = %error, "prescription review feedback unparseable");
                return ReviewVerdict::rejection(
                    CANNOT_PARSE_REVIEW_ISSUE,
                    "the generation service did not return valid JSON".to_string(),
                    format!("raw feedback (truncated): {}", truncate_chars(&response, 200)),
                );
            }
        };
        if raw.get("valid").is_none() {
            warn!("prescription review feedback missing 'valid' field");
            return ReviewVerdict::rejection(
                CANNOT_PARSE_REVIEW_ISSUE,
                "review feedback lacked a 'valid' field".to_string(),
                format!("raw feedback (truncated): {}", truncate_chars(&response, 200)),
            );
        }

        serde_json::from_value(raw).unwrap_or_else(|error| {
            warn!(%error, "prescription review feedback had an unexpected shape");
            ReviewVerdict::rejection(
                CANNOT_PARSE_REVIEW_ISSUE,
                format!("review feedback shape error: {error}"),
                String::new(),
            )
        })
    }

    /// Structured lookup for one drug.
    pub async fn drug_info(&self, drug_name: &str) -> Result<DrugInfo> {
        let prompt = format!(
            "Provide detailed information about the drug \"{drug_name}\". Respond strictly \
as JSON with the fields: \"drug_name\", \"description\", \"common_uses\", \
\"common_dosage\", \"common_side_effects\", \"serious_side_effects\", \
\"contraindications\", \"warnings_precautions\", \"storage\". If the drug cannot be \
found, return {{\"drug_name\": \"{drug_name}\", \"error\": \"information not found\"}}."
        );
        let response = self
            .generation
            .generate(&prompt, DRUG_INFO_SYSTEM_MESSAGE, 0.1, 500)
            .await
            .context("drug info call failed")?;

        let mut info: DrugInfo =
            extract::parse_object(&response).context("drug info response unparseable")?;
        if info.drug_name.is_empty() {
            info.drug_name = drug_name.to_string();
        } else if !info.drug_name.eq_ignore_ascii_case(drug_name) && info.error.is_none() {
            warn!(
                requested = drug_name,
                returned = %info.drug_name,
                "drug info name does not match the query"
            );
        }
        Ok(info)
    }

    /// Pairwise interaction check. Parse failures degrade to an empty list;
    /// fewer than two distinct drugs short-circuits without a service call.
    pub async fn check_interactions(&self, drugs: &[String]) -> Result<Vec<DrugInteraction>> {
        let unique: BTreeSet<String> = drugs
            .iter()
            .map(|drug| drug.trim().to_string())
            .filter(|drug| !drug.is_empty())
            .collect();
        if unique.len() < 2 {
            return Ok(Vec::new());
        }

        let drug_list = unique
            .iter()
            .map(|drug| format!("\"{drug}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "Check every pairwise combination of the following drugs for known, clinically \
significant interactions: [{drug_list}]. Respond strictly as a JSON list with the fields \
\"drug_pair\", \"severity\", \"description\", \"recommendation\" per item. Return [] when \
there are no interactions."
        );
        let max_tokens = (unique.len() as u32 * 150).max(500);
        let response = match self
            .generation
            .generate(&prompt, INTERACTION_SYSTEM_MESSAGE, 0.0, max_tokens)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "interaction check call failed");
                return Ok(Vec::new());
            }
        };

        match extract::parse_array::<Vec<DrugInteraction>>(&response) {
            Ok(interactions) => Ok(interactions),
            Err(error) => {
                warn!(error = %error, "interaction check response unparseable");
                Ok(Vec::new())
            }
        }
    }

    /// Free-text answer to a patient question about an approved prescription.
    pub async fn answer_prescription_query(&self, query: &PrescriptionQuery) -> Result<String> {
        let medication_lines: Vec<String> = query
            .prescription
            .medications
            .iter()
            .map(|medication| {
                format!(
                    "- {} ({}, {})",
                    medication.name, medication.dosage, medication.frequency
                )
            })
            .collect();
        let prompt = format!(
            "As a professional pharmacist, answer the patient's question using the \
prescription below. Be professional, accurate, easy to understand, and do NOT offer new \
medical advice or diagnoses.\n\
Current prescription:\n{medications}\n\
Instructions: {instructions}\n\
Notes / follow-up: {notes}\n\
Patient's question: \"{question}\"\n\
Answer the question directly. If it falls outside a pharmacist's scope (for example \
diagnostic detail), advise the patient to ask the doctor. Keep the reply concise.",
            medications = medication_lines.join("\n"),
            instructions = if query.prescription.instructions.is_empty() {
                "follow the doctor's advice".to_string()
            } else {
                query.prescription.instructions.join("; ")
            },
            notes = if query.prescription.notes.is_empty() {
                "no special notes"
            } else {
                &query.prescription.notes
            },
            question = query.query,
        );

        let answer = self
            .generation
            .generate(&prompt, QUERY_SYSTEM_MESSAGE, 0.3, 250)
            .await
            .context("prescription query call failed")?;

        self.memory.append_conversation(
            &query.patient_id,
            "pharmacist",
            &answer,
            BTreeMap::from([("session_id".to_string(), json!(query.session_id.clone()))]),
        )?;
        Ok(answer)
    }
}

fn truncate_chars(text: &str, cap: usize) -> String {
    match text.char_indices().nth(cap) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_config::MemoryConfig;
    use clinic_core::{DiagnosisInfo, Medication};
    use clinic_llm::ScriptedService;
    use clinic_memory::{Horizon, JsonDocumentStore};
    use ulid::Ulid;

    struct Fixture {
        pharmacist: Pharmacist,
        memory: Arc<MemorySystem>,
        service: Arc<ScriptedService>,
    }

    fn make_fixture() -> Fixture {
        let dir = std::env::temp_dir().join(format!("clinic-pharmacist-test-{}", Ulid::new()));
        let store = Arc::new(JsonDocumentStore::new(dir.join("memory.json")));
        let service = Arc::new(ScriptedService::new());
        let memory = Arc::new(MemorySystem::new(
            store,
            service.clone(),
            MemoryConfig::default(),
        ));
        let pharmacist = Pharmacist::new(memory.clone(), service.clone());
        Fixture {
            pharmacist,
            memory,
            service,
        }
    }

    fn prescription() -> Prescription {
        Prescription {
            medications: vec![Medication {
                name: "amoxicillin".to_string(),
                dosage: "500mg".to_string(),
                frequency: "three times daily".to_string(),
                duration: Some("7 days".to_string()),
                purpose: None,
            }],
            instructions: vec!["take with food".to_string()],
            notes: "finish the full course".to_string(),
            pharmacist_notes: None,
        }
    }

    fn review_request() -> ReviewRequest {
        ReviewRequest {
            patient_id: "p-1".to_string(),
            diagnosis: Some(DiagnosisInfo {
                condition: "bacterial sinusitis".to_string(),
                explanation: "persistent purulent discharge".to_string(),
                severity: "moderate".to_string(),
                diagnostic_tests: vec![],
            }),
            prescription: prescription(),
        }
    }

    #[tokio::test]
    async fn test_approval_annotates_pharmacist_notes() {
        let fx = make_fixture();
        fx.service.push_reply(
            r#"{"valid": true, "issues": [], "warnings": [], "recommendations": ["take probiotics alongside"], "notes": "sound prescription"}"#,
        );

        let outcome = fx.pharmacist.review(&review_request()).await.unwrap();
        let ReviewOutcome::Approved {
            prescription,
            notes,
        } = outcome
        else {
            panic!("expected approval");
        };
        assert!(notes.contains("sound prescription"));
        assert!(
            prescription
                .pharmacist_notes
                .unwrap()
                .contains("take probiotics alongside")
        );

        let entries = fx
            .memory
            .query_memory("p-1", Some("prescription_review"), Horizon::All)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].payload["approved"], true);
    }

    #[tokio::test]
    async fn test_issues_override_valid_claim() {
        let fx = make_fixture();
        // The raw output claims validity while listing issues; issues win.
        fx.service.push_reply(
            r#"{"valid": true, "issues": ["dose too high for adults"], "warnings": [], "recommendations": [], "notes": ""}"#,
        );

        let outcome = fx.pharmacist.review(&review_request()).await.unwrap();
        let ReviewOutcome::Rejected { issues, message, .. } = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(issues, vec!["dose too high for adults".to_string()]);
        assert!(message.contains("dose too high for adults"));
    }

    #[tokio::test]
    async fn test_unparseable_feedback_is_deterministic_rejection() {
        let fx = make_fixture();
        fx.service
            .push_reply("The prescription looks fine to me, ship it!");

        let outcome = fx.pharmacist.review(&review_request()).await.unwrap();
        let ReviewOutcome::Rejected { issues, .. } = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(issues, vec![CANNOT_PARSE_REVIEW_ISSUE.to_string()]);
    }

    #[tokio::test]
    async fn test_missing_valid_field_is_rejection() {
        let fx = make_fixture();
        fx.service.push_reply(r#"{"issues": [], "notes": "looks ok"}"#);

        let outcome = fx.pharmacist.review(&review_request()).await.unwrap();
        assert!(matches!(outcome, ReviewOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_service_failure_is_rejection_not_error() {
        let fx = make_fixture();
        fx.service.push_failure("backend down");

        let outcome = fx.pharmacist.review(&review_request()).await.unwrap();
        let ReviewOutcome::Rejected { issues, .. } = outcome else {
            panic!("expected rejection");
        };
        assert_eq!(
            issues,
            vec!["prescription review service unavailable".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_prescription_rejected_without_service_call() {
        let fx = make_fixture();
        let request = ReviewRequest {
            patient_id: "p-1".to_string(),
            diagnosis: None,
            prescription: Prescription::default(),
        };
        let outcome = fx.pharmacist.review(&request).await.unwrap();
        assert!(matches!(outcome, ReviewOutcome::Rejected { .. }));
        assert!(fx.service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_drug_info_lookup() {
        let fx = make_fixture();
        fx.service.push_reply(
            r#"{"drug_name": "ibuprofen", "description": "NSAID analgesic", "common_uses": ["pain"], "common_dosage": "200-400mg"}"#,
        );

        let info = fx.pharmacist.drug_info("ibuprofen").await.unwrap();
        assert_eq!(info.drug_name, "ibuprofen");
        assert_eq!(info.common_uses, vec!["pain".to_string()]);
        assert!(info.error.is_none());
    }

    #[tokio::test]
    async fn test_interaction_check_short_circuits_and_degrades() {
        let fx = make_fixture();

        // One drug (after dedup): no call at all.
        let interactions = fx
            .pharmacist
            .check_interactions(&["aspirin".to_string(), " aspirin ".to_string()])
            .await
            .unwrap();
        assert!(interactions.is_empty());
        assert!(fx.service.calls().is_empty());

        // Unparseable response degrades to the empty list.
        fx.service.push_reply("no structured data here");
        let interactions = fx
            .pharmacist
            .check_interactions(&["aspirin".to_string(), "warfarin".to_string()])
            .await
            .unwrap();
        assert!(interactions.is_empty());

        // A real interaction list parses through prose.
        fx.service.push_reply(
            "Found these:\n[{\"drug_pair\": [\"aspirin\", \"warfarin\"], \"severity\": \"severe\", \"description\": \"bleeding risk\", \"recommendation\": \"avoid combination\"}]",
        );
        let interactions = fx
            .pharmacist
            .check_interactions(&["aspirin".to_string(), "warfarin".to_string()])
            .await
            .unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].severity, "severe");
    }

    #[tokio::test]
    async fn test_prescription_query_answer_is_audited() {
        let fx = make_fixture();
        fx.service
            .push_reply("Take it three times a day after meals.");

        let answer = fx
            .pharmacist
            .answer_prescription_query(&PrescriptionQuery {
                session_id: "web-1".to_string(),
                patient_id: "p-1".to_string(),
                query: "when should I take it?".to_string(),
                prescription: prescription(),
            })
            .await
            .unwrap();
        assert!(answer.contains("three times"));

        let audit = fx
            .memory
            .get_conversation("p-1", None, Some(&["pharmacist"]))
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].metadata["session_id"], "web-1");
    }
}
