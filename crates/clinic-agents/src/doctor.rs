//! Interactive diagnosis loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use clinic_config::DoctorConfig;
use clinic_core::{
    ClinicError, ConsultationContext, Diagnosis, DiagnoseRequest, PatientResponse, Prescription,
    PrescriptionRequest, Stage,
};
use clinic_llm::{GenerationService, extract};
use clinic_memory::MemorySystem;

const QUESTION_FALLBACK: &str =
    "Could you describe the thing that bothers you most in more detail? Any other symptoms?";

const QUESTION_SYSTEM_MESSAGE: &str = "You are a professional physician conducting an \
interactive consultation. Ask the single most useful next question, precisely and briefly.";
const ANALYSIS_SYSTEM_MESSAGE: &str = "You are a medical information extraction assistant. \
Analyze the doctor-patient exchange carefully and answer with the requested JSON.";
const DIAGNOSIS_SYSTEM_MESSAGE: &str = "You are a senior physician completing a diagnosis. \
Provide a professional, concise, structured result in JSON.";

const DIAGNOSIS_COMPLETE_MESSAGE: &str = "Thank you for your cooperation. Based on the \
information you provided, I have completed a preliminary diagnosis.";

/// What the generation service extracted from one patient answer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnswerAnalysis {
    pub new_symptoms: Vec<String>,
    pub symptom_details: BTreeMap<String, String>,
    pub negated_symptoms: Vec<String>,
    pub related_info: BTreeMap<String, String>,
    pub confidence_delta: f64,
}

#[derive(Debug, Clone)]
pub enum DoctorReply {
    /// The loop continues: ask the patient this question.
    Question { question: String },
    /// Terminal: the diagnosis is made and the context has been deleted.
    DiagnosisComplete {
        diagnosis: Diagnosis,
        message: String,
    },
}

pub struct Doctor {
    memory: Arc<MemorySystem>,
    generation: Arc<dyn GenerationService>,
    config: DoctorConfig,
}

impl Doctor {
    pub fn new(
        memory: Arc<MemorySystem>,
        generation: Arc<dyn GenerationService>,
        config: DoctorConfig,
    ) -> Self {
        Self {
            memory,
            generation,
            config,
        }
    }

    /// Take over the session from reception and ask the first question.
    pub async fn start_consultation(&self, request: &DiagnoseRequest) -> Result<DoctorReply> {
        let previous = self.memory.get_context(&request.session_id)?;

        let mut context = ConsultationContext::new(&request.session_id, &request.patient_id);
        context.stage = Stage::InformationGathering;
        context.confidence = self.config.initial_confidence;
        context.initial_symptoms = request.symptoms.clone();
        context.add_symptoms(request.symptoms.iter().cloned());
        context.medical_history = request.medical_history.clone();
        context.department = Some(request.department.clone());
        context.is_return_visit = request.is_return_visit;
        context.reception_notes = request.reception_notes.clone();

        // Reception state that must survive the hand-off.
        if let Some(previous) = previous {
            context.identity_asked = previous.identity_asked;
            context.identity_confirmed = previous.identity_confirmed;
            context.phone_provided = previous.phone_provided;
            context.conversation_snippets = previous.conversation_snippets;
            context.interaction_log = previous.interaction_log;
        }

        let first_question = self.generate_question(&context).await;
        context.questions_asked.push(first_question.clone());
        self.memory.save_context(&context)?;

        self.memory.append_memory(
            &request.patient_id,
            "consultation_started",
            json!({
                "session_id": &request.session_id,
                "symptoms": &request.symptoms,
                "department": &request.department,
            }),
            BTreeMap::new(),
        )?;
        self.memory.append_conversation(
            &request.patient_id,
            "doctor",
            &first_question,
            conversation_metadata(&request.session_id),
        )?;

        info!(
            session_id = %request.session_id,
            patient_id = %request.patient_id,
            department = %request.department,
            "consultation started"
        );
        Ok(DoctorReply::Question {
            question: first_question,
        })
    }

    /// Consume one patient answer: analyze it, then either diagnose or ask
    /// the next question.
    pub async fn handle_patient_response(
        &self,
        response: &PatientResponse,
    ) -> Result<DoctorReply> {
        if response.answer.trim().is_empty() {
            return Err(ClinicError::EmptyReply(response.session_id.clone()).into());
        }

        let mut context = self
            .memory
            .get_context(&response.session_id)?
            .ok_or_else(|| ClinicError::SessionExpired(response.session_id.clone()))?;

        self.memory.append_conversation(
            &context.patient_id,
            "patient",
            &response.answer,
            conversation_metadata(&response.session_id),
        )?;
        context.patient_responses.push(response.answer.clone());

        let last_question = context
            .questions_asked
            .last()
            .cloned()
            .unwrap_or_else(|| "no prior question".to_string());
        let analysis = self.analyze_answer(&last_question, &response.answer).await;

        context.add_symptoms(analysis.new_symptoms);
        context.symptom_details.extend(analysis.symptom_details);
        context.related_info.extend(analysis.related_info);
        if !analysis.negated_symptoms.is_empty() {
            debug!(negated = ?analysis.negated_symptoms, "patient denied symptoms");
        }
        context.bump_confidence(analysis.confidence_delta.clamp(0.0, 0.2));

        info!(
            session_id = %response.session_id,
            confidence = format!("{:.2}", context.confidence),
            questions = context.questions_asked.len(),
            symptoms = context.extracted_symptoms.len(),
            "patient answer analyzed"
        );

        if self.can_diagnose(&context) {
            let symptoms: Vec<String> = context.extracted_symptoms.iter().cloned().collect();
            let diagnosis = match self
                .generate_diagnosis(&symptoms, &context.medical_history, context.department.as_deref())
                .await
            {
                Ok(diagnosis) => diagnosis,
                Err(error) => {
                    // A diagnosis that cannot be produced at all ends the
                    // consultation.
                    self.memory.delete_context(&response.session_id)?;
                    return Err(error.context("diagnosis generation failed"));
                }
            };

            self.memory.append_memory(
                &context.patient_id,
                "diagnosis",
                serde_json::to_value(&diagnosis).context("failed to serialize diagnosis")?,
                BTreeMap::from([(
                    "session_id".to_string(),
                    json!(response.session_id.clone()),
                )]),
            )?;
            self.memory.delete_context(&response.session_id)?;

            info!(
                session_id = %response.session_id,
                condition = %diagnosis.condition,
                "diagnosis complete"
            );
            return Ok(DoctorReply::DiagnosisComplete {
                diagnosis,
                message: DIAGNOSIS_COMPLETE_MESSAGE.to_string(),
            });
        }

        let next_question = self.generate_question(&context).await;
        context.questions_asked.push(next_question.clone());
        self.memory.update_context(&context)?;
        self.memory.append_conversation(
            &context.patient_id,
            "doctor",
            &next_question,
            conversation_metadata(&response.session_id),
        )?;
        Ok(DoctorReply::Question {
            question: next_question,
        })
    }

    /// Turn an existing diagnosis into a prescription record without running
    /// the interactive loop.
    pub fn handle_prescription_request(
        &self,
        request: &PrescriptionRequest,
    ) -> Result<Prescription> {
        let prescription = request.diagnosis.to_prescription();

        let mut metadata = BTreeMap::from([(
            "based_on_diagnosis".to_string(),
            json!(request.diagnosis.condition.clone()),
        )]);
        if let Some(session_id) = &request.session_id {
            metadata.insert("session_id".to_string(), json!(session_id.clone()));
        }
        self.memory.append_memory(
            &request.patient_id,
            "prescription_generated",
            serde_json::to_value(&prescription).context("failed to serialize prescription")?,
            metadata,
        )?;
        Ok(prescription)
    }

    /// Stopping policy: enough confidence, or enough questions, or both past
    /// their softer floors.
    fn can_diagnose(&self, context: &ConsultationContext) -> bool {
        let questions = context.questions_asked.len();
        if context.confidence >= self.config.min_confidence {
            return true;
        }
        if questions >= self.config.max_questions {
            return true;
        }
        questions >= self.config.force_after_questions
            && context.confidence > self.config.force_confidence_floor
    }

    async fn generate_question(&self, context: &ConsultationContext) -> String {
        let symptoms: Vec<String> = context.extracted_symptoms.iter().cloned().collect();
        let prompt = format!(
            "As a professional physician, generate the next targeted question for this \
consultation:\n\
Initial symptoms: {initial}\n\
Known symptoms so far: {current}\n\
Medical history: {history}\n\
Department: {department}\n\
Questions already asked: {questions}\n\
Patient answers so far: {answers}\n\
Current diagnostic confidence: {confidence:.2}\n\
Return visit: {return_visit}\n\
{notes}\n\
Generate one professional, targeted question that digs deeper based on what is already \
known and avoids repetition.\n\n\
Return only the question text, nothing else.",
            initial = context.initial_symptoms.join(", "),
            current = symptoms.join(", "),
            history = context.medical_history.join(", "),
            department = context.department.as_deref().unwrap_or("unknown"),
            questions = serde_json::to_string(&context.questions_asked).unwrap_or_default(),
            answers = serde_json::to_string(&context.patient_responses).unwrap_or_default(),
            confidence = context.confidence,
            return_visit = context.is_return_visit,
            notes = context
                .reception_notes
                .as_deref()
                .map(|notes| format!("Reception notes: {notes}"))
                .unwrap_or_default(),
        );

        match self
            .generation
            .generate(&prompt, QUESTION_SYSTEM_MESSAGE, 0.6, 800)
            .await
        {
            Ok(question) => question.trim().to_string(),
            Err(error) => {
                warn!(
                    session_id = %context.session_id,
                    error = %error,
                    "question generation failed, using canned question"
                );
                QUESTION_FALLBACK.to_string()
            }
        }
    }

    /// Analysis failures never abort the turn; they contribute nothing.
    async fn analyze_answer(&self, question: &str, answer: &str) -> AnswerAnalysis {
        let prompt = format!(
            "As a medical information analyst, analyze the patient's answer to the \
following question and extract the key information:\n\n\
Doctor's question: \"{question}\"\n\
Patient's answer: \"{answer}\"\n\n\
Respond strictly as JSON with these fields:\n\
- \"new_symptoms\": newly mentioned symptoms (list of strings).\n\
- \"symptom_details\": details or confirmations of known symptoms (string map).\n\
- \"negated_symptoms\": symptoms the patient explicitly denied (list of strings).\n\
- \"related_info\": other possibly relevant non-symptom information (string map).\n\
- \"confidence_delta\": estimated diagnostic confidence gain from this answer \
(float between 0.0 and 0.2).\n\n\
Use an empty list [] or empty object {{}} for anything that cannot be extracted. Keep \
the JSON well-formed."
        );

        let response = match self
            .generation
            .generate(&prompt, ANALYSIS_SYSTEM_MESSAGE, 0.1, 300)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "answer analysis call failed");
                return AnswerAnalysis::default();
            }
        };

        match extract::parse_object::<AnswerAnalysis>(&response) {
            Ok(analysis) => analysis,
            Err(error) => {
                warn!(error = %error, "answer analysis response unparseable");
                AnswerAnalysis::default()
            }
        }
    }

    /// Generate the terminal diagnosis. A generation failure propagates; a
    /// parse failure degrades to field-by-field regex extraction so truncated
    /// JSON still yields a reduced-fidelity diagnosis.
    async fn generate_diagnosis(
        &self,
        symptoms: &[String],
        medical_history: &[String],
        department: Option<&str>,
    ) -> Result<Diagnosis> {
        let prompt = format!(
            "As a professional physician, produce a diagnosis from the information below:\n\
Symptoms: {symptoms}\n\
Medical history: {history}\n\
Department: {department}\n\n\
Respond as JSON with these fields:\n\
- \"condition\": the diagnosis\n\
- \"explanation\": explanation of the diagnosis\n\
- \"severity\": severity assessment\n\
- \"recommendations\": list of recommended measures\n\
- \"medications\": list of medications, each with name, dosage, frequency, purpose\n\
- \"follow_up\": follow-up advice\n\
- \"differential_diagnosis\": differential diagnoses (optional list)\n\
- \"diagnostic_tests\": recommended tests (optional list)\n\n\
Keep the JSON concise and complete; avoid long values that could truncate the \
output. Keep each value under 50 words and lists under 5 items.",
            symptoms = if symptoms.is_empty() {
                "not provided".to_string()
            } else {
                symptoms.join(", ")
            },
            history = if medical_history.is_empty() {
                "none".to_string()
            } else {
                medical_history.join(", ")
            },
            department = department.unwrap_or("general practice"),
        );

        let response = self
            .generation
            .generate(&prompt, DIAGNOSIS_SYSTEM_MESSAGE, 0.3, 1000)
            .await
            .context("diagnosis generation call failed")?;

        match extract::parse_object::<Diagnosis>(&response) {
            Ok(diagnosis) => Ok(diagnosis),
            Err(error) => {
                warn!(%error, "diagnosis JSON unparseable, degrading to field extraction");
                Ok(fallback_diagnosis(&response))
            }
        }
    }
}

/// Reduced-fidelity diagnosis recovered field-by-field from broken JSON.
fn fallback_diagnosis(response: &str) -> Diagnosis {
    Diagnosis {
        condition: extract::string_field(response, "condition")
            .unwrap_or_else(|| "condition could not be determined".to_string()),
        explanation: extract::string_field(response, "explanation")
            .unwrap_or_else(|| "assessment based on reported symptoms".to_string()),
        severity: extract::string_field(response, "severity")
            .unwrap_or_else(|| "requires further evaluation".to_string()),
        recommendations: extract::string_list(response, "recommendations")
            .unwrap_or_else(|| vec!["follow the doctor's advice".to_string()]),
        // Medications are never recovered from broken output.
        medications: Vec::new(),
        follow_up: "please return once complete test results are available".to_string(),
        differential_diagnosis: extract::string_list(response, "differential_diagnosis")
            .unwrap_or_default(),
        diagnostic_tests: vec!["further tests recommended to confirm the diagnosis".to_string()],
    }
}

fn conversation_metadata(session_id: &str) -> BTreeMap<String, Value> {
    BTreeMap::from([("session_id".to_string(), json!(session_id))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_config::MemoryConfig;
    use clinic_llm::ScriptedService;
    use clinic_memory::{Horizon, JsonDocumentStore};
    use ulid::Ulid;

    struct Fixture {
        doctor: Doctor,
        memory: Arc<MemorySystem>,
        service: Arc<ScriptedService>,
    }

    fn make_fixture() -> Fixture {
        let dir = std::env::temp_dir().join(format!("clinic-doctor-test-{}", Ulid::new()));
        let store = Arc::new(JsonDocumentStore::new(dir.join("memory.json")));
        let service = Arc::new(ScriptedService::new());
        let memory = Arc::new(MemorySystem::new(
            store,
            service.clone(),
            MemoryConfig::default(),
        ));
        let doctor = Doctor::new(memory.clone(), service.clone(), DoctorConfig::default());
        Fixture {
            doctor,
            memory,
            service,
        }
    }

    fn diagnose_request(session: &str, patient: &str) -> DiagnoseRequest {
        DiagnoseRequest {
            session_id: session.to_string(),
            patient_id: patient.to_string(),
            symptoms: vec!["headache".to_string()],
            medical_history: vec![],
            department: "neurology".to_string(),
            is_return_visit: false,
            reception_notes: None,
        }
    }

    fn patient_response(session: &str, patient: &str, answer: &str) -> PatientResponse {
        PatientResponse {
            session_id: session.to_string(),
            patient_id: patient.to_string(),
            answer: answer.to_string(),
        }
    }

    fn analysis_json(delta: f64) -> String {
        format!(
            r#"{{"new_symptoms": [], "symptom_details": {{}}, "negated_symptoms": [], "related_info": {{}}, "confidence_delta": {delta}}}"#
        )
    }

    fn diagnosis_json() -> &'static str {
        r#"{
            "condition": "tension headache",
            "explanation": "consistent with stress-related muscle tension",
            "severity": "mild",
            "recommendations": ["rest", "hydration"],
            "medications": [{"name": "ibuprofen", "dosage": "200mg", "frequency": "every 8 hours"}],
            "follow_up": "return if symptoms persist beyond a week"
        }"#
    }

    #[tokio::test]
    async fn test_start_consultation_asks_first_question() {
        let fx = make_fixture();
        fx.service.push_reply("How long have you had the headache?");

        let reply = fx
            .doctor
            .start_consultation(&diagnose_request("web-1", "p-1"))
            .await
            .unwrap();
        match reply {
            DoctorReply::Question { question } => {
                assert_eq!(question, "How long have you had the headache?");
            }
            other => panic!("expected question, got {other:?}"),
        }

        let context = fx.memory.get_context("web-1").unwrap().unwrap();
        assert_eq!(context.stage, Stage::InformationGathering);
        assert_eq!(context.questions_asked.len(), 1);
        assert!((context.confidence - 0.3).abs() < f64::EPSILON);

        let started = fx
            .memory
            .query_memory("p-1", Some("consultation_started"), Horizon::All)
            .unwrap();
        assert_eq!(started.len(), 1);
    }

    #[tokio::test]
    async fn test_first_question_falls_back_on_generation_failure() {
        let fx = make_fixture();
        fx.service.push_failure("backend down");

        let reply = fx
            .doctor
            .start_consultation(&diagnose_request("web-1", "p-1"))
            .await
            .unwrap();
        match reply {
            DoctorReply::Question { question } => assert_eq!(question, QUESTION_FALLBACK),
            other => panic!("expected question, got {other:?}"),
        }
    }

    /// Confidence path 0.3 -> 0.5 -> 0.7 -> 0.8: the loop must stop on the
    /// third answer, after exactly three questions.
    #[tokio::test]
    async fn test_stops_on_third_turn_for_rising_confidence() {
        let fx = make_fixture();
        fx.service.push_reply("question 1");
        fx.doctor
            .start_consultation(&diagnose_request("web-1", "p-1"))
            .await
            .unwrap();

        // Answer 1: 0.3 + 0.2 = 0.5 -> continue, question 2.
        fx.service.push_reply(analysis_json(0.2));
        fx.service.push_reply("question 2");
        let reply = fx
            .doctor
            .handle_patient_response(&patient_response("web-1", "p-1", "it started yesterday"))
            .await
            .unwrap();
        assert!(matches!(reply, DoctorReply::Question { .. }));

        // Answer 2: 0.5 + 0.2 = 0.7 -> continue, question 3.
        fx.service.push_reply(analysis_json(0.2));
        fx.service.push_reply("question 3");
        let reply = fx
            .doctor
            .handle_patient_response(&patient_response("web-1", "p-1", "mostly behind the eyes"))
            .await
            .unwrap();
        assert!(matches!(reply, DoctorReply::Question { .. }));

        // Answer 3: 0.7 + 0.1 = 0.8 >= 0.75 -> diagnose.
        fx.service.push_reply(analysis_json(0.1));
        fx.service.push_reply(diagnosis_json());
        let reply = fx
            .doctor
            .handle_patient_response(&patient_response("web-1", "p-1", "no other symptoms"))
            .await
            .unwrap();
        let DoctorReply::DiagnosisComplete { diagnosis, .. } = reply else {
            panic!("expected diagnosis on the third turn");
        };
        assert_eq!(diagnosis.condition, "tension headache");

        // Terminal: context deleted, durable diagnosis entry appended.
        assert!(fx.memory.get_context("web-1").unwrap().is_none());
        let entries = fx
            .memory
            .query_memory("p-1", Some("diagnosis"), Horizon::All)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(fx.service.remaining(), 0);
    }

    #[tokio::test]
    async fn test_question_count_forces_diagnosis() {
        let fx = make_fixture();
        fx.service.push_reply("question 1");
        fx.doctor
            .start_consultation(&diagnose_request("web-1", "p-1"))
            .await
            .unwrap();

        // Zero-confidence answers: stop is driven purely by question count.
        for i in 2..=5 {
            fx.service.push_reply(analysis_json(0.0));
            fx.service.push_reply(format!("question {i}"));
            let reply = fx
                .doctor
                .handle_patient_response(&patient_response("web-1", "p-1", "hmm"))
                .await
                .unwrap();
            assert!(
                matches!(reply, DoctorReply::Question { .. }),
                "should still be asking at question {i}"
            );
        }

        // Five questions asked: the next answer must produce a diagnosis.
        fx.service.push_reply(analysis_json(0.0));
        fx.service.push_reply(diagnosis_json());
        let reply = fx
            .doctor
            .handle_patient_response(&patient_response("web-1", "p-1", "still unsure"))
            .await
            .unwrap();
        assert!(matches!(reply, DoctorReply::DiagnosisComplete { .. }));
    }

    #[tokio::test]
    async fn test_analysis_failure_contributes_nothing() {
        let fx = make_fixture();
        fx.service.push_reply("question 1");
        fx.doctor
            .start_consultation(&diagnose_request("web-1", "p-1"))
            .await
            .unwrap();

        fx.service.push_reply("I am not JSON at all");
        fx.service.push_reply("question 2");
        let reply = fx
            .doctor
            .handle_patient_response(&patient_response("web-1", "p-1", "some answer"))
            .await
            .unwrap();
        assert!(matches!(reply, DoctorReply::Question { .. }));

        let context = fx.memory.get_context("web-1").unwrap().unwrap();
        assert!((context.confidence - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_confidence_delta_clamped_to_band() {
        let fx = make_fixture();
        fx.service.push_reply("question 1");
        fx.doctor
            .start_consultation(&diagnose_request("web-1", "p-1"))
            .await
            .unwrap();

        // Out-of-band delta claims only count as 0.2.
        fx.service.push_reply(analysis_json(0.9));
        fx.service.push_reply("question 2");
        fx.doctor
            .handle_patient_response(&patient_response("web-1", "p-1", "everything hurts"))
            .await
            .unwrap();

        let context = fx.memory.get_context("web-1").unwrap().unwrap();
        assert!((context.confidence - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_truncated_diagnosis_degrades_to_partial() {
        let fx = make_fixture();
        let fx = Fixture {
            doctor: Doctor::new(
                fx.memory.clone(),
                fx.service.clone(),
                DoctorConfig {
                    min_confidence: 0.4,
                    ..DoctorConfig::default()
                },
            ),
            memory: fx.memory,
            service: fx.service,
        };
        fx.service.push_reply("question 1");
        fx.doctor
            .start_consultation(&diagnose_request("web-1", "p-1"))
            .await
            .unwrap();

        fx.service.push_reply(analysis_json(0.2));
        // Unterminated string in a non-critical field.
        fx.service.push_reply(
            r#"{"condition": "migraine", "explanation": "recurring unilateral", "severity": "moderate", "recommendations": ["rest"], "diagnostic_tests": ["MRI of the he"#,
        );
        let reply = fx
            .doctor
            .handle_patient_response(&patient_response("web-1", "p-1", "light makes it worse"))
            .await
            .unwrap();

        let DoctorReply::DiagnosisComplete { diagnosis, .. } = reply else {
            panic!("expected degraded diagnosis");
        };
        assert_eq!(diagnosis.condition, "migraine");
        assert_eq!(diagnosis.severity, "moderate");
        assert_eq!(diagnosis.recommendations, vec!["rest".to_string()]);
        assert!(diagnosis.medications.is_empty());
    }

    #[tokio::test]
    async fn test_diagnosis_generation_failure_is_terminal() {
        let fx = make_fixture();
        // Lower the confidence bar so one answer reaches the diagnosis step.
        let doctor = Doctor::new(
            fx.memory.clone(),
            fx.service.clone(),
            DoctorConfig {
                min_confidence: 0.4,
                ..DoctorConfig::default()
            },
        );
        fx.service.push_reply("question 1");
        doctor
            .start_consultation(&diagnose_request("web-1", "p-1"))
            .await
            .unwrap();

        fx.service.push_reply(analysis_json(0.2));
        fx.service.push_failure("backend down");
        let result = doctor
            .handle_patient_response(&patient_response("web-1", "p-1", "it is very bad"))
            .await;
        assert!(result.is_err());
        assert!(fx.memory.get_context("web-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_and_empty_answer() {
        let fx = make_fixture();
        let error = fx
            .doctor
            .handle_patient_response(&patient_response("web-ghost", "p-1", "hello"))
            .await
            .unwrap_err();
        assert!(
            error
                .downcast_ref::<ClinicError>()
                .is_some_and(|err| matches!(err, ClinicError::SessionExpired(_)))
        );

        let error = fx
            .doctor
            .handle_patient_response(&patient_response("web-1", "p-1", "   "))
            .await
            .unwrap_err();
        assert!(
            error
                .downcast_ref::<ClinicError>()
                .is_some_and(|err| matches!(err, ClinicError::EmptyReply(_)))
        );
    }

    #[tokio::test]
    async fn test_prescription_request_appends_memory() {
        let fx = make_fixture();
        let diagnosis: Diagnosis = serde_json::from_str(diagnosis_json()).unwrap();
        let prescription = fx
            .doctor
            .handle_prescription_request(&PrescriptionRequest {
                patient_id: "p-1".to_string(),
                session_id: Some("web-1".to_string()),
                diagnosis,
            })
            .unwrap();

        assert_eq!(prescription.medications.len(), 1);
        let entries = fx
            .memory
            .query_memory("p-1", Some("prescription_generated"), Horizon::All)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata["session_id"], "web-1");
    }
}
