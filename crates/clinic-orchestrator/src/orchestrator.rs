//! Top-level router for the consultation workflow.
//!
//! The orchestrator owns no long-lived state: every turn rehydrates the
//! consultation context from the store, dispatches to whichever role owns the
//! current stage, persists the result, and translates the role outcome into
//! the caller-facing response envelope. When a role signals terminal
//! completion the next role is chained synchronously within the same call
//! (reception -> doctor -> pharmacist).

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{error, info, warn};
use ulid::Ulid;

use clinic_agents::{
    Doctor, DoctorReply, Pharmacist, Receptionist, ReceptionOutcome, ReceptionistReply,
    ReviewOutcome, intake,
};
use clinic_config::Settings;
use clinic_core::{
    ClinicError, ConsultationContext, Diagnosis, DiagnoseRequest, DiagnosisInfo, FollowupQuery,
    InboundMessage, InteractionEvent, PatientResponse, PrescriptionQuery, ReceptionRequest,
    RequestContent, ResponseEnvelope, ResponseStatus, ReviewRequest, Stage,
};
use clinic_llm::GenerationService;
use clinic_memory::MemorySystem;

/// Opening message issued with every new session id.
pub const GREETING: &str = "Hello, welcome to the clinic's online consultation service. To \
help you better, please describe your main symptoms, and if convenient, your age.";

const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired or is no longer valid. \
Please start a new consultation.";
const EMPTY_MESSAGE_REPLY: &str = "Your message was empty. Please describe your symptoms \
or question.";
const INTERNAL_ERROR_MESSAGE: &str =
    "An internal error occurred while processing your request. Please try again later.";
const NO_PRESCRIPTION_MESSAGE: &str =
    "I cannot answer that: there is no prescription associated with this consultation.";

pub struct Orchestrator {
    memory: Arc<MemorySystem>,
    receptionist: Receptionist,
    doctor: Doctor,
    pharmacist: Pharmacist,
}

impl Orchestrator {
    pub fn new(
        memory: Arc<MemorySystem>,
        generation: Arc<dyn GenerationService>,
        settings: &Settings,
    ) -> Self {
        let receptionist = Receptionist::new(
            memory.clone(),
            generation.clone(),
            settings.reception.clone(),
            settings.triage.clone(),
        );
        let doctor = Doctor::new(memory.clone(), generation.clone(), settings.doctor.clone());
        let pharmacist = Pharmacist::new(memory.clone(), generation);
        Self {
            memory,
            receptionist,
            doctor,
            pharmacist,
        }
    }

    /// Issue a fresh session id and the opening message. Nothing is persisted
    /// until the first inbound message arrives.
    pub fn start_session(&self) -> (String, String) {
        let session_id = format!("web-{}", Ulid::new());
        info!(%session_id, "starting new consultation session");
        (session_id, GREETING.to_string())
    }

    /// Handle one inbound user turn and produce the response envelope.
    pub async fn handle_message(&self, session_id: &str, user_message: &str) -> ResponseEnvelope {
        if session_id.trim().is_empty() {
            return ResponseEnvelope::error("", ClinicError::MissingSessionId.to_string());
        }
        if user_message.trim().is_empty() {
            return ResponseEnvelope::error(session_id, EMPTY_MESSAGE_REPLY);
        }

        let context = match self.memory.get_context(session_id) {
            Ok(context) => context,
            Err(storage_error) => {
                error!(session_id, error = %storage_error, "failed to load context");
                return ResponseEnvelope::error(session_id, INTERNAL_ERROR_MESSAGE);
            }
        };

        let envelope = match context {
            Some(context) => {
                self.log_event(
                    session_id,
                    "user",
                    "system",
                    "user message",
                    Some(snippet(user_message)),
                );
                self.route_existing(context, session_id, user_message).await
            }
            None => self.first_turn(session_id, user_message).await,
        };

        self.finalize(session_id, envelope)
    }

    /// Dispatch a fully formed inbound envelope by its request kind.
    ///
    /// This is the typed boundary for callers that speak the message-envelope
    /// protocol directly (as opposed to [`Self::handle_message`], which wraps
    /// raw user text). Matching is exhaustive: an unknown request key already
    /// failed at deserialization.
    pub async fn dispatch(&self, message: InboundMessage) -> ResponseEnvelope {
        let session_id = message.session_id.clone();
        info!(
            session_id = %session_id,
            kind = message.content.kind(),
            role = %message.role,
            "dispatching inbound envelope"
        );

        let envelope = match message.content {
            RequestContent::ReceptionRequest(request) => {
                match self.receptionist.handle_reception_request(&request).await {
                    Ok(reply) => match self.memory.get_context(&session_id).ok().flatten() {
                        Some(context) => {
                            self.map_reception_reply(&session_id, reply, &context).await
                        }
                        None => ResponseEnvelope::error(&session_id, INTERNAL_ERROR_MESSAGE),
                    },
                    Err(role_error) => self.map_role_error(&session_id, role_error),
                }
            }
            RequestContent::FollowupQuery(query) => {
                let context = self.memory.get_context(&session_id).ok().flatten();
                match (self.receptionist.handle_followup(&query).await, context) {
                    (Ok(reply), Some(context)) => {
                        self.map_reception_reply(&session_id, reply, &context).await
                    }
                    (Ok(reply), None) => {
                        ResponseEnvelope::in_progress(&session_id, "receptionist", reply.message)
                    }
                    (Err(role_error), _) => self.map_role_error(&session_id, role_error),
                }
            }
            RequestContent::DiagnoseRequest(request) => {
                match self.doctor.start_consultation(&request).await {
                    Ok(reply) => {
                        let context = self
                            .memory
                            .get_context(&session_id)
                            .ok()
                            .flatten()
                            .unwrap_or_else(|| {
                                ConsultationContext::new(&session_id, &request.patient_id)
                            });
                        self.map_doctor_reply(&session_id, &request.patient_id, reply, &context)
                            .await
                    }
                    Err(role_error) => self.map_role_error(&session_id, role_error),
                }
            }
            RequestContent::PatientResponse(request) => {
                let context = self
                    .memory
                    .get_context(&session_id)
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| ConsultationContext::new(&session_id, &request.patient_id));
                match self.doctor.handle_patient_response(&request).await {
                    Ok(reply) => {
                        self.map_doctor_reply(&session_id, &request.patient_id, reply, &context)
                            .await
                    }
                    Err(role_error) => self.map_role_error(&session_id, role_error),
                }
            }
            RequestContent::PrescriptionRequest(request) => {
                match self.doctor.handle_prescription_request(&request) {
                    Ok(prescription) => ResponseEnvelope {
                        status: ResponseStatus::InfoDisplayed,
                        message: "Prescription generated from the provided diagnosis.".to_string(),
                        agent_type: "doctor".to_string(),
                        session_id: session_id.clone(),
                        prescription: Some(prescription),
                        diagnosis_info: None,
                        interaction_log: Vec::new(),
                    },
                    Err(role_error) => self.map_role_error(&session_id, role_error),
                }
            }
            RequestContent::ReviewRequest(request) => match self.pharmacist.review(&request).await
            {
                Ok(ReviewOutcome::Approved {
                    prescription,
                    notes,
                }) => ResponseEnvelope {
                    status: ResponseStatus::CompletedPrescription,
                    message: notes,
                    agent_type: "pharmacist".to_string(),
                    session_id: session_id.clone(),
                    prescription: Some(prescription),
                    diagnosis_info: request.diagnosis,
                    interaction_log: Vec::new(),
                },
                Ok(ReviewOutcome::Rejected { message, .. }) => ResponseEnvelope {
                    status: ResponseStatus::ErrorPrescriptionRejected,
                    message,
                    agent_type: "pharmacist".to_string(),
                    session_id: session_id.clone(),
                    prescription: None,
                    diagnosis_info: request.diagnosis,
                    interaction_log: Vec::new(),
                },
                Err(role_error) => self.map_role_error(&session_id, role_error),
            },
            RequestContent::DrugInfoRequest(request) => {
                match self.pharmacist.drug_info(&request.drug_name).await {
                    Ok(info) => {
                        let message = match &info.error {
                            Some(reason) => format!(
                                "Sorry, no detailed information was found for \"{}\" ({reason}).",
                                request.drug_name
                            ),
                            None => format!(
                                "{}: {}\nCommon dosage: {}",
                                info.drug_name, info.description, info.common_dosage
                            ),
                        };
                        let mut envelope =
                            ResponseEnvelope::in_progress(&session_id, "pharmacist", message);
                        envelope.status = ResponseStatus::InfoDisplayed;
                        envelope
                    }
                    Err(role_error) => self.map_role_error(&session_id, role_error),
                }
            }
            RequestContent::InteractionCheck(request) => {
                match self.pharmacist.check_interactions(&request.drugs).await {
                    Ok(interactions) if interactions.is_empty() => {
                        let mut envelope = ResponseEnvelope::in_progress(
                            &session_id,
                            "pharmacist",
                            "No significant interactions were found between these drugs.",
                        );
                        envelope.status = ResponseStatus::InfoDisplayed;
                        envelope
                    }
                    Ok(interactions) => {
                        let lines: Vec<String> = interactions
                            .iter()
                            .map(|interaction| {
                                format!(
                                    "- {} ({}): {} [advice: {}]",
                                    interaction.drug_pair.join(" and "),
                                    interaction.severity,
                                    interaction.description,
                                    interaction.recommendation,
                                )
                            })
                            .collect();
                        let mut envelope = ResponseEnvelope::in_progress(
                            &session_id,
                            "pharmacist",
                            format!("Potential drug interactions detected:\n{}", lines.join("\n")),
                        );
                        envelope.status = ResponseStatus::InfoDisplayed;
                        envelope
                    }
                    Err(role_error) => self.map_role_error(&session_id, role_error),
                }
            }
            RequestContent::PrescriptionQuery(query) => {
                match self.pharmacist.answer_prescription_query(&query).await {
                    Ok(answer) => {
                        let mut envelope =
                            ResponseEnvelope::in_progress(&session_id, "pharmacist", answer);
                        envelope.status = ResponseStatus::InfoDisplayed;
                        envelope
                    }
                    Err(role_error) => self.map_role_error(&session_id, role_error),
                }
            }
        };

        self.finalize(&session_id, envelope)
    }

    /// Route a turn for a rehydrated context by its current stage.
    async fn route_existing(
        &self,
        context: ConsultationContext,
        session_id: &str,
        user_message: &str,
    ) -> ResponseEnvelope {
        let patient_id = context.patient_id.clone();
        info!(
            session_id,
            patient_id = %patient_id,
            stage = %context.stage,
            "routing turn"
        );

        match context.stage {
            Stage::InformationGathering => {
                let request = PatientResponse {
                    session_id: session_id.to_string(),
                    patient_id: patient_id.clone(),
                    answer: user_message.to_string(),
                };
                self.log_event(
                    session_id,
                    "orchestrator",
                    "doctor",
                    "forward request",
                    Some("patient_response".to_string()),
                );
                match self.doctor.handle_patient_response(&request).await {
                    Ok(reply) => {
                        self.map_doctor_reply(session_id, &patient_id, reply, &context)
                            .await
                    }
                    Err(role_error) => self.map_role_error(session_id, role_error),
                }
            }
            Stage::PrescriptionReview => {
                let Some(prescription) = context.last_prescription_for_query.clone() else {
                    warn!(session_id, "prescription query without a prescription on file");
                    return ResponseEnvelope::error(session_id, NO_PRESCRIPTION_MESSAGE);
                };
                let query = PrescriptionQuery {
                    session_id: session_id.to_string(),
                    patient_id: patient_id.clone(),
                    query: user_message.to_string(),
                    prescription,
                };
                self.log_event(
                    session_id,
                    "orchestrator",
                    "pharmacist",
                    "forward request",
                    Some("prescription_query".to_string()),
                );
                match self.pharmacist.answer_prescription_query(&query).await {
                    Ok(answer) => ResponseEnvelope {
                        status: ResponseStatus::InfoDisplayed,
                        message: answer,
                        agent_type: "pharmacist".to_string(),
                        session_id: session_id.to_string(),
                        prescription: None,
                        diagnosis_info: None,
                        interaction_log: Vec::new(),
                    },
                    Err(role_error) => {
                        // The prescription stays queryable; do not tear down
                        // the session for a failed answer.
                        warn!(session_id, error = %role_error, "prescription query failed");
                        ResponseEnvelope::error(
                            session_id,
                            "Sorry, I ran into a problem answering your prescription \
question. Please try again or ask the doctor.",
                        )
                    }
                }
            }
            // Reception stages, plus any stage left behind mid-chain, go back
            // to the receptionist.
            _ => {
                let query = FollowupQuery {
                    session_id: session_id.to_string(),
                    patient_id: patient_id.clone(),
                    query: user_message.to_string(),
                };
                self.log_event(
                    session_id,
                    "orchestrator",
                    "receptionist",
                    "forward request",
                    Some("followup_query".to_string()),
                );
                match self.receptionist.handle_followup(&query).await {
                    Ok(reply) => self.map_reception_reply(session_id, reply, &context).await,
                    Err(role_error) => self.map_role_error(session_id, role_error),
                }
            }
        }
    }

    /// First turn of a session: deterministic intake extraction, provisional
    /// patient creation, then the reception flow.
    async fn first_turn(&self, session_id: &str, user_message: &str) -> ResponseEnvelope {
        let intake_info = intake::extract_initial_info(user_message);
        let patient_id = format!("web-patient-{}", Ulid::new());
        info!(
            session_id,
            patient_id = %patient_id,
            age = ?intake_info.age,
            "first contact, creating provisional patient"
        );

        let mut fields = BTreeMap::from([
            ("name".to_string(), json!("web user")),
            ("source".to_string(), json!("web")),
            (
                "created_at".to_string(),
                json!(chrono::Utc::now().to_rfc3339()),
            ),
        ]);
        if let Some(age) = intake_info.age {
            fields.insert("age".to_string(), json!(age));
        }
        if let Err(storage_error) = self.memory.upsert_patient_info(&patient_id, fields) {
            error!(session_id, error = %storage_error, "failed to create provisional patient");
            return ResponseEnvelope::error(session_id, INTERNAL_ERROR_MESSAGE);
        }

        let request = ReceptionRequest {
            session_id: session_id.to_string(),
            patient_id,
            patient_name: None,
            patient_age: intake_info.age,
            symptoms: intake_info.symptoms,
            raw_message: user_message.to_string(),
        };
        match self.receptionist.handle_reception_request(&request).await {
            Ok(reply) => {
                self.log_event(
                    session_id,
                    "user",
                    "system",
                    "user message (first contact)",
                    Some(snippet(user_message)),
                );
                let context = self.memory.get_context(session_id).ok().flatten();
                match context {
                    Some(context) => self.map_reception_reply(session_id, reply, &context).await,
                    None => ResponseEnvelope::error(session_id, INTERNAL_ERROR_MESSAGE),
                }
            }
            Err(role_error) => self.map_role_error(session_id, role_error),
        }
    }

    /// Reception replies either carry the conversation forward or complete
    /// reception, in which case the doctor is triggered within this call.
    async fn map_reception_reply(
        &self,
        session_id: &str,
        reply: ReceptionistReply,
        pre_turn_context: &ConsultationContext,
    ) -> ResponseEnvelope {
        let Some(outcome) = reply.outcome else {
            return ResponseEnvelope::in_progress(session_id, "receptionist", reply.message);
        };

        self.log_event(
            session_id,
            "orchestrator",
            "doctor",
            "trigger diagnosis",
            Some(format!("department: {}", outcome.department)),
        );
        match self.trigger_doctor(session_id, &outcome).await {
            Ok(DoctorReply::Question { question }) => {
                self.log_event(session_id, "doctor", "orchestrator", "first question", None);
                ResponseEnvelope::in_progress(session_id, "doctor", question)
            }
            Ok(DoctorReply::DiagnosisComplete { diagnosis, message }) => {
                warn!(session_id, "doctor diagnosed without asking questions");
                self.process_diagnosis_complete(
                    session_id,
                    &outcome.patient_id,
                    diagnosis,
                    message,
                    pre_turn_context,
                )
                .await
            }
            Err(role_error) => {
                error!(session_id, error = %role_error, "doctor hand-off failed");
                self.delete_context_quietly(session_id);
                ResponseEnvelope::error(
                    session_id,
                    "We could not hand your consultation to a doctor. Please start a new \
consultation.",
                )
            }
        }
    }

    async fn trigger_doctor(
        &self,
        session_id: &str,
        outcome: &ReceptionOutcome,
    ) -> Result<DoctorReply> {
        let context = self
            .memory
            .get_context(session_id)?
            .ok_or_else(|| ClinicError::SessionExpired(session_id.to_string()))?;

        let mut medical_history: Vec<String> = Vec::new();
        if context.identity_confirmed {
            for summary in self.memory.latest_summaries(&outcome.patient_id, 1)? {
                let diagnoses = summary.summary.key_diagnoses.join(", ");
                if !diagnoses.is_empty() {
                    medical_history.push(format!("prior main diagnoses: {diagnoses}"));
                }
                let treatments = summary.summary.treatments_procedures.join(", ");
                if !treatments.is_empty() {
                    medical_history.push(format!("prior treatments: {treatments}"));
                }
                if !summary.summary.medication_summary.is_empty() {
                    medical_history.push(format!(
                        "medication history: {}",
                        summary.summary.medication_summary
                    ));
                }
            }
            if medical_history.is_empty() {
                medical_history.push("previous visits on record but no summary available".into());
            }
        }

        let request = DiagnoseRequest {
            session_id: session_id.to_string(),
            patient_id: outcome.patient_id.clone(),
            symptoms: context.extracted_symptoms.iter().cloned().collect(),
            medical_history,
            department: outcome.department.clone(),
            is_return_visit: context.is_return_visit,
            reception_notes: Some(outcome.notes.clone()),
        };
        self.doctor.start_consultation(&request).await
    }

    async fn map_doctor_reply(
        &self,
        session_id: &str,
        patient_id: &str,
        reply: DoctorReply,
        pre_turn_context: &ConsultationContext,
    ) -> ResponseEnvelope {
        match reply {
            DoctorReply::Question { question } => {
                ResponseEnvelope::in_progress(session_id, "doctor", question)
            }
            DoctorReply::DiagnosisComplete { diagnosis, message } => {
                self.process_diagnosis_complete(
                    session_id,
                    patient_id,
                    diagnosis,
                    message,
                    pre_turn_context,
                )
                .await
            }
        }
    }

    /// Terminal diagnosis handling: no medications ends the consultation;
    /// otherwise the prescription is reviewed by the pharmacist in the same
    /// call.
    async fn process_diagnosis_complete(
        &self,
        session_id: &str,
        patient_id: &str,
        diagnosis: Diagnosis,
        message: String,
        pre_turn_context: &ConsultationContext,
    ) -> ResponseEnvelope {
        let diagnosis_info = DiagnosisInfo::from(&diagnosis);
        let prescription = diagnosis.to_prescription();

        if prescription.is_empty() {
            info!(session_id, patient_id, "diagnosis complete, no prescription needed");
            self.delete_context_quietly(session_id);
            return ResponseEnvelope {
                status: ResponseStatus::CompletedNoPrescription,
                message,
                agent_type: "doctor".to_string(),
                session_id: session_id.to_string(),
                prescription: None,
                diagnosis_info: Some(diagnosis_info),
                interaction_log: Vec::new(),
            };
        }

        self.log_event(
            session_id,
            "orchestrator",
            "pharmacist",
            "trigger prescription review",
            Some(format!("medications: {}", prescription.medications.len())),
        );
        let review = self
            .pharmacist
            .review(&ReviewRequest {
                patient_id: patient_id.to_string(),
                diagnosis: Some(diagnosis_info.clone()),
                prescription,
            })
            .await;

        match review {
            Ok(ReviewOutcome::Approved {
                prescription,
                notes,
            }) => {
                info!(session_id, patient_id, "prescription approved");
                // Keep a context in the prescription-review stage so the
                // patient can still ask the pharmacist about the approved
                // prescription.
                let mut review_context = ConsultationContext::new(session_id, patient_id);
                review_context.stage = Stage::PrescriptionReview;
                review_context.last_prescription_for_query = Some(prescription.clone());
                review_context.identity_confirmed = pre_turn_context.identity_confirmed;
                review_context.is_return_visit = pre_turn_context.is_return_visit;
                review_context.interaction_log = pre_turn_context.interaction_log.clone();
                if let Err(storage_error) = self.memory.save_context(&review_context) {
                    warn!(session_id, error = %storage_error, "failed to keep review context");
                }

                ResponseEnvelope {
                    status: ResponseStatus::CompletedPrescription,
                    message: format!("{message}\n{notes}"),
                    agent_type: "doctor".to_string(),
                    session_id: session_id.to_string(),
                    prescription: Some(prescription),
                    diagnosis_info: Some(diagnosis_info),
                    interaction_log: Vec::new(),
                }
            }
            Ok(ReviewOutcome::Rejected {
                issues,
                message: reject_message,
                ..
            }) => {
                warn!(session_id, patient_id, ?issues, "prescription rejected");
                self.delete_context_quietly(session_id);
                ResponseEnvelope {
                    status: ResponseStatus::ErrorPrescriptionRejected,
                    message: format!("{message}\n{reject_message}"),
                    agent_type: "doctor".to_string(),
                    session_id: session_id.to_string(),
                    prescription: None,
                    diagnosis_info: Some(diagnosis_info),
                    interaction_log: Vec::new(),
                }
            }
            Err(role_error) => {
                error!(session_id, error = %role_error, "prescription review failed");
                self.delete_context_quietly(session_id);
                ResponseEnvelope::error(session_id, INTERNAL_ERROR_MESSAGE)
            }
        }
    }

    /// Map a role-level error onto the caller-facing envelope. Session expiry
    /// is its own condition so the caller can prompt a restart; everything
    /// else tears the consultation down.
    fn map_role_error(&self, session_id: &str, role_error: anyhow::Error) -> ResponseEnvelope {
        match role_error.downcast_ref::<ClinicError>() {
            Some(ClinicError::SessionExpired(_)) => {
                warn!(session_id, "turn on expired session");
                ResponseEnvelope::error(session_id, SESSION_EXPIRED_MESSAGE)
            }
            Some(ClinicError::EmptyReply(_)) => {
                ResponseEnvelope::error(session_id, EMPTY_MESSAGE_REPLY)
            }
            _ => {
                error!(session_id, error = %role_error, "role turn failed");
                self.delete_context_quietly(session_id);
                ResponseEnvelope::error(session_id, INTERNAL_ERROR_MESSAGE)
            }
        }
    }

    /// Attach the interaction log, audit the outbound message, and record
    /// terminal outcomes.
    fn finalize(&self, session_id: &str, mut envelope: ResponseEnvelope) -> ResponseEnvelope {
        if envelope.status.is_terminal() {
            self.log_event(
                session_id,
                "system",
                "",
                "consultation ended",
                Some(envelope.status.to_string()),
            );
        } else {
            self.log_event(
                session_id,
                envelope.agent_type.as_str(),
                "orchestrator",
                "response returned",
                Some(envelope.status.to_string()),
            );
        }

        let final_context = self.memory.get_context(session_id).ok().flatten();
        if let Some(context) = &final_context {
            envelope.interaction_log = context.interaction_log.clone();
        }

        let patient_id = final_context.map(|context| context.patient_id);
        if let Some(patient_id) = patient_id
            && let Err(storage_error) = self.memory.append_conversation(
                &patient_id,
                &envelope.agent_type,
                &envelope.message,
                BTreeMap::from([
                    ("source".to_string(), json!("orchestrator")),
                    ("session_id".to_string(), json!(session_id)),
                    ("status".to_string(), json!(envelope.status.to_string())),
                ]),
            )
        {
            warn!(session_id, error = %storage_error, "failed to audit outbound reply");
        }

        info!(
            session_id,
            status = %envelope.status,
            agent = %envelope.agent_type,
            "turn complete"
        );
        envelope
    }

    /// Append an event to the context's bounded interaction log, when the
    /// context still exists.
    fn log_event(
        &self,
        session_id: &str,
        source: &str,
        target: &str,
        action: &str,
        detail: Option<String>,
    ) {
        let Ok(Some(mut context)) = self.memory.get_context(session_id) else {
            return;
        };
        context.log_event(InteractionEvent::new(source, target, action, detail));
        if let Err(storage_error) = self.memory.update_context(&context) {
            warn!(session_id, error = %storage_error, "failed to record interaction event");
        }
    }

    fn delete_context_quietly(&self, session_id: &str) {
        if let Err(storage_error) = self.memory.delete_context(session_id) {
            warn!(session_id, error = %storage_error, "failed to delete context");
        }
    }
}

fn snippet(message: &str) -> String {
    let mut text: String = message.chars().take(30).collect();
    if message.chars().count() > 30 {
        text.push('…');
    }
    text
}
