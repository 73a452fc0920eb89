//! Reception stage machine: intent recognition, identity collection, small
//! talk containment, and triage.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{info, warn};

use clinic_config::{ReceptionConfig, TriageConfig};
use clinic_core::{
    ClinicError, ConsultationContext, FollowupQuery, Priority, ReceptionRequest, Stage,
};
use clinic_llm::{GenerationService, extract};
use clinic_memory::MemorySystem;

use crate::identity::extract_identity;
use crate::intent::{Intent, classify_intent};

/// Fixed refusal returned once the off-topic threshold is reached.
pub const OFF_TOPIC_REFUSAL: &str = "We have spent several turns on topics unrelated to your \
visit. Please describe your specific symptoms, or come back another day. We need to leave \
time for other patients - thank you for understanding.";

const IDENTITY_QUESTION: &str = "I understand you are not feeling well. To help you better \
(especially if you have visited us before), could you share your phone number? And is this \
a return visit?";

const IDENTITY_AND_SYMPTOMS_QUESTION: &str = "Hello, what seems to be the trouble? To help \
you better, please also share your phone number and whether this is a return visit.";

const GUIDANCE_AFTER_IDENTITY: &str = "Thank you for the information. To triage you \
accurately, please describe your symptoms in a bit more detail - what is the main \
discomfort, and how long has it lasted?";

const GUIDANCE_MESSAGE: &str = "Thank you. To triage you accurately, please describe your \
symptoms in detail, for example:\n\
- What is the main discomfort? (e.g. headache, cough, diarrhea)\n\
- How long has it lasted?\n\
- Are there accompanying symptoms? (e.g. fever, fatigue, nausea)";

const GUIDANCE_REPEAT: &str = "Sorry, I still need to know what is bothering you before we \
can continue. Please tell me your main symptoms.";

const CLARIFICATION_MESSAGE: &str = "Could you tell me what exactly is bothering you, or \
what you would like to ask? The more detail you can give, the better I can help.";

const CHAT_FALLBACK: &str = "Understood. If you are feeling unwell, please tell me your \
symptoms.";

const CHAT_CUTOFF: &str = "I am sorry, but we have chatted for a while now. If you need a \
consultation please describe your symptoms in detail; otherwise I must attend to other \
patients first.";

const ERROR_RETRY_MESSAGE: &str = "Sorry, the system had trouble understanding that. Could \
you rephrase, or simply tell me your symptoms?";

const CHAT_SYSTEM_MESSAGE: &str =
    "You are a courteous clinic receptionist. Never give medical advice.";
const TRIAGE_SYSTEM_MESSAGE: &str = "You are a professional clinic triage assistant. \
Analyze the information carefully and answer with structured JSON.";

/// Result of a completed reception, handed to the doctor.
#[derive(Debug, Clone)]
pub struct ReceptionOutcome {
    pub patient_id: String,
    pub department: String,
    pub priority: Priority,
    pub notes: String,
}

#[derive(Debug, Clone)]
pub struct ReceptionistReply {
    pub message: String,
    pub next_stage: Stage,
    /// Present exactly when reception completed and triage ran.
    pub outcome: Option<ReceptionOutcome>,
}

impl ReceptionistReply {
    pub fn completed(&self) -> bool {
        self.outcome.is_some()
    }
}

/// What one stage-machine step decided, before triage runs.
struct StepDecision {
    message: Option<String>,
    next_stage: Stage,
    execute_triage: bool,
}

impl StepDecision {
    fn reply(message: impl Into<String>, next_stage: Stage) -> Self {
        Self {
            message: Some(message.into()),
            next_stage,
            execute_triage: false,
        }
    }

    fn triage() -> Self {
        Self {
            message: None,
            next_stage: Stage::Triage,
            execute_triage: true,
        }
    }
}

pub struct Receptionist {
    memory: Arc<MemorySystem>,
    generation: Arc<dyn GenerationService>,
    reception: ReceptionConfig,
    triage: TriageConfig,
}

impl Receptionist {
    pub fn new(
        memory: Arc<MemorySystem>,
        generation: Arc<dyn GenerationService>,
        reception: ReceptionConfig,
        triage: TriageConfig,
    ) -> Self {
        Self {
            memory,
            generation,
            reception,
            triage,
        }
    }

    /// First contact for a session: creates the context when absent, then
    /// processes the message like any other reception turn.
    pub async fn handle_reception_request(
        &self,
        request: &ReceptionRequest,
    ) -> Result<ReceptionistReply> {
        let context = match self.memory.get_context(&request.session_id)? {
            Some(existing) => existing,
            None => {
                info!(
                    session_id = %request.session_id,
                    patient_id = %request.patient_id,
                    "creating consultation context"
                );
                let mut context =
                    ConsultationContext::new(&request.session_id, &request.patient_id);
                context.add_symptoms(request.symptoms.iter().cloned());
                self.memory.save_context(&context)?;
                context
            }
        };
        self.process_turn(context, &request.raw_message).await
    }

    /// Any later turn while reception owns the stage. A missing context means
    /// the session expired; it is never recreated here.
    pub async fn handle_followup(&self, query: &FollowupQuery) -> Result<ReceptionistReply> {
        let context = self
            .memory
            .get_context(&query.session_id)?
            .ok_or_else(|| ClinicError::SessionExpired(query.session_id.clone()))?;
        self.process_turn(context, &query.query).await
    }

    async fn process_turn(
        &self,
        mut context: ConsultationContext,
        user_message: &str,
    ) -> Result<ReceptionistReply> {
        context.push_snippet(format!("User: {user_message}"));
        self.memory.append_conversation(
            &context.patient_id,
            "patient",
            user_message,
            conversation_metadata(&context.session_id),
        )?;

        let decision = if context.stage == Stage::AskingIdentity {
            self.identity_turn(&mut context, user_message)?
        } else {
            self.intent_turn(&mut context, user_message).await?
        };

        let (message, next_stage, outcome) = if decision.execute_triage {
            self.triage_turn(&mut context).await?
        } else {
            let message = decision
                .message
                .unwrap_or_else(|| ERROR_RETRY_MESSAGE.to_string());
            (message, decision.next_stage, None)
        };

        context.stage = next_stage;
        context.push_snippet(format!("Receptionist: {message}"));
        self.memory.update_context(&context)?;
        self.memory.append_conversation(
            &context.patient_id,
            "receptionist",
            &message,
            conversation_metadata(&context.session_id),
        )?;

        Ok(ReceptionistReply {
            message,
            next_stage,
            outcome,
        })
    }

    /// Deterministic processing of the reply to the identity question. Regex
    /// only; the generation service is not consulted on this turn.
    fn identity_turn(
        &self,
        context: &mut ConsultationContext,
        user_message: &str,
    ) -> Result<StepDecision> {
        let identity = extract_identity(user_message);
        context.phone_provided = identity.phone.clone();

        let matched_patient = match &identity.phone {
            Some(phone) => self.memory.find_patient_by_phone(phone)?,
            None => None,
        };

        if let Some(found_id) = matched_patient {
            info!(
                session_id = %context.session_id,
                matched = %found_id,
                "phone matched an existing patient, merging identity"
            );
            context.patient_id = found_id.clone();
            context.identity_confirmed = true;
            // A phone match implies a prior visit unless the patient
            // explicitly said otherwise.
            context.is_return_visit = identity.is_return_visit != Some(false);
            self.memory.upsert_patient_info(
                &found_id,
                BTreeMap::from([
                    ("phone".to_string(), json!(&identity.phone)),
                    (
                        "last_session_id".to_string(),
                        json!(&context.session_id),
                    ),
                ]),
            )?;
        } else {
            context.identity_confirmed = false;
            context.is_return_visit = identity.is_return_visit == Some(true);
            if let Some(phone) = &identity.phone {
                self.memory.upsert_patient_info(
                    &context.patient_id,
                    BTreeMap::from([
                        ("phone".to_string(), json!(phone)),
                        ("source".to_string(), json!("web")),
                        (
                            "first_session_id".to_string(),
                            json!(&context.session_id),
                        ),
                    ]),
                )?;
            }
        }

        context.add_symptoms(identity.additional_symptoms);

        if context.symptoms_sufficient() {
            Ok(StepDecision::triage())
        } else {
            context.guidance_given = true;
            Ok(StepDecision::reply(GUIDANCE_AFTER_IDENTITY, Stage::Guiding))
        }
    }

    async fn intent_turn(
        &self,
        context: &mut ConsultationContext,
        user_message: &str,
    ) -> Result<StepDecision> {
        let classification = classify_intent(
            self.generation.as_ref(),
            user_message,
            &context.conversation_snippets,
        )
        .await;

        let result = match classification {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    session_id = %context.session_id,
                    error = %error,
                    "intent classification failed"
                );
                return Ok(StepDecision::reply(ERROR_RETRY_MESSAGE, Stage::ReceptionError));
            }
        };

        context.add_symptoms(result.extracted_symptoms);

        match result.intent {
            Intent::GeneralChat | Intent::SeekingSpecificDoctor => {
                self.chat_turn(context, user_message).await
            }
            Intent::MedicalInquiry => Ok(self.medical_turn(context)),
            Intent::ProvidingIdentity => {
                if context.identity_asked {
                    self.identity_turn(context, user_message)
                } else {
                    Ok(self.medical_turn(context))
                }
            }
            Intent::AskingGuidance | Intent::Unclear => {
                if !context.identity_asked && context.extracted_symptoms.is_empty() {
                    context.identity_asked = true;
                    Ok(StepDecision::reply(
                        IDENTITY_AND_SYMPTOMS_QUESTION,
                        Stage::AskingIdentity,
                    ))
                } else {
                    Ok(StepDecision::reply(CLARIFICATION_MESSAGE, Stage::Clarification))
                }
            }
        }
    }

    /// Identity collection always precedes triage exactly once; after that,
    /// symptoms decide between triage and (repeated) guidance.
    fn medical_turn(&self, context: &mut ConsultationContext) -> StepDecision {
        if !context.identity_asked {
            context.identity_asked = true;
            return StepDecision::reply(IDENTITY_QUESTION, Stage::AskingIdentity);
        }
        if context.symptoms_sufficient() {
            return StepDecision::triage();
        }
        if !context.guidance_given {
            context.guidance_given = true;
            StepDecision::reply(GUIDANCE_MESSAGE, Stage::Guiding)
        } else {
            StepDecision::reply(GUIDANCE_REPEAT, Stage::Guiding)
        }
    }

    async fn chat_turn(
        &self,
        context: &mut ConsultationContext,
        user_message: &str,
    ) -> Result<StepDecision> {
        context.off_topic_turns += 1;
        context.chat_turns += 1;
        info!(
            session_id = %context.session_id,
            chat_turns = context.chat_turns,
            off_topic_turns = context.off_topic_turns,
            "handling off-topic turn"
        );

        if context.off_topic_turns >= self.reception.max_chat_turns {
            return Ok(StepDecision::reply(OFF_TOPIC_REFUSAL, Stage::ChatEnded));
        }

        if context.chat_turns <= self.reception.max_chat_turns {
            let prompt = format!(
                "You are a professional, courteous clinic receptionist. The user just \
said: \"{user_message}\". Give a brief, helpful reply that must not contain any medical \
advice or diagnosis. If the user wants a specific doctor, politely explain that they \
need to describe their symptoms first so the system can triage them - doctors cannot be \
requested directly. Keep the reply under 50 words."
            );
            let message = match self
                .generation
                .generate(&prompt, CHAT_SYSTEM_MESSAGE, 0.6, 100)
                .await
            {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(error = %error, "small-talk generation failed, using canned reply");
                    CHAT_FALLBACK.to_string()
                }
            };
            Ok(StepDecision::reply(message, Stage::Chatting))
        } else {
            Ok(StepDecision::reply(CHAT_CUTOFF, Stage::ChatEnded))
        }
    }

    /// Run triage and complete reception. Triage never blocks completion: a
    /// failed generation call or an out-of-enum value degrades to the
    /// configured defaults.
    async fn triage_turn(
        &self,
        context: &mut ConsultationContext,
    ) -> Result<(String, Stage, Option<ReceptionOutcome>)> {
        if !context.symptoms_sufficient() {
            context.guidance_given = false;
            return Ok((GUIDANCE_REPEAT.to_string(), Stage::Guiding, None));
        }

        let symptoms: Vec<String> = context.extracted_symptoms.iter().cloned().collect();
        let patient_info = self.memory.get_patient_info(&context.patient_id)?;
        let age = patient_info
            .as_ref()
            .and_then(|info| info.get("age"))
            .and_then(Value::as_u64);

        let mut medical_history: Vec<String> = Vec::new();
        if context.identity_confirmed {
            for summary in self.memory.latest_summaries(&context.patient_id, 2)? {
                medical_history.push(format!(
                    "prior diagnosis summary: {}",
                    summary.summary.key_diagnoses.join(", ")
                ));
            }
            if medical_history.is_empty() {
                medical_history.push("previous visits on record but no summary available".into());
            }
        }

        let default_priority: Priority =
            self.triage.default_priority.parse().unwrap_or_default();
        let (department, priority, reason) = match self
            .run_triage_generation(&symptoms, age, &medical_history, context.is_return_visit)
            .await
        {
            Ok(validated) => validated,
            Err(error) => {
                warn!(
                    session_id = %context.session_id,
                    error = %error,
                    "triage generation failed, using defaults"
                );
                (self.triage.default_department.clone(), default_priority, None)
            }
        };

        context.department = Some(department.clone());
        let visit_status = if context.is_return_visit {
            "(recorded as a return visit)"
        } else {
            "(recorded as a first visit)"
        };

        let message = match &reason {
            Some(reason) => format!(
                "Thank you for the information {visit_status}. Based on your description \
({symptoms}) you should register with [{department}]. Assessed priority: [{priority}]. \
Arranging the next step... (reason: {reason})",
                symptoms = symptoms.join(", "),
            ),
            None => format!(
                "Sorry, smart triage ran into a problem. We will route you to \
[{department}] - please explain your situation to the doctor in detail."
            ),
        };

        let notes = format!(
            "Triage complete. identity confirmed: {}, return visit: {}, phone provided: {}. {}",
            context.identity_confirmed,
            context.is_return_visit,
            context.phone_provided.is_some(),
            reason
                .map(|reason| format!("Reason: {reason}"))
                .unwrap_or_else(|| "Smart triage unavailable, defaults applied.".to_string()),
        );

        let outcome = ReceptionOutcome {
            patient_id: context.patient_id.clone(),
            department,
            priority,
            notes,
        };
        info!(
            session_id = %context.session_id,
            department = %outcome.department,
            priority = %outcome.priority,
            "reception completed"
        );
        Ok((message, Stage::ReceptionCompleted, Some(outcome)))
    }

    async fn run_triage_generation(
        &self,
        symptoms: &[String],
        age: Option<u64>,
        medical_history: &[String],
        is_return_visit: bool,
    ) -> Result<(String, Priority, Option<String>)> {
        let history_line = if medical_history.is_empty() {
            "none".to_string()
        } else {
            medical_history.join(", ")
        };
        let return_line = if is_return_visit {
            "\nThe patient is on a return visit."
        } else {
            ""
        };
        let prompt = format!(
            "You are an experienced clinic triage receptionist. Based on the patient \
information below, recommend the most suitable department and assess the urgency.\n\n\
Patient information:\n\
Age: {age}\n\
Reported symptoms: {symptoms}\n\
Medical history: {history}{return_line}\n\n\
Respond strictly in this JSON format:\n\
{{\n\
  \"department\": \"the recommended department (choose from: {departments})\",\n\
  \"priority\": \"urgency level ('normal', 'priority', 'urgent')\",\n\
  \"reason\": \"brief reason for the department and urgency\"\n\
}}\n\
If the information is insufficient, recommend \"{default_department}\" and \
\"{default_priority}\". For emergencies (severe trauma, difficulty breathing, chest \
pain) recommend \"emergency\" and \"urgent\".",
            age = age.map_or_else(|| "unknown".to_string(), |age| age.to_string()),
            symptoms = symptoms.join(", "),
            history = history_line,
            departments = self.triage.departments.join(", "),
            default_department = self.triage.default_department,
            default_priority = self.triage.default_priority,
        );

        let response = self
            .generation
            .generate(&prompt, TRIAGE_SYSTEM_MESSAGE, 0.2, 200)
            .await?;
        let raw: Value = extract::parse_object(&response)?;

        let default_priority: Priority =
            self.triage.default_priority.parse().unwrap_or_default();
        let department = raw
            .get("department")
            .and_then(Value::as_str)
            .filter(|department| {
                self.triage
                    .departments
                    .iter()
                    .any(|known| known.as_str() == *department)
            })
            .unwrap_or(&self.triage.default_department)
            .to_string();
        let priority = raw
            .get("priority")
            .and_then(Value::as_str)
            .and_then(|priority| priority.parse::<Priority>().ok())
            .unwrap_or(default_priority);
        let reason = raw
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| "no reason provided".to_string());

        Ok((department, priority, Some(reason)))
    }
}

fn conversation_metadata(session_id: &str) -> BTreeMap<String, Value> {
    BTreeMap::from([("session_id".to_string(), json!(session_id))])
}
