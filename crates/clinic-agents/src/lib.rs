pub mod identity;
pub mod intake;
mod doctor;
mod intent;
mod pharmacist;
mod receptionist;

pub use doctor::{AnswerAnalysis, Doctor, DoctorReply};
pub use intent::{Intent, IntentResult, classify_intent};
pub use pharmacist::{
    DrugInfo, DrugInteraction, Pharmacist, ReviewOutcome, ReviewVerdict, CANNOT_PARSE_REVIEW_ISSUE,
};
pub use receptionist::{
    OFF_TOPIC_REFUSAL, ReceptionOutcome, Receptionist, ReceptionistReply,
};
