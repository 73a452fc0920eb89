mod context;
mod envelope;
mod error;
mod stage;
mod types;

pub use context::{ConsultationContext, InteractionEvent, UNCLEAR_SYMPTOM};
pub use envelope::{
    DiagnoseRequest, DrugInfoRequest, FollowupQuery, InboundMessage, InteractionCheck,
    PatientResponse, PrescriptionQuery, PrescriptionRequest, ReceptionRequest, RequestContent,
    ResponseEnvelope, ResponseStatus, ReviewRequest,
};
pub use error::ClinicError;
pub use stage::Stage;
pub use types::{Diagnosis, DiagnosisInfo, Medication, Prescription, Priority};
