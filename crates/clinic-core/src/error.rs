#[derive(thiserror::Error, Debug)]
pub enum ClinicError {
    #[error("Missing session id")]
    MissingSessionId,

    #[error("Missing patient id for session '{0}'")]
    MissingPatientId(String),

    #[error("Session '{0}' has expired or does not exist")]
    SessionExpired(String),

    #[error("Cannot update missing consultation context '{0}'")]
    ContextNotFound(String),

    #[error("No prescription on file for session '{0}'")]
    NoPrescriptionOnFile(String),

    #[error("Role '{role}' cannot handle request kind '{kind}'")]
    UnhandledRequest { role: String, kind: String },

    #[error("Empty patient reply for session '{0}'")]
    EmptyReply(String),
}
