use async_trait::async_trait;

/// Errors surfaced by the generation backend.
///
/// Callers never see raw transport errors: each role maps these onto its own
/// fallback behavior (default triage, canned question, deterministic
/// rejection) instead of aborting the turn.
#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generation backend returned status {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("all generation models are in cooldown")]
    ModelsExhausted,

    #[error("at least one model is required")]
    NoModels,

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("generation service unavailable: {0}")]
    Unavailable(String),
}

/// Prompt-in/text-out boundary to the external language backend.
///
/// The returned string is never assumed to be well-formed JSON; consumers go
/// through [`crate::extract`] before structural parsing.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        system_message: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GenerationError>();
    }

    #[test]
    fn test_display_backend_error() {
        let err = GenerationError::Backend {
            status: 429,
            body: "rate_limit".into(),
        };
        assert_eq!(
            err.to_string(),
            "generation backend returned status 429: rate_limit"
        );
    }
}
