use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::{Value, json};
use tracing::warn;

use clinic_config::GenerationConfig;

use crate::service::{GenerationError, GenerationService};

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(600);

/// OpenAI-compatible chat-completions client with model failover.
#[derive(Debug)]
pub struct ApiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    rotator: Mutex<ModelRotator>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        models_csv: &str,
    ) -> Result<Self, GenerationError> {
        let models: Vec<String> = models_csv
            .split(',')
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .map(ToOwned::to_owned)
            .collect();

        if models.is_empty() {
            return Err(GenerationError::NoModels);
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            rotator: Mutex::new(ModelRotator::new(models)),
        })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        Self::new(config.base_url.clone(), config.api_key.clone(), &config.models)
    }
}

#[async_trait]
impl GenerationService for ApiClient {
    async fn generate(
        &self,
        prompt: &str,
        system_message: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, GenerationError> {
        loop {
            let model = {
                let mut rotator = self
                    .rotator
                    .lock()
                    .map_err(|_| GenerationError::Unavailable("model rotator poisoned".into()))?;
                if rotator.all_exhausted() {
                    return Err(GenerationError::ModelsExhausted);
                }
                rotator.next_available().to_string()
            };

            let url = format!("{}/chat/completions", self.base_url);
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&json!({
                    "model": model,
                    "messages": [
                        {"role": "system", "content": system_message},
                        {"role": "user", "content": prompt}
                    ],
                    "temperature": temperature,
                    "max_tokens": max_tokens
                }))
                .send()
                .await?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await?;

            if status.is_success() {
                return parse_completion_content(&body);
            }

            if is_rate_or_quota_error(status, &body) {
                let cooldown = parse_retry_after(&headers).unwrap_or(DEFAULT_COOLDOWN);
                let has_next = {
                    let mut rotator = self.rotator.lock().map_err(|_| {
                        GenerationError::Unavailable("model rotator poisoned".into())
                    })?;
                    rotator.mark_exhausted(&model, cooldown);
                    !rotator.all_exhausted()
                };

                if has_next {
                    warn!(
                        exhausted = %model,
                        cooldown_secs = cooldown.as_secs(),
                        "generation model rate limited, failing over"
                    );
                    continue;
                }

                return Err(GenerationError::ModelsExhausted);
            }

            return Err(GenerationError::Backend {
                status: status.as_u16(),
                body,
            });
        }
    }
}

/// Round-robin model rotation with per-model cooldowns.
#[derive(Debug, Clone)]
pub struct ModelRotator {
    models: Vec<String>,
    cooldowns: HashMap<String, Instant>,
    current_index: usize,
}

impl ModelRotator {
    pub fn new(models: Vec<String>) -> Self {
        assert!(
            !models.is_empty(),
            "ModelRotator requires at least one model"
        );
        Self {
            models,
            cooldowns: HashMap::new(),
            current_index: 0,
        }
    }

    /// Get next available model (skip models still in cooldown).
    pub fn next_available(&mut self) -> &str {
        self.purge_expired();
        let total = self.models.len();

        for _ in 0..total {
            let index = self.current_index % total;
            self.current_index = (self.current_index + 1) % total;
            let model = &self.models[index];
            if !self.in_cooldown(model) {
                return model;
            }
        }

        &self.models[self.current_index % total]
    }

    /// Mark a model as exhausted for the given cooldown duration.
    pub fn mark_exhausted(&mut self, model: &str, cooldown: Duration) {
        self.cooldowns
            .insert(model.to_string(), Instant::now() + cooldown);
    }

    pub fn all_exhausted(&self) -> bool {
        let now = Instant::now();
        self.models.iter().all(|model| {
            self.cooldowns
                .get(model)
                .is_some_and(|cooldown_until| *cooldown_until > now)
        })
    }

    fn in_cooldown(&self, model: &str) -> bool {
        let now = Instant::now();
        self.cooldowns
            .get(model)
            .is_some_and(|cooldown_until| *cooldown_until > now)
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.cooldowns.retain(|_, until| *until > now);
    }
}

fn is_rate_or_quota_error(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }

    let body_lower = body.to_ascii_lowercase();
    body_lower.contains("rate_limit")
        || body_lower.contains("quota")
        || body_lower.contains("insufficient_quota")
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let now = Utc::now();
    let seconds = (retry_at - now).num_seconds().max(0) as u64;
    Some(Duration::from_secs(seconds))
}

fn parse_completion_content(body: &str) -> Result<String, GenerationError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|error| GenerationError::MalformedResponse(error.to_string()))?;
    value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            GenerationError::MalformedResponse(
                "missing choices[0].message.content in completion response".into(),
            )
        })
}
