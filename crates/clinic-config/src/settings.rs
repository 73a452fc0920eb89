//! Injectable settings for the consultation workflow.
//!
//! Everything a test would want to substitute lives here: generation
//! credentials, storage path, department enumeration, loop thresholds.
//! Values load from TOML with full serde defaults; a handful of deployment
//! secrets can be overridden from `CLINIC_*` environment variables.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub generation: GenerationConfig,
    pub storage: StorageConfig,
    pub reception: ReceptionConfig,
    pub doctor: DoctorConfig,
    pub triage: TriageConfig,
    pub memory: MemoryConfig,
}

impl Settings {
    /// Load settings from a TOML file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file: {}", path.display()))?;
        let mut settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse settings file: {}", path.display()))?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Defaults plus environment overrides, for deployments without a file.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        settings.apply_env_overrides();
        settings
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(base_url) = std::env::var("CLINIC_LLM_BASE_URL") {
            self.generation.base_url = normalize_url(&base_url);
        }
        if let Ok(api_key) = std::env::var("CLINIC_LLM_API_KEY") {
            self.generation.api_key = api_key;
        }
        if let Ok(models) = std::env::var("CLINIC_LLM_MODELS") {
            self.generation.models = models;
        }
        if let Ok(path) = std::env::var("CLINIC_STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
    }

    /// Whether the generation section carries enough to reach a live backend.
    pub fn generation_configured(&self) -> bool {
        let configured = !self.generation.base_url.is_empty()
            && !self.generation.api_key.is_empty()
            && !self.generation.models.is_empty();
        if !configured {
            warn!("generation service not fully configured; live calls will fail");
        }
        configured
    }
}

/// OpenAI-compatible generation backend.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Chat-completions base URL, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    /// Comma-separated model list; first is primary, rest are failover.
    pub models: String,
}

impl GenerationConfig {
    pub fn model_list(&self) -> Vec<String> {
        self.models
            .split(',')
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    pub fn redacted_api_key(&self) -> String {
        mask_api_key(&self.api_key)
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.redacted_api_key())
            .field("models", &self.models)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the JSON memory document.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/clinic_memory.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceptionConfig {
    /// Off-topic turns tolerated before the receptionist ends the chat.
    pub max_chat_turns: u32,
}

impl Default for ReceptionConfig {
    fn default() -> Self {
        Self { max_chat_turns: 3 }
    }
}

/// Diagnosis-loop stopping policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoctorConfig {
    pub initial_confidence: f64,
    /// Diagnose once confidence reaches this.
    pub min_confidence: f64,
    /// Diagnose unconditionally after this many questions.
    pub max_questions: usize,
    /// Diagnose after this many questions if confidence cleared the floor.
    pub force_after_questions: usize,
    pub force_confidence_floor: f64,
}

impl Default for DoctorConfig {
    fn default() -> Self {
        Self {
            initial_confidence: 0.3,
            min_confidence: 0.75,
            max_questions: 5,
            force_after_questions: 4,
            force_confidence_floor: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    /// Closed department enumeration; out-of-list values degrade to the default.
    pub departments: Vec<String>,
    pub default_department: String,
    /// Parsed by the receptionist; out-of-enum values degrade to this.
    pub default_priority: String,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            departments: [
                "internal medicine",
                "surgery",
                "pediatrics",
                "obstetrics and gynecology",
                "dermatology",
                "ophthalmology",
                "otolaryngology",
                "neurology",
                "cardiology",
                "gastroenterology",
                "respiratory medicine",
                "orthopedics",
                "urology",
                "oncology",
                "emergency",
                "general practice",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            default_department: "internal medicine".to_string(),
            default_priority: "normal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Age threshold separating short-term from long-term entries.
    pub short_term_hours: i64,
    /// Hard cap on the consolidation digest fed to the generation service.
    pub digest_char_cap: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_hours: 24,
            digest_char_cap: 3000,
        }
    }
}

fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
        return url.trim_end_matches('/').to_string();
    }
    warn!(%url, "base url missing protocol prefix, assuming https");
    format!("https://{}", url.trim_start_matches('/').trim_end_matches('/'))
}

fn mask_api_key(api_key: &str) -> String {
    if api_key.is_empty() {
        return String::new();
    }

    let char_count = api_key.chars().count();
    let prefix: String = api_key.chars().take(3).collect();
    let suffix: String = api_key.chars().skip(char_count.saturating_sub(4)).collect();

    if char_count <= 4 {
        format!("***{suffix}")
    } else {
        format!("{prefix}...{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.reception.max_chat_turns, 3);
        assert!((settings.doctor.initial_confidence - 0.3).abs() < f64::EPSILON);
        assert!((settings.doctor.min_confidence - 0.75).abs() < f64::EPSILON);
        assert_eq!(settings.doctor.max_questions, 5);
        assert_eq!(settings.memory.short_term_hours, 24);
        assert_eq!(settings.triage.default_department, "internal medicine");
        assert_eq!(settings.triage.departments.len(), 16);
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
[generation]
base_url = "https://api.openai.com/v1"
api_key = "sk-example-1234"
models = "model-a,model-b"

[storage]
path = "/tmp/clinic.json"

[reception]
max_chat_turns = 2

[doctor]
min_confidence = 0.8

[triage]
departments = ["internal medicine", "emergency"]
default_department = "internal medicine"
default_priority = "normal"

[memory]
short_term_hours = 48
"#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.generation.model_list(), vec!["model-a", "model-b"]);
        assert_eq!(settings.storage.path, PathBuf::from("/tmp/clinic.json"));
        assert_eq!(settings.reception.max_chat_turns, 2);
        assert!((settings.doctor.min_confidence - 0.8).abs() < f64::EPSILON);
        assert_eq!(settings.triage.departments.len(), 2);
        assert_eq!(settings.memory.short_term_hours, 48);
    }

    #[test]
    fn test_debug_masks_api_key() {
        let generation = GenerationConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "sk-super-secret-5982".to_string(),
            models: "model-a".to_string(),
        };
        let debug = format!("{generation:?}");
        assert!(!debug.contains("sk-super-secret-5982"));
        assert!(debug.contains("sk-...5982"));
    }

    #[test]
    fn test_model_list_skips_blanks() {
        let generation = GenerationConfig {
            models: " model-a, ,model-b, ".to_string(),
            ..GenerationConfig::default()
        };
        assert_eq!(generation.model_list(), vec!["model-a", "model-b"]);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("api.example.com/v1/"),
            "https://api.example.com/v1"
        );
        assert_eq!(
            normalize_url("https://api.example.com/v1"),
            "https://api.example.com/v1"
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[reception]\nmax_chat_turns = 5\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.reception.max_chat_turns, 5);

        assert!(Settings::load_from(&dir.path().join("missing.toml")).is_err());
    }
}
