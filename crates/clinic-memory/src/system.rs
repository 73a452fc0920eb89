//! Single source of truth for patient data, conversation audit, active
//! consultation contexts, and memory consolidation.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use ulid::Ulid;

use clinic_config::MemoryConfig;
use clinic_core::{ClinicError, ConsultationContext};
use clinic_llm::{GenerationService, extract};

use crate::record::{
    ConsolidatedSummary, ConversationEntry, Horizon, LongTermSummary, MemoryEntry, PatientRecord,
    SummaryMetadata,
};
use crate::store::KeyValueStore;

/// Per-entry payload cap inside the consolidation digest.
const DIGEST_PAYLOAD_CAP: usize = 200;

const SUMMARY_SYSTEM_MESSAGE: &str = "You are a medical records summarization assistant. \
    Analyze the provided records carefully and produce an accurate, concise JSON summary.";

/// Fields the summarization response must carry to be accepted.
const REQUIRED_SUMMARY_FIELDS: &[&str] =
    &["key_diagnoses", "significant_symptoms", "medication_summary"];

#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub short_term_unconsolidated: usize,
    pub long_term_unconsolidated: usize,
    pub consolidated_entries: usize,
    pub summaries: usize,
    pub conversation_entries: usize,
    pub kind_distribution: BTreeMap<String, usize>,
}

pub struct MemorySystem {
    store: Arc<dyn KeyValueStore>,
    generation: Arc<dyn GenerationService>,
    config: MemoryConfig,
}

impl MemorySystem {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        generation: Arc<dyn GenerationService>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            generation,
            config,
        }
    }

    /// Merge `fields` into the patient's info, creating the record if absent.
    pub fn upsert_patient_info(
        &self,
        patient_id: &str,
        fields: BTreeMap<String, Value>,
    ) -> Result<()> {
        let mut record = self.store.load_patient(patient_id)?.unwrap_or_default();
        record.info.extend(fields);
        record.last_updated = Utc::now();
        self.store.save_patient(patient_id, &record)?;
        debug!(patient_id, "patient info updated");
        Ok(())
    }

    pub fn get_patient_info(&self, patient_id: &str) -> Result<Option<BTreeMap<String, Value>>> {
        Ok(self
            .store
            .load_patient(patient_id)?
            .map(|record| record.info))
    }

    /// Append an immutable memory entry; stamps the timestamp and starts
    /// unconsolidated.
    pub fn append_memory(
        &self,
        patient_id: &str,
        kind: &str,
        payload: Value,
        metadata: BTreeMap<String, Value>,
    ) -> Result<Ulid> {
        let mut record = self.store.load_patient(patient_id)?.unwrap_or_default();
        let entry = MemoryEntry {
            id: Ulid::new(),
            kind: kind.to_string(),
            payload,
            metadata,
            timestamp: Utc::now(),
            consolidated: false,
        };
        let entry_id = entry.id;
        record.memories.push(entry);
        record.last_updated = Utc::now();
        self.store.save_patient(patient_id, &record)?;
        debug!(patient_id, kind, %entry_id, "memory entry appended");
        Ok(entry_id)
    }

    /// Entries matching `kind` and `horizon`, ordered by timestamp ascending.
    /// Horizon is computed against the clock at query time.
    pub fn query_memory(
        &self,
        patient_id: &str,
        kind: Option<&str>,
        horizon: Horizon,
    ) -> Result<Vec<MemoryEntry>> {
        let Some(record) = self.store.load_patient(patient_id)? else {
            return Ok(Vec::new());
        };
        let now = Utc::now();
        let threshold = self.config.short_term_hours;
        let mut entries: Vec<MemoryEntry> = record
            .memories
            .into_iter()
            .filter(|entry| kind.is_none_or(|kind| entry.kind == kind))
            .filter(|entry| entry.matches(horizon, now, threshold))
            .collect();
        entries.sort_by_key(|entry| entry.timestamp);
        Ok(entries)
    }

    pub fn append_conversation(
        &self,
        patient_id: &str,
        role: &str,
        content: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Result<()> {
        let mut record = self.store.load_patient(patient_id)?.unwrap_or_default();
        record.conversation_history.push(ConversationEntry {
            id: Ulid::new(),
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata,
        });
        record.last_updated = Utc::now();
        self.store.save_patient(patient_id, &record)
    }

    /// Audit entries filtered by role set, ordered ascending, optionally
    /// tail-limited.
    pub fn get_conversation(
        &self,
        patient_id: &str,
        limit: Option<usize>,
        roles: Option<&[&str]>,
    ) -> Result<Vec<ConversationEntry>> {
        let Some(record) = self.store.load_patient(patient_id)? else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<ConversationEntry> = record
            .conversation_history
            .into_iter()
            .filter(|entry| roles.is_none_or(|roles| roles.contains(&entry.role.as_str())))
            .collect();
        entries.sort_by_key(|entry| entry.timestamp);
        if let Some(limit) = limit
            && entries.len() > limit
        {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }

    /// Upsert the consultation context under its session id.
    pub fn save_context(&self, context: &ConsultationContext) -> Result<()> {
        let mut context = context.clone();
        context.touch();
        self.store.save_context(&context.session_id, &context)?;
        info!(
            session_id = %context.session_id,
            patient_id = %context.patient_id,
            stage = %context.stage,
            "consultation context saved"
        );
        Ok(())
    }

    pub fn get_context(&self, session_id: &str) -> Result<Option<ConsultationContext>> {
        self.store.load_context(session_id)
    }

    /// Replace an existing context. Unlike [`Self::save_context`], a missing
    /// session id is an error, never a silent create.
    pub fn update_context(&self, context: &ConsultationContext) -> Result<()> {
        if self.store.load_context(&context.session_id)?.is_none() {
            return Err(ClinicError::ContextNotFound(context.session_id.clone()).into());
        }
        let mut context = context.clone();
        context.touch();
        self.store.save_context(&context.session_id, &context)
    }

    pub fn delete_context(&self, session_id: &str) -> Result<bool> {
        let existed = self.store.delete_context(session_id)?;
        if existed {
            info!(session_id, "consultation context deleted");
        }
        Ok(existed)
    }

    /// Linear scan over patient records, comparing digit-normalized phone
    /// numbers on both sides.
    pub fn find_patient_by_phone(&self, phone: &str) -> Result<Option<String>> {
        let normalized: String = phone.chars().filter(char::is_ascii_digit).collect();
        if normalized.is_empty() {
            return Ok(None);
        }

        for patient_id in self.store.list_patient_ids()? {
            let Some(record) = self.store.load_patient(&patient_id)? else {
                continue;
            };
            let stored = match record.info.get("phone") {
                Some(Value::String(stored)) => stored.clone(),
                Some(other) => other.to_string(),
                None => continue,
            };
            let stored_normalized: String =
                stored.chars().filter(char::is_ascii_digit).collect();
            if !stored_normalized.is_empty() && stored_normalized == normalized {
                info!(patient_id = %patient_id, "matched patient by phone number");
                return Ok(Some(patient_id));
            }
        }
        Ok(None)
    }

    /// Consolidated summaries, newest first.
    pub fn latest_summaries(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<ConsolidatedSummary>> {
        let Some(record) = self.store.load_patient(patient_id)? else {
            return Ok(Vec::new());
        };
        let mut summaries = record.consolidated_long_term;
        summaries.sort_by(|a, b| b.metadata.consolidated_at.cmp(&a.metadata.consolidated_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    pub fn memory_stats(&self, patient_id: &str) -> Result<MemoryStats> {
        let Some(record) = self.store.load_patient(patient_id)? else {
            return Ok(MemoryStats::default());
        };
        let now = Utc::now();
        let threshold = self.config.short_term_hours;
        let mut stats = MemoryStats {
            summaries: record.consolidated_long_term.len(),
            conversation_entries: record.conversation_history.len(),
            ..MemoryStats::default()
        };
        for entry in &record.memories {
            *stats.kind_distribution.entry(entry.kind.clone()).or_insert(0) += 1;
            if entry.consolidated {
                stats.consolidated_entries += 1;
            } else if entry.is_short_term(now, threshold) {
                stats.short_term_unconsolidated += 1;
            } else {
                stats.long_term_unconsolidated += 1;
            }
        }
        Ok(stats)
    }

    /// Collapse every long-term unconsolidated entry into one LLM-authored
    /// summary.
    ///
    /// Returns `Ok(false)` when there is nothing to do. Any generation or
    /// parse failure leaves the record untouched and surfaces as `Err`; the
    /// pending entries stay eligible for the next consolidation sweep.
    pub async fn consolidate(&self, patient_id: &str) -> Result<bool> {
        let Some(mut record) = self.store.load_patient(patient_id)? else {
            warn!(patient_id, "cannot consolidate memories for unknown patient");
            return Ok(false);
        };

        let now = Utc::now();
        let threshold = self.config.short_term_hours;
        let mut selected: Vec<&MemoryEntry> = record
            .memories
            .iter()
            .filter(|entry| entry.matches(Horizon::LongTermUnconsolidated, now, threshold))
            .collect();
        if selected.is_empty() {
            debug!(patient_id, "no long-term entries pending consolidation");
            return Ok(false);
        }
        selected.sort_by_key(|entry| entry.timestamp);

        let selected_ids: Vec<Ulid> = selected.iter().map(|entry| entry.id).collect();
        let digest = build_digest(&selected, self.config.digest_char_cap);
        let period = period_covered(&selected);
        let patient_info =
            serde_json::to_string(&record.info).context("failed to serialize patient info")?;

        info!(
            patient_id,
            entries = selected.len(),
            "consolidating long-term memory entries"
        );

        let prompt = format!(
            "Based on the patient information and the medical records below (all older \
than {threshold} hours), produce a concise long-term memory summary.\n\n\
Patient information: {patient_info}\n\n\
Recent medical records:\n{digest}\n\n\
Analyze the records and summarize the key information strictly as JSON:\n\
{{\n\
  \"summary_date\": \"{summary_date}\",\n\
  \"period_covered\": {period},\n\
  \"key_diagnoses\": [\"main diagnoses, concise\"],\n\
  \"significant_symptoms\": [\"important symptoms, concise\"],\n\
  \"treatments_procedures\": [\"main treatments or procedures\"],\n\
  \"medication_summary\": \"concise medication overview\",\n\
  \"overall_status_trend\": \"overall trend of the patient's condition\",\n\
  \"follow_up_recommendations\": [\"important follow-up recommendations\"]\n\
}}\n\n\
Keep the JSON well-formed and the content accurate. Use an empty list [] or \
empty string \"\" for anything the records cannot support.",
            summary_date = now.to_rfc3339(),
            period = serde_json::to_string(&period).unwrap_or_else(|_| "[]".to_string()),
        );

        let response = self
            .generation
            .generate(&prompt, SUMMARY_SYSTEM_MESSAGE, 0.1, 800)
            .await
            .context("memory consolidation generation call failed")?;

        let raw: Value = extract::parse_object(&response)
            .context("consolidation response did not contain a JSON object")?;
        for field in REQUIRED_SUMMARY_FIELDS {
            if raw.get(field).is_none() {
                bail!("consolidation summary missing required field '{field}'");
            }
        }
        let summary: LongTermSummary = serde_json::from_value(raw)
            .context("consolidation summary had an unexpected shape")?;

        // Summary append and flag flips land in one record write.
        record.consolidated_long_term.push(ConsolidatedSummary {
            summary,
            metadata: SummaryMetadata {
                id: Ulid::new(),
                consolidated_at: now,
                source_entry_ids: selected_ids.clone(),
            },
        });
        for entry in &mut record.memories {
            if selected_ids.contains(&entry.id) {
                entry.consolidated = true;
            }
        }
        record.last_updated = Utc::now();
        self.store.save_patient(patient_id, &record)?;

        info!(
            patient_id,
            absorbed = selected_ids.len(),
            "long-term summary stored"
        );
        Ok(true)
    }

    /// Out-of-band sweep over every known patient. Per-patient failures are
    /// non-fatal: the entries stay pending and the sweep moves on. Returns
    /// how many patients produced a new summary.
    pub async fn consolidate_all(&self) -> Result<usize> {
        let mut consolidated = 0;
        for patient_id in self.store.list_patient_ids()? {
            match self.consolidate(&patient_id).await {
                Ok(true) => consolidated += 1,
                Ok(false) => {}
                Err(error) => {
                    warn!(
                        patient_id = %patient_id,
                        error = %error,
                        "consolidation failed, entries remain pending"
                    );
                }
            }
        }
        Ok(consolidated)
    }
}

fn build_digest(entries: &[&MemoryEntry], char_cap: usize) -> String {
    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries {
        let payload = serde_json::to_string(&entry.payload).unwrap_or_else(|_| "null".to_string());
        let truncated = match payload.char_indices().nth(DIGEST_PAYLOAD_CAP) {
            Some((idx, _)) => format!("{}…", &payload[..idx]),
            None => payload,
        };
        lines.push(format!(
            "- time: {}, kind: {}, payload: {}",
            entry.timestamp.to_rfc3339(),
            entry.kind,
            truncated
        ));
    }
    let digest = lines.join("\n");
    match digest.char_indices().nth(char_cap) {
        Some((idx, _)) => format!("{}\n…", &digest[..idx]),
        None => digest,
    }
}

fn period_covered(entries: &[&MemoryEntry]) -> Vec<String> {
    let mut dates: Vec<String> = entries
        .iter()
        .map(|entry| entry.timestamp.date_naive().to_string())
        .collect();
    dates.sort();
    match (dates.first(), dates.last()) {
        (Some(first), Some(last)) => vec![first.clone(), last.clone()],
        _ => vec!["unknown".to_string(), "unknown".to_string()],
    }
}
