//! Durable per-patient records.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Time-window filter applied when querying memory entries.
///
/// The horizon of an entry is a pure function of its age against the
/// configured threshold; it is recomputed at query time and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    All,
    ShortTerm,
    LongTermUnconsolidated,
}

/// Immutable event appended to a patient's memory stream.
///
/// Only `consolidated` ever changes after the fact, and only from false to
/// true when a summary absorbs the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Ulid,
    /// Free-form tag, e.g. "diagnosis", "prescription_generated".
    pub kind: String,
    pub payload: Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub consolidated: bool,
}

impl MemoryEntry {
    pub fn is_short_term(&self, now: DateTime<Utc>, threshold_hours: i64) -> bool {
        now - self.timestamp < Duration::hours(threshold_hours)
    }

    pub fn matches(&self, horizon: Horizon, now: DateTime<Utc>, threshold_hours: i64) -> bool {
        match horizon {
            Horizon::All => true,
            Horizon::ShortTerm => self.is_short_term(now, threshold_hours),
            Horizon::LongTermUnconsolidated => {
                !self.is_short_term(now, threshold_hours) && !self.consolidated
            }
        }
    }
}

/// Append-only audit entry of one conversational exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: Ulid,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Structured long-term summary authored by the generation service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LongTermSummary {
    pub summary_date: String,
    /// `[earliest, latest]` date covered by the source entries.
    pub period_covered: Vec<String>,
    pub key_diagnoses: Vec<String>,
    pub significant_symptoms: Vec<String>,
    pub treatments_procedures: Vec<String>,
    pub medication_summary: String,
    pub overall_status_trend: String,
    pub follow_up_recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryMetadata {
    pub id: Ulid,
    pub consolidated_at: DateTime<Utc>,
    /// Ids of every memory entry this summary absorbed.
    pub source_entry_ids: Vec<Ulid>,
}

/// Immutable consolidation result; append-only alongside the raw entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedSummary {
    pub summary: LongTermSummary,
    pub metadata: SummaryMetadata,
}

/// Everything the system knows about one patient. Outlives any single
/// consultation; created lazily, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientRecord {
    pub info: BTreeMap<String, Value>,
    pub memories: Vec<MemoryEntry>,
    pub consolidated_long_term: Vec<ConsolidatedSummary>,
    pub conversation_history: Vec<ConversationEntry>,
    pub last_updated: DateTime<Utc>,
}

impl Default for PatientRecord {
    fn default() -> Self {
        Self {
            info: BTreeMap::new(),
            memories: Vec::new(),
            consolidated_long_term: Vec::new(),
            conversation_history: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_aged(hours: i64, consolidated: bool) -> MemoryEntry {
        MemoryEntry {
            id: Ulid::new(),
            kind: "diagnosis".to_string(),
            payload: Value::Null,
            metadata: BTreeMap::new(),
            timestamp: Utc::now() - Duration::hours(hours),
            consolidated,
        }
    }

    #[test]
    fn test_horizon_is_recomputed_from_age() {
        let now = Utc::now();
        let fresh = entry_aged(1, false);
        let aged = entry_aged(25, false);

        assert!(fresh.is_short_term(now, 24));
        assert!(!aged.is_short_term(now, 24));

        // Same entry, clock moved forward past the threshold: horizon flips
        // without any write.
        let later = now + Duration::hours(24);
        assert!(!fresh.is_short_term(later, 24));
    }

    #[test]
    fn test_horizon_matching() {
        let now = Utc::now();
        let fresh = entry_aged(1, false);
        let aged = entry_aged(25, false);
        let absorbed = entry_aged(30, true);

        assert!(fresh.matches(Horizon::All, now, 24));
        assert!(fresh.matches(Horizon::ShortTerm, now, 24));
        assert!(!fresh.matches(Horizon::LongTermUnconsolidated, now, 24));

        assert!(aged.matches(Horizon::LongTermUnconsolidated, now, 24));
        assert!(!aged.matches(Horizon::ShortTerm, now, 24));

        assert!(absorbed.matches(Horizon::All, now, 24));
        assert!(!absorbed.matches(Horizon::LongTermUnconsolidated, now, 24));
    }

    #[test]
    fn test_patient_record_serde_defaults() {
        let record: PatientRecord = serde_json::from_str("{}").unwrap();
        assert!(record.info.is_empty());
        assert!(record.memories.is_empty());
        assert!(record.consolidated_long_term.is_empty());
    }
}
