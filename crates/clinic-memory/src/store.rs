//! Durable key/value storage behind the memory system.
//!
//! The default implementation keeps the reference layout: one JSON document
//! with top-level `patients` and `active_consultations` maps, replaced
//! wholesale on every write. A missing or unreadable document on first run
//! yields an empty store, never an error.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

use clinic_core::ConsultationContext;

use crate::record::PatientRecord;

/// Whole-record get/set keyed by patient id or session id.
///
/// Writes replace the full record; callers read the latest record immediately
/// before mutating it. No field-level patching, no optimistic concurrency.
pub trait KeyValueStore: Send + Sync {
    fn load_patient(&self, patient_id: &str) -> Result<Option<PatientRecord>>;
    fn save_patient(&self, patient_id: &str, record: &PatientRecord) -> Result<()>;
    fn list_patient_ids(&self) -> Result<Vec<String>>;

    fn load_context(&self, session_id: &str) -> Result<Option<ConsultationContext>>;
    fn save_context(&self, session_id: &str, context: &ConsultationContext) -> Result<()>;
    /// Returns whether a context existed.
    fn delete_context(&self, session_id: &str) -> Result<bool>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreDocument {
    patients: BTreeMap<String, PatientRecord>,
    active_consultations: BTreeMap<String, ConsultationContext>,
}

/// File-backed [`KeyValueStore`] over a single JSON document.
///
/// Every operation re-reads the document from disk and atomically replaces it
/// on mutation (write to a temp file, then rename). The mutex serializes
/// operations within this process; cross-process writers race with
/// last-write-wins semantics.
#[derive(Debug)]
pub struct JsonDocumentStore {
    path: PathBuf,
    op_lock: Mutex<()>,
}

impl JsonDocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            op_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> StoreDocument {
        if !self.path.exists() {
            return StoreDocument::default();
        }
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(document) => document,
                Err(error) => {
                    warn!(
                        path = %self.path.display(),
                        %error,
                        "memory document is corrupt, starting from an empty store"
                    );
                    StoreDocument::default()
                }
            },
            Err(error) => {
                warn!(
                    path = %self.path.display(),
                    %error,
                    "failed to read memory document, starting from an empty store"
                );
                StoreDocument::default()
            }
        }
    }

    fn write_document(&self, document: &StoreDocument) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store dir: {}", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("failed to open temp store file: {}", tmp_path.display()))?;

        let raw = serde_json::to_string_pretty(document)
            .context("failed to serialize memory document")?;
        file.write_all(raw.as_bytes())
            .context("failed to write memory document")?;
        file.flush().context("failed to flush memory document")?;

        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to atomically replace memory document {}",
                self.path.display()
            )
        })?;
        Ok(())
    }

    fn with_document<T>(&self, apply: impl FnOnce(&mut StoreDocument) -> (bool, T)) -> Result<T> {
        let _guard = self
            .op_lock
            .lock()
            .map_err(|_| anyhow!("store operation lock poisoned"))?;
        let mut document = self.read_document();
        let (dirty, result) = apply(&mut document);
        if dirty {
            self.write_document(&document)?;
        }
        Ok(result)
    }
}

impl KeyValueStore for JsonDocumentStore {
    fn load_patient(&self, patient_id: &str) -> Result<Option<PatientRecord>> {
        self.with_document(|document| (false, document.patients.get(patient_id).cloned()))
    }

    fn save_patient(&self, patient_id: &str, record: &PatientRecord) -> Result<()> {
        self.with_document(|document| {
            document
                .patients
                .insert(patient_id.to_string(), record.clone());
            (true, ())
        })
    }

    fn list_patient_ids(&self) -> Result<Vec<String>> {
        self.with_document(|document| (false, document.patients.keys().cloned().collect()))
    }

    fn load_context(&self, session_id: &str) -> Result<Option<ConsultationContext>> {
        self.with_document(|document| {
            (
                false,
                document.active_consultations.get(session_id).cloned(),
            )
        })
    }

    fn save_context(&self, session_id: &str, context: &ConsultationContext) -> Result<()> {
        self.with_document(|document| {
            document
                .active_consultations
                .insert(session_id.to_string(), context.clone());
            (true, ())
        })
    }

    fn delete_context(&self, session_id: &str) -> Result<bool> {
        self.with_document(|document| {
            let existed = document.active_consultations.remove(session_id).is_some();
            (existed, existed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn make_test_store() -> JsonDocumentStore {
        let dir = std::env::temp_dir().join(format!("clinic-store-test-{}", Ulid::new()));
        JsonDocumentStore::new(dir.join("memory.json"))
    }

    #[test]
    fn test_missing_document_reads_empty() {
        let store = make_test_store();
        assert!(store.load_patient("p-1").unwrap().is_none());
        assert!(store.list_patient_ids().unwrap().is_empty());
        assert!(store.load_context("web-1").unwrap().is_none());
    }

    #[test]
    fn test_patient_round_trip() {
        let store = make_test_store();
        let mut record = PatientRecord::default();
        record
            .info
            .insert("name".to_string(), serde_json::json!("Alex"));

        store.save_patient("p-1", &record).unwrap();
        let loaded = store.load_patient("p-1").unwrap().unwrap();
        assert_eq!(loaded.info["name"], "Alex");
        assert_eq!(store.list_patient_ids().unwrap(), vec!["p-1".to_string()]);

        fs::remove_dir_all(store.path().parent().unwrap()).ok();
    }

    #[test]
    fn test_context_delete_then_absent() {
        let store = make_test_store();
        let context = ConsultationContext::new("web-1", "p-1");
        store.save_context("web-1", &context).unwrap();
        assert!(store.load_context("web-1").unwrap().is_some());

        assert!(store.delete_context("web-1").unwrap());
        assert!(store.load_context("web-1").unwrap().is_none());
        assert!(!store.delete_context("web-1").unwrap());

        fs::remove_dir_all(store.path().parent().unwrap()).ok();
    }

    #[test]
    fn test_corrupt_document_tolerated() {
        let store = make_test_store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{ not json").unwrap();

        assert!(store.load_patient("p-1").unwrap().is_none());
        store
            .save_patient("p-1", &PatientRecord::default())
            .unwrap();
        assert!(store.load_patient("p-1").unwrap().is_some());

        fs::remove_dir_all(store.path().parent().unwrap()).ok();
    }

    #[test]
    fn test_writes_survive_reopen() {
        let store = make_test_store();
        let context = ConsultationContext::new("web-2", "p-2");
        store.save_context("web-2", &context).unwrap();

        let reopened = JsonDocumentStore::new(store.path().to_path_buf());
        let loaded = reopened.load_context("web-2").unwrap().unwrap();
        assert_eq!(loaded.patient_id, "p-2");

        fs::remove_dir_all(store.path().parent().unwrap()).ok();
    }
}
