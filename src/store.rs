//! Saved-form repository.
//!
//! Pages never hold module-level record arrays; they get a `FormStore`
//! injected and go through `list` / `filter` / `upsert`. The in-memory
//! implementation backs the terminal harness and tests.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::autosave::Draft;

/// One persisted form, latest revision only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedForm {
    pub id: Uuid,
    pub form_id: String,
    pub fields: Draft,
    /// Starts at 1, bumped on every upsert.
    pub revision: u64,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Internal lock error")]
    LockPoisoned,

    #[error("Form not found: {0}")]
    NotFound(String),
}

pub trait FormStore: Send + Sync {
    fn list(&self) -> Result<Vec<SavedForm>, StoreError>;

    fn filter(&self, predicate: &dyn Fn(&SavedForm) -> bool) -> Result<Vec<SavedForm>, StoreError>;

    /// Insert or replace the record for `form_id`.
    fn upsert(&self, form_id: &str, fields: Draft) -> Result<SavedForm, StoreError>;

    fn get(&self, form_id: &str) -> Result<SavedForm, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryFormStore {
    records: RwLock<Vec<SavedForm>>,
}

impl InMemoryFormStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormStore for InMemoryFormStore {
    fn list(&self) -> Result<Vec<SavedForm>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.clone())
    }

    fn filter(&self, predicate: &dyn Fn(&SavedForm) -> bool) -> Result<Vec<SavedForm>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.iter().filter(|r| predicate(r)).cloned().collect())
    }

    fn upsert(&self, form_id: &str, fields: Draft) -> Result<SavedForm, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let now = Utc::now();

        if let Some(existing) = records.iter_mut().find(|r| r.form_id == form_id) {
            existing.fields = fields;
            existing.revision += 1;
            existing.saved_at = now;
            return Ok(existing.clone());
        }

        let record = SavedForm {
            id: Uuid::new_v4(),
            form_id: form_id.to_string(),
            fields,
            revision: 1,
            saved_at: now,
        };
        records.push(record.clone());
        Ok(record)
    }

    fn get(&self, form_id: &str) -> Result<SavedForm, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        records
            .iter()
            .find(|r| r.form_id == form_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(form_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes(text: &str) -> Draft {
        Draft::from_pairs([("patientName", "Ana"), ("sessionNotes", text)])
    }

    #[test]
    fn upsert_inserts_then_bumps_revision() {
        let store = InMemoryFormStore::new();
        let first = store.upsert("clinical-record-form", notes("one")).unwrap();
        assert_eq!(first.revision, 1);

        let second = store.upsert("clinical-record-form", notes("two")).unwrap();
        assert_eq!(second.revision, 2);
        assert_eq!(second.id, first.id);
        assert_eq!(second.fields.get("sessionNotes"), Some("two"));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn filter_selects_matching_records() {
        let store = InMemoryFormStore::new();
        store.upsert("clinical-record-form", notes("a")).unwrap();
        store.upsert("session-notes-form", notes("b")).unwrap();

        let hits = store
            .filter(&|r| r.fields.get("sessionNotes") == Some("b"))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].form_id, "session-notes-form");
    }

    #[test]
    fn get_missing_form_is_not_found() {
        let store = InMemoryFormStore::new();
        let err = store.get("nope").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "nope"));
    }

    #[test]
    fn store_is_object_safe() {
        fn _assert_store(_: &dyn FormStore) {}
    }
}
