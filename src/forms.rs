//! Form schemas for the clinic's autosaving forms.
//!
//! Each form declares its fields up front. Caller-supplied initial data is
//! validated here, at the boundary; after that the controller accepts any
//! field edit verbatim.

use serde::Serialize;
use serde_json::Value;

use crate::autosave::Draft;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FieldKind {
    Text,
    TextArea { rows: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FormSchema {
    pub form_id: &'static str,
    pub title: &'static str,
    pub fields: &'static [FieldSpec],
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormError {
    #[error("Form data must be a JSON object")]
    NotAnObject,

    #[error("Field {0} must be a string")]
    NonStringValue(String),
}

const CLINICAL_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "patientName",
        label: "Patient name",
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "diagnosis",
        label: "Diagnosis",
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "sessionNotes",
        label: "Session notes",
        kind: FieldKind::TextArea { rows: 5 },
    },
    FieldSpec {
        name: "treatmentPlan",
        label: "Treatment plan",
        kind: FieldKind::TextArea { rows: 3 },
    },
];

impl FormSchema {
    /// Clinical record form.
    pub const fn clinical_record() -> Self {
        Self {
            form_id: "clinical-record-form",
            title: "Clinical record",
            fields: CLINICAL_FIELDS,
        }
    }

    /// Notes form shown next to the session recorder.
    pub const fn session_notes() -> Self {
        Self {
            form_id: "session-notes-form",
            title: "Session notes",
            fields: CLINICAL_FIELDS,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "clinical-record" | "clinical-record-form" => Some(Self::clinical_record()),
            "session-notes" | "session-notes-form" => Some(Self::session_notes()),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Every declared field, empty.
    pub fn empty_draft(&self) -> Draft {
        Draft::from_pairs(self.fields.iter().map(|f| (f.name, "")))
    }

    /// Build the initial Draft from untyped JSON.
    ///
    /// Declared fields come first, in schema order; missing or null ones
    /// become empty. Extra string keys are kept after them.
    pub fn draft_from_json(&self, data: &Value) -> Result<Draft, FormError> {
        let object = data.as_object().ok_or(FormError::NotAnObject)?;
        let mut draft = self.empty_draft();

        for (name, value) in object {
            match value {
                Value::String(text) => {
                    draft.set(name.as_str(), text.as_str());
                }
                Value::Null => {}
                _ => return Err(FormError::NonStringValue(name.clone())),
            }
        }

        let undeclared: Vec<&str> = draft
            .field_names()
            .into_iter()
            .filter(|name| !self.is_declared(name))
            .collect();
        if !undeclared.is_empty() {
            tracing::debug!(form_id = self.form_id, ?undeclared, "Form data has undeclared fields");
        }

        Ok(draft)
    }
}

/// Pre-filled record used by the clinical-record demo.
pub fn clinical_record_sample() -> Draft {
    Draft::from_pairs([
        ("patientName", "María González"),
        ("diagnosis", "Generalized anxiety disorder"),
        (
            "sessionNotes",
            "Patient reports fewer anxiety symptoms after practising breathing and \
             mindfulness techniques. Social situations remain difficult.",
        ),
        (
            "treatmentPlan",
            "Continue graded exposure to social situations. Keep a daily mindfulness \
             practice. Review medication next session.",
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn both_forms_declare_four_fields() {
        for schema in [FormSchema::clinical_record(), FormSchema::session_notes()] {
            assert_eq!(
                schema.empty_draft().field_names(),
                vec!["patientName", "diagnosis", "sessionNotes", "treatmentPlan"]
            );
        }
    }

    #[test]
    fn lookup_by_short_or_full_name() {
        assert_eq!(
            FormSchema::by_name("session-notes"),
            Some(FormSchema::session_notes())
        );
        assert_eq!(
            FormSchema::by_name("clinical-record-form"),
            Some(FormSchema::clinical_record())
        );
        assert_eq!(FormSchema::by_name("payments"), None);
    }

    #[test]
    fn json_fills_declared_fields_in_schema_order() {
        let schema = FormSchema::clinical_record();
        let draft = schema
            .draft_from_json(&json!({
                "treatmentPlan": "CBT",
                "patientName": "Ana",
                "diagnosis": null,
            }))
            .unwrap();

        assert_eq!(draft.get("patientName"), Some("Ana"));
        assert_eq!(draft.get("diagnosis"), Some(""));
        assert_eq!(draft.get("sessionNotes"), Some(""));
        assert_eq!(draft.get("treatmentPlan"), Some("CBT"));
        assert_eq!(draft.field_names()[0], "patientName");
    }

    #[test]
    fn json_keeps_undeclared_string_fields() {
        let schema = FormSchema::session_notes();
        let draft = schema.draft_from_json(&json!({"mood": "stable"})).unwrap();
        assert_eq!(draft.len(), 5);
        assert_eq!(draft.get("mood"), Some("stable"));
        assert!(!schema.is_declared("mood"));
    }

    #[test]
    fn json_rejects_non_strings_and_non_objects() {
        let schema = FormSchema::clinical_record();
        assert_eq!(
            schema.draft_from_json(&json!({"patientName": 42})),
            Err(FormError::NonStringValue("patientName".into()))
        );
        assert_eq!(
            schema.draft_from_json(&json!(["patientName"])),
            Err(FormError::NotAnObject)
        );
    }

    #[test]
    fn text_areas_carry_row_hints() {
        let schema = FormSchema::clinical_record();
        assert_eq!(
            schema.field("sessionNotes").map(|f| f.kind),
            Some(FieldKind::TextArea { rows: 5 })
        );
        assert_eq!(schema.field("patientName").map(|f| f.kind), Some(FieldKind::Text));
    }

    #[test]
    fn sample_matches_schema() {
        let schema = FormSchema::clinical_record();
        let sample = clinical_record_sample();
        assert!(sample.field_names().iter().all(|name| schema.is_declared(name)));
        assert_eq!(sample.get("patientName"), Some("María González"));
    }
}
