//! Core types for the autosave controller.
//!
//! These model the lifecycle of one hosting form:
//! Draft → (edit) → dirty → Snapshot → Save Sink → StatusReport.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tokio::task::JoinHandle;

use super::error::SaveError;

// ═══════════════════════════════════════════
// Draft
// ═══════════════════════════════════════════

/// In-progress form content: field name → value, in declaration order.
///
/// New field names are appended; existing ones are overwritten in place,
/// so iteration order always matches the order the form declared them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    fields: Vec<(String, String)>,
}

impl Draft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut draft = Self::new();
        for (name, value) in pairs {
            draft.set(name, value);
        }
        draft
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Insert or overwrite a field. Returns true if the stored value changed.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, current)) if *current == value => false,
            Some((_, current)) => {
                *current = value;
                true
            }
            None => {
                self.fields.push((name, value));
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl Serialize for Draft {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ═══════════════════════════════════════════
// Snapshot, what the Save Sink receives
// ═══════════════════════════════════════════

/// Immutable copy of the Draft captured the instant a save starts.
/// Edits made afterwards never reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub form_id: String,
    pub fields: Draft,
    /// Edit counter at capture time.
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════
// Status surface
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    Idle,
    Saving,
    Error,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Saving => "saving",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The controller's four-state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    IdleClean,
    IdleDirty,
    Saving,
    ErrorDirty,
}

impl ControllerState {
    pub(crate) fn derive(in_flight: bool, status: SaveStatus, dirty: bool) -> Self {
        if in_flight {
            Self::Saving
        } else if status == SaveStatus::Error {
            Self::ErrorDirty
        } else if dirty {
            Self::IdleDirty
        } else {
            Self::IdleClean
        }
    }
}

/// Everything a UI needs to render the save badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub form_id: String,
    pub state: ControllerState,
    pub status: SaveStatus,
    pub dirty: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub saves_completed: u64,
    /// Manual save button enabled: dirty and not already saving.
    pub can_manual_save: bool,
    /// Increments with every published change.
    pub version: u64,
}

impl StatusReport {
    /// Badge text shown next to the form title.
    pub fn label(&self) -> &'static str {
        match self.state {
            ControllerState::Saving => "Saving...",
            ControllerState::ErrorDirty => "Save failed, unsaved changes",
            ControllerState::IdleDirty => "Unsaved changes",
            ControllerState::IdleClean => "Saved",
        }
    }
}

// ═══════════════════════════════════════════
// Triggers, outcomes, events
// ═══════════════════════════════════════════

/// What asked for a save. Decides whether a busy controller coalesces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveTrigger {
    Timer,
    Manual,
    Unload,
    Explicit,
}

impl std::fmt::Display for SaveTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timer => write!(f, "timer"),
            Self::Manual => write!(f, "manual"),
            Self::Unload => write!(f, "unload"),
            Self::Explicit => write!(f, "explicit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The sink accepted the snapshot. `clean` is false when edits
    /// arrived while it was in flight.
    Saved { at: DateTime<Utc>, clean: bool },
    /// The sink failed; the Draft is still dirty.
    Failed(SaveError),
    /// A save was already in flight; this request was folded into it.
    Coalesced,
    /// A timer tick found a save in flight and did nothing.
    AlreadySaving,
    /// Nothing dirty, no sink call.
    NothingToSave,
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// Messages from the form view into the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveEvent {
    FieldChanged { name: String, value: String },
    Tick,
    ManualSave,
    Unload,
    Reload(Draft),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnloadAction {
    /// Nothing unsaved.
    Clean,
    /// A save was started and left running in the background.
    Dispatched,
    /// A save was already in flight; a follow-up was requested.
    Coalesced,
    /// No async runtime to run the save on.
    NoRuntime,
}

/// Result of an unload flush. Returned without waiting for the save.
#[derive(Debug)]
pub struct UnloadDecision {
    pub action: UnloadAction,
    /// Host should ask before discarding the page.
    pub prompt_user: bool,
    /// Background save, for hosts that can afford to wait on it.
    pub pending: Option<JoinHandle<SaveOutcome>>,
}
