//! Autosave error types.
//!
//! `SaveError` is the only failure the controller knows about. It never
//! escapes the controller: a failed save is absorbed into the status
//! surface and retried on the next natural trigger.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    #[error("Save rejected: {0}")]
    Rejected(String),

    #[error("Save timed out after {0:?}")]
    TimedOut(Duration),

    /// The save future was dropped before the sink answered.
    #[error("Save abandoned before completion")]
    Abandoned,
}

impl SaveError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Unload signal already fired; no further hooks accepted")]
    AlreadyFired,
}
