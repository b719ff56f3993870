//! Autosave controller: owns the Draft and decides when it reaches the sink.
//!
//! Key properties:
//! - Field edits are synchronous, never fail, and never wait on a save
//! - At most one Save Sink call in flight; later requests coalesce
//! - A snapshot is captured the instant a save starts
//! - The dirty flag only clears when the completed save covers every edit
//! - Sink failures stay inside: status goes to `error`, the Draft is kept

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::runtime::Handle;
use tokio::sync::watch;

use super::error::SaveError;
use super::sink::SaveSink;
use super::types::*;
use crate::config::AutosaveConfig;

// ═══════════════════════════════════════════════════════════
// Internal state
// ═══════════════════════════════════════════════════════════

struct Inner {
    draft: Draft,
    dirty: bool,
    status: SaveStatus,
    in_flight: bool,
    /// A manual/unload/explicit request arrived while a save was running.
    resave_requested: bool,
    /// Bumped by every edit and reload; compared against the snapshot's.
    edit_sequence: u64,
    last_saved: Option<DateTime<Utc>>,
    last_error: Option<String>,
    saves_completed: u64,
    /// Bumped on every published report.
    version: u64,
}

struct Shared {
    form_id: String,
    config: AutosaveConfig,
    sink: Arc<dyn SaveSink>,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<StatusReport>,
}

enum Completion {
    Done(SaveOutcome),
    Resave(Snapshot),
}

// ═══════════════════════════════════════════════════════════
// AutosaveController
// ═══════════════════════════════════════════════════════════

/// Autosave state machine for one hosting form.
///
/// Cloning is cheap and every clone drives the same Draft. Save-triggering
/// operations capture the snapshot and call the sink *before* returning
/// their future; awaiting the future only applies the result.
#[derive(Clone)]
pub struct AutosaveController {
    shared: Arc<Shared>,
}

impl AutosaveController {
    pub fn new(
        form_id: impl Into<String>,
        initial: Draft,
        sink: Arc<dyn SaveSink>,
        config: AutosaveConfig,
    ) -> Self {
        let form_id = form_id.into();
        let inner = Inner {
            draft: initial,
            dirty: config.start_dirty,
            status: SaveStatus::Idle,
            in_flight: false,
            resave_requested: false,
            edit_sequence: 0,
            last_saved: None,
            last_error: None,
            saves_completed: 0,
            version: 0,
        };
        let (status_tx, _) = watch::channel(build_report(&form_id, &inner));

        tracing::debug!(
            form_id = %form_id,
            fields = inner.draft.len(),
            start_dirty = config.start_dirty,
            "Autosave controller created"
        );

        Self {
            shared: Arc::new(Shared {
                form_id,
                config,
                sink,
                inner: Mutex::new(inner),
                status_tx,
            }),
        }
    }

    pub fn form_id(&self) -> &str {
        &self.shared.form_id
    }

    pub fn config(&self) -> &AutosaveConfig {
        &self.shared.config
    }

    // ── Edits ───────────────────────────────────────────────

    /// Apply one field edit. Unknown names are appended to the Draft.
    /// Does not touch the timer: ticks keep their fixed cadence.
    pub fn on_field_change(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut inner = self.lock();
        inner.draft.set(name.as_str(), value);
        inner.dirty = true;
        inner.edit_sequence += 1;
        tracing::trace!(
            form_id = %self.shared.form_id,
            field = %name,
            sequence = inner.edit_sequence,
            "Field changed"
        );
        self.publish(inner);
    }

    /// Replace the Draft with content reloaded from the backend.
    /// The new content is considered persisted.
    pub fn reload(&self, draft: Draft) {
        let mut inner = self.lock();
        inner.draft = draft;
        inner.dirty = false;
        inner.edit_sequence += 1;
        if !inner.in_flight {
            inner.status = SaveStatus::Idle;
        }
        inner.last_error = None;
        tracing::info!(form_id = %self.shared.form_id, "Draft reloaded");
        self.publish(inner);
    }

    // ── Save triggers ───────────────────────────────────────

    /// Timer tick: save if dirty and nothing is in flight, otherwise no-op.
    pub fn tick(&self) -> BoxFuture<'static, SaveOutcome> {
        self.dispatch(SaveTrigger::Timer)
    }

    /// Save the current Draft regardless of the dirty flag.
    /// Coalesces into the running save if one is in flight.
    pub fn save(&self) -> BoxFuture<'static, SaveOutcome> {
        self.dispatch(SaveTrigger::Explicit)
    }

    /// User-requested save. No sink call when nothing is dirty.
    pub fn manual_save(&self) -> BoxFuture<'static, SaveOutcome> {
        self.dispatch(SaveTrigger::Manual)
    }

    /// Best-effort flush for a page that is about to be discarded.
    ///
    /// Returns immediately. When dirty, the snapshot is captured and the
    /// sink called before this returns; completion runs on the current
    /// tokio runtime in the background. Nothing guarantees it finishes.
    pub fn flush_on_unload(&self) -> UnloadDecision {
        let Ok(runtime) = Handle::try_current() else {
            let dirty = self.is_dirty();
            if dirty {
                tracing::warn!(
                    form_id = %self.shared.form_id,
                    "Unload flush skipped: no async runtime available"
                );
            }
            return UnloadDecision {
                action: if dirty { UnloadAction::NoRuntime } else { UnloadAction::Clean },
                prompt_user: dirty,
                pending: None,
            };
        };

        match self.begin(SaveTrigger::Unload) {
            Ok(snapshot) => {
                let sequence = snapshot.sequence;
                let handle = runtime.spawn(self.drive(snapshot));
                tracing::info!(
                    form_id = %self.shared.form_id,
                    sequence,
                    "Unload flush dispatched"
                );
                UnloadDecision {
                    action: UnloadAction::Dispatched,
                    prompt_user: true,
                    pending: Some(handle),
                }
            }
            Err(SaveOutcome::Coalesced) => UnloadDecision {
                action: UnloadAction::Coalesced,
                prompt_user: true,
                pending: None,
            },
            Err(_) => UnloadDecision {
                action: UnloadAction::Clean,
                prompt_user: false,
                pending: None,
            },
        }
    }

    /// Route a form-view message. Returns the save future for events that
    /// trigger one; edits, reloads and unload complete synchronously.
    pub fn handle(&self, event: AutosaveEvent) -> Option<BoxFuture<'static, SaveOutcome>> {
        match event {
            AutosaveEvent::FieldChanged { name, value } => {
                self.on_field_change(name, value);
                None
            }
            AutosaveEvent::Reload(draft) => {
                self.reload(draft);
                None
            }
            AutosaveEvent::Tick => Some(self.tick()),
            AutosaveEvent::ManualSave => Some(self.manual_save()),
            AutosaveEvent::Unload => {
                self.flush_on_unload();
                None
            }
        }
    }

    // ── Status surface ──────────────────────────────────────

    /// Copy of the current Draft.
    pub fn draft(&self) -> Draft {
        self.lock().draft.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn state(&self) -> ControllerState {
        let inner = self.lock();
        ControllerState::derive(inner.in_flight, inner.status, inner.dirty)
    }

    pub fn status(&self) -> SaveStatus {
        self.lock().status
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.lock().last_saved
    }

    pub fn report(&self) -> StatusReport {
        build_report(&self.shared.form_id, &self.lock())
    }

    /// Receiver that observes every status change. Reports are published
    /// after the controller's own lock is released, so holding a borrow
    /// while querying the controller is fine.
    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.shared.status_tx.subscribe()
    }

    // ── Internal ────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Edits must always succeed, so a poisoned lock is recovered.
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the state in `inner`, releasing the lock before touching
    /// the watch channel. The version check keeps a slower publisher from
    /// overwriting a newer report.
    fn publish(&self, mut inner: MutexGuard<'_, Inner>) {
        inner.version += 1;
        let report = build_report(&self.shared.form_id, &inner);
        drop(inner);
        self.shared.status_tx.send_if_modified(|current| {
            if report.version > current.version {
                *current = report;
                true
            } else {
                false
            }
        });
    }

    fn dispatch(&self, trigger: SaveTrigger) -> BoxFuture<'static, SaveOutcome> {
        match self.begin(trigger) {
            Ok(snapshot) => self.drive(snapshot),
            Err(outcome) => {
                tracing::debug!(
                    form_id = %self.shared.form_id,
                    %trigger,
                    ?outcome,
                    "Save not started"
                );
                future::ready(outcome).boxed()
            }
        }
    }

    /// Decide whether `trigger` starts a save; if so, capture the snapshot.
    fn begin(&self, trigger: SaveTrigger) -> Result<Snapshot, SaveOutcome> {
        let mut inner = self.lock();

        if trigger != SaveTrigger::Explicit && !inner.dirty {
            return Err(SaveOutcome::NothingToSave);
        }
        if inner.in_flight {
            if trigger == SaveTrigger::Timer {
                return Err(SaveOutcome::AlreadySaving);
            }
            inner.resave_requested = true;
            return Err(SaveOutcome::Coalesced);
        }

        tracing::debug!(form_id = %self.shared.form_id, %trigger, "Save started");
        let snapshot = self.capture(&mut inner);
        self.publish(inner);
        Ok(snapshot)
    }

    fn capture(&self, inner: &mut Inner) -> Snapshot {
        inner.in_flight = true;
        inner.status = SaveStatus::Saving;
        Snapshot {
            form_id: self.shared.form_id.clone(),
            fields: inner.draft.clone(),
            sequence: inner.edit_sequence,
            taken_at: Utc::now(),
        }
    }

    /// Call the sink now and return a future that applies its result,
    /// running one follow-up save if a request was coalesced meanwhile.
    fn drive(&self, snapshot: Snapshot) -> BoxFuture<'static, SaveOutcome> {
        let this = self.clone();
        let guard = AbandonGuard {
            controller: self.clone(),
            sequence: Some(snapshot.sequence),
        };
        let mut sequence = snapshot.sequence;
        let mut pending = self.invoke_sink(snapshot);

        async move {
            let mut guard = guard;
            loop {
                let result = pending.await;
                guard.sequence = None;
                match this.complete(sequence, result) {
                    Completion::Done(outcome) => return outcome,
                    Completion::Resave(next) => {
                        sequence = next.sequence;
                        guard.sequence = Some(sequence);
                        pending = this.invoke_sink(next);
                    }
                }
            }
        }
        .boxed()
    }

    fn invoke_sink(&self, snapshot: Snapshot) -> BoxFuture<'static, Result<(), SaveError>> {
        tracing::debug!(
            form_id = %snapshot.form_id,
            sequence = snapshot.sequence,
            fields = snapshot.fields.len(),
            "Dispatching snapshot to save sink"
        );
        let save = self.shared.sink.save(snapshot);
        match self.shared.config.save_timeout {
            Some(limit) => async move {
                tokio::time::timeout(limit, save)
                    .await
                    .unwrap_or(Err(SaveError::TimedOut(limit)))
            }
            .boxed(),
            None => save,
        }
    }

    fn complete(&self, sequence: u64, result: Result<(), SaveError>) -> Completion {
        let mut inner = self.lock();
        inner.in_flight = false;

        let outcome = match result {
            Ok(()) => {
                let at = Utc::now();
                let clean = inner.edit_sequence == sequence;
                if clean {
                    inner.dirty = false;
                }
                inner.status = SaveStatus::Idle;
                inner.last_saved = Some(at);
                inner.last_error = None;
                inner.saves_completed += 1;
                tracing::info!(
                    form_id = %self.shared.form_id,
                    sequence,
                    clean,
                    "Form saved"
                );
                SaveOutcome::Saved { at, clean }
            }
            // Only a reload bumps the sequence without setting dirty.
            Err(e) if inner.edit_sequence != sequence && !inner.dirty => {
                inner.status = SaveStatus::Idle;
                tracing::info!(
                    form_id = %self.shared.form_id,
                    sequence,
                    error = %e,
                    "Save of reloaded-over content failed; draft stays clean"
                );
                SaveOutcome::Failed(e)
            }
            Err(e) => {
                inner.status = SaveStatus::Error;
                inner.dirty = true;
                inner.last_error = Some(e.to_string());
                tracing::warn!(
                    form_id = %self.shared.form_id,
                    sequence,
                    error = %e,
                    "Save failed; changes kept for the next trigger"
                );
                SaveOutcome::Failed(e)
            }
        };

        let follow_up = inner.resave_requested && outcome.is_saved() && inner.dirty;
        inner.resave_requested = false;

        if follow_up {
            tracing::debug!(form_id = %self.shared.form_id, "Running coalesced save");
            let next = self.capture(&mut inner);
            self.publish(inner);
            return Completion::Resave(next);
        }

        self.publish(inner);
        Completion::Done(outcome)
    }
}

fn build_report(form_id: &str, inner: &Inner) -> StatusReport {
    let state = ControllerState::derive(inner.in_flight, inner.status, inner.dirty);
    StatusReport {
        form_id: form_id.to_string(),
        state,
        status: inner.status,
        dirty: inner.dirty,
        last_saved: inner.last_saved,
        last_error: inner.last_error.clone(),
        saves_completed: inner.saves_completed,
        can_manual_save: inner.dirty && !inner.in_flight,
        version: inner.version,
    }
}

/// Releases the in-flight slot if a save future is dropped unfinished.
struct AbandonGuard {
    controller: AutosaveController,
    sequence: Option<u64>,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if let Some(sequence) = self.sequence.take() {
            // Failures never schedule a follow-up, so this is always Done.
            let _ = self.controller.complete(sequence, Err(SaveError::Abandoned));
        }
    }
}
