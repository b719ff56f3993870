//! Mount/unmount glue between a controller and its host capabilities.
//!
//! Mounting starts exactly one periodic timer and registers exactly one
//! unload hook. Unmounting (or dropping the session) cancels both; it is
//! the controller's only terminal event.

use std::sync::Arc;

use futures_util::future::FutureExt;

use super::controller::AutosaveController;
use super::error::LifecycleError;
use super::lifecycle::{LifecycleSignal, Registration, UnloadHook};
use super::scheduler::{Scheduler, TickCallback, TimerHandle};
use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// A controller wired to a timer and an unload signal.
pub struct AutosaveSession {
    controller: AutosaveController,
    timer: TimerHandle,
    registration: Registration,
}

impl AutosaveSession {
    pub fn mount(
        controller: AutosaveController,
        scheduler: &dyn Scheduler,
        lifecycle: &dyn LifecycleSignal,
    ) -> Result<Self, SessionError> {
        controller.config().validate()?;

        let flusher = controller.clone();
        let hook: UnloadHook = Arc::new(move || flusher.flush_on_unload().prompt_user);
        let registration = lifecycle.register(hook)?;

        let ticker = controller.clone();
        let callback: TickCallback = Arc::new(move || ticker.tick().map(|_| ()).boxed());
        let period = controller.config().save_interval;
        let timer = scheduler.start_periodic(period, callback);

        tracing::info!(
            form_id = %controller.form_id(),
            period_ms = period.as_millis() as u64,
            "Autosave mounted"
        );

        Ok(Self {
            controller,
            timer,
            registration,
        })
    }

    pub fn controller(&self) -> &AutosaveController {
        &self.controller
    }

    pub fn is_mounted(&self) -> bool {
        self.timer.is_active() && self.registration.is_registered()
    }

    /// Cancel the timer and drop the unload hook. Unsaved edits stay in
    /// the controller; flush first if they matter.
    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.timer.is_active() && !self.registration.is_registered() {
            return;
        }
        self.timer.cancel();
        self.registration.unregister();
        tracing::info!(form_id = %self.controller.form_id(), "Autosave unmounted");
    }
}

impl Drop for AutosaveSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::autosave::{
        ControllerState, Draft, ManualScheduler, ShutdownSignal, StoreSink, TokioScheduler,
    };
    use crate::config::AutosaveConfig;
    use crate::store::{FormStore, InMemoryFormStore};

    const FORM: &str = "session-notes-form";

    fn controller(store: Arc<InMemoryFormStore>, config: AutosaveConfig) -> AutosaveController {
        AutosaveController::new(
            FORM,
            Draft::from_pairs([("patientName", ""), ("sessionNotes", "")]),
            Arc::new(StoreSink::new(store)),
            config,
        )
    }

    #[tokio::test]
    async fn mount_registers_one_timer_and_one_hook() {
        let store = Arc::new(InMemoryFormStore::new());
        let scheduler = ManualScheduler::new();
        let signal = ShutdownSignal::new();

        let session =
            AutosaveSession::mount(controller(store, AutosaveConfig::default()), &scheduler, &signal)
                .unwrap();

        assert!(session.is_mounted());
        assert_eq!(scheduler.active_timers(), 1);
        assert_eq!(scheduler.period_of_last(), Some(Duration::from_secs(30)));
        assert_eq!(signal.registered(), 1);
    }

    #[tokio::test]
    async fn timer_tick_saves_dirty_draft() {
        let store = Arc::new(InMemoryFormStore::new());
        let scheduler = ManualScheduler::new();
        let signal = ShutdownSignal::new();
        let session = AutosaveSession::mount(
            controller(store.clone(), AutosaveConfig::default()),
            &scheduler,
            &signal,
        )
        .unwrap();

        scheduler.fire().await;
        assert!(store.list().unwrap().is_empty());

        session.controller().on_field_change("sessionNotes", "patient calmer");
        scheduler.fire().await;

        let record = store.get(FORM).unwrap();
        assert_eq!(record.fields.get("sessionNotes"), Some("patient calmer"));
        assert_eq!(session.controller().state(), ControllerState::IdleClean);
    }

    #[tokio::test]
    async fn unload_signal_flushes_pending_edits() {
        let store = Arc::new(InMemoryFormStore::new());
        let scheduler = ManualScheduler::new();
        let signal = ShutdownSignal::new();
        let session = AutosaveSession::mount(
            controller(store.clone(), AutosaveConfig::default()),
            &scheduler,
            &signal,
        )
        .unwrap();

        session.controller().on_field_change("patientName", "Ana");
        let mut status = session.controller().subscribe();

        assert!(signal.trigger());
        status
            .wait_for(|report| report.state == ControllerState::IdleClean)
            .await
            .unwrap();
        assert_eq!(store.get(FORM).unwrap().fields.get("patientName"), Some("Ana"));
    }

    #[tokio::test]
    async fn unmount_cancels_timer_and_hook() {
        let store = Arc::new(InMemoryFormStore::new());
        let scheduler = ManualScheduler::new();
        let signal = ShutdownSignal::new();
        let controller = controller(store.clone(), AutosaveConfig::default());
        let session = AutosaveSession::mount(controller.clone(), &scheduler, &signal).unwrap();

        session.unmount();
        assert_eq!(scheduler.active_timers(), 0);
        assert_eq!(signal.registered(), 0);

        controller.on_field_change("patientName", "Ana");
        scheduler.fire().await;
        assert!(!signal.trigger());
        assert!(store.list().unwrap().is_empty());
        assert!(controller.is_dirty());
    }

    #[tokio::test]
    async fn zero_interval_is_rejected_at_mount() {
        let store = Arc::new(InMemoryFormStore::new());
        let config = AutosaveConfig::default().with_save_interval(Duration::ZERO);
        let result = AutosaveSession::mount(
            controller(store, config),
            &ManualScheduler::new(),
            &ShutdownSignal::new(),
        );
        assert!(matches!(result, Err(SessionError::Config(ConfigError::ZeroInterval))));
    }

    #[tokio::test]
    async fn mount_after_unload_is_rejected() {
        let store = Arc::new(InMemoryFormStore::new());
        let scheduler = ManualScheduler::new();
        let signal = ShutdownSignal::new();
        signal.trigger();

        let result =
            AutosaveSession::mount(controller(store, AutosaveConfig::default()), &scheduler, &signal);
        assert!(matches!(
            result,
            Err(SessionError::Lifecycle(LifecycleError::AlreadyFired))
        ));
        assert_eq!(scheduler.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_saves_on_thirty_second_cadence() {
        let store = Arc::new(InMemoryFormStore::new());
        let scheduler = TokioScheduler::current().unwrap();
        let signal = ShutdownSignal::new();
        let session = AutosaveSession::mount(
            controller(store.clone(), AutosaveConfig::default()),
            &scheduler,
            &signal,
        )
        .unwrap();

        session.controller().on_field_change("sessionNotes", "first note");
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(store.list().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get(FORM).unwrap().revision, 1);

        // Clean ticks write nothing.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.get(FORM).unwrap().revision, 1);
    }
}
