//! LifecycleSignal capability: "the host is about to go away".
//!
//! Browsers call this `beforeunload`; a terminal harness maps Ctrl-C or
//! end of input onto `ShutdownSignal::trigger()`. Hooks run synchronously
//! and must not block: anything async they start is best-effort.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::error::LifecycleError;

/// Unload hook. Returns true if the host should ask before discarding.
pub type UnloadHook = Arc<dyn Fn() -> bool + Send + Sync>;

pub trait LifecycleSignal: Send + Sync {
    fn register(&self, hook: UnloadHook) -> Result<Registration, LifecycleError>;
}

/// A registered hook. Deregistered on `Drop`.
pub struct Registration {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl Registration {
    pub fn new(unregister: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
        }
    }

    pub fn unregister(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }

    pub fn is_registered(&self) -> bool {
        self.unregister.is_some()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.unregister();
    }
}

// ═══════════════════════════════════════════════════════════
// ShutdownSignal
// ═══════════════════════════════════════════════════════════

#[derive(Default)]
struct SignalState {
    fired: bool,
    hooks: Vec<(u64, UnloadHook)>,
}

/// Explicitly triggered unload notification. Fires at most once.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    state: Arc<Mutex<SignalState>>,
    next_id: Arc<AtomicU64>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every registered hook. Returns true if any hook wants the host
    /// to prompt. A second trigger is a no-op returning false.
    pub fn trigger(&self) -> bool {
        let hooks: Vec<UnloadHook> = {
            let mut state = self.lock();
            if state.fired {
                return false;
            }
            state.fired = true;
            state.hooks.iter().map(|(_, hook)| hook.clone()).collect()
        };

        tracing::info!(hooks = hooks.len(), "Unload signal fired");

        // Every hook runs, even after one has asked for a prompt.
        hooks.iter().fold(false, |prompt, hook| hook() || prompt)
    }

    pub fn is_fired(&self) -> bool {
        self.lock().fired
    }

    /// Number of live registrations.
    pub fn registered(&self) -> usize {
        self.lock().hooks.len()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LifecycleSignal for ShutdownSignal {
    fn register(&self, hook: UnloadHook) -> Result<Registration, LifecycleError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.lock();
            if state.fired {
                return Err(LifecycleError::AlreadyFired);
            }
            state.hooks.push((id, hook));
        }

        let state = self.state.clone();
        Ok(Registration::new(move || {
            state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .hooks
                .retain(|(hook_id, _)| *hook_id != id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn hook(calls: Arc<AtomicUsize>, prompt: bool) -> UnloadHook {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            prompt
        })
    }

    #[test]
    fn trigger_runs_every_hook_once() {
        let signal = ShutdownSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let _a = signal.register(hook(calls.clone(), true)).unwrap();
        let _b = signal.register(hook(calls.clone(), false)).unwrap();

        assert!(signal.trigger());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(!signal.trigger());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(signal.is_fired());
    }

    #[test]
    fn no_prompt_when_hooks_decline() {
        let signal = ShutdownSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let _a = signal.register(hook(calls.clone(), false)).unwrap();
        assert!(!signal.trigger());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_registration_is_not_called() {
        let signal = ShutdownSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let registration = signal.register(hook(calls.clone(), true)).unwrap();
        assert_eq!(signal.registered(), 1);

        drop(registration);
        assert_eq!(signal.registered(), 0);
        assert!(!signal.trigger());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn register_after_fire_is_refused() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let err = signal
            .register(hook(Arc::new(AtomicUsize::new(0)), false))
            .err()
            .unwrap();
        assert_eq!(err, LifecycleError::AlreadyFired);
    }

    #[test]
    fn signal_is_object_safe() {
        fn _assert_signal(_: &dyn LifecycleSignal) {}
    }
}
