//! Scheduler capability: fixed-period callbacks with explicit cancellation.
//!
//! The controller never owns a timer. A host supplies a `Scheduler`:
//! `TokioScheduler` for real runs, `ManualScheduler` when ticks should be
//! fired by hand (tests, scripted harnesses).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};

/// Work run on every tick. The next tick waits for it to finish.
pub type TickCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub trait Scheduler: Send + Sync {
    /// Run `callback` every `period`, first firing one period from now.
    fn start_periodic(&self, period: Duration, callback: TickCallback) -> TimerHandle;
}

// ═══════════════════════════════════════════════════════════
// TimerHandle
// ═══════════════════════════════════════════════════════════

/// Handle for a running periodic timer. Cancelled on `Drop`.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop the timer. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ═══════════════════════════════════════════════════════════
// TokioScheduler
// ═══════════════════════════════════════════════════════════

/// Timers as tokio tasks on a fixed cadence.
///
/// Missed ticks are skipped rather than bursted, and a tick never starts
/// while the previous callback is still running.
#[derive(Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler on the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn start_periodic(&self, period: Duration, callback: TickCallback) -> TimerHandle {
        // tokio intervals panic on a zero period.
        let period = if period.is_zero() {
            tracing::warn!("Zero timer period requested; using 1ms");
            Duration::from_millis(1)
        } else {
            period
        };

        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        self.runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::debug!(period_ms = period.as_millis() as u64, "Periodic timer started");

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    _ = interval.tick() => callback().await,
                }
            }

            tracing::debug!("Periodic timer stopped");
        });

        TimerHandle::new(move || {
            let _ = cancel_tx.send(());
        })
    }
}

// ═══════════════════════════════════════════════════════════
// ManualScheduler
// ═══════════════════════════════════════════════════════════

struct ManualTimer {
    id: u64,
    period: Duration,
    callback: TickCallback,
}

/// Scheduler whose ticks only happen when `fire()` is called.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    timers: Arc<Mutex<Vec<ManualTimer>>>,
    next_id: Arc<AtomicU64>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick every active timer once, awaiting each callback in turn.
    /// Returns how many timers fired.
    pub async fn fire(&self) -> usize {
        let callbacks: Vec<TickCallback> = self
            .lock()
            .iter()
            .map(|timer| timer.callback.clone())
            .collect();
        for callback in &callbacks {
            callback().await;
        }
        callbacks.len()
    }

    pub fn active_timers(&self) -> usize {
        self.lock().len()
    }

    /// Period of the most recently started timer that is still active.
    pub fn period_of_last(&self) -> Option<Duration> {
        self.lock().last().map(|timer| timer.period)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ManualTimer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn start_periodic(&self, period: Duration, callback: TickCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(ManualTimer {
            id,
            period,
            callback,
        });

        let timers = self.timers.clone();
        TimerHandle::new(move || {
            timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|timer| timer.id != id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: Arc<AtomicUsize>) -> TickCallback {
        Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[test]
    fn scheduler_is_object_safe() {
        fn _assert_scheduler(_: &dyn Scheduler) {}
    }

    #[test]
    fn timer_handle_cancel_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut handle = TimerHandle::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.is_active());
        handle.cancel();
        handle.cancel();
        drop(handle);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_fires_on_cadence_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let scheduler = TokioScheduler::current().unwrap();
        let mut handle =
            scheduler.start_periodic(Duration::from_millis(10), counting_callback(ticks.clone()));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let fired = ticks.load(Ordering::SeqCst);
        assert!(fired >= 2, "expected at least two ticks, got {fired}");

        handle.cancel();
        tokio::task::yield_now().await;
        let at_cancel = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), at_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_timer() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let scheduler = TokioScheduler::current().unwrap();
        let handle =
            scheduler.start_periodic(Duration::from_millis(10), counting_callback(ticks.clone()));
        drop(handle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_callback_never_overlaps_itself() {
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));
        let callback: TickCallback = {
            let running = running.clone();
            let max_running = max_running.clone();
            Arc::new(move || {
                let running = running.clone();
                let max_running = max_running.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
                .boxed()
            })
        };

        let scheduler = TokioScheduler::current().unwrap();
        let _handle = scheduler.start_periodic(Duration::from_millis(10), callback);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn manual_scheduler_fires_only_on_demand() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let scheduler = ManualScheduler::new();
        let handle =
            scheduler.start_periodic(Duration::from_secs(30), counting_callback(ticks.clone()));

        assert_eq!(scheduler.active_timers(), 1);
        assert_eq!(scheduler.period_of_last(), Some(Duration::from_secs(30)));
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        assert_eq!(scheduler.fire().await, 1);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        drop(handle);
        assert_eq!(scheduler.active_timers(), 0);
        assert_eq!(scheduler.period_of_last(), None);
        assert_eq!(scheduler.fire().await, 0);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
