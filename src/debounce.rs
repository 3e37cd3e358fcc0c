//! Debounce Scheduler: coalesce bursts of triggers into one exclusive run
//!
//! ## Pending run
//!
//! At most one `PendingRun` exists. A new trigger that arrives before the
//! quiet window elapses aborts the pending timer and completes the stored
//! `EmitDone` right away, so the pipeline never waits on a superseded cycle.
//!
//! ## Exclusive execution
//!
//! When a timer fires the pending reference is cleared first, then the run
//! waits for the execution lock. A trigger arriving mid-run therefore starts
//! an independent pending run that executes after the current one finishes.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub const DEFAULT_WAIT: Duration = Duration::from_millis(600);

// =============================================================================
// EmitDone: the pipeline's completion callback
// =============================================================================

/// Completion callback handed over with each emission
///
/// Consumed by `complete`, so it can only ever fire once. Dropping it without
/// completing fires it too, which keeps cancelled callers from stalling the
/// pipeline.
pub struct EmitDone(Option<Box<dyn FnOnce() + Send>>);

impl EmitDone {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Callback paired with a receiver that resolves when it fires
    pub fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let done = Self::new(move || {
            let _ = tx.send(());
        });
        (done, rx)
    }

    pub fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

impl Drop for EmitDone {
    fn drop(&mut self) {
        self.fire();
    }
}

impl std::fmt::Debug for EmitDone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EmitDone")
    }
}

// =============================================================================
// DebounceScheduler
// =============================================================================

struct PendingRun {
    id: u64,
    finalize: EmitDone,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct SchedulerState {
    pending: Option<PendingRun>,
    next_id: u64,
}

pub struct DebounceScheduler {
    wait: Duration,
    state: Arc<Mutex<SchedulerState>>,
    exec: Arc<tokio::sync::Mutex<()>>,
}

impl DebounceScheduler {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            exec: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Whether a run is scheduled but its window has not elapsed yet
    pub fn has_pending(&self) -> bool {
        self.lock_state().pending.is_some()
    }

    /// Schedule `run` after the quiet window, superseding any pending run.
    ///
    /// `on_settled` fires once `run` completes, or immediately if a later
    /// call supersedes this one first. Must be called within a tokio runtime.
    pub fn schedule<F>(&self, run: F, on_settled: EmitDone)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let superseded = {
            let mut state = self.lock_state();
            let previous = state.pending.take();

            let id = state.next_id;
            state.next_id += 1;

            let timer = tokio::spawn(fire(
                id,
                self.wait,
                Arc::clone(&self.state),
                Arc::clone(&self.exec),
                run,
            ));
            state.pending = Some(PendingRun {
                id,
                finalize: on_settled,
                timer,
            });
            previous
        };

        if let Some(previous) = superseded {
            debug!(run = previous.id, "pending run superseded");
            previous.timer.abort();
            previous.finalize.complete();
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        // Poisoning only means a holder panicked; the Option is still valid
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn fire<F>(
    id: u64,
    wait: Duration,
    state: Arc<Mutex<SchedulerState>>,
    exec: Arc<tokio::sync::Mutex<()>>,
    run: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::time::sleep(wait).await;

    let pending = {
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        match &state.pending {
            Some(p) if p.id == id => state.pending.take(),
            _ => None,
        }
    };
    let Some(pending) = pending else {
        return;
    };

    let _running = exec.lock().await;
    debug!(run = id, "quiet window elapsed, running");
    if AssertUnwindSafe(run).catch_unwind().await.is_err() {
        error!(run = id, "test run panicked");
    }
    pending.finalize.complete();
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        let pending = self.lock_state().pending.take();
        if let Some(pending) = pending {
            pending.timer.abort();
            pending.finalize.complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting_run(runs: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let runs = Arc::clone(runs);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_window() {
        let scheduler = DebounceScheduler::new(Duration::from_millis(100));
        let runs = counter();
        let (done, rx) = EmitDone::channel();

        scheduler.schedule(counting_run(&runs), done);
        assert!(scheduler.has_pending());

        rx.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!scheduler.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_supersede_completes_previous_immediately() {
        let scheduler = DebounceScheduler::new(Duration::from_millis(100));
        let runs = counter();
        let (first, mut first_rx) = EmitDone::channel();
        let (second, second_rx) = EmitDone::channel();

        scheduler.schedule(counting_run(&runs), first);
        scheduler.schedule(counting_run(&runs), second);

        // Fired synchronously by the second schedule call
        assert!(first_rx.try_recv().is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        second_rx.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_wait_defers_to_next_tick() {
        let scheduler = DebounceScheduler::new(Duration::ZERO);
        let runs = counter();
        let (done, rx) = EmitDone::channel();

        scheduler.schedule(counting_run(&runs), done);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        rx.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_wait_still_coalesces() {
        let scheduler = DebounceScheduler::new(Duration::ZERO);
        let runs = counter();
        let (first, first_rx) = EmitDone::channel();
        let (second, second_rx) = EmitDone::channel();

        scheduler.schedule(counting_run(&runs), first);
        scheduler.schedule(counting_run(&runs), second);

        first_rx.await.unwrap();
        second_rx.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_during_run_waits_for_it() {
        let scheduler = DebounceScheduler::new(Duration::from_millis(10));
        let active = counter();
        let max_active = counter();

        let make_run = || {
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        };

        let (first, first_rx) = EmitDone::channel();
        scheduler.schedule(make_run(), first);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // First run is in flight now, so this one must not cancel it
        let (second, second_rx) = EmitDone::channel();
        scheduler.schedule(make_run(), second);

        first_rx.await.unwrap();
        second_rx.await.unwrap();
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_run_still_settles() {
        let scheduler = DebounceScheduler::new(Duration::ZERO);
        let (done, rx) = EmitDone::channel();

        scheduler.schedule(
            async {
                panic!("boom");
            },
            done,
        );
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_settles_pending() {
        let scheduler = DebounceScheduler::new(Duration::from_secs(60));
        let (done, rx) = EmitDone::channel();
        scheduler.schedule(async {}, done);
        drop(scheduler);
        rx.await.unwrap();
    }

    #[test]
    fn test_emit_done_fires_on_drop() {
        let fired = counter();
        let f = Arc::clone(&fired);
        let done = EmitDone::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        drop(done);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_done_fires_once() {
        let fired = counter();
        let f = Arc::clone(&fired);
        let done = EmitDone::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        done.complete();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
