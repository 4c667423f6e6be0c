//! Single-slot cancelable timeouts
//!
//! A [`TimeoutManager`] owns at most one scheduled callback. Callbacks run
//! against `&mut T`, the owner of the manager, so they are delivered by a
//! [`Scheduler`] to whoever drives that owner: the per-area task at runtime
//! ([`ChannelScheduler`]) or a test with a manual clock ([`ManualScheduler`]).

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ha_core::SharedClock;
use tokio::sync::mpsc;
use tracing::trace;

/// Deferred work against the timer's owner
pub type TimerCallback<T> = Box<dyn FnOnce(&mut T) + Send + 'static>;

/// Cancels a scheduled callback; a no-op once it has been delivered
pub type CancelFn = Box<dyn FnOnce() + Send + 'static>;

/// Host timer primitive
pub trait Scheduler<T>: Send + Sync {
    /// Deliver `callback` after `delay`
    fn schedule_delayed(&self, delay: Duration, callback: TimerCallback<T>) -> CancelFn;
}

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Lifecycle of one scheduled timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStatus {
    Pending,
    Fired,
    Cancelled,
}

/// Cancel handle for one scheduled callback
///
/// A handle stays pending while its callback is running and turns fired
/// once it returns, so the callback itself still observes an active timeout.
pub struct TimeoutHandle {
    cancel: Option<CancelFn>,
    status: Arc<AtomicU8>,
    generation: u64,
}

impl TimeoutHandle {
    pub fn status(&self) -> TimeoutStatus {
        match self.status.load(Ordering::SeqCst) {
            PENDING => TimeoutStatus::Pending,
            FIRED => TimeoutStatus::Fired,
            _ => TimeoutStatus::Cancelled,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == TimeoutStatus::Pending
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn cancel(&mut self) {
        let was_pending = self
            .status
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if let Some(cancel) = self.cancel.take() {
            if was_pending {
                cancel();
            }
        }
    }
}

impl std::fmt::Debug for TimeoutHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutHandle")
            .field("status", &self.status())
            .field("generation", &self.generation)
            .finish()
    }
}

/// At most one pending callback, replaced on every start
pub struct TimeoutManager<T> {
    name: &'static str,
    scheduler: Arc<dyn Scheduler<T>>,
    generation: Arc<AtomicU64>,
    handle: Option<TimeoutHandle>,
}

impl<T: 'static> TimeoutManager<T> {
    pub fn new(name: &'static str, scheduler: Arc<dyn Scheduler<T>>) -> Self {
        Self {
            name,
            scheduler,
            generation: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Schedule `callback` after `delay`, cancelling whatever was pending
    ///
    /// A delivered callback whose generation is no longer current is dropped
    /// without running, even if the scheduler could not withdraw it.
    pub fn start<F>(&mut self, delay: Duration, callback: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.cancel();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let status = Arc::new(AtomicU8::new(PENDING));
        let callback_status = Arc::clone(&status);
        let name = self.name;

        let wrapped: TimerCallback<T> = Box::new(move |target: &mut T| {
            if current.load(Ordering::SeqCst) != generation {
                trace!(timeout = name, generation, "Dropping stale timeout");
                return;
            }
            callback(target);
            let _ = callback_status.compare_exchange(
                PENDING,
                FIRED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            );
        });

        trace!(timeout = name, generation, delay_secs = delay.as_secs(), "Starting timeout");
        let cancel = self.scheduler.schedule_delayed(delay, wrapped);
        self.handle = Some(TimeoutHandle {
            cancel: Some(cancel),
            status,
            generation,
        });
    }

    /// Cancel the pending callback, if any; always safe to call
    pub fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut handle) = self.handle.take() {
            if handle.is_active() {
                trace!(timeout = self.name, generation = handle.generation, "Cancelling timeout");
            }
            handle.cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(TimeoutHandle::is_active)
    }

    pub fn handle(&self) -> Option<&TimeoutHandle> {
        self.handle.as_ref()
    }
}

impl<T> Drop for TimeoutManager<T> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.cancel();
        }
    }
}

/// Scheduler for the per-area task: a tokio sleep per timer, delivered
/// over an mpsc channel the task selects on
pub struct ChannelScheduler<T> {
    tx: mpsc::UnboundedSender<TimerCallback<T>>,
}

impl<T: Send + 'static> ChannelScheduler<T> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerCallback<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<T: Send + 'static> Scheduler<T> for ChannelScheduler<T> {
    fn schedule_delayed(&self, delay: Duration, callback: TimerCallback<T>) -> CancelFn {
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // the area task may already be gone
            let _ = tx.send(callback);
        });
        Box::new(move || task.abort())
    }
}

struct Scheduled<T> {
    id: u64,
    due: DateTime<Utc>,
    callback: TimerCallback<T>,
}

/// Deterministic scheduler driven by a clock the caller advances
pub struct ManualScheduler<T> {
    clock: SharedClock,
    queue: Arc<Mutex<Vec<Scheduled<T>>>>,
    next_id: AtomicU64,
    honor_cancel: bool,
}

impl<T: Send + 'static> ManualScheduler<T> {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            queue: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
            honor_cancel: true,
        }
    }

    /// A scheduler whose cancel functions do nothing, so every scheduled
    /// callback is eventually delivered
    pub fn ignoring_cancel(clock: SharedClock) -> Self {
        Self {
            honor_cancel: false,
            ..Self::new(clock)
        }
    }

    /// Run every callback due at the current clock time, earliest first
    ///
    /// Callbacks scheduled while running are picked up if already due.
    pub fn run_due(&self, target: &mut T) -> usize {
        let mut ran = 0;
        while let Some(entry) = self.pop_due() {
            (entry.callback)(target);
            ran += 1;
        }
        ran
    }

    fn pop_due(&self) -> Option<Scheduled<T>> {
        let now = self.clock.now();
        let mut queue = self.queue.lock().ok()?;
        let index = queue
            .iter()
            .enumerate()
            .filter(|(_, s)| s.due <= now)
            .min_by_key(|(_, s)| (s.due, s.id))
            .map(|(i, _)| i)?;
        Some(queue.remove(index))
    }

    /// Number of callbacks not yet delivered
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Due time of the earliest queued callback
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.queue
            .lock()
            .ok()
            .and_then(|q| q.iter().map(|s| s.due).min())
    }
}

impl<T: Send + 'static> Scheduler<T> for ManualScheduler<T> {
    fn schedule_delayed(&self, delay: Duration, callback: TimerCallback<T>) -> CancelFn {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let due = self.clock.now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(Scheduled { id, due, callback });
        }

        if !self.honor_cancel {
            return Box::new(|| {});
        }
        let queue = Arc::clone(&self.queue);
        Box::new(move || {
            if let Ok(mut queue) = queue.lock() {
                queue.retain(|s| s.id != id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::ManualClock;

    #[derive(Default)]
    struct Counter {
        fired: Vec<&'static str>,
    }

    fn manual(clock: &ManualClock) -> Arc<ManualScheduler<Counter>> {
        Arc::new(ManualScheduler::new(Arc::new(clock.clone())))
    }

    #[test]
    fn test_fires_after_delay() {
        let clock = ManualClock::new();
        let scheduler = manual(&clock);
        let mut timeout = TimeoutManager::new("test", scheduler.clone());
        let mut counter = Counter::default();

        timeout.start(Duration::from_secs(60), |c: &mut Counter| c.fired.push("a"));
        assert!(timeout.is_active());

        clock.advance_seconds(59);
        assert_eq!(scheduler.run_due(&mut counter), 0);
        assert!(counter.fired.is_empty());

        clock.advance_seconds(1);
        assert_eq!(scheduler.run_due(&mut counter), 1);
        assert_eq!(counter.fired, vec!["a"]);
        assert!(!timeout.is_active());
        assert_eq!(timeout.handle().unwrap().status(), TimeoutStatus::Fired);
    }

    #[test]
    fn test_start_replaces_pending() {
        let clock = ManualClock::new();
        let scheduler = manual(&clock);
        let mut timeout = TimeoutManager::new("test", scheduler.clone());
        let mut counter = Counter::default();

        timeout.start(Duration::from_secs(10), |c: &mut Counter| c.fired.push("first"));
        timeout.start(Duration::from_secs(20), |c: &mut Counter| c.fired.push("second"));
        assert_eq!(scheduler.pending(), 1);

        clock.advance_seconds(30);
        scheduler.run_due(&mut counter);
        assert_eq!(counter.fired, vec!["second"]);
    }

    #[test]
    fn test_generation_blocks_undeliverable_cancel() {
        let clock = ManualClock::new();
        let scheduler = Arc::new(ManualScheduler::ignoring_cancel(Arc::new(clock.clone())));
        let mut timeout = TimeoutManager::new("test", scheduler.clone());
        let mut counter = Counter::default();

        timeout.start(Duration::from_secs(10), |c: &mut Counter| c.fired.push("first"));
        timeout.start(Duration::from_secs(20), |c: &mut Counter| c.fired.push("second"));
        assert_eq!(scheduler.pending(), 2);

        clock.advance_seconds(30);
        assert_eq!(scheduler.run_due(&mut counter), 2);
        assert_eq!(counter.fired, vec!["second"]);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let clock = ManualClock::new();
        let scheduler = Arc::new(ManualScheduler::ignoring_cancel(Arc::new(clock.clone())));
        let mut timeout = TimeoutManager::new("test", scheduler.clone());
        let mut counter = Counter::default();

        timeout.cancel();
        assert!(!timeout.is_active());

        timeout.start(Duration::from_secs(5), |c: &mut Counter| c.fired.push("a"));
        timeout.cancel();
        timeout.cancel();
        assert!(!timeout.is_active());

        clock.advance_seconds(5);
        scheduler.run_due(&mut counter);
        assert!(counter.fired.is_empty());
    }

    #[test]
    fn test_handle_active_while_callback_runs() {
        struct Owner {
            timeout: TimeoutManager<Owner>,
            seen_active: Option<bool>,
        }

        let clock = ManualClock::new();
        let scheduler: Arc<ManualScheduler<Owner>> =
            Arc::new(ManualScheduler::new(Arc::new(clock.clone())));
        let mut owner = Owner {
            timeout: TimeoutManager::new("test", scheduler.clone()),
            seen_active: None,
        };

        owner
            .timeout
            .start(Duration::from_secs(1), |o: &mut Owner| {
                o.seen_active = Some(o.timeout.is_active())
            });
        clock.advance_seconds(1);
        scheduler.run_due(&mut owner);

        assert_eq!(owner.seen_active, Some(true));
        assert!(!owner.timeout.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_scheduler_delivers_and_aborts() {
        let (scheduler, mut rx) = ChannelScheduler::<Counter>::new();
        let scheduler = Arc::new(scheduler);
        let mut timeout = TimeoutManager::new("test", scheduler.clone());
        let mut counter = Counter::default();

        timeout.start(Duration::from_secs(30), |c: &mut Counter| c.fired.push("kept"));
        let cancel = scheduler.schedule_delayed(
            Duration::from_secs(10),
            Box::new(|c: &mut Counter| c.fired.push("aborted")),
        );
        cancel();

        let callback = rx.recv().await.unwrap();
        callback(&mut counter);
        assert_eq!(counter.fired, vec!["kept"]);
    }
}
