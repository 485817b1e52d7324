//! Cancellable one-shot timers.
//!
//! Every fixed delay in the client (initiator delay, media retry backoff, reopen
//! delay) goes through [`Scheduler`] so tests can drive time with
//! [`ManualScheduler`] instead of sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay` unless the returned handle is cancelled or dropped first.
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle;
}

/// Cancels its timer when dropped.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    abort: Option<tokio::task::AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, abort: Option<tokio::task::AbortHandle>) -> Self {
        Self { cancelled, abort }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Real-time scheduler backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task();
            }
        });
        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }
}

struct PendingTimer {
    due: Duration,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    pending: Vec<PendingTimer>,
}

/// Simulated clock: timers only fire from [`ManualScheduler::advance`].
#[derive(Default, Clone)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Timers that are still armed.
    pub fn pending(&self) -> usize {
        let mut state = self.state.lock();
        state
            .pending
            .retain(|timer| !timer.cancelled.load(Ordering::SeqCst));
        state.pending.len()
    }

    /// Delays of the armed timers relative to the current simulated time, in firing order.
    pub fn pending_delays(&self) -> Vec<Duration> {
        let mut state = self.state.lock();
        state
            .pending
            .retain(|timer| !timer.cancelled.load(Ordering::SeqCst));
        let now = state.now;
        let mut delays: Vec<(Duration, u64)> = state
            .pending
            .iter()
            .map(|timer| (timer.due - now, timer.seq))
            .collect();
        delays.sort();
        delays.into_iter().map(|(delay, _)| delay).collect()
    }

    /// Move the clock forward and run every timer that became due, earliest first.
    /// Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut fired = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                state
                    .pending
                    .retain(|timer| !timer.cancelled.load(Ordering::SeqCst));
                let idx = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by_key(|(_, timer)| (timer.due, timer.seq))
                    .map(|(idx, _)| idx);
                match idx {
                    Some(idx) => {
                        let timer = state.pending.swap_remove(idx);
                        state.now = timer.due;
                        Some(timer)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            let Some(timer) = next else {
                break;
            };
            // Run outside the lock so the task may schedule follow-up timers.
            timer.cancelled.store(true, Ordering::SeqCst);
            (timer.task)();
            fired += 1;
        }
        fired
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.pending.push(PendingTimer {
            due,
            seq,
            cancelled: Arc::clone(&cancelled),
            task,
        });
        TimerHandle::new(cancelled, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn manual_timers_fire_only_when_due() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let _handle = scheduler.schedule(Duration::from_secs(2), counter_task(&counter));

        assert_eq!(scheduler.advance(Duration::from_millis(1999)), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn dropping_the_handle_cancels_the_timer() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.schedule(Duration::from_secs(1), counter_task(&counter));
        drop(handle);

        assert_eq!(scheduler.advance(Duration::from_secs(5)), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tasks_may_schedule_follow_ups_within_one_advance() {
        let scheduler = ManualScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));

        let inner_scheduler = scheduler.clone();
        let inner_counter = Arc::clone(&counter);
        let inner_slot = Arc::clone(&slot);
        let _outer = scheduler.schedule(
            Duration::from_secs(1),
            Box::new(move || {
                let handle = inner_scheduler
                    .schedule(Duration::from_secs(1), counter_task(&inner_counter));
                *inner_slot.lock() = Some(handle);
            }),
        );

        assert_eq!(scheduler.advance(Duration::from_secs(2)), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.now(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn tokio_scheduler_cancel_prevents_run() {
        let scheduler = TokioScheduler;
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.schedule(Duration::from_millis(20), counter_task(&counter));
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let _kept = scheduler.schedule(Duration::from_millis(5), counter_task(&counter));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
