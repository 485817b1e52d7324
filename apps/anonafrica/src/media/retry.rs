use std::time::Duration;

use crate::scheduler::{Scheduler, Task, TimerHandle};

pub const TERMINAL_BANNER: &str = "We tried several times but could not access the camera/mic.";

pub fn retry_banner(attempt: u32, max: u32) -> String {
    format!("We had an error. Retrying... (attempt {attempt} of {max})")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub count: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// A retry was scheduled; `attempt` is the number shown to the user.
    Retry { attempt: u32, delay: Duration },
    Exhausted,
}

/// Bounded retry of media acquisition for one session cycle.
///
/// Holds at most one pending retry timer; dropping the controller cancels it.
/// The count is never reset by success, a new cycle gets a new controller.
#[derive(Debug)]
pub struct RetryController {
    state: RetryState,
    delay: Duration,
    banner: Option<String>,
    pending: Option<TimerHandle>,
}

impl RetryController {
    pub fn new(max: u32, delay: Duration) -> Self {
        Self {
            state: RetryState { count: 0, max },
            delay,
            banner: None,
            pending: None,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.count >= self.state.max
    }

    pub fn has_pending_retry(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_cancelled())
    }

    /// Record a failed attempt and schedule `retry` when attempts remain.
    pub fn on_failure(&mut self, scheduler: &dyn Scheduler, retry: Task) -> RetryDecision {
        if self.state.count < self.state.max {
            let attempt = self.state.count + 2;
            self.state.count += 1;
            self.banner = Some(retry_banner(attempt, self.state.max));
            self.pending = Some(scheduler.schedule(self.delay, retry));
            tracing::info!(
                target = "media",
                attempt,
                max = self.state.max,
                "media acquisition failed; retry scheduled"
            );
            RetryDecision::Retry {
                attempt,
                delay: self.delay,
            }
        } else {
            self.pending = None;
            self.banner = Some(TERMINAL_BANNER.to_string());
            tracing::warn!(
                target = "media",
                attempts = self.state.count + 1,
                "media acquisition failed; giving up"
            );
            RetryDecision::Exhausted
        }
    }

    pub fn on_success(&mut self) {
        self.pending = None;
        self.banner = None;
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}
