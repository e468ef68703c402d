use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use atelier_contracts::events::{payload, EventWriter};
use atelier_contracts::operation::Operation;
use atelier_contracts::{StudioError, StudioResult};
use serde_json::json;

/// Anything that can refresh an operation handle from the backend.
pub trait OperationSource {
    fn fetch_operation(&self, operation: &Operation) -> StudioResult<Operation>;
}

/// Suspends the polling thread between status checks.
pub trait Sleeper: Send + Sync {
    /// Returns `false` when `cancel` fired before `duration` elapsed.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

/// Real-time sleeper that wakes early on cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        !cancel.wait_timeout(duration)
    }
}

/// Shared cancellation flag; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *lock_flag(flag) = true;
        wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *lock_flag(&self.inner.0)
    }

    /// Blocks for up to `timeout`; returns `true` if cancelled meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, wake) = &*self.inner;
        let guard = lock_flag(flag);
        match wake.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
            Ok((guard, _)) => *guard,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

fn lock_flag(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    match flag.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the first status check.
    pub interval: Duration,
    /// Multiplier applied after every check; 1.0 keeps the interval fixed.
    pub backoff: f64,
    pub max_interval: Duration,
    /// `None` waits for as long as the backend keeps the job pending.
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            backoff: 1.0,
            max_interval: Duration::from_secs(60),
            max_wait: None,
        }
    }
}

// Every policy is brought back inside these bounds before polling starts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);
pub const MAX_POLL_BACKOFF: f64 = 4.0;
pub const MAX_POLL_WAIT: Duration = Duration::from_secs(86_400);

impl PollPolicy {
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Clamps intervals, backoff and max wait into the supported range.
    ///
    /// A zero max wait means no limit. A backoff that is not a finite number
    /// keeps the interval fixed.
    pub fn bounded(self) -> Self {
        let interval = self.interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        let backoff = if self.backoff.is_finite() {
            self.backoff.clamp(1.0, MAX_POLL_BACKOFF)
        } else {
            1.0
        };
        Self {
            interval,
            backoff,
            max_interval: self.max_interval.clamp(interval, MAX_POLL_INTERVAL),
            max_wait: self
                .max_wait
                .filter(|wait| !wait.is_zero())
                .map(|wait| wait.min(MAX_POLL_WAIT)),
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff <= 1.0 {
            return current;
        }
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

/// Drives a pending [`Operation`] to a terminal state.
pub struct OperationPoller {
    policy: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
    events: EventWriter,
}

impl std::fmt::Debug for OperationPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationPoller")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl OperationPoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy: policy.bounded(),
            sleeper: Arc::new(ThreadSleeper),
            events: EventWriter::discard(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Waits, re-checks, and repeats until the operation is done.
    ///
    /// An operation that is already done is returned without any delay. Fetch
    /// failures propagate immediately; there is no retry.
    pub fn poll_until_done(
        &self,
        source: &dyn OperationSource,
        operation: Operation,
        cancel: &CancelToken,
    ) -> StudioResult<Operation> {
        let mut current = operation;
        let mut checks: u32 = 0;
        let mut waited = Duration::ZERO;
        let mut interval = self.policy.interval;

        while !current.is_done() {
            if cancel.is_cancelled() {
                return Err(self.cancelled(&current, checks));
            }
            let delay = match self.policy.max_wait {
                Some(max_wait) => {
                    if waited >= max_wait {
                        self.events.record(
                            "operation_timed_out",
                            payload(json!({
                                "operation": current.name,
                                "checks": checks,
                                "waited_s": waited.as_secs_f64(),
                            })),
                        );
                        return Err(StudioError::TimedOut {
                            waited_s: waited.as_secs_f64(),
                        });
                    }
                    interval.min(max_wait - waited)
                }
                None => interval,
            };

            if !self.sleeper.sleep(delay, cancel) {
                return Err(self.cancelled(&current, checks));
            }
            waited += delay;

            current = source.fetch_operation(&current)?;
            checks += 1;
            tracing::debug!(
                operation = %current.name,
                check = checks,
                status = current.status_label(),
                "operation status checked"
            );
            self.events.record(
                "operation_poll",
                payload(json!({
                    "operation": current.name,
                    "check": checks,
                    "status": current.status_label(),
                    "waited_s": waited.as_secs_f64(),
                })),
            );
            interval = self.policy.next_interval(interval);
        }

        self.events.record(
            "operation_done",
            payload(json!({
                "operation": current.name,
                "status": current.status_label(),
                "checks": checks,
            })),
        );
        Ok(current)
    }

    fn cancelled(&self, operation: &Operation, checks: u32) -> StudioError {
        tracing::info!(operation = %operation.name, checks, "operation polling cancelled");
        self.events.record(
            "operation_cancelled",
            payload(json!({ "operation": operation.name, "checks": checks })),
        );
        StudioError::Cancelled { checks }
    }
}
