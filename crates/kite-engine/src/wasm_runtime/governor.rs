//! Resource governor
//!
//! Per-instance time accounting for one guest invocation. Wall time runs from
//! [`Governor::arm`]; execution time is wall time minus the time spent inside
//! host calls, so a guest waiting on a slow platform request does not burn its
//! compute budget while a guest spinning in a loop does.
//!
//! [`Governor::check`] is polled by the epoch watchdog (every epoch tick while
//! guest code runs) and trips once either budget is exhausted or the
//! invocation is canceled.

use kite_kernel::CallInterrupt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why the watchdog stopped a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interruption {
    #[error("total time limit exceeded")]
    TotalTimeExceeded,

    #[error("execution time limit exceeded")]
    ExecutionTimeExceeded,

    #[error("invocation canceled")]
    Canceled,
}

/// Budgets enforced while armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_total_time: Duration,
    pub max_execution_time: Duration,
}

/// Durations of one finished invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timings {
    pub total_duration: Duration,
    pub execution_duration: Duration,
    pub host_calls: u32,
}

#[derive(Debug, Default)]
pub struct Governor {
    budget: Option<Budget>,
    started_at: Option<Instant>,
    host_call_started_at: Option<Instant>,
    host_call_duration: Duration,
    host_calls: u32,
    cancel: Option<CancellationToken>,
    tripped: Option<Interruption>,
}

impl Governor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accounting for a new invocation.
    pub fn arm(&mut self, budget: Budget, cancel: CancellationToken) {
        *self = Self {
            budget: Some(budget),
            started_at: Some(Instant::now()),
            cancel: Some(cancel),
            ..Self::default()
        };
    }

    /// Stop accounting and report the invocation's durations.
    pub fn disarm(&mut self) -> Timings {
        let timings = Timings {
            total_duration: self.total_duration(),
            execution_duration: self.execution_duration(),
            host_calls: self.host_calls,
        };
        *self = Self::default();
        timings
    }

    pub fn is_armed(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn start_host_call(&mut self) {
        self.host_calls += 1;
        self.host_call_started_at = Some(Instant::now());
    }

    pub fn end_host_call(&mut self) {
        if let Some(started) = self.host_call_started_at.take() {
            self.host_call_duration += started.elapsed();
        }
    }

    /// Deadline and cancellation a host call made now must honour.
    pub fn call_interrupt(&self) -> CallInterrupt {
        let deadline = self
            .started_at
            .zip(self.budget)
            .map(|(started, budget)| started + budget.max_total_time);
        CallInterrupt {
            deadline,
            cancel: self.cancel.clone().unwrap_or_default(),
        }
    }

    pub fn host_calls(&self) -> u32 {
        self.host_calls
    }

    pub fn total_duration(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Host call time so far, including a call still in flight.
    pub fn host_call_duration(&self) -> Duration {
        let in_flight = self
            .host_call_started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.host_call_duration + in_flight
    }

    pub fn execution_duration(&self) -> Duration {
        self.total_duration()
            .saturating_sub(self.host_call_duration())
    }

    pub fn tripped(&self) -> Option<Interruption> {
        self.tripped
    }

    /// Watchdog tick. Once tripped, every later check fails the same way.
    pub fn check(&mut self) -> Result<(), Interruption> {
        if let Some(interruption) = self.tripped {
            return Err(interruption);
        }
        let Some(budget) = self.budget else {
            return Ok(());
        };

        let interruption = if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            Some(Interruption::Canceled)
        } else if self.total_duration() >= budget.max_total_time {
            Some(Interruption::TotalTimeExceeded)
        } else if self.execution_duration() > budget.max_execution_time {
            Some(Interruption::ExecutionTimeExceeded)
        } else {
            None
        };

        match interruption {
            Some(interruption) => {
                self.tripped = Some(interruption);
                Err(interruption)
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(total_ms: u64, exec_ms: u64) -> Budget {
        Budget {
            max_total_time: Duration::from_millis(total_ms),
            max_execution_time: Duration::from_millis(exec_ms),
        }
    }

    #[test]
    fn test_disarmed_governor_never_trips() {
        let mut governor = Governor::new();
        assert!(governor.check().is_ok());
        assert_eq!(governor.total_duration(), Duration::ZERO);
    }

    #[test]
    fn test_host_call_time_is_not_execution_time() {
        let mut governor = Governor::new();
        governor.arm(budget(5_000, 20), CancellationToken::new());

        governor.start_host_call();
        std::thread::sleep(Duration::from_millis(60));
        // Still inside the host call: in-flight time is excluded.
        assert!(governor.check().is_ok());
        governor.end_host_call();

        assert!(governor.check().is_ok());
        assert!(governor.host_call_duration() >= Duration::from_millis(60));
        assert!(governor.execution_duration() < Duration::from_millis(20));

        let timings = governor.disarm();
        assert_eq!(timings.host_calls, 1);
        assert!(timings.total_duration >= Duration::from_millis(60));
        assert!(!governor.is_armed());
    }

    #[test]
    fn test_execution_budget_trips() {
        let mut governor = Governor::new();
        governor.arm(budget(5_000, 10), CancellationToken::new());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(governor.check(), Err(Interruption::ExecutionTimeExceeded));
        assert_eq!(governor.tripped(), Some(Interruption::ExecutionTimeExceeded));
        // Sticky.
        assert_eq!(governor.check(), Err(Interruption::ExecutionTimeExceeded));
    }

    #[test]
    fn test_total_budget_trips_during_host_call() {
        let mut governor = Governor::new();
        governor.arm(budget(10, 5_000), CancellationToken::new());
        governor.start_host_call();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(governor.check(), Err(Interruption::TotalTimeExceeded));
    }

    #[test]
    fn test_call_interrupt_follows_budget() {
        let governor = Governor::new();
        let idle = governor.call_interrupt();
        assert!(idle.deadline.is_none());
        assert!(!idle.cancel.is_cancelled());

        let mut governor = Governor::new();
        let token = CancellationToken::new();
        let before = Instant::now();
        governor.arm(budget(300, 50), token.clone());
        let interrupt = governor.call_interrupt();
        let deadline = interrupt.deadline.unwrap();
        assert!(deadline >= before + Duration::from_millis(300));
        assert!(deadline <= Instant::now() + Duration::from_millis(300));

        token.cancel();
        assert!(interrupt.cancel.is_cancelled());
    }

    #[test]
    fn test_cancellation_wins() {
        let mut governor = Governor::new();
        let token = CancellationToken::new();
        governor.arm(budget(5_000, 5_000), token.clone());
        token.cancel();
        assert_eq!(governor.check(), Err(Interruption::Canceled));
    }
}
