//! Stale-branch timer.
//!
//! The monitor is a single deadline polled by the owning actor's loop, so a
//! firing timer takes the actor's turn like any signal. Warning `n` (counting
//! from 1) is due at `anchor + n * interval`, where the anchor is the last
//! activity. A push moves the anchor and clears the count.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::types::StalePhase;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct StaleMonitor {
    interval: Duration,
    deadline: Option<Instant>,
}

impl StaleMonitor {
    pub fn stopped(interval: Duration) -> Self {
        StaleMonitor {
            interval: interval.max(MIN_INTERVAL),
            deadline: None,
        }
    }

    /// A running monitor continuing from a persisted phase.
    ///
    /// Warnings that fell due while the process was down fire right away.
    pub fn resume(interval: Duration, phase: &StalePhase, now: DateTime<Utc>) -> Self {
        let mut monitor = Self::stopped(interval);
        let due = chrono::Duration::from_std(monitor.interval)
            .ok()
            .and_then(|i| i.checked_mul(i32::try_from(phase.warnings).ok()?.checked_add(1)?))
            .and_then(|offset| phase.anchor.checked_add_signed(offset));
        let remaining = due
            .and_then(|due| (due - now).to_std().ok())
            .unwrap_or(Duration::ZERO);
        monitor.deadline = Some(Instant::now() + remaining);
        monitor
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Restarts the full interval from now.
    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.interval);
    }

    /// Schedules the next warning one interval after the one that fired.
    pub fn advance(&mut self) {
        if let Some(deadline) = self.deadline {
            self.deadline = Some(deadline + self.interval);
        }
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Completes at the deadline; never completes while stopped.
    ///
    /// The future does not borrow the monitor, so the actor can handle the
    /// firing with `&mut self`.
    pub fn sleep(&self) -> impl Future<Output = ()> + Send + 'static {
        let deadline = self.deadline;
        async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        }
    }
}
