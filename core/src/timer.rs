//! Retry and timeout pacing
//!
//! [`RetryTimer`] turns a time budget into a bounded, resumable sequence of
//! tick events. Every blocking loop in the crate (channel probing, transient
//! send retries, the echo server's idle watch) is paced by one of these
//! instead of open-coding sleeps.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

/// The timer's budget ran out while a caller asked for exhaustion to be
/// reported as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("retry budget of {budget:?} exhausted")]
pub struct TimerExpired {
    /// The total budget that was exhausted.
    pub budget: Duration,
}

/// A restartable countdown that yields at most `⌈budget / interval⌉` ticks.
///
/// Each [`tick`](RetryTimer::tick) suspends cooperatively for one interval
/// (clipped to the remaining budget), or less if the attached readiness
/// signal fires first, then yields the time elapsed since the timer was
/// armed. Once the deadline passes the sequence ends: silently (`Ok(None)`)
/// by default, or with [`TimerExpired`] when `raise_on_exhaustion` is set.
///
/// An interval of zero, or one longer than the budget, arms a timer that
/// yields a single tick spanning the whole budget.
#[derive(Debug)]
pub struct RetryTimer {
    budget: Duration,
    interval: Duration,
    raise_on_exhaustion: bool,
    armed_at: Instant,
    deadline: Instant,
    readiness: Option<Arc<Notify>>,
}

impl RetryTimer {
    /// Arm a timer with a total `budget`, a per-tick `interval`, and the
    /// exhaustion-reporting mode.
    pub fn new(budget: Duration, interval: Duration, raise_on_exhaustion: bool) -> Self {
        let interval = if interval.is_zero() || interval > budget {
            budget
        } else {
            interval
        };
        let armed_at = Instant::now();
        Self {
            budget,
            interval,
            raise_on_exhaustion,
            armed_at,
            deadline: armed_at + budget,
            readiness: None,
        }
    }

    /// Attach an external readiness signal; a notification ends the current
    /// tick's wait early.
    pub fn with_readiness(mut self, readiness: Arc<Notify>) -> Self {
        self.readiness = Some(readiness);
        self
    }

    /// Re-arm the deadline from now without reallocating.
    pub fn reset(&mut self) {
        self.armed_at = Instant::now();
        self.deadline = self.armed_at + self.budget;
    }

    /// Budget left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time since the timer was last armed.
    pub fn elapsed(&self) -> Duration {
        self.armed_at.elapsed()
    }

    /// Upper bound on ticks this timer yields between arms.
    pub fn max_ticks(&self) -> u32 {
        Self::tick_bound(self.budget, self.interval)
    }

    /// `⌈budget / interval⌉`, the tick bound for the given pacing.
    pub fn tick_bound(budget: Duration, interval: Duration) -> u32 {
        if interval.is_zero() {
            return if budget.is_zero() { 0 } else { 1 };
        }
        let budget = budget.as_nanos();
        let interval = interval.as_nanos();
        ((budget + interval - 1) / interval) as u32
    }

    /// Wait for the next tick.
    ///
    /// `Ok(Some(elapsed))` after one interval (or an early readiness
    /// notification); `Ok(None)` once the budget is exhausted and exhaustion
    /// is silent; `Err(TimerExpired)` once it is exhausted and
    /// `raise_on_exhaustion` was requested.
    pub async fn tick(&mut self) -> Result<Option<Duration>, TimerExpired> {
        let now = Instant::now();
        if now >= self.deadline {
            return if self.raise_on_exhaustion {
                Err(TimerExpired {
                    budget: self.budget,
                })
            } else {
                Ok(None)
            };
        }

        let wake_at = (now + self.interval).min(self.deadline);
        match &self.readiness {
            Some(readiness) => {
                tokio::select! {
                    _ = time::sleep_until(wake_at) => {}
                    _ = readiness.notified() => {}
                }
            }
            None => time::sleep_until(wake_at).await,
        }

        Ok(Some(self.armed_at.elapsed()))
    }
}
