//! Bounded polling against eventually-consistent cluster state
//!
//! [`poll`] evaluates a predicate until it is satisfied, fails, or the
//! deadline passes. Predicates absorb transient conditions by returning
//! `Ok(false)`; only unrecoverable errors should be returned as `Err`.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::observability::SuiteMetrics;

/// When the first evaluation happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
    /// Evaluate right away
    Immediate,
    /// Wait one interval before the first evaluation
    Delayed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("poll interval must be greater than zero")]
    ZeroInterval,
    #[error("poll timeout {timeout:?} is shorter than the interval {interval:?}")]
    TimeoutShorterThanInterval { interval: Duration, timeout: Duration },
}

/// Timing of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSpec {
    interval: Duration,
    timeout: Duration,
    start: Start,
}

impl PollSpec {
    pub fn new(interval: Duration, timeout: Duration, start: Start) -> Result<Self, PollError> {
        if interval.is_zero() {
            return Err(PollError::ZeroInterval);
        }
        if timeout < interval {
            return Err(PollError::TimeoutShorterThanInterval { interval, timeout });
        }
        Ok(Self {
            interval,
            timeout,
            start,
        })
    }

    pub fn immediate(interval: Duration, timeout: Duration) -> Result<Self, PollError> {
        Self::new(interval, timeout, Start::Immediate)
    }

    pub fn delayed(interval: Duration, timeout: Duration) -> Result<Self, PollError> {
        Self::new(interval, timeout, Start::Delayed)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn start(&self) -> Start {
        self.start
    }
}

/// Result of a poll
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<E> {
    Success,
    TimedOut,
    Failed(E),
}

impl<E> PollOutcome<E> {
    /// Short label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            PollOutcome::Success => "success",
            PollOutcome::TimedOut => "timed_out",
            PollOutcome::Failed(_) => "failed",
        }
    }
}

/// Repeatedly evaluate `predicate` as described by `spec`.
///
/// After every unsatisfied evaluation the poller sleeps for the interval
/// (capped at the time left) and gives up once the elapsed time reaches the
/// timeout. An `Err` from the predicate ends the poll immediately.
pub async fn poll<F, Fut, E>(condition: &str, spec: &PollSpec, mut predicate: F) -> PollOutcome<E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let started = Instant::now();
    let mut attempts: u64 = 0;

    if spec.start == Start::Delayed {
        sleep(spec.interval).await;
    }

    let outcome = loop {
        attempts += 1;
        match predicate().await {
            Ok(true) => break PollOutcome::Success,
            Err(err) => break PollOutcome::Failed(err),
            Ok(false) => {}
        }

        let remaining = spec.timeout.saturating_sub(started.elapsed());
        debug!(
            condition = %condition,
            attempt = attempts,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Condition not met yet"
        );
        sleep(spec.interval.min(remaining)).await;

        if started.elapsed() >= spec.timeout {
            break PollOutcome::TimedOut;
        }
    };

    SuiteMetrics::new().record_poll(condition, attempts, started.elapsed(), outcome.label());
    outcome
}
