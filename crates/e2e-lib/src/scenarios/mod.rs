//! Acceptance scenarios
//!
//! Each scenario is a small state machine driven by bounded polls. A
//! scenario runs once, sequentially, and ends with a verdict.

pub mod operator;
pub mod proxy;

#[cfg(test)]
mod tests;

pub use operator::{OperatorSettings, OperatorState, OperatorVerification};
pub use proxy::{ProxyObservedState, ProxyPropagation, ProxyState};

use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

use crate::error::{ClusterError, ScenarioError};
use crate::observability::{ScenarioLogger, SuiteMetrics};
use crate::poll::{PollOutcome, PollSpec};

/// A runnable acceptance scenario
#[async_trait]
pub trait Scenario: Send {
    /// Catalog id, also used as the metrics label
    fn id(&self) -> &'static str;

    async fn run(&mut self) -> Result<(), ScenarioError>;
}

/// Run a scenario, logging and recording its verdict
pub async fn execute(scenario: &mut dyn Scenario) -> Result<(), ScenarioError> {
    let logger = ScenarioLogger::new(scenario.id());
    let started = Instant::now();

    let result = scenario.run().await;

    let elapsed = started.elapsed();
    SuiteMetrics::new().record_scenario(scenario.id(), result.is_ok(), elapsed);
    logger.log_finished(
        elapsed,
        result.as_ref().err().map(|err| err as &dyn std::fmt::Display),
    );
    result
}

/// Sub-conditions a predicate found unmet on its latest evaluation
#[derive(Debug, Default)]
pub(crate) struct Unmet(Mutex<Vec<String>>);

impl Unmet {
    pub(crate) fn record<S: Into<String>>(&self, items: impl IntoIterator<Item = S>) {
        let mut unmet = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        *unmet = items.into_iter().map(Into::into).collect();
    }

    pub(crate) fn clear(&self) {
        self.record(Vec::<String>::new());
    }

    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Convert a poll outcome into the scenario's result
pub(crate) fn settle(
    logger: &ScenarioLogger,
    condition: &str,
    spec: &PollSpec,
    outcome: PollOutcome<ClusterError>,
    unmet: &Unmet,
) -> Result<(), ScenarioError> {
    logger.log_poll_outcome(condition, outcome.label());
    match outcome {
        PollOutcome::Success => Ok(()),
        PollOutcome::TimedOut => Err(ScenarioError::TimedOut {
            condition: condition.to_string(),
            timeout: spec.timeout(),
            unmet: unmet.take(),
        }),
        PollOutcome::Failed(source) => Err(ScenarioError::PollFailed {
            condition: condition.to_string(),
            source,
        }),
    }
}

/// Treat a not-found lookup as "not there yet"
pub(crate) fn absent_as_none<T>(result: Result<T, ClusterError>) -> Result<Option<T>, ClusterError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}
