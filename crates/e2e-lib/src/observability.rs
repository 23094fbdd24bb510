//! Observability for suite runs
//!
//! Provides:
//! - Prometheus metrics (poll attempts and durations, scenario verdicts)
//! - Structured logging of scenario state transitions with tracing

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec,
    GaugeVec, HistogramVec, IntCounterVec, IntGaugeVec,
};
use std::fmt::Display;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

/// Histogram buckets for poll durations (in seconds)
const POLL_DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1800.0, 2700.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SuiteMetricsInner> = OnceLock::new();

struct SuiteMetricsInner {
    poll_attempts: IntCounterVec,
    poll_duration_seconds: HistogramVec,
    scenario_passed: IntGaugeVec,
    scenario_duration_seconds: GaugeVec,
}

impl SuiteMetricsInner {
    fn new() -> Self {
        Self {
            poll_attempts: register_int_counter_vec!(
                "cluster_e2e_poll_attempts_total",
                "Number of predicate evaluations per polled condition",
                &["condition"]
            )
            .expect("Failed to register poll_attempts"),

            poll_duration_seconds: register_histogram_vec!(
                "cluster_e2e_poll_duration_seconds",
                "Time spent waiting for a condition to resolve",
                &["condition", "outcome"],
                POLL_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_duration_seconds"),

            scenario_passed: register_int_gauge_vec!(
                "cluster_e2e_scenario_passed",
                "1 when the scenario passed, 0 when it failed",
                &["scenario"]
            )
            .expect("Failed to register scenario_passed"),

            scenario_duration_seconds: register_gauge_vec!(
                "cluster_e2e_scenario_duration_seconds",
                "Wall-clock duration of the scenario",
                &["scenario"]
            )
            .expect("Failed to register scenario_duration_seconds"),
        }
    }
}

/// Handle to the process-wide suite metrics.
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct SuiteMetrics {
    _private: (),
}

impl Default for SuiteMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SuiteMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SuiteMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SuiteMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record a resolved poll
    pub fn record_poll(&self, condition: &str, attempts: u64, elapsed: Duration, outcome: &str) {
        let inner = self.inner();
        inner
            .poll_attempts
            .with_label_values(&[condition])
            .inc_by(attempts);
        inner
            .poll_duration_seconds
            .with_label_values(&[condition, outcome])
            .observe(elapsed.as_secs_f64());
    }

    /// Record the verdict of a scenario
    pub fn record_scenario(&self, scenario: &str, passed: bool, elapsed: Duration) {
        let inner = self.inner();
        inner
            .scenario_passed
            .with_label_values(&[scenario])
            .set(i64::from(passed));
        inner
            .scenario_duration_seconds
            .with_label_values(&[scenario])
            .set(elapsed.as_secs_f64());
    }

    pub fn poll_attempts(&self, condition: &str) -> u64 {
        self.inner()
            .poll_attempts
            .with_label_values(&[condition])
            .get()
    }

    pub fn scenario_passed(&self, scenario: &str) -> Option<bool> {
        let gauge = self.inner().scenario_passed.get_metric_with_label_values(&[scenario]).ok()?;
        Some(gauge.get() == 1)
    }
}

/// Structured logger for scenario events
#[derive(Clone, Debug)]
pub struct ScenarioLogger {
    scenario: String,
}

impl ScenarioLogger {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn log_state_transition(&self, from: impl Display, to: impl Display) {
        info!(
            event = "state_transition",
            scenario = %self.scenario,
            from = %from,
            to = %to,
            "Scenario state changed"
        );
    }

    /// Log the conditions a poll tick found unmet
    pub fn log_unmet(&self, condition: &str, unmet: &[String]) {
        info!(
            event = "condition_unmet",
            scenario = %self.scenario,
            condition = %condition,
            unmet = %unmet.join(", "),
            "Condition not satisfied yet"
        );
    }

    pub fn log_poll_outcome(&self, condition: &str, outcome: &str) {
        match outcome {
            "success" => info!(
                event = "poll_outcome",
                scenario = %self.scenario,
                condition = %condition,
                outcome = %outcome,
                "Condition satisfied"
            ),
            _ => warn!(
                event = "poll_outcome",
                scenario = %self.scenario,
                condition = %condition,
                outcome = %outcome,
                "Condition did not resolve"
            ),
        }
    }

    pub fn log_finished(&self, elapsed: Duration, failure: Option<&dyn Display>) {
        match failure {
            None => info!(
                event = "scenario_finished",
                scenario = %self.scenario,
                passed = true,
                elapsed_secs = elapsed.as_secs_f64(),
                "Scenario passed"
            ),
            Some(failure) => error!(
                event = "scenario_finished",
                scenario = %self.scenario,
                passed = false,
                elapsed_secs = elapsed.as_secs_f64(),
                error = %failure,
                "Scenario failed"
            ),
        }
    }
}
