//! Aggregate cluster health
//!
//! A [`HealthReport`] collects the result of individual cluster checks
//! (nodes, cluster operators, pods). The cluster counts as healthy only
//! when every check is healthy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// Everything the check looked at is fine
    Healthy,
    /// Still working, but something is reported as degraded
    Degraded,
    /// The check failed
    Unhealthy,
}

/// Outcome of one named check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: i64,
}

impl CheckResult {
    pub fn healthy() -> Self {
        Self {
            status: CheckStatus::Healthy,
            message: None,
            checked_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Degraded,
            message: Some(message.into()),
            checked_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Unhealthy,
            message: Some(message.into()),
            checked_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Result of one health evaluation of the whole cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: CheckStatus,
    pub checks: BTreeMap<String, CheckResult>,
}

impl HealthReport {
    pub fn from_checks(checks: BTreeMap<String, CheckResult>) -> Self {
        let status = Self::compute_status(&checks);
        Self { status, checks }
    }

    /// Compute overall status from check statuses
    pub fn compute_status(checks: &BTreeMap<String, CheckResult>) -> CheckStatus {
        let mut has_degraded = false;

        for result in checks.values() {
            match result.status {
                CheckStatus::Unhealthy => return CheckStatus::Unhealthy,
                CheckStatus::Degraded => has_degraded = true,
                CheckStatus::Healthy => {}
            }
        }

        if has_degraded {
            CheckStatus::Degraded
        } else {
            CheckStatus::Healthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == CheckStatus::Healthy
    }

    /// Names of the checks that are not healthy, in name order
    pub fn failing(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|(_, result)| result.status != CheckStatus::Healthy)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Check names reported by the Kubernetes health checker
pub mod checks {
    pub const NODES: &str = "nodes";
    pub const CLUSTER_OPERATORS: &str = "cluster-operators";
    pub const PODS: &str = "pods";
}
