//! Core data models for the suite

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operator group scoping an operator to a set of namespaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorGroup {
    pub namespace: String,
    pub name: String,
    pub target_namespaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallPlanApproval {
    Automatic,
}

impl InstallPlanApproval {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallPlanApproval::Automatic => "Automatic",
        }
    }
}

/// Subscription to an operator package from a catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub namespace: String,
    pub name: String,
    pub package: String,
    pub channel: String,
    pub catalog_source: String,
    pub catalog_source_namespace: String,
    pub approval: InstallPlanApproval,
}

/// Installation progress reported by a subscription
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    /// Cluster service version currently installed
    pub current_csv: Option<String>,
    /// Install plan that performed the installation
    pub install_plan: Option<String>,
}

/// Installed operator version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterServiceVersion {
    pub name: String,
    pub display_name: String,
    pub phase: Option<String>,
}

impl ClusterServiceVersion {
    pub fn succeeded(&self) -> bool {
        self.phase.as_deref() == Some("Succeeded")
    }
}

/// Workload deployment created by the suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDeployment {
    pub namespace: String,
    pub name: String,
    pub replicas: i32,
    /// Selector labels, also set on the pod template
    pub labels: BTreeMap<String, String>,
    pub node_selector: BTreeMap<String, String>,
    pub service_account: Option<String>,
    pub container_name: String,
    pub image: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub ready_replicas: i32,
}

/// Cluster-wide proxy resource as read back from the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterProxy {
    /// Config map referenced as the trusted CA bundle
    pub trusted_ca: Option<String>,
    /// Effective HTTP proxy reported in the status
    pub http_proxy: Option<String>,
    /// Effective HTTPS proxy reported in the status
    pub https_proxy: Option<String>,
}

/// Proxy configuration requested for the whole cluster.
///
/// Empty values are normalized to `None`: they are neither applied nor
/// checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyDesiredState {
    pub https_proxy: Option<String>,
    pub http_proxy: Option<String>,
    pub user_ca_bundle: Option<String>,
}

impl ProxyDesiredState {
    pub fn new(
        https_proxy: impl Into<String>,
        http_proxy: impl Into<String>,
        user_ca_bundle: impl Into<String>,
    ) -> Self {
        Self {
            https_proxy: non_empty(https_proxy.into()),
            http_proxy: non_empty(http_proxy.into()),
            user_ca_bundle: non_empty(user_ca_bundle.into()),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
