//! Collaborators the scenarios talk to
//!
//! Scenarios only see these traits. [`KubeCluster`] implements all of them
//! against a live API server; tests use in-memory fakes.

mod kubernetes;
mod resources;

pub use self::kubernetes::{KubeCluster, CA_BUNDLE_KEY, CLUSTER_PROXY, CONFIG_NAMESPACE, USER_CA_BUNDLE};

use crate::error::ClusterError;
use crate::health::HealthReport;
use crate::metrics::MetricSample;
use crate::models::{
    ClusterProxy, ClusterServiceVersion, DeploymentStatus, OperatorGroup, ProxyDesiredState,
    Subscription, SubscriptionStatus, WorkloadDeployment,
};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Create/get/delete access to the cluster API.
///
/// Every lookup reports a missing object as [`ClusterError::NotFound`].
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError>;

    /// Delete a namespace; `cascade` waits for dependents in the foreground
    async fn delete_namespace(&self, name: &str, cascade: bool) -> Result<(), ClusterError>;

    async fn create_operator_group(&self, group: &OperatorGroup) -> Result<(), ClusterError>;

    async fn delete_operator_group(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), ClusterError>;

    async fn get_subscription_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<SubscriptionStatus, ClusterError>;

    async fn delete_subscription(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn list_cluster_service_versions(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterServiceVersion>, ClusterError>;

    async fn delete_cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError>;

    /// Succeeds when the install plan exists
    async fn get_install_plan(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn create_deployment(&self, deployment: &WorkloadDeployment) -> Result<(), ClusterError>;

    async fn get_deployment_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentStatus, ClusterError>;

    /// Data of a config map
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError>;

    /// Succeeds when the cluster role exists
    async fn get_cluster_role(&self, name: &str) -> Result<(), ClusterError>;

    async fn get_proxy(&self, name: &str) -> Result<ClusterProxy, ClusterError>;
}

/// Service reached through the API server's service proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub namespace: String,
    pub scheme: String,
    pub service: String,
    pub port: String,
    pub path: String,
}

impl ServiceEndpoint {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        port: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            scheme: "http".to_string(),
            service: service.into(),
            port: port.into(),
            path: path.into(),
        }
    }

    /// Request path of the proxied GET
    pub fn proxy_path(&self) -> String {
        format!(
            "/api/v1/namespaces/{}/services/{}:{}:{}/proxy{}",
            self.namespace, self.scheme, self.service, self.port, self.path
        )
    }
}

/// Scrapes a metrics endpoint
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    async fn fetch(&self, endpoint: &ServiceEndpoint) -> Result<MetricSample, ClusterError>;
}

/// Applies cluster-wide proxy settings (the cluster provider's job)
#[async_trait]
pub trait ProxyConfigurator: Send + Sync {
    async fn add_cluster_proxy(
        &self,
        cluster_id: &str,
        desired: &ProxyDesiredState,
    ) -> Result<(), ClusterError>;
}

/// Aggregate cluster health
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check_health(&self, cluster_id: &str) -> Result<HealthReport, ClusterError>;
}
