//! Collaborators backed by a live Kubernetes API server

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, Namespace, Node, Pod, PodSpec, PodTemplateSpec,
};
use k8s_openapi::api::rbac::v1::ClusterRole;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, ApiResource, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::Client;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::resources::{self, NamedRef};
use super::{HealthChecker, MetricsFetcher, ProxyConfigurator, ResourceClient, ServiceEndpoint};
use crate::error::ClusterError;
use crate::health::{checks, CheckResult, HealthReport};
use crate::metrics::MetricSample;
use crate::models::{
    ClusterProxy, ClusterServiceVersion, DeploymentStatus, OperatorGroup, ProxyDesiredState,
    Subscription, SubscriptionStatus, WorkloadDeployment,
};

/// Name of the cluster-wide proxy resource
pub const CLUSTER_PROXY: &str = "cluster";
/// Namespace holding cluster configuration config maps
pub const CONFIG_NAMESPACE: &str = "openshift-config";
/// Config map referenced as the proxy's trusted CA bundle
pub const USER_CA_BUNDLE: &str = "user-ca-bundle";
/// Key of the bundle inside [`USER_CA_BUNDLE`]
pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";

const FIELD_MANAGER: &str = "cluster-e2e";

/// Object name used in errors raised by list calls
const ALL: &str = "*";

/// Implements every cluster collaborator on top of a [`kube::Client`]
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, namespace: &str, resource: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    async fn delete_dynamic(
        &self,
        kind: &'static str,
        resource: ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.dynamic(namespace, &resource)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|err| ClusterError::from_kube(kind, name, err))?;
        debug!(kind, namespace, name, "Deleted resource");
        Ok(())
    }

    async fn check_nodes(&self) -> Result<CheckResult, ClusterError> {
        let nodes = Api::<Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|err| ClusterError::from_kube("Node", ALL, err))?;

        let not_ready: Vec<String> = nodes
            .items
            .iter()
            .filter(|node| !node_ready(node))
            .filter_map(|node| node.metadata.name.clone())
            .collect();

        Ok(if not_ready.is_empty() {
            CheckResult::healthy()
        } else {
            CheckResult::unhealthy(format!("nodes not ready: {}", not_ready.join(", ")))
        })
    }

    async fn check_cluster_operators(&self) -> Result<CheckResult, ClusterError> {
        let api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &resources::cluster_operator());
        let operators = api
            .list(&ListParams::default())
            .await
            .map_err(|err| ClusterError::from_kube("ClusterOperator", ALL, err))?;

        let mut unavailable = Vec::new();
        let mut degraded = Vec::new();
        for operator in &operators.items {
            let name = operator.metadata.name.clone().unwrap_or_default();
            let status: resources::ClusterOperatorStatus =
                resources::section(operator, "ClusterOperator", "status")?;
            if !status.is("Available") {
                unavailable.push(name);
            } else if status.is("Degraded") {
                degraded.push(name);
            }
        }

        Ok(if !unavailable.is_empty() {
            CheckResult::unhealthy(format!("not available: {}", unavailable.join(", ")))
        } else if !degraded.is_empty() {
            CheckResult::degraded(format!("degraded: {}", degraded.join(", ")))
        } else {
            CheckResult::healthy()
        })
    }

    async fn check_pods(&self) -> Result<CheckResult, ClusterError> {
        let pods = Api::<Pod>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|err| ClusterError::from_kube("Pod", ALL, err))?;

        let broken: Vec<String> = pods
            .items
            .iter()
            .filter(|pod| {
                pod.metadata
                    .namespace
                    .as_deref()
                    .is_some_and(|ns| ns.starts_with("openshift-"))
            })
            .filter(|pod| {
                matches!(
                    pod.status.as_ref().and_then(|s| s.phase.as_deref()),
                    Some("Failed") | Some("Unknown")
                )
            })
            .map(|pod| {
                format!(
                    "{}/{}",
                    pod.metadata.namespace.as_deref().unwrap_or_default(),
                    pod.metadata.name.as_deref().unwrap_or_default()
                )
            })
            .collect();

        Ok(if broken.is_empty() {
            CheckResult::healthy()
        } else {
            CheckResult::unhealthy(format!("failed pods: {}", broken.join(", ")))
        })
    }
}

fn node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn metadata(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

fn deployment_manifest(workload: &WorkloadDeployment) -> Deployment {
    let pod_labels = workload.labels.clone();
    Deployment {
        metadata: metadata(Some(&workload.namespace), &workload.name),
        spec: Some(DeploymentSpec {
            replicas: Some(workload.replicas),
            selector: LabelSelector {
                match_labels: Some(workload.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: workload.container_name.clone(),
                        image: Some(workload.image.clone()),
                        ..Default::default()
                    }],
                    node_selector: (!workload.node_selector.is_empty())
                        .then(|| workload.node_selector.clone()),
                    service_account_name: workload.service_account.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Merge patch for the proxy spec, carrying only the requested fields
fn proxy_patch(desired: &ProxyDesiredState) -> Value {
    let mut spec = Map::new();
    if let Some(http_proxy) = &desired.http_proxy {
        spec.insert("httpProxy".to_string(), json!(http_proxy));
    }
    if let Some(https_proxy) = &desired.https_proxy {
        spec.insert("httpsProxy".to_string(), json!(https_proxy));
    }
    if desired.user_ca_bundle.is_some() {
        spec.insert("trustedCA".to_string(), json!({ "name": USER_CA_BUNDLE }));
    }
    json!({ "spec": spec })
}

#[async_trait]
impl ResourceClient for KubeCluster {
    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let namespace = Namespace {
            metadata: metadata(None, name),
            ..Default::default()
        };
        Api::<Namespace>::all(self.client.clone())
            .create(&PostParams::default(), &namespace)
            .await
            .map_err(|err| ClusterError::from_kube("Namespace", name, err))?;
        info!(namespace = %name, "Created namespace");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str, cascade: bool) -> Result<(), ClusterError> {
        let params = if cascade {
            DeleteParams::foreground()
        } else {
            DeleteParams::default()
        };
        Api::<Namespace>::all(self.client.clone())
            .delete(name, &params)
            .await
            .map_err(|err| ClusterError::from_kube("Namespace", name, err))?;
        info!(namespace = %name, cascade, "Deleted namespace");
        Ok(())
    }

    async fn create_operator_group(&self, group: &OperatorGroup) -> Result<(), ClusterError> {
        let resource = resources::operator_group();
        let spec = resources::OperatorGroupSpec {
            target_namespaces: group.target_namespaces.clone(),
        };
        let object = DynamicObject::new(&group.name, &resource)
            .within(&group.namespace)
            .data(json!({ "spec": spec }));

        self.dynamic(&group.namespace, &resource)
            .create(&PostParams::default(), &object)
            .await
            .map_err(|err| ClusterError::from_kube("OperatorGroup", &group.name, err))?;
        info!(namespace = %group.namespace, name = %group.name, "Created operator group");
        Ok(())
    }

    async fn delete_operator_group(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delete_dynamic("OperatorGroup", resources::operator_group(), namespace, name)
            .await
    }

    async fn create_subscription(&self, subscription: &Subscription) -> Result<(), ClusterError> {
        let resource = resources::subscription();
        let spec = resources::SubscriptionSpec {
            source: subscription.catalog_source.clone(),
            source_namespace: subscription.catalog_source_namespace.clone(),
            name: subscription.package.clone(),
            channel: subscription.channel.clone(),
            install_plan_approval: subscription.approval.as_str().to_string(),
        };
        let object = DynamicObject::new(&subscription.name, &resource)
            .within(&subscription.namespace)
            .data(json!({ "spec": spec }));

        self.dynamic(&subscription.namespace, &resource)
            .create(&PostParams::default(), &object)
            .await
            .map_err(|err| ClusterError::from_kube("Subscription", &subscription.name, err))?;
        info!(
            namespace = %subscription.namespace,
            name = %subscription.name,
            package = %subscription.package,
            channel = %subscription.channel,
            "Created subscription"
        );
        Ok(())
    }

    async fn get_subscription_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<SubscriptionStatus, ClusterError> {
        let object = self
            .dynamic(namespace, &resources::subscription())
            .get(name)
            .await
            .map_err(|err| ClusterError::from_kube("Subscription", name, err))?;
        let status: resources::SubscriptionStatus =
            resources::section(&object, "Subscription", "status")?;

        Ok(SubscriptionStatus {
            current_csv: status.current_csv.filter(|csv| !csv.is_empty()),
            install_plan: status
                .installplan
                .map(|plan| plan.name)
                .filter(|plan| !plan.is_empty()),
        })
    }

    async fn delete_subscription(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delete_dynamic("Subscription", resources::subscription(), namespace, name)
            .await
    }

    async fn list_cluster_service_versions(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterServiceVersion>, ClusterError> {
        let list = self
            .dynamic(namespace, &resources::cluster_service_version())
            .list(&ListParams::default())
            .await
            .map_err(|err| ClusterError::from_kube("ClusterServiceVersion", ALL, err))?;

        list.items
            .iter()
            .map(|object| {
                let spec: resources::ClusterServiceVersionSpec =
                    resources::section(object, "ClusterServiceVersion", "spec")?;
                let status: resources::ClusterServiceVersionStatus =
                    resources::section(object, "ClusterServiceVersion", "status")?;
                Ok(ClusterServiceVersion {
                    name: object.metadata.name.clone().unwrap_or_default(),
                    display_name: spec.display_name,
                    phase: status.phase,
                })
            })
            .collect()
    }

    async fn delete_cluster_service_version(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.delete_dynamic(
            "ClusterServiceVersion",
            resources::cluster_service_version(),
            namespace,
            name,
        )
        .await
    }

    async fn get_install_plan(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.dynamic(namespace, &resources::install_plan())
            .get(name)
            .await
            .map_err(|err| ClusterError::from_kube("InstallPlan", name, err))?;
        Ok(())
    }

    async fn create_deployment(&self, workload: &WorkloadDeployment) -> Result<(), ClusterError> {
        Api::<Deployment>::namespaced(self.client.clone(), &workload.namespace)
            .create(&PostParams::default(), &deployment_manifest(workload))
            .await
            .map_err(|err| ClusterError::from_kube("Deployment", &workload.name, err))?;
        info!(
            namespace = %workload.namespace,
            name = %workload.name,
            image = %workload.image,
            "Created deployment"
        );
        Ok(())
    }

    async fn get_deployment_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentStatus, ClusterError> {
        let deployment = Api::<Deployment>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|err| ClusterError::from_kube("Deployment", name, err))?;
        let status = deployment.status.unwrap_or_default();

        Ok(DeploymentStatus {
            ready_replicas: status.ready_replicas.unwrap_or(0),
        })
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        let config_map = Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
            .map_err(|err| ClusterError::from_kube("ConfigMap", name, err))?;
        Ok(config_map.data.unwrap_or_default())
    }

    async fn get_cluster_role(&self, name: &str) -> Result<(), ClusterError> {
        Api::<ClusterRole>::all(self.client.clone())
            .get(name)
            .await
            .map_err(|err| ClusterError::from_kube("ClusterRole", name, err))?;
        Ok(())
    }

    async fn get_proxy(&self, name: &str) -> Result<ClusterProxy, ClusterError> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resources::proxy());
        let object = api
            .get(name)
            .await
            .map_err(|err| ClusterError::from_kube("Proxy", name, err))?;
        let spec: resources::ProxySpec = resources::section(&object, "Proxy", "spec")?;
        let status: resources::ProxyStatus = resources::section(&object, "Proxy", "status")?;

        Ok(ClusterProxy {
            trusted_ca: spec.trusted_ca.map(|NamedRef { name }| name),
            http_proxy: status.http_proxy,
            https_proxy: status.https_proxy,
        })
    }
}

#[async_trait]
impl MetricsFetcher for KubeCluster {
    async fn fetch(&self, endpoint: &ServiceEndpoint) -> Result<MetricSample, ClusterError> {
        let request = http::Request::get(endpoint.proxy_path()).body(Vec::new())?;

        match self.client.request_text(request).await {
            Ok(body) => Ok(MetricSample::from_body(body)),
            Err(kube::Error::Api(response)) if response.code == 503 => {
                debug!(service = %endpoint.service, "Metrics backend unavailable");
                Ok(MetricSample::Unavailable)
            }
            Err(err) => Err(ClusterError::from_kube("Service", &endpoint.service, err)),
        }
    }
}

#[async_trait]
impl ProxyConfigurator for KubeCluster {
    async fn add_cluster_proxy(
        &self,
        cluster_id: &str,
        desired: &ProxyDesiredState,
    ) -> Result<(), ClusterError> {
        if let Some(bundle) = &desired.user_ca_bundle {
            let config_map = ConfigMap {
                metadata: metadata(Some(CONFIG_NAMESPACE), USER_CA_BUNDLE),
                data: Some(BTreeMap::from([(CA_BUNDLE_KEY.to_string(), bundle.clone())])),
                ..Default::default()
            };
            Api::<ConfigMap>::namespaced(self.client.clone(), CONFIG_NAMESPACE)
                .patch(
                    USER_CA_BUNDLE,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&config_map),
                )
                .await
                .map_err(|err| ClusterError::from_kube("ConfigMap", USER_CA_BUNDLE, err))?;
        }

        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resources::proxy());
        api.patch(
            CLUSTER_PROXY,
            &PatchParams::default(),
            &Patch::Merge(proxy_patch(desired)),
        )
        .await
        .map_err(|err| ClusterError::from_kube("Proxy", CLUSTER_PROXY, err))?;

        info!(
            cluster_id = %cluster_id,
            http_proxy = desired.http_proxy.is_some(),
            https_proxy = desired.https_proxy.is_some(),
            trusted_ca = desired.user_ca_bundle.is_some(),
            "Applied cluster proxy configuration"
        );
        Ok(())
    }
}

#[async_trait]
impl HealthChecker for KubeCluster {
    async fn check_health(&self, cluster_id: &str) -> Result<HealthReport, ClusterError> {
        let (nodes, operators, pods) = tokio::try_join!(
            self.check_nodes(),
            self.check_cluster_operators(),
            self.check_pods()
        )?;

        let report = HealthReport::from_checks(BTreeMap::from([
            (checks::NODES.to_string(), nodes),
            (checks::CLUSTER_OPERATORS.to_string(), operators),
            (checks::PODS.to_string(), pods),
        ]));
        debug!(cluster_id = %cluster_id, status = ?report.status, "Checked cluster health");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_patch_carries_only_set_fields() {
        let desired = ProxyDesiredState::new("https://proxy.example:3128", "", "");
        assert_eq!(
            proxy_patch(&desired),
            json!({ "spec": { "httpsProxy": "https://proxy.example:3128" } })
        );
    }

    #[test]
    fn test_proxy_patch_references_user_ca_bundle() {
        let desired = ProxyDesiredState::new("", "http://proxy.example:3128", "-----BEGIN CERTIFICATE-----");
        assert_eq!(
            proxy_patch(&desired),
            json!({
                "spec": {
                    "httpProxy": "http://proxy.example:3128",
                    "trustedCA": { "name": "user-ca-bundle" }
                }
            })
        );
    }

    #[test]
    fn test_deployment_manifest() {
        let workload = WorkloadDeployment {
            namespace: "osde2e-deployment-validation-operator".to_string(),
            name: "dvo-test-case-abcde".to_string(),
            replicas: 1,
            labels: BTreeMap::from([("name".to_string(), "dvo-test-case".to_string())]),
            node_selector: BTreeMap::new(),
            service_account: Some("dvo-test".to_string()),
            container_name: "test".to_string(),
            image: "registry.access.redhat.com/ubi8/ubi-minimal".to_string(),
        };

        let deployment = deployment_manifest(&workload);
        let spec = deployment.spec.unwrap();
        let pod = spec.template.spec.unwrap();

        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.selector.match_labels, Some(workload.labels.clone()));
        assert_eq!(spec.template.metadata.unwrap().labels, Some(workload.labels));
        assert_eq!(pod.containers[0].name, "test");
        assert_eq!(pod.node_selector, None);
        assert_eq!(pod.service_account_name.as_deref(), Some("dvo-test"));
    }
}
