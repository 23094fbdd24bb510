//! OLM and OpenShift kinds, addressed as dynamic objects
//!
//! Only the fields the suite reads or writes are modelled here.

use kube::api::ApiResource;
use kube::core::{DynamicObject, GroupVersionKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

const OLM_GROUP: &str = "operators.coreos.com";
const OPENSHIFT_CONFIG_GROUP: &str = "config.openshift.io";

fn resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
}

pub fn operator_group() -> ApiResource {
    resource(OLM_GROUP, "v1", "OperatorGroup", "operatorgroups")
}

pub fn subscription() -> ApiResource {
    resource(OLM_GROUP, "v1alpha1", "Subscription", "subscriptions")
}

pub fn cluster_service_version() -> ApiResource {
    resource(
        OLM_GROUP,
        "v1alpha1",
        "ClusterServiceVersion",
        "clusterserviceversions",
    )
}

pub fn install_plan() -> ApiResource {
    resource(OLM_GROUP, "v1alpha1", "InstallPlan", "installplans")
}

pub fn proxy() -> ApiResource {
    resource(OPENSHIFT_CONFIG_GROUP, "v1", "Proxy", "proxies")
}

pub fn cluster_operator() -> ApiResource {
    resource(OPENSHIFT_CONFIG_GROUP, "v1", "ClusterOperator", "clusteroperators")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    #[serde(default)]
    pub target_namespaces: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub source: String,
    pub source_namespace: String,
    /// Package name
    pub name: String,
    pub channel: String,
    pub install_plan_approval: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionStatus {
    #[serde(rename = "currentCSV")]
    pub current_csv: Option<String>,
    pub installplan: Option<NamedRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterServiceVersionStatus {
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxySpec {
    #[serde(rename = "trustedCA")]
    pub trusted_ca: Option<NamedRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterOperatorStatus {
    #[serde(default)]
    pub conditions: Vec<ClusterOperatorCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterOperatorCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
}

impl ClusterOperatorStatus {
    /// True when the condition of that type is reported with status `True`
    pub fn is(&self, type_: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == type_ && c.status == "True")
    }
}

/// Read `spec` or `status` of a dynamic object; a missing section reads as default
pub fn section<T>(object: &DynamicObject, kind: &'static str, key: &str) -> Result<T, ClusterError>
where
    T: DeserializeOwned + Default,
{
    match object.data.get(key) {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|err| ClusterError::Unexpected {
                kind,
                message: format!("{key}: {err}"),
            })
        }
    }
}
