//! Deployment validation operator scenario
//!
//! Installs the operator from the community catalog, deploys a workload that
//! violates every validation check, waits until the operator reports all of
//! them for that workload and removes everything it created.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{absent_as_none, settle, Scenario, Unmet};
use crate::catalog;
use crate::cluster::{MetricsFetcher, ResourceClient, ServiceEndpoint};
use crate::error::{ClusterError, ScenarioError};
use crate::metrics::missing_findings;
use crate::models::{
    InstallPlanApproval, OperatorGroup, Subscription, SubscriptionStatus, WorkloadDeployment,
};
use crate::observability::ScenarioLogger;
use crate::poll::{poll, PollSpec};

pub const NAMESPACE: &str = "osde2e-deployment-validation-operator";
/// Name of the operator group, the subscription, the package and the
/// operator deployment
pub const OPERATOR_NAME: &str = "deployment-validation-operator";
pub const CHANNEL: &str = "alpha";
pub const CATALOG_SOURCE: &str = "community-operators";
pub const CATALOG_SOURCE_NAMESPACE: &str = "openshift-marketplace";
pub const CSV_DISPLAY_NAME: &str = "Deployment Validation Operator";
pub const LOCK_CONFIG_MAP: &str = "deployment-validation-operator-lock";
pub const CLUSTER_ROLES: [&str; 3] = [
    "deployment-validation-operator-admin",
    "deployment-validation-operator-edit",
    "deployment-validation-operator-view",
];

pub const METRICS_SERVICE: &str = "deployment-validation-operator-metrics";
pub const METRICS_PORT: &str = "8383";
pub const METRICS_PATH: &str = "/metrics";

pub const WORKLOAD_PREFIX: &str = "dvo-test-case";
pub const WORKLOAD_CONTAINER: &str = "test";
pub const WORKLOAD_IMAGE: &str = "registry.access.redhat.com/ubi8/ubi-minimal";

const WORKLOAD_SUFFIX_LEN: usize = 5;
const CHECK_INTERVAL: Duration = Duration::from_secs(5);
const VERIFY_INTERVAL: Duration = Duration::from_secs(2);
const VERIFY_TIMEOUT: Duration = Duration::from_secs(15);
const CSV_INTERVAL: Duration = Duration::from_secs(5);
const CSV_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const INSTALL_PLAN_INTERVAL: Duration = Duration::from_secs(10);
const INSTALL_PLAN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    NotInstalled,
    Installing,
    InstalledDeploying,
    Verifying,
    Verified,
    VerificationTimedOut,
    TornDown,
}

impl fmt::Display for OperatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatorState::NotInstalled => "not_installed",
            OperatorState::Installing => "installing",
            OperatorState::InstalledDeploying => "installed_deploying",
            OperatorState::Verifying => "verifying",
            OperatorState::Verified => "verified",
            OperatorState::VerificationTimedOut => "verification_timed_out",
            OperatorState::TornDown => "torn_down",
        };
        f.write_str(name)
    }
}

/// Tunables of the operator scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorSettings {
    /// Node selector of the test workload
    pub node_labels: BTreeMap<String, String>,
    pub service_account: Option<String>,
    /// Deadline of each post-install check
    pub polling_timeout: Duration,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            node_labels: BTreeMap::new(),
            service_account: None,
            polling_timeout: Duration::from_secs(300),
        }
    }
}

pub struct OperatorVerification {
    resources: Arc<dyn ResourceClient>,
    metrics: Arc<dyn MetricsFetcher>,
    settings: OperatorSettings,
    name_suffix: Option<String>,
    namespace_created: bool,
    state: OperatorState,
    history: Vec<OperatorState>,
    logger: ScenarioLogger,
}

impl OperatorVerification {
    pub fn new(
        resources: Arc<dyn ResourceClient>,
        metrics: Arc<dyn MetricsFetcher>,
        settings: OperatorSettings,
    ) -> Self {
        Self {
            resources,
            metrics,
            settings,
            name_suffix: None,
            namespace_created: false,
            state: OperatorState::NotInstalled,
            history: vec![OperatorState::NotInstalled],
            logger: ScenarioLogger::new(catalog::OPERATOR_DVO),
        }
    }

    /// Use a fixed workload name suffix instead of a random one
    pub fn with_name_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.name_suffix = Some(suffix.into());
        self
    }

    pub fn state(&self) -> OperatorState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> &[OperatorState] {
        &self.history
    }

    fn transition(&mut self, to: OperatorState) {
        self.logger.log_state_transition(self.state, to);
        self.state = to;
        self.history.push(to);
    }

    fn workload_name(&self) -> String {
        let suffix = match &self.name_suffix {
            Some(suffix) => suffix.clone(),
            None => workload_suffix(Uuid::new_v4().as_bytes()),
        };
        format!("{WORKLOAD_PREFIX}-{suffix}")
    }

    async fn install(&mut self) -> Result<(), ScenarioError> {
        self.transition(OperatorState::Installing);

        self.resources
            .create_namespace(NAMESPACE)
            .await
            .map_err(|err| ScenarioError::setup(format!("create namespace {NAMESPACE}"), err))?;
        self.namespace_created = true;

        let group = OperatorGroup {
            namespace: NAMESPACE.to_string(),
            name: OPERATOR_NAME.to_string(),
            target_namespaces: vec![NAMESPACE.to_string()],
        };
        self.resources
            .create_operator_group(&group)
            .await
            .map_err(|err| ScenarioError::setup(format!("create operator group {OPERATOR_NAME}"), err))?;

        let subscription = Subscription {
            namespace: NAMESPACE.to_string(),
            name: OPERATOR_NAME.to_string(),
            package: OPERATOR_NAME.to_string(),
            channel: CHANNEL.to_string(),
            catalog_source: CATALOG_SOURCE.to_string(),
            catalog_source_namespace: CATALOG_SOURCE_NAMESPACE.to_string(),
            approval: InstallPlanApproval::Automatic,
        };
        self.resources
            .create_subscription(&subscription)
            .await
            .map_err(|err| ScenarioError::setup(format!("create subscription {OPERATOR_NAME}"), err))?;

        Ok(())
    }

    /// Wait until the installed operator is up and fully registered
    async fn post_install_checks(&self) -> Result<(), ScenarioError> {
        let spec = PollSpec::immediate(CHECK_INTERVAL, self.settings.polling_timeout)?;
        let resources = self.resources.as_ref();
        let unmet = Unmet::default();

        let condition = "operator csv succeeded";
        let outcome = poll(condition, &spec, || csv_succeeded(resources, &unmet)).await;
        settle(&self.logger, condition, &spec, outcome, &unmet)?;

        let condition = "operator lock config map";
        let outcome = poll(condition, &spec, || lock_present(resources, &unmet)).await;
        settle(&self.logger, condition, &spec, outcome, &unmet)?;

        let condition = "operator deployment ready";
        let outcome = poll(condition, &spec, || operator_ready(resources, &unmet)).await;
        settle(&self.logger, condition, &spec, outcome, &unmet)?;

        let condition = "operator cluster roles";
        let outcome = poll(condition, &spec, || cluster_roles_present(resources, &unmet)).await;
        settle(&self.logger, condition, &spec, outcome, &unmet)
    }

    async fn deploy(&mut self, name: &str) -> Result<(), ScenarioError> {
        self.transition(OperatorState::InstalledDeploying);

        let workload = WorkloadDeployment {
            namespace: NAMESPACE.to_string(),
            name: name.to_string(),
            replicas: 1,
            labels: BTreeMap::from([("name".to_string(), WORKLOAD_PREFIX.to_string())]),
            node_selector: self.settings.node_labels.clone(),
            service_account: self.settings.service_account.clone(),
            container_name: WORKLOAD_CONTAINER.to_string(),
            image: WORKLOAD_IMAGE.to_string(),
        };
        self.resources
            .create_deployment(&workload)
            .await
            .map_err(|err| ScenarioError::setup(format!("create deployment {name}"), err))
    }

    async fn verify(&mut self, name: &str) -> Result<(), ScenarioError> {
        self.transition(OperatorState::Verifying);

        let spec = PollSpec::immediate(VERIFY_INTERVAL, VERIFY_TIMEOUT)?;
        let endpoint = ServiceEndpoint::new(NAMESPACE, METRICS_SERVICE, METRICS_PORT, METRICS_PATH);
        let metrics = self.metrics.as_ref();
        let unmet = Unmet::default();

        let condition = "validation findings reported";
        let outcome = poll(condition, &spec, || {
            findings_reported(metrics, &endpoint, name, &unmet, &self.logger)
        })
        .await;
        let result = settle(&self.logger, condition, &spec, outcome, &unmet);

        self.transition(if result.is_ok() {
            OperatorState::Verified
        } else {
            OperatorState::VerificationTimedOut
        });
        result
    }

    /// Remove everything the install created. Deletions still run when the
    /// current CSV never shows up; that wait error is returned afterwards.
    async fn teardown(&mut self) -> Result<(), ScenarioError> {
        let resources = self.resources.clone();
        let installed = Mutex::new(SubscriptionStatus::default());
        let unmet = Unmet::default();

        let spec = PollSpec::immediate(CSV_INTERVAL, CSV_TIMEOUT)?;
        let condition = "subscription current csv";
        let outcome = poll(condition, &spec, || {
            current_csv_known(resources.as_ref(), &installed, &unmet)
        })
        .await;
        let csv_known = settle(&self.logger, condition, &spec, outcome, &unmet);
        let installed = installed.into_inner().unwrap_or_else(PoisonError::into_inner);

        let deleted = self.delete_installed(installed.current_csv.as_deref()).await;
        if let Err(err) = csv_known {
            if let Err(delete_err) = deleted {
                warn!(
                    scenario = %self.logger.scenario(),
                    error = %delete_err,
                    "Teardown deletion failed"
                );
            } else {
                self.transition(OperatorState::TornDown);
            }
            return Err(err);
        }
        deleted?;

        if let Some(plan) = &installed.install_plan {
            let spec = PollSpec::immediate(INSTALL_PLAN_INTERVAL, INSTALL_PLAN_TIMEOUT)?;
            let condition = "install plan removed";
            let outcome = poll(condition, &spec, || {
                install_plan_gone(resources.as_ref(), plan, &unmet)
            })
            .await;
            settle(&self.logger, condition, &spec, outcome, &unmet)?;
        }

        self.transition(OperatorState::TornDown);
        Ok(())
    }

    async fn delete_installed(&self, csv: Option<&str>) -> Result<(), ScenarioError> {
        let resources = self.resources.as_ref();
        resources
            .delete_operator_group(NAMESPACE, OPERATOR_NAME)
            .await
            .map_err(|err| ScenarioError::setup(format!("delete operator group {OPERATOR_NAME}"), err))?;
        resources
            .delete_subscription(NAMESPACE, OPERATOR_NAME)
            .await
            .map_err(|err| ScenarioError::setup(format!("delete subscription {OPERATOR_NAME}"), err))?;
        if let Some(csv) = csv {
            resources
                .delete_cluster_service_version(NAMESPACE, csv)
                .await
                .map_err(|err| ScenarioError::setup(format!("delete csv {csv}"), err))?;
        }
        resources
            .delete_namespace(NAMESPACE, true)
            .await
            .map_err(|err| ScenarioError::setup(format!("delete namespace {NAMESPACE}"), err))
    }

    /// Best-effort removal after an installation that did not complete
    async fn abandon_install(&self) {
        if !self.namespace_created {
            return;
        }
        if let Err(err) = self.resources.delete_namespace(NAMESPACE, true).await {
            warn!(
                scenario = %self.logger.scenario(),
                namespace = %NAMESPACE,
                error = %err,
                "Failed to clean up after failed install"
            );
        }
    }
}

#[async_trait]
impl Scenario for OperatorVerification {
    fn id(&self) -> &'static str {
        catalog::OPERATOR_DVO
    }

    async fn run(&mut self) -> Result<(), ScenarioError> {
        if let Err(err) = self.install().await {
            self.abandon_install().await;
            return Err(err);
        }

        let name = self.workload_name();
        let mut result = self.post_install_checks().await;
        if result.is_ok() {
            result = self.deploy(&name).await;
        }
        if result.is_ok() {
            result = self.verify(&name).await;
        }

        let teardown = self.teardown().await;
        match (result, teardown) {
            (Ok(()), teardown) => teardown,
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(teardown_err)) => {
                warn!(
                    scenario = %self.logger.scenario(),
                    error = %teardown_err,
                    "Teardown failed after an earlier failure"
                );
                Err(err)
            }
        }
    }
}

async fn csv_succeeded(resources: &dyn ResourceClient, unmet: &Unmet) -> Result<bool, ClusterError> {
    let csvs = absent_as_none(resources.list_cluster_service_versions(NAMESPACE).await)?
        .unwrap_or_default();
    let succeeded = csvs
        .iter()
        .any(|csv| csv.display_name == CSV_DISPLAY_NAME && csv.succeeded());
    if !succeeded {
        unmet.record([format!("csv {CSV_DISPLAY_NAME:?} in phase Succeeded")]);
    }
    Ok(succeeded)
}

async fn lock_present(resources: &dyn ResourceClient, unmet: &Unmet) -> Result<bool, ClusterError> {
    let found = absent_as_none(resources.get_config_map(NAMESPACE, LOCK_CONFIG_MAP).await)?;
    if found.is_none() {
        unmet.record([format!("configmap {LOCK_CONFIG_MAP}")]);
    }
    Ok(found.is_some())
}

async fn operator_ready(resources: &dyn ResourceClient, unmet: &Unmet) -> Result<bool, ClusterError> {
    let status = absent_as_none(resources.get_deployment_status(NAMESPACE, OPERATOR_NAME).await)?;
    let ready = status.is_some_and(|status| status.ready_replicas >= 1);
    if !ready {
        unmet.record([format!("deployment {OPERATOR_NAME} ready")]);
    }
    Ok(ready)
}

async fn cluster_roles_present(
    resources: &dyn ResourceClient,
    unmet: &Unmet,
) -> Result<bool, ClusterError> {
    let mut missing = Vec::new();
    for role in CLUSTER_ROLES {
        if absent_as_none(resources.get_cluster_role(role).await)?.is_none() {
            missing.push(format!("clusterrole {role}"));
        }
    }
    let present = missing.is_empty();
    unmet.record(missing);
    Ok(present)
}

/// Fetch errors and unavailable backends count as not reported yet
async fn findings_reported(
    metrics: &dyn MetricsFetcher,
    endpoint: &ServiceEndpoint,
    workload: &str,
    unmet: &Unmet,
    logger: &ScenarioLogger,
) -> Result<bool, ClusterError> {
    let sample = match metrics.fetch(endpoint).await {
        Ok(sample) => sample,
        Err(err) => {
            debug!(service = %endpoint.service, error = %err, "Metrics fetch failed");
            unmet.record([format!("metrics from {}", endpoint.service)]);
            return Ok(false);
        }
    };

    let missing = missing_findings(&sample, workload);
    if missing.is_empty() {
        unmet.clear();
        return Ok(true);
    }

    let missing: Vec<String> = missing.into_iter().map(String::from).collect();
    logger.log_unmet("validation findings reported", &missing);
    unmet.record(missing);
    Ok(false)
}

/// Lowercase alphanumeric suffix drawn from random bytes
fn workload_suffix(random: &[u8]) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    random
        .iter()
        .take(WORKLOAD_SUFFIX_LEN)
        .map(|byte| char::from(ALPHABET[usize::from(*byte) % ALPHABET.len()]))
        .collect()
}

async fn current_csv_known(
    resources: &dyn ResourceClient,
    installed: &Mutex<SubscriptionStatus>,
    unmet: &Unmet,
) -> Result<bool, ClusterError> {
    let status = resources
        .get_subscription_status(NAMESPACE, OPERATOR_NAME)
        .await?;
    if status.current_csv.is_none() {
        unmet.record([format!("subscription {OPERATOR_NAME} current csv")]);
        return Ok(false);
    }
    *installed.lock().unwrap_or_else(PoisonError::into_inner) = status;
    Ok(true)
}

/// Only a not-found answer proves the plan is gone; other errors are retried
async fn install_plan_gone(
    resources: &dyn ResourceClient,
    plan: &str,
    unmet: &Unmet,
) -> Result<bool, ClusterError> {
    match resources.get_install_plan(NAMESPACE, plan).await {
        Err(err) if err.is_not_found() => Ok(true),
        Ok(()) => {
            unmet.record([format!("installplan {plan} deleted")]);
            Ok(false)
        }
        Err(err) => {
            debug!(install_plan = %plan, error = %err, "Install plan lookup failed");
            unmet.record([format!("installplan {plan} deleted")]);
            Ok(false)
        }
    }
}
