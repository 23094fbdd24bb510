//! Cluster-wide proxy propagation scenario
//!
//! Applies a proxy configuration once, waits until the proxy resource and
//! the trusted CA bundle reflect it and then waits for the cluster to be
//! healthy again.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{absent_as_none, settle, Scenario, Unmet};
use crate::catalog;
use crate::cluster::{
    HealthChecker, ProxyConfigurator, ResourceClient, CA_BUNDLE_KEY, CLUSTER_PROXY,
    CONFIG_NAMESPACE, USER_CA_BUNDLE,
};
use crate::error::{ClusterError, ScenarioError};
use crate::models::ProxyDesiredState;
use crate::observability::ScenarioLogger;
use crate::poll::{poll, PollSpec};

pub const PROPAGATION_INTERVAL: Duration = Duration::from_secs(30);
pub const PROPAGATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(30);
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(45 * 60);

const PROPAGATION_CONDITION: &str = "proxy configuration propagated";
const HEALTH_CONDITION: &str = "cluster health";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Unset,
    Mutated,
    ConfigPropagated,
    ConfigTimedOut,
    HealthVerified,
    HealthTimedOut,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyState::Unset => "unset",
            ProxyState::Mutated => "mutated",
            ProxyState::ConfigPropagated => "config_propagated",
            ProxyState::ConfigTimedOut => "config_timed_out",
            ProxyState::HealthVerified => "health_verified",
            ProxyState::HealthTimedOut => "health_timed_out",
        };
        f.write_str(name)
    }
}

/// Proxy configuration as read back from the cluster in one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyObservedState {
    pub https_proxy: Option<String>,
    pub http_proxy: Option<String>,
    /// Config map referenced as the trusted CA
    pub trusted_ca: Option<String>,
    /// Bundle stored in the user CA config map, absent until it exists
    pub ca_bundle: Option<String>,
}

/// Fields of `desired` that `observed` does not reflect yet.
///
/// Unset desired fields are never reported. Proxy URLs must match exactly;
/// the CA bundle is compared with surrounding whitespace trimmed.
pub fn unmet(desired: &ProxyDesiredState, observed: &ProxyObservedState) -> Vec<String> {
    let mut unmet = Vec::new();

    if let Some(bundle) = &desired.user_ca_bundle {
        if observed.trusted_ca.as_deref() != Some(USER_CA_BUNDLE) {
            unmet.push("trustedCA".to_string());
        }
        if observed.ca_bundle.as_deref().map(str::trim) != Some(bundle.trim()) {
            unmet.push(CA_BUNDLE_KEY.to_string());
        }
    }
    if let Some(https_proxy) = &desired.https_proxy {
        if observed.https_proxy.as_ref() != Some(https_proxy) {
            unmet.push("httpsProxy".to_string());
        }
    }
    if let Some(http_proxy) = &desired.http_proxy {
        if observed.http_proxy.as_ref() != Some(http_proxy) {
            unmet.push("httpProxy".to_string());
        }
    }

    unmet
}

pub struct ProxyPropagation {
    resources: Arc<dyn ResourceClient>,
    configurator: Arc<dyn ProxyConfigurator>,
    health: Arc<dyn HealthChecker>,
    cluster_id: String,
    desired: ProxyDesiredState,
    state: ProxyState,
    history: Vec<ProxyState>,
    logger: ScenarioLogger,
}

impl ProxyPropagation {
    pub fn new(
        cluster_id: impl Into<String>,
        desired: ProxyDesiredState,
        resources: Arc<dyn ResourceClient>,
        configurator: Arc<dyn ProxyConfigurator>,
        health: Arc<dyn HealthChecker>,
    ) -> Self {
        Self {
            resources,
            configurator,
            health,
            cluster_id: cluster_id.into(),
            desired,
            state: ProxyState::Unset,
            history: vec![ProxyState::Unset],
            logger: ScenarioLogger::new(catalog::PROXY_POST_INSTALL),
        }
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    pub fn history(&self) -> &[ProxyState] {
        &self.history
    }

    fn transition(&mut self, to: ProxyState) {
        self.logger.log_state_transition(self.state, to);
        self.state = to;
        self.history.push(to);
    }

    async fn wait_for_propagation(&mut self) -> Result<(), ScenarioError> {
        let spec = PollSpec::delayed(PROPAGATION_INTERVAL, PROPAGATION_TIMEOUT)?;
        let unmet = Unmet::default();
        let resources = self.resources.as_ref();

        let outcome = poll(PROPAGATION_CONDITION, &spec, || {
            propagated(resources, &self.desired, &unmet, &self.logger)
        })
        .await;
        let result = settle(&self.logger, PROPAGATION_CONDITION, &spec, outcome, &unmet);

        self.transition(if result.is_ok() {
            ProxyState::ConfigPropagated
        } else {
            ProxyState::ConfigTimedOut
        });
        result
    }

    async fn wait_for_health(&mut self) -> Result<(), ScenarioError> {
        let spec = PollSpec::immediate(HEALTH_INTERVAL, HEALTH_TIMEOUT)?;
        let unmet = Unmet::default();
        let health = self.health.as_ref();

        let outcome = poll(HEALTH_CONDITION, &spec, || {
            healthy(health, &self.cluster_id, &unmet, &self.logger)
        })
        .await;
        let result = settle(&self.logger, HEALTH_CONDITION, &spec, outcome, &unmet);

        self.transition(if result.is_ok() {
            ProxyState::HealthVerified
        } else {
            ProxyState::HealthTimedOut
        });
        result
    }
}

#[async_trait]
impl Scenario for ProxyPropagation {
    fn id(&self) -> &'static str {
        catalog::PROXY_POST_INSTALL
    }

    async fn run(&mut self) -> Result<(), ScenarioError> {
        self.configurator
            .add_cluster_proxy(&self.cluster_id, &self.desired)
            .await
            .map_err(|err| ScenarioError::setup("add cluster proxy", err))?;
        self.transition(ProxyState::Mutated);

        self.wait_for_propagation().await?;
        self.wait_for_health().await
    }
}

/// Read the proxy resource and, when a bundle is wanted, the CA config map
async fn observe(
    resources: &dyn ResourceClient,
    desired: &ProxyDesiredState,
) -> Result<ProxyObservedState, ClusterError> {
    let proxy = resources.get_proxy(CLUSTER_PROXY).await?;

    let ca_bundle = if desired.user_ca_bundle.is_some() {
        absent_as_none(resources.get_config_map(CONFIG_NAMESPACE, USER_CA_BUNDLE).await)?
            .and_then(|mut data| data.remove(CA_BUNDLE_KEY))
    } else {
        None
    };

    Ok(ProxyObservedState {
        https_proxy: proxy.https_proxy,
        http_proxy: proxy.http_proxy,
        trusted_ca: proxy.trusted_ca,
        ca_bundle,
    })
}

async fn propagated(
    resources: &dyn ResourceClient,
    desired: &ProxyDesiredState,
    tracker: &Unmet,
    logger: &ScenarioLogger,
) -> Result<bool, ClusterError> {
    let observed = observe(resources, desired).await?;
    let fields = unmet(desired, &observed);
    if fields.is_empty() {
        tracker.clear();
        return Ok(true);
    }

    logger.log_unmet(PROPAGATION_CONDITION, &fields);
    tracker.record(fields);
    Ok(false)
}

async fn healthy(
    health: &dyn HealthChecker,
    cluster_id: &str,
    tracker: &Unmet,
    logger: &ScenarioLogger,
) -> Result<bool, ClusterError> {
    let report = health.check_health(cluster_id).await?;
    if report.is_healthy() {
        tracker.clear();
        return Ok(true);
    }

    let failing = report.failing();
    logger.log_unmet(HEALTH_CONDITION, &failing);
    tracker.record(failing);
    Ok(false)
}
