//! Scenario tests against an in-memory cluster
//!
//! The fake cluster keeps just enough state to answer the scenarios and logs
//! every call so tests can assert on ordering and retries. Time is paused,
//! so polls with minute-long deadlines resolve instantly.

#[cfg(test)]
mod fake_cluster_tests {
    use crate::cluster::{
        HealthChecker, MetricsFetcher, ProxyConfigurator, ResourceClient, ServiceEndpoint,
        CA_BUNDLE_KEY, CONFIG_NAMESPACE, USER_CA_BUNDLE,
    };
    use crate::error::{ClusterError, ScenarioError};
    use crate::health::{checks, CheckResult, HealthReport};
    use crate::metrics::findings::fixtures::metrics_body;
    use crate::metrics::MetricSample;
    use crate::models::*;
    use crate::observability::SuiteMetrics;
    use crate::scenarios::operator::{
        OperatorSettings, OperatorState, OperatorVerification, CLUSTER_ROLES, CSV_DISPLAY_NAME,
        LOCK_CONFIG_MAP, NAMESPACE, OPERATOR_NAME, WORKLOAD_PREFIX,
    };
    use crate::scenarios::proxy::{ProxyPropagation, ProxyState};
    use crate::scenarios::{execute, Scenario};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::fmt::Display;
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    const CSV_NAME: &str = "deployment-validation-operator.v0.2.0";
    const INSTALL_PLAN: &str = "install-7k2xq";

    struct FakeState {
        calls: Vec<String>,
        failing: BTreeSet<&'static str>,

        csvs: Vec<ClusterServiceVersion>,
        config_maps: BTreeSet<(String, String)>,
        cluster_roles: BTreeSet<String>,
        operator_ready_replicas: i32,
        subscription: SubscriptionStatus,
        install_plan_exists: bool,
        install_plan_errors: usize,

        workload: Option<String>,
        label_suffix: String,
        skip_findings: Vec<&'static str>,
        unavailable_fetches: usize,
        failing_fetches: usize,
        fetches: usize,

        desired_proxy: Option<ProxyDesiredState>,
        stale_proxy_reads: usize,
        proxy_reads: usize,
        unhealthy_checks: usize,
        health_checks: usize,
    }

    impl FakeState {
        fn proxy_applied(&self) -> bool {
            self.desired_proxy.is_some() && self.proxy_reads > self.stale_proxy_reads
        }
    }

    /// A cluster where the operator installs cleanly and the proxy applies
    /// on first read
    struct FakeCluster {
        state: Mutex<FakeState>,
    }

    impl FakeCluster {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(FakeState {
                    calls: Vec::new(),
                    failing: BTreeSet::new(),
                    csvs: vec![ClusterServiceVersion {
                        name: CSV_NAME.to_string(),
                        display_name: CSV_DISPLAY_NAME.to_string(),
                        phase: Some("Succeeded".to_string()),
                    }],
                    config_maps: BTreeSet::from([(
                        NAMESPACE.to_string(),
                        LOCK_CONFIG_MAP.to_string(),
                    )]),
                    cluster_roles: CLUSTER_ROLES.iter().map(|r| r.to_string()).collect(),
                    operator_ready_replicas: 1,
                    subscription: SubscriptionStatus {
                        current_csv: Some(CSV_NAME.to_string()),
                        install_plan: Some(INSTALL_PLAN.to_string()),
                    },
                    install_plan_exists: true,
                    install_plan_errors: 0,
                    workload: None,
                    label_suffix: String::new(),
                    skip_findings: Vec::new(),
                    unavailable_fetches: 0,
                    failing_fetches: 0,
                    fetches: 0,
                    desired_proxy: None,
                    stale_proxy_reads: 0,
                    proxy_reads: 0,
                    unhealthy_checks: 0,
                    health_checks: 0,
                }),
            })
        }

        fn with(self: &Arc<Self>, configure: impl FnOnce(&mut FakeState)) -> Arc<Self> {
            configure(&mut self.state.lock().unwrap());
            self.clone()
        }

        fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        fn count(&self, op: &str) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.split(' ').next() == Some(op))
                .count()
        }

        fn position(&self, call: &str) -> Option<usize> {
            self.calls().iter().position(|c| c == call)
        }

        /// Log the call and fail it if it was marked as failing
        fn call(
            &self,
            op: &'static str,
            detail: impl Display,
        ) -> Result<MutexGuard<'_, FakeState>, ClusterError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("{op} {detail}"));
            if state.failing.contains(op) {
                return Err(ClusterError::Unexpected {
                    kind: "Fake",
                    message: format!("{op} rejected"),
                });
            }
            Ok(state)
        }
    }

    #[async_trait]
    impl ResourceClient for FakeCluster {
        async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
            self.call("create_namespace", name)?;
            Ok(())
        }

        async fn delete_namespace(&self, name: &str, cascade: bool) -> Result<(), ClusterError> {
            let mut state = self.call("delete_namespace", format!("{name} cascade={cascade}"))?;
            state.install_plan_exists = false;
            Ok(())
        }

        async fn create_operator_group(&self, group: &OperatorGroup) -> Result<(), ClusterError> {
            self.call(
                "create_operator_group",
                format!("{} targets={}", group.name, group.target_namespaces.join(",")),
            )?;
            Ok(())
        }

        async fn delete_operator_group(&self, _namespace: &str, name: &str) -> Result<(), ClusterError> {
            self.call("delete_operator_group", name)?;
            Ok(())
        }

        async fn create_subscription(&self, subscription: &Subscription) -> Result<(), ClusterError> {
            self.call(
                "create_subscription",
                format!(
                    "{} package={} channel={} source={}/{} approval={}",
                    subscription.name,
                    subscription.package,
                    subscription.channel,
                    subscription.catalog_source_namespace,
                    subscription.catalog_source,
                    subscription.approval.as_str()
                ),
            )?;
            Ok(())
        }

        async fn get_subscription_status(
            &self,
            _namespace: &str,
            name: &str,
        ) -> Result<SubscriptionStatus, ClusterError> {
            let state = self.call("get_subscription", name)?;
            Ok(state.subscription.clone())
        }

        async fn delete_subscription(&self, _namespace: &str, name: &str) -> Result<(), ClusterError> {
            self.call("delete_subscription", name)?;
            Ok(())
        }

        async fn list_cluster_service_versions(
            &self,
            namespace: &str,
        ) -> Result<Vec<ClusterServiceVersion>, ClusterError> {
            let state = self.call("list_csvs", namespace)?;
            Ok(state.csvs.clone())
        }

        async fn delete_cluster_service_version(
            &self,
            _namespace: &str,
            name: &str,
        ) -> Result<(), ClusterError> {
            self.call("delete_csv", name)?;
            Ok(())
        }

        async fn get_install_plan(&self, _namespace: &str, name: &str) -> Result<(), ClusterError> {
            let mut state = self.call("get_install_plan", name)?;
            if state.install_plan_errors > 0 {
                state.install_plan_errors -= 1;
                return Err(ClusterError::Unexpected {
                    kind: "InstallPlan",
                    message: "etcdserver: request timed out".to_string(),
                });
            }
            if state.install_plan_exists {
                Ok(())
            } else {
                Err(ClusterError::not_found("InstallPlan", name))
            }
        }

        async fn create_deployment(&self, deployment: &WorkloadDeployment) -> Result<(), ClusterError> {
            let mut state = self.call("create_deployment", &deployment.name)?;
            state.workload = Some(deployment.name.clone());
            Ok(())
        }

        async fn get_deployment_status(
            &self,
            _namespace: &str,
            name: &str,
        ) -> Result<DeploymentStatus, ClusterError> {
            let state = self.call("get_deployment", name)?;
            if name != OPERATOR_NAME {
                return Err(ClusterError::not_found("Deployment", name));
            }
            Ok(DeploymentStatus {
                ready_replicas: state.operator_ready_replicas,
            })
        }

        async fn get_config_map(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<BTreeMap<String, String>, ClusterError> {
            let state = self.call("get_config_map", format!("{namespace}/{name}"))?;
            if namespace == CONFIG_NAMESPACE && name == USER_CA_BUNDLE {
                let bundle = state
                    .desired_proxy
                    .as_ref()
                    .and_then(|desired| desired.user_ca_bundle.clone());
                return match bundle {
                    Some(bundle) if state.proxy_applied() => Ok(BTreeMap::from([(
                        CA_BUNDLE_KEY.to_string(),
                        format!("{bundle}\n"),
                    )])),
                    _ => Err(ClusterError::not_found("ConfigMap", name)),
                };
            }
            if state
                .config_maps
                .contains(&(namespace.to_string(), name.to_string()))
            {
                Ok(BTreeMap::new())
            } else {
                Err(ClusterError::not_found("ConfigMap", name))
            }
        }

        async fn get_cluster_role(&self, name: &str) -> Result<(), ClusterError> {
            let state = self.call("get_cluster_role", name)?;
            if state.cluster_roles.contains(name) {
                Ok(())
            } else {
                Err(ClusterError::not_found("ClusterRole", name))
            }
        }

        async fn get_proxy(&self, name: &str) -> Result<ClusterProxy, ClusterError> {
            let mut state = self.call("get_proxy", name)?;
            state.proxy_reads += 1;
            if !state.proxy_applied() {
                return Ok(ClusterProxy::default());
            }
            let desired = state.desired_proxy.clone().unwrap_or_default();
            Ok(ClusterProxy {
                trusted_ca: desired
                    .user_ca_bundle
                    .map(|_| USER_CA_BUNDLE.to_string()),
                http_proxy: desired.http_proxy,
                https_proxy: desired.https_proxy,
            })
        }
    }

    #[async_trait]
    impl MetricsFetcher for FakeCluster {
        async fn fetch(&self, endpoint: &ServiceEndpoint) -> Result<MetricSample, ClusterError> {
            let mut state = self.call("fetch", endpoint.proxy_path())?;
            state.fetches += 1;
            if state.unavailable_fetches > 0 {
                state.unavailable_fetches -= 1;
                return Ok(MetricSample::from_body(
                    r#"{"kind":"Status","status":"Failure","reason":"ServiceUnavailable","code":503}"#,
                ));
            }
            if state.failing_fetches > 0 {
                state.failing_fetches -= 1;
                return Err(ClusterError::Unexpected {
                    kind: "Service",
                    message: "connection reset by peer".to_string(),
                });
            }
            let label = format!(
                "{}{}",
                state.workload.clone().unwrap_or_default(),
                state.label_suffix
            );
            Ok(MetricSample::from_body(metrics_body(&label, &state.skip_findings)))
        }
    }

    #[async_trait]
    impl ProxyConfigurator for FakeCluster {
        async fn add_cluster_proxy(
            &self,
            cluster_id: &str,
            desired: &ProxyDesiredState,
        ) -> Result<(), ClusterError> {
            let mut state = self.call("add_cluster_proxy", cluster_id)?;
            state.desired_proxy = Some(desired.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl HealthChecker for FakeCluster {
        async fn check_health(&self, cluster_id: &str) -> Result<HealthReport, ClusterError> {
            let mut state = self.call("check_health", cluster_id)?;
            state.health_checks += 1;
            let operators = if state.unhealthy_checks > 0 {
                state.unhealthy_checks -= 1;
                CheckResult::degraded("degraded: network, dns")
            } else {
                CheckResult::healthy()
            };
            Ok(HealthReport::from_checks(BTreeMap::from([
                (checks::NODES.to_string(), CheckResult::healthy()),
                (checks::CLUSTER_OPERATORS.to_string(), operators),
                (checks::PODS.to_string(), CheckResult::healthy()),
            ])))
        }
    }

    fn operator_scenario(fake: &Arc<FakeCluster>) -> OperatorVerification {
        operator_scenario_with(fake, OperatorSettings::default())
    }

    fn operator_scenario_with(
        fake: &Arc<FakeCluster>,
        settings: OperatorSettings,
    ) -> OperatorVerification {
        OperatorVerification::new(fake.clone(), fake.clone(), settings).with_name_suffix("abcde")
    }

    fn proxy_scenario(fake: &Arc<FakeCluster>, desired: ProxyDesiredState) -> ProxyPropagation {
        ProxyPropagation::new("2a9c1f", desired, fake.clone(), fake.clone(), fake.clone())
    }

    fn full_proxy() -> ProxyDesiredState {
        ProxyDesiredState::new(
            "https://proxy.example:3128",
            "http://proxy.example:3128",
            "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUb\n-----END CERTIFICATE-----",
        )
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_verified_when_every_finding_reported() {
        let fake = FakeCluster::new().with(|s| s.label_suffix = "-xyz".to_string());
        let mut scenario = operator_scenario(&fake);

        assert_ok!(scenario.run().await);

        assert_eq!(
            scenario.history(),
            &[
                OperatorState::NotInstalled,
                OperatorState::Installing,
                OperatorState::InstalledDeploying,
                OperatorState::Verifying,
                OperatorState::Verified,
                OperatorState::TornDown,
            ]
        );
        assert_eq!(scenario.state(), OperatorState::TornDown);

        let calls = fake.calls();
        assert!(calls.contains(&"create_deployment dvo-test-case-abcde".to_string()));
        assert!(calls.contains(&format!(
            "create_operator_group {OPERATOR_NAME} targets={NAMESPACE}"
        )));
        assert!(calls.contains(&format!(
            "create_subscription {OPERATOR_NAME} package={OPERATOR_NAME} channel=alpha source=openshift-marketplace/community-operators approval=Automatic"
        )));
        assert!(calls.contains(&format!(
            "fetch /api/v1/namespaces/{NAMESPACE}/services/http:deployment-validation-operator-metrics:8383/proxy/metrics"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_teardown_order() {
        let fake = FakeCluster::new();
        let mut scenario = operator_scenario(&fake);

        assert_ok!(scenario.run().await);

        let order: Vec<usize> = [
            format!("delete_operator_group {OPERATOR_NAME}"),
            format!("delete_subscription {OPERATOR_NAME}"),
            format!("delete_csv {CSV_NAME}"),
            format!("delete_namespace {NAMESPACE} cascade=true"),
            format!("get_install_plan {INSTALL_PLAN}"),
        ]
        .iter()
        .map(|call| fake.position(call).unwrap_or_else(|| panic!("missing {call}")))
        .collect();

        assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{order:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_one_missing_finding_times_out() {
        let fake = FakeCluster::new().with(|s| s.skip_findings = vec!["run_as_non_root"]);
        let mut scenario = operator_scenario(&fake);
        let started = Instant::now();

        let err = assert_err!(scenario.run().await);

        match err {
            ScenarioError::TimedOut {
                condition,
                timeout,
                unmet,
            } => {
                assert_eq!(condition, "validation findings reported");
                assert_eq!(timeout, secs(15));
                assert_eq!(unmet, vec!["run_as_non_root".to_string()]);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(scenario
            .history()
            .contains(&OperatorState::VerificationTimedOut));
        assert_eq!(scenario.state(), OperatorState::TornDown);
        assert_eq!(fake.count("fetch"), 8);
        assert_eq!(started.elapsed(), secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_unavailable_metrics_are_retried() {
        let fake = FakeCluster::new().with(|s| s.unavailable_fetches = 2);
        let mut scenario = operator_scenario(&fake);
        let started = Instant::now();

        assert_ok!(scenario.run().await);

        assert_eq!(fake.count("fetch"), 3);
        assert_eq!(started.elapsed(), secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_fetch_errors_count_as_unmet() {
        let fake = FakeCluster::new().with(|s| s.failing_fetches = 1);
        let mut scenario = operator_scenario(&fake);

        assert_ok!(scenario.run().await);
        assert_eq!(fake.count("fetch"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_install_failure_is_fatal() {
        let fake = FakeCluster::new().with(|s| {
            s.failing.insert("create_subscription");
        });
        let mut scenario = operator_scenario(&fake);

        let err = assert_err!(scenario.run().await);

        assert_eq!(
            err.to_string(),
            "failed trying to create subscription deployment-validation-operator: unexpected Fake payload: create_subscription rejected"
        );
        assert_eq!(fake.count("create_subscription"), 1);
        assert_eq!(fake.count("create_deployment"), 0);
        assert_eq!(fake.count("delete_namespace"), 1);
        assert_eq!(
            scenario.history(),
            &[OperatorState::NotInstalled, OperatorState::Installing]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_namespace_failure_skips_cleanup() {
        let fake = FakeCluster::new().with(|s| {
            s.failing.insert("create_namespace");
        });
        let mut scenario = operator_scenario(&fake);

        let err = assert_err!(scenario.run().await);

        assert!(matches!(err, ScenarioError::Setup { .. }));
        assert_eq!(fake.calls(), vec![format!("create_namespace {NAMESPACE}")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_missing_cluster_role_times_out_post_install() {
        let fake = FakeCluster::new().with(|s| {
            s.cluster_roles.remove("deployment-validation-operator-view");
        });
        let settings = OperatorSettings {
            polling_timeout: secs(10),
            ..Default::default()
        };
        let mut scenario = operator_scenario_with(&fake, settings);

        let err = assert_err!(scenario.run().await);

        match err {
            ScenarioError::TimedOut {
                condition, unmet, ..
            } => {
                assert_eq!(condition, "operator cluster roles");
                assert_eq!(
                    unmet,
                    vec!["clusterrole deployment-validation-operator-view".to_string()]
                );
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(fake.count("create_deployment"), 0);
        assert_eq!(fake.count("delete_namespace"), 1);
        assert_eq!(scenario.state(), OperatorState::TornDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_waits_for_operator_deployment() {
        let fake = FakeCluster::new().with(|s| s.operator_ready_replicas = 0);
        let settings = OperatorSettings {
            polling_timeout: secs(20),
            ..Default::default()
        };
        let mut scenario = operator_scenario_with(&fake, settings);

        let err = assert_err!(scenario.run().await);

        assert!(err.is_timeout());
        assert!(err.to_string().contains("operator deployment ready"));
        assert_eq!(fake.count("get_deployment"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_plan_absent_short_circuits() {
        let fake = FakeCluster::new();
        let mut scenario = operator_scenario(&fake);
        let started = Instant::now();

        assert_ok!(scenario.run().await);

        assert_eq!(fake.count("get_install_plan"), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_plan_lookup_errors_are_retried() {
        let fake = FakeCluster::new().with(|s| s.install_plan_errors = 2);
        let mut scenario = operator_scenario(&fake);
        let started = Instant::now();

        assert_ok!(scenario.run().await);

        assert_eq!(fake.count("get_install_plan"), 3);
        assert_eq!(started.elapsed(), secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_deletion_failure_is_fatal() {
        let fake = FakeCluster::new().with(|s| {
            s.failing.insert("delete_subscription");
        });
        let mut scenario = operator_scenario(&fake);

        let err = assert_err!(scenario.run().await);

        assert!(err
            .to_string()
            .starts_with("failed trying to delete subscription deployment-validation-operator"));
        assert_eq!(fake.count("delete_namespace"), 0);
        assert_eq!(scenario.state(), OperatorState::Verified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_failure_wins_over_teardown_failure() {
        let fake = FakeCluster::new().with(|s| {
            s.skip_findings = vec!["no_readiness_probe"];
            s.failing.insert("delete_namespace");
        });
        let mut scenario = operator_scenario(&fake);

        let err = assert_err!(scenario.run().await);

        assert!(err.is_timeout());
        assert_eq!(scenario.state(), OperatorState::VerificationTimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_read_failure_in_teardown_still_deletes() {
        let fake = FakeCluster::new().with(|s| {
            s.failing.insert("get_subscription");
        });
        let mut scenario = operator_scenario(&fake);

        let err = assert_err!(scenario.run().await);

        assert!(matches!(err, ScenarioError::PollFailed { .. }));
        assert_eq!(fake.count("get_subscription"), 1);
        assert_eq!(fake.count("delete_operator_group"), 1);
        assert_eq!(fake.count("delete_subscription"), 1);
        assert_eq!(fake.count("delete_namespace"), 1);
        assert_eq!(fake.count("delete_csv"), 0);
        assert_eq!(fake.count("get_install_plan"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_csv_still_removes_installed_resources() {
        let fake = FakeCluster::new().with(|s| {
            s.csvs.clear();
            s.subscription.current_csv = None;
        });
        let settings = OperatorSettings {
            polling_timeout: secs(10),
            ..Default::default()
        };
        let mut scenario = operator_scenario_with(&fake, settings);

        let err = assert_err!(scenario.run().await);

        match err {
            ScenarioError::TimedOut { condition, .. } => {
                assert_eq!(condition, "operator csv succeeded");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(fake.count("create_deployment"), 0);
        assert_eq!(fake.count("delete_operator_group"), 1);
        assert_eq!(fake.count("delete_subscription"), 1);
        assert_eq!(fake.count("delete_namespace"), 1);
        assert_eq!(fake.count("delete_csv"), 0);
        assert_eq!(fake.count("get_install_plan"), 0);
        assert_eq!(scenario.state(), OperatorState::TornDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workload_name_is_random_by_default() {
        let fake = FakeCluster::new();
        let mut scenario =
            OperatorVerification::new(fake.clone(), fake.clone(), OperatorSettings::default());

        assert_ok!(scenario.run().await);

        let call = fake
            .calls()
            .into_iter()
            .find(|call| call.starts_with("create_deployment"))
            .unwrap();
        let name = call.trim_start_matches("create_deployment ");
        let suffix = name
            .strip_prefix(&format!("{WORKLOAD_PREFIX}-"))
            .unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_propagates_and_cluster_stays_healthy() {
        let fake = FakeCluster::new().with(|s| s.stale_proxy_reads = 2);
        let mut scenario = proxy_scenario(&fake, full_proxy());
        let started = Instant::now();

        assert_ok!(scenario.run().await);

        assert_eq!(
            scenario.history(),
            &[
                ProxyState::Unset,
                ProxyState::Mutated,
                ProxyState::ConfigPropagated,
                ProxyState::HealthVerified,
            ]
        );
        assert_eq!(fake.count("add_cluster_proxy"), 1);
        assert_eq!(fake.count("get_proxy"), 3);
        assert_eq!(fake.count("check_health"), 1);
        assert_eq!(started.elapsed(), secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_first_read_waits_one_interval() {
        let fake = FakeCluster::new();
        let mut scenario = proxy_scenario(&fake, full_proxy());
        let started = Instant::now();

        assert_ok!(scenario.run().await);

        assert_eq!(fake.count("get_proxy"), 1);
        assert_eq!(started.elapsed(), secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_empty_fields_are_not_checked() {
        let fake = FakeCluster::new();
        let desired = ProxyDesiredState::new("https://proxy.example:3128", "", "");
        let mut scenario = proxy_scenario(&fake, desired);

        assert_ok!(scenario.run().await);

        assert_eq!(fake.count("get_config_map"), 0);
        let applied = fake.state.lock().unwrap().desired_proxy.clone().unwrap();
        assert_eq!(applied.http_proxy, None);
        assert_eq!(applied.user_ca_bundle, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_timeout_lists_unmet_fields() {
        let fake = FakeCluster::new().with(|s| s.stale_proxy_reads = usize::MAX);
        let mut scenario = proxy_scenario(&fake, full_proxy());
        let started = Instant::now();

        let err = assert_err!(scenario.run().await);

        match err {
            ScenarioError::TimedOut {
                condition,
                timeout,
                unmet,
            } => {
                assert_eq!(condition, "proxy configuration propagated");
                assert_eq!(timeout, secs(15 * 60));
                assert_eq!(
                    unmet,
                    vec!["trustedCA", "ca-bundle.crt", "httpsProxy", "httpProxy"]
                );
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(scenario.state(), ProxyState::ConfigTimedOut);
        assert_eq!(fake.count("check_health"), 0);
        assert_eq!(started.elapsed(), secs(15 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_read_failure_is_fatal() {
        let fake = FakeCluster::new().with(|s| {
            s.failing.insert("get_proxy");
        });
        let mut scenario = proxy_scenario(&fake, full_proxy());

        let err = assert_err!(scenario.run().await);

        assert!(matches!(err, ScenarioError::PollFailed { .. }));
        assert_eq!(fake.count("get_proxy"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_unhealthy_cluster_is_retried() {
        let fake = FakeCluster::new().with(|s| s.unhealthy_checks = 2);
        let mut scenario = proxy_scenario(&fake, full_proxy());
        let started = Instant::now();

        assert_ok!(scenario.run().await);

        assert_eq!(fake.count("check_health"), 3);
        assert_eq!(started.elapsed(), secs(90));
        assert_eq!(scenario.state(), ProxyState::HealthVerified);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_health_timeout_names_failing_checks() {
        let fake = FakeCluster::new().with(|s| s.unhealthy_checks = usize::MAX);
        let mut scenario = proxy_scenario(&fake, full_proxy());

        let err = assert_err!(scenario.run().await);

        match err {
            ScenarioError::TimedOut {
                condition, unmet, ..
            } => {
                assert_eq!(condition, "cluster health");
                assert_eq!(unmet, vec!["cluster-operators".to_string()]);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(scenario.state(), ProxyState::HealthTimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_health_error_is_fatal() {
        let fake = FakeCluster::new().with(|s| {
            s.failing.insert("check_health");
        });
        let mut scenario = proxy_scenario(&fake, full_proxy());

        let err = assert_err!(scenario.run().await);

        assert!(matches!(err, ScenarioError::PollFailed { .. }));
        assert_eq!(fake.count("check_health"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proxy_mutation_failure_is_fatal() {
        let fake = FakeCluster::new().with(|s| {
            s.failing.insert("add_cluster_proxy");
        });
        let mut scenario = proxy_scenario(&fake, full_proxy());

        let err = assert_err!(scenario.run().await);

        assert!(err.to_string().starts_with("failed trying to add cluster proxy"));
        assert_eq!(scenario.state(), ProxyState::Unset);
        assert_eq!(fake.count("get_proxy"), 0);
    }

    struct FixedScenario {
        passes: bool,
    }

    #[async_trait]
    impl Scenario for FixedScenario {
        fn id(&self) -> &'static str {
            "fixed-verdict-test"
        }

        async fn run(&mut self) -> Result<(), ScenarioError> {
            if self.passes {
                Ok(())
            } else {
                Err(ScenarioError::setup(
                    "create namespace",
                    ClusterError::not_found("Namespace", "fixed"),
                ))
            }
        }
    }

    #[tokio::test]
    async fn test_execute_records_verdict() {
        let metrics = SuiteMetrics::new();

        assert_err!(execute(&mut FixedScenario { passes: false }).await);
        assert_eq!(metrics.scenario_passed("fixed-verdict-test"), Some(false));

        assert_ok!(execute(&mut FixedScenario { passes: true }).await);
        assert_eq!(metrics.scenario_passed("fixed-verdict-test"), Some(true));
    }
}
