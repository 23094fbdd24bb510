//! Suite configuration

use anyhow::{Context, Result};
use e2e_lib::scenarios::OperatorSettings;
use e2e_lib::ProxyDesiredState;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Suite configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SuiteConfig {
    /// Identifier of the cluster under test
    #[serde(default)]
    pub cluster_id: String,

    /// Path to kubeconfig file (inferred if not set)
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub tests: TestsConfig,

    #[serde(default)]
    pub operator: OperatorConfig,
}

/// Cluster-wide proxy to apply; empty values are left alone
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub http_proxy: String,
    /// PEM bundle to trust
    #[serde(default)]
    pub user_ca_bundle: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestsConfig {
    /// Deadline of each post-install operator check, in seconds
    #[serde(default = "default_polling_timeout")]
    pub polling_timeout_secs: u64,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            polling_timeout_secs: default_polling_timeout(),
        }
    }
}

fn default_polling_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperatorConfig {
    /// Node selector for test workloads
    #[serde(default)]
    pub node_labels: BTreeMap<String, String>,

    /// Service account for test workloads
    #[serde(default)]
    pub service_account: Option<String>,
}

impl SuiteConfig {
    /// Load configuration from an optional file, then the environment.
    ///
    /// Environment variables use the `E2E_` prefix and `__` between nested
    /// keys, e.g. `E2E_TESTS__POLLING_TIMEOUT_SECS`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("E2E")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to read suite configuration")?;

        config
            .try_deserialize()
            .context("Invalid suite configuration")
    }

    pub fn desired_proxy(&self) -> ProxyDesiredState {
        ProxyDesiredState::new(
            &self.proxy.https_proxy,
            &self.proxy.http_proxy,
            &self.proxy.user_ca_bundle,
        )
    }

    pub fn operator_settings(&self) -> OperatorSettings {
        OperatorSettings {
            node_labels: self.operator.node_labels.clone(),
            service_account: self
                .operator
                .service_account
                .clone()
                .filter(|account| !account.is_empty()),
            polling_timeout: Duration::from_secs(self.tests.polling_timeout_secs),
        }
    }
}
