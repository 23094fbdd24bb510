//! Cluster acceptance suite runner
//!
//! Runs the selected scenarios once against the cluster in the current
//! kubeconfig context and exits non-zero if any of them fails.

mod config;
mod report;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use e2e_lib::catalog::{self, ScenarioDescriptor};
use e2e_lib::cluster::KubeCluster;
use e2e_lib::scenarios::{execute, OperatorVerification, ProxyPropagation, Scenario};
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::SuiteConfig;

/// Cluster acceptance suite
#[derive(Parser)]
#[command(name = "cluster-e2e")]
#[command(author, version, about = "Acceptance tests for managed clusters", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "CLUSTER_E2E_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    pub log_format: LogFormat,

    /// Write run metrics in the Prometheus text format to this file
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available scenarios
    List,

    /// Run the given scenarios
    Run {
        /// Scenario ids (see `list`)
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Run every scenario
    RunAll,
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .init(),
    }
}

fn list() {
    for descriptor in catalog::all() {
        println!(
            "{:<20} {:>4}m  {}",
            descriptor.id,
            descriptor.timeout.as_secs() / 60,
            descriptor.title()
        );
    }
}

/// Resolve ids before touching the cluster
fn select(ids: &[String]) -> Result<Vec<&'static ScenarioDescriptor>> {
    let mut selected = Vec::new();
    for id in ids {
        let Some(descriptor) = catalog::find(id) else {
            bail!("unknown scenario {id:?}; run `cluster-e2e list` to see available scenarios");
        };
        if !selected.contains(&descriptor) {
            selected.push(descriptor);
        }
    }
    Ok(selected)
}

async fn client(config: &SuiteConfig) -> Result<kube::Client> {
    let kube_config = match &config.kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("Failed to load kubeconfig")?
        }
        None => kube::Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };
    kube::Client::try_from(kube_config).context("Failed to create Kubernetes client")
}

fn build(
    descriptor: &ScenarioDescriptor,
    config: &SuiteConfig,
    cluster: &Arc<KubeCluster>,
) -> Result<Box<dyn Scenario>> {
    let scenario: Box<dyn Scenario> = match descriptor.id {
        catalog::OPERATOR_DVO => Box::new(OperatorVerification::new(
            cluster.clone(),
            cluster.clone(),
            config.operator_settings(),
        )),
        catalog::PROXY_POST_INSTALL => Box::new(ProxyPropagation::new(
            config.cluster_id.clone(),
            config.desired_proxy(),
            cluster.clone(),
            cluster.clone(),
            cluster.clone(),
        )),
        other => bail!("scenario {other:?} has no runner"),
    };
    Ok(scenario)
}

/// Run the selected scenarios concurrently; true when all of them pass
async fn run(cli: &Cli, descriptors: Vec<&'static ScenarioDescriptor>) -> Result<bool> {
    let config = SuiteConfig::load(cli.config.as_deref())?;
    let cluster = Arc::new(KubeCluster::new(client(&config).await?));
    info!(
        cluster_id = %config.cluster_id,
        scenarios = descriptors.len(),
        "Starting suite"
    );

    let mut tasks = JoinSet::new();
    for descriptor in descriptors {
        let mut scenario = build(descriptor, &config, &cluster)?;
        tasks.spawn(async move {
            let result = execute(scenario.as_mut()).await;
            (descriptor, result)
        });
    }

    let mut passed = true;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((descriptor, Ok(()))) => {
                println!("PASS {}", descriptor.title());
            }
            Ok((descriptor, Err(err))) => {
                passed = false;
                println!("FAIL {}: {err}", descriptor.title());
            }
            Err(err) => {
                passed = false;
                error!(error = %err, "Scenario task aborted");
            }
        }
    }

    Ok(passed)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let ids = match &cli.command {
        Commands::List => {
            list();
            return ExitCode::SUCCESS;
        }
        Commands::Run { ids } => ids.clone(),
        Commands::RunAll => catalog::all().iter().map(|d| d.id.to_string()).collect(),
    };

    let result = match select(&ids) {
        Ok(descriptors) => run(&cli, descriptors).await,
        Err(err) => Err(err),
    };

    if let Some(path) = &cli.metrics_file {
        if let Err(err) = report::write(path) {
            error!(error = %format!("{err:#}"), "Failed to write run report");
        }
    }

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %format!("{err:#}"), "Suite aborted");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
