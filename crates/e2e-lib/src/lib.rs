//! Acceptance test library for managed clusters
//!
//! This crate provides the core functionality for:
//! - Bounded polling against eventually-consistent cluster state
//! - The operator verification and proxy propagation scenarios
//! - Kubernetes-backed cluster collaborators
//! - Metric exposition parsing
//! - Health reports and observability

pub mod catalog;
pub mod cluster;
pub mod error;
pub mod health;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod poll;
pub mod scenarios;

pub use catalog::ScenarioDescriptor;
pub use error::{ClusterError, ScenarioError};
pub use health::{CheckResult, CheckStatus, HealthReport};
pub use models::*;
pub use observability::{ScenarioLogger, SuiteMetrics};
pub use poll::{poll, PollError, PollOutcome, PollSpec, Start};
pub use scenarios::{execute, OperatorVerification, ProxyPropagation, Scenario};
