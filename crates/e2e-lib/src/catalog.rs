//! Scenarios known to the suite

use std::time::Duration;

use crate::scenarios::proxy::{HEALTH_TIMEOUT, PROPAGATION_TIMEOUT};

pub const OPERATOR_DVO: &str = "operator-dvo";
pub const PROXY_POST_INSTALL: &str = "proxy-post-install";

/// Static description of one scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioDescriptor {
    pub id: &'static str,
    pub suite: &'static str,
    pub name: &'static str,
    /// Longest time the scenario can take before its own deadlines fire
    pub timeout: Duration,
}

impl ScenarioDescriptor {
    /// Display title, e.g. `[Suite: proxy] Post-Install Cluster Proxy`
    pub fn title(&self) -> String {
        format!("[Suite: {}] {}", self.suite, self.name)
    }
}

static DESCRIPTORS: [ScenarioDescriptor; 2] = [
    ScenarioDescriptor {
        id: OPERATOR_DVO,
        suite: "informing",
        name: "[OSD] Deployment Validation Operator (dvo)",
        timeout: Duration::from_secs(30 * 60),
    },
    ScenarioDescriptor {
        id: PROXY_POST_INSTALL,
        suite: "proxy",
        name: "Post-Install Cluster Proxy",
        timeout: Duration::from_secs(PROPAGATION_TIMEOUT.as_secs() + HEALTH_TIMEOUT.as_secs()),
    },
];

pub fn all() -> &'static [ScenarioDescriptor] {
    &DESCRIPTORS
}

pub fn find(id: &str) -> Option<&'static ScenarioDescriptor> {
    DESCRIPTORS.iter().find(|descriptor| descriptor.id == id)
}
