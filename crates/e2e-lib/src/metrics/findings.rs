//! Deployment validation findings emitted as metrics
//!
//! The validation operator reports one metric family per check, with one
//! sample per offending workload. The workload name is carried in the
//! `name` label. A workload matches when that label *contains* its name;
//! containment rather than equality is the matching policy, so the label of
//! a derived object (a replica set named after the deployment) also counts.

use super::exposition::{self, Sample};
use super::MetricSample;

/// Metric family prefix of every validation check
pub const METRIC_PREFIX: &str = "deployment_validation_operator_";

/// Label that carries the workload name
pub const NAME_LABEL: &str = "name";

/// One class of workload finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindingPattern {
    check: &'static str,
}

impl FindingPattern {
    pub const fn new(check: &'static str) -> Self {
        Self { check }
    }

    pub fn check(&self) -> &'static str {
        self.check
    }

    pub fn metric_name(&self) -> String {
        format!("{METRIC_PREFIX}{}", self.check)
    }

    fn is_family(&self, sample: &Sample) -> bool {
        sample
            .name
            .get(..METRIC_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(METRIC_PREFIX))
            && sample.name[METRIC_PREFIX.len()..].eq_ignore_ascii_case(self.check)
    }

    /// True when some sample of this family names the workload
    pub fn matches(&self, samples: &[Sample], workload: &str) -> bool {
        samples
            .iter()
            .filter(|sample| self.is_family(sample))
            .filter_map(|sample| sample.label(NAME_LABEL))
            .any(|name| name.contains(workload))
    }
}

/// The checks a fresh, unconfigured deployment is expected to fail
pub const FINDING_PATTERNS: [FindingPattern; 9] = [
    FindingPattern::new("minimum_three_replicas"),
    FindingPattern::new("no_liveness_probe"),
    FindingPattern::new("no_readiness_probe"),
    FindingPattern::new("no_read_only_root_fs"),
    FindingPattern::new("required_annotation_email"),
    FindingPattern::new("required_label_owner"),
    FindingPattern::new("run_as_non_root"),
    FindingPattern::new("unset_cpu_requirements"),
    FindingPattern::new("unset_memory_requirements"),
];

/// Checks from [`FINDING_PATTERNS`] that the sample does not report for
/// the workload. An unavailable sample is missing everything.
pub fn missing_findings(sample: &MetricSample, workload: &str) -> Vec<&'static str> {
    let samples = match sample {
        MetricSample::Unavailable => Vec::new(),
        MetricSample::Text(body) => exposition::parse(body),
    };

    FINDING_PATTERNS
        .iter()
        .filter(|pattern| !pattern.matches(&samples, workload))
        .map(FindingPattern::check)
        .collect()
}
