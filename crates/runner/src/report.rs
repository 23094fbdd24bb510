//! Run report in the Prometheus text format

use anyhow::{Context, Result};
use prometheus::{Encoder, TextEncoder};
use std::path::Path;

/// Encode every registered metric
pub fn render() -> Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    Ok(buffer)
}

pub fn write(path: &Path) -> Result<()> {
    let buffer = render()?;
    std::fs::write(path, buffer)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2e_lib::SuiteMetrics;
    use std::time::Duration;

    #[test]
    fn test_report_contains_suite_metrics() {
        SuiteMetrics::new().record_scenario("report-test", true, Duration::from_secs(3));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");
        write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("cluster_e2e_scenario_passed{scenario=\"report-test\"} 1"));
        assert!(text.contains("cluster_e2e_scenario_duration_seconds{scenario=\"report-test\"} 3"));
    }
}
