//! Metrics scraped from operators under test
//!
//! A [`MetricSample`] is the body returned by one scrape. Bodies that carry
//! a 503 status mean the backend behind the service is not ready yet.

pub mod exposition;
pub mod findings;

pub use exposition::{parse, parse_line, ParseError, Sample};
pub use findings::{missing_findings, FindingPattern, FINDING_PATTERNS};

/// Marker of a proxied request whose backend answered 503
const UNAVAILABLE_MARKER: &str = "\"code\":503";

/// Body of one metrics scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricSample {
    /// The backend is not ready; never counts as a match
    Unavailable,
    /// Raw exposition text
    Text(String),
}

impl MetricSample {
    pub fn from_body(body: impl Into<String>) -> Self {
        let body = body.into();
        if body.contains(UNAVAILABLE_MARKER) {
            MetricSample::Unavailable
        } else {
            MetricSample::Text(body)
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, MetricSample::Text(_))
    }
}
