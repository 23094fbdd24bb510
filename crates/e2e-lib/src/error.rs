//! Error types shared by the cluster collaborators and the scenarios

use std::time::Duration;
use thiserror::Error;

use crate::poll::PollError;

/// Errors raised by the cluster collaborators
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The API server answered 404 for the requested object
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    /// Any other API failure, surfaced verbatim
    #[error("{kind} {name:?}: {source}")]
    Api {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// The request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    /// The object came back in a shape we could not read
    #[error("unexpected {kind} payload: {message}")]
    Unexpected { kind: &'static str, message: String },
}

impl ClusterError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Map a kube error, keeping 404 distinguishable from everything else
    pub fn from_kube(kind: &'static str, name: impl Into<String>, source: kube::Error) -> Self {
        match source {
            kube::Error::Api(ref response) if response.code == 404 => Self::not_found(kind, name),
            source => Self::Api {
                kind,
                name: name.into(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Terminal failure of a scenario
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// A create or delete call failed; aborts the scenario immediately
    #[error("failed trying to {action}: {source}")]
    Setup {
        action: String,
        #[source]
        source: ClusterError,
    },

    /// A condition was still unmet when its deadline passed
    #[error("timed out after {timeout:?} waiting for {condition}{}", describe_unmet(.unmet))]
    TimedOut {
        condition: String,
        timeout: Duration,
        unmet: Vec<String>,
    },

    /// The predicate reported an unrecoverable error
    #[error("{condition} failed: {source}")]
    PollFailed {
        condition: String,
        #[source]
        source: ClusterError,
    },

    #[error(transparent)]
    InvalidPoll(#[from] PollError),
}

impl ScenarioError {
    pub fn setup(action: impl Into<String>, source: ClusterError) -> Self {
        Self::Setup {
            action: action.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

fn describe_unmet(unmet: &[String]) -> String {
    if unmet.is_empty() {
        String::new()
    } else {
        format!(" (still unmet: {})", unmet.join(", "))
    }
}
