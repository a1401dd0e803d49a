//! # Operator Errors
//!
//! Expected check failures map onto a [`UnitStatus`]; host failures propagate.

use crate::status::{StatusKind, UnitStatus};
use std::path::PathBuf;

/// A reconciliation check that did not pass.
///
/// Carries the status the unit should report instead of publishing a pod spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CheckFailed {
    pub kind: StatusKind,
    pub message: String,
}

impl CheckFailed {
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn waiting(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Waiting, message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Blocked, message)
    }

    pub fn status(&self) -> UnitStatus {
        self.kind.with_message(self.message.clone())
    }
}

impl From<InterfaceError> for CheckFailed {
    fn from(err: InterfaceError) -> Self {
        CheckFailed::new(err.status_kind(), err.to_string())
    }
}

impl From<ImageResourceError> for CheckFailed {
    fn from(err: ImageResourceError) -> Self {
        CheckFailed::new(err.status_kind(), err.to_string())
    }
}

/// Image resource errors. Each variant declares its own severity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageResourceError {
    #[error("Missing resource: {resource}")]
    Missing { resource: String },

    #[error("Invalid resource: {resource}")]
    Invalid { resource: String, reason: String },

    #[error("Waiting for resource: {resource}")]
    Pending { resource: String },
}

impl ImageResourceError {
    pub fn status_kind(&self) -> StatusKind {
        match self {
            ImageResourceError::Missing { .. } | ImageResourceError::Invalid { .. } => StatusKind::Blocked,
            ImageResourceError::Pending { .. } => StatusKind::Waiting,
        }
    }

    /// Status the unit reports for this error, message passed through verbatim
    pub fn status(&self) -> UnitStatus {
        self.status_kind().with_message(self.to_string())
    }
}

/// Relation interface negotiation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterfaceError {
    #[error("List of {relation} versions not found for apps: {}", .apps.join(", "))]
    NoVersionsListed { relation: String, apps: Vec<String> },

    #[error("No compatible {relation} versions found for apps: {}", .apps.join(", "))]
    NoCompatibleVersions { relation: String, apps: Vec<String> },
}

impl InterfaceError {
    /// Unlisted versions can still arrive; incompatible ones need an operator.
    pub fn status_kind(&self) -> StatusKind {
        match self {
            InterfaceError::NoVersionsListed { .. } => StatusKind::Waiting,
            InterfaceError::NoCompatibleVersions { .. } => StatusKind::Blocked,
        }
    }
}

/// Charm configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(i64),
}

/// Failures of the host platform itself
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to set status: {0}")]
    Status(String),

    #[error("failed to write relation {relation_id} data: {reason}")]
    RelationData { relation_id: usize, reason: String },

    #[error("unknown relation: {0}")]
    UnknownRelation(usize),

    #[error("pod spec rejected: {0}")]
    PodSpec(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
