//! # Unit Status
//!
//! The observable state of one reconciliation attempt

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status reported to the host platform after every handled event.
///
/// Only the latest value matters; nothing is persisted between events.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Waiting(String),
    Blocked(String),
    Maintenance(String),
}

/// Severity of a status, without its message
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Active,
    Waiting,
    Blocked,
    Maintenance,
}

impl StatusKind {
    /// Attach a message. `Active` carries none, so the message is dropped.
    pub fn with_message(self, message: impl Into<String>) -> UnitStatus {
        match self {
            StatusKind::Active => UnitStatus::Active,
            StatusKind::Waiting => UnitStatus::Waiting(message.into()),
            StatusKind::Blocked => UnitStatus::Blocked(message.into()),
            StatusKind::Maintenance => UnitStatus::Maintenance(message.into()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Active => "active",
            StatusKind::Waiting => "waiting",
            StatusKind::Blocked => "blocked",
            StatusKind::Maintenance => "maintenance",
        }
    }
}

impl UnitStatus {
    pub fn waiting(message: impl Into<String>) -> Self {
        UnitStatus::Waiting(message.into())
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        UnitStatus::Blocked(message.into())
    }

    pub fn maintenance(message: impl Into<String>) -> Self {
        UnitStatus::Maintenance(message.into())
    }

    pub fn kind(&self) -> StatusKind {
        match self {
            UnitStatus::Active => StatusKind::Active,
            UnitStatus::Waiting(_) => StatusKind::Waiting,
            UnitStatus::Blocked(_) => StatusKind::Blocked,
            UnitStatus::Maintenance(_) => StatusKind::Maintenance,
        }
    }

    /// Status message; empty for `Active`
    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Active => "",
            UnitStatus::Waiting(msg) | UnitStatus::Blocked(msg) | UnitStatus::Maintenance(msg) => {
                msg.as_str()
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, UnitStatus::Active)
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Active => write!(f, "active"),
            other => write!(f, "{}: {}", other.kind(), other.message()),
        }
    }
}
