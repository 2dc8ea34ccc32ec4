use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;

pub type ServiceId = String;

/// Classified state of one managed service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
    /// No poll has completed yet
    Checking,
    /// The runtime reported a state outside the running/stopped vocabulary
    Error,
}

impl ServiceStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceStatus::Running => "Running",
            ServiceStatus::Stopped => "Stopped",
            ServiceStatus::Checking => "Checking...",
            ServiceStatus::Error => "Error",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            ServiceStatus::Running => "●",
            ServiceStatus::Stopped => "○",
            ServiceStatus::Checking => "◌",
            ServiceStatus::Error => "✗",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}

/// One controllable unit of the local stack
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManagedService {
    pub id: ServiceId,
    pub display_name: String,
    /// Container name used to correlate runtime records
    pub runtime_ref: String,
    /// Informational only
    pub port: Option<String>,
}

/// Result of one poll cycle, published as a whole.
///
/// `statuses` always holds exactly one entry per registered service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub statuses: BTreeMap<ServiceId, ServiceStatus>,
    pub any_running: bool,
    /// False when the runtime query could not be run or exited non-zero
    pub runtime_online: bool,
    /// `None` until the first poll completes
    pub polled_at: Option<DateTime<Local>>,
}

impl StatusSnapshot {
    /// Snapshot shown before the first poll
    pub fn checking<'a>(ids: impl IntoIterator<Item = &'a ServiceId>) -> Self {
        Self {
            statuses: ids
                .into_iter()
                .map(|id| (id.clone(), ServiceStatus::Checking))
                .collect(),
            any_running: false,
            runtime_online: false,
            polled_at: None,
        }
    }

    pub fn from_statuses(
        statuses: BTreeMap<ServiceId, ServiceStatus>,
        runtime_online: bool,
    ) -> Self {
        let any_running = statuses.values().any(ServiceStatus::is_running);
        Self {
            statuses,
            any_running,
            runtime_online,
            polled_at: Some(Local::now()),
        }
    }

    pub fn status(&self, id: &str) -> Option<ServiceStatus> {
        self.statuses.get(id).copied()
    }

    pub fn running_count(&self) -> usize {
        self.statuses.values().filter(|s| s.is_running()).count()
    }

    /// True when both snapshots classify every service the same way
    pub fn same_statuses(&self, other: &StatusSnapshot) -> bool {
        self.statuses == other.statuses && self.runtime_online == other.runtime_online
    }
}
