use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Action, PowerState, SystemId, TestStatus, UserId};

/// One machine as the region store publishes it to listing clients. The
/// listing core never mutates these fields; its own row flags live beside
/// the record, keyed by `system_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub system_id: SystemId,
    pub fqdn: String,
    pub architecture: String,
    pub status: String,
    pub status_code: i64,
    pub testing_status: TestStatus,
    pub other_test_status: TestStatus,
    pub power_state: PowerState,
    pub osystem: String,
    pub distro_series: String,
    pub cpu_count: u32,
    /// Memory in GiB.
    pub memory: f64,
    /// Total storage in GB.
    pub storage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub zone: String,
    pub pool: String,
    /// Actions the current operator may invoke on this machine.
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OsInfo {
    pub releases: Vec<OsRelease>,
}

/// Ordered `(key, title)` pair; release lookup is a linear scan and the
/// first matching key wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsRelease {
    pub key: String,
    pub title: String,
}

impl OsRelease {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
        }
    }
}

/// Entry of the `machine_actions` catalogue served by the general data
/// store, used to resolve menu titles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub category: NotificationCategory,
    pub user: UserId,
    pub created_at: DateTime<Utc>,
}
