use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource::{Resource, SortOrder, WritePolicy};

/// A one-off feeding at an absolute time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: String,
    pub device_id: String,
    pub user_id: String,
    pub time: DateTime<Utc>,
    pub amount: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.time > now
    }
}

impl Resource for Schedule {
    const TABLE: &'static str = "schedules";
    const ID_COLUMN: &'static str = "schedule_id";
    const ORDER: SortOrder = SortOrder::asc("time");
    const POLICY: WritePolicy = WritePolicy::Optimistic;

    fn id(&self) -> &str {
        &self.schedule_id
    }

    fn order(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.time.cmp(&b.time)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}g on {}",
            self.time.format("%Y-%m-%d %H:%M"),
            self.amount,
            self.device_id
        )
    }
}
