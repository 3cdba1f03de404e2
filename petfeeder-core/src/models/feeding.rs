use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::resource::{Resource, SortOrder, WritePolicy};

/// One dispensed portion. Never edited by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingHistory {
    pub feed_id: String,
    pub device_id: String,
    pub time: DateTime<Utc>,
    pub amount: u32,
    #[serde(default)]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
}

impl FeedingHistory {
    /// A manual feeding recorded now, with a client-generated identity so the
    /// change feed echo matches the local row.
    pub fn manual(device_id: impl Into<String>, amount: u32) -> Self {
        Self {
            feed_id: Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            time: Utc::now(),
            amount,
            manual: true,
            schedule_id: None,
        }
    }
}

impl Resource for FeedingHistory {
    const TABLE: &'static str = "feeding_history";
    const ID_COLUMN: &'static str = "feed_id";
    const ORDER: SortOrder = SortOrder::desc("time");
    const POLICY: WritePolicy = WritePolicy::Optimistic;

    fn id(&self) -> &str {
        &self.feed_id
    }

    fn order(a: &Self, b: &Self) -> std::cmp::Ordering {
        b.time.cmp(&a.time)
    }
}

impl fmt::Display for FeedingHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}g ({})",
            self.time.format("%Y-%m-%d %H:%M"),
            self.amount,
            if self.manual { "manual" } else { "scheduled" }
        )
    }
}
