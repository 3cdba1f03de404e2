use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource::{Resource, SortOrder, WritePolicy};

/// Food level (percent) under which a device counts as running low.
pub const LOW_FOOD_THRESHOLD: u8 = 20;

/// How recent `last_update` must be for the device to count as online.
const ONLINE_WINDOW_MINUTES: i64 = 5;

/// Command the client asks the feeder to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeederCommand {
    Dispense,
    /// Anything written by another client that this one doesn't know about
    #[serde(other)]
    Unknown,
}

impl fmt::Display for FeederCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeederCommand::Dispense => write!(f, "dispense"),
            FeederCommand::Unknown => write!(f, "unknown"),
        }
    }
}

/// Status block reported by the feeder. Always replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(default)]
    pub food_level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi_strength: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<FeederCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_amount: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeviceStatus {
    /// Copy of this status carrying a pending dispense command.
    pub fn with_dispense(&self, amount: u32) -> Self {
        Self {
            command: Some(FeederCommand::Dispense),
            command_amount: Some(amount),
            ..self.clone()
        }
    }

    pub fn is_low_on_food(&self) -> bool {
        self.food_level < LOW_FOOD_THRESHOLD
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub user_id: String,
    pub device_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_status: DeviceStatus,
}

impl Device {
    pub fn new(
        device_id: impl Into<String>,
        user_id: impl Into<String>,
        device_name: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            device_name: device_name.into(),
            created_at: Utc::now(),
            last_status: DeviceStatus::default(),
        }
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.last_status = status;
        self
    }

    /// A device is online when it reported within the last few minutes.
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        match self.last_status.last_update {
            Some(at) => now - at <= Duration::minutes(ONLINE_WINDOW_MINUTES),
            None => false,
        }
    }
}

impl Resource for Device {
    const TABLE: &'static str = "devices";
    const ID_COLUMN: &'static str = "device_id";
    const ORDER: SortOrder = SortOrder::desc("created_at");
    const POLICY: WritePolicy = WritePolicy::Optimistic;

    fn id(&self) -> &str {
        &self.device_id
    }

    fn order(a: &Self, b: &Self) -> std::cmp::Ordering {
        b.created_at.cmp(&a.created_at)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) - food {}%",
            self.device_name, self.device_id, self.last_status.food_level
        )?;
        if let (Some(cmd), Some(amount)) =
            (self.last_status.command, self.last_status.command_amount)
        {
            write!(f, ", pending {} {}g", cmd, amount)?;
        }
        Ok(())
    }
}
