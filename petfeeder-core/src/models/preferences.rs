use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::resource::{Resource, SortOrder, WritePolicy};

/// One row per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: String,
    #[serde(default)]
    pub email_notifications: bool,
    #[serde(default)]
    pub push_notifications: bool,
    #[serde(default)]
    pub low_food_alert: bool,
    #[serde(default)]
    pub feeding_complete_alert: bool,
    #[serde(default)]
    pub schedule_reminder: bool,
}

impl NotificationPreferences {
    /// All alerts on, used when a user has no preference row yet.
    pub fn all_enabled(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email_notifications: true,
            push_notifications: true,
            low_food_alert: true,
            feeding_complete_alert: true,
            schedule_reminder: true,
        }
    }

    pub fn get(&self, field: PreferenceField) -> bool {
        match field {
            PreferenceField::EmailNotifications => self.email_notifications,
            PreferenceField::PushNotifications => self.push_notifications,
            PreferenceField::LowFoodAlert => self.low_food_alert,
            PreferenceField::FeedingCompleteAlert => self.feeding_complete_alert,
            PreferenceField::ScheduleReminder => self.schedule_reminder,
        }
    }

    pub fn set(&mut self, field: PreferenceField, value: bool) {
        match field {
            PreferenceField::EmailNotifications => self.email_notifications = value,
            PreferenceField::PushNotifications => self.push_notifications = value,
            PreferenceField::LowFoodAlert => self.low_food_alert = value,
            PreferenceField::FeedingCompleteAlert => self.feeding_complete_alert = value,
            PreferenceField::ScheduleReminder => self.schedule_reminder = value,
        }
    }
}

impl Resource for NotificationPreferences {
    const TABLE: &'static str = "notification_preferences";
    const ID_COLUMN: &'static str = "user_id";
    const ORDER: SortOrder = SortOrder::asc("user_id");
    const POLICY: WritePolicy = WritePolicy::Optimistic;

    fn id(&self) -> &str {
        &self.user_id
    }

    fn order(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.user_id.cmp(&b.user_id)
    }
}

/// A single toggle, patched on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceField {
    EmailNotifications,
    PushNotifications,
    LowFoodAlert,
    FeedingCompleteAlert,
    ScheduleReminder,
}

impl PreferenceField {
    pub const ALL: [PreferenceField; 5] = [
        PreferenceField::EmailNotifications,
        PreferenceField::PushNotifications,
        PreferenceField::LowFoodAlert,
        PreferenceField::FeedingCompleteAlert,
        PreferenceField::ScheduleReminder,
    ];

    /// Column name in the preferences table.
    pub fn column(&self) -> &'static str {
        match self {
            PreferenceField::EmailNotifications => "email_notifications",
            PreferenceField::PushNotifications => "push_notifications",
            PreferenceField::LowFoodAlert => "low_food_alert",
            PreferenceField::FeedingCompleteAlert => "feeding_complete_alert",
            PreferenceField::ScheduleReminder => "schedule_reminder",
        }
    }
}

impl fmt::Display for PreferenceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for PreferenceField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        PreferenceField::ALL
            .into_iter()
            .find(|field| field.column() == normalized)
            .ok_or_else(|| {
                format!(
                    "Invalid preference '{}'. Valid options: {}",
                    s,
                    PreferenceField::ALL.map(|f| f.column()).join(", ")
                )
            })
    }
}
