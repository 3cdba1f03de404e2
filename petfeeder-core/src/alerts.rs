//! Alerts raised from feed events, gated by the user's notification
//! preferences.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::models::{Device, FeedingHistory, NotificationPreferences, Schedule, LOW_FOOD_THRESHOLD};

/// How far ahead a schedule triggers a reminder.
pub const REMINDER_LEAD_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    LowFood {
        device_id: String,
        device_name: String,
        food_level: u8,
    },
    FeedingComplete {
        device_id: String,
        device_name: String,
        amount: u32,
    },
    ScheduleReminder {
        schedule_id: String,
        device_name: String,
        amount: u32,
    },
}

impl Alert {
    pub fn title(&self) -> &'static str {
        match self {
            Alert::LowFood { .. } => "Food Level Low",
            Alert::FeedingComplete { .. } => "Feeding Complete",
            Alert::ScheduleReminder { .. } => "Upcoming Feeding",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Alert::LowFood { device_name, .. } => format!(
                "Food level for {} is below {}%! Please refill soon.",
                device_name, LOW_FOOD_THRESHOLD
            ),
            Alert::FeedingComplete {
                device_name,
                amount,
                ..
            } => format!("{} dispensed {}g of food.", device_name, amount),
            Alert::ScheduleReminder {
                device_name,
                amount,
                ..
            } => format!(
                "{} will dispense {}g of food in about {} minutes.",
                device_name, amount, REMINDER_LEAD_MINUTES
            ),
        }
    }
}

/// Where alerts are delivered.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Turns device, history and schedule changes into alerts.
///
/// Each alert kind needs both `push_notifications` and its own flag. Without
/// a preferences row nothing is raised.
#[derive(Debug, Default)]
pub struct AlertEngine {
    preferences: Option<NotificationPreferences>,
    low_food: HashSet<String>,
    reminded: HashSet<String>,
}

impl AlertEngine {
    pub fn new(preferences: Option<NotificationPreferences>) -> Self {
        Self {
            preferences,
            ..Self::default()
        }
    }

    pub fn set_preferences(&mut self, preferences: Option<NotificationPreferences>) {
        self.preferences = preferences;
    }

    fn allows(&self, flag: impl Fn(&NotificationPreferences) -> bool) -> bool {
        self.preferences
            .as_ref()
            .is_some_and(|p| p.push_notifications && flag(p))
    }

    /// Low food alert, raised once until the level recovers.
    pub fn on_device(&mut self, device: &Device) -> Option<Alert> {
        if !device.last_status.is_low_on_food() {
            self.low_food.remove(&device.device_id);
            return None;
        }
        if !self.low_food.insert(device.device_id.clone()) {
            return None;
        }
        if !self.allows(|p| p.low_food_alert) {
            return None;
        }
        Some(Alert::LowFood {
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            food_level: device.last_status.food_level,
        })
    }

    /// Feeding complete alert for a new history row from a known device.
    pub fn on_feeding(&self, entry: &FeedingHistory, devices: &[Device]) -> Option<Alert> {
        let device = devices.iter().find(|d| d.device_id == entry.device_id)?;
        if !self.allows(|p| p.feeding_complete_alert) {
            return None;
        }
        Some(Alert::FeedingComplete {
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            amount: entry.amount,
        })
    }

    /// Reminders for schedules due in `[now, now + 5 min)`, once per schedule.
    pub fn due_reminders(
        &mut self,
        schedules: &[Schedule],
        devices: &[Device],
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        if !self.allows(|p| p.schedule_reminder) {
            return Vec::new();
        }
        let until = now + Duration::minutes(REMINDER_LEAD_MINUTES);
        let mut alerts = Vec::new();
        for schedule in schedules {
            if schedule.time < now || schedule.time >= until {
                continue;
            }
            if !self.reminded.insert(schedule.schedule_id.clone()) {
                continue;
            }
            let device_name = devices
                .iter()
                .find(|d| d.device_id == schedule.device_id)
                .map_or_else(|| schedule.device_id.clone(), |d| d.device_name.clone());
            alerts.push(Alert::ScheduleReminder {
                schedule_id: schedule.schedule_id.clone(),
                device_name,
                amount: schedule.amount,
            });
        }
        alerts
    }
}
