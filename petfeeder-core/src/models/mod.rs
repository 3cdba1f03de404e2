mod device;
mod feeding;
mod pet;
mod preferences;
mod schedule;

pub use device::{Device, DeviceStatus, FeederCommand, LOW_FOOD_THRESHOLD};
pub use feeding::FeedingHistory;
pub use pet::{ActivityLevel, HealthData, Pet};
pub use preferences::{NotificationPreferences, PreferenceField};
pub use schedule::Schedule;
