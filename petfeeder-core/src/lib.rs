//! Pet Feeder Core Library
//!
//! Keeps local collections of devices, pets, schedules, feeding history and
//! notification preferences in step with a hosted backend, and runs user
//! commands against it.

pub mod alerts;
pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod models;
pub mod page;
pub mod realtime;
pub mod resource;
pub mod store;
pub mod views;

#[cfg(test)]
mod testing;

pub use alerts::{Alert, AlertEngine, NotificationSink};
pub use backend::{
    AuthEvent, AuthService, Backend, BackendSettings, DataService, Filter, ObjectStorage, Query,
    Session, User,
};
pub use dispatcher::{CommandDispatcher, PetDraft, ProfileDraft, ScheduleDraft};
pub use error::{ServiceError, SyncError};
pub use feed::{ChangeFeed, FeedStatus};
pub use models::{
    ActivityLevel, Device, DeviceStatus, FeedingHistory, HealthData, NotificationPreferences, Pet,
    PreferenceField, Schedule,
};
pub use page::{PageScope, ResourcePage};
pub use realtime::{RealtimeClient, ReconnectPolicy};
pub use resource::{Resource, WritePolicy};
pub use store::{Applied, AppliedChange, ChangeEvent, StoreHandle};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
