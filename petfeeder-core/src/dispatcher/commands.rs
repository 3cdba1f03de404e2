use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{
    to_row, validate_dispense_amount, validate_id, validate_name, CommandDispatcher,
};
use crate::backend::{
    avatar_path, file_extension, image_content_type, Filter, Query, AVATAR_BUCKET,
};
use crate::error::SyncError;
use crate::models::{
    Device, DeviceStatus, FeedingHistory, HealthData, NotificationPreferences, Pet, PreferenceField, Schedule,
};
use crate::resource::{Resource, WritePolicy};
use crate::store::{ChangeEvent, StoreHandle};

const PROFILES_TABLE: &str = "profiles";

/// Name given to a feeder registered without one.
pub const DEFAULT_DEVICE_NAME: &str = "Pet Feeder";

/// Shortest password the auth service accepts.
pub const MIN_PASSWORD_CHARS: usize = 6;

/// A pet to create (`pet_id` is `None`) or update.
#[derive(Debug, Clone, PartialEq)]
pub struct PetDraft {
    pub pet_id: Option<String>,
    pub name: String,
    pub health_data: HealthData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDraft {
    pub device_id: String,
    pub time: DateTime<Utc>,
    pub amount: u32,
}

/// New values for the signed-in user's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDraft {
    pub username: String,
    pub full_name: String,
}

fn id_filter<R: Resource>(id: &str) -> Vec<Filter> {
    vec![Filter::eq(R::ID_COLUMN, id)]
}

/// Local side of a write. Echo-only resources wait for the feed.
fn local_apply<R: Resource>(store: &StoreHandle<R>, event: ChangeEvent<R>) {
    if R::POLICY == WritePolicy::Optimistic {
        store.apply(event);
    }
}

fn local_retract<R: Resource>(store: &StoreHandle<R>, id: &str) {
    if R::POLICY == WritePolicy::Optimistic {
        store.retract(id);
    }
}

/// Undo a local write, unless the feed has changed the row since. `written`
/// is what the write left behind (`None` for a delete).
fn local_rollback<R: Resource + PartialEq>(
    store: &StoreHandle<R>,
    id: &str,
    written: Option<&R>,
    restore: ChangeEvent<R>,
) {
    if R::POLICY == WritePolicy::Optimistic
        && store.apply_if_unchanged(id, written, restore).is_none()
    {
        tracing::debug!(table = R::TABLE, id, "Row changed during write, keeping newer state");
    }
}

impl CommandDispatcher {
    /// Dispense `amount` grams now.
    ///
    /// Two writes: the device's status gets a dispense command, then a manual
    /// feeding is logged. If the second write fails the first is kept and
    /// [`SyncError::PartialDispense`] is returned.
    pub async fn dispense(
        &self,
        devices: &StoreHandle<Device>,
        history: Option<&StoreHandle<FeedingHistory>>,
        device_id: &str,
        amount: u32,
    ) -> Result<FeedingHistory, SyncError> {
        validate_id("device", device_id)?;
        validate_dispense_amount(amount)?;
        let previous = devices
            .get(device_id)
            .ok_or_else(|| SyncError::validation("device", format!("unknown device {}", device_id)))?;
        let _pending = self.begin("dispense", device_id)?;
        let user = self.user().await?;

        let status = previous.last_status.with_dispense(amount);
        let patch = json!({ "last_status": to_row(&status)? });
        let filters = vec![
            Filter::eq(Device::ID_COLUMN, device_id),
            Filter::eq("user_id", &user.id),
        ];
        let written = previous.clone().with_status(status);
        local_apply(devices, ChangeEvent::Update(written.clone()));

        if let Err(e) = self.backend.data.update(Device::TABLE, &filters, patch).await {
            local_rollback(devices, device_id, Some(&written), ChangeEvent::Update(previous));
            tracing::warn!(device = device_id, "Dispense failed: {}", e.display_message());
            return Err(SyncError::write(e));
        }
        tracing::info!(device = device_id, amount, "Dispense command sent");

        let entry = FeedingHistory::manual(device_id, amount);
        if let Some(history) = history {
            local_apply(history, ChangeEvent::Insert(entry.clone()));
        }
        if let Err(e) = self
            .backend
            .data
            .insert(FeedingHistory::TABLE, to_row(&entry)?)
            .await
        {
            if let Some(history) = history {
                local_retract(history, &entry.feed_id);
            }
            tracing::warn!(device = device_id, "Feeding log failed: {}", e.display_message());
            return Err(SyncError::PartialDispense {
                amount,
                message: e.display_message(),
            });
        }

        Ok(entry)
    }

    /// Register a new feeder on the account. It starts with the defaults a
    /// freshly set up feeder reports until its first status update.
    pub async fn register_device(
        &self,
        devices: Option<&StoreHandle<Device>>,
        name: Option<&str>,
    ) -> Result<Device, SyncError> {
        let name = validate_name("device name", name.unwrap_or(DEFAULT_DEVICE_NAME))?;
        let _pending = self.begin("register_device", &name.to_lowercase())?;
        let user = self.user().await?;

        let device = Device::new(
            format!("pf-{:08x}", rand::random::<u32>()),
            user.id,
            name,
        )
        .with_status(DeviceStatus {
            food_level: 80,
            wifi_strength: Some(75),
            ..DeviceStatus::default()
        });
        if let Some(store) = devices {
            local_apply(store, ChangeEvent::Insert(device.clone()));
        }
        if let Err(e) = self
            .backend
            .data
            .insert(Device::TABLE, to_row(&device)?)
            .await
        {
            if let Some(store) = devices {
                local_retract(store, &device.device_id);
            }
            return Err(SyncError::write(e));
        }
        tracing::info!(device = %device.device_id, "Device registered");
        Ok(device)
    }

    pub async fn rename_device(
        &self,
        devices: &StoreHandle<Device>,
        device_id: &str,
        name: &str,
    ) -> Result<(), SyncError> {
        validate_id("device", device_id)?;
        let name = validate_name("device name", name)?;
        let previous = devices
            .get(device_id)
            .ok_or_else(|| SyncError::validation("device", format!("unknown device {}", device_id)))?;
        let _pending = self.begin("rename_device", device_id)?;
        self.user().await?;

        let mut renamed = previous.clone();
        renamed.device_name = name.clone();
        local_apply(devices, ChangeEvent::Update(renamed.clone()));

        let patch = json!({ "device_name": name });
        if let Err(e) = self
            .backend
            .data
            .update(Device::TABLE, &id_filter::<Device>(device_id), patch)
            .await
        {
            local_rollback(devices, device_id, Some(&renamed), ChangeEvent::Update(previous));
            return Err(SyncError::write(e));
        }
        Ok(())
    }

    pub async fn delete_device(
        &self,
        devices: &StoreHandle<Device>,
        device_id: &str,
    ) -> Result<(), SyncError> {
        validate_id("device", device_id)?;
        let previous = devices
            .get(device_id)
            .ok_or_else(|| SyncError::validation("device", format!("unknown device {}", device_id)))?;
        let _pending = self.begin("delete_device", device_id)?;
        self.user().await?;

        local_apply(devices, ChangeEvent::Delete(device_id.to_string()));
        if let Err(e) = self
            .backend
            .data
            .delete(Device::TABLE, &id_filter::<Device>(device_id))
            .await
        {
            local_rollback(devices, device_id, None, ChangeEvent::Insert(previous));
            return Err(SyncError::write(e));
        }
        tracing::info!(device = device_id, "Device removed");
        Ok(())
    }

    /// Create or update a pet. The store is only updated by the feed echo.
    /// Returns the pet's identity.
    pub async fn save_pet(
        &self,
        pets: &StoreHandle<Pet>,
        draft: PetDraft,
    ) -> Result<String, SyncError> {
        let name = validate_name("pet name", &draft.name)?;
        if !(draft.health_data.weight.is_finite() && draft.health_data.weight > 0.0) {
            return Err(SyncError::validation("weight", "must be greater than 0"));
        }
        if let Some(pet_id) = &draft.pet_id {
            validate_id("pet", pet_id)?;
            if !pets.contains(pet_id) {
                return Err(SyncError::validation("pet", format!("unknown pet {}", pet_id)));
            }
        }

        match draft.pet_id {
            Some(pet_id) => {
                let _pending = self.begin("save_pet", &pet_id)?;
                self.user().await?;
                let patch = json!({
                    "name": name,
                    "health_data": to_row(&draft.health_data)?,
                });
                self.backend
                    .data
                    .update(Pet::TABLE, &id_filter::<Pet>(&pet_id), patch)
                    .await
                    .map_err(SyncError::write)?;
                Ok(pet_id)
            }
            None => {
                let _pending = self.begin("create_pet", &name.to_lowercase())?;
                let user = self.user().await?;
                let pet = Pet {
                    pet_id: Uuid::new_v4().to_string(),
                    user_id: user.id,
                    name,
                    health_data: draft.health_data,
                    created_at: Some(Utc::now()),
                };
                self.backend
                    .data
                    .insert(Pet::TABLE, to_row(&pet)?)
                    .await
                    .map_err(SyncError::write)?;
                Ok(pet.pet_id)
            }
        }
    }

    pub async fn delete_pet(&self, pets: &StoreHandle<Pet>, pet_id: &str) -> Result<(), SyncError> {
        validate_id("pet", pet_id)?;
        if !pets.contains(pet_id) {
            return Err(SyncError::validation("pet", format!("unknown pet {}", pet_id)));
        }
        let _pending = self.begin("delete_pet", pet_id)?;
        self.user().await?;

        self.backend
            .data
            .delete(Pet::TABLE, &id_filter::<Pet>(pet_id))
            .await
            .map_err(SyncError::write)
    }

    pub async fn create_schedule(
        &self,
        schedules: Option<&StoreHandle<Schedule>>,
        draft: ScheduleDraft,
        now: DateTime<Utc>,
    ) -> Result<Schedule, SyncError> {
        validate_id("device", &draft.device_id)?;
        if draft.amount == 0 {
            return Err(SyncError::validation("amount", "must be greater than 0"));
        }
        if draft.time <= now {
            return Err(SyncError::validation("time", "must be in the future"));
        }
        let _pending = self.begin("create_schedule", &draft.device_id)?;
        let user = self.user().await?;

        let schedule = Schedule {
            schedule_id: Uuid::new_v4().to_string(),
            device_id: draft.device_id,
            user_id: user.id,
            time: draft.time,
            amount: draft.amount,
            created_at: Some(now),
        };
        if let Some(store) = schedules {
            local_apply(store, ChangeEvent::Insert(schedule.clone()));
        }
        if let Err(e) = self
            .backend
            .data
            .insert(Schedule::TABLE, to_row(&schedule)?)
            .await
        {
            if let Some(store) = schedules {
                local_retract(store, &schedule.schedule_id);
            }
            return Err(SyncError::write(e));
        }
        tracing::info!(schedule = %schedule.schedule_id, "Schedule created");
        Ok(schedule)
    }

    pub async fn delete_schedule(
        &self,
        schedules: &StoreHandle<Schedule>,
        schedule_id: &str,
    ) -> Result<(), SyncError> {
        validate_id("schedule", schedule_id)?;
        let previous = schedules.get(schedule_id).ok_or_else(|| {
            SyncError::validation("schedule", format!("unknown schedule {}", schedule_id))
        })?;
        let _pending = self.begin("delete_schedule", schedule_id)?;
        self.user().await?;

        local_apply(schedules, ChangeEvent::Delete(schedule_id.to_string()));
        if let Err(e) = self
            .backend
            .data
            .delete(Schedule::TABLE, &id_filter::<Schedule>(schedule_id))
            .await
        {
            local_rollback(schedules, schedule_id, None, ChangeEvent::Insert(previous));
            return Err(SyncError::write(e));
        }
        Ok(())
    }

    /// Flip one notification setting. Creates the preferences row (all
    /// enabled) if the user has none yet.
    pub async fn set_preference(
        &self,
        preferences: &StoreHandle<NotificationPreferences>,
        field: PreferenceField,
        value: bool,
    ) -> Result<NotificationPreferences, SyncError> {
        let _pending = self.begin("set_preference", field.column())?;
        let user = self.user().await?;

        match preferences.get(&user.id) {
            Some(current) => {
                let mut updated = current.clone();
                updated.set(field, value);
                local_apply(preferences, ChangeEvent::Update(updated.clone()));

                let mut patch = Map::new();
                patch.insert(field.column().to_string(), Value::Bool(value));
                if let Err(e) = self
                    .backend
                    .data
                    .update(
                        NotificationPreferences::TABLE,
                        &id_filter::<NotificationPreferences>(&user.id),
                        Value::Object(patch),
                    )
                    .await
                {
                    local_rollback(
                        preferences,
                        &user.id,
                        Some(&updated),
                        ChangeEvent::Update(current),
                    );
                    return Err(SyncError::write(e));
                }
                Ok(updated)
            }
            None => {
                let mut created = NotificationPreferences::all_enabled(&user.id);
                created.set(field, value);
                local_apply(preferences, ChangeEvent::Insert(created.clone()));

                if let Err(e) = self
                    .backend
                    .data
                    .insert(NotificationPreferences::TABLE, to_row(&created)?)
                    .await
                {
                    local_retract(preferences, &user.id);
                    return Err(SyncError::write(e));
                }
                Ok(created)
            }
        }
    }

    /// Change username and full name. Usernames are unique across accounts.
    pub async fn update_profile(&self, draft: ProfileDraft) -> Result<(), SyncError> {
        let username = validate_name("username", &draft.username)?;
        let full_name = draft.full_name.trim().to_string();
        let _pending = self.begin("update_profile", "profile")?;
        let user = self.user().await?;

        let query = Query::table(PROFILES_TABLE).filter(Filter::eq("username", &username));
        let taken = self
            .backend
            .data
            .select(&query)
            .await
            .map_err(SyncError::read)?
            .rows
            .iter()
            .any(|row| row.get("id").and_then(Value::as_str) != Some(user.id.as_str()));
        if taken {
            return Err(SyncError::validation("username", "is already taken"));
        }

        let patch = json!({
            "username": username,
            "full_name": full_name,
            "updated_at": Utc::now(),
        });
        self.backend
            .data
            .update(PROFILES_TABLE, &[Filter::eq("id", &user.id)], patch)
            .await
            .map_err(SyncError::write)?;
        tracing::info!("Profile updated");
        Ok(())
    }

    /// Set a new password for the signed-in account.
    pub async fn change_password(&self, password: &str, confirm: &str) -> Result<(), SyncError> {
        if password != confirm {
            return Err(SyncError::validation("password", "confirmation does not match"));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(SyncError::validation(
                "password",
                format!("must be at least {} characters", MIN_PASSWORD_CHARS),
            ));
        }
        let _pending = self.begin("change_password", "account")?;
        self.user().await?;

        self.backend
            .auth
            .update_password(password)
            .await
            .map_err(SyncError::write)?;
        tracing::info!("Password changed");
        Ok(())
    }

    /// Upload a profile picture and point the profile at it. Returns the
    /// public URL.
    pub async fn set_avatar(&self, file_name: &str, bytes: Vec<u8>) -> Result<String, SyncError> {
        let ext = file_extension(file_name)
            .ok_or_else(|| SyncError::validation("avatar", "file has no extension"))?;
        let content_type = image_content_type(&ext)
            .ok_or_else(|| SyncError::validation("avatar", format!("unsupported image type .{}", ext)))?;
        if bytes.is_empty() {
            return Err(SyncError::validation("avatar", "file is empty"));
        }
        let _pending = self.begin("set_avatar", "profile")?;
        let user = self.user().await?;

        let suffix = format!("{:08x}", rand::random::<u32>());
        let path = avatar_path(&user.id, &suffix, &ext);
        self.backend
            .storage
            .upload(AVATAR_BUCKET, &path, content_type, bytes)
            .await
            .map_err(SyncError::write)?;
        let url = self.backend.storage.public_url(AVATAR_BUCKET, &path);

        self.backend
            .data
            .update(
                PROFILES_TABLE,
                &[Filter::eq("id", &user.id)],
                json!({ "avatar_url": url }),
            )
            .await
            .map_err(SyncError::write)?;
        tracing::info!(path = %path, "Avatar updated");
        Ok(url)
    }
}
