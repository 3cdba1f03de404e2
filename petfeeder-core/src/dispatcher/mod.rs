//! User-initiated writes.
//!
//! The [`CommandDispatcher`] validates input, makes sure the same command is
//! not already in flight, and then writes to the data service. What happens
//! to the local store depends on the resource's
//! [`WritePolicy`](crate::resource::WritePolicy): optimistic resources are
//! changed right away and rolled back on failure, echo-only resources are left
//! for the change feed to update.

mod commands;

pub use commands::{
    PetDraft, ProfileDraft, ScheduleDraft, DEFAULT_DEVICE_NAME, MIN_PASSWORD_CHARS,
};

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;

use crate::backend::{Backend, User};
use crate::error::SyncError;

/// Smallest manual portion, in grams
pub const MIN_DISPENSE_GRAMS: u32 = 5;
/// Largest manual portion, in grams
pub const MAX_DISPENSE_GRAMS: u32 = 100;
pub const DEFAULT_DISPENSE_GRAMS: u32 = 10;

/// Length limits for device and pet names, after trimming
pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingKey {
    operation: &'static str,
    id: String,
}

/// Marks a command as in flight until dropped.
struct Pending<'a> {
    set: &'a Mutex<HashSet<PendingKey>>,
    key: PendingKey,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}

fn lock(set: &Mutex<HashSet<PendingKey>>) -> MutexGuard<'_, HashSet<PendingKey>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

/// Runs user commands against the backend.
pub struct CommandDispatcher {
    backend: Backend,
    pending: Mutex<HashSet<PendingKey>>,
}

impl CommandDispatcher {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            pending: Mutex::new(HashSet::new()),
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Whether `operation` on `id` is still in flight.
    pub fn is_pending(&self, operation: &'static str, id: &str) -> bool {
        lock(&self.pending).contains(&PendingKey {
            operation,
            id: id.to_string(),
        })
    }

    /// Claim the pending slot for `operation` on `id`. Synchronous, so two
    /// calls made back to back cannot both get through.
    fn begin(&self, operation: &'static str, id: &str) -> Result<Pending<'_>, SyncError> {
        let key = PendingKey {
            operation,
            id: id.to_string(),
        };
        if !lock(&self.pending).insert(key.clone()) {
            tracing::debug!(operation, id, "Command already pending");
            return Err(SyncError::Busy(operation.replace('_', " ")));
        }
        Ok(Pending {
            set: &self.pending,
            key,
        })
    }

    async fn user(&self) -> Result<User, SyncError> {
        self.backend.require_user().await
    }
}

/// Trimmed name, or a validation error naming `field`.
fn validate_name(field: &'static str, name: &str) -> Result<String, SyncError> {
    let name = name.trim();
    let chars = name.chars().count();
    if chars < NAME_MIN_CHARS {
        return Err(SyncError::validation(
            field,
            format!("must be at least {} characters", NAME_MIN_CHARS),
        ));
    }
    if chars > NAME_MAX_CHARS {
        return Err(SyncError::validation(
            field,
            format!("must be at most {} characters", NAME_MAX_CHARS),
        ));
    }
    Ok(name.to_string())
}

fn validate_id(field: &'static str, id: &str) -> Result<(), SyncError> {
    if id.trim().is_empty() {
        return Err(SyncError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn validate_dispense_amount(amount: u32) -> Result<(), SyncError> {
    if !(MIN_DISPENSE_GRAMS..=MAX_DISPENSE_GRAMS).contains(&amount) {
        return Err(SyncError::validation(
            "amount",
            format!(
                "must be between {} and {} grams",
                MIN_DISPENSE_GRAMS, MAX_DISPENSE_GRAMS
            ),
        ));
    }
    Ok(())
}

fn to_row<T: Serialize>(value: &T) -> Result<Value, SyncError> {
    serde_json::to_value(value)
        .map_err(|e| SyncError::ExternalWrite(format!("could not encode row: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("name", "  Kitchen  ").unwrap(), "Kitchen");
        assert!(validate_name("name", " a ").unwrap_err().is_validation());
        assert!(validate_name("name", &"x".repeat(31)).is_err());
        assert!(validate_name("name", &"x".repeat(30)).is_ok());
    }

    #[test]
    fn test_validate_dispense_amount() {
        assert!(validate_dispense_amount(4).is_err());
        assert!(validate_dispense_amount(5).is_ok());
        assert!(validate_dispense_amount(100).is_ok());
        assert!(validate_dispense_amount(101).is_err());
    }

    #[test]
    fn test_pending_key_released_on_drop() {
        let fakes = crate::testing::Fakes::new(crate::testing::FakeData::default());
        let dispatcher = CommandDispatcher::new(fakes.backend());
        {
            let _pending = dispatcher.begin("dispense", "D1").unwrap();
            assert!(dispatcher.is_pending("dispense", "D1"));
            assert!(matches!(
                dispatcher.begin("dispense", "D1"),
                Err(SyncError::Busy(ref op)) if op == "dispense"
            ));
            assert!(dispatcher.begin("dispense", "D2").is_ok());
        }
        assert!(!dispatcher.is_pending("dispense", "D1"));
    }
}
