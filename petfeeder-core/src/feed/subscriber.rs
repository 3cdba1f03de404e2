//! Merges a change feed into a store.

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::{ChangeKind, FeedHandle, FeedMessage, FeedSpec, RawChange};
use crate::backend::Backend;
use crate::error::SyncError;
use crate::page::Loader;
use crate::resource::Resource;
use crate::store::{Applied, AppliedChange, ChangeEvent, StoreHandle};

/// Capacity of the applied-change broadcast.
const CHANGE_CAPACITY: usize = 64;

/// Connection state of a subscription, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Live,
    /// Events may have been missed; the store is stale until reconnect
    Disconnected(String),
    Closed,
}

/// A running subscription feeding one store.
///
/// Closing (or dropping) it tears the store down first and only then stops
/// the task, so an event that is already in flight cannot land afterwards.
pub struct Subscription<R> {
    store: StoreHandle<R>,
    task: JoinHandle<()>,
    status: watch::Receiver<FeedStatus>,
    changes: broadcast::Sender<AppliedChange<R>>,
}

impl<R: Resource> Subscription<R> {
    /// Open the feed and start merging. `loader` re-seeds the store after a
    /// reconnect.
    pub(crate) async fn open(
        backend: &Backend,
        spec: FeedSpec,
        loader: Loader<R>,
    ) -> Result<Self, SyncError> {
        let feed = backend
            .feed
            .open(spec.clone())
            .await
            .map_err(|e| SyncError::Subscription(e.display_message()))?;

        let (status_tx, status) = watch::channel(FeedStatus::Live);
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let store = loader.store().clone();
        let task = tokio::spawn(run(feed, spec, loader, status_tx, changes.clone()));

        Ok(Self {
            store,
            task,
            status,
            changes,
        })
    }

    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    /// Every change that altered the store, after it was applied.
    pub fn changes(&self) -> broadcast::Receiver<AppliedChange<R>> {
        self.changes.subscribe()
    }

    /// Tear down the store and stop the task.
    pub fn close(self) {
        drop(self);
    }
}

impl<R> Drop for Subscription<R> {
    fn drop(&mut self) {
        self.store.tear_down();
        self.task.abort();
    }
}

async fn run<R: Resource>(
    mut feed: FeedHandle,
    spec: FeedSpec,
    loader: Loader<R>,
    status: watch::Sender<FeedStatus>,
    changes: broadcast::Sender<AppliedChange<R>>,
) {
    let store = loader.store().clone();

    while let Some(message) = feed.recv().await {
        match message {
            FeedMessage::Change(change) => {
                let Some(event) = decode_change::<R>(&spec, change) else {
                    continue;
                };
                let id = event.id().to_string();
                match store.apply(event.clone()) {
                    None => break,
                    Some(Applied::Ignored) => {
                        tracing::debug!(table = R::TABLE, id = %id, "Change ignored");
                    }
                    Some(applied) => {
                        tracing::debug!(table = R::TABLE, id = %id, ?applied, "Change applied");
                        let _ = changes.send(AppliedChange { applied, event });
                    }
                }
            }
            FeedMessage::Disconnected(reason) => {
                tracing::warn!(table = R::TABLE, "Change feed lost: {}", reason);
                store.mark_stale();
                status.send_replace(FeedStatus::Disconnected(reason));
            }
            FeedMessage::Reconnected => {
                tracing::info!(table = R::TABLE, "Change feed reconnected, reloading");
                match loader.load().await {
                    Ok(()) => {
                        status.send_replace(FeedStatus::Live);
                    }
                    Err(e) => {
                        tracing::error!(table = R::TABLE, "Reload after reconnect failed: {}", e);
                        status.send_replace(FeedStatus::Disconnected(e.to_string()));
                    }
                }
            }
        }
    }

    status.send_replace(FeedStatus::Closed);
}

/// Turn a raw feed change into a store event, or `None` if it does not
/// belong to this subscription or cannot be decoded.
///
/// The feed is trusted to filter, but kinds and scope are checked again here.
/// A DELETE may carry only the identity column, so its scope is only checked
/// when the scope column is present.
pub(crate) fn decode_change<R: Resource>(
    spec: &FeedSpec,
    change: RawChange,
) -> Option<ChangeEvent<R>> {
    if !spec.events.accepts(change.kind) {
        return None;
    }

    match change.kind {
        ChangeKind::Insert | ChangeKind::Update => {
            let Some(row) = change.new_row else {
                tracing::warn!(table = R::TABLE, "Change without a row");
                return None;
            };
            if let Some(scope) = &spec.scope {
                if !scope.matches(&row) {
                    // An update can move a row out of scope.
                    return match change.kind {
                        ChangeKind::Update => row_id::<R>(&row).map(ChangeEvent::Delete),
                        _ => None,
                    };
                }
            }
            match serde_json::from_value::<R>(row) {
                Ok(entity) if change.kind == ChangeKind::Insert => {
                    Some(ChangeEvent::Insert(entity))
                }
                Ok(entity) => Some(ChangeEvent::Update(entity)),
                Err(e) => {
                    tracing::warn!(table = R::TABLE, "Skipping undecodable row: {}", e);
                    None
                }
            }
        }
        ChangeKind::Delete => {
            let row = change.old_row?;
            if let Some(scope) = &spec.scope {
                if row.get(&scope.column).is_some() && !scope.matches(&row) {
                    return None;
                }
            }
            let id = row_id::<R>(&row);
            if id.is_none() {
                tracing::warn!(table = R::TABLE, "Delete without {}", R::ID_COLUMN);
            }
            id.map(ChangeEvent::Delete)
        }
    }
}

fn row_id<R: Resource>(row: &Value) -> Option<String> {
    match row.get(R::ID_COLUMN)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DataService, Filter};
    use crate::feed::EventFilter;
    use crate::models::{Device, Schedule};
    use crate::page::{PageScope, ResourcePage};
    use crate::testing::{eventually, FakeData, Fakes};
    use serde_json::json;

    fn schedules_spec() -> FeedSpec {
        FeedSpec::new(
            "schedules",
            EventFilter::All,
            Some(Filter::eq("device_id", "D1")),
        )
    }

    fn schedule_row(id: &str, device: &str) -> Value {
        json!({
            "schedule_id": id,
            "device_id": device,
            "user_id": "u1",
            "time": "2030-01-01T08:00:00Z",
            "amount": 20
        })
    }

    fn change(kind: ChangeKind, new_row: Option<Value>, old_row: Option<Value>) -> RawChange {
        RawChange {
            kind,
            new_row,
            old_row,
        }
    }

    #[test]
    fn test_decode_insert_in_scope() {
        let event = decode_change::<Schedule>(
            &schedules_spec(),
            change(ChangeKind::Insert, Some(schedule_row("s1", "D1")), None),
        );
        assert!(matches!(event, Some(ChangeEvent::Insert(s)) if s.schedule_id == "s1"));
    }

    #[test]
    fn test_decode_drops_out_of_scope_insert() {
        let event = decode_change::<Schedule>(
            &schedules_spec(),
            change(ChangeKind::Insert, Some(schedule_row("s1", "D2")), None),
        );
        assert!(event.is_none());
    }

    #[test]
    fn test_decode_update_leaving_scope_becomes_delete() {
        let event = decode_change::<Schedule>(
            &schedules_spec(),
            change(ChangeKind::Update, Some(schedule_row("s1", "D2")), None),
        );
        assert_eq!(event, Some(ChangeEvent::Delete("s1".to_string())));
    }

    #[test]
    fn test_decode_key_only_delete() {
        let event = decode_change::<Schedule>(
            &schedules_spec(),
            change(ChangeKind::Delete, None, Some(json!({"schedule_id": "s1"}))),
        );
        assert_eq!(event, Some(ChangeEvent::Delete("s1".to_string())));

        let foreign = decode_change::<Schedule>(
            &schedules_spec(),
            change(
                ChangeKind::Delete,
                None,
                Some(json!({"schedule_id": "s1", "device_id": "D9"})),
            ),
        );
        assert!(foreign.is_none());
    }

    #[test]
    fn test_decode_respects_event_filter() {
        let spec = FeedSpec::new("schedules", EventFilter::Insert, None);
        let event = decode_change::<Schedule>(
            &spec,
            change(ChangeKind::Update, Some(schedule_row("s1", "D1")), None),
        );
        assert!(event.is_none());
    }

    #[test]
    fn test_decode_skips_bad_rows() {
        let event = decode_change::<Schedule>(
            &schedules_spec(),
            change(
                ChangeKind::Insert,
                Some(json!({"schedule_id": "s1", "device_id": "D1", "amount": "lots"})),
                None,
            ),
        );
        assert!(event.is_none());
    }

    fn device_row(id: &str, food: u8) -> Value {
        json!({
            "device_id": id,
            "user_id": "u1",
            "device_name": "Kitchen",
            "created_at": "2025-01-01T00:00:00Z",
            "last_status": {"food_level": food}
        })
    }

    #[tokio::test]
    async fn test_events_flow_into_store() {
        let fakes = Fakes::new(FakeData::default().with_rows("devices", vec![device_row("D1", 80)]));
        let mut page = ResourcePage::<Device>::new(fakes.backend(), PageScope::User);
        page.mount().await.unwrap();
        let mut changes = page.changes().unwrap();

        fakes.feed.push(
            "devices",
            FeedMessage::Change(change(ChangeKind::Update, Some(device_row("D1", 15)), None)),
        );
        let store = page.store().clone();
        assert!(
            eventually(|| store.get("D1").map(|d| d.last_status.food_level) == Some(15)).await
        );
        let received = changes.recv().await.unwrap();
        assert_eq!(received.applied, Applied::Replaced);
        assert!(matches!(received.event, ChangeEvent::Update(ref d) if d.device_id == "D1"));

        // Duplicate delivery of a delete, then an insert for a foreign user.
        for _ in 0..2 {
            fakes.feed.push(
                "devices",
                FeedMessage::Change(change(
                    ChangeKind::Delete,
                    None,
                    Some(json!({"device_id": "D1"})),
                )),
            );
        }
        let mut foreign = device_row("D9", 50);
        foreign["user_id"] = json!("someone-else");
        fakes.feed.push(
            "devices",
            FeedMessage::Change(change(ChangeKind::Insert, Some(foreign), None)),
        );

        assert!(eventually(|| store.is_empty()).await);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_marks_stale_and_reconnect_reseeds() {
        let fakes = Fakes::new(FakeData::default().with_rows("devices", vec![device_row("D1", 80)]));
        let mut page = ResourcePage::<Device>::new(fakes.backend(), PageScope::User);
        page.mount().await.unwrap();
        let store = page.store().clone();

        fakes
            .feed
            .push("devices", FeedMessage::Disconnected("socket closed".to_string()));
        assert!(eventually(|| store.is_stale()).await);
        assert_eq!(
            page.status(),
            FeedStatus::Disconnected("socket closed".to_string())
        );

        // A row that appeared while the feed was down.
        fakes
            .data
            .insert("devices", device_row("D2", 60))
            .await
            .unwrap();
        fakes.feed.push("devices", FeedMessage::Reconnected);

        assert!(eventually(|| !store.is_stale()).await);
        assert!(store.contains("D2"));
        assert_eq!(page.status(), FeedStatus::Live);
    }

    #[tokio::test]
    async fn test_duplicate_insert_broadcast_as_replaced() {
        let fakes = Fakes::new(FakeData::default());
        let mut page = ResourcePage::<Device>::new(fakes.backend(), PageScope::User);
        page.mount().await.unwrap();
        let mut changes = page.changes().unwrap();

        for _ in 0..2 {
            fakes.feed.push(
                "devices",
                FeedMessage::Change(change(ChangeKind::Insert, Some(device_row("D2", 40)), None)),
            );
        }

        let first = changes.recv().await.unwrap();
        let second = changes.recv().await.unwrap();
        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(second.applied, Applied::Replaced);
        assert_eq!(page.store().len(), 1);
    }
}
