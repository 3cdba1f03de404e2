//! One synced page of a resource.
//!
//! A [`ResourcePage`] is the unit that owns a store: mounting authenticates,
//! seeds the store from the data service and then opens a change feed scoped
//! to the current user or device. Unmounting (or dropping the page) tears the
//! store down before closing the feed, so no late event is ever applied.

use tokio::sync::broadcast;

use crate::backend::{Backend, Filter, Query, User};
use crate::error::SyncError;
use crate::feed::{EventFilter, FeedSpec, FeedStatus, Subscription};
use crate::resource::Resource;
use crate::store::{AppliedChange, PageWindow, ResourceStore, StoreHandle};

/// Which rows a page shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageScope {
    /// Rows whose `user_id` is the signed-in user
    User,
    /// Rows of one device
    Device(String),
    /// Everything the data service lets this user read
    Unscoped,
}

impl PageScope {
    pub fn filter(&self, user: &User) -> Option<Filter> {
        match self {
            PageScope::User => Some(Filter::eq("user_id", &user.id)),
            PageScope::Device(device_id) => Some(Filter::eq("device_id", device_id)),
            PageScope::Unscoped => None,
        }
    }
}

/// Fetches rows into a store: the whole table, or the store's current page
/// when it has a window.
#[derive(Clone)]
pub(crate) struct Loader<R> {
    backend: Backend,
    store: StoreHandle<R>,
    query: Query,
}

impl<R: Resource> Loader<R> {
    pub fn new(backend: Backend, store: StoreHandle<R>, query: Query) -> Self {
        Self {
            backend,
            store,
            query,
        }
    }

    pub fn store(&self) -> &StoreHandle<R> {
        &self.store
    }

    /// Re-run the initial fetch against the store's current shape.
    pub async fn load(&self) -> Result<(), SyncError> {
        match self.store.window() {
            Some(window) => self.load_page(window.page).await,
            None => self.seed_all().await,
        }
    }

    async fn seed_all(&self) -> Result<(), SyncError> {
        let (items, _) = self.backend.fetch::<R>(&self.query).await?;
        tracing::debug!(table = R::TABLE, rows = items.len(), "Seeded store");
        self.store.seed(items);
        Ok(())
    }

    pub async fn load_page(&self, page: usize) -> Result<(), SyncError> {
        let Some(window) = self.store.window() else {
            return self.seed_all().await;
        };
        let page = page.max(1);
        let offset = (page - 1) * window.page_size;
        let query = self
            .query
            .clone()
            .range(offset, window.page_size)
            .with_count();

        let (items, total) = self.backend.fetch::<R>(&query).await?;
        let total = total.unwrap_or(offset + items.len());
        tracing::debug!(table = R::TABLE, page, total, "Seeded page");
        self.store.seed_page(items, page, total);
        Ok(())
    }
}

/// A mounted view of one resource type.
pub struct ResourcePage<R: Resource> {
    backend: Backend,
    scope: PageScope,
    page_size: Option<usize>,
    store: StoreHandle<R>,
    loader: Option<Loader<R>>,
    subscription: Option<Subscription<R>>,
    user: Option<User>,
}

impl<R: Resource> ResourcePage<R> {
    pub fn new(backend: Backend, scope: PageScope) -> Self {
        Self {
            backend,
            scope,
            page_size: None,
            store: StoreHandle::default(),
            loader: None,
            subscription: None,
            user: None,
        }
    }

    /// A page that holds `page_size` rows at a time.
    pub fn paginated(backend: Backend, scope: PageScope, page_size: usize) -> Self {
        let mut page = Self::new(backend, scope);
        page.page_size = Some(page_size.max(1));
        page
    }

    /// Authenticate, seed, subscribe. Re-mounting first unmounts, so a page
    /// never holds more than one subscription.
    ///
    /// If the feed cannot be opened the seeded rows stay readable, the store
    /// is marked stale and [`SyncError::Subscription`] is returned.
    pub async fn mount(&mut self) -> Result<(), SyncError> {
        self.unmount();

        let user = self.backend.require_user().await?;
        let filter = self.scope.filter(&user);

        let store = match self.page_size {
            Some(size) => StoreHandle::new(ResourceStore::paginated(PageWindow::new(1, size))),
            None => StoreHandle::default(),
        };
        let mut query = Query::resource::<R>();
        if let Some(filter) = filter.clone() {
            query = query.filter(filter);
        }

        let loader = Loader::new(self.backend.clone(), store.clone(), query);
        self.store = store.clone();
        loader.load().await?;
        self.loader = Some(loader.clone());
        self.user = Some(user);

        let spec = FeedSpec::new(R::TABLE, EventFilter::All, filter);
        match Subscription::open(&self.backend, spec, loader).await {
            Ok(subscription) => {
                tracing::info!(table = R::TABLE, rows = store.len(), "Page mounted");
                self.subscription = Some(subscription);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(table = R::TABLE, "{}", e);
                store.mark_stale();
                Err(e)
            }
        }
    }

    /// Refetch the current contents.
    pub async fn reload(&self) -> Result<(), SyncError> {
        match &self.loader {
            Some(loader) => loader.load().await,
            None => Err(SyncError::ExternalRead("page is not mounted".to_string())),
        }
    }

    /// Fetch another page of a paginated store. Page numbers start at 1.
    pub async fn go_to_page(&self, page: usize) -> Result<(), SyncError> {
        match &self.loader {
            Some(loader) => loader.load_page(page).await,
            None => Err(SyncError::ExternalRead("page is not mounted".to_string())),
        }
    }

    /// Tear the store down, then close the subscription. Idempotent.
    pub fn unmount(&mut self) {
        self.store.tear_down();
        if let Some(subscription) = self.subscription.take() {
            subscription.close();
            tracing::info!(table = R::TABLE, "Page unmounted");
        }
        self.loader = None;
    }

    pub fn store(&self) -> &StoreHandle<R> {
        &self.store
    }

    pub fn scope(&self) -> &PageScope {
        &self.scope
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    pub fn status(&self) -> FeedStatus {
        match &self.subscription {
            Some(subscription) => subscription.status(),
            None => FeedStatus::Closed,
        }
    }

    /// Changes as they are merged into the store.
    pub fn changes(&self) -> Option<broadcast::Receiver<AppliedChange<R>>> {
        self.subscription.as_ref().map(|s| s.changes())
    }
}

impl<R: Resource> Drop for ResourcePage<R> {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ChangeKind, FeedMessage, RawChange};
    use crate::models::{FeedingHistory, Pet};
    use crate::testing::{eventually, FakeData, Fakes, Op};
    use serde_json::json;

    fn pet_row(id: &str, name: &str) -> serde_json::Value {
        json!({"pet_id": id, "user_id": "u1", "name": name, "health_data": {"weight": 4.0, "age": 3}})
    }

    fn feed_row(id: &str, minute: u32) -> serde_json::Value {
        json!({
            "feed_id": id,
            "device_id": "D1",
            "time": format!("2025-06-01T12:{:02}:00Z", minute),
            "amount": 10,
            "manual": true
        })
    }

    #[tokio::test]
    async fn test_mount_seeds_then_subscribes() {
        let fakes = Fakes::new(FakeData::default().with_rows(
            "pets",
            vec![pet_row("p2", "rex"), pet_row("p1", "Fido"), pet_row("p3", "other")],
        ));
        let mut page = ResourcePage::<Pet>::new(fakes.backend(), PageScope::User);
        page.mount().await.unwrap();

        let names: Vec<_> = page.store().snapshot().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Fido", "other", "rex"]);
        assert!(page.is_mounted());
        assert_eq!(page.status(), FeedStatus::Live);

        let spec = fakes.feed.spec(0).unwrap();
        assert_eq!(spec.table, "pets");
        assert_eq!(spec.scope, Some(Filter::eq("user_id", "u1")));
    }

    #[tokio::test]
    async fn test_mount_requires_user() {
        let fakes = Fakes::signed_out(FakeData::default());
        let mut page = ResourcePage::<Pet>::new(fakes.backend(), PageScope::User);
        assert!(matches!(page.mount().await, Err(SyncError::AuthRequired)));
        assert_eq!(fakes.data.total_calls(), 0);
        assert_eq!(fakes.feed.opened("pets"), 0);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_store_empty_and_unsubscribed() {
        let fakes = Fakes::new(FakeData::default().with_rows("pets", vec![pet_row("p1", "Fido")]));
        fakes.data.fail(Op::Select, "pets", "relation does not exist");
        let mut page = ResourcePage::<Pet>::new(fakes.backend(), PageScope::User);

        let err = page.mount().await.unwrap_err();
        assert!(matches!(err, SyncError::ExternalRead(ref m) if m.contains("relation")));
        assert!(page.store().is_empty());
        assert!(!page.is_mounted());
        assert_eq!(fakes.feed.opened("pets"), 0);
    }

    #[tokio::test]
    async fn test_subscription_failure_keeps_seed_and_marks_stale() {
        let fakes = Fakes::new(FakeData::default().with_rows("pets", vec![pet_row("p1", "Fido")]));
        fakes.feed.refuse("socket refused");
        let mut page = ResourcePage::<Pet>::new(fakes.backend(), PageScope::User);

        let err = page.mount().await.unwrap_err();
        assert!(matches!(err, SyncError::Subscription(_)));
        assert_eq!(page.store().len(), 1);
        assert!(page.store().is_stale());
    }

    #[tokio::test]
    async fn test_remount_closes_previous_subscription() {
        let fakes = Fakes::new(FakeData::default());
        let mut page = ResourcePage::<Pet>::new(fakes.backend(), PageScope::User);
        page.mount().await.unwrap();
        let first = page.store().clone();
        page.mount().await.unwrap();

        assert_eq!(fakes.feed.opened("pets"), 2);
        assert!(eventually(|| fakes.feed.closed("pets") == 1).await);
        assert!(first.is_torn_down());
        assert!(!page.store().is_torn_down());
    }

    #[tokio::test]
    async fn test_unmount_stops_events() {
        let fakes = Fakes::new(FakeData::default());
        let mut page = ResourcePage::<Pet>::new(fakes.backend(), PageScope::User);
        page.mount().await.unwrap();
        let store = page.store().clone();

        page.unmount();
        fakes.feed.push(
            "pets",
            FeedMessage::Change(RawChange {
                kind: ChangeKind::Insert,
                new_row: Some(pet_row("p1", "Fido")),
                old_row: None,
            }),
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(store.is_empty());
        assert!(store.is_torn_down());
        assert!(eventually(|| fakes.feed.closed("pets") == 1).await);
        assert_eq!(page.status(), FeedStatus::Closed);
    }

    #[tokio::test]
    async fn test_drop_unmounts() {
        let fakes = Fakes::new(FakeData::default());
        let store = {
            let mut page = ResourcePage::<Pet>::new(fakes.backend(), PageScope::User);
            page.mount().await.unwrap();
            page.store().clone()
        };
        assert!(store.is_torn_down());
        assert!(eventually(|| fakes.feed.closed("pets") == 1).await);
    }

    #[tokio::test]
    async fn test_paginated_history() {
        let rows = (0..12).map(|i| feed_row(&format!("f{:02}", i), i)).collect();
        let fakes = Fakes::new(FakeData::default().with_rows("feeding_history", rows));
        let mut page = ResourcePage::<FeedingHistory>::paginated(
            fakes.backend(),
            PageScope::Device("D1".to_string()),
            5,
        );
        page.mount().await.unwrap();

        let window = page.store().window().unwrap();
        assert_eq!((window.page, window.total, window.total_pages()), (1, 12, 3));
        let ids: Vec<_> = page.store().snapshot().into_iter().map(|f| f.feed_id).collect();
        assert_eq!(ids, vec!["f11", "f10", "f09", "f08", "f07"]);

        page.go_to_page(3).await.unwrap();
        let ids: Vec<_> = page.store().snapshot().into_iter().map(|f| f.feed_id).collect();
        assert_eq!(ids, vec!["f01", "f00"]);
        assert_eq!(page.store().window().unwrap().page, 3);
    }

    #[tokio::test]
    async fn test_reload_requires_mount() {
        let fakes = Fakes::new(FakeData::default());
        let page = ResourcePage::<Pet>::new(fakes.backend(), PageScope::User);
        assert!(page.reload().await.is_err());
    }
}
