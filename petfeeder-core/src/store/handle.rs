//! Shared access to one page's store.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{Applied, ChangeEvent, PageWindow, ResourceStore};
use crate::resource::Resource;

#[derive(Debug)]
struct Shared<R> {
    store: ResourceStore<R>,
    stale: bool,
    torn_down: bool,
}

/// Handle to a store shared by a page, its subscription task and the command
/// dispatcher.
///
/// Every accessor takes the lock for the duration of one call; it is never
/// held across an await. Event handlers therefore always see the current
/// contents rather than a captured copy.
///
/// Once [`tear_down`](Self::tear_down) has run, the handle refuses all further
/// changes.
#[derive(Debug)]
pub struct StoreHandle<R> {
    inner: Arc<Mutex<Shared<R>>>,
}

impl<R> Clone for StoreHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> StoreHandle<R> {
    fn lock(&self) -> MutexGuard<'_, Shared<R>> {
        // A panic while holding the lock can't leave the Vec half-sorted in a
        // way that matters here, so keep going with the data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark the contents as possibly out of date (the change feed was lost).
    pub fn mark_stale(&self) {
        self.lock().stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.lock().stale
    }

    /// Stop accepting changes. Idempotent.
    pub fn tear_down(&self) {
        self.lock().torn_down = true;
    }

    pub fn is_torn_down(&self) -> bool {
        self.lock().torn_down
    }
}

impl<R: Resource> Default for StoreHandle<R> {
    fn default() -> Self {
        Self::new(ResourceStore::new())
    }
}

impl<R: Resource> StoreHandle<R> {
    pub fn new(store: ResourceStore<R>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Shared {
                store,
                stale: false,
                torn_down: false,
            })),
        }
    }

    /// Apply a change. Returns `None` if the store has been torn down.
    pub fn apply(&self, event: ChangeEvent<R>) -> Option<Applied> {
        let mut shared = self.lock();
        if shared.torn_down {
            tracing::debug!(table = R::TABLE, id = event.id(), "Dropping change for torn-down store");
            return None;
        }
        let applied = shared.store.apply_change(event);
        Some(applied)
    }

    /// See [`ResourceStore::retract`]. Returns `None` if torn down.
    pub fn retract(&self, id: &str) -> Option<Applied> {
        let mut shared = self.lock();
        if shared.torn_down {
            return None;
        }
        Some(shared.store.retract(id))
    }

    /// Replace the contents and clear the stale flag. Returns `false` if the
    /// store has been torn down.
    pub fn seed(&self, entities: Vec<R>) -> bool {
        let mut shared = self.lock();
        if shared.torn_down {
            return false;
        }
        shared.store.seed(entities);
        shared.stale = false;
        true
    }

    /// Paginated variant of [`seed`](Self::seed).
    pub fn seed_page(&self, entities: Vec<R>, page: usize, total: usize) -> bool {
        let mut shared = self.lock();
        if shared.torn_down {
            return false;
        }
        shared.store.seed_page(entities, page, total);
        shared.stale = false;
        true
    }

    pub fn get(&self, id: &str) -> Option<R> {
        self.lock().store.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().store.contains(id)
    }

    /// Copy of all rows in store order.
    pub fn snapshot(&self) -> Vec<R> {
        self.lock().store.items().to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().store.is_empty()
    }

    pub fn window(&self) -> Option<PageWindow> {
        self.lock().store.window()
    }

    pub fn select<F>(&self, predicate: F) -> Vec<R>
    where
        F: Fn(&R) -> bool,
    {
        self.lock().store.select(predicate)
    }

    pub fn select_window<F>(&self, predicate: F, offset: usize, limit: usize) -> Vec<R>
    where
        F: Fn(&R) -> bool,
    {
        self.lock().store.select_window(predicate, offset, limit)
    }

    /// Run a read-only closure against the store.
    pub fn read<T>(&self, f: impl FnOnce(&ResourceStore<R>) -> T) -> T {
        f(&self.lock().store)
    }
}

impl<R: Resource + PartialEq> StoreHandle<R> {
    /// Apply `event` only while the row at `id` is still `expected` (`None`
    /// meaning absent). Used to undo a local write without clobbering a newer
    /// change that arrived in the meantime. Returns `None` if the row moved on
    /// or the store is torn down.
    pub fn apply_if_unchanged(
        &self,
        id: &str,
        expected: Option<&R>,
        event: ChangeEvent<R>,
    ) -> Option<Applied> {
        let mut shared = self.lock();
        if shared.torn_down || shared.store.get(id) != expected {
            return None;
        }
        Some(shared.store.apply_change(event))
    }
}
