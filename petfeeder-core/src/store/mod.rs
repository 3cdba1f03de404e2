//! In-memory resource stores.
//!
//! A [`ResourceStore`] holds the known-good ordered rows of one resource type
//! for one page. The initial fetch and every change feed event go through the
//! same merge rules:
//!
//! - an Insert for a known identity replaces it (duplicate delivery, or the
//!   echo of an optimistic insert)
//! - an Update for an unknown identity inserts it (an Update that overtook
//!   its Insert)
//! - a Delete for an unknown identity does nothing
//!
//! Ordering is recomputed from [`Resource::compare`] after every mutation.

mod handle;
mod window;

pub use handle::StoreHandle;
pub use window::PageWindow;

use std::collections::HashSet;

use crate::resource::Resource;

/// A row-level change, as delivered by the change feed or produced locally.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<R> {
    Insert(R),
    Update(R),
    /// Identity of the removed row
    Delete(String),
}

impl<R: Resource> ChangeEvent<R> {
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) => r.id(),
            ChangeEvent::Delete(id) => id.as_str(),
        }
    }
}

/// What a change did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    Removed,
    /// No-op: unknown delete, or a row outside the current page window
    Ignored,
}

/// A merged change and what it did, as broadcast to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange<R> {
    pub applied: Applied,
    pub event: ChangeEvent<R>,
}

impl<R> AppliedChange<R> {
    /// True if the change added a row the store did not hold before.
    pub fn is_new(&self) -> bool {
        self.applied == Applied::Inserted
    }
}

#[derive(Debug, Clone)]
pub struct ResourceStore<R> {
    items: Vec<R>,
    window: Option<PageWindow>,
    /// Identities counted in the window total but not held on this page
    off_page: HashSet<String>,
}

impl<R: Resource> Default for ResourceStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> ResourceStore<R> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            window: None,
            off_page: HashSet::new(),
        }
    }

    /// A store that only ever holds one page of rows.
    pub fn paginated(window: PageWindow) -> Self {
        Self {
            items: Vec::new(),
            window: Some(window),
            off_page: HashSet::new(),
        }
    }

    /// Replace the whole collection with a fresh snapshot.
    pub fn seed(&mut self, entities: Vec<R>) {
        self.items.clear();
        self.off_page.clear();
        for entity in entities {
            match self.position(entity.id()) {
                Some(pos) => self.items[pos] = entity,
                None => self.items.push(entity),
            }
        }
        self.sort();
        if let Some(window) = self.window {
            self.items.truncate(window.page_size);
        }
    }

    /// Replace the collection with one fetched page and its total count.
    pub fn seed_page(&mut self, entities: Vec<R>, page: usize, total: usize) {
        if let Some(window) = self.window.as_mut() {
            window.page = page.max(1);
            window.total = total;
        }
        self.seed(entities);
    }

    pub fn apply_change(&mut self, event: ChangeEvent<R>) -> Applied {
        match event {
            ChangeEvent::Insert(entity) | ChangeEvent::Update(entity) => self.upsert(entity),
            ChangeEvent::Delete(id) => self.remove(&id),
        }
    }

    fn upsert(&mut self, entity: R) -> Applied {
        if let Some(pos) = self.position(entity.id()) {
            self.items[pos] = entity;
            self.sort();
            return Applied::Replaced;
        }

        let Some(window) = self.window.as_mut() else {
            self.items.push(entity);
            self.sort();
            return Applied::Inserted;
        };
        // Counted once per identity, however often it is delivered.
        if !self.off_page.contains(entity.id()) {
            window.total += 1;
        }
        if !self.admits(&entity) {
            self.off_page.insert(entity.id().to_string());
            return Applied::Ignored;
        }

        self.off_page.remove(entity.id());
        self.items.push(entity);
        self.sort();
        self.truncate_to_window();
        Applied::Inserted
    }

    /// Drop rows pushed past the end of the page, remembering they are counted.
    fn truncate_to_window(&mut self) {
        let Some(window) = self.window else {
            return;
        };
        if self.items.len() > window.page_size {
            for dropped in self.items.drain(window.page_size..) {
                self.off_page.insert(dropped.id().to_string());
            }
        }
    }

    fn remove(&mut self, id: &str) -> Applied {
        if let Some(pos) = self.position(id) {
            self.items.remove(pos);
            self.uncount();
            return Applied::Removed;
        }
        if self.off_page.remove(id) {
            self.uncount();
        }
        Applied::Ignored
    }

    fn uncount(&mut self) {
        if let Some(window) = self.window.as_mut() {
            window.total = window.total.saturating_sub(1);
        }
    }

    /// Undo an optimistic insert that the server rejected. The row is
    /// un-counted from the window total even if it never made it onto the
    /// page.
    pub fn retract(&mut self, id: &str) -> Applied {
        self.remove(id)
    }

    /// Whether a new row belongs in the current page window. Only page 1 takes
    /// new rows, and only if they sort before its last entry or it has room.
    fn admits(&self, entity: &R) -> bool {
        let Some(window) = self.window else {
            return true;
        };
        if !window.is_first_page() {
            return false;
        }
        match self.items.last() {
            Some(last) if self.items.len() >= window.page_size => {
                R::compare(entity, last) == std::cmp::Ordering::Less
            }
            _ => true,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    fn sort(&mut self) {
        self.items.sort_by(R::compare);
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Rows in store order.
    pub fn items(&self) -> &[R] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn window(&self) -> Option<PageWindow> {
        self.window
    }

    /// Rows matching `predicate`, in store order. Never changes the store.
    pub fn select<F>(&self, predicate: F) -> Vec<R>
    where
        F: Fn(&R) -> bool,
    {
        self.items.iter().filter(|r| predicate(r)).cloned().collect()
    }

    /// Like [`select`](Self::select), skipping `offset` matches and keeping at
    /// most `limit`.
    pub fn select_window<F>(&self, predicate: F, offset: usize, limit: usize) -> Vec<R>
    where
        F: Fn(&R) -> bool,
    {
        self.items
            .iter()
            .filter(|r| predicate(r))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeedingHistory, Pet, Schedule};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn feed(id: &str, minute: i64) -> FeedingHistory {
        FeedingHistory {
            feed_id: id.to_string(),
            device_id: "D1".to_string(),
            time: at(minute),
            amount: 10,
            manual: true,
            schedule_id: None,
        }
    }

    fn schedule(id: &str, minute: i64) -> Schedule {
        Schedule {
            schedule_id: id.to_string(),
            device_id: "D1".to_string(),
            user_id: "u1".to_string(),
            time: at(minute),
            amount: 20,
            created_at: None,
        }
    }

    #[test]
    fn test_insert_twice_keeps_one_with_latest_values() {
        let mut store = ResourceStore::new();
        store.apply_change(ChangeEvent::Insert(Pet::new("p1", "u1", "Fido")));
        let applied = store.apply_change(ChangeEvent::Insert(Pet::new("p1", "u1", "Rex")));

        assert_eq!(applied, Applied::Replaced);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("p1").unwrap().name, "Rex");
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut store: ResourceStore<Pet> = ResourceStore::new();
        store.seed(vec![Pet::new("p1", "u1", "Fido")]);

        let applied = store.apply_change(ChangeEvent::Delete("nope".to_string()));
        assert_eq!(applied, Applied::Ignored);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_before_insert_then_duplicate_insert() {
        let mut store = ResourceStore::new();
        let applied = store.apply_change(ChangeEvent::Update(Pet::new("p9", "u1", "Late")));
        assert_eq!(applied, Applied::Inserted);

        store.apply_change(ChangeEvent::Insert(Pet::new("p9", "u1", "Late")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_pet_seed_update_delete_scenario() {
        let mut store = ResourceStore::new();
        store.seed(vec![Pet::new("p1", "u1", "Fido")]);

        store.apply_change(ChangeEvent::Update(Pet::new("p1", "u1", "Rex")));
        assert_eq!(store.items(), &[Pet::new("p1", "u1", "Rex")]);

        assert_eq!(
            store.apply_change(ChangeEvent::Delete("p1".to_string())),
            Applied::Removed
        );
        assert!(store.is_empty());

        assert_eq!(
            store.apply_change(ChangeEvent::Delete("p1".to_string())),
            Applied::Ignored
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_history_stays_time_descending() {
        let mut store = ResourceStore::new();
        for (id, minute) in [("a", 5), ("b", 1), ("c", 9), ("d", 3), ("e", 7)] {
            store.apply_change(ChangeEvent::Insert(feed(id, minute)));
        }

        let times: Vec<_> = store.select(|_| true).iter().map(|f| f.time).collect();
        let mut sorted = times.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(times, sorted);
        assert_eq!(store.items()[0].feed_id, "c");
    }

    #[test]
    fn test_seed_collapses_duplicates_and_sorts() {
        let mut store = ResourceStore::new();
        store.seed(vec![
            schedule("s2", 30),
            schedule("s1", 10),
            Schedule {
                amount: 99,
                ..schedule("s2", 30)
            },
        ]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.items()[0].schedule_id, "s1");
        assert_eq!(store.get("s2").unwrap().amount, 99);
    }

    #[test]
    fn test_update_reorders() {
        let mut store = ResourceStore::new();
        store.seed(vec![schedule("s1", 10), schedule("s2", 20)]);
        store.apply_change(ChangeEvent::Update(schedule("s1", 30)));
        assert_eq!(store.items()[0].schedule_id, "s2");
    }

    #[test]
    fn test_select_window_does_not_mutate() {
        let mut store = ResourceStore::new();
        store.seed(vec![schedule("s1", 10), schedule("s2", 20), schedule("s3", 30)]);

        let view = store.select_window(|s| s.time > at(15), 0, 1);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].schedule_id, "s2");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_window_page_one_splices_newer_row() {
        let mut store = ResourceStore::paginated(PageWindow::new(1, 3));
        store.seed_page(vec![feed("a", 30), feed("b", 20), feed("c", 10)], 1, 7);

        let applied = store.apply_change(ChangeEvent::Insert(feed("new", 25)));
        assert_eq!(applied, Applied::Inserted);
        assert_eq!(store.len(), 3);
        let ids: Vec<_> = store.items().iter().map(|f| f.feed_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "new", "b"]);
        assert_eq!(store.window().unwrap().total, 8);
    }

    #[test]
    fn test_window_page_one_drops_older_row_when_full() {
        let mut store = ResourceStore::paginated(PageWindow::new(1, 2));
        store.seed_page(vec![feed("a", 30), feed("b", 20)], 1, 2);

        let applied = store.apply_change(ChangeEvent::Insert(feed("old", 5)));
        assert_eq!(applied, Applied::Ignored);
        assert!(!store.contains("old"));
        assert_eq!(store.window().unwrap().total, 3);
    }

    #[test]
    fn test_window_other_page_drops_insert() {
        let mut store = ResourceStore::paginated(PageWindow::new(1, 2));
        store.seed_page(vec![feed("c", 10), feed("d", 5)], 2, 4);

        let applied = store.apply_change(ChangeEvent::Insert(feed("new", 50)));
        assert_eq!(applied, Applied::Ignored);
        let ids: Vec<_> = store.items().iter().map(|f| f.feed_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);
        assert_eq!(store.window().unwrap().page, 2);
        assert_eq!(store.window().unwrap().total, 5);
    }

    #[test]
    fn test_window_delete_decrements_total() {
        let mut store = ResourceStore::paginated(PageWindow::new(1, 5));
        store.seed_page(vec![feed("a", 30)], 1, 1);
        store.apply_change(ChangeEvent::Delete("a".to_string()));
        assert_eq!(store.window().unwrap().total, 0);
        store.apply_change(ChangeEvent::Delete("a".to_string()));
        assert_eq!(store.window().unwrap().total, 0);
    }

    #[test]
    fn test_retract_uncounts_row_off_page() {
        let mut store = ResourceStore::paginated(PageWindow::new(1, 2));
        store.seed_page(vec![feed("c", 10), feed("d", 5)], 2, 4);

        store.apply_change(ChangeEvent::Insert(feed("new", 50)));
        assert_eq!(store.window().unwrap().total, 5);
        assert_eq!(store.retract("new"), Applied::Ignored);
        assert_eq!(store.window().unwrap().total, 4);
    }

    #[test]
    fn test_window_duplicate_insert_off_page_counted_once() {
        let mut store = ResourceStore::paginated(PageWindow::new(1, 2));
        store.seed_page(vec![feed("c", 10), feed("d", 5)], 2, 4);

        store.apply_change(ChangeEvent::Insert(feed("new", 50)));
        store.apply_change(ChangeEvent::Insert(feed("new", 50)));
        store.apply_change(ChangeEvent::Update(feed("new", 50)));
        assert_eq!(store.window().unwrap().total, 5);
        assert_eq!(store.window().unwrap().total_pages(), 3);

        store.apply_change(ChangeEvent::Delete("new".to_string()));
        assert_eq!(store.window().unwrap().total, 4);
        store.apply_change(ChangeEvent::Delete("new".to_string()));
        assert_eq!(store.window().unwrap().total, 4);
    }

    #[test]
    fn test_window_row_pushed_off_page_one_not_recounted() {
        let mut store = ResourceStore::paginated(PageWindow::new(1, 2));
        store.seed_page(vec![feed("a", 30), feed("b", 20)], 1, 2);

        store.apply_change(ChangeEvent::Insert(feed("new", 40)));
        assert!(!store.contains("b"));
        assert_eq!(store.window().unwrap().total, 3);

        store.apply_change(ChangeEvent::Update(feed("b", 20)));
        assert_eq!(store.window().unwrap().total, 3);
        assert!(!store.contains("b"));
    }
}
