//! In-memory fakes of the backend collaborators, shared by unit tests.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::backend::{
    AuthEvent, AuthService, Backend, DataService, Filter, ObjectStorage, Query, Rows, Session,
    User,
};
use crate::error::ServiceError;
use crate::feed::{ChangeFeed, FeedHandle, FeedMessage, FeedSpec};

pub(crate) struct FakeAuth {
    user: Mutex<Option<User>>,
    events: broadcast::Sender<AuthEvent>,
    passwords: Mutex<Vec<String>>,
}

impl FakeAuth {
    pub fn signed_in(user_id: &str) -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            user: Mutex::new(Some(User {
                id: user_id.to_string(),
                email: Some(format!("{}@example.com", user_id)),
            })),
            events,
            passwords: Mutex::new(Vec::new()),
        }
    }

    pub fn signed_out() -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            user: Mutex::new(None),
            events,
            passwords: Mutex::new(Vec::new()),
        }
    }

    /// Passwords set through [`AuthService::update_password`], oldest first.
    pub fn passwords(&self) -> Vec<String> {
        self.passwords.lock().unwrap().clone()
    }

    pub fn sign_out(&self) {
        *self.user.lock().unwrap() = None;
        let _ = self.events.send(AuthEvent::SignedOut);
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn current_user(&self) -> Option<User> {
        self.user.lock().unwrap().clone()
    }

    async fn session(&self) -> Option<Session> {
        self.user.lock().unwrap().clone().map(|user| Session {
            access_token: "test-token".to_string(),
            refresh_token: "test-refresh".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            user,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn update_password(&self, password: &str) -> Result<(), ServiceError> {
        tokio::task::yield_now().await;
        self.passwords.lock().unwrap().push(password.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Select,
    Insert,
    Update,
    Delete,
}

/// Tables as JSON rows. Every call yields once so concurrent callers
/// interleave the way they would over the network.
#[derive(Default)]
pub(crate) struct FakeData {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    failures: Mutex<HashMap<(Op, String), String>>,
    calls: Mutex<Vec<(Op, String)>>,
}

impl FakeData {
    pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
        self
    }

    /// Make every `op` on `table` fail with `message`.
    pub fn fail(&self, op: Op, table: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert((op, table.to_string()), message.to_string());
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, op: Op, table: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, t)| *o == op && t == table)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn enter(&self, op: Op, table: &str) -> Result<(), ServiceError> {
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push((op, table.to_string()));
        match self.failures.lock().unwrap().get(&(op, table.to_string())) {
            Some(message) => Err(ServiceError::with_status(message.clone(), 400)),
            None => Ok(()),
        }
    }
}

fn matches_all(filters: &[Filter], row: &Value) -> bool {
    filters.iter().all(|f| f.matches(row))
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[async_trait]
impl DataService for FakeData {
    async fn select(&self, query: &Query) -> Result<Rows, ServiceError> {
        self.enter(Op::Select, &query.table).await?;
        let mut rows: Vec<Value> = self
            .rows(&query.table)
            .into_iter()
            .filter(|row| matches_all(&query.filters, row))
            .collect();
        if let Some(order) = query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(order.column), b.get(order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }
        let total = query.count.then_some(rows.len());
        if let Some((offset, limit)) = query.range {
            rows = rows.into_iter().skip(offset).take(limit).collect();
        }
        Ok(Rows { rows, total })
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, ServiceError> {
        self.enter(Op::Insert, table).await?;
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(vec![row])
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, ServiceError> {
        self.enter(Op::Update, table).await?;
        let mut tables = self.tables.lock().unwrap();
        let mut updated = Vec::new();
        for row in tables.entry(table.to_string()).or_default().iter_mut() {
            if !matches_all(filters, row) {
                continue;
            }
            if let (Value::Object(target), Value::Object(fields)) = (&mut *row, &patch) {
                for (k, v) in fields {
                    target.insert(k.clone(), v.clone());
                }
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), ServiceError> {
        self.enter(Op::Delete, table).await?;
        if let Some(rows) = self.tables.lock().unwrap().get_mut(table) {
            rows.retain(|row| !matches_all(filters, row));
        }
        Ok(())
    }
}

struct OpenFeed {
    spec: FeedSpec,
    sender: mpsc::Sender<FeedMessage>,
    close: oneshot::Receiver<()>,
}

/// Change feed driven by the test through [`FakeFeed::push`].
#[derive(Default)]
pub(crate) struct FakeFeed {
    open: Mutex<Vec<OpenFeed>>,
    refuse: Mutex<Option<String>>,
}

impl FakeFeed {
    pub fn refuse(&self, message: &str) {
        *self.refuse.lock().unwrap() = Some(message.to_string());
    }

    /// Deliver a message to every open feed on `table`.
    pub fn push(&self, table: &str, message: FeedMessage) {
        for feed in self.open.lock().unwrap().iter() {
            if feed.spec.table == table {
                let _ = feed.sender.try_send(message.clone());
            }
        }
    }

    pub fn opened(&self, table: &str) -> usize {
        self.open
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.spec.table == table)
            .count()
    }

    pub fn spec(&self, index: usize) -> Option<FeedSpec> {
        self.open.lock().unwrap().get(index).map(|f| f.spec.clone())
    }

    /// Number of feeds on `table` whose consumer has closed them.
    pub fn closed(&self, table: &str) -> usize {
        let mut open = self.open.lock().unwrap();
        let mut closed = 0;
        for feed in open.iter_mut() {
            if feed.spec.table != table {
                continue;
            }
            if !matches!(feed.close.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                closed += 1;
            }
        }
        closed
    }
}

#[async_trait]
impl ChangeFeed for FakeFeed {
    async fn open(&self, spec: FeedSpec) -> Result<FeedHandle, ServiceError> {
        tokio::task::yield_now().await;
        if let Some(message) = self.refuse.lock().unwrap().clone() {
            return Err(ServiceError::new(message));
        }
        let (sender, receiver) = mpsc::channel(64);
        let (close_tx, close_rx) = oneshot::channel();
        self.open.lock().unwrap().push(OpenFeed {
            spec,
            sender,
            close: close_rx,
        });
        Ok(FeedHandle::new(receiver, close_tx))
    }
}

#[derive(Default)]
pub(crate) struct FakeStorage {
    objects: Mutex<HashSet<String>>,
}

impl FakeStorage {
    pub fn objects(&self) -> Vec<String> {
        self.objects.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        _content_type: &str,
        _bytes: Vec<u8>,
    ) -> Result<(), ServiceError> {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{}/{}", bucket, path));
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://storage.test/public/{}/{}", bucket, path)
    }
}

/// A full set of fakes plus the [`Backend`] wired to them.
pub(crate) struct Fakes {
    pub auth: Arc<FakeAuth>,
    pub data: Arc<FakeData>,
    pub feed: Arc<FakeFeed>,
    pub storage: Arc<FakeStorage>,
}

impl Fakes {
    pub fn new(data: FakeData) -> Self {
        Self {
            auth: Arc::new(FakeAuth::signed_in("u1")),
            data: Arc::new(data),
            feed: Arc::new(FakeFeed::default()),
            storage: Arc::new(FakeStorage::default()),
        }
    }

    pub fn signed_out(data: FakeData) -> Self {
        Self {
            auth: Arc::new(FakeAuth::signed_out()),
            ..Self::new(data)
        }
    }

    pub fn backend(&self) -> Backend {
        Backend::new(
            self.auth.clone(),
            self.data.clone(),
            self.feed.clone(),
            self.storage.clone(),
        )
    }
}

/// Poll `condition` until it holds or about a second has passed.
pub(crate) async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
