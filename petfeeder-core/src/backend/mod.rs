//! External collaborators.
//!
//! The hosted platform is reached through four capabilities: [`AuthService`],
//! [`DataService`], [`ChangeFeed`] and [`ObjectStorage`]. They are bundled into one [`Backend`]
//! value that is built once at start-up and passed explicitly to pages and the
//! dispatcher, so tests can swap in fakes.

mod auth;
mod rest;
mod storage;

pub use auth::{decode_claims, Claims, SessionAuth};
pub use rest::RestClient;
pub use storage::{StorageClient, AVATAR_BUCKET};
pub(crate) use storage::{avatar_path, file_extension, image_content_type};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{ServiceError, SyncError};
use crate::feed::ChangeFeed;
use crate::realtime::{RealtimeClient, ReconnectPolicy};
use crate::resource::{Resource, SortOrder};

/// The signed-in account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Token bundle for the signed-in account.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

impl Session {
    /// True if the access token expires within `margin_secs`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        (self.expires_at - now).num_seconds() <= margin_secs
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(User),
    SignedOut,
    TokenRefreshed,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn current_user(&self) -> Option<User>;
    async fn session(&self) -> Option<Session>;
    /// Sign-in, sign-out and token refresh notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
    /// Set a new password for the signed-in user.
    async fn update_password(&self, password: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
}

impl FilterOp {
    fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
        }
    }
}

/// `column <op> value`
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    /// Operator and value in the `op.value` form used by query strings and
    /// realtime filters.
    pub fn expression(&self) -> String {
        format!("{}.{}", self.op.as_str(), self.value)
    }

    /// Whether a JSON row satisfies this filter. Only equality is checked;
    /// other operators are left to the server.
    pub fn matches(&self, row: &Value) -> bool {
        if self.op != FilterOp::Eq {
            return true;
        }
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == self.value,
        }
    }
}

/// A filtered, ordered, optionally paginated read.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<SortOrder>,
    /// `(offset, limit)`
    pub range: Option<(usize, usize)>,
    /// Ask for the exact number of matching rows
    pub count: bool,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
            range: None,
            count: false,
        }
    }

    /// All rows of `R`, in its server ordering.
    pub fn resource<R: Resource>() -> Self {
        Self::table(R::TABLE).order(R::ORDER)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn range(mut self, offset: usize, limit: usize) -> Self {
        self.range = Some((offset, limit));
        self
    }

    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }
}

/// Result of a read.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    pub rows: Vec<Value>,
    /// Exact match count, when requested
    pub total: Option<usize>,
}

#[async_trait]
pub trait DataService: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Rows, ServiceError>;
    /// Insert one row, returning the stored representation.
    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, ServiceError>;
    /// Patch the given columns of every matching row.
    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, ServiceError>;
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload (or overwrite) an object.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<(), ServiceError>;

    /// Public URL of an object in a public bucket.
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Decode every row or none: a read never half-populates a store.
pub fn decode_rows<R: Resource>(rows: Vec<Value>) -> Result<Vec<R>, ServiceError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(row).map_err(|e| {
                ServiceError::new(format!("Unexpected {} row: {}", R::TABLE, e))
            })
        })
        .collect()
}

/// Connection settings for the hosted platform.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: String,
    pub anon_key: String,
    pub reconnect: bool,
}

/// The one instance of every external collaborator.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthService>,
    pub data: Arc<dyn DataService>,
    pub feed: Arc<dyn ChangeFeed>,
    pub storage: Arc<dyn ObjectStorage>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}

impl Backend {
    pub fn new(
        auth: Arc<dyn AuthService>,
        data: Arc<dyn DataService>,
        feed: Arc<dyn ChangeFeed>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            auth,
            data,
            feed,
            storage,
        }
    }

    /// Signs in with a password and wires the REST, realtime and storage
    /// clients to the resulting session.
    pub async fn connect(
        settings: &BackendSettings,
        email: &str,
        password: &str,
    ) -> Result<Self, SyncError> {
        let auth = Arc::new(SessionAuth::new(&settings.url, &settings.anon_key));
        auth.sign_in_with_password(email, password)
            .await
            .map_err(|e| {
                tracing::warn!("Sign-in failed: {}", e.display_message());
                SyncError::AuthRequired
            })?;

        let auth: Arc<dyn AuthService> = auth;
        let data = Arc::new(RestClient::new(
            &settings.url,
            &settings.anon_key,
            Arc::clone(&auth),
        ));
        let reconnect = if settings.reconnect {
            ReconnectPolicy::default()
        } else {
            ReconnectPolicy::disabled()
        };
        let feed = Arc::new(
            RealtimeClient::new(&settings.url, &settings.anon_key, Arc::clone(&auth))
                .with_reconnect(reconnect),
        );

        let storage = Arc::new(StorageClient::new(
            &settings.url,
            &settings.anon_key,
            Arc::clone(&auth),
        ));

        Ok(Self::new(auth, data, feed, storage))
    }

    /// The signed-in user, or [`SyncError::AuthRequired`].
    pub async fn require_user(&self) -> Result<User, SyncError> {
        self.auth
            .current_user()
            .await
            .ok_or(SyncError::AuthRequired)
    }

    /// Run a read and decode it as `R`.
    pub async fn fetch<R: Resource>(
        &self,
        query: &Query,
    ) -> Result<(Vec<R>, Option<usize>), SyncError> {
        let rows = self.data.select(query).await.map_err(SyncError::read)?;
        let items = decode_rows(rows.rows).map_err(SyncError::read)?;
        Ok((items, rows.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_expression() {
        assert_eq!(Filter::eq("user_id", "u1").expression(), "eq.u1");
        assert_eq!(
            Filter::new("time", FilterOp::Gt, "2025-01-01T00:00:00Z").expression(),
            "gt.2025-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_filter_matches_rows() {
        let filter = Filter::eq("device_id", "D1");
        assert!(filter.matches(&json!({"device_id": "D1"})));
        assert!(!filter.matches(&json!({"device_id": "D2"})));
        assert!(!filter.matches(&json!({"feed_id": "f1"})));

        let numeric = Filter::eq("amount", "10");
        assert!(numeric.matches(&json!({"amount": 10})));
    }

    #[test]
    fn test_query_builder() {
        let q = Query::resource::<crate::models::FeedingHistory>()
            .filter(Filter::eq("device_id", "D1"))
            .range(5, 5)
            .with_count();
        assert_eq!(q.table, "feeding_history");
        assert_eq!(q.order, Some(SortOrder::desc("time")));
        assert_eq!(q.range, Some((5, 5)));
        assert!(q.count);
    }

    #[test]
    fn test_decode_rows_all_or_nothing() {
        let rows = vec![
            json!({"pet_id": "p1", "user_id": "u1", "name": "Fido"}),
            json!({"pet_id": "p2"}),
        ];
        let result = decode_rows::<crate::models::Pet>(rows);
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("pets"));
    }

    #[test]
    fn test_session_expires_within() {
        let now = Utc::now();
        let session = Session {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: now + chrono::Duration::seconds(30),
            user: User {
                id: "u1".to_string(),
                email: None,
            },
        };
        assert!(session.expires_within(now, 60));
        assert!(!session.expires_within(now, 10));
    }
}
