//! Change feeds.
//!
//! A [`ChangeFeed`] turns a [`FeedSpec`] (table, event kinds, row scope) into a
//! [`FeedHandle`] that yields raw row changes and connection status. The
//! [`Subscription`] in [`subscriber`] decodes those into typed
//! [`ChangeEvent`](crate::store::ChangeEvent)s and merges them into a store.

mod subscriber;

pub use subscriber::{FeedStatus, Subscription};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::backend::Filter;
use crate::error::ServiceError;

/// Row change kinds as named by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// Which change kinds a subscription wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    Insert,
    Update,
    Delete,
    All,
}

impl EventFilter {
    /// Event name in the realtime join config.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::Insert => "INSERT",
            EventFilter::Update => "UPDATE",
            EventFilter::Delete => "DELETE",
            EventFilter::All => "*",
        }
    }

    pub fn accepts(&self, kind: ChangeKind) -> bool {
        matches!(
            (self, kind),
            (EventFilter::All, _)
                | (EventFilter::Insert, ChangeKind::Insert)
                | (EventFilter::Update, ChangeKind::Update)
                | (EventFilter::Delete, ChangeKind::Delete)
        )
    }
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSpec {
    pub table: String,
    pub events: EventFilter,
    /// Row filter, e.g. `user_id = X`
    pub scope: Option<Filter>,
}

impl FeedSpec {
    pub fn new(table: impl Into<String>, events: EventFilter, scope: Option<Filter>) -> Self {
        Self {
            table: table.into(),
            events,
            scope,
        }
    }

    /// Scope in the `column=op.value` form used by realtime filters.
    pub fn scope_expression(&self) -> Option<String> {
        self.scope
            .as_ref()
            .map(|f| format!("{}={}", f.column, f.expression()))
    }
}

/// One row change as delivered by the feed, not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub new_row: Option<Value>,
    /// For deletes this may carry only the identity column
    pub old_row: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Change(RawChange),
    /// The connection was lost; events may have been missed
    Disconnected(String),
    /// The connection is back and the subscription re-joined
    Reconnected,
}

/// Receiving end of an open feed. Dropping it closes the feed.
#[derive(Debug)]
pub struct FeedHandle {
    receiver: mpsc::Receiver<FeedMessage>,
    close: Option<oneshot::Sender<()>>,
}

impl FeedHandle {
    /// `close` is signalled once when the handle is closed or dropped.
    pub fn new(receiver: mpsc::Receiver<FeedMessage>, close: oneshot::Sender<()>) -> Self {
        Self {
            receiver,
            close: Some(close),
        }
    }

    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.receiver.recv().await
    }

    /// Signal the producer to leave the channel. Idempotent.
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
        self.receiver.close();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_none()
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription. Returns once the feed is live.
    async fn open(&self, spec: FeedSpec) -> Result<FeedHandle, ServiceError>;
}
