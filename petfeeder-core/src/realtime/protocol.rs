//! Channel protocol messages.
//!
//! Every frame is a JSON object `{topic, event, payload, ref}`. A client joins
//! a topic with `phx_join`, the server answers with `phx_reply`, and row
//! changes arrive as `postgres_changes` events on the joined topic.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::feed::{ChangeKind, FeedSpec, RawChange};

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_ACCESS_TOKEN: &str = "access_token";
pub const EVENT_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

const HEARTBEAT_TOPIC: &str = "phoenix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl ChannelMessage {
    pub fn new(topic: &str, event: &str, payload: Value, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }

    pub fn join(topic: &str, spec: &FeedSpec, access_token: &str, reference: u64) -> Self {
        Self::new(topic, EVENT_JOIN, join_payload(spec, access_token), reference)
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self::new(topic, EVENT_LEAVE, json!({}), reference)
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self::new(HEARTBEAT_TOPIC, EVENT_HEARTBEAT, json!({}), reference)
    }

    pub fn access_token(topic: &str, access_token: &str, reference: u64) -> Self {
        Self::new(
            topic,
            EVENT_ACCESS_TOKEN,
            json!({ "access_token": access_token }),
            reference,
        )
    }

    pub fn to_text(&self) -> String {
        // A struct of strings and a Value always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Topic name for a subscription: `realtime:<table>` plus the scope, so two
/// scopes on one table never share a channel.
pub fn topic_for(spec: &FeedSpec) -> String {
    match spec.scope_expression() {
        Some(scope) => format!("realtime:{}:{}", spec.table, scope),
        None => format!("realtime:{}", spec.table),
    }
}

fn join_payload(spec: &FeedSpec, access_token: &str) -> Value {
    let mut change = json!({
        "event": spec.events.as_str(),
        "schema": "public",
        "table": spec.table,
    });
    if let Some(filter) = spec.scope_expression() {
        change["filter"] = Value::String(filter);
    }
    json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [change],
        },
        "access_token": access_token,
    })
}

/// What an incoming frame means to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Reply {
        reference: Option<String>,
        ok: bool,
        reason: Option<String>,
    },
    Change(RawChange),
    /// The server closed or errored the channel
    ChannelClosed(String),
    Other,
}

impl Incoming {
    pub fn classify(message: &ChannelMessage) -> Self {
        match message.event.as_str() {
            EVENT_REPLY => {
                let status = message.payload.get("status").and_then(Value::as_str);
                let reason = message
                    .payload
                    .get("response")
                    .and_then(|r| r.get("reason").or_else(|| r.get("message")))
                    .and_then(Value::as_str)
                    .map(String::from);
                Incoming::Reply {
                    reference: message.reference.clone(),
                    ok: status == Some("ok"),
                    reason,
                }
            }
            EVENT_CHANGES => match parse_change(&message.payload) {
                Some(change) => Incoming::Change(change),
                None => Incoming::Other,
            },
            EVENT_ERROR => Incoming::ChannelClosed("channel error".to_string()),
            EVENT_CLOSE => Incoming::ChannelClosed("channel closed by server".to_string()),
            EVENT_SYSTEM => {
                let failed = message.payload.get("status").and_then(Value::as_str) == Some("error");
                if failed {
                    let reason = message
                        .payload
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("subscription error");
                    Incoming::ChannelClosed(reason.to_string())
                } else {
                    Incoming::Other
                }
            }
            _ => Incoming::Other,
        }
    }
}

/// Row change from a `postgres_changes` payload. The change sits under
/// `data` in current servers and at the top level in older ones.
pub fn parse_change(payload: &Value) -> Option<RawChange> {
    let data = payload.get("data").unwrap_or(payload);
    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
        .and_then(ChangeKind::parse)?;

    let row = |keys: &[&str]| {
        keys.iter()
            .filter_map(|k| data.get(*k))
            .find(|v| v.as_object().is_some_and(|o| !o.is_empty()))
            .cloned()
    };

    Some(RawChange {
        kind,
        new_row: row(&["record", "new"]),
        old_row: row(&["old_record", "old"]),
    })
}
