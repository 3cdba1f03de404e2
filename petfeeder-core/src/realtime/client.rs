//! WebSocket client for the realtime change feed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::protocol::{topic_for, ChannelMessage, Incoming};
use super::{RealtimeError, ReconnectPolicy};
use crate::backend::{AuthEvent, AuthService};
use crate::error::{redact, ServiceError};
use crate::feed::{ChangeFeed, FeedHandle, FeedMessage, FeedSpec};

/// Timeout for the join reply
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between heartbeats on an idle socket
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Messages buffered between the socket task and the subscriber
const FEED_CAPACITY: usize = 256;

const PROTOCOL_VERSION: &str = "1.0.0";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Change feed client that opens one websocket per subscription.
pub struct RealtimeClient {
    base_url: String,
    anon_key: String,
    auth: Arc<dyn AuthService>,
    reconnect: ReconnectPolicy,
}

impl RealtimeClient {
    pub fn new(base_url: &str, anon_key: &str, auth: Arc<dyn AuthService>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            auth,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Builds the websocket URL for the realtime endpoint.
    fn build_ws_url(&self) -> String {
        // Convert http(s) to ws(s) if needed
        let base_url = if self.base_url.starts_with("http://") {
            self.base_url.replacen("http://", "ws://", 1)
        } else if self.base_url.starts_with("https://") {
            self.base_url.replacen("https://", "wss://", 1)
        } else if !self.base_url.starts_with("ws://") && !self.base_url.starts_with("wss://") {
            format!("wss://{}", self.base_url)
        } else {
            self.base_url.clone()
        };

        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn={}",
            base_url,
            urlencoding::encode(&self.anon_key),
            PROTOCOL_VERSION
        )
    }
}

#[async_trait]
impl ChangeFeed for RealtimeClient {
    async fn open(&self, spec: FeedSpec) -> Result<FeedHandle, ServiceError> {
        let connector = Connector {
            url: self.build_ws_url(),
            topic: topic_for(&spec),
            spec,
            auth: Arc::clone(&self.auth),
        };
        let channel = connector.connect().await?;
        tracing::info!(topic = %connector.topic, "Subscribed");

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let (close_tx, close_rx) = oneshot::channel();
        let auth_events = Some(self.auth.subscribe());
        tokio::spawn(run_channel(
            connector,
            channel,
            tx,
            close_rx,
            auth_events,
            self.reconnect.clone(),
        ));

        Ok(FeedHandle::new(rx, close_tx))
    }
}

/// Everything needed to (re)establish one subscription.
struct Connector {
    url: String,
    topic: String,
    spec: FeedSpec,
    auth: Arc<dyn AuthService>,
}

impl Connector {
    async fn connect(&self) -> Result<Channel, RealtimeError> {
        let session = self.auth.session().await.ok_or(RealtimeError::NotSignedIn)?;

        // The URL carries the api key, keep it out of error messages
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RealtimeError::ConnectionError(redact(&e.to_string())))?;
        let (sink, stream) = socket.split();

        let mut channel = Channel {
            sink,
            stream,
            topic: self.topic.clone(),
            next_ref: 0,
        };
        channel.join(&self.spec, &session.access_token).await?;
        tracing::debug!(topic = %self.topic, "Joined channel");
        Ok(channel)
    }
}

struct Channel {
    sink: SplitSink<Socket, Message>,
    stream: SplitStream<Socket>,
    topic: String,
    next_ref: u64,
}

impl Channel {
    fn next_ref(&mut self) -> u64 {
        self.next_ref += 1;
        self.next_ref
    }

    async fn send(&mut self, message: ChannelMessage) -> Result<(), RealtimeError> {
        self.sink
            .send(Message::Text(message.to_text().into()))
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }

    async fn join(&mut self, spec: &FeedSpec, access_token: &str) -> Result<(), RealtimeError> {
        let reference = self.next_ref();
        let message = ChannelMessage::join(&self.topic, spec, access_token, reference);
        self.send(message).await?;

        let expected = reference.to_string();
        let topic = self.topic.clone();
        let sink = &mut self.sink;
        let stream = &mut self.stream;

        // Wait for the join reply with timeout
        let reply = timeout(JOIN_TIMEOUT, async {
            while let Some(frame) = stream.next().await {
                let frame = frame.map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
                match frame {
                    Message::Text(text) => {
                        let Some(message) = ChannelMessage::parse(text.as_str()) else {
                            continue;
                        };
                        if message.topic != topic {
                            continue;
                        }
                        if let Incoming::Reply {
                            reference: Some(r),
                            ok,
                            reason,
                        } = Incoming::classify(&message)
                        {
                            if r != expected {
                                continue;
                            }
                            return if ok {
                                Ok(())
                            } else {
                                Err(RealtimeError::JoinRejected(
                                    reason.unwrap_or_else(|| "join refused".to_string()),
                                ))
                            };
                        }
                    }
                    Message::Ping(data) => {
                        sink.send(Message::Pong(data))
                            .await
                            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))?;
                    }
                    Message::Close(_) => return Err(RealtimeError::ConnectionClosed),
                    _ => {}
                }
            }
            Err::<(), _>(RealtimeError::ConnectionClosed)
        })
        .await;

        reply.map_err(|_| RealtimeError::JoinTimeout)?
    }

    /// Leave the channel and close the socket. Errors are ignored.
    async fn leave(mut self) {
        let reference = self.next_ref();
        let message = ChannelMessage::leave(&self.topic, reference);
        let _ = self.send(message).await;
        let _ = self.sink.send(Message::Close(None)).await;
        tracing::debug!(topic = %self.topic, "Left channel");
    }
}

/// Why [`pump`] returned.
enum Ended {
    /// The consumer closed the feed
    Closed,
    /// The connection failed
    Lost(String),
}

async fn run_channel(
    connector: Connector,
    mut channel: Channel,
    tx: mpsc::Sender<FeedMessage>,
    mut close_rx: oneshot::Receiver<()>,
    mut auth_events: Option<broadcast::Receiver<AuthEvent>>,
    policy: ReconnectPolicy,
) {
    loop {
        match pump(&mut channel, &tx, &mut close_rx, &mut auth_events, &connector).await {
            Ended::Closed => {
                channel.leave().await;
                return;
            }
            Ended::Lost(reason) => {
                tracing::warn!(topic = %connector.topic, "Connection lost: {}", reason);
                if tx.send(FeedMessage::Disconnected(reason)).await.is_err() || !policy.enabled {
                    return;
                }
                match reconnect(&connector, &policy, &mut close_rx).await {
                    Some(new_channel) => {
                        channel = new_channel;
                        if tx.send(FeedMessage::Reconnected).await.is_err() {
                            channel.leave().await;
                            return;
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

/// Forward changes until the consumer closes the feed or the socket fails.
async fn pump(
    channel: &mut Channel,
    tx: &mpsc::Sender<FeedMessage>,
    close_rx: &mut oneshot::Receiver<()>,
    auth_events: &mut Option<broadcast::Receiver<AuthEvent>>,
    connector: &Connector,
) -> Ended {
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = &mut *close_rx => return Ended::Closed,
            _ = heartbeat.tick() => {
                let reference = channel.next_ref();
                if let Err(e) = channel.send(ChannelMessage::heartbeat(reference)).await {
                    return Ended::Lost(e.to_string());
                }
            }
            _ = token_refreshed(auth_events) => {
                // Keep the channel authorized past the old token's expiry
                if let Some(session) = connector.auth.session().await {
                    let reference = channel.next_ref();
                    let message =
                        ChannelMessage::access_token(&channel.topic, &session.access_token, reference);
                    if let Err(e) = channel.send(message).await {
                        return Ended::Lost(e.to_string());
                    }
                }
            }
            frame = channel.stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Some(message) = ChannelMessage::parse(text.as_str()) else {
                        tracing::debug!("Ignoring unparseable frame");
                        continue;
                    };
                    if message.topic != channel.topic {
                        continue;
                    }
                    match Incoming::classify(&message) {
                        Incoming::Change(change) => {
                            if tx.send(FeedMessage::Change(change)).await.is_err() {
                                return Ended::Closed;
                            }
                        }
                        Incoming::ChannelClosed(reason) => return Ended::Lost(reason),
                        Incoming::Reply { .. } | Incoming::Other => {}
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = channel.sink.send(Message::Pong(data)).await {
                        return Ended::Lost(e.to_string());
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    return Ended::Lost("server closed the connection".to_string());
                }
                Some(Ok(_)) => {
                    // Ignore other message types
                }
                Some(Err(e)) => return Ended::Lost(e.to_string()),
                None => return Ended::Lost("connection closed".to_string()),
            },
        }
    }
}

/// Resolves on the next token refresh. Never resolves once the auth event
/// channel is gone.
async fn token_refreshed(events: &mut Option<broadcast::Receiver<AuthEvent>>) {
    loop {
        let Some(rx) = events.as_mut() else {
            return std::future::pending().await;
        };
        match rx.recv().await {
            Ok(AuthEvent::TokenRefreshed) => return,
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => *events = None,
        }
    }
}

/// Retry with backoff until connected, closed by the consumer, or out of
/// attempts.
async fn reconnect(
    connector: &Connector,
    policy: &ReconnectPolicy,
    close_rx: &mut oneshot::Receiver<()>,
) -> Option<Channel> {
    let mut attempt = 0;
    loop {
        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            tracing::warn!(topic = %connector.topic, attempts = attempt, "Giving up on reconnect");
            return None;
        }
        let delay = policy.delay(attempt);
        tokio::select! {
            _ = &mut *close_rx => return None,
            _ = sleep(delay) => {}
        }
        attempt += 1;

        match connector.connect().await {
            Ok(channel) => {
                tracing::info!(topic = %connector.topic, attempt, "Reconnected");
                return Some(channel);
            }
            Err(e) => {
                tracing::warn!(topic = %connector.topic, attempt, "Reconnect failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAuth;

    fn client(url: &str) -> RealtimeClient {
        RealtimeClient::new(url, "anon key", Arc::new(FakeAuth::signed_in("u1")))
    }

    #[test]
    fn test_build_ws_url_with_https() {
        assert_eq!(
            client("https://project.example.co").build_ws_url(),
            "wss://project.example.co/realtime/v1/websocket?apikey=anon%20key&vsn=1.0.0"
        );
    }

    #[test]
    fn test_build_ws_url_with_http() {
        assert_eq!(
            client("http://localhost:54321/").build_ws_url(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=anon%20key&vsn=1.0.0"
        );
    }

    #[test]
    fn test_build_ws_url_bare_host() {
        assert_eq!(
            client("project.example.co").build_ws_url(),
            "wss://project.example.co/realtime/v1/websocket?apikey=anon%20key&vsn=1.0.0"
        );
    }

    #[tokio::test]
    async fn test_open_without_session_fails() {
        let client = RealtimeClient::new(
            "http://localhost:1",
            "anon",
            Arc::new(FakeAuth::signed_out()),
        );
        let err = client
            .open(FeedSpec::new("pets", crate::feed::EventFilter::All, None))
            .await
            .unwrap_err();
        assert_eq!(err.message, "Not signed in");
    }

    #[tokio::test]
    async fn test_token_refreshed_waits_for_refresh() {
        let (tx, rx) = broadcast::channel(4);
        let mut events = Some(rx);
        tx.send(AuthEvent::SignedOut).unwrap();
        tx.send(AuthEvent::TokenRefreshed).unwrap();
        timeout(Duration::from_secs(1), token_refreshed(&mut events))
            .await
            .unwrap();

        drop(tx);
        let pending = timeout(Duration::from_millis(20), token_refreshed(&mut events)).await;
        assert!(pending.is_err());
        assert!(events.is_none());
    }
}
