//! Realtime Channel - row-change notifications from the hosted backend
//!
//! Joins a Phoenix channel on the backend's realtime websocket, scoped to one
//! table and an optional filter predicate, and republishes decoded change
//! events on a broadcast channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    constants::REALTIME_HEARTBEAT_SECS, errors::StoryTrackError,
    providers::backend::query::Query,
};

/// The kind of row change carried by an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A decoded row-change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub record: Value,
    pub old_record: Value,
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Decodes the new row (the old one for deletes) into a model.
    pub fn decode_record<T: DeserializeOwned>(&self) -> Result<T, StoryTrackError> {
        let row = match self.kind {
            ChangeKind::Delete => self.old_record.clone(),
            _ => self.record.clone(),
        };
        Ok(serde_json::from_value(row)?)
    }

    /// Re-checks the event against a query, for predicates the channel could not express.
    pub fn matches(&self, query: &Query) -> bool {
        match self.kind {
            ChangeKind::Delete => query.matches(&self.old_record),
            _ => query.matches(&self.record),
        }
    }
}

#[derive(Deserialize, Debug)]
struct ChangePayload {
    #[serde(rename = "type")]
    kind: ChangeKind,
    table: String,
    #[serde(default)]
    record: Value,
    #[serde(default)]
    old_record: Value,
    #[serde(default)]
    commit_timestamp: Option<String>,
}

impl From<ChangePayload> for ChangeEvent {
    fn from(p: ChangePayload) -> Self {
        Self {
            kind: p.kind,
            table: p.table,
            record: p.record,
            old_record: p.old_record,
            commit_timestamp: p.commit_timestamp,
        }
    }
}

/// What a channel listens to.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    /// Channel name; the topic becomes `realtime:{name}`.
    pub name: String,
    pub table: String,
    /// `*`, `INSERT`, `UPDATE` or `DELETE`.
    pub event: String,
    /// Predicate such as `book_id=eq.42`.
    pub filter: Option<String>,
}

impl ChannelSpec {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            event: "*".to_string(),
            filter: None,
        }
    }

    pub fn event(mut self, event: &str) -> Self {
        self.event = event.to_string();
        self
    }

    pub fn filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn topic(&self) -> String {
        format!("realtime:{}", self.name)
    }
}

/// Realtime connection settings.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Project URL, `http(s)://` or `ws(s)://`.
    pub url: String,
    pub api_key: String,
    pub access_token: Option<String>,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    /// Maximum reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,
}

impl RealtimeConfig {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self {
            url: url.to_string(),
            api_key: api_key.to_string(),
            access_token: None,
            heartbeat_interval: Duration::from_secs(REALTIME_HEARTBEAT_SECS),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: 5,
        }
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token;
        self
    }

    /// The websocket endpoint, e.g. `wss://x.example.co/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
    pub fn socket_url(&self) -> Result<String, StoryTrackError> {
        let base = self.url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        let mut url = Url::parse(&format!("{base}/realtime/v1/websocket"))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url.to_string())
    }
}

// --- Message Framing ---

pub fn encode_join(spec: &ChannelSpec, access_token: Option<&str>, msg_ref: u64) -> String {
    let mut change = json!({
        "event": spec.event,
        "schema": "public",
        "table": spec.table,
    });
    if let Some(filter) = &spec.filter {
        change["filter"] = json!(filter);
    }
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [change],
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }
    json!({
        "topic": spec.topic(),
        "event": "phx_join",
        "payload": payload,
        "ref": msg_ref.to_string(),
        "join_ref": msg_ref.to_string(),
    })
    .to_string()
}

pub fn encode_heartbeat(msg_ref: u64) -> String {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
    .to_string()
}

pub fn encode_leave(spec: &ChannelSpec, msg_ref: u64) -> String {
    json!({
        "topic": spec.topic(),
        "event": "phx_leave",
        "payload": {},
        "ref": msg_ref.to_string(),
    })
    .to_string()
}

/// Decodes one socket frame. Frames that are not row changes yield `Ok(None)`;
/// a rejected join yields an error.
pub fn decode_change(text: &str) -> Result<Option<ChangeEvent>, StoryTrackError> {
    let frame: Value = serde_json::from_str(text)?;
    let event = frame.get("event").and_then(Value::as_str).unwrap_or_default();
    let payload = frame.get("payload").cloned().unwrap_or(Value::Null);

    match event {
        "postgres_changes" => {
            let data = payload.get("data").cloned().unwrap_or(Value::Null);
            let change: ChangePayload = serde_json::from_value(data)?;
            Ok(Some(change.into()))
        }
        // Older servers send the change type as the event name.
        "INSERT" | "UPDATE" | "DELETE" => {
            let change: ChangePayload = serde_json::from_value(payload)?;
            Ok(Some(change.into()))
        }
        "phx_reply" => {
            if payload.get("status").and_then(Value::as_str) == Some("error") {
                let reason = payload
                    .get("response")
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                return Err(StoryTrackError::Realtime(format!("join rejected: {reason}")));
            }
            Ok(None)
        }
        "phx_error" => Err(StoryTrackError::Realtime("channel crashed".to_string())),
        _ => Ok(None),
    }
}

// --- Channel ---

/// How a connection ended.
enum ConnectionEnd {
    Shutdown,
    Closed,
}

/// Opens realtime subscriptions.
pub struct RealtimeChannel;

impl RealtimeChannel {
    /// Spawns a background task that keeps the channel joined until
    /// [`Subscription::unsubscribe`] is called or reconnection gives up.
    pub fn subscribe(
        config: RealtimeConfig,
        spec: ChannelSpec,
    ) -> Result<Subscription, StoryTrackError> {
        let socket_url = config.socket_url()?;
        let (event_tx, event_rx) = broadcast::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // The task holds the only sender, so receivers close when it stops.
        let handle = tokio::spawn(run(socket_url, config, spec, event_tx, shutdown_rx));

        Ok(Subscription {
            events: event_rx,
            shutdown_tx,
            handle,
        })
    }
}

/// A live subscription. Dropping it also stops the background task.
pub struct Subscription {
    events: broadcast::Receiver<ChangeEvent>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Waits for the next change. Returns `None` once the channel has stopped.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Realtime receiver lagged, dropping events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// An additional receiver for the same stream.
    pub fn receiver(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.resubscribe()
    }

    /// Leaves the channel and waits for the background task to finish.
    pub async fn unsubscribe(self) {
        if self.shutdown_tx.send(true).is_err() {
            debug!("Realtime task already stopped");
        }
        if let Err(e) = self.handle.await {
            debug!("Realtime task ended abnormally: {}", e);
        }
    }
}

async fn run(
    socket_url: String,
    config: RealtimeConfig,
    spec: ChannelSpec,
    events: broadcast::Sender<ChangeEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut reconnect_attempts = 0u32;

    loop {
        info!(topic = %spec.topic(), "Connecting to realtime");
        match connect_and_listen(&socket_url, &config, &spec, &events, &mut shutdown_rx).await {
            Ok(ConnectionEnd::Shutdown) => break,
            Ok(ConnectionEnd::Closed) => {
                reconnect_attempts = 0;
            }
            Err(e) => {
                error!("Realtime connection error: {}", e);
                reconnect_attempts += 1;
                if config.max_reconnect_attempts > 0
                    && reconnect_attempts >= config.max_reconnect_attempts
                {
                    error!(
                        "Max reconnection attempts ({}) reached, stopping realtime channel",
                        config.max_reconnect_attempts
                    );
                    break;
                }
            }
        }

        info!(
            "Reconnecting in {:?} (attempt {})",
            config.reconnect_delay, reconnect_attempts
        );
        tokio::select! {
            _ = sleep(config.reconnect_delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    info!(topic = %spec.topic(), "Realtime channel stopped");
}

async fn connect_and_listen(
    socket_url: &str,
    config: &RealtimeConfig,
    spec: &ChannelSpec,
    events: &broadcast::Sender<ChangeEvent>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<ConnectionEnd, StoryTrackError> {
    let (ws_stream, _) = tokio::select! {
        connected = connect_async(socket_url) => connected
            .map_err(|e| StoryTrackError::Realtime(format!("websocket connect failed: {e}")))?,
        _ = shutdown_rx.changed() => return Ok(ConnectionEnd::Shutdown),
    };
    let (mut write, mut read) = ws_stream.split();

    let mut msg_ref = 1u64;
    write
        .send(Message::Text(encode_join(
            spec,
            config.access_token.as_deref(),
            msg_ref,
        )))
        .await
        .map_err(|e| StoryTrackError::Realtime(format!("join failed: {e}")))?;

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                msg_ref += 1;
                let _ = write.send(Message::Text(encode_leave(spec, msg_ref))).await;
                let _ = write.close().await;
                return Ok(ConnectionEnd::Shutdown);
            }

            _ = heartbeat.tick() => {
                msg_ref += 1;
                write
                    .send(Message::Text(encode_heartbeat(msg_ref)))
                    .await
                    .map_err(|e| StoryTrackError::Realtime(format!("heartbeat failed: {e}")))?;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_change(&text)? {
                            debug!(table = %event.table, kind = ?event.kind, "Realtime change received");
                            // No receivers is fine; the change is simply dropped.
                            let _ = events.send(event);
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Realtime server closed connection");
                        return Ok(ConnectionEnd::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(StoryTrackError::Realtime(format!("websocket error: {e}")));
                    }
                    None => {
                        return Err(StoryTrackError::Realtime("websocket stream ended".to_string()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(3);

    fn unreachable_config(max_reconnect_attempts: u32) -> RealtimeConfig {
        let mut config = RealtimeConfig::new("http://127.0.0.1:1", "anon");
        config.reconnect_delay = Duration::from_millis(20);
        config.max_reconnect_attempts = max_reconnect_attempts;
        config
    }

    #[test]
    fn test_socket_url_switches_scheme() {
        let config = RealtimeConfig::new("https://abc.example.co/", "anon");
        assert_eq!(
            config.socket_url().unwrap(),
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn test_encode_join_carries_filter_and_token() {
        let spec = ChannelSpec::new("comments-42", "comments").filter("book_id=eq.42".to_string());
        let frame: Value = serde_json::from_str(&encode_join(&spec, Some("jwt"), 1)).unwrap();

        assert_eq!(frame["topic"], "realtime:comments-42");
        assert_eq!(frame["event"], "phx_join");
        let change = &frame["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "comments");
        assert_eq!(change["filter"], "book_id=eq.42");
        assert_eq!(frame["payload"]["access_token"], "jwt");
    }

    #[test]
    fn test_decode_postgres_change() {
        let frame = json!({
            "topic": "realtime:comments-42",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "INSERT",
                    "table": "comments",
                    "schema": "public",
                    "commit_timestamp": "2024-05-01T10:00:00Z",
                    "record": {"user_id": "u1", "book_id": "42", "content": "Loved it"},
                    "old_record": null
                }
            },
            "ref": null
        });
        let event = decode_change(&frame.to_string()).unwrap().unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.table, "comments");
        assert!(event.matches(&Query::new().eq("book_id", "42")));
        assert!(!event.matches(&Query::new().eq("book_id", "7")));
    }

    #[test]
    fn test_decode_ignores_replies_and_rejects_errors() {
        let ok = json!({"event": "phx_reply", "payload": {"status": "ok", "response": {}}});
        assert!(decode_change(&ok.to_string()).unwrap().is_none());

        let rejected = json!({"event": "phx_reply", "payload": {"status": "error", "response": {"reason": "unauthorized"}}});
        assert!(matches!(
            decode_change(&rejected.to_string()),
            Err(StoryTrackError::Realtime(_))
        ));
    }

    #[tokio::test]
    async fn test_recv_ends_when_reconnects_give_up() {
        let mut sub =
            RealtimeChannel::subscribe(unreachable_config(1), ChannelSpec::new("books", "books"))
                .unwrap();
        let mut extra = sub.receiver();

        let next = timeout(WAIT, sub.recv())
            .await
            .expect("recv should return once the channel stops");
        assert!(next.is_none());
        assert!(matches!(
            extra.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_immediately_stops_the_task() {
        let sub =
            RealtimeChannel::subscribe(unreachable_config(0), ChannelSpec::new("books", "books"))
                .unwrap();

        assert!(timeout(WAIT, sub.unsubscribe()).await.is_ok());
    }

    #[tokio::test]
    async fn test_joins_forwards_changes_and_leaves() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut frames: Vec<Value> = Vec::new();

            let join = ws.next().await.unwrap().unwrap();
            frames.push(serde_json::from_str(join.to_text().unwrap()).unwrap());

            let change = json!({
                "topic": "realtime:comments-42",
                "event": "postgres_changes",
                "payload": {"data": {
                    "type": "INSERT",
                    "table": "comments",
                    "record": {"user_id": "u1", "book_id": "42", "content": "Loved it"},
                    "old_record": null
                }},
                "ref": null
            });
            ws.send(Message::Text(change.to_string())).await.unwrap();

            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    let leaving = frame["event"] == "phx_leave";
                    frames.push(frame);
                    if leaving {
                        break;
                    }
                }
            }
            frames
        });

        let config = RealtimeConfig::new(&format!("http://{addr}"), "anon")
            .with_access_token(Some("jwt".to_string()));
        let spec = ChannelSpec::new("comments-42", "comments").filter("book_id=eq.42".to_string());
        let mut sub = RealtimeChannel::subscribe(config, spec).unwrap();

        let event = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record["content"], "Loved it");

        timeout(WAIT, sub.unsubscribe()).await.unwrap();
        let frames = timeout(WAIT, server).await.unwrap().unwrap();

        assert_eq!(frames[0]["event"], "phx_join");
        assert_eq!(frames[0]["payload"]["access_token"], "jwt");
        assert_eq!(
            frames[0]["payload"]["config"]["postgres_changes"][0]["filter"],
            "book_id=eq.42"
        );
        assert_eq!(frames.last().unwrap()["event"], "phx_leave");
    }
}
