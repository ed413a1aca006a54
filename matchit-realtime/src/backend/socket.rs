//! Realtime channel over the hosted platform's websocket (Phoenix v1 JSON
//! framing).
//!
//! Every subscription owns one connection joined to `realtime:chat:<id>`.
//! It receives the conversation's `messages` inserts and `typing`
//! broadcasts. Typing signals go out through the joined connection of the
//! same conversation; with nothing joined, [`RealtimeChannel::broadcast`]
//! reports the channel as unavailable.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use shared::{
    config::ClientConfig,
    models::{ChannelEvent, Message},
};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, protocol::Message as WsMessage},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use url::Url;
use uuid::Uuid;

use super::{RealtimeChannel, RealtimeEvent, Subscription};
use crate::error::{BackendError, BackendResult};

const SOCKET_PATH: &str = "realtime/v1/websocket";
const PROTOCOL_VERSION: &str = "1.0.0";
const JOIN_REF: &str = "1";
const HEARTBEAT: Duration = Duration::from_secs(25);
const EVENT_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 16;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Incoming Phoenix frame.
#[derive(Debug, Deserialize)]
struct Envelope {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: Change,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Value,
}

/// What an incoming frame means to a joined channel.
#[derive(Debug, PartialEq)]
enum Frame {
    Event(RealtimeEvent),
    Reply {
        reference: Option<String>,
        status: String,
        response: Value,
    },
    Closed(String),
    Ignored,
}

fn topic(conversation_id: Uuid) -> String {
    format!("realtime:chat:{conversation_id}")
}

fn socket_url(base: &Url, api_key: &str) -> BackendResult<Url> {
    let mut url = base.join(SOCKET_PATH)?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme).map_err(|()| {
        BackendError::Unavailable(format!("no websocket scheme for {base}"))
    })?;
    url.query_pairs_mut()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

fn socket_error(err: &WsError) -> BackendError {
    BackendError::Unavailable(format!("realtime socket: {err}"))
}

fn channel_frame(topic: &str, event: &str, payload: Value, reference: &str) -> WsMessage {
    let frame = json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": reference,
        "join_ref": JOIN_REF,
    });
    WsMessage::Text(frame.to_string().into())
}

fn heartbeat_frame(reference: &str) -> WsMessage {
    let frame = json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference,
    });
    WsMessage::Text(frame.to_string().into())
}

fn join_payload(conversation_id: Uuid, access_token: &str) -> Value {
    json!({
        "config": {
            "broadcast": { "self": false, "ack": false },
            "presence": { "key": "" },
            "postgres_changes": [{
                "event": "INSERT",
                "schema": "public",
                "table": "messages",
                "filter": format!("chat_id=eq.{conversation_id}"),
            }],
        },
        "access_token": access_token,
    })
}

fn broadcast_payload(event: &ChannelEvent) -> BackendResult<Value> {
    let mut payload = serde_json::to_value(event)?;
    if let Value::Object(fields) = &mut payload {
        fields.insert("type".to_string(), Value::from("broadcast"));
    }
    Ok(payload)
}

fn decode_frame(text: &str, topic: &str) -> Frame {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(error = %err, "unreadable realtime frame");
            return Frame::Ignored;
        }
    };
    if envelope.topic != topic {
        return Frame::Ignored;
    }

    match envelope.event.as_str() {
        "postgres_changes" => decode_change(envelope.payload),
        "broadcast" => decode_broadcast(envelope.payload),
        "phx_reply" => Frame::Reply {
            reference: envelope.reference,
            status: envelope.payload["status"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            response: envelope.payload["response"].clone(),
        },
        "phx_close" | "phx_error" => Frame::Closed(envelope.event),
        _ => Frame::Ignored,
    }
}

fn decode_change(payload: Value) -> Frame {
    let change = match serde_json::from_value::<ChangePayload>(payload) {
        Ok(change) => change.data,
        Err(err) => {
            debug!(error = %err, "unreadable change payload");
            return Frame::Ignored;
        }
    };
    if change.kind != "INSERT" {
        return Frame::Ignored;
    }
    match serde_json::from_value::<Message>(change.record) {
        Ok(message) => Frame::Event(RealtimeEvent::Inserted(message)),
        Err(err) => {
            warn!(error = %err, "malformed inserted row");
            Frame::Ignored
        }
    }
}

fn decode_broadcast(mut payload: Value) -> Frame {
    if let Value::Object(fields) = &mut payload {
        fields.remove("type");
    }
    match serde_json::from_value::<ChannelEvent>(payload) {
        Ok(event) => Frame::Event(RealtimeEvent::Broadcast(event)),
        Err(err) => {
            debug!(error = %err, "ignoring unknown broadcast");
            Frame::Ignored
        }
    }
}

/// Outbound half of a joined channel.
#[derive(Debug)]
struct Link {
    id: Uuid,
    conversation_id: Uuid,
    outbound: mpsc::Sender<Value>,
}

fn lock(links: &Mutex<Vec<Link>>) -> MutexGuard<'_, Vec<Link>> {
    links.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`RealtimeChannel`] backed by the platform's realtime websocket.
#[derive(Clone)]
pub struct RealtimeSocket {
    endpoint: Url,
    access_token: String,
    join_timeout: Duration,
    links: Arc<Mutex<Vec<Link>>>,
}

impl fmt::Debug for RealtimeSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeSocket")
            .field("host", &self.endpoint.host_str())
            .field("joined", &lock(&self.links).len())
            .finish_non_exhaustive()
    }
}

impl RealtimeSocket {
    /// Derives the websocket endpoint from the backend URL: `http` becomes
    /// `ws`, `https` becomes `wss`. The access token, or the API key when
    /// there is none, authorizes each join.
    ///
    /// # Errors
    /// Fails when the backend URL is invalid.
    pub fn from_config(config: &ClientConfig) -> BackendResult<Self> {
        Ok(Self {
            endpoint: socket_url(&config.backend_base_url()?, &config.api_key)?,
            access_token: config
                .access_token
                .clone()
                .unwrap_or_else(|| config.api_key.clone()),
            join_timeout: config.realtime.request_timeout(),
            links: Arc::default(),
        })
    }
}

#[async_trait]
impl RealtimeChannel for RealtimeSocket {
    #[instrument(name = "socket.subscribe", skip(self), err)]
    async fn subscribe(&self, conversation_id: Uuid) -> BackendResult<Box<dyn Subscription>> {
        let topic = topic(conversation_id);
        let (mut socket, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|err| socket_error(&err))?;
        socket
            .send(channel_frame(
                &topic,
                "phx_join",
                join_payload(conversation_id, &self.access_token),
                JOIN_REF,
            ))
            .await
            .map_err(|err| socket_error(&err))?;
        timeout(self.join_timeout, await_join(&mut socket, &topic))
            .await
            .map_err(|_| BackendError::Unavailable(format!("join of {topic} timed out")))??;

        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (outbound_tx, outbound) = mpsc::channel(OUTBOUND_BUFFER);
        let shutdown = CancellationToken::new();
        let link_id = Uuid::new_v4();
        lock(&self.links).push(Link {
            id: link_id,
            conversation_id,
            outbound: outbound_tx,
        });
        tokio::spawn(drive(socket, topic, outbound, events_tx, shutdown.clone()));
        debug!("realtime channel joined");

        Ok(Box::new(SocketSubscription {
            events,
            shutdown,
            link_id,
            links: Arc::clone(&self.links),
        }))
    }

    async fn broadcast(&self, conversation_id: Uuid, event: ChannelEvent) -> BackendResult<()> {
        let outbound = lock(&self.links)
            .iter()
            .find(|link| link.conversation_id == conversation_id)
            .map(|link| link.outbound.clone())
            .ok_or_else(|| {
                BackendError::Unavailable(format!("no realtime channel joined for {conversation_id}"))
            })?;
        outbound
            .send(broadcast_payload(&event)?)
            .await
            .map_err(|_| BackendError::Unavailable("realtime channel closed".to_string()))
    }
}

async fn await_join(socket: &mut Socket, topic: &str) -> BackendResult<()> {
    while let Some(frame) = socket.next().await {
        let WsMessage::Text(text) = frame.map_err(|err| socket_error(&err))? else {
            continue;
        };
        if let Frame::Reply {
            reference,
            status,
            response,
        } = decode_frame(text.as_str(), topic)
            && reference.as_deref() == Some(JOIN_REF)
        {
            return if status == "ok" {
                Ok(())
            } else {
                Err(BackendError::Unavailable(format!(
                    "join of {topic} refused: {response}"
                )))
            };
        }
    }
    Err(BackendError::Unavailable(format!(
        "realtime socket closed while joining {topic}"
    )))
}

/// Pumps one joined connection until the subscription is closed or the
/// server goes away. Ending drops `events`, which ends the subscription.
async fn drive(
    mut socket: Socket,
    topic: String,
    mut outbound: mpsc::Receiver<Value>,
    events: mpsc::Sender<RealtimeEvent>,
    shutdown: CancellationToken,
) {
    let mut heartbeat = interval_at(Instant::now() + HEARTBEAT, HEARTBEAT);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: u64 = 1;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                sequence += 1;
                let leave = channel_frame(&topic, "phx_leave", json!({}), &sequence.to_string());
                if let Err(err) = socket.send(leave).await {
                    trace!(%topic, error = %err, "leave not delivered");
                }
                if let Err(err) = socket.close(None).await {
                    trace!(%topic, error = %err, "close handshake failed");
                }
                break;
            }
            frame = socket.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match decode_frame(text.as_str(), &topic) {
                    Frame::Event(event) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Frame::Closed(reason) => {
                        warn!(%topic, %reason, "realtime channel closed by the server");
                        break;
                    }
                    Frame::Reply { .. } | Frame::Ignored => {}
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(%topic, "realtime socket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(%topic, error = %err, "realtime socket failed");
                    break;
                }
            },
            Some(payload) = outbound.recv() => {
                sequence += 1;
                let frame = channel_frame(&topic, "broadcast", payload, &sequence.to_string());
                if let Err(err) = socket.send(frame).await {
                    warn!(%topic, error = %err, "broadcast not delivered");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                sequence += 1;
                if let Err(err) = socket.send(heartbeat_frame(&sequence.to_string())).await {
                    warn!(%topic, error = %err, "heartbeat not delivered");
                    break;
                }
            }
        }
    }
    trace!(%topic, "realtime driver stopped");
}

struct SocketSubscription {
    events: mpsc::Receiver<RealtimeEvent>,
    shutdown: CancellationToken,
    link_id: Uuid,
    links: Arc<Mutex<Vec<Link>>>,
}

#[async_trait]
impl Subscription for SocketSubscription {
    async fn next_event(&mut self) -> Option<RealtimeEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.events.close();
        lock(&self.links).retain(|link| link.id != self.link_id);
    }
}

impl Drop for SocketSubscription {
    fn drop(&mut self) {
        self.close();
    }
}
