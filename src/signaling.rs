//! Client side of the signaling channel: a Socket.IO (Engine.IO v4)
//! connection over WebSocket carrying named JSON events.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CallError, Result};
use crate::peer::types::{IceCandidate, SessionDescription};

const RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Used until the server's handshake announces its own ping interval.
const DEFAULT_PING_WINDOW: Duration = Duration::from_secs(45);

/// Messages this client sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundSignal {
    UserLogin {
        username: String,
    },
    JoinCall {
        username: String,
    },
    LeaveCall {
        username: String,
        room_id: String,
    },
    #[serde(rename = "webrtc_offer")]
    Offer {
        username: String,
        offer: SessionDescription,
        room_id: String,
    },
    #[serde(rename = "webrtc_answer")]
    Answer {
        username: String,
        answer: SessionDescription,
        room_id: String,
    },
    #[serde(rename = "webrtc_ice_candidate")]
    IceCandidate {
        username: String,
        candidate: IceCandidate,
        room_id: String,
    },
}

impl OutboundSignal {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundSignal::UserLogin { .. } => "user_login",
            OutboundSignal::JoinCall { .. } => "join_call",
            OutboundSignal::LeaveCall { .. } => "leave_call",
            OutboundSignal::Offer { .. } => "webrtc_offer",
            OutboundSignal::Answer { .. } => "webrtc_answer",
            OutboundSignal::IceCandidate { .. } => "webrtc_ice_candidate",
        }
    }
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundSignal {
    LoginSuccess(Value),
    UserOnline {
        username: String,
    },
    CallWaiting {
        #[serde(default)]
        is_initiator: Option<bool>,
    },
    CallStarted {
        #[serde(default)]
        is_initiator: Option<bool>,
    },
    UserLeftCall {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "webrtc_offer")]
    Offer {
        #[serde(default)]
        username: Option<String>,
        offer: SessionDescription,
    },
    #[serde(rename = "webrtc_answer")]
    Answer {
        #[serde(default)]
        username: Option<String>,
        answer: SessionDescription,
    },
    #[serde(rename = "webrtc_ice_candidate")]
    IceCandidate {
        #[serde(default)]
        username: Option<String>,
        candidate: IceCandidate,
    },
    Error(Value),
}

const INBOUND_EVENTS: [&str; 9] = [
    "login_success",
    "user_online",
    "call_waiting",
    "call_started",
    "user_left_call",
    "webrtc_offer",
    "webrtc_answer",
    "webrtc_ice_candidate",
    "error",
];

impl InboundSignal {
    /// Sender of a negotiation message, when the server relays it.
    pub fn sender(&self) -> Option<&str> {
        match self {
            InboundSignal::Offer { username, .. }
            | InboundSignal::Answer { username, .. }
            | InboundSignal::IceCandidate { username, .. } => username.as_deref(),
            _ => None,
        }
    }
}

/// Channel lifecycle plus decoded server events.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    /// Reconnection attempts are exhausted.
    Closed,
    Signal(InboundSignal),
}

/// Outbound half of the signaling channel.
pub trait SignalSink: Send + Sync {
    fn emit(&self, message: OutboundSignal) -> Result<()>;
}

// ========== WIRE FORMAT ==========

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

impl Handshake {
    fn ping_window(&self) -> Duration {
        if self.ping_interval == 0 {
            return DEFAULT_PING_WINDOW;
        }
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

/// One Engine.IO text frame, with the Socket.IO packet it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(String),
    Close,
    Ping,
    Pong,
    Noop,
    Connect,
    Disconnect,
    Event { name: String, data: Value },
    Ack,
    ConnectError(String),
}

pub fn decode_frame(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let engine = chars
        .next()
        .ok_or_else(|| CallError::protocol("empty frame"))?;
    let rest = chars.as_str();
    Ok(match engine {
        '0' => Packet::Open(rest.to_owned()),
        '1' => Packet::Close,
        '2' => Packet::Ping,
        '3' => Packet::Pong,
        '6' => Packet::Noop,
        '4' => decode_socket_packet(rest)?,
        other => return Err(CallError::protocol(format!("unknown engine packet {other}"))),
    })
}

fn decode_socket_packet(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| CallError::protocol("empty socket packet"))?;
    let mut rest = chars.as_str();

    // Optional "/namespace," prefix
    if rest.starts_with('/') {
        rest = rest.split_once(',').map(|(_, r)| r).unwrap_or("");
    }

    Ok(match kind {
        '0' => Packet::Connect,
        '1' => Packet::Disconnect,
        '2' => {
            // Optional ack id before the payload
            let payload = rest.trim_start_matches(|c: char| c.is_ascii_digit());
            let mut items = match serde_json::from_str::<Value>(payload)? {
                Value::Array(items) => items.into_iter(),
                _ => return Err(CallError::protocol("event payload is not an array")),
            };
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => return Err(CallError::protocol("event without a name")),
            };
            Packet::Event {
                name,
                data: items.next().unwrap_or(Value::Null),
            }
        }
        '3' => Packet::Ack,
        '4' => Packet::ConnectError(rest.to_owned()),
        other => {
            return Err(CallError::protocol(format!(
                "unsupported socket packet {other}"
            )))
        }
    })
}

/// `Ok(None)` for events this client doesn't know about.
pub fn decode_event(name: &str, data: Value) -> Result<Option<InboundSignal>> {
    if !INBOUND_EVENTS.contains(&name) {
        return Ok(None);
    }
    let tagged = serde_json::json!({ "event": name, "data": data });
    Ok(Some(serde_json::from_value(tagged)?))
}

pub fn encode_event(message: &OutboundSignal) -> Result<String> {
    let data = match serde_json::to_value(message)? {
        Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
        _ => Value::Null,
    };
    Ok(format!(
        "42{}",
        serde_json::to_string(&(message.event_name(), data))?
    ))
}

/// `https://host` → `wss://host/socket.io/?EIO=4&transport=websocket`
pub fn socket_url(server: &str) -> Result<Url> {
    let mut url = Url::parse(server).map_err(CallError::signaling)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(CallError::signaling(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| CallError::signaling("cannot switch to websocket scheme"))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

// ========== CLIENT ==========

enum Command {
    Emit(OutboundSignal),
    Close,
}

enum SessionEnd {
    ClientClosed,
    Lost,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to the background connection task. Cloning shares the connection.
#[derive(Clone)]
pub struct SignalingClient {
    commands: mpsc::UnboundedSender<Command>,
}

impl SignalSink for SignalingClient {
    fn emit(&self, message: OutboundSignal) -> Result<()> {
        debug!("emit {}", message.event_name());
        self.commands
            .send(Command::Emit(message))
            .map_err(|_| CallError::signaling("signaling connection is gone"))
    }
}

impl SignalingClient {
    /// Spawns the connection task. Lifecycle and server events arrive on the
    /// returned receiver; the task reconnects on its own after a drop.
    pub fn connect(
        server: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>, JoinHandle<()>)> {
        let url = socket_url(server)?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(url, commands_rx, events_tx));
        Ok((
            Self {
                commands: commands_tx,
            },
            events_rx,
            task,
        ))
    }

    /// Sends a Socket.IO disconnect and stops the connection task.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }
}

async fn run(
    url: Url,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut backlog = Vec::new();
    let mut failures = 0;
    loop {
        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                info!("Connected to signaling server {}", url.host_str().unwrap_or(""));
                failures = 0;
                let end = run_session(&mut ws, &mut commands, &events, &mut backlog).await;
                let _ = events.send(ChannelEvent::Disconnected);
                if let SessionEnd::ClientClosed = end {
                    return;
                }
                info!("Disconnected from signaling server");
            }
            Err(e) => warn!("Signaling connection failed: {e}"),
        }

        failures += 1;
        if failures > RECONNECT_ATTEMPTS {
            warn!("Giving up on the signaling server after {RECONNECT_ATTEMPTS} retries");
            let _ = events.send(ChannelEvent::Closed);
            return;
        }
        let retry_at = sleep(RECONNECT_DELAY);
        tokio::pin!(retry_at);
        loop {
            tokio::select! {
                _ = &mut retry_at => break,
                command = commands.recv() => match command {
                    Some(Command::Emit(message)) => backlog.push(message),
                    Some(Command::Close) | None => return,
                },
            }
        }
    }
}

async fn run_session(
    ws: &mut WsStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    backlog: &mut Vec<OutboundSignal>,
) -> SessionEnd {
    let mut connected = false;
    let mut ping_window = DEFAULT_PING_WINDOW;
    let mut ping_deadline = Instant::now() + ping_window;

    loop {
        tokio::select! {
            frame = ws.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("Signaling read error: {e}");
                        return SessionEnd::Lost;
                    }
                };
                debug!("<- {}", text.as_str());
                let packet = match decode_frame(text.as_str()) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Bad signaling frame: {e}");
                        continue;
                    }
                };
                let reply = match packet {
                    Packet::Open(body) => {
                        if let Ok(handshake) = serde_json::from_str::<Handshake>(&body) {
                            debug!("Engine.IO session {}", handshake.sid);
                            ping_window = handshake.ping_window();
                        }
                        ping_deadline = Instant::now() + ping_window;
                        Some("40".to_owned())
                    }
                    Packet::Ping => {
                        ping_deadline = Instant::now() + ping_window;
                        Some("3".to_owned())
                    }
                    Packet::Connect => {
                        connected = true;
                        let _ = events.send(ChannelEvent::Connected);
                        for message in backlog.drain(..) {
                            if send_event(ws, &message).await.is_err() {
                                return SessionEnd::Lost;
                            }
                        }
                        None
                    }
                    Packet::Event { name, data } => {
                        match decode_event(&name, data) {
                            Ok(Some(signal)) => {
                                let _ = events.send(ChannelEvent::Signal(signal));
                            }
                            Ok(None) => debug!("Ignoring event {name}"),
                            Err(e) => warn!("Malformed {name} event: {e}"),
                        }
                        None
                    }
                    Packet::ConnectError(reason) => {
                        warn!("Signaling server refused the connection: {reason}");
                        return SessionEnd::Lost;
                    }
                    Packet::Close | Packet::Disconnect => return SessionEnd::Lost,
                    Packet::Pong | Packet::Noop | Packet::Ack => None,
                };
                if let Some(reply) = reply {
                    if ws.send(Message::Text(reply.into())).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
            }
            command = commands.recv() => match command {
                Some(Command::Emit(message)) => {
                    if !connected {
                        backlog.push(message);
                    } else if send_event(ws, &message).await.is_err() {
                        backlog.push(message);
                        return SessionEnd::Lost;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = ws.send(Message::Text("41".to_owned().into())).await;
                    let _ = ws.close(None).await;
                    return SessionEnd::ClientClosed;
                }
            },
            _ = sleep_until(ping_deadline) => {
                warn!("No ping from the signaling server, reconnecting");
                return SessionEnd::Lost;
            }
        }
    }
}

async fn send_event(ws: &mut WsStream, message: &OutboundSignal) -> Result<()> {
    let frame = encode_event(message)?;
    debug!("-> {frame}");
    ws.send(Message::Text(frame.into()))
        .await
        .map_err(CallError::signaling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_engine_control_frames() {
        assert_eq!(decode_frame("2").unwrap(), Packet::Ping);
        assert_eq!(decode_frame("3").unwrap(), Packet::Pong);
        assert_eq!(decode_frame("40").unwrap(), Packet::Connect);
        assert_eq!(decode_frame("40{\"sid\":\"abc\"}").unwrap(), Packet::Connect);
        assert_eq!(decode_frame("41").unwrap(), Packet::Disconnect);
        assert!(decode_frame("").is_err());
        assert!(decode_frame("9").is_err());
    }

    #[test]
    fn parses_open_handshake() {
        let Packet::Open(body) = decode_frame(
            r#"0{"sid":"x1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap() else {
            panic!("not an open packet");
        };
        let handshake: Handshake = serde_json::from_str(&body).unwrap();
        assert_eq!(handshake.sid, "x1");
        assert_eq!(handshake.ping_window(), Duration::from_secs(45));
    }

    #[test]
    fn decodes_events_with_namespace_and_ack_id() {
        let packet = decode_frame(r#"42/call,7["call_started",{"is_initiator":true}]"#).unwrap();
        let Packet::Event { name, data } = packet else {
            panic!("not an event");
        };
        assert_eq!(name, "call_started");
        assert_eq!(
            decode_event(&name, data).unwrap(),
            Some(InboundSignal::CallStarted {
                is_initiator: Some(true)
            })
        );
    }

    #[test]
    fn decodes_negotiation_messages() {
        let signal = decode_event(
            "webrtc_answer",
            json!({
                "username": "alyona",
                "answer": {"type": "answer", "sdp": "v=0"},
                "room_id": "call_room"
            }),
        )
        .unwrap()
        .unwrap();
        assert_eq!(signal.sender(), Some("alyona"));
        assert_eq!(
            signal,
            InboundSignal::Answer {
                username: Some("alyona".into()),
                answer: SessionDescription::answer("v=0"),
            }
        );
    }

    #[test]
    fn payloadless_events_decode() {
        let Packet::Event { name, data } = decode_frame(r#"42["call_waiting",{}]"#).unwrap() else {
            panic!("not an event");
        };
        assert_eq!(
            decode_event(&name, data).unwrap(),
            Some(InboundSignal::CallWaiting { is_initiator: None })
        );

        let Packet::Event { name, data } = decode_frame(r#"42["login_success"]"#).unwrap() else {
            panic!("not an event");
        };
        assert_eq!(
            decode_event(&name, data).unwrap(),
            Some(InboundSignal::LoginSuccess(Value::Null))
        );
    }

    #[test]
    fn unknown_events_are_skipped() {
        assert_eq!(decode_event("server_stats", json!({"load": 1})).unwrap(), None);
        assert!(decode_event("user_online", json!({"nope": 1})).is_err());
    }

    #[test]
    fn encodes_socket_io_events() {
        let frame = encode_event(&OutboundSignal::LeaveCall {
            username: "kolia".into(),
            room_id: "call_room".into(),
        })
        .unwrap();
        assert!(frame.starts_with(r#"42["leave_call","#));
        let Packet::Event { name, data } = decode_frame(&frame).unwrap() else {
            panic!("not an event");
        };
        assert_eq!(name, "leave_call");
        assert_eq!(data, json!({"username": "kolia", "room_id": "call_room"}));

        let frame = encode_event(&OutboundSignal::Offer {
            username: "alyona".into(),
            offer: SessionDescription::offer("v=0"),
            room_id: "call_room".into(),
        })
        .unwrap();
        let Packet::Event { name, data } = decode_frame(&frame).unwrap() else {
            panic!("not an event");
        };
        assert_eq!(name, "webrtc_offer");
        assert_eq!(data["offer"], json!({"type": "offer", "sdp": "v=0"}));
    }

    #[test]
    fn builds_socket_url() {
        assert_eq!(
            socket_url("https://example.net").unwrap().as_str(),
            "wss://example.net/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_url("http://localhost:5000").unwrap().as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        assert!(socket_url("ftp://example.net").is_err());
    }
}
