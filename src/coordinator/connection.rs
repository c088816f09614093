//! WebSocket connection to the coordinator
//!
//! A [`ConnectionManager`] owns the session used for the handshake and the
//! shared connection state. Every successful [`ConnectionManager::connect`]
//! spawns a dedicated I/O task with its own command and event channels;
//! when the transport ends the task records `Disconnected`, reports why and
//! drops everything it owned, so a later `connect` starts from a clean slate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::CoordinatorSettings;
use crate::error::{Error, Result};
use crate::protocol::{InboundEvent, JobRequest, OutboundEvent};
use crate::session::{Session, SessionStore};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the per-connection command and event channels
const CHANNEL_CAPACITY: usize = 100;

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No live channel
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Handshake accepted, events flow both ways
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("Disconnected"),
            ConnectionState::Connecting => f.write_str("Connecting"),
            ConnectionState::Connected => f.write_str("Connected"),
        }
    }
}

/// State shared by the manager and every connection it created.
/// `owner` is the id of the connection the state currently describes.
#[derive(Debug, Default)]
struct SharedState {
    state: ConnectionState,
    owner: Option<Uuid>,
}

// ─────────────────────────────────────────────────────────────────
// Events / Commands
// ─────────────────────────────────────────────────────────────────

/// Events produced by a connection's I/O task
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake accepted; always the first event of a connection
    Connected,

    /// A job request arrived
    Job(JobRequest),

    /// The transport ended; always the last event of a connection
    Disconnected { reason: String },
}

enum Command {
    Send {
        event: OutboundEvent,
        ack: oneshot::Sender<Result<()>>,
    },
    Close,
}

// ─────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────

/// The emit side of a live connection
#[async_trait]
pub trait Channel: Send + Sync {
    /// Current state of the connection behind this channel
    fn state(&self) -> ConnectionState;

    /// Write one event to the coordinator
    async fn send(&self, event: OutboundEvent) -> Result<()>;
}

/// Handle for writing to one connection; cheap to clone
#[derive(Clone)]
pub struct OutboundChannel {
    connection_id: Uuid,
    commands: mpsc::Sender<Command>,
    shared: Arc<RwLock<SharedState>>,
}

impl OutboundChannel {
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }
}

#[async_trait]
impl Channel for OutboundChannel {
    fn state(&self) -> ConnectionState {
        let shared = self.shared.read();
        if shared.owner == Some(self.connection_id) {
            shared.state
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn send(&self, event: OutboundEvent) -> Result<()> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(Error::ChannelUnavailable {
                state: state.to_string(),
            });
        }

        let (ack, done) = oneshot::channel();
        let unavailable = || Error::ChannelUnavailable {
            state: ConnectionState::Disconnected.to_string(),
        };

        self.commands
            .send(Command::Send { event, ack })
            .await
            .map_err(|_| unavailable())?;

        done.await.map_err(|_| unavailable())?
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────────

/// One live connection: its event stream and its emit channel
pub struct Connection {
    id: Uuid,
    channel: OutboundChannel,
    events: mpsc::Receiver<ConnectionEvent>,
    task: JoinHandle<()>,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A clonable emit handle bound to this connection
    pub fn channel(&self) -> OutboundChannel {
        self.channel.clone()
    }

    /// Next event; `None` once the I/O task has finished
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Send a close frame and wait for the I/O task to finish
    pub async fn close(self) {
        let _ = self.channel.commands.send(Command::Close).await;
        if let Err(e) = self.task.await {
            warn!(connection_id = %self.id, error = %e, "Connection task ended abnormally");
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection Manager
// ─────────────────────────────────────────────────────────────────

/// Opens authenticated connections to the coordinator
pub struct ConnectionManager {
    settings: CoordinatorSettings,
    session: Session,
    shared: Arc<RwLock<SharedState>>,
}

impl ConnectionManager {
    pub fn new(settings: CoordinatorSettings, session: Session) -> Self {
        Self {
            settings,
            session,
            shared: Arc::new(RwLock::new(SharedState::default())),
        }
    }

    /// Build a manager from the latest stored session; fails with
    /// [`Error::NoSession`] without touching the network when there is none
    pub fn from_store(settings: CoordinatorSettings, store: &SessionStore) -> Result<Self> {
        let session = store.load_latest()?.ok_or(Error::NoSession)?;
        Ok(Self::new(settings, session))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.read().state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn url(&self) -> &str {
        &self.settings.url
    }

    /// Perform the authenticated handshake and start the connection's I/O task
    pub async fn connect(&self) -> Result<Connection> {
        let url = Url::parse(&self.settings.url)
            .map_err(|e| Error::connection_failed(&self.settings.url, e.to_string()))?;
        let request = build_request(&url, &self.session.token)?;

        {
            let mut shared = self.shared.write();
            shared.state = ConnectionState::Connecting;
            shared.owner = None;
        }

        info!(url = %url, identity = %self.session.identity, "Connecting to coordinator");

        let timeout = self.settings.connect_timeout();
        let outcome = tokio::time::timeout(timeout, connect_async(request)).await;

        let ws_stream = match outcome {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                self.shared.write().state = ConnectionState::Disconnected;
                return Err(classify_handshake_error(url.as_str(), e));
            }
            Err(_) => {
                self.shared.write().state = ConnectionState::Disconnected;
                return Err(Error::ConnectionTimeout {
                    url: url.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
        };

        let id = Uuid::new_v4();
        {
            let mut shared = self.shared.write();
            shared.state = ConnectionState::Connected;
            shared.owner = Some(id);
        }

        info!(connection_id = %id, "Connected to coordinator");

        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let task = tokio::spawn(run_connection(
            id,
            ws_stream,
            command_rx,
            event_tx,
            self.shared.clone(),
            self.settings.ping_interval(),
        ));

        Ok(Connection {
            id,
            channel: OutboundChannel {
                connection_id: id,
                commands: command_tx,
                shared: self.shared.clone(),
            },
            events: event_rx,
            task,
        })
    }
}

fn build_request(
    url: &Url,
    token: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
    let mut request = url.as_str().into_client_request()?;
    let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| Error::connection_failed(url.as_str(), "session token is not a valid header value"))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(request)
}

fn classify_handshake_error(url: &str, err: WsError) -> Error {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                Error::HandshakeRejected {
                    status: status.as_u16(),
                    message: status.canonical_reason().unwrap_or("rejected").to_string(),
                }
            } else {
                Error::connection_failed(url, format!("handshake failed with HTTP {}", status))
            }
        }
        other => Error::connection_failed(url, other.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────
// I/O Task
// ─────────────────────────────────────────────────────────────────

async fn run_connection(
    id: Uuid,
    ws_stream: WsStream,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ConnectionEvent>,
    shared: Arc<RwLock<SharedState>>,
    ping_interval: Option<Duration>,
) {
    let (mut write, mut read) = ws_stream.split();

    let mut ping_timer = ping_interval.map(|period| {
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    let _ = events.send(ConnectionEvent::Connected).await;

    let reason = loop {
        tokio::select! {
            _ = next_tick(&mut ping_timer) => {
                if let Err(e) = write.send(WsMessage::Ping(Vec::new())).await {
                    break format!("ping failed: {}", e);
                }
                debug!(connection_id = %id, "Sent ping");
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        forward_inbound(id, InboundEvent::from_json(&text), &events).await;
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        forward_inbound(id, InboundEvent::from_json_bytes(&data), &events).await;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = write.send(WsMessage::Pong(data)).await {
                            break format!("pong failed: {}", e);
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(connection_id = %id, frame = ?frame, "Coordinator closed the connection");
                        break "closed by coordinator".to_string();
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %id, error = %e, "WebSocket error");
                        break e.to_string();
                    }
                    None => break "stream ended".to_string(),
                }
            }

            cmd = commands.recv() => {
                match cmd {
                    Some(Command::Send { event, ack }) => {
                        let result = write_event(&mut write, &event).await;
                        let failure = result.as_ref().err().map(|e| e.to_string());
                        let _ = ack.send(result);
                        if let Some(message) = failure {
                            break format!("write failed: {}", message);
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        info!(connection_id = %id, "Closed connection");
                        break "closed by worker".to_string();
                    }
                }
            }
        }
    };

    {
        let mut shared = shared.write();
        if shared.owner == Some(id) {
            shared.state = ConnectionState::Disconnected;
            shared.owner = None;
        }
    }

    info!(connection_id = %id, reason = %reason, "Disconnected from coordinator");
    let _ = events.send(ConnectionEvent::Disconnected { reason }).await;
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn write_event<S>(write: &mut S, event: &OutboundEvent) -> Result<()>
where
    S: SinkExt<WsMessage, Error = WsError> + Unpin,
{
    let json = event.to_json()?;
    write
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| Error::ConnectionLost { message: e.to_string() })?;
    debug!(event = event.event_name(), "Sent event");
    Ok(())
}

async fn forward_inbound(
    id: Uuid,
    decoded: std::result::Result<InboundEvent, serde_json::Error>,
    events: &mpsc::Sender<ConnectionEvent>,
) {
    match decoded {
        Ok(InboundEvent::NewServiceRequest(request)) => {
            debug!(
                connection_id = %id,
                service_id = %request.service_id,
                service_name = %request.service_name,
                "Received job request"
            );
            let _ = events.send(ConnectionEvent::Job(request)).await;
        }
        Ok(InboundEvent::Unhandled { event }) => {
            debug!(connection_id = %id, event = %event, "Ignoring unhandled event");
        }
        Err(e) => {
            warn!(connection_id = %id, error = %e, "Dropping malformed frame");
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
