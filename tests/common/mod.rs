//! Common test utilities
//!
//! Provides a mock coordinator that speaks the `{"event","data"}` frame
//! protocol and checks the bearer token on the handshake.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, StatusCode};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message as WsMessage};

/// Commands pushed to every connected worker
#[derive(Debug, Clone)]
enum ServerCommand {
    Frame(String),
    Close,
}

/// Mock coordinator server
pub struct MockCoordinator {
    addr: SocketAddr,
    commands: broadcast::Sender<ServerCommand>,
    received: Arc<RwLock<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    rejections: Arc<AtomicUsize>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockCoordinator {
    /// Start a coordinator that accepts only `Bearer <token>`
    pub async fn start(token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel(64);
        let received = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let rejections = Arc::new(AtomicUsize::new(0));

        let expected = format!("Bearer {}", token);
        let accept_task = {
            let commands = commands.clone();
            let received = received.clone();
            let connections = connections.clone();
            let rejections = rejections.clone();

            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(
                        stream,
                        expected.clone(),
                        commands.subscribe(),
                        received.clone(),
                        connections.clone(),
                        rejections.clone(),
                    ));
                }
            })
        };

        Self {
            addr,
            commands,
            received,
            connections,
            rejections,
            accept_task,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of accepted handshakes so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Number of handshakes refused with 401
    pub fn rejections(&self) -> usize {
        self.rejections.load(Ordering::SeqCst)
    }

    /// Every frame received from workers, decoded as JSON
    pub fn received(&self) -> Vec<Value> {
        self.received.read().clone()
    }

    /// Received frames carrying `event`
    pub fn received_events(&self, event: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|frame| frame["event"] == event)
            .collect()
    }

    /// Push a `newServiceRequest` to every connected worker
    pub fn send_job(&self, service_id: &str, service_name: &str, details: Value) {
        let frame = json!({
            "event": "newServiceRequest",
            "data": {
                "serviceId": service_id,
                "serviceName": service_name,
                "requestDetails": details,
            }
        });
        self.send_raw(frame.to_string());
    }

    /// Push an arbitrary text frame to every connected worker
    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.commands.send(ServerCommand::Frame(text.into()));
    }

    /// Close every open connection from the server side
    pub fn close_all(&self) {
        let _ = self.commands.send(ServerCommand::Close);
    }

    /// Wait until at least `count` handshakes were accepted
    pub async fn wait_for_connections(&self, count: usize) {
        wait_until(|| self.connections() >= count).await;
    }

    /// Wait until at least `count` frames with `event` were received
    pub async fn wait_for_events(&self, event: &str, count: usize) -> Vec<Value> {
        wait_until(|| self.received_events(event).len() >= count).await;
        self.received_events(event)
    }
}

impl Drop for MockCoordinator {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    expected: String,
    mut commands: broadcast::Receiver<ServerCommand>,
    received: Arc<RwLock<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    rejections: Arc<AtomicUsize>,
) {
    let check_token = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let authorized = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false);

        if authorized {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("invalid token".to_string()));
            *rejection.status_mut() = StatusCode::UNAUTHORIZED;
            Err(rejection)
        }
    };

    let ws_stream = match accept_hdr_async(stream, check_token).await {
        Ok(ws_stream) => ws_stream,
        Err(_) => {
            rejections.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    connections.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<Value>(&text) {
                        received.write().push(frame);
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            cmd = commands.recv() => match cmd {
                Ok(ServerCommand::Frame(text)) => {
                    if write.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(ServerCommand::Close) => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Poll `condition` until it holds, failing the test after five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
