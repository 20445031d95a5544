//! Transport adapter: connect/send/disconnect plus an event stream the
//! dispatcher consumes. See §4.9.
//!
//! `WebSocketTransport` is the reference implementation used against the
//! hosted deployment; `InMemoryTransport` is a paired-channel test double for
//! the integration tests under `tests/`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{DeviceError, DeviceResult};

/// The path appended to a configured host to reach the reference deployment.
const DEVICECONNECT_PATH: &str = "/api/devices/v1/deviceconnect/connect";

/// Events delivered from a `Transport` to whoever registered as its inbound
/// callback (in this crate, always `Engine`).
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    DataReceived(Vec<u8>),
    Disconnected,
    Error(DeviceError),
}

/// A persistent bidirectional message stream. `send` preserves message
/// boundaries and is synchronous with respect to the caller; inbound frames
/// arrive asynchronously as `TransportEvent::DataReceived` on the channel
/// passed to `connect`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, events: mpsc::UnboundedSender<TransportEvent>) -> DeviceResult<()>;
    async fn send(&self, payload: &[u8]) -> DeviceResult<()>;
    async fn disconnect(&self) -> DeviceResult<()>;
    async fn is_connected(&self) -> bool;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Connects to a fixed endpoint over `wss://`/`ws://`, attaching a bearer
/// token on the handshake request, and maps each inbound binary frame to a
/// `DataReceived` event. Non-binary frames (text, ping/pong) are ignored.
pub struct WebSocketTransport {
    host: String,
    token: String,
    sink: Mutex<Option<WsSink>>,
    connected: Arc<AtomicBool>,
}

impl WebSocketTransport {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        WebSocketTransport {
            host: host.into(),
            token: token.into(),
            sink: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{DEVICECONNECT_PATH}", self.host.trim_end_matches('/'))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, events: mpsc::UnboundedSender<TransportEvent>) -> DeviceResult<()> {
        let mut request = self
            .endpoint()
            .into_client_request()
            .map_err(|e| DeviceError::transport(format!("invalid host url: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.token)
                .parse()
                .map_err(|e| DeviceError::transport(format!("invalid auth header: {e}")))?,
        );

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| DeviceError::transport(e.to_string()))?;
        let (sink, mut stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        self.connected.store(true, Ordering::SeqCst);
        let _ = events.send(TransportEvent::Connected);

        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        if events.send(TransportEvent::DataReceived(data.to_vec())).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        connected.store(false, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Disconnected);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        connected.store(false, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Error(DeviceError::transport(e.to_string())));
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> DeviceResult<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| DeviceError::transport("send attempted while not connected"))?;
        sink.send(Message::Binary(payload.to_vec().into()))
            .await
            .map_err(|e| DeviceError::transport(e.to_string()))
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "websocket close frame failed, socket likely already gone");
            }
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Paired-channel test double: a handle held by the test pushes inbound
/// bytes and reads what the engine sent, without a real socket.
pub struct InMemoryTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    connected: Arc<AtomicBool>,
}

pub struct InMemoryTransportHandle {
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl InMemoryTransport {
    pub fn pair() -> (Self, InMemoryTransportHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            InMemoryTransport {
                sent: Mutex::new(Vec::new()),
                inbound_rx: Mutex::new(Some(rx)),
                connected: Arc::new(AtomicBool::new(false)),
            },
            InMemoryTransportHandle { inbound_tx: tx },
        )
    }

    pub async fn sent_messages(&self) -> Vec<Vec<u8>> {
        self.sent.lock().await.clone()
    }
}

impl InMemoryTransportHandle {
    /// Queue one frame for delivery as `TransportEvent::DataReceived`.
    pub fn push_inbound(&self, bytes: Vec<u8>) -> DeviceResult<()> {
        self.inbound_tx
            .send(bytes)
            .map_err(|_| DeviceError::transport("engine side of the in-memory transport is gone"))
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self, events: mpsc::UnboundedSender<TransportEvent>) -> DeviceResult<()> {
        let mut guard = self.inbound_rx.lock().await;
        let mut rx = guard
            .take()
            .ok_or_else(|| DeviceError::transport("in-memory transport already connected"))?;
        self.connected.store(true, Ordering::SeqCst);
        let _ = events.send(TransportEvent::Connected);

        let connected = Arc::clone(&self.connected);
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if events.send(TransportEvent::DataReceived(bytes)).is_err() {
                    break;
                }
            }
            connected.store(false, Ordering::SeqCst);
            let _ = events.send(TransportEvent::Disconnected);
        });

        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> DeviceResult<()> {
        if !self.is_connected().await {
            warn!("in-memory transport: send attempted while not connected");
            return Err(DeviceError::transport("send attempted while not connected"));
        }
        self.sent.lock().await.push(payload.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
