use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use greeter_core::config::SocketConfig;
use secrecy::SecretString;
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, Mutex},
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::{
    api::SlackWebClient,
    events::{ack_frame, AckRequest, InboundEvent, SocketFrame},
    shutdown::{cancelled, ShutdownSignal},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport credentials rejected: {0}")]
    Unauthorized(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

#[derive(Debug, Error)]
pub enum SocketError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("socket mode gave up after {attempts} consecutive failed connection attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("inbound event consumer dropped its receiver")]
    ConsumerClosed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 10, base_delay_ms: 1_000, max_delay_ms: 30_000 }
    }
}

impl From<&SocketConfig> for ReconnectPolicy {
    fn from(config: &SocketConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// Next text frame, or `None` once the peer has closed the session.
    async fn next_frame(&self) -> Result<Option<String>, TransportError>;
    async fn send_frame(&self, frame: String) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket Mode over a real WebSocket. Each `connect` asks
/// `apps.connections.open` for a fresh URL.
pub struct WebSocketTransport {
    web: SlackWebClient,
    app_token: SecretString,
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: Mutex<Option<SplitStream<WsStream>>>,
}

impl WebSocketTransport {
    pub fn new(web: SlackWebClient, app_token: SecretString) -> Self {
        Self { web, app_token, writer: Mutex::new(None), reader: Mutex::new(None) }
    }

    async fn write(&self, message: Message) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(TransportError::Send("socket is not connected".to_owned()));
        };
        sink.send(message).await.map_err(|error| TransportError::Send(error.to_string()))
    }
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport").field("web", &self.web).finish_non_exhaustive()
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self.web.connections_open(&self.app_token).await.map_err(|error| {
            if error.is_auth_failure() {
                TransportError::Unauthorized(error.to_string())
            } else {
                TransportError::Connect(error.to_string())
            }
        })?;

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(format!("websocket handshake: {error}")))?;
        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        *self.reader.lock().await = Some(reader);
        Ok(())
    }

    async fn next_frame(&self) -> Result<Option<String>, TransportError> {
        let mut reader = self.reader.lock().await;
        let Some(stream) = reader.as_mut() else {
            return Err(TransportError::Receive("socket is not connected".to_owned()));
        };

        loop {
            let Some(message) = stream.next().await else {
                return Ok(None);
            };
            match message.map_err(|error| TransportError::Receive(error.to_string()))? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Ping(payload) => self.write(Message::Pong(payload)).await?,
                Message::Close(frame) => {
                    debug!(event_name = "system.socket.close_frame", ?frame, "close frame received");
                    return Ok(None);
                }
                Message::Binary(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn send_frame(&self, frame: String) -> Result<(), TransportError> {
        self.write(Message::Text(frame.into())).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.reader.lock().await.take();
        let Some(mut sink) = self.writer.lock().await.take() else {
            return Ok(());
        };
        sink.send(Message::Close(None))
            .await
            .map_err(|error| TransportError::Disconnect(error.to_string()))?;
        sink.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AckError {
    #[error("socket session is gone; envelope `{0}` was not acknowledged")]
    SessionClosed(String),
}

pub trait Acknowledger: Send + Sync {
    fn acknowledge(&self, request: &AckRequest) -> Result<(), AckError>;
}

/// Queues acknowledgments for the runner, which is the only socket writer.
#[derive(Clone, Debug)]
pub struct AckHandle {
    sender: mpsc::UnboundedSender<AckRequest>,
}

impl Acknowledger for AckHandle {
    fn acknowledge(&self, request: &AckRequest) -> Result<(), AckError> {
        self.sender
            .send(request.clone())
            .map_err(|_| AckError::SessionClosed(request.envelope_id.clone()))
    }
}

/// Consumer side of a runner: the inbound event stream and the ack queue.
#[derive(Debug)]
pub struct SocketModeChannels {
    pub events: mpsc::Receiver<InboundEvent>,
    pub acknowledger: AckHandle,
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    reconnect_policy: ReconnectPolicy,
    events: mpsc::Sender<InboundEvent>,
    acks: mpsc::UnboundedReceiver<AckRequest>,
    log_frames: bool,
}

enum SessionExit {
    Shutdown,
    Refresh,
    Closed,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        reconnect_policy: ReconnectPolicy,
        event_buffer: usize,
    ) -> (Self, SocketModeChannels) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let runner = Self {
            transport,
            reconnect_policy,
            events: event_tx,
            acks: ack_rx,
            log_frames: false,
        };
        let channels =
            SocketModeChannels { events: event_rx, acknowledger: AckHandle { sender: ack_tx } };
        (runner, channels)
    }

    /// Trace every raw frame read off the socket.
    pub fn with_frame_logging(mut self, enabled: bool) -> Self {
        self.log_frames = enabled;
        self
    }

    /// Owns the connection until cancellation. Returns `Ok` on shutdown and an
    /// error when the session cannot be (re)established.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<(), SocketError> {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!(event_name = "system.socket.stopped", "socket mode stopped before connect");
                return Ok(());
            }

            info!(event_name = "system.socket.connecting", attempt, "connecting to slack");
            if !self.emit(InboundEvent::Connecting { attempt }, &mut shutdown).await? {
                return Ok(());
            }

            let connected = tokio::select! {
                result = self.transport.connect() => result,
                () = cancelled(&mut shutdown) => return Ok(()),
            };

            let failure = match connected {
                Ok(()) => {
                    let exit = self.pump(&mut attempt, &mut shutdown).await;
                    self.close_session().await;
                    match exit {
                        Ok(SessionExit::Shutdown) => {
                            info!(event_name = "system.socket.stopped", "socket mode stopped");
                            return Ok(());
                        }
                        Ok(SessionExit::Refresh) => continue,
                        Ok(SessionExit::Closed) => {
                            TransportError::Receive("socket closed by peer".to_owned())
                        }
                        Err(SocketError::Transport(error)) => error,
                        Err(error) => return Err(error),
                    }
                }
                Err(error) => error,
            };

            warn!(
                event_name = "system.socket.connection_error",
                attempt,
                max_retries = self.reconnect_policy.max_retries,
                error = %failure,
                "socket mode connection failed"
            );
            let error_event =
                InboundEvent::ConnectionError { attempt, error: failure.to_string() };
            if !self.emit(error_event, &mut shutdown).await? {
                return Ok(());
            }

            if failure.is_fatal() {
                return Err(SocketError::Transport(failure));
            }
            if attempt >= self.reconnect_policy.max_retries {
                return Err(SocketError::RetriesExhausted { attempts: attempt + 1 });
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancelled(&mut shutdown) => return Ok(()),
                }
            }
            attempt += 1;
        }
    }

    async fn pump(
        &mut self,
        attempt: &mut u32,
        shutdown: &mut ShutdownSignal,
    ) -> Result<SessionExit, SocketError> {
        loop {
            tokio::select! {
                biased;
                () = cancelled(shutdown) => return Ok(SessionExit::Shutdown),
                Some(request) = self.acks.recv() => {
                    self.transport.send_frame(ack_frame(&request)).await?;
                    debug!(
                        event_name = "ingress.slack.ack_sent",
                        envelope_id = %request.envelope_id,
                        "acknowledged slack envelope"
                    );
                }
                frame = self.transport.next_frame() => {
                    let Some(text) = frame? else {
                        info!(event_name = "system.socket.closed", "socket closed by peer");
                        return Ok(SessionExit::Closed);
                    };
                    if let Some(exit) = self.handle_frame(&text, attempt, shutdown).await? {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        text: &str,
        attempt: &mut u32,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Option<SessionExit>, SocketError> {
        if self.log_frames {
            trace!(event_name = "ingress.slack.frame", frame = text, "raw socket mode frame");
        }

        let frame = match SocketFrame::parse(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(
                    event_name = "ingress.slack.frame_rejected",
                    error = %error,
                    "ignoring undecodable socket frame"
                );
                return Ok(None);
            }
        };

        let event = match frame {
            SocketFrame::Hello { num_connections } => {
                info!(
                    event_name = "system.socket.connected",
                    attempt = *attempt,
                    num_connections,
                    "connected to slack with socket mode"
                );
                let connected = InboundEvent::Connected { attempt: *attempt };
                *attempt = 0;
                connected
            }
            SocketFrame::Disconnect { reason } => {
                info!(
                    event_name = "system.socket.disconnect_requested",
                    reason = %reason,
                    "slack requested a reconnect"
                );
                if !self.emit(InboundEvent::Disconnecting { reason }, shutdown).await? {
                    return Ok(Some(SessionExit::Shutdown));
                }
                return Ok(Some(SessionExit::Refresh));
            }
            SocketFrame::Envelope(envelope) => {
                let event = InboundEvent::from_envelope(envelope);
                info!(
                    event_name = "ingress.slack.envelope_received",
                    envelope_id = event.envelope_id().unwrap_or("unknown"),
                    event_type = event.kind(),
                    "received slack envelope"
                );
                event
            }
        };

        if !self.emit(event, shutdown).await? {
            return Ok(Some(SessionExit::Shutdown));
        }
        Ok(None)
    }

    /// `Ok(false)` when shutdown won the race against delivery.
    async fn emit(
        &self,
        event: InboundEvent,
        shutdown: &mut ShutdownSignal,
    ) -> Result<bool, SocketError> {
        tokio::select! {
            sent = self.events.send(event) => {
                sent.map(|()| true).map_err(|_| SocketError::ConsumerClosed)
            }
            () = cancelled(shutdown) => Ok(false),
        }
    }

    /// Closes the socket and drops acks still queued for it. Envelope ids
    /// belong to one session and must not be written on the next.
    async fn close_session(&mut self) {
        if let Err(error) = self.transport.disconnect().await {
            warn!(
                event_name = "system.socket.disconnect_failed",
                error = %error,
                "failed to close socket mode session cleanly"
            );
        }
        while let Ok(request) = self.acks.try_recv() {
            debug!(
                event_name = "ingress.slack.ack_dropped",
                envelope_id = %request.envelope_id,
                "dropping acknowledgment queued for a closed session"
            );
        }
    }
}
