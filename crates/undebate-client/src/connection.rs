//! TCP connection to an undebate server.
//!
//! After the handshake the socket is split in two tasks. The writer drains an
//! unbounded queue, so [`Transport::emit`] never blocks. The reader routes
//! `Ack` frames to the waiting reply handler and `Push` frames to listeners,
//! one frame at a time, which keeps pushes on a channel in wire order.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use undebate_proto::framing::{read_frame, write_frame};
use undebate_proto::handshake::is_version_compatible;
use undebate_proto::{Frame, Handshake, HandshakeResponse, Payload, PROTOCOL_VERSION};

use crate::config::ClientConfig;
use crate::error::Error;
use crate::transport::{ListenerId, ListenerRegistry, PendingReplies, ReplyHandler, Transport, UpdateHandler};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket connected, handshake not performed.
    Connected,
    /// Handshake completed successfully.
    Ready,
    /// Connection closed.
    Closed,
}

/// State shared with the reader task.
#[derive(Debug)]
struct Shared {
    listeners: ListenerRegistry,
    replies: PendingReplies,
    state: Mutex<ConnectionState>,
}

impl Shared {
    fn mark_closed(&self) {
        *self.state.lock() = ConnectionState::Closed;
        let dropped = self.replies.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "dropped pending replies on close");
        }
    }
}

/// A connection to an undebate server.
pub struct Connection {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    config: ClientConfig,
    server_id: String,
    connection_id: u64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    /// Connect, perform the handshake, and start the reader and writer tasks.
    pub async fn establish(config: ClientConfig) -> Result<Self, Error> {
        let stream = tokio::time::timeout(config.timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::Connection(format!("failed to connect to {}: {}", config.address, e)))?;

        stream
            .set_nodelay(true)
            .map_err(|e| Error::Connection(format!("failed to set nodelay: {}", e)))?;

        Self::from_stream(stream, config).await
    }

    /// Run the handshake over an already connected stream.
    pub async fn from_stream<S>(stream: S, config: ClientConfig) -> Result<Self, Error>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let response = tokio::time::timeout(
            config.timeout,
            handshake(&mut read_half, &mut write_half, &config),
        )
        .await
        .map_err(|_| Error::Timeout)??;

        let shared = Arc::new(Shared {
            listeners: ListenerRegistry::new(),
            replies: PendingReplies::new(),
            state: Mutex::new(ConnectionState::Ready),
        });

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(write_half, outbound_rx, shared.clone()));
        let reader = tokio::spawn(read_loop(read_half, shared.clone(), config.max_message_size));

        tracing::info!(
            address = %config.address,
            server_id = %response.server_id,
            connection_id = response.connection_id,
            "connected"
        );

        Ok(Self {
            shared,
            outbound,
            server_id: response.server_id,
            connection_id: response.connection_id,
            config,
            reader,
            writer,
        })
    }

    /// Close the connection. Pending replies are dropped without running.
    pub fn close(&self) {
        self.reader.abort();
        self.writer.abort();
        self.shared.mark_closed();
    }

    /// Check if the connection is ready for requests.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Get the server ID.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Connection id assigned by the server.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Configuration this connection was established with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Number of emits still waiting for their reply.
    pub fn pending_replies(&self) -> usize {
        self.shared.replies.len()
    }

    /// Emit `event` and return the ack id its reply is registered under.
    pub fn emit_with_ack(&self, event: &str, args: Vec<Value>, reply: ReplyHandler) -> Result<u64, Error> {
        self.send_emit(event, args, Some(reply))?
            .ok_or_else(|| Error::Connection("emit registered no reply".to_string()))
    }

    /// Drop the reply handler waiting on `ack` without running it.
    ///
    /// Returns `false` if the reply already arrived or was never registered.
    pub fn cancel_reply(&self, ack: u64) -> bool {
        self.shared.replies.cancel(ack)
    }

    fn send_emit(&self, event: &str, args: Vec<Value>, reply: Option<ReplyHandler>) -> Result<Option<u64>, Error> {
        let ack = reply.map(|reply| self.shared.replies.register(reply));

        // Closing marks the state before clearing replies, so a handler
        // registered after the clear sees `Closed` here.
        let result = if self.state() != ConnectionState::Ready {
            Err(Error::Closed)
        } else {
            match Frame::emit(event, &args, ack).and_then(|frame| frame.encode()) {
                Ok(bytes) => self.outbound.send(bytes).map_err(|_| Error::Closed),
                Err(e) => Err(Error::Protocol(e)),
            }
        };

        if let Err(e) = result {
            if let Some(ack) = ack {
                self.shared.replies.cancel(ack);
            }
            return Err(e);
        }
        Ok(ack)
    }
}

impl Transport for Connection {
    fn on(&self, event: &str, listener: UpdateHandler) -> ListenerId {
        self.shared.listeners.on(event, listener)
    }

    fn off(&self, event: &str, listener: ListenerId) -> bool {
        self.shared.listeners.off(event, listener)
    }

    fn emit(&self, event: &str, args: Vec<Value>, reply: Option<ReplyHandler>) -> Result<(), Error> {
        self.send_emit(event, args, reply).map(|_| ())
    }

    fn listener_count(&self, event: &str) -> usize {
        self.shared.listeners.listener_count(event)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.config.address)
            .field("state", &self.state())
            .field("client_id", &self.config.client_id)
            .field("server_id", &self.server_id)
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

async fn handshake<R, W>(reader: &mut R, writer: &mut W, config: &ClientConfig) -> Result<HandshakeResponse, Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut hello = Handshake::new(&config.client_id);
    if let Some(user) = &config.user {
        hello = hello.with_user(user);
    }
    write_frame(writer, &Frame::Hello(hello).encode()?).await?;

    let payload = read_frame(reader, config.max_message_size)
        .await?
        .ok_or_else(|| Error::Connection("server closed the connection during handshake".to_string()))?;

    let response = match Frame::decode(&payload)? {
        Frame::Welcome(response) => response,
        other => {
            return Err(Error::Protocol(undebate_proto::Error::InvalidMessage(format!(
                "expected welcome, got {}",
                other.kind()
            ))))
        }
    };

    if !response.accepted {
        return Err(Error::Connection(format!(
            "handshake rejected: {}",
            response.error.unwrap_or_else(|| "unknown reason".to_string())
        )));
    }

    if !is_version_compatible(PROTOCOL_VERSION, response.protocol_version) {
        return Err(Error::Protocol(undebate_proto::Error::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: response.protocol_version,
        }));
    }

    Ok(response)
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>, shared: Arc<Shared>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::warn!(error = %e, "write failed, closing connection");
            break;
        }
    }
    shared.mark_closed();
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>, max_message_size: usize)
where
    R: AsyncRead + Unpin,
{
    loop {
        let payload = match read_frame(&mut reader, max_message_size).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::info!("server closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "read failed, closing connection");
                break;
            }
        };

        let frame = match Frame::decode(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
                continue;
            }
        };

        match frame {
            Frame::Ack { ack, args } => match Payload::decode_all(&args) {
                Ok(args) => {
                    if !shared.replies.resolve(ack, args) {
                        tracing::debug!(ack, "ack without a pending reply");
                    }
                }
                Err(e) => tracing::warn!(ack, error = %e, "dropping ack with bad payload"),
            },
            Frame::Push { event, payload } => match payload.to_value() {
                Ok(value) => {
                    let delivered = shared.listeners.dispatch(&event, &value);
                    tracing::trace!(channel = %event, delivered, "push received");
                }
                Err(e) => tracing::warn!(channel = %event, error = %e, "dropping push with bad payload"),
            },
            other => {
                tracing::warn!(kind = other.kind(), "unexpected frame from server");
            }
        }
    }
    shared.mark_closed();
}
