//! Server transport layer over tokio TCP.
//!
//! Every connection starts with a `Hello`/`Welcome` handshake. After that the
//! client emits socket-api calls and the server answers each emit carrying an
//! ack id with one `Ack`, while channel pushes share the same outbound queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use undebate_proto::framing::{read_frame, write_frame};
use undebate_proto::handshake::negotiate_version;
use undebate_proto::{Frame, Handshake, HandshakeResponse, Payload, PROTOCOL_VERSION};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::{ApiContext, ApiRegistry};
use crate::pubsub::SharedChannelManager;

/// Transport metrics for monitoring.
#[derive(Debug)]
pub struct TransportMetrics {
    /// Total number of accepted connections.
    pub connections_total: AtomicU64,
    /// Number of connections currently open.
    pub connections_active: AtomicU64,
    /// Total number of emits received.
    pub requests_total: AtomicU64,
    /// Number of emits answered by an api.
    pub requests_success: AtomicU64,
    /// Number of emits that could not be answered.
    pub requests_failed: AtomicU64,
    /// Number of bytes received.
    pub bytes_received: AtomicU64,
    /// Number of bytes sent.
    pub bytes_sent: AtomicU64,
    /// Server start time.
    pub started_at: Instant,
}

impl TransportMetrics {
    /// Create new metrics.
    fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
            requests_success: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn record_connect(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    fn record_disconnect(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an answered request.
    fn record_success(&self, received_bytes: usize) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_success.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(received_bytes as u64, Ordering::Relaxed);
    }

    /// Record a request that got no api reply.
    fn record_failure(&self, received_bytes: usize) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(received_bytes as u64, Ordering::Relaxed);
    }

    fn record_sent(&self, sent_bytes: usize) {
        self.bytes_sent.fetch_add(sent_bytes as u64, Ordering::Relaxed);
    }

    /// Get the uptime duration.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get total accepted connections.
    pub fn total_connections(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    /// Get currently open connections.
    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }

    /// Get total requests count.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get successful requests count.
    pub fn successful_requests(&self) -> u64 {
        self.requests_success.load(Ordering::Relaxed)
    }

    /// Get failed requests count.
    pub fn failed_requests(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    /// Get total bytes received.
    pub fn total_bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Get total bytes sent.
    pub fn total_bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared by every connection task.
struct Shared {
    config: ServerConfig,
    apis: Arc<ApiRegistry>,
    channels: SharedChannelManager,
    metrics: Arc<TransportMetrics>,
    next_connection_id: AtomicU64,
}

/// Server transport that accepts connections and serves socket apis.
pub struct Transport {
    listener: TcpListener,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl Transport {
    /// Bind the listen address from `config`.
    pub async fn bind(
        config: &ServerConfig,
        apis: Arc<ApiRegistry>,
        channels: SharedChannelManager,
    ) -> Result<Self, Error> {
        config.validate()?;

        let listener = TcpListener::bind(&config.listen_address).await.map_err(|e| {
            Error::Transport(format!("failed to listen on {}: {}", config.listen_address, e))
        })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(address = %local_addr, "listening on TCP");

        Ok(Self {
            listener,
            local_addr,
            shared: Arc::new(Shared {
                config: config.clone(),
                apis,
                channels,
                metrics: Arc::new(TransportMetrics::new()),
                next_connection_id: AtomicU64::new(1),
            }),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the transport metrics.
    pub fn metrics(&self) -> &TransportMetrics {
        &self.shared.metrics
    }

    /// The channel manager pushes are fanned out through.
    pub fn channels(&self) -> &SharedChannelManager {
        &self.shared.channels
    }

    /// Accept connections until the process exits.
    pub async fn run(&self) -> Result<(), Error> {
        let (_keep, shutdown) = broadcast::channel(1);
        self.run_until_shutdown(shutdown).await
    }

    /// Accept connections until a shutdown signal arrives, then close them.
    pub async fn run_until_shutdown(
        &self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let mut connections = JoinSet::new();
        tracing::info!("transport ready, accepting connections");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = self.shared.clone();
                        connections.spawn(serve_tcp(stream, peer, shared));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        let metrics = &self.shared.metrics;
        tracing::info!(
            connections = metrics.total_connections(),
            total_requests = metrics.total_requests(),
            successful = metrics.successful_requests(),
            failed = metrics.failed_requests(),
            bytes_received = metrics.total_bytes_received(),
            bytes_sent = metrics.total_bytes_sent(),
            uptime_secs = metrics.uptime().as_secs(),
            "shutdown signal received, stopping transport"
        );

        connections.shutdown().await;
        Ok(())
    }
}

async fn serve_tcp(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
    }
    let (reader, writer) = stream.into_split();
    if let Err(e) = serve_connection(reader, writer, shared).await {
        tracing::warn!(%peer, error = %e, "connection ended with error");
    }
}

/// Serve one connection from handshake to close.
async fn serve_connection<R, W>(mut reader: R, mut writer: W, shared: Arc<Shared>) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let max = shared.config.max_message_size;

    let hello = match tokio::time::timeout(shared.config.handshake_timeout, read_frame(&mut reader, max)).await {
        Ok(Ok(Some(payload))) => Frame::decode(&payload)?,
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(Error::Transport("handshake timed out".to_string())),
    };

    let handshake: Handshake = match hello {
        Frame::Hello(handshake) => handshake,
        other => {
            let reject = HandshakeResponse::reject(format!("expected hello, got {}", other.kind()));
            write_frame(&mut writer, &Frame::Welcome(reject).encode()?).await?;
            return Err(undebate_proto::Error::InvalidMessage(format!(
                "expected hello, got {}",
                other.kind()
            ))
            .into());
        }
    };

    let Some(version) = negotiate_version(handshake.protocol_version, PROTOCOL_VERSION) else {
        let reject = HandshakeResponse::reject(format!(
            "unsupported protocol version {}, server speaks {}",
            handshake.protocol_version, PROTOCOL_VERSION
        ));
        write_frame(&mut writer, &Frame::Welcome(reject).encode()?).await?;
        return Err(undebate_proto::Error::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: handshake.protocol_version,
        }
        .into());
    };

    let connection_id = shared.next_connection_id.fetch_add(1, Ordering::SeqCst);
    let welcome = Frame::Welcome(HandshakeResponse::accept(
        version,
        &shared.config.server_id,
        connection_id,
    ))
    .encode()?;

    // The welcome goes through the outbound queue, so the peer is attached
    // before the client can emit anything.
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    shared.channels.attach(connection_id, outbound.clone());
    shared.metrics.record_connect();
    let _ = outbound.send(welcome);

    tracing::info!(
        connection_id,
        client_id = %handshake.client_id,
        user = ?handshake.user,
        "client connected"
    );

    let writer_task = tokio::spawn(write_loop(writer, outbound_rx, shared.metrics.clone(), connection_id));
    let result = read_loop(&mut reader, &outbound, connection_id, handshake.user.as_deref(), &shared).await;

    let left = shared.channels.detach(connection_id);
    drop(outbound);
    let _ = writer_task.await;
    shared.metrics.record_disconnect();

    tracing::info!(connection_id, channels_left = left, "client disconnected");
    result
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    metrics: Arc<TransportMetrics>,
    connection_id: u64,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            tracing::debug!(connection_id, error = %e, "write failed");
            break;
        }
        metrics.record_sent(frame.len());
    }
}

async fn read_loop<R>(
    reader: &mut R,
    outbound: &mpsc::UnboundedSender<Vec<u8>>,
    connection_id: u64,
    user: Option<&str>,
    shared: &Shared,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let request_timeout = shared.config.request_timeout;

    while let Some(payload) = read_frame(reader, shared.config.max_message_size).await? {
        let received_bytes = payload.len();

        let (event, args, ack) = match Frame::decode(&payload)? {
            Frame::Emit { event, args, ack } => (event, args, ack),
            other => {
                tracing::warn!(connection_id, kind = other.kind(), "ignoring unexpected frame");
                continue;
            }
        };

        let args = match Payload::decode_all(&args) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(connection_id, handle = %event, error = %e, "undecodable arguments");
                shared.metrics.record_failure(received_bytes);
                continue;
            }
        };

        let start = Instant::now();
        let ctx = ApiContext::new(connection_id, user, &shared.channels);
        let reply = shared.apis.dispatch(&ctx, &event, args);
        let elapsed = start.elapsed();

        if elapsed > request_timeout {
            tracing::warn!(
                connection_id,
                handle = %event,
                duration_ms = elapsed.as_millis() as u64,
                timeout_ms = request_timeout.as_millis() as u64,
                "request exceeded timeout"
            );
        }

        let Some(reply) = reply else {
            shared.metrics.record_failure(received_bytes);
            continue;
        };
        shared.metrics.record_success(received_bytes);

        if let Some(ack) = ack {
            let frame = Frame::ack(ack, &reply)?.encode()?;
            if outbound.send(frame).is_err() {
                break;
            }
        }
    }

    Ok(())
}

/// Create a transport bound to the configured address.
pub async fn create_transport(
    config: &ServerConfig,
    apis: Arc<ApiRegistry>,
    channels: SharedChannelManager,
) -> Result<Transport, Error> {
    Transport::bind(config, apis, channels).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    use undebate_proto::framing::MAX_MESSAGE_SIZE;

    use crate::pubsub::ChannelManager;
    use crate::store::ElectionStore;

    fn shared() -> Arc<Shared> {
        Arc::new(Shared {
            config: ServerConfig::new("127.0.0.1:0").with_handshake_timeout(Duration::from_millis(200)),
            apis: Arc::new(ApiRegistry::with_default_apis(Arc::new(ElectionStore::new()))),
            channels: Arc::new(ChannelManager::new()),
            metrics: Arc::new(TransportMetrics::new()),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Serve one in-memory connection; returns the client end.
    fn serve(shared: Arc<Shared>) -> (DuplexStream, tokio::task::JoinHandle<Result<(), Error>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(async move {
            let (reader, writer) = tokio::io::split(server);
            serve_connection(reader, writer, shared).await
        });
        (client, handle)
    }

    async fn send(stream: &mut DuplexStream, frame: Frame) {
        stream.write_all(&frame.encode().unwrap()).await.unwrap();
    }

    async fn recv(stream: &mut DuplexStream) -> Frame {
        let payload = read_frame(stream, MAX_MESSAGE_SIZE).await.unwrap().unwrap();
        Frame::decode(&payload).unwrap()
    }

    async fn hello(stream: &mut DuplexStream, user: Option<&str>) -> HandshakeResponse {
        let mut handshake = Handshake::new("test-client");
        if let Some(user) = user {
            handshake = handshake.with_user(user);
        }
        send(stream, Frame::Hello(handshake)).await;
        match recv(stream).await {
            Frame::Welcome(response) => response,
            other => panic!("expected welcome, got {}", other.kind()),
        }
    }

    fn ack_args(frame: Frame) -> (u64, Vec<Value>) {
        match frame {
            Frame::Ack { ack, args } => (ack, Payload::decode_all(&args).unwrap()),
            other => panic!("expected ack, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_handshake_assigns_connection_ids() {
        let shared = shared();
        let (mut a, _ha) = serve(shared.clone());
        let (mut b, _hb) = serve(shared.clone());

        let wa = hello(&mut a, None).await;
        let wb = hello(&mut b, None).await;

        assert!(wa.accepted && wb.accepted);
        assert_eq!(wa.server_id, "undebate-server");
        assert_ne!(wa.connection_id, wb.connection_id);
        assert_eq!(shared.metrics.active_connections(), 2);
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let (mut client, handle) = serve(shared());
        send(&mut client, Frame::Hello(Handshake::with_version(99, "old"))).await;

        match recv(&mut client).await {
            Frame::Welcome(response) => {
                assert!(!response.accepted);
                assert!(response.error.is_some());
            }
            other => panic!("expected welcome, got {}", other.kind()),
        }
        assert!(matches!(
            handle.await.unwrap(),
            Err(Error::Protocol(undebate_proto::Error::VersionMismatch { actual: 99, .. }))
        ));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (_client, handle) = serve(shared());
        assert!(matches!(handle.await.unwrap(), Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_emit_gets_ack() {
        let (mut client, _handle) = serve(shared());
        hello(&mut client, None).await;

        send(
            &mut client,
            Frame::emit("subscribe-election-doc", &[json!("42")], Some(7)).unwrap(),
        )
        .await;

        assert_eq!(ack_args(recv(&mut client).await), (7, vec![Value::Null]));
    }

    #[tokio::test]
    async fn test_unknown_handle_gets_no_reply() {
        let shared = shared();
        let (mut client, _handle) = serve(shared.clone());
        hello(&mut client, None).await;

        send(&mut client, Frame::emit("no-such-api", &[json!("1")], Some(1)).unwrap()).await;
        send(
            &mut client,
            Frame::emit("subscribe-election-doc", &[json!("1")], Some(2)).unwrap(),
        )
        .await;

        let (ack, _) = ack_args(recv(&mut client).await);
        assert_eq!(ack, 2);
        assert_eq!(shared.metrics.failed_requests(), 1);
        assert_eq!(shared.metrics.successful_requests(), 1);
    }

    #[tokio::test]
    async fn test_set_pushes_to_subscriber() {
        let shared = shared();
        let (mut watcher, _hw) = serve(shared.clone());
        let (mut writer, _hs) = serve(shared.clone());
        hello(&mut watcher, None).await;
        hello(&mut writer, Some("moderator")).await;

        send(
            &mut watcher,
            Frame::emit("subscribe-election-doc", &[json!("42")], Some(1)).unwrap(),
        )
        .await;
        ack_args(recv(&mut watcher).await);

        let doc = json!({"electionName": "Mayor"});
        send(
            &mut writer,
            Frame::emit(
                "find-and-set-election-doc",
                &[json!({"_id": "42"}), doc.clone()],
                Some(5),
            )
            .unwrap(),
        )
        .await;
        assert_eq!(ack_args(recv(&mut writer).await), (5, vec![json!(true)]));

        match recv(&mut watcher).await {
            Frame::Push { event, payload } => {
                assert_eq!(event, "subscribe-election-doc:42");
                assert_eq!(payload.to_value().unwrap(), doc);
            }
            other => panic!("expected push, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_disconnect_detaches() {
        let shared = shared();
        let (mut client, handle) = serve(shared.clone());
        hello(&mut client, None).await;
        send(
            &mut client,
            Frame::emit("subscribe-election-doc", &[json!("42")], Some(1)).unwrap(),
        )
        .await;
        ack_args(recv(&mut client).await);
        assert_eq!(shared.channels.subscription_count(), 1);

        drop(client);
        handle.await.unwrap().unwrap();

        assert_eq!(shared.channels.subscription_count(), 0);
        assert_eq!(shared.channels.peer_count(), 0);
        assert_eq!(shared.metrics.active_connections(), 0);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let config = ServerConfig::new("127.0.0.1:0");
        let transport = Arc::new(
            create_transport(
                &config,
                Arc::new(ApiRegistry::new()),
                Arc::new(ChannelManager::new()),
            )
            .await
            .unwrap(),
        );
        assert_ne!(transport.local_addr().port(), 0);

        let (tx, rx) = broadcast::channel(1);
        let running = transport.clone();
        let task = tokio::spawn(async move { running.run_until_shutdown(rx).await });

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
