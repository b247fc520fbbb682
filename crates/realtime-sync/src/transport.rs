//! Single duplex connection to the realtime endpoint.
//!
//! [`TransportConnection`] is a cheap handle; each live connection runs as
//! an actor task that owns the socket. The actor:
//! - answers server heartbeats and enforces the ping deadline
//! - decodes inbound events and hands them to a [`FrameSink`] in arrival order
//! - writes outbound events and resolves their acks
//! - reports how the connection ended as a [`TransportEvent`]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        Error as WsError, Message,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{HeaderValue, header::AUTHORIZATION},
        protocol::WebSocketConfig,
    },
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    auth::{AuthPlacement, Credentials},
    config::SyncConfig,
    error::{SyncError, SyncResult},
    protocol::{ENGINE_IO_VERSION, Handshake, Packet},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// How long a graceful close may take before the actor is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection state as seen by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Namespace connected; emits are accepted.
    Connected,
}

impl ConnectionState {
    /// Check if emits are accepted.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Lifecycle notifications for the reconnection supervisor.
#[derive(Debug)]
pub enum TransportEvent {
    /// A connect attempt completed its handshake.
    Connected,
    /// The connection ended without a local request.
    Disconnected {
        /// Socket.IO style reason (`"ping timeout"`, `"transport close"`, ...).
        reason: String,
    },
    /// The connection failed with an error.
    Error { error: SyncError },
}

/// Receiver for inbound events, invoked on the connection task.
///
/// Calls happen in transport order and must not block.
pub trait FrameSink: Send + Sync + 'static {
    /// Handle an inbound `event` frame.
    fn on_event(&self, name: &str, payload: Value);
}

/// Outbound half of the transport.
pub trait Emitter: Send + Sync {
    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Queue an event for sending. Never waits on the network.
    fn emit(&self, event: &str, payload: Value) -> SyncResult<()>;

    /// Queue an event that requests a server ack.
    ///
    /// The receiver yields the first ack argument, or observes closure if the
    /// connection goes away before the ack arrives.
    fn emit_with_ack(&self, event: &str, payload: Value) -> SyncResult<oneshot::Receiver<Value>>;
}

/// Commands sent from the handle to the connection actor.
enum Command {
    /// Write an event frame.
    Emit {
        event: String,
        payload: Value,
        ack_tx: Option<oneshot::Sender<Value>>,
    },
    /// Close gracefully.
    Close,
}

/// A live connection actor.
struct Link {
    cmd_tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl Link {
    async fn shutdown(self) {
        let Self { cmd_tx, mut task } = self;
        let _ = cmd_tx.try_send(Command::Close);
        drop(cmd_tx);
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            warn!("Connection actor did not stop in time; aborting");
            task.abort();
        }
    }
}

/// Handle to the realtime connection.
///
/// At most one connection actor is live per handle: a new [`connect`]
/// first tears the previous one down.
///
/// [`connect`]: TransportConnection::connect
pub struct TransportConnection {
    config: Arc<SyncConfig>,
    sink: Arc<dyn FrameSink>,
    events_tx: mpsc::Sender<TransportEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    generation: Arc<AtomicU64>,
    link: Mutex<Option<Link>>,
}

impl TransportConnection {
    /// Create a disconnected transport.
    ///
    /// Returns the handle and the receiver for lifecycle events.
    pub fn new(
        config: Arc<SyncConfig>,
        sink: Arc<dyn FrameSink>,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let transport = Self {
            config,
            sink,
            events_tx,
            state_tx: Arc::new(state_tx),
            generation: Arc::new(AtomicU64::new(0)),
            link: Mutex::new(None),
        };
        (transport, events_rx)
    }

    /// Open the connection and complete the Socket.IO handshake.
    ///
    /// The whole handshake is bounded by the configured handshake timeout.
    /// On success a [`TransportEvent::Connected`] is published.
    pub(crate) async fn connect(&self, credentials: &Credentials, app_id: &str) -> SyncResult<()> {
        let previous = self.detach();
        if let Some(link) = previous {
            debug!("Tearing down previous connection");
            link.shutdown().await;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.state_tx.send_replace(ConnectionState::Connecting);

        let result = self.establish(credentials, app_id).await;
        let (ws, handshake) = match result {
            Ok(established) => established,
            Err(e) => {
                if self.generation.load(Ordering::SeqCst) == generation {
                    self.state_tx.send_replace(ConnectionState::Disconnected);
                }
                return Err(e);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.command_channel_capacity);
        let (write, read) = ws.split();
        let actor = ConnectionActor {
            generation,
            current: Arc::clone(&self.generation),
            cmd_rx,
            sink: Arc::clone(&self.sink),
            events_tx: self.events_tx.clone(),
            state_tx: Arc::clone(&self.state_tx),
            write,
            acks: AckTable::default(),
            ping_deadline: handshake.ping_deadline(),
            max_message_size: self.config.max_message_size,
        };

        {
            let mut link = self.link.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                // disconnect() raced the handshake
                return Err(SyncError::Cancelled);
            }
            let task = tokio::spawn(actor.run(read));
            *link = Some(Link { cmd_tx, task });
            self.state_tx.send_replace(ConnectionState::Connected);
        }

        info!(sid = %handshake.sid, ping_interval_ms = handshake.ping_interval, "Transport connected");
        if self.events_tx.try_send(TransportEvent::Connected).is_err() {
            warn!("Lifecycle channel full; dropped connected event");
        }
        Ok(())
    }

    /// Close the connection without publishing a lifecycle event.
    pub async fn disconnect(&self) {
        if let Some(link) = self.detach() {
            link.shutdown().await;
            info!("Transport disconnected");
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    /// Take the current link and invalidate its generation so the actor
    /// stops publishing state.
    fn detach(&self) -> Option<Link> {
        let mut link = self.link.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        link.take()
    }

    async fn establish(
        &self,
        credentials: &Credentials,
        app_id: &str,
    ) -> SyncResult<(WsStream, Handshake)> {
        let url = endpoint_url(&self.config, credentials)?;
        let request = build_request(&url, credentials)?;
        let connect_payload = credentials.connect_payload(app_id);

        debug!(url = %redacted(&url), "Connecting to realtime endpoint");
        let timeout = self.config.handshake_timeout;
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(self.config.max_message_size))
            .max_frame_size(Some(self.config.max_message_size));
        match tokio::time::timeout(timeout, handshake(request, connect_payload, ws_config)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::timeout(timeout)),
        }
    }

    fn send_command(&self, command: Command) -> SyncResult<()> {
        if !self.state().is_connected() {
            return Err(SyncError::NotConnected);
        }
        let link = self.link.lock();
        let link = link.as_ref().ok_or(SyncError::NotConnected)?;
        link.cmd_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                SyncError::capacity_exceeded("Transport command queue is full")
            }
            mpsc::error::TrySendError::Closed(_) => SyncError::NotConnected,
        })
    }
}

impl Emitter for TransportConnection {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn emit(&self, event: &str, payload: Value) -> SyncResult<()> {
        self.send_command(Command::Emit {
            event: event.to_string(),
            payload,
            ack_tx: None,
        })
    }

    fn emit_with_ack(&self, event: &str, payload: Value) -> SyncResult<oneshot::Receiver<Value>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send_command(Command::Emit {
            event: event.to_string(),
            payload,
            ack_tx: Some(ack_tx),
        })?;
        Ok(ack_rx)
    }
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection")
            .field("url", &self.config.socket_url)
            .field("state", &self.state())
            .finish()
    }
}

/// Build the WebSocket upgrade URL for the configured endpoint.
pub(crate) fn endpoint_url(config: &SyncConfig, credentials: &Credentials) -> SyncResult<Url> {
    let mut url = Url::parse(&config.socket_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::config(format!("Unsupported URL scheme: {other}")));
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| SyncError::config("Cannot rewrite URL scheme"))?;
    url.set_path(&config.socket_path);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", ENGINE_IO_VERSION);
        query.append_pair("transport", "websocket");
        if credentials.placement == AuthPlacement::Query
            && let Some(token) = &credentials.token
        {
            query.append_pair("token", token);
        }
    }
    Ok(url)
}

fn build_request(url: &Url, credentials: &Credentials) -> SyncResult<Request> {
    let mut request = url.as_str().into_client_request()?;
    if credentials.placement == AuthPlacement::Header
        && let Some(token) = &credentials.token
    {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| SyncError::config(format!("Invalid token header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

/// URL with any `token` query parameter masked, for logging.
fn redacted(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

/// Engine.IO open, then Socket.IO namespace connect.
async fn handshake(
    request: Request,
    connect_payload: Option<Value>,
    ws_config: WebSocketConfig,
) -> SyncResult<(WsStream, Handshake)> {
    let (mut ws, _) = connect_async_with_config(request, Some(ws_config), false)
        .await
        .map_err(|e| SyncError::connection(format!("WebSocket connect failed: {e}")))?;

    let open = loop {
        match next_packet(&mut ws).await? {
            Packet::Open(open) => break open,
            Packet::Noop => continue,
            other => {
                return Err(SyncError::protocol(format!(
                    "expected open packet, got {other:?}"
                )));
            }
        }
    };

    ws.send(Message::text(Packet::Connect(connect_payload).encode()?))
        .await?;

    loop {
        match next_packet(&mut ws).await? {
            Packet::Connect(_) => return Ok((ws, open)),
            Packet::ConnectError(message) => {
                return Err(SyncError::connection(format!(
                    "Handshake rejected: {message}"
                )));
            }
            Packet::Ping => ws.send(Message::text(Packet::Pong.encode()?)).await?,
            other => debug!(packet = ?other, "Ignoring packet during handshake"),
        }
    }
}

async fn next_packet(ws: &mut WsStream) -> SyncResult<Packet> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Packet::decode(text.as_str()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(SyncError::connection("Connection closed during handshake"));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(SyncError::connection(e.to_string())),
        }
    }
}

/// Ack waiters of one connection, keyed by Socket.IO ack id.
#[derive(Default)]
struct AckTable {
    waiters: HashMap<u64, oneshot::Sender<Value>>,
    next_id: u64,
}

impl AckTable {
    /// Allocate an ack id for `tx`.
    ///
    /// Waiters whose receiver is gone (the sender timed out) are pruned
    /// first, so the table never outgrows the sends still waiting.
    fn register(&mut self, tx: oneshot::Sender<Value>) -> u64 {
        self.waiters.retain(|_, waiter| !waiter.is_closed());
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.waiters.insert(id, tx);
        id
    }

    /// Hand `value` to the waiter for `id`. Returns whether one was waiting.
    fn resolve(&mut self, id: u64, value: Value) -> bool {
        match self.waiters.remove(&id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    fn forget(&mut self, id: u64) {
        self.waiters.remove(&id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Drop every waiter; returns how many there were.
    fn clear(&mut self) -> usize {
        let count = self.waiters.len();
        self.waiters.clear();
        count
    }
}

/// How the actor's loop ended.
enum Exit {
    /// Local close request; nothing to report.
    Closed,
    /// Remote side went away.
    Dropped(&'static str),
    /// I/O or protocol failure.
    Failed(SyncError),
}

/// Owns one live socket for its whole lifetime.
struct ConnectionActor {
    generation: u64,
    current: Arc<AtomicU64>,
    cmd_rx: mpsc::Receiver<Command>,
    sink: Arc<dyn FrameSink>,
    events_tx: mpsc::Sender<TransportEvent>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    write: WsWrite,
    acks: AckTable,
    ping_deadline: Duration,
    max_message_size: usize,
}

impl ConnectionActor {
    async fn run(mut self, mut read: WsRead) {
        let deadline = tokio::time::sleep(self.ping_deadline);
        tokio::pin!(deadline);

        let exit = loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Emit { event, payload, ack_tx }) => {
                        if let Err(e) = self.handle_emit(event, payload, ack_tx).await {
                            break Exit::Failed(e);
                        }
                    }
                    Some(Command::Close) | None => {
                        self.close().await;
                        break Exit::Closed;
                    }
                },

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + self.ping_deadline);
                        match self.handle_text(text.as_str()).await {
                            Ok(None) => {}
                            Ok(Some(exit)) => break exit,
                            Err(e) => break Exit::Failed(e),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = self.write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break Exit::Dropped("transport close"),
                    Some(Ok(_)) => debug!("Ignoring non-text frame"),
                    Some(Err(WsError::Capacity(e))) => {
                        warn!(error = %e, max = self.max_message_size, "Inbound message over size limit");
                        break Exit::Failed(SyncError::protocol(format!(
                            "inbound message over size limit: {e}"
                        )));
                    }
                    Some(Err(e)) => break Exit::Failed(e.into()),
                },

                _ = &mut deadline => break Exit::Dropped("ping timeout"),
            }
        };

        let unanswered = self.acks.clear();
        if unanswered > 0 {
            debug!(count = unanswered, "Dropped outstanding ack waiters");
        }
        self.publish_exit(exit);
    }

    /// Returns `Some(exit)` when the frame ends the connection.
    async fn handle_text(&mut self, text: &str) -> SyncResult<Option<Exit>> {
        let packet = match Packet::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return Ok(None);
            }
        };

        match packet {
            Packet::Ping => self.write_packet(&Packet::Pong).await?,
            Packet::Event {
                name,
                payload,
                ack_id,
            } => {
                if let Some(ack_id) = ack_id {
                    debug!(ack_id, event = %name, "Server requested an ack; not supported");
                }
                self.sink.on_event(&name, payload);
            }
            Packet::Ack { ack_id, args } => {
                if !self
                    .acks
                    .resolve(ack_id, args.into_iter().next().unwrap_or(Value::Null))
                {
                    debug!(ack_id, "Ack for unknown or abandoned id");
                }
            }
            Packet::Disconnect => return Ok(Some(Exit::Dropped("io server disconnect"))),
            Packet::Close => return Ok(Some(Exit::Dropped("transport close"))),
            Packet::ConnectError(message) => {
                return Ok(Some(Exit::Failed(SyncError::connection(message))));
            }
            other => debug!(packet = ?other, "Ignoring control packet"),
        }
        Ok(None)
    }

    async fn handle_emit(
        &mut self,
        event: String,
        payload: Value,
        ack_tx: Option<oneshot::Sender<Value>>,
    ) -> SyncResult<()> {
        let ack_id = match ack_tx {
            Some(ack_tx) => {
                Some(self.acks.register(ack_tx))
            }
            None => None,
        };

        let packet = Packet::event(event, payload, ack_id);
        if let Err(e) = self.write_packet(&packet).await {
            if let Some(id) = ack_id {
                self.acks.forget(id);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn write_packet(&mut self, packet: &Packet) -> SyncResult<()> {
        self.write.send(Message::text(packet.encode()?)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.write_packet(&Packet::Disconnect).await;
        let _ = self.write.close().await;
    }

    fn publish_exit(self, exit: Exit) {
        if self.current.load(Ordering::SeqCst) != self.generation {
            return;
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);

        let event = match exit {
            Exit::Closed => return,
            Exit::Dropped(reason) => {
                warn!(reason, "Transport dropped");
                TransportEvent::Disconnected {
                    reason: reason.to_string(),
                }
            }
            Exit::Failed(error) => {
                warn!(error = %error, "Transport failed");
                TransportEvent::Error { error }
            }
        };
        if self.events_tx.try_send(event).is_err() {
            warn!("Lifecycle channel full; dropped disconnect event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfig {
        SyncConfig::new("https://rt.example.com", "https://api.example.com")
    }

    #[test]
    fn test_endpoint_url_rewrites_scheme_and_path() {
        let url = endpoint_url(&config(), &Credentials::default()).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://rt.example.com/socket.io/?EIO=4&transport=websocket"
        );

        let plain = SyncConfig::new("http://127.0.0.1:3000", "http://127.0.0.1:3000");
        let url = endpoint_url(&plain, &Credentials::default()).unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn test_query_placement_adds_token() {
        let creds = Credentials::new(Some("t0k".into()), AuthPlacement::Query);
        let url = endpoint_url(&config(), &creds).unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "token" && v == "t0k"));
        assert!(!redacted(&url).contains("t0k"));

        let creds = Credentials::new(Some("t0k".into()), AuthPlacement::Payload);
        let url = endpoint_url(&config(), &creds).unwrap();
        assert!(!url.query_pairs().any(|(k, _)| k == "token"));
    }

    #[test]
    fn test_header_placement_sets_authorization() {
        let creds = Credentials::new(Some("t0k".into()), AuthPlacement::Header);
        let url = endpoint_url(&config(), &creds).unwrap();
        let request = build_request(&url, &creds).unwrap();
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer t0k"
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let config = SyncConfig::new("ftp://rt.example.com", "https://api.example.com");
        let err = endpoint_url(&config, &Credentials::default()).unwrap_err();
        assert!(matches!(err, SyncError::Config { .. }));
    }

    #[test]
    fn test_ack_table_prunes_abandoned_waiters() {
        let mut acks = AckTable::default();
        let (tx, abandoned) = oneshot::channel();
        let first = acks.register(tx);
        drop(abandoned);

        let (tx, mut live) = oneshot::channel();
        let second = acks.register(tx);
        assert_ne!(first, second);
        assert_eq!(acks.len(), 1);

        assert!(!acks.resolve(first, Value::Null));
        assert!(acks.resolve(second, serde_json::json!({"ok": true})));
        assert_eq!(live.try_recv().unwrap(), serde_json::json!({"ok": true}));
        assert_eq!(acks.len(), 0);
    }

    #[test]
    fn test_timed_out_sends_do_not_accumulate() {
        let mut acks = AckTable::default();
        for _ in 0..100 {
            let (tx, rx) = oneshot::channel();
            acks.register(tx);
            drop(rx);
        }
        // Only the most recent waiter survives until the next registration.
        assert_eq!(acks.clear(), 1);
    }

    struct NullSink;

    impl FrameSink for NullSink {
        fn on_event(&self, _name: &str, _payload: Value) {}
    }

    #[tokio::test]
    async fn test_emit_requires_connection() {
        let (transport, _events) = TransportConnection::new(Arc::new(config()), Arc::new(NullSink));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert!(matches!(
            transport.emit("join_chat", Value::Null),
            Err(SyncError::NotConnected)
        ));
        assert!(matches!(
            transport.emit_with_ack("send_message", Value::Null),
            Err(SyncError::NotConnected)
        ));
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory [`Emitter`] that records frames instead of sending them.

    use parking_lot::Mutex;
    use serde_json::Value;
    use tokio::sync::oneshot;

    use super::{ConnectionState, Emitter};
    use crate::error::{SyncError, SyncResult};

    pub(crate) struct RecordingEmitter {
        state: Mutex<ConnectionState>,
        frames: Mutex<Vec<(String, Value)>>,
        acks: Mutex<Vec<oneshot::Sender<Value>>>,
        auto_ack: Mutex<Option<Value>>,
    }

    impl RecordingEmitter {
        pub(crate) fn new(state: ConnectionState) -> Self {
            Self {
                state: Mutex::new(state),
                frames: Mutex::new(Vec::new()),
                acks: Mutex::new(Vec::new()),
                auto_ack: Mutex::new(None),
            }
        }

        pub(crate) fn connected() -> Self {
            Self::new(ConnectionState::Connected)
        }

        pub(crate) fn set_state(&self, state: ConnectionState) {
            *self.state.lock() = state;
        }

        /// Answer every acked emit immediately with `reply`.
        pub(crate) fn auto_ack(&self, reply: Value) {
            *self.auto_ack.lock() = Some(reply);
        }

        /// Drop every held ack waiter, as a dying connection would.
        pub(crate) fn drop_acks(&self) {
            self.acks.lock().clear();
        }

        /// Answer every held ack waiter with `value`.
        pub(crate) fn resolve_acks(&self, value: Value) {
            for tx in self.acks.lock().drain(..) {
                let _ = tx.send(value.clone());
            }
        }

        pub(crate) fn frames(&self) -> Vec<(String, Value)> {
            self.frames.lock().clone()
        }

        pub(crate) fn count(&self, name: &str) -> usize {
            self.frames.lock().iter().filter(|(n, _)| n == name).count()
        }
    }

    impl Emitter for RecordingEmitter {
        fn state(&self) -> ConnectionState {
            *self.state.lock()
        }

        fn emit(&self, event: &str, payload: Value) -> SyncResult<()> {
            if !self.state().is_connected() {
                return Err(SyncError::NotConnected);
            }
            self.frames.lock().push((event.to_string(), payload));
            Ok(())
        }

        fn emit_with_ack(
            &self,
            event: &str,
            payload: Value,
        ) -> SyncResult<oneshot::Receiver<Value>> {
            self.emit(event, payload)?;
            let (tx, rx) = oneshot::channel();
            match self.auto_ack.lock().clone() {
                Some(reply) => {
                    let _ = tx.send(reply);
                }
                None => self.acks.lock().push(tx),
            }
            Ok(rx)
        }
    }
}
