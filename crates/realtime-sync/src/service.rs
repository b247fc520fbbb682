//! Composition root: wires the transport, registry, bus, sender and the
//! reconnection supervisor behind one object.

use std::{
    fmt,
    pin::Pin,
    sync::{Arc, OnceLock, Weak},
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::Sleep,
};
use tracing::{debug, error, info, warn};

use crate::{
    auth::{AuthPlacement, Credentials, TokenStore},
    bus::{BusSubscription, EventBus},
    config::SyncConfig,
    error::{SyncError, SyncResult},
    event::{ChannelEvent, ChannelId, EventCategory},
    fallback::HttpFallback,
    network::NetworkMonitor,
    pending::PendingSendStore,
    reconnect::{Decision, ReconnectState, ReconnectionPolicy},
    registry::{ChannelRegistry, Subscription},
    sender::{MessageSender, SendReceipt},
    transport::{ConnectionState, Emitter, FrameSink, TransportConnection, TransportEvent},
};

/// User-facing connection status, suitable for an offline indicator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Not initialized yet.
    Idle,
    /// Initial connect in progress.
    Connecting,
    /// Live.
    Connected,
    /// Retrying after a failure.
    Reconnecting { attempt: u32 },
    /// The network is unreachable; retries are paused.
    Offline,
    /// Retries exhausted. Sends still work through the HTTP fallback.
    Suspended,
    /// Torn down by [`SyncService::disconnect`].
    Closed,
}

impl ConnectionStatus {
    /// Whether the realtime path is currently unavailable.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Connected | Self::Idle)
    }

    fn from_policy(state: &ReconnectState) -> Self {
        match *state {
            ReconnectState::Idle => Self::Idle,
            ReconnectState::Connecting { attempt: 0 } => Self::Connecting,
            ReconnectState::Connecting { attempt } => Self::Reconnecting { attempt },
            ReconnectState::Connected => Self::Connected,
            ReconnectState::Backoff { attempt, .. } => Self::Reconnecting {
                attempt: attempt.saturating_add(1),
            },
            ReconnectState::Paused => Self::Offline,
            ReconnectState::Suspended => Self::Suspended,
        }
    }
}

/// Routes validated inbound events to channel and category subscribers.
struct Dispatcher {
    registry: OnceLock<Weak<ChannelRegistry>>,
    bus: Arc<EventBus>,
}

impl FrameSink for Dispatcher {
    fn on_event(&self, name: &str, payload: Value) {
        let event = match ChannelEvent::from_frame(name, payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(event = name, "Ignoring unrouted event");
                return;
            }
            Err(e) => {
                warn!(event = name, error = %e, "Dropping invalid event");
                return;
            }
        };

        if let Some(registry) = self.registry.get().and_then(Weak::upgrade) {
            registry.dispatch(&event);
        }
        self.bus.publish(event.category(), &event);
    }
}

struct SupervisorHandle {
    stop_tx: oneshot::Sender<()>,
    retry_tx: mpsc::Sender<()>,
    task: JoinHandle<mpsc::Receiver<TransportEvent>>,
}

/// Client-side realtime synchronization service.
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use realtime_sync::{StaticTokenStore, SyncConfig, SyncService};
///
/// # async fn run() -> Result<(), realtime_sync::SyncError> {
/// let config = SyncConfig::new("https://rt.example.com", "https://api.example.com");
/// let service = SyncService::with_http_fallback(config, Arc::new(StaticTokenStore::new("token")))?;
///
/// service.initialize("app-1").await;
/// let _sub = service.subscribe_to_channel("chat:42", |event| {
///     println!("{:?}", event.as_chat());
/// });
/// let receipt = service.send_message("chat:42", "hello").await?;
/// println!("delivered via {:?}", receipt.delivery);
/// # Ok(())
/// # }
/// ```
pub struct SyncService {
    config: Arc<SyncConfig>,
    tokens: Arc<dyn TokenStore>,
    transport: Arc<TransportConnection>,
    registry: Arc<ChannelRegistry>,
    bus: Arc<EventBus>,
    pending: Arc<PendingSendStore>,
    sender: MessageSender,
    network: Arc<NetworkMonitor>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    supervisor: Mutex<Option<SupervisorHandle>>,
}

impl SyncService {
    /// Build a service with a custom HTTP fallback.
    pub fn new(
        config: SyncConfig,
        tokens: Arc<dyn TokenStore>,
        fallback: Arc<dyn HttpFallback>,
    ) -> SyncResult<Self> {
        config.validate().map_err(SyncError::config)?;
        let config = Arc::new(config);

        let bus = EventBus::new();
        let dispatcher = Arc::new(Dispatcher {
            registry: OnceLock::new(),
            bus: Arc::clone(&bus),
        });
        let (transport, events_rx) = TransportConnection::new(Arc::clone(&config), dispatcher.clone());
        let transport = Arc::new(transport);

        let registry = ChannelRegistry::new(transport.clone());
        let _ = dispatcher.registry.set(Arc::downgrade(&registry));

        let pending = Arc::new(PendingSendStore::new(config.max_pending_sends));
        let sender = MessageSender::new(
            transport.clone(),
            fallback,
            Arc::clone(&pending),
            config.ack_timeout,
        );
        let (status_tx, _) = watch::channel(ConnectionStatus::Idle);

        Ok(Self {
            config,
            tokens,
            transport,
            registry,
            bus,
            pending,
            sender,
            network: Arc::new(NetworkMonitor::new()),
            status_tx: Arc::new(status_tx),
            events_rx: Mutex::new(Some(events_rx)),
            supervisor: Mutex::new(None),
        })
    }

    /// Build a service whose fallback POSTs to the configured REST API.
    #[cfg(feature = "http-fallback")]
    pub fn with_http_fallback(config: SyncConfig, tokens: Arc<dyn TokenStore>) -> SyncResult<Self> {
        let fallback = crate::fallback::ReqwestFallback::new(
            config.api_url.clone(),
            Arc::clone(&tokens),
            config.fallback_timeout,
        )?;
        Self::new(config, tokens, Arc::new(fallback))
    }

    /// Connect and start the reconnection supervisor.
    ///
    /// Returns whether the first connect attempt succeeded within the
    /// handshake timeout. On failure the supervisor keeps retrying in the
    /// background. Calling this while already initialized returns the
    /// current connection state.
    pub async fn initialize(&self, app_id: impl Into<String>) -> bool {
        let first_rx = {
            let mut supervisor = self.supervisor.lock();
            if supervisor.is_some() {
                return self.transport.state().is_connected();
            }
            let Some(mut events_rx) = self.events_rx.lock().take() else {
                error!("Lifecycle channel lost; cannot initialize");
                return false;
            };
            // Leftovers from a previous session.
            while events_rx.try_recv().is_ok() {}

            let (stop_tx, stop_rx) = oneshot::channel();
            let (retry_tx, retry_rx) = mpsc::channel(1);
            let (first_tx, first_rx) = oneshot::channel();

            let mut network_rx = self.network.subscribe();
            let _ = network_rx.borrow_and_update();

            let mut policy = ReconnectionPolicy::new(
                self.config.backoff(),
                self.config.reconnect_max_attempts,
            );
            if !self.network.is_online() {
                policy.on_offline();
            }

            let worker = Supervisor {
                app_id: app_id.into(),
                placement: self.config.auth_placement,
                tokens: Arc::clone(&self.tokens),
                transport: Arc::clone(&self.transport),
                registry: Arc::clone(&self.registry),
                policy,
                events_rx,
                network_rx,
                retry_rx,
                stop_rx,
                status_tx: Arc::clone(&self.status_tx),
                first_tx: Some(first_tx),
            };
            let task = tokio::spawn(worker.run());
            *supervisor = Some(SupervisorHandle {
                stop_tx,
                retry_tx,
                task,
            });
            first_rx
        };

        first_rx.await.unwrap_or(false)
    }

    /// Subscribe to events on one channel.
    pub fn subscribe_to_channel<F>(&self, channel_id: impl Into<ChannelId>, callback: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.registry.subscribe(channel_id.into(), callback)
    }

    /// Subscribe to every event of one category.
    pub fn subscribe_to_category<F>(&self, category: EventCategory, callback: F) -> BusSubscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(category, callback)
    }

    /// Send a chat message. See [`MessageSender`].
    pub async fn send_message(
        &self,
        channel_id: impl Into<ChannelId>,
        content: impl Into<String>,
    ) -> SyncResult<SendReceipt> {
        self.sender.send(channel_id.into(), content).await
    }

    /// Ask the supervisor to retry now, e.g. from a "tap to reconnect" action.
    pub fn reconnect_now(&self) {
        if let Some(supervisor) = self.supervisor.lock().as_ref() {
            let _ = supervisor.retry_tx.try_send(());
        }
    }

    /// Tear everything down.
    ///
    /// Pending sends are rejected with [`SyncError::Cancelled`] and all
    /// subscriptions are dropped without remote leave frames.
    pub async fn disconnect(&self) {
        let supervisor = self.supervisor.lock().take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.stop_tx.send(());
            match supervisor.task.await {
                Ok(events_rx) => *self.events_rx.lock() = Some(events_rx),
                Err(e) => error!(error = %e, "Supervisor task failed"),
            }
        }

        // Pending sends are claimed before the socket closes.
        let rejected = self.pending.clear_with_error();
        self.transport.disconnect().await;
        self.registry.clear();
        self.bus.clear();
        self.status_tx.send_replace(ConnectionStatus::Closed);
        info!(rejected, "Sync service disconnected");
    }

    /// Watch status changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Current status.
    pub fn current_status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Transport-level connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Network reachability input, to be fed by the host platform.
    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    /// Number of sends awaiting an outcome.
    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    /// Number of subscribers on `channel_id`.
    pub fn channel_subscribers(&self, channel_id: &ChannelId) -> usize {
        self.registry.subscriber_count(channel_id)
    }
}

impl fmt::Debug for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("transport", &self.transport)
            .field("status", &self.current_status())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Background task executing [`ReconnectionPolicy`] decisions.
struct Supervisor {
    app_id: String,
    placement: AuthPlacement,
    tokens: Arc<dyn TokenStore>,
    transport: Arc<TransportConnection>,
    registry: Arc<ChannelRegistry>,
    policy: ReconnectionPolicy,
    events_rx: mpsc::Receiver<TransportEvent>,
    network_rx: watch::Receiver<bool>,
    retry_rx: mpsc::Receiver<()>,
    stop_rx: oneshot::Receiver<()>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    first_tx: Option<oneshot::Sender<bool>>,
}

impl Supervisor {
    /// Runs until stopped; hands the lifecycle receiver back for reuse.
    async fn run(mut self) -> mpsc::Receiver<TransportEvent> {
        let mut decision = self.policy.start();
        if decision != Decision::Connect {
            self.report_first(false);
        }
        let mut backoff: Option<Pin<Box<Sleep>>> = None;

        loop {
            match decision {
                Decision::Connect => {
                    self.publish_status();
                    decision = tokio::select! {
                        biased;
                        _ = &mut self.stop_rx => break,
                        result = connect_once(&self.transport, self.tokens.as_ref(), self.placement, &self.app_id) => {
                            self.on_connect_result(result)
                        }
                    };
                    continue;
                }
                Decision::Wait(delay) => {
                    debug!(delay_ms = delay.as_millis(), attempt = self.policy.attempt(), "Waiting before reconnect");
                    backoff = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Decision::Suspend => {
                    backoff = None;
                    warn!(attempts = self.policy.attempt(), "Reconnection suspended");
                }
                Decision::Idle => {}
            }
            self.publish_status();

            decision = tokio::select! {
                biased;
                _ = &mut self.stop_rx => break,
                Some(event) = self.events_rx.recv() => self.on_transport_event(event),
                Ok(()) = self.network_rx.changed() => {
                    let online = *self.network_rx.borrow_and_update();
                    info!(online, "Network state changed");
                    if online {
                        self.policy.on_online()
                    } else {
                        self.policy.on_offline()
                    }
                }
                Some(()) = self.retry_rx.recv() => self.policy.on_manual_retry(),
                _ = async {
                    match backoff.as_mut() {
                        Some(sleep) => sleep.await,
                        None => std::future::pending().await,
                    }
                } => {
                    backoff = None;
                    self.policy.on_backoff_elapsed()
                }
            };
        }

        self.policy.reset();
        debug!("Supervisor stopped");
        self.events_rx
    }

    fn on_connect_result(&mut self, result: SyncResult<()>) -> Decision {
        match result {
            // Completion is signalled by TransportEvent::Connected.
            Ok(()) => Decision::Idle,
            Err(e) if e.is_connectivity() => {
                warn!(error = %e, attempt = self.policy.attempt(), "Connect attempt failed");
                self.report_first(false);
                self.policy.on_failure()
            }
            Err(e) => {
                error!(error = %e, "Connect attempt failed; not retrying");
                self.report_first(false);
                self.policy.on_fatal()
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Decision {
        match event {
            TransportEvent::Connected => {
                self.policy.on_connected();
                let rejoined = self.registry.rejoin_all();
                info!(rejoined, "Realtime connection established");
                self.report_first(true);
                Decision::Idle
            }
            TransportEvent::Disconnected { reason } => {
                warn!(reason = %reason, "Realtime connection lost");
                self.registry.reset_membership();
                self.policy.on_failure()
            }
            TransportEvent::Error { error } => {
                warn!(error = %error, "Realtime connection failed");
                self.registry.reset_membership();
                self.policy.on_failure()
            }
        }
    }

    fn report_first(&mut self, connected: bool) {
        if let Some(tx) = self.first_tx.take() {
            let _ = tx.send(connected);
        }
    }

    fn publish_status(&self) {
        let status = ConnectionStatus::from_policy(self.policy.state());
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

async fn connect_once(
    transport: &TransportConnection,
    tokens: &dyn TokenStore,
    placement: AuthPlacement,
    app_id: &str,
) -> SyncResult<()> {
    let token = tokens.token().await?;
    transport
        .connect(&Credentials::new(token, placement), app_id)
        .await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ConnectionStatus::from_policy(&ReconnectState::Connecting { attempt: 0 }),
            ConnectionStatus::Connecting
        );
        assert_eq!(
            ConnectionStatus::from_policy(&ReconnectState::Backoff {
                attempt: 2,
                delay: Duration::from_secs(4),
            }),
            ConnectionStatus::Reconnecting { attempt: 3 }
        );
        assert_eq!(
            ConnectionStatus::from_policy(&ReconnectState::Paused),
            ConnectionStatus::Offline
        );
        assert!(ConnectionStatus::Suspended.is_degraded());
        assert!(!ConnectionStatus::Connected.is_degraded());
    }
}
