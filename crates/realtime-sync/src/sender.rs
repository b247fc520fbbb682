//! Outbound chat sends with ack correlation and HTTP fallback.
//!
//! A send races the transport ack against a timer. Whichever side finishes
//! first claims the pending entry; a lost ack leads to exactly one HTTP
//! fallback attempt, and a failed fallback is reported, never retried.

use std::{
    fmt,
    sync::Arc,
    time::Duration,
};

use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    error::{SyncError, SyncResult},
    event::{ChannelId, CorrelationId, SEND_MESSAGE},
    fallback::{HttpFallback, OutgoingMessage},
    pending::PendingSendStore,
    transport::Emitter,
};

/// How a message reached the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The transport acknowledged the send.
    Acknowledged,
    /// The transport ack did not arrive; the HTTP fallback delivered it.
    Fallback,
}

/// Result of a successful send.
#[derive(Clone, Debug)]
pub struct SendReceipt {
    pub correlation_id: CorrelationId,
    pub channel_id: ChannelId,
    pub delivery: Delivery,
    /// Ack argument returned by the server, for acknowledged sends.
    pub ack: Option<Value>,
}

/// Sends chat messages over the transport, falling back to HTTP.
#[derive(Clone)]
pub struct MessageSender {
    emitter: Arc<dyn Emitter>,
    fallback: Arc<dyn HttpFallback>,
    pending: Arc<PendingSendStore>,
    ack_timeout: Duration,
}

enum Race {
    Acked(Value),
    Lost(SyncError),
    Cancelled,
}

impl MessageSender {
    pub fn new(
        emitter: Arc<dyn Emitter>,
        fallback: Arc<dyn HttpFallback>,
        pending: Arc<PendingSendStore>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            emitter,
            fallback,
            pending,
            ack_timeout,
        }
    }

    /// Send `content` to `channel_id` with the default ack timeout.
    pub async fn send(
        &self,
        channel_id: ChannelId,
        content: impl Into<String>,
    ) -> SyncResult<SendReceipt> {
        self.send_with_timeout(channel_id, content, self.ack_timeout)
            .await
    }

    /// Send `content` to `channel_id`, waiting at most `timeout` for the ack.
    ///
    /// The send runs on its own task, so dropping the returned future does
    /// not abandon the message.
    pub async fn send_with_timeout(
        &self,
        channel_id: ChannelId,
        content: impl Into<String>,
        timeout: Duration,
    ) -> SyncResult<SendReceipt> {
        let correlation_id = CorrelationId::new();
        let cancel_rx = self
            .pending
            .register(correlation_id.clone(), channel_id.clone())?;

        let driver = self.clone();
        let message = OutgoingMessage::new(content, &correlation_id);
        tokio::spawn(async move {
            driver
                .drive(correlation_id, channel_id, message, timeout, cancel_rx)
                .await
        })
        .await
        .map_err(|e| SyncError::internal(format!("Send task failed: {e}")))?
    }

    async fn drive(
        self,
        correlation_id: CorrelationId,
        channel_id: ChannelId,
        message: OutgoingMessage,
        timeout: Duration,
        cancel_rx: oneshot::Receiver<SyncError>,
    ) -> SyncResult<SendReceipt> {
        let race = if self.emitter.state().is_connected() {
            self.race_ack(&channel_id, &message, timeout, cancel_rx)
                .await
        } else {
            Race::Lost(SyncError::NotConnected)
        };

        // The server committed an acked message, so a teardown that claimed
        // the entry meanwhile does not turn it into a cancellation.
        let claimed = self.pending.claim(&correlation_id).is_some();

        match race {
            Race::Acked(ack) => {
                debug!(correlation_id = %correlation_id, channel = %channel_id, "Send acknowledged");
                Ok(SendReceipt {
                    correlation_id,
                    channel_id,
                    delivery: Delivery::Acknowledged,
                    ack: Some(ack),
                })
            }
            _ if !claimed => {
                debug!(correlation_id = %correlation_id, "Send rejected by disconnect");
                Err(SyncError::Cancelled)
            }
            Race::Cancelled => Err(SyncError::Cancelled),
            Race::Lost(reason) => {
                info!(
                    correlation_id = %correlation_id,
                    channel = %channel_id,
                    reason = %reason,
                    "Falling back to HTTP"
                );
                match self.fallback.deliver(&channel_id, &message).await {
                    Ok(()) => Ok(SendReceipt {
                        correlation_id,
                        channel_id,
                        delivery: Delivery::Fallback,
                        ack: None,
                    }),
                    Err(e) => {
                        warn!(correlation_id = %correlation_id, error = %e, "HTTP fallback failed");
                        Err(SyncError::send_failed(channel_id.as_str(), e.to_string()))
                    }
                }
            }
        }
    }

    async fn race_ack(
        &self,
        channel_id: &ChannelId,
        message: &OutgoingMessage,
        timeout: Duration,
        mut cancel_rx: oneshot::Receiver<SyncError>,
    ) -> Race {
        let payload = json!({
            "channelId": channel_id.as_str(),
            "content": message.content,
            "correlationId": message.correlation_id,
        });
        let ack_rx = match self.emitter.emit_with_ack(SEND_MESSAGE, payload) {
            Ok(rx) => rx,
            Err(e) => return Race::Lost(e),
        };

        tokio::select! {
            biased;
            ack = ack_rx => match ack {
                Ok(value) => Race::Acked(value),
                Err(_) => Race::Lost(SyncError::connection("connection lost before ack")),
            },
            _ = &mut cancel_rx => Race::Cancelled,
            _ = tokio::time::sleep(timeout) => Race::Lost(SyncError::AckTimeout { after: timeout }),
        }
    }
}

impl fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSender")
            .field("ack_timeout", &self.ack_timeout)
            .field("pending", &self.pending.len())
            .finish()
    }
}
