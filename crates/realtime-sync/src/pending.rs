//! Lock-free store of in-flight sends using `scc::HashMap`.
//!
//! Each send is registered under its correlation id. Whoever removes the
//! entry first (the ack path, the timeout path, or a teardown) owns its
//! outcome, which makes resolution exactly-once.

use tokio::sync::oneshot;

use crate::{
    error::{SyncError, SyncResult},
    event::{ChannelId, CorrelationId},
};

/// A send awaiting its outcome.
#[derive(Debug)]
pub struct PendingSend {
    /// Target channel.
    pub channel_id: ChannelId,
    cancel_tx: oneshot::Sender<SyncError>,
}

impl PendingSend {
    /// Reject the send with `error`. Consumes the entry.
    pub fn reject(self, error: SyncError) {
        let _ = self.cancel_tx.send(error);
    }
}

/// Store of in-flight sends.
#[derive(Debug)]
pub struct PendingSendStore {
    sends: scc::HashMap<CorrelationId, PendingSend>,
    max_pending: usize,
}

impl PendingSendStore {
    /// Create a store admitting at most `max_pending` sends.
    pub fn new(max_pending: usize) -> Self {
        Self {
            sends: scc::HashMap::new(),
            max_pending,
        }
    }

    /// Register a send.
    ///
    /// The returned receiver yields an error if the send is rejected by a
    /// teardown before the sender claims it.
    pub fn register(
        &self,
        id: CorrelationId,
        channel_id: ChannelId,
    ) -> SyncResult<oneshot::Receiver<SyncError>> {
        if self.sends.len() >= self.max_pending {
            return Err(SyncError::capacity_exceeded("Too many pending sends"));
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let pending = PendingSend {
            channel_id,
            cancel_tx,
        };
        if self.sends.insert(id, pending).is_err() {
            return Err(SyncError::internal("Duplicate correlation id"));
        }
        Ok(cancel_rx)
    }

    /// Take ownership of a send's outcome.
    ///
    /// Returns `None` if someone else already claimed it.
    pub fn claim(&self, id: &CorrelationId) -> Option<PendingSend> {
        self.sends.remove(id).map(|(_, pending)| pending)
    }

    /// Reject every pending send with [`SyncError::Cancelled`].
    ///
    /// Returns the number of rejected sends.
    pub fn clear_with_error(&self) -> usize {
        let mut ids = Vec::new();
        self.sends.scan(|id, _| ids.push(id.clone()));

        let mut rejected = 0;
        for id in ids {
            if let Some(pending) = self.claim(&id) {
                pending.reject(SyncError::Cancelled);
                rejected += 1;
            }
        }
        rejected
    }

    /// Get the current number of pending sends.
    pub fn len(&self) -> usize {
        self.sends.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_is_exactly_once() {
        let store = PendingSendStore::new(10);
        let id = CorrelationId::new();
        let _rx = store.register(id.clone(), "chat:1".into()).unwrap();
        assert_eq!(store.len(), 1);

        let first = store.claim(&id);
        assert_eq!(first.unwrap().channel_id.as_str(), "chat:1");
        assert!(store.claim(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_capacity_limit() {
        let store = PendingSendStore::new(2);
        let _a = store.register(CorrelationId::new(), "c".into()).unwrap();
        let _b = store.register(CorrelationId::new(), "c".into()).unwrap();

        let err = store
            .register(CorrelationId::new(), "c".into())
            .unwrap_err();
        assert!(matches!(err, SyncError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn test_clear_rejects_all() {
        let store = PendingSendStore::new(10);
        let rx1 = store.register(CorrelationId::new(), "a".into()).unwrap();
        let rx2 = store.register(CorrelationId::new(), "b".into()).unwrap();

        assert_eq!(store.clear_with_error(), 2);
        assert!(store.is_empty());
        assert!(matches!(rx1.await, Ok(SyncError::Cancelled)));
        assert!(matches!(rx2.await, Ok(SyncError::Cancelled)));
    }

    #[test]
    fn test_claimed_send_is_not_rejected() {
        let store = PendingSendStore::new(10);
        let id = CorrelationId::new();
        let mut rx = store.register(id.clone(), "a".into()).unwrap();

        let pending = store.claim(&id).unwrap();
        assert_eq!(store.clear_with_error(), 0);
        drop(pending);
        assert!(rx.try_recv().is_err());
    }
}
