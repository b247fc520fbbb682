//! Reference-counted channel subscriptions using `scc::HashMap`.
//!
//! Many local subscribers can share one remote room. The registry sends
//! `join_chat` when a channel gains its first subscriber and `leave_chat`
//! when it loses its last one. Both signals are queued while the channel's
//! entry is locked, so their order always matches the order of the
//! transitions that caused them.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use scc::hash_map::Entry;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::{
    error::{SyncError, panic_message},
    event::{ChannelEvent, ChannelId, JOIN_CHAT, LEAVE_CHAT},
    transport::Emitter,
};

/// Callback invoked for every event on a subscribed channel.
pub type ChannelCallback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: ChannelCallback,
}

/// Per-channel state. The reference count is the number of subscribers.
struct ChannelEntry {
    subscribers: Vec<Subscriber>,
    /// A join was queued on the current connection.
    joined: bool,
}

/// Channel subscription multiplexer.
pub struct ChannelRegistry {
    channels: scc::HashMap<ChannelId, ChannelEntry>,
    emitter: Arc<dyn Emitter>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    /// Create an empty registry that signals rooms through `emitter`.
    pub fn new(emitter: Arc<dyn Emitter>) -> Arc<Self> {
        Arc::new(Self {
            channels: scc::HashMap::new(),
            emitter,
            next_id: AtomicU64::new(0),
        })
    }

    /// Register `callback` for events on `channel_id`.
    ///
    /// The first subscriber of a channel triggers a remote join. If the
    /// transport is down, the join is sent by [`rejoin_all`] once it is back.
    ///
    /// [`rejoin_all`]: ChannelRegistry::rejoin_all
    pub fn subscribe<F>(self: &Arc<Self>, channel_id: ChannelId, callback: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let subscriber = Subscriber {
            id,
            active: Arc::clone(&active),
            callback: Arc::new(callback),
        };

        match self.channels.entry(channel_id.clone()) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.subscribers.push(subscriber);
                if !entry.joined {
                    entry.joined = self.signal(JOIN_CHAT, &channel_id);
                }
            }
            Entry::Vacant(entry) => {
                let mut locked = entry.insert_entry(ChannelEntry {
                    subscribers: vec![subscriber],
                    joined: false,
                });
                locked.get_mut().joined = self.signal(JOIN_CHAT, &channel_id);
            }
        }

        Subscription {
            channel_id,
            id,
            active,
            registry: Arc::downgrade(self),
        }
    }

    fn remove_subscriber(&self, channel_id: &ChannelId, id: u64) {
        self.channels.remove_if(channel_id, |entry| {
            let before = entry.subscribers.len();
            entry.subscribers.retain(|s| s.id != id);
            if entry.subscribers.len() == before || !entry.subscribers.is_empty() {
                return false;
            }
            if entry.joined {
                self.signal(LEAVE_CHAT, channel_id);
            }
            true
        });
    }

    /// Returns whether the frame was queued.
    fn signal(&self, frame: &str, channel_id: &ChannelId) -> bool {
        match self
            .emitter
            .emit(frame, json!({ "channelId": channel_id.as_str() }))
        {
            Ok(()) => {
                debug!(channel = %channel_id, frame, "Room signal queued");
                true
            }
            Err(SyncError::NotConnected) => {
                debug!(channel = %channel_id, frame, "Room signal skipped while disconnected");
                false
            }
            Err(e) => {
                warn!(channel = %channel_id, frame, error = %e, "Room signal failed");
                false
            }
        }
    }

    /// Deliver `event` to the subscribers of its channel.
    ///
    /// Callbacks run outside the map lock, so they may subscribe or
    /// unsubscribe. A panicking callback is logged and does not affect the
    /// others. Returns the number of callbacks invoked.
    pub fn dispatch(&self, event: &ChannelEvent) -> usize {
        let Some(snapshot) = self.channels.read(&event.channel_id, |_, entry| {
            entry
                .subscribers
                .iter()
                .map(|s| (Arc::clone(&s.active), Arc::clone(&s.callback)))
                .collect::<Vec<_>>()
        }) else {
            return 0;
        };

        let mut delivered = 0;
        for (active, callback) in snapshot {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            delivered += 1;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                let err = SyncError::subscription(
                    event.channel_id.as_str(),
                    panic_message(panic.as_ref()),
                );
                error!(error = %err, "Channel subscriber failed");
            }
        }
        delivered
    }

    /// Send `join_chat` for every channel not yet joined on the current
    /// connection.
    ///
    /// Runs after every successful (re)connect. Channels joined directly by
    /// [`subscribe`](ChannelRegistry::subscribe) on this connection are
    /// skipped. Returns the number of joins queued.
    pub fn rejoin_all(&self) -> usize {
        let mut joined = 0;
        self.channels.retain(|channel_id, entry| {
            if !entry.joined {
                entry.joined = self.signal(JOIN_CHAT, channel_id);
                joined += usize::from(entry.joined);
            }
            true
        });
        if joined > 0 {
            debug!(count = joined, "Rejoined channels");
        }
        joined
    }

    /// Forget room membership after the connection is lost.
    pub fn reset_membership(&self) {
        self.channels.retain(|_, entry| {
            entry.joined = false;
            true
        });
    }

    /// Drop every subscription without remote leave signals.
    pub fn clear(&self) {
        self.channels.retain(|_, entry| {
            for subscriber in &entry.subscribers {
                subscriber.active.store(false, Ordering::Release);
            }
            false
        });
    }

    /// Number of subscribers on `channel_id`.
    pub fn subscriber_count(&self, channel_id: &ChannelId) -> usize {
        self.channels
            .read(channel_id, |_, entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Number of channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("channels", &self.channels.len())
            .finish()
    }
}

/// Handle for one channel subscription.
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    channel_id: ChannelId,
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<ChannelRegistry>,
}

impl Subscription {
    /// Channel this subscription listens on.
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Whether the callback can still fire.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop delivery. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_subscriber(&self.channel_id, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel_id", &self.channel_id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::Map;

    use super::*;
    use crate::{
        event::{ChatMessage, EventPayload},
        transport::{ConnectionState, fake::RecordingEmitter},
    };

    fn chat(channel: &str, content: &str) -> ChannelEvent {
        ChannelEvent {
            channel_id: channel.into(),
            payload: EventPayload::Chat(ChatMessage {
                message_id: None,
                sender_id: None,
                content: content.to_string(),
                created_at: None,
                correlation_id: None,
                extra: Map::new(),
            }),
        }
    }

    fn setup() -> (Arc<RecordingEmitter>, Arc<ChannelRegistry>) {
        let emitter = Arc::new(RecordingEmitter::connected());
        let registry = ChannelRegistry::new(emitter.clone());
        (emitter, registry)
    }

    #[test]
    fn test_join_and_leave_on_edges_only() {
        let (emitter, registry) = setup();
        let channel = ChannelId::new("chat:42");

        let a = registry.subscribe(channel.clone(), |_| {});
        let b = registry.subscribe(channel.clone(), |_| {});
        assert_eq!(emitter.count(JOIN_CHAT), 1);
        assert_eq!(registry.subscriber_count(&channel), 2);

        a.unsubscribe();
        assert_eq!(emitter.count(LEAVE_CHAT), 0);
        b.unsubscribe();
        assert_eq!(emitter.count(LEAVE_CHAT), 1);
        assert_eq!(registry.channel_count(), 0);

        assert_eq!(
            emitter.frames(),
            vec![
                (JOIN_CHAT.to_string(), json!({"channelId": "chat:42"})),
                (LEAVE_CHAT.to_string(), json!({"channelId": "chat:42"})),
            ]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let (emitter, registry) = setup();
        let channel = ChannelId::new("chat:1");
        let keep = registry.subscribe(channel.clone(), |_| {});
        let sub = registry.subscribe(channel.clone(), |_| {});

        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(registry.subscriber_count(&channel), 1);
        assert_eq!(emitter.count(LEAVE_CHAT), 0);
        drop(keep);
        assert_eq!(emitter.count(LEAVE_CHAT), 1);
    }

    #[test]
    fn test_dispatch_filters_by_channel() {
        let (_emitter, registry) = setup();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let _sub = registry.subscribe("chat:42".into(), move |event| {
            assert_eq!(event.channel_id.as_str(), "chat:42");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.dispatch(&chat("chat:42", "hi")), 1);
        assert_eq!(registry.dispatch(&chat("chat:7", "nope")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_contained() {
        let (_emitter, registry) = setup();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = registry.subscribe("chat:1".into(), |_| panic!("subscriber bug"));
        let counter = hits.clone();
        let _good = registry.subscribe("chat:1".into(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.dispatch(&chat("chat:1", "x")), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let (emitter, registry) = setup();
        let slot: Arc<parking_lot::Mutex<Option<Subscription>>> = Arc::default();

        let inner = slot.clone();
        let sub = registry.subscribe("chat:1".into(), move |_| {
            if let Some(sub) = inner.lock().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        registry.dispatch(&chat("chat:1", "x"));
        assert_eq!(registry.channel_count(), 0);
        assert_eq!(emitter.count(LEAVE_CHAT), 1);
    }

    #[test]
    fn test_subscribe_while_disconnected_joins_on_rejoin() {
        let emitter = Arc::new(RecordingEmitter::new(ConnectionState::Disconnected));
        let registry = ChannelRegistry::new(emitter.clone());

        let _sub = registry.subscribe("chat:9".into(), |_| {});
        assert_eq!(emitter.count(JOIN_CHAT), 0);

        emitter.set_state(ConnectionState::Connected);
        assert_eq!(registry.rejoin_all(), 1);
        assert_eq!(emitter.count(JOIN_CHAT), 1);
    }

    #[test]
    fn test_unsubscribe_stops_only_that_channel() {
        let (_emitter, registry) = setup();
        let a_hits = Arc::new(AtomicUsize::new(0));
        let b_hits = Arc::new(AtomicUsize::new(0));

        let counter = a_hits.clone();
        let a = registry.subscribe("chat:a".into(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = b_hits.clone();
        let _b = registry.subscribe("chat:b".into(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        a.unsubscribe();
        assert_eq!(registry.dispatch(&chat("chat:a", "gone")), 0);
        assert_eq!(registry.dispatch(&chat("chat:b", "still here")), 1);
        assert_eq!(a_hits.load(Ordering::SeqCst), 0);
        assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signals_match_transitions_across_channels() {
        let (emitter, registry) = setup();
        let script = [
            ("chat:a", true),
            ("chat:b", true),
            ("chat:a", true),
            ("chat:c", true),
            ("chat:a", false),
            ("chat:b", false),
            ("chat:b", true),
            ("chat:a", false),
            ("chat:c", true),
            ("chat:c", false),
            ("chat:a", true),
            ("chat:c", false),
            ("chat:b", false),
            ("chat:a", false),
        ];

        let mut held: std::collections::HashMap<&str, Vec<Subscription>> = Default::default();
        let (mut joins, mut leaves) = (0, 0);
        for (channel, subscribe) in script {
            let subs = held.entry(channel).or_default();
            if subscribe {
                if subs.is_empty() {
                    joins += 1;
                }
                subs.push(registry.subscribe(channel.into(), |_| {}));
            } else {
                subs.pop().expect("script unsubscribes a held handle").unsubscribe();
                if subs.is_empty() {
                    leaves += 1;
                }
            }
            assert_eq!(emitter.count(JOIN_CHAT), joins, "joins after {channel}");
            assert_eq!(emitter.count(LEAVE_CHAT), leaves, "leaves after {channel}");
        }
        assert_eq!((joins, leaves), (5, 5));
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_rejoin_skips_channels_joined_on_this_connection() {
        let (emitter, registry) = setup();
        let _a = registry.subscribe("chat:a".into(), |_| {});
        assert_eq!(emitter.count(JOIN_CHAT), 1);

        // Subscribed after the link came up but before the rejoin ran.
        assert_eq!(registry.rejoin_all(), 0);
        assert_eq!(emitter.count(JOIN_CHAT), 1);

        registry.reset_membership();
        assert_eq!(registry.rejoin_all(), 1);
        assert_eq!(registry.rejoin_all(), 0);
        assert_eq!(emitter.count(JOIN_CHAT), 2);
    }

    #[test]
    fn test_unjoined_channel_sends_no_leave() {
        let emitter = Arc::new(RecordingEmitter::new(ConnectionState::Disconnected));
        let registry = ChannelRegistry::new(emitter.clone());

        let sub = registry.subscribe("chat:1".into(), |_| {});
        emitter.set_state(ConnectionState::Connected);
        sub.unsubscribe();
        assert_eq!(emitter.count(LEAVE_CHAT), 0);
    }

    #[test]
    fn test_clear_skips_leave_and_silences_handles() {
        let (emitter, registry) = setup();
        let sub = registry.subscribe("chat:1".into(), |_| {});

        registry.clear();
        assert!(!sub.is_active());
        assert_eq!(registry.channel_count(), 0);
        drop(sub);
        assert_eq!(emitter.count(LEAVE_CHAT), 0);
    }

    #[test]
    fn test_stale_handle_does_not_touch_new_subscription() {
        let (_emitter, registry) = setup();
        let old = registry.subscribe("chat:1".into(), |_| {});
        registry.clear();

        let _new = registry.subscribe("chat:1".into(), |_: &ChannelEvent| {});
        drop(old);
        assert_eq!(registry.subscriber_count(&"chat:1".into()), 1);
    }
}
