//! In-process category fan-out.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use tracing::error;

use crate::{
    error::{SyncError, panic_message},
    event::{ChannelEvent, EventCategory},
};

/// Callback invoked for every event of a category.
pub type CategoryCallback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

struct Listener {
    id: u64,
    active: Arc<AtomicBool>,
    callback: CategoryCallback,
}

/// Category-scoped publish/subscribe with no remote signaling.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventCategory, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `callback` for every event of `category`.
    pub fn subscribe<F>(self: &Arc<Self>, category: EventCategory, callback: F) -> BusSubscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.listeners
            .write()
            .entry(category)
            .or_default()
            .push(Listener {
                id,
                active: Arc::clone(&active),
                callback: Arc::new(callback),
            });

        BusSubscription {
            category,
            id,
            active,
            bus: Arc::downgrade(self),
        }
    }

    /// Invoke every subscriber of `category`, in registration order.
    ///
    /// Returns the number of callbacks invoked.
    pub fn publish(&self, category: EventCategory, event: &ChannelEvent) -> usize {
        let snapshot: Vec<_> = match self.listeners.read().get(&category) {
            Some(listeners) => listeners
                .iter()
                .map(|l| (Arc::clone(&l.active), Arc::clone(&l.callback)))
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (active, callback) in snapshot {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            delivered += 1;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                let err = SyncError::subscription(category.to_string(), panic_message(panic.as_ref()));
                error!(error = %err, "Category subscriber failed");
            }
        }
        delivered
    }

    /// Number of subscribers on `category`.
    pub fn subscriber_count(&self, category: EventCategory) -> usize {
        self.listeners.read().get(&category).map_or(0, Vec::len)
    }

    /// Drop every subscriber.
    pub fn clear(&self) {
        for listener in self.listeners.write().drain().flat_map(|(_, l)| l) {
            listener.active.store(false, Ordering::Release);
        }
    }

    fn remove(&self, category: EventCategory, id: u64) {
        let mut listeners = self.listeners.write();
        if let Some(list) = listeners.get_mut(&category) {
            list.retain(|l| l.id != id);
            if list.is_empty() {
                listeners.remove(&category);
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("categories", &self.listeners.read().len())
            .finish()
    }
}

/// Handle for one category subscription. Dropping it unsubscribes.
#[must_use = "dropping a BusSubscription unsubscribes immediately"]
pub struct BusSubscription {
    category: EventCategory,
    id: u64,
    active: Arc<AtomicBool>,
    bus: Weak<EventBus>,
}

impl BusSubscription {
    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop delivery. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.category, self.id);
        }
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSubscription")
            .field("category", &self.category)
            .field("active", &self.is_active())
            .finish()
    }
}
