//! Network reachability signal.

use tokio::sync::watch;
use tracing::debug;

/// Reports online/offline transitions.
///
/// The host platform feeds it with [`NetworkMonitor::set_online`]; the
/// reconnection supervisor observes it through [`NetworkMonitor::subscribe`].
/// Repeated reports of the same state are coalesced.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Create a monitor starting in the online state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx }
    }

    /// Record the current reachability.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            debug!(online, "Network reachability changed");
        }
    }

    /// Last reported reachability.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Watch reachability transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_observed() {
        let monitor = NetworkMonitor::new();
        let mut rx = monitor.subscribe();
        assert!(*rx.borrow_and_update());

        monitor.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_online());
    }

    #[test]
    fn test_duplicate_reports_are_coalesced() {
        let monitor = NetworkMonitor::new();
        let mut rx = monitor.subscribe();
        rx.borrow_and_update();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
