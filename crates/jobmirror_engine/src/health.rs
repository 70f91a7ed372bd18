//! Store reachability tracking.

use jobmirror_store::JobStore;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A change of store reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The store answered after being unreachable or unprobed.
    Connected,
    /// The store stopped answering.
    Disconnected,
}

/// Probes the store and reports each reachability transition once.
///
/// Two latches remember which transition was last reported, so a sustained
/// outage produces a single `Disconnected` event however often it is probed.
#[derive(Debug)]
pub struct StoreHealthMonitor {
    was_connected: bool,
    was_disconnected: bool,
    events: broadcast::Sender<ConnectionEvent>,
}

impl StoreHealthMonitor {
    /// Creates a monitor that has not probed yet.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            was_connected: false,
            was_disconnected: false,
            events,
        }
    }

    /// Subscribes to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Probes `store` and returns whether it is reachable.
    pub fn probe<S: JobStore + ?Sized>(&mut self, store: &S) -> bool {
        let reachable = store.ping();
        self.observe(reachable);
        reachable
    }

    /// Records the outcome of a store call without probing.
    ///
    /// Returns the event emitted, if this was a transition.
    pub fn observe(&mut self, reachable: bool) -> Option<ConnectionEvent> {
        let event = if reachable {
            if self.was_connected {
                return None;
            }
            self.was_connected = true;
            self.was_disconnected = false;
            info!("store connection established");
            ConnectionEvent::Connected
        } else {
            if self.was_disconnected {
                return None;
            }
            self.was_disconnected = true;
            self.was_connected = false;
            warn!("store connection lost");
            ConnectionEvent::Disconnected
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
        Some(event)
    }

    /// Returns true if the last observation found the store reachable.
    pub fn is_connected(&self) -> bool {
        self.was_connected
    }
}

impl Default for StoreHealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmirror_store::MemoryStore;

    #[test]
    fn transitions_are_reported_once() {
        let store = MemoryStore::new();
        let mut monitor = StoreHealthMonitor::new();
        let mut events = monitor.subscribe();

        assert!(monitor.probe(&store));
        assert!(monitor.probe(&store));
        store.set_available(false);
        for _ in 0..5 {
            assert!(!monitor.probe(&store));
        }
        store.set_available(true);
        assert!(monitor.probe(&store));

        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Connected);
        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Disconnected);
        assert_eq!(events.try_recv().unwrap(), ConnectionEvent::Connected);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn observe_reports_transition() {
        let mut monitor = StoreHealthMonitor::new();
        assert_eq!(monitor.observe(false), Some(ConnectionEvent::Disconnected));
        assert_eq!(monitor.observe(false), None);
        assert!(!monitor.is_connected());
        assert_eq!(monitor.observe(true), Some(ConnectionEvent::Connected));
        assert!(monitor.is_connected());
    }

    #[test]
    fn probing_without_subscribers() {
        let store = MemoryStore::new();
        let mut monitor = StoreHealthMonitor::default();
        store.set_available(false);
        assert!(!monitor.probe(&store));
    }
}
