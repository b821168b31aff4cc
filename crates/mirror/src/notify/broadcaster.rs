//! Connection registry and broadcast

use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use super::MailEvent;
use crate::error::DeliveryError;

/// A live client connection
///
/// `deliver` must not block; implementations queue the event for their own
/// writer and fail only when the peer is gone.
pub trait Connection: Send + Sync {
    fn deliver(&self, event: &MailEvent) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
pub struct Broadcaster {
    connections: RwLock<HashMap<ConnectionId, Arc<dyn Connection>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Arc<dyn Connection>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.connections.write().unwrap().insert(id, connection);
        debug!("Registered connection {}", id);
        id
    }

    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().unwrap().remove(&id).is_some();
        if removed {
            debug!("Unregistered connection {}", id);
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    /// Deliver `event` to every connection, dropping the ones that fail
    pub fn broadcast(&self, event: &MailEvent) -> BroadcastReport {
        // Deliver on a snapshot so registration never waits on a slow peer
        let snapshot: Vec<(ConnectionId, Arc<dyn Connection>)> = self
            .connections
            .read()
            .unwrap()
            .iter()
            .map(|(id, conn)| (*id, Arc::clone(conn)))
            .collect();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (id, conn) in snapshot {
            match conn.deliver(event) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Dropping connection {}: {}", id, e);
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let mut connections = self.connections.write().unwrap();
            for id in &failed {
                connections.remove(id);
            }
            report.dropped = failed.len();
        }

        debug!(
            "Broadcast {} to {} connections ({} dropped)",
            event.kind(),
            report.delivered,
            report.dropped
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Email, ThreadId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<MailEvent>>,
    }

    impl Connection for Recorder {
        fn deliver(&self, event: &MailEvent) -> Result<(), DeliveryError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Closed;

    impl Connection for Closed {
        fn deliver(&self, _event: &MailEvent) -> Result<(), DeliveryError> {
            Err(DeliveryError)
        }
    }

    fn event() -> MailEvent {
        MailEvent::NewEmail {
            email: Email::builder(ThreadId::new("t1")).remote_id("m1").build(),
        }
    }

    #[test]
    fn test_broadcast_reaches_all() {
        let broadcaster = Broadcaster::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        broadcaster.register(a.clone());
        broadcaster.register(b.clone());

        let report = broadcaster.broadcast(&event());
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
        assert_eq!(a.events.lock().unwrap().len(), 1);
        assert_eq!(b.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_connection_dropped_others_served() {
        let broadcaster = Broadcaster::new();
        let before = Arc::new(Recorder::default());
        let after = Arc::new(Recorder::default());
        broadcaster.register(before.clone());
        broadcaster.register(Arc::new(Closed));
        broadcaster.register(after.clone());

        let report = broadcaster.broadcast(&event());
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 1 });
        assert_eq!(broadcaster.connection_count(), 2);
        assert_eq!(before.events.lock().unwrap().len(), 1);
        assert_eq!(after.events.lock().unwrap().len(), 1);

        let report = broadcaster.broadcast(&event());
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn test_unregister() {
        let broadcaster = Broadcaster::new();
        let conn = Arc::new(Recorder::default());
        let id = broadcaster.register(conn.clone());

        assert!(broadcaster.unregister(id));
        assert!(!broadcaster.unregister(id));
        assert_eq!(broadcaster.broadcast(&event()).delivered, 0);
        assert!(conn.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_ids_are_distinct() {
        let broadcaster = Broadcaster::new();
        let a = broadcaster.register(Arc::new(Recorder::default()));
        let b = broadcaster.register(Arc::new(Recorder::default()));
        assert_ne!(a, b);
    }
}
