// ABOUTME: Client registry
// ABOUTME: Thread-safe set of live sinks with register, unregister and snapshot

use crate::server::sink::{Sink, SinkId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Set of currently connected sinks.
///
/// Every operation takes the same lock and holds it only long enough to copy
/// or mutate the map. Sends happen on a [`snapshot`](Self::snapshot), never
/// under the lock.
#[derive(Default)]
pub struct ClientRegistry {
    sinks: Mutex<HashMap<SinkId, Arc<dyn Sink>>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    pub fn register(&self, sink: Arc<dyn Sink>) {
        let id = sink.id();
        let total = {
            let mut sinks = self.sinks.lock();
            sinks.insert(id, sink);
            sinks.len()
        };
        log::info!("Sink {} registered, total sinks: {}", id, total);
    }

    /// Remove a sink if present.
    ///
    /// Safe to call more than once for the same sink; returns whether this
    /// call removed it.
    pub fn unregister(&self, id: SinkId) -> bool {
        let (removed, total) = {
            let mut sinks = self.sinks.lock();
            let removed = sinks.remove(&id).is_some();
            (removed, sinks.len())
        };
        if removed {
            log::info!("Sink {} unregistered, total sinks: {}", id, total);
        }
        removed
    }

    /// Remove several sinks in one critical section, returning how many were
    /// still present
    pub fn unregister_all(&self, ids: &[SinkId]) -> usize {
        let (removed, total) = {
            let mut sinks = self.sinks.lock();
            let removed = ids.iter().filter(|id| sinks.remove(id).is_some()).count();
            (removed, sinks.len())
        };
        if removed > 0 {
            log::info!("Pruned {} sink(s), total sinks: {}", removed, total);
        }
        removed
    }

    /// Point-in-time copy of the live sinks
    pub fn snapshot(&self) -> Vec<Arc<dyn Sink>> {
        self.sinks.lock().values().cloned().collect()
    }

    /// Check whether a sink is registered
    pub fn contains(&self, id: SinkId) -> bool {
        self.sinks.lock().contains_key(&id)
    }

    /// Number of live sinks
    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    /// True if no sink is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("sinks", &self.len())
            .finish()
    }
}
