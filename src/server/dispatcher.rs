// ABOUTME: Broadcast dispatcher
// ABOUTME: Encodes each captured block once and fans it out to every live sink

use crate::audio::AudioBlock;
use crate::protocol::encode_block;
use crate::server::registry::ClientRegistry;
use axum::body::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sinks in the snapshot (one write attempt each)
    pub attempted: usize,
    /// Writes that succeeded
    pub delivered: usize,
    /// Failed sinks removed from the registry after the pass
    pub pruned: usize,
}

/// Running totals across all passes
#[derive(Debug, Default)]
pub struct DispatchStats {
    frames: AtomicU64,
    deliveries: AtomicU64,
    pruned: AtomicU64,
}

impl DispatchStats {
    /// Blocks broadcast so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Successful sink writes so far
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Sinks dropped after a failed write
    pub fn pruned(&self) -> u64 {
        self.pruned.load(Ordering::Relaxed)
    }
}

/// Pushes every captured block to all registered sinks.
///
/// Best effort: a sink whose write fails is dropped, never retried or
/// buffered, and nothing propagates back to the capture side.
#[derive(Debug)]
pub struct BroadcastDispatcher {
    registry: Arc<ClientRegistry>,
    stats: DispatchStats,
}

impl BroadcastDispatcher {
    /// Create a dispatcher over the given registry
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self {
            registry,
            stats: DispatchStats::default(),
        }
    }

    /// The registry this dispatcher broadcasts to
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Running totals
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Broadcast one block: encode, snapshot, write to each sink, then prune
    /// the sinks that failed.
    pub fn dispatch(&self, block: &AudioBlock) -> BroadcastReport {
        let frame = Bytes::from(encode_block(block));
        let sinks = self.registry.snapshot();

        let mut failed = Vec::new();
        let mut delivered = 0;
        for sink in &sinks {
            match sink.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::debug!("Dropping sink {}: {}", sink.id(), e);
                    failed.push(sink.id());
                }
            }
        }

        let pruned = if failed.is_empty() {
            0
        } else {
            self.registry.unregister_all(&failed)
        };

        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        self.stats
            .deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.stats.pruned.fetch_add(pruned as u64, Ordering::Relaxed);

        BroadcastReport {
            attempted: sinks.len(),
            delivered,
            pruned,
        }
    }
}
