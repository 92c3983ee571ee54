// ABOUTME: Output sinks for connected consumers
// ABOUTME: A sink accepts encoded frames without blocking or reports failure

use axum::body::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Unique sink identifier
pub type SinkId = Uuid;

/// Why a write to a sink failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// Consumer is too far behind; its queue is at capacity
    #[error("sink queue is full")]
    Full,

    /// Consumer is gone
    #[error("sink is closed")]
    Closed,
}

/// One connected consumer of broadcast frames.
///
/// `try_send` must return promptly: the dispatcher calls it from the capture
/// thread for every block.
pub trait Sink: Send + Sync {
    /// Identity used by the registry
    fn id(&self) -> SinkId;

    /// Hand one encoded frame to the consumer
    fn try_send(&self, frame: Bytes) -> Result<(), SinkError>;
}

/// Sink backed by a bounded queue drained by a per-connection writer task
#[derive(Debug)]
pub struct ChannelSink {
    id: SinkId,
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a sink holding at most `capacity` undelivered frames.
    ///
    /// Returns the sink and the receiving end for the writer task.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            id: Uuid::new_v4(),
            tx,
        };
        (sink, rx)
    }
}

impl Sink for ChannelSink {
    fn id(&self) -> SinkId {
        self.id
    }

    fn try_send(&self, frame: Bytes) -> Result<(), SinkError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
