//! Event sinks: where processed frames go

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::messages::{AnalysisEvent, AnalysisPayload};
use crate::config::FFT_SIZE_RANGE;

/// Largest spectrum the engine emits (`n / 2` for the biggest FFT size)
pub const MAX_SPECTRUM_BINS: usize = (*FFT_SIZE_RANGE.end() as usize) / 2;

/// Sink errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Event queue is full")]
    Full,

    #[error("No free event buffer")]
    Exhausted,

    #[error("Event receiver is gone")]
    Closed,
}

/// Receiver of analysis events, called on the real-time audio thread.
///
/// Implementations must return promptly, must not block and should not
/// allocate; an error means the event was dropped.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AnalysisEvent<'_>) -> Result<(), SinkError>;
}

type BufferPool = Arc<Mutex<Vec<Vec<f32>>>>;

/// Forwards payloads into a bounded tokio channel without waiting.
///
/// Bin buffers come from a pool filled at construction and return to it when
/// the receiver drops the [`PooledPayload`], so emitting does not allocate.
/// When every buffer is still held by the receiver the event is dropped.
pub struct ChannelSink {
    tx: mpsc::Sender<PooledPayload>,
    pool: BufferPool,
}

impl ChannelSink {
    /// Create a sink and the receiver the host drains.
    ///
    /// Buffers are sized for the largest spectrum the engine can produce.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PooledPayload>) {
        Self::with_bin_capacity(capacity, MAX_SPECTRUM_BINS)
    }

    /// Like [`ChannelSink::new`] with buffers sized for `max_bins` bins.
    ///
    /// Larger spectra still get through but reallocate their buffer once.
    pub fn with_bin_capacity(capacity: usize, max_bins: usize) -> (Self, mpsc::Receiver<PooledPayload>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let mut buffers = Vec::with_capacity(capacity);
        buffers.extend((0..capacity).map(|_| Vec::with_capacity(max_bins.max(1))));

        let sink = Self {
            tx,
            pool: Arc::new(Mutex::new(buffers)),
        };
        (sink, rx)
    }

    /// Buffers currently free for new events
    pub fn free_buffers(&self) -> usize {
        self.pool.lock().len()
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &AnalysisEvent<'_>) -> Result<(), SinkError> {
        // try_lock: the audio thread never waits on the receiver returning a buffer.
        let bins = self
            .pool
            .try_lock()
            .and_then(|mut free| free.pop())
            .ok_or(SinkError::Exhausted)?;

        let payload = PooledPayload {
            payload: event.to_payload_in(bins),
            pool: self.pool.clone(),
        };

        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Payload received from a [`ChannelSink`].
///
/// Dereferences to [`AnalysisPayload`]; dropping it hands the bin buffer back
/// to the sink. Clone the payload to keep the data around.
pub struct PooledPayload {
    payload: AnalysisPayload,
    pool: BufferPool,
}

impl Deref for PooledPayload {
    type Target = AnalysisPayload;

    fn deref(&self) -> &AnalysisPayload {
        &self.payload
    }
}

impl fmt::Debug for PooledPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.payload, f)
    }
}

impl Serialize for PooledPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.payload.serialize(serializer)
    }
}

impl Drop for PooledPayload {
    fn drop(&mut self) {
        let bins = std::mem::take(&mut self.payload.frequency_bins);
        // The pool was allocated for every buffer, so this push never grows it.
        self.pool.lock().push(bins);
    }
}
