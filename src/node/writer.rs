//! Flushes a remote node's batches into its directory queue

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::aggregator::{BatchProcessor, Pacer};
use crate::directory::Directory;
use crate::protocol::{SignalBatch, SignalItem};

/// Queue length thresholds for congestion shedding
#[derive(Debug, Clone, Copy)]
pub struct Watermarks {
    /// At or above this length the queue is trimmed and shedding starts
    pub high: u64,
    /// Length kept by a trim
    pub low: u64,
    /// At or below this length shedding stops
    pub resume: u64,
}

/// Writes each flushed batch onto one process queue
pub struct QueueWriter {
    address: String,
    directory: Arc<Directory>,
    alive: Arc<AtomicBool>,
    congested: AtomicBool,
    marks: Watermarks,
}

impl QueueWriter {
    pub fn new(address: String, directory: Arc<Directory>, alive: Arc<AtomicBool>, marks: Watermarks) -> Self {
        Self {
            address,
            directory,
            alive,
            congested: AtomicBool::new(false),
            marks,
        }
    }

    pub fn is_congested(&self) -> bool {
        self.congested.load(Ordering::Relaxed)
    }

    /// While congested, decide whether this batch may be pushed
    async fn may_push(&self) -> bool {
        if !self.is_congested() {
            return true;
        }

        match self.directory.queue_len(&self.address).await {
            Ok(len) if len >= self.marks.high => {
                debug!(node = %self.address, len, "Queue still congested, dropping batch");
                false
            }
            Ok(len) => {
                if len <= self.marks.resume {
                    self.congested.store(false, Ordering::Relaxed);
                    debug!(node = %self.address, len, "Queue drained, congestion cleared");
                }
                true
            }
            Err(e) => {
                debug!(node = %self.address, error = %e, "Queue length unavailable, dropping batch");
                false
            }
        }
    }
}

#[async_trait]
impl BatchProcessor<SignalItem> for QueueWriter {
    async fn process(&self, batch: Vec<SignalItem>, pacer: &Arc<Pacer>) {
        if !self.alive.load(Ordering::Relaxed) {
            debug!(node = %self.address, items = batch.len(), "Node is dead, discarding batch");
            return;
        }
        if !self.may_push().await {
            return;
        }

        let items = batch.len();
        let bytes = SignalBatch::new(batch).to_bytes();

        let len = match self.directory.push_batch(&self.address, bytes).await {
            Ok(len) => len,
            Err(e) => {
                warn!(node = %self.address, items, error = %e, "Failed to push batch");
                return;
            }
        };

        if len >= self.marks.high {
            let interval = pacer.increase_interval();
            self.congested.store(true, Ordering::Relaxed);
            warn!(
                node = %self.address,
                len,
                interval_ms = interval.as_millis() as u64,
                "Remote queue over high water, trimming"
            );
            if let Err(e) = self.directory.trim_queue(&self.address, self.marks.low).await {
                warn!(node = %self.address, error = %e, "Failed to trim queue");
            }
        }
    }
}
