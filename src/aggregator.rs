//! Time and size triggered batching with adaptive backoff
//!
//! Items queue in memory. A batch is handed to the [`BatchProcessor`] when
//! the queue reaches `batch_size`, or on every tick of the flush interval if
//! anything is pending. Consumers signal overload through
//! [`Pacer::increase_interval`]; the widened interval falls back to the base
//! once no further widening is requested for the reset window.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::timer::TimerGuard;

/// Upper bound of the widened interval, as a multiple of the base
const MAX_INTERVAL_FACTOR: u32 = 5;

/// Receives every flushed batch, in order, one call at a time
#[async_trait]
pub trait BatchProcessor<T>: Send + Sync + 'static {
    async fn process(&self, batch: Vec<T>, pacer: &Arc<Pacer>);
}

// ─────────────────────────────────────────────────────────────────
// Pacer
// ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PacerState {
    current: Duration,
    /// Bumped on every (re)arm so a stale reset timer never fires
    generation: u64,
    reset_timer: Option<TimerGuard>,
}

/// The adjustable flush interval of one aggregator
#[derive(Debug)]
pub struct Pacer {
    base: Duration,
    max: Duration,
    step: Duration,
    reset_after: Duration,
    state: Mutex<PacerState>,
    changed: Notify,
}

impl Pacer {
    fn new(base: Duration, reset_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            base,
            max: base * MAX_INTERVAL_FACTOR,
            step: base / 2,
            reset_after,
            state: Mutex::new(PacerState {
                current: base,
                generation: 0,
                reset_timer: None,
            }),
            changed: Notify::new(),
        })
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// The interval currently in effect
    pub fn current(&self) -> Duration {
        self.state.lock().current
    }

    /// Widen the interval by half the base, never past 5x the base, and
    /// (re)arm the reset timer. Returns the interval now in effect.
    pub fn increase_interval(self: &Arc<Self>) -> Duration {
        let mut state = self.state.lock();
        let widened = state.current + self.step;
        if widened <= self.max {
            state.current = widened;
            self.changed.notify_one();
        }

        state.generation += 1;
        let generation = state.generation;
        let weak: Weak<Self> = Arc::downgrade(self);
        state.reset_timer = Some(TimerGuard::after(self.reset_after, move || async move {
            if let Some(pacer) = weak.upgrade() {
                pacer.reset_if_current(generation);
            }
        }));

        debug!(interval_ms = state.current.as_millis() as u64, "Flush interval widened");
        state.current
    }

    /// Restore the base interval immediately
    pub fn reset_interval(&self) -> Duration {
        let mut state = self.state.lock();
        state.generation += 1;
        state.reset_timer = None;
        self.restore_base(&mut state);
        state.current
    }

    fn reset_if_current(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if let Some(timer) = state.reset_timer.take() {
            timer.disarm();
        }
        self.restore_base(&mut state);
    }

    fn restore_base(&self, state: &mut PacerState) {
        if state.current != self.base {
            state.current = self.base;
            self.changed.notify_one();
            debug!(interval_ms = self.base.as_millis() as u64, "Flush interval reset");
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Aggregator
// ─────────────────────────────────────────────────────────────────

/// Batches items for a [`BatchProcessor`]
pub struct Aggregator<T: Send + 'static> {
    queue: Arc<Mutex<Vec<T>>>,
    batch_size: usize,
    pacer: Arc<Pacer>,
    batches: mpsc::UnboundedSender<Vec<T>>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Aggregator<T> {
    /// Start an aggregator with its flush task
    pub fn start<P>(
        interval: Duration,
        batch_size: usize,
        reset_after: Duration,
        processor: P,
    ) -> Self
    where
        P: BatchProcessor<T>,
    {
        let queue = Arc::new(Mutex::new(Vec::new()));
        let pacer = Pacer::new(interval, reset_after);
        let (batches, batch_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(flush_loop(
            queue.clone(),
            pacer.clone(),
            processor,
            batch_rx,
            shutdown_rx,
        ));

        Self {
            queue,
            batch_size: batch_size.max(1),
            pacer,
            batches,
            shutdown: Mutex::new(Some(shutdown)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue an item; a full queue is flushed at once
    pub fn enqueue(&self, item: T) {
        let full = {
            let mut queue = self.queue.lock();
            queue.push(item);
            if queue.len() >= self.batch_size {
                Some(std::mem::take(&mut *queue))
            } else {
                None
            }
        };

        if let Some(batch) = full {
            if self.batches.send(batch).is_err() {
                trace!("Aggregator stopped, batch dropped");
            }
        }
    }

    /// Items waiting for the next flush
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn pacer(&self) -> &Arc<Pacer> {
        &self.pacer
    }

    pub fn increase_interval(&self) -> Duration {
        self.pacer.increase_interval()
    }

    pub fn reset_interval(&self) -> Duration {
        self.pacer.reset_interval()
    }

    /// Stop the flush task after one final flush of everything pending
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.pacer.reset_interval();
    }
}

async fn flush_loop<T, P>(
    queue: Arc<Mutex<Vec<T>>>,
    pacer: Arc<Pacer>,
    processor: P,
    mut batches: mpsc::UnboundedReceiver<Vec<T>>,
    mut shutdown: oneshot::Receiver<()>,
) where
    T: Send + 'static,
    P: BatchProcessor<T>,
{
    let mut deadline = Instant::now() + pacer.current();

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            Some(batch) = batches.recv() => {
                processor.process(batch, &pacer).await;
            }

            _ = pacer.changed.notified() => {
                deadline = Instant::now() + pacer.current();
            }

            _ = tokio::time::sleep_until(deadline) => {
                deadline = Instant::now() + pacer.current();
                let batch = std::mem::take(&mut *queue.lock());
                if !batch.is_empty() {
                    processor.process(batch, &pacer).await;
                }
            }
        }
    }

    // Final flush: size-triggered batches first, in order, then the rest
    while let Ok(batch) = batches.try_recv() {
        processor.process(batch, &pacer).await;
    }
    let rest = std::mem::take(&mut *queue.lock());
    if !rest.is_empty() {
        processor.process(rest, &pacer).await;
    }
}
