//! Delivery pipeline: decoded records to the message bus.
//!
//! The decode path only ever calls [`FlowProducer::enqueue`], which encodes
//! the record and `try_send`s it into a bounded queue. A flush worker owns
//! the other end: it batches messages and publishes them on the blocking
//! pool every flush interval, or sooner when a batch fills up.
//!
//! A publish that fails is retried up to the configured budget. After that
//! every message of the batch is reported once on the failure stream and
//! dropped. Nothing is reported back to the decode path.
//!
//! Shutdown: drop every `FlowProducer` clone, then await
//! [`DeliveryHandle::shutdown`]. The worker sees the queue close, publishes
//! what is left and exits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use nf9_core::config::KafkaConfig;
use nf9_core::DecodedRecord;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Topic every flow record is published to.
pub const TOPIC: &str = "netflow";

// ── Messages ──────────────────────────────────────────────────────────────────

/// One record on its way to the bus. No key: partitioning is left to the
/// bus's default policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: &'static str,
    pub payload: Bytes,
}

impl OutboundMessage {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            topic: TOPIC,
            payload: payload.into(),
        }
    }
}

/// A message the bus would not take, even after retries.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub message: OutboundMessage,
    pub error: BusError,
}

// ── Bus ───────────────────────────────────────────────────────────────────────

/// A synchronous batch publisher. Called from the blocking pool, never from
/// the decode path.
pub trait MessageBus: Send + 'static {
    /// Publish a batch. An error means the whole batch is to be retried.
    fn publish(&mut self, batch: &[OutboundMessage]) -> Result<(), BusError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to brokers: {0}")]
    Connect(String),

    #[error("produce request failed: {0}")]
    Produce(String),

    #[error("partition {partition} of {topic} rejected the batch: {code}")]
    Rejected {
        topic: String,
        partition: i32,
        code: String,
    },

    #[error("publisher panicked")]
    Panicked,
}

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    pub max_batch: usize,
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        (&KafkaConfig::default()).into()
    }
}

impl From<&KafkaConfig> for DeliverySettings {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            queue_capacity: config.queue_capacity.max(1),
            max_batch: config.max_batch.max(1),
            retries: config.retries,
            retry_backoff: config.retry_backoff(),
        }
    }
}

// ── Stats ─────────────────────────────────────────────────────────────────────

/// Pipeline counters, shared between producers and the flush worker.
#[derive(Debug, Default)]
pub struct PipelineStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

// ── Producer ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("delivery queue is full, record dropped")]
    QueueFull,

    #[error("delivery pipeline is closed")]
    Closed,

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Cheap, cloneable enqueue handle. Never blocks.
#[derive(Clone)]
pub struct FlowProducer {
    tx: mpsc::Sender<OutboundMessage>,
    stats: Arc<PipelineStats>,
}

impl FlowProducer {
    /// Encode `record` as JSON and queue it for publishing.
    pub fn enqueue(&self, record: &DecodedRecord) -> Result<(), EnqueueError> {
        let payload = record.to_json()?;
        self.enqueue_message(OutboundMessage::new(payload))
    }

    pub fn enqueue_message(&self, message: OutboundMessage) -> Result<(), EnqueueError> {
        match self.tx.try_send(message) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(EnqueueError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Join handle of the flush worker.
pub struct DeliveryHandle {
    worker: JoinHandle<()>,
}

impl DeliveryHandle {
    /// Wait up to `grace` for the worker to publish what is queued.
    /// Only returns early once every producer has been dropped.
    ///
    /// Returns true if the worker finished within the grace period.
    pub async fn shutdown(self, grace: Duration) -> bool {
        match tokio::time::timeout(grace, self.worker).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "flush worker failed");
                false
            }
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "flush worker did not drain in time"
                );
                false
            }
        }
    }
}

/// A running pipeline: the producer for the decode path, the failure stream
/// for the logger and the worker handle for shutdown.
pub struct DeliveryPipeline {
    pub producer: FlowProducer,
    pub failures: mpsc::UnboundedReceiver<DeliveryFailure>,
    pub handle: DeliveryHandle,
}

impl DeliveryPipeline {
    /// Spawn the flush worker on the current tokio runtime.
    pub fn spawn<B: MessageBus>(bus: B, settings: DeliverySettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let (failure_tx, failures) = mpsc::unbounded_channel();
        let stats = Arc::new(PipelineStats::default());

        let worker = FlushWorker {
            bus: Arc::new(Mutex::new(bus)),
            rx,
            failures: failure_tx,
            pending: Vec::with_capacity(settings.max_batch),
            settings,
            stats: stats.clone(),
        };

        Self {
            producer: FlowProducer { tx, stats },
            failures,
            handle: DeliveryHandle {
                worker: tokio::spawn(worker.run()),
            },
        }
    }
}

struct FlushWorker<B> {
    bus: Arc<Mutex<B>>,
    rx: mpsc::Receiver<OutboundMessage>,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
    pending: Vec<OutboundMessage>,
    settings: DeliverySettings,
    stats: Arc<PipelineStats>,
}

impl<B: MessageBus> FlushWorker<B> {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.settings.flush_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tick.tick().await;

        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(m) => {
                        self.pending.push(m);
                        if self.pending.len() >= self.settings.max_batch {
                            self.flush().await;
                        }
                    }
                    None => {
                        self.flush().await;
                        tracing::info!("delivery queue closed, flush worker exiting");
                        return;
                    }
                },

                _ = tick.tick() => self.flush().await,
            }
        }
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let batch = Arc::new(std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.settings.max_batch),
        ));
        let bus = self.bus.clone();
        let retries = self.settings.retries;
        let backoff = self.settings.retry_backoff;

        let result = {
            let batch = batch.clone();
            tokio::task::spawn_blocking(move || {
                publish_with_retries(&bus, &batch, retries, backoff)
            })
            .await
            .unwrap_or(Err(BusError::Panicked))
        };

        match result {
            Ok(()) => {
                self.stats
                    .delivered
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                tracing::debug!(count = batch.len(), "batch published");
            }
            Err(error) => {
                self.stats
                    .failed
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                for message in batch.iter() {
                    let failure = DeliveryFailure {
                        message: message.clone(),
                        error: error.clone(),
                    };
                    if self.failures.send(failure).is_err() {
                        tracing::warn!(error = %error, "failure stream closed, dropping report");
                    }
                }
            }
        }
    }
}

fn publish_with_retries<B: MessageBus>(
    bus: &Mutex<B>,
    batch: &[OutboundMessage],
    retries: u32,
    backoff: Duration,
) -> Result<(), BusError> {
    // A panic in an earlier publish leaves the bus usable for our purposes.
    let mut bus = bus.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut attempt = 0;
    loop {
        match bus.publish(batch) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retries => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    count = batch.len(),
                    "publish failed, retrying"
                );
                std::thread::sleep(backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Drain the failure stream, logging each failure. Ends when the pipeline's
/// flush worker exits.
pub async fn log_failures(mut failures: mpsc::UnboundedReceiver<DeliveryFailure>) {
    while let Some(failure) = failures.recv().await {
        tracing::error!(
            topic = failure.message.topic,
            bytes = failure.message.payload.len(),
            error = %failure.error,
            "failed to write netflow record"
        );
    }
}
