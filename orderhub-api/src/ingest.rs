//! Ingestion Consumer
//!
//! A supervised background task that pulls order payloads off a message
//! source, decodes them and hands each aggregate to an [`OrderSink`].
//!
//! Delivery is at-most-once: every message is acknowledged after handling,
//! whether it decoded, persisted, or failed. A payload that does not decode
//! is logged and dropped. A payload that fails to persist is logged and
//! still acknowledged, so it is never redelivered.
//!
//! On shutdown the source is closed to new messages and whatever was
//! already accepted is drained and handled before the consumer exits.
//!
//! The broker is an in-process bounded queue ([`channel`]); its producer
//! half is exposed over HTTP so external publishers can feed it.
//!
//! # Usage
//!
//! ```ignore
//! let (producer, source) = ingest::channel("orders", 1024);
//! let consumer = Consumer::spawn(source, Arc::new(facade), metrics, &shutdown);
//! producer.publish(payload).await?;
//! let stats = consumer.shutdown().await;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use orderhub_core::{OrderAggregate, StoreResult};
use orderhub_storage::{CancelToken, OrderCache, OrderRepository, ReadThroughOrders};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::telemetry::{IngestOutcome, OrderMetrics};

// ============================================================================
// MESSAGES AND SOURCES
// ============================================================================

/// One inbound message: a position in the queue and a raw JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub offset: u64,
    pub payload: Bytes,
}

/// A consumable, acknowledgeable stream of queue messages.
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Next message, or `None` once the source is closed and drained.
    async fn recv(&mut self) -> Option<QueueMessage>;

    /// Mark a message as processed.
    async fn ack(&mut self, offset: u64);

    /// Stop accepting new messages. Messages already accepted are still
    /// returned by `recv` until it yields `None`.
    async fn close(&mut self);
}

/// Shared record of acknowledged offsets, in acknowledgement order.
#[derive(Debug, Clone, Default)]
pub struct AckLog(Arc<Mutex<Vec<u64>>>);

impl AckLog {
    pub fn offsets(&self) -> Vec<u64> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, offset: u64) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(offset);
    }
}

/// Producer half of the in-process queue.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<QueueMessage>,
    next_offset: Arc<AtomicU64>,
    topic: Arc<str>,
}

impl QueueProducer {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Enqueue a raw payload, waiting while the queue is full. Returns the
    /// offset assigned to the message.
    pub async fn publish(&self, payload: Bytes) -> ApiResult<u64> {
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(QueueMessage { offset, payload })
            .await
            .map_err(|_| {
                ApiError::service_unavailable(format!("Queue '{}' is closed", self.topic))
            })?;
        Ok(offset)
    }
}

/// Consumer half of the in-process queue.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<QueueMessage>,
    acked: AckLog,
}

impl ChannelSource {
    pub fn ack_log(&self) -> AckLog {
        self.acked.clone()
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Option<QueueMessage> {
        self.rx.recv().await
    }

    async fn ack(&mut self, offset: u64) {
        self.acked.record(offset);
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

/// Create a bounded in-process queue for `topic` holding up to `depth`
/// unconsumed messages.
pub fn channel(topic: impl Into<String>, depth: usize) -> (QueueProducer, ChannelSource) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    let producer = QueueProducer {
        tx,
        next_offset: Arc::new(AtomicU64::new(0)),
        topic: Arc::from(topic.into()),
    };
    let source = ChannelSource {
        rx,
        acked: AckLog::default(),
    };
    (producer, source)
}

// ============================================================================
// DECODING
// ============================================================================

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid order payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Order payload has an empty order_uid")]
    MissingOrderUid,
}

/// Decode a queue payload into an aggregate. Missing fields take their
/// defaults; an empty natural key is rejected.
pub fn decode_order(payload: &[u8]) -> Result<OrderAggregate, DecodeError> {
    let order: OrderAggregate = serde_json::from_slice(payload)?;
    if order.order_uid.trim().is_empty() {
        return Err(DecodeError::MissingOrderUid);
    }
    Ok(order)
}

// ============================================================================
// SINK
// ============================================================================

/// Ingestion callback, invoked once per decoded message.
#[async_trait]
pub trait OrderSink: Send + Sync + 'static {
    async fn handle(&self, token: &CancelToken, order: OrderAggregate) -> StoreResult<()>;
}

#[async_trait]
impl<C, R> OrderSink for ReadThroughOrders<C, R>
where
    C: OrderCache,
    R: OrderRepository,
{
    async fn handle(&self, token: &CancelToken, order: OrderAggregate) -> StoreResult<()> {
        self.ingest(token, order).await
    }
}

// ============================================================================
// CONSUMER
// ============================================================================

/// Counters reported when the consumer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub persisted: u64,
    pub decode_failures: u64,
    pub handler_failures: u64,
    /// Messages handled after the stop signal, while draining.
    pub drained: u64,
}

pub struct Consumer;

impl Consumer {
    /// Start consuming `source` on the tokio runtime.
    ///
    /// The consumer stops when `parent` (or the returned handle) is
    /// cancelled, or when the source closes. On cancellation the source is
    /// closed and every message it already accepted is handled and
    /// acknowledged before the task returns.
    pub fn spawn<S, H>(
        source: S,
        sink: Arc<H>,
        metrics: Arc<OrderMetrics>,
        parent: &CancelToken,
    ) -> ConsumerHandle
    where
        S: MessageSource,
        H: OrderSink,
    {
        let stop = parent.child();
        let task = tokio::spawn(run(source, sink, metrics, stop.clone()));
        ConsumerHandle { stop, task }
    }
}

async fn run<S, H>(
    mut source: S,
    sink: Arc<H>,
    metrics: Arc<OrderMetrics>,
    stop: CancelToken,
) -> ConsumerStats
where
    S: MessageSource,
    H: OrderSink,
{
    let mut stats = ConsumerStats::default();
    // Detached from `stop` so a shutdown never interrupts a half-written save.
    let work = CancelToken::new();
    info!("Order consumer started");

    loop {
        let message = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                drain(&mut source, sink.as_ref(), &metrics, &work, &mut stats).await;
                break;
            }
            next = source.recv() => match next {
                Some(message) => message,
                None => {
                    info!("Order queue closed");
                    break;
                }
            },
        };
        process(&mut source, sink.as_ref(), &metrics, &work, &mut stats, message).await;
    }

    info!(
        received = stats.received,
        persisted = stats.persisted,
        decode_failures = stats.decode_failures,
        handler_failures = stats.handler_failures,
        drained = stats.drained,
        "Order consumer stopped"
    );
    stats
}

/// Close the source and handle everything it had already accepted.
async fn drain<S, H>(
    source: &mut S,
    sink: &H,
    metrics: &OrderMetrics,
    work: &CancelToken,
    stats: &mut ConsumerStats,
) where
    S: MessageSource,
    H: OrderSink,
{
    source.close().await;
    while let Some(message) = source.recv().await {
        stats.drained += 1;
        process(source, sink, metrics, work, stats, message).await;
    }
    if stats.drained > 0 {
        info!(drained = stats.drained, "Drained accepted messages on shutdown");
    }
}

/// Decode, handle and acknowledge one message.
async fn process<S, H>(
    source: &mut S,
    sink: &H,
    metrics: &OrderMetrics,
    work: &CancelToken,
    stats: &mut ConsumerStats,
    message: QueueMessage,
) where
    S: MessageSource,
    H: OrderSink,
{
    stats.received += 1;

    let outcome = match decode_order(&message.payload) {
        Ok(order) => {
            let order_uid = order.order_uid.clone();
            let start = Instant::now();
            let result = sink.handle(work, order).await;
            metrics.record_store_operation("save", result.is_ok(), start.elapsed().as_secs_f64());
            match result {
                Ok(()) => {
                    debug!(offset = message.offset, order_uid = %order_uid, "Order ingested");
                    stats.persisted += 1;
                    IngestOutcome::Persisted
                }
                Err(e) => {
                    error!(
                        offset = message.offset,
                        order_uid = %order_uid,
                        stage = ?e.failing_stage(),
                        error = %e,
                        "Failed to persist order, acknowledging anyway"
                    );
                    stats.handler_failures += 1;
                    IngestOutcome::HandlerFailed
                }
            }
        }
        Err(e) => {
            warn!(offset = message.offset, error = %e, "Dropping undecodable message");
            stats.decode_failures += 1;
            IngestOutcome::DecodeFailed
        }
    };
    metrics.record_ingest(outcome);
    source.ack(message.offset).await;
}

/// Supervision handle for a running consumer.
pub struct ConsumerHandle {
    stop: CancelToken,
    task: JoinHandle<ConsumerStats>,
}

impl ConsumerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the consumer to stop and wait for it.
    pub async fn shutdown(self) -> ConsumerStats {
        self.stop.cancel();
        self.wait().await
    }

    /// Wait for the consumer to stop on its own (source closed or parent
    /// token cancelled).
    pub async fn wait(self) -> ConsumerStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Order consumer task failed");
                ConsumerStats::default()
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
