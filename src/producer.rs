//! Client that sends records to a cluster.

use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    sync::{
        mpsc::Sender,
        oneshot::{self, error::TryRecvError},
    },
    task::{JoinHandle, JoinSet},
};
use tracing::instrument;

use crate::{
    admin::{self, NewTopic},
    broker::BrokerClient,
    config::{Acks, ProducerConfig},
    error::{Error, KafkaCode, Result},
    message::{ProduceRecord, RecordMetadata, TopicPartition},
    metadata::ClusterMetadata,
    partitioner::DefaultPartitioner,
    utils::{lock, now, with_retry, RetryPolicy},
};

/// Where a sent record is on its way to the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Acknowledged,
    Failed,
}

pub(crate) type DeliverySender = oneshot::Sender<Result<RecordMetadata>>;

/// Resolves once the broker acknowledged or rejected a record.
///
/// Await it, or inspect it without waiting through
/// [`state`](Self::state) and [`try_result`](Self::try_result).
#[derive(Debug)]
pub struct DeliveryHandle {
    receiver: oneshot::Receiver<Result<RecordMetadata>>,
    outcome: Option<Result<RecordMetadata>>,
}

impl DeliveryHandle {
    pub(crate) fn pending() -> (Self, DeliverySender) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                receiver,
                outcome: None,
            },
            sender,
        )
    }

    pub fn state(&mut self) -> DeliveryState {
        match self.poll_outcome() {
            None => DeliveryState::Pending,
            Some(Ok(_)) => DeliveryState::Acknowledged,
            Some(Err(_)) => DeliveryState::Failed,
        }
    }

    /// The outcome if the record was already resolved.
    pub fn try_result(&mut self) -> Option<Result<RecordMetadata>> {
        self.poll_outcome().cloned()
    }

    /// Wait at most `timeout` for the outcome.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<RecordMetadata> {
        tokio::time::timeout(timeout, self)
            .await
            .map_err(|_| Error::timeout("delivery", timeout))?
    }

    fn poll_outcome(&mut self) -> Option<&Result<RecordMetadata>> {
        if self.outcome.is_none() {
            match self.receiver.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(TryRecvError::Closed) => self.outcome = Some(Err(Error::ProducerClosed)),
                Err(TryRecvError::Empty) => {}
            }
        }
        self.outcome.as_ref()
    }
}

impl Future for DeliveryHandle {
    type Output = Result<RecordMetadata>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.outcome.take() {
            return Poll::Ready(outcome);
        }
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // the worker went away without resolving the record
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ProducerClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Sends records to topics.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Provision a topic, see [`admin::create_topic`].
    async fn create_topic(&self, topic: &NewTopic) -> Result<()>;

    /// Queue a record for delivery. `partition = None` lets the
    /// partitioner choose. Broker rejections resolve the handle, they are
    /// never returned from here.
    async fn send(
        &self,
        topic: &str,
        key: Option<Bytes>,
        value: Option<Bytes>,
        partition: Option<i32>,
    ) -> Result<DeliveryHandle>;

    /// Like [`send`](Self::send), for records with headers or timestamps.
    async fn send_record(&self, record: ProduceRecord) -> Result<DeliveryHandle>;

    /// Send and wait for the outcome, bounded by the delivery timeout.
    async fn send_and_wait(
        &self,
        topic: &str,
        key: Option<Bytes>,
        value: Option<Bytes>,
        partition: Option<i32>,
    ) -> Result<RecordMetadata>;

    /// Wait until every record queued before this call is resolved.
    async fn flush(&self) -> Result<()>;

    /// Deliver what is queued and stop the background worker.
    async fn close(&self) -> Result<()>;
}

pub(crate) struct PendingRecord {
    pub record: ProduceRecord,
    pub delivery: DeliverySender,
}

/// Instructions for the background worker.
pub(crate) enum Command {
    Send(PendingRecord),
    /// Resolved once every record ahead of it is resolved.
    Flush(oneshot::Sender<()>),
}

/// Batching [`Producer`] over a [`BrokerClient`].
///
/// This struct is a handle to a background worker that
/// does the actual producing. The background worker's job is to
/// collect incoming records in a queue. When the queue fills up,
/// the records are flushed. If the queue takes longer than a given
/// time to fill up, the records are flushed. These two configurable
/// parameters found in the [`ProducerBuilder`](crate::prelude::ProducerBuilder)
/// help dial in latency and throughput.
///
/// ### Example
/// ```rust
/// # async fn demo() -> sluice::error::Result<()> {
/// use sluice::prelude::*;
///
/// let transport = MemoryTransport::connect("memory://produce-demo")?;
/// let producer = transport.create_producer(ProducerConfig::default())?;
/// producer
///     .create_topic(&NewTopic::new("orders", 1, 1).ensure_created(true))
///     .await?;
///
/// let metadata = producer
///     .send_and_wait("orders", Some(Bytes::from("customer-1")), Some(Bytes::from("order")), None)
///     .await?;
/// assert_eq!(metadata.offset, Some(0));
/// # Ok(())
/// # }
/// ```
pub struct BatchProducer<B: BrokerClient> {
    broker: Arc<B>,
    config: ProducerConfig,
    /// Direct connection to the background worker, `None` once closed.
    sender: Mutex<Option<Sender<Command>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<B: BrokerClient> BatchProducer<B> {
    pub(crate) fn new(
        broker: Arc<B>,
        config: ProducerConfig,
        sender: Sender<Command>,
        worker: JoinHandle<()>,
    ) -> Self {
        Self {
            broker,
            config,
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    async fn enqueue(&self, command: Command) -> Result<()> {
        let sender = lock(&self.sender).clone().ok_or(Error::ProducerClosed)?;
        sender
            .send(command)
            .await
            .map_err(|_| Error::ProducerClosed)
    }
}

#[async_trait]
impl<B: BrokerClient> Producer for BatchProducer<B> {
    async fn create_topic(&self, topic: &NewTopic) -> Result<()> {
        admin::create_topic(self.broker.as_ref(), topic).await
    }

    async fn send(
        &self,
        topic: &str,
        key: Option<Bytes>,
        value: Option<Bytes>,
        partition: Option<i32>,
    ) -> Result<DeliveryHandle> {
        self.send_record(ProduceRecord {
            key,
            value,
            partition,
            ..ProduceRecord::new(topic)
        })
        .await
    }

    async fn send_record(&self, record: ProduceRecord) -> Result<DeliveryHandle> {
        if record.topic.is_empty() {
            return Err(Error::Configuration("record needs a topic".into()));
        }
        let (handle, delivery) = DeliveryHandle::pending();
        self.enqueue(Command::Send(PendingRecord { record, delivery }))
            .await?;
        Ok(handle)
    }

    #[instrument(level = "debug", skip(self, key, value))]
    async fn send_and_wait(
        &self,
        topic: &str,
        key: Option<Bytes>,
        value: Option<Bytes>,
        partition: Option<i32>,
    ) -> Result<RecordMetadata> {
        let handle = self.send(topic, key, value, partition).await?;
        handle.wait_timeout(self.config.delivery_timeout).await
    }

    async fn flush(&self) -> Result<()> {
        let (done, flushed) = oneshot::channel();
        self.enqueue(Command::Flush(done)).await?;
        match tokio::time::timeout(self.config.delivery_timeout, flushed).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::ProducerClosed),
            Err(_) => Err(Error::timeout("flush", self.config.delivery_timeout)),
        }
    }

    async fn close(&self) -> Result<()> {
        // the worker drains the queue once the last sender is gone
        let sender = lock(&self.sender).take();
        drop(sender);

        let Some(mut worker) = self.worker.lock().await.take() else {
            return Ok(());
        };
        tracing::info!("Closing producer");
        match tokio::time::timeout(self.config.delivery_timeout, &mut worker).await {
            Ok(_) => Ok(()),
            Err(_) => {
                worker.abort();
                Err(Error::timeout("close", self.config.delivery_timeout))
            }
        }
    }
}

/// Produce one batch, one request per partition, and resolve every
/// record's handle.
#[instrument(skip_all, fields(records = records.len()))]
pub(crate) async fn flush_producer<B: BrokerClient>(
    broker: &Arc<B>,
    metadata: &Arc<ClusterMetadata<B>>,
    partitioner: &DefaultPartitioner,
    config: &ProducerConfig,
    records: Vec<PendingRecord>,
) {
    let policy = RetryPolicy {
        max_retries: config.max_retries,
        backoff: config.retry_backoff,
        timeout: config.request_timeout,
    };

    let mut partitions_and_records: BTreeMap<TopicPartition, Vec<PendingRecord>> = BTreeMap::new();
    for pending in records {
        match resolve_partition(metadata, partitioner, policy, &pending.record).await {
            Ok(tp) => partitions_and_records.entry(tp).or_default().push(pending),
            Err(err) => {
                tracing::warn!("Cannot route record for {}: {}", pending.record.topic, err);
                let _ = pending.delivery.send(Err(err));
            }
        }
    }
    tracing::debug!("Producing to {} partitions", partitions_and_records.len());

    let mut set = JoinSet::new();
    for (tp, batch) in partitions_and_records {
        set.spawn(produce(
            broker.clone(),
            metadata.clone(),
            tp,
            batch,
            config.acks,
            policy,
        ));
    }
    while let Some(joined) = set.join_next().await {
        if let Err(err) = joined {
            tracing::error!("Produce task failed {:?}", err);
        }
    }
}

async fn resolve_partition<B: BrokerClient>(
    metadata: &ClusterMetadata<B>,
    partitioner: &DefaultPartitioner,
    policy: RetryPolicy,
    record: &ProduceRecord,
) -> Result<TopicPartition> {
    let partitions = with_retry(policy, "metadata", || {
        metadata.partition_count(&record.topic)
    })
    .await?;
    let partition = match record.partition {
        Some(partition) if (0..partitions).contains(&partition) => partition,
        Some(partition) => {
            return Err(Error::Delivery {
                topic_partition: Some(TopicPartition::new(record.topic.as_str(), partition)),
                code: KafkaCode::UnknownTopicOrPartition,
            })
        }
        None => partitioner.partition(&record.topic, record.key.as_deref(), partitions),
    };
    Ok(TopicPartition::new(record.topic.as_str(), partition))
}

/// Produce records to a single partition.
async fn produce<B: BrokerClient>(
    broker: Arc<B>,
    metadata: Arc<ClusterMetadata<B>>,
    tp: TopicPartition,
    batch: Vec<PendingRecord>,
    acks: Acks,
    policy: RetryPolicy,
) {
    let stamp = now();
    let (records, deliveries): (Vec<ProduceRecord>, Vec<DeliverySender>) = batch
        .into_iter()
        .map(|pending| {
            let mut record = pending.record;
            record.partition = Some(tp.partition);
            record.timestamp.get_or_insert(stamp);
            (record, pending.delivery)
        })
        .unzip();
    let timestamps: Vec<i64> = records
        .iter()
        .map(|record| record.timestamp.unwrap_or(stamp))
        .collect();
    tracing::trace!("Producing {} records to {}", records.len(), tp);

    if acks == Acks::None {
        for (delivery, timestamp) in deliveries.into_iter().zip(timestamps) {
            let _ = delivery.send(Ok(RecordMetadata {
                topic_partition: tp.clone(),
                offset: None,
                timestamp,
            }));
        }
        if let Err(err) = broker.produce(&tp, records).await {
            tracing::warn!("Unacknowledged produce to {} failed: {}", tp, err);
        }
        return;
    }

    let produced = with_retry(policy, "produce", || broker.produce(&tp, records.clone())).await;
    match produced {
        Ok(base_offset) => {
            for (i, (delivery, timestamp)) in deliveries.into_iter().zip(timestamps).enumerate() {
                let _ = delivery.send(Ok(RecordMetadata {
                    topic_partition: tp.clone(),
                    offset: Some(base_offset + i as i64),
                    timestamp,
                }));
            }
        }
        Err(err) => {
            let err = match err {
                Error::KafkaError(code) => Error::Delivery {
                    topic_partition: Some(tp.clone()),
                    code,
                },
                Error::Timeout { .. } => Error::Delivery {
                    topic_partition: Some(tp.clone()),
                    code: KafkaCode::RequestTimedOut,
                },
                err => err,
            };
            if matches!(
                err,
                Error::Delivery {
                    code: KafkaCode::UnknownTopicOrPartition,
                    ..
                }
            ) {
                metadata.invalidate(&tp.topic).await;
            }
            tracing::warn!("Producing {} records to {} failed: {}", deliveries.len(), tp, err);
            for delivery in deliveries {
                let _ = delivery.send(Err(err.clone()));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::{DeliveryHandle, DeliveryState};
    use crate::{
        error::{Error, KafkaCode},
        message::{RecordMetadata, TopicPartition},
    };

    fn metadata(offset: i64) -> RecordMetadata {
        RecordMetadata {
            topic_partition: TopicPartition::new("orders", 0),
            offset: Some(offset),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn handle_moves_from_pending_to_acknowledged() {
        let (mut handle, delivery) = DeliveryHandle::pending();
        assert_eq!(handle.state(), DeliveryState::Pending);
        assert_eq!(handle.try_result(), None);

        delivery.send(Ok(metadata(4))).unwrap();
        assert_eq!(handle.state(), DeliveryState::Acknowledged);
        assert_eq!(handle.try_result(), Some(Ok(metadata(4))));
        assert_eq!(handle.await, Ok(metadata(4)));
    }

    #[tokio::test]
    async fn handle_reports_failures() {
        let (mut handle, delivery) = DeliveryHandle::pending();
        let rejected = Error::Delivery {
            topic_partition: Some(TopicPartition::new("orders", 0)),
            code: KafkaCode::MessageSizeTooLarge,
        };
        delivery.send(Err(rejected.clone())).unwrap();
        assert_eq!(handle.state(), DeliveryState::Failed);
        assert_eq!(handle.await, Err(rejected));

        let (handle, delivery) = DeliveryHandle::pending();
        drop(delivery);
        assert_eq!(handle.await, Err(Error::ProducerClosed));
    }

    #[tokio::test]
    async fn wait_timeout_bounds_the_wait() {
        let (handle, _delivery) = DeliveryHandle::pending();
        let waited = handle.wait_timeout(Duration::from_millis(10)).await;
        assert!(matches!(waited, Err(Error::Timeout { operation: "delivery", .. })));
    }
}
