use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc::{channel, Receiver};
use tokio_stream::{Stream, StreamExt};

use crate::{
    broker::BrokerClient,
    config::{Acks, ProducerConfig},
    error::Result,
    metadata::ClusterMetadata,
    partitioner::DefaultPartitioner,
    producer::{flush_producer, BatchProducer, Command},
    transport::ExecutionContext,
};

/// Configure a [`BatchProducer`].
///
/// ### Example
/// ```rust
/// # async fn demo() -> sluice::error::Result<()> {
/// use sluice::prelude::*;
///
/// let transport = MemoryTransport::connect("memory://builder-demo")?;
/// let producer = transport
///     .producer_builder()
///     .linger(std::time::Duration::from_millis(1))
///     .max_batch_size(2)
///     .build()?;
///
/// producer
///     .send("my-topic", None, Some(Bytes::from_static(b"Value")), None)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ProducerBuilder<B: BrokerClient> {
    broker: Arc<B>,
    context: ExecutionContext,
    config: ProducerConfig,
}

impl<B: BrokerClient> ProducerBuilder<B> {
    /// Start a producer builder. To complete, use the [`build`](Self::build) method.
    pub fn new(broker: Arc<B>, context: ExecutionContext) -> Self {
        Self::from_config(broker, context, ProducerConfig::default())
    }

    pub fn from_config(broker: Arc<B>, context: ExecutionContext, config: ProducerConfig) -> Self {
        Self {
            broker,
            context,
            config,
        }
    }

    /// The max number of records that will sit in queue to be produced.
    ///
    /// When the queue size surpasses this number, the queue will be flushed and
    /// all records produced. Unless the [`linger`](Self::linger) has passed, then the
    /// queue will be flushed regardless of its size.
    ///
    /// Increasing this number will increase latency, but also increase throughput.
    pub fn max_batch_size(&mut self, max_batch_size: usize) -> &mut Self {
        self.config.max_batch_size = max_batch_size;
        self
    }

    /// The maximum time a record will sit in the queue to be produced.
    ///
    /// Each batch will wait a maximum of this time, and then be flushed.
    /// If the batch fills up with [`max_batch_size`](Self::max_batch_size) then it will be flushed
    /// before this time runs out.
    ///
    /// Decreasing this number will lower latency, but also lower throughput.
    pub fn linger(&mut self, linger: Duration) -> &mut Self {
        self.config.linger = linger;
        self
    }

    pub fn client_id(&mut self, client_id: impl Into<String>) -> &mut Self {
        self.config.client_id = client_id.into();
        self
    }

    /// How many replicas must have a record before it counts as delivered.
    /// With [`Acks::None`] handles resolve as soon as the record is sent.
    pub fn acks(&mut self, acks: Acks) -> &mut Self {
        self.config.acks = acks;
        self
    }

    /// The timeout to await a single produce response.
    pub fn request_timeout(&mut self, request_timeout: Duration) -> &mut Self {
        self.config.request_timeout = request_timeout;
        self
    }

    pub fn delivery_timeout(&mut self, delivery_timeout: Duration) -> &mut Self {
        self.config.delivery_timeout = delivery_timeout;
        self
    }

    pub fn max_retries(&mut self, max_retries: u32) -> &mut Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn retry_backoff(&mut self, retry_backoff: Duration) -> &mut Self {
        self.config.retry_backoff = retry_backoff;
        self
    }

    /// Records accepted ahead of the worker before `send` starts waiting.
    pub fn queue_capacity(&mut self, queue_capacity: usize) -> &mut Self {
        self.config.queue_capacity = queue_capacity;
        self
    }

    pub fn build(&self) -> Result<BatchProducer<B>> {
        self.config.validate()?;
        let (sender, receiver) = channel(self.config.queue_capacity);

        let produce_stream = into_produce_stream(receiver)
            .chunks_timeout(self.config.max_batch_size, self.config.linger);

        let worker = self.context.spawn(producer(
            produce_stream,
            self.broker.clone(),
            self.config.clone(),
        ));

        Ok(BatchProducer::new(
            self.broker.clone(),
            self.config.clone(),
            sender,
            worker,
        ))
    }
}

fn into_produce_stream(mut receiver: Receiver<Command>) -> impl Stream<Item = Command> {
    async_stream::stream! {
        while let Some(command) = receiver.recv().await {
            yield command;
        }
    }
}

async fn producer<B: BrokerClient>(
    stream: impl Stream<Item = Vec<Command>> + Send + 'static,
    broker: Arc<B>,
    config: ProducerConfig,
) {
    let metadata = Arc::new(ClusterMetadata::new(broker.clone()));
    let partitioner = DefaultPartitioner::new();

    tokio::pin!(stream);
    while let Some(commands) = stream.next().await {
        let mut records = vec![];
        let mut flushes = vec![];
        for command in commands {
            match command {
                Command::Send(pending) => records.push(pending),
                Command::Flush(done) => flushes.push(done),
            }
        }
        if !records.is_empty() {
            flush_producer(&broker, &metadata, &partitioner, &config, records).await;
        }
        // batches are produced in order, so everything ahead of a flush is resolved
        for done in flushes {
            let _ = done.send(());
        }
    }
    tracing::debug!("Producer worker stopped");
}
