use std::{sync::Arc, time::Duration};

use crate::{
    broker::BrokerClient,
    config::{AutoOffsetReset, ConsumerConfig},
    consumer::{ConsumerCallback, GroupConsumer, MessageHandler, RebalanceListener},
    error::Result,
    transport::ExecutionContext,
};

/// Configure a [`GroupConsumer`].
///
/// ### Example
/// ```rust
/// # async fn demo() -> sluice::error::Result<()> {
/// use sluice::prelude::*;
///
/// let transport = MemoryTransport::connect("memory://orders-demo")?;
/// let consumer = transport
///     .consumer_builder("billing")
///     .callback(|message: Message| async move {
///         println!("{} at {}", message.topic_partition, message.offset);
///         Ok::<(), Error>(())
///     })
///     .commit_interval(Some(std::time::Duration::from_secs(1)))
///     .build()?;
///
/// consumer.subscribe(&["orders"]).await?;
/// consumer.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConsumerBuilder<B: BrokerClient> {
    broker: Arc<B>,
    context: ExecutionContext,
    config: ConsumerConfig,
    callback: Option<ConsumerCallback>,
    listener: Option<Arc<dyn RebalanceListener>>,
}

impl<B: BrokerClient> ConsumerBuilder<B> {
    /// Start a consumer builder. To complete, use the [`build`](Self::build) method.
    pub fn new(broker: Arc<B>, context: ExecutionContext, group_id: impl Into<String>) -> Self {
        Self::from_config(broker, context, ConsumerConfig::new(group_id))
    }

    pub fn from_config(broker: Arc<B>, context: ExecutionContext, config: ConsumerConfig) -> Self {
        Self {
            broker,
            context,
            config,
            callback: None,
            listener: None,
        }
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Run `handler` for every message once the consumer is started.
    pub fn callback(mut self, handler: impl MessageHandler) -> Self {
        self.callback = Some(Arc::new(handler));
        self
    }

    pub fn listener(mut self, listener: impl RebalanceListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Ack every message the callback handled without error.
    pub fn autoack(mut self, autoack: bool) -> Self {
        self.config.autoack = autoack;
        self
    }

    /// How often acked offsets are committed. `None` leaves committing to
    /// explicit [`commit`](crate::consumer::Consumer::commit) calls.
    pub fn commit_interval(mut self, commit_interval: Option<Duration>) -> Self {
        self.config.commit_interval = commit_interval;
        self
    }

    /// Where to start on partitions the group never committed for.
    pub fn auto_offset_reset(mut self, auto_offset_reset: AutoOffsetReset) -> Self {
        self.config.auto_offset_reset = auto_offset_reset;
        self
    }

    /// Upper bound on records returned by one fetch.
    pub fn max_poll_records(mut self, max_poll_records: usize) -> Self {
        self.config.max_poll_records = max_poll_records;
        self
    }

    /// How long the delivery loop lets the broker hold a fetch open.
    pub fn fetch_max_wait(mut self, fetch_max_wait: Duration) -> Self {
        self.config.fetch_max_wait = fetch_max_wait;
        self
    }

    /// Messages fetched ahead of the callback.
    ///
    /// Fetching stops while this many messages wait for delivery, which is
    /// what bounds memory when the callback falls behind.
    pub fn buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.config.buffer_capacity = buffer_capacity;
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = request_timeout;
        self
    }

    pub fn retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.config.retry_backoff = retry_backoff;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn commit_on_close(mut self, commit_on_close: bool) -> Self {
        self.config.commit_on_close = commit_on_close;
        self
    }

    pub fn shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.config.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn build(self) -> Result<GroupConsumer<B>> {
        self.config.validate()?;
        Ok(GroupConsumer::new(
            self.broker,
            self.context,
            self.config,
            self.callback,
            self.listener,
        ))
    }
}
