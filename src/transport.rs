//! Entry point that binds consumers and producers to one broker.
//!
//! A transport owns the broker connection and the [`ExecutionContext`]
//! every background task is spawned on. Consumers and producers created
//! from the same transport share both.

use std::{future::Future, sync::Arc};

use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    broker::{memory::MemoryBroker, BrokerClient},
    config::{ConsumerConfig, ProducerConfig, TransportConfig},
    consumer::{Consumer, GroupConsumer, MessageHandler},
    consumer_builder::ConsumerBuilder,
    error::{Error, Result},
    producer::{BatchProducer, Producer},
    producer_builder::ProducerBuilder,
    DEFAULT_CLIENT_ID,
};

const MEMORY_SCHEME: &str = "memory";

/// The runtime background tasks are spawned on.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    handle: Handle,
}

impl ExecutionContext {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime driving the caller.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|err| Error::Configuration(format!("no tokio runtime: {}", err)))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

/// Factory for the consumers and producers of one broker backend.
pub trait Transport: Send + Sync {
    type Consumer: Consumer;
    type Producer: Producer;

    /// A consumer that hands every fetched message to `callback` once
    /// started.
    fn create_consumer(
        &self,
        callback: impl MessageHandler,
        config: ConsumerConfig,
    ) -> Result<Self::Consumer>;

    fn create_producer(&self, config: ProducerConfig) -> Result<Self::Producer>;

    fn driver_version(&self) -> &'static str;
}

/// A [`Transport`] over any [`BrokerClient`].
#[derive(Debug)]
pub struct BrokerTransport<B: BrokerClient> {
    broker: Arc<B>,
    context: ExecutionContext,
    config: TransportConfig,
}

/// Transport to a broker living in this process.
pub type MemoryTransport = BrokerTransport<MemoryBroker>;

impl<B: BrokerClient> Clone for BrokerTransport<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
            context: self.context.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: BrokerClient> BrokerTransport<B> {
    pub fn new(broker: Arc<B>, context: ExecutionContext, config: TransportConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            broker,
            context,
            config,
        })
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Start configuring a consumer in `group_id`.
    pub fn consumer_builder(&self, group_id: impl Into<String>) -> ConsumerBuilder<B> {
        self.consumer_builder_from(ConsumerConfig::new(group_id))
    }

    pub fn producer_builder(&self) -> ProducerBuilder<B> {
        self.producer_builder_from(ProducerConfig::default())
    }

    fn consumer_builder_from(&self, mut config: ConsumerConfig) -> ConsumerBuilder<B> {
        if config.client_id == DEFAULT_CLIENT_ID {
            config.client_id = self.config.client_id.clone();
        }
        ConsumerBuilder::from_config(self.broker.clone(), self.context.clone(), config)
    }

    fn producer_builder_from(&self, mut config: ProducerConfig) -> ProducerBuilder<B> {
        if config.client_id == DEFAULT_CLIENT_ID {
            config.client_id = self.config.client_id.clone();
        }
        ProducerBuilder::from_config(self.broker.clone(), self.context.clone(), config)
    }
}

impl<B: BrokerClient> Transport for BrokerTransport<B> {
    type Consumer = GroupConsumer<B>;
    type Producer = BatchProducer<B>;

    fn create_consumer(
        &self,
        callback: impl MessageHandler,
        config: ConsumerConfig,
    ) -> Result<GroupConsumer<B>> {
        self.consumer_builder_from(config).callback(callback).build()
    }

    fn create_producer(&self, config: ProducerConfig) -> Result<BatchProducer<B>> {
        self.producer_builder_from(config).build()
    }

    fn driver_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

impl MemoryTransport {
    /// Start an in-process broker named after the url's host part,
    /// `memory://orders` for example.
    pub fn connect(url: &str) -> Result<Self> {
        Self::from_config(TransportConfig::new(url))
    }

    /// Same as [`connect`](Self::connect), reading `SLUICE_URL`.
    pub fn from_env() -> Result<Self> {
        Self::from_config(TransportConfig::from_env()?)
    }

    pub fn from_config(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        let (scheme, name) = config.scheme()?;
        if scheme != MEMORY_SCHEME {
            return Err(Error::Configuration(format!(
                "unsupported transport scheme {:?}",
                scheme
            )));
        }
        if name.is_empty() {
            return Err(Error::Configuration("memory url needs a broker name".into()));
        }
        tracing::debug!("Starting in-memory broker {}", name);
        let broker = Arc::new(MemoryBroker::new(name));
        Self::new(broker, ExecutionContext::current()?, config)
    }
}

#[cfg(test)]
mod test {
    use super::{ExecutionContext, MemoryTransport, Transport};
    use crate::{
        config::{ConsumerConfig, ProducerConfig, TransportConfig},
        error::Error,
        message::Message,
    };

    #[test]
    fn context_needs_a_runtime() {
        assert!(matches!(
            ExecutionContext::current(),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn connects_to_memory_urls_only() {
        let transport = MemoryTransport::connect("memory://orders").unwrap();
        assert_eq!(transport.broker().name(), "orders");
        assert_eq!(transport.driver_version(), env!("CARGO_PKG_VERSION"));

        for url in ["", "orders", "kafka://localhost:9092", "memory://"] {
            assert!(
                matches!(MemoryTransport::connect(url), Err(Error::Configuration(_))),
                "{url} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn consumers_need_a_group() {
        let transport = MemoryTransport::connect("memory://orders").unwrap();
        let handler = |_: Message| async { Ok::<(), Error>(()) };

        let created = transport.create_consumer(handler, ConsumerConfig::default());
        assert!(matches!(created, Err(Error::Configuration(_))));

        let consumer = transport
            .create_consumer(handler, ConsumerConfig::new("billing"))
            .unwrap();
        assert_eq!(consumer.config().group_id, "billing");
    }

    #[tokio::test]
    async fn client_id_defaults_to_the_transport() {
        let mut config = TransportConfig::new("memory://orders");
        config.client_id = "billing-service".into();
        let transport = MemoryTransport::from_config(config).unwrap();

        let producer = transport.create_producer(ProducerConfig::default()).unwrap();
        assert_eq!(producer.config().client_id, "billing-service");

        let consumer = transport.consumer_builder("billing").build().unwrap();
        assert_eq!(consumer.config().client_id, "billing-service");
    }
}
