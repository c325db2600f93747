//! # Sluice
//! Consumer, producer and transport layer for stream processors reading
//! from and writing to a partitioned, offset-addressed log.
//!
//! The crate covers everything between application code and the broker
//! client: group membership and rebalances, offset acknowledgement and
//! commits, backpressure through pausing partitions, batched producing
//! with per-record delivery tracking.
//!
//! ## Goals
//! - At-least-once delivery that survives rebalances and restarts
//! - Leverage best in class libraries such as Tokio to do the heavy lifting
//! - Keep the broker behind a trait, so backends can be swapped
//!
//! ## Table of contents
//! - [Getting started](#getting-started)
//!     - [Transport](#transport)
//!     - [Producer](#producer)
//!     - [Consumer](#consumer)
//!
//! ## Getting started
//! Include the following snippet in your `Cargo.toml` dependencies:
//! ```toml
//! sluice = "0.1"
//! ```
//!
//! ### Transport
//! A [`Transport`](prelude::Transport) binds consumers and producers to one
//! broker and one runtime. The [`MemoryTransport`](prelude::MemoryTransport)
//! runs a complete broker in-process, which is what the tests and the
//! `orders` binary use.
//! ```rust
//! # async fn demo() -> sluice::error::Result<()> {
//! let transport = sluice::prelude::MemoryTransport::connect("memory://orders")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Producer
//! A [`Producer`](prelude::Producer) sends records to a topic. To instantiate
//! one, start with a [`ProducerBuilder`](prelude::ProducerBuilder) or
//! [`Transport::create_producer`](prelude::Transport::create_producer).
//!
//! It is buffered, with both a timeout and volume threshold that clears the
//! buffer when reached. This is how latency and throughput can be tweaked to
//! achieve the desired rates. Every send returns a
//! [`DeliveryHandle`](prelude::DeliveryHandle) that resolves once the broker
//! acknowledged the record.
//! ```rust
//! # async fn demo() -> sluice::error::Result<()> {
//! use sluice::prelude::*;
//!
//! let transport = MemoryTransport::connect("memory://orders")?;
//! let producer = transport.producer_builder().linger(std::time::Duration::from_millis(1)).build()?;
//! producer.create_topic(&NewTopic::new("orders", 3, 1).ensure_created(true)).await?;
//!
//! let handle = producer
//!     .send("orders", Some(Bytes::from_static(b"customer-7")), Some(Bytes::from_static(b"{}")), None)
//!     .await?;
//! let metadata = handle.await?;
//! println!("stored at {:?}", metadata.offset);
//! # Ok(())
//! # }
//! ```
//!
//! ### Consumer
//! A [`Consumer`](prelude::Consumer) is a member of a consumer group. The
//! group divides the partitions of the subscribed topics among its members
//! and moves them around as members come and go.
//!
//! Messages are either pulled with [`getmany`](prelude::Consumer::getmany)
//! or pushed to a callback once the consumer is started. Processed messages
//! are acknowledged with [`ack`](prelude::Consumer::ack) and acknowledged
//! offsets are committed periodically or by [`commit`](prelude::Consumer::commit).
//! ```rust
//! # async fn demo() -> sluice::error::Result<()> {
//! use sluice::prelude::*;
//! use tokio_stream::StreamExt;
//!
//! let transport = MemoryTransport::connect("memory://orders")?;
//! let consumer = transport.consumer_builder("billing").build()?;
//! consumer.subscribe(&["orders"]).await?;
//! consumer.wait_for_assignment(std::time::Duration::from_secs(1)).await?;
//!
//! let mut messages = consumer.getmany(&[], std::time::Duration::from_millis(100));
//! while let Some(Ok((tp, message))) = messages.next().await {
//!     println!("{} {:?}", tp, message.value);
//!     consumer.ack(&tp, message.offset)?;
//! }
//! consumer.commit(None).await?;
//! consumer.close().await?;
//! # Ok(())
//! # }
//! ```

mod admin;
mod assignor;
mod broker;
mod config;
mod consumer;
mod consumer_builder;
mod consumer_group;
pub mod error;
mod fetcher;
mod message;
mod metadata;
mod offsets;
mod partitioner;
mod producer;
mod producer_builder;
mod state;
mod transport;
mod utils;

const DEFAULT_CLIENT_ID: &str = "sluice";

pub use bytes;

pub mod prelude {
    //! Main export of various structures and methods
    //!
    //! We break the library into four main sections:
    //! - [Transports](#transports)
    //! - [Producing](#producing)
    //! - [Consuming](#consuming)
    //! - [Brokers](#brokers)
    //!
    //! # Transports
    //!
    //! A [`Transport`] creates consumers and producers that share one broker
    //! connection and one [`ExecutionContext`]. [`BrokerTransport`] works
    //! with any [`BrokerClient`], [`MemoryTransport`] is the in-process one.
    //!
    //! # Producing
    //!
    //! The [`BatchProducer`] is represented as a background worker containing
    //! a queue of records to be sent upon meeting either of two conditions:
    //! - The maximum number of records is filled
    //! - The linger time has ran out
    //!
    //! When either of these two are met, the record queue is flushed and
    //! produced with one request per partition. Each record's
    //! [`DeliveryHandle`] then resolves to its [`RecordMetadata`] or to the
    //! broker's rejection.
    //!
    //! # Consuming
    //!
    //! The [`GroupConsumer`] joins a consumer group on
    //! [`subscribe`](Consumer::subscribe). Around every rebalance it calls the
    //! [`RebalanceListener`], commits what was acknowledged on the partitions
    //! it gives up and resumes new partitions from the group's committed
    //! offsets.
    //!
    //! # Brokers
    //!
    //! [`BrokerClient`] is the seam to a cluster. The [`MemoryBroker`] is a
    //! complete implementation with a group coordinator and fault injection,
    //! meant for tests and local development.
    pub use crate::admin::{create_topic, NewTopic};
    pub use crate::assignor::{assign, Assignments, RANGE_PROTOCOL, ROUND_ROBIN_PROTOCOL};
    pub use crate::broker::{
        memory::{BrokerOperation, MemoryBroker},
        BrokerClient, FetchRequest, FetchedPartition, GroupEvent, GroupMembership, OffsetSpec,
        TopicCreation,
    };
    pub use crate::config::{
        from_json, Acks, AutoOffsetReset, ConsumerConfig, ProducerConfig, TransportConfig,
    };
    pub use crate::consumer::{
        Consumer, ConsumerCallback, GroupConsumer, MessageHandler, MessageStream,
        RebalanceListener,
    };
    pub use crate::consumer_builder::ConsumerBuilder;
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::message::{
        Header, Message, ProduceRecord, RecordMetadata, TopicOrPartition, TopicPartition,
    };
    pub use crate::metadata::ClusterMetadata;
    pub use crate::offsets::{OffsetTable, PendingCommit};
    pub use crate::partitioner::DefaultPartitioner;
    pub use crate::producer::{BatchProducer, DeliveryHandle, DeliveryState, Producer};
    pub use crate::producer_builder::ProducerBuilder;
    pub use crate::state::ConsumerState;
    pub use crate::transport::{
        BrokerTransport, ExecutionContext, MemoryTransport, Transport,
    };
    pub use bytes::Bytes;
}
