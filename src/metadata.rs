//! Cluster metadata as seen by a producer.
use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use tracing::instrument;

use crate::{
    broker::BrokerClient,
    error::{Error, Result},
};

/// Partition counts of the topics a producer writes to.
///
/// Counts are looked up lazily the first time a topic is seen and kept
/// until [`invalidate`](Self::invalidate) is called for the topic.
#[derive(Debug)]
pub struct ClusterMetadata<B: BrokerClient + ?Sized> {
    broker: Arc<B>,
    partition_counts: RwLock<HashMap<String, i32>>,
}

impl<B: BrokerClient + ?Sized> ClusterMetadata<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            broker,
            partition_counts: RwLock::new(HashMap::new()),
        }
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn partition_count(&self, topic: &str) -> Result<i32> {
        if let Some(count) = self.partition_counts.read().await.get(topic) {
            return Ok(*count);
        }

        let count = self
            .broker
            .partition_count(topic)
            .await?
            .ok_or_else(|| Error::TopicNotFound(topic.to_owned()))?;
        tracing::debug!("Topic {} has {} partitions", topic, count);
        self.partition_counts
            .write()
            .await
            .insert(topic.to_owned(), count);
        Ok(count)
    }

    /// Forget a topic, e.g. after the broker reported it unknown.
    pub async fn invalidate(&self, topic: &str) {
        self.partition_counts.write().await.remove(topic);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::ClusterMetadata;
    use crate::{
        admin::NewTopic,
        broker::{
            memory::{BrokerOperation, MemoryBroker},
            BrokerClient,
        },
        error::{Error, KafkaCode},
    };

    #[tokio::test]
    async fn caches_partition_counts() {
        let broker = Arc::new(MemoryBroker::new("metadata"));
        broker.create_topic(&NewTopic::new("orders", 3, 1)).await.unwrap();
        let metadata = ClusterMetadata::new(broker.clone());

        assert_eq!(metadata.partition_count("orders").await, Ok(3));
        // served from the cache, the injected fault is never hit
        broker.fail_next(BrokerOperation::Metadata, KafkaCode::NotCoordinator, 1);
        assert_eq!(metadata.partition_count("orders").await, Ok(3));

        metadata.invalidate("orders").await;
        assert_eq!(
            metadata.partition_count("orders").await,
            Err(Error::KafkaError(KafkaCode::NotCoordinator))
        );
        assert_eq!(
            metadata.partition_count("missing").await,
            Err(Error::TopicNotFound("missing".into()))
        );
    }
}
