//! Topic provisioning shared by consumers and producers.

use std::{collections::BTreeMap, time::Duration};

use tracing::instrument;

use crate::{
    broker::{BrokerClient, TopicCreation},
    error::{Error, Result},
};

const DEFAULT_CREATE_TIMEOUT_MS: u64 = 1_000_000;

const CLEANUP_POLICY: &str = "cleanup.policy";
const RETENTION_MS: &str = "retention.ms";

/// Options for creating a topic.
///
/// ### Example
/// ```rust
/// let topic = sluice::prelude::NewTopic::new("orders", 4, 1)
///     .retention(std::time::Duration::from_secs(3600))
///     .compacting(true)
///     .ensure_created(true);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct NewTopic {
    pub topic: String,
    pub partitions: i32,
    pub replication: i32,
    /// Raw topic configs, merged under the derived ones.
    pub config: BTreeMap<String, String>,
    pub timeout: Duration,
    pub retention: Option<Duration>,
    pub compacting: Option<bool>,
    pub deleting: Option<bool>,
    /// Create the topic when missing instead of failing.
    pub ensure_created: bool,
}

impl NewTopic {
    pub fn new(topic: impl Into<String>, partitions: i32, replication: i32) -> Self {
        Self {
            topic: topic.into(),
            partitions,
            replication,
            config: BTreeMap::new(),
            timeout: Duration::from_millis(DEFAULT_CREATE_TIMEOUT_MS),
            retention: None,
            compacting: None,
            deleting: None,
            ensure_created: false,
        }
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn compacting(mut self, compacting: bool) -> Self {
        self.compacting = Some(compacting);
        self
    }

    pub fn deleting(mut self, deleting: bool) -> Self {
        self.deleting = Some(deleting);
        self
    }

    pub fn ensure_created(mut self, ensure_created: bool) -> Self {
        self.ensure_created = ensure_created;
        self
    }

    /// Topic configs sent to the broker.
    ///
    /// `retention`, `compacting` and `deleting` win over the same keys in
    /// [`config`](Self::config).
    pub fn effective_config(&self) -> BTreeMap<String, String> {
        let mut config = self.config.clone();
        if let Some(retention) = self.retention {
            config.insert(RETENTION_MS.to_owned(), retention.as_millis().to_string());
        }
        let policy = match (self.compacting, self.deleting) {
            (Some(true), Some(true)) => Some("compact,delete"),
            (Some(true), _) => Some("compact"),
            (_, Some(true)) => Some("delete"),
            _ => None,
        };
        if let Some(policy) = policy {
            config.insert(CLEANUP_POLICY.to_owned(), policy.to_owned());
        }
        config
    }

    fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(Error::Configuration("topic name must not be empty".into()));
        }
        if self.partitions <= 0 {
            return Err(Error::Configuration(format!(
                "topic {} needs at least one partition",
                self.topic
            )));
        }
        if self.replication <= 0 {
            return Err(Error::Configuration(format!(
                "topic {} needs a replication factor of at least one",
                self.topic
            )));
        }
        Ok(())
    }
}

/// Create a topic, or check that it exists.
///
/// Idempotent: an existing topic with the requested partition count is
/// left alone. An existing topic with a different partition count fails
/// with [`Error::TopicAlreadyExists`]. When `ensure_created` is off a
/// missing topic fails with [`Error::TopicNotFound`].
#[instrument(level = "debug", skip_all, fields(topic = %topic.topic))]
pub async fn create_topic<B: BrokerClient + ?Sized>(broker: &B, topic: &NewTopic) -> Result<()> {
    topic.validate()?;

    let provision = async {
        if !topic.ensure_created {
            return match broker.partition_count(&topic.topic).await? {
                Some(partitions) => check_partitions(topic, partitions),
                None => Err(Error::TopicNotFound(topic.topic.clone())),
            };
        }

        match broker.create_topic(topic).await? {
            TopicCreation::Created => {
                tracing::info!(
                    "Created topic {} with {} partitions",
                    topic.topic,
                    topic.partitions
                );
                Ok(())
            }
            TopicCreation::AlreadyExists { partitions } => check_partitions(topic, partitions),
        }
    };

    tokio::time::timeout(topic.timeout, provision)
        .await
        .map_err(|_| Error::timeout("create_topic", topic.timeout))?
}

fn check_partitions(topic: &NewTopic, partitions: i32) -> Result<()> {
    if partitions == topic.partitions {
        tracing::debug!("Topic {} already exists", topic.topic);
        Ok(())
    } else {
        tracing::warn!(
            "Topic {} exists with {} partitions, wanted {}",
            topic.topic,
            partitions,
            topic.partitions
        );
        Err(Error::TopicAlreadyExists(topic.topic.clone()))
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::NewTopic;

    #[test]
    fn derives_cleanup_policy_and_retention() {
        let topic = NewTopic::new("orders", 1, 1)
            .config("cleanup.policy", "delete")
            .config("segment.ms", "1000")
            .retention(Duration::from_secs(2))
            .compacting(true);
        let config = topic.effective_config();
        assert_eq!(config["cleanup.policy"], "compact");
        assert_eq!(config["retention.ms"], "2000");
        assert_eq!(config["segment.ms"], "1000");

        let both = NewTopic::new("orders", 1, 1).compacting(true).deleting(true);
        assert_eq!(both.effective_config()["cleanup.policy"], "compact,delete");

        let none = NewTopic::new("orders", 1, 1).compacting(false);
        assert!(none.effective_config().is_empty());
    }
}
