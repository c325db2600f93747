//! Value types shared by consumers, producers and brokers.

use std::fmt;

use bytes::Bytes;

/// A partition of a topic.
///
/// Ordered by topic name first, then partition index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

impl<T: Into<String>> From<(T, i32)> for TopicPartition {
    fn from((topic, partition): (T, i32)) -> Self {
        Self::new(topic, partition)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub key: String,
    pub value: Bytes,
}

impl Header {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A record read from a partition.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub topic_partition: TopicPartition,
    pub offset: i64,
    /// Milliseconds since the unix epoch.
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
}

impl Message {
    pub fn topic(&self) -> &str {
        &self.topic_partition.topic
    }

    pub fn partition(&self) -> i32 {
        self.topic_partition.partition
    }
}

/// A record to be written.
///
/// When `partition` is `None` the producer's partitioner picks one.
#[derive(Clone, Debug, PartialEq)]
pub struct ProduceRecord {
    pub topic: String,
    pub partition: Option<i32>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub headers: Vec<Header>,
    /// Milliseconds since the unix epoch, stamped by the producer if absent.
    pub timestamp: Option<i64>,
}

impl ProduceRecord {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            value: None,
            headers: vec![],
            timestamp: None,
        }
    }

    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header::new(key, value));
        self
    }

    /// Size of key and value, used against the broker's message size limit.
    pub fn payload_len(&self) -> usize {
        self.key.as_ref().map_or(0, Bytes::len) + self.value.as_ref().map_or(0, Bytes::len)
    }
}

/// Where the broker stored an acknowledged record.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordMetadata {
    pub topic_partition: TopicPartition,
    /// `None` when the producer does not wait for acknowledgement.
    pub offset: Option<i64>,
    pub timestamp: i64,
}

/// Selects what [`Consumer::commit`](crate::consumer::Consumer::commit) flushes:
/// a whole topic or a single partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopicOrPartition {
    Topic(String),
    Partition(TopicPartition),
}

impl TopicOrPartition {
    pub fn matches(&self, tp: &TopicPartition) -> bool {
        match self {
            TopicOrPartition::Topic(topic) => tp.topic == *topic,
            TopicOrPartition::Partition(partition) => partition == tp,
        }
    }
}

impl From<&str> for TopicOrPartition {
    fn from(topic: &str) -> Self {
        TopicOrPartition::Topic(topic.to_owned())
    }
}

impl From<String> for TopicOrPartition {
    fn from(topic: String) -> Self {
        TopicOrPartition::Topic(topic)
    }
}

impl From<TopicPartition> for TopicOrPartition {
    fn from(tp: TopicPartition) -> Self {
        TopicOrPartition::Partition(tp)
    }
}

#[cfg(test)]
mod test {
    use super::{TopicOrPartition, TopicPartition};

    #[test]
    fn topic_partitions_order_by_topic_then_partition() {
        let mut tps = vec![
            TopicPartition::new("orders", 2),
            TopicPartition::new("audit", 7),
            TopicPartition::new("orders", 0),
        ];
        tps.sort();
        assert_eq!(
            tps,
            vec![
                TopicPartition::new("audit", 7),
                TopicPartition::new("orders", 0),
                TopicPartition::new("orders", 2),
            ]
        );
        assert_eq!(TopicPartition::new("orders", 2).to_string(), "orders-2");
    }

    #[test]
    fn selectors_match_topics_and_partitions() {
        let tp = TopicPartition::new("orders", 1);
        assert!(TopicOrPartition::from("orders").matches(&tp));
        assert!(!TopicOrPartition::from("audit").matches(&tp));
        assert!(TopicOrPartition::from(tp.clone()).matches(&tp));
        assert!(!TopicOrPartition::from(TopicPartition::new("orders", 0)).matches(&tp));
    }
}
