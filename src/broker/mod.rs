//! Communication with a broker.
//!
//! # Broker Module
//!
//! Consumers and producers never speak a wire protocol themselves. Every
//! request they make goes through a [`BrokerClient`], the seam where a
//! backend plugs in: a network client for a real cluster, or the
//! [`MemoryBroker`](memory::MemoryBroker) that keeps the whole log in
//! process.
//!
//! A client is shared by every consumer and producer a transport creates,
//! so implementations must be safe to call concurrently. Requests that are
//! logically independent (a fetch, a commit, a metadata lookup) may be in
//! flight at the same time; the backend serializes whatever its connection
//! requires.
//!
//! Offsets exchanged with the group coordinator follow the broker
//! convention: a committed offset is the offset of the *next* record the
//! group should read.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    admin::NewTopic,
    error::{KafkaCode, Result},
    message::{Message, ProduceRecord, TopicPartition},
};

pub mod memory;

/// Outcome of a topic creation request.
#[derive(Clone, Debug, PartialEq)]
pub enum TopicCreation {
    Created,
    AlreadyExists { partitions: i32 },
}

/// Which end of a partition's log to look up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffsetSpec {
    Earliest,
    Latest,
}

#[derive(Clone, Debug)]
pub struct FetchRequest {
    /// Partitions to read and the offset to start from for each.
    pub partitions: Vec<(TopicPartition, i64)>,
    /// How long the broker may wait for records to show up.
    pub max_wait: Duration,
    /// Upper bound on records across all partitions.
    pub max_records: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchedPartition {
    pub topic_partition: TopicPartition,
    pub error_code: KafkaCode,
    /// Log end offset at the time of the fetch.
    pub highwater: i64,
    pub records: Vec<Message>,
}

/// Notifications from the group coordinator to one member.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupEvent {
    /// Membership changed. The member must give up every partition not in
    /// `assignment`, then acknowledge with
    /// [`sync_group`](BrokerClient::sync_group).
    Rebalance {
        generation: i32,
        assignment: BTreeSet<TopicPartition>,
    },
    /// Every member synced, the assignment of `generation` is in effect.
    Stable { generation: i32 },
}

/// A member's handle on its consumer group.
#[derive(Debug)]
pub struct GroupMembership {
    pub member_id: String,
    pub events: UnboundedReceiver<GroupEvent>,
}

#[async_trait]
pub trait BrokerClient: Debug + Send + Sync + 'static {
    async fn create_topic(&self, topic: &NewTopic) -> Result<TopicCreation>;

    /// Number of partitions of `topic`, `None` when it does not exist.
    async fn partition_count(&self, topic: &str) -> Result<Option<i32>>;

    /// Append records to one partition, returning the offset of the first.
    async fn produce(&self, tp: &TopicPartition, records: Vec<ProduceRecord>) -> Result<i64>;

    async fn fetch(&self, request: FetchRequest) -> Result<Vec<FetchedPartition>>;

    async fn list_offset(&self, tp: &TopicPartition, spec: OffsetSpec) -> Result<i64>;

    /// Become a member of a group, creating it if there are no active members.
    async fn join_group(
        &self,
        group_id: &str,
        client_id: &str,
        topics: &[String],
    ) -> Result<GroupMembership>;

    /// Replace the topics a member subscribes to, triggering a rebalance.
    async fn update_subscription(
        &self,
        group_id: &str,
        member_id: &str,
        topics: &[String],
    ) -> Result<()>;

    /// Acknowledge that a member finished revoking for `generation`.
    async fn sync_group(&self, group_id: &str, member_id: &str, generation: i32) -> Result<()>;

    /// Directly depart a group.
    async fn leave_group(&self, group_id: &str, member_id: &str) -> Result<()>;

    async fn commit_offsets(
        &self,
        group_id: &str,
        member_id: &str,
        offsets: &BTreeMap<TopicPartition, i64>,
    ) -> Result<()>;

    /// Committed offsets of a group; partitions without one are left out.
    async fn committed_offsets(
        &self,
        group_id: &str,
        tps: &[TopicPartition],
    ) -> Result<BTreeMap<TopicPartition, i64>>;
}
