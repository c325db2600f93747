//! A broker that keeps every log and consumer group in process.
//!
//! Used by the `memory://` transport. It implements the same contract a
//! network backend does: long-polling fetches, group membership with a
//! revoke/sync barrier, ownership-checked offset commits. Faults can be
//! injected to exercise retry and shutdown paths.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedSender},
        Notify,
    },
    time::Instant,
};
use tracing::instrument;

use super::{
    BrokerClient, FetchRequest, FetchedPartition, GroupEvent, GroupMembership, OffsetSpec,
    TopicCreation,
};
use crate::{
    admin::NewTopic,
    assignor::{self, Assignments, Subscriptions, ROUND_ROBIN_PROTOCOL},
    error::{Error, KafkaCode, Result},
    message::{Header, Message, ProduceRecord, TopicPartition},
    utils::now,
};

const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Broker requests that faults can be injected into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrokerOperation {
    CreateTopic,
    Metadata,
    Produce,
    Fetch,
    ListOffsets,
    JoinGroup,
    SyncGroup,
    LeaveGroup,
    CommitOffsets,
    FetchOffsets,
}

#[derive(Debug)]
pub struct MemoryBroker {
    name: String,
    assignment_strategy: &'static str,
    max_message_bytes: usize,
    state: Mutex<ClusterState>,
    data_arrived: Notify,
}

#[derive(Debug)]
struct ClusterState {
    available: bool,
    topics: BTreeMap<String, TopicLog>,
    groups: HashMap<String, GroupState>,
    faults: HashMap<BrokerOperation, VecDeque<KafkaCode>>,
    next_member_id: u64,
}

#[derive(Debug)]
struct TopicLog {
    config: BTreeMap<String, String>,
    partitions: Vec<PartitionLog>,
}

#[derive(Debug, Default)]
struct PartitionLog {
    /// Offset of `records[0]`.
    start_offset: i64,
    records: VecDeque<StoredRecord>,
}

#[derive(Debug)]
struct StoredRecord {
    timestamp: i64,
    key: Option<bytes::Bytes>,
    value: Option<bytes::Bytes>,
    headers: Vec<Header>,
}

impl PartitionLog {
    fn end_offset(&self) -> i64 {
        self.start_offset + self.records.len() as i64
    }
}

#[derive(Debug, Default)]
struct GroupState {
    /// Generation whose assignment is in effect.
    generation: i32,
    members: BTreeMap<String, MemberState>,
    rebalance: Option<PendingRebalance>,
    /// A membership change arrived while a rebalance was running.
    rebalance_queued: bool,
    offsets: BTreeMap<TopicPartition, i64>,
}

#[derive(Debug)]
struct MemberState {
    topics: BTreeSet<String>,
    events: UnboundedSender<GroupEvent>,
    /// Partitions this member may commit for.
    owned: BTreeSet<TopicPartition>,
}

#[derive(Debug)]
struct PendingRebalance {
    generation: i32,
    assignments: Assignments,
    awaiting: BTreeSet<String>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new("default")
    }
}

impl MemoryBroker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assignment_strategy: ROUND_ROBIN_PROTOCOL,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            state: Mutex::new(ClusterState {
                available: true,
                topics: BTreeMap::new(),
                groups: HashMap::new(),
                faults: HashMap::new(),
                next_member_id: 0,
            }),
            data_arrived: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Use another [`assignor`] strategy for consumer groups.
    pub fn assignment_strategy(mut self, strategy: &'static str) -> Self {
        self.assignment_strategy = strategy;
        self
    }

    /// Largest key plus value accepted by produce.
    pub fn max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    /// Fail the next `times` requests of `operation` with `code`.
    pub fn fail_next(&self, operation: BrokerOperation, code: KafkaCode, times: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry(operation).or_default();
        queue.extend(std::iter::repeat(code).take(times));
    }

    /// While unavailable every request fails with [`Error::BrokerUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
        // wake long polls so they observe the outage
        self.data_arrived.notify_waiters();
    }

    /// Drop every record of `tp` before `offset`, as retention would.
    pub fn truncate_before(&self, tp: &TopicPartition, offset: i64) -> Result<()> {
        let mut state = self.lock();
        let log = partition_mut(&mut state, tp)?;
        while log.start_offset < offset && !log.records.is_empty() {
            log.records.pop_front();
            log.start_offset += 1;
        }
        Ok(())
    }

    /// Configs of an existing topic.
    pub fn topic_config(&self, topic: &str) -> Option<BTreeMap<String, String>> {
        self.lock().topics.get(topic).map(|log| log.config.clone())
    }

    /// Current assignment of every member of a group.
    pub fn group_assignments(&self, group_id: &str) -> BTreeMap<String, BTreeSet<TopicPartition>> {
        self.lock()
            .groups
            .get(group_id)
            .map(|group| {
                group
                    .members
                    .iter()
                    .map(|(member, state)| (member.clone(), state.owned.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gate every request on availability and injected faults.
    fn admit(&self, state: &mut ClusterState, operation: BrokerOperation) -> Result<()> {
        if !state.available {
            return Err(Error::BrokerUnavailable(format!(
                "memory broker {} is unavailable",
                self.name
            )));
        }
        if let Some(code) = state
            .faults
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            tracing::debug!("Injecting {:?} into {:?}", code, operation);
            return Err(Error::KafkaError(code));
        }
        Ok(())
    }

    fn read(&self, state: &ClusterState, request: &FetchRequest) -> Vec<FetchedPartition> {
        let mut budget = request.max_records;
        request
            .partitions
            .iter()
            .map(|(tp, offset)| {
                let Some(log) = partition(state, tp) else {
                    return FetchedPartition {
                        topic_partition: tp.clone(),
                        error_code: KafkaCode::UnknownTopicOrPartition,
                        highwater: -1,
                        records: vec![],
                    };
                };
                let highwater = log.end_offset();
                if *offset < log.start_offset || *offset > highwater {
                    return FetchedPartition {
                        topic_partition: tp.clone(),
                        error_code: KafkaCode::OffsetOutOfRange,
                        highwater,
                        records: vec![],
                    };
                }

                let skip = (*offset - log.start_offset) as usize;
                let records: Vec<Message> = log
                    .records
                    .iter()
                    .skip(skip)
                    .take(budget)
                    .enumerate()
                    .map(|(i, record)| Message {
                        topic_partition: tp.clone(),
                        offset: *offset + i as i64,
                        timestamp: record.timestamp,
                        key: record.key.clone(),
                        value: record.value.clone(),
                        headers: record.headers.clone(),
                    })
                    .collect();
                budget -= records.len();

                FetchedPartition {
                    topic_partition: tp.clone(),
                    error_code: KafkaCode::None,
                    highwater,
                    records,
                }
            })
            .collect()
    }

    /// Start a rebalance for `group_id`, or queue one behind the running one.
    fn rebalance(&self, state: &mut ClusterState, group_id: &str) {
        let partition_counts: BTreeMap<String, i32> = state
            .topics
            .iter()
            .map(|(name, log)| (name.clone(), log.partitions.len() as i32))
            .collect();
        let Some(group) = state.groups.get_mut(group_id) else {
            return;
        };
        if group.rebalance.is_some() {
            group.rebalance_queued = true;
            return;
        }

        loop {
            if group.members.is_empty() {
                return;
            }
            let subscriptions: Subscriptions = group
                .members
                .iter()
                .map(|(member, state)| (member.clone(), state.topics.clone()))
                .collect();
            let assignments =
                match assignor::assign(self.assignment_strategy, &subscriptions, &partition_counts) {
                    Ok(assignments) => assignments,
                    Err(err) => {
                        tracing::error!("Group {} | cannot assign partitions: {}", group_id, err);
                        return;
                    }
                };
            let generation = group.generation + 1;

            // members whose channel is gone left without saying goodbye
            let gone: Vec<String> = group
                .members
                .iter()
                .filter(|(member, state)| {
                    let assignment = assignments.get(*member).cloned().unwrap_or_default();
                    state
                        .events
                        .send(GroupEvent::Rebalance {
                            generation,
                            assignment,
                        })
                        .is_err()
                })
                .map(|(member, _)| member.clone())
                .collect();
            if !gone.is_empty() {
                tracing::warn!("Group {} | dropping unreachable members {:?}", group_id, gone);
                for member in gone {
                    group.members.remove(&member);
                }
                // the rebalance notices already sent are superseded by this generation
                group.generation = generation;
                continue;
            }

            tracing::info!(
                "Group {} | rebalancing to generation {} with {} members",
                group_id,
                generation,
                group.members.len()
            );
            group.rebalance = Some(PendingRebalance {
                generation,
                awaiting: group.members.keys().cloned().collect(),
                assignments,
            });
            return;
        }
    }

    /// Finish the running rebalance once nobody is left to sync.
    fn complete_rebalance(&self, state: &mut ClusterState, group_id: &str) {
        let Some(group) = state.groups.get_mut(group_id) else {
            return;
        };
        let done = matches!(&group.rebalance, Some(pending) if pending.awaiting.is_empty());
        if !done {
            return;
        }
        let Some(pending) = group.rebalance.take() else {
            return;
        };

        group.generation = pending.generation;
        for (member, state) in group.members.iter_mut() {
            state.owned = pending.assignments.get(member).cloned().unwrap_or_default();
            // a closed channel is caught by the next rebalance
            let _ = state.events.send(GroupEvent::Stable {
                generation: pending.generation,
            });
        }
        tracing::info!(
            "Group {} | generation {} is stable",
            group_id,
            pending.generation
        );

        if std::mem::take(&mut group.rebalance_queued) {
            self.rebalance(state, group_id);
        }
    }
}

fn partition<'a>(state: &'a ClusterState, tp: &TopicPartition) -> Option<&'a PartitionLog> {
    state
        .topics
        .get(&tp.topic)?
        .partitions
        .get(usize::try_from(tp.partition).ok()?)
}

fn partition_mut<'a>(state: &'a mut ClusterState, tp: &TopicPartition) -> Result<&'a mut PartitionLog> {
    state
        .topics
        .get_mut(&tp.topic)
        .and_then(|log| log.partitions.get_mut(usize::try_from(tp.partition).ok()?))
        .ok_or(Error::KafkaError(KafkaCode::UnknownTopicOrPartition))
}

#[async_trait]
impl BrokerClient for MemoryBroker {
    #[instrument(level = "debug", skip_all, fields(topic = %topic.topic))]
    async fn create_topic(&self, topic: &NewTopic) -> Result<TopicCreation> {
        let mut state = self.lock();
        self.admit(&mut state, BrokerOperation::CreateTopic)?;
        if let Some(existing) = state.topics.get(&topic.topic) {
            return Ok(TopicCreation::AlreadyExists {
                partitions: existing.partitions.len() as i32,
            });
        }
        state.topics.insert(
            topic.topic.clone(),
            TopicLog {
                config: topic.effective_config(),
                partitions: (0..topic.partitions).map(|_| PartitionLog::default()).collect(),
            },
        );

        // groups already subscribed to this topic pick up its partitions
        let interested: Vec<String> = state
            .groups
            .iter()
            .filter(|(_, group)| {
                group
                    .members
                    .values()
                    .any(|member| member.topics.contains(&topic.topic))
            })
            .map(|(group_id, _)| group_id.clone())
            .collect();
        for group_id in interested {
            self.rebalance(&mut state, &group_id);
        }

        Ok(TopicCreation::Created)
    }

    async fn partition_count(&self, topic: &str) -> Result<Option<i32>> {
        let mut state = self.lock();
        self.admit(&mut state, BrokerOperation::Metadata)?;
        Ok(state
            .topics
            .get(topic)
            .map(|log| log.partitions.len() as i32))
    }

    #[instrument(level = "trace", skip(self, records), fields(count = records.len()))]
    async fn produce(&self, tp: &TopicPartition, records: Vec<ProduceRecord>) -> Result<i64> {
        let base_offset = {
            let mut state = self.lock();
            self.admit(&mut state, BrokerOperation::Produce)?;
            if records
                .iter()
                .any(|record| record.payload_len() > self.max_message_bytes)
            {
                return Err(Error::KafkaError(KafkaCode::MessageSizeTooLarge));
            }
            let log = partition_mut(&mut state, tp)?;
            let base_offset = log.end_offset();
            let timestamp = now();
            log.records.extend(records.into_iter().map(|record| StoredRecord {
                timestamp: record.timestamp.unwrap_or(timestamp),
                key: record.key,
                value: record.value,
                headers: record.headers,
            }));
            base_offset
        };
        self.data_arrived.notify_waiters();
        Ok(base_offset)
    }

    #[instrument(level = "trace", skip_all)]
    async fn fetch(&self, request: FetchRequest) -> Result<Vec<FetchedPartition>> {
        let deadline = Instant::now() + request.max_wait;
        {
            let mut state = self.lock();
            self.admit(&mut state, BrokerOperation::Fetch)?;
        }

        loop {
            // register before looking so a produce in between is not missed
            let notified = self.data_arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let fetched = {
                let state = self.lock();
                if !state.available {
                    return Err(Error::BrokerUnavailable(format!(
                        "memory broker {} is unavailable",
                        self.name
                    )));
                }
                self.read(&state, &request)
            };
            let ready = fetched
                .iter()
                .any(|p| !p.records.is_empty() || p.error_code != KafkaCode::None);
            if ready || request.partitions.is_empty() {
                return Ok(fetched);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(fetched);
            }
        }
    }

    async fn list_offset(&self, tp: &TopicPartition, spec: OffsetSpec) -> Result<i64> {
        let mut state = self.lock();
        self.admit(&mut state, BrokerOperation::ListOffsets)?;
        let log = partition(&state, tp).ok_or(Error::KafkaError(KafkaCode::UnknownTopicOrPartition))?;
        Ok(match spec {
            OffsetSpec::Earliest => log.start_offset,
            OffsetSpec::Latest => log.end_offset(),
        })
    }

    #[instrument(level = "debug", skip(self))]
    async fn join_group(
        &self,
        group_id: &str,
        client_id: &str,
        topics: &[String],
    ) -> Result<GroupMembership> {
        let mut state = self.lock();
        self.admit(&mut state, BrokerOperation::JoinGroup)?;
        state.next_member_id += 1;
        let member_id = format!("{}-{}", client_id, state.next_member_id);
        let (sender, events) = unbounded_channel();

        state
            .groups
            .entry(group_id.to_owned())
            .or_default()
            .members
            .insert(
                member_id.clone(),
                MemberState {
                    topics: topics.iter().cloned().collect(),
                    events: sender,
                    owned: BTreeSet::new(),
                },
            );
        tracing::info!("Group {} | member {} joined", group_id, member_id);
        self.rebalance(&mut state, group_id);

        Ok(GroupMembership { member_id, events })
    }

    async fn update_subscription(
        &self,
        group_id: &str,
        member_id: &str,
        topics: &[String],
    ) -> Result<()> {
        let mut state = self.lock();
        self.admit(&mut state, BrokerOperation::JoinGroup)?;
        let member = state
            .groups
            .get_mut(group_id)
            .and_then(|group| group.members.get_mut(member_id))
            .ok_or(Error::KafkaError(KafkaCode::UnknownMemberId))?;
        member.topics = topics.iter().cloned().collect();
        self.rebalance(&mut state, group_id);
        Ok(())
    }

    async fn sync_group(&self, group_id: &str, member_id: &str, generation: i32) -> Result<()> {
        let mut state = self.lock();
        self.admit(&mut state, BrokerOperation::SyncGroup)?;
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or(Error::KafkaError(KafkaCode::UnknownMemberId))?;
        let pending = group
            .rebalance
            .as_mut()
            .filter(|pending| pending.generation == generation)
            .ok_or(Error::KafkaError(KafkaCode::IllegalGeneration))?;
        let assignment = pending.assignments.get(member_id).cloned().unwrap_or_default();
        pending.awaiting.remove(member_id);

        // revoked partitions are released as soon as the member syncs
        let member = group
            .members
            .get_mut(member_id)
            .ok_or(Error::KafkaError(KafkaCode::UnknownMemberId))?;
        member.owned = member.owned.intersection(&assignment).cloned().collect();

        self.complete_rebalance(&mut state, group_id);
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn leave_group(&self, group_id: &str, member_id: &str) -> Result<()> {
        let mut state = self.lock();
        self.admit(&mut state, BrokerOperation::LeaveGroup)?;
        let Some(group) = state.groups.get_mut(group_id) else {
            return Err(Error::KafkaError(KafkaCode::UnknownMemberId));
        };
        if group.members.remove(member_id).is_none() {
            return Err(Error::KafkaError(KafkaCode::UnknownMemberId));
        }
        tracing::info!("Group {} | member {} left", group_id, member_id);

        match group.rebalance.as_mut() {
            Some(pending) => {
                // its partitions are handed out by the queued rebalance
                pending.awaiting.remove(member_id);
                group.rebalance_queued = true;
                self.complete_rebalance(&mut state, group_id);
            }
            None => self.rebalance(&mut state, group_id),
        }
        Ok(())
    }

    async fn commit_offsets(
        &self,
        group_id: &str,
        member_id: &str,
        offsets: &BTreeMap<TopicPartition, i64>,
    ) -> Result<()> {
        let mut state = self.lock();
        self.admit(&mut state, BrokerOperation::CommitOffsets)?;
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or(Error::KafkaError(KafkaCode::UnknownMemberId))?;
        let member = group
            .members
            .get(member_id)
            .ok_or(Error::KafkaError(KafkaCode::UnknownMemberId))?;
        if let Some(tp) = offsets.keys().find(|tp| !member.owned.contains(*tp)) {
            tracing::warn!(
                "Group {} | member {} does not own {}, rejecting commit",
                group_id,
                member_id,
                tp
            );
            return Err(Error::KafkaError(KafkaCode::IllegalGeneration));
        }
        group
            .offsets
            .extend(offsets.iter().map(|(tp, offset)| (tp.clone(), *offset)));
        Ok(())
    }

    async fn committed_offsets(
        &self,
        group_id: &str,
        tps: &[TopicPartition],
    ) -> Result<BTreeMap<TopicPartition, i64>> {
        let mut state = self.lock();
        self.admit(&mut state, BrokerOperation::FetchOffsets)?;
        let Some(group) = state.groups.get(group_id) else {
            return Ok(BTreeMap::new());
        };
        Ok(tps
            .iter()
            .filter_map(|tp| group.offsets.get(tp).map(|offset| (tp.clone(), *offset)))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use std::{collections::BTreeMap, time::Duration};

    use bytes::Bytes;

    use super::{BrokerOperation, MemoryBroker};
    use crate::{
        admin::NewTopic,
        broker::{BrokerClient, FetchRequest, GroupEvent, GroupMembership, OffsetSpec, TopicCreation},
        error::{Error, KafkaCode},
        message::{ProduceRecord, TopicPartition},
    };

    const EVENT_WAIT: Duration = Duration::from_secs(1);

    async fn broker_with_topic(partitions: i32) -> MemoryBroker {
        let broker = MemoryBroker::new("test");
        broker
            .create_topic(&NewTopic::new("orders", partitions, 1))
            .await
            .unwrap();
        broker
    }

    async fn next_event(membership: &mut GroupMembership) -> GroupEvent {
        tokio::time::timeout(EVENT_WAIT, membership.events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn produce_then_fetch_from_offset() {
        let broker = broker_with_topic(1).await;
        let tp = TopicPartition::new("orders", 0);
        let records = (0..3)
            .map(|i| ProduceRecord::new("orders").value(Bytes::from(format!("order {}", i))))
            .collect();
        assert_eq!(broker.produce(&tp, records).await.unwrap(), 0);

        let fetched = broker
            .fetch(FetchRequest {
                partitions: vec![(tp.clone(), 1)],
                max_wait: Duration::from_millis(10),
                max_records: 10,
            })
            .await
            .unwrap();
        assert_eq!(fetched[0].highwater, 3);
        let offsets: Vec<i64> = fetched[0].records.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![1, 2]);
        assert_eq!(fetched[0].records[0].value, Some(Bytes::from("order 1")));
    }

    #[tokio::test]
    async fn fetch_long_polls_until_data_arrives() {
        let broker = std::sync::Arc::new(broker_with_topic(1).await);
        let tp = TopicPartition::new("orders", 0);

        let producer = {
            let broker = broker.clone();
            let tp = tp.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                broker
                    .produce(&tp, vec![ProduceRecord::new("orders").value("late")])
                    .await
            })
        };

        let fetched = broker
            .fetch(FetchRequest {
                partitions: vec![(tp, 0)],
                max_wait: Duration::from_secs(5),
                max_records: 10,
            })
            .await
            .unwrap();
        assert_eq!(fetched[0].records.len(), 1);
        producer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn fetch_reports_out_of_range_after_truncation() {
        let broker = broker_with_topic(1).await;
        let tp = TopicPartition::new("orders", 0);
        let records = (0..4).map(|_| ProduceRecord::new("orders").value("x")).collect();
        broker.produce(&tp, records).await.unwrap();
        broker.truncate_before(&tp, 2).unwrap();

        assert_eq!(broker.list_offset(&tp, OffsetSpec::Earliest).await.unwrap(), 2);
        assert_eq!(broker.list_offset(&tp, OffsetSpec::Latest).await.unwrap(), 4);
        let fetched = broker
            .fetch(FetchRequest {
                partitions: vec![(tp, 0)],
                max_wait: Duration::ZERO,
                max_records: 10,
            })
            .await
            .unwrap();
        assert_eq!(fetched[0].error_code, KafkaCode::OffsetOutOfRange);
    }

    #[tokio::test]
    async fn rejects_oversized_records() {
        let broker = MemoryBroker::new("small").max_message_bytes(4);
        broker.create_topic(&NewTopic::new("orders", 1, 1)).await.unwrap();
        let result = broker
            .produce(
                &TopicPartition::new("orders", 0),
                vec![ProduceRecord::new("orders").value("too large")],
            )
            .await;
        assert_eq!(result, Err(Error::KafkaError(KafkaCode::MessageSizeTooLarge)));
    }

    #[tokio::test]
    async fn reports_existing_topics() {
        let broker = broker_with_topic(3).await;
        let created = broker.create_topic(&NewTopic::new("orders", 1, 1)).await;
        assert_eq!(created, Ok(TopicCreation::AlreadyExists { partitions: 3 }));
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let broker = broker_with_topic(1).await;
        broker.fail_next(BrokerOperation::Metadata, KafkaCode::NotCoordinator, 1);
        assert_eq!(
            broker.partition_count("orders").await,
            Err(Error::KafkaError(KafkaCode::NotCoordinator))
        );
        assert_eq!(broker.partition_count("orders").await, Ok(Some(1)));

        broker.set_available(false);
        assert!(matches!(
            broker.partition_count("orders").await,
            Err(Error::BrokerUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn rebalance_waits_for_every_member_to_sync() {
        let broker = broker_with_topic(2).await;
        let topics = vec!["orders".to_string()];

        let mut first = broker.join_group("g", "c", &topics).await.unwrap();
        let GroupEvent::Rebalance { generation, assignment } = next_event(&mut first).await else {
            panic!("expected a rebalance");
        };
        assert_eq!(assignment.len(), 2);
        broker.sync_group("g", &first.member_id, generation).await.unwrap();
        assert_eq!(next_event(&mut first).await, GroupEvent::Stable { generation });

        let mut second = broker.join_group("g", "c", &topics).await.unwrap();
        let GroupEvent::Rebalance { generation, .. } = next_event(&mut first).await else {
            panic!("expected a rebalance");
        };
        let GroupEvent::Rebalance { .. } = next_event(&mut second).await else {
            panic!("expected a rebalance");
        };

        // until the old owner syncs it may still commit what it owned
        let offsets = BTreeMap::from([(TopicPartition::new("orders", 1), 6)]);
        broker.commit_offsets("g", &first.member_id, &offsets).await.unwrap();

        broker.sync_group("g", &second.member_id, generation).await.unwrap();
        assert!(second.events.try_recv().is_err());
        broker.sync_group("g", &first.member_id, generation).await.unwrap();
        assert_eq!(next_event(&mut second).await, GroupEvent::Stable { generation });

        let owned = broker.group_assignments("g");
        assert_eq!(owned[&first.member_id].len(), 1);
        assert_eq!(owned[&second.member_id].len(), 1);
    }

    #[tokio::test]
    async fn commits_require_ownership() {
        let broker = broker_with_topic(1).await;
        let mut member = broker
            .join_group("g", "c", &["orders".to_string()])
            .await
            .unwrap();
        let GroupEvent::Rebalance { generation, .. } = next_event(&mut member).await else {
            panic!("expected a rebalance");
        };
        let offsets = BTreeMap::from([(TopicPartition::new("orders", 0), 3)]);
        assert_eq!(
            broker.commit_offsets("g", &member.member_id, &offsets).await,
            Err(Error::KafkaError(KafkaCode::IllegalGeneration))
        );

        broker.sync_group("g", &member.member_id, generation).await.unwrap();
        broker.commit_offsets("g", &member.member_id, &offsets).await.unwrap();
        let committed = broker
            .committed_offsets("g", &[TopicPartition::new("orders", 0)])
            .await
            .unwrap();
        assert_eq!(committed, offsets);

        assert_eq!(
            broker.commit_offsets("g", "stranger", &offsets).await,
            Err(Error::KafkaError(KafkaCode::UnknownMemberId))
        );
    }
}
