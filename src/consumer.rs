//! Client that consumes records as a member of a consumer group.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{
    future::{BoxFuture, Shared},
    stream::BoxStream,
    FutureExt,
};
use tokio::{
    sync::{Notify, RwLock},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::instrument;

use crate::{
    admin::{self, NewTopic},
    broker::{BrokerClient, OffsetSpec},
    config::{AutoOffsetReset, ConsumerConfig},
    consumer_group,
    error::{Error, Result},
    fetcher,
    message::{Message, TopicOrPartition, TopicPartition},
    offsets::OffsetTable,
    state::{ConsumerState, StateCell},
    transport::ExecutionContext,
    utils::{lock, with_retry, RetryPolicy},
};

/// Messages yielded by [`Consumer::getmany`].
pub type MessageStream = BoxStream<'static, Result<(TopicPartition, Message)>>;

/// Application code run for every delivered message.
///
/// Implemented for any `Fn(Message) -> impl Future<Output = Result<()>>`.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message) -> Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<()> {
        (self)(message).await
    }
}

pub type ConsumerCallback = Arc<dyn MessageHandler>;

/// Hooks run around every rebalance.
///
/// Both callbacks run while message delivery is blocked. An error from
/// either one is fatal and closes the consumer.
#[async_trait]
pub trait RebalanceListener: Send + Sync + 'static {
    /// Ownership of `revoked` is about to be given up. Acked offsets not
    /// committed before this returns are lost.
    async fn on_partitions_revoked(
        &self,
        _consumer: &dyn Consumer,
        _revoked: &BTreeSet<TopicPartition>,
    ) -> Result<()> {
        Ok(())
    }

    /// `assigned` is the complete new assignment.
    async fn on_partitions_assigned(
        &self,
        _consumer: &dyn Consumer,
        _assigned: &BTreeSet<TopicPartition>,
    ) -> Result<()> {
        Ok(())
    }
}

/// A consumer group member.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Provision a topic, see [`admin::create_topic`].
    async fn create_topic(&self, topic: &NewTopic) -> Result<()>;

    /// Declare the topics to consume. The first call joins the group,
    /// later calls replace the subscription and trigger a rebalance.
    async fn subscribe(&self, topics: &[&str]) -> Result<()>;

    /// Fetch what is available from `partitions`, or from every assigned
    /// partition when empty, waiting up to `timeout` for something to show
    /// up. Paused and unassigned partitions are never read.
    fn getmany(&self, partitions: &[TopicPartition], timeout: Duration) -> MessageStream;

    /// Mark `offset` as processed. Returns whether the acked offset
    /// advanced; acks below the current one are ignored.
    fn ack(&self, tp: &TopicPartition, offset: i64) -> Result<bool>;

    /// Commit acked offsets of the given topics or partitions, or of the
    /// whole assignment. Returns whether anything was committed.
    async fn commit(&self, topics: Option<&[TopicOrPartition]>) -> Result<bool>;

    fn assignment(&self) -> BTreeSet<TopicPartition>;

    /// Log end offset of an assigned partition as of the last fetch.
    fn highwater(&self, tp: &TopicPartition) -> Result<i64>;

    fn pause_partitions(&self, tps: &[TopicPartition]) -> Result<()>;

    fn resume_partitions(&self, tps: &[TopicPartition]);

    /// Restart the given partitions at the earliest retained offset,
    /// forgetting acked and committed progress.
    async fn reset_offset_earliest(&self, partitions: &[TopicPartition]) -> Result<()>;

    /// Report an error raised while processing messages.
    async fn on_task_error(&self, error: Error);

    /// Start the commit cycle and message delivery.
    async fn start(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn state(&self) -> ConsumerState;

    /// Next offset to fetch for an assigned partition.
    fn position(&self, tp: &TopicPartition) -> Option<i64>;

    /// Last acked offset the broker stored for an assigned partition.
    fn committed(&self, tp: &TopicPartition) -> Option<i64>;

    /// Wait until a rebalance completed and return the assignment.
    async fn wait_for_assignment(&self, timeout: Duration) -> Result<BTreeSet<TopicPartition>>;
}

/// [`Consumer`] backed by a [`BrokerClient`].
///
/// Cheap to clone, clones share one group membership.
pub struct GroupConsumer<B: BrokerClient> {
    pub(crate) inner: Arc<ConsumerInner<B>>,
}

impl<B: BrokerClient> Clone for GroupConsumer<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: BrokerClient> fmt::Debug for GroupConsumer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupConsumer")
            .field("group_id", &self.inner.config.group_id)
            .field("member_id", &self.member_id())
            .field("state", &self.inner.state.get())
            .finish()
    }
}

type CommitFuture = Shared<BoxFuture<'static, Result<bool>>>;

/// The commit currently talking to the broker.
pub(crate) struct InflightCommit {
    id: u64,
    scope: Option<Vec<TopicOrPartition>>,
    future: CommitFuture,
}

pub(crate) struct ConsumerInner<B: BrokerClient> {
    pub broker: Arc<B>,
    pub context: ExecutionContext,
    pub config: ConsumerConfig,
    pub callback: Option<ConsumerCallback>,
    pub listener: Option<Arc<dyn RebalanceListener>>,
    pub state: StateCell,
    /// Lock order: `assignment`, `paused`, `offsets`.
    pub assignment: Mutex<BTreeSet<TopicPartition>>,
    pub paused: Mutex<BTreeSet<TopicPartition>>,
    pub offsets: Mutex<OffsetTable>,
    pub member_id: Mutex<Option<String>>,
    pub subscription: tokio::sync::Mutex<Vec<String>>,
    /// Woken whenever the set of fetchable partitions may have grown.
    pub fetchable_changed: Notify,
    /// Held for reading while a message is handed to the callback, and for
    /// writing for the whole of a rebalance.
    pub delivery_gate: RwLock<()>,
    inflight_commit: Mutex<Option<InflightCommit>>,
    next_commit_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    close_started: AtomicBool,
}

impl<B: BrokerClient> GroupConsumer<B> {
    pub(crate) fn new(
        broker: Arc<B>,
        context: ExecutionContext,
        config: ConsumerConfig,
        callback: Option<ConsumerCallback>,
        listener: Option<Arc<dyn RebalanceListener>>,
    ) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                broker,
                context,
                config,
                callback,
                listener,
                state: StateCell::new(),
                assignment: Mutex::new(BTreeSet::new()),
                paused: Mutex::new(BTreeSet::new()),
                offsets: Mutex::new(OffsetTable::new()),
                member_id: Mutex::new(None),
                subscription: tokio::sync::Mutex::new(vec![]),
                fetchable_changed: Notify::new(),
                delivery_gate: RwLock::new(()),
                inflight_commit: Mutex::new(None),
                next_commit_id: AtomicU64::new(0),
                tasks: Mutex::new(vec![]),
                started: AtomicBool::new(false),
                close_started: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    /// Id the group coordinator gave this member, once subscribed.
    pub fn member_id(&self) -> Option<String> {
        lock(&self.inner.member_id).clone()
    }

    pub fn paused(&self) -> BTreeSet<TopicPartition> {
        lock(&self.inner.paused).clone()
    }

    /// Records between the fetch position and the log end.
    pub fn lag(&self, tp: &TopicPartition) -> Option<i64> {
        lock(&self.inner.offsets).lag(tp)
    }

    /// Stop fetching and close in the background after an unrecoverable
    /// error.
    pub(crate) fn fail(&self, error: &Error) {
        tracing::error!(
            "Consumer for group {} hit a fatal error: {}",
            self.inner.config.group_id,
            error
        );
        if self.inner.state.transition(ConsumerState::Closing).is_ok() {
            self.inner.fetchable_changed.notify_waiters();
            let consumer = self.clone();
            self.inner.context.spawn(async move {
                if let Err(err) = consumer.close().await {
                    tracing::error!("Error closing consumer {:?}", err);
                }
            });
        }
    }

    fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.inner.context.spawn(task);
        lock(&self.inner.tasks).push(handle);
    }

    fn commit_future(&self, id: u64, scope: Option<Vec<TopicOrPartition>>) -> CommitFuture {
        let inner = self.inner.clone();
        async move {
            let result = inner.commit_pending(scope.as_deref()).await;
            {
                let mut slot = lock(&inner.inflight_commit);
                if slot.as_ref().map_or(false, |inflight| inflight.id == id) {
                    *slot = None;
                }
            }
            result
        }
        .boxed()
        .shared()
    }
}

impl<B: BrokerClient> ConsumerInner<B> {
    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            backoff: self.config.retry_backoff,
            timeout: self.config.request_timeout,
        }
    }

    /// Fetch positions of the partitions a fetch may read right now.
    pub(crate) fn fetchable(
        &self,
        requested: &[TopicPartition],
    ) -> Vec<(TopicPartition, i64, u64)> {
        if self.state.get() != ConsumerState::Assigned {
            return vec![];
        }
        let paused = lock(&self.paused).clone();
        let offsets = lock(&self.offsets);
        if requested.is_empty() {
            let partitions = offsets.partitions();
            return offsets.fetch_positions(partitions.iter().filter(|tp| !paused.contains(*tp)));
        }
        for tp in requested.iter().filter(|tp| !offsets.contains(tp)) {
            tracing::debug!("Skipping {}, it is not assigned", tp);
        }
        offsets.fetch_positions(requested.iter().filter(|tp| !paused.contains(*tp)))
    }

    /// Whether a fetched message may be handed out, moving the fetch
    /// position past it if so.
    pub(crate) fn claim(&self, tp: &TopicPartition, token: u64, offset: i64) -> bool {
        if self.state.get() != ConsumerState::Assigned {
            return false;
        }
        if lock(&self.paused).contains(tp) {
            return false;
        }
        lock(&self.offsets).advance(tp, token, offset)
    }

    /// Move to the earliest or latest offset after `tp` fell out of range.
    pub(crate) async fn reset_position(&self, tp: &TopicPartition, token: u64) -> Result<()> {
        let spec = match self.config.auto_offset_reset {
            AutoOffsetReset::Earliest => OffsetSpec::Earliest,
            AutoOffsetReset::Latest => OffsetSpec::Latest,
        };
        let position = with_retry(self.retry_policy(), "list_offset", || {
            self.broker.list_offset(tp, spec)
        })
        .await?;
        tracing::warn!("Offset of {} out of range, resetting to {}", tp, position);
        lock(&self.offsets).seek(tp, token, position);
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(group_id = %self.config.group_id))]
    async fn commit_pending(&self, scope: Option<&[TopicOrPartition]>) -> Result<bool> {
        if self.state.get() == ConsumerState::Closed {
            return Err(Error::ConsumerClosed);
        }
        let Some(member_id) = lock(&self.member_id).clone() else {
            return Ok(false);
        };
        let pending = lock(&self.offsets).pending(scope);
        if pending.is_empty() {
            return Ok(false);
        }

        let offsets: BTreeMap<TopicPartition, i64> = pending
            .iter()
            .map(|commit| (commit.topic_partition.clone(), commit.next_offset()))
            .collect();
        with_retry(self.retry_policy(), "commit_offsets", || {
            self.broker
                .commit_offsets(&self.config.group_id, &member_id, &offsets)
        })
        .await?;

        lock(&self.offsets).mark_committed(&pending);
        tracing::debug!("Committed offsets {:?}", offsets);
        Ok(true)
    }
}

#[async_trait]
impl<B: BrokerClient> Consumer for GroupConsumer<B> {
    async fn create_topic(&self, topic: &NewTopic) -> Result<()> {
        admin::create_topic(self.inner.broker.as_ref(), topic).await
    }

    #[instrument(skip(self), fields(group_id = %self.inner.config.group_id))]
    async fn subscribe(&self, topics: &[&str]) -> Result<()> {
        let inner = &self.inner;
        if topics.is_empty() || topics.iter().any(|topic| topic.is_empty()) {
            return Err(Error::Configuration(
                "subscribe needs at least one topic name".into(),
            ));
        }
        if inner.state.get().is_shutting_down() {
            return Err(Error::ConsumerClosed);
        }

        let mut topics: Vec<String> = topics.iter().map(|topic| topic.to_string()).collect();
        topics.sort();
        topics.dedup();

        let mut subscription = inner.subscription.lock().await;
        let member_id = lock(&inner.member_id).clone();
        match member_id {
            Some(member_id) => {
                with_retry(inner.retry_policy(), "update_subscription", || {
                    inner
                        .broker
                        .update_subscription(&inner.config.group_id, &member_id, &topics)
                })
                .await?;
            }
            None => {
                inner.state.transition(ConsumerState::Subscribing)?;
                let membership = with_retry(inner.retry_policy(), "join_group", || {
                    inner
                        .broker
                        .join_group(&inner.config.group_id, &inner.config.client_id, &topics)
                })
                .await?;
                tracing::info!(
                    "Joined group {} as {}",
                    inner.config.group_id,
                    membership.member_id
                );
                *lock(&inner.member_id) = Some(membership.member_id);
                self.spawn_task(consumer_group::run(self.clone(), membership.events));
            }
        }
        tracing::info!("Subscribed to {:?}", topics);
        *subscription = topics;
        Ok(())
    }

    fn getmany(&self, partitions: &[TopicPartition], timeout: Duration) -> MessageStream {
        fetcher::getmany(self.inner.clone(), partitions.to_vec(), timeout)
    }

    fn ack(&self, tp: &TopicPartition, offset: i64) -> Result<bool> {
        let advanced = lock(&self.inner.offsets).ack(tp, offset)?;
        if advanced {
            tracing::trace!("Acked {} at {}", tp, offset);
        }
        Ok(advanced)
    }

    async fn commit(&self, topics: Option<&[TopicOrPartition]>) -> Result<bool> {
        let scope = topics.map(|topics| {
            let mut scope = topics.to_vec();
            scope.sort();
            scope.dedup();
            scope
        });

        loop {
            let (future, joined) = {
                let mut slot = lock(&self.inner.inflight_commit);
                match slot.as_ref() {
                    Some(inflight) => (inflight.future.clone(), inflight.scope == scope),
                    None => {
                        let id = self.inner.next_commit_id.fetch_add(1, Ordering::Relaxed);
                        let future = self.commit_future(id, scope.clone());
                        *slot = Some(InflightCommit {
                            id,
                            scope: scope.clone(),
                            future: future.clone(),
                        });
                        (future, true)
                    }
                }
            };
            if joined {
                return future.await;
            }
            // a commit of another scope is running, ours goes after it
            let _ = future.await;
        }
    }

    fn assignment(&self) -> BTreeSet<TopicPartition> {
        lock(&self.inner.assignment).clone()
    }

    fn highwater(&self, tp: &TopicPartition) -> Result<i64> {
        lock(&self.inner.offsets)
            .highwater(tp)
            .ok_or_else(|| Error::NotAssigned(tp.clone()))
    }

    fn pause_partitions(&self, tps: &[TopicPartition]) -> Result<()> {
        let assignment = lock(&self.inner.assignment);
        let mut paused = lock(&self.inner.paused);
        {
            // a running rebalance drops revoked offsets before it publishes
            let offsets = lock(&self.inner.offsets);
            if let Some(tp) = tps
                .iter()
                .find(|tp| !assignment.contains(*tp) || !offsets.contains(tp))
            {
                return Err(Error::NotAssigned(tp.clone()));
            }
        }
        for tp in tps {
            if paused.insert(tp.clone()) {
                tracing::debug!("Paused {}", tp);
            }
        }
        Ok(())
    }

    fn resume_partitions(&self, tps: &[TopicPartition]) {
        let mut resumed = false;
        {
            let mut paused = lock(&self.inner.paused);
            for tp in tps {
                if paused.remove(tp) {
                    tracing::debug!("Resumed {}", tp);
                    resumed = true;
                }
            }
        }
        if resumed {
            self.inner.fetchable_changed.notify_waiters();
        }
    }

    #[instrument(skip(self), fields(group_id = %self.inner.config.group_id))]
    async fn reset_offset_earliest(&self, partitions: &[TopicPartition]) -> Result<()> {
        let inner = &self.inner;
        {
            let offsets = lock(&inner.offsets);
            if let Some(tp) = partitions.iter().find(|tp| !offsets.contains(tp)) {
                return Err(Error::NotAssigned(tp.clone()));
            }
        }
        for tp in partitions {
            let earliest = with_retry(inner.retry_policy(), "list_offset", || {
                inner.broker.list_offset(tp, OffsetSpec::Earliest)
            })
            .await?;
            lock(&inner.offsets).reset(tp, earliest)?;
            tracing::info!("Reset {} to earliest offset {}", tp, earliest);
        }
        inner.fetchable_changed.notify_waiters();
        Ok(())
    }

    async fn on_task_error(&self, error: Error) {
        if error.is_fatal() {
            self.fail(&error);
        } else {
            tracing::warn!("Message processing failed, continuing: {}", error);
        }
    }

    async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.state.get().is_shutting_down() {
            return Err(Error::ConsumerClosed);
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(interval) = inner.config.commit_interval {
            self.spawn_task(commit_cycle(self.clone(), interval));
        }
        if let Some(callback) = inner.callback.clone() {
            let (fetch, dispatch) = fetcher::delivery_loop(self.clone(), callback);
            self.spawn_task(fetch);
            self.spawn_task(dispatch);
        }
        tracing::info!("Started consumer for group {}", inner.config.group_id);
        Ok(())
    }

    #[instrument(skip(self), fields(group_id = %self.inner.config.group_id))]
    async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.close_started.swap(true, Ordering::SeqCst) {
            inner
                .state
                .wait_until(inner.config.shutdown_timeout * 2, "close", |state| {
                    *state == ConsumerState::Closed
                })
                .await?;
            return Ok(());
        }

        tracing::info!("Closing consumer");
        // fails only when a fatal error already moved us to closing
        let _ = inner.state.transition(ConsumerState::Closing);
        inner.fetchable_changed.notify_waiters();

        let mut tasks: Vec<JoinHandle<()>> = lock(&inner.tasks).drain(..).collect();
        let drained = tokio::time::timeout(
            inner.config.shutdown_timeout,
            futures::future::join_all(tasks.iter_mut()),
        )
        .await;
        if drained.is_err() {
            tracing::warn!(
                "Consumer tasks did not stop within {:?}, aborting them",
                inner.config.shutdown_timeout
            );
            for task in &tasks {
                task.abort();
            }
        }

        if inner.config.commit_on_close {
            if let Err(err) = self.commit(None).await {
                tracing::warn!("Final commit failed: {}", err);
            }
        }

        let member_id = lock(&inner.member_id).take();
        if let Some(member_id) = member_id {
            if let Err(err) = inner.broker.leave_group(&inner.config.group_id, &member_id).await {
                tracing::warn!("Leaving group failed: {}", err);
            }
        }

        lock(&inner.assignment).clear();
        lock(&inner.paused).clear();
        lock(&inner.offsets).clear();
        let _ = inner.state.transition(ConsumerState::Closed);
        tracing::info!("Consumer closed");
        Ok(())
    }

    fn state(&self) -> ConsumerState {
        self.inner.state.get()
    }

    fn position(&self, tp: &TopicPartition) -> Option<i64> {
        lock(&self.inner.offsets).position(tp)
    }

    fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        lock(&self.inner.offsets).committed(tp)
    }

    async fn wait_for_assignment(&self, timeout: Duration) -> Result<BTreeSet<TopicPartition>> {
        let state = self
            .inner
            .state
            .wait_until(timeout, "wait_for_assignment", |state| {
                *state == ConsumerState::Assigned || state.is_shutting_down()
            })
            .await?;
        if state.is_shutting_down() {
            return Err(Error::ConsumerClosed);
        }
        Ok(self.assignment())
    }
}

/// Commit acked offsets every `interval` until the consumer shuts down.
async fn commit_cycle<B: BrokerClient>(consumer: GroupConsumer<B>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    let mut state = consumer.inner.state.subscribe();

    loop {
        tokio::select! {
            _ = state.wait_for(|state| state.is_shutting_down()) => break,
            _ = ticker.tick() => {}
        }
        match consumer.commit(None).await {
            Ok(true) => tracing::trace!("Periodic commit stored new offsets"),
            Ok(false) => {}
            Err(err) if err.is_fatal() => {
                consumer.on_task_error(err).await;
                break;
            }
            Err(err) => tracing::warn!("Periodic commit failed: {}", err),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::{Consumer, GroupConsumer, MessageHandler};
    use crate::{
        broker::memory::MemoryBroker,
        config::ConsumerConfig,
        error::Error,
        message::{Message, TopicPartition},
        state::ConsumerState,
        transport::ExecutionContext,
    };

    fn consumer() -> GroupConsumer<MemoryBroker> {
        GroupConsumer::new(
            Arc::new(MemoryBroker::new("unit")),
            ExecutionContext::current().unwrap(),
            ConsumerConfig::new("billing"),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn closures_are_message_handlers() {
        let seen = Arc::new(AtomicUsize::new(0));
        let handler = {
            let seen = seen.clone();
            move |message: Message| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(message.offset as usize, Ordering::SeqCst);
                    Ok::<(), Error>(())
                }
            }
        };
        let message = Message {
            topic_partition: TopicPartition::new("orders", 0),
            offset: 3,
            timestamp: 0,
            key: None,
            value: None,
            headers: vec![],
        };
        handler.handle(message).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unassigned_partitions_are_rejected() {
        let consumer = consumer();
        let tp = TopicPartition::new("orders", 0);
        assert_eq!(consumer.ack(&tp, 1), Err(Error::NotAssigned(tp.clone())));
        assert_eq!(consumer.highwater(&tp), Err(Error::NotAssigned(tp.clone())));
        assert_eq!(
            consumer.pause_partitions(&[tp.clone()]),
            Err(Error::NotAssigned(tp.clone()))
        );
        consumer.resume_partitions(&[tp.clone()]);
        assert!(consumer.reset_offset_earliest(&[tp]).await.is_err());
        assert_eq!(consumer.commit(None).await, Ok(false));
    }

    #[tokio::test]
    async fn close_without_subscribing() {
        let consumer = consumer();
        assert_eq!(consumer.state(), ConsumerState::Created);
        consumer.start().await.unwrap();
        consumer.close().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Closed);
        consumer.close().await.unwrap();
        assert_eq!(consumer.subscribe(&["orders"]).await, Err(Error::ConsumerClosed));
        assert!(matches!(
            consumer.wait_for_assignment(Duration::from_millis(10)).await,
            Err(Error::ConsumerClosed)
        ));
    }

    #[tokio::test]
    async fn subscribe_needs_topics() {
        let consumer = consumer();
        assert!(matches!(
            consumer.subscribe(&[]).await,
            Err(Error::Configuration(_))
        ));
    }
}
