//! Reading records for a consumer.
//!
//! [`getmany`] serves application pulls. The delivery loop is the push
//! side: a fetch task keeps a bounded channel filled and a dispatch task
//! feeds the channel to the consumer's callback.
//!
//! A fetched message only reaches the application after it is claimed,
//! which moves the partition's fetch position past it. Claiming fails when
//! the partition was revoked, paused or reset since the fetch was issued,
//! so stale records are dropped instead of delivered.
use std::{future::Future, sync::Arc, time::Duration};

use async_stream::try_stream;
use tokio::{
    sync::mpsc::{channel, Receiver, Sender},
    time::Instant,
};

use crate::{
    broker::{BrokerClient, FetchRequest},
    consumer::{Consumer, ConsumerCallback, ConsumerInner, GroupConsumer, MessageStream},
    error::{KafkaCode, Result},
    message::{Message, TopicPartition},
    state::ConsumerState,
    utils::{lock, with_retry},
};

/// A fetched message and the token of the offset entry it was read for.
type Fetched = (u64, Message);

pub(crate) fn getmany<B: BrokerClient>(
    inner: Arc<ConsumerInner<B>>,
    partitions: Vec<TopicPartition>,
    timeout: Duration,
) -> MessageStream {
    let deadline = Instant::now() + timeout;
    Box::pin(try_stream! {
        let batch = fetch_batch(&*inner, &partitions, deadline).await?;
        tracing::trace!("getmany fetched {} messages", batch.len());
        for (token, message) in batch {
            // re-checked per message, the caller may pause or rebalance in between
            if inner.claim(&message.topic_partition, token, message.offset) {
                yield (message.topic_partition.clone(), message);
            }
        }
    })
}

/// Fetch one batch from the fetchable subset of `requested`, waiting
/// until `deadline` for partitions to become fetchable and for records
/// to arrive.
pub(crate) async fn fetch_batch<B: BrokerClient>(
    inner: &ConsumerInner<B>,
    requested: &[TopicPartition],
    deadline: Instant,
) -> Result<Vec<Fetched>> {
    loop {
        let notified = inner.fetchable_changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let positions = inner.fetchable(requested);
        if positions.is_empty() {
            if inner.state.get().is_shutting_down()
                || tokio::time::timeout_at(deadline, notified).await.is_err()
            {
                return Ok(vec![]);
            }
            continue;
        }

        let request = FetchRequest {
            partitions: positions
                .iter()
                .map(|(tp, position, _)| (tp.clone(), *position))
                .collect(),
            max_wait: deadline.saturating_duration_since(Instant::now()),
            max_records: inner.config.max_poll_records,
        };
        tracing::trace!("Fetching {:?}", request.partitions);
        let fetch = with_retry(inner.retry_policy(), "fetch", || {
            inner.broker.fetch(request.clone())
        });
        let Ok(fetched) = tokio::time::timeout_at(deadline, fetch).await else {
            return Ok(vec![]);
        };

        let mut messages = vec![];
        let mut failed = false;
        for partition in fetched? {
            let tp = &partition.topic_partition;
            let Some((_, _, token)) = positions.iter().find(|(candidate, _, _)| candidate == tp)
            else {
                continue;
            };
            match partition.error_code {
                KafkaCode::None => {
                    lock(&inner.offsets).set_highwater(tp, partition.highwater);
                    messages.extend(partition.records.into_iter().map(|m| (*token, m)));
                }
                KafkaCode::OffsetOutOfRange => {
                    let reset = tokio::time::timeout_at(deadline, inner.reset_position(tp, *token));
                    match reset.await {
                        Ok(reset) => reset?,
                        // the position is untouched, the next fetch resets it
                        Err(_) => return Ok(messages),
                    }
                }
                code => {
                    tracing::warn!("Fetching {} failed with {:?}", tp, code);
                    failed = true;
                }
            }
        }

        if !messages.is_empty() || Instant::now() >= deadline {
            return Ok(messages);
        }
        if failed {
            tokio::time::sleep_until(
                (Instant::now() + inner.config.retry_backoff).min(deadline),
            )
            .await;
        }
    }
}

/// The two halves of push delivery: the fetch task and the dispatch task.
pub(crate) fn delivery_loop<B: BrokerClient>(
    consumer: GroupConsumer<B>,
    callback: ConsumerCallback,
) -> (
    impl Future<Output = ()> + Send + 'static,
    impl Future<Output = ()> + Send + 'static,
) {
    let (sender, receiver) = channel(consumer.inner.config.buffer_capacity);
    (
        fetch_task(consumer.clone(), sender),
        dispatch_task(consumer, callback, receiver),
    )
}

async fn fetch_task<B: BrokerClient>(consumer: GroupConsumer<B>, sender: Sender<Fetched>) {
    let inner: &ConsumerInner<B> = &consumer.inner;
    let mut state = inner.state.subscribe();

    loop {
        let deadline = Instant::now() + inner.config.fetch_max_wait;
        let batch = tokio::select! {
            biased;
            _ = state.wait_for(|state| state.is_shutting_down()) => break,
            batch = fetch_batch(inner, &[], deadline) => batch,
        };

        let batch = match batch {
            Ok(batch) => batch,
            Err(err) if err.is_fatal() => {
                consumer.on_task_error(err).await;
                break;
            }
            Err(err) => {
                tracing::warn!("Fetch failed: {}", err);
                tokio::time::sleep(inner.config.retry_backoff).await;
                continue;
            }
        };

        for (token, message) in batch {
            if !inner.claim(&message.topic_partition, token, message.offset) {
                continue;
            }
            // blocks while the callback is behind
            tokio::select! {
                biased;
                _ = state.wait_for(|state| state.is_shutting_down()) => return,
                sent = sender.send((token, message)) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
    tracing::debug!("Fetch task stopped");
}

async fn dispatch_task<B: BrokerClient>(
    consumer: GroupConsumer<B>,
    callback: ConsumerCallback,
    mut receiver: Receiver<Fetched>,
) {
    let inner: &ConsumerInner<B> = &consumer.inner;
    let mut state = inner.state.subscribe();

    loop {
        // control first: once shutting down, buffered messages are abandoned
        let (token, message) = tokio::select! {
            biased;
            _ = state.wait_for(|state| state.is_shutting_down()) => break,
            received = receiver.recv() => match received {
                Some(received) => received,
                None => break,
            },
        };

        let _gate = inner.delivery_gate.read().await;
        let tp = message.topic_partition.clone();
        let offset = message.offset;

        if lock(&inner.offsets).token(&tp) != Some(token) {
            tracing::trace!("Dropping {} at {}, partition was revoked or reset", tp, offset);
            continue;
        }
        let held =
            inner.state.get() != ConsumerState::Assigned || lock(&inner.paused).contains(&tp);
        if held {
            // fetched again once the partition is fetchable
            lock(&inner.offsets).rewind(&tp, token, offset);
            continue;
        }

        match callback.handle(message).await {
            Ok(()) => {
                if inner.config.autoack {
                    if let Err(err) = consumer.ack(&tp, offset) {
                        tracing::debug!("Could not ack {} at {}: {}", tp, offset, err);
                    }
                }
            }
            Err(err) => consumer.on_task_error(err).await,
        }
    }
    tracing::debug!("Dispatch task stopped");
}
