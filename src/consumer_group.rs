//! Consumer which cooperates with others to consume data.
//!
//! Every group member runs one task that listens on its control channel.
//! A rebalance is handled in strict order, with message delivery held off
//! for the whole of it:
//!
//! 1. Stop fetching and wait for an in-flight callback to return.
//! 2. Run the revoke callback for the partitions about to be given up.
//! 3. Forget those partitions, then tell the coordinator we are done.
//! 4. Once every member is done, take over the new partitions, publish the
//!    new assignment and run the assign callback.
//! 5. Resume fetching.
//!
//! A newer rebalance arriving before step 4 replaces the pending one.
use std::collections::BTreeSet;

use tokio::sync::{mpsc::UnboundedReceiver, watch};

use crate::{
    broker::{BrokerClient, GroupEvent, OffsetSpec},
    config::AutoOffsetReset,
    consumer::{Consumer, GroupConsumer},
    error::{Error, KafkaCode, Result},
    message::{TopicOrPartition, TopicPartition},
    state::ConsumerState,
    utils::{lock, with_retry},
};

pub(crate) async fn run<B: BrokerClient>(
    consumer: GroupConsumer<B>,
    mut events: UnboundedReceiver<GroupEvent>,
) {
    let mut state = consumer.inner.state.subscribe();
    let member_id = consumer.member_id().unwrap_or_default();

    loop {
        let event = tokio::select! {
            biased;
            _ = state.wait_for(|state| state.is_shutting_down()) => break,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            consumer.fail(&coordinator_gone());
            break;
        };

        match event {
            GroupEvent::Rebalance {
                generation,
                assignment,
            } => {
                let outcome =
                    rebalance(&consumer, generation, assignment, &mut events, &mut state).await;
                if let Err(err) = outcome {
                    tracing::error!("Member {} | rebalance failed: {}", member_id, err);
                    consumer.fail(&err);
                    break;
                }
            }
            GroupEvent::Stable { generation } => {
                tracing::trace!("Member {} | ignoring stale generation {}", member_id, generation);
            }
        }
    }
    tracing::debug!("Member {} | group task stopped", member_id);
}

async fn rebalance<B: BrokerClient>(
    consumer: &GroupConsumer<B>,
    mut generation: i32,
    mut assignment: BTreeSet<TopicPartition>,
    events: &mut UnboundedReceiver<GroupEvent>,
    state: &mut watch::Receiver<ConsumerState>,
) -> Result<()> {
    let inner = &consumer.inner;
    if inner.state.get() != ConsumerState::Revoking {
        inner.state.transition(ConsumerState::Revoking)?;
    }
    let _gate = inner.delivery_gate.write().await;

    loop {
        tracing::info!(
            "Group {} | rebalancing to generation {}",
            inner.config.group_id,
            generation
        );
        revoke(consumer, &assignment).await?;
        sync(consumer, generation).await?;

        let superseded = loop {
            let event = tokio::select! {
                biased;
                _ = state.wait_for(|state| state.is_shutting_down()) => return Ok(()),
                event = events.recv() => event.ok_or_else(coordinator_gone)?,
            };
            match event {
                GroupEvent::Stable { generation: stable } if stable == generation => break None,
                GroupEvent::Stable { .. } => continue,
                GroupEvent::Rebalance {
                    generation,
                    assignment,
                } => break Some((generation, assignment)),
            }
        };
        match superseded {
            Some(next) => (generation, assignment) = next,
            None => break,
        }
    }

    take_over(consumer, &assignment).await?;
    {
        let mut held = lock(&inner.assignment);
        *held = assignment.clone();
        lock(&inner.paused).retain(|tp| held.contains(tp));
    }
    if let Some(listener) = &inner.listener {
        listener
            .on_partitions_assigned(consumer, &assignment)
            .await
            .map_err(|err| Error::RebalanceCallback(err.to_string()))?;
    }
    inner.state.transition(ConsumerState::Assigned)?;
    inner.fetchable_changed.notify_waiters();
    tracing::info!(
        "Group {} | generation {} assigned {:?}",
        inner.config.group_id,
        generation,
        assignment
    );
    Ok(())
}

/// Give up every held partition that is not in `assignment`.
async fn revoke<B: BrokerClient>(
    consumer: &GroupConsumer<B>,
    assignment: &BTreeSet<TopicPartition>,
) -> Result<()> {
    let inner = &consumer.inner;
    let held = lock(&inner.offsets).partitions();
    let revoked: BTreeSet<TopicPartition> = held.difference(assignment).cloned().collect();

    if let Some(listener) = &inner.listener {
        listener
            .on_partitions_revoked(consumer, &revoked)
            .await
            .map_err(|err| Error::RebalanceCallback(err.to_string()))?;
    }
    if revoked.is_empty() {
        return Ok(());
    }

    // with periodic commits on, acked work is not handed over uncommitted
    if inner.config.commit_interval.is_some() {
        let scope: Vec<TopicOrPartition> = revoked.iter().cloned().map(Into::into).collect();
        if let Err(err) = consumer.commit(Some(scope.as_slice())).await {
            tracing::warn!("Commit of revoked partitions failed: {}", err);
        }
    }

    {
        let mut offsets = lock(&inner.offsets);
        for tp in &revoked {
            offsets.remove(tp);
        }
    }
    lock(&inner.paused).retain(|tp| !revoked.contains(tp));
    tracing::info!("Group {} | revoked {:?}", inner.config.group_id, revoked);
    Ok(())
}

async fn sync<B: BrokerClient>(consumer: &GroupConsumer<B>, generation: i32) -> Result<()> {
    let inner = &consumer.inner;
    let member_id = consumer.member_id().ok_or(Error::ConsumerClosed)?;
    let synced = with_retry(inner.retry_policy(), "sync_group", || {
        inner
            .broker
            .sync_group(&inner.config.group_id, &member_id, generation)
    })
    .await;
    match synced {
        Ok(()) => Ok(()),
        // a newer rebalance is already on its way
        Err(Error::KafkaError(KafkaCode::IllegalGeneration)) => {
            tracing::debug!("Generation {} was superseded before sync", generation);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Start tracking the partitions of `assignment` not held yet, resuming
/// from the group's committed offsets.
async fn take_over<B: BrokerClient>(
    consumer: &GroupConsumer<B>,
    assignment: &BTreeSet<TopicPartition>,
) -> Result<()> {
    let inner = &consumer.inner;
    let added: Vec<TopicPartition> = {
        let offsets = lock(&inner.offsets);
        assignment
            .iter()
            .filter(|tp| !offsets.contains(tp))
            .cloned()
            .collect()
    };
    if added.is_empty() {
        return Ok(());
    }

    let policy = inner.retry_policy();
    let committed = with_retry(policy, "committed_offsets", || {
        inner.broker.committed_offsets(&inner.config.group_id, &added)
    })
    .await?;

    for tp in &added {
        let highwater = with_retry(policy, "list_offset", || {
            inner.broker.list_offset(tp, OffsetSpec::Latest)
        })
        .await?;
        let committed = committed.get(tp).copied();
        let position = match (committed, inner.config.auto_offset_reset) {
            (Some(next), _) => next,
            (None, AutoOffsetReset::Latest) => highwater,
            (None, AutoOffsetReset::Earliest) => {
                with_retry(policy, "list_offset", || {
                    inner.broker.list_offset(tp, OffsetSpec::Earliest)
                })
                .await?
            }
        };
        tracing::debug!("Starting {} at offset {}", tp, position);
        lock(&inner.offsets).assign(tp.clone(), position, committed, highwater);
    }
    Ok(())
}

fn coordinator_gone() -> Error {
    Error::BrokerUnavailable("group coordinator ended the membership".into())
}
