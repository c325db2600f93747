mod testsupport;

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use sluice::prelude::{
    Consumer, ConsumerState, Error, RebalanceListener, Result as SluiceResult, TopicOrPartition,
    TopicPartition,
};
use testsupport::{eventually, getmany, offsets, WAIT};
use tokio::sync::Semaphore;

fn partitions(topic: &str, count: i32) -> BTreeSet<TopicPartition> {
    (0..count).map(|p| TopicPartition::new(topic, p)).collect()
}

#[tokio::test]
async fn members_split_the_partitions() -> Result<(), Box<Error>> {
    let transport = testsupport::transport()?;
    testsupport::ensure_topic(&transport, "orders", 4).await?;

    let first = testsupport::manual_consumer(&transport, "billing")?;
    first.subscribe(&["orders"]).await?;
    assert_eq!(first.wait_for_assignment(WAIT).await?, partitions("orders", 4));

    let second = testsupport::manual_consumer(&transport, "billing")?;
    second.subscribe(&["orders"]).await?;
    second.wait_for_assignment(WAIT).await?;
    assert!(
        eventually(|| first.assignment().len() == 2 && second.assignment().len() == 2).await
    );

    let (mine, theirs) = (first.assignment(), second.assignment());
    assert!(mine.is_disjoint(&theirs));
    assert_eq!(
        mine.union(&theirs).cloned().collect::<BTreeSet<_>>(),
        partitions("orders", 4)
    );
    // what the consumers hold is what the coordinator handed out
    let members = transport.broker().group_assignments("billing");
    assert_eq!(members.get(&first.member_id().unwrap()), Some(&mine));
    assert_eq!(members.get(&second.member_id().unwrap()), Some(&theirs));
    // only owned partitions are tracked
    for tp in &theirs {
        assert_eq!(first.position(tp), None);
    }

    // the partitions of a leaving member go back to the others
    second.close().await?;
    assert!(eventually(|| first.assignment() == partitions("orders", 4)).await);
    assert_eq!(first.state(), ConsumerState::Assigned);

    first.close().await?;
    Ok(())
}

#[tokio::test]
async fn revoked_partitions_resume_after_the_committed_offset() -> Result<(), Box<Error>> {
    let transport = testsupport::transport()?;
    testsupport::ensure_topic(&transport, "orders", 1).await?;
    testsupport::ensure_topic(&transport, "audit", 1).await?;
    let tp = TopicPartition::new("orders", 0);
    let values: Vec<String> = (0..10).map(|i| format!("order-{}", i)).collect();
    let values: Vec<&str> = values.iter().map(String::as_str).collect();
    testsupport::produce_values(&transport, &tp, &values).await?;

    // periodic commits on, but the first tick is an hour away
    let first = transport
        .consumer_builder("billing")
        .commit_interval(Some(Duration::from_secs(3600)))
        .fetch_max_wait(Duration::from_millis(50))
        .build()?;
    first.subscribe(&["orders"]).await?;
    first.wait_for_assignment(WAIT).await?;
    let messages = getmany(&first, &[], WAIT).await?;
    assert_eq!(offsets(&messages).len(), 10);
    first.ack(&tp, 5)?;

    // moving to another topic revokes orders-0
    first.subscribe(&["audit"]).await?;
    assert!(eventually(|| first.assignment() == partitions("audit", 1)).await);
    assert_eq!(first.position(&tp), None);
    assert!(matches!(first.ack(&tp, 6), Err(Error::NotAssigned(_))));

    let second = testsupport::manual_consumer(&transport, "billing")?;
    second.subscribe(&["orders"]).await?;
    assert!(eventually(|| second.assignment() == partitions("orders", 1)).await);
    assert_eq!(second.committed(&tp), Some(5));
    assert_eq!(second.position(&tp), Some(6));

    let messages = getmany(&second, &[], WAIT).await?;
    assert_eq!(offsets(&messages), vec![6, 7, 8, 9]);

    first.close().await?;
    second.close().await?;
    Ok(())
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<(&'static str, BTreeSet<TopicPartition>)>>>,
    // revokes wait for a permit, letting a test hold a rebalance open
    gate: Option<Arc<Semaphore>>,
}

impl Recorder {
    fn gated(gate: Arc<Semaphore>) -> Self {
        Recorder {
            gate: Some(gate),
            ..Recorder::default()
        }
    }

    fn events(&self) -> Vec<(&'static str, BTreeSet<TopicPartition>)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl RebalanceListener for Recorder {
    async fn on_partitions_revoked(
        &self,
        _consumer: &dyn Consumer,
        revoked: &BTreeSet<TopicPartition>,
    ) -> SluiceResult<()> {
        if let Some(gate) = &self.gate {
            let _ = gate.acquire().await;
        }
        self.events.lock().unwrap().push(("revoked", revoked.clone()));
        Ok(())
    }

    async fn on_partitions_assigned(
        &self,
        consumer: &dyn Consumer,
        assigned: &BTreeSet<TopicPartition>,
    ) -> SluiceResult<()> {
        assert_eq!(&consumer.assignment(), assigned);
        self.events.lock().unwrap().push(("assigned", assigned.clone()));
        Ok(())
    }
}

#[tokio::test]
async fn listeners_see_every_revoke_and_assign() -> Result<(), Box<Error>> {
    let transport = testsupport::transport()?;
    testsupport::ensure_topic(&transport, "orders", 2).await?;
    let recorder = Recorder::default();

    let first = transport
        .consumer_builder("billing")
        .commit_interval(None)
        .listener(recorder.clone())
        .build()?;
    first.subscribe(&["orders"]).await?;
    first.wait_for_assignment(WAIT).await?;
    assert_eq!(
        recorder.events(),
        vec![
            ("revoked", BTreeSet::new()),
            ("assigned", partitions("orders", 2)),
        ]
    );

    let second = testsupport::manual_consumer(&transport, "billing")?;
    second.subscribe(&["orders"]).await?;
    assert!(eventually(|| recorder.events().len() == 4).await);
    let events = recorder.events();
    assert_eq!(events[2], ("revoked", second.assignment()));
    assert_eq!(events[3], ("assigned", first.assignment()));
    assert_eq!(second.assignment().len(), 1);

    first.close().await?;
    second.close().await?;
    Ok(())
}

struct FailingListener;

#[async_trait]
impl RebalanceListener for FailingListener {
    async fn on_partitions_assigned(
        &self,
        _consumer: &dyn Consumer,
        _assigned: &BTreeSet<TopicPartition>,
    ) -> SluiceResult<()> {
        Err(Error::Processing("cannot load state".into()))
    }
}

#[tokio::test]
async fn a_failing_listener_closes_the_consumer() -> Result<(), Box<Error>> {
    let transport = testsupport::transport()?;
    testsupport::ensure_topic(&transport, "orders", 1).await?;

    let consumer = transport
        .consumer_builder("billing")
        .commit_interval(None)
        .shutdown_timeout(Duration::from_secs(1))
        .listener(FailingListener)
        .build()?;
    consumer.subscribe(&["orders"]).await?;

    assert_eq!(
        consumer.wait_for_assignment(WAIT).await,
        Err(Error::ConsumerClosed)
    );
    assert!(eventually(|| consumer.state() == ConsumerState::Closed).await);
    assert!(consumer.assignment().is_empty());
    assert!(transport.broker().group_assignments("billing").is_empty());
    Ok(())
}

#[tokio::test]
async fn partitions_given_up_mid_rebalance_cannot_be_paused() -> Result<(), Box<Error>> {
    let transport = testsupport::transport()?;
    testsupport::ensure_topic(&transport, "orders", 2).await?;
    let all = partitions("orders", 2);

    let first = testsupport::manual_consumer(&transport, "billing")?;
    first.subscribe(&["orders"]).await?;
    first.wait_for_assignment(WAIT).await?;

    // the second member holds the generation open in its revoke listener
    let gate = Arc::new(Semaphore::new(0));
    let second = transport
        .consumer_builder("billing")
        .commit_interval(None)
        .fetch_max_wait(Duration::from_millis(50))
        .shutdown_timeout(Duration::from_secs(1))
        .listener(Recorder::gated(gate.clone()))
        .build()?;
    second.subscribe(&["orders"]).await?;

    assert!(eventually(|| all.iter().any(|tp| first.position(tp).is_none())).await);
    let lost = all
        .iter()
        .find(|tp| first.position(tp).is_none())
        .cloned()
        .unwrap();
    let kept = all.iter().find(|tp| **tp != lost).cloned().unwrap();
    // the published assignment is still the previous generation's
    assert_eq!(first.assignment(), all);
    assert_eq!(first.state(), ConsumerState::Revoking);
    assert_eq!(
        first.pause_partitions(&[lost.clone()]),
        Err(Error::NotAssigned(lost.clone()))
    );
    assert_eq!(
        first.pause_partitions(&[kept.clone(), lost.clone()]),
        Err(Error::NotAssigned(lost.clone()))
    );
    first.pause_partitions(&[kept.clone()])?;

    gate.add_permits(1);
    assert!(eventually(|| first.assignment().len() == 1).await);
    assert!(!first.assignment().contains(&lost));
    assert_eq!(first.paused(), BTreeSet::from([kept.clone()]));

    // once handed back, the partition is fetched again
    second.close().await?;
    assert!(eventually(|| first.assignment() == all).await);
    assert_eq!(first.paused(), BTreeSet::from([kept.clone()]));
    testsupport::produce_values(&transport, &lost, &["late"]).await?;
    let messages = getmany(&first, &[lost.clone()], WAIT).await?;
    assert_eq!(testsupport::values(&messages), vec!["late".to_string()]);

    first.close().await?;
    Ok(())
}

struct CommitOnRevoke;

#[async_trait]
impl RebalanceListener for CommitOnRevoke {
    async fn on_partitions_revoked(
        &self,
        consumer: &dyn Consumer,
        revoked: &BTreeSet<TopicPartition>,
    ) -> SluiceResult<()> {
        let scope: Vec<TopicOrPartition> = revoked.iter().cloned().map(Into::into).collect();
        consumer.commit(Some(scope.as_slice())).await?;
        Ok(())
    }
}

#[tokio::test]
async fn revoke_listener_commits_before_handing_over() -> Result<(), Box<Error>> {
    let transport = testsupport::transport()?;
    testsupport::ensure_topic(&transport, "orders", 1).await?;
    testsupport::ensure_topic(&transport, "audit", 1).await?;
    let tp = TopicPartition::new("orders", 0);
    let values: Vec<String> = (0..10).map(|i| format!("order-{}", i)).collect();
    let values: Vec<&str> = values.iter().map(String::as_str).collect();
    testsupport::produce_values(&transport, &tp, &values).await?;

    // no periodic commits, so only the listener commits
    let first = transport
        .consumer_builder("billing")
        .commit_interval(None)
        .fetch_max_wait(Duration::from_millis(50))
        .listener(CommitOnRevoke)
        .build()?;
    first.subscribe(&["orders"]).await?;
    first.wait_for_assignment(WAIT).await?;
    let messages = getmany(&first, &[], WAIT).await?;
    assert_eq!(offsets(&messages).len(), 10);
    first.ack(&tp, 5)?;

    first.subscribe(&["audit"]).await?;
    assert!(eventually(|| first.assignment() == partitions("audit", 1)).await);

    let second = testsupport::manual_consumer(&transport, "billing")?;
    second.subscribe(&["orders"]).await?;
    assert!(eventually(|| second.assignment() == partitions("orders", 1)).await);
    assert_eq!(second.committed(&tp), Some(5));
    assert_eq!(second.position(&tp), Some(6));

    let messages = getmany(&second, &[], WAIT).await?;
    assert_eq!(offsets(&messages), vec![6, 7, 8, 9]);

    first.close().await?;
    second.close().await?;
    Ok(())
}

#[tokio::test]
async fn rebalances_queue_behind_the_running_one() -> Result<(), Box<Error>> {
    let transport = testsupport::transport()?;
    testsupport::ensure_topic(&transport, "orders", 4).await?;

    let first = testsupport::manual_consumer(&transport, "billing")?;
    first.subscribe(&["orders"]).await?;
    first.wait_for_assignment(WAIT).await?;

    let gate = Arc::new(Semaphore::new(0));
    let recorder = Recorder::gated(gate.clone());
    let second = transport
        .consumer_builder("billing")
        .commit_interval(None)
        .fetch_max_wait(Duration::from_millis(50))
        .shutdown_timeout(Duration::from_secs(1))
        .listener(recorder.clone())
        .build()?;
    second.subscribe(&["orders"]).await?;

    // a third member joins while the second is still revoking
    let third = testsupport::manual_consumer(&transport, "billing")?;
    third.subscribe(&["orders"]).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(recorder.events().is_empty());
    assert_eq!(third.state(), ConsumerState::Subscribing);
    assert!(third.assignment().is_empty());

    gate.add_permits(1);
    assert!(eventually(|| recorder.events().len() == 4).await);
    let events = recorder.events();
    let kinds: Vec<&str> = events.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds, vec!["revoked", "assigned", "revoked", "assigned"]);
    // the first generation completes before the queued one starts
    assert_eq!(events[0].1, BTreeSet::new());
    assert_eq!(events[1].1.len(), 2);
    assert_eq!(
        events[2].1,
        events[1]
            .1
            .difference(&events[3].1)
            .cloned()
            .collect::<BTreeSet<_>>()
    );

    let members = [&first, &second, &third];
    assert!(
        eventually(|| members
            .iter()
            .all(|member| member.state() == ConsumerState::Assigned
                && !member.assignment().is_empty()))
        .await
    );
    let mut seen = BTreeSet::new();
    let assignments = transport.broker().group_assignments("billing");
    for member in members {
        let held = member.assignment();
        assert!(held.is_disjoint(&seen));
        assert_eq!(assignments.get(&member.member_id().unwrap()), Some(&held));
        seen.extend(held);
    }
    assert_eq!(seen, partitions("orders", 4));
    assert_eq!(events[3].1, second.assignment());

    first.close().await?;
    second.close().await?;
    third.close().await?;
    Ok(())
}
