//! Partition assignment strategies used by group coordinators.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::{Error, Result},
    message::TopicPartition,
};

pub const ROUND_ROBIN_PROTOCOL: &str = "roundrobin";
pub const RANGE_PROTOCOL: &str = "range";

/// Member id mapped to the topics it subscribes to.
pub type Subscriptions = BTreeMap<String, BTreeSet<String>>;

/// Member id mapped to the partitions it owns.
pub type Assignments = BTreeMap<String, BTreeSet<TopicPartition>>;

/// Distribute the partitions of every subscribed topic over the members.
///
/// `partition_counts` holds the partition count of each existing topic;
/// subscriptions to unknown topics contribute nothing. Every member gets
/// an entry, possibly empty.
pub fn assign(
    strategy: &str,
    subscriptions: &Subscriptions,
    partition_counts: &BTreeMap<String, i32>,
) -> Result<Assignments> {
    match strategy {
        ROUND_ROBIN_PROTOCOL => Ok(round_robin(subscriptions, partition_counts)),
        RANGE_PROTOCOL => Ok(range(subscriptions, partition_counts)),
        _ => Err(Error::Configuration(format!(
            "assignment strategy {} is not supported",
            strategy
        ))),
    }
}

/// The round robin assignor lays out all the available partitions and
/// all the available consumers. It then proceeds to do a round robin
/// assignment from partition to consumer, skipping consumers that are not
/// subscribed to the partition's topic. If the subscriptions of all
/// consumer instances are identical, then the partitions will be
/// uniformly distributed. (i.e., the partition ownership counts will
/// be within a delta of exactly one across all consumers.)
fn round_robin(
    subscriptions: &Subscriptions,
    partition_counts: &BTreeMap<String, i32>,
) -> Assignments {
    let mut assignments = empty_assignments(subscriptions);
    let members: Vec<&String> = subscriptions.keys().collect();
    if members.is_empty() {
        return assignments;
    }

    let mut cursor = 0;
    for (topic, partitions) in subscribed_topics(subscriptions, partition_counts) {
        for partition in 0..partitions {
            // there is at least one subscriber, so this terminates
            loop {
                let member = members[cursor % members.len()];
                cursor += 1;
                if subscriptions[member].contains(topic) {
                    if let Some(owned) = assignments.get_mut(member) {
                        owned.insert(TopicPartition::new(topic, partition));
                    }
                    break;
                }
            }
        }
    }

    assignments
}

/// The range assignor works per topic: the subscribers of a topic are
/// sorted and each one gets a contiguous range of its partitions, the
/// first members taking one extra partition when they do not divide evenly.
fn range(subscriptions: &Subscriptions, partition_counts: &BTreeMap<String, i32>) -> Assignments {
    let mut assignments = empty_assignments(subscriptions);

    for (topic, partitions) in subscribed_topics(subscriptions, partition_counts) {
        let subscribers: Vec<&String> = subscriptions
            .iter()
            .filter(|(_, topics)| topics.contains(topic))
            .map(|(member, _)| member)
            .collect();
        let per_member = partitions as usize / subscribers.len();
        let extra = partitions as usize % subscribers.len();

        let mut next = 0;
        for (index, member) in subscribers.into_iter().enumerate() {
            let count = per_member + usize::from(index < extra);
            if let Some(owned) = assignments.get_mut(member) {
                for partition in next..next + count {
                    owned.insert(TopicPartition::new(topic, partition as i32));
                }
            }
            next += count;
        }
    }

    assignments
}

fn empty_assignments(subscriptions: &Subscriptions) -> Assignments {
    subscriptions
        .keys()
        .map(|member| (member.clone(), BTreeSet::new()))
        .collect()
}

/// Existing topics with at least one subscriber, sorted by name.
fn subscribed_topics<'a>(
    subscriptions: &'a Subscriptions,
    partition_counts: &'a BTreeMap<String, i32>,
) -> impl Iterator<Item = (&'a String, i32)> {
    partition_counts
        .iter()
        .filter(move |(topic, _)| {
            subscriptions
                .values()
                .any(|subscribed| subscribed.contains(*topic))
        })
        .map(|(topic, partitions)| (topic, *partitions))
}
