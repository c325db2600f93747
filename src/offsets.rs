//! Per-partition progress of a consumer.
//!
//! Each assigned partition has an entry tracking four offsets:
//!
//! * `acked`: the highest offset the application finished processing.
//! * `committed`: the highest acked offset the broker has stored.
//! * `position`: the next offset to fetch.
//! * `highwater`: the broker's log end offset, only used for lag.
//!
//! `acked` never regresses and never falls below `committed`. Every entry
//! carries an incarnation that changes whenever the entry is created or
//! reset, and a fetch token that additionally changes when the position is
//! rewound. Work started against an old entry (a commit snapshot, a fetch
//! in flight, a buffered message) can tell it is stale.
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::{Error, KafkaCode, Result},
    message::{TopicOrPartition, TopicPartition},
};

#[derive(Clone, Debug, PartialEq)]
struct PartitionOffsets {
    acked: Option<i64>,
    committed: Option<i64>,
    position: i64,
    highwater: i64,
    incarnation: u64,
    token: u64,
}

/// An acked offset waiting to be committed.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingCommit {
    pub topic_partition: TopicPartition,
    pub offset: i64,
    incarnation: u64,
}

impl PendingCommit {
    /// Offset stored by the broker: the next one to read.
    pub fn next_offset(&self) -> i64 {
        self.offset.saturating_add(1)
    }
}

#[derive(Debug, Default)]
pub struct OffsetTable {
    entries: BTreeMap<TopicPartition, PartitionOffsets>,
    next_token: u64,
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly assigned partition.
    ///
    /// `committed` is the broker's committed offset (next to read) if the
    /// group has one, `position` is where fetching starts.
    pub fn assign(
        &mut self,
        tp: TopicPartition,
        position: i64,
        committed: Option<i64>,
        highwater: i64,
    ) {
        let last_done = committed.filter(|next| *next > 0).map(|next| next - 1);
        let token = self.issue_token();
        self.entries.insert(
            tp,
            PartitionOffsets {
                acked: last_done,
                committed: last_done,
                position,
                highwater,
                incarnation: token,
                token,
            },
        );
    }

    /// Drop a revoked partition, discarding anything not yet committed.
    pub fn remove(&mut self, tp: &TopicPartition) -> bool {
        self.entries.remove(tp).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, tp: &TopicPartition) -> bool {
        self.entries.contains_key(tp)
    }

    pub fn partitions(&self) -> BTreeSet<TopicPartition> {
        self.entries.keys().cloned().collect()
    }

    /// Record that `offset` was processed.
    ///
    /// Returns whether the acked offset advanced; a late or duplicate ack is
    /// ignored. Offsets below zero never name a record and are rejected.
    pub fn ack(&mut self, tp: &TopicPartition, offset: i64) -> Result<bool> {
        let entry = self.entry_mut(tp)?;
        if offset < 0 {
            return Err(Error::KafkaError(KafkaCode::OffsetOutOfRange));
        }
        if entry.acked.map_or(false, |acked| acked >= offset) {
            return Ok(false);
        }
        entry.acked = Some(offset);
        Ok(true)
    }

    /// Acked offsets not committed yet, restricted to `scope` when given.
    pub fn pending(&self, scope: Option<&[TopicOrPartition]>) -> Vec<PendingCommit> {
        self.entries
            .iter()
            .filter(|(tp, _)| scope.map_or(true, |scope| scope.iter().any(|s| s.matches(tp))))
            .filter_map(|(tp, entry)| {
                let acked = entry.acked?;
                if entry.committed.map_or(false, |committed| committed >= acked) {
                    return None;
                }
                Some(PendingCommit {
                    topic_partition: tp.clone(),
                    offset: acked,
                    incarnation: entry.incarnation,
                })
            })
            .collect()
    }

    /// Record a successful commit. Entries revoked or reset since the
    /// snapshot was taken are left alone.
    pub fn mark_committed(&mut self, commits: &[PendingCommit]) {
        for commit in commits {
            if let Some(entry) = self.entries.get_mut(&commit.topic_partition) {
                if entry.incarnation == commit.incarnation {
                    let committed = entry.committed.map_or(commit.offset, |c| c.max(commit.offset));
                    entry.committed = Some(committed);
                }
            }
        }
    }

    /// Fetch positions of `partitions`, skipping untracked ones.
    pub fn fetch_positions<'a>(
        &self,
        partitions: impl IntoIterator<Item = &'a TopicPartition>,
    ) -> Vec<(TopicPartition, i64, u64)> {
        partitions
            .into_iter()
            .filter_map(|tp| {
                self.entries
                    .get(tp)
                    .map(|entry| (tp.clone(), entry.position, entry.token))
            })
            .collect()
    }

    /// Move the position past a message handed to the application.
    ///
    /// Fails when the entry changed since the message was fetched or the
    /// message was already handed out.
    pub fn advance(&mut self, tp: &TopicPartition, token: u64, offset: i64) -> bool {
        match self.entries.get_mut(tp) {
            Some(entry) if entry.token == token && offset >= entry.position => {
                entry.position = offset + 1;
                true
            }
            _ => false,
        }
    }

    /// Move the position back so `offset` is fetched again.
    ///
    /// Issues a new fetch token, so messages fetched after `offset` under
    /// the old one are dropped instead of overtaking the refetch.
    pub fn rewind(&mut self, tp: &TopicPartition, token: u64, offset: i64) -> Option<u64> {
        let next = self.next_token + 1;
        let entry = self.entries.get_mut(tp).filter(|entry| entry.token == token)?;
        entry.position = entry.position.min(offset);
        entry.token = next;
        self.next_token = next;
        Some(next)
    }

    /// Jump to `position` after the old one fell out of the log.
    pub fn seek(&mut self, tp: &TopicPartition, token: u64, position: i64) {
        if let Some(entry) = self.entries.get_mut(tp) {
            if entry.token == token {
                entry.position = position;
            }
        }
    }

    /// Restart a partition at `position`, forgetting acked and committed
    /// progress. Returns the new token.
    pub fn reset(&mut self, tp: &TopicPartition, position: i64) -> Result<u64> {
        let token = self.issue_token();
        let entry = self.entry_mut(tp)?;
        entry.acked = None;
        entry.committed = None;
        entry.position = position;
        entry.incarnation = token;
        entry.token = token;
        Ok(token)
    }

    pub fn set_highwater(&mut self, tp: &TopicPartition, highwater: i64) {
        if let Some(entry) = self.entries.get_mut(tp) {
            entry.highwater = entry.highwater.max(highwater);
        }
    }

    pub fn token(&self, tp: &TopicPartition) -> Option<u64> {
        self.entries.get(tp).map(|entry| entry.token)
    }

    pub fn acked(&self, tp: &TopicPartition) -> Option<i64> {
        self.entries.get(tp)?.acked
    }

    pub fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        self.entries.get(tp)?.committed
    }

    pub fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.entries.get(tp).map(|entry| entry.position)
    }

    pub fn highwater(&self, tp: &TopicPartition) -> Option<i64> {
        self.entries.get(tp).map(|entry| entry.highwater)
    }

    /// Records between the fetch position and the log end.
    pub fn lag(&self, tp: &TopicPartition) -> Option<i64> {
        self.entries
            .get(tp)
            .map(|entry| (entry.highwater - entry.position).max(0))
    }

    fn entry_mut(&mut self, tp: &TopicPartition) -> Result<&mut PartitionOffsets> {
        self.entries
            .get_mut(tp)
            .ok_or_else(|| Error::NotAssigned(tp.clone()))
    }

    fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}
