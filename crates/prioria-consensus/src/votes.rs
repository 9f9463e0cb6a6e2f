//! Vote and pre-prepare logs with deadline waits.
//!
//! Every mutation wakes waiters through a [`Notify`]; a waiter re-checks its
//! condition on wake and gives up at its deadline. There is no polling.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use prioria_core::{Digest, PublicKey};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::message::PbftMessage;

#[derive(Debug, Clone, Default)]
struct VoteSet {
    block_index: u64,
    votes: HashMap<PublicKey, PbftMessage>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What [`VoteLog::record`] did with a vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteStatus {
    Added,
    Duplicate,
    /// The voter already backs another hash at this index in the same or a
    /// later view, or the hash is logged under another index
    Conflict,
}

/// Signed votes of one phase keyed by block hash.
///
/// A voter holds at most one vote per block index. A vote in a later view
/// moves the voter to the new hash.
#[derive(Debug, Default)]
pub struct VoteLog {
    votes: Mutex<HashMap<Digest, VoteSet>>,
    changed: Notify,
}

/// Hash and view of `voter`'s current vote at `block_index`
fn vote_at(
    votes: &HashMap<Digest, VoteSet>,
    block_index: u64,
    voter: &PublicKey,
) -> Option<(Digest, u64)> {
    votes.iter().find_map(|(hash, set)| {
        if set.block_index != block_index {
            return None;
        }
        set.votes.get(voter).map(|vote| (*hash, vote.view))
    })
}

impl VoteLog {
    pub fn new() -> Self {
        VoteLog::default()
    }

    /// Log a vote. Callers check its signature first.
    pub fn record(&self, vote: &PbftMessage) -> VoteStatus {
        let status = {
            let mut votes = lock(&self.votes);
            if votes
                .get(&vote.block_hash)
                .is_some_and(|set| set.block_index != vote.block_index)
            {
                return VoteStatus::Conflict;
            }

            match vote_at(&votes, vote.block_index, &vote.sender) {
                Some((hash, _)) if hash == vote.block_hash => VoteStatus::Duplicate,
                Some((_, view)) if view >= vote.view => VoteStatus::Conflict,
                previous => {
                    if let Some((hash, _)) = previous {
                        if let Some(set) = votes.get_mut(&hash) {
                            set.votes.remove(&vote.sender);
                            if set.votes.is_empty() {
                                votes.remove(&hash);
                            }
                        }
                    }
                    votes
                        .entry(vote.block_hash)
                        .or_insert_with(|| VoteSet {
                            block_index: vote.block_index,
                            votes: HashMap::new(),
                        })
                        .votes
                        .insert(vote.sender, vote.clone());
                    VoteStatus::Added
                }
            }
        };
        if status == VoteStatus::Added {
            self.changed.notify_waiters();
        }
        status
    }

    pub fn count(&self, block_hash: &Digest) -> usize {
        lock(&self.votes)
            .get(block_hash)
            .map_or(0, |set| set.votes.len())
    }

    pub fn voters(&self, block_hash: &Digest) -> Vec<PublicKey> {
        lock(&self.votes)
            .get(block_hash)
            .map(|set| set.votes.keys().copied().collect())
            .unwrap_or_default()
    }

    /// The signed votes backing `block_hash`
    pub fn certificate(&self, block_hash: &Digest) -> Vec<PbftMessage> {
        lock(&self.votes)
            .get(block_hash)
            .map(|set| set.votes.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Voters that backed a hash other than `block_hash` at `block_index`
    pub fn dissenters(&self, block_index: u64, block_hash: &Digest) -> HashSet<PublicKey> {
        lock(&self.votes)
            .iter()
            .filter(|(hash, set)| set.block_index == block_index && *hash != block_hash)
            .flat_map(|(_, set)| set.votes.keys().copied())
            .collect()
    }

    /// Wait until `block_hash` has `quorum` votes or the deadline passes.
    /// Returns the final count either way.
    pub async fn wait_for_quorum(
        &self,
        block_hash: &Digest,
        quorum: usize,
        deadline: Instant,
    ) -> Result<usize, usize> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let count = self.count(block_hash);
            if count >= quorum {
                return Ok(count);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(self.count(block_hash));
            }
        }
    }

    /// Drop vote sets for blocks at or below `block_index`
    pub fn prune_through(&self, block_index: u64) {
        lock(&self.votes).retain(|_, set| set.block_index > block_index);
    }

    pub fn len(&self) -> usize {
        lock(&self.votes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accepted pre-prepare messages keyed by block index
#[derive(Debug, Default)]
pub struct PrePrepareLog {
    messages: Mutex<HashMap<u64, PbftMessage>>,
    changed: Notify,
}

impl PrePrepareLog {
    pub fn new() -> Self {
        PrePrepareLog::default()
    }

    /// Log a pre-prepare. A later view replaces an earlier one for the same
    /// index; anything else already logged wins.
    pub fn insert(&self, message: PbftMessage) -> bool {
        let inserted = {
            let mut messages = lock(&self.messages);
            match messages.get(&message.block_index) {
                Some(existing) if existing.view >= message.view => false,
                _ => {
                    messages.insert(message.block_index, message);
                    true
                }
            }
        };
        if inserted {
            self.changed.notify_waiters();
        }
        inserted
    }

    /// Logged pre-prepare for `block_index` in `min_view` or later
    pub fn get(&self, block_index: u64, min_view: u64) -> Option<PbftMessage> {
        lock(&self.messages)
            .get(&block_index)
            .filter(|m| m.view >= min_view)
            .cloned()
    }

    pub async fn wait_for(
        &self,
        block_index: u64,
        min_view: u64,
        deadline: Instant,
    ) -> Option<PbftMessage> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.get(block_index, min_view) {
                return Some(message);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.get(block_index, min_view);
            }
        }
    }

    pub fn prune_through(&self, block_index: u64) {
        lock(&self.messages).retain(|&index, _| index > block_index);
    }
}
