use std::collections::{BTreeMap, HashMap};

use prioria_core::{CoreError, LedgerEntry, PriorityProfile};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::ordering::PriorityKey;

/// Configuration for the mempool
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Maximum number of entries in the pool; unbounded when `None`
    pub max_size: Option<usize>,
    /// Scores entries at admission
    pub profile: PriorityProfile,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_size: None,
            profile: PriorityProfile::general(),
        }
    }
}

/// An admitted entry with its place in line
#[derive(Debug, Clone)]
struct PendingEntry {
    entry: LedgerEntry,
    key: PriorityKey,
}

#[derive(Debug, Default)]
struct PoolInner {
    by_id: HashMap<String, PendingEntry>,
    ordered: BTreeMap<PriorityKey, String>,
    /// Admission sequence of drained entries that may still be restored
    in_flight: HashMap<String, u64>,
    next_seq: u64,
}

impl PoolInner {
    fn insert(&mut self, entry: LedgerEntry, seq: u64) {
        let key = PriorityKey::new(entry.priority, seq);
        self.ordered.insert(key, entry.id.clone());
        self.by_id.insert(entry.id.clone(), PendingEntry { entry, key });
    }

    fn take(&mut self, id: &str) -> Option<PendingEntry> {
        let pending = self.by_id.remove(id)?;
        self.ordered.remove(&pending.key);
        Some(pending)
    }

    fn lowest(&self) -> Option<PriorityKey> {
        self.ordered.last_key_value().map(|(key, _)| *key)
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Priority statistics over the pool
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MempoolStats {
    pub size: usize,
    pub avg_priority: f64,
    pub min_priority: f64,
    pub max_priority: f64,
}

/// The priority mempool.
///
/// One lock guards both the id index and the ordered sequence, so every
/// admission, drain and removal is applied as a single step.
pub struct Mempool {
    config: MempoolConfig,
    inner: RwLock<PoolInner>,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Mempool {
            config,
            inner: RwLock::new(PoolInner::default()),
        }
    }

    pub fn profile(&self) -> &PriorityProfile {
        &self.config.profile
    }

    /// Verify, score and insert an entry. Returns the entry id.
    pub async fn admit(&self, mut entry: LedgerEntry) -> Result<String, MempoolError> {
        entry.verify_signature().map_err(|e| match e {
            CoreError::EntryIdMismatch { .. } => MempoolError::InvalidId(entry.id.clone()),
            other => MempoolError::InvalidSignature(other.to_string()),
        })?;
        entry.priority = self.config.profile.score(&entry);

        let mut inner = self.inner.write().await;

        if inner.by_id.contains_key(&entry.id) || inner.in_flight.contains_key(&entry.id) {
            return Err(MempoolError::DuplicateEntry(entry.id));
        }

        if let Some(max_size) = self.config.max_size {
            if inner.by_id.len() >= max_size {
                match inner.lowest() {
                    Some(lowest) if entry.priority > lowest.priority => {
                        if let Some(evicted) = inner.ordered.get(&lowest).cloned() {
                            inner.take(&evicted);
                            warn!("Evicted entry {} (priority {:.3})", evicted, lowest.priority);
                        }
                    }
                    _ => return Err(MempoolError::PoolFull),
                }
            }
        }

        let id = entry.id.clone();
        let priority = entry.priority;
        let seq = inner.allocate_seq();
        inner.insert(entry, seq);

        debug!("Admitted entry {} with priority {:.3}", id, priority);
        Ok(id)
    }

    /// Remove and return the `count` highest-priority entries
    pub async fn drain(&self, count: usize) -> Vec<LedgerEntry> {
        let mut inner = self.inner.write().await;

        let ids: Vec<String> = inner.ordered.values().take(count).cloned().collect();
        let mut drained = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(pending) = inner.take(&id) {
                inner.in_flight.insert(id, pending.key.seq);
                drained.push(pending.entry);
            }
        }

        if !drained.is_empty() {
            debug!("Drained {} entries, {} remain", drained.len(), inner.by_id.len());
        }
        drained
    }

    /// The `count` highest-priority entries, left in place
    pub async fn peek(&self, count: usize) -> Vec<LedgerEntry> {
        let inner = self.inner.read().await;
        inner
            .ordered
            .values()
            .take(count)
            .filter_map(|id| inner.by_id.get(id).map(|p| p.entry.clone()))
            .collect()
    }

    /// Priority of the entry at the head of the queue
    pub async fn top_priority(&self) -> Option<f64> {
        let inner = self.inner.read().await;
        inner.ordered.first_key_value().map(|(key, _)| key.priority)
    }

    /// Put entries from a failed round back in line.
    ///
    /// Entries keep their admitted priority and, when they were drained from
    /// this pool, their original admission sequence. Ids already present are
    /// skipped. Returns how many were restored.
    pub async fn restore(&self, entries: Vec<LedgerEntry>) -> usize {
        let mut inner = self.inner.write().await;
        let mut restored = 0;

        for entry in entries {
            if inner.by_id.contains_key(&entry.id) {
                continue;
            }
            let seq = match inner.in_flight.remove(&entry.id) {
                Some(seq) => seq,
                None => inner.allocate_seq(),
            };
            inner.insert(entry, seq);
            restored += 1;
        }

        if restored > 0 {
            debug!("Restored {} entries to mempool", restored);
        }
        restored
    }

    /// Re-admit entries read back from a persisted snapshot.
    ///
    /// Each one goes through [`Self::admit`], so signatures are checked and
    /// priorities recomputed under this pool's profile. Entries that fail are
    /// dropped. Returns how many were admitted.
    pub async fn reload(&self, entries: Vec<LedgerEntry>) -> usize {
        let mut admitted = 0;
        for entry in entries {
            let id = entry.id.clone();
            match self.admit(entry).await {
                Ok(_) => admitted += 1,
                Err(MempoolError::DuplicateEntry(_)) => {}
                Err(e) => warn!("Dropped saved entry {}: {}", id, e),
            }
        }
        admitted
    }

    /// Remove an entry by id
    pub async fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let in_flight = inner.in_flight.remove(id).is_some();
        inner.take(id).is_some() || in_flight
    }

    /// Remove entries that have been finalized in a block
    pub async fn remove_committed(&self, ids: &[String]) {
        let mut inner = self.inner.write().await;
        for id in ids {
            inner.in_flight.remove(id);
            if inner.take(id).is_some() {
                debug!("Removed committed entry {} from mempool", id);
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<LedgerEntry> {
        let inner = self.inner.read().await;
        inner.by_id.get(id).map(|p| p.entry.clone())
    }

    pub async fn contains(&self, id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.by_id.contains_key(id)
    }

    pub async fn size(&self) -> usize {
        let inner = self.inner.read().await;
        inner.by_id.len()
    }

    pub async fn stats(&self) -> MempoolStats {
        let inner = self.inner.read().await;
        let size = inner.by_id.len();
        if size == 0 {
            return MempoolStats {
                size: 0,
                avg_priority: 0.0,
                min_priority: 0.0,
                max_priority: 0.0,
            };
        }

        let priorities = inner.by_id.values().map(|p| p.entry.priority);
        let (sum, min, max) = priorities.fold(
            (0.0, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), p| (sum + p, min.min(p), max.max(p)),
        );
        MempoolStats {
            size,
            avg_priority: sum / size as f64,
            min_priority: min,
            max_priority: max,
        }
    }

    /// All entries in drain order, for persistence
    pub async fn snapshot(&self) -> Vec<LedgerEntry> {
        let inner = self.inner.read().await;
        inner
            .ordered
            .values()
            .filter_map(|id| inner.by_id.get(id).map(|p| p.entry.clone()))
            .collect()
    }
}

/// Mempool errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MempoolError {
    #[error("Entry {0} already exists in mempool")]
    DuplicateEntry(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Entry id {0} does not match its content")]
    InvalidId(String),

    #[error("Mempool is full")]
    PoolFull,
}
