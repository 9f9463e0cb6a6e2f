//! In-process validator cluster over a [`LocalHub`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use prioria_chain::Blockchain;
use prioria_consensus::{EngineConfig, LocalHub, NodeStats, PbftEngine, ScoringConfig, ValidatorRegistry};
use prioria_core::{
    GenesisConfig, KeyPair, LedgerEntry, MedicalRecordType, PriorityProfile, ProfileKind,
    TierTable, ValidatorRecord, ValidatorTier,
};
use prioria_mempool::{Mempool, MempoolConfig};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::DEFAULT_STAKES;

/// Validators per tier when none are given
pub const DEFAULT_TIERS: [usize; 3] = [2, 3, 2];

pub struct Cluster {
    profile: ProfileKind,
    engines: Vec<Arc<PbftEngine>>,
    tasks: Vec<JoinHandle<()>>,
    client: KeyPair,
    nonce: u64,
}

impl Cluster {
    /// Build `tiers[i]` validators of tier rank `i`, all on one hub
    pub fn new(profile: ProfileKind, tiers: &[usize], config: EngineConfig) -> Result<Self> {
        let table = TierTable::for_profile(profile);
        if tiers.len() > table.len() {
            bail!(
                "{:?} profile has {} tiers, {} given",
                profile,
                table.len(),
                tiers.len()
            );
        }

        let mut members = Vec::new();
        for (rank, &count) in tiers.iter().enumerate() {
            let tier = ValidatorTier::from_rank(rank).unwrap_or(ValidatorTier::Tier1);
            for _ in 0..count {
                let id = format!("validator-{}", members.len());
                members.push((id, tier, KeyPair::generate()));
            }
        }
        if members.is_empty() {
            bail!("Cluster needs at least one validator");
        }

        let records: Vec<ValidatorRecord> = members
            .iter()
            .map(|(id, tier, kp)| {
                let stake = DEFAULT_STAKES[tier.rank().min(DEFAULT_STAKES.len() - 1)];
                ValidatorRecord::new(id.clone(), kp.public, stake, *tier, &table)
            })
            .collect();

        let hub = LocalHub::default();
        let genesis = GenesisConfig::default();
        let mut engines = Vec::with_capacity(members.len());
        let mut tasks = Vec::with_capacity(members.len());
        for (id, _, kp) in members {
            let registry = ValidatorRegistry::new(records.clone(), ScoringConfig::default())?;
            let mempool = Mempool::new(MempoolConfig {
                max_size: None,
                profile: PriorityProfile::for_kind(profile),
            });
            let (endpoint, inbox) = hub.connect(kp.public);
            let engine = Arc::new(PbftEngine::new(
                config,
                id,
                kp,
                registry,
                Arc::new(RwLock::new(Blockchain::new(&genesis)?)),
                Arc::new(mempool),
                Arc::new(endpoint),
            )?);
            tasks.push(tokio::spawn(Arc::clone(&engine).pump(inbox)));
            engines.push(engine);
        }

        info!(
            "Cluster of {} validators ({:?} profile, tiers {:?})",
            engines.len(),
            profile,
            tiers
        );

        Ok(Cluster {
            profile,
            engines,
            tasks,
            client: KeyPair::generate(),
            nonce: 0,
        })
    }

    pub fn engines(&self) -> &[Arc<PbftEngine>] {
        &self.engines
    }

    /// Start every validator's round loop
    pub fn start(&mut self, round_time: Duration) {
        for engine in &self.engines {
            self.tasks.push(tokio::spawn(Arc::clone(engine).run(round_time)));
        }
    }

    /// Submit through one validator; the hub gossips it to the rest
    pub async fn submit(&self, entry: LedgerEntry) -> Result<String> {
        let index = rand::thread_rng().gen_range(0..self.engines.len());
        Ok(self.engines[index].submit(entry).await?)
    }

    /// A signed synthetic entry matching the cluster's profile
    pub fn synthetic_entry(&mut self) -> Result<LedgerEntry> {
        self.nonce += 1;
        let mut rng = rand::thread_rng();
        let mut entry = match self.profile {
            ProfileKind::Healthcare => {
                let record_type = *MedicalRecordType::ALL
                    .choose(&mut rng)
                    .unwrap_or(&MedicalRecordType::LabResult);
                let mut data = BTreeMap::new();
                data.insert("sequence".to_string(), json!(self.nonce));
                LedgerEntry::medical(
                    self.client.public,
                    record_type,
                    format!("patient-{}", rng.gen_range(0..1000)),
                    "provider-1",
                    "facility-1",
                    data,
                )?
                .with_nonce(self.nonce)?
            }
            ProfileKind::General => {
                let mut payload = BTreeMap::new();
                payload.insert("urgency".to_string(), json!(rng.gen::<f64>()));
                payload.insert("impact".to_string(), json!(rng.gen::<f64>()));
                LedgerEntry::new(self.client.public, "ledger", rng.gen_range(0..100), payload, self.nonce)?
            }
        };
        entry.sign(&self.client.secret)?;
        Ok(entry)
    }

    pub async fn stats(&self) -> Vec<NodeStats> {
        let mut stats = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            stats.push(engine.stats().await);
        }
        stats
    }

    /// Print one line per validator
    pub async fn report(&self) {
        println!(
            "{:<14} {:>6} {:>8} {:>8} {:>8} {:>7} {:>6} {:>11}",
            "node", "chain", "blocks", "entries", "mempool", "score", "view", "phase"
        );
        for s in self.stats().await {
            println!(
                "{:<14} {:>6} {:>8} {:>8} {:>8} {:>7.3} {:>6} {:>11}",
                s.node_id,
                s.chain_length,
                s.blocks_finalized,
                s.entries_processed,
                s.mempool_size,
                s.validator_score,
                s.view,
                format!("{:?}", s.phase)
            );
        }
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, Instant};

    fn fast() -> EngineConfig {
        EngineConfig {
            pre_prepare_timeout_ms: 1000,
            prepare_timeout_ms: 1000,
            commit_timeout_ms: 1000,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_default_layout() {
        let cluster = Cluster::new(ProfileKind::General, &DEFAULT_TIERS, fast()).unwrap();
        assert_eq!(cluster.engines().len(), 7);

        let engine = &cluster.engines()[0];
        assert_eq!(engine.fault_params().f, 2);
        assert_eq!(engine.fault_params().quorum, 5);

        let registry = engine.registry().read().await;
        let tiers: Vec<ValidatorTier> = registry.validators().iter().map(|v| v.tier).collect();
        assert_eq!(tiers[0], ValidatorTier::Tier1);
        assert_eq!(tiers[2], ValidatorTier::Tier2);
        assert_eq!(tiers[6], ValidatorTier::Tier3);
        assert_eq!(registry.validators()[0].stake, 500.0);
    }

    #[tokio::test]
    async fn test_rejects_bad_layouts() {
        assert!(Cluster::new(ProfileKind::General, &[1, 1, 1, 1], fast()).is_err());
        assert!(Cluster::new(ProfileKind::Healthcare, &[1, 1, 1, 1], fast()).is_ok());
        assert!(Cluster::new(ProfileKind::General, &[0, 0], fast()).is_err());
    }

    #[tokio::test]
    async fn test_synthetic_entries_are_admissible() {
        let mut cluster = Cluster::new(ProfileKind::Healthcare, &[1, 1, 1, 1], fast()).unwrap();
        for _ in 0..5 {
            let entry = cluster.synthetic_entry().unwrap();
            assert!(entry.is_valid());
            cluster.submit(entry).await.unwrap();
        }
        let engine = &cluster.engines()[0];
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.mempool().size().await < 5 && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(engine.mempool().size().await, 5);
    }

    #[tokio::test]
    async fn test_running_cluster_finalizes() {
        let mut cluster = Cluster::new(ProfileKind::General, &[1, 2, 1], fast()).unwrap();
        let entry = cluster.synthetic_entry().unwrap();
        cluster.submit(entry).await.unwrap();
        cluster.start(Duration::from_millis(300));

        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            let stats = cluster.stats().await;
            if stats.iter().all(|s| s.chain_length >= 2) {
                break;
            }
            assert!(Instant::now() < deadline, "cluster did not finalize: {:?}", stats);
            sleep(Duration::from_millis(50)).await;
        }

        let mut hashes = Vec::new();
        for engine in cluster.engines() {
            hashes.push(engine.chain().read().await.block(1).map(|b| b.hash));
        }
        assert!(hashes.iter().all(|h| h.is_some() && *h == hashes[0]));
    }
}
