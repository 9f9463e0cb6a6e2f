use std::sync::Arc;

use anyhow::Result;
use prioria_chain::{Blockchain, FileStorage, Storage, StorageError};
use prioria_consensus::{FinalizationSink, HttpTransport, PbftEngine};
use prioria_core::{Block, LedgerEntry};
use prioria_mempool::Mempool;
use prioria_rpc::{RpcConfig, RpcServer};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;

/// A validator node serving RPC and peer traffic over HTTP
pub struct Node {
    config: NodeConfig,
    engine: Arc<PbftEngine>,
    storage: Arc<FileStorage>,
    finalized: mpsc::UnboundedReceiver<u64>,
    /// Mempool snapshot found on disk, re-admitted when the node starts
    saved_entries: Vec<LedgerEntry>,
}

/// Signals the persistence task after every appended block
struct PersistenceSink {
    sender: mpsc::UnboundedSender<u64>,
}

impl FinalizationSink for PersistenceSink {
    fn on_block_finalized(&self, block: &Block) {
        if self.sender.send(block.index).is_err() {
            warn!("Persistence task gone; block {} not saved", block.index);
        }
    }
}

/// Snapshot chain, mempool and validator state
pub async fn persist(engine: &PbftEngine, storage: &dyn Storage) -> Result<(), StorageError> {
    {
        let chain = engine.chain().read().await;
        storage.save_chain(chain.blocks())?;
    }
    storage.save_mempool(&engine.mempool().snapshot().await)?;
    let registry = engine.registry().read().await;
    storage.save_validators(registry.validators())
}

impl Node {
    /// Build a node from configuration, restoring any snapshots in its
    /// data directory. A stored chain that fails validation aborts startup.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let keypair = config.local_keypair()?;
        let storage = Arc::new(FileStorage::new(config.data_dir.clone())?);

        let chain = match storage.load_chain()? {
            Some(blocks) => Blockchain::from_blocks(blocks, &config.genesis)?,
            None => Blockchain::new(&config.genesis)?,
        };

        let mut registry = config.registry()?;
        if let Some(saved) = storage.load_validators()? {
            let restored = registry.restore(&saved);
            info!("Restored scoring history of {} validators", restored);
        }

        let saved_entries = storage.load_mempool()?.unwrap_or_default();
        let transport = HttpTransport::new(config.peers.clone(), config.peer_timeout())?;
        let mempool = Arc::new(Mempool::new(config.mempool_config()));

        let (sender, finalized) = mpsc::unbounded_channel();
        let engine = PbftEngine::new(
            config.consensus,
            config.node_id.clone(),
            keypair,
            registry,
            Arc::new(RwLock::new(chain)),
            mempool,
            Arc::new(transport),
        )?
        .with_sink(Arc::new(PersistenceSink { sender }));

        Ok(Node {
            config,
            engine: Arc::new(engine),
            storage,
            finalized,
            saved_entries,
        })
    }

    pub fn engine(&self) -> &Arc<PbftEngine> {
        &self.engine
    }

    /// Re-admit saved pending entries, skipping any already finalized.
    /// Entries that no longer verify are dropped.
    pub async fn restore_mempool(&mut self) -> usize {
        let saved = std::mem::take(&mut self.saved_entries);
        if saved.is_empty() {
            return 0;
        }
        let pending: Vec<LedgerEntry> = {
            let chain = self.engine.chain().read().await;
            saved
                .into_iter()
                .filter(|entry| chain.find_entry(&entry.id).is_none())
                .collect()
        };
        let restored = self.engine.mempool().reload(pending).await;
        info!("Restored {} pending entries", restored);
        restored
    }

    /// Run the node until interrupted
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Starting Prioria node {} as {} ({:?} profile)",
            self.config.node_id,
            self.engine().public_key(),
            self.config.profile
        );
        self.restore_mempool().await;

        let Node {
            config,
            engine,
            storage,
            mut finalized,
            ..
        } = self;

        let persist_engine = Arc::clone(&engine);
        let persist_storage = Arc::clone(&storage);
        tokio::spawn(async move {
            while let Some(index) = finalized.recv().await {
                while finalized.try_recv().is_ok() {}
                match persist(&persist_engine, persist_storage.as_ref()).await {
                    Ok(()) => debug!("Saved state through block {}", index),
                    Err(e) => error!("Failed to save state after block {}: {}", index, e),
                }
            }
        });

        let consensus = tokio::spawn(Arc::clone(&engine).run(config.round_time()));

        let rpc_server = RpcServer::new(
            RpcConfig {
                http_addr: config.rpc_addr,
            },
            Arc::clone(&engine),
        );

        tokio::select! {
            result = rpc_server.run() => {
                if let Err(e) = result {
                    error!("RPC server error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
            }
        }

        consensus.abort();
        persist(&engine, storage.as_ref()).await?;
        info!("State saved to {}", storage.dir().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::generate_sample_configs;
    use prioria_consensus::RoundOutcome;
    use prioria_core::{KeyPair, ProfileKind};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn solo_config(dir: &std::path::Path) -> NodeConfig {
        let mut config = generate_sample_configs(1, ProfileKind::General, 18080).remove(0);
        config.data_dir = dir.to_path_buf();
        config
    }

    fn entry(nonce: u64) -> LedgerEntry {
        let kp = KeyPair::generate();
        let mut payload = BTreeMap::new();
        payload.insert("urgency".to_string(), json!(0.7));
        LedgerEntry::new_signed(kp.public, "ward", 0, payload, nonce, &kp.secret).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_node_starts_at_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(solo_config(dir.path())).unwrap();

        let stats = node.engine().stats().await;
        assert_eq!(stats.chain_length, 1);
        assert_eq!(stats.peers_connected, 0);
    }

    #[tokio::test]
    async fn test_finalized_block_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = solo_config(dir.path());

        let mut node = Node::new(config.clone()).unwrap();
        node.engine().submit(entry(1)).await.unwrap();
        let outcome = node.engine().run_round().await.unwrap();
        assert!(matches!(outcome, RoundOutcome::Finalized { index: 1, .. }));
        assert_eq!(node.finalized.recv().await, Some(1));

        node.engine().submit(entry(2)).await.unwrap();
        persist(node.engine(), node.storage.as_ref()).await.unwrap();
        drop(node);

        let mut restarted = Node::new(config).unwrap();
        assert_eq!(restarted.engine().chain().read().await.len(), 2);
        assert_eq!(restarted.restore_mempool().await, 1);
        assert_eq!(restarted.engine().mempool().size().await, 1);

        let registry = restarted.engine().registry().read().await;
        assert!(registry.validators()[0].correct_votes > 0);
    }

    #[tokio::test]
    async fn test_restore_skips_finalized_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = solo_config(dir.path());
        let finalized = entry(1);

        let node = Node::new(config.clone()).unwrap();
        node.engine().submit(finalized.clone()).await.unwrap();
        node.engine().run_round().await.unwrap();
        persist(node.engine(), node.storage.as_ref()).await.unwrap();
        node.storage.save_mempool(&[finalized]).unwrap();
        drop(node);

        let mut restarted = Node::new(config).unwrap();
        assert_eq!(restarted.restore_mempool().await, 0);
    }

    #[tokio::test]
    async fn test_restore_drops_tampered_pending_entries() {
        let dir = tempfile::tempdir().unwrap();
        let config = solo_config(dir.path());

        let honest = entry(1);
        let mut inflated = entry(2);
        inflated.priority = 1.0;
        let mut forged = entry(3);
        forged.recipient = "elsewhere".to_string();

        let node = Node::new(config.clone()).unwrap();
        node.storage
            .save_mempool(&[honest.clone(), inflated.clone(), forged])
            .unwrap();
        drop(node);

        let mut restarted = Node::new(config).unwrap();
        assert_eq!(restarted.restore_mempool().await, 2);

        let mempool = restarted.engine().mempool();
        assert_eq!(mempool.size().await, 2);
        let rescored = mempool.get(&inflated.id).await.unwrap();
        assert!((rescored.priority - mempool.profile().score(&inflated)).abs() < 1e-9);
        assert!(rescored.priority < 1.0);
        assert!(mempool.contains(&honest.id).await);
    }

    #[tokio::test]
    async fn test_tampered_snapshot_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = solo_config(dir.path());

        let node = Node::new(config.clone()).unwrap();
        node.engine().submit(entry(1)).await.unwrap();
        node.engine().run_round().await.unwrap();
        let mut blocks = node.engine().chain().read().await.blocks().to_vec();
        blocks[1].timestamp += 1;
        node.storage.save_chain(&blocks).unwrap();
        drop(node);

        assert!(Node::new(config).is_err());
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = solo_config(dir.path());
        config.scoring.weights.uptime = 0.5;
        assert!(Node::new(config).is_err());
    }
}
