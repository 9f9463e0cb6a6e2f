use prioria_core::merkle::{self, ProofStep};
use prioria_core::time::now_millis;
use prioria_core::{Block, Digest, GenesisConfig, LedgerEntry, PublicKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ChainError;

/// Structured view of a block for export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockView {
    pub index: u64,
    pub hash: Digest,
    pub previous_hash: Digest,
    pub merkle_root: Digest,
    pub timestamp: u64,
    pub proposer: PublicKey,
    pub entry_count: usize,
    pub entries: Vec<LedgerEntry>,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        BlockView {
            index: block.index,
            hash: block.hash,
            previous_hash: block.previous_hash,
            merkle_root: block.merkle_root,
            timestamp: block.timestamp,
            proposer: block.proposer,
            entry_count: block.entries.len(),
            entries: block.entries.clone(),
        }
    }
}

/// Chain-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainStats {
    pub length: usize,
    pub total_entries: usize,
    pub valid: bool,
}

/// Inclusion proof for a finalized entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryProof {
    pub entry_id: String,
    pub block_index: u64,
    pub merkle_root: Digest,
    pub leaf: Digest,
    pub proof: Vec<ProofStep>,
}

impl EntryProof {
    pub fn verify(&self) -> bool {
        merkle::verify_leaf(&self.leaf, &self.proof, &self.merkle_root)
    }
}

/// Ordered, hash-linked list of blocks starting at genesis
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
}

impl Blockchain {
    /// New chain holding only the genesis block
    pub fn new(genesis: &GenesisConfig) -> Result<Self, ChainError> {
        let genesis_block = Block::genesis(genesis)?;
        info!("Initialized chain with genesis {}", genesis_block.hash);
        Ok(Blockchain {
            blocks: vec![genesis_block],
        })
    }

    /// Rebuild a chain from stored blocks; the result must validate in full
    /// and start from the configured genesis.
    pub fn from_blocks(blocks: Vec<Block>, genesis: &GenesisConfig) -> Result<Self, ChainError> {
        let first = blocks.first().ok_or(ChainError::MissingGenesis)?;
        let expected = Block::genesis(genesis)?;
        if first.hash != expected.hash {
            return Err(ChainError::GenesisMismatch {
                expected: expected.hash,
                got: first.hash,
            });
        }

        let chain = Blockchain { blocks };
        chain.check()?;
        info!("Loaded chain with {} blocks", chain.len());
        Ok(chain)
    }

    /// Candidate block extending `prior`; `None` if there is nothing to propose
    pub fn propose_after(
        prior: &Block,
        entries: Vec<LedgerEntry>,
        proposer: PublicKey,
        timestamp: u64,
    ) -> Result<Option<Block>, ChainError> {
        if entries.is_empty() {
            return Ok(None);
        }
        let block = Block::new(prior.index + 1, prior.hash, entries, proposer, timestamp)?;
        debug!(
            "Proposed block {} with {} entries",
            block.index,
            block.entries.len()
        );
        Ok(Some(block))
    }

    /// Candidate block extending the current tip, stamped now
    pub fn propose(
        &self,
        entries: Vec<LedgerEntry>,
        proposer: PublicKey,
    ) -> Result<Option<Block>, ChainError> {
        Self::propose_after(self.latest(), entries, proposer, now_millis())
    }

    /// Check that `block` may extend `prior`
    fn check_link(prior: &Block, block: &Block) -> Result<(), ChainError> {
        if block.previous_hash != prior.hash {
            return Err(ChainError::PreviousHashMismatch {
                expected: prior.hash,
                got: block.previous_hash,
            });
        }
        if block.index != prior.index + 1 {
            return Err(ChainError::IndexMismatch {
                expected: prior.index + 1,
                got: block.index,
            });
        }
        Ok(())
    }

    fn check_block(block: &Block) -> Result<(), ChainError> {
        if !block.verify_integrity()? {
            return Err(ChainError::IntegrityMismatch { index: block.index });
        }
        block
            .verify_entries()
            .map_err(|(entry_id, e)| ChainError::InvalidEntry {
                index: block.index,
                entry_id,
                reason: e.to_string(),
            })
    }

    /// Check `block` against the tip without appending it
    pub fn check_candidate(&self, block: &Block) -> Result<(), ChainError> {
        Self::check_link(self.latest(), block)?;
        Self::check_block(block)
    }

    /// Append a block after checking linkage, integrity and every entry.
    /// On error the chain is unchanged.
    pub fn append(&mut self, block: Block) -> Result<(), ChainError> {
        if let Err(e) = self.check_candidate(&block) {
            warn!("Rejected block {}: {}", block.index, e);
            return Err(e);
        }
        info!(
            "Appended block {} ({} entries) hash {}",
            block.index,
            block.entries.len(),
            block.hash
        );
        self.blocks.push(block);
        Ok(())
    }

    /// Walk the chain, reporting the first violation
    pub fn check(&self) -> Result<(), ChainError> {
        let genesis = self.blocks.first().ok_or(ChainError::MissingGenesis)?;
        Self::check_block(genesis)?;
        for pair in self.blocks.windows(2) {
            Self::check_link(&pair[0], &pair[1])?;
            Self::check_block(&pair[1])?;
        }
        Ok(())
    }

    /// Full linkage and per-block integrity check
    pub fn validate(&self) -> bool {
        match self.check() {
            Ok(()) => true,
            Err(e) => {
                warn!("Chain validation failed: {}", e);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// A chain always holds at least its genesis block
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn latest(&self) -> &Block {
        // Constructors guarantee a genesis block
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn height(&self) -> u64 {
        self.latest().index
    }

    pub fn block(&self, index: u64) -> Option<&Block> {
        self.blocks.get(usize::try_from(index).ok()?)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Blocks after `index`, in order
    pub fn blocks_after(&self, index: u64) -> &[Block] {
        let start = usize::try_from(index.saturating_add(1))
            .unwrap_or(usize::MAX)
            .min(self.blocks.len());
        &self.blocks[start..]
    }

    /// Locate a finalized entry and the index of its block
    pub fn find_entry(&self, id: &str) -> Option<(u64, &LedgerEntry)> {
        self.blocks
            .iter()
            .find_map(|block| block.find_entry(id).map(|entry| (block.index, entry)))
    }

    /// Merkle inclusion proof for a finalized entry
    pub fn entry_proof(&self, id: &str) -> Result<Option<EntryProof>, ChainError> {
        let Some((index, entry)) = self.find_entry(id) else {
            return Ok(None);
        };
        let block = &self.blocks[index as usize];
        let Some(proof) = block.entry_proof(id)? else {
            return Ok(None);
        };
        Ok(Some(EntryProof {
            entry_id: id.to_string(),
            block_index: index,
            merkle_root: block.merkle_root,
            leaf: merkle::leaf_hash(&entry.record())?,
            proof,
        }))
    }

    pub fn export(&self) -> Vec<BlockView> {
        self.blocks.iter().map(BlockView::from).collect()
    }

    pub fn total_entries(&self) -> usize {
        self.blocks.iter().map(|b| b.entries.len()).sum()
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            length: self.len(),
            total_entries: self.total_entries(),
            valid: self.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prioria_core::KeyPair;
    use std::collections::BTreeMap;

    fn genesis() -> GenesisConfig {
        GenesisConfig { timestamp: 0 }
    }

    fn entries(sender: &KeyPair, start: u64, count: u64) -> Vec<LedgerEntry> {
        (start..start + count)
            .map(|nonce| {
                LedgerEntry::new_signed(
                    sender.public,
                    "recipient",
                    nonce,
                    BTreeMap::new(),
                    nonce,
                    &sender.secret,
                )
                .unwrap()
            })
            .collect()
    }

    fn grow(chain: &mut Blockchain, sender: &KeyPair, blocks: u64) {
        let proposer = KeyPair::generate();
        for i in 0..blocks {
            let block = chain
                .propose(entries(sender, i * 10, 2), proposer.public)
                .unwrap()
                .unwrap();
            chain.append(block).unwrap();
        }
    }

    #[test]
    fn test_genesis_only_chain_is_valid() {
        let chain = Blockchain::new(&genesis()).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.height(), 0);
        assert!(chain.validate());
    }

    #[test]
    fn test_sequential_appends_stay_valid() {
        let sender = KeyPair::generate();
        let mut chain = Blockchain::new(&genesis()).unwrap();
        grow(&mut chain, &sender, 4);
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.total_entries(), 8);
        assert!(chain.validate());
    }

    #[test]
    fn test_empty_proposal_is_none() {
        let chain = Blockchain::new(&genesis()).unwrap();
        let proposer = KeyPair::generate();
        assert!(chain.propose(Vec::new(), proposer.public).unwrap().is_none());
    }

    #[test]
    fn test_append_rejects_wrong_previous_hash() {
        let sender = KeyPair::generate();
        let mut chain = Blockchain::new(&genesis()).unwrap();
        let block = Block::new(
            1,
            Digest::new([9u8; 32]),
            entries(&sender, 0, 1),
            sender.public,
            1,
        )
        .unwrap();

        assert!(matches!(
            chain.append(block),
            Err(ChainError::PreviousHashMismatch { .. })
        ));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_append_rejects_index_gap() {
        let sender = KeyPair::generate();
        let mut chain = Blockchain::new(&genesis()).unwrap();
        let tip = chain.latest().hash;
        let block = Block::new(2, tip, entries(&sender, 0, 1), sender.public, 1).unwrap();

        assert!(matches!(
            chain.append(block),
            Err(ChainError::IndexMismatch {
                expected: 1,
                got: 2
            })
        ));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_append_rejects_tampered_block() {
        let sender = KeyPair::generate();
        let mut chain = Blockchain::new(&genesis()).unwrap();
        let mut block = chain
            .propose(entries(&sender, 0, 2), sender.public)
            .unwrap()
            .unwrap();
        block.entries[0].recipient = "mallory".to_string();

        assert!(matches!(
            chain.append(block),
            Err(ChainError::IntegrityMismatch { index: 1 })
        ));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_append_rejects_bad_entry_signature() {
        let sender = KeyPair::generate();
        let impostor = KeyPair::generate();
        let mut chain = Blockchain::new(&genesis()).unwrap();

        let mut forged = LedgerEntry::new(sender.public, "r", 1, BTreeMap::new(), 0).unwrap();
        forged.sign(&impostor.secret).unwrap();
        let block = chain
            .propose(vec![forged], sender.public)
            .unwrap()
            .unwrap();

        assert!(matches!(
            chain.append(block),
            Err(ChainError::InvalidEntry { index: 1, .. })
        ));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_corrupted_hash_fails_validation() {
        let sender = KeyPair::generate();
        let mut chain = Blockchain::new(&genesis()).unwrap();
        grow(&mut chain, &sender, 3);
        assert!(chain.validate());

        chain.blocks[2].hash = Digest::new([1u8; 32]);
        assert!(!chain.validate());
    }

    #[test]
    fn test_from_blocks_requires_valid_chain() {
        let sender = KeyPair::generate();
        let mut chain = Blockchain::new(&genesis()).unwrap();
        grow(&mut chain, &sender, 2);

        let restored = Blockchain::from_blocks(chain.blocks().to_vec(), &genesis()).unwrap();
        assert_eq!(restored.len(), 3);

        let mut broken = chain.blocks().to_vec();
        broken[1].entries.pop();
        assert!(Blockchain::from_blocks(broken, &genesis()).is_err());

        let other_genesis = GenesisConfig { timestamp: 99 };
        assert!(matches!(
            Blockchain::from_blocks(chain.blocks().to_vec(), &other_genesis),
            Err(ChainError::GenesisMismatch { .. })
        ));
        assert!(matches!(
            Blockchain::from_blocks(Vec::new(), &genesis()),
            Err(ChainError::MissingGenesis)
        ));
    }

    #[test]
    fn test_lookups_and_entry_proof() {
        let sender = KeyPair::generate();
        let mut chain = Blockchain::new(&genesis()).unwrap();
        grow(&mut chain, &sender, 3);

        let target = chain.block(2).unwrap().entries[1].id.clone();
        let (index, entry) = chain.find_entry(&target).unwrap();
        assert_eq!(index, 2);
        assert_eq!(entry.id, target);

        let proof = chain.entry_proof(&target).unwrap().unwrap();
        assert_eq!(proof.block_index, 2);
        assert!(proof.verify());

        assert!(chain.find_entry("nope").is_none());
        assert!(chain.entry_proof("nope").unwrap().is_none());
        assert!(chain.block(10).is_none());
        assert_eq!(chain.blocks_after(1).len(), 2);
        assert!(chain.blocks_after(10).is_empty());
    }

    #[test]
    fn test_export_and_stats() {
        let sender = KeyPair::generate();
        let mut chain = Blockchain::new(&genesis()).unwrap();
        grow(&mut chain, &sender, 2);

        let views = chain.export();
        assert_eq!(views.len(), 3);
        assert_eq!(views[1].entry_count, 2);
        assert_eq!(views[2].previous_hash, views[1].hash);

        let stats = chain.stats();
        assert_eq!(stats.length, 3);
        assert_eq!(stats.total_entries, 4);
        assert!(stats.valid);
    }
}
