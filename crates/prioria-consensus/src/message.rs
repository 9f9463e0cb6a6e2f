use prioria_core::serialize;
use prioria_core::time::now_millis;
use prioria_core::{sign, verify, Block, CoreError, Digest, KeyPair, LedgerEntry, PublicKey, Sig};
use serde::{Deserialize, Serialize};

/// Phase a PBFT message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PbftKind {
    PrePrepare,
    Prepare,
    Commit,
}

/// A signed PBFT protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PbftMessage {
    pub kind: PbftKind,
    pub view: u64,
    pub block_index: u64,
    pub block_hash: Digest,
    /// Carried by pre-prepare only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
    pub sender: PublicKey,
    /// Unix milliseconds
    pub timestamp: u64,
    pub signature: Sig,
}

/// Fields covered by the sender's signature; the block is bound through its hash
#[derive(Serialize)]
struct SignedFields<'a> {
    kind: PbftKind,
    view: u64,
    block_index: u64,
    block_hash: &'a Digest,
    sender: &'a PublicKey,
    timestamp: u64,
}

impl PbftMessage {
    fn build(
        kind: PbftKind,
        view: u64,
        block_index: u64,
        block_hash: Digest,
        block: Option<Block>,
        keypair: &KeyPair,
    ) -> Result<Self, CoreError> {
        let mut message = PbftMessage {
            kind,
            view,
            block_index,
            block_hash,
            block,
            sender: keypair.public,
            timestamp: now_millis(),
            signature: Sig::default(),
        };
        message.signature = sign(&keypair.secret, &message.signing_bytes()?);
        Ok(message)
    }

    pub fn pre_prepare(view: u64, block: &Block, keypair: &KeyPair) -> Result<Self, CoreError> {
        Self::build(
            PbftKind::PrePrepare,
            view,
            block.index,
            block.hash,
            Some(block.clone()),
            keypair,
        )
    }

    pub fn vote(
        kind: PbftKind,
        view: u64,
        block_index: u64,
        block_hash: Digest,
        keypair: &KeyPair,
    ) -> Result<Self, CoreError> {
        Self::build(kind, view, block_index, block_hash, None, keypair)
    }

    pub fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_canonical_bytes(&SignedFields {
            kind: self.kind,
            view: self.view,
            block_index: self.block_index,
            block_hash: &self.block_hash,
            sender: &self.sender,
            timestamp: self.timestamp,
        })
    }

    pub fn verify_signature(&self) -> Result<(), CoreError> {
        verify(&self.sender, &self.signing_bytes()?, &self.signature)
    }

    /// Whether a carried block matches the signed header fields
    pub fn block_matches(&self) -> bool {
        match &self.block {
            Some(block) => block.hash == self.block_hash && block.index == self.block_index,
            None => self.kind != PbftKind::PrePrepare,
        }
    }
}

/// Everything that travels between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetMessage {
    Transaction { entry: LedgerEntry, from: String },
    /// A finalized block with the signed commits that finalized it
    Block {
        block: Block,
        #[serde(default)]
        certificate: Vec<PbftMessage>,
        from: String,
    },
    PrePrepare(PbftMessage),
    Prepare(PbftMessage),
    Commit(PbftMessage),
    SyncRequest { from: String, from_index: u64 },
}

impl NetMessage {
    pub fn from_pbft(message: PbftMessage) -> Self {
        match message.kind {
            PbftKind::PrePrepare => NetMessage::PrePrepare(message),
            PbftKind::Prepare => NetMessage::Prepare(message),
            PbftKind::Commit => NetMessage::Commit(message),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            NetMessage::Transaction { .. } => "TRANSACTION",
            NetMessage::Block { .. } => "BLOCK",
            NetMessage::PrePrepare(_) => "PRE_PREPARE",
            NetMessage::Prepare(_) => "PREPARE",
            NetMessage::Commit(_) => "COMMIT",
            NetMessage::SyncRequest { .. } => "SYNC_REQUEST",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prioria_core::GenesisConfig;

    fn genesis() -> Block {
        Block::genesis(&GenesisConfig::default()).unwrap()
    }

    #[test]
    fn test_signed_vote_verifies() {
        let kp = KeyPair::generate();
        let msg = PbftMessage::vote(PbftKind::Prepare, 3, 1, Digest::new([4u8; 32]), &kp).unwrap();
        assert!(msg.verify_signature().is_ok());
        assert!(msg.block_matches());
    }

    #[test]
    fn test_altered_vote_fails() {
        let kp = KeyPair::generate();
        let mut msg =
            PbftMessage::vote(PbftKind::Commit, 0, 1, Digest::new([4u8; 32]), &kp).unwrap();
        msg.block_hash = Digest::new([5u8; 32]);
        assert!(msg.verify_signature().is_err());

        let mut relabeled =
            PbftMessage::vote(PbftKind::Prepare, 0, 1, Digest::new([4u8; 32]), &kp).unwrap();
        relabeled.kind = PbftKind::Commit;
        assert!(relabeled.verify_signature().is_err());
    }

    #[test]
    fn test_pre_prepare_binds_block() {
        let kp = KeyPair::generate();
        let block = genesis();
        let mut msg = PbftMessage::pre_prepare(0, &block, &kp).unwrap();
        assert!(msg.block_matches());

        let mut swapped = block.clone();
        swapped.timestamp = 77;
        msg.block = Some(swapped);
        // Signature still holds, but the block no longer matches the signed hash
        assert!(msg.verify_signature().is_ok());
        assert!(!msg.block_matches());

        msg.block = None;
        assert!(!msg.block_matches());
    }

    #[test]
    fn test_wire_tags() {
        let kp = KeyPair::generate();
        let vote = PbftMessage::vote(PbftKind::Commit, 0, 1, Digest::ZERO, &kp).unwrap();
        let json = serde_json::to_value(NetMessage::from_pbft(vote)).unwrap();
        assert_eq!(json["type"], "COMMIT");
        assert_eq!(json["kind"], "COMMIT");
        assert!(json.get("block").is_none());

        let sync = NetMessage::SyncRequest {
            from: "node-1".to_string(),
            from_index: 4,
        };
        let json = serde_json::to_string(&sync).unwrap();
        assert_eq!(
            json,
            r#"{"type":"SYNC_REQUEST","from":"node-1","from_index":4}"#
        );
        let back: NetMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sync);
        assert_eq!(back.kind_name(), "SYNC_REQUEST");
    }
}
