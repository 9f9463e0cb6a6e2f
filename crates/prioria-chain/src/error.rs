use prioria_core::Digest;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Previous hash mismatch: expected {expected}, got {got}")]
    PreviousHashMismatch { expected: Digest, got: Digest },

    #[error("Index mismatch: expected {expected}, got {got}")]
    IndexMismatch { expected: u64, got: u64 },

    #[error("Block {index} failed its integrity check")]
    IntegrityMismatch { index: u64 },

    #[error("Block {index} carries invalid entry {entry_id}: {reason}")]
    InvalidEntry {
        index: u64,
        entry_id: String,
        reason: String,
    },

    #[error("Chain has no genesis block")]
    MissingGenesis,

    #[error("Genesis block mismatch: expected {expected}, got {got}")]
    GenesisMismatch { expected: Digest, got: Digest },

    #[error("Core error: {0}")]
    Core(#[from] prioria_core::CoreError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage lock poisoned")]
    Poisoned,
}
