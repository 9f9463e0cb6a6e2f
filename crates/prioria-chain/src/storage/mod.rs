pub mod memory;
pub mod persistent;

use prioria_core::{Block, LedgerEntry, ValidatorRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// Snapshot names
pub mod snapshots {
    pub const CHAIN: &str = "chain";
    pub const MEMPOOL: &str = "mempool";
    pub const VALIDATORS: &str = "validators";
}

/// Persistence boundary for chain, mempool and validator snapshots.
///
/// Implementations store opaque named snapshots; each write replaces the
/// previous snapshot of that name as a whole.
pub trait Storage: Send + Sync {
    /// Read a snapshot, `None` if it was never written
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace a snapshot
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;

    fn save_chain(&self, blocks: &[Block]) -> Result<(), StorageError> {
        write_json(self, snapshots::CHAIN, blocks)
    }

    fn load_chain(&self) -> Result<Option<Vec<Block>>, StorageError> {
        read_json(self, snapshots::CHAIN)
    }

    fn save_mempool(&self, entries: &[LedgerEntry]) -> Result<(), StorageError> {
        write_json(self, snapshots::MEMPOOL, entries)
    }

    fn load_mempool(&self) -> Result<Option<Vec<LedgerEntry>>, StorageError> {
        read_json(self, snapshots::MEMPOOL)
    }

    fn save_validators(&self, validators: &[ValidatorRecord]) -> Result<(), StorageError> {
        write_json(self, snapshots::VALIDATORS, validators)
    }

    fn load_validators(&self) -> Result<Option<Vec<ValidatorRecord>>, StorageError> {
        read_json(self, snapshots::VALIDATORS)
    }
}

fn write_json<S, T>(storage: &S, name: &str, value: &T) -> Result<(), StorageError>
where
    S: Storage + ?Sized,
    T: Serialize + ?Sized,
{
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    storage.write(name, &bytes)
}

fn read_json<S, T>(storage: &S, name: &str) -> Result<Option<T>, StorageError>
where
    S: Storage + ?Sized,
    T: DeserializeOwned,
{
    match storage.read(name)? {
        Some(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Serialization(e.to_string())),
        _ => Ok(None),
    }
}

pub use memory::MemoryStorage;
pub use persistent::FileStorage;
