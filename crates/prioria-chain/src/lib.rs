//! Prioria Chain - Block chain and persistence
//!
//! This crate provides the hash-linked block chain with its integrity
//! checks, and the storage boundary used to snapshot chain, mempool and
//! validator state.

pub mod chain;
pub mod error;
pub mod storage;

pub use chain::{BlockView, Blockchain, ChainStats, EntryProof};
pub use error::{ChainError, StorageError};
pub use storage::{FileStorage, MemoryStorage, Storage};
