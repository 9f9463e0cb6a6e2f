//! Prioria Core - Core types, cryptography, and serialization
//!
//! This crate provides the foundational types shared by every Prioria
//! crate: keys and signatures, the SHA-256 content hash, canonical JSON,
//! the Merkle engine, ledger entries with their priority profiles, blocks
//! and validator records.

pub mod crypto;
pub mod error;
pub mod merkle;
pub mod serialize;
pub mod time;
pub mod types;

pub use crypto::{content_hash, sign, verify, Digest, KeyPair, PublicKey, SecretKey, Sig};
pub use error::CoreError;
pub use types::*;
