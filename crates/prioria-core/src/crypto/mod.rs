pub mod hash;
pub mod keys;
pub mod signature;

pub use hash::{content_hash, hash_str, Digest};
pub use keys::{generate_keypair, KeyPair, PublicKey, SecretKey};
pub use signature::{sign, verify, Sig};
