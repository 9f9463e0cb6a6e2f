//! Prioria Mempool - Priority-ordered entry pool
//!
//! Holds admitted, not-yet-finalized ledger entries ranked by the priority
//! computed at admission, and serves ordered batches for block proposal.

pub mod ordering;
pub mod pool;

pub use ordering::PriorityKey;
pub use pool::{Mempool, MempoolConfig, MempoolError, MempoolStats};
