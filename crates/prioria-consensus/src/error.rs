use std::fmt;

use prioria_core::Digest;
use thiserror::Error;

/// Voting phase a quorum wait belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotePhase {
    Prepare,
    Commit,
}

impl fmt::Display for VotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VotePhase::Prepare => write!(f, "prepare"),
            VotePhase::Commit => write!(f, "commit"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Timed out waiting for pre-prepare of block {index} in view {view}")]
    PrePrepareTimeout { index: u64, view: u64 },

    #[error("Timed out in {phase} for block {hash}: have {have} votes, need {need}")]
    QuorumTimeout {
        phase: VotePhase,
        hash: Digest,
        have: usize,
        need: usize,
    },

    #[error("Block {index} failed verification: {reason}")]
    VerificationFailed { index: u64, reason: String },

    #[error("Local key is not a registered validator")]
    NotAValidator,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Net(#[from] crate::net::NetError),

    #[error("Chain error: {0}")]
    Chain(#[from] prioria_chain::ChainError),

    #[error("Core error: {0}")]
    Core(#[from] prioria_core::CoreError),
}

impl ConsensusError {
    /// Liveness failures: the round is abandoned and may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConsensusError::PrePrepareTimeout { .. } | ConsensusError::QuorumTimeout { .. }
        )
    }
}

/// Structural configuration errors, fatal at startup
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{what} weights sum to {sum:.4}, expected 1.0")]
    WeightSum { what: &'static str, sum: f64 },

    #[error("{n} validators cannot tolerate {f} faults (need n >= 3f+1)")]
    InsufficientValidators { n: usize, f: usize },

    #[error("Validator set is empty")]
    NoValidators,

    #[error("Duplicate validator key {0}")]
    DuplicateValidator(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
