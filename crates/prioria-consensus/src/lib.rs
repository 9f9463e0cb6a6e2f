//! Prioria Consensus - PBFT agreement over the priority mempool
//!
//! This crate provides the validator registry and its trust scoring, quorum
//! arithmetic, signed PBFT messages, vote logs, the round-driving engine and
//! the peer transport boundary.

pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod net;
pub mod quorum;
pub mod registry;
pub mod votes;

pub use engine::{
    EngineConfig, HandleOutcome, IgnoreReason, NodeStats, PbftEngine, Phase, RoundOutcome,
};
pub use error::{ConfigError, ConsensusError, VotePhase};
pub use events::FinalizationSink;
pub use message::{NetMessage, PbftKind, PbftMessage};
pub use net::{Envelope, HttpTransport, HubEndpoint, Inbox, LocalHub, NetError, Transport};
pub use quorum::{AdaptiveQuorum, FaultParams, PriorityTier};
pub use registry::{ScoreWeights, ScoredValidator, ScoringConfig, ValidatorRegistry};
pub use votes::{PrePrepareLog, VoteLog, VoteStatus};
