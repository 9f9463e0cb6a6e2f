//! Quorum arithmetic.
//!
//! [`FaultParams`] is the safety quorum: `f = (n-1)/3` and `2f+1` matching
//! votes per phase. [`AdaptiveQuorum`] maps entry priority onto a tier that
//! sizes proposals and sets the weighted-support fraction reported after
//! finalization. It never lowers the `2f+1` count.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Byzantine fault parameters of a validator set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaultParams {
    pub n: usize,
    pub f: usize,
    pub quorum: usize,
}

impl FaultParams {
    /// Largest tolerable `f` for `n` validators
    pub fn for_validators(n: usize) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(ConfigError::NoValidators);
        }
        let f = (n - 1) / 3;
        Ok(FaultParams {
            n,
            f,
            quorum: 2 * f + 1,
        })
    }

    /// Use an explicitly declared `f`, rejecting sets that cannot carry it
    pub fn with_declared(n: usize, f: usize) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(ConfigError::NoValidators);
        }
        if n < 3 * f + 1 {
            return Err(ConfigError::InsufficientValidators { n, f });
        }
        Ok(FaultParams {
            n,
            f,
            quorum: 2 * f + 1,
        })
    }

    pub fn has_quorum(&self, votes: usize) -> bool {
        votes >= self.quorum
    }
}

/// Priority class of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Emergency,
    Normal,
    Routine,
}

/// Priority-tiered scheduling policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveQuorum {
    /// Priorities strictly above this are emergency
    pub emergency_threshold: f64,
    /// Priorities strictly above this (and not emergency) are normal
    pub normal_threshold: f64,
    pub emergency_fraction: f64,
    pub normal_fraction: f64,
    pub routine_fraction: f64,
    pub emergency_batch: usize,
    pub normal_batch: usize,
    pub routine_batch: usize,
}

impl Default for AdaptiveQuorum {
    fn default() -> Self {
        AdaptiveQuorum {
            emergency_threshold: 0.8,
            normal_threshold: 0.3,
            emergency_fraction: 0.51,
            normal_fraction: 0.67,
            routine_fraction: 0.75,
            emergency_batch: 100,
            normal_batch: 500,
            routine_batch: 1000,
        }
    }
}

impl AdaptiveQuorum {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 <= self.normal_threshold
            && self.normal_threshold < self.emergency_threshold
            && self.emergency_threshold <= 1.0;
        if !ordered {
            return Err(ConfigError::InvalidValue {
                field: "adaptive thresholds",
                reason: format!(
                    "need 0 <= normal ({}) < emergency ({}) <= 1",
                    self.normal_threshold, self.emergency_threshold
                ),
            });
        }

        for (field, fraction) in [
            ("emergency_fraction", self.emergency_fraction),
            ("normal_fraction", self.normal_fraction),
            ("routine_fraction", self.routine_fraction),
        ] {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{fraction} is outside (0, 1]"),
                });
            }
        }

        if self.emergency_batch == 0 || self.normal_batch == 0 || self.routine_batch == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch sizes",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn tier(&self, priority: f64) -> PriorityTier {
        if priority > self.emergency_threshold {
            PriorityTier::Emergency
        } else if priority > self.normal_threshold {
            PriorityTier::Normal
        } else {
            PriorityTier::Routine
        }
    }

    /// Required share of total validator score for a batch of this priority
    pub fn required_fraction(&self, priority: f64) -> f64 {
        match self.tier(priority) {
            PriorityTier::Emergency => self.emergency_fraction,
            PriorityTier::Normal => self.normal_fraction,
            PriorityTier::Routine => self.routine_fraction,
        }
    }

    /// Proposal size for a batch led by an entry of this priority
    pub fn batch_size(&self, priority: f64) -> usize {
        match self.tier(priority) {
            PriorityTier::Emergency => self.emergency_batch,
            PriorityTier::Normal => self.normal_batch,
            PriorityTier::Routine => self.routine_batch,
        }
    }
}
