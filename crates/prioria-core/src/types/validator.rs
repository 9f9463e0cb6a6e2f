use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::time::now_millis;
use crate::types::priority::ProfileKind;

/// Initial reputation of every validator
pub const INITIAL_REPUTATION: f64 = 1.0;

/// Initial uptime fraction of every validator
pub const INITIAL_UPTIME: f64 = 0.99;

/// Role class of a validator, from most to least trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorTier {
    Tier1,
    Tier2,
    Tier3,
    Tier4,
}

impl ValidatorTier {
    pub fn rank(&self) -> usize {
        match self {
            ValidatorTier::Tier1 => 0,
            ValidatorTier::Tier2 => 1,
            ValidatorTier::Tier3 => 2,
            ValidatorTier::Tier4 => 3,
        }
    }

    pub fn from_rank(rank: usize) -> Option<Self> {
        match rank {
            0 => Some(ValidatorTier::Tier1),
            1 => Some(ValidatorTier::Tier2),
            2 => Some(ValidatorTier::Tier3),
            3 => Some(ValidatorTier::Tier4),
            _ => None,
        }
    }
}

/// Default certification and latency target of one tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierProfile {
    pub label: &'static str,
    pub certification: f64,
    pub latency_ms: f64,
}

/// Tier defaults for a deployment, ordered from Tier1 down
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierTable {
    profiles: &'static [TierProfile],
}

const GENERAL_TIERS: [TierProfile; 3] = [
    TierProfile {
        label: "tier_1",
        certification: 1.0,
        latency_ms: 50.0,
    },
    TierProfile {
        label: "tier_2",
        certification: 0.7,
        latency_ms: 200.0,
    },
    TierProfile {
        label: "tier_3",
        certification: 0.4,
        latency_ms: 500.0,
    },
];

const HEALTHCARE_TIERS: [TierProfile; 4] = [
    TierProfile {
        label: "emergency",
        certification: 1.0,
        latency_ms: 50.0,
    },
    TierProfile {
        label: "specialist",
        certification: 0.85,
        latency_ms: 150.0,
    },
    TierProfile {
        label: "general_practice",
        certification: 0.65,
        latency_ms: 300.0,
    },
    TierProfile {
        label: "administrative",
        certification: 0.40,
        latency_ms: 1000.0,
    },
];

impl TierTable {
    pub const GENERAL: TierTable = TierTable {
        profiles: &GENERAL_TIERS,
    };

    pub const HEALTHCARE: TierTable = TierTable {
        profiles: &HEALTHCARE_TIERS,
    };

    pub fn for_profile(kind: ProfileKind) -> TierTable {
        match kind {
            ProfileKind::General => Self::GENERAL,
            ProfileKind::Healthcare => Self::HEALTHCARE,
        }
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn contains(&self, tier: ValidatorTier) -> bool {
        tier.rank() < self.profiles.len()
    }

    /// Profile of a tier; tiers beyond the table use its lowest tier
    pub fn profile(&self, tier: ValidatorTier) -> TierProfile {
        let last = self.profiles.len().saturating_sub(1);
        self.profiles[tier.rank().min(last)]
    }

    pub fn tiers(&self) -> impl Iterator<Item = ValidatorTier> + '_ {
        (0..self.profiles.len()).filter_map(ValidatorTier::from_rank)
    }
}

/// A validator's public record as tracked by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub id: String,
    pub pubkey: PublicKey,
    pub stake: f64,
    pub tier: ValidatorTier,
    /// Exponential moving average of vote outcomes, in [0, 1]
    pub reputation: f64,
    pub blocks_validated: u64,
    pub correct_votes: u64,
    pub incorrect_votes: u64,
    /// Unix milliseconds of the last recorded vote
    pub last_active: u64,
    pub latency_ms: f64,
    pub uptime: f64,
    pub certification: f64,
}

impl ValidatorRecord {
    /// New validator with the tier's default certification and latency
    pub fn new(
        id: impl Into<String>,
        pubkey: PublicKey,
        stake: f64,
        tier: ValidatorTier,
        table: &TierTable,
    ) -> Self {
        let profile = table.profile(tier);
        ValidatorRecord {
            id: id.into(),
            pubkey,
            stake,
            tier,
            reputation: INITIAL_REPUTATION,
            blocks_validated: 0,
            correct_votes: 0,
            incorrect_votes: 0,
            last_active: now_millis(),
            latency_ms: profile.latency_ms,
            uptime: INITIAL_UPTIME,
            certification: profile.certification,
        }
    }

    /// Feed one vote outcome into the reputation average
    pub fn record_vote(&mut self, correct: bool, decay: f64) {
        let outcome = if correct {
            self.correct_votes += 1;
            1.0
        } else {
            self.incorrect_votes += 1;
            0.0
        };
        self.reputation = (decay * self.reputation + (1.0 - decay) * outcome).clamp(0.0, 1.0);
        self.blocks_validated += 1;
        self.last_active = now_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tier: ValidatorTier, table: &TierTable) -> ValidatorRecord {
        ValidatorRecord::new("v", PublicKey::default(), 500.0, tier, table)
    }

    #[test]
    fn test_tier_defaults() {
        let v = record(ValidatorTier::Tier2, &TierTable::GENERAL);
        assert_eq!(v.certification, 0.7);
        assert_eq!(v.latency_ms, 200.0);
        assert_eq!(v.reputation, 1.0);

        let h = record(ValidatorTier::Tier4, &TierTable::HEALTHCARE);
        assert_eq!(h.certification, 0.40);
        assert_eq!(h.latency_ms, 1000.0);
    }

    #[test]
    fn test_tier_outside_table_uses_lowest() {
        assert!(!TierTable::GENERAL.contains(ValidatorTier::Tier4));
        let v = record(ValidatorTier::Tier4, &TierTable::GENERAL);
        assert_eq!(v.certification, 0.4);
        assert_eq!(TierTable::GENERAL.tiers().count(), 3);
    }

    #[test]
    fn test_reputation_ema() {
        let mut v = record(ValidatorTier::Tier1, &TierTable::GENERAL);
        v.record_vote(false, 0.7);
        assert!((v.reputation - 0.7).abs() < 1e-9);
        v.record_vote(false, 0.7);
        assert!((v.reputation - 0.49).abs() < 1e-9);
        v.record_vote(true, 0.7);
        assert!((v.reputation - 0.643).abs() < 1e-9);

        assert_eq!(v.correct_votes, 1);
        assert_eq!(v.incorrect_votes, 2);
        assert_eq!(v.blocks_validated, 3);
    }
}
