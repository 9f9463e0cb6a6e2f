//! Validator registry and composite trust scoring (v-score).

use std::collections::HashMap;

use prioria_core::{PublicKey, ValidatorRecord, WEIGHT_SUM_TOLERANCE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Weights of the five v-score factors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub stake: f64,
    pub reputation: f64,
    pub latency: f64,
    pub certification: f64,
    pub uptime: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            stake: 0.25,
            reputation: 0.35,
            latency: 0.15,
            certification: 0.15,
            uptime: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.stake + self.reputation + self.latency + self.certification + self.uptime
    }
}

/// Scoring and reputation policy for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub weights: ScoreWeights,
    /// Stake at which the stake factor saturates
    pub max_stake: f64,
    /// EMA decay applied on every recorded vote
    pub reputation_decay: f64,
    /// Validators below this reputation have their votes disregarded
    pub min_reputation: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            weights: ScoreWeights::default(),
            max_stake: 1_000_000.0,
            reputation_decay: 0.7,
            min_reputation: 0.1,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum {
                what: "Validator score",
                sum,
            });
        }
        if self.max_stake <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "max_stake",
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.reputation_decay) {
            return Err(ConfigError::InvalidValue {
                field: "reputation_decay",
                reason: "must be within [0, 1]".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_reputation) {
            return Err(ConfigError::InvalidValue {
                field: "min_reputation",
                reason: "must be within [0, 1]".to_string(),
            });
        }
        Ok(())
    }

    /// Composite trust score in [0, 1]
    pub fn score(&self, validator: &ValidatorRecord) -> f64 {
        let w = &self.weights;
        let stake = (validator.stake / self.max_stake).clamp(0.0, 1.0);
        let latency = 1.0 / (1.0 + validator.latency_ms.max(0.0));
        let score = w.stake * stake
            + w.reputation * validator.reputation
            + w.latency * latency
            + w.certification * validator.certification
            + w.uptime * validator.uptime;
        score.clamp(0.0, 1.0)
    }
}

/// A validator record paired with its current score
#[derive(Debug, Clone, Serialize)]
pub struct ScoredValidator {
    #[serde(flatten)]
    pub record: ValidatorRecord,
    pub v_score: f64,
    pub eligible: bool,
}

/// The validator set in rotation order, owned by one node
#[derive(Debug, Clone)]
pub struct ValidatorRegistry {
    config: ScoringConfig,
    validators: Vec<ValidatorRecord>,
    index: HashMap<PublicKey, usize>,
}

impl ValidatorRegistry {
    pub fn new(validators: Vec<ValidatorRecord>, config: ScoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if validators.is_empty() {
            return Err(ConfigError::NoValidators);
        }

        let mut index = HashMap::with_capacity(validators.len());
        for (position, validator) in validators.iter().enumerate() {
            if index.insert(validator.pubkey, position).is_some() {
                return Err(ConfigError::DuplicateValidator(validator.pubkey.to_hex()));
            }
        }

        Ok(ValidatorRegistry {
            config,
            validators,
            index,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn validators(&self) -> &[ValidatorRecord] {
        &self.validators
    }

    pub fn pubkeys(&self) -> Vec<PublicKey> {
        self.validators.iter().map(|v| v.pubkey).collect()
    }

    pub fn get(&self, pubkey: &PublicKey) -> Option<&ValidatorRecord> {
        self.index.get(pubkey).map(|&i| &self.validators[i])
    }

    pub fn contains(&self, pubkey: &PublicKey) -> bool {
        self.index.contains_key(pubkey)
    }

    /// Round-robin primary for a view
    pub fn primary(&self, view: u64) -> &ValidatorRecord {
        let position = (view % self.validators.len() as u64) as usize;
        &self.validators[position]
    }

    pub fn is_primary(&self, pubkey: &PublicKey, view: u64) -> bool {
        self.primary(view).pubkey == *pubkey
    }

    pub fn score(&self, validator: &ValidatorRecord) -> f64 {
        self.config.score(validator)
    }

    pub fn score_of(&self, pubkey: &PublicKey) -> Option<f64> {
        self.get(pubkey).map(|v| self.score(v))
    }

    /// Whether the validator's votes count toward quorum
    pub fn is_eligible(&self, pubkey: &PublicKey) -> bool {
        self.get(pubkey)
            .is_some_and(|v| v.reputation >= self.config.min_reputation)
    }

    pub fn total_score(&self) -> f64 {
        self.validators.iter().map(|v| self.score(v)).sum()
    }

    /// Share of total score held by `voters`, in [0, 1]
    pub fn support<'a>(&self, voters: impl IntoIterator<Item = &'a PublicKey>) -> f64 {
        let total = self.total_score();
        if total <= 0.0 {
            return 0.0;
        }
        let backing: f64 = voters.into_iter().filter_map(|pk| self.score_of(pk)).sum();
        (backing / total).clamp(0.0, 1.0)
    }

    /// Record a vote outcome; false if the key is not registered
    pub fn record_vote(&mut self, pubkey: &PublicKey, correct: bool) -> bool {
        let decay = self.config.reputation_decay;
        let Some(&position) = self.index.get(pubkey) else {
            return false;
        };
        let validator = &mut self.validators[position];
        validator.record_vote(correct, decay);
        debug!(
            "Validator {} vote recorded (correct: {}), reputation {:.3}",
            validator.id, correct, validator.reputation
        );
        true
    }

    /// Replace mutable counters from a saved snapshot, matching by key
    pub fn restore(&mut self, saved: &[ValidatorRecord]) -> usize {
        let mut restored = 0;
        for record in saved {
            if let Some(&position) = self.index.get(&record.pubkey) {
                let current = &mut self.validators[position];
                current.reputation = record.reputation;
                current.blocks_validated = record.blocks_validated;
                current.correct_votes = record.correct_votes;
                current.incorrect_votes = record.incorrect_votes;
                current.last_active = record.last_active;
                current.uptime = record.uptime;
                restored += 1;
            }
        }
        restored
    }

    pub fn scored(&self) -> Vec<ScoredValidator> {
        self.validators
            .iter()
            .map(|v| ScoredValidator {
                record: v.clone(),
                v_score: self.score(v),
                eligible: v.reputation >= self.config.min_reputation,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prioria_core::{KeyPair, TierTable, ValidatorTier};

    fn registry(tiers: &[ValidatorTier]) -> ValidatorRegistry {
        let validators = tiers
            .iter()
            .enumerate()
            .map(|(i, tier)| {
                ValidatorRecord::new(
                    format!("v{i}"),
                    KeyPair::generate().public,
                    500.0,
                    *tier,
                    &TierTable::GENERAL,
                )
            })
            .collect();
        ValidatorRegistry::new(validators, ScoringConfig::default()).unwrap()
    }

    #[test]
    fn test_default_weights_validate() {
        assert!(ScoringConfig::default().validate().is_ok());

        let mut config = ScoringConfig::default();
        config.weights.stake = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeightSum { .. })
        ));

        // Within tolerance
        config.weights.stake = 0.255;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_score_formula() {
        let config = ScoringConfig::default();
        let mut v = ValidatorRecord::new(
            "v",
            PublicKey::default(),
            2_000_000.0,
            ValidatorTier::Tier1,
            &TierTable::GENERAL,
        );
        v.latency_ms = 0.0;
        v.uptime = 1.0;
        // Saturated stake, full reputation, zero latency, full certification and uptime
        assert!((config.score(&v) - 1.0).abs() < 1e-9);

        v.stake = 0.0;
        v.reputation = 0.0;
        v.latency_ms = 50.0;
        v.certification = 0.0;
        v.uptime = 0.0;
        assert!((config.score(&v) - 0.15 / 51.0).abs() < 1e-9);
    }

    #[test]
    fn test_higher_tier_scores_higher() {
        let reg = registry(&[ValidatorTier::Tier1, ValidatorTier::Tier3]);
        let a = reg.score(&reg.validators()[0]);
        let b = reg.score(&reg.validators()[1]);
        assert!(a > b);
    }

    #[test]
    fn test_round_robin_primary() {
        let reg = registry(&[ValidatorTier::Tier1; 4]);
        for view in 0..8u64 {
            let expected = reg.validators()[(view % 4) as usize].pubkey;
            assert_eq!(reg.primary(view).pubkey, expected);
            assert!(reg.is_primary(&expected, view));
        }
    }

    #[test]
    fn test_record_vote_and_eligibility() {
        let mut reg = registry(&[ValidatorTier::Tier2; 4]);
        let pk = reg.validators()[1].pubkey;
        assert!(reg.is_eligible(&pk));

        for _ in 0..7 {
            assert!(reg.record_vote(&pk, false));
        }
        // 0.7^7 is about 0.082
        assert!(!reg.is_eligible(&pk));
        assert!(reg.contains(&pk));
        assert_eq!(reg.get(&pk).unwrap().incorrect_votes, 7);

        assert!(!reg.record_vote(&KeyPair::generate().public, true));
    }

    #[test]
    fn test_support_fraction() {
        let reg = registry(&[ValidatorTier::Tier1; 4]);
        let keys = reg.pubkeys();
        assert!((reg.support(&keys) - 1.0).abs() < 1e-9);
        assert!((reg.support(&keys[..2]) - 0.5).abs() < 1e-9);
        assert_eq!(reg.support(&Vec::<PublicKey>::new()), 0.0);
    }

    #[test]
    fn test_rejects_bad_sets() {
        assert!(matches!(
            ValidatorRegistry::new(Vec::new(), ScoringConfig::default()),
            Err(ConfigError::NoValidators)
        ));

        let v = ValidatorRecord::new(
            "dup",
            PublicKey::default(),
            1.0,
            ValidatorTier::Tier1,
            &TierTable::GENERAL,
        );
        assert!(matches!(
            ValidatorRegistry::new(vec![v.clone(), v], ScoringConfig::default()),
            Err(ConfigError::DuplicateValidator(_))
        ));
    }

    #[test]
    fn test_restore_counters() {
        let mut reg = registry(&[ValidatorTier::Tier1; 2]);
        let mut saved = reg.validators().to_vec();
        saved[0].reputation = 0.4;
        saved[0].correct_votes = 9;

        assert_eq!(reg.restore(&saved), 2);
        assert_eq!(reg.validators()[0].reputation, 0.4);
        assert_eq!(reg.validators()[0].correct_votes, 9);
    }
}
