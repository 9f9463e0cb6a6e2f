use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use prioria_consensus::{ConfigError, EngineConfig, FaultParams, ScoringConfig, ValidatorRegistry};
use prioria_core::{
    GenesisConfig, KeyPair, PriorityProfile, PriorityWeights, ProfileKind, PublicKey, TierTable,
    ValidatorRecord, ValidatorTier,
};
use prioria_mempool::MempoolConfig;
use serde::{Deserialize, Serialize};

/// Stake handed to generated validators, by tier rank
pub const DEFAULT_STAKES: [f64; 4] = [500.0, 300.0, 100.0, 50.0];

/// One member of the permissioned validator set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub id: String,
    /// Ed25519 public key (hex)
    pub pubkey: String,
    pub stake: f64,
    pub tier: ValidatorTier,
    /// Secret key (hex); only present for the local validator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Id of the local validator in `validators`
    pub node_id: String,

    /// Snapshot directory
    pub data_dir: PathBuf,

    /// RPC bind address
    pub rpc_addr: SocketAddr,

    /// Consensus round time in milliseconds
    pub round_time_ms: u64,

    /// Deployment profile
    #[serde(default)]
    pub profile: ProfileKind,

    /// Overrides the profile's priority weights
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_weights: Option<PriorityWeights>,

    pub validators: Vec<ValidatorConfig>,

    /// HTTP base URLs of the other validators
    #[serde(default)]
    pub peers: Vec<String>,

    /// Timeout for a single peer delivery in milliseconds
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub consensus: EngineConfig,

    /// Mempool capacity; unbounded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mempool_max_size: Option<usize>,

    #[serde(default)]
    pub genesis: GenesisConfig,
}

fn default_peer_timeout_ms() -> u64 {
    1000
}

impl NodeConfig {
    /// Load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the structural invariants. Any failure is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.validators.is_empty() {
            return Err(ConfigError::NoValidators.into());
        }
        if self.round_time_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "round_time_ms",
                reason: "must be at least 1 ms".to_string(),
            }
            .into());
        }

        let table = self.tier_table();
        let mut seen = HashSet::new();
        for validator in &self.validators {
            let pubkey = parse_pubkey(&validator.pubkey)
                .with_context(|| format!("validator {}", validator.id))?;
            if !seen.insert(pubkey) {
                return Err(ConfigError::DuplicateValidator(validator.pubkey.clone()).into());
            }
            if !table.contains(validator.tier) {
                return Err(ConfigError::InvalidValue {
                    field: "tier",
                    reason: format!(
                        "validator {} uses {:?}, profile {:?} has {} tiers",
                        validator.id,
                        validator.tier,
                        self.profile,
                        table.len()
                    ),
                }
                .into());
            }
            if validator.stake.is_nan() || validator.stake < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "stake",
                    reason: format!("validator {} has stake {}", validator.id, validator.stake),
                }
                .into());
            }
        }

        let weights = self.profile().weights;
        if !weights.is_normalized() {
            return Err(ConfigError::WeightSum {
                what: "Priority",
                sum: weights.sum(),
            }
            .into());
        }
        self.scoring.validate()?;
        self.consensus.validate()?;
        if let Some(f) = self.consensus.fault_tolerance {
            FaultParams::with_declared(self.validators.len(), f)?;
        }

        let keypair = self.local_keypair()?;
        let local = self.local_validator()?;
        if parse_pubkey(&local.pubkey)? != keypair.public {
            bail!(
                "Secret key of {} does not match its registered public key",
                self.node_id
            );
        }
        Ok(())
    }

    pub fn round_time(&self) -> Duration {
        Duration::from_millis(self.round_time_ms)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn tier_table(&self) -> TierTable {
        TierTable::for_profile(self.profile)
    }

    /// Priority profile with any configured weight override applied
    pub fn profile(&self) -> PriorityProfile {
        let profile = PriorityProfile::for_kind(self.profile);
        match self.priority_weights {
            Some(weights) => profile.with_weights(weights),
            None => profile,
        }
    }

    pub fn mempool_config(&self) -> MempoolConfig {
        MempoolConfig {
            max_size: self.mempool_max_size,
            profile: self.profile(),
        }
    }

    fn local_validator(&self) -> Result<&ValidatorConfig> {
        self.validators
            .iter()
            .find(|v| v.id == self.node_id)
            .ok_or_else(|| anyhow!("Node {} is not in the validator set", self.node_id))
    }

    /// Keypair of the local validator
    pub fn local_keypair(&self) -> Result<KeyPair> {
        let secret = self
            .local_validator()?
            .secret
            .as_deref()
            .ok_or_else(|| anyhow!("Validator {} has no secret key", self.node_id))?;
        KeyPair::from_secret_hex(secret).map_err(|e| anyhow!(e))
    }

    pub fn validator_records(&self) -> Result<Vec<ValidatorRecord>> {
        let table = self.tier_table();
        self.validators
            .iter()
            .map(|v| {
                Ok(ValidatorRecord::new(
                    v.id.clone(),
                    parse_pubkey(&v.pubkey)?,
                    v.stake,
                    v.tier,
                    &table,
                ))
            })
            .collect()
    }

    pub fn registry(&self) -> Result<ValidatorRegistry> {
        Ok(ValidatorRegistry::new(
            self.validator_records()?,
            self.scoring,
        )?)
    }
}

fn parse_pubkey(hex_str: &str) -> Result<PublicKey> {
    PublicKey::from_hex(hex_str).map_err(|e| anyhow!(e))
}

/// Spread `n` validators over the profile's tiers, most trusted first
pub fn sample_tier(position: usize, n: usize, table: &TierTable) -> ValidatorTier {
    let rank = position * table.len() / n.max(1);
    ValidatorTier::from_rank(rank).unwrap_or(ValidatorTier::Tier1)
}

/// Generate one configuration per validator of a fresh local network.
///
/// Node `i` listens on `base_port + i` and lists every other node as a peer.
pub fn generate_sample_configs(n: usize, profile: ProfileKind, base_port: u16) -> Vec<NodeConfig> {
    let table = TierTable::for_profile(profile);
    let keys: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate()).collect();
    let validators: Vec<ValidatorConfig> = keys
        .iter()
        .enumerate()
        .map(|(i, kp)| {
            let tier = sample_tier(i, n, &table);
            ValidatorConfig {
                id: format!("node-{}", i),
                pubkey: kp.public.to_hex(),
                stake: DEFAULT_STAKES[tier.rank().min(DEFAULT_STAKES.len() - 1)],
                tier,
                secret: None,
            }
        })
        .collect();
    let port = |i: usize| base_port.saturating_add(i as u16);

    (0..n)
        .map(|i| {
            let mut validators = validators.clone();
            validators[i].secret = Some(keys[i].secret.to_hex());
            NodeConfig {
                node_id: format!("node-{}", i),
                data_dir: PathBuf::from(format!("./prioria-data/node-{}", i)),
                rpc_addr: SocketAddr::from(([127, 0, 0, 1], port(i))),
                round_time_ms: 2000,
                profile,
                priority_weights: None,
                validators,
                peers: (0..n)
                    .filter(|&j| j != i)
                    .map(|j| format!("http://127.0.0.1:{}", port(j)))
                    .collect(),
                peer_timeout_ms: default_peer_timeout_ms(),
                scoring: ScoringConfig::default(),
                consensus: EngineConfig::default(),
                mempool_max_size: Some(10_000),
                genesis: GenesisConfig::default(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NodeConfig {
        generate_sample_configs(4, ProfileKind::General, 8080).remove(0)
    }

    fn config_error(err: &anyhow::Error) -> Option<&ConfigError> {
        err.downcast_ref::<ConfigError>()
    }

    #[test]
    fn test_sample_configs() {
        let configs = generate_sample_configs(4, ProfileKind::Healthcare, 9000);
        assert_eq!(configs.len(), 4);
        for (i, config) in configs.iter().enumerate() {
            config.validate().unwrap();
            assert_eq!(config.peers.len(), 3);
            assert_eq!(config.rpc_addr.port(), 9000 + i as u16);
            let secrets = config.validators.iter().filter(|v| v.secret.is_some()).count();
            assert_eq!(secrets, 1);
        }
        assert_eq!(configs[0].validators[0].tier, ValidatorTier::Tier1);
        assert_eq!(configs[0].validators[3].tier, ValidatorTier::Tier4);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        let config = sample();
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.node_id, config.node_id);
        assert_eq!(loaded.validators.len(), 4);
        assert_eq!(loaded.consensus, config.consensus);
        loaded.validate().unwrap();
    }

    #[test]
    fn test_sparse_file_uses_defaults() {
        let config = sample();
        let mut value = serde_json::to_value(&config).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("scoring");
        object.remove("consensus");
        object.remove("peers");

        let parsed: NodeConfig = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.scoring, ScoringConfig::default());
        assert_eq!(parsed.consensus.prepare_timeout_ms, 2000);
        assert!(parsed.peers.is_empty());
    }

    #[test]
    fn test_rejects_bad_weights() {
        let mut config = sample();
        config.scoring.weights.stake = 0.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(config_error(&err), Some(ConfigError::WeightSum { .. })));

        let mut config = sample();
        config.priority_weights = Some(PriorityWeights {
            alpha: 0.5,
            ..PriorityWeights::GENERAL
        });
        let err = config.validate().unwrap_err();
        assert!(matches!(
            config_error(&err),
            Some(ConfigError::WeightSum { what: "Priority", .. })
        ));
    }

    #[test]
    fn test_rejects_declared_faults_beyond_set() {
        let mut config = sample();
        config.consensus.fault_tolerance = Some(2);
        let err = config.validate().unwrap_err();
        assert_eq!(
            config_error(&err),
            Some(&ConfigError::InsufficientValidators { n: 4, f: 2 })
        );

        config.consensus.fault_tolerance = Some(1);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_unordered_thresholds() {
        let mut config = sample();
        config.consensus.adaptive.normal_threshold = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_mismatched_secret() {
        let mut config = sample();
        config.validators[0].secret = Some(KeyPair::generate().secret.to_hex());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("does not match"));

        let mut config = sample();
        config.node_id = "stranger".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicates_and_foreign_tiers() {
        let mut config = sample();
        config.validators[2].pubkey = config.validators[1].pubkey.clone();
        let err = config.validate().unwrap_err();
        assert!(matches!(config_error(&err), Some(ConfigError::DuplicateValidator(_))));

        let mut config = sample();
        config.validators[3].tier = ValidatorTier::Tier4;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            config_error(&err),
            Some(ConfigError::InvalidValue { field: "tier", .. })
        ));
    }

    #[test]
    fn test_registry_and_profile() {
        let mut config = sample();
        config.profile = ProfileKind::Healthcare;
        config.validators[3].tier = ValidatorTier::Tier4;

        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(config.profile().weights, PriorityWeights::HEALTHCARE);
        assert_eq!(config.mempool_config().max_size, Some(10_000));
        assert_eq!(config.local_keypair().unwrap().public.to_hex(), config.validators[0].pubkey);
    }
}
