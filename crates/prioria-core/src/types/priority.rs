//! Priority scoring for ledger entries.
//!
//! `P = alpha*f1 + beta*f2 + gamma*f3 + delta*f4` where the inputs are
//! criticality, time sensitivity, resource availability and risk. A
//! [`PriorityProfile`] supplies the weights, the keyword escalation rules and
//! the way each [`EntryKind`] maps onto the four inputs.

use serde::{Deserialize, Serialize};

use crate::types::entry::{EntryKind, LedgerEntry};

/// Allowed distance between a weight sum and 1.0
pub const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Default input used when a generic payload does not carry a signal
pub const DEFAULT_SIGNAL: f64 = 0.5;

/// Default resource availability assumed for every entry
pub const DEFAULT_RESOURCE_AVAILABILITY: f64 = 0.8;

/// One of the four priority inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Criticality,
    TimeSensitivity,
    ResourceAvailability,
    Risk,
}

/// Weights of the priority formula
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityWeights {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub delta: f64,
}

impl PriorityWeights {
    pub const GENERAL: PriorityWeights = PriorityWeights {
        alpha: 0.30,
        beta: 0.40,
        gamma: 0.15,
        delta: 0.15,
    };

    pub const HEALTHCARE: PriorityWeights = PriorityWeights {
        alpha: 0.45,
        beta: 0.35,
        gamma: 0.10,
        delta: 0.10,
    };

    pub fn sum(&self) -> f64 {
        self.alpha + self.beta + self.gamma + self.delta
    }

    /// Whether the weights sum to 1.0 within [`WEIGHT_SUM_TOLERANCE`]
    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }
}

/// The four inputs, each expected in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityInputs {
    pub criticality: f64,
    pub time_sensitivity: f64,
    pub resource_availability: f64,
    pub risk: f64,
}

impl PriorityInputs {
    fn clamped(self) -> Self {
        PriorityInputs {
            criticality: clamp_unit(self.criticality),
            time_sensitivity: clamp_unit(self.time_sensitivity),
            resource_availability: clamp_unit(self.resource_availability),
            risk: clamp_unit(self.risk),
        }
    }

    fn factor_mut(&mut self, factor: Factor) -> &mut f64 {
        match factor {
            Factor::Criticality => &mut self.criticality,
            Factor::TimeSensitivity => &mut self.time_sensitivity,
            Factor::ResourceAvailability => &mut self.resource_availability,
            Factor::Risk => &mut self.risk,
        }
    }

    pub fn weighted(&self, weights: &PriorityWeights) -> f64 {
        weights.alpha * self.criticality
            + weights.beta * self.time_sensitivity
            + weights.gamma * self.resource_availability
            + weights.delta * self.risk
    }
}

/// Boost a factor when any trigger term appears in the entry's text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub factor: Factor,
    pub keywords: Vec<String>,
    pub boost: f64,
}

impl KeywordRule {
    pub fn new(factor: Factor, keywords: &[&str], boost: f64) -> Self {
        KeywordRule {
            factor,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            boost,
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

/// Deployment profile names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    #[default]
    General,
    Healthcare,
}

/// Weights, escalation rules and input mapping for one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityProfile {
    pub kind: ProfileKind,
    pub weights: PriorityWeights,
    pub resource_availability: f64,
    #[serde(default)]
    pub escalation: Vec<KeywordRule>,
}

impl PriorityProfile {
    pub fn general() -> Self {
        PriorityProfile {
            kind: ProfileKind::General,
            weights: PriorityWeights::GENERAL,
            resource_availability: DEFAULT_RESOURCE_AVAILABILITY,
            escalation: Vec::new(),
        }
    }

    pub fn healthcare() -> Self {
        PriorityProfile {
            kind: ProfileKind::Healthcare,
            weights: PriorityWeights::HEALTHCARE,
            resource_availability: DEFAULT_RESOURCE_AVAILABILITY,
            escalation: vec![
                KeywordRule::new(
                    Factor::Criticality,
                    &["cardiac arrest", "sepsis", "code", "critical", "emergency"],
                    0.2,
                ),
                KeywordRule::new(
                    Factor::TimeSensitivity,
                    &["immediately", "asap", "stat", "urgent"],
                    0.15,
                ),
            ],
        }
    }

    pub fn for_kind(kind: ProfileKind) -> Self {
        match kind {
            ProfileKind::General => Self::general(),
            ProfileKind::Healthcare => Self::healthcare(),
        }
    }

    pub fn with_weights(mut self, weights: PriorityWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Raw inputs for an entry, before clamping and escalation
    pub fn inputs(&self, entry: &LedgerEntry) -> PriorityInputs {
        match &entry.kind {
            EntryKind::Generic => PriorityInputs {
                criticality: signal(entry, &["severity", "criticality"]),
                time_sensitivity: signal(entry, &["urgency", "time_sensitivity"]),
                resource_availability: self.resource_availability,
                risk: signal(entry, &["risk", "compliance_risk"]),
            },
            EntryKind::Medical { record_type, .. } => {
                let base = record_type.base_scores();
                PriorityInputs {
                    criticality: base.criticality,
                    time_sensitivity: base.time_sensitivity,
                    resource_availability: self.resource_availability,
                    risk: base.compliance_risk,
                }
            }
        }
    }

    /// Clamped, escalated inputs that feed the formula
    pub fn effective_inputs(&self, entry: &LedgerEntry) -> PriorityInputs {
        let mut inputs = self.inputs(entry).clamped();
        if self.escalation.is_empty() {
            return inputs;
        }

        let text = entry.escalation_text();
        for rule in self.escalation.iter().filter(|r| r.matches(&text)) {
            let value = inputs.factor_mut(rule.factor);
            *value = (*value + rule.boost).min(1.0);
        }
        inputs
    }

    /// Priority in [0, 1]
    pub fn score(&self, entry: &LedgerEntry) -> f64 {
        clamp_unit(self.effective_inputs(entry).weighted(&self.weights))
    }
}

impl Default for PriorityProfile {
    fn default() -> Self {
        Self::general()
    }
}

/// Operational band of a priority value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBand {
    Critical,
    Urgent,
    Routine,
    Administrative,
}

impl PriorityBand {
    pub fn of(priority: f64) -> Self {
        if priority > 0.85 {
            PriorityBand::Critical
        } else if priority > 0.60 {
            PriorityBand::Urgent
        } else if priority > 0.30 {
            PriorityBand::Routine
        } else {
            PriorityBand::Administrative
        }
    }
}

fn signal(entry: &LedgerEntry, keys: &[&str]) -> f64 {
    keys.iter()
        .find_map(|key| entry.payload_f64(key))
        .unwrap_or(DEFAULT_SIGNAL)
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::types::entry::MedicalRecordType;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn generic(pairs: &[(&str, Value)]) -> LedgerEntry {
        let payload = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        LedgerEntry::new(KeyPair::generate().public, "r", 0, payload, 0).unwrap()
    }

    fn medical(record_type: MedicalRecordType, data: Value) -> LedgerEntry {
        let data: BTreeMap<String, Value> = serde_json::from_value(data).unwrap();
        LedgerEntry::medical(KeyPair::generate().public, record_type, "P", "D", "F", data).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_default_weights_are_normalized() {
        assert!(PriorityWeights::GENERAL.is_normalized());
        assert!(PriorityWeights::HEALTHCARE.is_normalized());

        let skewed = PriorityWeights {
            alpha: 0.5,
            beta: 0.5,
            gamma: 0.5,
            delta: 0.0,
        };
        assert!(!skewed.is_normalized());
    }

    #[test]
    fn test_general_formula() {
        let profile = PriorityProfile::general();
        let entry = generic(&[
            ("severity", json!(1.0)),
            ("urgency", json!(1.0)),
            ("risk", json!(0.0)),
        ]);
        // 0.30*1 + 0.40*1 + 0.15*0.8 + 0.15*0
        assert!(approx(profile.score(&entry), 0.82));
    }

    #[test]
    fn test_missing_signals_default() {
        let profile = PriorityProfile::general();
        let entry = generic(&[]);
        // 0.30*0.5 + 0.40*0.5 + 0.15*0.8 + 0.15*0.5
        assert!(approx(profile.score(&entry), 0.545));
    }

    #[test]
    fn test_inputs_are_clamped() {
        let profile = PriorityProfile::general();
        let entry = generic(&[
            ("severity", json!(7.0)),
            ("urgency", json!(-3.0)),
            ("risk", json!(2.0)),
        ]);
        let inputs = profile.effective_inputs(&entry);
        assert_eq!(inputs.criticality, 1.0);
        assert_eq!(inputs.time_sensitivity, 0.0);
        assert_eq!(inputs.risk, 1.0);
        assert!(profile.score(&entry) <= 1.0);
    }

    #[test]
    fn test_general_profile_does_not_escalate() {
        let profile = PriorityProfile::general();
        let plain = generic(&[("note", json!("routine"))]);
        let loud = generic(&[("note", json!("EMERGENCY asap"))]);
        assert!(approx(profile.score(&plain), profile.score(&loud)));
    }

    #[test]
    fn test_healthcare_escalation() {
        let profile = PriorityProfile::healthcare();
        let calm = medical(MedicalRecordType::LabResult, json!({"result": "normal"}));
        let alarm = medical(
            MedicalRecordType::LabResult,
            json!({"result": "suspected sepsis", "action": "treat immediately"}),
        );

        let calm_inputs = profile.effective_inputs(&calm);
        let alarm_inputs = profile.effective_inputs(&alarm);
        assert!(approx(calm_inputs.criticality, 0.50));
        assert!(approx(alarm_inputs.criticality, 0.70));
        assert!(approx(alarm_inputs.time_sensitivity, 0.55));
        assert!(profile.score(&alarm) > profile.score(&calm));
    }

    #[test]
    fn test_escalation_matches_keys() {
        let profile = PriorityProfile::healthcare();
        let keyed = medical(MedicalRecordType::LabResult, json!({"result_status": "final"}));
        let inputs = profile.effective_inputs(&keyed);
        assert!(approx(inputs.criticality, 0.50));
        assert!(approx(inputs.time_sensitivity, 0.55));
    }

    #[test]
    fn test_escalation_capped_at_one() {
        let profile = PriorityProfile::healthcare();
        let entry = medical(
            MedicalRecordType::EmergencyVisit,
            json!({"notes": "cardiac arrest, code blue", "urgency": "STAT"}),
        );
        let inputs = profile.effective_inputs(&entry);
        assert_eq!(inputs.criticality, 1.0);
        assert_eq!(inputs.time_sensitivity, 1.0);
        assert!(profile.score(&entry) <= 1.0);
    }

    #[test]
    fn test_record_type_ordering() {
        let profile = PriorityProfile::healthcare();
        let emergency = medical(MedicalRecordType::EmergencyVisit, json!({}));
        let claim = medical(MedicalRecordType::InsuranceClaim, json!({}));
        assert!(profile.score(&emergency) > profile.score(&claim));
        assert_eq!(PriorityBand::of(profile.score(&emergency)), PriorityBand::Critical);
        assert_eq!(
            PriorityBand::of(profile.score(&claim)),
            PriorityBand::Administrative
        );
    }

    #[test]
    fn test_bands() {
        assert_eq!(PriorityBand::of(0.9), PriorityBand::Critical);
        assert_eq!(PriorityBand::of(0.7), PriorityBand::Urgent);
        assert_eq!(PriorityBand::of(0.45), PriorityBand::Routine);
        assert_eq!(PriorityBand::of(0.1), PriorityBand::Administrative);
    }

    #[test]
    fn test_band_boundaries_fall_to_the_lower_band() {
        assert_eq!(PriorityBand::of(0.85), PriorityBand::Urgent);
        assert_eq!(PriorityBand::of(0.8501), PriorityBand::Critical);
        assert_eq!(PriorityBand::of(0.60), PriorityBand::Routine);
        assert_eq!(PriorityBand::of(0.6001), PriorityBand::Urgent);
        assert_eq!(PriorityBand::of(0.30), PriorityBand::Administrative);
        assert_eq!(PriorityBand::of(0.3001), PriorityBand::Routine);
    }
}
