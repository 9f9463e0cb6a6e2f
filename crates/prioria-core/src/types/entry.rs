use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{sign, verify, PublicKey, SecretKey, Sig};
use crate::error::CoreError;
use crate::serialize;
use crate::time::now_millis;

/// Number of hex characters kept from the content hash to form an entry id
pub const ENTRY_ID_LEN: usize = 16;

/// Medical record categories with their base urgency scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MedicalRecordType {
    EmergencyVisit,
    Prescription,
    LabResult,
    VitalSigns,
    InsuranceClaim,
    Vaccination,
    Surgery,
    Consent,
    Diagnosis,
    Discharge,
}

/// Base scores attached to a record type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordScores {
    pub criticality: f64,
    pub time_sensitivity: f64,
    pub compliance_risk: f64,
}

impl MedicalRecordType {
    pub const ALL: [MedicalRecordType; 10] = [
        MedicalRecordType::EmergencyVisit,
        MedicalRecordType::Prescription,
        MedicalRecordType::LabResult,
        MedicalRecordType::VitalSigns,
        MedicalRecordType::InsuranceClaim,
        MedicalRecordType::Vaccination,
        MedicalRecordType::Surgery,
        MedicalRecordType::Consent,
        MedicalRecordType::Diagnosis,
        MedicalRecordType::Discharge,
    ];

    pub fn base_scores(&self) -> RecordScores {
        let (criticality, time_sensitivity, compliance_risk) = match self {
            MedicalRecordType::EmergencyVisit => (0.95, 0.95, 0.90),
            MedicalRecordType::Prescription => (0.70, 0.65, 0.75),
            MedicalRecordType::LabResult => (0.50, 0.40, 0.65),
            MedicalRecordType::VitalSigns => (0.55, 0.85, 0.60),
            MedicalRecordType::InsuranceClaim => (0.15, 0.10, 0.95),
            MedicalRecordType::Vaccination => (0.35, 0.25, 0.70),
            MedicalRecordType::Surgery => (0.90, 0.75, 0.99),
            MedicalRecordType::Consent => (0.60, 0.50, 1.00),
            MedicalRecordType::Diagnosis => (0.65, 0.50, 0.80),
            MedicalRecordType::Discharge => (0.40, 0.30, 0.75),
        };
        RecordScores {
            criticality,
            time_sensitivity,
            compliance_risk,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MedicalRecordType::EmergencyVisit => "EMERGENCY_VISIT",
            MedicalRecordType::Prescription => "PRESCRIPTION",
            MedicalRecordType::LabResult => "LAB_RESULT",
            MedicalRecordType::VitalSigns => "VITAL_SIGNS",
            MedicalRecordType::InsuranceClaim => "INSURANCE_CLAIM",
            MedicalRecordType::Vaccination => "VACCINATION",
            MedicalRecordType::Surgery => "SURGERY",
            MedicalRecordType::Consent => "CONSENT",
            MedicalRecordType::Diagnosis => "DIAGNOSIS",
            MedicalRecordType::Discharge => "DISCHARGE",
        }
    }
}

/// What kind of record an entry carries. Selects the priority inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    /// Plain ledger entry; priority signals come from payload fields
    #[default]
    Generic,
    /// Healthcare record; priority signals come from the record type
    Medical {
        record_type: MedicalRecordType,
        patient_id: String,
        provider_id: String,
        facility_id: String,
    },
}

/// The atomic unit of state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// First 16 hex chars of the content hash of the signed fields
    pub id: String,
    pub sender: PublicKey,
    pub recipient: String,
    pub amount: u64,
    pub payload: BTreeMap<String, Value>,
    pub nonce: u64,
    /// Creation time in unix milliseconds
    pub created_at: u64,
    pub kind: EntryKind,
    pub signature: Option<Sig>,
    /// Set once at mempool admission
    #[serde(default)]
    pub priority: f64,
}

/// Fields covered by the id and the signature
#[derive(Serialize)]
struct EntrySigningData<'a> {
    sender: &'a PublicKey,
    recipient: &'a str,
    amount: u64,
    payload: &'a BTreeMap<String, Value>,
    nonce: u64,
    created_at: u64,
    kind: &'a EntryKind,
}

/// The entry as committed into a block's Merkle tree (priority is pool metadata)
#[derive(Serialize)]
pub struct EntryRecord<'a> {
    id: &'a str,
    sender: &'a PublicKey,
    recipient: &'a str,
    amount: u64,
    payload: &'a BTreeMap<String, Value>,
    nonce: u64,
    created_at: u64,
    kind: &'a EntryKind,
    signature: Option<&'a Sig>,
}

impl LedgerEntry {
    /// Create an unsigned generic entry stamped with the current time
    pub fn new(
        sender: PublicKey,
        recipient: impl Into<String>,
        amount: u64,
        payload: BTreeMap<String, Value>,
        nonce: u64,
    ) -> Result<Self, CoreError> {
        let mut entry = LedgerEntry {
            id: String::new(),
            sender,
            recipient: recipient.into(),
            amount,
            payload,
            nonce,
            created_at: now_millis(),
            kind: EntryKind::Generic,
            signature: None,
            priority: 0.0,
        };
        entry.id = entry.compute_id()?;
        Ok(entry)
    }

    /// Create an unsigned healthcare record addressed to its facility
    pub fn medical(
        sender: PublicKey,
        record_type: MedicalRecordType,
        patient_id: impl Into<String>,
        provider_id: impl Into<String>,
        facility_id: impl Into<String>,
        medical_data: BTreeMap<String, Value>,
    ) -> Result<Self, CoreError> {
        let patient_id = patient_id.into();
        let provider_id = provider_id.into();
        let facility_id = facility_id.into();
        let scores = record_type.base_scores();

        let mut payload = BTreeMap::new();
        payload.insert("record_type".to_string(), Value::from(record_type.as_str()));
        payload.insert("patient_id".to_string(), Value::from(patient_id.clone()));
        payload.insert("provider_id".to_string(), Value::from(provider_id.clone()));
        payload.insert("facility_id".to_string(), Value::from(facility_id.clone()));
        payload.insert("criticality".to_string(), Value::from(scores.criticality));
        payload.insert(
            "time_sensitivity".to_string(),
            Value::from(scores.time_sensitivity),
        );
        payload.insert(
            "medical_data".to_string(),
            Value::Object(medical_data.into_iter().collect()),
        );

        let entry = Self::new(sender, facility_id.clone(), 0, payload, 0)?;
        entry.with_kind(EntryKind::Medical {
            record_type,
            patient_id,
            provider_id,
            facility_id,
        })
    }

    /// Replace the record kind; recomputes the id and drops any signature
    pub fn with_kind(mut self, kind: EntryKind) -> Result<Self, CoreError> {
        self.kind = kind;
        self.refresh_id()?;
        Ok(self)
    }

    /// Pin the creation time; recomputes the id and drops any signature
    pub fn with_created_at(mut self, created_at: u64) -> Result<Self, CoreError> {
        self.created_at = created_at;
        self.refresh_id()?;
        Ok(self)
    }

    /// Set the nonce; recomputes the id and drops any signature
    pub fn with_nonce(mut self, nonce: u64) -> Result<Self, CoreError> {
        self.nonce = nonce;
        self.refresh_id()?;
        Ok(self)
    }

    fn refresh_id(&mut self) -> Result<(), CoreError> {
        self.signature = None;
        self.id = self.compute_id()?;
        Ok(())
    }

    fn signing_data(&self) -> EntrySigningData<'_> {
        EntrySigningData {
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            payload: &self.payload,
            nonce: self.nonce,
            created_at: self.created_at,
            kind: &self.kind,
        }
    }

    /// Canonical bytes covered by the signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serialize::to_canonical_bytes(&self.signing_data())
    }

    /// Content fingerprint of the signed fields
    pub fn compute_id(&self) -> Result<String, CoreError> {
        let digest = serialize::hash_canonical(&self.signing_data())?;
        Ok(digest.short_hex(ENTRY_ID_LEN))
    }

    pub fn sign(&mut self, secret_key: &SecretKey) -> Result<(), CoreError> {
        let bytes = self.signing_bytes()?;
        self.signature = Some(sign(secret_key, &bytes));
        Ok(())
    }

    /// Build and sign a generic entry in one step
    pub fn new_signed(
        sender: PublicKey,
        recipient: impl Into<String>,
        amount: u64,
        payload: BTreeMap<String, Value>,
        nonce: u64,
        secret_key: &SecretKey,
    ) -> Result<Self, CoreError> {
        let mut entry = Self::new(sender, recipient, amount, payload, nonce)?;
        entry.sign(secret_key)?;
        Ok(entry)
    }

    /// Check the id fingerprint and the sender's signature
    pub fn verify_signature(&self) -> Result<(), CoreError> {
        let computed = self.compute_id()?;
        if computed != self.id {
            return Err(CoreError::EntryIdMismatch {
                stored: self.id.clone(),
                computed,
            });
        }

        let signature = self.signature.as_ref().ok_or(CoreError::MissingSignature)?;
        let bytes = self.signing_bytes()?;
        verify(&self.sender, &bytes, signature)
    }

    pub fn is_valid(&self) -> bool {
        self.verify_signature().is_ok()
    }

    /// View hashed into the block Merkle tree
    pub fn record(&self) -> EntryRecord<'_> {
        EntryRecord {
            id: &self.id,
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            payload: &self.payload,
            nonce: self.nonce,
            created_at: self.created_at,
            kind: &self.kind,
            signature: self.signature.as_ref(),
        }
    }

    /// Lowercased canonical JSON scanned for escalation keywords.
    ///
    /// Medical records expose only their `medical_data`; generic entries
    /// expose the whole payload. Keys and non-string values are part of the
    /// text.
    pub fn escalation_text(&self) -> String {
        let text = match &self.kind {
            EntryKind::Medical { .. } => match self.payload.get("medical_data") {
                Some(data) => serialize::to_canonical_string(data),
                None => return String::new(),
            },
            EntryKind::Generic => serialize::to_canonical_string(&self.payload),
        };
        text.map(|t| t.to_lowercase()).unwrap_or_default()
    }

    /// Numeric payload field, if present
    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(Value::as_f64)
    }
}
