use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use prioria_core::{LedgerEntry, SecretKey};
use serde_json::Value;

use crate::cli::EntryCommands;

pub fn handle_entry(command: EntryCommands) -> Result<()> {
    let (entry, out) = match command {
        EntryCommands::Generic {
            secret,
            recipient,
            amount,
            payload,
            nonce,
            out,
        } => {
            let secret = parse_secret(&secret)?;
            let entry = LedgerEntry::new_signed(
                secret.public_key(),
                recipient,
                amount,
                parse_object(&payload)?,
                nonce,
                &secret,
            )?;
            (entry, out)
        }

        EntryCommands::Medical {
            secret,
            record_type,
            patient_id,
            provider_id,
            facility_id,
            data,
            nonce,
            out,
        } => {
            let secret = parse_secret(&secret)?;
            let mut entry = LedgerEntry::medical(
                secret.public_key(),
                record_type,
                patient_id,
                provider_id,
                facility_id,
                parse_object(&data)?,
            )?
            .with_nonce(nonce)?;
            entry.sign(&secret)?;
            (entry, out)
        }
    };

    write_entry(&entry, &out)?;
    println!("Entry {} written to {}", entry.id, out.display());
    Ok(())
}

fn write_entry(entry: &LedgerEntry, out: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(entry)?;
    std::fs::write(out, json)?;
    Ok(())
}

fn parse_secret(hex_str: &str) -> Result<SecretKey> {
    SecretKey::from_hex(hex_str).map_err(|e| anyhow!(e))
}

fn parse_object(input: &str) -> Result<BTreeMap<String, Value>> {
    match serde_json::from_str::<Value>(input)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => bail!("Expected a JSON object, got {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prioria_core::{EntryKind, KeyPair, MedicalRecordType};

    #[test]
    fn test_generic_entry_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("entry.json");
        let kp = KeyPair::generate();

        handle_entry(EntryCommands::Generic {
            secret: kp.secret.to_hex(),
            recipient: "ward-3".to_string(),
            amount: 7,
            payload: r#"{"urgency": 0.9}"#.to_string(),
            nonce: 4,
            out: out.clone(),
        })
        .unwrap();

        let entry: LedgerEntry =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert!(entry.is_valid());
        assert_eq!(entry.sender, kp.public);
        assert_eq!(entry.nonce, 4);
        assert_eq!(entry.payload_f64("urgency"), Some(0.9));
    }

    #[test]
    fn test_medical_entry_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("record.json");
        let kp = KeyPair::generate();

        handle_entry(EntryCommands::Medical {
            secret: kp.secret.to_hex(),
            record_type: MedicalRecordType::Surgery,
            patient_id: "p-1".to_string(),
            provider_id: "dr-2".to_string(),
            facility_id: "general-hospital".to_string(),
            data: r#"{"note": "stat"}"#.to_string(),
            nonce: 1,
            out: out.clone(),
        })
        .unwrap();

        let entry: LedgerEntry =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert!(entry.is_valid());
        assert_eq!(entry.recipient, "general-hospital");
        assert!(matches!(
            entry.kind,
            EntryKind::Medical {
                record_type: MedicalRecordType::Surgery,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_non_object_payload() {
        assert!(parse_object("[1, 2]").is_err());
        assert!(parse_object("not json").is_err());
    }
}
