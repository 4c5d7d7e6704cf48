//! Key store: key id → public key material, built from trusted root metadata.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::canonical::canonicalize;
use crate::error::{Result, TufError};
use crate::metadata::KeyDefinition;

/// Signing schemes a key may declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureScheme {
    Ed25519,
    /// Declared by the repository but not verifiable by this client.
    /// Signatures made with such keys never count toward a threshold.
    Unsupported(String),
}

impl SignatureScheme {
    pub fn from_name(name: &str) -> Self {
        match name {
            "ed25519" => SignatureScheme::Ed25519,
            other => SignatureScheme::Unsupported(other.to_string()),
        }
    }
}

/// A trusted public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub key_id: String,
    pub scheme: SignatureScheme,
    pub public_key: Vec<u8>,
}

impl KeyRecord {
    pub fn from_definition(key_id: &str, def: &KeyDefinition) -> Result<Self> {
        let public_key = hex::decode(&def.keyval.public).map_err(|e| {
            TufError::format(format!("key '{}' has a malformed public value: {}", key_id, e))
        })?;
        Ok(Self {
            key_id: key_id.to_string(),
            scheme: SignatureScheme::from_name(&def.scheme),
            public_key,
        })
    }

    /// Conventional key id: hex SHA-256 of the key definition's canonical JSON.
    pub fn calculate_key_id(def: &KeyDefinition) -> Result<String> {
        let value = json!({
            "keytype": def.keytype,
            "scheme": def.scheme,
            "keyval": { "public": def.keyval.public },
        });
        let bytes = canonicalize(&value)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// Immutable mapping of key ids to key records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStore {
    keys: BTreeMap<String, KeyRecord>,
}

impl KeyStore {
    pub fn from_definitions(defs: &BTreeMap<String, KeyDefinition>) -> Result<Self> {
        let keys = defs
            .iter()
            .map(|(id, def)| Ok((id.clone(), KeyRecord::from_definition(id, def)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { keys })
    }

    pub fn lookup(&self, key_id: &str) -> Result<&KeyRecord> {
        self.keys.get(key_id).ok_or_else(|| TufError::NotFound {
            kind: "key",
            name: key_id.to_string(),
        })
    }

    pub fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
