//! Signed metadata envelopes and the role payloads the client understands.
//!
//! ## Wire Format
//!
//! ```text
//! {
//!   "signed": { "_type": "timestamp", "version": 3, "expires": "...", ... },
//!   "signatures": [ { "keyid": "<hex>", "sig": "<hex>" } ]
//! }
//! ```
//!
//! The `signed` object is kept as raw JSON so that its canonical bytes are
//! exactly what the repository signed, including fields this client does
//! not model. Typed payloads are decoded from it on demand.

use chrono::{DateTime, NaiveDateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::canonical::canonicalize;
use crate::error::{Result, TufError};

/// The only textual format accepted for `expires`.
pub const EXPIRES_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Major version of the metadata specification this client implements.
pub const SUPPORTED_SPEC_MAJOR: u64 = 1;

pub const ROOT_FILENAME: &str = "root.json";
pub const TIMESTAMP_FILENAME: &str = "timestamp.json";
pub const SNAPSHOT_FILENAME: &str = "snapshot.json";

/// Filename of a specific root version, e.g. `2.root.json`.
pub fn versioned_root_filename(version: u64) -> String {
    format!("{}.{}", version, ROOT_FILENAME)
}

// =============================================================================
// TUF Role Types
// =============================================================================

/// Identifies which top-level role a metadata document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TufRole {
    /// Root role: defines keys and thresholds for all roles.
    Root,
    /// Targets role: maps target names to hashes and sizes.
    Targets,
    /// Snapshot role: records versions of all metadata files.
    Snapshot,
    /// Timestamp role: records the current snapshot version.
    Timestamp,
}

impl TufRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TufRole::Root => "root",
            TufRole::Targets => "targets",
            TufRole::Snapshot => "snapshot",
            TufRole::Timestamp => "timestamp",
        }
    }
}

impl std::fmt::Display for TufRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Expiry Timestamps
// =============================================================================

/// Parse an `expires` value. Anything but `YYYY-MM-DDTHH:MM:SSZ` is rejected.
pub fn parse_expires(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, EXPIRES_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| TufError::format(format!("invalid expiry '{}': {}", value, e)))
}

/// Render a time in the `expires` format.
pub fn format_expires(time: &DateTime<Utc>) -> String {
    time.format(EXPIRES_FORMAT).to_string()
}

// =============================================================================
// Payload Header
// =============================================================================

/// The fields every role payload carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadHeader {
    /// The `_type` field: the role this payload belongs to.
    pub role: String,
    pub version: u64,
    pub expires: String,
}

impl PayloadHeader {
    pub fn parse(payload: &Value) -> Result<Self> {
        Ok(Self {
            role: payload_type(payload)?.to_string(),
            version: payload_version(payload)?,
            expires: payload_expires(payload)?.to_string(),
        })
    }
}

pub(crate) fn payload_type(payload: &Value) -> Result<&str> {
    payload
        .get("_type")
        .and_then(Value::as_str)
        .ok_or_else(|| TufError::format("payload is missing '_type'"))
}

pub(crate) fn payload_version(payload: &Value) -> Result<u64> {
    payload
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| TufError::format("payload is missing a non-negative integer 'version'"))
}

pub(crate) fn payload_expires(payload: &Value) -> Result<&str> {
    payload
        .get("expires")
        .and_then(Value::as_str)
        .ok_or_else(|| TufError::format("payload is missing 'expires'"))
}

// =============================================================================
// Signed Envelope
// =============================================================================

/// A signature over the canonical bytes of a `signed` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TufSignature {
    /// Key ID that produced this signature.
    #[serde(rename = "keyid")]
    pub key_id: String,
    /// Signature value (hex-encoded).
    #[serde(rename = "sig")]
    pub value: String,
}

/// A signed metadata document as it travels over the wire and sits in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signed {
    pub signed: Value,
    pub signatures: Vec<TufSignature>,
}

impl Signed {
    /// Wrap a payload with no signatures yet.
    pub fn new<T: Serialize>(payload: &T) -> Result<Self> {
        Ok(Self {
            signed: serde_json::to_value(payload)?,
            signatures: Vec::new(),
        })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| TufError::format(format!("malformed signed envelope: {}", e)))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn header(&self) -> Result<PayloadHeader> {
        PayloadHeader::parse(&self.signed)
    }

    /// Decode the `signed` object into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.signed)
            .map_err(|e| TufError::format(format!("malformed payload: {}", e)))
    }

    /// Sign the payload and append the signature.
    pub fn add_signature(&mut self, key_id: &str, signing_key: &SigningKey) -> Result<()> {
        let sig = sign_payload(key_id, signing_key, &self.signed)?;
        self.signatures.push(sig);
        Ok(())
    }
}

/// Produce an ed25519 signature over the canonical bytes of `payload`.
pub fn sign_payload(key_id: &str, signing_key: &SigningKey, payload: &Value) -> Result<TufSignature> {
    let data = canonicalize(payload)?;
    let sig = signing_key.sign(&data);
    Ok(TufSignature {
        key_id: key_id.to_string(),
        value: hex::encode(sig.to_bytes()),
    })
}

// =============================================================================
// Root Metadata
// =============================================================================

/// Public key material as declared in root metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDefinition {
    pub keytype: String,
    pub scheme: String,
    pub keyval: KeyValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Public key bytes, hex-encoded.
    pub public: String,
}

impl KeyDefinition {
    pub fn ed25519(public: &[u8]) -> Self {
        Self {
            keytype: "ed25519".to_string(),
            scheme: "ed25519".to_string(),
            keyval: KeyValue {
                public: hex::encode(public),
            },
        }
    }
}

/// Threshold configuration for a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    /// Key IDs authorized for this role.
    #[serde(rename = "keyids")]
    pub key_ids: Vec<String>,
    /// Minimum number of valid signatures required.
    pub threshold: u32,
}

/// Root metadata: the trust anchor for the entire repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMetadata {
    #[serde(rename = "_type")]
    pub role: TufRole,
    #[serde(default = "default_spec_version")]
    pub spec_version: String,
    #[serde(default)]
    pub consistent_snapshot: bool,
    pub version: u64,
    pub expires: String,
    /// All known public keys, indexed by key ID.
    pub keys: BTreeMap<String, KeyDefinition>,
    /// Role definitions with key IDs and thresholds.
    pub roles: BTreeMap<String, RoleDefinition>,
}

// =============================================================================
// Timestamp Metadata
// =============================================================================

/// Version, length and hashes of a metadata file another role points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<String, String>>,
}

/// Timestamp metadata: points at the current snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampMetadata {
    #[serde(rename = "_type")]
    pub role: TufRole,
    #[serde(default = "default_spec_version")]
    pub spec_version: String,
    pub version: u64,
    pub expires: String,
    pub meta: BTreeMap<String, MetaFile>,
}

impl TimestampMetadata {
    /// Version of the snapshot this timestamp points to.
    pub fn snapshot_version(&self) -> Result<u64> {
        self.meta
            .get(SNAPSHOT_FILENAME)
            .map(|m| m.version)
            .ok_or_else(|| {
                TufError::format(format!("timestamp does not describe '{}'", SNAPSHOT_FILENAME))
            })
    }
}

fn default_spec_version() -> String {
    "1.0.0".to_string()
}

/// Major component of a `spec_version` string.
pub(crate) fn spec_major(spec_version: &str) -> Result<u64> {
    spec_version
        .split('.')
        .next()
        .and_then(|major| major.parse().ok())
        .ok_or_else(|| TufError::format(format!("invalid spec_version '{}'", spec_version)))
}
