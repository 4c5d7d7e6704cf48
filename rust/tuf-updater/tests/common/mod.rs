//! Shared fixtures: deterministic keys, metadata builders and an in-memory mirror.

#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tuf_updater::metadata::{
    parse_expires, KeyDefinition, MetaFile, RoleDefinition, RootMetadata, TimestampMetadata,
};
use tuf_updater::{FetchError, FixedClock, KeyRecord, MetadataFetcher, Signed, TufRole};

pub const FAR_FUTURE: &str = "2030-01-01T00:00:00Z";
pub const NOW: &str = "2020-08-04T00:00:00Z";

pub fn clock() -> FixedClock {
    FixedClock(parse_expires(NOW).unwrap())
}

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn key_definition(seed: u8) -> KeyDefinition {
    KeyDefinition::ed25519(signing_key(seed).verifying_key().as_bytes())
}

pub fn key_id(seed: u8) -> String {
    KeyRecord::calculate_key_id(&key_definition(seed)).unwrap()
}

/// Keys and threshold for one role, by key seed.
pub struct RoleKeys<'a> {
    pub seeds: &'a [u8],
    pub threshold: u32,
}

fn role_definition(keys: &RoleKeys<'_>) -> RoleDefinition {
    RoleDefinition {
        key_ids: keys.seeds.iter().map(|s| key_id(*s)).collect(),
        threshold: keys.threshold,
    }
}

pub fn root_payload(
    version: u64,
    expires: &str,
    root: RoleKeys<'_>,
    timestamp: RoleKeys<'_>,
) -> RootMetadata {
    let mut keys = BTreeMap::new();
    for seed in root.seeds.iter().chain(timestamp.seeds) {
        keys.insert(key_id(*seed), key_definition(*seed));
    }
    let mut roles = BTreeMap::new();
    roles.insert("root".to_string(), role_definition(&root));
    roles.insert("timestamp".to_string(), role_definition(&timestamp));

    RootMetadata {
        role: TufRole::Root,
        spec_version: "1.0.0".to_string(),
        consistent_snapshot: false,
        version,
        expires: expires.to_string(),
        keys,
        roles,
    }
}

pub fn timestamp_payload(version: u64, snapshot_version: u64, expires: &str) -> TimestampMetadata {
    let mut meta = BTreeMap::new();
    meta.insert(
        "snapshot.json".to_string(),
        MetaFile {
            version: snapshot_version,
            length: Some(1024),
            hashes: Some(BTreeMap::from([(
                "sha256".to_string(),
                "ab".repeat(32),
            )])),
        },
    );
    TimestampMetadata {
        role: TufRole::Timestamp,
        spec_version: "1.0.0".to_string(),
        version,
        expires: expires.to_string(),
        meta,
    }
}

/// Serialize `payload` signed by each key seed in `signers`.
pub fn signed_bytes<T: serde::Serialize>(payload: &T, signers: &[u8]) -> Vec<u8> {
    let mut signed = Signed::new(payload).unwrap();
    for seed in signers {
        signed.add_signature(&key_id(*seed), &signing_key(*seed)).unwrap();
    }
    signed.to_vec().unwrap()
}

/// A mirror held in memory.
#[derive(Default)]
pub struct MemoryFetcher {
    pub files: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn with(mut self, filename: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(filename.to_string(), bytes);
        self
    }
}

impl MetadataFetcher for MemoryFetcher {
    fn fetch(&self, filename: &str, max_length: u64) -> Result<Option<Vec<u8>>, FetchError> {
        match self.files.get(filename) {
            Some(bytes) if bytes.len() as u64 > max_length => Err(FetchError::TooLarge {
                filename: filename.to_string(),
                max_length,
            }),
            other => Ok(other.cloned()),
        }
    }
}

pub fn create_temp_dir(prefix: &str) -> PathBuf {
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let path = std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), stamp));
    std::fs::create_dir_all(&path).unwrap();
    path
}
