//! Threshold signature verification.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use crate::canonical::canonicalize;
use crate::error::{Result, TufError};
use crate::keys::{KeyRecord, KeyStore, SignatureScheme};
use crate::metadata::TufSignature;
use crate::roles::{RoleDescriptor, RoleStore};

/// Verify that a single signature is valid for the given data and key.
///
/// Malformed encodings and unsupported schemes are verification failures,
/// never errors.
fn verify_signature(key: &KeyRecord, data: &[u8], signature: &TufSignature) -> bool {
    match key.scheme {
        SignatureScheme::Ed25519 => {
            let Ok(vk_bytes) = <[u8; 32]>::try_from(key.public_key.as_slice()) else {
                return false;
            };
            let Ok(sig_bytes) = hex::decode(&signature.value) else {
                return false;
            };
            let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
                return false;
            };
            let Ok(verifying_key) = VerifyingKey::from_bytes(&vk_bytes) else {
                return false;
            };
            let sig = Signature::from_bytes(&sig_arr);
            verifying_key.verify(data, &sig).is_ok()
        }
        SignatureScheme::Unsupported(ref scheme) => {
            debug!(key_id = %key.key_id, scheme = %scheme, "unsupported signature scheme");
            false
        }
    }
}

/// Count valid signatures from keys authorized for `role`, stopping as soon
/// as the threshold is reached. Each key counts at most once.
fn count_valid(
    data: &[u8],
    signatures: &[TufSignature],
    role: &RoleDescriptor,
    keys: &KeyStore,
) -> u32 {
    let mut counted: BTreeSet<&str> = BTreeSet::new();
    let mut valid: u32 = 0;

    for sig in signatures {
        // Authorization precedes the cryptographic check.
        if !role.is_authorized(&sig.key_id) {
            debug!(role = %role.name, key_id = %sig.key_id, "ignoring signature from unauthorized key");
            continue;
        }
        if counted.contains(sig.key_id.as_str()) {
            continue;
        }
        let Ok(key) = keys.lookup(&sig.key_id) else {
            continue;
        };
        if verify_signature(key, data, sig) {
            counted.insert(sig.key_id.as_str());
            valid += 1;
            if valid >= role.threshold {
                break;
            }
        } else {
            debug!(role = %role.name, key_id = %sig.key_id, "invalid signature");
        }
    }

    valid
}

/// Whether `signatures` over `payload` meet the threshold of `role`.
///
/// Returns an error only when the payload cannot be canonicalized or the
/// role is unknown; an unmet threshold is `Ok(false)`.
pub fn verify_threshold(
    payload: &Value,
    signatures: &[TufSignature],
    role: &str,
    roles: &RoleStore,
    keys: &KeyStore,
) -> Result<bool> {
    let descriptor = roles.lookup(role)?;
    let data = canonicalize(payload)?;
    Ok(count_valid(&data, signatures, descriptor, keys) >= descriptor.threshold)
}

/// Like [`verify_threshold`], but an unmet threshold is an error.
pub fn require_threshold(
    payload: &Value,
    signatures: &[TufSignature],
    role: &str,
    roles: &RoleStore,
    keys: &KeyStore,
) -> Result<()> {
    let descriptor = roles.lookup(role)?;
    let data = canonicalize(payload)?;
    let valid = count_valid(&data, signatures, descriptor, keys);
    if valid < descriptor.threshold {
        return Err(TufError::SignatureThreshold {
            role: role.to_string(),
            required: descriptor.threshold,
            valid,
        });
    }
    Ok(())
}
