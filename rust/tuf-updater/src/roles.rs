//! Role store: role name → authorized keys and signature threshold.
//!
//! Both stores are built together from a root payload and never mutated
//! afterwards. Accepting a new root means building new stores.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, TufError};
use crate::keys::KeyStore;
use crate::metadata::RootMetadata;

/// A role and the keys that may sign for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDescriptor {
    pub name: String,
    pub key_ids: BTreeSet<String>,
    pub threshold: u32,
}

impl RoleDescriptor {
    pub fn is_authorized(&self, key_id: &str) -> bool {
        self.key_ids.contains(key_id)
    }
}

/// Immutable mapping of role names to descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleStore {
    roles: BTreeMap<String, RoleDescriptor>,
}

impl RoleStore {
    pub fn lookup(&self, name: &str) -> Result<&RoleDescriptor> {
        self.roles.get(name).ok_or_else(|| TufError::NotFound {
            kind: "role",
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Build the role and key stores declared by a root payload.
///
/// Fails if two key ids share one public key, if a role names a key the
/// root does not declare, or if a threshold is zero or larger than the
/// role's key set.
pub fn build_from_root(root: &RootMetadata) -> Result<(RoleStore, KeyStore)> {
    let keys = KeyStore::from_definitions(&root.keys)?;

    // Thresholds count keys, so one key must not hide behind several ids.
    let mut seen: BTreeMap<&[u8], &str> = BTreeMap::new();
    for key_id in root.keys.keys() {
        let record = keys.lookup(key_id)?;
        if let Some(first) = seen.insert(record.public_key.as_slice(), key_id.as_str()) {
            return Err(TufError::format(format!(
                "keys '{}' and '{}' declare the same public key",
                first, key_id
            )));
        }
    }


    let mut roles = BTreeMap::new();
    for (name, def) in &root.roles {
        let key_ids: BTreeSet<String> = def.key_ids.iter().cloned().collect();

        if let Some(missing) = key_ids.iter().find(|id| !keys.contains(id)) {
            return Err(TufError::format(format!(
                "role '{}' references undeclared key '{}'",
                name, missing
            )));
        }
        if def.threshold == 0 {
            return Err(TufError::format(format!(
                "role '{}' has a threshold of 0",
                name
            )));
        }
        if def.threshold as usize > key_ids.len() {
            return Err(TufError::format(format!(
                "role '{}' threshold {} exceeds its {} key(s)",
                name,
                def.threshold,
                key_ids.len()
            )));
        }

        roles.insert(
            name.clone(),
            RoleDescriptor {
                name: name.clone(),
                key_ids,
                threshold: def.threshold,
            },
        );
    }

    Ok((RoleStore { roles }, keys))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{KeyDefinition, RoleDefinition, TufRole};

    fn root_with(roles: Vec<(&str, Vec<&str>, u32)>) -> RootMetadata {
        let mut keys = BTreeMap::new();
        keys.insert("k1".to_string(), KeyDefinition::ed25519(&[1u8; 32]));
        keys.insert("k2".to_string(), KeyDefinition::ed25519(&[2u8; 32]));
        keys.insert("k3".to_string(), KeyDefinition::ed25519(&[3u8; 32]));

        let roles = roles
            .into_iter()
            .map(|(name, ids, threshold)| {
                (
                    name.to_string(),
                    RoleDefinition {
                        key_ids: ids.into_iter().map(String::from).collect(),
                        threshold,
                    },
                )
            })
            .collect();

        RootMetadata {
            role: TufRole::Root,
            spec_version: "1.0.0".into(),
            consistent_snapshot: false,
            version: 1,
            expires: "2030-01-01T00:00:00Z".into(),
            keys,
            roles,
        }
    }

    #[test]
    fn test_build_valid_root() {
        let root = root_with(vec![
            ("root", vec!["k1", "k2", "k3"], 2),
            ("timestamp", vec!["k3"], 1),
        ]);
        let (roles, keys) = build_from_root(&root).unwrap();

        assert_eq!(roles.len(), 2);
        assert_eq!(keys.len(), 3);

        let ts = roles.lookup("timestamp").unwrap();
        assert_eq!(ts.threshold, 1);
        assert!(ts.is_authorized("k3"));
        assert!(!ts.is_authorized("k1"));
    }

    #[test]
    fn test_unknown_role_not_found() {
        let root = root_with(vec![("root", vec!["k1"], 1)]);
        let (roles, _) = build_from_root(&root).unwrap();
        assert!(matches!(
            roles.lookup("snapshot"),
            Err(TufError::NotFound { kind: "role", .. })
        ));
    }

    #[test]
    fn test_undeclared_key_rejected() {
        let root = root_with(vec![("root", vec!["k1", "k9"], 1)]);
        let err = build_from_root(&root).unwrap_err();
        assert!(matches!(err, TufError::Format(ref m) if m.contains("k9")));
    }

    #[test]
    fn test_threshold_exceeding_keys_rejected() {
        let root = root_with(vec![("root", vec!["k1", "k2"], 3)]);
        assert!(matches!(build_from_root(&root), Err(TufError::Format(_))));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let root = root_with(vec![("root", vec!["k1"], 0)]);
        assert!(matches!(build_from_root(&root), Err(TufError::Format(_))));
    }

    #[test]
    fn test_aliased_public_key_rejected() {
        let mut root = root_with(vec![("timestamp", vec!["k1", "alias"], 2)]);
        root.keys
            .insert("alias".to_string(), KeyDefinition::ed25519(&[1u8; 32]));
        let err = build_from_root(&root).unwrap_err();
        assert!(matches!(err, TufError::Format(ref m) if m.contains("alias") && m.contains("k1")));
    }

    #[test]
    fn test_duplicate_key_ids_count_once() {
        // Two listings of k1 are still one key; threshold 2 cannot be met.
        let root = root_with(vec![("root", vec!["k1", "k1"], 2)]);
        assert!(matches!(build_from_root(&root), Err(TufError::Format(_))));
    }
}
