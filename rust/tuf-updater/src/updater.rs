//! The refresh protocol.
//!
//! A refresh runs these steps in order and stops at the first failure:
//!
//! 1. **LoadTrustedRoot**: read `root.json` from durable storage and build
//!    the role and key stores from it.
//! 2. **RootRotation**: fetch `N+1.root.json` until none is available. Each
//!    new root must be signed by the current root and by itself.
//! 3. **RootFreezeCheck**: the resulting root must not have expired.
//! 4. **FetchTimestamp**: fetch `timestamp.json`.
//! 5. **VerifyTimestampSignature**: threshold check for the `timestamp` role.
//! 6. **RollbackCheck**: compare against the durable timestamp. A missing
//!    durable timestamp is treated like version 0 and rejected.
//! 7. **FreezeCheck**: the new timestamp must not have expired.
//! 8. **Commit**: persist the adopted roots and the new timestamp.
//!
//! Nothing is written before Commit, so a rejected refresh leaves durable
//! state exactly as it was. Durable storage must be seeded with both
//! `root.json` and `timestamp.json` before the first refresh.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::{info, info_span, warn};

use crate::attacks::{check_freeze, check_rollback};
use crate::clock::{Clock, SystemClock};
use crate::config::{FetchLimits, UpdaterConfig};
use crate::error::{RefreshError, RefreshStep, Result, TufError};
use crate::fetch::{MetadataFetcher, MirrorFetcher};
use crate::keys::KeyStore;
use crate::metadata::{
    spec_major, versioned_root_filename, PayloadHeader, RootMetadata, Signed, TimestampMetadata,
    TufRole, ROOT_FILENAME, SUPPORTED_SPEC_MAJOR, TIMESTAMP_FILENAME,
};
use crate::roles::{build_from_root, RoleDescriptor, RoleStore};
use crate::storage::{DurableStorage, FileStorage};
use crate::verify::require_threshold;

// =============================================================================
// Trusted Root
// =============================================================================

/// A root document together with the stores built from it.
///
/// Replaced wholesale on rotation; never modified.
#[derive(Debug, Clone)]
pub struct TrustedRoot {
    signed: Signed,
    metadata: RootMetadata,
    roles: RoleStore,
    keys: KeyStore,
}

impl TrustedRoot {
    /// Parse root bytes and build its stores. No signature is checked here.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let signed = Signed::from_slice(bytes)?;
        let header = signed.header()?;
        if header.role != TufRole::Root.as_str() {
            return Err(TufError::TypeMismatch {
                expected: TufRole::Root.to_string(),
                found: header.role,
            });
        }
        let metadata: RootMetadata = signed.payload()?;
        let (roles, keys) = build_from_root(&metadata)?;
        Ok(Self {
            signed,
            metadata,
            roles,
            keys,
        })
    }

    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    pub fn metadata(&self) -> &RootMetadata {
        &self.metadata
    }

    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Require that `signed` meets this root's threshold for `role`.
    pub fn verify(&self, signed: &Signed, role: TufRole) -> Result<()> {
        require_threshold(
            &signed.signed,
            &signed.signatures,
            role.as_str(),
            &self.roles,
            &self.keys,
        )
    }

    fn role(&self, role: TufRole) -> Option<&RoleDescriptor> {
        self.roles.lookup(role.as_str()).ok()
    }
}

// =============================================================================
// Refresh Outcome
// =============================================================================

/// What a successful refresh accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub root_version: u64,
    pub timestamp_version: u64,
    /// Root versions adopted during this refresh, in order.
    pub rotated_roots: Vec<u64>,
    /// Whether the timestamp version differs from the previous durable one.
    pub timestamp_changed: bool,
}

struct RootChain {
    trusted: TrustedRoot,
    /// `(version, raw bytes)` of each root adopted during rotation.
    adopted: Vec<(u64, Vec<u8>)>,
}

struct VerifiedTimestamp {
    bytes: Vec<u8>,
    signed: Signed,
    metadata: TimestampMetadata,
}

// =============================================================================
// Updater
// =============================================================================

/// Refreshes the trusted metadata of one repository.
///
/// Concurrent calls to [`Updater::refresh`] on the same updater are
/// serialized; each repository should have exactly one updater.
pub struct Updater<S, F, C = SystemClock> {
    repository: String,
    storage: S,
    fetcher: F,
    clock: C,
    limits: FetchLimits,
    lock: Mutex<()>,
}

impl Updater<FileStorage, MirrorFetcher, SystemClock> {
    /// Build an updater for a configured repository, using its mirrors and
    /// a storage directory on disk.
    pub fn from_config(name: &str, config: &UpdaterConfig) -> Result<Self> {
        let repo = config.repository(name)?;
        let storage = FileStorage::open(repo.storage_dir_for(name)?)?;
        let fetcher = MirrorFetcher::new(repo.mirrors.clone(), &config.limits)?;
        Ok(Updater::new(name, storage, fetcher, SystemClock).with_limits(config.limits))
    }
}

impl<S, F, C> Updater<S, F, C>
where
    S: DurableStorage,
    F: MetadataFetcher,
    C: Clock,
{
    pub fn new(repository: impl Into<String>, storage: S, fetcher: F, clock: C) -> Self {
        Self {
            repository: repository.into(),
            storage,
            fetcher,
            clock,
            limits: FetchLimits::default(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_limits(mut self, limits: FetchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Run the refresh protocol once.
    pub fn refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        let _guard = self.lock.lock();
        let span = info_span!("refresh", repository = %self.repository);
        let _enter = span.enter();
        let now = self.clock.now();

        let initial = self
            .load_trusted_root()
            .map_err(self.fail(RefreshStep::LoadTrustedRoot))?;

        let chain = self
            .rotate_root(&initial)
            .map_err(self.fail(RefreshStep::RootRotation))?;

        check_freeze(&chain.trusted.signed.signed, now)
            .map_err(self.fail(RefreshStep::RootFreezeCheck))?;

        let bytes = self
            .fetch_timestamp()
            .map_err(self.fail(RefreshStep::FetchTimestamp))?;

        let remote = verify_timestamp(&chain.trusted, bytes)
            .map_err(self.fail(RefreshStep::VerifyTimestampSignature))?;

        let previous_version = self
            .check_timestamp_rollback(&remote, &initial, &chain.trusted)
            .map_err(self.fail(RefreshStep::RollbackCheck))?;

        check_freeze(&remote.signed.signed, now).map_err(self.fail(RefreshStep::FreezeCheck))?;

        self.commit(&chain, &remote)
            .map_err(self.fail(RefreshStep::Commit))?;

        let outcome = RefreshOutcome {
            root_version: chain.trusted.version(),
            timestamp_version: remote.metadata.version,
            rotated_roots: chain.adopted.iter().map(|(v, _)| *v).collect(),
            timestamp_changed: previous_version != remote.metadata.version,
        };
        info!(
            root_version = outcome.root_version,
            timestamp_version = outcome.timestamp_version,
            rotated = outcome.rotated_roots.len(),
            "refresh committed"
        );
        Ok(outcome)
    }

    fn fail(&self, step: RefreshStep) -> impl FnOnce(TufError) -> RefreshError + '_ {
        move |error| {
            warn!(
                step = %step,
                attack = error.is_attack(),
                error = %error,
                "refresh rejected"
            );
            RefreshError::new(self.repository.clone(), step, error)
        }
    }

    fn load_trusted_root(&self) -> Result<TrustedRoot> {
        let bytes = self
            .storage
            .get(ROOT_FILENAME)?
            .ok_or_else(|| TufError::MissingMetadata(ROOT_FILENAME.to_string()))?;
        let trusted = TrustedRoot::parse(&bytes)?;
        // Durable storage is outside the trust boundary too.
        trusted.verify(&trusted.signed, TufRole::Root)?;
        Ok(trusted)
    }

    /// Advance the trusted root one version at a time until the mirrors
    /// have no next version.
    fn rotate_root(&self, initial: &TrustedRoot) -> Result<RootChain> {
        let mut trusted = initial.clone();
        let mut adopted = Vec::new();

        loop {
            let next_version = trusted
                .version()
                .checked_add(1)
                .ok_or_else(|| TufError::format("root version overflow"))?;
            let filename = versioned_root_filename(next_version);
            let Some(bytes) = self.fetcher.fetch(&filename, self.limits.max_root_length)? else {
                break;
            };

            let candidate = TrustedRoot::parse(&bytes)?;
            // The old root must vouch for the new one, and the new one for itself.
            trusted.verify(&candidate.signed, TufRole::Root)?;
            candidate.verify(&candidate.signed, TufRole::Root)?;

            if candidate.version() < next_version {
                return Err(TufError::RollbackAttack {
                    role: TufRole::Root.to_string(),
                    local: trusted.version(),
                    remote: candidate.version(),
                });
            }
            if candidate.version() > next_version {
                return Err(TufError::format(format!(
                    "'{}' declares version {}",
                    filename,
                    candidate.version()
                )));
            }

            let spec_version = &candidate.metadata.spec_version;
            if spec_major(spec_version)? != SUPPORTED_SPEC_MAJOR {
                return Err(TufError::UnsupportedRootRotationStep(format!(
                    "root version {} uses spec_version {}",
                    next_version, spec_version
                )));
            }

            info!(from = trusted.version(), to = next_version, "adopted rotated root");
            adopted.push((next_version, bytes));
            trusted = candidate;
        }

        Ok(RootChain { trusted, adopted })
    }

    fn fetch_timestamp(&self) -> Result<Vec<u8>> {
        self.fetcher
            .fetch(TIMESTAMP_FILENAME, self.limits.max_timestamp_length)?
            .ok_or_else(|| TufError::MissingMetadata(TIMESTAMP_FILENAME.to_string()))
    }

    /// Compare the remote timestamp with the durable one and return the
    /// durable version.
    ///
    /// The durable timestamp stops being a baseline only when rotation
    /// removed every key that signed it from the timestamp role.
    fn check_timestamp_rollback(
        &self,
        remote: &VerifiedTimestamp,
        initial: &TrustedRoot,
        trusted: &TrustedRoot,
    ) -> Result<u64> {
        let Some(local_bytes) = self.storage.get(TIMESTAMP_FILENAME)? else {
            // An unset baseline looks exactly like a reset one.
            return Err(TufError::RollbackAttack {
                role: TufRole::Timestamp.to_string(),
                local: 0,
                remote: remote.metadata.version,
            });
        };

        let local = Signed::from_slice(&local_bytes)?;
        let local_metadata: TimestampMetadata = local.payload()?;
        if signers_retired(&local, initial, trusted) {
            info!(
                local_version = local_metadata.version,
                "timestamp signers retired by rotation; discarding durable timestamp baseline"
            );
            return Ok(local_metadata.version);
        }

        check_rollback(&local.signed, &remote.signed.signed)?;

        let local_snapshot = local_metadata.snapshot_version()?;
        let remote_snapshot = remote.metadata.snapshot_version()?;
        if remote_snapshot < local_snapshot {
            return Err(TufError::RollbackAttack {
                role: TufRole::Snapshot.to_string(),
                local: local_snapshot,
                remote: remote_snapshot,
            });
        }

        Ok(local_metadata.version)
    }

    /// Roots are written oldest first and `timestamp.json` last. If a write
    /// fails partway, the roots already written stay: each one was verified
    /// against its predecessor, so the next refresh resumes from them.
    fn commit(&self, chain: &RootChain, remote: &VerifiedTimestamp) -> Result<()> {
        for (version, bytes) in &chain.adopted {
            self.storage.set(&versioned_root_filename(*version), bytes)?;
        }
        if let Some((_, latest)) = chain.adopted.last() {
            self.storage.set(ROOT_FILENAME, latest)?;
        }
        self.storage.set(TIMESTAMP_FILENAME, &remote.bytes)?;
        Ok(())
    }
}

/// Whether every key that signed `local` for the old timestamp role is
/// absent from the new timestamp role. Keys are compared by public key
/// material, not by id.
fn signers_retired(local: &Signed, before: &TrustedRoot, after: &TrustedRoot) -> bool {
    let (Some(old_role), Some(new_role)) =
        (before.role(TufRole::Timestamp), after.role(TufRole::Timestamp))
    else {
        return false;
    };
    let current: BTreeSet<&[u8]> = new_role
        .key_ids
        .iter()
        .filter_map(|id| after.keys.lookup(id).ok())
        .map(|key| key.public_key.as_slice())
        .collect();

    let mut signers = local
        .signatures
        .iter()
        .filter(|sig| old_role.is_authorized(&sig.key_id))
        .filter_map(|sig| before.keys.lookup(&sig.key_id).ok())
        .peekable();
    signers.peek().is_some() && signers.all(|key| !current.contains(key.public_key.as_slice()))
}

fn verify_timestamp(trusted: &TrustedRoot, bytes: Vec<u8>) -> Result<VerifiedTimestamp> {
    let signed = Signed::from_slice(&bytes)?;
    let header = PayloadHeader::parse(&signed.signed)?;
    if header.role != TufRole::Timestamp.as_str() {
        return Err(TufError::TypeMismatch {
            expected: TufRole::Timestamp.to_string(),
            found: header.role,
        });
    }
    trusted.verify(&signed, TufRole::Timestamp)?;

    let metadata: TimestampMetadata = signed.payload()?;
    metadata.snapshot_version()?;
    Ok(VerifiedTimestamp {
        bytes,
        signed,
        metadata,
    })
}

/// Run one refresh of `repository_name` with the given collaborators.
///
/// Callers refreshing the same repository from several threads should share
/// one [`Updater`] instead, so its lock serializes them.
pub fn refresh<S, F, C>(
    repository_name: &str,
    fetcher: F,
    storage: S,
    clock: C,
) -> Result<RefreshOutcome, RefreshError>
where
    S: DurableStorage,
    F: MetadataFetcher,
    C: Clock,
{
    Updater::new(repository_name, storage, fetcher, clock).refresh()
}
