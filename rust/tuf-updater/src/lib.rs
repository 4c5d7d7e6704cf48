//! Trust-establishment core for TUF update clients.
//!
//! Decides, from signed metadata fetched over an untrusted channel, whether
//! a newer repository index can be trusted.
//!
//! ## Security Properties
//!
//! - **Threshold signing**: each role needs a minimum number of valid
//!   signatures from keys the trusted root authorizes for it
//! - **Key rotation**: every new root is signed by its predecessor
//! - **Rollback protection**: versions never go backwards
//! - **Freshness**: expired metadata is rejected
//! - **Atomic commits**: durable state changes only after every check passes

pub mod attacks;
pub mod canonical;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod keys;
pub mod metadata;
pub mod roles;
pub mod storage;
pub mod updater;
pub mod verify;

pub use attacks::{check_freeze, check_rollback};
pub use canonical::{canonicalize, canonicalize_payload};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, FetchLimits, Mirror, RepositoryConfig, UpdaterConfig};
pub use error::{RefreshError, RefreshStep, Result, TufError};
pub use fetch::{FetchError, FilesystemFetcher, MetadataFetcher, MirrorFetcher};
pub use keys::{KeyRecord, KeyStore, SignatureScheme};
pub use metadata::{PayloadHeader, Signed, TufRole, TufSignature};
pub use roles::{build_from_root, RoleDescriptor, RoleStore};
pub use storage::{DurableStorage, FileStorage, MemoryStorage, StorageError};
pub use updater::{refresh, RefreshOutcome, TrustedRoot, Updater};
pub use verify::{require_threshold, verify_threshold};
