//! Error types for metadata verification and the refresh protocol.

use std::fmt;

use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::storage::StorageError;

/// Result alias used throughout the crate.
pub type Result<T, E = TufError> = std::result::Result<T, E>;

// =============================================================================
// TUF Error Types
// =============================================================================

/// Errors that can occur while establishing trust in repository metadata.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TufError {
    /// Malformed metadata: bad date, missing field, non-canonicalizable payload.
    #[error("format error: {0}")]
    Format(String),

    /// Two payloads of different roles were compared. This is a caller bug.
    #[error("type mismatch: expected '{expected}' metadata, got '{found}'")]
    TypeMismatch { expected: String, found: String },

    /// The remote version is older than the trusted one, or no trusted
    /// version was ever recorded.
    #[error("rollback attack detected for '{role}': local version {local}, remote version {remote}")]
    RollbackAttack { role: String, local: u64, remote: u64 },

    /// Metadata expired before the current time.
    #[error("freeze attack detected for '{role}': expired at {expires}, now {now}")]
    FreezeAttack {
        role: String,
        expires: String,
        now: String,
    },

    /// Fewer valid authorized signatures than the role requires.
    #[error("signature threshold not met for '{role}': need {required}, got {valid}")]
    SignatureThreshold {
        role: String,
        required: u32,
        valid: u32,
    },

    /// A root rotation step this client cannot carry out.
    #[error("unsupported root rotation step: {0}")]
    UnsupportedRootRotationStep(String),

    /// Unknown role or key id.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Metadata that must exist could not be read or fetched.
    #[error("metadata '{0}' is unavailable")]
    MissingMetadata(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TufError {
    /// Whether this error signals a potential attack rather than malformed
    /// or unavailable data.
    pub fn is_attack(&self) -> bool {
        matches!(
            self,
            TufError::RollbackAttack { .. } | TufError::FreezeAttack { .. }
        )
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        TufError::Format(msg.into())
    }
}

impl From<serde_json::Error> for TufError {
    fn from(e: serde_json::Error) -> Self {
        TufError::Format(e.to_string())
    }
}

// =============================================================================
// Refresh Errors
// =============================================================================

/// The steps of a refresh, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStep {
    LoadTrustedRoot,
    RootRotation,
    RootFreezeCheck,
    FetchTimestamp,
    VerifyTimestampSignature,
    RollbackCheck,
    FreezeCheck,
    Commit,
}

impl fmt::Display for RefreshStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefreshStep::LoadTrustedRoot => "load-trusted-root",
            RefreshStep::RootRotation => "root-rotation",
            RefreshStep::RootFreezeCheck => "root-freeze-check",
            RefreshStep::FetchTimestamp => "fetch-timestamp",
            RefreshStep::VerifyTimestampSignature => "verify-timestamp-signature",
            RefreshStep::RollbackCheck => "rollback-check",
            RefreshStep::FreezeCheck => "freeze-check",
            RefreshStep::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// A failed refresh: which step rejected, and why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("refresh of '{repository}' failed at {step}: {error}")]
pub struct RefreshError {
    pub repository: String,
    pub step: RefreshStep,
    #[source]
    pub error: TufError,
}

impl RefreshError {
    pub fn new(repository: impl Into<String>, step: RefreshStep, error: TufError) -> Self {
        Self {
            repository: repository.into(),
            step,
            error,
        }
    }

    /// An expired trusted root cannot be recovered by retrying; the caller
    /// must restart discovery from an initial root.
    pub fn requires_restart(&self) -> bool {
        self.step == RefreshStep::RootFreezeCheck
            && matches!(self.error, TufError::FreezeAttack { .. })
    }

    pub fn is_attack(&self) -> bool {
        self.error.is_attack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuf_error_display() {
        let e = TufError::RollbackAttack {
            role: "timestamp".to_string(),
            local: 5,
            remote: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("timestamp"));
        assert!(msg.contains('5'));
        assert!(msg.contains('3'));

        let e = TufError::SignatureThreshold {
            role: "root".to_string(),
            required: 2,
            valid: 1,
        };
        assert!(e.to_string().contains("need 2, got 1"));

        let e = TufError::NotFound {
            kind: "role",
            name: "mirrors".to_string(),
        };
        assert_eq!(e.to_string(), "role not found: mirrors");
    }

    #[test]
    fn test_attack_classification() {
        assert!(TufError::FreezeAttack {
            role: "timestamp".into(),
            expires: "2020-01-01T00:00:00Z".into(),
            now: "2020-08-04T00:00:00Z".into(),
        }
        .is_attack());
        assert!(!TufError::format("bad date").is_attack());
        assert!(!TufError::TypeMismatch {
            expected: "root".into(),
            found: "timestamp".into()
        }
        .is_attack());
    }

    #[test]
    fn test_requires_restart_only_for_expired_root() {
        let freeze = TufError::FreezeAttack {
            role: "root".into(),
            expires: "2020-01-01T00:00:00Z".into(),
            now: "2020-08-04T00:00:00Z".into(),
        };
        let err = RefreshError::new("main", RefreshStep::RootFreezeCheck, freeze.clone());
        assert!(err.requires_restart());
        assert!(err.is_attack());

        let err = RefreshError::new("main", RefreshStep::FreezeCheck, freeze);
        assert!(!err.requires_restart());
    }

    #[test]
    fn test_refresh_step_display() {
        assert_eq!(RefreshStep::RootRotation.to_string(), "root-rotation");
        assert_eq!(
            RefreshStep::VerifyTimestampSignature.to_string(),
            "verify-timestamp-signature"
        );
    }
}
