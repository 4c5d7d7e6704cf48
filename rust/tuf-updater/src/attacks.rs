//! Rollback- and freeze-attack detection over any role's signed payload.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{Result, TufError};
use crate::metadata::{format_expires, parse_expires, payload_expires, payload_type, payload_version};

/// Reject `remote` if it is older than the trusted `local` payload.
///
/// A local version of 0 means nothing valid was ever recorded; it is
/// treated as an attack rather than as permission to accept anything.
pub fn check_rollback(local: &Value, remote: &Value) -> Result<()> {
    let local_type = payload_type(local)?;
    let remote_type = payload_type(remote)?;
    if local_type != remote_type {
        return Err(TufError::TypeMismatch {
            expected: local_type.to_string(),
            found: remote_type.to_string(),
        });
    }

    let local_version = payload_version(local)?;
    let remote_version = payload_version(remote)?;
    if local_version == 0 || remote_version < local_version {
        return Err(TufError::RollbackAttack {
            role: local_type.to_string(),
            local: local_version,
            remote: remote_version,
        });
    }
    Ok(())
}

/// Reject `payload` if it expired before `now`.
pub fn check_freeze(payload: &Value, now: DateTime<Utc>) -> Result<()> {
    let role = payload_type(payload)?;
    let raw = payload_expires(payload)?;
    let expires = parse_expires(raw)?;
    if expires < now {
        return Err(TufError::FreezeAttack {
            role: role.to_string(),
            expires: raw.to_string(),
            now: format_expires(&now),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(version: u64) -> Value {
        json!({"_type": "timestamp", "version": version, "expires": "2030-01-01T00:00:00Z"})
    }

    fn at(s: &str) -> DateTime<Utc> {
        parse_expires(s).unwrap()
    }

    #[test]
    fn test_rollback_older_remote() {
        let err = check_rollback(&ts(5), &ts(4)).unwrap_err();
        assert_eq!(
            err,
            TufError::RollbackAttack {
                role: "timestamp".into(),
                local: 5,
                remote: 4
            }
        );
    }

    #[test]
    fn test_rollback_failsafe_on_zero() {
        let err = check_rollback(&ts(0), &ts(1)).unwrap_err();
        assert!(matches!(err, TufError::RollbackAttack { local: 0, remote: 1, .. }));
    }

    #[test]
    fn test_rollback_equal_and_newer_accepted() {
        assert!(check_rollback(&ts(5), &ts(5)).is_ok());
        assert!(check_rollback(&ts(5), &ts(6)).is_ok());
    }

    #[test]
    fn test_rollback_type_mismatch() {
        let root = json!({"_type": "root", "version": 1, "expires": "2030-01-01T00:00:00Z"});
        let err = check_rollback(&root, &ts(2)).unwrap_err();
        assert!(matches!(err, TufError::TypeMismatch { .. }));
        assert!(!err.is_attack());
    }

    #[test]
    fn test_freeze_expired() {
        let payload = json!({"_type": "timestamp", "expires": "2020-01-01T00:00:00Z"});
        let err = check_freeze(&payload, at("2020-08-04T00:00:00Z")).unwrap_err();
        assert_eq!(
            err,
            TufError::FreezeAttack {
                role: "timestamp".into(),
                expires: "2020-01-01T00:00:00Z".into(),
                now: "2020-08-04T00:00:00Z".into(),
            }
        );
    }

    #[test]
    fn test_freeze_not_expired() {
        let payload = json!({"_type": "timestamp", "expires": "2030-01-01T00:00:00Z"});
        assert!(check_freeze(&payload, at("2020-08-04T00:00:00Z")).is_ok());
    }

    #[test]
    fn test_freeze_at_exact_expiry_accepted() {
        let payload = json!({"_type": "timestamp", "expires": "2020-08-04T00:00:00Z"});
        assert!(check_freeze(&payload, at("2020-08-04T00:00:00Z")).is_ok());
    }

    #[test]
    fn test_freeze_missing_type_is_format_error() {
        let payload = json!({"expires": "2030-01-01T00:00:00Z"});
        assert!(matches!(
            check_freeze(&payload, at("2020-08-04T00:00:00Z")),
            Err(TufError::Format(_))
        ));
    }

    #[test]
    fn test_freeze_bad_date_is_format_error() {
        let payload = json!({"_type": "timestamp", "expires": "January 1st"});
        assert!(matches!(
            check_freeze(&payload, at("2020-08-04T00:00:00Z")),
            Err(TufError::Format(_))
        ));
    }
}
