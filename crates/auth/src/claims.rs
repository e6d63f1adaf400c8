use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use iapos_core::UserId;

use crate::account::Role;

/// Clock skew tolerated on `iat`.
pub const IAT_LEEWAY_SECS: i64 = 60;

/// Payload of the session cookie JWT.
///
/// Timestamps are Unix seconds, matching the registered `iat` / `exp` claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: UserId,
    pub open_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session has expired")]
    Expired,

    #[error("session not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid session time window (exp <= iat)")]
    InvalidTimeWindow,

    #[error("failed to sign session: {0}")]
    Encode(String),

    #[error("invalid session token: {0}")]
    Decode(String),
}

/// Check the claim window against `now`. Signature checks happen in the codec.
pub fn validate_claims(claims: &SessionClaims, now: DateTime<Utc>) -> Result<(), SessionError> {
    let now = now.timestamp();
    if claims.exp <= claims.iat {
        return Err(SessionError::InvalidTimeWindow);
    }
    if now + IAT_LEEWAY_SECS < claims.iat {
        return Err(SessionError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(SessionError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(iat: i64, exp: i64) -> SessionClaims {
        SessionClaims {
            user_id: UserId::new(1),
            open_id: "oid".into(),
            email: None,
            name: None,
            role: Role::Owner,
            iat,
            exp,
        }
    }

    #[test]
    fn window_checks() {
        let now = Utc::now();
        let t = now.timestamp();
        assert!(validate_claims(&claims(t - 10, t + 10), now).is_ok());
        assert_eq!(validate_claims(&claims(t - 20, t - 10), now), Err(SessionError::Expired));
        assert_eq!(validate_claims(&claims(t + 10, t + 5), now), Err(SessionError::InvalidTimeWindow));
        assert_eq!(
            validate_claims(&claims(t + 120, t + 500), now),
            Err(SessionError::NotYetValid)
        );
        // small skew is tolerated
        assert!(validate_claims(&claims(t + 30, t + 500), now).is_ok());
    }

    #[test]
    fn payload_uses_camel_case() {
        let json = serde_json::to_value(claims(1, 2)).unwrap();
        assert_eq!(json["userId"], 1);
        assert_eq!(json["openId"], "oid");
        assert_eq!(json["role"], "owner");
    }
}
