//! Strongly-typed identifiers used across the domain.
//!
//! Rows are keyed by database-assigned integers (`BIGSERIAL`), so every id is a
//! transparent `i64` newtype. Mixing a `VehicleId` with a `DependentId` is a
//! compile error rather than a silent authorization bug.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

macro_rules! int_id {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(i64);

        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                if value <= 0 {
                    return Err(DomainError::invalid_id(format!("{}: must be positive", $name)));
                }
                Ok(Self(value))
            }
        }
    };
}

int_id!(
    /// Identifier of a user account.
    UserId,
    "UserId"
);
int_id!(
    /// Identifier of a business profile (gas-station network, fleet or family).
    ///
    /// Profiles are the tenant boundary: every other business row hangs off one.
    ProfileId,
    "ProfileId"
);
int_id!(GasStationId, "GasStationId");
int_id!(VehicleId, "VehicleId");
int_id!(DependentId, "DependentId");
int_id!(QrCodeId, "QrCodeId");
int_id!(TransactionId, "TransactionId");
int_id!(RechargeId, "RechargeId");
int_id!(WithdrawalId, "WithdrawalId");
int_id!(NotificationId, "NotificationId");
int_id!(InvitationId, "InvitationId");
int_id!(
    /// Identifier of a station or fleet membership row.
    MembershipId,
    "MembershipId"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_ids() {
        let id: VehicleId = " 42 ".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert!("0".parse::<UserId>().is_err());
        assert!("-3".parse::<UserId>().is_err());
        let err = "abc".parse::<ProfileId>().unwrap_err();
        assert!(err.to_string().contains("ProfileId"));
    }

    #[test]
    fn serializes_as_bare_integer() {
        let json = serde_json::to_string(&GasStationId::new(7)).unwrap();
        assert_eq!(json, "7");
        let back: GasStationId = serde_json::from_str("7").unwrap();
        assert_eq!(back, GasStationId::new(7));
    }
}
