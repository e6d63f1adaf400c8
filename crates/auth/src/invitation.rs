//! Invitations to join a profile as staff, fleet member or dependent.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use iapos_core::{
    string_enum, text, DependentId, DomainError, DomainResult, Entity, GasStationId, InvitationId,
    ProfileId, UserId,
};
use iapos_fleet::FleetRole;
use iapos_profiles::ProfileType;
use iapos_stations::StationRole;

use crate::account::{AccountType, Role};

pub const DEFAULT_INVITATION_TTL_DAYS: i64 = 7;

string_enum! {
    pub enum InviteProfileType : "invitation profile type" {
        GasStation => "gas_station",
        Fleet => "fleet",
        Family => "family",
    }
}

string_enum! {
    pub enum InvitationStatus : "invitation status" {
        Pending => "pending",
        Accepted => "accepted",
        Expired => "expired",
        Cancelled => "cancelled",
    }
}

impl InviteProfileType {
    pub fn from_profile_type(profile_type: ProfileType) -> Self {
        match profile_type {
            ProfileType::GasStationNetwork => InviteProfileType::GasStation,
            ProfileType::Fleet => InviteProfileType::Fleet,
            ProfileType::Family => InviteProfileType::Family,
        }
    }

    pub fn account_type(self) -> AccountType {
        match self {
            InviteProfileType::GasStation => AccountType::GasStation,
            InviteProfileType::Fleet => AccountType::Fleet,
            InviteProfileType::Family => AccountType::Family,
        }
    }

    /// Roles an invitation into this kind of profile may carry.
    pub fn invitable_roles(self) -> &'static [Role] {
        match self {
            InviteProfileType::GasStation => {
                &[Role::Supervisor, Role::Manager, Role::Cashier, Role::Attendant]
            }
            InviteProfileType::Fleet => &[Role::Finance, Role::Driver],
            InviteProfileType::Family => &[Role::Dependent],
        }
    }
}

/// 64 hex characters of randomness.
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: InvitationId,
    pub invited_by_user_id: UserId,
    pub invited_email: String,
    pub profile_id: ProfileId,
    pub profile_type: InviteProfileType,
    pub role: Role,
    /// Station the membership is created in (gas-station invitations).
    pub gas_station_id: Option<GasStationId>,
    /// Dependent row the accepting user is linked to (family invitations).
    pub dependent_id: Option<DependentId>,
    pub token: String,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Invitation {
    type Id = InvitationId;

    fn id(&self) -> InvitationId {
        self.id
    }
}

impl Invitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Expired
            || (self.status == InvitationStatus::Pending && self.expires_at <= now)
    }

    pub fn is_for_email(&self, email: &str) -> bool {
        self.invited_email.eq_ignore_ascii_case(email.trim())
    }

    pub fn station_role(&self) -> Option<StationRole> {
        match self.role {
            Role::Supervisor => Some(StationRole::Supervisor),
            Role::Manager => Some(StationRole::Manager),
            Role::Cashier => Some(StationRole::Cashier),
            Role::Attendant => Some(StationRole::Attendant),
            _ => None,
        }
    }

    pub fn fleet_role(&self) -> Option<FleetRole> {
        match self.role {
            Role::Finance => Some(FleetRole::Finance),
            Role::Driver => Some(FleetRole::Driver),
            _ => None,
        }
    }

    fn require_pending(&self) -> DomainResult<()> {
        if self.status != InvitationStatus::Pending {
            return Err(DomainError::invariant(format!("invitation is {}", self.status)));
        }
        Ok(())
    }

    /// Marks the invitation accepted. Expired invitations are rejected; the
    /// caller should persist [`Invitation::expire`] in that case.
    pub fn accept(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.require_pending()?;
        if self.is_expired(now) {
            return Err(DomainError::invariant("invitation has expired"));
        }
        self.status = InvitationStatus::Accepted;
        self.accepted_at = Some(now);
        Ok(())
    }

    pub fn expire(&mut self) {
        if self.status == InvitationStatus::Pending {
            self.status = InvitationStatus::Expired;
        }
    }

    /// Expired invitations are rejected like in [`Invitation::accept`].
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.require_pending()?;
        if self.is_expired(now) {
            return Err(DomainError::invariant("invitation has expired"));
        }
        self.status = InvitationStatus::Cancelled;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvitation {
    pub invited_by_user_id: UserId,
    pub invited_email: String,
    pub profile_id: ProfileId,
    pub profile_type: InviteProfileType,
    pub role: Role,
    pub gas_station_id: Option<GasStationId>,
    pub dependent_id: Option<DependentId>,
}

impl NewInvitation {
    /// Shape checks only; the station / dependent must still be checked
    /// against the profile by the caller.
    pub fn validate(self) -> DomainResult<Self> {
        let invited_email = text::email("invitedEmail", &self.invited_email)?.to_ascii_lowercase();
        if !self.profile_type.invitable_roles().contains(&self.role) {
            return Err(DomainError::validation(format!(
                "role '{}' cannot be invited into a {} profile",
                self.role, self.profile_type
            )));
        }
        match self.profile_type {
            InviteProfileType::GasStation => {
                if self.gas_station_id.is_none() {
                    return Err(DomainError::validation("gasStationId is required"));
                }
                if self.dependent_id.is_some() {
                    return Err(DomainError::validation("dependentId is only valid for families"));
                }
            }
            InviteProfileType::Fleet => {
                if self.gas_station_id.is_some() || self.dependent_id.is_some() {
                    return Err(DomainError::validation(
                        "fleet invitations take neither gasStationId nor dependentId",
                    ));
                }
            }
            InviteProfileType::Family => {
                if self.dependent_id.is_none() {
                    return Err(DomainError::validation("dependentId is required"));
                }
                if self.gas_station_id.is_some() {
                    return Err(DomainError::validation("gasStationId is only valid for gas stations"));
                }
            }
        }
        Ok(Self {
            invited_email,
            ..self
        })
    }

    pub fn into_invitation(
        self,
        id: InvitationId,
        token: String,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Invitation {
        Invitation {
            id,
            invited_by_user_id: self.invited_by_user_id,
            invited_email: self.invited_email,
            profile_id: self.profile_id,
            profile_type: self.profile_type,
            role: self.role,
            gas_station_id: self.gas_station_id,
            dependent_id: self.dependent_id,
            token,
            status: InvitationStatus::Pending,
            expires_at: now + ttl,
            accepted_at: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet_invite(role: Role) -> NewInvitation {
        NewInvitation {
            invited_by_user_id: UserId::new(1),
            invited_email: "Motorista@Frota.com.br".into(),
            profile_id: ProfileId::new(20),
            profile_type: InviteProfileType::Fleet,
            role,
            gas_station_id: None,
            dependent_id: None,
        }
    }

    fn pending(now: DateTime<Utc>) -> Invitation {
        fleet_invite(Role::Driver)
            .validate()
            .unwrap()
            .into_invitation(
                InvitationId::new(1),
                generate_token(),
                Duration::days(DEFAULT_INVITATION_TTL_DAYS),
                now,
            )
    }

    #[test]
    fn role_must_fit_profile_type() {
        assert!(fleet_invite(Role::Driver).validate().is_ok());
        assert!(fleet_invite(Role::Attendant).validate().is_err());
        assert!(fleet_invite(Role::Owner).validate().is_err());
    }

    #[test]
    fn station_and_dependent_targets_are_checked() {
        let mut gs = fleet_invite(Role::Cashier);
        gs.profile_type = InviteProfileType::GasStation;
        assert!(gs.clone().validate().is_err());
        gs.gas_station_id = Some(GasStationId::new(3));
        assert!(gs.validate().is_ok());

        let mut fam = fleet_invite(Role::Dependent);
        fam.profile_type = InviteProfileType::Family;
        assert!(fam.clone().validate().is_err());
        fam.dependent_id = Some(DependentId::new(4));
        assert!(fam.validate().is_ok());
    }

    #[test]
    fn email_is_lowercased_and_matched_case_insensitively() {
        let inv = pending(Utc::now());
        assert_eq!(inv.invited_email, "motorista@frota.com.br");
        assert!(inv.is_for_email(" MOTORISTA@frota.com.br"));
        assert_eq!(inv.token.len(), 64);
        assert_eq!(inv.fleet_role(), Some(FleetRole::Driver));
        assert_eq!(inv.station_role(), None);
    }

    #[test]
    fn accept_and_cancel_lifecycle() {
        let now = Utc::now();
        let mut inv = pending(now);
        inv.accept(now).unwrap();
        assert_eq!(inv.accepted_at, Some(now));
        assert!(inv.accept(now).is_err());
        assert!(inv.cancel(now).is_err());

        let mut inv = pending(now);
        inv.cancel(now).unwrap();
        assert!(inv.accept(now).is_err());
    }

    #[test]
    fn expired_invitations_cannot_be_accepted() {
        let now = Utc::now();
        let mut inv = pending(now);
        let later = now + Duration::days(8);
        assert!(inv.is_expired(later));
        assert!(inv.accept(later).is_err());
        assert!(matches!(inv.cancel(later), Err(DomainError::InvariantViolation(_))));
        assert_eq!(inv.status, InvitationStatus::Pending);
        inv.expire();
        assert_eq!(inv.status, InvitationStatus::Expired);
    }
}
