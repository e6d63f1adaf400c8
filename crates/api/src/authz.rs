//! API-side authorization.
//!
//! Handlers fetch the target rows through these scopes, which then answer
//! with the pure predicates from `iapos_auth`. Admins bypass entity checks,
//! never the login / active-status gate (enforced by `CurrentUser`).

use iapos_auth::{
    can_access_dependent, can_access_family_data, can_access_fleet_data, can_access_vehicle,
    can_manage_fleet_finances, can_manage_gas_station, can_operate_gas_station, is_admin,
    is_family_responsible, is_fleet_owner, is_gas_station_network_owner,
    is_gas_station_network_supervisor, AuthzError, User,
};
use iapos_core::{GasStationId, ProfileId};
use iapos_family::Dependent;
use iapos_fleet::{FleetMembership, Vehicle};
use iapos_profiles::{Profile, ProfileType};
use iapos_stations::{GasStation, StationMembership};
use iapos_wallet::QrHolder;

use crate::app::errors::{RpcError, RpcResult};
use crate::app::services::AppServices;

/// `Ok` when `allowed` or the caller is an admin.
pub fn allow(user: &User, allowed: bool, message: &str) -> RpcResult<()> {
    if allowed || is_admin(user) {
        Ok(())
    } else {
        Err(AuthzError::forbidden(message).into())
    }
}

pub fn require_profile_type(profile: &Profile, expected: ProfileType) -> RpcResult<()> {
    if profile.profile_type == expected {
        Ok(())
    } else {
        Err(RpcError::bad_request(format!(
            "Profile {} is not a {} profile",
            profile.id, expected
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gas-station networks
// ─────────────────────────────────────────────────────────────────────────────

pub struct NetworkScope {
    pub network: Profile,
    pub memberships: Vec<StationMembership>,
}

impl NetworkScope {
    pub async fn load(services: &AppServices, user: &User, network_id: ProfileId) -> RpcResult<Self> {
        let network = services.profile(network_id).await?;
        let memberships = services.store.memberships_in_network(user.id, network.id).await?;
        Ok(Self { network, memberships })
    }

    pub fn is_owner(&self, user: &User) -> bool {
        is_gas_station_network_owner(user, &self.network)
    }

    pub fn is_supervisor(&self, user: &User) -> bool {
        is_gas_station_network_supervisor(user, &self.network, &self.memberships)
    }
}

pub struct StationScope {
    pub station: GasStation,
    pub network: NetworkScope,
}

impl StationScope {
    pub async fn load(services: &AppServices, user: &User, station_id: GasStationId) -> RpcResult<Self> {
        let station = services.station(station_id).await?;
        let network = NetworkScope::load(services, user, station.network_id).await?;
        Ok(Self { station, network })
    }

    pub fn can_manage(&self, user: &User) -> bool {
        can_manage_gas_station(user, &self.station, &self.network.network, &self.network.memberships)
    }

    pub fn can_operate(&self, user: &User) -> bool {
        can_operate_gas_station(user, &self.station, &self.network.network, &self.network.memberships)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fleets
// ─────────────────────────────────────────────────────────────────────────────

pub struct FleetScope {
    pub fleet: Profile,
    pub membership: Option<FleetMembership>,
}

impl FleetScope {
    pub async fn load(services: &AppServices, user: &User, fleet_id: ProfileId) -> RpcResult<Self> {
        let fleet = services.profile(fleet_id).await?;
        let membership = services.store.fleet_membership(fleet.id, user.id).await?;
        Ok(Self { fleet, membership })
    }

    pub fn is_owner(&self, user: &User) -> bool {
        is_fleet_owner(user, &self.fleet)
    }

    pub fn can_access(&self, user: &User) -> bool {
        can_access_fleet_data(user, &self.fleet, self.membership.as_ref())
    }

    pub fn can_access_vehicle(&self, user: &User, vehicle: &Vehicle) -> bool {
        can_access_vehicle(user, &self.fleet, self.membership.as_ref(), vehicle)
    }

    pub fn can_manage_finances(&self, user: &User) -> bool {
        can_manage_fleet_finances(user, &self.fleet, self.membership.as_ref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Families
// ─────────────────────────────────────────────────────────────────────────────

pub struct FamilyScope {
    pub family: Profile,
    /// Dependent row linked to the caller, if any.
    pub linked: Option<Dependent>,
}

impl FamilyScope {
    pub async fn load(services: &AppServices, user: &User, family_id: ProfileId) -> RpcResult<Self> {
        let family = services.profile(family_id).await?;
        let linked = services.store.dependent_for_user(user.id).await?;
        Ok(Self { family, linked })
    }

    pub fn is_responsible(&self, user: &User) -> bool {
        is_family_responsible(user, &self.family)
    }

    pub fn can_access(&self, user: &User) -> bool {
        can_access_family_data(user, &self.family, self.linked.as_ref())
    }

    pub fn can_access_dependent(&self, user: &User, dependent: &Dependent) -> bool {
        can_access_dependent(user, &self.family, self.linked.as_ref(), dependent)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wallet holders (vehicle or dependent behind a QR code)
// ─────────────────────────────────────────────────────────────────────────────

pub enum HolderScope {
    Vehicle { vehicle: Vehicle, fleet: FleetScope },
    Dependent { dependent: Dependent, family: FamilyScope },
}

impl HolderScope {
    pub async fn load(services: &AppServices, user: &User, holder: QrHolder) -> RpcResult<Self> {
        match holder {
            QrHolder::Vehicle(id) => {
                let vehicle = services.vehicle(id).await?;
                let fleet = FleetScope::load(services, user, vehicle.fleet_id).await?;
                Ok(HolderScope::Vehicle { vehicle, fleet })
            }
            QrHolder::Dependent(id) => {
                let dependent = services.dependent(id).await?;
                let family = FamilyScope::load(services, user, dependent.family_id).await?;
                Ok(HolderScope::Dependent { dependent, family })
            }
        }
    }

    pub fn profile_id(&self) -> ProfileId {
        match self {
            HolderScope::Vehicle { vehicle, .. } => vehicle.fleet_id,
            HolderScope::Dependent { dependent, .. } => dependent.family_id,
        }
    }

    /// Read access to the holder's wallet and history.
    pub fn can_view(&self, user: &User) -> bool {
        match self {
            HolderScope::Vehicle { vehicle, fleet } => fleet.can_access_vehicle(user, vehicle),
            HolderScope::Dependent { dependent, family } => family.can_access_dependent(user, dependent),
        }
    }

    /// Issuing QR codes: fleet owner for vehicles, responsible for dependents.
    pub fn can_issue_codes(&self, user: &User) -> bool {
        match self {
            HolderScope::Vehicle { fleet, .. } => fleet.is_owner(user),
            HolderScope::Dependent { family, .. } => family.is_responsible(user),
        }
    }
}

/// Owner of a fleet / family profile, or a finance member of a fleet.
pub async fn can_fund_profile(services: &AppServices, user: &User, profile: &Profile) -> RpcResult<bool> {
    Ok(match profile.profile_type {
        ProfileType::Fleet => {
            let membership = services.store.fleet_membership(profile.id, user.id).await?;
            can_manage_fleet_finances(user, profile, membership.as_ref())
        }
        ProfileType::Family => is_family_responsible(user, profile),
        ProfileType::GasStationNetwork => false,
    })
}

/// The head of a profile: network owner, fleet owner or family responsible.
pub fn is_profile_head(user: &User, profile: &Profile) -> bool {
    match profile.profile_type {
        ProfileType::GasStationNetwork => is_gas_station_network_owner(user, profile),
        ProfileType::Fleet => is_fleet_owner(user, profile),
        ProfileType::Family => is_family_responsible(user, profile),
    }
}
