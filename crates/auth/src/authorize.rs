//! Authorization predicates.
//!
//! Every function here is pure: the caller fetches the rows (profile, station,
//! memberships, ...) and the predicate only compares ownership and membership
//! fields. Admin bypass is applied by the caller, not here.

use thiserror::Error;

use iapos_family::Dependent;
use iapos_fleet::{FleetMembership, FleetRole, Vehicle};
use iapos_profiles::{Profile, ProfileType};
use iapos_stations::{GasStation, StationMembership, StationRole};

use crate::account::{AccountType, Role, User, UserStatus};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("{0}")]
    Forbidden(String),
}

impl AuthzError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}

pub fn is_admin(user: &User) -> bool {
    user.role == Role::Admin && user.account_type == AccountType::Admin
}

// ─────────────────────────────────────────────────────────────────────────────
// Gas-station networks
// ─────────────────────────────────────────────────────────────────────────────

pub fn is_gas_station_network_owner(user: &User, network: &Profile) -> bool {
    user.account_type == AccountType::GasStation
        && network.profile_type == ProfileType::GasStationNetwork
        && network.user_id == user.id
        && user.role == Role::Owner
}

/// `memberships` are the user's `gas_station_users` rows in stations of
/// `network`; rows for other users are ignored.
pub fn is_gas_station_network_supervisor(
    user: &User,
    network: &Profile,
    memberships: &[StationMembership],
) -> bool {
    if is_gas_station_network_owner(user, network) {
        return true;
    }
    user.account_type == AccountType::GasStation
        && network.profile_type == ProfileType::GasStationNetwork
        && user.role == Role::Supervisor
        && memberships.iter().any(|m| {
            m.status.is_active() && m.user_id == user.id && m.role == StationRole::Supervisor
        })
}

pub fn can_manage_gas_station(
    user: &User,
    station: &GasStation,
    network: &Profile,
    memberships: &[StationMembership],
) -> bool {
    if station.network_id != network.id {
        return false;
    }
    if is_gas_station_network_supervisor(user, network, memberships) {
        return true;
    }
    user.account_type == AccountType::GasStation
        && user.role == Role::Manager
        && memberships
            .iter()
            .any(|m| m.grants(user.id, station.id, StationRole::Manager))
}

/// Managers plus the cashiers and attendants working that station.
pub fn can_operate_gas_station(
    user: &User,
    station: &GasStation,
    network: &Profile,
    memberships: &[StationMembership],
) -> bool {
    if can_manage_gas_station(user, station, network, memberships) {
        return true;
    }
    station.network_id == network.id
        && user.account_type == AccountType::GasStation
        && memberships.iter().any(|m| {
            m.role.operates_pump()
                && m.role.as_str() == user.role.as_str()
                && m.grants(user.id, station.id, m.role)
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Fleets
// ─────────────────────────────────────────────────────────────────────────────

pub fn is_fleet_owner(user: &User, fleet: &Profile) -> bool {
    user.account_type == AccountType::Fleet
        && fleet.profile_type == ProfileType::Fleet
        && fleet.user_id == user.id
        && user.role == Role::Owner
}

fn fleet_role(role: Role) -> Option<FleetRole> {
    match role {
        Role::Owner => Some(FleetRole::Owner),
        Role::Finance => Some(FleetRole::Finance),
        Role::Driver => Some(FleetRole::Driver),
        _ => None,
    }
}

/// Active membership of `user` in `fleet` whose role matches the user's role.
fn fleet_member<'a>(
    user: &User,
    fleet: &Profile,
    membership: Option<&'a FleetMembership>,
) -> Option<&'a FleetMembership> {
    let role = fleet_role(user.role)?;
    membership.filter(|m| m.user_id == user.id && m.is_active_in(fleet.id) && m.role == role)
}

pub fn can_access_fleet_data(
    user: &User,
    fleet: &Profile,
    membership: Option<&FleetMembership>,
) -> bool {
    if user.account_type != AccountType::Fleet || fleet.profile_type != ProfileType::Fleet {
        return false;
    }
    is_fleet_owner(user, fleet) || fleet_member(user, fleet, membership).is_some()
}

/// Drivers only reach the vehicles assigned to them.
pub fn can_access_vehicle(
    user: &User,
    fleet: &Profile,
    membership: Option<&FleetMembership>,
    vehicle: &Vehicle,
) -> bool {
    if vehicle.fleet_id != fleet.id || !can_access_fleet_data(user, fleet, membership) {
        return false;
    }
    if user.role != Role::Driver {
        return true;
    }
    fleet_member(user, fleet, membership).is_some_and(|m| m.is_assigned(vehicle.id))
}

pub fn can_manage_fleet_finances(
    user: &User,
    fleet: &Profile,
    membership: Option<&FleetMembership>,
) -> bool {
    if is_fleet_owner(user, fleet) {
        return true;
    }
    user.account_type == AccountType::Fleet
        && fleet.profile_type == ProfileType::Fleet
        && user.role == Role::Finance
        && fleet_member(user, fleet, membership).is_some()
}

// ─────────────────────────────────────────────────────────────────────────────
// Families
// ─────────────────────────────────────────────────────────────────────────────

pub fn is_family_responsible(user: &User, family: &Profile) -> bool {
    user.account_type == AccountType::Family
        && family.profile_type == ProfileType::Family
        && family.user_id == user.id
        && user.role == Role::Responsible
}

/// `linked` is the dependent row whose `user_id` is this user, if any.
fn linked_dependent<'a>(user: &User, family: &Profile, linked: Option<&'a Dependent>) -> Option<&'a Dependent> {
    if user.account_type != AccountType::Family || user.role != Role::Dependent {
        return None;
    }
    linked.filter(|d| d.family_id == family.id && d.is_linked_to(user.id))
}

pub fn can_access_family_data(user: &User, family: &Profile, linked: Option<&Dependent>) -> bool {
    if family.profile_type != ProfileType::Family {
        return false;
    }
    is_family_responsible(user, family) || linked_dependent(user, family, linked).is_some()
}

pub fn can_access_dependent(
    user: &User,
    family: &Profile,
    linked: Option<&Dependent>,
    dependent: &Dependent,
) -> bool {
    if dependent.family_id != family.id {
        return false;
    }
    is_family_responsible(user, family)
        || linked_dependent(user, family, linked).is_some_and(|d| d.id == dependent.id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Role shorthands
// ─────────────────────────────────────────────────────────────────────────────

pub fn is_attendant(user: &User) -> bool {
    user.account_type == AccountType::GasStation && user.role == Role::Attendant
}

pub fn is_driver(user: &User) -> bool {
    user.account_type == AccountType::Fleet && user.role == Role::Driver
}

pub fn is_dependent(user: &User) -> bool {
    user.account_type == AccountType::Family && user.role == Role::Dependent
}

// ─────────────────────────────────────────────────────────────────────────────
// Guards
// ─────────────────────────────────────────────────────────────────────────────

fn join<T: core::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn require_role(user: &User, allowed: &[Role]) -> Result<(), AuthzError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        Err(AuthzError::forbidden(format!(
            "This action requires one of these roles: {}",
            join(allowed)
        )))
    }
}

pub fn require_account_type(user: &User, allowed: &[AccountType]) -> Result<(), AuthzError> {
    if allowed.contains(&user.account_type) {
        Ok(())
    } else {
        Err(AuthzError::forbidden(format!(
            "This action requires one of these account types: {}",
            join(allowed)
        )))
    }
}

pub fn require_admin(user: &User) -> Result<(), AuthzError> {
    if is_admin(user) {
        Ok(())
    } else {
        Err(AuthzError::forbidden("This action requires admin privileges"))
    }
}

pub fn require_active_status(user: &User) -> Result<(), AuthzError> {
    if user.status == UserStatus::Active {
        Ok(())
    } else {
        Err(AuthzError::forbidden("Your account is not active"))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use super::fixtures::fleet_member;

    #[test]
    fn admin_requires_both_role_and_account_type() {
        assert!(is_admin(&user(1, AccountType::Admin, Role::Admin)));
        let mut fake = user(2, AccountType::Fleet, Role::Owner);
        fake.role = Role::Admin;
        assert!(!is_admin(&fake));
    }

    #[test]
    fn network_owner_checks_ownership_and_type() {
        let owner = user(1, AccountType::GasStation, Role::Owner);
        assert!(is_gas_station_network_owner(&owner, &profile(10, 1, ProfileType::GasStationNetwork)));
        assert!(!is_gas_station_network_owner(&owner, &profile(10, 2, ProfileType::GasStationNetwork)));
        assert!(!is_gas_station_network_owner(&owner, &profile(10, 1, ProfileType::Fleet)));
    }

    #[test]
    fn supervisor_is_scoped_to_network_memberships() {
        let sup = user(5, AccountType::GasStation, Role::Supervisor);
        let network = profile(10, 1, ProfileType::GasStationNetwork);
        assert!(!is_gas_station_network_supervisor(&sup, &network, &[]));
        let m = [station_member(5, 100, StationRole::Supervisor)];
        assert!(is_gas_station_network_supervisor(&sup, &network, &m));
        // a membership belonging to someone else does not count
        let other = [station_member(6, 100, StationRole::Supervisor)];
        assert!(!is_gas_station_network_supervisor(&sup, &network, &other));
    }

    #[test]
    fn manager_only_manages_own_station() {
        let mgr = user(7, AccountType::GasStation, Role::Manager);
        let network = profile(10, 1, ProfileType::GasStationNetwork);
        let m = [station_member(7, 100, StationRole::Manager)];
        assert!(can_manage_gas_station(&mgr, &station(100, 10), &network, &m));
        assert!(!can_manage_gas_station(&mgr, &station(101, 10), &network, &m));
        // station from a different network than the profile passed in
        assert!(!can_manage_gas_station(&mgr, &station(100, 11), &network, &m));
    }

    #[test]
    fn attendant_operates_but_does_not_manage() {
        let att = user(8, AccountType::GasStation, Role::Attendant);
        let network = profile(10, 1, ProfileType::GasStationNetwork);
        let st = station(100, 10);
        let m = [station_member(8, 100, StationRole::Attendant)];
        assert!(can_operate_gas_station(&att, &st, &network, &m));
        assert!(!can_manage_gas_station(&att, &st, &network, &m));
        assert!(!can_operate_gas_station(&att, &station(101, 10), &network, &m));
        assert!(is_attendant(&att));
    }

    #[test]
    fn fleet_access_requires_matching_membership() {
        let fleet = profile(20, 1, ProfileType::Fleet);
        let owner = user(1, AccountType::Fleet, Role::Owner);
        assert!(can_access_fleet_data(&owner, &fleet, None));

        let fin = user(2, AccountType::Fleet, Role::Finance);
        let fm = fleet_member(2, 20, FleetRole::Finance, &[]);
        assert!(can_access_fleet_data(&fin, &fleet, Some(&fm)));
        assert!(can_manage_fleet_finances(&fin, &fleet, Some(&fm)));
        assert!(!can_access_fleet_data(&fin, &fleet, None));

        // membership role must agree with the user's role
        let drv_row = fleet_member(2, 20, FleetRole::Driver, &[]);
        assert!(!can_access_fleet_data(&fin, &fleet, Some(&drv_row)));
    }

    #[test]
    fn drivers_only_reach_assigned_vehicles() {
        let fleet = profile(20, 1, ProfileType::Fleet);
        let drv = user(3, AccountType::Fleet, Role::Driver);
        let m = fleet_member(3, 20, FleetRole::Driver, &[31]);
        assert!(can_access_vehicle(&drv, &fleet, Some(&m), &vehicle(31, 20)));
        assert!(!can_access_vehicle(&drv, &fleet, Some(&m), &vehicle(32, 20)));
        assert!(!can_manage_fleet_finances(&drv, &fleet, Some(&m)));
        assert!(is_driver(&drv));

        let owner = user(1, AccountType::Fleet, Role::Owner);
        assert!(can_access_vehicle(&owner, &fleet, None, &vehicle(32, 20)));
        assert!(!can_access_vehicle(&owner, &fleet, None, &vehicle(33, 21)));
    }

    #[test]
    fn family_access() {
        let family = profile(30, 1, ProfileType::Family);
        let resp = user(1, AccountType::Family, Role::Responsible);
        let d1 = dependent(41, 30, Some(4));
        let d2 = dependent(42, 30, None);
        assert!(is_family_responsible(&resp, &family));
        assert!(can_access_dependent(&resp, &family, None, &d2));

        let kid = user(4, AccountType::Family, Role::Dependent);
        assert!(is_dependent(&kid));
        assert!(can_access_family_data(&kid, &family, Some(&d1)));
        assert!(can_access_dependent(&kid, &family, Some(&d1), &d1));
        assert!(!can_access_dependent(&kid, &family, Some(&d1), &d2));
        assert!(!can_access_family_data(&kid, &family, None));

        // dependent row from another family
        let foreign = dependent(43, 31, Some(4));
        assert!(!can_access_family_data(&kid, &family, Some(&foreign)));
    }

    #[test]
    fn guards_produce_readable_messages() {
        let u = user(1, AccountType::Fleet, Role::Driver);
        let err = require_role(&u, &[Role::Owner, Role::Finance]).unwrap_err();
        assert_eq!(err.to_string(), "This action requires one of these roles: owner, finance");
        let err = require_account_type(&u, &[AccountType::Family]).unwrap_err();
        assert_eq!(err.to_string(), "This action requires one of these account types: family");
        assert_eq!(
            require_admin(&u).unwrap_err().to_string(),
            "This action requires admin privileges"
        );

        let mut suspended = u.clone();
        suspended.status = UserStatus::Suspended;
        assert_eq!(
            require_active_status(&suspended).unwrap_err().to_string(),
            "Your account is not active"
        );
        assert!(require_active_status(&u).is_ok());
    }
}
