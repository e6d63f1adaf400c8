//! Declarative permission matrix.
//!
//! The predicates in [`crate::authorize`] decide individual requests; this
//! table states, per procedure and per (account type, role), which kind of
//! relationship to the target row is needed. It is served to admin tooling and
//! the tests below hold the predicates to it.

use serde::Serialize;

use iapos_core::string_enum;

use crate::account::{account_roles, AccountType, Role};

string_enum! {
    /// What a caller needs in order to be allowed.
    pub enum Grant : "grant" {
        /// Every row.
        Always => "always",
        /// Rows of a profile the caller owns.
        OwnProfile => "own_profile",
        /// Rows reached through an active station / fleet membership.
        Membership => "membership",
        /// Only vehicles assigned to the caller's driver membership.
        AssignedOnly => "assigned_only",
        /// Only the dependent row linked to the caller.
        LinkedOnly => "linked_only",
        Never => "never",
    }
}

string_enum! {
    /// Guarded procedures, named by their RPC path.
    pub enum Action : "action" {
        ProfileCreate => "profile.createProfile",
        ProfileGet => "profile.getProfile",
        ProfileUpdate => "profile.updateProfile",
        ProfileBalance => "profile.getBalance",
        StationGet => "gasStation.getStation",
        StationListNetwork => "gasStation.getNetworkStations",
        StationCreate => "gasStation.createStation",
        StationUpdate => "gasStation.updateStation",
        StationUsers => "gasStation.getStationUsers",
        StationSetStatus => "gasStation.setStationStatus",
        StationTransactions => "gasStation.getStationTransactions",
        WithdrawalRequest => "gasStation.requestWithdrawal",
        WithdrawalList => "gasStation.getWithdrawals",
        VehicleGet => "fleet.getVehicle",
        VehicleList => "fleet.getFleetVehicles",
        VehicleCreate => "fleet.createVehicle",
        VehicleUpdate => "fleet.updateVehicle",
        FleetUsers => "fleet.getFleetUsers",
        FleetAssignVehicles => "fleet.assignVehicles",
        FleetAllocate => "fleet.allocateBalance",
        VehicleTransactions => "fleet.getVehicleTransactions",
        DependentList => "family.getFamilyDependents",
        DependentCreate => "family.createDependent",
        DependentUpdate => "family.updateDependent",
        DependentBalance => "family.getDependentBalance",
        FamilyAllocate => "family.allocateBalance",
        DependentTransactions => "family.getDependentTransactions",
        QrGenerate => "wallet.generateQrCode",
        QrList => "wallet.getQrCodes",
        QrLookup => "wallet.lookupQrCode",
        FuelPurchase => "wallet.recordFuelPurchase",
        RechargeCreate => "wallet.createRecharge",
        RechargeList => "wallet.getRecharges",
        InvitationCreate => "invitations.create",
        InvitationList => "invitations.listForProfile",
        InvitationCancel => "invitations.cancel",
        UserGet => "auth.getUserById",
        UserList => "auth.listUsers",
        UserSuspend => "auth.suspendUser",
        UserActivate => "auth.activateUser",
        RechargeConfirm => "admin.confirmRecharge",
        RechargeFail => "admin.failRecharge",
        WithdrawalProcess => "admin.processWithdrawal",
        TransactionRefund => "admin.refundTransaction",
        MatrixView => "system.permissionMatrix",
    }
}

use AccountType::{Family as Fam, Fleet as Flt, GasStation as Gs};
use Grant::{AssignedOnly, LinkedOnly, Membership, OwnProfile};

type Rule = (AccountType, Role, Grant);

const HEADS: &[Rule] = &[
    (Gs, Role::Owner, OwnProfile),
    (Flt, Role::Owner, OwnProfile),
    (Fam, Role::Responsible, OwnProfile),
];
const NETWORK_OWNER: &[Rule] = &[(Gs, Role::Owner, OwnProfile)];
const NETWORK_SUPERVISION: &[Rule] = &[
    (Gs, Role::Owner, OwnProfile),
    (Gs, Role::Supervisor, Membership),
];
const STATION_MANAGEMENT: &[Rule] = &[
    (Gs, Role::Owner, OwnProfile),
    (Gs, Role::Supervisor, Membership),
    (Gs, Role::Manager, Membership),
];
const STATION_OPERATION: &[Rule] = &[
    (Gs, Role::Owner, OwnProfile),
    (Gs, Role::Supervisor, Membership),
    (Gs, Role::Manager, Membership),
    (Gs, Role::Cashier, Membership),
    (Gs, Role::Attendant, Membership),
];
const FLEET_OWNER: &[Rule] = &[(Flt, Role::Owner, OwnProfile)];
const FLEET_MEMBERS: &[Rule] = &[
    (Flt, Role::Owner, OwnProfile),
    (Flt, Role::Finance, Membership),
    (Flt, Role::Driver, Membership),
];
const FLEET_VEHICLES: &[Rule] = &[
    (Flt, Role::Owner, OwnProfile),
    (Flt, Role::Finance, Membership),
    (Flt, Role::Driver, AssignedOnly),
];
const FLEET_FINANCE: &[Rule] = &[
    (Flt, Role::Owner, OwnProfile),
    (Flt, Role::Finance, Membership),
];
const FAMILY_RESPONSIBLE: &[Rule] = &[(Fam, Role::Responsible, OwnProfile)];
const FAMILY_MEMBERS: &[Rule] = &[
    (Fam, Role::Responsible, OwnProfile),
    (Fam, Role::Dependent, LinkedOnly),
];
const QR_ISSUERS: &[Rule] = &[
    (Flt, Role::Owner, OwnProfile),
    (Fam, Role::Responsible, OwnProfile),
];
const QR_HOLDERS: &[Rule] = &[
    (Flt, Role::Owner, OwnProfile),
    (Flt, Role::Finance, Membership),
    (Flt, Role::Driver, AssignedOnly),
    (Fam, Role::Responsible, OwnProfile),
    (Fam, Role::Dependent, LinkedOnly),
];
const FUNDERS: &[Rule] = &[
    (Flt, Role::Owner, OwnProfile),
    (Flt, Role::Finance, Membership),
    (Fam, Role::Responsible, OwnProfile),
];

impl Action {
    fn rules(self) -> &'static [Rule] {
        use Action::*;
        match self {
            ProfileCreate => &[
                (Gs, Role::Owner, Grant::Always),
                (Flt, Role::Owner, Grant::Always),
                (Fam, Role::Responsible, Grant::Always),
            ],
            ProfileGet | ProfileUpdate | ProfileBalance => HEADS,
            StationListNetwork | WithdrawalList => NETWORK_SUPERVISION,
            StationCreate | StationSetStatus | WithdrawalRequest => NETWORK_OWNER,
            StationGet | StationUpdate | StationUsers | StationTransactions => STATION_MANAGEMENT,
            VehicleGet | VehicleList | VehicleTransactions => FLEET_VEHICLES,
            VehicleCreate | VehicleUpdate | FleetAssignVehicles => FLEET_OWNER,
            FleetUsers => FLEET_MEMBERS,
            FleetAllocate => FLEET_FINANCE,
            DependentList | DependentBalance | DependentTransactions => FAMILY_MEMBERS,
            DependentCreate | DependentUpdate | FamilyAllocate => FAMILY_RESPONSIBLE,
            QrGenerate => QR_ISSUERS,
            QrList => QR_HOLDERS,
            QrLookup | FuelPurchase => STATION_OPERATION,
            RechargeCreate | RechargeList => FUNDERS,
            InvitationCreate | InvitationList | InvitationCancel => HEADS,
            UserGet | UserList | UserSuspend | UserActivate | RechargeConfirm | RechargeFail
            | WithdrawalProcess | TransactionRefund | MatrixView => &[],
        }
    }
}

/// Grant for one cell of the matrix. Administrators get [`Grant::Always`].
pub fn grant(action: Action, account_type: AccountType, role: Role) -> Grant {
    if account_type == AccountType::Admin && role == Role::Admin {
        return Grant::Always;
    }
    action
        .rules()
        .iter()
        .find(|(a, r, _)| *a == account_type && *r == role)
        .map(|(_, _, g)| *g)
        .unwrap_or(Grant::Never)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixCell {
    pub account_type: AccountType,
    pub role: Role,
    pub grant: Grant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixRow {
    pub action: Action,
    pub grants: Vec<MatrixCell>,
}

/// Full matrix: every action × every valid (account type, role) pair.
pub fn permission_matrix() -> Vec<MatrixRow> {
    Action::ALL
        .iter()
        .map(|action| MatrixRow {
            action: *action,
            grants: account_roles()
                .map(|(account_type, role)| MatrixCell {
                    account_type,
                    role,
                    grant: grant(*action, account_type, role),
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorize::fixtures::*;
    use crate::authorize::*;
    use iapos_fleet::FleetRole;
    use iapos_profiles::ProfileType;
    use iapos_stations::StationRole;
    use proptest::prelude::*;

    #[test]
    fn rules_only_name_valid_account_role_pairs() {
        for action in Action::ALL {
            for (a, r, _) in action.rules() {
                assert!(a.permits(*r), "{action}: {a}/{r}");
            }
        }
    }

    #[test]
    fn admin_only_actions() {
        assert_eq!(grant(Action::UserSuspend, AccountType::Admin, Role::Admin), Grant::Always);
        assert_eq!(grant(Action::UserSuspend, AccountType::Fleet, Role::Owner), Grant::Never);
        assert_eq!(grant(Action::MatrixView, AccountType::GasStation, Role::Owner), Grant::Never);
    }

    #[test]
    fn matrix_shape() {
        let m = permission_matrix();
        assert_eq!(m.len(), Action::ALL.len());
        assert!(m.iter().all(|row| row.grants.len() == 11));
        let json = serde_json::to_value(&m[0]).unwrap();
        assert_eq!(json["action"], "profile.createProfile");
        assert!(json["grants"][0]["accountType"].is_string());
    }

    fn pair() -> impl Strategy<Value = (AccountType, Role)> {
        let pairs: Vec<(AccountType, Role)> = account_roles().collect();
        proptest::sample::select(pairs)
    }

    fn station_role(role: Role) -> Option<StationRole> {
        match role {
            Role::Supervisor => Some(StationRole::Supervisor),
            Role::Manager => Some(StationRole::Manager),
            Role::Cashier => Some(StationRole::Cashier),
            Role::Attendant => Some(StationRole::Attendant),
            _ => None,
        }
    }

    /// Invitations only create finance and driver rows.
    fn fleet_role(role: Role) -> Option<FleetRole> {
        match role {
            Role::Finance => Some(FleetRole::Finance),
            Role::Driver => Some(FleetRole::Driver),
            _ => None,
        }
    }

    proptest! {
        /// Property: whenever a station predicate admits a caller, the matrix
        /// does not say `never` for that caller's account type and role, and
        /// `own_profile` cells are only satisfied by the profile owner.
        #[test]
        fn station_predicates_agree_with_matrix((account, role) in pair(), owns in any::<bool>(), member in any::<bool>()) {
            let u = user(1, account, role);
            let network = profile(10, if owns { 1 } else { 2 }, ProfileType::GasStationNetwork);
            let st = station(100, 10);
            let memberships: Vec<_> = station_role(role)
                .filter(|_| member)
                .map(|r| station_member(1, 100, r))
                .into_iter()
                .collect();

            let checks = [
                (Action::StationGet, can_manage_gas_station(&u, &st, &network, &memberships)),
                (Action::StationListNetwork, is_gas_station_network_supervisor(&u, &network, &memberships)),
                (Action::StationCreate, is_gas_station_network_owner(&u, &network)),
                (Action::FuelPurchase, can_operate_gas_station(&u, &st, &network, &memberships)),
            ];
            for (action, allowed) in checks {
                let g = grant(action, account, role);
                if allowed {
                    prop_assert_ne!(g, Grant::Never, "{} allowed {}/{}", action, account, role);
                    if g == Grant::OwnProfile {
                        prop_assert!(owns);
                    }
                    if g == Grant::Membership {
                        prop_assert!(member);
                    }
                }
            }
        }

        /// Property: fleet predicates stay inside the matrix.
        #[test]
        fn fleet_predicates_agree_with_matrix((account, role) in pair(), owns in any::<bool>(), member in any::<bool>(), assigned in any::<bool>()) {
            let u = user(1, account, role);
            let fleet = profile(20, if owns { 1 } else { 2 }, ProfileType::Fleet);
            let v = vehicle(31, 20);
            let slots: &[i64] = if assigned { &[31] } else { &[] };
            let m = fleet_role(role)
                .filter(|_| member)
                .map(|r| fleet_member(1, 20, r, slots));

            let checks = [
                (Action::FleetUsers, can_access_fleet_data(&u, &fleet, m.as_ref())),
                (Action::VehicleGet, can_access_vehicle(&u, &fleet, m.as_ref(), &v)),
                (Action::FleetAllocate, can_manage_fleet_finances(&u, &fleet, m.as_ref())),
                (Action::VehicleCreate, is_fleet_owner(&u, &fleet)),
            ];
            for (action, allowed) in checks {
                let g = grant(action, account, role);
                if allowed {
                    prop_assert_ne!(g, Grant::Never, "{} allowed {}/{}", action, account, role);
                    if g == Grant::AssignedOnly {
                        prop_assert!(member && assigned);
                    }
                    if g == Grant::OwnProfile {
                        prop_assert!(owns);
                    }
                }
            }
        }

        /// Property: family predicates stay inside the matrix.
        #[test]
        fn family_predicates_agree_with_matrix((account, role) in pair(), owns in any::<bool>(), linked in any::<bool>()) {
            let u = user(1, account, role);
            let family = profile(30, if owns { 1 } else { 2 }, ProfileType::Family);
            let d = dependent(41, 30, linked.then_some(1));
            let link = linked.then_some(&d);

            let checks = [
                (Action::DependentList, can_access_family_data(&u, &family, link)),
                (Action::DependentBalance, can_access_dependent(&u, &family, link, &d)),
                (Action::DependentCreate, is_family_responsible(&u, &family)),
            ];
            for (action, allowed) in checks {
                let g = grant(action, account, role);
                if allowed {
                    prop_assert_ne!(g, Grant::Never, "{} allowed {}/{}", action, account, role);
                    if g == Grant::LinkedOnly {
                        prop_assert!(linked);
                    }
                }
            }
        }
    }
}
