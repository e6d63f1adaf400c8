//! In-memory [`Store`](super::Store) for development and tests.
//!
//! All tables sit behind one `RwLock`, so every multi-row operation is
//! trivially atomic: it runs to completion under the write guard or leaves
//! the tables untouched. Operations compute every new value first and only
//! then mutate, so an error halfway through never leaves a partial write.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use iapos_auth::{
    AccountType, Invitation, InvitationStatus, InviteProfileType, NewInvitation, User, UserStatus,
    UserUpsert,
};
use iapos_core::{
    DependentId, DomainError, GasStationId, InvitationId, MembershipId, Money, NotificationId,
    ProfileId, QrCodeId, RechargeId, RecordStatus, TransactionId, UserId, VehicleId, WithdrawalId,
};
use iapos_family::{Dependent, DependentChanges, NewDependent};
use iapos_fleet::{FleetMembership, FleetRole, NewVehicle, Vehicle, VehicleChanges};
use iapos_notifications::{NewNotification, Notification};
use iapos_profiles::{NewProfile, Profile, ProfileChanges};
use iapos_stations::{
    GasStation, GasStationChanges, NewGasStation, NewWithdrawal, StationMembership, Withdrawal,
    WithdrawalStatus,
};
use iapos_wallet::{
    allocate, Allocation, BalanceRecharge, FuelTransaction, NewFuelTransaction, NewQrCode,
    NewRecharge, QrCode, QrHolder, QrStatus,
};

use super::{
    accepted_account, invited_fleet_role, invited_station_role, Acceptance, FamilyRepository,
    FleetRepository, InvitationRepository, NotificationRepository, ProfileRepository,
    PurchaseReceipt, PurchaseRequest, Refund, StationRepository, StoreError, StoreResult,
    UserRepository, WalletRepository,
};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.inner
            .read()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.inner
            .write()
            .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
    }
}

#[derive(Debug, Default)]
struct Sequence(i64);

impl Sequence {
    fn next(&mut self) -> i64 {
        self.0 += 1;
        self.0
    }
}

#[derive(Debug, Default)]
struct Tables {
    seq: Sequence,
    users: BTreeMap<UserId, User>,
    profiles: BTreeMap<ProfileId, Profile>,
    stations: BTreeMap<GasStationId, GasStation>,
    station_members: BTreeMap<MembershipId, StationMembership>,
    withdrawals: BTreeMap<WithdrawalId, Withdrawal>,
    vehicles: BTreeMap<VehicleId, Vehicle>,
    fleet_members: BTreeMap<MembershipId, FleetMembership>,
    dependents: BTreeMap<DependentId, Dependent>,
    qr_codes: BTreeMap<QrCodeId, QrCode>,
    transactions: BTreeMap<TransactionId, FuelTransaction>,
    recharges: BTreeMap<RechargeId, BalanceRecharge>,
    notifications: BTreeMap<NotificationId, Notification>,
    invitations: BTreeMap<InvitationId, Invitation>,
}

/// Balance and owner of the wallet behind a QR code.
struct HolderWallet {
    payer_profile_id: ProfileId,
    balance: Money,
    active: bool,
}

fn newest_first<T>(rows: impl DoubleEndedIterator<Item = T>) -> Vec<T> {
    rows.rev().collect()
}

fn credit(balance: Money, amount: Money) -> StoreResult<Money> {
    balance
        .checked_add(amount)
        .ok_or_else(|| StoreError::Domain(DomainError::validation("balance is out of range")))
}

impl Tables {
    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    fn profile(&self, id: ProfileId) -> StoreResult<&Profile> {
        self.profiles.get(&id).ok_or_else(|| StoreError::not_found("Profile"))
    }

    fn profile_mut(&mut self, id: ProfileId) -> StoreResult<&mut Profile> {
        self.profiles.get_mut(&id).ok_or_else(|| StoreError::not_found("Profile"))
    }

    fn vehicle_mut(&mut self, id: VehicleId) -> StoreResult<&mut Vehicle> {
        self.vehicles.get_mut(&id).ok_or_else(|| StoreError::not_found("Vehicle"))
    }

    fn dependent_mut(&mut self, id: DependentId) -> StoreResult<&mut Dependent> {
        self.dependents.get_mut(&id).ok_or_else(|| StoreError::not_found("Dependent"))
    }

    fn holder_wallet(&self, holder: QrHolder) -> StoreResult<HolderWallet> {
        match holder {
            QrHolder::Vehicle(id) => {
                let v = self.vehicles.get(&id).ok_or_else(|| StoreError::not_found("Vehicle"))?;
                Ok(HolderWallet {
                    payer_profile_id: v.fleet_id,
                    balance: v.balance,
                    active: v.can_refuel(),
                })
            }
            QrHolder::Dependent(id) => {
                let d = self.dependents.get(&id).ok_or_else(|| StoreError::not_found("Dependent"))?;
                Ok(HolderWallet {
                    payer_profile_id: d.family_id,
                    balance: d.balance,
                    active: d.status.is_active(),
                })
            }
        }
    }

    fn set_holder_balance(&mut self, holder: QrHolder, balance: Money, now: DateTime<Utc>) -> StoreResult<()> {
        match holder {
            QrHolder::Vehicle(id) => {
                let v = self.vehicle_mut(id)?;
                v.balance = balance;
                v.updated_at = now;
            }
            QrHolder::Dependent(id) => {
                let d = self.dependent_mut(id)?;
                d.balance = balance;
                d.updated_at = now;
            }
        }
        Ok(())
    }

    fn set_profile_balance(&mut self, id: ProfileId, balance: Money, now: DateTime<Utc>) -> StoreResult<()> {
        let p = self.profile_mut(id)?;
        p.balance = balance;
        p.updated_at = now;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wallet flows
    // ─────────────────────────────────────────────────────────────────────────

    fn record_fuel_purchase(&mut self, req: PurchaseRequest, now: DateTime<Utc>) -> StoreResult<PurchaseReceipt> {
        let qr = self
            .qr_codes
            .values_mut()
            .find(|q| q.code == req.code)
            .ok_or_else(|| StoreError::not_found("QR code"))?;
        if qr.status == QrStatus::Active && qr.is_expired(now) {
            qr.status = QrStatus::Expired;
        }
        qr.check_usable(now)?;
        let (qr_code_id, holder) = (qr.id, qr.holder());

        let wallet = self.holder_wallet(holder)?;
        if !wallet.active {
            return Err(StoreError::invariant(format!("{} is not active", holder.entity_type())));
        }
        let (total, rest) = req.purchase.settle(wallet.balance)?;
        let network_balance = credit(self.profile(req.network_id)?.balance, total)?;

        let tx = NewFuelTransaction {
            qr_code_id,
            gas_station_id: req.gas_station_id,
            network_id: req.network_id,
            attendant_id: req.attendant_id,
            holder,
            payer_profile_id: wallet.payer_profile_id,
            purchase: req.purchase,
            total,
        }
        .into_transaction(TransactionId::new(self.seq.next()), now);

        self.set_holder_balance(holder, rest, now)?;
        self.set_profile_balance(req.network_id, network_balance, now)?;
        self.transactions.insert(tx.id, tx.clone());

        Ok(PurchaseReceipt {
            transaction: tx,
            balance_before: wallet.balance,
            balance_after: rest,
        })
    }

    fn refund_transaction(&mut self, id: TransactionId, now: DateTime<Utc>) -> StoreResult<Refund> {
        let mut tx = self
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Transaction"))?;
        let amount = tx.refund()?;
        let holder = tx.holder();

        let holder_balance = credit(self.holder_wallet(holder)?.balance, amount)?;
        let network_balance = self
            .profile(tx.network_id)?
            .balance
            .checked_sub(amount)
            .filter(|b| !b.is_negative())
            .ok_or_else(|| StoreError::invariant("network balance does not cover the refund"))?;

        self.set_holder_balance(holder, holder_balance, now)?;
        self.set_profile_balance(tx.network_id, network_balance, now)?;
        self.transactions.insert(id, tx.clone());
        Ok(Refund {
            transaction: tx,
            holder_balance,
        })
    }

    fn issue_qr_code(&mut self, qr: NewQrCode, code: String, now: DateTime<Utc>) -> StoreResult<QrCode> {
        let qr = qr.validate(now)?;
        let wallet = self.holder_wallet(qr.holder)?;
        if wallet.payer_profile_id != qr.profile_id {
            return Err(StoreError::Domain(DomainError::validation(
                "entity does not belong to this profile",
            )));
        }
        if self.qr_codes.values().any(|q| q.code == code) {
            return Err(StoreError::conflict("QR code already exists"));
        }

        let mut replaces_previous = false;
        for previous in self.qr_codes.values_mut() {
            if previous.holder() == qr.holder && previous.status == QrStatus::Active {
                previous.status = QrStatus::Inactive;
                replaces_previous = true;
            }
        }

        let holder = qr.holder;
        let created = qr.into_qr_code(QrCodeId::new(self.seq.next()), code, replaces_previous, now);
        match holder {
            QrHolder::Vehicle(id) => {
                let v = self.vehicle_mut(id)?;
                v.qr_code_id = Some(created.id);
                v.updated_at = now;
            }
            QrHolder::Dependent(id) => {
                let d = self.dependent_mut(id)?;
                d.qr_code_id = Some(created.id);
                d.updated_at = now;
            }
        }
        self.qr_codes.insert(created.id, created.clone());
        Ok(created)
    }

    fn confirm_recharge(
        &mut self,
        reference_code: &str,
        transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<BalanceRecharge> {
        let mut recharge = self
            .recharges
            .values()
            .find(|r| r.reference_code == reference_code)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Recharge"))?;
        let amount = recharge.confirm(transaction_id, now)?;
        let balance = credit(self.profile(recharge.profile_id)?.balance, amount)?;

        self.set_profile_balance(recharge.profile_id, balance, now)?;
        self.recharges.insert(recharge.id, recharge.clone());
        Ok(recharge)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invitations
    // ─────────────────────────────────────────────────────────────────────────

    fn accept_invitation(&mut self, token: &str, user_id: UserId, now: DateTime<Utc>) -> StoreResult<Acceptance> {
        let stored = self
            .invitations
            .values_mut()
            .find(|i| i.token == token)
            .ok_or_else(|| StoreError::not_found("Invitation"))?;
        if stored.status == InvitationStatus::Pending && stored.is_expired(now) {
            stored.expire();
            return Err(StoreError::invariant("invitation has expired"));
        }
        let mut invitation = stored.clone();
        invitation.accept(now)?;

        let mut user = self
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("User"))?;

        match invitation.profile_type {
            InviteProfileType::GasStation => {
                let role = invited_station_role(&invitation)?;
                let station_id = invitation
                    .gas_station_id
                    .ok_or_else(|| StoreError::invariant("invitation has no station"))?;
                let station = self
                    .stations
                    .get(&station_id)
                    .ok_or_else(|| StoreError::not_found("Gas station"))?;
                if station.network_id != invitation.profile_id {
                    return Err(StoreError::invariant("station does not belong to the invited network"));
                }
                if self
                    .station_members
                    .values()
                    .any(|m| m.gas_station_id == station_id && m.user_id == user_id)
                {
                    return Err(StoreError::conflict("user is already a member of this station"));
                }
                let membership = StationMembership {
                    id: MembershipId::new(self.seq.next()),
                    gas_station_id: station_id,
                    user_id,
                    role,
                    status: RecordStatus::Active,
                    invited_at: Some(invitation.created_at),
                    accepted_at: Some(now),
                    created_at: now,
                };
                self.station_members.insert(membership.id, membership);
            }
            InviteProfileType::Fleet => {
                let role = invited_fleet_role(&invitation)?;
                if self
                    .fleet_members
                    .values()
                    .any(|m| m.fleet_id == invitation.profile_id && m.user_id == user_id)
                {
                    return Err(StoreError::conflict("user is already a member of this fleet"));
                }
                let membership = FleetMembership {
                    id: MembershipId::new(self.seq.next()),
                    fleet_id: invitation.profile_id,
                    user_id,
                    role,
                    status: RecordStatus::Active,
                    assigned_vehicles: Vec::new(),
                    invited_at: Some(invitation.created_at),
                    accepted_at: Some(now),
                    created_at: now,
                };
                self.fleet_members.insert(membership.id, membership);
            }
            InviteProfileType::Family => {
                let dependent_id = invitation
                    .dependent_id
                    .ok_or_else(|| StoreError::invariant("invitation has no dependent"))?;
                if self.dependents.values().any(|d| d.is_linked_to(user_id)) {
                    return Err(StoreError::conflict("user is already linked to a dependent"));
                }
                let profile_id = invitation.profile_id;
                let dependent = self.dependent_mut(dependent_id)?;
                if dependent.family_id != profile_id {
                    return Err(StoreError::invariant("dependent does not belong to the invited family"));
                }
                if dependent.user_id.is_some() {
                    return Err(StoreError::conflict("dependent is already linked to a user"));
                }
                dependent.user_id = Some(user_id);
                dependent.updated_at = now;
            }
        }

        let (account_type, role) = accepted_account(&invitation);
        user.account_type = account_type;
        user.role = role;
        user.updated_at = now;
        self.users.insert(user.id, user.clone());
        self.invitations.insert(invitation.id, invitation.clone());

        Ok(Acceptance { invitation, user })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository impls
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn upsert_user(&self, upsert: UserUpsert, now: DateTime<Utc>) -> StoreResult<User> {
        let upsert = upsert.validate()?;
        let mut t = self.write()?;
        if let Some(user) = t.users.values_mut().find(|u| u.open_id == upsert.open_id) {
            upsert.apply(user, now)?;
            return Ok(user.clone());
        }
        let user = upsert.into_user(UserId::new(t.seq.next()), now)?;
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.values().find(|u| u.has_email(email)).cloned())
    }

    async fn list_users(&self, account_type: Option<AccountType>) -> StoreResult<Vec<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .filter(|u| account_type.is_none_or(|a| u.account_type == a))
            .cloned()
            .collect())
    }

    async fn set_user_status(&self, id: UserId, status: UserStatus, now: DateTime<Utc>) -> StoreResult<User> {
        let mut t = self.write()?;
        let user = t.users.get_mut(&id).ok_or_else(|| StoreError::not_found("User"))?;
        user.status = status;
        user.updated_at = now;
        Ok(user.clone())
    }
}

#[async_trait]
impl ProfileRepository for InMemoryStore {
    async fn create_profile(&self, profile: NewProfile, now: DateTime<Utc>) -> StoreResult<Profile> {
        let profile = profile.validate()?;
        let mut t = self.write()?;
        if t.profiles.values().any(|p| p.cnpj_cpf == profile.cnpj_cpf) {
            return Err(StoreError::conflict("a profile with this CNPJ/CPF already exists"));
        }
        let created = profile.into_profile(ProfileId::new(t.seq.next()), now);
        t.profiles.insert(created.id, created.clone());
        Ok(created)
    }

    async fn profile_by_id(&self, id: ProfileId) -> StoreResult<Option<Profile>> {
        Ok(self.read()?.profiles.get(&id).cloned())
    }

    async fn profiles_by_user(&self, user_id: UserId) -> StoreResult<Vec<Profile>> {
        Ok(self
            .read()?
            .profiles
            .values()
            .filter(|p| p.is_owned_by(user_id))
            .cloned()
            .collect())
    }

    async fn update_profile(&self, id: ProfileId, changes: ProfileChanges, now: DateTime<Utc>) -> StoreResult<Profile> {
        let changes = changes.validate()?;
        let mut t = self.write()?;
        let profile = t.profile_mut(id)?;
        changes.apply(profile, now);
        Ok(profile.clone())
    }
}

#[async_trait]
impl StationRepository for InMemoryStore {
    async fn create_station(&self, station: NewGasStation, now: DateTime<Utc>) -> StoreResult<GasStation> {
        let station = station.validate()?;
        let mut t = self.write()?;
        t.profile(station.network_id)?;
        if t.stations.values().any(|s| s.cnpj == station.cnpj) {
            return Err(StoreError::conflict("a gas station with this CNPJ already exists"));
        }
        let created = station.into_station(GasStationId::new(t.seq.next()), now);
        t.stations.insert(created.id, created.clone());
        Ok(created)
    }

    async fn station_by_id(&self, id: GasStationId) -> StoreResult<Option<GasStation>> {
        Ok(self.read()?.stations.get(&id).cloned())
    }

    async fn stations_by_network(&self, network_id: ProfileId) -> StoreResult<Vec<GasStation>> {
        Ok(self
            .read()?
            .stations
            .values()
            .filter(|s| s.network_id == network_id)
            .cloned()
            .collect())
    }

    async fn update_station(
        &self,
        id: GasStationId,
        changes: GasStationChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<GasStation> {
        let changes = changes.validate()?;
        let mut t = self.write()?;
        let station = t.stations.get_mut(&id).ok_or_else(|| StoreError::not_found("Gas station"))?;
        changes.apply(station, now);
        Ok(station.clone())
    }

    async fn set_station_status(
        &self,
        id: GasStationId,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<GasStation> {
        let mut t = self.write()?;
        let station = t.stations.get_mut(&id).ok_or_else(|| StoreError::not_found("Gas station"))?;
        station.status = status;
        station.updated_at = now;
        Ok(station.clone())
    }

    async fn station_members(&self, station_id: GasStationId) -> StoreResult<Vec<StationMembership>> {
        Ok(self
            .read()?
            .station_members
            .values()
            .filter(|m| m.gas_station_id == station_id)
            .cloned()
            .collect())
    }

    async fn memberships_in_network(
        &self,
        user_id: UserId,
        network_id: ProfileId,
    ) -> StoreResult<Vec<StationMembership>> {
        let t = self.read()?;
        Ok(t.station_members
            .values()
            .filter(|m| m.user_id == user_id)
            .filter(|m| {
                t.stations
                    .get(&m.gas_station_id)
                    .is_some_and(|s| s.network_id == network_id)
            })
            .cloned()
            .collect())
    }

    async fn create_withdrawal(&self, withdrawal: NewWithdrawal, now: DateTime<Utc>) -> StoreResult<Withdrawal> {
        let mut t = self.write()?;
        let available = t.profile(withdrawal.network_id)?.balance;
        let withdrawal = withdrawal.validate(available)?;
        let remaining = available
            .checked_sub(withdrawal.amount)
            .ok_or_else(|| StoreError::invariant("insufficient balance for withdrawal"))?;

        let created = withdrawal.into_withdrawal(WithdrawalId::new(t.seq.next()), now);
        t.set_profile_balance(created.network_id, remaining, now)?;
        t.withdrawals.insert(created.id, created.clone());
        Ok(created)
    }

    async fn withdrawal_by_id(&self, id: WithdrawalId) -> StoreResult<Option<Withdrawal>> {
        Ok(self.read()?.withdrawals.get(&id).cloned())
    }

    async fn withdrawals_by_network(&self, network_id: ProfileId) -> StoreResult<Vec<Withdrawal>> {
        let t = self.read()?;
        Ok(newest_first(
            t.withdrawals.values().filter(|w| w.network_id == network_id).cloned(),
        ))
    }

    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        status: WithdrawalStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Withdrawal> {
        let mut t = self.write()?;
        let mut withdrawal = t
            .withdrawals
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Withdrawal"))?;
        let refund = withdrawal.transition(status, now)?;
        if !refund.is_zero() {
            let balance = credit(t.profile(withdrawal.network_id)?.balance, refund)?;
            t.set_profile_balance(withdrawal.network_id, balance, now)?;
        }
        t.withdrawals.insert(id, withdrawal.clone());
        Ok(withdrawal)
    }
}

#[async_trait]
impl FleetRepository for InMemoryStore {
    async fn create_vehicle(&self, vehicle: NewVehicle, now: DateTime<Utc>) -> StoreResult<Vehicle> {
        let vehicle = vehicle.validate(now)?;
        let mut t = self.write()?;
        t.profile(vehicle.fleet_id)?;
        if t.vehicles.values().any(|v| v.license_plate == vehicle.license_plate) {
            return Err(StoreError::conflict("a vehicle with this license plate already exists"));
        }
        let created = vehicle.into_vehicle(VehicleId::new(t.seq.next()), now);
        t.vehicles.insert(created.id, created.clone());
        Ok(created)
    }

    async fn vehicle_by_id(&self, id: VehicleId) -> StoreResult<Option<Vehicle>> {
        Ok(self.read()?.vehicles.get(&id).cloned())
    }

    async fn vehicles_by_fleet(&self, fleet_id: ProfileId) -> StoreResult<Vec<Vehicle>> {
        Ok(self
            .read()?
            .vehicles
            .values()
            .filter(|v| v.fleet_id == fleet_id)
            .cloned()
            .collect())
    }

    async fn update_vehicle(&self, id: VehicleId, changes: VehicleChanges, now: DateTime<Utc>) -> StoreResult<Vehicle> {
        let changes = changes.validate(now)?;
        let mut t = self.write()?;
        let vehicle = t.vehicle_mut(id)?;
        changes.apply(vehicle, now);
        Ok(vehicle.clone())
    }

    async fn fleet_members(&self, fleet_id: ProfileId) -> StoreResult<Vec<FleetMembership>> {
        Ok(self
            .read()?
            .fleet_members
            .values()
            .filter(|m| m.fleet_id == fleet_id)
            .cloned()
            .collect())
    }

    async fn fleet_membership(&self, fleet_id: ProfileId, user_id: UserId) -> StoreResult<Option<FleetMembership>> {
        Ok(self
            .read()?
            .fleet_members
            .values()
            .find(|m| m.fleet_id == fleet_id && m.user_id == user_id)
            .cloned())
    }

    async fn assign_vehicles(
        &self,
        fleet_id: ProfileId,
        user_id: UserId,
        vehicles: Vec<VehicleId>,
    ) -> StoreResult<FleetMembership> {
        let mut t = self.write()?;
        for id in &vehicles {
            let belongs = t.vehicles.get(id).is_some_and(|v| v.fleet_id == fleet_id);
            if !belongs {
                return Err(StoreError::Domain(DomainError::validation(format!(
                    "vehicle {id} does not belong to this fleet"
                ))));
            }
        }
        let membership = t
            .fleet_members
            .values_mut()
            .find(|m| m.fleet_id == fleet_id && m.user_id == user_id)
            .ok_or_else(|| StoreError::not_found("Fleet member"))?;
        if membership.role != FleetRole::Driver {
            return Err(StoreError::invariant("vehicles can only be assigned to drivers"));
        }
        membership.assign(&vehicles);
        Ok(membership.clone())
    }

    async fn allocate_to_vehicle(&self, vehicle_id: VehicleId, amount: Money, now: DateTime<Utc>) -> StoreResult<Allocation> {
        let mut t = self.write()?;
        let (fleet_id, vehicle_balance) = {
            let v = t.vehicles.get(&vehicle_id).ok_or_else(|| StoreError::not_found("Vehicle"))?;
            (v.fleet_id, v.balance)
        };
        let allocation = allocate(t.profile(fleet_id)?.balance, vehicle_balance, amount)?;
        t.set_profile_balance(fleet_id, allocation.profile_balance, now)?;
        t.set_holder_balance(QrHolder::Vehicle(vehicle_id), allocation.target_balance, now)?;
        Ok(allocation)
    }
}

#[async_trait]
impl FamilyRepository for InMemoryStore {
    async fn create_dependent(&self, dependent: NewDependent, now: DateTime<Utc>) -> StoreResult<Dependent> {
        let dependent = dependent.validate()?;
        let mut t = self.write()?;
        t.profile(dependent.family_id)?;
        let created = dependent.into_dependent(DependentId::new(t.seq.next()), now);
        t.dependents.insert(created.id, created.clone());
        Ok(created)
    }

    async fn dependent_by_id(&self, id: DependentId) -> StoreResult<Option<Dependent>> {
        Ok(self.read()?.dependents.get(&id).cloned())
    }

    async fn dependents_by_family(&self, family_id: ProfileId) -> StoreResult<Vec<Dependent>> {
        Ok(self
            .read()?
            .dependents
            .values()
            .filter(|d| d.family_id == family_id)
            .cloned()
            .collect())
    }

    async fn dependent_for_user(&self, user_id: UserId) -> StoreResult<Option<Dependent>> {
        Ok(self
            .read()?
            .dependents
            .values()
            .find(|d| d.is_linked_to(user_id))
            .cloned())
    }

    async fn update_dependent(
        &self,
        id: DependentId,
        changes: DependentChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<Dependent> {
        let changes = changes.validate()?;
        let mut t = self.write()?;
        let dependent = t.dependent_mut(id)?;
        changes.apply(dependent, now);
        Ok(dependent.clone())
    }

    async fn allocate_to_dependent(
        &self,
        dependent_id: DependentId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation> {
        let mut t = self.write()?;
        let (family_id, dependent_balance) = {
            let d = t
                .dependents
                .get(&dependent_id)
                .ok_or_else(|| StoreError::not_found("Dependent"))?;
            (d.family_id, d.balance)
        };
        let allocation = allocate(t.profile(family_id)?.balance, dependent_balance, amount)?;
        t.set_profile_balance(family_id, allocation.profile_balance, now)?;
        t.set_holder_balance(QrHolder::Dependent(dependent_id), allocation.target_balance, now)?;
        Ok(allocation)
    }
}

#[async_trait]
impl WalletRepository for InMemoryStore {
    async fn issue_qr_code(&self, qr: NewQrCode, code: String, now: DateTime<Utc>) -> StoreResult<QrCode> {
        self.write()?.issue_qr_code(qr, code, now)
    }

    async fn qr_code_by_code(&self, code: &str) -> StoreResult<Option<QrCode>> {
        Ok(self.read()?.qr_codes.values().find(|q| q.code == code).cloned())
    }

    async fn qr_codes_for(&self, holder: QrHolder) -> StoreResult<Vec<QrCode>> {
        let t = self.read()?;
        Ok(newest_first(
            t.qr_codes.values().filter(|q| q.holder() == holder).cloned(),
        ))
    }

    async fn record_fuel_purchase(&self, request: PurchaseRequest, now: DateTime<Utc>) -> StoreResult<PurchaseReceipt> {
        self.write()?.record_fuel_purchase(request, now)
    }

    async fn transaction_by_id(&self, id: TransactionId) -> StoreResult<Option<FuelTransaction>> {
        Ok(self.read()?.transactions.get(&id).cloned())
    }

    async fn transactions_for_station(&self, station_id: GasStationId) -> StoreResult<Vec<FuelTransaction>> {
        let t = self.read()?;
        Ok(newest_first(
            t.transactions
                .values()
                .filter(|tx| tx.gas_station_id == station_id)
                .cloned(),
        ))
    }

    async fn transactions_for_holder(&self, holder: QrHolder) -> StoreResult<Vec<FuelTransaction>> {
        let t = self.read()?;
        Ok(newest_first(
            t.transactions.values().filter(|tx| tx.holder() == holder).cloned(),
        ))
    }

    async fn refund_transaction(&self, id: TransactionId, now: DateTime<Utc>) -> StoreResult<Refund> {
        self.write()?.refund_transaction(id, now)
    }

    async fn create_recharge(
        &self,
        recharge: NewRecharge,
        reference_code: String,
        now: DateTime<Utc>,
    ) -> StoreResult<BalanceRecharge> {
        let recharge = recharge.validate()?;
        let mut t = self.write()?;
        t.profile(recharge.profile_id)?;
        if t.recharges.values().any(|r| r.reference_code == reference_code) {
            return Err(StoreError::conflict("recharge reference code already exists"));
        }
        let created = recharge.into_recharge(RechargeId::new(t.seq.next()), reference_code, now);
        t.recharges.insert(created.id, created.clone());
        Ok(created)
    }

    async fn recharges_by_profile(&self, profile_id: ProfileId) -> StoreResult<Vec<BalanceRecharge>> {
        let t = self.read()?;
        Ok(newest_first(
            t.recharges.values().filter(|r| r.profile_id == profile_id).cloned(),
        ))
    }

    async fn confirm_recharge(
        &self,
        reference_code: &str,
        transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<BalanceRecharge> {
        self.write()?.confirm_recharge(reference_code, transaction_id, now)
    }

    async fn fail_recharge(&self, reference_code: &str) -> StoreResult<BalanceRecharge> {
        let mut t = self.write()?;
        let recharge = t
            .recharges
            .values_mut()
            .find(|r| r.reference_code == reference_code)
            .ok_or_else(|| StoreError::not_found("Recharge"))?;
        recharge.fail()?;
        Ok(recharge.clone())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn create_notification(&self, notification: NewNotification, now: DateTime<Utc>) -> StoreResult<Notification> {
        let notification = notification.validate()?;
        let mut t = self.write()?;
        let created = notification.into_notification(NotificationId::new(t.seq.next()), now);
        t.notifications.insert(created.id, created.clone());
        Ok(created)
    }

    async fn notifications_for(&self, user_id: UserId, unread_only: bool) -> StoreResult<Vec<Notification>> {
        let t = self.read()?;
        Ok(newest_first(
            t.notifications
                .values()
                .filter(|n| n.user_id == user_id && (!unread_only || !n.read))
                .cloned(),
        ))
    }

    async fn mark_notification_read(&self, user_id: UserId, id: NotificationId) -> StoreResult<Notification> {
        let mut t = self.write()?;
        let notification = t
            .notifications
            .get_mut(&id)
            .filter(|n| n.user_id == user_id)
            .ok_or_else(|| StoreError::not_found("Notification"))?;
        notification.read = true;
        Ok(notification.clone())
    }

    async fn mark_all_read(&self, user_id: UserId) -> StoreResult<u64> {
        let mut t = self.write()?;
        let mut changed = 0;
        for n in t.notifications.values_mut() {
            if n.user_id == user_id && !n.read {
                n.read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl InvitationRepository for InMemoryStore {
    async fn create_invitation(
        &self,
        invitation: NewInvitation,
        token: String,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Invitation> {
        let invitation = invitation.validate()?;
        let mut t = self.write()?;
        if t.invitations.values().any(|i| i.token == token) {
            return Err(StoreError::conflict("invitation token already exists"));
        }
        let created = invitation.into_invitation(InvitationId::new(t.seq.next()), token, ttl, now);
        t.invitations.insert(created.id, created.clone());
        Ok(created)
    }

    async fn invitation_by_id(&self, id: InvitationId) -> StoreResult<Option<Invitation>> {
        Ok(self.read()?.invitations.get(&id).cloned())
    }

    async fn invitation_by_token(&self, token: &str) -> StoreResult<Option<Invitation>> {
        Ok(self.read()?.invitations.values().find(|i| i.token == token).cloned())
    }

    async fn invitations_by_profile(&self, profile_id: ProfileId) -> StoreResult<Vec<Invitation>> {
        let t = self.read()?;
        Ok(newest_first(
            t.invitations.values().filter(|i| i.profile_id == profile_id).cloned(),
        ))
    }

    async fn cancel_invitation(&self, id: InvitationId, now: DateTime<Utc>) -> StoreResult<Invitation> {
        let mut t = self.write()?;
        let invitation = t
            .invitations
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Invitation"))?;
        if invitation.status == InvitationStatus::Pending && invitation.is_expired(now) {
            invitation.expire();
            return Err(StoreError::invariant("invitation has expired"));
        }
        invitation.cancel(now)?;
        Ok(invitation.clone())
    }

    async fn accept_invitation(&self, token: &str, user_id: UserId, now: DateTime<Utc>) -> StoreResult<Acceptance> {
        self.write()?.accept_invitation(token, user_id, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iapos_auth::{generate_token, Role};
    use iapos_core::{FuelType, Liters};
    use iapos_family::Relationship;
    use iapos_fleet::VehicleType;
    use iapos_notifications::NotificationType;
    use iapos_profiles::ProfileType;
    use iapos_stations::{BankAccount, BankAccountType};
    use iapos_wallet::{generate_code, FuelPurchase, PaymentMethod, PaymentStatus, QrEntityType, TransactionStatus};

    fn brl(s: &str) -> Money {
        s.parse().unwrap()
    }

    async fn user(store: &InMemoryStore, open_id: &str, email: &str, account: AccountType) -> User {
        store
            .upsert_user(
                UserUpsert {
                    open_id: open_id.into(),
                    email: Some(email.into()),
                    account_type: Some(account),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    async fn profile(store: &InMemoryStore, owner: UserId, kind: ProfileType, doc: &str) -> Profile {
        store
            .create_profile(
                NewProfile {
                    user_id: owner,
                    profile_type: kind,
                    name: format!("{kind} profile"),
                    cnpj_cpf: doc.into(),
                    legal_name: None,
                    contact_email: None,
                    contact_phone: None,
                    address: None,
                    city: None,
                    state: None,
                    zip_code: None,
                    country: None,
                    tax_id: None,
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    async fn station(store: &InMemoryStore, network: ProfileId) -> GasStation {
        store
            .create_station(
                NewGasStation {
                    network_id: network,
                    name: "Posto Centro".into(),
                    cnpj: "11.444.777/0001-61".into(),
                    address: "Av. Brasil, 100".into(),
                    city: "Rio de Janeiro".into(),
                    state: "RJ".into(),
                    zip_code: None,
                    contact_phone: None,
                    contact_email: None,
                    operating_hours: None,
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    async fn vehicle(store: &InMemoryStore, fleet: ProfileId, plate: &str) -> Vehicle {
        store
            .create_vehicle(
                NewVehicle {
                    fleet_id: fleet,
                    license_plate: plate.into(),
                    vehicle_type: VehicleType::Truck,
                    brand: None,
                    model: None,
                    year: Some(2020),
                    fuel_type: FuelType::Diesel,
                },
                Utc::now(),
            )
            .await
            .unwrap()
    }

    async fn credit_profile(store: &InMemoryStore, profile_id: ProfileId, amount: &str) {
        let now = Utc::now();
        let r = store
            .create_recharge(
                NewRecharge {
                    profile_id,
                    amount: brl(amount),
                    payment_method: PaymentMethod::Pix,
                    notes: None,
                },
                iapos_wallet::generate_reference_code(),
                now,
            )
            .await
            .unwrap();
        store.confirm_recharge(&r.reference_code, None, now).await.unwrap();
    }

    /// Network with one station plus a fleet with one funded vehicle and a QR code.
    struct Scenario {
        store: InMemoryStore,
        network: Profile,
        fleet: Profile,
        station: GasStation,
        vehicle: Vehicle,
        qr: QrCode,
        attendant: User,
    }

    async fn scenario(vehicle_funds: &str) -> Scenario {
        let store = InMemoryStore::new();
        let owner = user(&store, "net-owner", "dono@posto.com.br", AccountType::GasStation).await;
        let network = profile(&store, owner.id, ProfileType::GasStationNetwork, "11.222.333/0001-81").await;
        let station = station(&store, network.id).await;
        let attendant = user(&store, "att", "frentista@posto.com.br", AccountType::GasStation).await;

        let fleet_owner = user(&store, "fleet-owner", "dono@frota.com.br", AccountType::Fleet).await;
        let fleet = profile(&store, fleet_owner.id, ProfileType::Fleet, "529.982.247-25").await;
        let vehicle = vehicle(&store, fleet.id, "ABC1D23").await;
        credit_profile(&store, fleet.id, vehicle_funds).await;
        store
            .allocate_to_vehicle(vehicle.id, brl(vehicle_funds), Utc::now())
            .await
            .unwrap();
        let qr = store
            .issue_qr_code(
                NewQrCode {
                    holder: QrHolder::Vehicle(vehicle.id),
                    profile_id: fleet.id,
                    expires_at: None,
                },
                generate_code(QrEntityType::Vehicle),
                Utc::now(),
            )
            .await
            .unwrap();

        Scenario {
            store,
            network,
            fleet,
            station,
            vehicle,
            qr,
            attendant,
        }
    }

    fn sale(s: &Scenario, liters: &str, price: &str) -> PurchaseRequest {
        PurchaseRequest {
            code: s.qr.code.clone(),
            gas_station_id: s.station.id,
            network_id: s.network.id,
            attendant_id: s.attendant.id,
            purchase: FuelPurchase {
                fuel_type: FuelType::Diesel,
                liters: liters.parse::<Liters>().unwrap(),
                unit_price: brl(price),
            },
        }
    }

    async fn balances(s: &Scenario) -> (Money, Money) {
        let v = s.store.vehicle_by_id(s.vehicle.id).await.unwrap().unwrap();
        let n = s.store.profile_by_id(s.network.id).await.unwrap().unwrap();
        (v.balance, n.balance)
    }

    #[tokio::test]
    async fn upsert_inserts_then_updates_by_open_id() {
        let store = InMemoryStore::new();
        let first = user(&store, "oid-1", "a@b.com", AccountType::Family).await;
        assert_eq!(first.role, Role::Dependent);

        let again = store
            .upsert_user(
                UserUpsert {
                    open_id: "oid-1".into(),
                    name: Some("Ana".into()),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.name.as_deref(), Some("Ana"));
        assert_eq!(again.email.as_deref(), Some("a@b.com"));
        assert_eq!(store.list_users(None).await.unwrap().len(), 1);
        assert!(store.user_by_email("A@B.COM").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_documents_and_plates_conflict() {
        let s = scenario("10.00").await;
        let err = s
            .store
            .create_profile(
                NewProfile {
                    user_id: s.fleet.user_id,
                    profile_type: ProfileType::Fleet,
                    name: "Outra".into(),
                    cnpj_cpf: "52998224725".into(),
                    legal_name: None,
                    contact_email: None,
                    contact_phone: None,
                    address: None,
                    city: None,
                    state: None,
                    zip_code: None,
                    country: None,
                    tax_id: None,
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Conflict(_))));

        let err = s
            .store
            .create_vehicle(
                NewVehicle {
                    fleet_id: s.fleet.id,
                    license_plate: "abc-1d23".into(),
                    vehicle_type: VehicleType::Car,
                    brand: None,
                    model: None,
                    year: None,
                    fuel_type: FuelType::Gasoline,
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn purchase_moves_money_from_vehicle_to_network() {
        let s = scenario("100.00").await;
        let receipt = s
            .store
            .record_fuel_purchase(sale(&s, "10.00", "5.89"), Utc::now())
            .await
            .unwrap();
        assert_eq!(receipt.transaction.total_cost, brl("58.90"));
        assert_eq!(receipt.transaction.status, TransactionStatus::Completed);
        assert_eq!(receipt.transaction.payer_profile_id, s.fleet.id);
        assert_eq!(receipt.balance_before, brl("100.00"));
        assert_eq!(receipt.balance_after, brl("41.10"));
        assert_eq!(balances(&s).await, (brl("41.10"), brl("58.90")));

        let history = s.store.transactions_for_station(s.station.id).await.unwrap();
        assert_eq!(history.len(), 1);
        let by_holder = s
            .store
            .transactions_for_holder(QrHolder::Vehicle(s.vehicle.id))
            .await
            .unwrap();
        assert_eq!(by_holder, history);
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_everything_untouched() {
        let s = scenario("10.00").await;
        let err = s
            .store
            .record_fuel_purchase(sale(&s, "10.00", "5.89"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InvariantViolation(_))));
        assert_eq!(balances(&s).await, (brl("10.00"), Money::ZERO));
        assert!(s.store.transactions_for_station(s.station.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inactive_vehicle_and_unknown_code_are_rejected() {
        let s = scenario("100.00").await;
        let mut bad = sale(&s, "1.00", "5.00");
        bad.code = generate_code(QrEntityType::Vehicle);
        let err = s.store.record_fuel_purchase(bad, Utc::now()).await.unwrap_err();
        assert_eq!(err, StoreError::not_found("QR code"));

        s.store
            .update_vehicle(
                s.vehicle.id,
                VehicleChanges {
                    status: Some(iapos_fleet::VehicleStatus::Maintenance),
                    ..Default::default()
                },
                Utc::now(),
            )
            .await
            .unwrap();
        let err = s
            .store
            .record_fuel_purchase(sale(&s, "1.00", "5.00"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn regenerating_a_code_retires_the_old_one() {
        let s = scenario("100.00").await;
        let fresh = s
            .store
            .issue_qr_code(
                NewQrCode {
                    holder: QrHolder::Vehicle(s.vehicle.id),
                    profile_id: s.fleet.id,
                    expires_at: None,
                },
                generate_code(QrEntityType::Vehicle),
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(fresh.regenerated_at.is_some());

        let codes = s.store.qr_codes_for(QrHolder::Vehicle(s.vehicle.id)).await.unwrap();
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].id, fresh.id);
        assert_eq!(codes[1].status, QrStatus::Inactive);

        let v = s.store.vehicle_by_id(s.vehicle.id).await.unwrap().unwrap();
        assert_eq!(v.qr_code_id, Some(fresh.id));

        let err = s
            .store
            .record_fuel_purchase(sale(&s, "1.00", "5.00"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn qr_for_a_foreign_profile_is_rejected() {
        let s = scenario("1.00").await;
        let err = s
            .store
            .issue_qr_code(
                NewQrCode {
                    holder: QrHolder::Vehicle(s.vehicle.id),
                    profile_id: s.network.id,
                    expires_at: None,
                },
                generate_code(QrEntityType::Vehicle),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn refund_reverses_both_sides_once() {
        let s = scenario("100.00").await;
        let receipt = s
            .store
            .record_fuel_purchase(sale(&s, "10.00", "5.89"), Utc::now())
            .await
            .unwrap();
        let refund = s
            .store
            .refund_transaction(receipt.transaction.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(refund.transaction.status, TransactionStatus::Refunded);
        assert_eq!(refund.holder_balance, brl("100.00"));
        assert_eq!(balances(&s).await, (brl("100.00"), Money::ZERO));

        assert!(s
            .store
            .refund_transaction(receipt.transaction.id, Utc::now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn allocations_respect_both_balances() {
        let s = scenario("30.00").await;
        credit_profile(&s.store, s.fleet.id, "20.00").await;

        let a = s
            .store
            .allocate_to_vehicle(s.vehicle.id, brl("-10.00"), Utc::now())
            .await
            .unwrap();
        assert_eq!(a.profile_balance, brl("30.00"));
        assert_eq!(a.target_balance, brl("20.00"));

        let err = s
            .store
            .allocate_to_vehicle(s.vehicle.id, brl("30.01"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn recharges_credit_only_on_confirmation() {
        let s = scenario("1.00").await;
        let now = Utc::now();
        let r = s
            .store
            .create_recharge(
                NewRecharge {
                    profile_id: s.fleet.id,
                    amount: brl("250.00"),
                    payment_method: PaymentMethod::CreditCard,
                    notes: Some("mensal".into()),
                },
                "RCG-ABCDEF123456".into(),
                now,
            )
            .await
            .unwrap();
        assert_eq!(r.payment_status, PaymentStatus::Pending);
        let before = s.store.profile_by_id(s.fleet.id).await.unwrap().unwrap().balance;

        let done = s
            .store
            .confirm_recharge("RCG-ABCDEF123456", Some("psp-1".into()), now)
            .await
            .unwrap();
        assert_eq!(done.payment_status, PaymentStatus::Completed);
        let after = s.store.profile_by_id(s.fleet.id).await.unwrap().unwrap().balance;
        assert_eq!(after, before.checked_add(brl("250.00")).unwrap());

        assert!(s.store.confirm_recharge("RCG-ABCDEF123456", None, now).await.is_err());
        assert!(s.store.fail_recharge("RCG-ABCDEF123456").await.is_err());
        assert_eq!(
            s.store.fail_recharge("RCG-000000000000").await.unwrap_err(),
            StoreError::not_found("Recharge")
        );
    }

    #[tokio::test]
    async fn failed_withdrawal_refunds_the_network() {
        let s = scenario("100.00").await;
        s.store
            .record_fuel_purchase(sale(&s, "10.00", "5.00"), Utc::now())
            .await
            .unwrap();
        let account = BankAccount {
            account_holder: "Rede Postos".into(),
            bank_code: "341".into(),
            account_number: "12345-6".into(),
            account_type: BankAccountType::Checking,
        };
        let w = s
            .store
            .create_withdrawal(
                NewWithdrawal {
                    network_id: s.network.id,
                    amount: brl("40.00"),
                    bank_account: account.clone(),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(balances(&s).await.1, brl("10.00"));

        let err = s
            .store
            .create_withdrawal(
                NewWithdrawal {
                    network_id: s.network.id,
                    amount: brl("10.01"),
                    bank_account: account,
                },
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InvariantViolation(_))));

        s.store
            .transition_withdrawal(w.id, WithdrawalStatus::Processing, Utc::now())
            .await
            .unwrap();
        let failed = s
            .store
            .transition_withdrawal(w.id, WithdrawalStatus::Failed, Utc::now())
            .await
            .unwrap();
        assert!(failed.processed_at.is_some());
        assert_eq!(balances(&s).await.1, brl("50.00"));
        assert!(s
            .store
            .transition_withdrawal(w.id, WithdrawalStatus::Completed, Utc::now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn notifications_are_private_to_their_user() {
        let store = InMemoryStore::new();
        let ana = user(&store, "ana", "ana@x.com", AccountType::Family).await;
        let bia = user(&store, "bia", "bia@x.com", AccountType::Family).await;
        let n = store
            .create_notification(
                NewNotification::new(ana.id, NotificationType::SystemAlert, "Oi", "Mensagem"),
                Utc::now(),
            )
            .await
            .unwrap();
        store
            .create_notification(
                NewNotification::new(ana.id, NotificationType::LowBalance, "Saldo", "Baixo"),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(
            store.mark_notification_read(bia.id, n.id).await.unwrap_err(),
            StoreError::not_found("Notification")
        );
        assert!(store.mark_notification_read(ana.id, n.id).await.unwrap().read);
        assert_eq!(store.notifications_for(ana.id, true).await.unwrap().len(), 1);
        assert_eq!(store.mark_all_read(ana.id).await.unwrap(), 1);
        assert!(store.notifications_for(ana.id, true).await.unwrap().is_empty());
        assert!(store.notifications_for(bia.id, false).await.unwrap().is_empty());
    }

    async fn invite(store: &InMemoryStore, new: NewInvitation, now: DateTime<Utc>) -> Invitation {
        store
            .create_invitation(new, generate_token(), Duration::days(7), now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn accepting_a_station_invitation_creates_membership() {
        let s = scenario("1.00").await;
        let now = Utc::now();
        let cashier = user(&s.store, "cx", "caixa@posto.com.br", AccountType::Family).await;
        let inv = invite(
            &s.store,
            NewInvitation {
                invited_by_user_id: s.network.user_id,
                invited_email: "Caixa@Posto.com.br".into(),
                profile_id: s.network.id,
                profile_type: InviteProfileType::GasStation,
                role: Role::Cashier,
                gas_station_id: Some(s.station.id),
                dependent_id: None,
            },
            now,
        )
        .await;

        let accepted = s.store.accept_invitation(&inv.token, cashier.id, now).await.unwrap();
        assert_eq!(accepted.invitation.status, InvitationStatus::Accepted);
        assert_eq!(accepted.user.account_type, AccountType::GasStation);
        assert_eq!(accepted.user.role, Role::Cashier);

        let members = s.store.memberships_in_network(cashier.id, s.network.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].role, iapos_stations::StationRole::Cashier);
        assert!(s.store.accept_invitation(&inv.token, cashier.id, now).await.is_err());
    }

    #[tokio::test]
    async fn accepting_a_family_invitation_links_the_dependent_once() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let parent = user(&store, "mae", "mae@familia.com", AccountType::Family).await;
        let family = profile(&store, parent.id, ProfileType::Family, "529.982.247-25").await;
        let child = store
            .create_dependent(
                NewDependent {
                    family_id: family.id,
                    name: "Lucas".into(),
                    cpf: None,
                    relationship: Relationship::Child,
                },
                now,
            )
            .await
            .unwrap();
        let kid = user(&store, "lucas", "lucas@familia.com", AccountType::Family).await;
        let other = user(&store, "pedro", "pedro@familia.com", AccountType::Family).await;

        let new = NewInvitation {
            invited_by_user_id: parent.id,
            invited_email: "lucas@familia.com".into(),
            profile_id: family.id,
            profile_type: InviteProfileType::Family,
            role: Role::Dependent,
            gas_station_id: None,
            dependent_id: Some(child.id),
        };
        let first = invite(&store, new.clone(), now).await;
        let second = invite(&store, new, now).await;

        let accepted = store.accept_invitation(&first.token, kid.id, now).await.unwrap();
        assert_eq!(accepted.user.role, Role::Dependent);
        let linked = store.dependent_for_user(kid.id).await.unwrap().unwrap();
        assert_eq!(linked.id, child.id);

        let err = store.accept_invitation(&second.token, other.id, now).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Conflict(_))));
        let still_pending = store.invitation_by_token(&second.token).await.unwrap().unwrap();
        assert_eq!(still_pending.status, InvitationStatus::Pending);
    }

    #[tokio::test]
    async fn expired_invitations_are_marked_and_refused() {
        let s = scenario("1.00").await;
        let created = Utc::now() - Duration::days(8);
        let driver = user(&s.store, "drv", "motorista@frota.com.br", AccountType::Family).await;
        let inv = invite(
            &s.store,
            NewInvitation {
                invited_by_user_id: s.fleet.user_id,
                invited_email: "motorista@frota.com.br".into(),
                profile_id: s.fleet.id,
                profile_type: InviteProfileType::Fleet,
                role: Role::Driver,
                gas_station_id: None,
                dependent_id: None,
            },
            created,
        )
        .await;

        let err = s
            .store
            .accept_invitation(&inv.token, driver.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InvariantViolation(_))));
        let stored = s.store.invitation_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Expired);
        assert!(s.store.fleet_membership(s.fleet.id, driver.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_invitations_cannot_be_cancelled() {
        let s = scenario("1.00").await;
        let inv = invite(
            &s.store,
            NewInvitation {
                invited_by_user_id: s.fleet.user_id,
                invited_email: "financeiro@frota.com.br".into(),
                profile_id: s.fleet.id,
                profile_type: InviteProfileType::Fleet,
                role: Role::Finance,
                gas_station_id: None,
                dependent_id: None,
            },
            Utc::now() - Duration::days(8),
        )
        .await;

        let err = s.store.cancel_invitation(inv.id, Utc::now()).await.unwrap_err();
        assert_eq!(err, StoreError::invariant("invitation has expired"));
        let stored = s.store.invitation_by_id(inv.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Expired);
    }

    #[tokio::test]
    async fn only_drivers_get_vehicle_assignments() {
        let s = scenario("1.00").await;
        let now = Utc::now();
        let driver = user(&s.store, "drv", "motorista@frota.com.br", AccountType::Family).await;
        let inv = invite(
            &s.store,
            NewInvitation {
                invited_by_user_id: s.fleet.user_id,
                invited_email: "motorista@frota.com.br".into(),
                profile_id: s.fleet.id,
                profile_type: InviteProfileType::Fleet,
                role: Role::Driver,
                gas_station_id: None,
                dependent_id: None,
            },
            now,
        )
        .await;
        s.store.accept_invitation(&inv.token, driver.id, now).await.unwrap();

        let m = s
            .store
            .assign_vehicles(s.fleet.id, driver.id, vec![s.vehicle.id, s.vehicle.id])
            .await
            .unwrap();
        assert_eq!(m.assigned_vehicles, vec![s.vehicle.id]);

        let err = s
            .store
            .assign_vehicles(s.fleet.id, driver.id, vec![VehicleId::new(9_999)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));

        let err = s
            .store
            .assign_vehicles(s.fleet.id, s.attendant.id, vec![s.vehicle.id])
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::not_found("Fleet member"));
    }
}
