//! Persistence boundary.
//!
//! One repository trait per bounded context; [`Store`] is their union and is
//! what the API holds behind an `Arc<dyn Store>`. Implementations:
//!
//! - [`InMemoryStore`]: `RwLock`-guarded tables, used in development and tests
//! - `PostgresStore` (feature `postgres`): sqlx over the embedded schema
//!
//! ## Atomicity
//!
//! Every operation that moves money (fuel purchases, refunds, allocations,
//! recharge confirmation, withdrawals) and every operation that touches more
//! than one table (QR issuance, invitation acceptance) is atomic: a single
//! write lock in memory, a transaction with row locks in Postgres. Callers
//! never read-modify-write balances themselves.
//!
//! ## Error mapping
//!
//! | Condition                         | Error                                 |
//! |-----------------------------------|---------------------------------------|
//! | Row missing                       | `DomainError::NotFound`               |
//! | Unique key taken                  | `DomainError::Conflict`               |
//! | Rule broken (balance, state)      | `DomainError::InvariantViolation`     |
//! | Database / lock failure           | `StoreError::Backend`                 |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use iapos_auth::{AccountType, Invitation, NewInvitation, User, UserStatus, UserUpsert};
use iapos_core::{
    DependentId, DomainError, GasStationId, InvitationId, Money, NotificationId, ProfileId,
    RecordStatus, TransactionId, UserId, VehicleId, WithdrawalId,
};
use iapos_family::{Dependent, DependentChanges, NewDependent};
use iapos_fleet::{FleetMembership, FleetRole, NewVehicle, Vehicle, VehicleChanges};
use iapos_notifications::{NewNotification, Notification};
use iapos_profiles::{NewProfile, Profile, ProfileChanges};
use iapos_stations::{
    GasStation, GasStationChanges, NewGasStation, NewWithdrawal, StationMembership, StationRole,
    Withdrawal, WithdrawalStatus,
};
use iapos_wallet::{
    Allocation, BalanceRecharge, FuelPurchase, FuelTransaction, NewQrCode, NewRecharge, QrCode,
    QrHolder,
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn not_found(what: &'static str) -> Self {
        Self::Domain(DomainError::not_found(what))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Domain(DomainError::conflict(msg))
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Domain(DomainError::invariant(msg))
    }
}

/// A fuel sale as the attendant submits it, before the QR code is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub code: String,
    pub gas_station_id: GasStationId,
    pub network_id: ProfileId,
    pub attendant_id: UserId,
    pub purchase: FuelPurchase,
}

/// Result of a completed fuel sale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub transaction: FuelTransaction,
    pub balance_before: Money,
    pub balance_after: Money,
}

/// An accepted invitation together with the user it was applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub invitation: Invitation,
    pub user: User,
}

/// Outcome of a refund: the reversed sale and the holder's new balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refund {
    pub transaction: FuelTransaction,
    pub holder_balance: Money,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert by `open_id` or update the provided fields. Always touches
    /// `last_signed_in`.
    async fn upsert_user(&self, upsert: UserUpsert, now: DateTime<Utc>) -> StoreResult<User>;

    async fn user_by_id(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn list_users(&self, account_type: Option<AccountType>) -> StoreResult<Vec<User>>;

    async fn set_user_status(&self, id: UserId, status: UserStatus, now: DateTime<Utc>) -> StoreResult<User>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn create_profile(&self, profile: NewProfile, now: DateTime<Utc>) -> StoreResult<Profile>;

    async fn profile_by_id(&self, id: ProfileId) -> StoreResult<Option<Profile>>;

    async fn profiles_by_user(&self, user_id: UserId) -> StoreResult<Vec<Profile>>;

    async fn update_profile(
        &self,
        id: ProfileId,
        changes: ProfileChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<Profile>;
}

#[async_trait]
pub trait StationRepository: Send + Sync {
    async fn create_station(&self, station: NewGasStation, now: DateTime<Utc>) -> StoreResult<GasStation>;

    async fn station_by_id(&self, id: GasStationId) -> StoreResult<Option<GasStation>>;

    async fn stations_by_network(&self, network_id: ProfileId) -> StoreResult<Vec<GasStation>>;

    async fn update_station(
        &self,
        id: GasStationId,
        changes: GasStationChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<GasStation>;

    async fn set_station_status(
        &self,
        id: GasStationId,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<GasStation>;

    async fn station_members(&self, station_id: GasStationId) -> StoreResult<Vec<StationMembership>>;

    /// Memberships of `user_id` in any station of `network_id`.
    async fn memberships_in_network(
        &self,
        user_id: UserId,
        network_id: ProfileId,
    ) -> StoreResult<Vec<StationMembership>>;

    /// Debits the network and records a pending withdrawal.
    async fn create_withdrawal(&self, withdrawal: NewWithdrawal, now: DateTime<Utc>) -> StoreResult<Withdrawal>;

    async fn withdrawal_by_id(&self, id: WithdrawalId) -> StoreResult<Option<Withdrawal>>;

    async fn withdrawals_by_network(&self, network_id: ProfileId) -> StoreResult<Vec<Withdrawal>>;

    /// Moves a withdrawal along its lifecycle; `failed` credits the amount back.
    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        status: WithdrawalStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Withdrawal>;
}

#[async_trait]
pub trait FleetRepository: Send + Sync {
    async fn create_vehicle(&self, vehicle: NewVehicle, now: DateTime<Utc>) -> StoreResult<Vehicle>;

    async fn vehicle_by_id(&self, id: VehicleId) -> StoreResult<Option<Vehicle>>;

    async fn vehicles_by_fleet(&self, fleet_id: ProfileId) -> StoreResult<Vec<Vehicle>>;

    async fn update_vehicle(
        &self,
        id: VehicleId,
        changes: VehicleChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<Vehicle>;

    async fn fleet_members(&self, fleet_id: ProfileId) -> StoreResult<Vec<FleetMembership>>;

    async fn fleet_membership(
        &self,
        fleet_id: ProfileId,
        user_id: UserId,
    ) -> StoreResult<Option<FleetMembership>>;

    /// Replaces the driver's assignment list.
    async fn assign_vehicles(
        &self,
        fleet_id: ProfileId,
        user_id: UserId,
        vehicles: Vec<VehicleId>,
    ) -> StoreResult<FleetMembership>;

    /// Moves `amount` from the fleet balance to the vehicle (negative returns it).
    async fn allocate_to_vehicle(
        &self,
        vehicle_id: VehicleId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation>;
}

#[async_trait]
pub trait FamilyRepository: Send + Sync {
    async fn create_dependent(&self, dependent: NewDependent, now: DateTime<Utc>) -> StoreResult<Dependent>;

    async fn dependent_by_id(&self, id: DependentId) -> StoreResult<Option<Dependent>>;

    async fn dependents_by_family(&self, family_id: ProfileId) -> StoreResult<Vec<Dependent>>;

    /// The dependent row linked to `user_id`, if any.
    async fn dependent_for_user(&self, user_id: UserId) -> StoreResult<Option<Dependent>>;

    async fn update_dependent(
        &self,
        id: DependentId,
        changes: DependentChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<Dependent>;

    async fn allocate_to_dependent(
        &self,
        dependent_id: DependentId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation>;
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Deactivates the holder's active codes, stores the new one and links it
    /// to the vehicle / dependent.
    async fn issue_qr_code(&self, qr: NewQrCode, code: String, now: DateTime<Utc>) -> StoreResult<QrCode>;

    async fn qr_code_by_code(&self, code: &str) -> StoreResult<Option<QrCode>>;

    async fn qr_codes_for(&self, holder: QrHolder) -> StoreResult<Vec<QrCode>>;

    /// Resolves the code, debits the holder, credits the network and stores
    /// a completed transaction.
    async fn record_fuel_purchase(
        &self,
        request: PurchaseRequest,
        now: DateTime<Utc>,
    ) -> StoreResult<PurchaseReceipt>;

    async fn transaction_by_id(&self, id: TransactionId) -> StoreResult<Option<FuelTransaction>>;

    async fn transactions_for_station(&self, station_id: GasStationId) -> StoreResult<Vec<FuelTransaction>>;

    async fn transactions_for_holder(&self, holder: QrHolder) -> StoreResult<Vec<FuelTransaction>>;

    /// Reverses both balance movements of a completed sale.
    async fn refund_transaction(&self, id: TransactionId, now: DateTime<Utc>) -> StoreResult<Refund>;

    async fn create_recharge(
        &self,
        recharge: NewRecharge,
        reference_code: String,
        now: DateTime<Utc>,
    ) -> StoreResult<BalanceRecharge>;

    async fn recharges_by_profile(&self, profile_id: ProfileId) -> StoreResult<Vec<BalanceRecharge>>;

    /// Marks the recharge completed and credits the profile.
    async fn confirm_recharge(
        &self,
        reference_code: &str,
        transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<BalanceRecharge>;

    async fn fail_recharge(&self, reference_code: &str) -> StoreResult<BalanceRecharge>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create_notification(
        &self,
        notification: NewNotification,
        now: DateTime<Utc>,
    ) -> StoreResult<Notification>;

    /// Newest first.
    async fn notifications_for(&self, user_id: UserId, unread_only: bool) -> StoreResult<Vec<Notification>>;

    /// `NotFound` when the notification belongs to someone else.
    async fn mark_notification_read(
        &self,
        user_id: UserId,
        id: NotificationId,
    ) -> StoreResult<Notification>;

    /// Returns how many notifications changed.
    async fn mark_all_read(&self, user_id: UserId) -> StoreResult<u64>;
}

#[async_trait]
pub trait InvitationRepository: Send + Sync {
    async fn create_invitation(
        &self,
        invitation: NewInvitation,
        token: String,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Invitation>;

    async fn invitation_by_id(&self, id: InvitationId) -> StoreResult<Option<Invitation>>;

    async fn invitation_by_token(&self, token: &str) -> StoreResult<Option<Invitation>>;

    async fn invitations_by_profile(&self, profile_id: ProfileId) -> StoreResult<Vec<Invitation>>;

    async fn cancel_invitation(&self, id: InvitationId, now: DateTime<Utc>) -> StoreResult<Invitation>;

    /// Accepts on behalf of `user_id`: sets the user's account type and role,
    /// creates the station or fleet membership (or links the dependent) and
    /// marks the invitation accepted. A pending invitation found past its
    /// expiry is persisted as `expired` and the call fails.
    async fn accept_invitation(
        &self,
        token: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Acceptance>;
}

/// Everything the API needs from persistence.
pub trait Store:
    UserRepository
    + ProfileRepository
    + StationRepository
    + FleetRepository
    + FamilyRepository
    + WalletRepository
    + NotificationRepository
    + InvitationRepository
{
}

impl<T> Store for T where
    T: UserRepository
        + ProfileRepository
        + StationRepository
        + FleetRepository
        + FamilyRepository
        + WalletRepository
        + NotificationRepository
        + InvitationRepository
{
}

/// Role pair applied to a user who accepts an invitation.
pub(crate) fn accepted_account(invitation: &Invitation) -> (AccountType, iapos_auth::Role) {
    (invitation.profile_type.account_type(), invitation.role)
}

/// Station role carried by a gas-station invitation.
pub(crate) fn invited_station_role(invitation: &Invitation) -> StoreResult<StationRole> {
    invitation
        .station_role()
        .ok_or_else(|| StoreError::invariant("invitation role is not a station role"))
}

/// Fleet role carried by a fleet invitation.
pub(crate) fn invited_fleet_role(invitation: &Invitation) -> StoreResult<FleetRole> {
    invitation
        .fleet_role()
        .ok_or_else(|| StoreError::invariant("invitation role is not a fleet role"))
}
