//! Postgres-backed [`Store`](super::Store).
//!
//! ## Conventions
//!
//! - Ids come from the table's `BIGSERIAL` sequence *before* the insert, so
//!   rows are built with the same domain constructors the in-memory store
//!   uses and then written column by column.
//! - Money and volumes are `BIGINT` hundredths (`*_cents`,
//!   `liters_hundredths`); enumerations are `TEXT` parsed with `FromStr`.
//! - Multi-row operations run in one transaction and take `FOR UPDATE` locks
//!   on every row whose balance or state they change, holder before profile.
//!
//! ## Error mapping
//!
//! | SQLSTATE | Meaning                 | Error                        |
//! |----------|-------------------------|------------------------------|
//! | `23505`  | unique violation        | `DomainError::Conflict`      |
//! | `23503`  | foreign key violation   | `DomainError::NotFound`      |
//! | `23514`  | check violation         | `DomainError::Validation`    |
//! | other    | anything else           | `StoreError::Backend`        |

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tracing::instrument;

use iapos_auth::{
    AccountType, Invitation, InvitationStatus, InviteProfileType, NewInvitation, User, UserStatus,
    UserUpsert,
};
use iapos_core::{
    DependentId, DomainError, GasStationId, InvitationId, Liters, MembershipId, Money,
    NotificationId, ProfileId, QrCodeId, RechargeId, RecordStatus, TransactionId, UserId,
    VehicleId, WithdrawalId,
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

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Applies the embedded schema. Every statement is idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping and column decoding
// ─────────────────────────────────────────────────────────────────────────────

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let constraint = db_err.constraint().unwrap_or_default().to_string();
            match db_err.code().as_deref() {
                Some("23505") => StoreError::conflict(conflict_message(&constraint)),
                Some("23503") => StoreError::not_found("Referenced record"),
                Some("23514") => StoreError::Domain(DomainError::validation(format!(
                    "value rejected by constraint {constraint}"
                ))),
                _ => StoreError::backend(format!(
                    "database error in {operation}: {}",
                    db_err.message()
                )),
            }
        }
        sqlx::Error::PoolClosed => StoreError::backend(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => StoreError::backend(format!("connection pool timed out in {operation}")),
        other => StoreError::backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn conflict_message(constraint: &str) -> &'static str {
    match constraint {
        "users_open_id_key" => "a user with this openId already exists",
        "profiles_cnpj_cpf_key" => "a profile with this CNPJ/CPF already exists",
        "gas_stations_cnpj_key" => "a gas station with this CNPJ already exists",
        "vehicles_license_plate_key" => "a vehicle with this license plate already exists",
        "qr_codes_code_key" => "QR code already exists",
        "balance_recharges_reference_code_key" => "recharge reference code already exists",
        "invitations_token_key" => "invitation token already exists",
        "gas_station_users_member_key" => "user is already a member of this station",
        "fleet_users_member_key" => "user is already a member of this fleet",
        "family_dependents_user_key" => "user is already linked to a dependent",
        _ => "record already exists",
    }
}

fn text_col<T>(row: &PgRow, col: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = DomainError>,
{
    let raw: String = row.try_get(col)?;
    raw.parse().map_err(|e: DomainError| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

fn money_col(row: &PgRow, col: &str) -> Result<Money, sqlx::Error> {
    Ok(Money::from_hundredths(row.try_get::<i64, _>(col)?))
}

async fn next_id(conn: &mut PgConnection, table: &str) -> StoreResult<i64> {
    sqlx::query_scalar::<_, i64>("SELECT nextval(pg_get_serial_sequence($1, 'id'))")
        .bind(table)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("next_id", e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Row types
// ─────────────────────────────────────────────────────────────────────────────

struct UserRow(User);

impl<'r> sqlx::FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow(User {
            id: UserId::new(row.try_get("id")?),
            open_id: row.try_get("open_id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            phone_number: row.try_get("phone_number")?,
            account_type: text_col(row, "account_type")?,
            role: text_col(row, "role")?,
            status: text_col(row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_signed_in: row.try_get("last_signed_in")?,
        }))
    }
}

struct ProfileRow(Profile);

impl<'r> sqlx::FromRow<'r, PgRow> for ProfileRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProfileRow(Profile {
            id: ProfileId::new(row.try_get("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            profile_type: text_col(row, "profile_type")?,
            name: row.try_get("name")?,
            cnpj_cpf: row.try_get("cnpj_cpf")?,
            legal_name: row.try_get("legal_name")?,
            contact_email: row.try_get("contact_email")?,
            contact_phone: row.try_get("contact_phone")?,
            address: row.try_get("address")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip_code: row.try_get("zip_code")?,
            country: row.try_get("country")?,
            tax_id: row.try_get("tax_id")?,
            status: text_col(row, "status")?,
            balance: money_col(row, "balance_cents")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

struct StationRow(GasStation);

impl<'r> sqlx::FromRow<'r, PgRow> for StationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StationRow(GasStation {
            id: GasStationId::new(row.try_get("id")?),
            network_id: ProfileId::new(row.try_get("network_id")?),
            name: row.try_get("name")?,
            cnpj: row.try_get("cnpj")?,
            address: row.try_get("address")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip_code: row.try_get("zip_code")?,
            contact_phone: row.try_get("contact_phone")?,
            contact_email: row.try_get("contact_email")?,
            operating_hours: row.try_get("operating_hours")?,
            status: text_col(row, "status")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

struct StationMemberRow(StationMembership);

impl<'r> sqlx::FromRow<'r, PgRow> for StationMemberRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(StationMemberRow(StationMembership {
            id: MembershipId::new(row.try_get("id")?),
            gas_station_id: GasStationId::new(row.try_get("gas_station_id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            role: text_col(row, "role")?,
            status: text_col(row, "status")?,
            invited_at: row.try_get("invited_at")?,
            accepted_at: row.try_get("accepted_at")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct WithdrawalRow(Withdrawal);

impl<'r> sqlx::FromRow<'r, PgRow> for WithdrawalRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let Json(bank_account) = row.try_get("bank_account")?;
        Ok(WithdrawalRow(Withdrawal {
            id: WithdrawalId::new(row.try_get("id")?),
            network_id: ProfileId::new(row.try_get("network_id")?),
            amount: money_col(row, "amount_cents")?,
            bank_account,
            status: text_col(row, "status")?,
            requested_at: row.try_get("requested_at")?,
            processed_at: row.try_get("processed_at")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct VehicleRow(Vehicle);

impl<'r> sqlx::FromRow<'r, PgRow> for VehicleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(VehicleRow(Vehicle {
            id: VehicleId::new(row.try_get("id")?),
            fleet_id: ProfileId::new(row.try_get("fleet_id")?),
            license_plate: row.try_get("license_plate")?,
            vehicle_type: text_col(row, "vehicle_type")?,
            brand: row.try_get("brand")?,
            model: row.try_get("model")?,
            year: row.try_get("year")?,
            fuel_type: text_col(row, "fuel_type")?,
            status: text_col(row, "status")?,
            qr_code_id: row.try_get::<Option<i64>, _>("qr_code_id")?.map(QrCodeId::new),
            balance: money_col(row, "balance_cents")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

struct FleetMemberRow(FleetMembership);

impl<'r> sqlx::FromRow<'r, PgRow> for FleetMemberRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let assigned: Vec<i64> = row.try_get("assigned_vehicles")?;
        Ok(FleetMemberRow(FleetMembership {
            id: MembershipId::new(row.try_get("id")?),
            fleet_id: ProfileId::new(row.try_get("fleet_id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            role: text_col(row, "role")?,
            status: text_col(row, "status")?,
            assigned_vehicles: assigned.into_iter().map(VehicleId::new).collect(),
            invited_at: row.try_get("invited_at")?,
            accepted_at: row.try_get("accepted_at")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct DependentRow(Dependent);

impl<'r> sqlx::FromRow<'r, PgRow> for DependentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(DependentRow(Dependent {
            id: DependentId::new(row.try_get("id")?),
            family_id: ProfileId::new(row.try_get("family_id")?),
            user_id: row.try_get::<Option<i64>, _>("user_id")?.map(UserId::new),
            name: row.try_get("name")?,
            cpf: row.try_get("cpf")?,
            relationship: text_col(row, "relationship")?,
            status: text_col(row, "status")?,
            qr_code_id: row.try_get::<Option<i64>, _>("qr_code_id")?.map(QrCodeId::new),
            balance: money_col(row, "balance_cents")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

struct QrCodeRow(QrCode);

impl<'r> sqlx::FromRow<'r, PgRow> for QrCodeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(QrCodeRow(QrCode {
            id: QrCodeId::new(row.try_get("id")?),
            code: row.try_get("code")?,
            entity_type: text_col(row, "entity_type")?,
            entity_id: row.try_get("entity_id")?,
            profile_id: ProfileId::new(row.try_get("profile_id")?),
            status: text_col(row, "status")?,
            generated_at: row.try_get("generated_at")?,
            expires_at: row.try_get("expires_at")?,
            regenerated_at: row.try_get("regenerated_at")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct TransactionRow(FuelTransaction);

impl<'r> sqlx::FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow(FuelTransaction {
            id: TransactionId::new(row.try_get("id")?),
            qr_code_id: QrCodeId::new(row.try_get("qr_code_id")?),
            gas_station_id: GasStationId::new(row.try_get("gas_station_id")?),
            network_id: ProfileId::new(row.try_get("network_id")?),
            attendant_id: UserId::new(row.try_get("attendant_id")?),
            entity_type: text_col(row, "entity_type")?,
            entity_id: row.try_get("entity_id")?,
            payer_profile_id: ProfileId::new(row.try_get("payer_profile_id")?),
            fuel_type: text_col(row, "fuel_type")?,
            liters: Liters::from_hundredths(row.try_get("liters_hundredths")?),
            amount_debited: money_col(row, "amount_debited_cents")?,
            unit_price: money_col(row, "unit_price_cents")?,
            total_cost: money_col(row, "total_cost_cents")?,
            status: text_col(row, "status")?,
            timestamp: row.try_get("timestamp")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct RechargeRow(BalanceRecharge);

impl<'r> sqlx::FromRow<'r, PgRow> for RechargeRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RechargeRow(BalanceRecharge {
            id: RechargeId::new(row.try_get("id")?),
            profile_id: ProfileId::new(row.try_get("profile_id")?),
            amount: money_col(row, "amount_cents")?,
            payment_method: text_col(row, "payment_method")?,
            payment_status: text_col(row, "payment_status")?,
            transaction_id: row.try_get("transaction_id")?,
            reference_code: row.try_get("reference_code")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        }))
    }
}

struct NotificationRow(Notification);

impl<'r> sqlx::FromRow<'r, PgRow> for NotificationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(NotificationRow(Notification {
            id: NotificationId::new(row.try_get("id")?),
            user_id: UserId::new(row.try_get("user_id")?),
            kind: text_col(row, "type")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            related_entity_id: row.try_get("related_entity_id")?,
            related_entity_type: row.try_get("related_entity_type")?,
            read: row.try_get("read")?,
            email_sent: row.try_get("email_sent")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

struct InvitationRow(Invitation);

impl<'r> sqlx::FromRow<'r, PgRow> for InvitationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(InvitationRow(Invitation {
            id: InvitationId::new(row.try_get("id")?),
            invited_by_user_id: UserId::new(row.try_get("invited_by_user_id")?),
            invited_email: row.try_get("invited_email")?,
            profile_id: ProfileId::new(row.try_get("profile_id")?),
            profile_type: text_col(row, "profile_type")?,
            role: text_col(row, "role")?,
            gas_station_id: row
                .try_get::<Option<i64>, _>("gas_station_id")?
                .map(GasStationId::new),
            dependent_id: row
                .try_get::<Option<i64>, _>("dependent_id")?
                .map(DependentId::new),
            token: row.try_get("token")?,
            status: text_col(row, "status")?,
            expires_at: row.try_get("expires_at")?,
            accepted_at: row.try_get("accepted_at")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row writers shared by several operations
// ─────────────────────────────────────────────────────────────────────────────

async fn lock_profile(conn: &mut PgConnection, id: ProfileId) -> StoreResult<Profile> {
    sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE id = $1 FOR UPDATE")
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_profile", e))?
        .map(|r| r.0)
        .ok_or_else(|| StoreError::not_found("Profile"))
}

async fn set_profile_balance(
    conn: &mut PgConnection,
    id: ProfileId,
    balance: Money,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query("UPDATE profiles SET balance_cents = $2, updated_at = $3 WHERE id = $1")
        .bind(id.get())
        .bind(balance.hundredths())
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("set_profile_balance", e))?;
    Ok(())
}

/// Balance and owner of the wallet behind a QR code.
struct HolderWallet {
    payer_profile_id: ProfileId,
    balance: Money,
    active: bool,
}

/// `(table, owning profile column, active status)` for a holder kind.
fn holder_table(holder: QrHolder) -> (&'static str, &'static str, &'static str) {
    match holder {
        QrHolder::Vehicle(_) => ("vehicles", "fleet_id", "active"),
        QrHolder::Dependent(_) => ("family_dependents", "family_id", "active"),
    }
}

async fn lock_holder(conn: &mut PgConnection, holder: QrHolder) -> StoreResult<HolderWallet> {
    let (table, owner, active) = holder_table(holder);
    let sql = format!(
        "SELECT {owner} AS payer_profile_id, balance_cents, status = '{active}' AS active \
         FROM {table} WHERE id = $1 FOR UPDATE"
    );
    let row = sqlx::query(&sql)
        .bind(holder.entity_id())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_holder", e))?
        .ok_or_else(|| match holder {
            QrHolder::Vehicle(_) => StoreError::not_found("Vehicle"),
            QrHolder::Dependent(_) => StoreError::not_found("Dependent"),
        })?;
    let decode = |e| map_sqlx_error("lock_holder", e);
    Ok(HolderWallet {
        payer_profile_id: ProfileId::new(row.try_get("payer_profile_id").map_err(decode)?),
        balance: Money::from_hundredths(row.try_get("balance_cents").map_err(decode)?),
        active: row.try_get("active").map_err(decode)?,
    })
}

async fn set_holder_balance(
    conn: &mut PgConnection,
    holder: QrHolder,
    balance: Money,
    now: DateTime<Utc>,
) -> StoreResult<()> {
    let (table, _, _) = holder_table(holder);
    let sql = format!("UPDATE {table} SET balance_cents = $2, updated_at = $3 WHERE id = $1");
    sqlx::query(&sql)
        .bind(holder.entity_id())
        .bind(balance.hundredths())
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("set_holder_balance", e))?;
    Ok(())
}

async fn insert_user(conn: &mut PgConnection, u: &User) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO users
            (id, open_id, email, name, phone_number, account_type, role, status,
             created_at, updated_at, last_signed_in)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(u.id.get())
    .bind(&u.open_id)
    .bind(&u.email)
    .bind(&u.name)
    .bind(&u.phone_number)
    .bind(u.account_type.as_str())
    .bind(u.role.as_str())
    .bind(u.status.as_str())
    .bind(u.created_at)
    .bind(u.updated_at)
    .bind(u.last_signed_in)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_user", e))?;
    Ok(())
}

async fn update_user(conn: &mut PgConnection, u: &User) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET email = $2, name = $3, phone_number = $4, account_type = $5, role = $6,
            status = $7, updated_at = $8, last_signed_in = $9
        WHERE id = $1
        "#,
    )
    .bind(u.id.get())
    .bind(&u.email)
    .bind(&u.name)
    .bind(&u.phone_number)
    .bind(u.account_type.as_str())
    .bind(u.role.as_str())
    .bind(u.status.as_str())
    .bind(u.updated_at)
    .bind(u.last_signed_in)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_user", e))?;
    Ok(())
}

async fn lock_user(conn: &mut PgConnection, id: UserId) -> StoreResult<User> {
    sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_user", e))?
        .map(|r| r.0)
        .ok_or_else(|| StoreError::not_found("User"))
}

async fn update_station(conn: &mut PgConnection, s: &GasStation) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE gas_stations
        SET name = $2, address = $3, city = $4, state = $5, zip_code = $6, contact_phone = $7,
            contact_email = $8, operating_hours = $9, status = $10, updated_at = $11
        WHERE id = $1
        "#,
    )
    .bind(s.id.get())
    .bind(&s.name)
    .bind(&s.address)
    .bind(&s.city)
    .bind(&s.state)
    .bind(&s.zip_code)
    .bind(&s.contact_phone)
    .bind(&s.contact_email)
    .bind(&s.operating_hours)
    .bind(s.status.as_str())
    .bind(s.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_station", e))?;
    Ok(())
}

async fn lock_station(conn: &mut PgConnection, id: GasStationId) -> StoreResult<GasStation> {
    sqlx::query_as::<_, StationRow>("SELECT * FROM gas_stations WHERE id = $1 FOR UPDATE")
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_station", e))?
        .map(|r| r.0)
        .ok_or_else(|| StoreError::not_found("Gas station"))
}

async fn lock_vehicle(conn: &mut PgConnection, id: VehicleId) -> StoreResult<Vehicle> {
    sqlx::query_as::<_, VehicleRow>("SELECT * FROM vehicles WHERE id = $1 FOR UPDATE")
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_vehicle", e))?
        .map(|r| r.0)
        .ok_or_else(|| StoreError::not_found("Vehicle"))
}

async fn update_vehicle(conn: &mut PgConnection, v: &Vehicle) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE vehicles
        SET brand = $2, model = $3, year = $4, status = $5, qr_code_id = $6, updated_at = $7
        WHERE id = $1
        "#,
    )
    .bind(v.id.get())
    .bind(&v.brand)
    .bind(&v.model)
    .bind(v.year)
    .bind(v.status.as_str())
    .bind(v.qr_code_id.map(QrCodeId::get))
    .bind(v.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_vehicle", e))?;
    Ok(())
}

async fn lock_dependent(conn: &mut PgConnection, id: DependentId) -> StoreResult<Dependent> {
    sqlx::query_as::<_, DependentRow>("SELECT * FROM family_dependents WHERE id = $1 FOR UPDATE")
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_dependent", e))?
        .map(|r| r.0)
        .ok_or_else(|| StoreError::not_found("Dependent"))
}

async fn update_dependent(conn: &mut PgConnection, d: &Dependent) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE family_dependents
        SET user_id = $2, name = $3, status = $4, qr_code_id = $5, updated_at = $6
        WHERE id = $1
        "#,
    )
    .bind(d.id.get())
    .bind(d.user_id.map(UserId::get))
    .bind(&d.name)
    .bind(d.status.as_str())
    .bind(d.qr_code_id.map(QrCodeId::get))
    .bind(d.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_dependent", e))?;
    Ok(())
}

async fn lock_invitation_by_token(conn: &mut PgConnection, token: &str) -> StoreResult<Invitation> {
    sqlx::query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE token = $1 FOR UPDATE")
        .bind(token)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_invitation", e))?
        .map(|r| r.0)
        .ok_or_else(|| StoreError::not_found("Invitation"))
}

async fn update_invitation(conn: &mut PgConnection, i: &Invitation) -> StoreResult<()> {
    sqlx::query("UPDATE invitations SET status = $2, accepted_at = $3 WHERE id = $1")
        .bind(i.id.get())
        .bind(i.status.as_str())
        .bind(i.accepted_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("update_invitation", e))?;
    Ok(())
}

async fn lock_recharge(conn: &mut PgConnection, reference_code: &str) -> StoreResult<BalanceRecharge> {
    sqlx::query_as::<_, RechargeRow>(
        "SELECT * FROM balance_recharges WHERE reference_code = $1 FOR UPDATE",
    )
    .bind(reference_code)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("lock_recharge", e))?
    .map(|r| r.0)
    .ok_or_else(|| StoreError::not_found("Recharge"))
}

async fn update_recharge(conn: &mut PgConnection, r: &BalanceRecharge) -> StoreResult<()> {
    sqlx::query(
        r#"
        UPDATE balance_recharges
        SET payment_status = $2, transaction_id = $3, completed_at = $4
        WHERE id = $1
        "#,
    )
    .bind(r.id.get())
    .bind(r.payment_status.as_str())
    .bind(&r.transaction_id)
    .bind(r.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("update_recharge", e))?;
    Ok(())
}

fn credit(balance: Money, amount: Money) -> StoreResult<Money> {
    balance
        .checked_add(amount)
        .ok_or_else(|| StoreError::Domain(DomainError::validation("balance is out of range")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository impls
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl UserRepository for PostgresStore {
    #[instrument(skip(self, upsert), fields(open_id = %upsert.open_id), err)]
    async fn upsert_user(&self, upsert: UserUpsert, now: DateTime<Utc>) -> StoreResult<User> {
        let upsert = upsert.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;

        let existing = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE open_id = $1 FOR UPDATE")
            .bind(&upsert.open_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_user", e))?;

        let user = match existing {
            Some(UserRow(mut user)) => {
                upsert.apply(&mut user, now)?;
                update_user(&mut tx, &user).await?;
                user
            }
            None => {
                let id = next_id(&mut tx, "users").await?;
                let user = upsert.into_user(UserId::new(id), now)?;
                insert_user(&mut tx, &user).await?;
                user
            }
        };

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("user_by_id", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self, email), err)]
    async fn user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE lower(email) = lower($1) ORDER BY id LIMIT 1",
        )
        .bind(email.trim())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_by_email", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self, account_type: Option<AccountType>) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE ($1::TEXT IS NULL OR account_type = $1) ORDER BY id",
        )
        .bind(account_type.map(AccountType::as_str))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_users", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn set_user_status(&self, id: UserId, status: UserStatus, now: DateTime<Utc>) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(
            "UPDATE users SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id.get())
        .bind(status.as_str())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_user_status", e))?;
        row.map(|r| r.0).ok_or_else(|| StoreError::not_found("User"))
    }
}

#[async_trait]
impl ProfileRepository for PostgresStore {
    #[instrument(skip(self, profile), fields(user_id = %profile.user_id), err)]
    async fn create_profile(&self, profile: NewProfile, now: DateTime<Utc>) -> StoreResult<Profile> {
        let profile = profile.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let id = next_id(&mut tx, "profiles").await?;
        let p = profile.into_profile(ProfileId::new(id), now);

        sqlx::query(
            r#"
            INSERT INTO profiles
                (id, user_id, profile_type, name, cnpj_cpf, legal_name, contact_email, contact_phone,
                 address, city, state, zip_code, country, tax_id, status, balance_cents,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(p.id.get())
        .bind(p.user_id.get())
        .bind(p.profile_type.as_str())
        .bind(&p.name)
        .bind(&p.cnpj_cpf)
        .bind(&p.legal_name)
        .bind(&p.contact_email)
        .bind(&p.contact_phone)
        .bind(&p.address)
        .bind(&p.city)
        .bind(&p.state)
        .bind(&p.zip_code)
        .bind(&p.country)
        .bind(&p.tax_id)
        .bind(p.status.as_str())
        .bind(p.balance.hundredths())
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_profile", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(p)
    }

    #[instrument(skip(self), err)]
    async fn profile_by_id(&self, id: ProfileId) -> StoreResult<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("profile_by_id", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn profiles_by_user(&self, user_id: UserId) -> StoreResult<Vec<Profile>> {
        let rows = sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE user_id = $1 ORDER BY id")
            .bind(user_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("profiles_by_user", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, changes), err)]
    async fn update_profile(&self, id: ProfileId, changes: ProfileChanges, now: DateTime<Utc>) -> StoreResult<Profile> {
        let changes = changes.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut p = lock_profile(&mut tx, id).await?;
        changes.apply(&mut p, now);

        sqlx::query(
            r#"
            UPDATE profiles
            SET name = $2, legal_name = $3, contact_email = $4, contact_phone = $5, address = $6,
                city = $7, state = $8, zip_code = $9, tax_id = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(p.id.get())
        .bind(&p.name)
        .bind(&p.legal_name)
        .bind(&p.contact_email)
        .bind(&p.contact_phone)
        .bind(&p.address)
        .bind(&p.city)
        .bind(&p.state)
        .bind(&p.zip_code)
        .bind(&p.tax_id)
        .bind(p.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_profile", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(p)
    }
}

#[async_trait]
impl StationRepository for PostgresStore {
    #[instrument(skip(self, station), fields(network_id = %station.network_id), err)]
    async fn create_station(&self, station: NewGasStation, now: DateTime<Utc>) -> StoreResult<GasStation> {
        let station = station.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let id = next_id(&mut tx, "gas_stations").await?;
        let s = station.into_station(GasStationId::new(id), now);

        sqlx::query(
            r#"
            INSERT INTO gas_stations
                (id, network_id, name, cnpj, address, city, state, zip_code, contact_phone,
                 contact_email, operating_hours, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(s.id.get())
        .bind(s.network_id.get())
        .bind(&s.name)
        .bind(&s.cnpj)
        .bind(&s.address)
        .bind(&s.city)
        .bind(&s.state)
        .bind(&s.zip_code)
        .bind(&s.contact_phone)
        .bind(&s.contact_email)
        .bind(&s.operating_hours)
        .bind(s.status.as_str())
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_station", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(s)
    }

    #[instrument(skip(self), err)]
    async fn station_by_id(&self, id: GasStationId) -> StoreResult<Option<GasStation>> {
        let row = sqlx::query_as::<_, StationRow>("SELECT * FROM gas_stations WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("station_by_id", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn stations_by_network(&self, network_id: ProfileId) -> StoreResult<Vec<GasStation>> {
        let rows = sqlx::query_as::<_, StationRow>(
            "SELECT * FROM gas_stations WHERE network_id = $1 ORDER BY id",
        )
        .bind(network_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stations_by_network", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, changes), err)]
    async fn update_station(
        &self,
        id: GasStationId,
        changes: GasStationChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<GasStation> {
        let changes = changes.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut s = lock_station(&mut tx, id).await?;
        changes.apply(&mut s, now);
        update_station(&mut tx, &s).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(s)
    }

    #[instrument(skip(self), err)]
    async fn set_station_status(
        &self,
        id: GasStationId,
        status: RecordStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<GasStation> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut s = lock_station(&mut tx, id).await?;
        s.status = status;
        s.updated_at = now;
        update_station(&mut tx, &s).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(s)
    }

    #[instrument(skip(self), err)]
    async fn station_members(&self, station_id: GasStationId) -> StoreResult<Vec<StationMembership>> {
        let rows = sqlx::query_as::<_, StationMemberRow>(
            "SELECT * FROM gas_station_users WHERE gas_station_id = $1 ORDER BY id",
        )
        .bind(station_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("station_members", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn memberships_in_network(
        &self,
        user_id: UserId,
        network_id: ProfileId,
    ) -> StoreResult<Vec<StationMembership>> {
        let rows = sqlx::query_as::<_, StationMemberRow>(
            r#"
            SELECT m.*
            FROM gas_station_users m
            JOIN gas_stations s ON s.id = m.gas_station_id
            WHERE m.user_id = $1 AND s.network_id = $2
            ORDER BY m.id
            "#,
        )
        .bind(user_id.get())
        .bind(network_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("memberships_in_network", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, withdrawal), fields(network_id = %withdrawal.network_id), err)]
    async fn create_withdrawal(&self, withdrawal: NewWithdrawal, now: DateTime<Utc>) -> StoreResult<Withdrawal> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let network = lock_profile(&mut tx, withdrawal.network_id).await?;
        let withdrawal = withdrawal.validate(network.balance)?;
        let remaining = network
            .balance
            .checked_sub(withdrawal.amount)
            .ok_or_else(|| StoreError::invariant("insufficient balance for withdrawal"))?;

        let id = next_id(&mut tx, "withdrawals").await?;
        let w = withdrawal.into_withdrawal(WithdrawalId::new(id), now);
        sqlx::query(
            r#"
            INSERT INTO withdrawals
                (id, network_id, amount_cents, bank_account, status, requested_at, processed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(w.id.get())
        .bind(w.network_id.get())
        .bind(w.amount.hundredths())
        .bind(Json(&w.bank_account))
        .bind(w.status.as_str())
        .bind(w.requested_at)
        .bind(w.processed_at)
        .bind(w.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_withdrawal", e))?;
        set_profile_balance(&mut tx, w.network_id, remaining, now).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(w)
    }

    #[instrument(skip(self), err)]
    async fn withdrawal_by_id(&self, id: WithdrawalId) -> StoreResult<Option<Withdrawal>> {
        let row = sqlx::query_as::<_, WithdrawalRow>("SELECT * FROM withdrawals WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("withdrawal_by_id", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn withdrawals_by_network(&self, network_id: ProfileId) -> StoreResult<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT * FROM withdrawals WHERE network_id = $1 ORDER BY id DESC",
        )
        .bind(network_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("withdrawals_by_network", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        status: WithdrawalStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Withdrawal> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut w = sqlx::query_as::<_, WithdrawalRow>("SELECT * FROM withdrawals WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("transition_withdrawal", e))?
            .map(|r| r.0)
            .ok_or_else(|| StoreError::not_found("Withdrawal"))?;

        let refund = w.transition(status, now)?;
        if !refund.is_zero() {
            let network = lock_profile(&mut tx, w.network_id).await?;
            let balance = credit(network.balance, refund)?;
            set_profile_balance(&mut tx, w.network_id, balance, now).await?;
        }
        sqlx::query("UPDATE withdrawals SET status = $2, processed_at = $3 WHERE id = $1")
            .bind(w.id.get())
            .bind(w.status.as_str())
            .bind(w.processed_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("transition_withdrawal", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(w)
    }
}

#[async_trait]
impl FleetRepository for PostgresStore {
    #[instrument(skip(self, vehicle), fields(fleet_id = %vehicle.fleet_id), err)]
    async fn create_vehicle(&self, vehicle: NewVehicle, now: DateTime<Utc>) -> StoreResult<Vehicle> {
        let vehicle = vehicle.validate(now)?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let id = next_id(&mut tx, "vehicles").await?;
        let v = vehicle.into_vehicle(VehicleId::new(id), now);

        sqlx::query(
            r#"
            INSERT INTO vehicles
                (id, fleet_id, license_plate, vehicle_type, brand, model, year, fuel_type, status,
                 qr_code_id, balance_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(v.id.get())
        .bind(v.fleet_id.get())
        .bind(&v.license_plate)
        .bind(v.vehicle_type.as_str())
        .bind(&v.brand)
        .bind(&v.model)
        .bind(v.year)
        .bind(v.fuel_type.as_str())
        .bind(v.status.as_str())
        .bind(v.qr_code_id.map(QrCodeId::get))
        .bind(v.balance.hundredths())
        .bind(v.created_at)
        .bind(v.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_vehicle", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(v)
    }

    #[instrument(skip(self), err)]
    async fn vehicle_by_id(&self, id: VehicleId) -> StoreResult<Option<Vehicle>> {
        let row = sqlx::query_as::<_, VehicleRow>("SELECT * FROM vehicles WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("vehicle_by_id", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn vehicles_by_fleet(&self, fleet_id: ProfileId) -> StoreResult<Vec<Vehicle>> {
        let rows = sqlx::query_as::<_, VehicleRow>("SELECT * FROM vehicles WHERE fleet_id = $1 ORDER BY id")
            .bind(fleet_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("vehicles_by_fleet", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, changes), err)]
    async fn update_vehicle(&self, id: VehicleId, changes: VehicleChanges, now: DateTime<Utc>) -> StoreResult<Vehicle> {
        let changes = changes.validate(now)?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut v = lock_vehicle(&mut tx, id).await?;
        changes.apply(&mut v, now);
        update_vehicle(&mut tx, &v).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(v)
    }

    #[instrument(skip(self), err)]
    async fn fleet_members(&self, fleet_id: ProfileId) -> StoreResult<Vec<FleetMembership>> {
        let rows = sqlx::query_as::<_, FleetMemberRow>("SELECT * FROM fleet_users WHERE fleet_id = $1 ORDER BY id")
            .bind(fleet_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fleet_members", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn fleet_membership(&self, fleet_id: ProfileId, user_id: UserId) -> StoreResult<Option<FleetMembership>> {
        let row = sqlx::query_as::<_, FleetMemberRow>(
            "SELECT * FROM fleet_users WHERE fleet_id = $1 AND user_id = $2",
        )
        .bind(fleet_id.get())
        .bind(user_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fleet_membership", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn assign_vehicles(
        &self,
        fleet_id: ProfileId,
        user_id: UserId,
        vehicles: Vec<VehicleId>,
    ) -> StoreResult<FleetMembership> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let ids: Vec<i64> = vehicles.iter().map(|v| v.get()).collect();
        let owned: Vec<i64> = sqlx::query_scalar("SELECT id FROM vehicles WHERE fleet_id = $1 AND id = ANY($2)")
            .bind(fleet_id.get())
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("assign_vehicles", e))?;
        if let Some(foreign) = ids.iter().find(|id| !owned.contains(id)) {
            return Err(StoreError::Domain(DomainError::validation(format!(
                "vehicle {foreign} does not belong to this fleet"
            ))));
        }

        let mut m = sqlx::query_as::<_, FleetMemberRow>(
            "SELECT * FROM fleet_users WHERE fleet_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(fleet_id.get())
        .bind(user_id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("assign_vehicles", e))?
        .map(|r| r.0)
        .ok_or_else(|| StoreError::not_found("Fleet member"))?;
        if m.role != FleetRole::Driver {
            return Err(StoreError::invariant("vehicles can only be assigned to drivers"));
        }
        m.assign(&vehicles);

        let assigned: Vec<i64> = m.assigned_vehicles.iter().map(|v| v.get()).collect();
        sqlx::query("UPDATE fleet_users SET assigned_vehicles = $2 WHERE id = $1")
            .bind(m.id.get())
            .bind(&assigned)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("assign_vehicles", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(m)
    }

    #[instrument(skip(self), err)]
    async fn allocate_to_vehicle(&self, vehicle_id: VehicleId, amount: Money, now: DateTime<Utc>) -> StoreResult<Allocation> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let fleet_id: i64 = sqlx::query_scalar("SELECT fleet_id FROM vehicles WHERE id = $1")
            .bind(vehicle_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("allocate_to_vehicle", e))?
            .ok_or_else(|| StoreError::not_found("Vehicle"))?;
        let fleet = lock_profile(&mut tx, ProfileId::new(fleet_id)).await?;
        let holder = QrHolder::Vehicle(vehicle_id);
        let wallet = lock_holder(&mut tx, holder).await?;

        let allocation = allocate(fleet.balance, wallet.balance, amount)?;
        set_profile_balance(&mut tx, fleet.id, allocation.profile_balance, now).await?;
        set_holder_balance(&mut tx, holder, allocation.target_balance, now).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(allocation)
    }
}

#[async_trait]
impl FamilyRepository for PostgresStore {
    #[instrument(skip(self, dependent), fields(family_id = %dependent.family_id), err)]
    async fn create_dependent(&self, dependent: NewDependent, now: DateTime<Utc>) -> StoreResult<Dependent> {
        let dependent = dependent.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let id = next_id(&mut tx, "family_dependents").await?;
        let d = dependent.into_dependent(DependentId::new(id), now);

        sqlx::query(
            r#"
            INSERT INTO family_dependents
                (id, family_id, user_id, name, cpf, relationship, status, qr_code_id, balance_cents,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(d.id.get())
        .bind(d.family_id.get())
        .bind(d.user_id.map(UserId::get))
        .bind(&d.name)
        .bind(&d.cpf)
        .bind(d.relationship.as_str())
        .bind(d.status.as_str())
        .bind(d.qr_code_id.map(QrCodeId::get))
        .bind(d.balance.hundredths())
        .bind(d.created_at)
        .bind(d.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_dependent", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(d)
    }

    #[instrument(skip(self), err)]
    async fn dependent_by_id(&self, id: DependentId) -> StoreResult<Option<Dependent>> {
        let row = sqlx::query_as::<_, DependentRow>("SELECT * FROM family_dependents WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("dependent_by_id", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn dependents_by_family(&self, family_id: ProfileId) -> StoreResult<Vec<Dependent>> {
        let rows = sqlx::query_as::<_, DependentRow>(
            "SELECT * FROM family_dependents WHERE family_id = $1 ORDER BY id",
        )
        .bind(family_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("dependents_by_family", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn dependent_for_user(&self, user_id: UserId) -> StoreResult<Option<Dependent>> {
        let row = sqlx::query_as::<_, DependentRow>("SELECT * FROM family_dependents WHERE user_id = $1")
            .bind(user_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("dependent_for_user", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self, changes), err)]
    async fn update_dependent(
        &self,
        id: DependentId,
        changes: DependentChanges,
        now: DateTime<Utc>,
    ) -> StoreResult<Dependent> {
        let changes = changes.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut d = lock_dependent(&mut tx, id).await?;
        changes.apply(&mut d, now);
        update_dependent(&mut tx, &d).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(d)
    }

    #[instrument(skip(self), err)]
    async fn allocate_to_dependent(
        &self,
        dependent_id: DependentId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> StoreResult<Allocation> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let family_id: i64 = sqlx::query_scalar("SELECT family_id FROM family_dependents WHERE id = $1")
            .bind(dependent_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("allocate_to_dependent", e))?
            .ok_or_else(|| StoreError::not_found("Dependent"))?;
        let family = lock_profile(&mut tx, ProfileId::new(family_id)).await?;
        let holder = QrHolder::Dependent(dependent_id);
        let wallet = lock_holder(&mut tx, holder).await?;

        let allocation = allocate(family.balance, wallet.balance, amount)?;
        set_profile_balance(&mut tx, family.id, allocation.profile_balance, now).await?;
        set_holder_balance(&mut tx, holder, allocation.target_balance, now).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(allocation)
    }
}

#[async_trait]
impl WalletRepository for PostgresStore {
    #[instrument(skip(self, qr, code), fields(holder = ?qr.holder), err)]
    async fn issue_qr_code(&self, qr: NewQrCode, code: String, now: DateTime<Utc>) -> StoreResult<QrCode> {
        let qr = qr.validate(now)?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let holder = qr.holder;

        let wallet = lock_holder(&mut tx, holder).await?;
        if wallet.payer_profile_id != qr.profile_id {
            return Err(StoreError::Domain(DomainError::validation(
                "entity does not belong to this profile",
            )));
        }

        let retired = sqlx::query(
            "UPDATE qr_codes SET status = 'inactive' WHERE entity_type = $1 AND entity_id = $2 AND status = 'active'",
        )
        .bind(holder.entity_type().as_str())
        .bind(holder.entity_id())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("issue_qr_code", e))?
        .rows_affected();

        let id = next_id(&mut tx, "qr_codes").await?;
        let q = qr.into_qr_code(QrCodeId::new(id), code, retired > 0, now);
        sqlx::query(
            r#"
            INSERT INTO qr_codes
                (id, code, entity_type, entity_id, profile_id, status, generated_at, expires_at,
                 regenerated_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(q.id.get())
        .bind(&q.code)
        .bind(q.entity_type.as_str())
        .bind(q.entity_id)
        .bind(q.profile_id.get())
        .bind(q.status.as_str())
        .bind(q.generated_at)
        .bind(q.expires_at)
        .bind(q.regenerated_at)
        .bind(q.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("issue_qr_code", e))?;

        let (table, _, _) = holder_table(holder);
        let sql = format!("UPDATE {table} SET qr_code_id = $2, updated_at = $3 WHERE id = $1");
        sqlx::query(&sql)
            .bind(holder.entity_id())
            .bind(q.id.get())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("issue_qr_code", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(q)
    }

    #[instrument(skip(self, code), err)]
    async fn qr_code_by_code(&self, code: &str) -> StoreResult<Option<QrCode>> {
        let row = sqlx::query_as::<_, QrCodeRow>("SELECT * FROM qr_codes WHERE code = $1")
            .bind(code)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("qr_code_by_code", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn qr_codes_for(&self, holder: QrHolder) -> StoreResult<Vec<QrCode>> {
        let rows = sqlx::query_as::<_, QrCodeRow>(
            "SELECT * FROM qr_codes WHERE entity_type = $1 AND entity_id = $2 ORDER BY id DESC",
        )
        .bind(holder.entity_type().as_str())
        .bind(holder.entity_id())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("qr_codes_for", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(
        skip(self, request),
        fields(gas_station_id = %request.gas_station_id, attendant_id = %request.attendant_id),
        err
    )]
    async fn record_fuel_purchase(&self, request: PurchaseRequest, now: DateTime<Utc>) -> StoreResult<PurchaseReceipt> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;

        let qr = sqlx::query_as::<_, QrCodeRow>("SELECT * FROM qr_codes WHERE code = $1 FOR UPDATE")
            .bind(&request.code)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("record_fuel_purchase", e))?
            .map(|r| r.0)
            .ok_or_else(|| StoreError::not_found("QR code"))?;
        if qr.status == QrStatus::Active && qr.is_expired(now) {
            sqlx::query("UPDATE qr_codes SET status = 'expired' WHERE id = $1")
                .bind(qr.id.get())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("record_fuel_purchase", e))?;
            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
            return Err(StoreError::invariant("QR code has expired"));
        }
        qr.check_usable(now)?;
        let holder = qr.holder();

        let wallet = lock_holder(&mut tx, holder).await?;
        if !wallet.active {
            return Err(StoreError::invariant(format!("{} is not active", holder.entity_type())));
        }
        let (total, rest) = request.purchase.settle(wallet.balance)?;
        let network = lock_profile(&mut tx, request.network_id).await?;
        let network_balance = credit(network.balance, total)?;

        let id = next_id(&mut tx, "transactions").await?;
        let t = NewFuelTransaction {
            qr_code_id: qr.id,
            gas_station_id: request.gas_station_id,
            network_id: request.network_id,
            attendant_id: request.attendant_id,
            holder,
            payer_profile_id: wallet.payer_profile_id,
            purchase: request.purchase,
            total,
        }
        .into_transaction(TransactionId::new(id), now);

        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, qr_code_id, gas_station_id, network_id, attendant_id, entity_type, entity_id,
                 payer_profile_id, fuel_type, liters_hundredths, amount_debited_cents, unit_price_cents,
                 total_cost_cents, status, timestamp, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(t.id.get())
        .bind(t.qr_code_id.get())
        .bind(t.gas_station_id.get())
        .bind(t.network_id.get())
        .bind(t.attendant_id.get())
        .bind(t.entity_type.as_str())
        .bind(t.entity_id)
        .bind(t.payer_profile_id.get())
        .bind(t.fuel_type.as_str())
        .bind(t.liters.hundredths())
        .bind(t.amount_debited.hundredths())
        .bind(t.unit_price.hundredths())
        .bind(t.total_cost.hundredths())
        .bind(t.status.as_str())
        .bind(t.timestamp)
        .bind(t.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("record_fuel_purchase", e))?;
        set_holder_balance(&mut tx, holder, rest, now).await?;
        set_profile_balance(&mut tx, request.network_id, network_balance, now).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(PurchaseReceipt {
            transaction: t,
            balance_before: wallet.balance,
            balance_after: rest,
        })
    }

    #[instrument(skip(self), err)]
    async fn transaction_by_id(&self, id: TransactionId) -> StoreResult<Option<FuelTransaction>> {
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("transaction_by_id", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn transactions_for_station(&self, station_id: GasStationId) -> StoreResult<Vec<FuelTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE gas_station_id = $1 ORDER BY id DESC",
        )
        .bind(station_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transactions_for_station", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn transactions_for_holder(&self, holder: QrHolder) -> StoreResult<Vec<FuelTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE entity_type = $1 AND entity_id = $2 ORDER BY id DESC",
        )
        .bind(holder.entity_type().as_str())
        .bind(holder.entity_id())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transactions_for_holder", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn refund_transaction(&self, id: TransactionId, now: DateTime<Utc>) -> StoreResult<Refund> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut t = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("refund_transaction", e))?
            .map(|r| r.0)
            .ok_or_else(|| StoreError::not_found("Transaction"))?;
        let amount = t.refund()?;
        let holder = t.holder();

        let wallet = lock_holder(&mut tx, holder).await?;
        let holder_balance = credit(wallet.balance, amount)?;
        let network = lock_profile(&mut tx, t.network_id).await?;
        let network_balance = network
            .balance
            .checked_sub(amount)
            .filter(|b| !b.is_negative())
            .ok_or_else(|| StoreError::invariant("network balance does not cover the refund"))?;

        set_holder_balance(&mut tx, holder, holder_balance, now).await?;
        set_profile_balance(&mut tx, t.network_id, network_balance, now).await?;
        sqlx::query("UPDATE transactions SET status = $2 WHERE id = $1")
            .bind(t.id.get())
            .bind(t.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("refund_transaction", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(Refund {
            transaction: t,
            holder_balance,
        })
    }

    #[instrument(skip(self, recharge), fields(profile_id = %recharge.profile_id), err)]
    async fn create_recharge(
        &self,
        recharge: NewRecharge,
        reference_code: String,
        now: DateTime<Utc>,
    ) -> StoreResult<BalanceRecharge> {
        let recharge = recharge.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let id = next_id(&mut tx, "balance_recharges").await?;
        let r = recharge.into_recharge(RechargeId::new(id), reference_code, now);

        sqlx::query(
            r#"
            INSERT INTO balance_recharges
                (id, profile_id, amount_cents, payment_method, payment_status, transaction_id,
                 reference_code, notes, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(r.id.get())
        .bind(r.profile_id.get())
        .bind(r.amount.hundredths())
        .bind(r.payment_method.as_str())
        .bind(r.payment_status.as_str())
        .bind(&r.transaction_id)
        .bind(&r.reference_code)
        .bind(&r.notes)
        .bind(r.created_at)
        .bind(r.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_recharge", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(r)
    }

    #[instrument(skip(self), err)]
    async fn recharges_by_profile(&self, profile_id: ProfileId) -> StoreResult<Vec<BalanceRecharge>> {
        let rows = sqlx::query_as::<_, RechargeRow>(
            "SELECT * FROM balance_recharges WHERE profile_id = $1 ORDER BY id DESC",
        )
        .bind(profile_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("recharges_by_profile", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self, transaction_id), err)]
    async fn confirm_recharge(
        &self,
        reference_code: &str,
        transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<BalanceRecharge> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut r = lock_recharge(&mut tx, reference_code).await?;
        let amount = r.confirm(transaction_id, now)?;
        let profile = lock_profile(&mut tx, r.profile_id).await?;
        let balance = credit(profile.balance, amount)?;

        set_profile_balance(&mut tx, r.profile_id, balance, now).await?;
        update_recharge(&mut tx, &r).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(r)
    }

    #[instrument(skip(self), err)]
    async fn fail_recharge(&self, reference_code: &str) -> StoreResult<BalanceRecharge> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut r = lock_recharge(&mut tx, reference_code).await?;
        r.fail()?;
        update_recharge(&mut tx, &r).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(r)
    }
}

#[async_trait]
impl NotificationRepository for PostgresStore {
    #[instrument(skip(self, notification), fields(user_id = %notification.user_id), err)]
    async fn create_notification(&self, notification: NewNotification, now: DateTime<Utc>) -> StoreResult<Notification> {
        let notification = notification.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let id = next_id(&mut tx, "notifications").await?;
        let n = notification.into_notification(NotificationId::new(id), now);

        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, type, title, content, related_entity_id, related_entity_type, read,
                 email_sent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(n.id.get())
        .bind(n.user_id.get())
        .bind(n.kind.as_str())
        .bind(&n.title)
        .bind(&n.content)
        .bind(n.related_entity_id)
        .bind(&n.related_entity_type)
        .bind(n.read)
        .bind(n.email_sent)
        .bind(n.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_notification", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(n)
    }

    #[instrument(skip(self), err)]
    async fn notifications_for(&self, user_id: UserId, unread_only: bool) -> StoreResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            "SELECT * FROM notifications WHERE user_id = $1 AND (NOT $2 OR NOT read) ORDER BY id DESC",
        )
        .bind(user_id.get())
        .bind(unread_only)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("notifications_for", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn mark_notification_read(&self, user_id: UserId, id: NotificationId) -> StoreResult<Notification> {
        let row = sqlx::query_as::<_, NotificationRow>(
            "UPDATE notifications SET read = TRUE WHERE id = $1 AND user_id = $2 RETURNING *",
        )
        .bind(id.get())
        .bind(user_id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_notification_read", e))?;
        row.map(|r| r.0).ok_or_else(|| StoreError::not_found("Notification"))
    }

    #[instrument(skip(self), err)]
    async fn mark_all_read(&self, user_id: UserId) -> StoreResult<u64> {
        let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE user_id = $1 AND NOT read")
            .bind(user_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_all_read", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl InvitationRepository for PostgresStore {
    #[instrument(skip(self, invitation, token), fields(profile_id = %invitation.profile_id), err)]
    async fn create_invitation(
        &self,
        invitation: NewInvitation,
        token: String,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Invitation> {
        let invitation = invitation.validate()?;
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let id = next_id(&mut tx, "invitations").await?;
        let i = invitation.into_invitation(InvitationId::new(id), token, ttl, now);

        sqlx::query(
            r#"
            INSERT INTO invitations
                (id, invited_by_user_id, invited_email, profile_id, profile_type, role, gas_station_id,
                 dependent_id, token, status, expires_at, accepted_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(i.id.get())
        .bind(i.invited_by_user_id.get())
        .bind(&i.invited_email)
        .bind(i.profile_id.get())
        .bind(i.profile_type.as_str())
        .bind(i.role.as_str())
        .bind(i.gas_station_id.map(GasStationId::get))
        .bind(i.dependent_id.map(DependentId::get))
        .bind(&i.token)
        .bind(i.status.as_str())
        .bind(i.expires_at)
        .bind(i.accepted_at)
        .bind(i.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create_invitation", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(i)
    }

    #[instrument(skip(self), err)]
    async fn invitation_by_id(&self, id: InvitationId) -> StoreResult<Option<Invitation>> {
        let row = sqlx::query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("invitation_by_id", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self, token), err)]
    async fn invitation_by_token(&self, token: &str) -> StoreResult<Option<Invitation>> {
        let row = sqlx::query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE token = $1")
            .bind(token)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("invitation_by_token", e))?;
        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self), err)]
    async fn invitations_by_profile(&self, profile_id: ProfileId) -> StoreResult<Vec<Invitation>> {
        let rows = sqlx::query_as::<_, InvitationRow>(
            "SELECT * FROM invitations WHERE profile_id = $1 ORDER BY id DESC",
        )
        .bind(profile_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("invitations_by_profile", e))?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    #[instrument(skip(self), err)]
    async fn cancel_invitation(&self, id: InvitationId, now: DateTime<Utc>) -> StoreResult<Invitation> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut i = sqlx::query_as::<_, InvitationRow>("SELECT * FROM invitations WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("cancel_invitation", e))?
            .map(|r| r.0)
            .ok_or_else(|| StoreError::not_found("Invitation"))?;
        if i.status == InvitationStatus::Pending && i.is_expired(now) {
            i.expire();
            update_invitation(&mut tx, &i).await?;
            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
            return Err(StoreError::invariant("invitation has expired"));
        }
        i.cancel(now)?;
        update_invitation(&mut tx, &i).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(i)
    }

    #[instrument(skip(self, token), fields(user_id = %user_id), err)]
    async fn accept_invitation(&self, token: &str, user_id: UserId, now: DateTime<Utc>) -> StoreResult<Acceptance> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))?;
        let mut invitation = lock_invitation_by_token(&mut tx, token).await?;
        if invitation.status == InvitationStatus::Pending && invitation.is_expired(now) {
            invitation.expire();
            update_invitation(&mut tx, &invitation).await?;
            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
            return Err(StoreError::invariant("invitation has expired"));
        }
        invitation.accept(now)?;
        let mut user = lock_user(&mut tx, user_id).await?;

        match invitation.profile_type {
            InviteProfileType::GasStation => {
                let role = invited_station_role(&invitation)?;
                let station_id = invitation
                    .gas_station_id
                    .ok_or_else(|| StoreError::invariant("invitation has no station"))?;
                let station = lock_station(&mut tx, station_id).await?;
                if station.network_id != invitation.profile_id {
                    return Err(StoreError::invariant("station does not belong to the invited network"));
                }
                let id = next_id(&mut tx, "gas_station_users").await?;
                sqlx::query(
                    r#"
                    INSERT INTO gas_station_users
                        (id, gas_station_id, user_id, role, status, invited_at, accepted_at, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(id)
                .bind(station_id.get())
                .bind(user_id.get())
                .bind(role.as_str())
                .bind(RecordStatus::Active.as_str())
                .bind(invitation.created_at)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("accept_invitation", e))?;
            }
            InviteProfileType::Fleet => {
                let role = invited_fleet_role(&invitation)?;
                let id = next_id(&mut tx, "fleet_users").await?;
                sqlx::query(
                    r#"
                    INSERT INTO fleet_users
                        (id, fleet_id, user_id, role, status, assigned_vehicles, invited_at, accepted_at, created_at)
                    VALUES ($1, $2, $3, $4, $5, '{}', $6, $7, $8)
                    "#,
                )
                .bind(id)
                .bind(invitation.profile_id.get())
                .bind(user_id.get())
                .bind(role.as_str())
                .bind(RecordStatus::Active.as_str())
                .bind(invitation.created_at)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("accept_invitation", e))?;
            }
            InviteProfileType::Family => {
                let dependent_id = invitation
                    .dependent_id
                    .ok_or_else(|| StoreError::invariant("invitation has no dependent"))?;
                let mut dependent = lock_dependent(&mut tx, dependent_id).await?;
                if dependent.family_id != invitation.profile_id {
                    return Err(StoreError::invariant("dependent does not belong to the invited family"));
                }
                if dependent.user_id.is_some() {
                    return Err(StoreError::conflict("dependent is already linked to a user"));
                }
                dependent.user_id = Some(user_id);
                dependent.updated_at = now;
                update_dependent(&mut tx, &dependent).await?;
            }
        }

        let (account_type, role) = accepted_account(&invitation);
        user.account_type = account_type;
        user.role = role;
        user.updated_at = now;
        update_user(&mut tx, &user).await?;
        update_invitation(&mut tx, &invitation).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(Acceptance { invitation, user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_constraints_have_friendly_messages() {
        assert_eq!(
            conflict_message("vehicles_license_plate_key"),
            "a vehicle with this license plate already exists"
        );
        assert_eq!(conflict_message("something_else"), "record already exists");
    }

    #[test]
    fn schema_covers_every_table() {
        for table in [
            "users",
            "profiles",
            "gas_stations",
            "gas_station_users",
            "withdrawals",
            "vehicles",
            "fleet_users",
            "family_dependents",
            "qr_codes",
            "transactions",
            "balance_recharges",
            "notifications",
            "invitations",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table {table}"
            );
        }
    }

    #[test]
    fn holder_tables_match_schema() {
        let (table, owner, _) = holder_table(QrHolder::Vehicle(VehicleId::new(1)));
        assert_eq!((table, owner), ("vehicles", "fleet_id"));
        let (table, owner, _) = holder_table(QrHolder::Dependent(DependentId::new(1)));
        assert_eq!((table, owner), ("family_dependents", "family_id"));
    }
}
