use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_auth::User;
use iapos_core::{DomainError, FuelType, GasStationId, Liters, Money, ProfileId};
use iapos_infra::{PurchaseReceipt, PurchaseRequest};
use iapos_notifications::{NewNotification, NotificationType};
use iapos_profiles::ProfileType;
use iapos_wallet::{
    falls_below, generate_code, generate_reference_code, parse_code, BalanceRecharge,
    FuelPurchase, FuelTransaction, NewQrCode, NewRecharge, PaymentMethod, QrCode, QrEntityType,
    QrHolder, QrStatus,
};

use crate::app::errors::{RpcError, RpcResult};
use crate::app::rpc::{ok, RpcInput, RpcResponse};
use crate::app::services::AppServices;
use crate::authz::{allow, can_fund_profile, HolderScope, StationScope};
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/wallet.generateQrCode", post(generate_qr_code))
        .route("/wallet.getQrCodes", get(get_qr_codes))
        .route("/wallet.lookupQrCode", get(lookup_qr_code))
        .route("/wallet.recordFuelPurchase", post(record_fuel_purchase))
        .route("/wallet.createRecharge", post(create_recharge))
        .route("/wallet.getRecharges", get(get_recharges))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderInput {
    pub entity_type: QrEntityType,
    pub entity_id: i64,
}

impl HolderInput {
    fn holder(&self) -> QrHolder {
        QrHolder::from_parts(self.entity_type, self.entity_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQrInput {
    #[serde(flatten)]
    pub holder: HolderInput,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupInput {
    pub code: String,
    pub station_id: GasStationId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseInput {
    pub code: String,
    pub station_id: GasStationId,
    pub fuel_type: FuelType,
    pub liters: Liters,
    pub unit_price: Money,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeInput {
    pub profile_id: ProfileId,
    pub amount: Money,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileIdInput {
    pub profile_id: ProfileId,
}

/// What the attendant sees after scanning a code.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrLookup {
    pub code: String,
    pub entity_type: QrEntityType,
    pub entity_id: i64,
    pub display_name: String,
    pub fuel_type: Option<FuelType>,
    pub balance: Money,
    pub entity_status: String,
    pub qr_status: QrStatus,
    pub usable: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseView {
    #[serde(flatten)]
    pub transaction: FuelTransaction,
    pub balance_after: Money,
}

pub async fn generate_qr_code(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<GenerateQrInput>,
) -> RpcResponse<QrCode> {
    let holder = input.holder.holder();
    let scope = HolderScope::load(&services, &user, holder).await?;
    allow(&user, scope.can_issue_codes(&user), "You cannot issue QR codes for this entity")?;

    let qr = services
        .store
        .issue_qr_code(
            NewQrCode {
                holder,
                profile_id: scope.profile_id(),
                expires_at: input.expires_at,
            },
            generate_code(holder.entity_type()),
            services.now(),
        )
        .await?;
    tracing::info!(qr_code_id = %qr.id, entity_type = %qr.entity_type, entity_id = qr.entity_id, "QR code issued");
    ok(qr)
}

pub async fn get_qr_codes(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<HolderInput>,
) -> RpcResponse<Vec<QrCode>> {
    let holder = input.holder();
    let scope = HolderScope::load(&services, &user, holder).await?;
    allow(&user, scope.can_view(&user), "You do not have access to this entity")?;
    ok(services.store.qr_codes_for(holder).await?)
}

pub async fn lookup_qr_code(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<LookupInput>,
) -> RpcResponse<QrLookup> {
    let scope = StationScope::load(&services, &user, input.station_id).await?;
    allow(&user, scope.can_operate(&user), "You cannot operate this gas station")?;

    let (_, code) = parse_code(&input.code)?;
    let qr = services
        .store
        .qr_code_by_code(&code)
        .await?
        .ok_or_else(|| RpcError::not_found("QR code"))?;
    let usable = qr.is_usable(services.now());

    let lookup = match qr.holder() {
        QrHolder::Vehicle(id) => {
            let vehicle = services.vehicle(id).await?;
            let display_name = match (&vehicle.brand, &vehicle.model) {
                (Some(brand), Some(model)) => format!("{} ({brand} {model})", vehicle.license_plate),
                _ => vehicle.license_plate.clone(),
            };
            QrLookup {
                code: qr.code,
                entity_type: QrEntityType::Vehicle,
                entity_id: id.get(),
                display_name,
                fuel_type: Some(vehicle.fuel_type),
                balance: vehicle.balance,
                entity_status: vehicle.status.to_string(),
                qr_status: qr.status,
                usable,
            }
        }
        QrHolder::Dependent(id) => {
            let dependent = services.dependent(id).await?;
            QrLookup {
                code: qr.code,
                entity_type: QrEntityType::Dependent,
                entity_id: id.get(),
                display_name: dependent.name,
                fuel_type: None,
                balance: dependent.balance,
                entity_status: dependent.status.to_string(),
                qr_status: qr.status,
                usable,
            }
        }
    };
    ok(lookup)
}

pub async fn record_fuel_purchase(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<PurchaseInput>,
) -> RpcResponse<PurchaseView> {
    let scope = StationScope::load(&services, &user, input.station_id).await?;
    allow(&user, scope.can_operate(&user), "You cannot operate this gas station")?;
    if !scope.station.status.is_active() {
        return Err(DomainError::invariant("Gas station is not active").into());
    }

    let (_, code) = parse_code(&input.code)?;
    let receipt = services
        .store
        .record_fuel_purchase(
            PurchaseRequest {
                code,
                gas_station_id: scope.station.id,
                network_id: scope.station.network_id,
                attendant_id: user.id,
                purchase: FuelPurchase {
                    fuel_type: input.fuel_type,
                    liters: input.liters,
                    unit_price: input.unit_price,
                },
            },
            services.now(),
        )
        .await?;
    tracing::info!(
        transaction_id = %receipt.transaction.id,
        station_id = %receipt.transaction.gas_station_id,
        total = %receipt.transaction.total_cost,
        "fuel purchase recorded"
    );

    notify_purchase(&services, &receipt).await;
    ok(PurchaseView {
        balance_after: receipt.balance_after,
        transaction: receipt.transaction,
    })
}

/// Purchase receipt for the paying profile's owner, plus a low-balance alert
/// when this sale crossed the threshold.
async fn notify_purchase(services: &AppServices, receipt: &PurchaseReceipt) {
    let tx = &receipt.transaction;
    let (id, total, liters, after) = (tx.id, tx.total_cost, tx.liters, receipt.balance_after);
    let entity = tx.entity_type;

    services
        .notify_profile_owner(tx.payer_profile_id, |owner| {
            NewNotification::new(
                owner,
                NotificationType::FuelPurchase,
                "Fuel purchase",
                format!("{liters} L of fuel for R$ {total}; {entity} balance is now R$ {after}"),
            )
            .related("transaction", id.get())
        })
        .await;

    let threshold = services.config.low_balance_threshold;
    if falls_below(receipt.balance_before, after, threshold) {
        services
            .notify_profile_owner(tx.payer_profile_id, |owner| {
                NewNotification::new(
                    owner,
                    NotificationType::LowBalance,
                    "Low balance",
                    format!("{entity} balance fell to R$ {after}, below R$ {threshold}"),
                )
                .related(entity.as_str(), tx.entity_id)
            })
            .await;
    }
}

async fn fundable_profile(services: &AppServices, user: &User, id: ProfileId) -> RpcResult<()> {
    let profile = services.profile(id).await?;
    if profile.profile_type == ProfileType::GasStationNetwork {
        return Err(RpcError::bad_request("Gas station networks are not funded by recharges"));
    }
    let allowed = can_fund_profile(services, user, &profile).await?;
    allow(user, allowed, "You cannot manage this profile's balance")
}

pub async fn create_recharge(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<RechargeInput>,
) -> RpcResponse<BalanceRecharge> {
    fundable_profile(&services, &user, input.profile_id).await?;
    let recharge = services
        .store
        .create_recharge(
            NewRecharge {
                profile_id: input.profile_id,
                amount: input.amount,
                payment_method: input.payment_method,
                notes: input.notes,
            },
            generate_reference_code(),
            services.now(),
        )
        .await?;
    tracing::info!(reference = %recharge.reference_code, profile_id = %recharge.profile_id, amount = %recharge.amount, "recharge requested");
    ok(recharge)
}

pub async fn get_recharges(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<ProfileIdInput>,
) -> RpcResponse<Vec<BalanceRecharge>> {
    fundable_profile(&services, &user, input.profile_id).await?;
    ok(services.store.recharges_by_profile(input.profile_id).await?)
}
