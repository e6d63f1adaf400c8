use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use iapos_core::{GasStationId, Money, ProfileId, RecordStatus};
use iapos_notifications::{NewNotification, NotificationType};
use iapos_profiles::ProfileType;
use iapos_stations::{
    BankAccount, GasStation, GasStationChanges, NewGasStation, NewWithdrawal, StationMembership,
    Withdrawal,
};
use iapos_wallet::FuelTransaction;

use crate::app::rpc::{ok, RpcInput, RpcResponse};
use crate::app::services::AppServices;
use crate::authz::{allow, require_profile_type, NetworkScope, StationScope};
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/gasStation.getStation", get(get_station))
        .route("/gasStation.getNetworkStations", get(get_network_stations))
        .route("/gasStation.createStation", post(create_station))
        .route("/gasStation.updateStation", post(update_station))
        .route("/gasStation.getStationUsers", get(get_station_users))
        .route("/gasStation.setStationStatus", post(set_station_status))
        .route("/gasStation.getStationTransactions", get(get_station_transactions))
        .route("/gasStation.requestWithdrawal", post(request_withdrawal))
        .route("/gasStation.getWithdrawals", get(get_withdrawals))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationIdInput {
    pub station_id: GasStationId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkIdInput {
    pub network_id: ProfileId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStationInput {
    pub network_id: ProfileId,
    pub name: String,
    pub cnpj: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip_code: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub operating_hours: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStationInput {
    pub station_id: GasStationId,
    #[serde(flatten)]
    pub changes: GasStationChanges,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatusInput {
    pub station_id: GasStationId,
    pub status: RecordStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalInput {
    pub network_id: ProfileId,
    pub amount: Money,
    pub bank_account: BankAccount,
}

/// A station membership with the member's display fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationUserView {
    #[serde(flatten)]
    pub membership: StationMembership,
    pub name: Option<String>,
    pub email: Option<String>,
}

pub async fn get_station(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<StationIdInput>,
) -> RpcResponse<GasStation> {
    let scope = StationScope::load(&services, &user, input.station_id).await?;
    allow(&user, scope.can_manage(&user), "You do not have access to this gas station")?;
    ok(scope.station)
}

pub async fn get_network_stations(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<NetworkIdInput>,
) -> RpcResponse<Vec<GasStation>> {
    let scope = NetworkScope::load(&services, &user, input.network_id).await?;
    allow(&user, scope.is_supervisor(&user), "You do not have access to this network")?;
    ok(services.store.stations_by_network(scope.network.id).await?)
}

pub async fn create_station(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<CreateStationInput>,
) -> RpcResponse<GasStation> {
    let scope = NetworkScope::load(&services, &user, input.network_id).await?;
    require_profile_type(&scope.network, ProfileType::GasStationNetwork)?;
    allow(&user, scope.is_owner(&user), "Only the network owner can create gas stations")?;

    let station = services
        .store
        .create_station(
            NewGasStation {
                network_id: input.network_id,
                name: input.name,
                cnpj: input.cnpj,
                address: input.address,
                city: input.city,
                state: input.state,
                zip_code: input.zip_code,
                contact_phone: input.contact_phone,
                contact_email: input.contact_email,
                operating_hours: input.operating_hours,
            },
            services.now(),
        )
        .await?;
    tracing::info!(station_id = %station.id, network_id = %station.network_id, by = %user.id, "gas station created");
    ok(station)
}

pub async fn update_station(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<UpdateStationInput>,
) -> RpcResponse<GasStation> {
    let scope = StationScope::load(&services, &user, input.station_id).await?;
    allow(&user, scope.can_manage(&user), "You do not have access to this gas station")?;
    ok(services
        .store
        .update_station(input.station_id, input.changes, services.now())
        .await?)
}

pub async fn get_station_users(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<StationIdInput>,
) -> RpcResponse<Vec<StationUserView>> {
    let scope = StationScope::load(&services, &user, input.station_id).await?;
    allow(&user, scope.can_manage(&user), "You do not have access to this gas station")?;

    let members = services.store.station_members(input.station_id).await?;
    let mut views = Vec::with_capacity(members.len());
    for membership in members {
        let member = services.store.user_by_id(membership.user_id).await?;
        views.push(StationUserView {
            name: member.as_ref().and_then(|u| u.name.clone()),
            email: member.and_then(|u| u.email),
            membership,
        });
    }
    ok(views)
}

pub async fn set_station_status(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<StationStatusInput>,
) -> RpcResponse<GasStation> {
    let scope = StationScope::load(&services, &user, input.station_id).await?;
    allow(&user, scope.network.is_owner(&user), "Only the network owner can change station status")?;
    let station = services
        .store
        .set_station_status(input.station_id, input.status, services.now())
        .await?;
    tracing::info!(station_id = %station.id, status = %station.status, by = %user.id, "station status changed");
    ok(station)
}

pub async fn get_station_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<StationIdInput>,
) -> RpcResponse<Vec<FuelTransaction>> {
    let scope = StationScope::load(&services, &user, input.station_id).await?;
    allow(&user, scope.can_manage(&user), "You do not have access to this gas station")?;
    ok(services.store.transactions_for_station(input.station_id).await?)
}

pub async fn request_withdrawal(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<WithdrawalInput>,
) -> RpcResponse<Withdrawal> {
    let scope = NetworkScope::load(&services, &user, input.network_id).await?;
    require_profile_type(&scope.network, ProfileType::GasStationNetwork)?;
    allow(&user, scope.is_owner(&user), "Only the network owner can request withdrawals")?;

    let withdrawal = services
        .store
        .create_withdrawal(
            NewWithdrawal {
                network_id: input.network_id,
                amount: input.amount,
                bank_account: input.bank_account,
            },
            services.now(),
        )
        .await?;
    tracing::info!(withdrawal_id = %withdrawal.id, network_id = %withdrawal.network_id, amount = %withdrawal.amount, "withdrawal requested");

    let (id, amount) = (withdrawal.id, withdrawal.amount);
    services
        .notify_profile_owner(withdrawal.network_id, |owner| {
            NewNotification::new(
                owner,
                NotificationType::Withdrawal,
                "Withdrawal requested",
                format!("Withdrawal of R$ {amount} is pending"),
            )
            .related("withdrawal", id.get())
        })
        .await;
    ok(withdrawal)
}

pub async fn get_withdrawals(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<NetworkIdInput>,
) -> RpcResponse<Vec<Withdrawal>> {
    let scope = NetworkScope::load(&services, &user, input.network_id).await?;
    allow(&user, scope.is_supervisor(&user), "You do not have access to this network")?;
    ok(services.store.withdrawals_by_network(scope.network.id).await?)
}
