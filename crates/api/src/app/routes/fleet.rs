use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use iapos_auth::{is_admin, User};
use iapos_core::{FuelType, Money, ProfileId, UserId, VehicleId};
use iapos_fleet::{FleetMembership, NewVehicle, Vehicle, VehicleChanges, VehicleType};
use iapos_profiles::ProfileType;
use iapos_wallet::{FuelTransaction, QrHolder};

use crate::app::errors::RpcResult;
use crate::app::rpc::{ok, RpcInput, RpcResponse};
use crate::app::services::AppServices;
use crate::authz::{allow, require_profile_type, FleetScope};
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/fleet.getVehicle", get(get_vehicle))
        .route("/fleet.getFleetVehicles", get(get_fleet_vehicles))
        .route("/fleet.createVehicle", post(create_vehicle))
        .route("/fleet.updateVehicle", post(update_vehicle))
        .route("/fleet.getFleetUsers", get(get_fleet_users))
        .route("/fleet.assignVehicles", post(assign_vehicles))
        .route("/fleet.allocateBalance", post(allocate_balance))
        .route("/fleet.getVehicleTransactions", get(get_vehicle_transactions))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleIdInput {
    pub vehicle_id: VehicleId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetIdInput {
    pub fleet_id: ProfileId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVehicleInput {
    pub fleet_id: ProfileId,
    pub license_plate: String,
    pub vehicle_type: VehicleType,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub fuel_type: FuelType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVehicleInput {
    pub vehicle_id: VehicleId,
    #[serde(flatten)]
    pub changes: VehicleChanges,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignVehiclesInput {
    pub fleet_id: ProfileId,
    pub user_id: UserId,
    pub vehicle_ids: Vec<VehicleId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateInput {
    pub vehicle_id: VehicleId,
    pub amount: Money,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetUserView {
    #[serde(flatten)]
    pub membership: FleetMembership,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleAllocation {
    pub vehicle_id: VehicleId,
    pub amount: Money,
    pub profile_balance: Money,
    pub vehicle_balance: Money,
}

/// Loads a vehicle and its fleet scope, rejecting callers who cannot see it.
async fn visible_vehicle(
    services: &AppServices,
    user: &User,
    id: VehicleId,
) -> RpcResult<(Vehicle, FleetScope)> {
    let vehicle = services.vehicle(id).await?;
    let scope = FleetScope::load(services, user, vehicle.fleet_id).await?;
    allow(user, scope.can_access_vehicle(user, &vehicle), "You do not have access to this vehicle")?;
    Ok((vehicle, scope))
}

pub async fn get_vehicle(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<VehicleIdInput>,
) -> RpcResponse<Vehicle> {
    let (vehicle, _) = visible_vehicle(&services, &user, input.vehicle_id).await?;
    ok(vehicle)
}

pub async fn get_fleet_vehicles(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<FleetIdInput>,
) -> RpcResponse<Vec<Vehicle>> {
    let scope = FleetScope::load(&services, &user, input.fleet_id).await?;
    allow(&user, scope.can_access(&user), "You do not have access to this fleet")?;

    let vehicles = services.store.vehicles_by_fleet(scope.fleet.id).await?;
    // Drivers only see what is assigned to them.
    ok(vehicles
        .into_iter()
        .filter(|v| scope.can_access_vehicle(&user, v) || is_admin(&user))
        .collect())
}

pub async fn create_vehicle(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<CreateVehicleInput>,
) -> RpcResponse<Vehicle> {
    let scope = FleetScope::load(&services, &user, input.fleet_id).await?;
    require_profile_type(&scope.fleet, ProfileType::Fleet)?;
    allow(&user, scope.is_owner(&user), "Only the fleet owner can add vehicles")?;

    let vehicle = services
        .store
        .create_vehicle(
            NewVehicle {
                fleet_id: input.fleet_id,
                license_plate: input.license_plate,
                vehicle_type: input.vehicle_type,
                brand: input.brand,
                model: input.model,
                year: input.year,
                fuel_type: input.fuel_type,
            },
            services.now(),
        )
        .await?;
    tracing::info!(vehicle_id = %vehicle.id, fleet_id = %vehicle.fleet_id, plate = %vehicle.license_plate, "vehicle created");
    ok(vehicle)
}

pub async fn update_vehicle(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<UpdateVehicleInput>,
) -> RpcResponse<Vehicle> {
    let vehicle = services.vehicle(input.vehicle_id).await?;
    let scope = FleetScope::load(&services, &user, vehicle.fleet_id).await?;
    allow(&user, scope.is_owner(&user), "Only the fleet owner can update vehicles")?;
    ok(services
        .store
        .update_vehicle(input.vehicle_id, input.changes, services.now())
        .await?)
}

pub async fn get_fleet_users(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<FleetIdInput>,
) -> RpcResponse<Vec<FleetUserView>> {
    let scope = FleetScope::load(&services, &user, input.fleet_id).await?;
    allow(&user, scope.can_access(&user), "You do not have access to this fleet")?;

    let members = services.store.fleet_members(scope.fleet.id).await?;
    let mut views = Vec::with_capacity(members.len());
    for membership in members {
        let member = services.store.user_by_id(membership.user_id).await?;
        views.push(FleetUserView {
            name: member.as_ref().and_then(|u| u.name.clone()),
            email: member.and_then(|u| u.email),
            membership,
        });
    }
    ok(views)
}

pub async fn assign_vehicles(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<AssignVehiclesInput>,
) -> RpcResponse<FleetMembership> {
    let scope = FleetScope::load(&services, &user, input.fleet_id).await?;
    allow(&user, scope.is_owner(&user), "Only the fleet owner can assign vehicles")?;

    let membership = services
        .store
        .assign_vehicles(input.fleet_id, input.user_id, input.vehicle_ids)
        .await?;
    tracing::info!(fleet_id = %membership.fleet_id, driver = %membership.user_id, count = membership.assigned_vehicles.len(), "vehicles assigned");
    ok(membership)
}

/// Moves money between the fleet balance and a vehicle; a negative amount
/// pulls it back.
pub async fn allocate_balance(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<AllocateInput>,
) -> RpcResponse<VehicleAllocation> {
    let vehicle = services.vehicle(input.vehicle_id).await?;
    let scope = FleetScope::load(&services, &user, vehicle.fleet_id).await?;
    allow(&user, scope.can_manage_finances(&user), "You cannot manage this fleet's finances")?;

    let allocation = services
        .store
        .allocate_to_vehicle(input.vehicle_id, input.amount, services.now())
        .await?;
    tracing::info!(vehicle_id = %input.vehicle_id, amount = %input.amount, by = %user.id, "balance allocated to vehicle");
    ok(VehicleAllocation {
        vehicle_id: input.vehicle_id,
        amount: input.amount,
        profile_balance: allocation.profile_balance,
        vehicle_balance: allocation.target_balance,
    })
}

pub async fn get_vehicle_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<VehicleIdInput>,
) -> RpcResponse<Vec<FuelTransaction>> {
    let (vehicle, _) = visible_vehicle(&services, &user, input.vehicle_id).await?;
    ok(services
        .store
        .transactions_for_holder(QrHolder::Vehicle(vehicle.id))
        .await?)
}
