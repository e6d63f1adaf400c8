use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use iapos_auth::{is_admin, User};
use iapos_core::{DependentId, Money, ProfileId};
use iapos_family::{Dependent, DependentChanges, NewDependent, Relationship};
use iapos_profiles::ProfileType;
use iapos_wallet::{FuelTransaction, QrHolder};

use crate::app::errors::RpcResult;
use crate::app::rpc::{ok, RpcInput, RpcResponse};
use crate::app::services::AppServices;
use crate::authz::{allow, require_profile_type, FamilyScope};
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/family.getFamilyDependents", get(get_family_dependents))
        .route("/family.createDependent", post(create_dependent))
        .route("/family.updateDependent", post(update_dependent))
        .route("/family.getDependentBalance", get(get_dependent_balance))
        .route("/family.allocateBalance", post(allocate_balance))
        .route("/family.getDependentTransactions", get(get_dependent_transactions))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyIdInput {
    pub family_id: ProfileId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentIdInput {
    pub dependent_id: DependentId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDependentInput {
    pub family_id: ProfileId,
    pub name: String,
    pub cpf: Option<String>,
    pub relationship: Relationship,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDependentInput {
    pub dependent_id: DependentId,
    #[serde(flatten)]
    pub changes: DependentChanges,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateInput {
    pub dependent_id: DependentId,
    pub amount: Money,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentBalance {
    pub dependent_id: DependentId,
    pub name: String,
    pub balance: Money,
    pub currency: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependentAllocation {
    pub dependent_id: DependentId,
    pub amount: Money,
    pub profile_balance: Money,
    pub dependent_balance: Money,
}

async fn visible_dependent(services: &AppServices, user: &User, id: DependentId) -> RpcResult<Dependent> {
    let dependent = services.dependent(id).await?;
    let scope = FamilyScope::load(services, user, dependent.family_id).await?;
    allow(user, scope.can_access_dependent(user, &dependent), "You do not have access to this dependent")?;
    Ok(dependent)
}

async fn responsible_for(services: &AppServices, user: &User, id: DependentId) -> RpcResult<Dependent> {
    let dependent = services.dependent(id).await?;
    let scope = FamilyScope::load(services, user, dependent.family_id).await?;
    allow(user, scope.is_responsible(user), "Only the family responsible can manage dependents")?;
    Ok(dependent)
}

pub async fn get_family_dependents(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<FamilyIdInput>,
) -> RpcResponse<Vec<Dependent>> {
    let scope = FamilyScope::load(&services, &user, input.family_id).await?;
    allow(&user, scope.can_access(&user), "You do not have access to this family")?;

    let dependents = services.store.dependents_by_family(scope.family.id).await?;
    ok(dependents
        .into_iter()
        .filter(|d| scope.can_access_dependent(&user, d) || is_admin(&user))
        .collect())
}

pub async fn create_dependent(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<CreateDependentInput>,
) -> RpcResponse<Dependent> {
    let scope = FamilyScope::load(&services, &user, input.family_id).await?;
    require_profile_type(&scope.family, ProfileType::Family)?;
    allow(&user, scope.is_responsible(&user), "Only the family responsible can add dependents")?;

    let dependent = services
        .store
        .create_dependent(
            NewDependent {
                family_id: input.family_id,
                name: input.name,
                cpf: input.cpf,
                relationship: input.relationship,
            },
            services.now(),
        )
        .await?;
    tracing::info!(dependent_id = %dependent.id, family_id = %dependent.family_id, "dependent created");
    ok(dependent)
}

pub async fn update_dependent(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<UpdateDependentInput>,
) -> RpcResponse<Dependent> {
    responsible_for(&services, &user, input.dependent_id).await?;
    ok(services
        .store
        .update_dependent(input.dependent_id, input.changes, services.now())
        .await?)
}

pub async fn get_dependent_balance(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<DependentIdInput>,
) -> RpcResponse<DependentBalance> {
    let dependent = visible_dependent(&services, &user, input.dependent_id).await?;
    ok(DependentBalance {
        dependent_id: dependent.id,
        name: dependent.name,
        balance: dependent.balance,
        currency: Money::CURRENCY,
    })
}

pub async fn allocate_balance(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<AllocateInput>,
) -> RpcResponse<DependentAllocation> {
    responsible_for(&services, &user, input.dependent_id).await?;
    let allocation = services
        .store
        .allocate_to_dependent(input.dependent_id, input.amount, services.now())
        .await?;
    tracing::info!(dependent_id = %input.dependent_id, amount = %input.amount, by = %user.id, "balance allocated to dependent");
    ok(DependentAllocation {
        dependent_id: input.dependent_id,
        amount: input.amount,
        profile_balance: allocation.profile_balance,
        dependent_balance: allocation.target_balance,
    })
}

pub async fn get_dependent_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<DependentIdInput>,
) -> RpcResponse<Vec<FuelTransaction>> {
    let dependent = visible_dependent(&services, &user, input.dependent_id).await?;
    ok(services
        .store
        .transactions_for_holder(QrHolder::Dependent(dependent.id))
        .await?)
}
