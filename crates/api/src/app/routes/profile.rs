use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use iapos_auth::{AccountType, AuthzError, User};
use iapos_core::{Money, ProfileId};
use iapos_profiles::{NewProfile, Profile, ProfileChanges, ProfileType};

use crate::app::errors::RpcResult;
use crate::app::rpc::{ok, RpcInput, RpcResponse};
use crate::app::services::AppServices;
use crate::authz::allow;
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/profile.getProfile", get(get_profile))
        .route("/profile.getMyProfiles", get(get_my_profiles))
        .route("/profile.createProfile", post(create_profile))
        .route("/profile.updateProfile", post(update_profile))
        .route("/profile.getBalance", get(get_balance))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileIdInput {
    pub profile_id: ProfileId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileInput {
    pub profile_type: ProfileType,
    pub name: String,
    pub cnpj_cpf: String,
    pub legal_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub tax_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileInput {
    pub profile_id: ProfileId,
    #[serde(flatten)]
    pub changes: ProfileChanges,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub profile_id: ProfileId,
    pub balance: Money,
    pub currency: &'static str,
}

/// Owner of the profile, or an admin.
async fn owned_profile(services: &AppServices, user: &User, id: ProfileId) -> RpcResult<Profile> {
    let profile = services.profile(id).await?;
    allow(user, profile.is_owned_by(user.id), "You do not have access to this profile")?;
    Ok(profile)
}

pub async fn get_profile(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<ProfileIdInput>,
) -> RpcResponse<Profile> {
    ok(owned_profile(&services, &user, input.profile_id).await?)
}

pub async fn get_my_profiles(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
) -> RpcResponse<Vec<Profile>> {
    ok(services.store.profiles_by_user(user.id).await?)
}

/// The profile type must match the caller's account type, and only the
/// account's head role (owner / responsible) may open one.
pub async fn create_profile(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<CreateProfileInput>,
) -> RpcResponse<Profile> {
    let required = AccountType::for_profile_type(input.profile_type);
    if user.account_type != required || user.role != required.head_role() {
        return Err(AuthzError::forbidden(format!(
            "Only {} accounts with the {} role can create {} profiles",
            required,
            required.head_role(),
            input.profile_type
        ))
        .into());
    }

    let profile = services
        .store
        .create_profile(
            NewProfile {
                user_id: user.id,
                profile_type: input.profile_type,
                name: input.name,
                cnpj_cpf: input.cnpj_cpf,
                legal_name: input.legal_name,
                contact_email: input.contact_email,
                contact_phone: input.contact_phone,
                address: input.address,
                city: input.city,
                state: input.state,
                zip_code: input.zip_code,
                country: input.country,
                tax_id: input.tax_id,
            },
            services.now(),
        )
        .await?;
    tracing::info!(profile_id = %profile.id, user_id = %user.id, profile_type = %profile.profile_type, "profile created");
    ok(profile)
}

pub async fn update_profile(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<UpdateProfileInput>,
) -> RpcResponse<Profile> {
    owned_profile(&services, &user, input.profile_id).await?;
    let profile = services
        .store
        .update_profile(input.profile_id, input.changes, services.now())
        .await?;
    tracing::info!(profile_id = %profile.id, by = %user.id, "profile updated");
    ok(profile)
}

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<ProfileIdInput>,
) -> RpcResponse<BalanceView> {
    let profile = owned_profile(&services, &user, input.profile_id).await?;
    ok(BalanceView {
        profile_id: profile.id,
        balance: profile.balance,
        currency: Money::CURRENCY,
    })
}
