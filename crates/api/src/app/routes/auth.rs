use std::sync::Arc;

use axum::{
    extract::Extension,
    http::header::SET_COOKIE,
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use iapos_auth::{
    clear_session_cookie, require_admin, session_cookie, AccountType, Role, User, UserStatus,
    UserUpsert,
};
use iapos_core::UserId;
use iapos_profiles::Profile;

use crate::app::errors::{RpcError, RpcResult};
use crate::app::rpc::{ok, Rpc, RpcInput, RpcResponse};
use crate::app::services::AppServices;
use crate::context::{CurrentUser, RequestContext};

pub fn router() -> Router {
    Router::new()
        .route("/auth.me", get(me))
        .route("/auth.getMyProfiles", get(get_my_profiles))
        .route("/auth.logout", post(logout))
        .route("/auth.signIn", post(sign_in))
        .route("/auth.getUserById", get(get_user_by_id))
        .route("/auth.listUsers", get(list_users))
        .route("/auth.suspendUser", post(suspend_user))
        .route("/auth.activateUser", post(activate_user))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdInput {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInInput {
    pub open_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub account_type: Option<AccountType>,
    pub role: Option<Role>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersInput {
    pub account_type: Option<AccountType>,
}

pub async fn me(ctx: RequestContext) -> RpcResponse<Option<User>> {
    ok(ctx.user().cloned())
}

pub async fn get_my_profiles(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
) -> RpcResponse<Vec<Profile>> {
    ok(services.store.profiles_by_user(user.id).await?)
}

pub async fn logout(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let cookie = clear_session_cookie(services.config.cookie_secure);
    (AppendHeaders([(SET_COOKIE, cookie)]), Rpc(json!({ "success": true }))).into_response()
}

/// Development sign-in: upserts the user and issues a session cookie.
pub async fn sign_in(
    Extension(services): Extension<Arc<AppServices>>,
    RpcInput(input): RpcInput<SignInInput>,
) -> RpcResult<Response> {
    if !services.config.dev_sign_in {
        return Err(RpcError::forbidden("Sign-in is disabled on this server"));
    }
    if input.account_type == Some(AccountType::Admin) || input.role == Some(Role::Admin) {
        return Err(RpcError::forbidden("Admin access cannot be self-assigned"));
    }

    let now = services.now();
    let user = services
        .store
        .upsert_user(
            UserUpsert {
                open_id: input.open_id,
                email: input.email,
                name: input.name,
                phone_number: input.phone_number,
                account_type: input.account_type,
                role: input.role,
            },
            now,
        )
        .await?;
    let token = services.sessions.issue(&user, now)?;
    let cookie = session_cookie(&token, services.sessions.ttl(), services.config.cookie_secure);

    tracing::info!(user_id = %user.id, account_type = %user.account_type, role = %user.role, "user signed in");
    Ok((AppendHeaders([(SET_COOKIE, cookie)]), Rpc(user)).into_response())
}

pub async fn get_user_by_id(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(caller): CurrentUser,
    RpcInput(input): RpcInput<UserIdInput>,
) -> RpcResponse<User> {
    require_admin(&caller)?;
    ok(services.user(input.user_id).await?)
}

pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(caller): CurrentUser,
    RpcInput(input): RpcInput<ListUsersInput>,
) -> RpcResponse<Vec<User>> {
    require_admin(&caller)?;
    ok(services.store.list_users(input.account_type).await?)
}

pub async fn suspend_user(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(caller): CurrentUser,
    RpcInput(input): RpcInput<UserIdInput>,
) -> RpcResponse<User> {
    require_admin(&caller)?;
    if input.user_id == caller.id {
        return Err(RpcError::bad_request("You cannot suspend your own account"));
    }
    let user = services
        .store
        .set_user_status(input.user_id, UserStatus::Suspended, services.now())
        .await?;
    tracing::info!(user_id = %user.id, by = %caller.id, "user suspended");
    ok(user)
}

pub async fn activate_user(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(caller): CurrentUser,
    RpcInput(input): RpcInput<UserIdInput>,
) -> RpcResponse<User> {
    require_admin(&caller)?;
    let user = services
        .store
        .set_user_status(input.user_id, UserStatus::Active, services.now())
        .await?;
    tracing::info!(user_id = %user.id, by = %caller.id, "user activated");
    ok(user)
}
