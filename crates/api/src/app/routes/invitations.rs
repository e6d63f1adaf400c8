use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iapos_auth::{
    generate_token, is_admin, Invitation, InvitationStatus, InviteProfileType, NewInvitation, Role,
    User,
};
use iapos_core::{DependentId, GasStationId, InvitationId, ProfileId};
use iapos_notifications::{NewNotification, NotificationType};
use iapos_profiles::Profile;

use crate::app::errors::{ErrorCode, RpcError, RpcResult};
use crate::app::rpc::{ok, RpcInput, RpcResponse};
use crate::app::services::AppServices;
use crate::authz::{allow, is_profile_head};
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/invitations.create", post(create))
        .route("/invitations.listForProfile", get(list_for_profile))
        .route("/invitations.cancel", post(cancel))
        .route("/invitations.preview", get(preview))
        .route("/invitations.accept", post(accept))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInput {
    pub profile_id: ProfileId,
    pub invited_email: String,
    pub role: Role,
    pub gas_station_id: Option<GasStationId>,
    pub dependent_id: Option<DependentId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileIdInput {
    pub profile_id: ProfileId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationIdInput {
    pub invitation_id: InvitationId,
}

#[derive(Debug, Deserialize)]
pub struct TokenInput {
    pub token: String,
}

/// Public view of an invitation, shown before the invitee signs in.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationPreview {
    pub profile_name: String,
    pub profile_type: InviteProfileType,
    pub role: Role,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedInvitation {
    pub invitation: Invitation,
    pub user: User,
}

async fn headed_profile(services: &AppServices, user: &User, id: ProfileId) -> RpcResult<Profile> {
    let profile = services.profile(id).await?;
    allow(user, is_profile_head(user, &profile), "Only the profile owner can manage invitations")?;
    Ok(profile)
}

async fn invitation_by_token(services: &AppServices, token: &str) -> RpcResult<Invitation> {
    services
        .store
        .invitation_by_token(token)
        .await?
        .ok_or_else(|| RpcError::not_found("Invitation"))
}

/// The station or dependent named by an invitation must belong to the
/// inviting profile; a dependent must not already be linked to someone.
async fn check_target(services: &AppServices, profile: &Profile, input: &CreateInput) -> RpcResult<()> {
    if let Some(station_id) = input.gas_station_id {
        let station = services.station(station_id).await?;
        if station.network_id != profile.id {
            return Err(RpcError::bad_request("Gas station does not belong to this network"));
        }
    }
    if let Some(dependent_id) = input.dependent_id {
        let dependent = services.dependent(dependent_id).await?;
        if dependent.family_id != profile.id {
            return Err(RpcError::bad_request("Dependent does not belong to this family"));
        }
        if dependent.user_id.is_some() {
            return Err(RpcError::new(
                ErrorCode::Conflict,
                "Dependent is already linked to a user",
            ));
        }
    }
    Ok(())
}

pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<CreateInput>,
) -> RpcResponse<Invitation> {
    let profile = headed_profile(&services, &user, input.profile_id).await?;
    check_target(&services, &profile, &input).await?;

    let invitation = services
        .store
        .create_invitation(
            NewInvitation {
                invited_by_user_id: user.id,
                invited_email: input.invited_email,
                profile_id: profile.id,
                profile_type: InviteProfileType::from_profile_type(profile.profile_type),
                role: input.role,
                gas_station_id: input.gas_station_id,
                dependent_id: input.dependent_id,
            },
            generate_token(),
            services.config.invitation_ttl,
            services.now(),
        )
        .await?;
    tracing::info!(invitation_id = %invitation.id, profile_id = %invitation.profile_id, role = %invitation.role, "invitation created");

    if let Some(invitee) = services.store.user_by_email(&invitation.invited_email).await? {
        let (id, role, name) = (invitation.id, invitation.role, profile.name.clone());
        services
            .notify(
                NewNotification::new(
                    invitee.id,
                    NotificationType::UserInvitation,
                    "New invitation",
                    format!("You were invited to join {name} as {role}"),
                )
                .related("invitation", id.get()),
            )
            .await;
    }
    ok(invitation)
}

pub async fn list_for_profile(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<ProfileIdInput>,
) -> RpcResponse<Vec<Invitation>> {
    let profile = headed_profile(&services, &user, input.profile_id).await?;
    ok(services.store.invitations_by_profile(profile.id).await?)
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<InvitationIdInput>,
) -> RpcResponse<Invitation> {
    let invitation = services
        .store
        .invitation_by_id(input.invitation_id)
        .await?
        .ok_or_else(|| RpcError::not_found("Invitation"))?;
    headed_profile(&services, &user, invitation.profile_id).await?;

    let cancelled = services.store.cancel_invitation(invitation.id, services.now()).await?;
    tracing::info!(invitation_id = %cancelled.id, by = %user.id, "invitation cancelled");
    ok(cancelled)
}

/// Public: anyone holding the token may see what it is for.
pub async fn preview(
    Extension(services): Extension<Arc<AppServices>>,
    RpcInput(input): RpcInput<TokenInput>,
) -> RpcResponse<InvitationPreview> {
    let invitation = invitation_by_token(&services, &input.token).await?;
    let profile = services.profile(invitation.profile_id).await?;

    let status = if invitation.status == InvitationStatus::Pending && invitation.is_expired(services.now()) {
        InvitationStatus::Expired
    } else {
        invitation.status
    };
    ok(InvitationPreview {
        profile_name: profile.name,
        profile_type: invitation.profile_type,
        role: invitation.role,
        status,
        expires_at: invitation.expires_at,
    })
}

pub async fn accept(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<TokenInput>,
) -> RpcResponse<AcceptedInvitation> {
    let invitation = invitation_by_token(&services, &input.token).await?;

    let matches = user.email.as_deref().is_some_and(|email| invitation.is_for_email(email));
    if !matches {
        return Err(RpcError::forbidden("This invitation was sent to a different e-mail address"));
    }
    if is_admin(&user) {
        return Err(RpcError::bad_request("Administrators cannot accept invitations"));
    }
    if !services.store.profiles_by_user(user.id).await?.is_empty() {
        return Err(RpcError::bad_request("Profile owners cannot join another profile"));
    }

    let acceptance = services
        .store
        .accept_invitation(&invitation.token, user.id, services.now())
        .await?;
    tracing::info!(
        invitation_id = %acceptance.invitation.id,
        user_id = %acceptance.user.id,
        account_type = %acceptance.user.account_type,
        role = %acceptance.user.role,
        "invitation accepted"
    );
    ok(AcceptedInvitation {
        invitation: acceptance.invitation,
        user: acceptance.user,
    })
}
