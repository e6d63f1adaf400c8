use std::sync::Arc;

use axum::{
    extract::Extension,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use iapos_core::NotificationId;
use iapos_notifications::Notification;

use crate::app::rpc::{ok, RpcInput, RpcResponse};
use crate::app::services::{notification_sse_stream, AppServices};
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/notifications.list", get(list))
        .route("/notifications.markRead", post(mark_read))
        .route("/notifications.markAllRead", post(mark_all_read))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInput {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadInput {
    pub notification_id: NotificationId,
}

#[derive(Debug, Serialize)]
pub struct MarkedCount {
    pub count: u64,
}

pub async fn list(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<ListInput>,
) -> RpcResponse<Vec<Notification>> {
    ok(services.store.notifications_for(user.id, input.unread_only).await?)
}

pub async fn mark_read(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
    RpcInput(input): RpcInput<MarkReadInput>,
) -> RpcResponse<Notification> {
    ok(services
        .store
        .mark_notification_read(user.id, input.notification_id)
        .await?)
}

pub async fn mark_all_read(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
) -> RpcResponse<MarkedCount> {
    let count = services.store.mark_all_read(user.id).await?;
    tracing::debug!(user_id = %user.id, count, "notifications marked read");
    ok(MarkedCount { count })
}

/// `GET /api/notifications/stream`: live feed of the caller's notifications.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    CurrentUser(user): CurrentUser,
) -> impl IntoResponse {
    tracing::debug!(user_id = %user.id, "notification stream opened");
    notification_sse_stream(services, user.id)
}
