use axum::{http::StatusCode, routing::get, Router};
use serde_json::{json, Value};

use iapos_auth::{permission_matrix, require_admin, MatrixRow};

use crate::app::rpc::{ok, RpcResponse};
use crate::context::CurrentUser;

pub fn router() -> Router {
    Router::new()
        .route("/system.health", get(rpc_health))
        .route("/system.permissionMatrix", get(matrix))
}

/// Plain liveness probe outside the RPC prefix.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn rpc_health() -> RpcResponse<Value> {
    ok(json!({ "ok": true }))
}

pub async fn matrix(CurrentUser(user): CurrentUser) -> RpcResponse<Vec<MatrixRow>> {
    require_admin(&user)?;
    ok(permission_matrix())
}
