//! RPC error envelope.
//!
//! Every failure leaves the API as
//! `{"error":{"code":"FORBIDDEN","httpStatus":403,"message":"…","path":"gasStation.getStation"}}`.
//! Handlers only know the code and message; [`attach_procedure_path`] fills in
//! `path` from the request URI.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use iapos_auth::{AuthzError, SessionError};
use iapos_core::DomainError;
use iapos_infra::StoreError;

use crate::app::rpc::RPC_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotSupported,
    Conflict,
    UnprocessableContent,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::UnprocessableContent => "UNPROCESSABLE_CONTENT",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::MethodNotSupported => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::UnprocessableContent => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {message}", .code.as_str())]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

pub type RpcResult<T> = Result<T, RpcError>;

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "Please login (10001)")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{what} not found"))
    }

    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalServerError, "Internal server error")
    }

    fn body(&self, path: Option<&str>) -> serde_json::Value {
        json!({
            "error": {
                "code": self.code.as_str(),
                "httpStatus": self.code.status().as_u16(),
                "message": self.message,
                "path": path,
            }
        })
    }
}

impl From<DomainError> for RpcError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => RpcError::bad_request(msg),
            DomainError::InvariantViolation(msg) => RpcError::new(ErrorCode::UnprocessableContent, msg),
            DomainError::NotFound(what) => RpcError::not_found(what),
            DomainError::Conflict(msg) => RpcError::new(ErrorCode::Conflict, msg),
            DomainError::Unauthorized => RpcError::unauthorized(),
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(e) => e.into(),
            StoreError::Backend(msg) => {
                tracing::error!(error = %msg, "store failure");
                RpcError::internal()
            }
        }
    }
}

impl From<AuthzError> for RpcError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Forbidden(msg) => {
                tracing::debug!(reason = %msg, "authorization denied");
                RpcError::forbidden(msg)
            }
        }
    }
}

impl From<SessionError> for RpcError {
    fn from(err: SessionError) -> Self {
        tracing::error!(error = %err, "session codec failure");
        RpcError::internal()
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let mut res = (self.code.status(), Json(self.body(None))).into_response();
        res.extensions_mut().insert(self);
        res
    }
}

/// `gasStation.getStation` for `/api/trpc/gasStation.getStation`, or for
/// `/gasStation.getStation` once the prefix was stripped by nesting.
pub fn procedure_name(uri_path: &str) -> &str {
    uri_path
        .strip_prefix(RPC_PREFIX)
        .unwrap_or(uri_path)
        .trim_start_matches('/')
}

/// Rewrites error bodies so they carry the procedure path.
///
/// The router's own 405 (a query sent as POST, a mutation as GET) has an empty
/// body and becomes a `METHOD_NOT_SUPPORTED` envelope here.
pub async fn attach_procedure_path(req: Request, next: Next) -> Response {
    let path = procedure_name(req.uri().path()).to_string();
    let method = req.method().clone();
    let res = next.run(req).await;
    let err = match res.extensions().get::<RpcError>().cloned() {
        Some(err) => err,
        None if res.status() == StatusCode::METHOD_NOT_ALLOWED => RpcError::new(
            ErrorCode::MethodNotSupported,
            format!("Unsupported {method} request to \"{path}\""),
        ),
        None => return res,
    };
    let mut rewritten = (err.code.status(), Json(err.body(Some(&path)))).into_response();
    rewritten.extensions_mut().insert(err);
    rewritten
}

/// Fallback for unknown procedures under the RPC prefix.
pub async fn unknown_procedure(req: Request) -> RpcError {
    RpcError::not_found(&format!("Procedure \"{}\"", procedure_name(req.uri().path())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_rpc_codes() {
        let cases = [
            (DomainError::validation("x"), ErrorCode::BadRequest),
            (DomainError::invariant("x"), ErrorCode::UnprocessableContent),
            (DomainError::not_found("Vehicle"), ErrorCode::NotFound),
            (DomainError::conflict("x"), ErrorCode::Conflict),
            (DomainError::Unauthorized, ErrorCode::Unauthorized),
        ];
        for (err, code) in cases {
            assert_eq!(RpcError::from(err).code, code);
        }
    }

    #[test]
    fn backend_failures_hide_details() {
        let err = RpcError::from(StoreError::backend("connection reset by peer"));
        assert_eq!(err.code, ErrorCode::InternalServerError);
        assert_eq!(err.message, "Internal server error");
    }

    #[test]
    fn not_found_message_names_the_entity() {
        let err = RpcError::from(StoreError::not_found("Gas station"));
        assert_eq!(err.message, "Gas station not found");
    }

    #[test]
    fn body_carries_code_status_and_path() {
        let body = RpcError::forbidden("nope").body(Some("gasStation.getStation"));
        assert_eq!(body["error"]["code"], "FORBIDDEN");
        assert_eq!(body["error"]["httpStatus"], 403);
        assert_eq!(body["error"]["path"], "gasStation.getStation");
    }

    #[test]
    fn method_not_supported_is_405() {
        assert_eq!(ErrorCode::MethodNotSupported.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ErrorCode::MethodNotSupported.as_str(), "METHOD_NOT_SUPPORTED");
    }

    #[test]
    fn procedure_name_strips_prefix() {
        assert_eq!(procedure_name("/api/trpc/fleet.getVehicle"), "fleet.getVehicle");
        assert_eq!(procedure_name("/fleet.getVehicle"), "fleet.getVehicle");
    }
}
