use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use iapos_auth::{require_active_status, User};

use crate::app::errors::RpcError;

/// Per-request caller context, resolved from the session cookie.
///
/// Present on every request under the RPC prefix. `user` is `None` for
/// anonymous callers and for any cookie that fails verification.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    user: Option<User>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn authenticated(user: User) -> Self {
        Self { user: Some(user) }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = RpcError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Authenticated, active caller. Rejects anonymous callers with
/// `UNAUTHORIZED` and inactive accounts with `FORBIDDEN`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = RpcError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = RequestContext::from_request_parts(parts, state).await?;
        let user = ctx.user.ok_or_else(RpcError::unauthorized)?;
        require_active_status(&user)?;
        Ok(CurrentUser(user))
    }
}
