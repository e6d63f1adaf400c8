use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::COOKIE, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use iapos_auth::{read_cookie, SessionCodec, User, COOKIE_NAME};
use iapos_infra::Store;

use crate::context::RequestContext;

#[derive(Clone)]
pub struct SessionState {
    pub sessions: Arc<dyn SessionCodec>,
    pub store: Arc<dyn Store>,
}

/// Resolves the session cookie into a [`RequestContext`]. Never rejects:
/// procedures decide for themselves whether they need a caller.
pub async fn session_middleware(
    State(state): State<SessionState>,
    mut req: Request,
    next: Next,
) -> Response {
    let ctx = match resolve_user(&state, req.headers()).await {
        Some(user) => RequestContext::authenticated(user),
        None => RequestContext::anonymous(),
    };
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

async fn resolve_user(state: &SessionState, headers: &HeaderMap) -> Option<User> {
    let token = extract_session(headers)?;

    let claims = match state.sessions.verify(token, Utc::now()) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring invalid session cookie");
            return None;
        }
    };

    match state.store.user_by_id(claims.user_id).await {
        Ok(Some(user)) => Some(user),
        Ok(None) => {
            tracing::debug!(user_id = %claims.user_id, "session refers to an unknown user");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load session user");
            None
        }
    }
}

fn extract_session(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|header| read_cookie(header, COOKIE_NAME))
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn finds_session_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("lang=pt; app_session_id=abc.def.ghi"));
        assert_eq!(extract_session(&headers), Some("abc.def.ghi"));
    }

    #[test]
    fn empty_or_missing_session_is_ignored() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_session(&headers), None);
        headers.insert(COOKIE, HeaderValue::from_static("app_session_id="));
        assert_eq!(extract_session(&headers), None);
    }
}
