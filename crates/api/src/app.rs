//! HTTP application wiring.
//!
//! - `services.rs`: store, session codec, settings and the live notification channel
//! - `rpc.rs`: the `/api/trpc/<router>.<procedure>` envelope and input decoding
//! - `routes/`: one file per router
//! - `errors.rs`: error codes and the error envelope

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware::{session_middleware, SessionState};

pub mod errors;
pub mod routes;
pub mod rpc;
pub mod services;

use errors::{attach_procedure_path, unknown_procedure};
use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let session_state = SessionState {
        sessions: services.sessions.clone(),
        store: services.store.clone(),
    };

    let rpc = routes::router().fallback(unknown_procedure);

    // Session resolution runs for every API request; procedures decide
    // whether they need a caller.
    let api = Router::new()
        .nest(rpc::RPC_PREFIX, rpc)
        .route("/api/notifications/stream", get(routes::notifications::stream))
        .layer(axum::middleware::from_fn(attach_procedure_path))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(axum::middleware::from_fn_with_state(session_state, session_middleware)),
        );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(api)
}
