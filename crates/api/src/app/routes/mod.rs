use axum::Router;

pub mod admin;
pub mod auth;
pub mod family;
pub mod fleet;
pub mod gas_station;
pub mod invitations;
pub mod notifications;
pub mod profile;
pub mod system;
pub mod wallet;

/// Every procedure, keyed `/<router>.<procedure>` under the RPC prefix.
pub fn router() -> Router {
    Router::new()
        .merge(system::router())
        .merge(auth::router())
        .merge(profile::router())
        .merge(gas_station::router())
        .merge(fleet::router())
        .merge(family::router())
        .merge(wallet::router())
        .merge(admin::router())
        .merge(notifications::router())
        .merge(invitations::router())
}
