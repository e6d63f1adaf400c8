//! HTTP API: RPC routing, sessions and authorization.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
