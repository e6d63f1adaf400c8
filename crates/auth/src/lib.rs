//! `iapos-auth` — identity, sessions and authorization policy.
//!
//! This crate is decoupled from HTTP and storage: callers hand in rows they
//! already fetched and get yes/no answers (or guard errors) back.

pub mod account;
pub mod authorize;
pub mod claims;
pub mod invitation;
pub mod matrix;
pub mod session;

pub use account::{account_roles, AccountType, Role, User, UserStatus, UserUpsert};
pub use authorize::{
    can_access_dependent, can_access_family_data, can_access_fleet_data, can_access_vehicle,
    can_manage_fleet_finances, can_manage_gas_station, can_operate_gas_station, is_admin,
    is_attendant, is_dependent, is_driver, is_family_responsible, is_fleet_owner,
    is_gas_station_network_owner, is_gas_station_network_supervisor, require_account_type,
    require_active_status, require_admin, require_role, AuthzError,
};
pub use claims::{validate_claims, SessionClaims, SessionError};
pub use invitation::{
    generate_token, Invitation, InvitationStatus, InviteProfileType, NewInvitation,
    DEFAULT_INVITATION_TTL_DAYS,
};
pub use matrix::{grant, permission_matrix, Action, Grant, MatrixCell, MatrixRow};
pub use session::{
    clear_session_cookie, read_cookie, session_cookie, Hs256SessionCodec, SessionCodec,
    COOKIE_NAME, DEFAULT_SESSION_TTL_DAYS,
};
