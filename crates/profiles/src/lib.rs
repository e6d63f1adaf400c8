//! Profiles domain module (gas-station networks, fleets and families).
//!
//! A profile is the tenant unit of IAPOS: stations, vehicles, dependents,
//! recharges and withdrawals all hang off exactly one profile. This crate holds
//! the row type and the validation rules for creating and editing profiles
//! (no IO, no HTTP, no storage).

pub mod profile;

pub use profile::{NewProfile, Profile, ProfileChanges, ProfileStatus, ProfileType};
