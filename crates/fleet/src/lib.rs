//! Fleet domain module: vehicles and the users who run them.

pub mod membership;
pub mod vehicle;

pub use membership::{FleetMembership, FleetRole};
pub use vehicle::{normalize_plate, NewVehicle, Vehicle, VehicleChanges, VehicleStatus, VehicleType};
