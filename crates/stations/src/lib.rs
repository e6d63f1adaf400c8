//! Gas-station domain module.
//!
//! Stations belong to a gas-station network profile. Staff are attached through
//! memberships (`gas_station_users`), and the network cashes out its balance
//! through withdrawals.

pub mod membership;
pub mod station;
pub mod withdrawal;

pub use membership::{StationMembership, StationRole};
pub use station::{GasStation, GasStationChanges, NewGasStation};
pub use withdrawal::{BankAccount, BankAccountType, NewWithdrawal, Withdrawal, WithdrawalStatus};
