//! Wallet domain module.
//!
//! Money enters a fleet or family profile through recharges, is allocated to
//! vehicles and dependents, and leaves at the pump when a station scans the
//! holder's QR code. The network that sold the fuel is credited with the same
//! amount.

pub mod allocation;
pub mod purchase;
pub mod qr;
pub mod recharge;

pub use allocation::{Allocation, allocate, falls_below};
pub use purchase::{FuelPurchase, FuelTransaction, NewFuelTransaction, TransactionStatus};
pub use qr::{generate_code, parse_code, NewQrCode, QrCode, QrEntityType, QrHolder, QrStatus};
pub use recharge::{generate_reference_code, BalanceRecharge, NewRecharge, PaymentMethod, PaymentStatus};
