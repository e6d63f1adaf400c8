//! `iapos-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod document;
pub mod entity;
pub mod error;
pub mod fuel;
pub mod id;
pub mod money;
pub mod text;
pub mod value_object;

pub use document::{normalize_cnpj, normalize_cpf, normalize_document, normalize_state, DocumentKind};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use fuel::{FuelType, RecordStatus};
pub use id::{
    DependentId, GasStationId, InvitationId, MembershipId, NotificationId, ProfileId, QrCodeId,
    RechargeId, TransactionId, UserId, VehicleId, WithdrawalId,
};
pub use money::{Liters, Money};
pub use value_object::ValueObject;
