//! Errors raised by IAPOS domain rules.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failure of a business rule, independent of transport and storage.
///
/// The API maps each variant onto one RPC error code, so pick the variant by
/// how the caller should react: fix the input (`Validation`, `InvalidId`), the
/// state does not allow it (`InvariantViolation`), or it clashes with an
/// existing row (`Conflict`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or out-of-range input: a bad CNPJ, a negative amount.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The request is well formed but the current state forbids it, e.g. a
    /// purchase larger than the holder's balance.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Holds the human-facing entity name, e.g. `"Gas station"`.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Duplicate CNPJ/CPF, plate, QR code, reference or token.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: &'static str) -> Self {
        Self::NotFound(what)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_entity() {
        assert_eq!(DomainError::not_found("Vehicle").to_string(), "Vehicle not found");
    }

    #[test]
    fn messages_carry_the_detail() {
        let err = DomainError::invariant("insufficient balance");
        assert_eq!(err.to_string(), "invariant violated: insufficient balance");
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
