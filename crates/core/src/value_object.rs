//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values
/// (`Money`, `Liters`, a normalised licence plate). Two instances with the same
/// values are interchangeable; rows with an id implement [`crate::Entity`]
/// instead.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
