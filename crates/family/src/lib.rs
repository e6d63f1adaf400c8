//! Family domain module: dependents funded by a responsible adult.

pub mod dependent;

pub use dependent::{Dependent, DependentChanges, NewDependent, Relationship};
