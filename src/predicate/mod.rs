//! Predicate module
//!
//! Column comparison operators lowered into evaluable predicates.

pub mod pattern;
pub mod predicate;

pub use pattern::like_match;
pub use predicate::{CompareOp, Condition, Operator, Predicate};
