//! Relmap shared IR types.
//!
//! This crate defines the values, criteria, and change records exchanged
//! between callers and the relmap engines.
//!
//! # Modules
//!
//! - [`value`] - Runtime scalar values for constraints, parameters, and rows
//! - [`criteria`] - Parsed criteria IR and the JSON-shape parser
//! - [`change`] - Immutable change records for persisted mutations
//! - [`error`] - Criteria parse errors

pub mod change;
pub mod criteria;
pub mod error;
pub mod value;

pub use change::{Change, ChangeOp, ChangeSet};
pub use criteria::{
    Constraint, Criteria, CriteriaNode, GroupEntry, LogicOp, OrderDirection, OrderSpec,
};
pub use error::Error;
pub use value::Value;
