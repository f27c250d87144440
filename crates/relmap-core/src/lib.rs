//! relmap core - schema model, criteria compiler, and the graph-aware
//! load/store/delete engines.
//!
//! This crate holds everything except the criteria/value vocabulary, which
//! lives in `relmap-proto`.

pub mod dialect;
pub mod error;
pub mod executor;
pub mod graph;
pub mod query;
pub mod schema;

mod delete;
mod engine;
mod store;

pub use dialect::{Dialect, KeyReadback};
pub use engine::Engine;
pub use error::{DriverError, Error};
pub use executor::{row_value, QueryExecutor, Row};
pub use graph::{node_id, AccessMode, Accessor, Node, NodeRef, RelationSlot};
pub use query::{CompileOptions, Compiler, SelectPlan};
pub use schema::{ColumnMapping, JunctionDef, RelationDef, RelationKind, Schema, TableDef};

/// Re-export protocol types.
pub use relmap_proto as proto;
