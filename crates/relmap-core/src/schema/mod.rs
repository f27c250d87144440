//! Relationship-aware schema model.
//!
//! Tables map columns to logical properties and declare named
//! relationships; the [`Schema`] registry resolves them by name, with
//! relationship targets validated lazily so forward references work.

mod registry;
mod relation;
mod table;

pub use registry::Schema;
pub use relation::{JunctionDef, RelationDef, RelationKind};
pub use table::{ColumnMapping, TableDef};
