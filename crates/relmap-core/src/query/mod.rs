//! Criteria compilation and graph-aware loading.

mod compile;
mod load;
mod plan;

pub use compile::{CompileOptions, Compiler};
pub use plan::{Attachment, SelectItem, SelectPlan, SeparateLoad};
