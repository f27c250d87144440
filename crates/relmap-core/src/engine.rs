//! The persistence engine facade.
//!
//! [`Engine`] ties a schema, a dialect, and an external executor together
//! and exposes the three graph operations: load, store, delete. It owns no
//! connections and keeps no state between calls.

use relmap_proto::Value;
use tracing::debug;

use crate::dialect::Dialect;
use crate::error::Error;
use crate::executor::{QueryExecutor, Row};
use crate::query::{CompileOptions, Compiler};
use crate::schema::Schema;

/// Graph persistence over an external executor.
pub struct Engine<'a> {
    pub(crate) schema: &'a Schema,
    pub(crate) dialect: Dialect,
    pub(crate) executor: &'a dyn QueryExecutor,
    pub(crate) options: CompileOptions,
}

impl<'a> Engine<'a> {
    /// Create an engine with strict criteria validation.
    pub fn new(schema: &'a Schema, dialect: Dialect, executor: &'a dyn QueryExecutor) -> Self {
        Self {
            schema,
            dialect,
            executor,
            options: CompileOptions::default(),
        }
    }

    /// Skip unknown criteria names instead of failing.
    pub fn with_lenient_criteria(mut self) -> Self {
        self.options.strict = false;
        self
    }

    pub(crate) fn compiler(&self) -> Compiler<'a> {
        Compiler::with_options(self.schema, self.dialect, self.options)
    }

    /// Finalize and run one statement, wrapping driver failures with
    /// table/operation context.
    pub(crate) async fn run(
        &self,
        table: &str,
        operation: &'static str,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, Error> {
        let sql = self.dialect.finalize_sql(sql);
        debug!(table, operation, %sql, params = params.len(), "executing statement");
        self.executor
            .execute(&sql, params)
            .await
            .map_err(|source| Error::Driver {
                table: table.to_string(),
                operation,
                source,
            })
    }
}
