//! The external query executor contract.
//!
//! The engine never manages connections; it hands finalized SQL and an
//! ordered parameter list to a caller-supplied executor and consumes the
//! rows it returns. The executor may be backed by anything that speaks the
//! selected dialect: a single connection, a pool, or a test double.

use futures::future::BoxFuture;

use relmap_proto::Value;

use crate::error::DriverError;

/// One result row: raw column name to value, in select order.
pub type Row = Vec<(String, Value)>;

/// Look up a column in a row.
pub fn row_value<'a>(row: &'a Row, column: &str) -> Option<&'a Value> {
    row.iter().find(|(n, _)| n == column).map(|(_, v)| v)
}

/// Abstract query execution capability.
///
/// `execute` runs one statement and resolves with its rows (empty for
/// statements that return none). Errors propagate opaquely; the engine
/// wraps them with context but never interprets or retries them.
pub trait QueryExecutor: Send + Sync {
    /// Execute a statement with ordered parameters.
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxFuture<'a, Result<Vec<Row>, DriverError>>;
}
