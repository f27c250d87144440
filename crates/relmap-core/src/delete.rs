//! Row deletion with a pre-delete snapshot.

use relmap_proto::{Change, ChangeSet, Value};

use crate::engine::Engine;
use crate::error::Error;
use crate::graph::{AccessMode, Accessor, NodeRef};

impl<'a> Engine<'a> {
    /// Delete the row backing `node`.
    ///
    /// The node must carry its primary key. The row is read back first so
    /// the recorded change holds the full last-known state, not just the
    /// fields the caller happened to set; if the row is already gone the
    /// node's own values stand in. Related rows are never touched.
    pub async fn delete(
        &self,
        node: &NodeRef,
        table: &str,
        mode: AccessMode,
    ) -> Result<ChangeSet, Error> {
        let tdef = self.schema.get_table(table)?;
        let accessor = Accessor::new(tdef, mode);
        let key = accessor
            .primary_key(&node.lock())
            .ok_or_else(|| Error::Invariant("missing primary key".to_string()))?;

        let select_list = tdef
            .columns()
            .map(|m| m.column.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {select_list} FROM {table} WHERE {} = ?",
            tdef.primary_key
        );
        let rows = self
            .run(table, "select", &sql, std::slice::from_ref(&key))
            .await?;
        let snapshot: Vec<(String, Value)> = match rows.first() {
            Some(row) => row
                .iter()
                .filter_map(|(column, value)| {
                    accessor
                        .key_for_column(column)
                        .map(|k| (k.to_string(), value.clone()))
                })
                .collect(),
            None => accessor
                .supplied_columns(&node.lock())
                .into_iter()
                .filter_map(|(column, value)| {
                    accessor
                        .key_for_column(&column)
                        .map(|k| (k.to_string(), value))
                })
                .collect(),
        };

        let sql = format!("DELETE FROM {table} WHERE {} = ?", tdef.primary_key);
        self.run(table, "delete", &sql, std::slice::from_ref(&key))
            .await?;

        let mut changes = ChangeSet::new();
        changes.push(Change::delete(table, snapshot));
        Ok(changes)
    }
}
