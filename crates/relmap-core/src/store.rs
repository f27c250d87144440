//! Graph-aware storing.
//!
//! `store` walks a node graph in dependency order: to-one targets first so
//! their keys exist when the referencing row is written, then the row
//! itself, then dependent to-many children. Nodes already being visited
//! mark a cycle; their links are deferred as pending foreign-key patches or
//! junction inserts and flushed once every row exists. Visited nodes are
//! tracked by identity, so shared and cyclic graphs are written exactly
//! once per node.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use relmap_proto::{Change, ChangeSet, Value};

use crate::dialect::KeyReadback;
use crate::engine::Engine;
use crate::error::Error;
use crate::graph::{node_id, AccessMode, Accessor, NodeRef, RelationSlot};
use crate::schema::RelationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeStatus {
    InProgress,
    Done,
}

/// A foreign key that could not be written when its row was inserted.
struct PendingPatch {
    table: String,
    node: NodeRef,
    fk_column: String,
    target: NodeRef,
    target_table: String,
    target_column: String,
}

/// A junction row waiting for the child's key.
struct PendingJunction {
    table: String,
    this_column: String,
    other_column: String,
    this_value: Value,
    child: NodeRef,
    child_table: String,
    child_key_column: String,
}

#[derive(Default)]
struct StoreState {
    status: HashMap<usize, NodeStatus>,
    patches: Vec<PendingPatch>,
    junctions: Vec<PendingJunction>,
    changes: ChangeSet,
}

impl<'a> Engine<'a> {
    /// Persist a node graph rooted at `node` into `table`.
    ///
    /// Returns the ordered change set: one entry per written statement,
    /// keyed the same way the nodes are (`mode`).
    pub async fn store(
        &self,
        node: &NodeRef,
        table: &str,
        mode: AccessMode,
    ) -> Result<ChangeSet, Error> {
        let mut state = StoreState::default();
        self.persist_node(&mut state, Arc::clone(node), table.to_string(), mode)
            .await?;
        self.flush_junctions(&mut state, mode).await?;
        self.flush_patches(&mut state, mode).await?;
        Ok(state.changes)
    }

    /// Write one node and its reachable graph. Boxed for recursion.
    fn persist_node<'s>(
        &'s self,
        state: &'s mut StoreState,
        node: NodeRef,
        table: String,
        mode: AccessMode,
    ) -> BoxFuture<'s, Result<(), Error>> {
        Box::pin(async move {
            let id = node_id(&node);
            if state.status.contains_key(&id) {
                return Ok(());
            }
            state.status.insert(id, NodeStatus::InProgress);

            let tdef = self.schema.get_table(&table)?;
            let accessor = Accessor::new(tdef, mode);

            // Dependencies first: rows this one holds foreign keys to.
            let to_one: Vec<_> = {
                let guard = node.lock();
                tdef.relationships()
                    .filter(|(_, r)| r.fk_on_this_side())
                    .filter_map(|(name, r)| match guard.relation(name) {
                        Some(RelationSlot::One(child)) => Some((r.clone(), child.clone())),
                        _ => None,
                    })
                    .collect()
            };
            let mut fk_values: Vec<(String, Value)> = Vec::new();
            for (relation, child) in to_one {
                let Some(child) = child else {
                    // Explicitly detached.
                    fk_values.push((relation.this_column.clone(), Value::Null));
                    continue;
                };
                let child_id = node_id(&child);
                if child_id == id || state.status.get(&child_id) == Some(&NodeStatus::InProgress)
                {
                    // Cycle: insert without the FK and patch it afterwards.
                    state.patches.push(PendingPatch {
                        table: table.clone(),
                        node: Arc::clone(&node),
                        fk_column: relation.this_column.clone(),
                        target: Arc::clone(&child),
                        target_table: relation.other_table.clone(),
                        target_column: relation.other_column.clone(),
                    });
                    continue;
                }
                if state.status.get(&child_id) != Some(&NodeStatus::Done) {
                    self.persist_node(
                        &mut *state,
                        Arc::clone(&child),
                        relation.other_table.clone(),
                        mode,
                    )
                    .await?;
                }
                let other = self.schema.resolve_relation(&relation)?;
                let child_access = Accessor::new(other, mode);
                let value = child_access
                    .get(&child.lock(), &relation.other_column)
                    .ok_or_else(|| {
                        Error::Invariant(format!(
                            "stored {} row has no {} value",
                            relation.other_table, relation.other_column
                        ))
                    })?;
                fk_values.push((relation.this_column.clone(), value));
            }

            // The row itself.
            self.write_row(state, &node, &table, mode, fk_values).await?;

            // Dependents: rows holding foreign keys to this one.
            let dependents: Vec<_> = {
                let guard = node.lock();
                tdef.relationships()
                    .filter(|(_, r)| r.is_to_many())
                    .filter_map(|(name, r)| {
                        let children = match guard.relation(name) {
                            Some(RelationSlot::Many(list)) => list.clone(),
                            Some(RelationSlot::One(Some(child))) => vec![Arc::clone(child)],
                            _ => return None,
                        };
                        Some((r.clone(), children))
                    })
                    .collect()
            };
            for (relation, children) in dependents {
                let own_value = accessor.get(&node.lock(), &relation.this_column);
                match relation.kind {
                    RelationKind::OneToMany => {
                        let child_table = self.schema.resolve_relation(&relation)?;
                        let child_access = Accessor::new(child_table, mode);
                        for child in children {
                            let child_id = node_id(&child);
                            if state.status.contains_key(&child_id) {
                                // Already written or in flight: patch its FK
                                // once everything exists.
                                state.patches.push(PendingPatch {
                                    table: relation.other_table.clone(),
                                    node: Arc::clone(&child),
                                    fk_column: relation.other_column.clone(),
                                    target: Arc::clone(&node),
                                    target_table: table.clone(),
                                    target_column: relation.this_column.clone(),
                                });
                                continue;
                            }
                            if let Some(value) = own_value.clone() {
                                child_access.set(&mut child.lock(), &relation.other_column, value);
                            }
                            self.persist_node(
                                &mut *state,
                                child,
                                relation.other_table.clone(),
                                mode,
                            )
                            .await?;
                        }
                    }
                    RelationKind::ManyToMany => {
                        let junction = relation.junction.clone().ok_or_else(|| {
                            Error::Invariant(format!(
                                "many-to-many relationship into {} has no junction table",
                                relation.other_table
                            ))
                        })?;
                        let this_value = own_value.clone().ok_or_else(|| {
                            Error::Invariant(format!(
                                "stored {table} row has no {} value",
                                relation.this_column
                            ))
                        })?;
                        for child in children {
                            let child_id = node_id(&child);
                            if !state.status.contains_key(&child_id) {
                                self.persist_node(
                                    &mut *state,
                                    Arc::clone(&child),
                                    relation.other_table.clone(),
                                    mode,
                                )
                                .await?;
                            }
                            let pending = PendingJunction {
                                table: junction.table.clone(),
                                this_column: junction.this_column.clone(),
                                other_column: junction.other_column.clone(),
                                this_value: this_value.clone(),
                                child: Arc::clone(&child),
                                child_table: relation.other_table.clone(),
                                child_key_column: relation.other_column.clone(),
                            };
                            if state.status.get(&child_id) == Some(&NodeStatus::Done) {
                                self.insert_junction(state, pending, mode).await?;
                            } else {
                                state.junctions.push(pending);
                            }
                        }
                    }
                    _ => {}
                }
            }

            state.status.insert(id, NodeStatus::Done);
            Ok(())
        })
    }

    /// Insert or update one node's own row and record the change.
    async fn write_row(
        &self,
        state: &mut StoreState,
        node: &NodeRef,
        table: &str,
        mode: AccessMode,
        fk_values: Vec<(String, Value)>,
    ) -> Result<(), Error> {
        let tdef = self.schema.get_table(table)?;
        let accessor = Accessor::new(tdef, mode);

        let mut columns = accessor.supplied_columns(&node.lock());
        for (column, value) in fk_values {
            match columns.iter_mut().find(|(c, _)| *c == column) {
                Some((_, slot)) => *slot = value,
                None => columns.push((column, value)),
            }
        }

        let primary_key = accessor.primary_key(&node.lock());
        if tdef.id_generated {
            if let Some(key) = primary_key {
                return self.update_row(state, node, table, mode, columns, key).await;
            }
        } else if primary_key.is_none() {
            return Err(Error::Invariant(format!(
                "node for {table} has no primary key and the table does not generate one"
            )));
        }
        self.insert_row(state, node, table, mode, columns).await
    }

    async fn insert_row(
        &self,
        state: &mut StoreState,
        node: &NodeRef,
        table: &str,
        mode: AccessMode,
        columns: Vec<(String, Value)>,
    ) -> Result<(), Error> {
        let tdef = self.schema.get_table(table)?;
        let accessor = Accessor::new(tdef, mode);

        let names = columns
            .iter()
            .map(|(c, _)| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");
        let params: Vec<Value> = columns.iter().map(|(_, v)| v.clone()).collect();
        let mut sql = format!("INSERT INTO {table} ({names}) VALUES ({placeholders})");

        if tdef.id_generated {
            let key = match self.dialect.key_readback() {
                KeyReadback::Returning => {
                    sql.push_str(&format!(" RETURNING {}", tdef.primary_key));
                    let rows = self.run(table, "insert", &sql, &params).await?;
                    rows.first()
                        .and_then(|row| row.first())
                        .map(|(_, value)| value.clone())
                }
                KeyReadback::LastInsertId => {
                    self.run(table, "insert", &sql, &params).await?;
                    let rows = self
                        .run(table, "select", "SELECT LAST_INSERT_ID()", &[])
                        .await?;
                    rows.first()
                        .and_then(|row| row.first())
                        .map(|(_, value)| value.clone())
                }
            };
            let key = key.ok_or_else(|| {
                Error::Invariant(format!("no generated key returned for {table}"))
            })?;
            accessor.set(&mut node.lock(), &tdef.primary_key, key);
        } else {
            self.run(table, "insert", &sql, &params).await?;
        }

        let row = self.keyed_row(tdef, mode, node, &columns, true);
        state.changes.push(Change::create(table, row));
        Ok(())
    }

    async fn update_row(
        &self,
        state: &mut StoreState,
        node: &NodeRef,
        table: &str,
        mode: AccessMode,
        columns: Vec<(String, Value)>,
        key: Value,
    ) -> Result<(), Error> {
        let tdef = self.schema.get_table(table)?;
        let accessor = Accessor::new(tdef, mode);

        let set_columns: Vec<(String, Value)> = columns
            .into_iter()
            .filter(|(c, _)| *c != tdef.primary_key)
            .collect();
        if set_columns.is_empty() {
            return Ok(());
        }

        let assignments = set_columns
            .iter()
            .map(|(c, _)| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params: Vec<Value> = set_columns.iter().map(|(_, v)| v.clone()).collect();
        params.push(key);
        let sql = format!(
            "UPDATE {table} SET {assignments} WHERE {} = ?",
            tdef.primary_key
        );
        self.run(table, "update", &sql, &params).await?;

        let changed = set_columns
            .iter()
            .filter_map(|(c, _)| accessor.key_for_column(c))
            .map(str::to_string)
            .collect();
        let row = self.keyed_row(tdef, mode, node, &set_columns, true);
        state.changes.push(Change::update(table, row, changed));
        Ok(())
    }

    /// Re-key a column/value list the way the node is keyed, appending the
    /// primary key when asked.
    fn keyed_row(
        &self,
        tdef: &crate::schema::TableDef,
        mode: AccessMode,
        node: &NodeRef,
        columns: &[(String, Value)],
        with_key: bool,
    ) -> Vec<(String, Value)> {
        let accessor = Accessor::new(tdef, mode);
        let mut row: Vec<(String, Value)> = columns
            .iter()
            .filter_map(|(column, value)| {
                accessor
                    .key_for_column(column)
                    .map(|key| (key.to_string(), value.clone()))
            })
            .collect();
        if with_key && !row.iter().any(|(k, _)| {
            accessor
                .key_for_column(&tdef.primary_key)
                .is_some_and(|pk| pk == k)
        }) {
            if let (Some(key), Some(value)) = (
                accessor.key_for_column(&tdef.primary_key),
                accessor.primary_key(&node.lock()),
            ) {
                row.push((key.to_string(), value));
            }
        }
        row
    }

    async fn insert_junction(
        &self,
        state: &mut StoreState,
        pending: PendingJunction,
        mode: AccessMode,
    ) -> Result<(), Error> {
        let child_table = self.schema.get_table(&pending.child_table)?;
        let child_access = Accessor::new(child_table, mode);
        let other_value = child_access
            .get(&pending.child.lock(), &pending.child_key_column)
            .ok_or_else(|| {
                Error::Invariant(format!(
                    "stored {} row has no {} value",
                    pending.child_table, pending.child_key_column
                ))
            })?;

        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?, ?)",
            pending.table, pending.this_column, pending.other_column
        );
        let params = [pending.this_value.clone(), other_value.clone()];
        self.run(&pending.table, "insert", &sql, &params).await?;

        // Junction tables have no schema entry; the change keeps raw
        // column keys in either mode.
        state.changes.push(Change::insert(
            &pending.table,
            vec![
                (pending.this_column.clone(), pending.this_value),
                (pending.other_column.clone(), other_value),
            ],
        ));
        Ok(())
    }

    async fn flush_junctions(
        &self,
        state: &mut StoreState,
        mode: AccessMode,
    ) -> Result<(), Error> {
        for pending in std::mem::take(&mut state.junctions) {
            self.insert_junction(state, pending, mode).await?;
        }
        Ok(())
    }

    /// Backfill the foreign keys deferred by cycles.
    async fn flush_patches(&self, state: &mut StoreState, mode: AccessMode) -> Result<(), Error> {
        for patch in std::mem::take(&mut state.patches) {
            let tdef = self.schema.get_table(&patch.table)?;
            let accessor = Accessor::new(tdef, mode);
            let target_table = self.schema.get_table(&patch.target_table)?;
            let target_access = Accessor::new(target_table, mode);

            let fk_value = target_access
                .get(&patch.target.lock(), &patch.target_column)
                .ok_or_else(|| {
                    Error::Invariant(format!(
                        "stored {} row has no {} value",
                        patch.target_table, patch.target_column
                    ))
                })?;
            let key = accessor.primary_key(&patch.node.lock()).ok_or_else(|| {
                Error::Invariant(format!(
                    "patched {} row has no primary key",
                    patch.table
                ))
            })?;

            let sql = format!(
                "UPDATE {} SET {} = ? WHERE {} = ?",
                patch.table, patch.fk_column, tdef.primary_key
            );
            let params = [fk_value.clone(), key.clone()];
            self.run(&patch.table, "update", &sql, &params).await?;
            accessor.set(&mut patch.node.lock(), &patch.fk_column, fk_value.clone());

            let fk_key = accessor
                .key_for_column(&patch.fk_column)
                .unwrap_or(&patch.fk_column)
                .to_string();
            let pk_key = accessor
                .key_for_column(&tdef.primary_key)
                .unwrap_or(&tdef.primary_key)
                .to_string();
            state.changes.push(Change::update(
                &patch.table,
                vec![(fk_key.clone(), fk_value), (pk_key, key)],
                vec![fk_key],
            ));
        }
        Ok(())
    }
}
