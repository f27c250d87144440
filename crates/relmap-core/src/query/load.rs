//! Graph-aware loading: run a select plan, fold the flat row set back into
//! nodes, then resolve `@loadSeparately` attachments with secondary queries.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use relmap_proto::{Criteria, Value};

use crate::engine::Engine;
use crate::error::Error;
use crate::executor::{row_value, Row};
use crate::graph::{node_id, AccessMode, Accessor, Node, NodeRef, RelationSlot};
use crate::schema::{RelationKind, TableDef};

use super::plan::{SelectPlan, SeparateLoad};

/// Hash key for grouping rows by a value.
fn value_key(value: &Value) -> String {
    format!("{value:?}")
}

/// Collect the nodes sitting at a relationship path, de-duplicated by
/// identity so shared nodes are visited once.
fn nodes_at_path(roots: &[NodeRef], path: &[String]) -> Vec<NodeRef> {
    let mut current: Vec<NodeRef> = roots.to_vec();
    for name in path {
        let mut next = Vec::new();
        for node in &current {
            match node.lock().relation(name) {
                Some(RelationSlot::One(Some(child))) => next.push(Arc::clone(child)),
                Some(RelationSlot::Many(children)) => next.extend(children.iter().cloned()),
                _ => {}
            }
        }
        current = next;
    }
    let mut seen = HashMap::new();
    current
        .into_iter()
        .filter(|n| seen.insert(node_id(n), ()).is_none())
        .collect()
}

impl<'a> Engine<'a> {
    /// Load the graph of nodes matching `criteria` against `table`.
    ///
    /// Eager (`@load`) relationships come back attached on the returned
    /// nodes; `@loadSeparately` ones are resolved with follow-up queries
    /// before this returns. Roots arrive in result-set order.
    pub async fn load(
        &self,
        table: &str,
        criteria: &Criteria,
        mode: AccessMode,
    ) -> Result<Vec<NodeRef>, Error> {
        let plan = self.compiler().compile(table, criteria)?;
        self.execute_plan(plan, mode).await
    }

    /// Run one compiled plan to completion, including its separate loads.
    /// Boxed so separate loads can recurse through it.
    pub(crate) fn execute_plan(
        &self,
        plan: SelectPlan,
        mode: AccessMode,
    ) -> BoxFuture<'_, Result<Vec<NodeRef>, Error>> {
        Box::pin(async move {
            let (sql, params) = plan.statement();
            let rows = self.run(&plan.table, "select", &sql, &params).await?;
            let roots = self.assemble(&plan, &rows, mode)?;
            for separate in &plan.separate {
                self.load_separate(separate, &roots, mode).await?;
            }
            Ok(roots)
        })
    }

    /// Fold the flat row set into a node graph.
    ///
    /// Rows are grouped by the root primary key in first-seen order; within
    /// each row, attachment column groups materialize child nodes,
    /// de-duplicated per parent so fan-out joins do not multiply them. A
    /// column group that is entirely NULL means no related row and is
    /// suppressed.
    fn assemble(
        &self,
        plan: &SelectPlan,
        rows: &[Row],
        mode: AccessMode,
    ) -> Result<Vec<NodeRef>, Error> {
        let root_table = self.schema.get_table(&plan.table)?;

        let mut roots: Vec<NodeRef> = Vec::new();
        let mut root_index: HashMap<String, NodeRef> = HashMap::new();
        // (parent identity, path + child key) -> already materialized child.
        let mut seen_children: HashMap<(usize, String), NodeRef> = HashMap::new();

        for row in rows {
            let root_key = match row_value(row, &plan.root_pk_label) {
                Some(v) if !v.is_null() => value_key(v),
                _ => continue,
            };
            let root = match root_index.get(&root_key) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let node =
                        self.materialize(plan, row, &[], root_table, mode)?;
                    roots.push(Arc::clone(&node));
                    root_index.insert(root_key, Arc::clone(&node));
                    node
                }
            };

            let mut by_path: HashMap<Vec<String>, NodeRef> = HashMap::new();
            by_path.insert(Vec::new(), root);

            for attachment in &plan.attachments {
                let parent_path = &attachment.path[..attachment.path.len() - 1];
                let name = &attachment.path[attachment.path.len() - 1];
                let Some(parent) = by_path.get(parent_path).cloned() else {
                    continue;
                };

                let child_table = self.schema.get_table(&attachment.table)?;
                let pk_item = plan
                    .items
                    .iter()
                    .find(|i| i.path == attachment.path && i.column == child_table.primary_key);
                let child_key = pk_item
                    .and_then(|item| row_value(row, &item.label))
                    .filter(|v| !v.is_null());
                let Some(child_key) = child_key else {
                    // All-NULL group from an unmatched LEFT JOIN.
                    continue;
                };
                let dedup_key = (
                    node_id(&parent),
                    format!("{}|{}", attachment.path.join("."), value_key(child_key)),
                );

                let child = match seen_children.get(&dedup_key) {
                    Some(existing) => Arc::clone(existing),
                    None => {
                        let child =
                            self.materialize(plan, row, &attachment.path, child_table, mode)?;
                        {
                            let mut parent = parent.lock();
                            if attachment.relation.is_to_many() {
                                parent.push_related(name.clone(), Arc::clone(&child));
                            } else {
                                parent.set_relation(
                                    name.clone(),
                                    RelationSlot::One(Some(Arc::clone(&child))),
                                );
                            }
                        }
                        seen_children.insert(dedup_key, Arc::clone(&child));
                        child
                    }
                };
                by_path.insert(attachment.path.clone(), child);
            }
        }

        Ok(roots)
    }

    /// Build one node from a row's column group at `path`, with every
    /// attachment slot under it initialized to its empty shape.
    fn materialize(
        &self,
        plan: &SelectPlan,
        row: &Row,
        path: &[String],
        table: &TableDef,
        mode: AccessMode,
    ) -> Result<NodeRef, Error> {
        let accessor = Accessor::new(table, mode);
        let mut node = Node::new();
        for item in plan.items.iter().filter(|i| i.path == path) {
            if let Some(value) = row_value(row, &item.label) {
                accessor.set(&mut node, &item.column, value.clone());
            }
        }
        for attachment in &plan.attachments {
            if attachment.path.len() == path.len() + 1 && attachment.path.starts_with(path) {
                let name = attachment.path[attachment.path.len() - 1].clone();
                let empty = if attachment.relation.is_to_many() {
                    RelationSlot::Many(Vec::new())
                } else {
                    RelationSlot::One(None)
                };
                node.set_relation(name, empty);
            }
        }
        for separate in &plan.separate {
            if separate.parent_path == path {
                let empty = if separate.relation.is_to_many() {
                    RelationSlot::Many(Vec::new())
                } else {
                    RelationSlot::One(None)
                };
                node.set_relation(separate.name.clone(), empty);
            }
        }
        Ok(node.into_ref())
    }

    /// Resolve one `@loadSeparately` attachment with secondary queries.
    async fn load_separate(
        &self,
        separate: &SeparateLoad,
        roots: &[NodeRef],
        mode: AccessMode,
    ) -> Result<(), Error> {
        let parents = nodes_at_path(roots, &separate.parent_path);
        if parents.is_empty() {
            return Ok(());
        }
        let parent_table = self.schema.get_table(&separate.parent_table)?;
        let parent_access = Accessor::new(parent_table, mode);
        let relation = &separate.relation;
        let other = self.schema.resolve_relation(relation)?;
        let other_access = Accessor::new(other, mode);

        // Values of the correlating column on the parent side, de-duplicated.
        let mut keys: Vec<Value> = Vec::new();
        let mut key_index: HashMap<String, usize> = HashMap::new();
        for parent in &parents {
            let value = parent_access.get(&parent.lock(), &relation.this_column);
            if let Some(value) = value.filter(|v| !v.is_null()) {
                key_index.entry(value_key(&value)).or_insert_with(|| {
                    keys.push(value);
                    keys.len() - 1
                });
            }
        }
        if keys.is_empty() {
            return Ok(());
        }

        match relation.kind {
            RelationKind::ManyToOne | RelationKind::OneToOne => {
                let mut plan = self.compiler().compile(&other.name, &separate.criteria)?;
                let expr = format!("{}.{}", plan.root_alias, relation.other_column);
                plan.push_in_filter(&expr, &keys);
                let children = self.execute_plan(plan, mode).await?;

                let mut by_key: HashMap<String, NodeRef> = HashMap::new();
                for child in &children {
                    if let Some(value) = other_access.get(&child.lock(), &relation.other_column) {
                        by_key.insert(value_key(&value), Arc::clone(child));
                    }
                }
                for parent in &parents {
                    let value = parent_access.get(&parent.lock(), &relation.this_column);
                    let child = value
                        .filter(|v| !v.is_null())
                        .and_then(|v| by_key.get(&value_key(&v)).cloned());
                    parent
                        .lock()
                        .set_relation(separate.name.clone(), RelationSlot::One(child));
                }
            }
            RelationKind::OneToMany => {
                let mut plan = self.compiler().compile(&other.name, &separate.criteria)?;
                let expr = format!("{}.{}", plan.root_alias, relation.other_column);
                plan.push_in_filter(&expr, &keys);
                let children = self.execute_plan(plan, mode).await?;

                let mut by_key: HashMap<String, Vec<NodeRef>> = HashMap::new();
                for child in &children {
                    if let Some(value) = other_access.get(&child.lock(), &relation.other_column) {
                        by_key
                            .entry(value_key(&value))
                            .or_default()
                            .push(Arc::clone(child));
                    }
                }
                for parent in &parents {
                    let value = parent_access.get(&parent.lock(), &relation.this_column);
                    let list = value
                        .filter(|v| !v.is_null())
                        .and_then(|v| by_key.get(&value_key(&v)).cloned())
                        .unwrap_or_default();
                    parent
                        .lock()
                        .set_relation(separate.name.clone(), RelationSlot::Many(list));
                }
            }
            RelationKind::ManyToMany => {
                let junction = relation.junction.as_ref().ok_or_else(|| {
                    Error::Invariant(format!(
                        "many-to-many relationship {} has no junction table",
                        separate.name
                    ))
                })?;
                let placeholders = vec!["?"; keys.len()].join(", ");
                let pair_sql = format!(
                    "SELECT {}, {} FROM {} WHERE {} IN ({})",
                    junction.this_column,
                    junction.other_column,
                    junction.table,
                    junction.this_column,
                    placeholders
                );
                let pair_rows = self.run(&junction.table, "select", &pair_sql, &keys).await?;
                let pairs: Vec<(Value, Value)> = pair_rows
                    .iter()
                    .filter_map(|row| {
                        let this = row_value(row, &junction.this_column)?;
                        let other = row_value(row, &junction.other_column)?;
                        Some((this.clone(), other.clone()))
                    })
                    .collect();

                let mut child_keys: Vec<Value> = Vec::new();
                let mut seen_keys: HashMap<String, ()> = HashMap::new();
                for (_, other_key) in &pairs {
                    if seen_keys.insert(value_key(other_key), ()).is_none() {
                        child_keys.push(other_key.clone());
                    }
                }

                let mut by_key: HashMap<String, NodeRef> = HashMap::new();
                if !child_keys.is_empty() {
                    let mut plan = self.compiler().compile(&other.name, &separate.criteria)?;
                    let expr = format!("{}.{}", plan.root_alias, relation.other_column);
                    plan.push_in_filter(&expr, &child_keys);
                    let children = self.execute_plan(plan, mode).await?;
                    for child in &children {
                        if let Some(value) =
                            other_access.get(&child.lock(), &relation.other_column)
                        {
                            by_key.insert(value_key(&value), Arc::clone(child));
                        }
                    }
                }

                for parent in &parents {
                    let value = parent_access.get(&parent.lock(), &relation.this_column);
                    let Some(value) = value.filter(|v| !v.is_null()) else {
                        continue;
                    };
                    let wanted = value_key(&value);
                    let list: Vec<NodeRef> = pairs
                        .iter()
                        .filter(|(this, _)| value_key(this) == wanted)
                        .filter_map(|(_, other_key)| by_key.get(&value_key(other_key)).cloned())
                        .collect();
                    parent
                        .lock()
                        .set_relation(separate.name.clone(), RelationSlot::Many(list));
                }
            }
        }
        Ok(())
    }
}
