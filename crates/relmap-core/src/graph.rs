//! In-memory entity graph nodes.
//!
//! Nodes are caller-owned keyed records. The engine mutates them in place
//! (generated keys, loaded relationship values) and tracks already-visited
//! nodes by `Arc` pointer identity, which is what makes cyclic graphs
//! terminate. It never frees or copies nodes on its own; deleting only
//! removes the backing row.

use std::sync::Arc;

use parking_lot::Mutex;

use relmap_proto::Value;

use crate::schema::TableDef;

/// Shared handle to a graph node.
pub type NodeRef = Arc<Mutex<Node>>;

/// Stable identity of a node, derived from its allocation.
pub fn node_id(node: &NodeRef) -> usize {
    Arc::as_ptr(node) as usize
}

/// A relationship slot on a node.
#[derive(Debug, Clone)]
pub enum RelationSlot {
    /// To-one attachment; `None` when no related row exists.
    One(Option<NodeRef>),
    /// To-many attachment; empty when no related rows exist.
    Many(Vec<NodeRef>),
}

/// A plain keyed record: scalar slots plus relationship slots.
///
/// Keys are raw column names in row mode and logical property names in
/// property mode; the [`Accessor`] seam hides the difference from the
/// engines.
#[derive(Debug, Clone, Default)]
pub struct Node {
    values: Vec<(String, Value)>,
    relations: Vec<(String, RelationSlot)>,
}

impl Node {
    /// An empty node.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style scalar slot.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value.into());
        self
    }

    /// Builder-style to-one relationship slot.
    pub fn with_one(mut self, name: impl Into<String>, node: NodeRef) -> Self {
        self.set_relation(name, RelationSlot::One(Some(node)));
        self
    }

    /// Builder-style to-many relationship slot.
    pub fn with_many(mut self, name: impl Into<String>, nodes: Vec<NodeRef>) -> Self {
        self.set_relation(name, RelationSlot::Many(nodes));
        self
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> NodeRef {
        Arc::new(Mutex::new(self))
    }

    /// Set a scalar slot, replacing any previous value under the key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.values.push((key, value)),
        }
    }

    /// Get a scalar slot.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// All scalar slots in insertion order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Set a relationship slot, replacing any previous one under the name.
    pub fn set_relation(&mut self, name: impl Into<String>, slot: RelationSlot) {
        let name = name.into();
        match self.relations.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = slot,
            None => self.relations.push((name, slot)),
        }
    }

    /// Get a relationship slot.
    pub fn relation(&self, name: &str) -> Option<&RelationSlot> {
        self.relations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// Append to a to-many relationship slot, creating it if absent.
    pub fn push_related(&mut self, name: impl Into<String>, node: NodeRef) {
        let name = name.into();
        match self.relations.iter_mut().find(|(n, _)| *n == name) {
            Some((_, RelationSlot::Many(list))) => list.push(node),
            Some((_, slot @ RelationSlot::One(_))) => *slot = RelationSlot::Many(vec![node]),
            None => self.relations.push((name, RelationSlot::Many(vec![node]))),
        }
    }
}

/// Row-keyed vs property-keyed node access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Slots keyed by raw column names.
    Row,
    /// Slots keyed by logical property names (the default).
    #[default]
    Property,
}

/// Mode-aware column access over a node.
///
/// The rest of the load/store machinery is written against this seam only;
/// it is the single place the row/property duality lives.
#[derive(Debug, Clone, Copy)]
pub struct Accessor<'a> {
    table: &'a TableDef,
    mode: AccessMode,
}

impl<'a> Accessor<'a> {
    /// Bind a table definition and access mode.
    pub fn new(table: &'a TableDef, mode: AccessMode) -> Self {
        Self { table, mode }
    }

    /// The node key a column is stored under, if the column is mapped.
    pub fn key_for_column(&self, column: &str) -> Option<&'a str> {
        let mapping = self.table.columns().find(|m| m.column == column)?;
        match self.mode {
            AccessMode::Property => Some(mapping.property.as_str()),
            AccessMode::Row => Some(mapping.column.as_str()),
        }
    }

    /// Read a column's value from a node.
    pub fn get(&self, node: &Node, column: &str) -> Option<Value> {
        self.key_for_column(column)
            .and_then(|key| node.get(key).cloned())
    }

    /// Write a column's value into a node.
    pub fn set(&self, node: &mut Node, column: &str, value: Value) {
        if let Some(key) = self.key_for_column(column) {
            node.set(key.to_string(), value);
        }
    }

    /// The node's primary-key value, when present and non-null.
    pub fn primary_key(&self, node: &Node) -> Option<Value> {
        match self.get(node, &self.table.primary_key) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    /// Supplied scalar columns of a node, in table column order.
    ///
    /// Node slots that map to no column are ignored; omitted columns are
    /// simply absent, which is what keeps updates restricted to the fields
    /// the caller actually set.
    pub fn supplied_columns(&self, node: &Node) -> Vec<(String, Value)> {
        let mut out = Vec::new();
        for mapping in self.table.columns() {
            let key = match self.mode {
                AccessMode::Row => mapping.column.as_str(),
                AccessMode::Property => mapping.property.as_str(),
            };
            if let Some(value) = node.get(key) {
                out.push((mapping.column.clone(), value.clone()));
            }
        }
        out
    }
}
