//! Change records for persisted mutations.
//!
//! Every statement the store and delete engines execute emits exactly one
//! [`Change`], in execution order. Changes are immutable value records
//! intended for downstream change-data-capture.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The kind of persisted mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    /// A new entity row was inserted.
    Create,
    /// An existing row was updated.
    Update,
    /// A row was deleted.
    Delete,
    /// A dependent row with no identity of its own (a junction row) was
    /// inserted.
    Insert,
}

/// One persisted mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Entity/table identifier.
    pub entity: String,
    /// Persisted key-value snapshot: the full row on create/insert/delete,
    /// only the changed fields plus the primary key on update.
    pub row: Vec<(String, Value)>,
    /// Mutation kind.
    pub op: ChangeOp,
    /// Ordered names of the changed fields; updates only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_fields: Option<Vec<String>>,
}

impl Change {
    /// Record an entity insert.
    pub fn create(entity: impl Into<String>, row: Vec<(String, Value)>) -> Self {
        Self {
            entity: entity.into(),
            row,
            op: ChangeOp::Create,
            changed_fields: None,
        }
    }

    /// Record an update restricted to the supplied fields.
    pub fn update(
        entity: impl Into<String>,
        row: Vec<(String, Value)>,
        changed_fields: Vec<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            row,
            op: ChangeOp::Update,
            changed_fields: Some(changed_fields),
        }
    }

    /// Record a delete carrying the last known row snapshot.
    pub fn delete(entity: impl Into<String>, row: Vec<(String, Value)>) -> Self {
        Self {
            entity: entity.into(),
            row,
            op: ChangeOp::Delete,
            changed_fields: None,
        }
    }

    /// Record a junction row insert.
    pub fn insert(entity: impl Into<String>, row: Vec<(String, Value)>) -> Self {
        Self {
            entity: entity.into(),
            row,
            op: ChangeOp::Insert,
            changed_fields: None,
        }
    }

    /// Look up a field in the snapshot.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.row.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// An ordered list of changes from one engine call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Changes in causal emission order.
    pub changes: Vec<Change>,
}

impl ChangeSet {
    /// An empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a change.
    pub fn push(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// Number of recorded changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether no change was recorded.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Changes with the given operation, in emission order.
    pub fn with_op(&self, op: ChangeOp) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(move |c| c.op == op)
    }

    /// Entity creates, in emission order.
    pub fn creates(&self) -> impl Iterator<Item = &Change> {
        self.with_op(ChangeOp::Create)
    }

    /// Updates, in emission order.
    pub fn updates(&self) -> impl Iterator<Item = &Change> {
        self.with_op(ChangeOp::Update)
    }

    /// Deletes, in emission order.
    pub fn deletes(&self) -> impl Iterator<Item = &Change> {
        self.with_op(ChangeOp::Delete)
    }
}

impl IntoIterator for ChangeSet {
    type Item = Change;
    type IntoIter = std::vec::IntoIter<Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_constructors() {
        let create = Change::create("user", vec![("id".into(), Value::Int(1))]);
        assert_eq!(create.op, ChangeOp::Create);
        assert_eq!(create.changed_fields, None);
        assert_eq!(create.field("id"), Some(&Value::Int(1)));

        let update = Change::update(
            "user",
            vec![("id".into(), Value::Int(1)), ("name".into(), "x".into())],
            vec!["name".into()],
        );
        assert_eq!(update.op, ChangeOp::Update);
        assert_eq!(update.changed_fields, Some(vec!["name".to_string()]));
    }

    #[test]
    fn test_changeset_filters() {
        let mut set = ChangeSet::new();
        set.push(Change::create("a", vec![]));
        set.push(Change::update("a", vec![], vec![]));
        set.push(Change::delete("b", vec![]));

        assert_eq!(set.len(), 3);
        assert_eq!(set.creates().count(), 1);
        assert_eq!(set.updates().count(), 1);
        assert_eq!(set.deletes().count(), 1);
    }

    #[test]
    fn test_change_serde_op_names() {
        let json = serde_json::to_value(ChangeOp::Create).unwrap();
        assert_eq!(json, serde_json::json!("create"));
        let json = serde_json::to_value(ChangeOp::Insert).unwrap();
        assert_eq!(json, serde_json::json!("insert"));
    }
}
