//! Relationship definitions between tables.

/// Cardinality of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Foreign key on this row pointing at one other row.
    ManyToOne,
    /// Foreign key on this row pointing at a unique other row.
    OneToOne,
    /// Other table's rows carry a foreign key back to this row.
    OneToMany,
    /// Linked through a junction table carrying both foreign keys.
    ManyToMany,
}

/// Junction table for a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunctionDef {
    /// Junction table name.
    pub table: String,
    /// Junction column referencing this side.
    pub this_column: String,
    /// Junction column referencing the other side. May differ from
    /// `this_column` even when both sides are the same table.
    pub other_column: String,
}

/// A named relationship from one table to another.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    /// Cardinality.
    pub kind: RelationKind,
    /// Owning column on this side: the FK column for to-one kinds, the
    /// referenced (usually primary key) column for to-many kinds.
    pub this_column: String,
    /// Referenced table name. Resolved lazily so forward references work.
    pub other_table: String,
    /// Referenced column on the other table: its key column for to-one
    /// kinds, its FK column for one-to-many, its key column for
    /// many-to-many.
    pub other_column: String,
    /// Junction table, many-to-many only.
    pub junction: Option<JunctionDef>,
}

impl RelationDef {
    /// A many-to-one relationship: `this_column` is the FK here, pointing
    /// at `other_table.other_column`.
    pub fn many_to_one(
        this_column: impl Into<String>,
        other_table: impl Into<String>,
        other_column: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::ManyToOne,
            this_column: this_column.into(),
            other_table: other_table.into(),
            other_column: other_column.into(),
            junction: None,
        }
    }

    /// A one-to-one relationship with the FK held on this row.
    pub fn one_to_one(
        this_column: impl Into<String>,
        other_table: impl Into<String>,
        other_column: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::OneToOne,
            this_column: this_column.into(),
            other_table: other_table.into(),
            other_column: other_column.into(),
            junction: None,
        }
    }

    /// A one-to-many relationship: `other_table.other_column` is the FK
    /// pointing back at `this_column` here.
    pub fn one_to_many(
        this_column: impl Into<String>,
        other_table: impl Into<String>,
        other_column: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::OneToMany,
            this_column: this_column.into(),
            other_table: other_table.into(),
            other_column: other_column.into(),
            junction: None,
        }
    }

    /// A many-to-many relationship through a junction table.
    pub fn many_to_many(
        this_column: impl Into<String>,
        other_table: impl Into<String>,
        other_column: impl Into<String>,
        junction_table: impl Into<String>,
        junction_this: impl Into<String>,
        junction_other: impl Into<String>,
    ) -> Self {
        Self {
            kind: RelationKind::ManyToMany,
            this_column: this_column.into(),
            other_table: other_table.into(),
            other_column: other_column.into(),
            junction: Some(JunctionDef {
                table: junction_table.into(),
                this_column: junction_this.into(),
                other_column: junction_other.into(),
            }),
        }
    }

    /// Whether the relationship attaches a list rather than a single node.
    pub fn is_to_many(&self) -> bool {
        matches!(self.kind, RelationKind::OneToMany | RelationKind::ManyToMany)
    }

    /// Whether the FK column lives on this side's row.
    pub fn fk_on_this_side(&self) -> bool {
        matches!(self.kind, RelationKind::ManyToOne | RelationKind::OneToOne)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_one_shapes() {
        let rel = RelationDef::many_to_one("author_id", "user", "id");
        assert!(rel.fk_on_this_side());
        assert!(!rel.is_to_many());
        assert!(rel.junction.is_none());

        let rel = RelationDef::one_to_one("profile_id", "profile", "id");
        assert!(rel.fk_on_this_side());
    }

    #[test]
    fn test_to_many_shapes() {
        let rel = RelationDef::one_to_many("id", "post", "author_id");
        assert!(rel.is_to_many());
        assert!(!rel.fk_on_this_side());

        let rel = RelationDef::many_to_many("id", "tag", "id", "post_tag", "post_id", "tag_id");
        assert!(rel.is_to_many());
        let junction = rel.junction.unwrap();
        assert_eq!(junction.table, "post_tag");
        assert_eq!(junction.this_column, "post_id");
        assert_eq!(junction.other_column, "tag_id");
    }

    #[test]
    fn test_asymmetric_self_junction() {
        let rel = RelationDef::many_to_many("id", "user", "id", "follows", "follower_id", "followee_id");
        let junction = rel.junction.unwrap();
        assert_ne!(junction.this_column, junction.other_column);
    }
}
