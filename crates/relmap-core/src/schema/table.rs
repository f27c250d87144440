//! Table definitions.

use super::relation::RelationDef;

/// One column of a table and the logical property it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Physical column name.
    pub column: String,
    /// Logical property name.
    pub property: String,
}

/// A table definition: column/property mapping, primary key, and named
/// relationships.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    /// Table name (unique within a schema).
    pub name: String,
    /// Primary-key column name.
    pub primary_key: String,
    /// Whether the primary key is database-generated.
    pub id_generated: bool,
    columns: Vec<ColumnMapping>,
    relationships: Vec<(String, RelationDef)>,
}

impl TableDef {
    /// Create a table definition with its primary-key column.
    ///
    /// The primary key still needs a column/property mapping via
    /// [`with_column`](Self::with_column).
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            id_generated: false,
            columns: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Map a column to a logical property name.
    pub fn with_column(mut self, column: impl Into<String>, property: impl Into<String>) -> Self {
        self.columns.push(ColumnMapping {
            column: column.into(),
            property: property.into(),
        });
        self
    }

    /// Mark the primary key as database-generated.
    pub fn with_generated_id(mut self) -> Self {
        self.id_generated = true;
        self
    }

    /// Add a named relationship.
    pub fn with_relationship(mut self, name: impl Into<String>, relation: RelationDef) -> Self {
        self.relationships.push((name.into(), relation));
        self
    }

    /// All column mappings in definition order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.columns.iter()
    }

    /// All relationships in definition order.
    pub fn relationships(&self) -> impl Iterator<Item = (&str, &RelationDef)> {
        self.relationships.iter().map(|(n, r)| (n.as_str(), r))
    }

    /// Look up a relationship by name.
    pub fn relationship(&self, name: &str) -> Option<&RelationDef> {
        self.relationships
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    /// Logical property for a column.
    pub fn property_for_column(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|m| m.column == column)
            .map(|m| m.property.as_str())
    }

    /// Column for a logical property.
    pub fn column_for_property(&self, property: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|m| m.property == property)
            .map(|m| m.column.as_str())
    }

    /// Logical property of the primary key.
    pub fn primary_key_property(&self) -> Option<&str> {
        self.property_for_column(&self.primary_key)
    }

    /// Check the definition for internal consistency: the primary key must
    /// be mapped, and column/property names must be unique on both sides.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.property_for_column(&self.primary_key).is_none() {
            return Err(format!(
                "table {} has no column mapping for primary key {}",
                self.name, self.primary_key
            ));
        }
        for (i, m) in self.columns.iter().enumerate() {
            for other in &self.columns[i + 1..] {
                if m.column == other.column {
                    return Err(format!("table {} maps column {} twice", self.name, m.column));
                }
                if m.property == other.property {
                    return Err(format!(
                        "table {} maps property {} twice",
                        self.name, m.property
                    ));
                }
            }
        }
        for (i, (name, _)) in self.relationships.iter().enumerate() {
            if self.relationships[i + 1..].iter().any(|(n, _)| n == name) {
                return Err(format!(
                    "table {} defines relationship {} twice",
                    self.name, name
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_builder() {
        let table = TableDef::new("user", "id")
            .with_generated_id()
            .with_column("id", "id")
            .with_column("user_name", "userName")
            .with_relationship("posts", RelationDef::one_to_many("id", "post", "author_id"));

        assert_eq!(table.name, "user");
        assert!(table.id_generated);
        assert_eq!(table.property_for_column("user_name"), Some("userName"));
        assert_eq!(table.column_for_property("userName"), Some("user_name"));
        assert_eq!(table.primary_key_property(), Some("id"));
        assert!(table.relationship("posts").is_some());
        assert!(table.relationship("nope").is_none());
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_validate_unmapped_primary_key() {
        let table = TableDef::new("user", "id").with_column("name", "name");
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_mappings() {
        let table = TableDef::new("user", "id")
            .with_column("id", "id")
            .with_column("id", "other");
        assert!(table.validate().is_err());

        let table = TableDef::new("user", "id")
            .with_column("id", "id")
            .with_column("uid", "id");
        assert!(table.validate().is_err());
    }
}
