//! The schema registry.

use std::collections::BTreeMap;

use crate::error::Error;

use super::relation::RelationDef;
use super::table::TableDef;

/// A name-keyed registry of table definitions.
///
/// Built once, then treated as read-only shared configuration passed by
/// reference into every engine call. Concurrent reads are safe; there is
/// no mutation after first use.
#[derive(Debug, Default, Clone)]
pub struct Schema {
    tables: BTreeMap<String, TableDef>,
}

impl Schema {
    /// An empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table definition.
    ///
    /// Fails on duplicate registration or an internally inconsistent
    /// definition. Relationship targets are deliberately not checked here
    /// so tables may reference each other regardless of registration
    /// order; they are resolved lazily by [`resolve_relation`](Self::resolve_relation).
    pub fn add_table(&mut self, table: TableDef) -> Result<(), Error> {
        table.validate().map_err(Error::Invariant)?;
        if self.tables.contains_key(&table.name) {
            return Err(Error::Invariant(format!(
                "table {} registered twice",
                table.name
            )));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Look up a table definition by name.
    pub fn get_table(&self, name: &str) -> Result<&TableDef, Error> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// Resolve a relationship's target table, validating lazily that it
    /// exists.
    pub fn resolve_relation(&self, relation: &RelationDef) -> Result<&TableDef, Error> {
        self.tables.get(&relation.other_table).ok_or_else(|| {
            Error::Invariant(format!(
                "relationship references unknown table {}",
                relation.other_table
            ))
        })
    }

    /// All registered table names.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_table() -> TableDef {
        TableDef::new("user", "id")
            .with_generated_id()
            .with_column("id", "id")
            .with_column("name", "name")
    }

    #[test]
    fn test_add_and_get() {
        let mut schema = Schema::new();
        schema.add_table(user_table()).unwrap();

        assert!(schema.get_table("user").is_ok());
        assert!(matches!(
            schema.get_table("ghost"),
            Err(Error::UnknownTable(_))
        ));
    }

    #[test]
    fn test_duplicate_table_fails() {
        let mut schema = Schema::new();
        schema.add_table(user_table()).unwrap();
        assert!(schema.add_table(user_table()).is_err());
    }

    #[test]
    fn test_forward_reference_resolves_lazily() {
        let mut schema = Schema::new();
        let post = TableDef::new("post", "id")
            .with_generated_id()
            .with_column("id", "id")
            .with_column("author_id", "authorId")
            .with_relationship("author", RelationDef::many_to_one("author_id", "user", "id"));

        // post references user before user exists; registration still works.
        schema.add_table(post).unwrap();
        let rel = schema
            .get_table("post")
            .unwrap()
            .relationship("author")
            .cloned()
            .unwrap();
        assert!(schema.resolve_relation(&rel).is_err());

        schema.add_table(user_table()).unwrap();
        assert_eq!(schema.resolve_relation(&rel).unwrap().name, "user");
    }

    #[test]
    fn test_malformed_table_rejected() {
        let mut schema = Schema::new();
        let broken = TableDef::new("x", "id"); // primary key never mapped
        assert!(matches!(schema.add_table(broken), Err(Error::Invariant(_))));
    }
}
