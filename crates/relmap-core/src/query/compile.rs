//! Criteria compiler.
//!
//! Turns a parsed [`Criteria`] into a [`SelectPlan`] against the schema:
//! joins for `@load` relationships, a WHERE tree from the constraints,
//! EXISTS subqueries for relationship filters without attachment, plus
//! ordering and paging.

use relmap_proto::{Constraint, Criteria, CriteriaNode, LogicOp, OrderDirection, OrderSpec, Value};

use crate::dialect::Dialect;
use crate::error::Error;
use crate::schema::{RelationDef, RelationKind, Schema, TableDef};

use super::plan::{Attachment, SelectItem, SelectPlan, SeparateLoad};

/// Compiler knobs.
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Fail on unknown properties/relationships (the default). Non-strict
    /// mode skips them and exists only for callers that explicitly ask.
    pub strict: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { strict: true }
    }
}

/// Compiles criteria into select plans.
pub struct Compiler<'a> {
    schema: &'a Schema,
    dialect: Dialect,
    options: CompileOptions,
}

/// Compilation context for one table scope.
struct Scope<'s> {
    table: &'s TableDef,
    /// Fitted SQL alias.
    alias: String,
    /// Unfitted logical alias; child aliases derive from it.
    logical: String,
    /// Relationship path from the root.
    path: Vec<String>,
    /// Inside a correlated subquery: loads cannot attach here.
    filter_only: bool,
}

impl<'a> Compiler<'a> {
    /// Create a strict compiler.
    pub fn new(schema: &'a Schema, dialect: Dialect) -> Self {
        Self::with_options(schema, dialect, CompileOptions::default())
    }

    /// Create a compiler with explicit options.
    pub fn with_options(schema: &'a Schema, dialect: Dialect, options: CompileOptions) -> Self {
        Self {
            schema,
            dialect,
            options,
        }
    }

    /// Compile criteria against a root table.
    pub fn compile(&self, table: &str, criteria: &Criteria) -> Result<SelectPlan, Error> {
        let root = self.schema.get_table(table)?;
        let logical = root.name.clone();
        let alias = self.dialect.fit_identifier(&logical);

        let mut plan = SelectPlan {
            dialect: self.dialect,
            table: root.name.clone(),
            root_alias: alias.clone(),
            items: Vec::new(),
            joins: Vec::new(),
            where_sql: String::new(),
            params: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            has_fanout_join: false,
            attachments: Vec::new(),
            separate: Vec::new(),
            root_pk_label: String::new(),
        };
        self.push_items(&mut plan, root, &logical, &alias, &[]);
        plan.root_pk_label = plan
            .items
            .iter()
            .find(|i| i.column == root.primary_key)
            .map(|i| i.label.clone())
            .unwrap_or_default();

        let scope = Scope {
            table: root,
            alias,
            logical,
            path: Vec::new(),
            filter_only: false,
        };
        if let Some(where_sql) = self.compile_criteria(criteria, &scope, &mut plan)? {
            plan.where_sql = where_sql;
        }

        // Root-level directives: ordering and paging count root rows.
        if let Some(node) = criteria.root_node() {
            for spec in &node.order_by {
                if let Some(entry) = self.resolve_order(spec, root, &scope.alias)? {
                    plan.order_by.push(entry);
                }
            }
            plan.limit = node.limit;
            plan.offset = node.offset;
        }

        Ok(plan)
    }

    /// Add every column of a table to the select list.
    fn push_items(
        &self,
        plan: &mut SelectPlan,
        table: &TableDef,
        logical: &str,
        alias: &str,
        path: &[String],
    ) {
        for mapping in table.columns() {
            plan.items.push(SelectItem {
                path: path.to_vec(),
                column: mapping.column.clone(),
                expr: format!("{alias}.{}", mapping.column),
                label: self
                    .dialect
                    .fit_identifier(&format!("{logical}__{}", mapping.column)),
            });
        }
    }

    fn resolve_order(
        &self,
        spec: &OrderSpec,
        table: &TableDef,
        alias: &str,
    ) -> Result<Option<(String, OrderDirection)>, Error> {
        match table.column_for_property(&spec.field) {
            Some(column) => Ok(Some((format!("{alias}.{column}"), spec.direction))),
            None if self.options.strict => Err(Error::validation(
                &table.name,
                format!("unknown order field {}", spec.field),
            )),
            None => Ok(None),
        }
    }

    /// Compile one criteria value to a WHERE fragment.
    fn compile_criteria(
        &self,
        criteria: &Criteria,
        scope: &Scope<'_>,
        plan: &mut SelectPlan,
    ) -> Result<Option<String>, Error> {
        match criteria {
            Criteria::Node(node) => self.compile_node(node, scope, plan),
            Criteria::Group(entries) => {
                let mut acc: Option<String> = None;
                for entry in entries {
                    let Some(fragment) = self.compile_criteria(&entry.criteria, scope, plan)?
                    else {
                        continue;
                    };
                    acc = Some(match acc {
                        None => fragment.to_string(),
                        Some(left) => {
                            let op = match entry.op.unwrap_or(LogicOp::And) {
                                LogicOp::And => "AND",
                                LogicOp::Or => "OR",
                            };
                            // Left-to-right combination; explicit parens keep
                            // mixed AND/OR from re-associating under SQL
                            // precedence.
                            format!("({left}) {op} ({fragment})")
                        }
                    });
                }
                Ok(acc)
            }
        }
    }

    fn compile_node(
        &self,
        node: &CriteriaNode,
        scope: &Scope<'_>,
        plan: &mut SelectPlan,
    ) -> Result<Option<String>, Error> {
        let mut fragments: Vec<String> = Vec::new();

        for (name, constraint) in &node.constraints {
            if let Some(column) = scope.table.column_for_property(name) {
                match constraint {
                    Constraint::Equals(Value::Null) => {
                        fragments.push(format!("{}.{column} IS NULL", scope.alias));
                    }
                    Constraint::Equals(value) => {
                        fragments.push(format!("{}.{column} = ?", scope.alias));
                        plan.params.push(value.clone());
                    }
                    Constraint::Nested(_) => {
                        return Err(Error::validation(
                            &scope.table.name,
                            format!("nested criteria under scalar property {name}"),
                        ));
                    }
                }
                continue;
            }

            if let Some(relation) = scope.table.relationship(name) {
                let relation = relation.clone();
                if let Some(fragment) =
                    self.compile_relationship(name, &relation, constraint, scope, plan)?
                {
                    fragments.push(fragment);
                }
                continue;
            }

            if self.options.strict {
                return Err(Error::validation(
                    &scope.table.name,
                    format!("unknown property or relationship {name}"),
                ));
            }
        }

        if fragments.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fragments.join(" AND ")))
        }
    }

    fn compile_relationship(
        &self,
        name: &str,
        relation: &RelationDef,
        constraint: &Constraint,
        scope: &Scope<'_>,
        plan: &mut SelectPlan,
    ) -> Result<Option<String>, Error> {
        let other = self.schema.resolve_relation(relation)?;

        let nested = match constraint {
            Constraint::Equals(value) => {
                // A bare scalar constrains the FK column directly.
                if !relation.fk_on_this_side() {
                    return Err(Error::validation(
                        &scope.table.name,
                        format!("scalar constraint on to-many relationship {name}"),
                    ));
                }
                plan.params.push(value.clone());
                return Ok(Some(format!(
                    "{}.{} = ?",
                    scope.alias, relation.this_column
                )));
            }
            Constraint::Nested(nested) => nested,
        };

        let flags = nested.root_node();
        let load = flags.map(|n| n.load).unwrap_or(false);
        let load_separately = flags.map(|n| n.load_separately).unwrap_or(false);

        if load_separately && !scope.filter_only {
            plan.separate.push(SeparateLoad {
                parent_path: scope.path.clone(),
                parent_table: scope.table.name.clone(),
                name: name.to_string(),
                relation: relation.clone(),
                criteria: nested.clone(),
            });
            return Ok(None);
        }

        if load && !scope.filter_only {
            return self.compile_loaded(name, relation, nested, other, scope, plan);
        }

        // Primary-key shortcut: {rel: {id: X}} hits the FK column without a
        // join when the relationship references the other table's key.
        if let Some(fragment) = self.try_fk_shortcut(relation, nested, other, scope, plan) {
            return Ok(Some(fragment));
        }

        self.compile_exists(name, relation, nested, other, scope, plan)
    }

    fn compile_loaded(
        &self,
        name: &str,
        relation: &RelationDef,
        nested: &Criteria,
        other: &TableDef,
        scope: &Scope<'_>,
        plan: &mut SelectPlan,
    ) -> Result<Option<String>, Error> {
        let mut child_path = scope.path.clone();
        child_path.push(name.to_string());
        let child_logical = format!("{}__{name}", scope.logical);
        let child_alias = self.dialect.fit_identifier(&child_logical);

        let already_joined = plan.attachments.iter().any(|a| a.path == child_path);
        if !already_joined {
            let join = match (&relation.kind, &relation.junction) {
                (RelationKind::ManyToMany, Some(junction)) => {
                    let jt_alias = self
                        .dialect
                        .fit_identifier(&format!("{child_logical}__jt"));
                    format!(
                        " LEFT JOIN {} AS {jt_alias} ON {jt_alias}.{} = {}.{} LEFT JOIN {} AS {child_alias} ON {child_alias}.{} = {jt_alias}.{}",
                        junction.table,
                        junction.this_column,
                        scope.alias,
                        relation.this_column,
                        other.name,
                        relation.other_column,
                        junction.other_column,
                    )
                }
                (RelationKind::ManyToMany, None) => {
                    return Err(Error::Invariant(format!(
                        "many-to-many relationship {name} has no junction table"
                    )));
                }
                _ => format!(
                    " LEFT JOIN {} AS {child_alias} ON {child_alias}.{} = {}.{}",
                    other.name, relation.other_column, scope.alias, relation.this_column,
                ),
            };
            plan.joins.push(join);
            self.push_items(plan, other, &child_logical, &child_alias, &child_path);
            plan.attachments.push(Attachment {
                path: child_path.clone(),
                relation: relation.clone(),
                table: other.name.clone(),
            });
            if relation.is_to_many() {
                plan.has_fanout_join = true;
            }
        }

        // Ordering requested on the joined table follows the root's entries.
        if let Some(node) = nested.root_node() {
            for spec in &node.order_by {
                if let Some(entry) = self.resolve_order(spec, other, &child_alias)? {
                    plan.order_by.push(entry);
                }
            }
        }

        let child_scope = Scope {
            table: other,
            alias: child_alias,
            logical: child_logical,
            path: child_path,
            filter_only: false,
        };
        self.compile_criteria(nested, &child_scope, plan)
    }

    fn try_fk_shortcut(
        &self,
        relation: &RelationDef,
        nested: &Criteria,
        other: &TableDef,
        scope: &Scope<'_>,
        plan: &mut SelectPlan,
    ) -> Option<String> {
        if !relation.fk_on_this_side() || relation.other_column != other.primary_key {
            return None;
        }
        let node = match nested {
            Criteria::Node(node) => node,
            Criteria::Group(_) => return None,
        };
        if node.load || node.load_separately || node.constraints.len() != 1 {
            return None;
        }
        let key_property = other.property_for_column(&other.primary_key)?;
        match &node.constraints[0] {
            (name, Constraint::Equals(value)) if name == key_property => {
                plan.params.push(value.clone());
                Some(format!("{}.{} = ?", scope.alias, relation.this_column))
            }
            _ => None,
        }
    }

    /// Correlated EXISTS filter: narrows the root set by a relationship's
    /// fields without attaching the related data.
    fn compile_exists(
        &self,
        name: &str,
        relation: &RelationDef,
        nested: &Criteria,
        other: &TableDef,
        scope: &Scope<'_>,
        plan: &mut SelectPlan,
    ) -> Result<Option<String>, Error> {
        let x_logical = format!("{}__{name}__x", scope.logical);
        let x_alias = self.dialect.fit_identifier(&x_logical);
        let x_scope = Scope {
            table: other,
            alias: x_alias.clone(),
            logical: x_logical,
            path: scope.path.clone(),
            filter_only: true,
        };
        let inner = self.compile_criteria(nested, &x_scope, plan)?;
        if inner.is_none() && nested.root_node().map(|n| n.constraints.is_empty()).unwrap_or(false)
        {
            // An empty nested object constrains nothing.
            return Ok(None);
        }
        let inner_clause = inner.map(|f| format!(" AND ({f})")).unwrap_or_default();

        let sql = match (&relation.kind, &relation.junction) {
            (RelationKind::ManyToMany, Some(junction)) => {
                let j_alias = self
                    .dialect
                    .fit_identifier(&format!("{}__{name}__jx", scope.logical));
                format!(
                    "EXISTS (SELECT 1 FROM {} AS {j_alias} JOIN {} AS {x_alias} ON {x_alias}.{} = {j_alias}.{} WHERE {j_alias}.{} = {}.{}{inner_clause})",
                    junction.table,
                    other.name,
                    relation.other_column,
                    junction.other_column,
                    junction.this_column,
                    scope.alias,
                    relation.this_column,
                )
            }
            (RelationKind::ManyToMany, None) => {
                return Err(Error::Invariant(format!(
                    "many-to-many relationship {name} has no junction table"
                )));
            }
            _ => format!(
                "EXISTS (SELECT 1 FROM {} AS {x_alias} WHERE {x_alias}.{} = {}.{}{inner_clause})",
                other.name, relation.other_column, scope.alias, relation.this_column,
            ),
        };
        Ok(Some(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableDef;
    use relmap_proto::CriteriaNode;

    fn schema() -> Schema {
        let mut schema = Schema::new();
        schema
            .add_table(
                TableDef::new("user", "id")
                    .with_generated_id()
                    .with_column("id", "id")
                    .with_column("name", "name")
                    .with_relationship("posts", RelationDef::one_to_many("id", "post", "author_id"))
                    .with_relationship(
                        "tags",
                        RelationDef::many_to_many("id", "tag", "id", "user_tag", "user_id", "tag_id"),
                    ),
            )
            .unwrap();
        schema
            .add_table(
                TableDef::new("post", "id")
                    .with_generated_id()
                    .with_column("id", "id")
                    .with_column("title", "title")
                    .with_column("author_id", "authorId")
                    .with_relationship("author", RelationDef::many_to_one("author_id", "user", "id")),
            )
            .unwrap();
        schema
            .add_table(
                TableDef::new("tag", "id")
                    .with_generated_id()
                    .with_column("id", "id")
                    .with_column("label", "label"),
            )
            .unwrap();
        schema
    }

    fn compile(table: &str, criteria: Criteria) -> SelectPlan {
        let schema = schema();
        Compiler::new(&schema, Dialect::MySql)
            .compile(table, &criteria)
            .unwrap()
    }

    #[test]
    fn test_flat_equality() {
        let plan = compile("user", Criteria::Node(CriteriaNode::new().with_eq("name", "a")));
        assert_eq!(
            plan.to_sql(),
            "SELECT user.id AS user__id, user.name AS user__name FROM user AS user WHERE user.name = ?"
        );
        assert_eq!(plan.params, vec![Value::Text("a".into())]);
    }

    #[test]
    fn test_null_constraint_renders_is_null() {
        let plan = compile(
            "user",
            Criteria::Node(CriteriaNode::new().with_eq("name", Value::Null)),
        );
        assert!(plan.to_sql().ends_with("WHERE user.name IS NULL"));
        assert!(plan.params.is_empty());
    }

    #[test]
    fn test_eager_join_to_one() {
        let plan = compile(
            "post",
            Criteria::Node(CriteriaNode::new().with_nested(
                "author",
                Criteria::Node(CriteriaNode::new().loaded().with_eq("name", "a")),
            )),
        );
        let sql = plan.to_sql();
        assert!(sql.contains(
            "LEFT JOIN user AS post__author ON post__author.id = post.author_id"
        ));
        assert!(sql.ends_with("WHERE post__author.name = ?"));
        assert_eq!(plan.attachments.len(), 1);
        assert_eq!(plan.attachments[0].path, vec!["author".to_string()]);
        assert!(!plan.has_fanout_join);
    }

    #[test]
    fn test_eager_join_many_to_many() {
        let plan = compile(
            "user",
            Criteria::Node(
                CriteriaNode::new().with_nested("tags", Criteria::Node(CriteriaNode::new().loaded())),
            ),
        );
        let sql = plan.to_sql();
        assert!(sql.contains(
            "LEFT JOIN user_tag AS user__tags__jt ON user__tags__jt.user_id = user.id"
        ));
        assert!(sql.contains(
            "LEFT JOIN tag AS user__tags ON user__tags.id = user__tags__jt.tag_id"
        ));
        assert!(plan.has_fanout_join);
    }

    #[test]
    fn test_relationship_filter_without_load_uses_exists() {
        let plan = compile(
            "user",
            Criteria::Node(CriteriaNode::new().with_nested(
                "posts",
                Criteria::Node(CriteriaNode::new().with_eq("title", "t")),
            )),
        );
        let sql = plan.to_sql();
        assert!(sql.contains(
            "WHERE EXISTS (SELECT 1 FROM post AS user__posts__x WHERE user__posts__x.author_id = user.id AND (user__posts__x.title = ?))"
        ));
        assert!(plan.attachments.is_empty());
        assert!(plan.joins.is_empty());
    }

    #[test]
    fn test_fk_shortcut_skips_join() {
        let plan = compile(
            "post",
            Criteria::Node(CriteriaNode::new().with_nested(
                "author",
                Criteria::Node(CriteriaNode::new().with_eq("id", 5i64)),
            )),
        );
        let sql = plan.to_sql();
        assert!(sql.ends_with("WHERE post.author_id = ?"));
        assert!(plan.joins.is_empty());
        assert_eq!(plan.params, vec![Value::Int(5)]);
    }

    #[test]
    fn test_bare_scalar_on_relationship_hits_fk() {
        let plan = compile(
            "post",
            Criteria::Node(CriteriaNode::new().with_eq("author", 7i64)),
        );
        assert!(plan.to_sql().ends_with("WHERE post.author_id = ?"));
    }

    #[test]
    fn test_group_combination_keeps_left_to_right_grouping() {
        let criteria = Criteria::parse(&serde_json::json!([
            {"name": "a"},
            "AND",
            {"name": "b"},
            "OR",
            {"name": "c"}
        ]))
        .unwrap();
        let plan = compile("user", criteria);
        assert!(plan.to_sql().ends_with(
            "WHERE ((user.name = ?) AND (user.name = ?)) OR (user.name = ?)"
        ));
        assert_eq!(plan.params.len(), 3);
    }

    #[test]
    fn test_order_limit_offset() {
        let plan = compile(
            "user",
            Criteria::Node(
                CriteriaNode::new()
                    .with_order(relmap_proto::OrderSpec::desc("name"))
                    .with_limit(2)
                    .with_offset(1),
            ),
        );
        assert!(plan
            .to_sql()
            .ends_with("ORDER BY user.name DESC LIMIT 2 OFFSET 1"));
    }

    #[test]
    fn test_paging_with_fanout_wraps_root_keys() {
        let plan = compile(
            "user",
            Criteria::Node(
                CriteriaNode::new()
                    .with_nested("posts", Criteria::Node(CriteriaNode::new().loaded()))
                    .with_limit(2),
            ),
        );
        let sql = plan.to_sql();
        assert!(sql.contains("WHERE user.id IN (SELECT pk FROM (SELECT DISTINCT user.id AS pk"));
        assert!(sql.contains("LIMIT 2) AS user__page)"));
    }

    #[test]
    fn test_paged_fanout_keeps_joined_predicate_in_outer_query() {
        let plan = compile(
            "user",
            Criteria::Node(
                CriteriaNode::new()
                    .with_nested(
                        "posts",
                        Criteria::Node(CriteriaNode::new().loaded().with_eq("title", "x")),
                    )
                    .with_limit(2),
            ),
        );
        let (sql, params) = plan.statement();
        // The joined-table predicate restricts attached children, not just
        // the key subselect that picks the page of roots.
        let outer = sql.split("IN (SELECT pk FROM").next().unwrap();
        assert!(outer.contains("WHERE (user__posts.title = ?) AND user.id"));
        assert!(sql.contains("WHERE user__posts.title = ? LIMIT 2) AS user__page"));
        assert_eq!(
            params,
            vec![Value::Text("x".into()), Value::Text("x".into())]
        );
    }

    #[test]
    fn test_load_separately_emits_no_join() {
        let plan = compile(
            "user",
            Criteria::Node(CriteriaNode::new().with_nested(
                "posts",
                Criteria::Node(CriteriaNode::new().loaded_separately()),
            )),
        );
        assert!(plan.joins.is_empty());
        assert_eq!(plan.separate.len(), 1);
        assert_eq!(plan.separate[0].name, "posts");
        assert_eq!(plan.separate[0].parent_table, "user");
    }

    #[test]
    fn test_strict_unknown_property_fails() {
        let schema = schema();
        let compiler = Compiler::new(&schema, Dialect::MySql);
        let criteria = Criteria::Node(CriteriaNode::new().with_eq("ghost", 1i64));
        assert!(matches!(
            compiler.compile("user", &criteria),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_lenient_unknown_property_skipped() {
        let schema = schema();
        let compiler =
            Compiler::with_options(&schema, Dialect::MySql, CompileOptions { strict: false });
        let criteria = Criteria::Node(CriteriaNode::new().with_eq("ghost", 1i64));
        let plan = compiler.compile("user", &criteria).unwrap();
        assert!(plan.where_sql.is_empty());
    }

    #[test]
    fn test_postgres_placeholders_and_long_aliases() {
        let mut schema = Schema::new();
        let long_a = "a".repeat(63);
        let long_b = "b".repeat(63);
        schema
            .add_table(
                TableDef::new(long_a.clone(), "id")
                    .with_generated_id()
                    .with_column("id", "id")
                    .with_relationship(
                        "other",
                        RelationDef::many_to_one("other_id", long_b.clone(), "id"),
                    )
                    .with_column("other_id", "otherId"),
            )
            .unwrap();
        schema
            .add_table(
                TableDef::new(long_b.clone(), "id")
                    .with_generated_id()
                    .with_column("id", "id"),
            )
            .unwrap();

        let compiler = Compiler::new(&schema, Dialect::Postgres);
        let criteria = Criteria::Node(CriteriaNode::new().with_nested(
            "other",
            Criteria::Node(CriteriaNode::new().loaded()),
        ));
        let plan = compiler.compile(&long_a, &criteria).unwrap();
        let sql = Dialect::Postgres.finalize_sql(&plan.to_sql());

        // Root table names at the limit survive; derived aliases shrink.
        assert!(sql.contains(&format!("FROM {long_a} AS {long_a}")));
        let join_alias = Dialect::Postgres.fit_identifier(&format!("{long_a}__other"));
        assert_eq!(join_alias.len(), 63);
        assert!(sql.contains(&format!("LEFT JOIN {long_b} AS {join_alias}")));
    }
}
