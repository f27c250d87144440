//! Compiled select plans.
//!
//! A [`SelectPlan`] is the criteria compiler's output: select items with
//! reassembly metadata, join clauses, a rendered WHERE tree with ordered
//! parameters, ordering/paging, and the relationship attachments the load
//! engine materializes afterwards.

use relmap_proto::{Criteria, OrderDirection, Value};

use crate::dialect::Dialect;
use crate::schema::RelationDef;

/// One column in the select list, tagged with the relationship path it
/// reassembles into.
#[derive(Debug, Clone)]
pub struct SelectItem {
    /// Relationship path from the root; empty for root columns.
    pub path: Vec<String>,
    /// Physical column name.
    pub column: String,
    /// Qualified source expression (`alias.column`).
    pub expr: String,
    /// Unique, dialect-fitted output label.
    pub label: String,
}

/// An eager-join attachment (`@load`).
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Relationship path from the root (last element is the name).
    pub path: Vec<String>,
    /// Relationship definition.
    pub relation: RelationDef,
    /// Joined table name.
    pub table: String,
}

/// A secondary-query attachment (`@loadSeparately`).
#[derive(Debug, Clone)]
pub struct SeparateLoad {
    /// Path of the parent the attachment hangs off; empty for the root.
    pub parent_path: Vec<String>,
    /// Table the parent rows belong to.
    pub parent_table: String,
    /// Relationship name.
    pub name: String,
    /// Relationship definition.
    pub relation: RelationDef,
    /// Criteria subtree applied to the related rows.
    pub criteria: Criteria,
}

/// A compiled predicate/join plan for one root table.
#[derive(Debug, Clone)]
pub struct SelectPlan {
    /// Target dialect.
    pub dialect: Dialect,
    /// Root table name.
    pub table: String,
    /// Fitted root alias.
    pub root_alias: String,
    /// Select list with reassembly metadata.
    pub items: Vec<SelectItem>,
    /// Join clause fragments, each starting with a space.
    pub joins: Vec<String>,
    /// WHERE expression without the keyword; empty when unconstrained.
    pub where_sql: String,
    /// Ordered statement parameters.
    pub params: Vec<Value>,
    /// ORDER BY entries as (qualified expression, direction).
    pub order_by: Vec<(String, OrderDirection)>,
    /// Root-row limit.
    pub limit: Option<u64>,
    /// Root-row offset.
    pub offset: Option<u64>,
    /// Whether any eager join can fan out (to-many).
    pub has_fanout_join: bool,
    /// Eager attachments in parent-before-child order.
    pub attachments: Vec<Attachment>,
    /// Secondary-query attachments.
    pub separate: Vec<SeparateLoad>,
    /// Label of the root primary-key item.
    pub root_pk_label: String,
}

impl SelectPlan {
    /// AND an extra fragment onto the WHERE tree.
    pub fn and_where(&mut self, fragment: &str) {
        if self.where_sql.is_empty() {
            self.where_sql = fragment.to_string();
        } else {
            self.where_sql = format!("({}) AND ({})", self.where_sql, fragment);
        }
    }

    /// Constrain a qualified column to a value set. Callers must skip the
    /// query entirely for an empty set; `IN ()` is not valid SQL.
    pub fn push_in_filter(&mut self, expr: &str, values: &[Value]) {
        debug_assert!(!values.is_empty());
        let placeholders = vec!["?"; values.len()].join(", ");
        self.and_where(&format!("{expr} IN ({placeholders})"));
        self.params.extend(values.iter().cloned());
    }

    /// The abstract SQL text and the positional parameters matching it.
    ///
    /// In the paged fan-out form the WHERE tree appears twice, so its
    /// parameters repeat in text order.
    pub fn statement(&self) -> (String, Vec<Value>) {
        let sql = self.to_sql();
        let paged = self.limit.is_some() || self.offset.is_some();
        let mut params = self.params.clone();
        if paged && self.has_fanout_join && !self.where_sql.is_empty() {
            params.extend(self.params.iter().cloned());
        }
        (sql, params)
    }

    /// Render the abstract (`?`-placeholder) SQL text.
    ///
    /// When paging coexists with a fan-out join, the root set is restricted
    /// first through a derived-table subselect on the primary key, so
    /// `@limit`/`@offset` count root rows rather than joined rows.
    pub fn to_sql(&self) -> String {
        let select_list = self
            .items
            .iter()
            .map(|i| format!("{} AS {}", i.expr, i.label))
            .collect::<Vec<_>>()
            .join(", ");
        let joins: String = self.joins.concat();
        let order_clause = self.order_clause();

        let paged = self.limit.is_some() || self.offset.is_some();
        if paged && self.has_fanout_join {
            let page = self.page_subselect();
            let pk_expr = format!("{}.{}", self.root_alias, self.root_pk_column());
            let page_alias = self
                .dialect
                .fit_identifier(&format!("{}__page", self.table));
            // The WHERE tree renders twice: the key subselect needs it so
            // paging counts filtered roots, and the outer query needs it so
            // joined-table predicates still restrict which children attach.
            let outer_where = if self.where_sql.is_empty() {
                String::new()
            } else {
                format!("({}) AND ", self.where_sql)
            };
            return format!(
                "SELECT {select_list} FROM {} AS {}{joins} WHERE {outer_where}{pk_expr} IN (SELECT pk FROM ({page}) AS {page_alias}){order_clause}",
                self.table, self.root_alias
            );
        }

        let where_clause = if self.where_sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.where_sql)
        };
        format!(
            "SELECT {select_list} FROM {} AS {}{joins}{where_clause}{order_clause}{}",
            self.table,
            self.root_alias,
            self.paging_clause()
        )
    }

    /// The root primary-key column, recovered from the pk select item.
    fn root_pk_column(&self) -> &str {
        self.items
            .iter()
            .find(|i| i.label == self.root_pk_label)
            .map(|i| i.column.as_str())
            .unwrap_or_default()
    }

    fn order_clause(&self) -> String {
        if self.order_by.is_empty() {
            return String::new();
        }
        let entries = self
            .order_by
            .iter()
            .map(|(expr, dir)| {
                let dir = match dir {
                    OrderDirection::Asc => "ASC",
                    OrderDirection::Desc => "DESC",
                };
                format!("{expr} {dir}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(" ORDER BY {entries}")
    }

    fn paging_clause(&self) -> String {
        let mut out = String::new();
        match (self.limit, self.offset, self.dialect) {
            // MySQL has no standalone OFFSET.
            (None, Some(offset), Dialect::MySql) => {
                out.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {offset}"));
            }
            (limit, offset, _) => {
                if let Some(limit) = limit {
                    out.push_str(&format!(" LIMIT {limit}"));
                }
                if let Some(offset) = offset {
                    out.push_str(&format!(" OFFSET {offset}"));
                }
            }
        }
        out
    }

    /// Derived-table subselect yielding the paged root primary keys.
    ///
    /// Ordering columns join the select list because DISTINCT requires
    /// them there; the outer query re-applies the same ordering.
    fn page_subselect(&self) -> String {
        let pk_expr = format!("{}.{}", self.root_alias, self.root_pk_column());
        let mut select = format!("{pk_expr} AS pk");
        let mut order = Vec::new();
        for (i, (expr, dir)) in self.order_by.iter().enumerate() {
            select.push_str(&format!(", {expr} AS ord{i}"));
            let dir = match dir {
                OrderDirection::Asc => "ASC",
                OrderDirection::Desc => "DESC",
            };
            order.push(format!("ord{i} {dir}"));
        }
        let order_clause = if order.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", order.join(", "))
        };
        let where_clause = if self.where_sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.where_sql)
        };
        let joins: String = self.joins.concat();
        format!(
            "SELECT DISTINCT {select} FROM {} AS {}{joins}{where_clause}{order_clause}{}",
            self.table,
            self.root_alias,
            self.paging_clause()
        )
    }
}
