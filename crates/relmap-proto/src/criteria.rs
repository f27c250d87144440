//! Criteria IR and parser.
//!
//! Criteria arrive as JSON-like values: an object maps property and
//! relationship names to scalar constraints or nested criteria, with
//! reserved directive keys prefixed by `@`; an array alternates criteria
//! objects with the literal tokens `"AND"` / `"OR"`, combined left to
//! right. Parsing happens once, into the tagged [`Criteria`] variant, so
//! the compiler never re-inspects raw keys.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// Logical connective between adjacent group members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicOp {
    /// Both sides must match.
    And,
    /// Either side may match.
    Or,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order (the default).
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// One `@orderBy` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Property to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Ascending order on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Descending order on a field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Constraint attached to a property or relationship name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Scalar equality (`Value::Null` means IS NULL).
    Equals(Value),
    /// Nested criteria under a relationship name.
    Nested(Criteria),
}

/// A single criteria object: named constraints plus directives.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CriteriaNode {
    /// Property/relationship constraints in source order.
    pub constraints: Vec<(String, Constraint)>,
    /// `@load`: attach the relationship through an eager join.
    pub load: bool,
    /// `@loadSeparately`: attach the relationship through a secondary query.
    pub load_separately: bool,
    /// `@orderBy` entries.
    pub order_by: Vec<OrderSpec>,
    /// `@limit` on root rows.
    pub limit: Option<u64>,
    /// `@offset` on root rows.
    pub offset: Option<u64>,
}

impl CriteriaNode {
    /// An empty node matching every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality constraint.
    pub fn with_eq(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constraints
            .push((name.into(), Constraint::Equals(value.into())));
        self
    }

    /// Add a nested criteria under a relationship name.
    pub fn with_nested(mut self, name: impl Into<String>, nested: Criteria) -> Self {
        self.constraints
            .push((name.into(), Constraint::Nested(nested)));
        self
    }

    /// Mark for eager-join loading.
    pub fn loaded(mut self) -> Self {
        self.load = true;
        self
    }

    /// Mark for secondary-query loading.
    pub fn loaded_separately(mut self) -> Self {
        self.load_separately = true;
        self
    }

    /// Add an `@orderBy` entry.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set `@limit`.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set `@offset`.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Look up a constraint by name.
    pub fn constraint(&self, name: &str) -> Option<&Constraint> {
        self.constraints
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }
}

/// One member of a criteria group, with the connective joining it to the
/// accumulated left-hand side. The first member carries no connective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Connective to the left-hand side; `None` only on the first member.
    pub op: Option<LogicOp>,
    /// The member criteria.
    pub criteria: Criteria,
}

/// A parsed criteria value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Criteria {
    /// A single criteria object.
    Node(CriteriaNode),
    /// An AND/OR group combined left to right.
    Group(Vec<GroupEntry>),
}

impl Criteria {
    /// An empty criteria matching every row.
    pub fn empty() -> Self {
        Criteria::Node(CriteriaNode::new())
    }

    /// Parse a JSON-like criteria value.
    pub fn parse(json: &serde_json::Value) -> Result<Criteria, Error> {
        match json {
            serde_json::Value::Object(map) => Ok(Criteria::Node(parse_node(map)?)),
            serde_json::Value::Array(items) => parse_group(items),
            other => Err(Error::Malformed(format!(
                "expected object or array at criteria root, got {other}"
            ))),
        }
    }

    /// The root node, when this criteria is a plain object.
    pub fn as_node(&self) -> Option<&CriteriaNode> {
        match self {
            Criteria::Node(node) => Some(node),
            Criteria::Group(_) => None,
        }
    }

    /// Root-level directives: order/limit/offset of the first node found.
    ///
    /// For a group, paging and ordering directives are honored on the first
    /// member only; constraints of every member still apply.
    pub fn root_node(&self) -> Option<&CriteriaNode> {
        match self {
            Criteria::Node(node) => Some(node),
            Criteria::Group(entries) => entries.first().and_then(|e| e.criteria.root_node()),
        }
    }
}

fn parse_node(map: &serde_json::Map<String, serde_json::Value>) -> Result<CriteriaNode, Error> {
    let mut node = CriteriaNode::new();

    for (key, value) in map {
        if let Some(directive) = key.strip_prefix('@') {
            parse_directive(&mut node, directive, value)?;
            continue;
        }

        let constraint = match value {
            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                Constraint::Nested(Criteria::parse(value)?)
            }
            scalar => Constraint::Equals(
                Value::from_json(scalar)
                    .ok_or_else(|| Error::Malformed(format!("non-scalar constraint on {key}")))?,
            ),
        };
        node.constraints.push((key.clone(), constraint));
    }

    Ok(node)
}

fn parse_directive(
    node: &mut CriteriaNode,
    directive: &str,
    value: &serde_json::Value,
) -> Result<(), Error> {
    match directive {
        "load" => node.load = parse_flag(directive, value)?,
        "loadSeparately" => node.load_separately = parse_flag(directive, value)?,
        "orderBy" => match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    node.order_by.push(parse_order(item)?);
                }
            }
            single => node.order_by.push(parse_order(single)?),
        },
        "limit" => node.limit = Some(parse_count(directive, value)?),
        "offset" => node.offset = Some(parse_count(directive, value)?),
        other => return Err(Error::UnknownDirective(format!("@{other}"))),
    }
    Ok(())
}

fn parse_flag(directive: &str, value: &serde_json::Value) -> Result<bool, Error> {
    value
        .as_bool()
        .ok_or_else(|| Error::Malformed(format!("@{directive} expects a boolean")))
}

fn parse_count(directive: &str, value: &serde_json::Value) -> Result<u64, Error> {
    value
        .as_u64()
        .ok_or_else(|| Error::Malformed(format!("@{directive} expects a non-negative integer")))
}

fn parse_order(value: &serde_json::Value) -> Result<OrderSpec, Error> {
    let map = value
        .as_object()
        .ok_or_else(|| Error::Malformed("@orderBy expects {field, direction}".into()))?;
    let field = map
        .get("field")
        .and_then(|f| f.as_str())
        .ok_or_else(|| Error::Malformed("@orderBy entry is missing field".into()))?;
    let direction = match map.get("direction").and_then(|d| d.as_str()) {
        None => OrderDirection::Asc,
        Some(d) if d.eq_ignore_ascii_case("asc") => OrderDirection::Asc,
        Some(d) if d.eq_ignore_ascii_case("desc") => OrderDirection::Desc,
        Some(other) => {
            return Err(Error::Malformed(format!(
                "@orderBy direction must be ASC or DESC, got {other}"
            )))
        }
    };
    Ok(OrderSpec {
        field: field.to_string(),
        direction,
    })
}

fn parse_group(items: &[serde_json::Value]) -> Result<Criteria, Error> {
    let mut entries: Vec<GroupEntry> = Vec::new();
    let mut pending: Option<LogicOp> = None;

    for item in items {
        if let Some(token) = item.as_str() {
            let op = match token {
                "AND" => LogicOp::And,
                "OR" => LogicOp::Or,
                other => {
                    return Err(Error::Malformed(format!(
                        "expected AND or OR between criteria, got {other:?}"
                    )))
                }
            };
            if entries.is_empty() || pending.is_some() {
                return Err(Error::Malformed(
                    "AND/OR must sit between two criteria".into(),
                ));
            }
            pending = Some(op);
            continue;
        }

        let criteria = Criteria::parse(item)?;
        if !entries.is_empty() && pending.is_none() {
            return Err(Error::Malformed(
                "criteria group members must be joined by AND/OR".into(),
            ));
        }
        entries.push(GroupEntry {
            op: pending.take(),
            criteria,
        });
    }

    if pending.is_some() {
        return Err(Error::Malformed("dangling AND/OR at end of group".into()));
    }
    if entries.is_empty() {
        return Err(Error::Malformed("empty criteria group".into()));
    }

    Ok(Criteria::Group(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_object() {
        let json = serde_json::json!({"name": "Alice", "age": 30});
        let parsed = Criteria::parse(&json).unwrap();

        let node = parsed.as_node().unwrap();
        assert_eq!(node.constraints.len(), 2);
        assert_eq!(
            node.constraint("name"),
            Some(&Constraint::Equals(Value::Text("Alice".into())))
        );
        assert_eq!(
            node.constraint("age"),
            Some(&Constraint::Equals(Value::Int(30)))
        );
    }

    #[test]
    fn test_parse_directives() {
        let json = serde_json::json!({
            "@orderBy": {"field": "name", "direction": "DESC"},
            "@limit": 2,
            "@offset": 1
        });
        let parsed = Criteria::parse(&json).unwrap();
        let node = parsed.as_node().unwrap();

        assert_eq!(node.order_by, vec![OrderSpec::desc("name")]);
        assert_eq!(node.limit, Some(2));
        assert_eq!(node.offset, Some(1));
        assert!(node.constraints.is_empty());
    }

    #[test]
    fn test_parse_order_direction_defaults_asc() {
        let json = serde_json::json!({"@orderBy": {"field": "name"}});
        let parsed = Criteria::parse(&json).unwrap();
        let node = parsed.as_node().unwrap();
        assert_eq!(node.order_by, vec![OrderSpec::asc("name")]);
    }

    #[test]
    fn test_parse_nested_relationship() {
        let json = serde_json::json!({
            "author": {"@load": true, "name": "Alice"}
        });
        let parsed = Criteria::parse(&json).unwrap();
        let node = parsed.as_node().unwrap();

        match node.constraint("author").unwrap() {
            Constraint::Nested(Criteria::Node(nested)) => {
                assert!(nested.load);
                assert!(!nested.load_separately);
                assert_eq!(
                    nested.constraint("name"),
                    Some(&Constraint::Equals(Value::Text("Alice".into())))
                );
            }
            other => panic!("expected nested criteria, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_group() {
        let json = serde_json::json!([
            {"a": 1},
            "AND",
            {"b": 2},
            "OR",
            {"c": 3}
        ]);
        let parsed = Criteria::parse(&json).unwrap();

        match parsed {
            Criteria::Group(entries) => {
                assert_eq!(entries.len(), 3);
                assert_eq!(entries[0].op, None);
                assert_eq!(entries[1].op, Some(LogicOp::And));
                assert_eq!(entries[2].op, Some(LogicOp::Or));
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_group_rejects_adjacent_objects() {
        let json = serde_json::json!([{"a": 1}, {"b": 2}]);
        assert!(Criteria::parse(&json).is_err());
    }

    #[test]
    fn test_parse_group_rejects_dangling_op() {
        let json = serde_json::json!([{"a": 1}, "AND"]);
        assert!(Criteria::parse(&json).is_err());

        let json = serde_json::json!(["AND", {"a": 1}]);
        assert!(Criteria::parse(&json).is_err());
    }

    #[test]
    fn test_parse_unknown_directive_fails() {
        let json = serde_json::json!({"@explode": true});
        assert!(matches!(
            Criteria::parse(&json),
            Err(Error::UnknownDirective(_))
        ));
    }

    #[test]
    fn test_root_node_of_group() {
        let json = serde_json::json!([
            {"@limit": 5, "a": 1},
            "OR",
            {"b": 2}
        ]);
        let parsed = Criteria::parse(&json).unwrap();
        assert_eq!(parsed.root_node().unwrap().limit, Some(5));
    }

    #[test]
    fn test_builder() {
        let criteria = Criteria::Node(
            CriteriaNode::new()
                .with_eq("name", "Bob")
                .with_nested("posts", Criteria::Node(CriteriaNode::new().loaded()))
                .with_order(OrderSpec::asc("name"))
                .with_limit(10),
        );

        let node = criteria.as_node().unwrap();
        assert_eq!(node.constraints.len(), 2);
        assert_eq!(node.limit, Some(10));
    }
}
