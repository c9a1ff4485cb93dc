//! Per-field condition converters
//!
//! A dispatch table from public field name to the rule that turns a search
//! filter into a where-condition. Fields without an entry go through
//! [`default_converter`], which applies the general null, array, wildcard
//! and negation semantics.

use chrono::{DateTime, Utc};
use sift_ast::{FilterOp, ParsedValue, SearchFilter, SearchValue};
use sift_ir::{ColumnKind, Condition, ConditionNode, Expr, InvalidQuery, Op, QueryError, Value};
use sift_registry::{FieldResolver, ResolvedField};
use tracing::debug;

use crate::aliases::FieldAliasResolver;

mod fields;
mod release;

pub use fields::{status_code, status_name, TRANSACTION_STATUSES};

/// Converts one filter on a known field into a condition tree.
pub type Converter = fn(&SearchFilter, &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError>;

const CONVERTERS: &[(&str, Converter)] = &[
    ("environment", fields::environment),
    ("message", fields::message),
    ("transaction.status", fields::transaction_status),
    ("issue", fields::issue),
    ("issue.id", fields::issue),
    ("project", fields::project),
    ("project.name", fields::project),
    ("id", fields::event_id),
    ("trace", fields::trace_id),
    ("trace.span", fields::span_id),
    ("trace.parent_span", fields::span_id),
    ("error.handled", fields::error_handled),
    ("error.unhandled", fields::error_unhandled),
    ("team_key_transaction", fields::team_key_transaction),
    ("release", release::release),
    ("release.version", release::release_version),
    ("release.package", release::release_package),
    ("release.build", release::release_build),
    ("release.stage", release::release_stage),
];

fn find_converter(name: &str) -> Option<Converter> {
    CONVERTERS
        .iter()
        .find(|(field, _)| *field == name)
        .map(|(_, converter)| *converter)
}

/// Convert a row-level filter. Explicit `tags[...]` keys always use the
/// default rules, even when the tag shares a name with a special field.
pub fn convert_filter(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    let converter = if filter.key.is_tag {
        None
    } else {
        find_converter(&filter.key.name)
    };
    debug!(
        field = %filter.key.field(),
        operator = filter.operator.as_str(),
        special = converter.is_some(),
        "Converting filter"
    );
    match converter {
        Some(convert) => convert(filter, resolver),
        None => default_converter(filter, resolver),
    }
}

/// General rules for any column, tag, measurement or alias.
pub fn default_converter(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    let name = filter.key.field();
    let field = resolver.resolve_field(&name)?;
    let negated = filter.is_negation();

    if is_has_filter(filter) {
        return Ok(has_condition(&field, filter.operator == FilterOp::Neq));
    }

    if field.kind.is_some_and(ColumnKind::is_array) {
        return array_condition(&name, &field, filter);
    }

    let leaf = if filter.value.is_wildcard() {
        wildcard_condition(&name, &field, filter)?
    } else {
        let value = convert_value(&name, field.kind, &filter.value)?;
        ConditionNode::Leaf(Condition::new(field.expr.clone(), filter.operator.to_ir(), value))
    };

    if negated && field.nullable && !field.is_tag {
        return Ok(ConditionNode::or(leaf, is_null(&field.expr)));
    }
    Ok(leaf)
}

/// `has:field` arrives as `field != ""`, `!has:field` as `field = ""`.
pub(crate) fn is_has_filter(filter: &SearchFilter) -> bool {
    filter.value.is_empty() && matches!(filter.operator, FilterOp::Eq | FilterOp::Neq)
}

/// Field-is-set test, polymorphic over the column's shape.
pub(crate) fn has_condition(field: &ResolvedField, is_set: bool) -> ConditionNode {
    let condition = match field.kind {
        Some(kind) if kind.is_array() => Condition::new(
            Expr::call("notEmpty", vec![field.expr.without_alias()]),
            Op::Eq,
            if is_set { 1i64 } else { 0i64 },
        ),
        Some(ColumnKind::String) | Some(ColumnKind::Uuid) | None if !field.nullable && !field.is_tag => {
            Condition::new(field.expr.clone(), if is_set { Op::Neq } else { Op::Eq }, "")
        }
        _ => Condition::unary(field.expr.clone(), if is_set { Op::IsNotNull } else { Op::IsNull }),
    };
    ConditionNode::Leaf(condition)
}

pub(crate) fn is_null(expr: &Expr) -> ConditionNode {
    ConditionNode::Leaf(Condition::unary(expr.clone(), Op::IsNull))
}

pub(crate) fn is_not_null(expr: &Expr) -> ConditionNode {
    ConditionNode::Leaf(Condition::unary(expr.clone(), Op::IsNotNull))
}

fn array_condition(name: &str, field: &ResolvedField, filter: &SearchFilter) -> Result<ConditionNode, QueryError> {
    let column = field.expr.without_alias();
    let matched = if filter.operator.is_negation() { 0i64 } else { 1i64 };

    if filter.value.is_wildcard() {
        if filter.is_in_filter() {
            return Err(QueryError::NotImplemented(format!(
                "{}: wildcards are not supported inside a list",
                name
            )));
        }
        if !filter.operator.is_equality() {
            return Err(invalid_operator(name, filter.operator));
        }
        let sql = format!(
            "arrayExists(x -> match(x, {}), {})",
            Value::from(wildcard_pattern(&filter.value.raw)),
            column
        );
        return Ok(ConditionNode::Leaf(Condition::new(
            Expr::Raw { sql, alias: None },
            Op::Eq,
            matched,
        )));
    }

    let lhs = match filter.operator {
        FilterOp::Eq | FilterOp::Neq => Expr::call("has", vec![column, Expr::literal(filter.value.raw.as_str())]),
        FilterOp::In | FilterOp::NotIn => Expr::call(
            "hasAny",
            vec![column, Expr::literal(Value::from(filter.value.items()))],
        ),
        other => return Err(invalid_operator(name, other)),
    };
    Ok(ConditionNode::Leaf(Condition::new(lhs, Op::Eq, matched)))
}

fn wildcard_condition(name: &str, field: &ResolvedField, filter: &SearchFilter) -> Result<ConditionNode, QueryError> {
    if filter.is_in_filter() {
        return Err(QueryError::NotImplemented(format!(
            "{}: wildcards are not supported inside a list",
            name
        )));
    }
    if !filter.operator.is_equality() {
        return Err(invalid_operator(name, filter.operator));
    }
    if field.kind.is_some_and(|kind| kind.is_numeric() || kind == ColumnKind::Date) {
        return Err(invalid_value(name, &filter.value.raw));
    }
    let lhs = Expr::call(
        "match",
        vec![field.expr.without_alias(), Expr::literal(wildcard_pattern(&filter.value.raw))],
    );
    let matched = if filter.operator.is_negation() { 0i64 } else { 1i64 };
    Ok(ConditionNode::Leaf(Condition::new(lhs, Op::Eq, matched)))
}

/// Case-insensitive anchored regex for a `*` wildcard value. `\*` is a literal star.
pub fn wildcard_pattern(raw: &str) -> String {
    let mut pattern = String::from("(?i)^");
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*"),
            '\\' => {
                let escaped = chars.next().unwrap_or('\\');
                pattern.push_str(&regex::escape(&escaped.to_string()));
            }
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    pattern
}

/// Typed literal for a filter value against a column of the given kind.
pub(crate) fn convert_value(name: &str, kind: Option<ColumnKind>, value: &SearchValue) -> Result<Value, QueryError> {
    if let ParsedValue::List(items) = &value.parsed {
        let converted = items
            .iter()
            .map(|item| scalar_value(name, kind, &sift_ast::parse_plain_value(item), item))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Array(converted));
    }
    scalar_value(name, kind, value, &value.raw)
}

fn scalar_value(name: &str, kind: Option<ColumnKind>, value: &SearchValue, raw: &str) -> Result<Value, QueryError> {
    match kind {
        Some(ColumnKind::Integer) => match value.as_number() {
            Some(n) if n.fract() == 0.0 => Ok(Value::Int(n as i64)),
            _ => Err(invalid_value(name, raw)),
        },
        Some(ColumnKind::Number) | Some(ColumnKind::Duration) => value
            .as_number()
            .map(number_value)
            .ok_or_else(|| invalid_value(name, raw)),
        Some(ColumnKind::Date) => match &value.parsed {
            ParsedValue::Date(date) => Ok(date_value(date)),
            _ => Err(invalid_value(name, raw)),
        },
        Some(ColumnKind::Boolean) => parse_bool(raw)
            .map(|b| Value::Int(b as i64))
            .ok_or_else(|| invalid_value(name, raw)),
        Some(ColumnKind::String) | Some(ColumnKind::Uuid) | Some(ColumnKind::StringArray) | None => {
            Ok(Value::from(raw))
        }
    }
}

/// Integral values stay integers.
pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::Int(n as i64)
    } else {
        Value::Float(n)
    }
}

pub fn date_value(date: &DateTime<Utc>) -> Value {
    Value::String(date.format("%Y-%m-%dT%H:%M:%S").to_string())
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// `=`/`IN` for one or many values, `!=`/`NOT IN` when negated.
pub(crate) fn membership(expr: Expr, values: Vec<Value>, negated: bool) -> ConditionNode {
    let condition = match <[Value; 1]>::try_from(values) {
        Ok([value]) => Condition::new(expr, if negated { Op::Neq } else { Op::Eq }, value),
        Err(values) => Condition::new(expr, if negated { Op::NotIn } else { Op::In }, Value::Array(values)),
    };
    ConditionNode::Leaf(condition)
}

/// Fields that only support `=`, `!=` and lists.
pub(crate) fn require_equality(name: &str, filter: &SearchFilter) -> Result<(), QueryError> {
    if filter.operator.is_equality() {
        Ok(())
    } else {
        Err(invalid_operator(name, filter.operator))
    }
}

pub(crate) fn invalid_operator(field: &str, operator: FilterOp) -> QueryError {
    InvalidQuery::InvalidOperator {
        field: field.to_string(),
        operator: operator.as_str().to_string(),
    }
    .into()
}

pub(crate) fn invalid_value(field: &str, value: &str) -> QueryError {
    InvalidQuery::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::Limits;
    use sift_ast::{parse, ParsedTerm};
    use sift_ir::{RequestParams, Schema, WhereCondition};

    fn convert(query: &str) -> Result<String, QueryError> {
        let schema = Schema::events();
        let params = RequestParams {
            project_ids: vec![1],
            ..Default::default()
        };
        let catalog = InMemoryCatalog::new();
        let resolver = FieldAliasResolver::new(&schema, &params, &catalog, Limits::default());
        let filter = match parse(query).unwrap().remove(0) {
            ParsedTerm::Filter(filter) => filter,
            other => panic!("expected a filter, got {:?}", other),
        };
        let node = convert_filter(&filter, &resolver)?;
        Ok(node
            .flatten()
            .iter()
            .map(WhereCondition::to_string)
            .collect::<Vec<_>>()
            .join(" AND "))
    }

    #[test]
    fn test_plain_string() {
        assert_eq!(convert("transaction:/api/0").unwrap(), "transaction_name = '/api/0'");
    }

    #[test]
    fn test_negated_nullable_adds_null_check() {
        assert_eq!(
            convert("!user.email:a@b.com").unwrap(),
            "(user_email != 'a@b.com' OR user_email IS NULL)"
        );
        // Tags are never ORed with a null check.
        assert_eq!(convert("!browser:chrome").unwrap(), "tags[browser] != 'chrome'");
    }

    #[test]
    fn test_has_is_polymorphic() {
        assert_eq!(convert("has:user.email").unwrap(), "user_email IS NOT NULL");
        assert_eq!(convert("!has:browser").unwrap(), "tags[browser] IS NULL");
        assert_eq!(convert("has:title").unwrap(), "title != ''");
        assert_eq!(convert("has:error.type").unwrap(), "notEmpty(exception_stacks.type) = 1");
        assert_eq!(convert("!has:error.type").unwrap(), "notEmpty(exception_stacks.type) = 0");
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(
            convert("transaction:/api/*").unwrap(),
            "match(transaction_name, '(?i)^/api/.*$') = 1"
        );
        assert_eq!(
            convert("!title:*timeout*").unwrap(),
            "match(title, '(?i)^.*timeout.*$') = 0"
        );
        assert!(matches!(
            convert("title:[a*, b]").unwrap_err(),
            QueryError::NotImplemented(_)
        ));
    }

    #[test]
    fn test_wildcard_pattern_escapes() {
        assert_eq!(wildcard_pattern("a.b*"), "(?i)^a\\.b.*$");
        assert_eq!(wildcard_pattern("a\\*b"), "(?i)^a\\*b$");
    }

    #[test]
    fn test_array_columns() {
        assert_eq!(
            convert("error.type:ValueError").unwrap(),
            "has(exception_stacks.type, 'ValueError') = 1"
        );
        assert_eq!(
            convert("!error.type:[A, B]").unwrap(),
            "hasAny(exception_stacks.type, ['A', 'B']) = 0"
        );
        assert_eq!(
            convert("stack.filename:*.py").unwrap(),
            "arrayExists(x -> match(x, '(?i)^.*\\\\.py$'), exception_frames.filename) = 1"
        );
        assert!(convert("error.type:>a").is_err());
    }

    #[test]
    fn test_typed_values() {
        assert_eq!(convert("transaction.duration:>1.5s").unwrap(), "duration > 1500");
        assert_eq!(convert("measurements.cls:>0.25").unwrap(), "measurements[cls] > 0.25");
        assert_eq!(
            convert("timestamp:>2024-01-01T00:00:00").unwrap(),
            "timestamp > '2024-01-01T00:00:00'"
        );
        let err = convert("project.id:abc").unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidSearchQuery(InvalidQuery::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_alias_field() {
        assert_eq!(
            convert("user.display:bob").unwrap(),
            "coalesce(user_email, user_name, user_id, ip_address) = 'bob'"
        );
    }

    #[test]
    fn test_membership() {
        let single = membership(Expr::column("a"), vec![Value::Int(1)], false);
        assert_eq!(single.flatten()[0].to_string(), "a = 1");
        let many = membership(Expr::column("a"), vec![Value::Int(1), Value::Int(2)], true);
        assert_eq!(many.flatten()[0].to_string(), "a NOT IN [1, 2]");
    }
}
