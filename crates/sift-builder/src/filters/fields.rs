//! Converters for fields with their own null, empty or identity rules

use sift_ast::{FilterOp, SearchFilter};
use sift_ir::{Condition, ConditionNode, Expr, InvalidQuery, Op, QueryError, Value};
use sift_registry::FieldResolver;

use super::{
    default_converter, has_condition, invalid_operator, invalid_value, is_has_filter, is_not_null, is_null,
    membership, parse_bool, require_equality,
};
use crate::aliases::FieldAliasResolver;

/// Span status names and the codes they are stored as.
pub const TRANSACTION_STATUSES: &[(&str, i64)] = &[
    ("ok", 0),
    ("cancelled", 1),
    ("unknown", 2),
    ("unknown_error", 2),
    ("invalid_argument", 3),
    ("deadline_exceeded", 4),
    ("not_found", 5),
    ("already_exists", 6),
    ("permission_denied", 7),
    ("resource_exhausted", 8),
    ("failed_precondition", 9),
    ("aborted", 10),
    ("out_of_range", 11),
    ("unimplemented", 12),
    ("internal_error", 13),
    ("unavailable", 14),
    ("data_loss", 15),
    ("unauthenticated", 16),
];

pub fn status_code(name: &str) -> Option<i64> {
    TRANSACTION_STATUSES
        .iter()
        .find(|(status, _)| *status == name)
        .map(|(_, code)| *code)
}

/// First name registered for a code.
pub fn status_name(code: i64) -> Option<&'static str> {
    TRANSACTION_STATUSES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(status, _)| *status)
}

fn column(resolver: &FieldAliasResolver<'_>, name: &str) -> Result<Expr, QueryError> {
    Ok(resolver.resolve_field(name)?.expr)
}

/// An empty environment means "no environment": lists may mix real names
/// with `""`, which turns into a null check on the side.
pub(super) fn environment(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    require_equality("environment", filter)?;
    let items = filter.value.items();
    if !items.iter().any(String::is_empty) || filter.value.is_wildcard() {
        return default_converter(filter, resolver);
    }

    let expr = column(resolver, "environment")?;
    let negated = filter.is_negation();
    let names: Vec<Value> = items.into_iter().filter(|i| !i.is_empty()).map(Value::from).collect();
    let null_check = if negated { is_not_null(&expr) } else { is_null(&expr) };
    if names.is_empty() {
        return Ok(null_check);
    }
    let values = membership(expr, names, negated);
    Ok(if negated {
        ConditionNode::and(values, null_check)
    } else {
        ConditionNode::or(values, null_check)
    })
}

/// Free text searches the message case-insensitively.
pub(super) fn message(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    if is_has_filter(filter) || filter.value.is_wildcard() || filter.is_in_filter() {
        return default_converter(filter, resolver);
    }
    let matched = match filter.operator {
        FilterOp::Eq => Op::Neq,
        FilterOp::Neq => Op::Eq,
        other => return Err(invalid_operator("message", other)),
    };
    let position = Expr::call(
        "positionCaseInsensitive",
        vec![column(resolver, "message")?, Expr::literal(filter.value.raw.as_str())],
    );
    Ok(ConditionNode::Leaf(Condition::new(position, matched, 0i64)))
}

pub(super) fn transaction_status(
    filter: &SearchFilter,
    resolver: &FieldAliasResolver<'_>,
) -> Result<ConditionNode, QueryError> {
    require_equality("transaction.status", filter)?;
    if is_has_filter(filter) {
        return default_converter(filter, resolver);
    }
    let codes = filter
        .value
        .items()
        .iter()
        .map(|name| {
            status_code(name)
                .map(Value::Int)
                .ok_or_else(|| invalid_value("transaction.status", name))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(membership(column(resolver, "transaction.status")?, codes, filter.is_negation()))
}

/// Numeric ids or short codes; `unknown` matches events without an issue.
pub(super) fn issue(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    let name = filter.key.name.as_str();
    require_equality(name, filter)?;
    let expr = column(resolver, "issue.id")?;
    if is_has_filter(filter) {
        let op = if filter.operator == FilterOp::Neq { Op::Neq } else { Op::Eq };
        return Ok(ConditionNode::Leaf(Condition::new(expr, op, 0i64)));
    }
    if filter.value.is_wildcard() {
        return Err(invalid_value(name, &filter.value.raw));
    }

    let items = filter.value.items();
    let short_ids: Vec<String> = items
        .iter()
        .filter(|item| item.as_str() != "unknown" && item.parse::<u64>().is_err())
        .cloned()
        .collect();
    let resolved = if short_ids.is_empty() {
        Default::default()
    } else {
        resolver
            .catalog()
            .resolve_issue_ids(&short_ids, &resolver.params().project_ids)?
    };

    let ids = items
        .iter()
        .map(|item| {
            if item == "unknown" {
                return Ok(Value::Int(0));
            }
            if let Ok(id) = item.parse::<u64>() {
                return Ok(Value::from(id));
            }
            resolved
                .get(item)
                .map(|id| Value::from(*id))
                .ok_or_else(|| invalid_value(name, item))
        })
        .collect::<Result<Vec<_>, QueryError>>()?;
    Ok(membership(expr, ids, filter.is_negation()))
}

/// Project slugs, limited to the projects in the request.
pub(super) fn project(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    let name = filter.key.name.as_str();
    require_equality(name, filter)?;
    if filter.value.is_empty() || filter.value.is_wildcard() {
        return Err(invalid_value(name, &filter.value.raw));
    }
    let slugs = resolver
        .catalog()
        .resolve_project_slugs(&resolver.params().project_ids)?;
    let ids = filter
        .value
        .items()
        .iter()
        .map(|slug| {
            slugs
                .get(slug)
                .map(|id| Value::from(*id))
                .ok_or_else(|| invalid_value(name, slug))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(membership(Expr::column("project_id"), ids, filter.is_negation()))
}

pub(super) fn event_id(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    identifier(filter, resolver, 32)
}

pub(super) fn trace_id(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    identifier(filter, resolver, 32)
}

pub(super) fn span_id(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    identifier(filter, resolver, 16)
}

/// Hex identifiers of a fixed width. Dashes are allowed in UUIDs and dropped.
fn identifier(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>, width: usize) -> Result<ConditionNode, QueryError> {
    let name = filter.key.name.as_str();
    require_equality(name, filter)?;
    if is_has_filter(filter) {
        return default_converter(filter, resolver);
    }
    let field = resolver.resolve_field(name)?;
    let ids = filter
        .value
        .items()
        .iter()
        .map(|raw| normalize_identifier(raw, width).ok_or_else(|| invalid_identifier(name, raw)))
        .collect::<Result<Vec<_>, _>>()?;
    let leaf = membership(field.expr.clone(), ids, filter.is_negation());
    if filter.is_negation() && field.nullable {
        return Ok(ConditionNode::or(leaf, is_null(&field.expr)));
    }
    Ok(leaf)
}

fn normalize_identifier(raw: &str, width: usize) -> Option<Value> {
    let hex: String = if width == 32 {
        raw.chars().filter(|c| *c != '-').collect()
    } else {
        raw.to_string()
    };
    (hex.len() == width && hex.chars().all(|c| c.is_ascii_hexdigit())).then(|| Value::from(hex.to_ascii_lowercase()))
}

fn invalid_identifier(field: &str, value: &str) -> QueryError {
    InvalidQuery::InvalidIdentifier {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

/// `error.handled:1` matches events whose every exception was handled.
pub(super) fn error_handled(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    unhandled_flag(filter, resolver, false)
}

pub(super) fn error_unhandled(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    unhandled_flag(filter, resolver, true)
}

fn unhandled_flag(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>, unhandled: bool) -> Result<ConditionNode, QueryError> {
    let name = filter.key.name.as_str();
    if is_has_filter(filter) {
        let field = resolver.resolve_field("error.handled")?;
        return Ok(has_condition(&field, filter.operator == FilterOp::Neq));
    }
    let wanted = boolean_filter(name, filter)?;
    let matched = wanted == unhandled;
    let lhs = resolver.resolve_alias("error.unhandled")?;
    Ok(ConditionNode::Leaf(Condition::new(lhs, Op::Eq, matched as i64)))
}

/// Membership of the transaction in the requesting teams' key transactions.
pub(super) fn team_key_transaction(
    filter: &SearchFilter,
    resolver: &FieldAliasResolver<'_>,
) -> Result<ConditionNode, QueryError> {
    let wanted = boolean_filter("team_key_transaction", filter)?;
    let lhs = resolver.resolve_alias("team_key_transaction")?;
    Ok(ConditionNode::Leaf(Condition::new(lhs, Op::Eq, wanted as i64)))
}

/// A `true`/`false`/`1`/`0` filter, with `!=` flipping the result.
fn boolean_filter(name: &str, filter: &SearchFilter) -> Result<bool, QueryError> {
    let negated = match filter.operator {
        FilterOp::Eq => false,
        FilterOp::Neq => true,
        other => return Err(invalid_operator(name, other)),
    };
    let value = parse_bool(&filter.value.raw).ok_or_else(|| invalid_value(name, &filter.value.raw))?;
    Ok(value != negated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::filters::convert_filter;
    use crate::Limits;
    use sift_ast::{parse, ParsedTerm};
    use sift_ir::{RequestParams, Schema, WhereCondition};

    fn catalog() -> InMemoryCatalog {
        InMemoryCatalog::new()
            .with_project(1, "frontend")
            .with_project(2, "backend")
            .with_issue(42, "FRONTEND-1A", 1)
            .with_key_transaction(7, 1, "/home")
    }

    fn convert(query: &str) -> Result<String, QueryError> {
        let schema = Schema::events();
        let params = RequestParams {
            project_ids: vec![1, 2],
            team_ids: vec![7],
            ..Default::default()
        };
        let catalog = catalog();
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
    fn test_environment_empty_value() {
        assert_eq!(
            convert("environment:[production, \"\"]").unwrap(),
            "(environment = 'production' OR environment IS NULL)"
        );
        assert_eq!(
            convert("!environment:[production, \"\"]").unwrap(),
            "environment != 'production' AND environment IS NOT NULL"
        );
        assert_eq!(convert("environment:production").unwrap(), "environment = 'production'");
    }

    #[test]
    fn test_message_search() {
        assert_eq!(
            convert("message:timeout").unwrap(),
            "positionCaseInsensitive(message, 'timeout') != 0"
        );
        assert_eq!(
            convert("!message:timeout").unwrap(),
            "positionCaseInsensitive(message, 'timeout') = 0"
        );
        assert!(convert("message:>a").is_err());
    }

    #[test]
    fn test_transaction_status() {
        assert_eq!(convert("transaction.status:ok").unwrap(), "transaction_status = 0");
        assert_eq!(
            convert("!transaction.status:[aborted, data_loss]").unwrap(),
            "transaction_status NOT IN [10, 15]"
        );
        assert!(convert("transaction.status:fine").is_err());
        assert_eq!(status_name(2), Some("unknown"));
    }

    #[test]
    fn test_issue_ids() {
        assert_eq!(convert("issue.id:42").unwrap(), "group_id = 42");
        assert_eq!(convert("issue:FRONTEND-1A").unwrap(), "group_id = 42");
        assert_eq!(convert("issue:[unknown, 7]").unwrap(), "group_id IN [0, 7]");
        assert_eq!(convert("has:issue").unwrap(), "group_id != 0");
        let err = convert("issue:NOPE-1").unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidSearchQuery(InvalidQuery::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_project_slugs() {
        assert_eq!(convert("project:backend").unwrap(), "project_id = 2");
        assert_eq!(convert("!project:[frontend, backend]").unwrap(), "project_id NOT IN [1, 2]");
        assert!(convert("project:other").is_err());
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(
            convert("id:ABCDEF0123456789abcdef0123456789").unwrap(),
            "event_id = 'abcdef0123456789abcdef0123456789'"
        );
        assert_eq!(
            convert("trace:a0fa8803-753e-40cd-8b3b-36f7d5a5e7d2").unwrap(),
            "trace_id = 'a0fa8803753e40cd8b3b36f7d5a5e7d2'"
        );
        assert_eq!(convert("trace.span:0123456789abcdef").unwrap(), "span_id = '0123456789abcdef'");
        for query in ["id:1234", "trace:abc*", "trace.parent_span:0123456789abcdeg"] {
            let err = convert(query).unwrap_err();
            assert!(
                matches!(err, QueryError::InvalidSearchQuery(InvalidQuery::InvalidIdentifier { .. })),
                "{} should be rejected",
                query
            );
        }
    }

    #[test]
    fn test_error_handled_flags() {
        assert_eq!(
            convert("error.handled:1").unwrap(),
            "has(exception_stacks.mechanism_handled, 0) = 0"
        );
        assert_eq!(
            convert("error.unhandled:true").unwrap(),
            "has(exception_stacks.mechanism_handled, 0) = 1"
        );
        assert_eq!(
            convert("!error.handled:0").unwrap(),
            "has(exception_stacks.mechanism_handled, 0) = 0"
        );
        assert!(convert("error.handled:maybe").is_err());
    }

    #[test]
    fn test_team_key_transaction() {
        assert_eq!(
            convert("team_key_transaction:true").unwrap(),
            "in(tuple(project_id, transaction_name), array(tuple(1, '/home'))) = 1"
        );
        assert_eq!(
            convert("team_key_transaction:false").unwrap(),
            "in(tuple(project_id, transaction_name), array(tuple(1, '/home'))) = 0"
        );
    }

    #[test]
    fn test_explicit_tag_bypasses_converter() {
        assert_eq!(convert("tags[message]:hello").unwrap(), "tags[message] = 'hello'");
    }
}
