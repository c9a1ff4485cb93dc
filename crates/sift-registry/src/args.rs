//! Function arguments: declared kinds, defaults and normalized values

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use sift_ir::{format_number, ColumnKind, Expr, InvalidQuery, QueryError, RequestParams, ResultType, Value};

use crate::registry::ResolveContext;

/// Normalized arguments by name, in a stable order.
pub type ArgMap = BTreeMap<String, ArgValue>;

/// Comparison functions accepted wherever a condition operator is an argument.
pub const CONDITION_OPERATORS: &[&str] = &[
    "equals",
    "notEquals",
    "less",
    "greater",
    "lessOrEquals",
    "greaterOrEquals",
];

/// What a positional argument accepts and how it is normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentKind {
    /// Any field, optionally restricted to an allowlist.
    Column { allowed: Option<&'static [&'static str]> },
    /// A field with an integer, number or duration storage kind.
    NumericColumn,
    DurationColumn,
    StringArrayColumn,
    /// A valid field whose value is discarded, as in `count(id)`.
    IgnoredColumn,
    /// The alias of another selected function.
    FunctionAlias,
    /// A double-quoted or bare string, optionally restricted to an allowlist.
    StringLiteral { allowed: Option<&'static [&'static str]> },
    DateLiteral,
    ConditionOperator,
    NumberRange {
        min: Option<f64>,
        max: Option<f64>,
        integer: bool,
    },
    NullableNumberRange { min: Option<f64>, max: Option<f64> },
    /// Seconds; defaults to the request window.
    IntervalFromParams,
}

/// Default for an optional argument, evaluated against the request.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgDefault {
    Null,
    Raw(&'static str),
    WindowSeconds,
}

impl ArgDefault {
    /// Raw text to normalize, or `None` for a null default.
    pub fn provide(&self, params: &RequestParams) -> Result<Option<String>, QueryError> {
        match self {
            ArgDefault::Null => Ok(None),
            ArgDefault::Raw(raw) => Ok(Some(raw.to_string())),
            ArgDefault::WindowSeconds => match params.window_seconds() {
                None => Err(InvalidQuery::MissingParameter("start and end".to_string()).into()),
                Some(seconds) if seconds <= 0 => Err(QueryError::invalid("start must be before end")),
                Some(seconds) => Ok(Some(seconds.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionArg {
    pub name: &'static str,
    pub kind: ArgumentKind,
    pub default: Option<ArgDefault>,
}

impl FunctionArg {
    pub fn new(name: &'static str, kind: ArgumentKind) -> Self {
        Self {
            name,
            kind,
            default: None,
        }
    }

    pub fn with_default(mut self, default: ArgDefault) -> Self {
        self.default = Some(default);
        self
    }

    /// Validate one raw argument and turn it into a typed value.
    pub fn normalize(&self, function: &str, raw: &str, ctx: &ResolveContext<'_>) -> Result<ArgValue, QueryError> {
        let invalid = |reason: String| -> QueryError {
            InvalidQuery::InvalidArgument {
                function: function.to_string(),
                argument: self.name.to_string(),
                reason,
            }
            .into()
        };

        match &self.kind {
            ArgumentKind::Column { allowed } => {
                if let Some(allowed) = allowed {
                    if !allowed.contains(&raw) {
                        return Err(invalid(format!("{} must be one of {}", raw, allowed.join(", "))));
                    }
                }
                column_value(raw, ctx)
            }
            ArgumentKind::NumericColumn => {
                let value = column_value(raw, ctx)?;
                match value.column_kind() {
                    Some(kind) if kind.is_numeric() => Ok(value),
                    _ => Err(invalid(format!("{} is not a numeric column", raw))),
                }
            }
            ArgumentKind::DurationColumn => {
                let value = column_value(raw, ctx)?;
                match value.column_kind() {
                    Some(ColumnKind::Duration) => Ok(value),
                    _ => Err(invalid(format!("{} is not a duration column", raw))),
                }
            }
            ArgumentKind::StringArrayColumn => {
                let value = column_value(raw, ctx)?;
                match value.column_kind() {
                    Some(ColumnKind::StringArray) => Ok(value),
                    _ => Err(invalid(format!("{} is not an array column", raw))),
                }
            }
            ArgumentKind::IgnoredColumn => {
                ctx.fields.resolve_field(raw)?;
                Ok(ArgValue::Null)
            }
            ArgumentKind::FunctionAlias => {
                if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(invalid(format!("{} is not a valid function alias", raw)));
                }
                Ok(ArgValue::Column {
                    field: raw.to_string(),
                    expr: Expr::column(raw),
                    kind: None,
                })
            }
            ArgumentKind::StringLiteral { allowed } => {
                let value = unquote(raw);
                if let Some(allowed) = allowed {
                    if !allowed.contains(&value.as_str()) {
                        return Err(invalid(format!("{} must be one of {}", value, allowed.join(", "))));
                    }
                }
                Ok(ArgValue::Str(value))
            }
            ArgumentKind::DateLiteral => parse_date(&unquote(raw)).map(ArgValue::Date).ok_or_else(|| {
                invalid(format!(
                    "{} is in the wrong format, expected a date like 2020-03-14T15:14:15",
                    raw
                ))
            }),
            ArgumentKind::ConditionOperator => CONDITION_OPERATORS
                .iter()
                .find(|op| **op == raw)
                .map(|op| ArgValue::Operator(op))
                .ok_or_else(|| invalid(format!("{} is not a valid condition", raw))),
            ArgumentKind::NumberRange { min, max, integer } => {
                let number = parse_number(raw).ok_or_else(|| invalid(format!("{} is not a number", raw)))?;
                if *integer && number.fract() != 0.0 {
                    return Err(invalid(format!("{} must be an integer", raw)));
                }
                check_range(number, *min, *max).map_err(invalid)?;
                Ok(ArgValue::Number(number))
            }
            ArgumentKind::NullableNumberRange { min, max } => {
                if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
                    return Ok(ArgValue::Null);
                }
                let number = parse_number(raw).ok_or_else(|| invalid(format!("{} is not a number", raw)))?;
                check_range(number, *min, *max).map_err(invalid)?;
                Ok(ArgValue::Number(number))
            }
            ArgumentKind::IntervalFromParams => {
                let seconds = parse_number(raw).ok_or_else(|| invalid(format!("{} is not a number", raw)))?;
                if seconds <= 0.0 {
                    return Err(invalid(format!("{} must be a positive number of seconds", raw)));
                }
                Ok(ArgValue::Number(seconds))
            }
        }
    }

    /// The result type this argument contributes, given its normalized value.
    pub fn type_of(&self, value: &ArgValue) -> Option<ResultType> {
        match (&self.kind, value) {
            (_, ArgValue::Null) => None,
            (ArgumentKind::DurationColumn, _) => Some(ResultType::Duration),
            (_, ArgValue::Column { kind, .. }) => kind.map(|k| k.result_type()),
            (ArgumentKind::NumberRange { integer: true, .. }, _) => Some(ResultType::Integer),
            (_, ArgValue::Number(_)) => Some(ResultType::Number),
            (_, ArgValue::Date(_)) => Some(ResultType::Date),
            (_, ArgValue::Str(_)) | (_, ArgValue::Operator(_)) => Some(ResultType::String),
        }
    }
}

fn column_value(raw: &str, ctx: &ResolveContext<'_>) -> Result<ArgValue, QueryError> {
    let resolved = ctx.fields.resolve_field(raw)?;
    Ok(ArgValue::Column {
        field: resolved.field,
        expr: resolved.expr,
        kind: resolved.kind,
    })
}

fn check_range(number: f64, min: Option<f64>, max: Option<f64>) -> Result<(), String> {
    if let Some(min) = min {
        if number < min {
            return Err(format!(
                "{} must be greater than or equal to {}",
                format_number(number),
                format_number(min)
            ));
        }
    }
    if let Some(max) = max {
        if number > max {
            return Err(format!(
                "{} must be less than or equal to {}",
                format_number(number),
                format_number(max)
            ));
        }
    }
    Ok(())
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Strip surrounding double quotes and unescape `\"`.
pub fn unquote(raw: &str) -> String {
    match raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\""),
        None => raw.to_string(),
    }
}

/// A normalized argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    Column {
        field: String,
        expr: Expr,
        kind: Option<ColumnKind>,
    },
    Str(String),
    Number(f64),
    Date(DateTime<Utc>),
    Operator(&'static str),
}

impl ArgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn column_kind(&self) -> Option<ColumnKind> {
        match self {
            ArgValue::Column { kind, .. } => *kind,
            _ => None,
        }
    }

    /// The public field name of a column argument.
    pub fn field(&self) -> Option<&str> {
        match self {
            ArgValue::Column { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Substitute into an expression template.
    pub fn to_expr(&self) -> Expr {
        match self {
            ArgValue::Null => Expr::literal(Value::Null),
            ArgValue::Column { expr, .. } => expr.clone(),
            ArgValue::Str(s) => Expr::literal(s.as_str()),
            ArgValue::Number(n) => Expr::literal(*n),
            ArgValue::Date(date) => Expr::call("toDateTime", vec![Expr::literal(format_date(date))]),
            ArgValue::Operator(op) => Expr::literal(*op),
        }
    }

    /// Substitute into a parametric position, e.g. the level of `quantile(0.5)`.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            ArgValue::Null => Some(Value::Null),
            ArgValue::Str(s) => Some(Value::String(s.clone())),
            ArgValue::Number(n) => Some(Value::Float(*n)),
            ArgValue::Date(date) => Some(Value::String(format_date(date))),
            ArgValue::Column { .. } | ArgValue::Operator(_) => None,
        }
    }

    /// Substitute into a string transform.
    pub fn render(&self) -> String {
        match self {
            ArgValue::Operator(op) => op.to_string(),
            other => other.to_expr().to_string(),
        }
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::SchemaResolver;
    use sift_ir::Schema;

    fn normalize(kind: ArgumentKind, raw: &str) -> Result<ArgValue, QueryError> {
        let schema = Schema::events();
        let fields = SchemaResolver::new(&schema);
        let params = RequestParams::default();
        let ctx = ResolveContext {
            params: &params,
            fields: &fields,
            acl: &[],
        };
        FunctionArg::new("arg", kind).normalize("test", raw, &ctx)
    }

    #[test]
    fn test_numeric_column() {
        let value = normalize(ArgumentKind::NumericColumn, "transaction.duration").unwrap();
        assert_eq!(value.column_kind(), Some(ColumnKind::Duration));
        assert_eq!(value.to_expr(), Expr::column("duration"));

        let err = normalize(ArgumentKind::NumericColumn, "transaction").unwrap_err();
        assert!(err.to_string().contains("not a numeric column"));
    }

    #[test]
    fn test_column_allowlist() {
        let kind = ArgumentKind::Column {
            allowed: Some(&["user"]),
        };
        assert!(normalize(kind.clone(), "user").is_ok());
        assert!(normalize(kind, "user.email").is_err());
    }

    #[test]
    fn test_number_range() {
        let kind = ArgumentKind::NumberRange {
            min: Some(0.0),
            max: Some(1.0),
            integer: false,
        };
        assert_eq!(normalize(kind.clone(), "0.5").unwrap(), ArgValue::Number(0.5));
        assert!(normalize(kind.clone(), "1.5").is_err());
        assert!(normalize(kind, "abc").is_err());
    }

    #[test]
    fn test_condition_and_date() {
        assert_eq!(
            normalize(ArgumentKind::ConditionOperator, "greater").unwrap(),
            ArgValue::Operator("greater")
        );
        assert!(normalize(ArgumentKind::ConditionOperator, "like").is_err());

        let date = normalize(ArgumentKind::DateLiteral, "2020-03-14T15:14:15").unwrap();
        assert_eq!(date.render(), "toDateTime('2020-03-14T15:14:15')");
        assert!(normalize(ArgumentKind::DateLiteral, "yesterday").is_err());
    }

    #[test]
    fn test_string_literal_unquotes() {
        let value = normalize(ArgumentKind::StringLiteral { allowed: None }, "\"a \\\"b\\\"\"").unwrap();
        assert_eq!(value, ArgValue::Str("a \"b\"".to_string()));
    }

    #[test]
    fn test_interval_default_uses_window() {
        let start = Utc::now() - chrono::Duration::hours(1);
        let params = RequestParams::new(start, start + chrono::Duration::hours(1), vec![1]);
        assert_eq!(
            ArgDefault::WindowSeconds.provide(&params).unwrap(),
            Some("3600".to_string())
        );
        assert!(ArgDefault::WindowSeconds.provide(&RequestParams::default()).is_err());
    }

    #[test]
    fn test_interval_default_rejects_empty_window() {
        let start = Utc::now() - chrono::Duration::hours(1);
        for end in [start, start - chrono::Duration::minutes(5)] {
            let err = ArgDefault::WindowSeconds
                .provide(&RequestParams::new(start, end, vec![1]))
                .unwrap_err();
            assert!(matches!(err, QueryError::InvalidSearchQuery(_)));
            assert!(err.to_string().contains("start must be before end"), "{}", err);
        }
    }
}
