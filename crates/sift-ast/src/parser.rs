//! Pest-based tokenizer for search queries

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use sift_ir::{BooleanOp, QueryError};
use thiserror::Error;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "search.pest"]
pub struct SearchParser;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error at column {column}: {message}")]
    Syntax { message: String, column: usize },
}

impl ParseError {
    fn at(pair: &Pair<Rule>, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            message: message.into(),
            column: pair.as_span().start_pos().line_col().1,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            ParseError::Syntax { column, .. } => *column,
        }
    }
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let column = match err.line_col {
            pest::error::LineColLocation::Pos((_, col)) => col,
            pest::error::LineColLocation::Span((_, col), _) => col,
        };
        ParseError::Syntax {
            message: err.variant.message().to_string(),
            column,
        }
    }
}

impl From<ParseError> for QueryError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Syntax { message, column } => QueryError::Parse { message, column },
        }
    }
}

/// Parse search text into a flat term sequence.
pub fn parse(source: &str) -> Result<Vec<ParsedTerm>, ParseError> {
    let mut pairs = SearchParser::parse(Rule::search, source)?;
    let search = pairs.next().ok_or_else(|| ParseError::Syntax {
        message: "Empty input".to_string(),
        column: 1,
    })?;
    parse_terms(search)
}

fn parse_terms(pair: Pair<Rule>) -> Result<Vec<ParsedTerm>, ParseError> {
    let mut terms = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::paren_group => terms.push(ParsedTerm::Paren(parse_terms(inner)?)),
            Rule::boolean_op => {
                let op = if inner.as_str() == "AND" {
                    BooleanOp::And
                } else {
                    BooleanOp::Or
                };
                terms.push(ParsedTerm::Boolean(op));
            }
            Rule::aggregate_filter => terms.push(parse_aggregate_filter(inner)?),
            Rule::filter => terms.push(parse_filter(inner)?),
            Rule::free_text => terms.push(parse_free_text(inner)),
            Rule::EOI => {}
            _ => return Err(ParseError::at(&inner, format!("Unexpected {:?}", inner.as_rule()))),
        }
    }
    Ok(terms)
}

struct FilterParts {
    negated: bool,
    key: String,
    operator: Option<String>,
    value: SearchValue,
}

fn split_filter(pair: Pair<Rule>) -> Result<FilterParts, ParseError> {
    let mut negated = false;
    let mut key = None;
    let mut operator = None;
    let mut value = None;

    for inner in pair.clone().into_inner() {
        match inner.as_rule() {
            Rule::negation => negated = true,
            Rule::key | Rule::function_key => key = Some(inner.as_str().to_string()),
            Rule::operator => operator = Some(inner.as_str().to_string()),
            Rule::list_value => {
                let items = inner
                    .into_inner()
                    .map(|item| match item.as_rule() {
                        Rule::quoted_value => unquote(item),
                        _ => item.as_str().to_string(),
                    })
                    .collect();
                value = Some(SearchValue::list(items));
            }
            Rule::quoted_value => value = Some(SearchValue::text(unquote(inner))),
            Rule::plain_value => value = Some(parse_plain_value(inner.as_str())),
            _ => {}
        }
    }

    Ok(FilterParts {
        negated,
        key: key.ok_or_else(|| ParseError::at(&pair, "Missing filter key"))?,
        operator,
        value: value.ok_or_else(|| ParseError::at(&pair, "Missing filter value"))?,
    })
}

fn resolve_operator(pair: &Pair<Rule>, parts: &FilterParts) -> Result<FilterOp, ParseError> {
    let is_list = matches!(parts.value.parsed, ParsedValue::List(_));
    let op = match (parts.operator.as_deref(), is_list) {
        (None, true) | (Some("="), true) => FilterOp::In,
        (Some(op), true) => {
            return Err(ParseError::at(pair, format!("Operator {} is not valid with a list", op)))
        }
        (None, false) | (Some("="), false) => FilterOp::Eq,
        (Some("!="), false) => FilterOp::Neq,
        (Some(">"), false) => FilterOp::Gt,
        (Some(">="), false) => FilterOp::Gte,
        (Some("<"), false) => FilterOp::Lt,
        (Some("<="), false) => FilterOp::Lte,
        (Some(op), false) => return Err(ParseError::at(pair, format!("Unknown operator {}", op))),
    };
    Ok(if parts.negated { op.negate() } else { op })
}

fn parse_filter(pair: Pair<Rule>) -> Result<ParsedTerm, ParseError> {
    let parts = split_filter(pair.clone())?;
    let operator = resolve_operator(&pair, &parts)?;

    // has:field is "field is set"
    if parts.key == "has" {
        let field = parts.value.raw.clone();
        let operator = match operator {
            FilterOp::Eq => FilterOp::Neq,
            FilterOp::Neq => FilterOp::Eq,
            _ => return Err(ParseError::at(&pair, "has: does not take an operator")),
        };
        return Ok(ParsedTerm::filter(&field, operator, SearchValue::text("")));
    }

    Ok(ParsedTerm::Filter(SearchFilter {
        key: SearchKey::new(&parts.key),
        operator,
        value: parts.value,
    }))
}

fn parse_aggregate_filter(pair: Pair<Rule>) -> Result<ParsedTerm, ParseError> {
    let parts = split_filter(pair.clone())?;
    let operator = resolve_operator(&pair, &parts)?;
    if matches!(operator, FilterOp::In | FilterOp::NotIn) {
        return Err(ParseError::at(&pair, "Aggregate filters do not accept lists"));
    }
    Ok(ParsedTerm::AggregateFilter(AggregateFilter {
        key: parts.key,
        operator,
        value: parts.value,
    }))
}

fn parse_free_text(pair: Pair<Rule>) -> ParsedTerm {
    let text = match pair.into_inner().next() {
        Some(inner) if inner.as_rule() == Rule::quoted_value => unquote(inner),
        Some(inner) => inner.as_str().to_string(),
        None => String::new(),
    };
    ParsedTerm::filter("message", FilterOp::Eq, SearchValue::text(text))
}

fn unquote(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .next()
        .map(|inner| inner.as_str().replace("\\\"", "\""))
        .unwrap_or_default()
}

const DURATION_UNITS: &[(&str, f64)] = &[
    ("ms", 1.0),
    ("min", 60_000.0),
    ("hr", 3_600_000.0),
    ("day", 86_400_000.0),
    ("wk", 604_800_000.0),
    ("s", 1_000.0),
    ("m", 60_000.0),
    ("h", 3_600_000.0),
    ("d", 86_400_000.0),
    ("w", 604_800_000.0),
];

/// Interpret an unquoted value: number, duration, date, boolean or text.
pub fn parse_plain_value(raw: &str) -> SearchValue {
    let parsed = if let Ok(number) = raw.parse::<f64>() {
        ParsedValue::Number(number)
    } else if let Some(ms) = parse_duration(raw) {
        ParsedValue::Duration(ms)
    } else if let Some(date) = parse_date(raw) {
        ParsedValue::Date(date)
    } else if raw.eq_ignore_ascii_case("true") {
        ParsedValue::Bool(true)
    } else if raw.eq_ignore_ascii_case("false") {
        ParsedValue::Bool(false)
    } else {
        ParsedValue::Text
    };
    SearchValue {
        raw: raw.to_string(),
        parsed,
    }
}

fn parse_duration(raw: &str) -> Option<f64> {
    DURATION_UNITS.iter().find_map(|(unit, factor)| {
        raw.strip_suffix(unit)
            .filter(|number| !number.is_empty())
            .and_then(|number| number.parse::<f64>().ok())
            .map(|number| number * factor)
    })
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_filters() {
        let terms = parse("is:unresolved environment:production").unwrap();
        assert_eq!(terms.len(), 2);
        match &terms[1] {
            ParsedTerm::Filter(f) => {
                assert_eq!(f.key.name, "environment");
                assert_eq!(f.operator, FilterOp::Eq);
                assert_eq!(f.value.raw, "production");
            }
            other => panic!("expected filter, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_aggregate_filter() {
        let terms = parse("count():>10").unwrap();
        assert_eq!(
            terms,
            vec![ParsedTerm::aggregate("count()", FilterOp::Gt, SearchValue::number(10.0))]
        );
    }

    #[test]
    fn test_parse_boolean_and_parens() {
        let terms = parse("(a:1 OR b:2) AND c:3").unwrap();
        assert_eq!(terms.len(), 3);
        assert!(matches!(&terms[0], ParsedTerm::Paren(inner) if inner.len() == 3));
        assert_eq!(terms[1], ParsedTerm::Boolean(BooleanOp::And));
    }

    #[test]
    fn test_parse_negation_and_lists() {
        let terms = parse("!environment:[prod, \"dev env\"] !user.email:foo@example.com").unwrap();
        match &terms[0] {
            ParsedTerm::Filter(f) => {
                assert_eq!(f.operator, FilterOp::NotIn);
                assert_eq!(f.value.items(), vec!["prod".to_string(), "dev env".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &terms[1] {
            ParsedTerm::Filter(f) => assert_eq!(f.operator, FilterOp::Neq),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_has_and_free_text() {
        let terms = parse("has:release !has:dist some words").unwrap();
        assert_eq!(terms[0], ParsedTerm::filter("release", FilterOp::Neq, SearchValue::text("")));
        assert_eq!(terms[1], ParsedTerm::filter("dist", FilterOp::Eq, SearchValue::text("")));
        assert_eq!(terms[2], ParsedTerm::filter("message", FilterOp::Eq, SearchValue::text("some")));
    }

    #[test]
    fn test_parse_durations_and_tags() {
        let terms = parse("transaction.duration:>1.5s tags[os.name]:linux").unwrap();
        match &terms[0] {
            ParsedTerm::Filter(f) => assert_eq!(f.value.parsed, ParsedValue::Duration(1500.0)),
            other => panic!("unexpected {:?}", other),
        }
        match &terms[1] {
            ParsedTerm::Filter(f) => {
                assert!(f.key.is_tag);
                assert_eq!(f.key.field(), "tags[os.name]");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_has_column() {
        let err = parse("a:1 (b:2").unwrap_err();
        assert!(err.column() >= 1);
    }
}
