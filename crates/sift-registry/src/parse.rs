//! Field text parsing: `p95(transaction.duration) as slow`

use std::sync::LazyLock;

use regex::Regex;
use sift_ir::QueryError;

static FUNCTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<function>[a-zA-Z_][a-zA-Z0-9_]*)\((?P<columns>.*)\)(?:\s+(?:as|AS)\s+(?P<alias>\S+))?$")
        .expect("function pattern is valid")
});

static ALIAS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w]").expect("alias pattern is valid"));

/// A function call split out of field text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFunction {
    pub name: String,
    pub arguments: Vec<String>,
    pub alias: Option<String>,
}

pub fn is_function(field: &str) -> bool {
    FUNCTION_PATTERN.is_match(field.trim())
}

/// Split `name(arg, ...) [as alias]`.
pub fn parse_function(field: &str) -> Result<ParsedFunction, QueryError> {
    let captures = FUNCTION_PATTERN
        .captures(field.trim())
        .ok_or_else(|| QueryError::invalid(format!("{} is not a valid function", field)))?;

    let name = captures["function"].to_string();
    let arguments = parse_arguments(&captures["columns"]);
    let alias = captures.name("alias").map(|m| m.as_str().to_string());
    Ok(ParsedFunction {
        name,
        arguments,
        alias,
    })
}

/// Split an argument list on commas outside quotes and `tags[...]` keys.
pub fn parse_arguments(columns: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut in_tag = false;

    for c in columns.chars() {
        match c {
            '"' if !in_tag && !escaped && current.trim().is_empty() && !quoted => {
                quoted = true;
                current.push(c);
            }
            '\\' if quoted && !escaped => {
                escaped = true;
                current.push(c);
            }
            '"' if quoted && !escaped => {
                quoted = false;
                current.push(c);
            }
            '[' if !quoted && current.trim() == "tags" => {
                in_tag = true;
                current.push(c);
            }
            ']' if in_tag => {
                in_tag = false;
                current.push(c);
            }
            ',' if !quoted && !in_tag => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => {
                escaped = false;
                current.push(c);
            }
        }
    }
    args.push(current.trim().to_string());
    args.retain(|arg| !arg.is_empty());
    args
}

/// Deterministic output name for a function call without an explicit alias.
///
/// Non-word characters in the joined arguments become `_`; trailing `_`
/// are trimmed, so `count()` is aliased `count`.
pub fn function_alias(name: &str, arguments: &[String]) -> String {
    let joined = arguments.join("_");
    let columns = ALIAS_PATTERN.replace_all(&joined, "_");
    format!("{}_{}", name, columns).trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_with_alias() {
        let parsed = parse_function("p95(transaction.duration) as slow").unwrap();
        assert_eq!(parsed.name, "p95");
        assert_eq!(parsed.arguments, vec!["transaction.duration"]);
        assert_eq!(parsed.alias.as_deref(), Some("slow"));
    }

    #[test]
    fn test_parse_function_no_args() {
        let parsed = parse_function("count()").unwrap();
        assert!(parsed.arguments.is_empty());
        assert_eq!(parsed.alias, None);
    }

    #[test]
    fn test_parse_arguments_respects_quotes_and_tags() {
        assert_eq!(
            parse_arguments(r#"tags[a,b], equals, "x, \"y\"""#),
            vec!["tags[a,b]", "equals", r#""x, \"y\"""#]
        );
    }

    #[test]
    fn test_is_function() {
        assert!(is_function("count_unique(user)"));
        assert!(!is_function("transaction.duration"));
        assert!(!is_function("tags[foo]"));
    }

    #[test]
    fn test_function_alias() {
        assert_eq!(function_alias("count", &[]), "count");
        assert_eq!(
            function_alias("percentile", &["transaction.duration".into(), "0.95".into()]),
            "percentile_transaction_duration_0_95"
        );
        assert_eq!(
            function_alias("count_if", &["user".into(), "equals".into(), "\"a b\"".into()]),
            "count_if_user_equals__a_b"
        );
    }
}
