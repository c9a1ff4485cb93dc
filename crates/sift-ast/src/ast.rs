//! Search term types
//!
//! Flat token stream produced by the tokenizer, closely following the grammar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sift_ir::{BooleanOp, Op};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParsedTerm {
    Filter(SearchFilter),
    AggregateFilter(AggregateFilter),
    Paren(Vec<ParsedTerm>),
    Boolean(BooleanOp),
}

impl ParsedTerm {
    pub fn filter(key: &str, operator: FilterOp, value: SearchValue) -> Self {
        ParsedTerm::Filter(SearchFilter {
            key: SearchKey::new(key),
            operator,
            value,
        })
    }

    pub fn aggregate(key: &str, operator: FilterOp, value: SearchValue) -> Self {
        ParsedTerm::AggregateFilter(AggregateFilter {
            key: key.to_string(),
            operator,
            value,
        })
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, ParsedTerm::Boolean(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchKey {
    pub name: String,
    /// Written explicitly as `tags[name]`.
    pub is_tag: bool,
}

impl SearchKey {
    pub fn new(raw: &str) -> Self {
        match raw.strip_prefix("tags[").and_then(|r| r.strip_suffix(']')) {
            Some(name) => Self {
                name: name.to_string(),
                is_tag: true,
            },
            None => Self {
                name: raw.to_string(),
                is_tag: false,
            },
        }
    }

    /// Name to resolve against the schema.
    pub fn field(&self) -> String {
        if self.is_tag {
            format!("tags[{}]", self.name)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub key: SearchKey,
    pub operator: FilterOp,
    pub value: SearchValue,
}

impl SearchFilter {
    pub fn is_in_filter(&self) -> bool {
        matches!(self.operator, FilterOp::In | FilterOp::NotIn)
    }

    pub fn is_negation(&self) -> bool {
        self.operator.is_negation()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateFilter {
    /// Function text, e.g. `p95(transaction.duration)`.
    pub key: String,
    pub operator: FilterOp,
    pub value: SearchValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

impl FilterOp {
    pub fn negate(self) -> FilterOp {
        match self {
            FilterOp::Eq => FilterOp::Neq,
            FilterOp::Neq => FilterOp::Eq,
            FilterOp::Gt => FilterOp::Lte,
            FilterOp::Gte => FilterOp::Lt,
            FilterOp::Lt => FilterOp::Gte,
            FilterOp::Lte => FilterOp::Gt,
            FilterOp::In => FilterOp::NotIn,
            FilterOp::NotIn => FilterOp::In,
        }
    }

    pub fn is_negation(self) -> bool {
        matches!(self, FilterOp::Neq | FilterOp::NotIn)
    }

    pub fn is_equality(self) -> bool {
        matches!(self, FilterOp::Eq | FilterOp::Neq | FilterOp::In | FilterOp::NotIn)
    }

    pub fn to_ir(self) -> Op {
        match self {
            FilterOp::Eq => Op::Eq,
            FilterOp::Neq => Op::Neq,
            FilterOp::Gt => Op::Gt,
            FilterOp::Gte => Op::Gte,
            FilterOp::Lt => Op::Lt,
            FilterOp::Lte => Op::Lte,
            FilterOp::In => Op::In,
            FilterOp::NotIn => Op::NotIn,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.to_ir().as_str()
    }
}

/// A filter value, keeping the raw text next to its typed interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchValue {
    pub raw: String,
    pub parsed: ParsedValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParsedValue {
    Text,
    Number(f64),
    /// Milliseconds.
    Duration(f64),
    Date(DateTime<Utc>),
    Bool(bool),
    List(Vec<String>),
}

impl SearchValue {
    pub fn text(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            parsed: ParsedValue::Text,
        }
    }

    pub fn number(value: f64) -> Self {
        Self {
            raw: sift_ir::format_number(value),
            parsed: ParsedValue::Number(value),
        }
    }

    pub fn duration_ms(value: f64) -> Self {
        Self {
            raw: format!("{}ms", sift_ir::format_number(value)),
            parsed: ParsedValue::Duration(value),
        }
    }

    pub fn list<S: Into<String>>(items: Vec<S>) -> Self {
        let items: Vec<String> = items.into_iter().map(Into::into).collect();
        Self {
            raw: format!("[{}]", items.join(", ")),
            parsed: ParsedValue::List(items),
        }
    }

    pub fn date(value: DateTime<Utc>) -> Self {
        Self {
            raw: value.to_rfc3339(),
            parsed: ParsedValue::Date(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && !matches!(self.parsed, ParsedValue::List(_))
    }

    /// Contains an unescaped `*`.
    pub fn is_wildcard(&self) -> bool {
        let mut escaped = false;
        for c in self.raw.chars() {
            match c {
                '\\' if !escaped => escaped = true,
                '*' if !escaped => return true,
                _ => escaped = false,
            }
        }
        false
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.parsed {
            ParsedValue::Number(n) | ParsedValue::Duration(n) => Some(n),
            ParsedValue::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            _ => self.raw.parse().ok(),
        }
    }

    /// List items, or the single raw value.
    pub fn items(&self) -> Vec<String> {
        match &self.parsed {
            ParsedValue::List(items) => items.clone(),
            _ => vec![self.raw.clone()],
        }
    }
}
