//! Sift Intermediate Representation (IR)
//!
//! The typed query plan produced by the search-query compiler and handed whole
//! to the execution layer. All types are deterministically serializable so a
//! compiled plan can be fingerprinted for caching and compared across runs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

mod error;
mod params;
pub mod schema;
mod types;

pub use error::*;
pub use params::RequestParams;
pub use schema::{ColumnInfo, Schema};
pub use types::*;

/// A fully compiled query, ready for the execution layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selected_columns: Vec<Expr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregations: Vec<Expr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<Expr>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub where_conditions: Vec<WhereCondition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub having_conditions: Vec<WhereCondition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<SortKey>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// Timeseries bucket width in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<u64>,
}

impl QueryPlan {
    /// Calculate fingerprint (SHA-256) for deterministic caching
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("IR should always serialize");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Output names of every selected column and aggregate, in select order.
    pub fn output_names(&self) -> Vec<String> {
        self.selected_columns
            .iter()
            .chain(self.aggregations.iter())
            .map(Expr::output_name)
            .collect()
    }

    pub fn is_aggregate(&self) -> bool {
        !self.aggregations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    #[serde(default)]
    pub desc: bool,
}

/// Expression types
///
/// A closed AST: every template in the function registry renders down to
/// these four shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    Literal {
        value: Value,
    },
    Column {
        name: String,
        /// Public field name when it differs from the storage column.
        #[serde(skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    Function {
        name: String,
        /// Parametric arguments, e.g. the `0.95` of `quantile(0.95)(duration)`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Value>,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    /// Pre-rendered expression text from a string transform.
    Raw {
        sql: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column {
            name: name.into(),
            alias: None,
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal {
            value: value.into(),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            params: vec![],
            args,
            alias: None,
        }
    }

    pub fn parametric(name: impl Into<String>, params: Vec<Value>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            params,
            args,
            alias: None,
        }
    }

    /// Attach an output alias. Literals carry no alias and are returned
    /// unchanged; a column aliased to its own name stays bare.
    pub fn with_alias(self, new_alias: impl Into<String>) -> Self {
        match self {
            Expr::Column { name, .. } => {
                let new_alias = new_alias.into();
                let alias = (new_alias != name).then_some(new_alias);
                Expr::Column { name, alias }
            }
            Expr::Function {
                name, params, args, ..
            } => Expr::Function {
                name,
                params,
                args,
                alias: Some(new_alias.into()),
            },
            Expr::Raw { sql, .. } => Expr::Raw {
                sql,
                alias: Some(new_alias.into()),
            },
            other => other,
        }
    }

    pub fn without_alias(&self) -> Expr {
        match self {
            Expr::Column { name, .. } => Expr::column(name.clone()),
            Expr::Function {
                name, params, args, ..
            } => Expr::Function {
                name: name.clone(),
                params: params.clone(),
                args: args.clone(),
                alias: None,
            },
            Expr::Raw { sql, .. } => Expr::Raw {
                sql: sql.clone(),
                alias: None,
            },
            other => other.clone(),
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            Expr::Column { alias, .. } | Expr::Function { alias, .. } | Expr::Raw { alias, .. } => {
                alias.as_deref()
            }
            Expr::Literal { .. } => None,
        }
    }

    /// The name this expression appears under in a result row.
    pub fn output_name(&self) -> String {
        match self {
            Expr::Column { name, alias } => alias.clone().unwrap_or_else(|| name.clone()),
            other => other
                .alias()
                .map(str::to_string)
                .unwrap_or_else(|| other.without_alias().to_string()),
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Expr::Function { .. } | Expr::Raw { .. })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value } => write!(f, "{}", value),
            Expr::Column { name, alias } => {
                write!(f, "{}", name)?;
                if let Some(alias) = alias {
                    write!(f, " AS `{}`", alias)?;
                }
                Ok(())
            }
            Expr::Function {
                name,
                params,
                args,
                alias,
            } => {
                write!(f, "{}", name)?;
                if !params.is_empty() {
                    write!(f, "({})", join(params))?;
                }
                write!(f, "({})", join(args))?;
                if let Some(alias) = alias {
                    write!(f, " AS `{}`", alias)?;
                }
                Ok(())
            }
            Expr::Raw { sql, alias } => {
                write!(f, "{}", sql)?;
                if let Some(alias) = alias {
                    write!(f, " AS `{}`", alias)?;
                }
                Ok(())
            }
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

impl Op {
    /// The logical inverse of this operator.
    pub fn negate(self) -> Op {
        match self {
            Op::Eq => Op::Neq,
            Op::Neq => Op::Eq,
            Op::Gt => Op::Lte,
            Op::Gte => Op::Lt,
            Op::Lt => Op::Gte,
            Op::Lte => Op::Gt,
            Op::In => Op::NotIn,
            Op::NotIn => Op::In,
            Op::Like => Op::NotLike,
            Op::NotLike => Op::Like,
            Op::IsNull => Op::IsNotNull,
            Op::IsNotNull => Op::IsNull,
        }
    }

    pub fn is_negation(self) -> bool {
        matches!(self, Op::Neq | Op::NotIn | Op::NotLike | Op::IsNotNull)
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Op::IsNull | Op::IsNotNull)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Neq => "!=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::In => "IN",
            Op::NotIn => "NOT IN",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single comparison: `lhs op rhs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub lhs: Expr,
    pub op: Op,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhs: Option<Value>,
}

impl Condition {
    pub fn new(lhs: Expr, op: Op, rhs: impl Into<Value>) -> Self {
        Self {
            lhs,
            op,
            rhs: Some(rhs.into()),
        }
    }

    pub fn unary(lhs: Expr, op: Op) -> Self {
        Self { lhs, op, rhs: None }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rhs {
            Some(rhs) => write!(f, "{} {} {}", self.lhs.without_alias(), self.op, rhs),
            None => write!(f, "{} {}", self.lhs.without_alias(), self.op),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BooleanOp {
    And,
    Or,
}

/// Binary condition tree built by the boolean compiler.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Leaf(Condition),
    And(Box<ConditionNode>, Box<ConditionNode>),
    Or(Box<ConditionNode>, Box<ConditionNode>),
}

impl ConditionNode {
    pub fn and(left: ConditionNode, right: ConditionNode) -> Self {
        ConditionNode::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: ConditionNode, right: ConditionNode) -> Self {
        ConditionNode::Or(Box::new(left), Box::new(right))
    }

    /// Flatten the top-level AND chain into an ordered condition list.
    ///
    /// Each surviving OR becomes one combined boolean entry.
    pub fn flatten(&self) -> Vec<WhereCondition> {
        match self {
            ConditionNode::And(left, right) => {
                let mut conditions = left.flatten();
                conditions.extend(right.flatten());
                conditions
            }
            other => vec![other.to_where_condition()],
        }
    }

    fn to_where_condition(&self) -> WhereCondition {
        match self {
            ConditionNode::Leaf(condition) => WhereCondition::Condition(condition.clone()),
            ConditionNode::And(..) => WhereCondition::Boolean {
                op: BooleanOp::And,
                conditions: self.flatten(),
            },
            ConditionNode::Or(..) => {
                let mut conditions = Vec::new();
                self.collect_or(&mut conditions);
                WhereCondition::Boolean {
                    op: BooleanOp::Or,
                    conditions,
                }
            }
        }
    }

    // Nested ORs collapse into a single n-ary OR.
    fn collect_or(&self, out: &mut Vec<WhereCondition>) {
        match self {
            ConditionNode::Or(left, right) => {
                left.collect_or(out);
                right.collect_or(out);
            }
            other => out.push(other.to_where_condition()),
        }
    }
}

/// A flattened condition as attached to a [`QueryPlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WhereCondition {
    Condition(Condition),
    Boolean {
        op: BooleanOp,
        conditions: Vec<WhereCondition>,
    },
}

impl fmt::Display for WhereCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WhereCondition::Condition(condition) => write!(f, "{}", condition),
            WhereCondition::Boolean { op, conditions } => {
                let sep = match op {
                    BooleanOp::And => " AND ",
                    BooleanOp::Or => " OR ",
                };
                let parts: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
                write!(f, "({})", parts.join(sep))
            }
        }
    }
}

/// Splice any top-level AND groups into the surrounding list.
///
/// Applying this to an already-flat list returns it unchanged.
pub fn flatten_conditions(conditions: Vec<WhereCondition>) -> Vec<WhereCondition> {
    let mut flat = Vec::with_capacity(conditions.len());
    for condition in conditions {
        match condition {
            WhereCondition::Boolean {
                op: BooleanOp::And,
                conditions,
            } => flat.extend(flatten_conditions(conditions)),
            other => flat.push(other),
        }
    }
    flat
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => f.write_str(&format_number(*x)),
            Value::String(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::Array(items) => write!(f, "[{}]", join(items)),
        }
    }
}

/// Render a float the way `%g` would for the magnitudes we deal with:
/// integral values lose their fractional part, others keep what they need.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}
