//! Boolean condition compiler
//!
//! Builds a where/having condition pair from a flat term sequence. OR binds
//! looser than the implicit AND between adjacent terms, and a where branch
//! may never be ORed with a having branch.

use sift_ast::{AggregateFilter, ParsedTerm, SearchFilter};
use sift_ir::{BooleanOp, ConditionNode, InvalidQuery, QueryError, WhereCondition};

/// Compiles individual filter terms into condition leaves.
pub trait LeafCompiler {
    /// A row-level filter.
    fn where_leaf(&self, filter: &SearchFilter) -> Result<ConditionNode, QueryError>;

    /// A filter on an aggregate function.
    fn having_leaf(&self, filter: &AggregateFilter) -> Result<ConditionNode, QueryError>;
}

/// Where and having sides of a (sub)expression. Either may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledConditions {
    pub where_node: Option<ConditionNode>,
    pub having_node: Option<ConditionNode>,
}

impl CompiledConditions {
    fn from_where(node: ConditionNode) -> Self {
        Self {
            where_node: Some(node),
            having_node: None,
        }
    }

    fn from_having(node: ConditionNode) -> Self {
        Self {
            where_node: None,
            having_node: Some(node),
        }
    }

    fn and(self, other: Self) -> Self {
        Self {
            where_node: combine(self.where_node, other.where_node, ConditionNode::and),
            having_node: combine(self.having_node, other.having_node, ConditionNode::and),
        }
    }

    fn or(self, other: Self) -> Result<Self, QueryError> {
        let mixed = (self.where_node.is_some() && other.having_node.is_some())
            || (self.having_node.is_some() && other.where_node.is_some());
        if mixed {
            return Err(InvalidQuery::MixedAggregateBoolean.into());
        }
        Ok(Self {
            where_node: combine(self.where_node, other.where_node, ConditionNode::or),
            having_node: combine(self.having_node, other.having_node, ConditionNode::or),
        })
    }

    /// Flattened `(where, having)` lists.
    pub fn flatten(&self) -> (Vec<WhereCondition>, Vec<WhereCondition>) {
        (
            self.where_node.as_ref().map(ConditionNode::flatten).unwrap_or_default(),
            self.having_node.as_ref().map(ConditionNode::flatten).unwrap_or_default(),
        )
    }
}

fn combine(
    left: Option<ConditionNode>,
    right: Option<ConditionNode>,
    join: fn(ConditionNode, ConditionNode) -> ConditionNode,
) -> Option<ConditionNode> {
    match (left, right) {
        (Some(left), Some(right)) => Some(join(left, right)),
        (left, None) => left,
        (None, right) => right,
    }
}

/// Compile a term sequence into where and having trees.
pub fn compile_terms(terms: &[ParsedTerm], leaves: &dyn LeafCompiler) -> Result<CompiledConditions, QueryError> {
    let sanitized = sanitize(terms)?;
    build(&sanitized, leaves)
}

/// Reject misplaced operators and drop AND tokens, keeping ORs as split points.
fn sanitize(terms: &[ParsedTerm]) -> Result<Vec<&ParsedTerm>, QueryError> {
    if let Some(first) = terms.first() {
        if first.is_boolean() {
            return Err(malformed("a condition cannot start with a boolean operator"));
        }
    }
    if let Some(last) = terms.last() {
        if last.is_boolean() {
            return Err(malformed("a condition cannot end with a boolean operator"));
        }
    }
    if terms.windows(2).any(|pair| pair[0].is_boolean() && pair[1].is_boolean()) {
        return Err(malformed("boolean operators must be separated by a condition"));
    }

    Ok(terms
        .iter()
        .filter(|term| !matches!(term, ParsedTerm::Boolean(BooleanOp::And)))
        .collect())
}

fn malformed(message: &str) -> QueryError {
    InvalidQuery::MalformedBoolean(message.to_string()).into()
}

fn build(terms: &[&ParsedTerm], leaves: &dyn LeafCompiler) -> Result<CompiledConditions, QueryError> {
    match terms {
        [] => Ok(CompiledConditions::default()),
        [term] => leaf(term, leaves),
        _ => {
            if let Some(split) = terms
                .iter()
                .position(|term| matches!(term, ParsedTerm::Boolean(BooleanOp::Or)))
            {
                let left = build(&terms[..split], leaves)?;
                let right = build(&terms[split + 1..], leaves)?;
                return left.or(right);
            }
            let first = build(&terms[..1], leaves)?;
            let rest = build(&terms[1..], leaves)?;
            Ok(first.and(rest))
        }
    }
}

fn leaf(term: &ParsedTerm, leaves: &dyn LeafCompiler) -> Result<CompiledConditions, QueryError> {
    match term {
        ParsedTerm::Filter(filter) => leaves.where_leaf(filter).map(CompiledConditions::from_where),
        ParsedTerm::AggregateFilter(filter) => leaves.having_leaf(filter).map(CompiledConditions::from_having),
        ParsedTerm::Paren(children) => compile_terms(children, leaves),
        ParsedTerm::Boolean(_) => Err(malformed("unexpected boolean operator")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_ast::parse;
    use sift_ir::{Condition, Expr, Op};

    /// Compiles every leaf to `key = raw`.
    struct EchoLeaves;

    impl LeafCompiler for EchoLeaves {
        fn where_leaf(&self, filter: &SearchFilter) -> Result<ConditionNode, QueryError> {
            Ok(ConditionNode::Leaf(Condition::new(
                Expr::column(filter.key.field()),
                filter.operator.to_ir(),
                filter.value.raw.as_str(),
            )))
        }

        fn having_leaf(&self, filter: &AggregateFilter) -> Result<ConditionNode, QueryError> {
            Ok(ConditionNode::Leaf(Condition::new(
                Expr::column(filter.key.as_str()),
                filter.operator.to_ir(),
                filter.value.raw.as_str(),
            )))
        }
    }

    fn compile(query: &str) -> Result<(Vec<WhereCondition>, Vec<WhereCondition>), QueryError> {
        let terms = parse(query).unwrap();
        compile_terms(&terms, &EchoLeaves).map(|c| c.flatten())
    }

    fn rendered(conditions: &[WhereCondition]) -> Vec<String> {
        conditions.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_implicit_and() {
        let (where_, having) = compile("is:unresolved environment:production").unwrap();
        assert_eq!(rendered(&where_), vec!["is = 'unresolved'", "environment = 'production'"]);
        assert!(having.is_empty());
    }

    #[test]
    fn test_or_binds_looser_than_and() {
        let (where_, _) = compile("a:1 b:2 OR c:3").unwrap();
        assert_eq!(where_.len(), 1);
        assert_eq!(rendered(&where_), vec!["((a = '1' AND b = '2') OR c = '3')"]);
    }

    #[test]
    fn test_parens_group() {
        let (where_, _) = compile("a:1 (b:2 OR c:3)").unwrap();
        assert_eq!(rendered(&where_), vec!["a = '1'", "(b = '2' OR c = '3')"]);
    }

    #[test]
    fn test_having_only() {
        let (where_, having) = compile("count():>10").unwrap();
        assert!(where_.is_empty());
        assert_eq!(having.len(), 1);
        match &having[0] {
            WhereCondition::Condition(c) => assert_eq!(c.op, Op::Gt),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_and_across_where_and_having() {
        let (where_, having) = compile("a:1 count():>5").unwrap();
        assert_eq!(where_.len(), 1);
        assert_eq!(having.len(), 1);
    }

    #[test]
    fn test_mixed_or_rejected() {
        let err = compile("a:1 OR count():>5").unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidSearchQuery(InvalidQuery::MixedAggregateBoolean)
        ));

        let err = compile("(a:1 count():>1) OR b:2").unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidSearchQuery(InvalidQuery::MixedAggregateBoolean)
        ));
    }

    #[test]
    fn test_misplaced_operators() {
        for query in ["OR a:1", "a:1 AND", "a:1 AND OR b:2", "(a:1 OR) b:2"] {
            let err = compile(query).unwrap_err();
            assert!(
                matches!(err, QueryError::InvalidSearchQuery(InvalidQuery::MalformedBoolean(_))),
                "{} should be rejected",
                query
            );
        }
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let (where_, _) = compile("a:1 (b:2 c:3) OR d:4 e:5").unwrap();
        assert_eq!(sift_ir::flatten_conditions(where_.clone()), where_);
    }
}
