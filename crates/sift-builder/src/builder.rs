//! Query plan assembly
//!
//! Resolves the select list through the function registry and the alias
//! resolver, compiles the search text into where/having conditions and
//! derives the group-by and order-by clauses.

use serde::{Deserialize, Serialize};
use sift_ast::{parse, AggregateFilter, ParsedTerm, ParsedValue, SearchFilter};
use sift_ir::{
    Condition, ConditionNode, Expr, InvalidQuery, Op, QueryError, QueryPlan, RequestParams, Schema, SortKey, Value,
    WhereCondition,
};
use sift_registry::{
    function_alias, is_function, parse_function, FunctionRegistry, ResolveContext, ResolvedField, ResolvedFunction,
};
use tracing::debug;

use crate::aliases::FieldAliasResolver;
use crate::catalog::CatalogService;
use crate::conditions::{compile_terms, CompiledConditions, LeafCompiler};
use crate::filters::{convert_filter, date_value, number_value};
use crate::Limits;

/// A discover query as requested by a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
    /// Fields and function calls, e.g. `transaction`, `p95() as slow`.
    #[serde(default)]
    pub selected: Vec<String>,
    /// Output names; a leading `-` sorts descending.
    #[serde(default)]
    pub orderby: Vec<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub granularity: Option<u64>,
}

/// One resolved entry of the select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectedColumn {
    Field(ResolvedField),
    Function(ResolvedFunction),
}

impl SelectedColumn {
    pub fn expr(&self) -> &Expr {
        match self {
            SelectedColumn::Field(field) => &field.expr,
            SelectedColumn::Function(function) => &function.expr,
        }
    }

    pub fn output_name(&self) -> String {
        match self {
            SelectedColumn::Field(field) => field.field.clone(),
            SelectedColumn::Function(function) => function.alias.clone(),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, SelectedColumn::Function(function) if function.is_aggregate)
    }
}

/// Compiles requests for one set of request parameters.
pub struct QueryBuilder<'a> {
    schema: Schema,
    params: &'a RequestParams,
    catalog: &'a dyn CatalogService,
    registry: &'a FunctionRegistry,
    limits: Limits,
    acl: Vec<String>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(
        params: &'a RequestParams,
        catalog: &'a dyn CatalogService,
        registry: &'a FunctionRegistry,
        limits: Limits,
    ) -> Self {
        Self {
            schema: Schema::events(),
            params,
            catalog,
            registry,
            limits,
            acl: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    /// Private functions this request may call.
    pub fn with_acl(mut self, acl: Vec<String>) -> Self {
        self.acl = acl;
        self
    }

    pub fn params(&self) -> &RequestParams {
        self.params
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn catalog(&self) -> &dyn CatalogService {
        self.catalog
    }

    pub fn resolver(&self) -> FieldAliasResolver<'_> {
        FieldAliasResolver::new(&self.schema, self.params, self.catalog, self.limits)
    }

    fn resolve_function_text(&self, text: &str) -> Result<ResolvedFunction, QueryError> {
        let resolver = self.resolver();
        let ctx = ResolveContext {
            params: self.params,
            fields: &resolver,
            acl: &self.acl,
        };
        self.registry.resolve_field_text(text, &ctx)
    }

    /// Resolve one select-list entry.
    pub fn resolve_select(&self, field: &str) -> Result<SelectedColumn, QueryError> {
        if is_function(field) {
            self.resolve_function_text(field).map(SelectedColumn::Function)
        } else {
            self.resolver().resolve_column(field.trim()).map(SelectedColumn::Field)
        }
    }

    /// Compile search text into where and having trees.
    pub fn compile_query(&self, query: &str) -> Result<CompiledConditions, QueryError> {
        let terms = parse(query)?;
        self.compile(&terms)
    }

    pub fn compile(&self, terms: &[ParsedTerm]) -> Result<CompiledConditions, QueryError> {
        compile_terms(terms, self)
    }

    /// Project and time scope applied to every query.
    pub fn default_conditions(&self) -> Result<Vec<WhereCondition>, QueryError> {
        let (start, end) = self.params.time_window()?;
        let mut conditions = Vec::new();
        if !self.params.project_ids.is_empty() {
            conditions.push(Condition::new(
                Expr::column("project_id"),
                Op::In,
                self.params.project_ids.clone(),
            ));
        }
        conditions.push(Condition::new(Expr::column("timestamp"), Op::Gte, date_value(&start)));
        conditions.push(Condition::new(Expr::column("timestamp"), Op::Lt, date_value(&end)));
        if !self.params.environments.is_empty() {
            conditions.push(Condition::new(
                Expr::column("environment"),
                Op::In,
                self.params.environments.clone(),
            ));
        }
        Ok(conditions.into_iter().map(WhereCondition::Condition).collect())
    }

    /// Assemble the full plan for a request.
    pub fn build(&self, request: &QueryRequest) -> Result<QueryPlan, QueryError> {
        let mut where_conditions = self.default_conditions()?;
        let (where_, having) = self.compile_query(&request.query)?.flatten();
        where_conditions.extend(where_);

        let selected = request
            .selected
            .iter()
            .map(|field| self.resolve_select(field))
            .collect::<Result<Vec<_>, _>>()?;

        let mut aggregations: Vec<Expr> = selected
            .iter()
            .filter(|column| column.is_aggregate())
            .map(|column| column.expr().clone())
            .collect();
        let selected_columns: Vec<&SelectedColumn> = selected.iter().filter(|column| !column.is_aggregate()).collect();

        for expr in having_aggregates(&having) {
            let name = expr.output_name();
            if !aggregations.iter().any(|agg| agg.output_name() == name) {
                aggregations.push(expr);
            }
        }

        let group_by = if aggregations.is_empty() {
            Vec::new()
        } else {
            let redundant: Vec<&str> = selected
                .iter()
                .filter_map(|column| match column {
                    SelectedColumn::Function(function) if function.redundant_grouping => {
                        Some(function.argument_fields())
                    }
                    _ => None,
                })
                .flatten()
                .collect();
            let mut group_by: Vec<Expr> = Vec::new();
            for column in &selected_columns {
                if let SelectedColumn::Field(field) = column {
                    if redundant.contains(&field.field.as_str()) {
                        continue;
                    }
                }
                let expr = column.expr().without_alias();
                if !group_by.contains(&expr) {
                    group_by.push(expr);
                }
            }
            group_by
        };

        let order_by = request
            .orderby
            .iter()
            .map(|entry| order_key(entry, &selected))
            .collect::<Result<Vec<_>, _>>()?;

        let plan = QueryPlan {
            selected_columns: selected_columns.iter().map(|column| column.expr().clone()).collect(),
            aggregations,
            group_by,
            where_conditions,
            having_conditions: having,
            order_by,
            limit: request.limit,
            offset: request.offset,
            granularity: request.granularity,
        };
        debug!(
            columns = plan.selected_columns.len(),
            aggregations = plan.aggregations.len(),
            where_conditions = plan.where_conditions.len(),
            having_conditions = plan.having_conditions.len(),
            fingerprint = %plan.fingerprint(),
            "Built query plan"
        );
        Ok(plan)
    }
}

impl LeafCompiler for QueryBuilder<'_> {
    fn where_leaf(&self, filter: &SearchFilter) -> Result<ConditionNode, QueryError> {
        convert_filter(filter, &self.resolver())
    }

    /// The function must aggregate; the value is compared as a number or date.
    fn having_leaf(&self, filter: &AggregateFilter) -> Result<ConditionNode, QueryError> {
        let function = self.resolve_function_text(&filter.key)?;
        if !function.is_aggregate {
            return Err(InvalidQuery::NotAggregate(filter.key.clone()).into());
        }
        let value: Value = match &filter.value.parsed {
            ParsedValue::Date(date) => date_value(date),
            _ => filter.value.as_number().map(number_value).ok_or_else(|| {
                InvalidQuery::InvalidValue {
                    field: filter.key.clone(),
                    value: filter.value.raw.clone(),
                }
            })?,
        };
        Ok(ConditionNode::Leaf(Condition::new(function.expr, filter.operator.to_ir(), value)))
    }
}

/// Function expressions referenced by having conditions.
fn having_aggregates(conditions: &[WhereCondition]) -> Vec<Expr> {
    let mut found = Vec::new();
    for condition in conditions {
        match condition {
            WhereCondition::Condition(condition) if condition.lhs.is_function() => found.push(condition.lhs.clone()),
            WhereCondition::Condition(_) => {}
            WhereCondition::Boolean { conditions, .. } => found.extend(having_aggregates(conditions)),
        }
    }
    found
}

/// `-name` sorts descending. Function text is matched by its alias.
fn order_key(entry: &str, selected: &[SelectedColumn]) -> Result<SortKey, QueryError> {
    let (desc, name) = match entry.strip_prefix('-') {
        Some(name) => (true, name.trim()),
        None => (false, entry.trim()),
    };
    let key = if is_function(name) {
        let parsed = parse_function(name)?;
        parsed
            .alias
            .unwrap_or_else(|| function_alias(&parsed.name, &parsed.arguments))
    } else {
        name.to_string()
    };
    selected
        .iter()
        .find(|column| column.output_name() == key)
        .map(|column| SortKey {
            expr: column.expr().without_alias(),
            desc,
        })
        .ok_or_else(|| InvalidQuery::InvalidOrderBy(entry.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use chrono::{TimeZone, Utc};

    fn params() -> RequestParams {
        RequestParams::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            vec![1],
        )
    }

    #[test]
    fn test_default_conditions() {
        let params = params().with_environments(vec!["prod".to_string()]);
        let catalog = InMemoryCatalog::new();
        let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());
        let rendered: Vec<String> = builder
            .default_conditions()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec![
                "project_id IN [1]",
                "timestamp >= '2024-01-01T00:00:00'",
                "timestamp < '2024-01-02T00:00:00'",
                "environment IN ['prod']",
            ]
        );
    }

    #[test]
    fn test_order_key_by_alias_and_function_text() {
        let params = params();
        let catalog = InMemoryCatalog::new();
        let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());
        let selected = vec![
            builder.resolve_select("transaction").unwrap(),
            builder.resolve_select("p95() as slow").unwrap(),
        ];
        let key = order_key("-slow", &selected).unwrap();
        assert!(key.desc);
        assert_eq!(key.expr.to_string(), "quantile(0.95)(duration)");

        let key = order_key("transaction", &selected).unwrap();
        assert_eq!(key.expr, Expr::column("transaction_name"));

        assert!(order_key("count()", &selected).is_err());
    }

    #[test]
    fn test_having_requires_aggregate() {
        let params = params();
        let catalog = InMemoryCatalog::new();
        let builder = QueryBuilder::new(&params, &catalog, FunctionRegistry::builtin(), Limits::default());
        let err = builder
            .compile_query("histogram(transaction.duration, 10, 0, 1):>5")
            .unwrap_err();
        assert!(matches!(
            err,
            QueryError::InvalidSearchQuery(InvalidQuery::NotAggregate(_))
        ));
    }
}
