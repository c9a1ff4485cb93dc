//! Field alias resolver
//!
//! Virtual fields that expand to expressions instead of a single column.
//! Most are static; `project`, `project_threshold_config` and
//! `team_key_transaction` are generated per request from catalog lookups.

use sift_ir::{ColumnKind, Expr, InvalidQuery, QueryError, RequestParams, Schema, Value};
use sift_registry::{FieldResolver, ResolvedField};
use tracing::debug;

use crate::catalog::CatalogService;
use crate::{Limits, DEFAULT_THRESHOLD, DEFAULT_THRESHOLD_METRIC, MAX_TEAM_KEY_TRANSACTIONS};

enum AliasSource {
    Static(fn() -> Expr),
    Generated(fn(&FieldAliasResolver<'_>) -> Result<Expr, QueryError>),
}

struct AliasDef {
    name: &'static str,
    kind: Option<ColumnKind>,
    source: AliasSource,
}

const ALIASES: &[AliasDef] = &[
    AliasDef {
        name: "project",
        kind: Some(ColumnKind::String),
        source: AliasSource::Generated(project_slug),
    },
    AliasDef {
        name: "project.name",
        kind: Some(ColumnKind::String),
        source: AliasSource::Generated(project_slug),
    },
    AliasDef {
        name: "issue",
        kind: Some(ColumnKind::Integer),
        source: AliasSource::Static(issue),
    },
    AliasDef {
        name: "user.display",
        kind: Some(ColumnKind::String),
        source: AliasSource::Static(user_display),
    },
    AliasDef {
        name: "timestamp.to_hour",
        kind: Some(ColumnKind::Date),
        source: AliasSource::Static(to_hour),
    },
    AliasDef {
        name: "timestamp.to_day",
        kind: Some(ColumnKind::Date),
        source: AliasSource::Static(to_day),
    },
    AliasDef {
        name: "error.unhandled",
        kind: Some(ColumnKind::Boolean),
        source: AliasSource::Static(error_unhandled),
    },
    AliasDef {
        name: "project_threshold_config",
        kind: None,
        source: AliasSource::Generated(project_threshold_config),
    },
    AliasDef {
        name: "team_key_transaction",
        kind: Some(ColumnKind::Boolean),
        source: AliasSource::Generated(team_key_transaction),
    },
];

fn find_alias(name: &str) -> Option<&'static AliasDef> {
    ALIASES.iter().find(|def| def.name == name)
}

pub fn is_alias(name: &str) -> bool {
    find_alias(name).is_some()
}

fn issue() -> Expr {
    Expr::column("group_id")
}

fn user_display() -> Expr {
    Expr::call(
        "coalesce",
        vec![
            Expr::column("user_email"),
            Expr::column("user_name"),
            Expr::column("user_id"),
            Expr::column("ip_address"),
        ],
    )
}

fn to_hour() -> Expr {
    Expr::call("toStartOfHour", vec![Expr::column("timestamp")])
}

fn to_day() -> Expr {
    Expr::call("toStartOfDay", vec![Expr::column("timestamp")])
}

fn error_unhandled() -> Expr {
    Expr::call(
        "has",
        vec![
            Expr::column("exception_stacks.mechanism_handled"),
            Expr::literal(0i64),
        ],
    )
}

fn tuple(items: Vec<Expr>) -> Expr {
    Expr::call("tuple", items)
}

fn array(items: Vec<Expr>) -> Expr {
    Expr::call("array", items)
}

fn default_threshold() -> Expr {
    tuple(vec![
        Expr::literal(DEFAULT_THRESHOLD_METRIC),
        Expr::literal(DEFAULT_THRESHOLD),
    ])
}

fn project_slug(resolver: &FieldAliasResolver<'_>) -> Result<Expr, QueryError> {
    let slugs = resolver.catalog.resolve_project_slugs(&resolver.params.project_ids)?;
    let mut pairs: Vec<(u64, String)> = slugs.into_iter().map(|(slug, id)| (id, slug)).collect();
    pairs.sort();

    let ids: Vec<Value> = pairs.iter().map(|(id, _)| Value::from(*id)).collect();
    let names: Vec<Value> = pairs.into_iter().map(|(_, slug)| Value::from(slug)).collect();
    Ok(Expr::call(
        "transform",
        vec![
            Expr::column("project_id"),
            Expr::literal(Value::Array(ids)),
            Expr::literal(Value::Array(names)),
            Expr::literal(""),
        ],
    ))
}

fn project_threshold_config(resolver: &FieldAliasResolver<'_>) -> Result<Expr, QueryError> {
    let cap = resolver.limits.max_threshold_rows;
    let configs = resolver
        .catalog
        .resolve_threshold_configs(&resolver.params.project_ids, cap + 1)?;
    if configs.len() > cap {
        return Err(InvalidQuery::TooManyThresholds { limit: cap }.into());
    }
    debug!(
        projects = configs.projects.len(),
        transactions = configs.transactions.len(),
        "Building project threshold config"
    );

    let project_config = if configs.projects.is_empty() {
        default_threshold()
    } else {
        let index = Expr::call(
            "indexOf",
            vec![
                Expr::literal(Value::Array(
                    configs.projects.iter().map(|p| Value::from(p.project_id)).collect(),
                )),
                Expr::column("project_id"),
            ],
        );
        let values = array(
            configs
                .projects
                .iter()
                .map(|p| {
                    tuple(vec![
                        Expr::literal(p.metric.as_str()),
                        Expr::literal(p.threshold),
                    ])
                })
                .collect(),
        );
        Expr::call(
            "if",
            vec![
                Expr::call("equals", vec![index.clone(), Expr::literal(0i64)]),
                default_threshold(),
                Expr::call("arrayElement", vec![values, index]),
            ],
        )
    };

    if configs.transactions.is_empty() {
        return Ok(project_config);
    }

    let keys = array(
        configs
            .transactions
            .iter()
            .map(|t| {
                tuple(vec![
                    Expr::literal(t.project_id),
                    Expr::literal(t.transaction.as_str()),
                ])
            })
            .collect(),
    );
    let index = Expr::call(
        "indexOf",
        vec![
            keys,
            tuple(vec![Expr::column("project_id"), Expr::column("transaction_name")]),
        ],
    );
    let values = array(
        configs
            .transactions
            .iter()
            .map(|t| {
                tuple(vec![
                    Expr::literal(t.metric.as_str()),
                    Expr::literal(t.threshold),
                ])
            })
            .collect(),
    );
    Ok(Expr::call(
        "if",
        vec![
            Expr::call("equals", vec![index.clone(), Expr::literal(0i64)]),
            project_config,
            Expr::call("arrayElement", vec![values, index]),
        ],
    ))
}

fn team_key_transaction(resolver: &FieldAliasResolver<'_>) -> Result<Expr, QueryError> {
    let pairs = resolver.catalog.resolve_team_key_transactions(
        &resolver.params.team_ids,
        &resolver.params.project_ids,
        MAX_TEAM_KEY_TRANSACTIONS,
    )?;
    if pairs.is_empty() {
        return Ok(Expr::call("toInt8", vec![Expr::literal(0i64)]));
    }
    let keys = array(
        pairs
            .into_iter()
            .map(|(project_id, transaction)| {
                tuple(vec![Expr::literal(project_id), Expr::literal(transaction)])
            })
            .collect(),
    );
    Ok(Expr::call(
        "in",
        vec![
            tuple(vec![Expr::column("project_id"), Expr::column("transaction_name")]),
            keys,
        ],
    ))
}

/// Resolves public field names, schema columns and aliases alike, for one request.
pub struct FieldAliasResolver<'a> {
    schema: &'a Schema,
    params: &'a RequestParams,
    catalog: &'a dyn CatalogService,
    limits: Limits,
}

impl<'a> FieldAliasResolver<'a> {
    pub fn new(
        schema: &'a Schema,
        params: &'a RequestParams,
        catalog: &'a dyn CatalogService,
        limits: Limits,
    ) -> Self {
        Self {
            schema,
            params,
            catalog,
            limits,
        }
    }

    pub fn params(&self) -> &RequestParams {
        self.params
    }

    pub fn catalog(&self) -> &dyn CatalogService {
        self.catalog
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// A selected column, carrying its public name as alias.
    pub fn resolve_column(&self, name: &str) -> Result<ResolvedField, QueryError> {
        let mut field = self.resolve_field(name)?;
        field.expr = field.expr.with_alias(name);
        Ok(field)
    }
}

impl FieldResolver for FieldAliasResolver<'_> {
    fn resolve_field(&self, name: &str) -> Result<ResolvedField, QueryError> {
        match find_alias(name) {
            Some(def) => Ok(ResolvedField {
                field: name.to_string(),
                expr: self.resolve_alias(name)?,
                kind: def.kind,
                nullable: false,
                is_tag: false,
            }),
            None => self.schema.resolve(name).map(ResolvedField::from),
        }
    }

    fn resolve_alias(&self, name: &str) -> Result<Expr, QueryError> {
        let def = find_alias(name).ok_or_else(|| InvalidQuery::UnknownField(name.to_string()))?;
        match def.source {
            AliasSource::Static(build) => Ok(build()),
            AliasSource::Generated(generate) => generate(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, ThresholdMetric};

    fn with_catalog<T>(catalog: &InMemoryCatalog, limits: Limits, f: impl FnOnce(&FieldAliasResolver<'_>) -> T) -> T {
        let schema = Schema::events();
        let params = RequestParams {
            project_ids: vec![1, 2],
            team_ids: vec![7],
            ..Default::default()
        };
        let resolver = FieldAliasResolver::new(&schema, &params, catalog, limits);
        f(&resolver)
    }

    #[test]
    fn test_static_alias() {
        let catalog = InMemoryCatalog::new();
        let expr = with_catalog(&catalog, Limits::default(), |r| r.resolve_column("issue").unwrap().expr);
        assert_eq!(expr.output_name(), "issue");
        assert_eq!(expr.without_alias(), Expr::column("group_id"));
    }

    #[test]
    fn test_project_slug_lookup() {
        let catalog = InMemoryCatalog::new().with_project(2, "backend").with_project(1, "frontend");
        let expr = with_catalog(&catalog, Limits::default(), |r| r.resolve_alias("project").unwrap());
        assert_eq!(
            expr.to_string(),
            "transform(project_id, [1, 2], ['frontend', 'backend'], '')"
        );
    }

    #[test]
    fn test_threshold_config_collapses_to_constant() {
        let catalog = InMemoryCatalog::new();
        let expr = with_catalog(&catalog, Limits::default(), |r| {
            r.resolve_alias("project_threshold_config").unwrap()
        });
        assert_eq!(expr.to_string(), "tuple('duration', 300)");
    }

    #[test]
    fn test_threshold_config_lookup() {
        let catalog = InMemoryCatalog::new()
            .with_project_threshold(1, ThresholdMetric::Lcp, 2500)
            .with_transaction_threshold(2, "/checkout", ThresholdMetric::Duration, 800);
        let expr = with_catalog(&catalog, Limits::default(), |r| {
            r.resolve_alias("project_threshold_config").unwrap()
        });
        let text = expr.to_string();
        assert!(text.starts_with("if(equals(indexOf(array(tuple(2, '/checkout'))"));
        assert!(text.contains("arrayElement(array(tuple('lcp', 2500)), indexOf([1], project_id))"));
    }

    #[test]
    fn test_threshold_cap() {
        let mut catalog = InMemoryCatalog::new();
        for i in 0..3 {
            catalog = catalog.with_transaction_threshold(1, &format!("/t{}", i), ThresholdMetric::Duration, 100);
        }
        let limits = Limits {
            max_threshold_rows: 2,
            ..Limits::default()
        };
        let err = with_catalog(&catalog, limits, |r| r.resolve_alias("project_threshold_config").unwrap_err());
        assert!(matches!(
            err,
            QueryError::InvalidSearchQuery(InvalidQuery::TooManyThresholds { limit: 2 })
        ));
    }

    #[test]
    fn test_team_key_transaction() {
        let empty = InMemoryCatalog::new();
        let expr = with_catalog(&empty, Limits::default(), |r| r.resolve_alias("team_key_transaction").unwrap());
        assert_eq!(expr.to_string(), "toInt8(0)");

        let catalog = InMemoryCatalog::new().with_key_transaction(7, 1, "/home");
        let expr = with_catalog(&catalog, Limits::default(), |r| r.resolve_alias("team_key_transaction").unwrap());
        assert_eq!(
            expr.to_string(),
            "in(tuple(project_id, transaction_name), array(tuple(1, '/home')))"
        );
    }

    #[test]
    fn test_unknown_alias_falls_back_to_schema() {
        let catalog = InMemoryCatalog::new();
        let field = with_catalog(&catalog, Limits::default(), |r| r.resolve_field("browser.name").unwrap());
        assert!(field.is_tag);
        assert_eq!(field.expr, Expr::column("tags[browser.name]"));
    }
}
