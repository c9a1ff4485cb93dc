//! Release-family converters
//!
//! Every release filter resolves to a concrete version list through the
//! catalog. Lists are capped; at the cap the inverted filter is tried and
//! used as a NOT IN when it is strictly smaller.

use sift_ast::{FilterOp, SearchFilter};
use sift_ir::{Condition, ConditionNode, Expr, InvalidQuery, Op, QueryError, Value};
use tracing::{debug, warn};

use super::{default_converter, invalid_operator, invalid_value, is_has_filter, membership, require_equality};
use crate::aliases::FieldAliasResolver;
use crate::catalog::{ReleaseFilter, ReleaseStage};
use crate::EMPTY_RELEASE_SENTINEL;

fn release_column() -> Expr {
    Expr::column("release")
}

/// Plain release names; `latest` expands to each project's newest release.
pub(super) fn release(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    let items = filter.value.items();
    if is_has_filter(filter) || !items.iter().any(|item| item == "latest") {
        return default_converter(filter, resolver);
    }
    require_equality("release", filter)?;

    let params = resolver.params();
    let mut versions: Vec<String> = Vec::new();
    for item in items {
        if item == "latest" {
            let latest = resolver
                .catalog()
                .latest_release_versions(&params.project_ids, &params.environments)?;
            debug!(count = latest.len(), "Resolved latest releases");
            for version in latest {
                if !versions.contains(&version) {
                    versions.push(version);
                }
            }
        } else if !versions.contains(&item) {
            versions.push(item);
        }
    }
    if versions.is_empty() {
        versions.push(EMPTY_RELEASE_SENTINEL.to_string());
    }
    let values = versions.into_iter().map(Value::from).collect();
    Ok(membership(release_column(), values, filter.is_negation()))
}

/// Semantic-version comparison, e.g. `release.version:>=1.2.0`.
pub(super) fn release_version(
    filter: &SearchFilter,
    resolver: &FieldAliasResolver<'_>,
) -> Result<ConditionNode, QueryError> {
    let (operator, negated) = comparison("release.version", filter)?;
    resolve_releases(
        resolver,
        ReleaseFilter::Version {
            operator,
            version: filter.value.raw.clone(),
        },
        negated,
    )
}

/// Numeric build code comparison.
pub(super) fn release_build(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    let (operator, negated) = comparison("release.build", filter)?;
    resolve_releases(
        resolver,
        ReleaseFilter::Build {
            operator,
            build: filter.value.raw.clone(),
        },
        negated,
    )
}

pub(super) fn release_package(
    filter: &SearchFilter,
    resolver: &FieldAliasResolver<'_>,
) -> Result<ConditionNode, QueryError> {
    let negated = match filter.operator {
        FilterOp::Eq => false,
        FilterOp::Neq => true,
        other => return Err(invalid_operator("release.package", other)),
    };
    if filter.value.is_empty() {
        return Err(invalid_value("release.package", ""));
    }
    resolve_releases(
        resolver,
        ReleaseFilter::Package {
            package: filter.value.raw.clone(),
        },
        negated,
    )
}

/// Adoption stage within the requested environments.
pub(super) fn release_stage(filter: &SearchFilter, resolver: &FieldAliasResolver<'_>) -> Result<ConditionNode, QueryError> {
    require_equality("release.stage", filter)?;
    let environments = &resolver.params().environments;
    if environments.is_empty() {
        return Err(InvalidQuery::MissingParameter("environment".to_string()).into());
    }

    let cap = resolver.limits().max_release_versions;
    let mut versions: Vec<String> = Vec::new();
    for raw in filter.value.items() {
        let stage = ReleaseStage::parse(&raw).ok_or_else(|| invalid_value("release.stage", &raw))?;
        let matched = resolver.catalog().resolve_release_versions(
            &ReleaseFilter::Stage {
                stage,
                environments: environments.clone(),
            },
            &resolver.params().project_ids,
            cap,
        )?;
        for version in matched {
            if !versions.contains(&version) {
                versions.push(version);
            }
        }
    }
    if versions.len() > cap {
        warn!(
            matched = versions.len(),
            cap,
            "Release stage filter hit the version cap, truncating"
        );
        versions.truncate(cap);
    }
    Ok(release_in(versions, filter.is_negation()))
}

/// Maps a comparison filter onto the catalog query. `!=` asks for equality
/// and negates the resulting membership test.
fn comparison(name: &str, filter: &SearchFilter) -> Result<(Op, bool), QueryError> {
    if filter.value.is_empty() || filter.value.is_wildcard() {
        return Err(invalid_value(name, &filter.value.raw));
    }
    match filter.operator {
        FilterOp::Neq => Ok((Op::Eq, true)),
        FilterOp::In | FilterOp::NotIn => Err(invalid_operator(name, filter.operator)),
        other => Ok((other.to_ir(), false)),
    }
}

fn resolve_releases(
    resolver: &FieldAliasResolver<'_>,
    filter: ReleaseFilter,
    negated: bool,
) -> Result<ConditionNode, QueryError> {
    let cap = resolver.limits().max_release_versions;
    let project_ids = &resolver.params().project_ids;
    let catalog = resolver.catalog();

    let mut versions = catalog.resolve_release_versions(&filter, project_ids, cap)?;
    let mut negated = negated;
    if versions.len() >= cap {
        if let Some(inverted) = filter.inverted() {
            let inverse = catalog.resolve_release_versions(&inverted, project_ids, cap)?;
            if !inverse.is_empty() && inverse.len() < versions.len() {
                warn!(
                    matched = versions.len(),
                    inverse = inverse.len(),
                    "Release filter hit the version cap, using the inverted set"
                );
                versions = inverse;
                negated = !negated;
            }
        }
    }
    debug!(?filter, count = versions.len(), negated, "Resolved release versions");
    Ok(release_in(versions, negated))
}

/// Membership over resolved versions; an empty list becomes the sentinel.
fn release_in(versions: Vec<String>, negated: bool) -> ConditionNode {
    let mut values: Vec<Value> = versions.into_iter().map(Value::from).collect();
    if values.is_empty() {
        values.push(Value::from(EMPTY_RELEASE_SENTINEL));
    }
    ConditionNode::Leaf(Condition::new(
        release_column(),
        if negated { Op::NotIn } else { Op::In },
        Value::Array(values),
    ))
}
