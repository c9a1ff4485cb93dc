//! Catalog service: read-only lookups against organization metadata

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sift_ir::{CatalogError, Op};

use crate::semver::ReleaseVersion;

/// Which releases a release-family filter selects.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseFilter {
    /// Semantic-version comparison, optionally scoped to a `package@` prefix.
    Version { operator: Op, version: String },
    Package { package: String },
    Build { operator: Op, build: String },
    Stage {
        stage: ReleaseStage,
        environments: Vec<String>,
    },
}

impl ReleaseFilter {
    /// The logically opposite filter, or `None` when there is no comparison to flip.
    pub fn inverted(&self) -> Option<Self> {
        match self {
            ReleaseFilter::Version { operator, version } => Some(ReleaseFilter::Version {
                operator: operator.negate(),
                version: version.clone(),
            }),
            ReleaseFilter::Build { operator, build } => Some(ReleaseFilter::Build {
                operator: operator.negate(),
                build: build.clone(),
            }),
            ReleaseFilter::Package { .. } | ReleaseFilter::Stage { .. } => None,
        }
    }

    /// Results are ordered newest first for `<`/`<=` so the cap keeps the
    /// releases closest to the boundary.
    pub fn descending(&self) -> bool {
        matches!(
            self,
            ReleaseFilter::Version {
                operator: Op::Lt | Op::Lte,
                ..
            } | ReleaseFilter::Build {
                operator: Op::Lt | Op::Lte,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStage {
    Adopted,
    LowAdoption,
    Replaced,
}

impl ReleaseStage {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "adopted" => Some(ReleaseStage::Adopted),
            "low_adoption" => Some(ReleaseStage::LowAdoption),
            "replaced" => Some(ReleaseStage::Replaced),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMetric {
    Duration,
    Lcp,
}

impl ThresholdMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdMetric::Duration => "duration",
            ThresholdMetric::Lcp => "lcp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectThreshold {
    pub project_id: u64,
    pub metric: ThresholdMetric,
    pub threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionThreshold {
    pub project_id: u64,
    pub transaction: String,
    pub metric: ThresholdMetric,
    pub threshold: u64,
}

/// Project-level and transaction-level threshold overrides, in lookup order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdConfigs {
    pub projects: Vec<ProjectThreshold>,
    pub transactions: Vec<TransactionThreshold>,
}

impl ThresholdConfigs {
    pub fn len(&self) -> usize {
        self.projects.len() + self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-only lookups the compiler needs. Every call is a synchronous round
/// trip; failures are returned as-is and never retried here.
pub trait CatalogService: Send + Sync {
    /// Slugs of the given projects, keyed by slug.
    fn resolve_project_slugs(&self, project_ids: &[u64]) -> Result<BTreeMap<String, u64>, CatalogError>;

    /// Versions matching `filter`, ordered and capped at `limit`.
    fn resolve_release_versions(
        &self,
        filter: &ReleaseFilter,
        project_ids: &[u64],
        limit: usize,
    ) -> Result<Vec<String>, CatalogError>;

    /// The most recent release of each project.
    fn latest_release_versions(&self, project_ids: &[u64], environments: &[String]) -> Result<Vec<String>, CatalogError>;

    /// `(project_id, transaction)` pairs the teams marked as key transactions.
    fn resolve_team_key_transactions(
        &self,
        team_ids: &[u64],
        project_ids: &[u64],
        limit: usize,
    ) -> Result<Vec<(u64, String)>, CatalogError>;

    /// Threshold overrides; each table holds at most `limit` rows.
    fn resolve_threshold_configs(&self, project_ids: &[u64], limit: usize) -> Result<ThresholdConfigs, CatalogError>;

    /// Numeric ids for short issue codes such as `PROJ-1A`. Unknown codes are absent.
    fn resolve_issue_ids(&self, short_ids: &[String], project_ids: &[u64]) -> Result<BTreeMap<String, u64>, CatalogError>;

    /// Short codes for numeric issue ids. Unknown ids are absent.
    fn issue_short_ids(&self, issue_ids: &[u64]) -> Result<BTreeMap<u64, String>, CatalogError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFixture {
    pub id: u64,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseFixture {
    pub version: String,
    pub project_ids: Vec<u64>,
    /// Adoption stage per environment.
    #[serde(default)]
    pub stages: BTreeMap<String, ReleaseStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTransactionFixture {
    pub team_id: u64,
    pub project_id: u64,
    pub transaction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueFixture {
    pub id: u64,
    pub short_id: String,
    pub project_id: u64,
}

/// Catalog backed by static fixtures. Releases are listed oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InMemoryCatalog {
    #[serde(default)]
    pub projects: Vec<ProjectFixture>,
    #[serde(default)]
    pub releases: Vec<ReleaseFixture>,
    #[serde(default)]
    pub key_transactions: Vec<KeyTransactionFixture>,
    #[serde(default)]
    pub project_thresholds: Vec<ProjectThreshold>,
    #[serde(default)]
    pub transaction_thresholds: Vec<TransactionThreshold>,
    #[serde(default)]
    pub issues: Vec<IssueFixture>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, id: u64, slug: &str) -> Self {
        self.projects.push(ProjectFixture {
            id,
            slug: slug.to_string(),
        });
        self
    }

    pub fn with_release(mut self, version: &str, project_ids: &[u64]) -> Self {
        self.releases.push(ReleaseFixture {
            version: version.to_string(),
            project_ids: project_ids.to_vec(),
            stages: BTreeMap::new(),
        });
        self
    }

    pub fn with_release_stage(mut self, version: &str, environment: &str, stage: ReleaseStage) -> Self {
        if let Some(release) = self.releases.iter_mut().find(|r| r.version == version) {
            release.stages.insert(environment.to_string(), stage);
        }
        self
    }

    pub fn with_key_transaction(mut self, team_id: u64, project_id: u64, transaction: &str) -> Self {
        self.key_transactions.push(KeyTransactionFixture {
            team_id,
            project_id,
            transaction: transaction.to_string(),
        });
        self
    }

    pub fn with_project_threshold(mut self, project_id: u64, metric: ThresholdMetric, threshold: u64) -> Self {
        self.project_thresholds.push(ProjectThreshold {
            project_id,
            metric,
            threshold,
        });
        self
    }

    pub fn with_transaction_threshold(
        mut self,
        project_id: u64,
        transaction: &str,
        metric: ThresholdMetric,
        threshold: u64,
    ) -> Self {
        self.transaction_thresholds.push(TransactionThreshold {
            project_id,
            transaction: transaction.to_string(),
            metric,
            threshold,
        });
        self
    }

    pub fn with_issue(mut self, id: u64, short_id: &str, project_id: u64) -> Self {
        self.issues.push(IssueFixture {
            id,
            short_id: short_id.to_string(),
            project_id,
        });
        self
    }

    fn releases_in<'a>(&'a self, project_ids: &'a [u64]) -> impl Iterator<Item = &'a ReleaseFixture> + 'a {
        self.releases
            .iter()
            .filter(move |r| project_ids.is_empty() || r.project_ids.iter().any(|p| project_ids.contains(p)))
    }

    fn matches(release: &ReleaseFixture, filter: &ReleaseFilter) -> bool {
        if let ReleaseFilter::Stage { stage, environments } = filter {
            return release
                .stages
                .iter()
                .any(|(env, s)| s == stage && (environments.is_empty() || environments.contains(env)));
        }
        let Some(parsed) = ReleaseVersion::parse(&release.version) else {
            return false;
        };
        match filter {
            ReleaseFilter::Version { operator, version } => match ReleaseVersion::parse(version) {
                Some(target) => {
                    let same_package = target.package.is_none() || target.package == parsed.package;
                    same_package && compare(operator, parsed.cmp(&target))
                }
                None => false,
            },
            ReleaseFilter::Package { package } => parsed.package.as_deref() == Some(package.as_str()),
            ReleaseFilter::Build { operator, build } => match (build.parse::<u64>(), parsed.build_code()) {
                (Ok(target), Some(code)) => compare(operator, code.cmp(&target)),
                _ => match operator {
                    Op::Eq => parsed.build.as_deref() == Some(build.as_str()),
                    Op::Neq => parsed.build.as_deref() != Some(build.as_str()),
                    _ => false,
                },
            },
            ReleaseFilter::Stage { .. } => false,
        }
    }
}

fn compare(operator: &Op, ordering: Ordering) -> bool {
    match operator {
        Op::Eq => ordering == Ordering::Equal,
        Op::Neq => ordering != Ordering::Equal,
        Op::Gt => ordering == Ordering::Greater,
        Op::Gte => ordering != Ordering::Less,
        Op::Lt => ordering == Ordering::Less,
        Op::Lte => ordering != Ordering::Greater,
        _ => false,
    }
}

impl CatalogService for InMemoryCatalog {
    fn resolve_project_slugs(&self, project_ids: &[u64]) -> Result<BTreeMap<String, u64>, CatalogError> {
        Ok(self
            .projects
            .iter()
            .filter(|p| project_ids.contains(&p.id))
            .map(|p| (p.slug.clone(), p.id))
            .collect())
    }

    fn resolve_release_versions(
        &self,
        filter: &ReleaseFilter,
        project_ids: &[u64],
        limit: usize,
    ) -> Result<Vec<String>, CatalogError> {
        let mut matched: Vec<(Option<ReleaseVersion>, &str)> = self
            .releases_in(project_ids)
            .filter(|r| Self::matches(r, filter))
            .map(|r| (ReleaseVersion::parse(&r.version), r.version.as_str()))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        if filter.descending() {
            matched.reverse();
        }
        let mut versions: Vec<String> = Vec::new();
        for (_, version) in matched {
            if !versions.iter().any(|v| v == version) {
                versions.push(version.to_string());
            }
        }
        versions.truncate(limit);
        Ok(versions)
    }

    fn latest_release_versions(&self, project_ids: &[u64], environments: &[String]) -> Result<Vec<String>, CatalogError> {
        let mut versions: Vec<String> = Vec::new();
        for project_id in project_ids {
            let latest = self.releases.iter().rev().find(|r| {
                r.project_ids.contains(project_id)
                    && (environments.is_empty()
                        || r.stages.is_empty()
                        || r.stages.keys().any(|env| environments.contains(env)))
            });
            if let Some(release) = latest {
                if !versions.contains(&release.version) {
                    versions.push(release.version.clone());
                }
            }
        }
        Ok(versions)
    }

    fn resolve_team_key_transactions(
        &self,
        team_ids: &[u64],
        project_ids: &[u64],
        limit: usize,
    ) -> Result<Vec<(u64, String)>, CatalogError> {
        let mut pairs: Vec<(u64, String)> = self
            .key_transactions
            .iter()
            .filter(|k| team_ids.contains(&k.team_id) && project_ids.contains(&k.project_id))
            .map(|k| (k.project_id, k.transaction.clone()))
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs.truncate(limit);
        Ok(pairs)
    }

    fn resolve_threshold_configs(&self, project_ids: &[u64], limit: usize) -> Result<ThresholdConfigs, CatalogError> {
        let mut projects: Vec<ProjectThreshold> = self
            .project_thresholds
            .iter()
            .filter(|t| project_ids.contains(&t.project_id))
            .cloned()
            .collect();
        projects.sort_by_key(|t| t.project_id);
        projects.truncate(limit);

        let mut transactions: Vec<TransactionThreshold> = self
            .transaction_thresholds
            .iter()
            .filter(|t| project_ids.contains(&t.project_id))
            .cloned()
            .collect();
        transactions.sort_by(|a, b| (a.project_id, &a.transaction).cmp(&(b.project_id, &b.transaction)));
        transactions.truncate(limit);

        Ok(ThresholdConfigs { projects, transactions })
    }

    fn resolve_issue_ids(&self, short_ids: &[String], project_ids: &[u64]) -> Result<BTreeMap<String, u64>, CatalogError> {
        Ok(self
            .issues
            .iter()
            .filter(|i| project_ids.is_empty() || project_ids.contains(&i.project_id))
            .filter_map(|i| {
                short_ids
                    .iter()
                    .find(|s| s.eq_ignore_ascii_case(&i.short_id))
                    .map(|s| (s.clone(), i.id))
            })
            .collect())
    }

    fn issue_short_ids(&self, issue_ids: &[u64]) -> Result<BTreeMap<u64, String>, CatalogError> {
        Ok(self
            .issues
            .iter()
            .filter(|i| issue_ids.contains(&i.id))
            .map(|i| (i.id, i.short_id.clone()))
            .collect())
    }
}
