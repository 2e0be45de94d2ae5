//! Parallel organization scanning.
//!
//! [`OrgScanner`] validates access, lists and filters the organization's
//! repositories, then scans them in sequential batches. Inside a batch a
//! semaphore bounds how many repositories are cloned and scanned at once.
//! A repository that fails, panics or times out is recorded as failed and
//! never affects its siblings.

use crate::aggregator::{merge_components, Aggregator};
use crate::audit::{audit, VulnerabilityChecker};
use crate::config::Config;
use crate::error::{OrgScanError, ScanError, ValidationError};
use crate::github::RepositoryFilter;
use crate::model::{
    Component, OrganizationScanSummary, RepositoryDescriptor, RepositoryOutcome,
    RepositoryStatus, ScanResult,
};
use crate::source::{AccessReport, RepositoryProvider};
use futures::FutureExt;
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Knobs for one organization scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgScanOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub include_dev: bool,
    pub audit: bool,
    /// Upper bound for one repository, clone included.
    pub timeout: Duration,
    pub include_private: bool,
    /// Also produce a component list deduplicated across repositories.
    pub combined: bool,
}

impl Default for OrgScanOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10,
            include_dev: false,
            audit: false,
            timeout: Duration::from_secs(300),
            include_private: false,
            combined: true,
        }
    }
}

impl OrgScanOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.scan.parallel_workers,
            batch_size: config.scan.batch_size,
            include_dev: config.scan.include_dev_dependencies,
            audit: config.audit.enabled,
            timeout: Duration::from_secs(config.scan.timeout_secs),
            include_private: config.github.include_private,
            combined: config.scan.combined_report,
        }
    }

    fn check(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidOptions(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidOptions(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ValidationError::InvalidOptions(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Repositories in flight at once within a batch.
    pub fn concurrency(&self) -> usize {
        self.workers.min(self.batch_size).max(1)
    }
}

/// Everything an organization scan produced.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationReport {
    pub summary: OrganizationScanSummary,
    /// Per-repository results of successful scans, ordered by repository.
    pub results: Vec<ScanResult>,
    /// Components deduplicated across every successful repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<Vec<Component>>,
}

impl OrganizationReport {
    pub fn has_failures(&self) -> bool {
        self.summary.failed_scans > 0
    }
}

/// Shared between the workers of a run.
struct Accumulator {
    summary: OrganizationScanSummary,
    results: Vec<ScanResult>,
}

impl Accumulator {
    fn record(&mut self, name: &str, outcome: Result<ScanResult, String>) {
        match outcome {
            Ok(result) => {
                self.summary.record(RepositoryOutcome {
                    name: name.to_string(),
                    status: RepositoryStatus::Success {
                        components: result.components.len(),
                        vulnerabilities: result.vulnerabilities.len(),
                        technologies: result.technologies.clone(),
                    },
                });
                self.results.push(result);
            }
            Err(reason) => {
                tracing::warn!(repository = %name, error = %reason, "repository scan failed");
                self.summary.record(RepositoryOutcome::failed(name, reason));
            }
        }
    }

    fn recorded(&self) -> HashSet<String> {
        self.summary
            .repositories
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }
}

type Shared = Arc<Mutex<Accumulator>>;

fn lock(shared: &Shared) -> std::sync::MutexGuard<'_, Accumulator> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scans every selected repository of an organization.
///
/// # Example
///
/// ```no_run
/// use depscan::config::Config;
/// use depscan::github::{GitHubClient, GitHubProvider, RepositoryFilter};
/// use depscan::orchestrator::{OrgScanOptions, OrgScanner};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = Config::load()?.apply_env();
///     let client = GitHubClient::new(&config.github)?;
///     let provider = Arc::new(GitHubProvider::new(client, &config.github));
///
///     let report = OrgScanner::new(provider)
///         .scan(
///             "acme",
///             &RepositoryFilter::from_config(&config.github),
///             &OrgScanOptions::from_config(&config),
///         )
///         .await?;
///     println!("{} repositories scanned", report.summary.successful_scans);
///     Ok(())
/// }
/// ```
pub struct OrgScanner {
    provider: Arc<dyn RepositoryProvider>,
    aggregator: Aggregator,
    checker: Option<Arc<dyn VulnerabilityChecker>>,
    progress: Option<ProgressBar>,
}

impl OrgScanner {
    pub fn new(provider: Arc<dyn RepositoryProvider>) -> Self {
        Self {
            provider,
            aggregator: Aggregator::default(),
            checker: None,
            progress: None,
        }
    }

    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Checker used when [`OrgScanOptions::audit`] is set.
    pub fn with_checker(mut self, checker: Arc<dyn VulnerabilityChecker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Progress bar ticked once per finished repository; its length is set
    /// when the repository list is known.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Checks options and access before anything is listed or cloned.
    pub async fn validate(
        &self,
        organization: &str,
        options: &OrgScanOptions,
    ) -> Result<AccessReport, ValidationError> {
        options.check()?;

        let report = self
            .provider
            .validate_access(organization, options.include_private)
            .await?;

        if !report.org_access {
            return Err(ValidationError::NoOrganizationAccess(
                organization.to_string(),
            ));
        }
        if options.include_private && !report.private_repos {
            return Err(ValidationError::MissingPrivateScope(
                organization.to_string(),
            ));
        }

        tracing::info!(
            organization,
            private_repos = report.private_repos,
            "access validated"
        );
        Ok(report)
    }

    pub async fn scan(
        &self,
        organization: &str,
        filter: &RepositoryFilter,
        options: &OrgScanOptions,
    ) -> Result<OrganizationReport, OrgScanError> {
        self.validate(organization, options).await?;

        let listed = self
            .provider
            .list_repositories(organization)
            .await
            .map_err(OrgScanError::Listing)?;
        let listed_count = listed.len();
        let (selected, excluded) = filter.partition(listed);

        tracing::info!(
            organization,
            listed = listed_count,
            selected = selected.len(),
            excluded = excluded.len(),
            "repositories filtered"
        );

        let mut summary = OrganizationScanSummary::new(organization, selected.len());
        for (repo, reason) in excluded {
            tracing::debug!(repository = %repo.name, reason = %reason, "repository skipped");
            summary.record(RepositoryOutcome::skipped(repo.name, reason));
        }

        let shared: Shared = Arc::new(Mutex::new(Accumulator {
            summary,
            results: Vec::new(),
        }));

        if let Some(pb) = &self.progress {
            pb.set_length(selected.len() as u64);
        }

        let batch_count = selected.len().div_ceil(options.batch_size);
        for (index, batch) in selected.chunks(options.batch_size).enumerate() {
            tracing::info!(
                batch = index + 1,
                of = batch_count,
                repositories = batch.len(),
                "scanning batch"
            );
            self.run_batch(batch, options, &shared).await;
        }

        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }

        let accumulator = match Arc::try_unwrap(shared) {
            Ok(mutex) => mutex.into_inner().unwrap_or_else(PoisonError::into_inner),
            Err(shared) => {
                let guard = lock(&shared);
                Accumulator {
                    summary: guard.summary.clone(),
                    results: guard.results.clone(),
                }
            }
        };

        let summary = accumulator.summary.finalize();
        let mut results = accumulator.results;
        results.sort_by(|a, b| a.source.cmp(&b.source));

        let combined = options.combined.then(|| {
            merge_components(results.iter().flat_map(|r| r.components.iter().cloned()))
        });

        tracing::info!(
            organization,
            successful = summary.successful_scans,
            failed = summary.failed_scans,
            skipped = summary.skipped_repositories,
            components = summary.total_components,
            "organization scan finished"
        );

        Ok(OrganizationReport {
            summary,
            results,
            combined,
        })
    }

    async fn run_batch(
        &self,
        batch: &[RepositoryDescriptor],
        options: &OrgScanOptions,
        shared: &Shared,
    ) {
        let semaphore = Arc::new(Semaphore::new(options.concurrency()));
        let mut tasks = JoinSet::new();

        for repo in batch {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    lock(shared).record(&repo.name, Err(format!("worker pool closed: {}", e)));
                    continue;
                }
            };

            let provider = Arc::clone(&self.provider);
            let aggregator = self.aggregator.clone();
            let checker = if options.audit {
                self.checker.clone()
            } else {
                None
            };
            let repo = repo.clone();
            let shared = Arc::clone(shared);
            let progress = self.progress.clone();
            let include_dev = options.include_dev;
            let timeout = options.timeout;

            tasks.spawn(async move {
                let name = repo.name.clone();
                let work = scan_repository(provider, aggregator, checker, repo, include_dev);
                let outcome = match AssertUnwindSafe(tokio::time::timeout(timeout, work))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(Ok(result))) => Ok(result),
                    Ok(Ok(Err(e))) => Err(e.to_string()),
                    Ok(Err(_elapsed)) => Err(ScanError::Timeout {
                        repository: name.clone(),
                        seconds: timeout.as_secs(),
                    }
                    .to_string()),
                    Err(_) => Err("scan task panicked".to_string()),
                };

                lock(&shared).record(&name, outcome);
                if let Some(pb) = progress {
                    pb.inc(1);
                    pb.set_message(name);
                }
                drop(permit);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "scan task aborted");
            }
        }

        // A task that died before recording still has to show up as failed.
        let mut acc = lock(shared);
        let recorded = acc.recorded();
        for repo in batch {
            if !recorded.contains(&repo.name) {
                acc.record(&repo.name, Err("scan task aborted".to_string()));
            }
        }
    }
}

async fn scan_repository(
    provider: Arc<dyn RepositoryProvider>,
    aggregator: Aggregator,
    checker: Option<Arc<dyn VulnerabilityChecker>>,
    repo: RepositoryDescriptor,
    include_dev: bool,
) -> Result<ScanResult, ScanError> {
    let checkout = provider.materialize(&repo).await?;
    tracing::debug!(repository = %repo.name, path = %checkout.path().display(), "repository materialized");

    let result = aggregator
        .scan_as(&repo.name, checkout.path(), include_dev)
        .await?;

    Ok(match checker {
        Some(checker) => audit(result, checker.as_ref()).await,
        None => result,
    })
}
