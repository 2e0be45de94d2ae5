use async_trait::async_trait;
use depscan::error::{ApiError, OrgScanError, ScanError, ValidationError};
use depscan::github::RepositoryFilter;
use depscan::model::{RepositoryDescriptor, RepositoryStatus};
use depscan::orchestrator::{OrgScanOptions, OrgScanner};
use depscan::source::{AccessReport, Checkout, RepositoryProvider};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory organization whose repositories are tiny npm projects.
struct FakeProvider {
    repos: Vec<RepositoryDescriptor>,
    access: AccessReport,
    failing: HashSet<String>,
    slow: HashSet<String>,
    clone_delay: Duration,
    listed: AtomicUsize,
    materialized: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeProvider {
    fn new(names: &[&str]) -> Self {
        Self {
            repos: names.iter().map(|n| RepositoryDescriptor::new(*n)).collect(),
            access: AccessReport {
                org_access: true,
                private_repos: true,
            },
            failing: HashSet::new(),
            slow: HashSet::new(),
            clone_delay: Duration::ZERO,
            listed: AtomicUsize::new(0),
            materialized: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    fn slow(mut self, name: &str) -> Self {
        self.slow.insert(name.to_string());
        self
    }

    fn with_repo(mut self, repo: RepositoryDescriptor) -> Self {
        self.repos.push(repo);
        self
    }

    fn with_access(mut self, org_access: bool, private_repos: bool) -> Self {
        self.access = AccessReport {
            org_access,
            private_repos,
        };
        self
    }

    fn with_clone_delay(mut self, delay: Duration) -> Self {
        self.clone_delay = delay;
        self
    }
}

#[async_trait]
impl RepositoryProvider for FakeProvider {
    async fn validate_access(
        &self,
        _organization: &str,
        include_private: bool,
    ) -> Result<AccessReport, ApiError> {
        Ok(AccessReport {
            org_access: self.access.org_access,
            private_repos: include_private && self.access.private_repos,
        })
    }

    async fn list_repositories(
        &self,
        _organization: &str,
    ) -> Result<Vec<RepositoryDescriptor>, ApiError> {
        self.listed.fetch_add(1, Ordering::SeqCst);
        Ok(self.repos.clone())
    }

    async fn materialize(&self, repo: &RepositoryDescriptor) -> Result<Checkout, ScanError> {
        self.materialized.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.slow.contains(&repo.name) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        tokio::time::sleep(self.clone_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&repo.name) {
            return Err(ScanError::RepositoryAccess {
                repository: repo.name.clone(),
                reason: "git clone failed: repository not found".to_string(),
            });
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(&repo.name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(
            path.join("package.json"),
            format!(
                r#"{{"name":"{0}","version":"1.0.0","dependencies":{{"lodash":"4.17.21","{0}-client":"1.0.0"}}}}"#,
                repo.name
            ),
        )
        .unwrap();
        Ok(Checkout::temporary(dir, path))
    }
}

fn names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("repo-{}", i)).collect()
}

fn provider(count: usize) -> FakeProvider {
    let names = names(count);
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    FakeProvider::new(&refs)
}

#[tokio::test]
async fn test_one_failure_does_not_affect_siblings() {
    let provider = Arc::new(provider(5).failing("repo-3"));
    let report = OrgScanner::new(provider)
        .scan("acme", &RepositoryFilter::default(), &OrgScanOptions::default())
        .await
        .unwrap();

    let summary = &report.summary;
    assert_eq!(summary.total_repositories, 5);
    assert_eq!(summary.successful_scans, 4);
    assert_eq!(summary.failed_scans, 1);
    assert!(summary.is_complete());
    assert!(report.has_failures());

    let failures = summary.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].repository, "repo-3");
    assert!(summary.failure_log().starts_with("repo-3: "));

    assert_eq!(report.results.len(), 4);
    assert_eq!(summary.technology_distribution["Node.js"], 4);

    // lodash is shared by every repository, the clients are not.
    let combined = report.combined.unwrap();
    assert_eq!(combined.len(), 5);
    assert_eq!(
        combined.iter().filter(|c| c.name() == "lodash").count(),
        1
    );
}

#[tokio::test]
async fn test_timeout_is_recorded_without_cancelling_others() {
    let provider = Arc::new(provider(4).slow("repo-2"));
    let options = OrgScanOptions {
        timeout: Duration::from_secs(2),
        ..Default::default()
    };

    let report = OrgScanner::new(provider)
        .scan("acme", &RepositoryFilter::default(), &options)
        .await
        .unwrap();

    assert_eq!(report.summary.successful_scans, 3);
    assert_eq!(report.summary.failed_scans, 1);

    let failures = report.summary.failures();
    assert_eq!(failures[0].repository, "repo-2");
    assert!(failures[0].reason.contains("timed out"), "{}", failures[0].reason);
}

#[tokio::test]
async fn test_missing_org_access_aborts_before_listing() {
    let provider = Arc::new(provider(3).with_access(false, false));
    let err = OrgScanner::new(provider.clone())
        .scan("acme", &RepositoryFilter::default(), &OrgScanOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrgScanError::Validation(ValidationError::NoOrganizationAccess(ref org)) if org == "acme"
    ));
    assert_eq!(provider.listed.load(Ordering::SeqCst), 0);
    assert_eq!(provider.materialized.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_private_requested_without_scope() {
    let provider = Arc::new(provider(3).with_access(true, false));
    let options = OrgScanOptions {
        include_private: true,
        ..Default::default()
    };

    let err = OrgScanner::new(provider.clone())
        .scan("acme", &RepositoryFilter::default(), &options)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrgScanError::Validation(ValidationError::MissingPrivateScope(_))
    ));
    assert_eq!(provider.materialized.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_filtered_repositories_are_skipped() {
    let provider = Arc::new(
        provider(2).with_repo(RepositoryDescriptor::new("upstream-fork").with_fork(true)),
    );

    let report = OrgScanner::new(provider.clone())
        .scan("acme", &RepositoryFilter::default(), &OrgScanOptions::default())
        .await
        .unwrap();

    assert_eq!(report.summary.total_repositories, 2);
    assert_eq!(report.summary.successful_scans, 2);
    assert_eq!(report.summary.skipped_repositories, 1);
    assert_eq!(provider.materialized.load(Ordering::SeqCst), 2);

    let fork = report
        .summary
        .repositories
        .iter()
        .find(|r| r.name == "upstream-fork")
        .unwrap();
    assert_eq!(
        fork.status,
        RepositoryStatus::Skipped {
            reason: "fork".to_string()
        }
    );
}

#[tokio::test]
async fn test_concurrency_never_exceeds_workers() {
    let provider = Arc::new(provider(8).with_clone_delay(Duration::from_millis(50)));
    let options = OrgScanOptions {
        workers: 2,
        batch_size: 10,
        ..Default::default()
    };

    let report = OrgScanner::new(provider.clone())
        .scan("acme", &RepositoryFilter::default(), &options)
        .await
        .unwrap();

    assert_eq!(report.summary.successful_scans, 8);
    assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_batch_size() {
    let provider = Arc::new(provider(7).with_clone_delay(Duration::from_millis(50)));
    let options = OrgScanOptions {
        workers: 8,
        batch_size: 3,
        ..Default::default()
    };

    let report = OrgScanner::new(provider.clone())
        .scan("acme", &RepositoryFilter::default(), &options)
        .await
        .unwrap();

    assert_eq!(report.summary.successful_scans, 7);
    assert!(report.summary.is_complete());
    assert!(provider.max_in_flight.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_combined_report_can_be_disabled() {
    let provider = Arc::new(provider(2));
    let options = OrgScanOptions {
        combined: false,
        ..Default::default()
    };

    let report = OrgScanner::new(provider)
        .scan("acme", &RepositoryFilter::default(), &options)
        .await
        .unwrap();

    assert!(report.combined.is_none());
    let sources: Vec<_> = report.results.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(sources, vec!["repo-1", "repo-2"]);
}
