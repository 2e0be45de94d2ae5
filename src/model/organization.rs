use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What happened to one repository during an organization scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RepositoryStatus {
    Success {
        components: usize,
        vulnerabilities: usize,
        technologies: Vec<String>,
    },
    Failed {
        reason: String,
    },
    /// Excluded before scanning, e.g. by the repository filter.
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryOutcome {
    pub name: String,
    #[serde(flatten)]
    pub status: RepositoryStatus,
}

impl RepositoryOutcome {
    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RepositoryStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RepositoryStatus::Skipped {
                reason: reason.into(),
            },
        }
    }
}

/// One line of the failed-scans log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedScan {
    pub repository: String,
    pub reason: String,
}

impl fmt::Display for FailedScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.repository, self.reason)
    }
}

/// Aggregate over all repositories of one organization scan.
///
/// `total_repositories` counts the repositories that passed filtering;
/// once every one of them has been recorded,
/// `successful_scans + failed_scans == total_repositories`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationScanSummary {
    pub organization: String,
    pub scan_date: DateTime<Utc>,
    pub total_repositories: usize,
    pub successful_scans: usize,
    pub failed_scans: usize,
    pub skipped_repositories: usize,
    pub total_components: usize,
    pub total_vulnerabilities: usize,
    pub technology_distribution: BTreeMap<String, usize>,
    pub repositories: Vec<RepositoryOutcome>,
}

impl OrganizationScanSummary {
    pub fn new(organization: impl Into<String>, total_repositories: usize) -> Self {
        Self {
            organization: organization.into(),
            scan_date: Utc::now(),
            total_repositories,
            successful_scans: 0,
            failed_scans: 0,
            skipped_repositories: 0,
            total_components: 0,
            total_vulnerabilities: 0,
            technology_distribution: BTreeMap::new(),
            repositories: Vec::new(),
        }
    }

    /// Appends one repository outcome and updates the running totals.
    pub fn record(&mut self, outcome: RepositoryOutcome) {
        match &outcome.status {
            RepositoryStatus::Success {
                components,
                vulnerabilities,
                technologies,
            } => {
                self.successful_scans += 1;
                self.total_components += components;
                self.total_vulnerabilities += vulnerabilities;
                for tech in technologies {
                    *self.technology_distribution.entry(tech.clone()).or_insert(0) += 1;
                }
            }
            RepositoryStatus::Failed { .. } => self.failed_scans += 1,
            RepositoryStatus::Skipped { .. } => self.skipped_repositories += 1,
        }
        self.repositories.push(outcome);
    }

    /// Every repository that did not complete successfully, with its reason.
    pub fn failures(&self) -> Vec<FailedScan> {
        self.repositories
            .iter()
            .filter_map(|r| match &r.status {
                RepositoryStatus::Failed { reason } => Some(FailedScan {
                    repository: r.name.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.successful_scans + self.failed_scans == self.total_repositories
    }

    /// Renders the failed-scans log, one `repository: reason` line per failure.
    pub fn failure_log(&self) -> String {
        self.failures()
            .iter()
            .map(|f| format!("{}\n", f))
            .collect()
    }

    /// Sorts the outcome list by repository name for stable reports.
    pub fn finalize(mut self) -> Self {
        self.repositories.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }
}
