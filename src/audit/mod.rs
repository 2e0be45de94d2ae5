//! Vulnerability auditing.
//!
//! Looks up known vulnerabilities for discovered components and attaches
//! them to a [`ScanResult`]. Lookups are best effort: a failing database
//! never fails the scan.

mod osv;

pub use osv::{parse_cvss_score, OsvChecker};

use crate::model::{Component, ScanResult, Vulnerability};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait VulnerabilityChecker: Send + Sync {
    fn name(&self) -> &'static str;
    async fn check(&self, components: &[Component]) -> Result<Vec<Vulnerability>>;
}

/// Runs `checker` over the result's components and attaches the findings.
///
/// On checker failure the result is returned unchanged and the error logged.
pub async fn audit(result: ScanResult, checker: &dyn VulnerabilityChecker) -> ScanResult {
    if result.components.is_empty() {
        return result;
    }

    match checker.check(&result.components).await {
        Ok(vulns) => {
            tracing::debug!(
                source = %result.source,
                checker = checker.name(),
                vulnerabilities = vulns.len(),
                "audit finished"
            );
            result.with_vulnerabilities(vulns)
        }
        Err(e) => {
            tracing::warn!(source = %result.source, checker = checker.name(), error = %e, "audit failed");
            result
        }
    }
}
