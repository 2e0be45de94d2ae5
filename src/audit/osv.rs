use crate::cache::Cache;
use crate::config::AuditConfig;
use crate::model::{Component, Severity, Vulnerability};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum number of components to query in a single batch request.
const BATCH_SIZE: usize = 100;

const OSV_BATCH_URL: &str = "https://api.osv.dev/v1/querybatch";

/// Queries OSV.dev by package url, caching answers per purl.
pub struct OsvChecker {
    client: reqwest::Client,
    cache: Arc<Cache>,
    audit: AuditConfig,
}

impl OsvChecker {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache,
            audit: AuditConfig::default(),
        }
    }

    /// Applies the `[audit]` section; its ignore list is dropped from every report.
    pub fn with_audit_config(mut self, audit: AuditConfig) -> Self {
        self.audit = audit;
        self
    }

    fn cache_key(purl: &str) -> String {
        format!("osv_{}", purl)
    }

    /// Performs a batch query to OSV.dev for multiple components at once.
    /// Returns findings keyed by the index of the queried component.
    async fn batch_query(&self, components: &[&Component]) -> Result<Vec<Vec<Vulnerability>>> {
        let queries: Vec<OsvBatchQueryItem> = components
            .iter()
            .filter_map(|c| {
                Some(OsvBatchQueryItem {
                    package: OsvPackage {
                        purl: c.purl()?.to_string(),
                    },
                })
            })
            .collect();

        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(OSV_BATCH_URL)
            .json(&OsvBatchQuery { queries })
            .send()
            .await?
            .error_for_status()?;

        let batch_response: OsvBatchResponse = response.json().await?;

        Ok(components
            .iter()
            .zip(batch_response.results)
            .map(|(component, result)| {
                result
                    .vulns
                    .unwrap_or_default()
                    .into_iter()
                    .map(|v| to_vulnerability(component, v))
                    .collect()
            })
            .collect())
    }
}

#[derive(Serialize)]
struct OsvPackage {
    purl: String,
}

#[derive(Serialize)]
struct OsvBatchQuery {
    queries: Vec<OsvBatchQueryItem>,
}

#[derive(Serialize)]
struct OsvBatchQueryItem {
    package: OsvPackage,
}

#[derive(Deserialize)]
struct OsvBatchResponse {
    results: Vec<OsvBatchResult>,
}

#[derive(Deserialize)]
struct OsvBatchResult {
    vulns: Option<Vec<OsvVuln>>,
}

#[derive(Deserialize)]
struct OsvVuln {
    id: String,
    summary: Option<String>,
    details: Option<String>,
    severity: Option<Vec<OsvSeverity>>,
    affected: Option<Vec<OsvAffected>>,
    references: Option<Vec<OsvReference>>,
}

#[derive(Deserialize)]
struct OsvSeverity {
    score: Option<String>,
}

#[derive(Deserialize)]
struct OsvAffected {
    ranges: Option<Vec<OsvRange>>,
}

#[derive(Deserialize)]
struct OsvRange {
    events: Option<Vec<OsvEvent>>,
}

#[derive(Deserialize)]
struct OsvEvent {
    fixed: Option<String>,
}

#[derive(Deserialize)]
struct OsvReference {
    url: Option<String>,
}

#[async_trait]
impl super::VulnerabilityChecker for OsvChecker {
    fn name(&self) -> &'static str {
        "OSV.dev"
    }

    async fn check(&self, components: &[Component]) -> Result<Vec<Vulnerability>> {
        let mut vulnerabilities = Vec::new();
        let mut pending: Vec<&Component> = Vec::new();

        // Ranges cannot be matched against advisories.
        for component in components.iter().filter(|c| c.is_resolved()) {
            let Some(purl) = component.purl() else {
                continue;
            };
            match self.cache.get::<Vec<Vulnerability>>(&Self::cache_key(purl)) {
                Some(cached) => vulnerabilities.extend(cached),
                None => pending.push(component),
            }
        }

        for chunk in pending.chunks(BATCH_SIZE) {
            let findings = match self.batch_query(chunk).await {
                Ok(findings) => findings,
                Err(e) => {
                    tracing::warn!(error = %e, components = chunk.len(), "OSV batch query failed");
                    continue;
                }
            };

            for (component, found) in chunk.iter().zip(findings) {
                if let Some(purl) = component.purl() {
                    if let Err(e) = self.cache.set(&Self::cache_key(purl), &found) {
                        tracing::debug!(error = %e, "failed to cache OSV response");
                    }
                }
                vulnerabilities.extend(found);
            }
        }

        vulnerabilities.retain(|v| !self.audit.should_ignore_vulnerability(&v.id));
        Ok(vulnerabilities)
    }
}

fn to_vulnerability(component: &Component, vuln: OsvVuln) -> Vulnerability {
    let severity = parse_severity(&vuln);
    let fixed_version = extract_fixed_version(&vuln);
    let reference_url = vuln
        .references
        .and_then(|refs| refs.into_iter().find_map(|r| r.url));

    Vulnerability {
        id: vuln.id,
        component: component.name().to_string(),
        purl: component.purl().map(str::to_string),
        severity,
        title: vuln
            .summary
            .unwrap_or_else(|| "Unknown vulnerability".to_string()),
        description: vuln.details,
        fixed_version,
        reference_url,
    }
}

/// Parses CVSS score into a severity level.
///
/// Supports both numeric scores and CVSS vector strings.
pub fn parse_cvss_score(score: &str) -> Severity {
    if let Ok(cvss) = score.parse::<f32>() {
        return match cvss {
            s if s >= 9.0 => Severity::Critical,
            s if s >= 7.0 => Severity::High,
            s if s >= 4.0 => Severity::Medium,
            s if s > 0.0 => Severity::Low,
            _ => Severity::Unknown,
        };
    }

    // Vector strings carry no base score; approximate from the impact metrics.
    if score.contains("CVSS:") {
        if score.contains("/C:H") || score.contains("/I:H") || score.contains("/A:H") {
            return Severity::High;
        }
        if score.contains("/C:L") || score.contains("/I:L") || score.contains("/A:L") {
            return Severity::Medium;
        }
        return Severity::Low;
    }

    Severity::Unknown
}

fn parse_severity(vuln: &OsvVuln) -> Severity {
    vuln.severity
        .iter()
        .flatten()
        .filter_map(|s| s.score.as_deref())
        .map(parse_cvss_score)
        .find(|s| *s != Severity::Unknown)
        .unwrap_or(Severity::Unknown)
}

fn extract_fixed_version(vuln: &OsvVuln) -> Option<String> {
    vuln.affected.as_ref()?.iter().find_map(|affected| {
        affected.ranges.as_ref()?.iter().find_map(|range| {
            range
                .events
                .as_ref()?
                .iter()
                .find_map(|event| event.fixed.clone())
        })
    })
}
