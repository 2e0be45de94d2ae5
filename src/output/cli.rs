use crate::detector::Technology;
use crate::model::{RepositoryStatus, ScanResult, Severity, Vulnerability};
use crate::orchestrator::OrganizationReport;
use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Ecosystem")]
    ecosystem: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "License")]
    license: String,
}

#[derive(Tabled)]
struct VulnRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Fixed In")]
    fixed_in: String,
}

#[derive(Tabled)]
struct TechnologyRow {
    #[tabled(rename = "Technology")]
    name: String,
    #[tabled(rename = "Scanner")]
    scanner: String,
    #[tabled(rename = "Files")]
    files: String,
}

#[derive(Tabled)]
struct RepositoryRow {
    #[tabled(rename = "Repository")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Components")]
    components: String,
    #[tabled(rename = "Vulns")]
    vulnerabilities: String,
    #[tabled(rename = "Details")]
    details: String,
}

pub fn print_cli_table(result: &ScanResult) -> Result<()> {
    println!();
    println!(
        "Scan of {} completed at: {}",
        result.source,
        result.scanned_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if !result.technologies.is_empty() {
        println!("Technologies: {}", result.technologies.join(", "));
    }
    println!();

    if result.components.is_empty() {
        println!("No components found.");
    } else {
        println!("Found {} components:", result.components.len());
        println!();

        let rows: Vec<ComponentRow> = result
            .components
            .iter()
            .map(|c| ComponentRow {
                ecosystem: c
                    .ecosystem()
                    .map(|e| e.technology().to_string())
                    .unwrap_or_else(|| "-".to_string()),
                name: truncate(&qualified_name(c.group(), c.name()), 50),
                version: truncate(c.version(), 24),
                scope: c.scope().as_str().to_string(),
                license: c.license().map(|l| truncate(l, 20)).unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }

    print_vulnerabilities(&result.vulnerabilities);

    println!();
    print_summary(result);

    Ok(())
}

pub fn print_technologies(path: &str, technologies: &[Technology]) -> Result<()> {
    if technologies.is_empty() {
        println!("No supported technologies detected in {}", path);
        return Ok(());
    }

    println!("Detected {} technologies in {}:", technologies.len(), path);
    println!();

    let rows: Vec<TechnologyRow> = technologies
        .iter()
        .map(|t| TechnologyRow {
            name: t.name.clone(),
            scanner: t.scanner.clone(),
            files: t.files.join(", "),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
    Ok(())
}

pub fn print_org_table(report: &OrganizationReport) -> Result<()> {
    let summary = &report.summary;

    println!();
    println!(
        "Organization {} scanned at: {}",
        summary.organization,
        summary.scan_date.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    if !summary.repositories.is_empty() {
        let rows: Vec<RepositoryRow> = summary
            .repositories
            .iter()
            .map(|r| match &r.status {
                RepositoryStatus::Success {
                    components,
                    vulnerabilities,
                    technologies,
                } => RepositoryRow {
                    name: truncate(&r.name, 40),
                    status: "\x1b[32mok\x1b[0m".to_string(),
                    components: components.to_string(),
                    vulnerabilities: vulnerabilities.to_string(),
                    details: technologies.join(", "),
                },
                RepositoryStatus::Failed { reason } => RepositoryRow {
                    name: truncate(&r.name, 40),
                    status: "\x1b[31mfailed\x1b[0m".to_string(),
                    components: "-".to_string(),
                    vulnerabilities: "-".to_string(),
                    details: truncate(reason, 60),
                },
                RepositoryStatus::Skipped { reason } => RepositoryRow {
                    name: truncate(&r.name, 40),
                    status: "skipped".to_string(),
                    components: "-".to_string(),
                    vulnerabilities: "-".to_string(),
                    details: truncate(reason, 60),
                },
            })
            .collect();

        let table = Table::new(rows).with(Style::rounded()).to_string();
        println!("{}", table);
    }

    println!();
    println!("Summary:");
    println!("  Repositories scanned: {}", summary.total_repositories);
    println!("  Successful: {}", summary.successful_scans);
    println!("  Failed: {}", summary.failed_scans);
    if summary.skipped_repositories > 0 {
        println!("  Skipped by filter: {}", summary.skipped_repositories);
    }
    println!("  Components: {}", summary.total_components);
    if let Some(combined) = &report.combined {
        println!("  Unique components across repositories: {}", combined.len());
    }
    if summary.total_vulnerabilities > 0 {
        println!("  Vulnerabilities: {}", summary.total_vulnerabilities);
    }

    if !summary.technology_distribution.is_empty() {
        let mut techs: Vec<_> = summary.technology_distribution.iter().collect();
        techs.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let line: Vec<String> = techs
            .iter()
            .map(|(tech, count)| format!("{} {}", count, tech))
            .collect();
        println!("  Technologies: {}", line.join(", "));
    }

    Ok(())
}

fn print_vulnerabilities(vulnerabilities: &[Vulnerability]) {
    if vulnerabilities.is_empty() {
        return;
    }

    println!();
    println!("Found {} vulnerabilities:", vulnerabilities.len());
    println!();

    let mut vulns = vulnerabilities.to_vec();
    vulns.sort_by_key(|v| v.severity);

    let rows: Vec<VulnRow> = vulns
        .iter()
        .map(|v| VulnRow {
            severity: format_severity(&v.severity),
            component: truncate(&v.component, 40),
            id: v.id.clone(),
            title: truncate(&v.title, 50),
            fixed_in: v.fixed_version.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

fn format_severity(severity: &Severity) -> String {
    match severity {
        Severity::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        Severity::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        Severity::Medium => "\x1b[33mMEDIUM\x1b[0m".to_string(),
        Severity::Low => "\x1b[32mLOW\x1b[0m".to_string(),
        Severity::Unknown => "UNKNOWN".to_string(),
    }
}

fn qualified_name(group: Option<&str>, name: &str) -> String {
    match group {
        Some(g) if !g.is_empty() => format!("{}:{}", g, name),
        _ => name.to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

/// Health score (0-100) from vulnerability severities.
fn calculate_health_score(result: &ScanResult) -> u8 {
    if result.components.is_empty() {
        return 100;
    }

    let mut score: i32 = 100;
    for vuln in &result.vulnerabilities {
        match vuln.severity {
            Severity::Critical => score -= 25,
            Severity::High => score -= 15,
            Severity::Medium => score -= 8,
            Severity::Low => score -= 3,
            Severity::Unknown => score -= 5,
        }
    }

    score.clamp(0, 100) as u8
}

fn health_score_indicator(score: u8) -> &'static str {
    match score {
        90..=100 => "[Excellent]",
        70..=89 => "[Good]",
        50..=69 => "[Fair]",
        25..=49 => "[Poor]",
        _ => "[Critical]",
    }
}

fn print_summary(result: &ScanResult) {
    let count = |severity: Severity| {
        result
            .vulnerabilities
            .iter()
            .filter(|v| v.severity == severity)
            .count()
    };

    let stats = &result.stats;
    println!("Summary:");
    println!(
        "  Total components: {} ({} direct, {} transitive, {} optional, {} dev)",
        stats.total_components, stats.direct, stats.transitive, stats.optional, stats.dev
    );

    if !result.vulnerabilities.is_empty() {
        println!(
            "  Vulnerabilities: {} critical, {} high, {} medium, {} low",
            count(Severity::Critical),
            count(Severity::High),
            count(Severity::Medium),
            count(Severity::Low)
        );

        let score = calculate_health_score(result);
        println!();
        println!("Health Score: {}/100 {}", score, health_score_indicator(score));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Component;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_name(Some("org.slf4j"), "slf4j-api"), "org.slf4j:slf4j-api");
        assert_eq!(qualified_name(None, "lodash"), "lodash");
    }

    #[test]
    fn test_health_score_deducts_by_severity() {
        let vuln = |severity| Vulnerability {
            id: "GHSA-1".to_string(),
            component: "lodash".to_string(),
            purl: None,
            severity,
            title: "Prototype pollution".to_string(),
            description: None,
            fixed_version: None,
            reference_url: None,
        };

        let result = ScanResult::new("repo", vec![], vec![Component::new("lodash", "4.17.20")])
            .with_vulnerabilities(vec![vuln(Severity::Critical), vuln(Severity::Low)]);
        assert_eq!(calculate_health_score(&result), 72);
        assert_eq!(health_score_indicator(72), "[Good]");

        let clean = ScanResult::new("repo", vec![], vec![]);
        assert_eq!(calculate_health_score(&clean), 100);
    }
}
