use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Component, Scope, Vulnerability};

/// Per-scope component counts for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_components: usize,
    pub direct: usize,
    pub transitive: usize,
    pub optional: usize,
    pub dev: usize,
    pub vulnerabilities: usize,
}

impl ScanStats {
    pub fn from_components(components: &[Component]) -> Self {
        let mut stats = ScanStats {
            total_components: components.len(),
            ..Default::default()
        };
        for component in components {
            match component.scope() {
                Scope::Direct => stats.direct += 1,
                Scope::Transitive => stats.transitive += 1,
                Scope::Optional => stats.optional += 1,
                Scope::Dev => stats.dev += 1,
            }
        }
        stats
    }
}

/// The outcome of scanning one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Repository name or local path the scan ran against.
    pub source: String,
    pub scanned_at: DateTime<Utc>,
    pub technologies: Vec<String>,
    pub components: Vec<Component>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulnerabilities: Vec<Vulnerability>,
    pub stats: ScanStats,
}

impl ScanResult {
    pub fn new(
        source: impl Into<String>,
        technologies: Vec<String>,
        components: Vec<Component>,
    ) -> Self {
        let stats = ScanStats::from_components(&components);
        Self {
            source: source.into(),
            scanned_at: Utc::now(),
            technologies,
            components,
            vulnerabilities: Vec::new(),
            stats,
        }
    }

    pub fn with_vulnerabilities(mut self, vulnerabilities: Vec<Vulnerability>) -> Self {
        self.stats.vulnerabilities = vulnerabilities.len();
        self.vulnerabilities = vulnerabilities;
        self
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_count_scopes() {
        let components = vec![
            Component::new("a", "1.0.0"),
            Component::new("b", "1.0.0").with_scope(Scope::Transitive),
            Component::new("c", "1.0.0").with_scope(Scope::Dev),
            Component::new("d", "1.0.0").with_scope(Scope::Transitive),
        ];

        let result = ScanResult::new("repo", vec!["Rust".to_string()], components);
        assert_eq!(result.stats.total_components, 4);
        assert_eq!(result.stats.direct, 1);
        assert_eq!(result.stats.transitive, 2);
        assert_eq!(result.stats.dev, 1);
        assert_eq!(result.stats.optional, 0);
    }
}
