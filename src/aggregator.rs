//! Scanner aggregation and component deduplication.
//!
//! The [`Aggregator`] runs every applicable scanner against one path,
//! isolates scanner failures, and folds the combined output into a
//! deduplicated [`ScanResult`].
//!
//! # Merge rules
//!
//! Components sharing a [`DedupKey`](crate::model::DedupKey) are merged:
//! - the more specific scope wins (direct > transitive > optional > dev)
//! - optional fields keep the first non-empty value seen
//! - hash sets are unioned

use crate::detector::TechnologyDetector;
use crate::error::ScanError;
use crate::model::{Component, DedupKey, ScanResult};
use crate::scanner::Scanner;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

/// Folds components into one entry per dedup key, keeping first-seen order.
///
/// ```
/// use depscan::aggregator::merge_components;
/// use depscan::model::{Component, Ecosystem};
///
/// let a = Component::from_ecosystem(Ecosystem::Npm, None, "lodash", "4.17.21");
/// let merged = merge_components(vec![a.clone(), a]);
/// assert_eq!(merged.len(), 1);
/// ```
pub fn merge_components<I>(components: I) -> Vec<Component>
where
    I: IntoIterator<Item = Component>,
{
    let mut order: Vec<DedupKey> = Vec::new();
    let mut merged: HashMap<DedupKey, Component> = HashMap::new();

    for component in components {
        let key = component.dedup_key();
        match merged.get_mut(&key) {
            Some(existing) => *existing = existing.merged(&component),
            None => {
                order.push(key.clone());
                merged.insert(key, component);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

/// Runs the applicable scanners for a path and merges their output.
#[derive(Clone, Default)]
pub struct Aggregator {
    detector: TechnologyDetector,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scanners(scanners: Vec<Arc<dyn Scanner>>) -> Self {
        Self {
            detector: TechnologyDetector::with_scanners(scanners),
        }
    }

    pub fn detector(&self) -> &TechnologyDetector {
        &self.detector
    }

    /// Scans `path` with every scanner whose `detect` fires.
    ///
    /// A scanner that errors or panics is logged and excluded; the others
    /// still contribute. Fails only when `path` is not a readable directory.
    pub async fn scan(&self, path: &Path, include_dev: bool) -> Result<ScanResult, ScanError> {
        self.scan_as(&path.display().to_string(), path, include_dev)
            .await
    }

    /// Like [`Aggregator::scan`], reporting `source` as the result's origin.
    pub async fn scan_as(
        &self,
        source: &str,
        path: &Path,
        include_dev: bool,
    ) -> Result<ScanResult, ScanError> {
        if !path.is_dir() {
            return Err(ScanError::RepositoryAccess {
                repository: source.to_string(),
                reason: format!("{} is not a readable directory", path.display()),
            });
        }

        let scanners = self.detector.applicable(path);
        tracing::debug!(
            source,
            scanners = scanners.len(),
            "running applicable scanners"
        );

        let runs = scanners.iter().map(|scanner| async move {
            let outcome = AssertUnwindSafe(scanner.scan(path, include_dev))
                .catch_unwind()
                .await;
            (scanner, outcome)
        });

        let mut technologies = Vec::new();
        let mut components = Vec::new();
        for (scanner, outcome) in join_all(runs).await {
            match outcome {
                Ok(Ok(found)) => {
                    tracing::debug!(scanner = scanner.id(), components = found.len(), "scanner finished");
                    let tech = scanner.technology().to_string();
                    if !technologies.contains(&tech) {
                        technologies.push(tech);
                    }
                    components.extend(found);
                }
                Ok(Err(e)) => {
                    tracing::warn!(scanner = scanner.id(), source, error = %e, "scanner failed");
                }
                Err(_) => {
                    tracing::warn!(scanner = scanner.id(), source, "scanner panicked");
                }
            }
        }

        Ok(ScanResult::new(
            source,
            technologies,
            merge_components(components),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ecosystem, Scope};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    fn lodash() -> Component {
        Component::from_ecosystem(Ecosystem::Npm, None, "lodash", "4.17.21")
    }

    fn keys(components: &[Component]) -> BTreeSet<String> {
        components.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_merge_is_idempotent() {
        let set = vec![
            lodash(),
            Component::new("internal", "1.0.0"),
            lodash().with_scope(Scope::Dev),
        ];
        let once = merge_components(set.clone());
        let twice = merge_components(set.iter().cloned().chain(set.iter().cloned()));
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_merge_is_commutative() {
        let a = vec![lodash().with_scope(Scope::Transitive), Component::new("x", "1")];
        let b = vec![lodash().with_scope(Scope::Direct), Component::new("y", "2")];

        let ab = merge_components(a.iter().cloned().chain(b.iter().cloned()));
        let ba = merge_components(b.iter().cloned().chain(a.iter().cloned()));
        assert_eq!(keys(&ab), keys(&ba));
    }

    #[test]
    fn test_merge_scope_precedence() {
        let merged = merge_components(vec![
            lodash().with_scope(Scope::Dev),
            lodash().with_scope(Scope::Optional),
            lodash().with_scope(Scope::Direct),
            lodash().with_scope(Scope::Transitive),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].scope(), Scope::Direct);
    }

    #[test]
    fn test_merge_hashes_and_first_seen_license() {
        let merged = merge_components(vec![
            lodash().with_license("MIT").with_hash("SHA-512", "aa"),
            lodash().with_license("ISC").with_hash("SHA-1", "bb"),
        ]);
        assert_eq!(merged[0].license(), Some("MIT"));
        assert_eq!(merged[0].hashes().len(), 2);
    }

    #[test]
    fn test_triplet_key_distinguishes_versions() {
        let merged = merge_components(vec![
            Component::new("internal", "1.0.0"),
            Component::new("internal", "2.0.0"),
        ]);
        assert_eq!(merged.len(), 2);
    }

    struct Fixed(&'static str, Vec<Component>);
    struct Failing;
    struct Panicking;

    #[async_trait]
    impl Scanner for Fixed {
        fn id(&self) -> &'static str {
            self.0
        }
        fn name(&self) -> &'static str {
            self.0
        }
        fn ecosystem(&self) -> Ecosystem {
            Ecosystem::Npm
        }
        fn marker_files(&self) -> &'static [&'static str] {
            &[]
        }
        fn detect(&self, _path: &Path) -> bool {
            true
        }
        async fn scan(&self, _path: &Path, _include_dev: bool) -> Result<Vec<Component>> {
            Ok(self.1.clone())
        }
    }

    #[async_trait]
    impl Scanner for Failing {
        fn id(&self) -> &'static str {
            "failing"
        }
        fn name(&self) -> &'static str {
            "failing"
        }
        fn ecosystem(&self) -> Ecosystem {
            Ecosystem::Cargo
        }
        fn marker_files(&self) -> &'static [&'static str] {
            &[]
        }
        fn detect(&self, _path: &Path) -> bool {
            true
        }
        async fn scan(&self, _path: &Path, _include_dev: bool) -> Result<Vec<Component>> {
            bail!("boom")
        }
    }

    #[async_trait]
    impl Scanner for Panicking {
        fn id(&self) -> &'static str {
            "panicking"
        }
        fn name(&self) -> &'static str {
            "panicking"
        }
        fn ecosystem(&self) -> Ecosystem {
            Ecosystem::Gem
        }
        fn marker_files(&self) -> &'static [&'static str] {
            &[]
        }
        fn detect(&self, _path: &Path) -> bool {
            true
        }
        async fn scan(&self, _path: &Path, _include_dev: bool) -> Result<Vec<Component>> {
            panic!("scanner bug")
        }
    }

    #[tokio::test]
    async fn test_failing_scanners_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = Aggregator::with_scanners(vec![
            Arc::new(Failing),
            Arc::new(Fixed("a", vec![lodash()])),
            Arc::new(Panicking),
        ]);

        let result = aggregator.scan(dir.path(), false).await.unwrap();
        assert_eq!(result.components.len(), 1);
        assert_eq!(result.technologies, vec!["Node.js"]);
    }

    #[tokio::test]
    async fn test_scanner_order_is_irrelevant() {
        let dir = tempfile::tempdir().unwrap();
        let first = Fixed("a", vec![lodash().with_scope(Scope::Dev), Component::new("x", "1")]);
        let second = Fixed("b", vec![lodash().with_scope(Scope::Direct)]);

        let forward = Aggregator::with_scanners(vec![
            Arc::new(Fixed(first.0, first.1.clone())),
            Arc::new(Fixed(second.0, second.1.clone())),
        ]);
        let backward = Aggregator::with_scanners(vec![Arc::new(second), Arc::new(first)]);

        let f = forward.scan(dir.path(), true).await.unwrap();
        let b = backward.scan(dir.path(), true).await.unwrap();
        assert_eq!(keys(&f.components), keys(&b.components));
        assert_eq!(f.stats, b.stats);
    }

    #[tokio::test]
    async fn test_missing_path_is_access_error() {
        let err = Aggregator::new()
            .scan(Path::new("/nonexistent/depscan/repo"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::RepositoryAccess { .. }));
    }

    #[tokio::test]
    async fn test_end_to_end_node_repository() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{ "dependencies": { "lodash": "^4.17.0" } }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("package-lock.json"),
            r#"{ "lockfileVersion": 3, "packages": { "node_modules/lodash": { "version": "4.17.21" } } }"#,
        )
        .unwrap();

        let result = Aggregator::new().scan(dir.path(), false).await.unwrap();
        assert_eq!(result.technologies, vec!["Node.js"]);
        assert_eq!(result.components.len(), 1);
        assert_eq!(result.components[0].version(), "4.17.21");
        assert_eq!(result.stats.direct, 1);
    }
}
