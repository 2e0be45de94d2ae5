//! Per-ecosystem dependency scanners.
//!
//! This module provides the [`Scanner`] trait and one implementation per
//! supported package ecosystem.
//!
//! # Available Scanners
//!
//! | Scanner | Marker files | Lock file |
//! |---------|--------------|-----------|
//! | [`MavenScanner`] | `pom.xml` | `mvn dependency:tree` when available |
//! | [`PythonScanner`] | `requirements*.txt`, `pyproject.toml`, `Pipfile` | `poetry.lock`, `Pipfile.lock` |
//! | [`NodeScanner`] | `package.json` | `package-lock.json` |
//! | [`GoScanner`] | `go.mod` | `go.sum` |
//! | [`RustScanner`] | `Cargo.toml` | `Cargo.lock` |
//! | [`RubyScanner`] | `Gemfile` | `Gemfile.lock` |
//! | [`FlutterScanner`] | `pubspec.yaml` | `pubspec.lock` |
//!
//! Every scanner follows the same contract: `detect` is a cheap file
//! existence check, `scan` never fails because of a single bad entry, and
//! lock-file versions win over manifest ranges.
//!
//! # Example
//!
//! ```no_run
//! use depscan::scanner::all_scanners;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repo = Path::new(".");
//!     for scanner in all_scanners() {
//!         if scanner.detect(repo) {
//!             let components = scanner.scan(repo, false).await?;
//!             println!("{}: {} components", scanner.name(), components.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod flutter;
mod go;
mod maven;
mod node;
mod python;
mod ruby;
mod rust;

pub use flutter::FlutterScanner;
pub use go::GoScanner;
pub use maven::MavenScanner;
pub use node::NodeScanner;
pub use python::PythonScanner;
pub use ruby::RubyScanner;
pub use rust::RustScanner;

use crate::error::ScanError;
use crate::model::{Component, Ecosystem};
use anyhow::Result;
use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Detect/scan capability for one package ecosystem.
///
/// # Example
///
/// ```no_run
/// use depscan::scanner::{NodeScanner, Scanner};
/// use std::path::Path;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let scanner = NodeScanner;
///     let repo = Path::new("./my-app");
///
///     if scanner.detect(repo) {
///         for c in scanner.scan(repo, false).await? {
///             println!("{}: {}", c.name(), c.version());
///         }
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Stable identifier, e.g. `"node"`.
    fn id(&self) -> &'static str;

    /// Returns the human-readable name of this scanner.
    fn name(&self) -> &'static str;

    fn ecosystem(&self) -> Ecosystem;

    /// Technology reported when this scanner fires.
    fn technology(&self) -> &'static str {
        self.ecosystem().technology()
    }

    /// Files whose presence at the repository root marks this ecosystem.
    fn marker_files(&self) -> &'static [&'static str];

    /// Marker files actually present under `path`.
    fn matched_files(&self, path: &Path) -> Vec<String> {
        self.marker_files()
            .iter()
            .filter(|f| path.join(f).is_file())
            .map(|f| f.to_string())
            .collect()
    }

    /// Cheap, side-effect free check for whether this scanner applies.
    fn detect(&self, path: &Path) -> bool {
        !self.matched_files(path).is_empty()
    }

    /// Discovers the dependencies under `path`.
    ///
    /// Dev-scoped components are omitted unless `include_dev` is set.
    /// Malformed entries are skipped rather than failing the scan.
    async fn scan(&self, path: &Path, include_dev: bool) -> Result<Vec<Component>>;
}

/// Returns every registered scanner.
///
/// # Example
///
/// ```
/// use depscan::scanner::all_scanners;
///
/// let scanners = all_scanners();
/// assert_eq!(scanners.len(), 7);
/// ```
pub fn all_scanners() -> Vec<Arc<dyn Scanner>> {
    vec![
        Arc::new(MavenScanner::default()),
        Arc::new(PythonScanner),
        Arc::new(NodeScanner),
        Arc::new(GoScanner),
        Arc::new(RustScanner),
        Arc::new(RubyScanner),
        Arc::new(FlutterScanner),
    ]
}

/// Returns the scanner registered under `id`, if any.
///
/// ```
/// use depscan::scanner::get_scanner;
///
/// assert_eq!(get_scanner("node").unwrap().name(), "Node.js (npm)");
/// assert!(get_scanner("cobol").is_none());
/// ```
pub fn get_scanner(id: &str) -> Option<Arc<dyn Scanner>> {
    all_scanners().into_iter().find(|s| s.id() == id)
}

/// Reads a dependency file, logging and swallowing I/O errors.
pub(crate) fn read_dependency_file(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            let err = ScanError::ScannerParse {
                file: path.display().to_string(),
                reason: e.to_string(),
            };
            tracing::warn!(error = %err, "skipping unreadable dependency file");
            None
        }
    }
}

/// Logs a recoverable parse failure for one file.
pub(crate) fn log_parse_failure(path: &Path, reason: impl std::fmt::Display) {
    let err = ScanError::ScannerParse {
        file: path.display().to_string(),
        reason: reason.to_string(),
    };
    tracing::warn!(error = %err, "skipping malformed dependency file");
}

/// Splits an npm-style subresource integrity string (`sha512-<base64>`)
/// into `(algorithm, value)`.
pub(crate) fn split_integrity(integrity: &str) -> Option<(String, String)> {
    let (algo, value) = integrity.split_once('-')?;
    let algorithm = match algo.to_lowercase().as_str() {
        "sha1" => "SHA-1",
        "sha256" => "SHA-256",
        "sha384" => "SHA-384",
        "sha512" => "SHA-512",
        _ => return None,
    };
    Some((algorithm.to_string(), value.to_string()))
}

/// Directories never descended into when looking for nested manifests.
pub(crate) fn is_ignored_dir(name: &str) -> bool {
    matches!(
        name,
        "target" | "node_modules" | ".git" | "build" | "dist" | "vendor" | ".venv" | "venv"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_ids_are_unique() {
        let scanners = all_scanners();
        let mut ids: Vec<_> = scanners.iter().map(|s| s.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), scanners.len());
    }

    #[test]
    fn test_split_integrity() {
        assert_eq!(
            split_integrity("sha512-abc=="),
            Some(("SHA-512".to_string(), "abc==".to_string()))
        );
        assert_eq!(split_integrity("md5-abc"), None);
        assert_eq!(split_integrity("garbage"), None);
    }

    #[test]
    fn test_detect_uses_marker_files() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = get_scanner("go").unwrap();
        assert!(!scanner.detect(dir.path()));

        fs::write(dir.path().join("go.mod"), "module example.com/app\n").unwrap();
        assert!(scanner.detect(dir.path()));
        assert_eq!(scanner.matched_files(dir.path()), vec!["go.mod"]);
    }
}
