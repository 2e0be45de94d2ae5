//! Technology detection.
//!
//! Runs every registered scanner's cheap `detect` check against a
//! repository root and reports which ecosystems apply, together with the
//! marker files that triggered each one.

use crate::model::Ecosystem;
use crate::scanner::{all_scanners, Scanner};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// One detected technology in a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Technology {
    pub name: String,
    /// Id of the scanner that recognized it.
    pub scanner: String,
    pub ecosystem: Ecosystem,
    /// Marker files present at the repository root.
    pub files: Vec<String>,
}

/// Selects the scanners that apply to a path.
///
/// # Example
///
/// ```no_run
/// use depscan::detector::TechnologyDetector;
/// use std::path::Path;
///
/// let detector = TechnologyDetector::new();
/// for tech in detector.detect_stack(Path::new(".")) {
///     println!("{}: {}", tech.name, tech.files.join(", "));
/// }
/// ```
#[derive(Clone)]
pub struct TechnologyDetector {
    scanners: Vec<Arc<dyn Scanner>>,
}

impl TechnologyDetector {
    /// A detector over every registered scanner.
    pub fn new() -> Self {
        Self::with_scanners(all_scanners())
    }

    pub fn with_scanners(scanners: Vec<Arc<dyn Scanner>>) -> Self {
        Self { scanners }
    }

    pub fn scanners(&self) -> &[Arc<dyn Scanner>] {
        &self.scanners
    }

    /// Scanners whose `detect` fires for `path`, in registry order.
    pub fn applicable(&self, path: &Path) -> Vec<Arc<dyn Scanner>> {
        self.scanners
            .iter()
            .filter(|s| s.detect(path))
            .cloned()
            .collect()
    }

    /// The technology stack of `path`.
    pub fn detect_stack(&self, path: &Path) -> Vec<Technology> {
        self.applicable(path)
            .iter()
            .map(|s| Technology {
                name: s.technology().to_string(),
                scanner: s.id().to_string(),
                ecosystem: s.ecosystem(),
                files: s.matched_files(path),
            })
            .collect()
    }
}

impl Default for TechnologyDetector {
    fn default() -> Self {
        Self::new()
    }
}
