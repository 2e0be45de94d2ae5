//! Repository sources.
//!
//! A [`Checkout`] is a repository materialized on the local filesystem.
//! A [`RepositoryProvider`] lists the repositories of an organization and
//! materializes them one at a time.

use crate::error::{ApiError, ScanError};
use crate::model::RepositoryDescriptor;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scannable repository on disk.
///
/// Temporary checkouts delete their directory when dropped, on every exit
/// path of the task that owns them.
#[derive(Debug)]
pub enum Checkout {
    /// An existing directory. Never removed.
    Local(PathBuf),
    Temporary { dir: TempDir, path: PathBuf },
}

impl Checkout {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Checkout::Local(path.into())
    }

    /// A checkout at `path` inside `dir`, cleaned up together with `dir`.
    pub fn temporary(dir: TempDir, path: impl Into<PathBuf>) -> Self {
        Checkout::Temporary {
            dir,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Checkout::Local(path) => path,
            Checkout::Temporary { path, .. } => path,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Checkout::Temporary { .. })
    }
}

/// What the configured credentials can see in an organization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessReport {
    pub org_access: bool,
    pub private_repos: bool,
}

/// Lists and materializes the repositories of a hosting organization.
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// Checks organization access and, when requested, private repository access.
    async fn validate_access(
        &self,
        organization: &str,
        include_private: bool,
    ) -> Result<AccessReport, ApiError>;

    /// Every repository of the organization, unfiltered.
    async fn list_repositories(
        &self,
        organization: &str,
    ) -> Result<Vec<RepositoryDescriptor>, ApiError>;

    /// Makes `repo` available on the local filesystem.
    async fn materialize(&self, repo: &RepositoryDescriptor) -> Result<Checkout, ScanError>;
}
